//! # GraphWire Driver Core
//!
//! Client-side session, transaction and connection core for the GraphWire
//! graph database protocol.
//!
//! ## Features
//!
//! - **Pipelined Execution** - Statements are written without waiting for
//!   earlier responses; replies are matched back to callers strictly in order
//! - **Async/Await** - Built on Tokio; one lightweight task per connection
//!   owns the channel, so no locks sit on the hot path
//! - **Explicit Transactions** - BEGIN/COMMIT/ROLLBACK with race-safe
//!   lifecycle transitions and outcome marks
//! - **Causal Chaining** - Bookmarks thread causal consistency through a
//!   session's statements and transactions
//! - **Pluggable Transport** - The wire codec and connection pool attach at
//!   narrow trait seams ([`Channel`], [`ChannelPool`], [`ConnectionProvider`])
//!
//! ## Basic Usage
//!
//! ```rust,ignore
//! use graphwire_driver::{Session, SessionConfig, params};
//!
//! # async fn example(provider: std::sync::Arc<dyn graphwire_driver::ConnectionProvider>)
//! # -> graphwire_driver::DriverResult<()> {
//! let session = Session::new(provider, SessionConfig::default());
//!
//! let result = session.run(
//!     "CREATE (n:Person {name: $name}) RETURN n",
//!     params!{"name" => "Alice"},
//! ).await?;
//!
//! for record in &result {
//!     println!("{:?}", record);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Transactions
//!
//! ```rust,ignore
//! let tx = session.begin_transaction().await?;
//! tx.execute("CREATE (n:Node {id: 1})", params!{}).await?;
//! tx.execute("CREATE (n:Node {id: 2})", params!{}).await?;
//! tx.success();
//! tx.close().await?;
//! ```
//!
//! ## Transaction Functions
//!
//! For automatic retry on transient errors:
//!
//! ```rust,ignore
//! let created = session.write_transaction(|tx| async move {
//!     let result = tx.execute("CREATE (n:Node) RETURN n", params!{}).await?;
//!     Ok(result.len())
//! }).await?;
//! ```
//!
//! ## Error Handling
//!
//! All operations return [`DriverResult`]. Server failures keep their
//! structured code, and [`DriverError::is_retryable`] classifies which
//! failures a transaction function may retry.

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod driver;

// Re-exports for convenience
pub use driver::{
    Bookmark, Channel, ChannelPool, Connection, ConnectionProvider, DriverError, DriverResult,
    ExplicitTransaction, InboundMessageDispatcher, InboundSink, Message, Metadata,
    MetricsListener, NoOpMetricsListener, PendingResult, ProtocolEvent, QueryResult, Record,
    ResponseHandler, ServerAddress, Session, SessionConfig, Signal, TransactionState, Value,
};
