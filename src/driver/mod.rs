//! Driver Module
//!
//! Client-side core of the GraphWire wire protocol: connections with
//! pipelined request execution, explicit transactions and bookmark-chained
//! sessions. The transport codec plugs in at the [`Channel`] seam; connection
//! pooling plugs in at [`ChannelPool`] and [`ConnectionProvider`].
//!
//! # Example
//!
//! ```ignore
//! use graphwire_driver::{Session, SessionConfig, params};
//!
//! let session = Session::new(provider, SessionConfig::default());
//!
//! // auto-commit statement
//! let result = session.run("MATCH (n) RETURN n LIMIT 10", params!{}).await?;
//! for record in &result {
//!     println!("{:?}", record);
//! }
//!
//! // explicit transaction
//! let tx = session.begin_transaction().await?;
//! tx.execute("CREATE (n:Person {name: $name})", params!{"name" => "Alice"}).await?;
//! tx.success();
//! tx.close().await?;
//!
//! session.close();
//! ```

mod bookmark;
mod channel;
mod connection;
mod dispatch;
mod error;
mod handlers;
mod message;
mod metrics;
mod record;
mod session;
mod signal;
mod transaction;
mod types;

#[cfg(test)]
mod testing;

// Re-exports
pub use bookmark::Bookmark;
pub use channel::{Channel, ChannelPool, InboundSink, ProtocolEvent, ServerAddress};
pub use connection::Connection;
pub use dispatch::InboundMessageDispatcher;
pub use error::{DriverError, DriverResult};
pub use handlers::{
    ChannelReleasingResetResponseHandler, HandlerOutcome, ResetResponseHandler, ResponseHandler,
    RunResponseHandler, RunSummary, StreamingResponseHandler, StreamingState,
};
pub use message::{Message, Metadata};
pub use metrics::{MetricsListener, NoOpMetricsListener};
pub use record::{PendingResult, QueryResult, Record};
pub use session::{ConnectionProvider, Session, SessionConfig};
pub use signal::Signal;
pub use transaction::{ExplicitTransaction, TransactionState};
pub use types::Value;

/// Parameter map construction macro
#[macro_export]
macro_rules! params {
    () => {
        std::collections::HashMap::new()
    };
    ($($key:expr => $value:expr),+ $(,)?) => {{
        let mut map = std::collections::HashMap::new();
        $(
            map.insert($key.into(), $crate::driver::Value::from($value));
        )+
        map
    }};
}
