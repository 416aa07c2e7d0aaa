//! Sessions: causally chained work over pooled connections.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use parking_lot::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::bookmark::Bookmark;
use super::connection::Connection;
use super::error::{DriverResult, DriverError};
use super::message;
use super::record::QueryResult;
use super::transaction::ExplicitTransaction;
use super::types::Value;

/// Source of ready-to-use connections (a pool, or a routing layer over one).
pub trait ConnectionProvider: Send + Sync + 'static {
    /// Acquire a connection for one unit of work.
    fn acquire(&self) -> BoxFuture<'_, DriverResult<Connection>>;
}

/// Session tuning knobs.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Initial causal constraints; the newest one is used
    pub bookmarks: Vec<Bookmark>,
    /// Total time allowed for retrying transaction functions
    pub max_transaction_retry_time: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            bookmarks: Vec::new(),
            max_transaction_retry_time: Duration::from_secs(30),
        }
    }
}

/// A logical unit of causally chained work.
///
/// Each statement or transaction borrows a connection from the provider and
/// gives it back when done; the session itself only carries the bookmark
/// chain linking them.
pub struct Session {
    provider: Arc<dyn ConnectionProvider>,
    last_bookmark: RwLock<Bookmark>,
    max_retry_time: Duration,
    open: AtomicBool,
    interrupt: CancellationToken,
}

impl Session {
    /// Session over a connection provider.
    pub fn new(provider: Arc<dyn ConnectionProvider>, config: SessionConfig) -> Self {
        Self {
            provider,
            last_bookmark: RwLock::new(Bookmark::from_bookmarks(&config.bookmarks)),
            max_retry_time: config.max_transaction_retry_time,
            open: AtomicBool::new(true),
            interrupt: CancellationToken::new(),
        }
    }

    // ===== Statements =====

    /// Run a single auto-commit statement and consume its result.
    pub async fn run(
        &self,
        statement: impl Into<String>,
        parameters: HashMap<String, Value>,
    ) -> DriverResult<QueryResult> {
        self.ensure_open()?;
        let connection = self.provider.acquire().await?;
        let pending = connection.run_statement(statement, parameters, true);
        let result = match connection
            .wait_interruptibly(&pending.stream_completed(), &self.interrupt)
            .await
        {
            Ok(()) => pending.consume().await,
            Err(error) => Err(error),
        };
        let _ = connection.release().wait().await;
        let result = result?;
        if let Some(bookmark) = message::bookmark(&result.metadata) {
            self.update_bookmark(&bookmark);
        }
        Ok(result)
    }

    // ===== Transactions =====

    /// Begin an explicit transaction chained after this session's bookmark.
    pub async fn begin_transaction(&self) -> DriverResult<ExplicitTransaction> {
        self.ensure_open()?;
        let connection = self.provider.acquire().await?;
        ExplicitTransaction::begin_with_interrupt(
            connection,
            self.last_bookmark(),
            self.interrupt.child_token(),
        )
        .await
    }

    /// Run a unit of write work in a transaction, retrying on transient
    /// failures.
    ///
    /// The work function may run several times; it must be safe to repeat.
    /// Returning `Ok` commits, returning `Err` rolls back. Commit failures go
    /// through the same retry classification as work failures.
    pub async fn write_transaction<F, Fut, T>(&self, work: F) -> DriverResult<T>
    where
        F: Fn(Arc<ExplicitTransaction>) -> Fut,
        Fut: Future<Output = DriverResult<T>>,
    {
        self.execute_with_retry(work).await
    }

    /// Run a unit of read work in a transaction, retrying on transient
    /// failures.
    pub async fn read_transaction<F, Fut, T>(&self, work: F) -> DriverResult<T>
    where
        F: Fn(Arc<ExplicitTransaction>) -> Fut,
        Fut: Future<Output = DriverResult<T>>,
    {
        self.execute_with_retry(work).await
    }

    async fn execute_with_retry<F, Fut, T>(&self, work: F) -> DriverResult<T>
    where
        F: Fn(Arc<ExplicitTransaction>) -> Fut,
        Fut: Future<Output = DriverResult<T>>,
    {
        self.ensure_open()?;
        let started = Instant::now();
        let mut attempts: u32 = 0;
        loop {
            attempts += 1;
            match self.try_transaction(&work).await {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if !error.is_retryable() || started.elapsed() >= self.max_retry_time {
                        return Err(error);
                    }
                    let backoff = Duration::from_millis(100)
                        .saturating_mul(attempts)
                        .min(Duration::from_secs(5));
                    tracing::warn!(
                        %error,
                        attempt = attempts,
                        backoff_ms = backoff.as_millis() as u64,
                        "transaction failed, retrying"
                    );
                    tokio::time::sleep(backoff).await;
                }
            }
        }
    }

    async fn try_transaction<F, Fut, T>(&self, work: &F) -> DriverResult<T>
    where
        F: Fn(Arc<ExplicitTransaction>) -> Fut,
        Fut: Future<Output = DriverResult<T>>,
    {
        let connection = self.provider.acquire().await?;
        let tx = Arc::new(
            ExplicitTransaction::begin_with_interrupt(
                connection,
                self.last_bookmark(),
                self.interrupt.child_token(),
            )
            .await?,
        );
        match work(Arc::clone(&tx)).await {
            Ok(value) => {
                tx.commit().await?;
                self.update_bookmark(&tx.bookmark());
                Ok(value)
            }
            Err(error) => {
                let _ = tx.close().await;
                Err(error)
            }
        }
    }

    // ===== Bookmarks and lifecycle =====

    /// The bookmark of the last completed work.
    pub fn last_bookmark(&self) -> Bookmark {
        self.last_bookmark.read().clone()
    }

    /// Chain the session after the given bookmark. Empty bookmarks are
    /// ignored.
    pub fn update_bookmark(&self, bookmark: &Bookmark) {
        if !bookmark.is_empty() {
            *self.last_bookmark.write() = bookmark.clone();
        }
    }

    /// Token that interrupts this session's server-response waits (and those
    /// of transactions it started) when cancelled.
    pub fn interrupt_handle(&self) -> CancellationToken {
        self.interrupt.clone()
    }

    /// Whether the session accepts new work.
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Close the session. Work already handed out is unaffected.
    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
    }

    fn ensure_open(&self) -> DriverResult<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(DriverError::client_usage("Session has been closed"))
        }
    }
}
