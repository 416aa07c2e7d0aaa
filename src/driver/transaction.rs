//! Explicit transactions.
//!
//! A transaction owns one connection for its whole lifetime and releases it
//! exactly once, when the transaction finishes. Lifecycle transitions go
//! through compare-and-set on a single state byte, so concurrent commit,
//! rollback and termination calls agree on one winner.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::bookmark::Bookmark;
use super::connection::Connection;
use super::error::{DriverError, DriverResult};
use super::message;
use super::record::{PendingResult, QueryResult};
use super::types::Value;

const TX_ACTIVE: u8 = 0;
const TX_MARKED_SUCCESS: u8 = 1;
const TX_MARKED_FAILURE: u8 = 2;
const TX_COMMITTED: u8 = 3;
const TX_ROLLED_BACK: u8 = 4;
const TX_TERMINATED: u8 = 5;

/// Observable lifecycle state of an explicit transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Running, outcome undecided
    Active,
    /// Will commit when closed
    MarkedSuccess,
    /// Will roll back when closed
    MarkedFailure,
    /// Commit finished
    Committed,
    /// Rollback finished
    RolledBack,
    /// Killed from outside; no further statements, close rolls back
    Terminated,
}

/// A transaction begun with an explicit BEGIN.
#[derive(Debug)]
pub struct ExplicitTransaction {
    connection: Connection,
    state: AtomicU8,
    bookmark: Mutex<Bookmark>,
    interrupt: CancellationToken,
}

impl ExplicitTransaction {
    /// Begin a transaction on a dedicated connection.
    ///
    /// Without a bookmark, BEGIN is pipelined and this returns immediately;
    /// its outcome surfaces with the first statement. With a bookmark, BEGIN
    /// must round-trip so the causal constraint is known to hold before any
    /// statement runs. If BEGIN fails, the connection is released before the
    /// error is returned.
    pub async fn begin(connection: Connection, initial_bookmark: Bookmark) -> DriverResult<Self> {
        Self::begin_with_interrupt(connection, initial_bookmark, CancellationToken::new()).await
    }

    /// Like [`begin`](Self::begin), waiting on the given interruption token.
    ///
    /// Cancelling the token while the transaction waits on a server response
    /// terminates its connection and fails the wait: an interrupted wait
    /// leaves request/response correlation undefined, so the connection can
    /// not be reused.
    pub async fn begin_with_interrupt(
        connection: Connection,
        initial_bookmark: Bookmark,
        interrupt: CancellationToken,
    ) -> DriverResult<Self> {
        let tx = Self {
            connection,
            state: AtomicU8::new(TX_ACTIVE),
            bookmark: Mutex::new(Bookmark::empty()),
            interrupt,
        };
        tx.write_begin(initial_bookmark).await?;
        Ok(tx)
    }

    async fn write_begin(&self, bookmark: Bookmark) -> DriverResult<()> {
        if bookmark.is_empty() {
            let _ = self.connection.run_statement("BEGIN", HashMap::new(), false);
            return Ok(());
        }
        let mut parameters = HashMap::new();
        parameters.insert(
            "bookmark".to_string(),
            Value::from(bookmark.max_bookmark_as_string()),
        );
        let pending = self.connection.run_statement("BEGIN", parameters, true);
        if let Err(error) = self.consume_interruptibly(pending).await {
            let _ = self.connection.release().wait().await;
            return Err(error);
        }
        Ok(())
    }

    /// Wait for a pending result, treating interruption as a fatal transport
    /// event for this transaction's connection.
    async fn consume_interruptibly(&self, pending: PendingResult) -> DriverResult<QueryResult> {
        self.connection
            .wait_interruptibly(&pending.stream_completed(), &self.interrupt)
            .await?;
        pending.consume().await
    }

    // ===== Statements =====

    /// Pipeline a statement without flushing.
    pub fn run(
        &self,
        statement: impl Into<String>,
        parameters: HashMap<String, Value>,
    ) -> DriverResult<PendingResult> {
        self.ensure_can_run()?;
        Ok(self.connection.run_statement(statement, parameters, false))
    }

    /// Pipeline a statement and flush it.
    pub fn run_and_flush(
        &self,
        statement: impl Into<String>,
        parameters: HashMap<String, Value>,
    ) -> DriverResult<PendingResult> {
        self.ensure_can_run()?;
        Ok(self.connection.run_statement(statement, parameters, true))
    }

    /// Run a statement and wait for its full result.
    pub async fn execute(
        &self,
        statement: impl Into<String>,
        parameters: HashMap<String, Value>,
    ) -> DriverResult<QueryResult> {
        let pending = self.run_and_flush(statement, parameters)?;
        self.consume_interruptibly(pending).await
    }

    fn ensure_can_run(&self) -> DriverResult<()> {
        let blocked = match self.state.load(Ordering::SeqCst) {
            TX_COMMITTED => "committed",
            TX_ROLLED_BACK => "rolled back",
            TX_TERMINATED => "terminated",
            _ => return Ok(()),
        };
        Err(DriverError::client_usage(format!(
            "Cannot run more statements in this transaction, it has been {}",
            blocked
        )))
    }

    // ===== Outcome marks =====

    /// Mark for commit on close. Ignored once the outcome is decided.
    pub fn success(&self) {
        let _ = self.state.compare_exchange(
            TX_ACTIVE,
            TX_MARKED_SUCCESS,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    /// Mark for rollback on close. Overrides a success mark.
    pub fn failure(&self) {
        for from in [TX_ACTIVE, TX_MARKED_SUCCESS] {
            if self
                .state
                .compare_exchange(from, TX_MARKED_FAILURE, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return;
            }
        }
    }

    /// Kill the transaction from outside (reset, expiry).
    ///
    /// The transaction stays open until closed, but accepts no further
    /// statements and will not commit.
    pub fn mark_terminated(&self) {
        for from in [TX_ACTIVE, TX_MARKED_SUCCESS, TX_MARKED_FAILURE] {
            if self
                .state
                .compare_exchange(from, TX_TERMINATED, Ordering::SeqCst, Ordering::SeqCst)
                .is_ok()
            {
                return;
            }
        }
    }

    // ===== Completion =====

    /// Commit and release the connection.
    pub async fn commit(&self) -> DriverResult<()> {
        loop {
            match self.state.load(Ordering::SeqCst) {
                TX_COMMITTED => return Ok(()),
                TX_ROLLED_BACK => {
                    return Err(DriverError::client_usage(
                        "Can't commit, transaction has been rolled back",
                    ))
                }
                TX_TERMINATED => {
                    if self
                        .state
                        .compare_exchange(
                            TX_TERMINATED,
                            TX_ROLLED_BACK,
                            Ordering::SeqCst,
                            Ordering::SeqCst,
                        )
                        .is_ok()
                    {
                        let _ = self.connection.release().wait().await;
                        return Err(DriverError::client_usage(
                            "Can't commit, transaction has been terminated",
                        ));
                    }
                }
                current => {
                    if self
                        .state
                        .compare_exchange(current, TX_COMMITTED, Ordering::SeqCst, Ordering::SeqCst)
                        .is_ok()
                    {
                        return self.write_commit().await;
                    }
                }
            }
        }
    }

    /// Roll back and release the connection.
    ///
    /// Called on a terminated transaction this still writes ROLLBACK: the
    /// termination may not have reached the server, and a stray open
    /// transaction would hold locks until its connection dies.
    pub async fn rollback(&self) -> DriverResult<()> {
        loop {
            match self.state.load(Ordering::SeqCst) {
                TX_ROLLED_BACK => return Ok(()),
                TX_COMMITTED => {
                    return Err(DriverError::client_usage(
                        "Can't rollback, transaction has been committed",
                    ))
                }
                current => {
                    if self
                        .state
                        .compare_exchange(
                            current,
                            TX_ROLLED_BACK,
                            Ordering::SeqCst,
                            Ordering::SeqCst,
                        )
                        .is_ok()
                    {
                        return self.write_rollback().await;
                    }
                }
            }
        }
    }

    /// Finish according to the marked outcome: commit when marked successful,
    /// otherwise roll back. No-op when already finished.
    pub async fn close(&self) -> DriverResult<()> {
        match self.state.load(Ordering::SeqCst) {
            TX_MARKED_SUCCESS => self.commit().await,
            TX_COMMITTED | TX_ROLLED_BACK => Ok(()),
            _ => self.rollback().await,
        }
    }

    async fn write_commit(&self) -> DriverResult<()> {
        let pending = self.connection.run_statement("COMMIT", HashMap::new(), true);
        let result = self.consume_interruptibly(pending).await;
        let _ = self.connection.release().wait().await;
        let result = result?;
        self.set_bookmark(message::bookmark(&result.metadata));
        Ok(())
    }

    async fn write_rollback(&self) -> DriverResult<()> {
        let pending = self.connection.run_statement("ROLLBACK", HashMap::new(), true);
        let result = self.consume_interruptibly(pending).await.map(|_| ());
        let _ = self.connection.release().wait().await;
        result
    }

    // ===== Accessors =====

    /// Whether the transaction may still be used or closed.
    ///
    /// A terminated transaction counts as open: it still has to be closed to
    /// give its connection back.
    pub fn is_open(&self) -> bool {
        !matches!(
            self.state.load(Ordering::SeqCst),
            TX_COMMITTED | TX_ROLLED_BACK
        )
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TransactionState {
        match self.state.load(Ordering::SeqCst) {
            TX_ACTIVE => TransactionState::Active,
            TX_MARKED_SUCCESS => TransactionState::MarkedSuccess,
            TX_MARKED_FAILURE => TransactionState::MarkedFailure,
            TX_COMMITTED => TransactionState::Committed,
            TX_ROLLED_BACK => TransactionState::RolledBack,
            _ => TransactionState::Terminated,
        }
    }

    /// Token that interrupts this transaction's server-response waits when
    /// cancelled.
    pub fn interrupt_handle(&self) -> CancellationToken {
        self.interrupt.clone()
    }

    /// Bookmark of the committed transaction, empty until commit succeeds.
    pub fn bookmark(&self) -> Bookmark {
        self.bookmark.lock().clone()
    }

    /// Record a new bookmark. Absent or empty bookmarks never overwrite an
    /// existing one.
    pub fn set_bookmark(&self, bookmark: Option<Bookmark>) {
        if let Some(bookmark) = bookmark {
            if !bookmark.is_empty() {
                *self.bookmark.lock() = bookmark;
            }
        }
    }
}
