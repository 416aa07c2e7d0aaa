//! A pooled server connection with pipelined request execution.
//!
//! A connection wraps one pooled channel and the lane task that owns it. The
//! public methods only enqueue work; everything that touches the channel or
//! the handler queue happens on the lane, in queue order. Status transitions
//! (open, released, terminated) are single compare-and-set operations, so
//! exactly one caller wins each transition no matter how many race.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::channel::{Channel, ChannelPool, InboundSink, LaneTask, ServerAddress};
use super::channel::spawn_event_loop;
use super::error::{DriverError, DriverResult};
use super::handlers::{
    ChannelReleasingResetResponseHandler, ResetResponseHandler, ResponseHandler,
    RunResponseHandler, StreamingResponseHandler,
};
use super::metrics::MetricsListener;
use super::record::PendingResult;
use super::signal::Signal;
use super::types::Value;

// Connection status values. Transitions away from OPEN are one-way.
pub(crate) const S_OPEN: u8 = 0;
pub(crate) const S_RELEASED: u8 = 1;
pub(crate) const S_TERMINATED: u8 = 2;

/// A server connection executing pipelined statements.
#[derive(Clone)]
pub struct Connection {
    lane: mpsc::UnboundedSender<LaneTask>,
    status: Arc<AtomicU8>,
    release_done: Signal,
    server_address: ServerAddress,
    server_version: String,
    termination_reason: Arc<Mutex<Option<String>>>,
    metrics: Arc<dyn MetricsListener>,
}

impl Connection {
    /// Connection over a channel freshly acquired from the pool.
    pub fn new(
        channel: Box<dyn Channel>,
        pool: Arc<dyn ChannelPool>,
        server_address: ServerAddress,
        server_version: impl Into<String>,
        metrics: Arc<dyn MetricsListener>,
    ) -> Self {
        let status = Arc::new(AtomicU8::new(S_OPEN));
        let release_done = Signal::new();
        let lane = spawn_event_loop(
            channel,
            pool,
            Arc::clone(&status),
            release_done.clone(),
        );
        metrics.after_connection_created(&server_address);
        Self {
            lane,
            status,
            release_done,
            server_address,
            server_version: server_version.into(),
            termination_reason: Arc::new(Mutex::new(None)),
            metrics,
        }
    }

    // ===== Statement execution =====

    /// Pipeline a statement without flushing.
    pub fn run(
        &self,
        statement: impl Into<String>,
        parameters: HashMap<String, Value>,
        run_handler: ResponseHandler,
        pull_handler: ResponseHandler,
    ) {
        self.write_run(statement.into(), parameters, run_handler, pull_handler, false);
    }

    /// Pipeline a statement and flush it to the server.
    pub fn run_and_flush(
        &self,
        statement: impl Into<String>,
        parameters: HashMap<String, Value>,
        run_handler: ResponseHandler,
        pull_handler: ResponseHandler,
    ) {
        self.write_run(statement.into(), parameters, run_handler, pull_handler, true);
    }

    /// Pipeline a statement with default handlers and a pending result view.
    pub fn run_statement(
        &self,
        statement: impl Into<String>,
        parameters: HashMap<String, Value>,
        flush: bool,
    ) -> PendingResult {
        let run_handler = RunResponseHandler::new();
        let pull_handler = StreamingResponseHandler::new();
        let pending = PendingResult::new(
            run_handler.summary(),
            run_handler.completed(),
            pull_handler.state(),
            pull_handler.completed(),
        );
        self.write_run(
            statement.into(),
            parameters,
            ResponseHandler::Run(run_handler),
            ResponseHandler::Streaming(pull_handler),
            flush,
        );
        pending
    }

    fn write_run(
        &self,
        statement: String,
        parameters: HashMap<String, Value>,
        run_handler: ResponseHandler,
        pull_handler: ResponseHandler,
        flush: bool,
    ) {
        // a released or terminated connection writes nothing; both handlers
        // fail immediately
        if let Some(error) = self.state_error() {
            run_handler.on_failure(error.clone());
            pull_handler.on_failure(error);
            return;
        }
        let task = LaneTask::Run {
            statement,
            parameters,
            run_handler,
            pull_handler,
            flush,
        };
        if let Err(failed) = self.lane.send(task) {
            if let LaneTask::Run {
                run_handler,
                pull_handler,
                ..
            } = failed.0
            {
                // the lane only shuts down after a lifecycle transition, so
                // classify this the same way as the synchronous check above
                let error = self
                    .state_error()
                    .unwrap_or_else(|| DriverError::connection("Connection has been closed"));
                run_handler.on_failure(error.clone());
                pull_handler.on_failure(error);
            }
        }
    }

    // ===== Reset and lifecycle =====

    /// Ask the server to abandon any in-flight work.
    ///
    /// The returned signal resolves when the server acknowledged the reset.
    pub fn reset(&self) -> Signal {
        let handler = ResetResponseHandler::new();
        let completed = handler.completed();
        let task = LaneTask::Reset {
            handler: ResponseHandler::Reset(handler),
            session_reset: true,
        };
        if self.lane.send(task).is_err() {
            completed.complete_ok();
        }
        completed
    }

    /// Return the channel to the pool after a clearing RESET.
    ///
    /// Idempotent: only the first caller triggers the release, every caller
    /// gets the same completion signal.
    pub fn release(&self) -> Signal {
        if self
            .status
            .compare_exchange(S_OPEN, S_RELEASED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            self.metrics.after_connection_released(&self.server_address);
            let task = LaneTask::Reset {
                handler: ResponseHandler::ChannelReleasingReset(
                    ChannelReleasingResetResponseHandler,
                ),
                session_reset: false,
            };
            if self.lane.send(task).is_err() {
                self.release_done.complete_ok();
            }
        }
        self.release_done.clone()
    }

    /// Close the channel, fail all in-flight work and evict from the pool.
    ///
    /// Idempotent like [`release`](Self::release); losing callers get the
    /// winning transition's completion signal.
    pub fn terminate_and_release(&self, reason: impl Into<String>) -> Signal {
        if self
            .status
            .compare_exchange(S_OPEN, S_TERMINATED, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let reason = reason.into();
            *self.termination_reason.lock() = Some(reason.clone());
            self.metrics.after_connection_released(&self.server_address);
            if self.lane.send(LaneTask::Terminate { reason }).is_err() {
                self.release_done.complete_ok();
            }
        }
        self.release_done.clone()
    }

    /// Resume reading inbound data.
    pub fn enable_auto_read(&self) {
        if self.is_open() {
            let _ = self.lane.send(LaneTask::AutoRead(true));
        }
    }

    /// Pause reading inbound data (stream backpressure).
    pub fn disable_auto_read(&self) {
        if self.is_open() {
            let _ = self.lane.send(LaneTask::AutoRead(false));
        }
    }

    /// Wait on a signal, terminating the connection if the wait is
    /// interrupted.
    ///
    /// Once interrupted, responses and requests can no longer be matched up,
    /// so the connection is unusable and gets torn down before the error is
    /// returned.
    pub async fn wait_interruptibly(
        &self,
        signal: &Signal,
        interrupt: &CancellationToken,
    ) -> DriverResult<()> {
        tokio::select! {
            result = signal.wait() => result,
            _ = interrupt.cancelled() => {
                let reason = "interrupted while waiting for a server response";
                let _ = self.terminate_and_release(reason).wait().await;
                Err(DriverError::connection(format!(
                    "Connection terminated: {}",
                    reason
                )))
            }
        }
    }

    // ===== Accessors =====

    /// Whether the connection still owns its channel.
    pub fn is_open(&self) -> bool {
        self.status.load(Ordering::SeqCst) == S_OPEN
    }

    /// Address of the server this connection talks to.
    pub fn server_address(&self) -> &ServerAddress {
        &self.server_address
    }

    /// Version string the server reported during the handshake.
    pub fn server_version(&self) -> &str {
        &self.server_version
    }

    /// Why the connection was terminated, if it was.
    pub fn termination_reason(&self) -> Option<String> {
        self.termination_reason.lock().clone()
    }

    /// Handle for the codec layer to inject inbound events.
    pub fn inbound_sink(&self) -> InboundSink {
        InboundSink::new(self.lane.clone())
    }

    fn state_error(&self) -> Option<DriverError> {
        match self.status.load(Ordering::SeqCst) {
            S_RELEASED => Some(DriverError::client_usage(
                "Connection has been released to the pool and can't be used",
            )),
            S_TERMINATED => {
                let mut message =
                    String::from("Connection has been terminated and can't be used");
                if let Some(reason) = self.termination_reason.lock().as_ref() {
                    message.push_str(&format!(" (reason: {})", reason));
                }
                Some(DriverError::client_usage(message))
            }
            _ => None,
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("server_address", &self.server_address)
            .field("server_version", &self.server_version)
            .field("status", &self.status.load(Ordering::SeqCst))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::message::{Message, Metadata};
    use crate::driver::testing::{connection_harness, settle};

    #[tokio::test]
    async fn test_run_and_flush_writes_run_then_flushed_pull() {
        let harness = connection_harness();
        let pending = harness.connection.run_statement(
            "RETURN 1",
            HashMap::new(),
            true,
        );
        settle().await;

        {
            let writes = harness.writes.lock();
            assert_eq!(writes.len(), 2);
            assert_eq!(writes[0].0.statement(), Some("RETURN 1"));
            assert!(!writes[0].1, "RUN must not flush on its own");
            assert_eq!(writes[1].0, Message::PullAll);
            assert!(writes[1].1, "PULL_ALL carries the flush");
        }

        let mut run_metadata = Metadata::new();
        run_metadata.insert("fields".to_string(), Value::List(vec![Value::from("1")]));
        harness.sink.on_success(run_metadata);
        harness.sink.on_record(vec![Value::Integer(1)]);
        harness.sink.on_success(Metadata::new());

        let result = pending.consume().await.unwrap();
        assert_eq!(result.keys, vec!["1".to_string()]);
        assert_eq!(result.single().unwrap().get("1"), Some(&Value::Integer(1)));
    }

    #[tokio::test]
    async fn test_run_without_flush_buffers_both_messages() {
        let harness = connection_harness();
        let _pending = harness.connection.run_statement("BEGIN", HashMap::new(), false);
        settle().await;

        let writes = harness.writes.lock();
        assert_eq!(writes.len(), 2);
        assert!(!writes[0].1);
        assert!(!writes[1].1);
    }

    #[tokio::test]
    async fn test_run_on_released_connection_fails_without_writing() {
        let harness = connection_harness();
        let release = harness.connection.release();
        settle().await;
        harness.sink.on_success(Metadata::new());
        release.wait().await.unwrap();

        let pending = harness.connection.run_statement("RETURN 1", HashMap::new(), true);
        let error = pending.consume().await.unwrap_err();
        assert!(error.is_client_usage());
        assert!(error.to_string().contains("released to the pool"));

        // only the release RESET ever hit the channel
        let writes = harness.writes.lock();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].0, Message::Reset);
    }

    #[tokio::test]
    async fn test_release_returns_channel_to_pool_once() {
        let harness = connection_harness();
        let first = harness.connection.release();
        let second = harness.connection.release();
        settle().await;
        harness.sink.on_success(Metadata::new());

        first.wait().await.unwrap();
        second.wait().await.unwrap();
        settle().await;

        assert!(!harness.connection.is_open());
        assert_eq!(harness.released(), 1);
        assert!(!harness.is_closed(), "clean release keeps the channel usable");

        {
            let writes = harness.writes.lock();
            assert_eq!(writes.len(), 1, "second release must not write another RESET");
            assert_eq!(writes[0].0, Message::Reset);
            assert!(writes[0].1);
        }

        // a late terminate loses the lifecycle race and does nothing
        harness
            .connection
            .terminate_and_release("too late")
            .wait()
            .await
            .unwrap();
        settle().await;
        assert_eq!(harness.released(), 1);
        assert!(!harness.is_closed());
        assert_eq!(harness.connection.termination_reason(), None);
    }

    #[tokio::test]
    async fn test_failed_release_reset_evicts_channel() {
        let harness = connection_harness();
        let pending = harness.connection.run_statement("RETURN 1", HashMap::new(), true);
        let release = harness.connection.release();
        settle().await;

        // stale RUN failure is muted; PULL and then the RESET itself fail
        harness.sink.on_failure(DriverError::connection("broken pipe"));
        harness.sink.on_failure(DriverError::connection("broken pipe"));
        harness.sink.on_failure(DriverError::connection("broken pipe"));

        release.wait().await.unwrap();
        settle().await;
        assert!(pending.consume().await.is_err());
        assert_eq!(harness.released(), 1);
        assert!(harness.is_closed());
    }

    #[tokio::test]
    async fn test_terminate_fails_pending_work_and_evicts() {
        let harness = connection_harness();
        let pending = harness.connection.run_statement("RETURN 1", HashMap::new(), true);
        settle().await;

        let done = harness.connection.terminate_and_release("query timed out");
        done.wait().await.unwrap();
        settle().await;

        let error = pending.consume().await.unwrap_err();
        assert_eq!(
            error,
            DriverError::connection("Connection terminated: query timed out")
        );
        assert!(!harness.connection.is_open());
        assert_eq!(
            harness.connection.termination_reason(),
            Some("query timed out".to_string())
        );
        assert!(harness.is_closed());
        assert_eq!(harness.released(), 1);

        // new work fails with the recorded reason, classified as misuse
        let after = harness.connection.run_statement("RETURN 2", HashMap::new(), true);
        let error = after.consume().await.unwrap_err();
        assert!(error.is_client_usage());
        assert!(error.to_string().contains("query timed out"));
    }

    #[tokio::test]
    async fn test_reset_queued_behind_terminate_still_resolves() {
        let harness = connection_harness();
        let done = harness.connection.terminate_and_release("boom");
        // queued before the lane ever runs, so it sits behind the terminate
        let reset_done = harness.connection.reset();

        done.wait().await.unwrap();
        assert_eq!(reset_done.wait().await, Ok(()));
    }

    #[tokio::test]
    async fn test_reset_on_released_connection_reports_success() {
        let harness = connection_harness();
        let release = harness.connection.release();
        let reset_done = harness.connection.reset();
        settle().await;
        harness.sink.on_success(Metadata::new());

        release.wait().await.unwrap();
        assert_eq!(reset_done.wait().await, Ok(()));

        // no second RESET went out for the session reset
        let writes = harness.writes.lock();
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].0, Message::Reset);
    }

    #[tokio::test]
    async fn test_reset_mutes_one_in_flight_failure() {
        let harness = connection_harness();
        let pending = harness.connection.run_statement("RETURN 1", HashMap::new(), true);
        let reset_done = harness.connection.reset();
        settle().await;

        {
            let writes = harness.writes.lock();
            assert_eq!(writes[2].0, Message::Reset);
        }
        // reading is forced back on so the RESET ack can arrive
        assert_eq!(harness.auto_read.lock().last(), Some(&true));

        // stale failure of the abandoned RUN arrives before the RESET ack
        harness
            .sink
            .on_failure(DriverError::server("GraphWire.TransientError.Oops", "killed"));
        harness.sink.on_failure(DriverError::server(
            "GraphWire.TransientError.Oops",
            "killed",
        ));
        harness.sink.on_success(Metadata::new());

        // muted RUN failure, real PULL failure, RESET acked
        reset_done.wait().await.unwrap();
        assert!(pending.consume().await.is_err());
    }

    #[tokio::test]
    async fn test_wait_interruptibly_terminates_connection() {
        let harness = connection_harness();
        let pending = harness.connection.run_statement("RETURN 1", HashMap::new(), true);
        let never = pending.stream_completed();

        let interrupt = CancellationToken::new();
        interrupt.cancel();

        let error = harness
            .connection
            .wait_interruptibly(&never, &interrupt)
            .await
            .unwrap_err();
        assert!(error.to_string().contains("interrupted while waiting"));
        assert!(!harness.connection.is_open());
        settle().await;
        assert!(harness.is_closed());
    }

    #[tokio::test]
    async fn test_auto_read_toggles_reach_channel_only_while_open() {
        let harness = connection_harness();
        harness.connection.disable_auto_read();
        harness.connection.enable_auto_read();
        settle().await;
        assert_eq!(harness.auto_read.lock().as_slice(), &[false, true]);

        let release = harness.connection.release();
        settle().await;
        harness.sink.on_success(Metadata::new());
        release.wait().await.unwrap();

        harness.connection.disable_auto_read();
        settle().await;
        // release path forced auto-read on; nothing after that
        assert_eq!(harness.auto_read.lock().as_slice(), &[false, true, true]);
    }
}
