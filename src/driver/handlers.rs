//! Response handlers correlated with outbound messages.
//!
//! A closed set of variants: every message written on a connection registers
//! exactly one handler, and inbound events are delivered to handlers strictly
//! in registration order by the dispatcher.

use std::sync::Arc;

use parking_lot::Mutex;

use super::error::DriverError;
use super::message::{self, Metadata};
use super::signal::Signal;
use super::types::Value;

// ============================================================================
// HandlerOutcome
// ============================================================================

/// What the connection's lane must do after a handler completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Nothing beyond handler completion
    Continue,
    /// Hand the channel back to the pool, then resolve the release signal
    ReleaseChannel {
        /// Close the channel first so the pool evicts it
        evict: bool,
    },
}

// ============================================================================
// ResponseHandler
// ============================================================================

/// Handler for the terminating response (and interim records) of one message.
#[derive(Debug)]
pub enum ResponseHandler {
    /// Captures RUN metadata (result keys, time-to-first-result)
    Run(RunResponseHandler),
    /// Collects records and final metadata of a streamed result
    Streaming(StreamingResponseHandler),
    /// Completes a bare signal when RESET is acknowledged
    Reset(ResetResponseHandler),
    /// Completes the release sequence: RESET ack, then channel back to pool
    ChannelReleasingReset(ChannelReleasingResetResponseHandler),
}

impl ResponseHandler {
    /// Deliver the terminating SUCCESS event.
    pub fn on_success(self, metadata: Metadata) -> HandlerOutcome {
        match self {
            Self::Run(handler) => handler.on_success(metadata),
            Self::Streaming(handler) => handler.on_success(metadata),
            Self::Reset(handler) => handler.on_success(),
            Self::ChannelReleasingReset(handler) => handler.on_success(),
        }
    }

    /// Deliver the terminating FAILURE event.
    pub fn on_failure(self, error: DriverError) -> HandlerOutcome {
        match self {
            Self::Run(handler) => handler.on_failure(),
            Self::Streaming(handler) => handler.on_failure(error),
            Self::Reset(handler) => handler.on_failure(error),
            Self::ChannelReleasingReset(handler) => handler.on_failure(error),
        }
    }

    /// Deliver an interim RECORD event. Only streamed results may receive
    /// records; anything else means response correlation is broken.
    pub fn on_record(&mut self, fields: Vec<Value>) {
        match self {
            Self::Streaming(handler) => handler.on_record(fields),
            Self::Run(_) => panic!("received RECORD in response to RUN; response correlation is broken"),
            Self::Reset(_) | Self::ChannelReleasingReset(_) => {
                panic!("received RECORD in response to RESET; response correlation is broken")
            }
        }
    }
}

// ============================================================================
// RunResponseHandler
// ============================================================================

/// Metadata captured from a RUN success.
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Ordered result column names
    pub statement_keys: Vec<String>,
    /// Server-reported time until the first result, `-1` until known
    pub result_available_after: i64,
}

impl Default for RunSummary {
    fn default() -> Self {
        Self {
            statement_keys: Vec::new(),
            result_available_after: -1,
        }
    }
}

/// Handler for the RUN half of a statement.
///
/// Its signal resolves as soon as RUN completes and never with an error:
/// callers only need to know *when* result keys are available, not how RUN
/// fared. The paired PULL handler surfaces any failure.
#[derive(Debug)]
pub struct RunResponseHandler {
    summary: Arc<Mutex<RunSummary>>,
    completed: Signal,
}

impl RunResponseHandler {
    /// New handler with an empty summary.
    pub fn new() -> Self {
        Self {
            summary: Arc::new(Mutex::new(RunSummary::default())),
            completed: Signal::new(),
        }
    }

    /// Shared cell the summary is written into.
    pub fn summary(&self) -> Arc<Mutex<RunSummary>> {
        Arc::clone(&self.summary)
    }

    /// Signal resolving when RUN has completed.
    pub fn completed(&self) -> Signal {
        self.completed.clone()
    }

    fn on_success(self, metadata: Metadata) -> HandlerOutcome {
        {
            let mut summary = self.summary.lock();
            summary.statement_keys = message::statement_keys(&metadata);
            summary.result_available_after = message::result_available_after(&metadata);
        }
        self.completed.complete_ok();
        HandlerOutcome::Continue
    }

    fn on_failure(self) -> HandlerOutcome {
        self.completed.complete_ok();
        HandlerOutcome::Continue
    }
}

impl Default for RunResponseHandler {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// StreamingResponseHandler
// ============================================================================

/// Records and final metadata accumulated by a streamed result.
#[derive(Debug, Default)]
pub struct StreamingState {
    /// Raw record rows, in arrival order
    pub records: Vec<Vec<Value>>,
    /// Metadata of the terminating SUCCESS
    pub metadata: Metadata,
}

/// Handler for PULL responses (and for BEGIN/COMMIT/ROLLBACK completion,
/// which stream zero records).
#[derive(Debug)]
pub struct StreamingResponseHandler {
    state: Arc<Mutex<StreamingState>>,
    completed: Signal,
}

impl StreamingResponseHandler {
    /// New handler with empty state.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(StreamingState::default())),
            completed: Signal::new(),
        }
    }

    /// Shared cell records and metadata are written into.
    pub fn state(&self) -> Arc<Mutex<StreamingState>> {
        Arc::clone(&self.state)
    }

    /// Signal resolving when the stream has terminated.
    pub fn completed(&self) -> Signal {
        self.completed.clone()
    }

    fn on_record(&mut self, fields: Vec<Value>) {
        self.state.lock().records.push(fields);
    }

    fn on_success(self, metadata: Metadata) -> HandlerOutcome {
        self.state.lock().metadata = metadata;
        self.completed.complete_ok();
        HandlerOutcome::Continue
    }

    fn on_failure(self, error: DriverError) -> HandlerOutcome {
        self.completed.complete_err(error);
        HandlerOutcome::Continue
    }
}

impl Default for StreamingResponseHandler {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// ResetResponseHandler
// ============================================================================

/// Handler completing a bare signal when RESET is acknowledged.
#[derive(Debug)]
pub struct ResetResponseHandler {
    completed: Signal,
}

impl ResetResponseHandler {
    /// New handler.
    pub fn new() -> Self {
        Self {
            completed: Signal::new(),
        }
    }

    /// Signal resolving when RESET has completed.
    pub fn completed(&self) -> Signal {
        self.completed.clone()
    }

    fn on_success(self) -> HandlerOutcome {
        self.completed.complete_ok();
        HandlerOutcome::Continue
    }

    fn on_failure(self, error: DriverError) -> HandlerOutcome {
        self.completed.complete_err(error);
        HandlerOutcome::Continue
    }
}

impl Default for ResetResponseHandler {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// ChannelReleasingResetResponseHandler
// ============================================================================

/// Handler for the RESET written while releasing a connection to the pool.
///
/// On completion the channel goes back to the pool either way; a failed RESET
/// means the channel is not safely reusable, so it is closed first and the
/// pool evicts it.
#[derive(Debug)]
pub struct ChannelReleasingResetResponseHandler;

impl ChannelReleasingResetResponseHandler {
    fn on_success(self) -> HandlerOutcome {
        HandlerOutcome::ReleaseChannel { evict: false }
    }

    fn on_failure(self, error: DriverError) -> HandlerOutcome {
        tracing::debug!(%error, "RESET before release failed; channel will be evicted");
        HandlerOutcome::ReleaseChannel { evict: true }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::error::DriverError;

    fn run_metadata() -> Metadata {
        let mut metadata = Metadata::new();
        metadata.insert(
            "fields".to_string(),
            Value::List(vec![Value::from("name"), Value::from("age")]),
        );
        metadata.insert("result_available_after".to_string(), Value::Integer(42));
        metadata
    }

    #[tokio::test]
    async fn test_run_handler_captures_metadata() {
        let handler = RunResponseHandler::new();
        let summary = handler.summary();
        let completed = handler.completed();

        let outcome = ResponseHandler::Run(handler).on_success(run_metadata());

        assert_eq!(outcome, HandlerOutcome::Continue);
        assert_eq!(completed.wait().await, Ok(()));
        let summary = summary.lock();
        assert_eq!(summary.statement_keys, vec!["name".to_string(), "age".to_string()]);
        assert_eq!(summary.result_available_after, 42);
    }

    #[tokio::test]
    async fn test_run_handler_completes_ok_on_failure() {
        let handler = RunResponseHandler::new();
        let summary = handler.summary();
        let completed = handler.completed();

        ResponseHandler::Run(handler).on_failure(DriverError::connection("boom"));

        // failure is surfaced by the paired PULL handler, not here
        assert_eq!(completed.wait().await, Ok(()));
        assert_eq!(summary.lock().result_available_after, -1);
    }

    #[test]
    #[should_panic(expected = "response correlation is broken")]
    fn test_run_handler_rejects_records() {
        let mut handler = ResponseHandler::Run(RunResponseHandler::new());
        handler.on_record(vec![Value::Integer(1)]);
    }

    #[tokio::test]
    async fn test_streaming_handler_collects_records() {
        let handler = StreamingResponseHandler::new();
        let state = handler.state();
        let completed = handler.completed();

        let mut handler = ResponseHandler::Streaming(handler);
        handler.on_record(vec![Value::Integer(1)]);
        handler.on_record(vec![Value::Integer(2)]);

        let mut metadata = Metadata::new();
        metadata.insert("bookmark".to_string(), Value::from("b1"));
        handler.on_success(metadata);

        assert_eq!(completed.wait().await, Ok(()));
        let state = state.lock();
        assert_eq!(state.records.len(), 2);
        assert_eq!(state.metadata.get("bookmark"), Some(&Value::from("b1")));
    }

    #[tokio::test]
    async fn test_streaming_handler_propagates_failure() {
        let handler = StreamingResponseHandler::new();
        let completed = handler.completed();

        let error = DriverError::server("GraphWire.ClientError.Statement.SyntaxError", "bad");
        ResponseHandler::Streaming(handler).on_failure(error.clone());

        assert_eq!(completed.wait().await, Err(error));
    }

    #[tokio::test]
    async fn test_reset_handler() {
        let handler = ResetResponseHandler::new();
        let completed = handler.completed();
        ResponseHandler::Reset(handler).on_success(Metadata::new());
        assert_eq!(completed.wait().await, Ok(()));

        let handler = ResetResponseHandler::new();
        let completed = handler.completed();
        ResponseHandler::Reset(handler).on_failure(DriverError::protocol("bad reset"));
        assert!(completed.wait().await.is_err());
    }

    #[test]
    fn test_channel_releasing_reset_outcomes() {
        let ok = ResponseHandler::ChannelReleasingReset(ChannelReleasingResetResponseHandler)
            .on_success(Metadata::new());
        assert_eq!(ok, HandlerOutcome::ReleaseChannel { evict: false });

        let failed = ResponseHandler::ChannelReleasingReset(ChannelReleasingResetResponseHandler)
            .on_failure(DriverError::connection("gone"));
        assert_eq!(failed, HandlerOutcome::ReleaseChannel { evict: true });
    }
}
