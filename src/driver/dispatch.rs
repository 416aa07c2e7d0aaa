//! FIFO correlation of inbound events with queued response handlers.

use std::collections::VecDeque;

use super::error::DriverError;
use super::handlers::{HandlerOutcome, ResponseHandler};
use super::message::Metadata;
use super::types::Value;

/// Correlates inbound protocol events with response handlers.
///
/// Handlers are queued in the order their messages were written; the server
/// answers in the same order, so every terminating event dequeues exactly the
/// head handler. Records are delivered to the head without dequeuing it.
///
/// Owned exclusively by the connection's lane task, so it needs no locking.
#[derive(Debug, Default)]
pub struct InboundMessageDispatcher {
    handlers: VecDeque<ResponseHandler>,
    mute_next_failure: bool,
}

impl InboundMessageDispatcher {
    /// Empty dispatcher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a handler for the next unanswered outbound message.
    pub fn queue(&mut self, handler: ResponseHandler) {
        self.handlers.push_back(handler);
    }

    /// Number of handlers still awaiting their terminating response.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handler is awaiting a response.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Suppress the next FAILURE event.
    ///
    /// RESET makes the server abandon whatever it was doing; if a statement
    /// was already failing, its FAILURE may still arrive before the RESET ack.
    /// That stale failure belongs to an operation the caller already gave up
    /// on, so the head handler is completed successfully instead.
    pub fn mute_next_failure(&mut self) {
        self.mute_next_failure = true;
    }

    /// Dispatch a SUCCESS event to the head handler.
    pub fn on_success(&mut self, metadata: Metadata) -> HandlerOutcome {
        match self.handlers.pop_front() {
            Some(handler) => handler.on_success(metadata),
            None => {
                tracing::warn!("received SUCCESS with no handler queued; ignoring");
                HandlerOutcome::Continue
            }
        }
    }

    /// Dispatch a FAILURE event to the head handler, honoring a pending mute.
    pub fn on_failure(&mut self, error: DriverError) -> HandlerOutcome {
        if self.mute_next_failure {
            self.mute_next_failure = false;
            tracing::debug!(%error, "muting failure that raced with RESET");
            return self.on_success(Metadata::new());
        }
        match self.handlers.pop_front() {
            Some(handler) => handler.on_failure(error),
            None => {
                tracing::warn!(%error, "received FAILURE with no handler queued; ignoring");
                HandlerOutcome::Continue
            }
        }
    }

    /// Dispatch a RECORD event to the head handler without dequeuing it.
    pub fn on_record(&mut self, fields: Vec<Value>) {
        match self.handlers.front_mut() {
            Some(handler) => handler.on_record(fields),
            None => tracing::warn!("received RECORD with no handler queued; ignoring"),
        }
    }

    /// Fail every queued handler with the given error, in queue order.
    ///
    /// Used when the connection is terminated and no further responses will
    /// arrive.
    pub fn fail_all(&mut self, error: &DriverError) -> Vec<HandlerOutcome> {
        self.mute_next_failure = false;
        self.handlers
            .drain(..)
            .map(|handler| handler.on_failure(error.clone()))
            .collect()
    }
}
