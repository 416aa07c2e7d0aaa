//! Channel abstraction and the per-connection event loop.
//!
//! A [`Channel`] is the transport seam: the codec layer implements it over a
//! real socket, tests implement it over an in-memory log. Everything that
//! touches a channel or its dispatcher runs on one spawned task per
//! connection (the connection's lane), fed by a single queue. Outbound
//! requests and inbound events share that queue, which gives the dispatcher a
//! total order without any locking.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;

use super::connection::S_OPEN;
use super::dispatch::InboundMessageDispatcher;
use super::error::DriverError;
use super::handlers::{HandlerOutcome, ResponseHandler};
use super::message::{Message, Metadata};
use super::signal::Signal;
use super::types::Value;

// ============================================================================
// Channel
// ============================================================================

/// Outbound side of a transport channel.
pub trait Channel: Send + 'static {
    /// Buffer a message without flushing.
    fn write(&mut self, message: Message);

    /// Buffer a message and flush everything buffered so far.
    fn write_and_flush(&mut self, message: Message);

    /// Enable or disable reading inbound data.
    fn set_auto_read(&mut self, auto_read: bool);

    /// Close the channel. Further writes are ignored.
    fn close(&mut self);
}

/// Pool a channel is returned to when its connection is done with it.
pub trait ChannelPool: Send + Sync + 'static {
    /// Take the channel back. A closed channel is evicted rather than reused.
    fn release(&self, channel: Box<dyn Channel>);
}

// ============================================================================
// ServerAddress
// ============================================================================

/// Network address of a server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerAddress {
    /// Host name or IP
    pub host: String,
    /// TCP port
    pub port: u16,
}

impl ServerAddress {
    /// Address from host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl Default for ServerAddress {
    fn default() -> Self {
        Self::new("localhost", 7687)
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

// ============================================================================
// Protocol events
// ============================================================================

/// Inbound event decoded from the transport.
#[derive(Debug, Clone, PartialEq)]
pub enum ProtocolEvent {
    /// Terminating success with response metadata
    Success(Metadata),
    /// Terminating failure
    Failure(DriverError),
    /// One record of a streamed result
    Record(Vec<Value>),
}

/// Work item processed by a connection's lane.
#[derive(Debug)]
pub(crate) enum LaneTask {
    Run {
        statement: String,
        parameters: HashMap<String, Value>,
        run_handler: ResponseHandler,
        pull_handler: ResponseHandler,
        flush: bool,
    },
    Reset {
        handler: ResponseHandler,
        session_reset: bool,
    },
    AutoRead(bool),
    Terminate {
        reason: String,
    },
    Inbound(ProtocolEvent),
}

/// Cloneable handle the codec layer uses to inject inbound events into a
/// connection's lane.
#[derive(Clone)]
pub struct InboundSink {
    sender: mpsc::UnboundedSender<LaneTask>,
}

impl InboundSink {
    pub(crate) fn new(sender: mpsc::UnboundedSender<LaneTask>) -> Self {
        Self { sender }
    }

    /// Inject a terminating SUCCESS.
    pub fn on_success(&self, metadata: Metadata) {
        let _ = self.sender.send(LaneTask::Inbound(ProtocolEvent::Success(metadata)));
    }

    /// Inject a terminating FAILURE.
    pub fn on_failure(&self, error: DriverError) {
        let _ = self.sender.send(LaneTask::Inbound(ProtocolEvent::Failure(error)));
    }

    /// Inject one RECORD.
    pub fn on_record(&self, fields: Vec<Value>) {
        let _ = self.sender.send(LaneTask::Inbound(ProtocolEvent::Record(fields)));
    }
}

impl fmt::Debug for InboundSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InboundSink").finish()
    }
}

// ============================================================================
// Event loop
// ============================================================================

struct EventLoop {
    channel: Option<Box<dyn Channel>>,
    dispatcher: InboundMessageDispatcher,
    pool: Arc<dyn ChannelPool>,
    status: Arc<AtomicU8>,
    release_done: Signal,
}

/// Spawn the lane task for one connection, returning its queue.
///
/// The task runs until the channel has been handed back to the pool (release
/// or termination) and the queue has drained.
pub(crate) fn spawn_event_loop(
    channel: Box<dyn Channel>,
    pool: Arc<dyn ChannelPool>,
    status: Arc<AtomicU8>,
    release_done: Signal,
) -> mpsc::UnboundedSender<LaneTask> {
    let (sender, receiver) = mpsc::unbounded_channel();
    let event_loop = EventLoop {
        channel: Some(channel),
        dispatcher: InboundMessageDispatcher::new(),
        pool,
        status,
        release_done,
    };
    tokio::spawn(event_loop.run(receiver));
    sender
}

impl EventLoop {
    async fn run(mut self, mut receiver: mpsc::UnboundedReceiver<LaneTask>) {
        let exit_error = loop {
            match receiver.recv().await {
                Some(task) => {
                    if let Some(error) = self.handle(task) {
                        break error;
                    }
                }
                None => return,
            }
        };
        self.drain(receiver, exit_error);
    }

    /// Resolve everything still pending when the lane shuts down.
    ///
    /// Tasks may already sit in the queue behind the terminating one; their
    /// completion handles must still resolve, or callers hang forever. Runs
    /// fail with the exit error, resets report success (the connection is no
    /// longer open, so there is nothing left to clean up).
    fn drain(&mut self, mut receiver: mpsc::UnboundedReceiver<LaneTask>, error: DriverError) {
        receiver.close();
        self.dispatcher.fail_all(&error);
        while let Ok(task) = receiver.try_recv() {
            match task {
                LaneTask::Run {
                    run_handler,
                    pull_handler,
                    ..
                } => {
                    run_handler.on_failure(error.clone());
                    pull_handler.on_failure(error.clone());
                }
                LaneTask::Reset { handler, .. } => {
                    handler.on_success(Metadata::new());
                }
                LaneTask::AutoRead(_) | LaneTask::Terminate { .. } | LaneTask::Inbound(_) => {}
            }
        }
    }

    /// Process one task; `Some(error)` means the lane is done and leftover
    /// work must be drained with that error.
    fn handle(&mut self, task: LaneTask) -> Option<DriverError> {
        match task {
            LaneTask::Run {
                statement,
                parameters,
                run_handler,
                pull_handler,
                flush,
            } => {
                self.dispatcher.queue(run_handler);
                self.dispatcher.queue(pull_handler);
                if let Some(channel) = self.channel.as_mut() {
                    channel.write(Message::Run {
                        statement,
                        parameters,
                    });
                    if flush {
                        channel.write_and_flush(Message::PullAll);
                    } else {
                        channel.write(Message::PullAll);
                    }
                }
                None
            }
            LaneTask::Reset {
                handler,
                session_reset,
            } => {
                // a session-level reset on a connection no longer owned by the
                // session has nothing to clean up
                if session_reset && self.status.load(Ordering::SeqCst) != S_OPEN {
                    let outcome = handler.on_success(Metadata::new());
                    return self.apply(outcome);
                }
                self.dispatcher.mute_next_failure();
                self.dispatcher.queue(handler);
                if let Some(channel) = self.channel.as_mut() {
                    // reading may have been paused mid-stream; the RESET ack
                    // has to get through
                    channel.set_auto_read(true);
                    channel.write_and_flush(Message::Reset);
                }
                None
            }
            LaneTask::AutoRead(auto_read) => {
                if let Some(channel) = self.channel.as_mut() {
                    channel.set_auto_read(auto_read);
                }
                None
            }
            LaneTask::Terminate { reason } => {
                let error = DriverError::connection(format!("Connection terminated: {}", reason));
                if let Some(mut channel) = self.channel.take() {
                    channel.close();
                    self.pool.release(channel);
                }
                self.release_done.complete_ok();
                Some(error)
            }
            LaneTask::Inbound(event) => {
                let outcome = match event {
                    ProtocolEvent::Success(metadata) => self.dispatcher.on_success(metadata),
                    ProtocolEvent::Failure(error) => self.dispatcher.on_failure(error),
                    ProtocolEvent::Record(fields) => {
                        self.dispatcher.on_record(fields);
                        HandlerOutcome::Continue
                    }
                };
                self.apply(outcome)
            }
        }
    }

    fn apply(&mut self, outcome: HandlerOutcome) -> Option<DriverError> {
        match outcome {
            HandlerOutcome::Continue => None,
            HandlerOutcome::ReleaseChannel { evict } => {
                if let Some(mut channel) = self.channel.take() {
                    if evict {
                        channel.close();
                    }
                    self.pool.release(channel);
                }
                self.release_done.complete_ok();
                Some(DriverError::client_usage(
                    "Connection has been released to the pool and can't be used",
                ))
            }
        }
    }
}
