//! In-memory fakes for exercising connections without a transport.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::channel::{Channel, ChannelPool, InboundSink, ServerAddress};
use super::connection::Connection;
use super::message::{Message, Metadata};
use super::metrics::NoOpMetricsListener;

/// Log of everything written to a fake channel: the message and whether the
/// write carried a flush.
pub(crate) type WriteLog = Arc<Mutex<Vec<(Message, bool)>>>;

pub(crate) struct FakeChannel {
    writes: WriteLog,
    auto_read: Arc<Mutex<Vec<bool>>>,
    closed: Arc<AtomicBool>,
}

impl Channel for FakeChannel {
    fn write(&mut self, message: Message) {
        self.writes.lock().push((message, false));
    }

    fn write_and_flush(&mut self, message: Message) {
        self.writes.lock().push((message, true));
    }

    fn set_auto_read(&mut self, auto_read: bool) {
        self.auto_read.lock().push(auto_read);
    }

    fn close(&mut self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

pub(crate) struct FakePool {
    released: Arc<AtomicUsize>,
}

impl ChannelPool for FakePool {
    fn release(&self, _channel: Box<dyn Channel>) {
        self.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// A connection over a fake channel, plus views into the channel's state.
pub(crate) struct TestHarness {
    pub connection: Connection,
    pub sink: InboundSink,
    pub writes: WriteLog,
    pub auto_read: Arc<Mutex<Vec<bool>>>,
    closed: Arc<AtomicBool>,
    released_count: Arc<AtomicUsize>,
}

impl TestHarness {
    /// How many channels the pool has taken back.
    pub fn released(&self) -> usize {
        self.released_count.load(Ordering::SeqCst)
    }

    /// Whether the channel was closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

pub(crate) fn connection_harness() -> TestHarness {
    let writes: WriteLog = Arc::new(Mutex::new(Vec::new()));
    let auto_read = Arc::new(Mutex::new(Vec::new()));
    let closed = Arc::new(AtomicBool::new(false));
    let released_count = Arc::new(AtomicUsize::new(0));

    let channel = Box::new(FakeChannel {
        writes: Arc::clone(&writes),
        auto_read: Arc::clone(&auto_read),
        closed: Arc::clone(&closed),
    });
    let pool = Arc::new(FakePool {
        released: Arc::clone(&released_count),
    });
    let connection = Connection::new(
        channel,
        pool,
        ServerAddress::default(),
        "GraphWire/1.0.0",
        Arc::new(NoOpMetricsListener),
    );
    let sink = connection.inbound_sink();
    TestHarness {
        connection,
        sink,
        writes,
        auto_read,
        closed,
        released_count,
    }
}

/// Let the lane task drain its queue.
pub(crate) async fn settle() {
    for _ in 0..8 {
        tokio::task::yield_now().await;
    }
}

/// Answer every write with a SUCCESS whose metadata is derived from the
/// written message. Runs until the test's runtime is dropped.
pub(crate) fn spawn_auto_success_with<F>(writes: WriteLog, sink: InboundSink, metadata_for: F)
where
    F: Fn(&Message) -> Metadata + Send + 'static,
{
    tokio::spawn(async move {
        let mut acked = 0;
        loop {
            let pending: Vec<Message> = {
                let writes = writes.lock();
                writes[acked..].iter().map(|(m, _)| m.clone()).collect()
            };
            for message in pending {
                acked += 1;
                sink.on_success(metadata_for(&message));
            }
            tokio::task::yield_now().await;
        }
    });
}

/// Answer every write with an empty SUCCESS.
pub(crate) fn spawn_auto_success(writes: WriteLog, sink: InboundSink) {
    spawn_auto_success_with(writes, sink, |_| Metadata::new());
}
