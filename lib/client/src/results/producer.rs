use crate::http::{HttpResponse, ReleaseHook, ReleaseReason};
use crate::queue::BoundedResultQueue;
use crate::results::metadata::MetadataCell;
use crate::results::StreamingResult;
use parking_lot::Mutex;
use rdf_fusion_protocol::ProtocolError;
use std::collections::HashMap;
use std::fmt;
use std::io::{self, Read};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::{debug, warn};

const PRODUCER_THREAD_NAME: &str = "rdf-fusion-result-producer";

/// Receives the output of a [`ResultParser`].
pub trait ResultHandler<T, M> {
    /// Publishes the metadata of the result. Only the first call has an effect.
    fn handle_metadata(&mut self, metadata: M);

    /// Hands over the next item.
    ///
    /// Fails with [`ProtocolError::Cancelled`] once the consumer is gone. Parsers must stop and
    /// return the error in this case.
    fn handle_item(&mut self, item: T) -> Result<(), ProtocolError>;
}

/// Parses a response body into a sequence of items.
pub trait ResultParser: Send + 'static {
    type Item: Send + 'static;
    type Metadata: Clone + Send + 'static;

    fn parse(
        self,
        body: ResponseBody,
        handler: &mut dyn ResultHandler<Self::Item, Self::Metadata>,
    ) -> Result<(), ProtocolError>;
}

/// The body of a response handed to a [`ResultParser`].
///
/// Reads fail as soon as the consumer has closed the result, so a parser stuck in a long read
/// loop stops at the next chunk.
pub struct ResponseBody {
    inner: Box<dyn Read + Send>,
    cancelled: Arc<AtomicBool>,
}

impl ResponseBody {
    fn new(inner: Box<dyn Read + Send>, cancelled: Arc<AtomicBool>) -> Self {
        Self { inner, cancelled }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl Read for ResponseBody {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.is_cancelled() {
            return Err(io::Error::other("The result has been closed"));
        }
        self.inner.read(buf)
    }
}

/// The state shared by a producer and its [`StreamingResult`].
pub(crate) struct ResultChannel<T, M> {
    pub(crate) queue: BoundedResultQueue<T>,
    pub(crate) metadata: MetadataCell<M>,
    cancelled: Arc<AtomicBool>,
    released: AtomicBool,
    release_hook: Mutex<Option<ReleaseHook>>,
}

impl<T, M> ResultChannel<T, M> {
    pub(crate) fn new(capacity: usize, release_hook: Option<ReleaseHook>) -> Self {
        Self {
            queue: BoundedResultQueue::new(capacity),
            metadata: MetadataCell::new(),
            cancelled: Arc::new(AtomicBool::new(false)),
            released: AtomicBool::new(false),
            release_hook: Mutex::new(release_hook),
        }
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Releases the response body. Only the first call, by either side, has an effect.
    pub(crate) fn release(&self, reason: ReleaseReason) -> bool {
        if self
            .released
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }
        let hook = self.release_hook.lock().take();
        if let Some(hook) = hook {
            hook(reason);
        }
        true
    }

    /// Stops the producer and wakes up everybody waiting on the result. Never blocks on the
    /// producer.
    pub(crate) fn cancel(&self) {
        if self.cancelled.swap(true, Ordering::AcqRel) {
            return;
        }
        // A producer that already posted its outcome releases the body itself. Otherwise the
        // release is claimed before closing the queue wakes the producer up.
        if !self.queue.is_terminated() {
            self.release(ReleaseReason::Aborted);
        }
        self.queue.close();
        self.metadata.fail(ProtocolError::Cancelled);
    }
}

/// Something the session can close on shutdown.
pub(crate) trait ForceClose: Send + Sync {
    fn force_close(&self);
}

impl<T: Send, M: Send> ForceClose for ResultChannel<T, M> {
    fn force_close(&self) {
        self.cancel();
    }
}

#[derive(Default)]
struct RegistryState {
    producers: HashMap<u64, Arc<dyn ForceClose>>,
    closed: bool,
}

/// Tracks the running producers of one session.
#[derive(Default)]
pub(crate) struct ProducerRegistry {
    next_id: AtomicU64,
    state: Mutex<RegistryState>,
}

impl ProducerRegistry {
    pub(crate) fn register(&self, producer: Arc<dyn ForceClose>) -> Result<u64, ProtocolError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(ProtocolError::Closed);
        }
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        state.producers.insert(id, producer);
        Ok(id)
    }

    pub(crate) fn deregister(&self, id: u64) {
        self.state.lock().producers.remove(&id);
    }

    pub(crate) fn len(&self) -> usize {
        self.state.lock().producers.len()
    }

    /// Force-closes all running producers and refuses new ones.
    pub(crate) fn close_all(&self) {
        let producers = {
            let mut state = self.state.lock();
            state.closed = true;
            state.producers.drain().map(|(_, p)| p).collect::<Vec<_>>()
        };
        if !producers.is_empty() {
            warn!("Force closing {} open results", producers.len());
        }
        for producer in producers {
            producer.force_close();
        }
    }
}

impl fmt::Debug for ProducerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProducerRegistry")
            .field("running", &self.len())
            .finish()
    }
}

struct QueueHandler<'a, T, M> {
    channel: &'a ResultChannel<T, M>,
}

impl<T, M> ResultHandler<T, M> for QueueHandler<'_, T, M> {
    fn handle_metadata(&mut self, metadata: M) {
        self.channel.metadata.set(metadata);
    }

    fn handle_item(&mut self, item: T) -> Result<(), ProtocolError> {
        self.channel.queue.put(item)
    }
}

/// Runs in all cases when a producer thread stops, panics included.
struct ProducerGuard<T, M> {
    channel: Arc<ResultChannel<T, M>>,
    registry: Arc<ProducerRegistry>,
    id: u64,
}

impl<T, M> Drop for ProducerGuard<T, M> {
    fn drop(&mut self) {
        if !self.channel.queue.is_terminated() && !self.channel.is_cancelled() {
            let error = ProtocolError::results_parsing("The result producer stopped unexpectedly");
            self.channel.metadata.fail(error.clone());
            self.channel.queue.post_error(error);
        }
        self.channel.metadata.fail(ProtocolError::ProtocolViolation(
            "The response did not contain any result metadata".to_owned(),
        ));
        let reason = if self.channel.is_cancelled() && !self.channel.queue.is_terminated() {
            ReleaseReason::Aborted
        } else {
            ReleaseReason::Completed
        };
        self.channel.release(reason);
        self.registry.deregister(self.id);
    }
}

/// Starts background parsing of response bodies.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ResultProducer;

impl ResultProducer {
    /// Parses the body of `response` on a new worker thread and returns the consuming side.
    ///
    /// The producer is registered before the worker starts and deregisters itself when the
    /// worker stops.
    pub(crate) fn start<P: ResultParser>(
        parser: P,
        response: HttpResponse,
        capacity: usize,
        registry: &Arc<ProducerRegistry>,
    ) -> Result<StreamingResult<P::Item, P::Metadata>, ProtocolError> {
        let (body, release_hook) = response.into_body();
        let channel = Arc::new(ResultChannel::new(capacity, release_hook));
        let producer: Arc<dyn ForceClose> = Arc::<ResultChannel<_, _>>::clone(&channel);
        let id = match registry.register(producer) {
            Ok(id) => id,
            Err(error) => {
                channel.cancel();
                return Err(error);
            }
        };

        let body = ResponseBody::new(body, Arc::clone(&channel.cancelled));
        let guard = ProducerGuard {
            channel: Arc::clone(&channel),
            registry: Arc::clone(registry),
            id,
        };
        let spawned = thread::Builder::new()
            .name(PRODUCER_THREAD_NAME.to_owned())
            .spawn(move || run(parser, body, guard));
        if let Err(error) = spawned {
            // The guard has been dropped with the closure.
            channel.cancel();
            return Err(ProtocolError::worker_spawn(error));
        }
        debug!("Started result producer {id}");
        Ok(StreamingResult::new(channel))
    }
}

fn run<P: ResultParser>(
    parser: P,
    body: ResponseBody,
    guard: ProducerGuard<P::Item, P::Metadata>,
) {
    let channel = Arc::clone(&guard.channel);
    let mut handler = QueueHandler { channel: &channel };
    match parser.parse(body, &mut handler) {
        Ok(()) => {
            channel.queue.post_end_of_stream();
            debug!("Result producer {} reached the end of the stream", guard.id);
        }
        Err(_) if channel.is_cancelled() => {
            debug!("Result producer {} stopped after cancellation", guard.id);
        }
        Err(error) => {
            debug!("Result producer {} failed: {error}", guard.id);
            channel.metadata.fail(error.clone());
            channel.queue.post_error(error);
        }
    }
    drop(guard);
}
