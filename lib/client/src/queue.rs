use parking_lot::{Condvar, Mutex};
use rdf_fusion_protocol::ProtocolError;
use std::collections::VecDeque;

/// The last entry of a queue.
#[derive(Debug, Clone)]
enum Terminal {
    EndOfStream,
    Error(ProtocolError),
}

#[derive(Debug)]
struct State<T> {
    items: VecDeque<T>,
    terminal: Option<Terminal>,
    closed: bool,
}

/// A fixed capacity hand-off channel between one producer and one consumer.
///
/// Besides regular items the queue carries exactly one terminal outcome, either the end of the
/// stream or an error. The terminal outcome does not count against the capacity, so it is never
/// lost behind unread items. Once the consumer has drained all items, every further
/// [`take`](Self::take) returns the same terminal outcome.
#[derive(Debug)]
pub struct BoundedResultQueue<T> {
    capacity: usize,
    state: Mutex<State<T>>,
    not_empty: Condvar,
    not_full: Condvar,
}

impl<T> BoundedResultQueue<T> {
    /// Creates a queue. A capacity of zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            state: Mutex::new(State {
                items: VecDeque::with_capacity(capacity),
                terminal: None,
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Enqueues an item, blocking while the queue is full.
    ///
    /// Fails with [`ProtocolError::Cancelled`] once the queue has been closed.
    pub fn put(&self, item: T) -> Result<(), ProtocolError> {
        let mut state = self.state.lock();
        while !state.closed && state.items.len() >= self.capacity {
            self.not_full.wait(&mut state);
        }
        if state.closed {
            return Err(ProtocolError::Cancelled);
        }
        state.items.push_back(item);
        self.not_empty.notify_one();
        Ok(())
    }

    /// Dequeues the next item, blocking while the queue is empty.
    ///
    /// Returns `Ok(None)` at the end of the stream and the posted error after a failure. Both
    /// outcomes are repeated on every later call. A closed queue yields
    /// [`ProtocolError::Cancelled`] unless a terminal outcome had already been posted.
    pub fn take(&self) -> Result<Option<T>, ProtocolError> {
        let mut state = self.state.lock();
        loop {
            if let Some(item) = state.items.pop_front() {
                self.not_full.notify_one();
                return Ok(Some(item));
            }
            if let Some(terminal) = &state.terminal {
                return match terminal {
                    Terminal::EndOfStream => Ok(None),
                    Terminal::Error(error) => Err(error.clone()),
                };
            }
            if state.closed {
                return Err(ProtocolError::Cancelled);
            }
            self.not_empty.wait(&mut state);
        }
    }

    /// Posts a terminal error. Returns `false` if a terminal outcome was already posted.
    pub fn post_error(&self, error: ProtocolError) -> bool {
        self.post_terminal(Terminal::Error(error))
    }

    /// Posts the end of the stream. Returns `false` if a terminal outcome was already posted.
    pub fn post_end_of_stream(&self) -> bool {
        self.post_terminal(Terminal::EndOfStream)
    }

    fn post_terminal(&self, terminal: Terminal) -> bool {
        let mut state = self.state.lock();
        if state.terminal.is_some() {
            return false;
        }
        state.terminal = Some(terminal);
        self.not_empty.notify_all();
        true
    }

    /// Whether a terminal outcome has been posted.
    pub fn is_terminated(&self) -> bool {
        self.state.lock().terminal.is_some()
    }

    /// Closes the queue and drops the buffered items.
    ///
    /// Blocked producers and consumers wake up immediately.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if state.closed {
            return;
        }
        state.closed = true;
        state.items.clear();
        self.not_empty.notify_all();
        self.not_full.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}
