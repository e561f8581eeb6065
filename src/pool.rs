//! # Queue Pool
//!
//! The shared in-memory heart of a broker: a map from peer or channel id to
//! a FIFO queue of pending items. Structural changes (inserting a queue) are
//! serialized under the pool-level lock; push/pop go through each queue's
//! own lock so producers and consumers on different ids never contend.
//!
//! Queues are owned by the pool for the life of the process — sessions hold
//! non-owning `Arc` handles and a queue outlives every session that touches
//! it. There is no eviction.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::proto::{Command, Deliver, Frame, FrameError, Report, Submit};

/// A queued item, tagged so consumers can dispatch per variant.
#[derive(Debug, Clone, PartialEq)]
pub enum QueueItem {
    Submit(Submit),
    Report(Report),
    Deliver(Deliver),
}

impl QueueItem {
    /// The command byte a consumer frame for this item carries.
    pub fn command(&self) -> Command {
        match self {
            QueueItem::Submit(_) => Command::Submit,
            QueueItem::Report(_) => Command::Report,
            QueueItem::Deliver(_) => Command::Deliver,
        }
    }

    /// Serialize into a consumer-facing frame, tag included.
    pub fn into_frame(self) -> Result<Frame, FrameError> {
        match self {
            QueueItem::Submit(submit) => Frame::encode(Command::Submit, &submit),
            QueueItem::Report(report) => Frame::encode(Command::Report, &report),
            QueueItem::Deliver(deliver) => Frame::encode(Command::Deliver, &deliver),
        }
    }
}

/// A single FIFO queue keyed by one id.
#[derive(Debug)]
pub struct Queue {
    id: u32,
    items: Mutex<VecDeque<QueueItem>>,
}

impl Queue {
    fn new(id: u32) -> Self {
        Self {
            id,
            items: Mutex::new(VecDeque::new()),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn push(&self, item: QueueItem) {
        self.items.lock().push_back(item);
    }

    pub fn pop(&self) -> Option<QueueItem> {
        self.items.lock().pop_front()
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }
}

/// Map of id → queue with lookup-or-create semantics.
#[derive(Debug, Default)]
pub struct QueuePool {
    queues: Mutex<HashMap<u32, Arc<Queue>>>,
}

impl QueuePool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locate an existing queue.
    pub fn find(&self, id: u32) -> Option<Arc<Queue>> {
        self.queues.lock().get(&id).cloned()
    }

    /// Locate a queue, inserting a fresh empty one if the id is new.
    pub fn find_or_create(&self, id: u32) -> Arc<Queue> {
        self.queues
            .lock()
            .entry(id)
            .or_insert_with(|| Arc::new(Queue::new(id)))
            .clone()
    }

    /// Snapshot of all queues, ordered by id, for the stats sampler.
    pub fn snapshot(&self) -> Vec<Arc<Queue>> {
        let mut queues: Vec<Arc<Queue>> = self.queues.lock().values().cloned().collect();
        queues.sort_by_key(|queue| queue.id());
        queues
    }

    pub fn len(&self) -> usize {
        self.queues.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.lock().is_empty()
    }
}
