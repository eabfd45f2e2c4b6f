//! In-memory buffer between the tree walker and the build control loop.
//!
//! Many workers publish, one control loop drains. A drain takes everything
//! buffered at that instant; items published while the batch is being
//! indexed wait for the next drain.

use parking_lot::Mutex;

use crate::types::QueuedItem;

#[derive(Debug, Default)]
pub struct IndexQueue {
    items: Mutex<Vec<QueuedItem>>,
}

impl IndexQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, item: QueuedItem) {
        self.items.lock().push(item);
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    /// Removes and returns every buffered item, in publish order.
    pub fn consume_all(&self) -> Vec<QueuedItem> {
        std::mem::take(&mut *self.items.lock())
    }
}
