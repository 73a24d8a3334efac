use std::collections::{HashSet, VecDeque};

use likesync_core::Item;

/// FIFO of items waiting for a worker. An id is accepted at most once for
/// the lifetime of the queue, so no item can be handed to two workers.
#[derive(Debug, Default)]
pub struct WorkQueue {
    inner: VecDeque<Item>,
    seen: HashSet<String>,
}

impl WorkQueue {
    pub fn from_items(items: impl IntoIterator<Item = Item>) -> Self {
        let mut queue = Self::default();
        for item in items {
            queue.enqueue(item);
        }
        queue
    }

    /// Returns `false` when the id was already queued (or already handed out).
    pub fn enqueue(&mut self, item: Item) -> bool {
        if !self.seen.insert(item.id.clone()) {
            return false;
        }
        self.inner.push_back(item);
        true
    }

    pub fn dequeue(&mut self) -> Option<Item> {
        self.inner.pop_front()
    }

    pub fn drain_remaining(&mut self) -> Vec<Item> {
        self.inner.drain(..).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Item> {
        self.inner.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: &str) -> Item {
        Item {
            id: id.into(),
            title: id.to_uppercase(),
            artist: "Artist".into(),
            album: String::new(),
            cover_url: None,
        }
    }

    #[test]
    fn fifo_order_is_preserved() {
        let mut queue = WorkQueue::default();
        queue.enqueue(item("a"));
        queue.enqueue(item("b"));

        assert_eq!(queue.dequeue().unwrap().id, "a");
        assert_eq!(queue.dequeue().unwrap().id, "b");
        assert!(queue.is_empty());
    }

    #[test]
    fn dequeue_on_empty_returns_none() {
        let mut queue = WorkQueue::default();
        assert!(queue.dequeue().is_none());
    }

    #[test]
    fn repeated_ids_are_queued_once() {
        let queue = WorkQueue::from_items(vec![item("a"), item("b"), item("a")]);
        let ids: Vec<_> = queue.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn dequeued_id_cannot_be_requeued() {
        let mut queue = WorkQueue::from_items(vec![item("a")]);
        let taken = queue.dequeue().unwrap();
        assert!(!queue.enqueue(taken));
        assert!(queue.is_empty());
    }

    #[test]
    fn drain_remaining_empties_queue() {
        let mut queue = WorkQueue::from_items(vec![item("a"), item("b"), item("c")]);
        queue.dequeue();
        let rest: Vec<_> = queue.drain_remaining().into_iter().map(|i| i.id).collect();
        assert_eq!(rest, vec!["b".to_string(), "c".to_string()]);
        assert_eq!(queue.len(), 0);
    }
}
