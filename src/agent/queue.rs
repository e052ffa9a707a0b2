//! Mailbox for follow-up user messages that arrive while a turn is
//! streaming.  Drained one message at a time between loop iterations.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::ai::types::ChatMessage;

pub const DEFAULT_QUEUE_CAPACITY: usize = 10;

#[derive(Debug, thiserror::Error, PartialEq)]
#[error("message queue full (max {capacity})")]
pub struct QueueFull {
    pub capacity: usize,
}

/// Bounded FIFO of queued user messages.
pub struct MessageQueue {
    inner: Mutex<VecDeque<ChatMessage>>,
    capacity: usize,
}

impl Default for MessageQueue {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

impl MessageQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    /// Enqueue a message; returns the queue position (1-based) on success.
    pub fn push(&self, message: ChatMessage) -> Result<usize, QueueFull> {
        let mut queue = match self.inner.lock() {
            Ok(queue) => queue,
            Err(poisoned) => poisoned.into_inner(),
        };
        if queue.len() >= self.capacity {
            return Err(QueueFull {
                capacity: self.capacity,
            });
        }
        queue.push_back(message);
        Ok(queue.len())
    }

    pub fn try_pop(&self) -> Option<ChatMessage> {
        self.inner.lock().ok().and_then(|mut q| q.pop_front())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|q| q.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_pop_is_fifo() {
        let queue = MessageQueue::default();
        queue.push(ChatMessage::user("first")).unwrap();
        queue.push(ChatMessage::user("second")).unwrap();
        assert_eq!(queue.try_pop().unwrap().content, "first");
        assert_eq!(queue.try_pop().unwrap().content, "second");
        assert!(queue.try_pop().is_none());
    }

    #[test]
    fn push_reports_position() {
        let queue = MessageQueue::default();
        assert_eq!(queue.push(ChatMessage::user("a")).unwrap(), 1);
        assert_eq!(queue.push(ChatMessage::user("b")).unwrap(), 2);
    }

    #[test]
    fn capacity_is_enforced() {
        let queue = MessageQueue::new(2);
        queue.push(ChatMessage::user("a")).unwrap();
        queue.push(ChatMessage::user("b")).unwrap();
        let err = queue.push(ChatMessage::user("c")).unwrap_err();
        assert_eq!(err.capacity, 2);
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn default_capacity_is_ten() {
        let queue = MessageQueue::default();
        for i in 0..10 {
            queue.push(ChatMessage::user(format!("m{i}"))).unwrap();
        }
        assert!(queue.push(ChatMessage::user("overflow")).is_err());
    }
}
