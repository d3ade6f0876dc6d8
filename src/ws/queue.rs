use std::collections::VecDeque;

use crate::types::Message;

/// Upper bound on messages held while the socket is not open.
pub const MAX_QUEUED_MESSAGES: usize = 100;

/// FIFO buffer for messages sent while the connection is not open.
///
/// When full, the oldest messages are dropped to make room.
#[derive(Debug)]
pub(crate) struct OutboundQueue {
    messages: VecDeque<Message>,
    capacity: usize,
}

impl Default for OutboundQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl OutboundQueue {
    pub(crate) fn new() -> Self {
        Self::with_capacity(MAX_QUEUED_MESSAGES)
    }

    pub(crate) fn with_capacity(capacity: usize) -> Self {
        Self {
            messages: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a message, evicting from the head until the queue fits. Returns how many
    /// messages were evicted.
    pub(crate) fn enqueue(&mut self, message: Message) -> usize {
        self.messages.push_back(message);

        let mut evicted = 0;
        while self.messages.len() > self.capacity {
            self.messages.pop_front();
            evicted += 1;
        }
        evicted
    }

    /// Put a message back at the head, ahead of everything queued after it.
    ///
    /// It is the oldest message, so it is the first to go if the queue is full.
    pub(crate) fn requeue(&mut self, message: Message) {
        if self.messages.len() < self.capacity {
            self.messages.push_front(message);
        }
    }

    /// Hand messages to `send` oldest first.
    ///
    /// Stops at the first failure; the rejected message goes back to the head so that order
    /// is preserved for the next flush. Returns how many messages were sent.
    pub(crate) fn flush<F>(&mut self, mut send: F) -> usize
    where
        F: FnMut(Message) -> Result<(), Message>,
    {
        let mut sent = 0;
        while let Some(message) = self.messages.pop_front() {
            if let Err(message) = send(message) {
                self.messages.push_front(message);
                break;
            }
            sent += 1;
        }
        sent
    }

    pub(crate) fn len(&self) -> usize {
        self.messages.len()
    }

    #[cfg(test)]
    pub(crate) fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    #[cfg(test)]
    pub(crate) fn iter(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter()
    }

    pub(crate) fn clear(&mut self) {
        self.messages.clear();
    }
}
