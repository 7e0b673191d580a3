use serde::Serialize;

use crate::types::InboundMessage;

/// Number of messages kept before the log is wiped.
pub const DEFAULT_CAPACITY: usize = 50;

/// What a [`InboundBuffer::push`] did to the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pushed {
    Appended,
    /// The message brought the log to capacity and everything was cleared,
    /// the new message included.
    Reset,
}

/// Ordered, bounded log of received messages.
///
/// When an append brings the length to capacity the whole log is cleared.
/// This is a hard reset, not a sliding window: readers must accept the log
/// shrinking at any time.
#[derive(Debug, Clone, Serialize)]
pub struct InboundBuffer {
    messages: Vec<InboundMessage>,
    capacity: usize,
    received: u64,
    resets: u64,
}

impl Default for InboundBuffer {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }
}

impl InboundBuffer {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            messages: Vec::with_capacity(capacity),
            capacity,
            received: 0,
            resets: 0,
        }
    }

    pub fn push(&mut self, message: InboundMessage) -> Pushed {
        self.received += 1;
        self.messages.push(message);
        if self.messages.len() >= self.capacity {
            self.messages.clear();
            self.resets += 1;
            Pushed::Reset
        } else {
            Pushed::Appended
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Frames appended over the lifetime of the log, resets included.
    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn resets(&self) -> u64 {
        self.resets
    }

    /// Oldest first.
    pub fn messages(&self) -> &[InboundMessage] {
        &self.messages
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &InboundMessage> {
        self.messages.iter()
    }

    pub fn last(&self) -> Option<&InboundMessage> {
        self.messages.last()
    }

    /// Most recent message tagged `action`.
    pub fn latest(&self, action: &str) -> Option<&InboundMessage> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.action() == Some(action))
    }

    /// Most recent message tagged `action` whose correlation field `key`
    /// equals `value` (e.g. the `email` of the account a view is showing).
    pub fn latest_matching(&self, action: &str, key: &str, value: &str) -> Option<&InboundMessage> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.action() == Some(action) && m.field_is(key, value))
    }
}
