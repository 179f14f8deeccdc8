use std::collections::BinaryHeap;

use delegate::delegate;

use super::event::Event;

/// A min-heap of pending events, FIFO among events due at the same time.
#[derive(Debug, Default)]
pub(crate) struct Schedule {
    inner: BinaryHeap<Event>,
    next_seq: u64,
}

impl Schedule {
    pub(crate) fn push(&mut self, ev: Event) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.inner.push(ev.with_seq(seq));
    }

    delegate! {
        to self.inner {
            pub(crate) fn pop(&mut self) -> Option<Event>;
            pub(crate) fn is_empty(&self) -> bool;
            pub(crate) fn len(&self) -> usize;
        }
    }
}
