use std::collections::VecDeque;

use parking_lot::Mutex;

/// FIFO queue of pending events with detach-before-send semantics.
///
/// The lock is held only for the duration of a push, detach or restore,
/// never across an await.
pub struct EventQueue<T> {
    items: Mutex<VecDeque<T>>,
    max_len: Option<usize>,
}

impl<T> EventQueue<T> {
    /// `max_len` of `None` means unbounded.
    pub fn new(max_len: Option<usize>) -> Self {
        Self {
            items: Mutex::new(VecDeque::new()),
            max_len,
        }
    }

    /// Append at the tail. Returns how many of the oldest events were
    /// dropped to stay within the bound.
    pub fn push(&self, item: T) -> usize {
        let mut items = self.items.lock();
        items.push_back(item);
        self.trim(&mut items)
    }

    /// Take everything, leaving the live queue empty.
    pub fn detach(&self) -> Vec<T> {
        let mut items = self.items.lock();
        std::mem::take(&mut *items).into()
    }

    /// Put a failed batch back in front of anything queued since it was
    /// detached. Returns how many of the oldest events were dropped.
    pub fn restore(&self, batch: Vec<T>) -> usize {
        if batch.is_empty() {
            return 0;
        }
        let mut items = self.items.lock();
        let newer = std::mem::take(&mut *items);
        let mut merged: VecDeque<T> = batch.into();
        merged.extend(newer);
        *items = merged;
        self.trim(&mut items)
    }

    pub fn len(&self) -> usize {
        self.items.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.lock().is_empty()
    }

    fn trim(&self, items: &mut VecDeque<T>) -> usize {
        let Some(max) = self.max_len else {
            return 0;
        };
        let excess = items.len().saturating_sub(max);
        items.drain(..excess);
        excess
    }
}

impl<T: Clone> EventQueue<T> {
    /// Copy of the queued events, oldest first.
    pub fn snapshot(&self) -> Vec<T> {
        self.items.lock().iter().cloned().collect()
    }
}
