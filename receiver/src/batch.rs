use std::{num::NonZeroUsize, time::Duration};

use tokio::time::Instant;

/// What made a batch flush.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    Size,
    Timeout,
    Tick,
    EndOfStream,
}

/// An ordered, never empty, group of items flushed together.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch<T> {
    pub items: Vec<T>,
    pub trigger: FlushTrigger,
}

impl<T> Batch<T> {
    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

/// Groups items into batches bounded by size and by the wait since the first item.
#[derive(Debug)]
pub struct BatchAccumulator<T> {
    max_size: NonZeroUsize,
    max_wait: Option<Duration>,
    items: Vec<T>,
    first_at: Option<Instant>,
}

impl<T> BatchAccumulator<T> {
    /// Creates a new `BatchAccumulator`.
    ///
    /// # Arguments
    /// * `max_size` - The size at which a batch flushes.
    /// * `max_wait` - How long the first item of a batch may wait, `None` to never time out.
    pub fn new(max_size: NonZeroUsize, max_wait: Option<Duration>) -> Self {
        Self {
            max_size,
            max_wait,
            items: Vec::with_capacity(max_size.get()),
            first_at: None,
        }
    }

    /// The amount of items waiting for their batch to flush.
    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The instant at which the current batch times out, if any.
    pub fn deadline(&self) -> Option<Instant> {
        Some(self.first_at? + self.max_wait?)
    }

    /// Adds `item` to the current batch.
    ///
    /// # Arguments
    /// * `item` - The newly arrived item.
    /// * `now` - The arrival instant.
    ///
    /// # Returns
    /// The flushed batch if `item` filled it up or its deadline had already passed.
    pub fn push(&mut self, item: T, now: Instant) -> Option<Batch<T>> {
        self.first_at.get_or_insert(now);
        self.items.push(item);

        if self.items.len() >= self.max_size.get() {
            return self.flush(FlushTrigger::Size);
        }

        self.poll_expired(now)
    }

    /// Flushes the current batch if it waited for `max_wait` or longer.
    pub fn poll_expired(&mut self, now: Instant) -> Option<Batch<T>> {
        match self.deadline() {
            Some(deadline) if now >= deadline => self.flush(FlushTrigger::Timeout),
            _ => None,
        }
    }

    /// Flushes whatever arrived since the previous flush.
    ///
    /// # Returns
    /// `None` if nothing arrived, empty batches are never produced.
    pub fn take(&mut self, trigger: FlushTrigger) -> Option<Batch<T>> {
        self.flush(trigger)
    }

    fn flush(&mut self, trigger: FlushTrigger) -> Option<Batch<T>> {
        self.first_at = None;

        if self.items.is_empty() {
            return None;
        }

        let items = std::mem::replace(&mut self.items, Vec::with_capacity(self.max_size.get()));
        Some(Batch { items, trigger })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn size(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[test]
    fn size_trigger_splits_in_order() {
        let mut acc = BatchAccumulator::new(size(50), None);
        let now = Instant::now();
        let mut batches = Vec::new();

        for i in 0..123 {
            if let Some(batch) = acc.push(i, now) {
                batches.push(batch);
            }
        }

        if let Some(batch) = acc.take(FlushTrigger::EndOfStream) {
            batches.push(batch);
        }

        let sizes: Vec<_> = batches.iter().map(Batch::len).collect();
        assert_eq!(sizes, [50, 50, 23]);
        assert_eq!(batches[0].trigger, FlushTrigger::Size);
        assert_eq!(batches[2].trigger, FlushTrigger::EndOfStream);

        let flat: Vec<_> = batches.into_iter().flat_map(|b| b.items).collect();
        assert_eq!(flat, (0..123).collect::<Vec<_>>());
    }

    #[test]
    fn nothing_arrives_nothing_flushes() {
        let mut acc = BatchAccumulator::<u32>::new(size(10), Some(Duration::from_millis(500)));
        let now = Instant::now();

        assert_eq!(acc.deadline(), None);
        assert_eq!(acc.poll_expired(now + Duration::from_secs(1)), None);
        assert_eq!(acc.take(FlushTrigger::Tick), None);
    }

    #[test]
    fn timeout_counts_from_the_first_item() {
        let mut acc = BatchAccumulator::new(size(10), Some(Duration::from_millis(500)));
        let now = Instant::now();

        assert!(acc.push(1, now).is_none());
        assert!(acc.push(2, now + Duration::from_millis(400)).is_none());
        assert_eq!(acc.deadline(), Some(now + Duration::from_millis(500)));
        assert!(acc.poll_expired(now + Duration::from_millis(499)).is_none());

        let batch = acc.poll_expired(now + Duration::from_millis(500)).unwrap();
        assert_eq!(batch.items, [1, 2]);
        assert_eq!(batch.trigger, FlushTrigger::Timeout);
        assert_eq!(acc.deadline(), None);
    }

    #[test]
    fn late_push_flushes_on_timeout() {
        let mut acc = BatchAccumulator::new(size(10), Some(Duration::from_millis(100)));
        let now = Instant::now();

        acc.push(1, now);
        let batch = acc.push(2, now + Duration::from_millis(150)).unwrap();

        assert_eq!(batch.items, [1, 2]);
        assert_eq!(batch.trigger, FlushTrigger::Timeout);
    }

    #[test]
    fn tick_drains_what_arrived() {
        let mut acc = BatchAccumulator::new(size(100), None);
        let now = Instant::now();

        acc.push('a', now);
        acc.push('b', now);

        let batch = acc.take(FlushTrigger::Tick).unwrap();
        assert_eq!(batch.items, ['a', 'b']);
        assert!(acc.take(FlushTrigger::Tick).is_none());
    }
}
