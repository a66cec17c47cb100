//! Bitmap-indexed run queue set
//!
//! 32 FIFO queues plus a presence bitmap; bit `i` is set iff queue `i` is
//! non-empty. Best/worst selection is a single find-first/find-last-set.

use alloc::collections::VecDeque;
use alloc::sync::Arc;

use super::lwp::Lwp;
use super::types::NQS;

/// Index of the least significant set bit.
#[inline]
pub const fn lowest_set_bit(bits: u32) -> Option<u32> {
    if bits == 0 {
        None
    } else {
        Some(bits.trailing_zeros())
    }
}

/// Index of the most significant set bit.
#[inline]
pub const fn highest_set_bit(bits: u32) -> Option<u32> {
    if bits == 0 {
        None
    } else {
        Some(31 - bits.leading_zeros())
    }
}

pub struct RunQueueSet {
    queues: [VecDeque<Arc<Lwp>>; NQS],
    bits: u32,
}

impl RunQueueSet {
    pub fn new() -> Self {
        Self {
            queues: core::array::from_fn(|_| VecDeque::new()),
            bits: 0,
        }
    }

    #[inline]
    pub fn bits(&self) -> u32 {
        self.bits
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.bits == 0
    }

    pub fn len(&self) -> usize {
        self.queues.iter().map(VecDeque::len).sum()
    }

    #[inline]
    pub fn queue_len(&self, index: usize) -> usize {
        self.queues[index].len()
    }

    pub fn push_tail(&mut self, index: usize, lwp: Arc<Lwp>) {
        self.queues[index].push_back(lwp);
        self.bits |= 1 << index;
    }

    pub fn push_head(&mut self, index: usize, lwp: Arc<Lwp>) {
        self.queues[index].push_front(lwp);
        self.bits |= 1 << index;
    }

    /// Unlink `lwp` from queue `index`.
    pub fn remove(&mut self, index: usize, lwp: &Lwp) -> Option<Arc<Lwp>> {
        let queue = &mut self.queues[index];
        let pos = queue
            .iter()
            .position(|entry| core::ptr::eq(Arc::as_ptr(entry), lwp))?;
        let entry = queue.remove(pos);
        if queue.is_empty() {
            assert!(
                self.bits & (1 << index) != 0,
                "runqueue: bit {} clear on a non-empty queue",
                index
            );
            self.bits &= !(1 << index);
        }
        entry
    }

    /// Head of the lowest non-empty queue.
    pub fn peek_best(&self) -> Option<&Arc<Lwp>> {
        let index = lowest_set_bit(self.bits)? as usize;
        let head = self.queues[index].front();
        assert!(head.is_some(), "runqueue: bit {} set on an empty queue", index);
        head
    }

    /// Tail of the highest non-empty queue.
    pub fn peek_worst(&self) -> Option<&Arc<Lwp>> {
        let index = highest_set_bit(self.bits)? as usize;
        let tail = self.queues[index].back();
        assert!(tail.is_some(), "runqueue: bit {} set on an empty queue", index);
        tail
    }

    pub fn pop_best(&mut self) -> Option<Arc<Lwp>> {
        let index = lowest_set_bit(self.bits)? as usize;
        self.pop_at(index, false)
    }

    pub fn pop_worst(&mut self) -> Option<Arc<Lwp>> {
        let index = highest_set_bit(self.bits)? as usize;
        self.pop_at(index, true)
    }

    fn pop_at(&mut self, index: usize, tail: bool) -> Option<Arc<Lwp>> {
        let queue = &mut self.queues[index];
        let entry = if tail {
            queue.pop_back()
        } else {
            queue.pop_front()
        };
        assert!(entry.is_some(), "runqueue: bit {} set on an empty queue", index);
        if queue.is_empty() {
            self.bits &= !(1 << index);
        }
        entry
    }

    pub fn contains(&self, lwp: &Lwp) -> bool {
        self.iter().any(|entry| core::ptr::eq(Arc::as_ptr(entry), lwp))
    }

    /// All queued lwps, best queue first, FIFO order within a queue.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<Lwp>> {
        self.queues.iter().flat_map(|queue| queue.iter())
    }

    /// First lwp matching `pred`, scanning from the head of the best queue.
    pub fn find_best<P>(&self, pred: P) -> Option<&Arc<Lwp>>
    where
        P: FnMut(&&Arc<Lwp>) -> bool,
    {
        self.iter().find(pred)
    }

    /// First lwp matching `pred`, scanning from the tail of the worst queue.
    pub fn find_worst<P>(&self, pred: P) -> Option<&Arc<Lwp>>
    where
        P: FnMut(&&Arc<Lwp>) -> bool,
    {
        self.queues
            .iter()
            .rev()
            .flat_map(|queue| queue.iter().rev())
            .find(pred)
    }

    /// Panic if any bitmap bit disagrees with its queue.
    pub fn verify(&self) {
        for (index, queue) in self.queues.iter().enumerate() {
            let bit = self.bits & (1 << index) != 0;
            assert_eq!(
                bit,
                !queue.is_empty(),
                "runqueue: bit {} is {} but queue holds {} entries",
                index,
                bit,
                queue.len()
            );
        }
    }
}

impl Default for RunQueueSet {
    fn default() -> Self {
        Self::new()
    }
}
