//! Per-CPU reschedule mailbox
//!
//! Remote CPUs post request bits here instead of calling into the target
//! directly. Bits coalesce, so a burst of posts costs one interrupt: only
//! the post that finds the mailbox empty asks the platform to send an IPI.
//! The target drains the mailbox from its IPI handler.

use core::sync::atomic::{AtomicU32, Ordering};

use bitflags::bitflags;

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct ReschedRequest: u32 {
        /// A better task is queued; the running task should give way
        const NEED_USER_RESCHED = 0x01;
        /// Run one helper pass (pick up queued work or pull from a peer)
        const WAKE_HELPER = 0x02;
    }
}

pub struct IpiMailbox {
    pending: AtomicU32,
}

impl IpiMailbox {
    pub const fn new() -> Self {
        Self {
            pending: AtomicU32::new(0),
        }
    }

    /// Merge `request` into the mailbox. Returns true on the empty to
    /// non-empty transition, i.e. when the caller must raise the IPI.
    pub fn post(&self, request: ReschedRequest) -> bool {
        let prev = self.pending.fetch_or(request.bits(), Ordering::AcqRel);
        prev == 0 && !request.is_empty()
    }

    /// Drain all pending requests.
    pub fn take(&self) -> ReschedRequest {
        ReschedRequest::from_bits_truncate(self.pending.swap(0, Ordering::AcqRel))
    }

    pub fn pending(&self) -> ReschedRequest {
        ReschedRequest::from_bits_truncate(self.pending.load(Ordering::Acquire))
    }
}

impl Default for IpiMailbox {
    fn default() -> Self {
        Self::new()
    }
}
