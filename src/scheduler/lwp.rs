//! Schedulable entity (lwp) and its owning process
//!
//! Fields read by remote CPUs for routing decisions are atomics. Fields that
//! only change together with a priority recomputation live in `sched` and
//! are locked after the home CPU's run queue lock, never before it.

use alloc::sync::Arc;
use core::fmt;
use core::sync::atomic::{AtomicI32, AtomicU32, AtomicU64, AtomicUsize, Ordering};

use bitflags::bitflags;
use spin::{Mutex, MutexGuard};

use super::priority::{clamp_estcpu, clamp_nice, compute_priority, compute_uload, rqindex};
use super::types::{CpuMask, RtPrio, SchedClass};

bitflags! {
    /// Multiprocessor state flags, modified under the home run queue lock.
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct MpFlags: u32 {
        /// Sitting on a run queue
        const ONRUNQ = 0x0001;
        /// `uload` is included in the home CPU's aggregate
        const ULOAD = 0x0002;
    }
}

/// Process-wide scheduling state shared by all lwps of a process
pub struct ProcInfo {
    pid: u32,
    nice: AtomicI32,
}

impl ProcInfo {
    pub fn new(pid: u32, nice: i32) -> Arc<Self> {
        Arc::new(Self {
            pid,
            nice: AtomicI32::new(clamp_nice(nice)),
        })
    }

    #[inline]
    pub fn pid(&self) -> u32 {
        self.pid
    }

    #[inline]
    pub fn nice(&self) -> i32 {
        self.nice.load(Ordering::Relaxed)
    }

    /// Store a new nice value. Priorities pick it up on the next
    /// `SchedulerSet::reset_priority` of each lwp.
    pub fn store_nice(&self, nice: i32) {
        self.nice.store(clamp_nice(nice), Ordering::Relaxed);
    }
}

/// estcpu bookkeeping, guarded by `Lwp::sched`
#[derive(Clone, Copy, Debug)]
pub struct LwpSched {
    pub rtprio: RtPrio,
    pub estcpu: u32,
    /// Samples folded in with fast decay so far
    pub estfast: u32,
    /// Scheduler tick of the last estcpu update
    pub cpbase: u64,
    /// Ticks spent running since `cpbase`
    pub cpticks: u32,
    /// Ticks slept before the last wakeup
    pub slptime: u32,
    /// Freshly forked, not yet placed
    pub forked: bool,
}

pub struct Lwp {
    tid: u32,
    proc: Arc<ProcInfo>,
    cpumask: AtomicU64,
    qcpu: AtomicUsize,
    wakefromcpu: AtomicUsize,
    priority: AtomicU32,
    uload: AtomicI32,
    rrcount: AtomicU32,
    mpflags: AtomicU32,
    sched: Mutex<LwpSched>,
}

impl Lwp {
    /// New lwp homed on `cpu`, runnable anywhere.
    pub fn new(tid: u32, proc: Arc<ProcInfo>, rtprio: RtPrio, cpu: usize) -> Arc<Self> {
        Self::with_estcpu(tid, proc, rtprio, cpu, 0)
    }

    /// New lwp that inherits an estcpu figure, e.g. a thread created from
    /// a busy sibling.
    pub fn with_estcpu(
        tid: u32,
        proc: Arc<ProcInfo>,
        rtprio: RtPrio,
        cpu: usize,
        estcpu: u32,
    ) -> Arc<Self> {
        let estcpu = clamp_estcpu(estcpu as u64);
        let nice = proc.nice();
        Arc::new(Self {
            tid,
            proc,
            cpumask: AtomicU64::new(u64::MAX),
            qcpu: AtomicUsize::new(cpu),
            wakefromcpu: AtomicUsize::new(cpu),
            priority: AtomicU32::new(compute_priority(rtprio, nice, estcpu)),
            uload: AtomicI32::new(compute_uload(estcpu, nice)),
            rrcount: AtomicU32::new(0),
            mpflags: AtomicU32::new(0),
            sched: Mutex::new(LwpSched {
                rtprio,
                estcpu,
                estfast: 0,
                cpbase: 0,
                cpticks: 0,
                slptime: 0,
                forked: false,
            }),
        })
    }

    #[inline]
    pub fn tid(&self) -> u32 {
        self.tid
    }

    #[inline]
    pub fn proc(&self) -> &Arc<ProcInfo> {
        &self.proc
    }

    /// Current dynamic priority; lower is better.
    #[inline]
    pub fn priority(&self) -> u32 {
        self.priority.load(Ordering::Acquire)
    }

    pub(crate) fn set_priority(&self, priority: u32) {
        self.priority.store(priority, Ordering::Release);
    }

    #[inline]
    pub fn rqindex(&self) -> usize {
        rqindex(self.priority())
    }

    /// Home CPU. Unlocked reads are routing hints only.
    #[inline]
    pub fn qcpu(&self) -> usize {
        self.qcpu.load(Ordering::Acquire)
    }

    pub(crate) fn set_qcpu(&self, cpu: usize) {
        self.qcpu.store(cpu, Ordering::Release);
    }

    /// CPU that last woke this lwp.
    #[inline]
    pub fn wakefromcpu(&self) -> usize {
        self.wakefromcpu.load(Ordering::Relaxed)
    }

    pub fn set_wakefromcpu(&self, cpu: usize) {
        self.wakefromcpu.store(cpu, Ordering::Relaxed);
    }

    #[inline]
    pub fn cpumask(&self) -> CpuMask {
        CpuMask::from_bits(self.cpumask.load(Ordering::Relaxed))
    }

    /// Restrict the CPUs this lwp may be placed on. Takes effect at the
    /// next placement decision.
    pub fn set_cpumask(&self, mask: CpuMask) {
        self.cpumask.store(mask.bits(), Ordering::Relaxed);
    }

    #[inline]
    pub fn uload(&self) -> i32 {
        self.uload.load(Ordering::Relaxed)
    }

    pub(crate) fn set_uload(&self, uload: i32) {
        self.uload.store(uload, Ordering::Relaxed);
    }

    /// Ticks since the lwp last went to the tail of its queue.
    #[inline]
    pub fn rrcount(&self) -> u32 {
        self.rrcount.load(Ordering::Relaxed)
    }

    pub(crate) fn set_rrcount(&self, value: u32) {
        self.rrcount.store(value, Ordering::Relaxed);
    }

    pub(crate) fn bump_rrcount(&self) -> u32 {
        self.rrcount.fetch_add(1, Ordering::Relaxed) + 1
    }

    #[inline]
    pub fn mpflags(&self) -> MpFlags {
        MpFlags::from_bits_truncate(self.mpflags.load(Ordering::Acquire))
    }

    #[inline]
    pub fn is_on_runq(&self) -> bool {
        self.mpflags().contains(MpFlags::ONRUNQ)
    }

    #[inline]
    pub fn is_uload_accounted(&self) -> bool {
        self.mpflags().contains(MpFlags::ULOAD)
    }

    pub(crate) fn set_mpflags(&self, flags: MpFlags) {
        self.mpflags.fetch_or(flags.bits(), Ordering::AcqRel);
    }

    pub(crate) fn clear_mpflags(&self, flags: MpFlags) {
        self.mpflags.fetch_and(!flags.bits(), Ordering::AcqRel);
    }

    pub fn sched_class(&self) -> SchedClass {
        self.sched.lock().rtprio.class
    }

    pub fn estcpu(&self) -> u32 {
        self.sched.lock().estcpu
    }

    /// Copy of the estcpu bookkeeping, for diagnostics.
    pub fn sched_snapshot(&self) -> LwpSched {
        *self.sched.lock()
    }

    pub(crate) fn lock_sched(&self) -> MutexGuard<'_, LwpSched> {
        self.sched.lock()
    }

    /// Report how long the lwp slept before its latest wakeup.
    pub fn note_sleep(&self, ticks: u32) {
        self.sched.lock().slptime = ticks;
    }

    /// Account one tick of CPU time.
    pub(crate) fn charge_tick(&self) {
        let mut sched = self.sched.lock();
        sched.cpticks = sched.cpticks.saturating_add(1);
    }
}

impl fmt::Debug for Lwp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Lwp")
            .field("pid", &self.proc.pid())
            .field("tid", &self.tid)
            .field("qcpu", &self.qcpu())
            .field("priority", &self.priority())
            .field("mpflags", &self.mpflags())
            .finish()
    }
}
