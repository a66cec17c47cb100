//! Per-CPU scheduler state and run queues
//!
//! ## Architecture
//!
//! Each CPU owns:
//! - Three run queue sets (realtime, normal, idle) and the designated task,
//!   all behind one spin lock
//! - Advisory atomics mirroring the locked state (`runqcount`, `upri`,
//!   `uload`, `ucount`) for lock-free reads by balancers on other CPUs
//! - A reschedule flag, a reschedule mailbox and statistics counters
//!
//! ## Lock Hierarchy
//!
//! 1. One per-CPU run queue lock (never two at once; `try_lock` included)
//! 2. The lwp's `sched` lock
//!
//! The global masks are plain atomics and need no lock.

use alloc::sync::Arc;
use core::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, AtomicUsize, Ordering};

use spin::{Mutex, MutexGuard};

use super::ipi::IpiMailbox;
use super::lwp::{Lwp, MpFlags};
use super::priority::compute_uload;
use super::runqueue::RunQueueSet;
use super::stats::PerCpuCounters;
use super::types::{
    CpuMask, PPQ, PRIBASE_IDLE, PRIBASE_NORMAL, PRIBASE_NULL, PRIBASE_THREAD,
};

// ============================================================================
// Global scheduler state
// ============================================================================

/// Machine-wide hints shared by all CPUs of one scheduler set
pub struct SchedGlobals {
    ncpus: usize,
    /// CPUs with a designated task
    curprocmask: AtomicU64,
    /// CPUs whose helper is ready to accept work
    rdyprocmask: AtomicU64,
    /// Uload-accounted tasks across all CPUs
    ucount: AtomicI32,
    /// Rover for the topology-less chooser
    scancpu: AtomicUsize,
    /// Scheduler clock, the max of all per-CPU ticks
    ticks: AtomicU64,
}

impl SchedGlobals {
    pub fn new(ncpus: usize) -> Self {
        Self {
            ncpus,
            curprocmask: AtomicU64::new(0),
            rdyprocmask: AtomicU64::new(CpuMask::all(ncpus).bits()),
            ucount: AtomicI32::new(0),
            scancpu: AtomicUsize::new(0),
            ticks: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn ncpus(&self) -> usize {
        self.ncpus
    }

    #[inline]
    pub fn curprocmask(&self) -> CpuMask {
        CpuMask::from_bits(self.curprocmask.load(Ordering::Acquire))
    }

    #[inline]
    pub fn rdyprocmask(&self) -> CpuMask {
        CpuMask::from_bits(self.rdyprocmask.load(Ordering::Acquire))
    }

    pub(crate) fn set_curproc(&self, cpu: usize) {
        self.curprocmask
            .fetch_or(CpuMask::single(cpu).bits(), Ordering::AcqRel);
    }

    pub(crate) fn clear_curproc(&self, cpu: usize) {
        self.curprocmask
            .fetch_and(!CpuMask::single(cpu).bits(), Ordering::AcqRel);
    }

    pub(crate) fn set_ready(&self, cpu: usize) {
        self.rdyprocmask
            .fetch_or(CpuMask::single(cpu).bits(), Ordering::AcqRel);
    }

    pub(crate) fn clear_ready(&self, cpu: usize) {
        self.rdyprocmask
            .fetch_and(!CpuMask::single(cpu).bits(), Ordering::AcqRel);
    }

    #[inline]
    pub fn ucount(&self) -> i32 {
        self.ucount.load(Ordering::Relaxed)
    }

    pub(crate) fn next_scancpu(&self) -> usize {
        self.scancpu.fetch_add(1, Ordering::Relaxed).wrapping_add(1)
    }

    #[inline]
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Acquire)
    }

    pub(crate) fn advance_ticks(&self, local: u64) {
        self.ticks.fetch_max(local, Ordering::AcqRel);
    }
}

// ============================================================================
// Per-CPU Run Queue
// ============================================================================

/// Lock-protected part of a CPU's scheduler
pub struct PerCpuRunQueue {
    rtqueues: RunQueueSet,
    queues: RunQueueSet,
    idqueues: RunQueueSet,
    uschedcp: Option<Arc<Lwp>>,
}

impl PerCpuRunQueue {
    fn new() -> Self {
        Self {
            rtqueues: RunQueueSet::new(),
            queues: RunQueueSet::new(),
            idqueues: RunQueueSet::new(),
            uschedcp: None,
        }
    }

    fn set_for(&mut self, priority: u32) -> &mut RunQueueSet {
        match priority {
            p if p < PRIBASE_NORMAL => &mut self.rtqueues,
            p if p < PRIBASE_IDLE => &mut self.queues,
            p if p < PRIBASE_THREAD => &mut self.idqueues,
            p => panic!("runqueue: priority {} is not a user class", p),
        }
    }
}

// ============================================================================
// Per-CPU Scheduler
// ============================================================================

#[repr(align(64))]
pub struct PerCpuScheduler {
    cpu_id: usize,
    cpumask: CpuMask,
    run_queue: Mutex<PerCpuRunQueue>,

    runqcount: AtomicU32,
    upri: AtomicU32,
    uload: AtomicI32,
    ucount: AtomicI32,

    need_resched: AtomicBool,
    local_tick: AtomicU64,
    pub(crate) mailbox: IpiMailbox,
    pub(crate) counters: PerCpuCounters,
}

impl PerCpuScheduler {
    pub fn new(cpu_id: usize) -> Self {
        Self {
            cpu_id,
            cpumask: CpuMask::single(cpu_id),
            run_queue: Mutex::new(PerCpuRunQueue::new()),
            runqcount: AtomicU32::new(0),
            upri: AtomicU32::new(PRIBASE_NULL),
            uload: AtomicI32::new(0),
            ucount: AtomicI32::new(0),
            need_resched: AtomicBool::new(false),
            local_tick: AtomicU64::new(0),
            mailbox: IpiMailbox::new(),
            counters: PerCpuCounters::new(),
        }
    }

    #[inline]
    pub fn cpu_id(&self) -> usize {
        self.cpu_id
    }

    #[inline]
    pub fn cpumask(&self) -> CpuMask {
        self.cpumask
    }

    pub fn lock<'a>(&'a self, globals: &'a SchedGlobals) -> LockedCpu<'a> {
        LockedCpu {
            dd: self,
            globals,
            rq: self.run_queue.lock(),
        }
    }

    pub fn try_lock<'a>(&'a self, globals: &'a SchedGlobals) -> Option<LockedCpu<'a>> {
        let rq = self.run_queue.try_lock()?;
        Some(LockedCpu {
            dd: self,
            globals,
            rq,
        })
    }

    /// Queued tasks (advisory)
    #[inline]
    pub fn runqcount(&self) -> u32 {
        self.runqcount.load(Ordering::Acquire)
    }

    /// Priority of the designated task, `PRIBASE_NULL` if none (advisory)
    #[inline]
    pub fn upri(&self) -> u32 {
        self.upri.load(Ordering::Acquire)
    }

    #[inline]
    pub fn uload(&self) -> i32 {
        self.uload.load(Ordering::Acquire)
    }

    #[inline]
    pub fn ucount(&self) -> i32 {
        self.ucount.load(Ordering::Acquire)
    }

    pub fn set_need_resched(&self) {
        self.need_resched.store(true, Ordering::Release);
    }

    pub fn need_resched(&self) -> bool {
        self.need_resched.load(Ordering::Acquire)
    }

    /// Check and clear the reschedule flag
    pub fn take_need_resched(&self) -> bool {
        self.need_resched.swap(false, Ordering::AcqRel)
    }

    pub(crate) fn clear_need_resched(&self) {
        self.need_resched.store(false, Ordering::Release);
    }

    #[inline]
    pub fn local_tick(&self) -> u64 {
        self.local_tick.load(Ordering::Relaxed)
    }

    pub(crate) fn advance_local_tick(&self) -> u64 {
        self.local_tick.fetch_add(1, Ordering::Relaxed) + 1
    }
}

// ============================================================================
// Locked view
// ============================================================================

/// A CPU's scheduler with its run queue lock held
pub struct LockedCpu<'a> {
    dd: &'a PerCpuScheduler,
    globals: &'a SchedGlobals,
    rq: MutexGuard<'a, PerCpuRunQueue>,
}

impl<'a> LockedCpu<'a> {
    #[inline]
    pub fn cpu_id(&self) -> usize {
        self.dd.cpu_id
    }

    #[inline]
    pub fn upri(&self) -> u32 {
        self.dd.upri()
    }

    #[inline]
    pub fn runqcount(&self) -> u32 {
        self.dd.runqcount()
    }

    #[inline]
    pub fn uschedcp(&self) -> Option<&Arc<Lwp>> {
        self.rq.uschedcp.as_ref()
    }

    pub fn is_designated(&self, lwp: &Lwp) -> bool {
        self.rq
            .uschedcp
            .as_ref()
            .is_some_and(|cur| core::ptr::eq(Arc::as_ptr(cur), lwp))
    }

    /// Insert `lwp` on this CPU's queues.
    ///
    /// A task that used up its round-robin slice, or that would otherwise
    /// jump a non-empty queue, goes to the tail; anything else to the head.
    pub fn enqueue(&mut self, lwp: Arc<Lwp>, rrinterval: u32) {
        let cpu = self.dd.cpu_id;
        assert!(
            !lwp.is_on_runq(),
            "enqueue: lwp {} already on a run queue",
            lwp.tid()
        );
        assert!(
            !self.is_designated(&lwp),
            "enqueue: lwp {} is designated on cpu {}",
            lwp.tid(),
            cpu
        );
        if lwp.qcpu() != cpu {
            assert!(
                !lwp.is_uload_accounted(),
                "enqueue: lwp {} still accounted on cpu {}",
                lwp.tid(),
                lwp.qcpu()
            );
            lwp.set_qcpu(cpu);
        }

        let priority = lwp.priority();
        let index = lwp.rqindex();
        let set = self.rq.set_for(priority);
        if lwp.rrcount() >= rrinterval || set.queue_len(index) != 0 {
            lwp.set_rrcount(0);
            set.push_tail(index, lwp.clone());
        } else {
            set.push_head(index, lwp.clone());
        }
        lwp.set_mpflags(MpFlags::ONRUNQ);
        self.dd.runqcount.fetch_add(1, Ordering::AcqRel);
        self.account_uload(&lwp);

        crate::ktrace!(
            "usched: cpu {} enqueue tid {} pri {} rq {}",
            cpu,
            lwp.tid(),
            priority,
            index
        );
    }

    /// Unlink a queued `lwp`. Load accounting is left alone.
    pub fn dequeue(&mut self, lwp: &Arc<Lwp>) -> Arc<Lwp> {
        assert!(
            lwp.is_on_runq(),
            "dequeue: lwp {} not on a run queue",
            lwp.tid()
        );
        let index = lwp.rqindex();
        let entry = self
            .rq
            .set_for(lwp.priority())
            .remove(index, lwp)
            .unwrap_or_else(|| {
                panic!(
                    "dequeue: lwp {} missing from queue {} on cpu {}",
                    lwp.tid(),
                    index,
                    self.dd.cpu_id
                )
            });
        lwp.clear_mpflags(MpFlags::ONRUNQ);
        self.dd.runqcount.fetch_sub(1, Ordering::AcqRel);
        entry
    }

    /// Pick the next task to run (`worst == false`) or to give away
    /// (`worst == true`) and unlink it.
    ///
    /// With `chk` given, returns `None` when `chk` is within one queue of
    /// the candidate, keeping the current task in place.
    pub fn chooseproc(&mut self, chk: Option<&Arc<Lwp>>, worst: bool) -> Option<Arc<Lwp>> {
        let rq = &mut *self.rq;
        let set = if worst {
            [&mut rq.idqueues, &mut rq.queues, &mut rq.rtqueues]
                .into_iter()
                .find(|set| !set.is_empty())?
        } else {
            [&mut rq.rtqueues, &mut rq.queues, &mut rq.idqueues]
                .into_iter()
                .find(|set| !set.is_empty())?
        };

        let candidate = if worst {
            set.peek_worst()?
        } else {
            set.peek_best()?
        };
        if let Some(chk) = chk {
            if chk.priority() < candidate.priority() + PPQ {
                return None;
            }
        }

        let lwp = if worst {
            set.pop_worst()
        } else {
            set.pop_best()
        }?;
        assert!(
            lwp.is_on_runq(),
            "chooseproc: lwp {} queued without ONRUNQ",
            lwp.tid()
        );
        lwp.clear_mpflags(MpFlags::ONRUNQ);
        self.dd.runqcount.fetch_sub(1, Ordering::AcqRel);

        crate::ktrace!(
            "usched: cpu {} choose{} tid {} pri {}",
            self.dd.cpu_id,
            if worst { " worst" } else { "" },
            lwp.tid(),
            lwp.priority()
        );
        Some(lwp)
    }

    /// Best queued task, honouring the exclusion rule.
    #[inline]
    pub fn choose_best(&mut self, exclude: Option<&Arc<Lwp>>) -> Option<Arc<Lwp>> {
        self.chooseproc(exclude, false)
    }

    /// Worst queued task, for eviction by the balancer.
    #[inline]
    pub fn choose_worst(&mut self) -> Option<Arc<Lwp>> {
        self.chooseproc(None, true)
    }

    /// Best (or worst) queued task allowed to run on `cpu`, for another
    /// CPU stealing from this one. Tasks whose affinity excludes `cpu` are
    /// passed over.
    pub fn choose_for(&mut self, cpu: usize, worst: bool) -> Option<Arc<Lwp>> {
        let allowed = move |lwp: &&Arc<Lwp>| lwp.cpumask().is_set(cpu);
        let rq = &*self.rq;
        let found = if worst {
            [&rq.idqueues, &rq.queues, &rq.rtqueues]
                .into_iter()
                .find_map(|set| set.find_worst(allowed))
        } else {
            [&rq.rtqueues, &rq.queues, &rq.idqueues]
                .into_iter()
                .find_map(|set| set.find_best(allowed))
        };
        let candidate = found.cloned()?;

        crate::ktrace!(
            "usched: cpu {} gives tid {} to cpu {}",
            self.dd.cpu_id,
            candidate.tid(),
            cpu
        );
        Some(self.dequeue(&candidate))
    }

    /// Make `lwp` this CPU's designated task, replacing any previous one.
    pub fn designate(&mut self, lwp: Arc<Lwp>) -> Option<Arc<Lwp>> {
        let cpu = self.dd.cpu_id;
        assert!(
            !lwp.is_on_runq(),
            "designate: lwp {} still on a run queue",
            lwp.tid()
        );
        assert_eq!(
            lwp.qcpu(),
            cpu,
            "designate: lwp {} homed elsewhere",
            lwp.tid()
        );
        self.account_uload(&lwp);
        self.globals.set_curproc(cpu);
        self.dd.upri.store(lwp.priority(), Ordering::Release);
        lwp.set_rrcount(0);
        self.dd.counters.designations.fetch_add(1, Ordering::Relaxed);
        self.rq.uschedcp.replace(lwp)
    }

    /// Drop the designation, if any.
    pub fn clear_designated(&mut self) -> Option<Arc<Lwp>> {
        self.dd.upri.store(PRIBASE_NULL, Ordering::Release);
        self.globals.clear_curproc(self.dd.cpu_id);
        self.rq.uschedcp.take()
    }

    pub fn set_upri(&mut self, priority: u32) {
        self.dd.upri.store(priority, Ordering::Release);
    }

    /// Include `lwp`'s load in this CPU's aggregate if it is not already.
    pub fn account_uload(&mut self, lwp: &Lwp) {
        if lwp.is_uload_accounted() {
            return;
        }
        debug_assert_eq!(lwp.qcpu(), self.dd.cpu_id);
        lwp.set_mpflags(MpFlags::ULOAD);
        self.dd.uload.fetch_add(lwp.uload(), Ordering::AcqRel);
        self.dd.ucount.fetch_add(1, Ordering::AcqRel);
        self.globals.ucount.fetch_add(1, Ordering::AcqRel);
    }

    /// Remove `lwp`'s load from this CPU's aggregate if present.
    pub fn release_uload(&mut self, lwp: &Lwp) {
        if !lwp.is_uload_accounted() {
            return;
        }
        lwp.clear_mpflags(MpFlags::ULOAD);
        self.dd.uload.fetch_sub(lwp.uload(), Ordering::AcqRel);
        self.dd.ucount.fetch_sub(1, Ordering::AcqRel);
        self.globals.ucount.fetch_sub(1, Ordering::AcqRel);
    }

    /// Store a new uload for `lwp`, adjusting the aggregate if counted here.
    pub fn update_uload(&mut self, lwp: &Lwp, estcpu: u32, nice: i32) {
        let new = compute_uload(estcpu, nice);
        let old = lwp.uload();
        if new == old {
            return;
        }
        if lwp.is_uload_accounted() {
            self.dd.uload.fetch_add(new - old, Ordering::AcqRel);
        }
        lwp.set_uload(new);
    }

    /// Move a queued `lwp` to the queue matching `priority`.
    pub fn requeue(&mut self, lwp: &Arc<Lwp>, priority: u32, rrinterval: u32) {
        let entry = self.dequeue(lwp);
        lwp.set_priority(priority);
        self.enqueue(entry, rrinterval);
    }

    /// Every queued task: realtime, normal, then idle; best queue first.
    pub fn queued(&self) -> impl Iterator<Item = &Arc<Lwp>> {
        self.rq
            .rtqueues
            .iter()
            .chain(self.rq.queues.iter())
            .chain(self.rq.idqueues.iter())
    }

    pub fn contains(&self, lwp: &Lwp) -> bool {
        self.rq.rtqueues.contains(lwp) || self.rq.queues.contains(lwp) || self.rq.idqueues.contains(lwp)
    }

    /// Bitmaps of the realtime, normal and idle sets.
    pub fn queue_bits(&self) -> [u32; 3] {
        [
            self.rq.rtqueues.bits(),
            self.rq.queues.bits(),
            self.rq.idqueues.bits(),
        ]
    }

    /// Panic if any bitmap, count or flag disagrees with the queues.
    pub fn verify(&self) {
        self.rq.rtqueues.verify();
        self.rq.queues.verify();
        self.rq.idqueues.verify();
        let queued = self.rq.rtqueues.len() + self.rq.queues.len() + self.rq.idqueues.len();
        assert_eq!(
            queued as u32,
            self.dd.runqcount(),
            "runqueue: cpu {} runqcount out of sync",
            self.dd.cpu_id
        );
        for lwp in self.queued() {
            assert!(lwp.is_on_runq(), "runqueue: tid {} queued without ONRUNQ", lwp.tid());
            assert_eq!(lwp.qcpu(), self.dd.cpu_id, "runqueue: tid {} homed elsewhere", lwp.tid());
        }
        if let Some(cur) = self.uschedcp() {
            assert!(!cur.is_on_runq(), "runqueue: designated tid {} is queued", cur.tid());
        }
    }
}

/// Class band of a priority, for diagnostics.
pub fn band_name(priority: u32) -> &'static str {
    match priority {
        p if p < PRIBASE_NORMAL => "rt",
        p if p < PRIBASE_IDLE => "normal",
        p if p < PRIBASE_THREAD => "idle",
        p if p < PRIBASE_NULL => "thread",
        _ => "none",
    }
}
