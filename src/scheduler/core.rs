//! Scheduler set and its entry points
//!
//! A `SchedulerSet` owns one `PerCpuScheduler` per CPU. The thread layer
//! drives it through the entry points below and supplies the thread
//! primitives through `ThreadOps`.
//!
//! ## Task states
//!
//! ```text
//!   enqueue_runnable            choose_best / steal
//!  ------------------> Queued -----------------------> Designated
//!                        ^                                 |
//!                        |     acquire_for_running loses   | release_current
//!                        +---------------------------------+
//! ```
//!
//! A task is never Queued and Designated at once; `ONRUNQ` guards it.
//!
//! ## Locking
//!
//! At most one per-CPU lock is held at any time. Moving a task between CPUs
//! unlinks it under the source lock, drops that lock, then links it under
//! the destination lock. A task's home CPU may change while unlocked, so
//! `lock_home` re-checks it after locking.

use alloc::sync::Arc;
use alloc::vec::Vec;

use super::balance::Balancer;
use super::config::{FeatureFlags, SchedConfig, Tunables};
use super::error::{SchedError, SchedResult};
use super::ipi::ReschedRequest;
use super::lwp::{Lwp, LwpSched};
use super::percpu::{LockedCpu, PerCpuScheduler, SchedGlobals};
use super::priority::{
    blend_estcpu, compute_priority, fork_estcpu, instant_estcpu, should_preempt, sleep_estcpu,
};
use super::stats::PerCpuCounters;
use super::topology::CpuTopology;
use super::types::{RtPrio, MAX_CPUS, PPQMASK};

/// Thread primitives the scheduler drives but does not implement.
pub trait ThreadOps: Send + Sync {
    /// CPU the caller is executing on.
    fn current_cpu(&self) -> usize;

    /// Take `lwp`'s thread off the execution substrate.
    fn thread_deschedule(&self, lwp: &Arc<Lwp>);

    /// Make `lwp`'s thread runnable again.
    fn thread_schedule(&self, lwp: &Arc<Lwp>);

    /// Give up the calling CPU until `lwp`'s thread is scheduled again.
    /// Returns the CPU the caller resumed on.
    fn thread_switch_away(&self, lwp: &Arc<Lwp>) -> usize;

    /// Hand `lwp`'s execution context to `cpu`.
    fn thread_migrate(&self, lwp: &Arc<Lwp>, cpu: usize);

    /// Ask `cpu` to call `SchedulerSet::handle_ipi` soon.
    fn send_resched_ipi(&self, cpu: usize);
}

pub struct SchedulerSet<O: ThreadOps> {
    cpus: Vec<PerCpuScheduler>,
    topology: Option<CpuTopology>,
    tunables: Tunables,
    globals: SchedGlobals,
    ops: O,
}

impl<O: ThreadOps> SchedulerSet<O> {
    /// Scheduler set without topology information; placement falls back to
    /// a rotating scan.
    pub fn new(ncpus: usize, config: SchedConfig, ops: O) -> SchedResult<Self> {
        if ncpus == 0 {
            return Err(SchedError::NoCpus);
        }
        if ncpus > MAX_CPUS {
            return Err(SchedError::TooManyCpus);
        }
        Ok(Self::build(ncpus, None, config, ops))
    }

    pub fn with_topology(topology: CpuTopology, config: SchedConfig, ops: O) -> SchedResult<Self> {
        let ncpus = topology.ncpus();
        if ncpus == 0 {
            return Err(SchedError::NoCpus);
        }
        Ok(Self::build(ncpus, Some(topology), config, ops))
    }

    fn build(ncpus: usize, topology: Option<CpuTopology>, config: SchedConfig, ops: O) -> Self {
        let cpus = (0..ncpus).map(PerCpuScheduler::new).collect::<Vec<_>>();
        let set = Self {
            cpus,
            topology,
            tunables: Tunables::new(&config),
            globals: SchedGlobals::new(ncpus),
            ops,
        };

        for cpu in 0..ncpus {
            match &set.topology {
                Some(topo) => crate::kinfo!(
                    "usched: cpu {} online, {} siblings {:#x}",
                    cpu,
                    topo.level_of(cpu).as_str(),
                    topo.siblings(cpu).bits()
                ),
                None => crate::kinfo!("usched: cpu {} online, no topology", cpu),
            }
        }
        crate::kinfo!(
            "usched: {} cpus, rrinterval {} ticks, features {:#x}",
            ncpus,
            set.tunables.rrinterval(),
            set.tunables.features().bits()
        );
        set
    }

    #[inline]
    pub fn ncpus(&self) -> usize {
        self.cpus.len()
    }

    #[inline]
    pub fn tunables(&self) -> &Tunables {
        &self.tunables
    }

    #[inline]
    pub fn ops(&self) -> &O {
        &self.ops
    }

    #[inline]
    pub fn topology(&self) -> Option<&CpuTopology> {
        self.topology.as_ref()
    }

    #[inline]
    pub fn globals(&self) -> &SchedGlobals {
        &self.globals
    }

    pub fn cpu(&self, cpu: usize) -> SchedResult<&PerCpuScheduler> {
        self.cpus.get(cpu).ok_or(SchedError::CpuOutOfRange)
    }

    /// Task currently designated on `cpu`.
    pub fn designated(&self, cpu: usize) -> SchedResult<Option<Arc<Lwp>>> {
        let dd = self.cpu(cpu)?;
        Ok(dd.lock(&self.globals).uschedcp().cloned())
    }

    /// Lock `cpu` directly, for diagnostics and invariant checks.
    pub fn lock_cpu(&self, cpu: usize) -> SchedResult<LockedCpu<'_>> {
        Ok(self.cpu(cpu)?.lock(&self.globals))
    }

    pub fn balancer(&self) -> Balancer<'_> {
        Balancer {
            cpus: &self.cpus,
            topology: self.topology.as_ref(),
            tunables: &self.tunables,
            globals: &self.globals,
        }
    }

    // ========================================================================
    // Internal helpers
    // ========================================================================

    /// Optimistic home re-validation: lock the CPU `lwp` claims as home and
    /// retry if it moved before the lock was taken.
    fn lock_home(&self, lwp: &Lwp) -> (usize, LockedCpu<'_>) {
        loop {
            let cpu = lwp.qcpu();
            let dd = self.cpus[cpu].lock(&self.globals);
            if lwp.qcpu() == cpu {
                return (cpu, dd);
            }
        }
    }

    /// Move `lwp`'s home to `cpu`, taking its load along.
    fn rehome(&self, lwp: &Lwp, cpu: usize) {
        let (home, mut dd) = self.lock_home(lwp);
        if home == cpu {
            return;
        }
        dd.release_uload(lwp);
        lwp.set_qcpu(cpu);
    }

    fn dispatch(&self, cpu: usize, lwp: &Arc<Lwp>) {
        self.ops.thread_migrate(lwp, cpu);
        self.ops.thread_schedule(lwp);
    }

    fn post(&self, cpu: usize, request: ReschedRequest) {
        let dd = &self.cpus[cpu];
        if dd.mailbox.post(request) {
            PerCpuCounters::bump(&dd.counters.ipis);
            self.ops.send_resched_ipi(cpu);
        }
    }

    fn request_resched(&self, cpu: usize) {
        if cpu == self.ops.current_cpu() {
            self.cpus[cpu].set_need_resched();
        } else {
            self.post(cpu, ReschedRequest::NEED_USER_RESCHED);
        }
    }

    /// Recompute `lwp`'s priority and load from `sched`, requeueing it if it
    /// changed queues. Returns true if its CPU should reschedule.
    fn update_priority_locked(&self, dd: &mut LockedCpu<'_>, lwp: &Arc<Lwp>, sched: &LwpSched) -> bool {
        let nice = lwp.proc().nice();
        let newpri = compute_priority(sched.rtprio, nice, sched.estcpu);
        dd.update_uload(lwp, sched.estcpu, nice);

        let oldpri = lwp.priority();
        if lwp.is_on_runq() && (oldpri ^ newpri) & !PPQMASK != 0 {
            dd.requeue(lwp, newpri, self.tunables.rrinterval());
        } else {
            lwp.set_priority(newpri);
        }

        if dd.is_designated(lwp) {
            dd.set_upri(newpri);
            return false;
        }
        lwp.is_on_runq() && should_preempt(dd.upri(), newpri, self.tunables.fast_resched())
    }

    // ========================================================================
    // Priority maintenance
    // ========================================================================

    /// Fold the CPU time `lwp` used since the last update into its estcpu.
    pub fn recalc_estcpu(&self, lwp: &Arc<Lwp>) {
        let now = self.globals.ticks();
        let (home, mut dd) = self.lock_home(lwp);
        let resched = {
            let mut sched = lwp.lock_sched();
            if sched.slptime > 1 {
                sched.estcpu = sleep_estcpu(sched.estcpu);
                sched.estfast = 0;
                sched.slptime = 0;
            } else if sched.cpbase != now {
                let ttl = now.saturating_sub(sched.cpbase);
                let sample = instant_estcpu(sched.cpticks, ttl, self.globals.ucount(), self.ncpus());
                let (estcpu, estfast) =
                    blend_estcpu(sched.estcpu, sched.estfast, sample, self.tunables.decay());
                sched.estcpu = estcpu;
                sched.estfast = estfast;
            } else {
                return;
            }
            sched.cpbase = now;
            sched.cpticks = 0;
            self.update_priority_locked(&mut dd, lwp, &sched)
        };
        drop(dd);
        if resched {
            self.request_resched(home);
        }
    }

    /// Recompute priority after a nice or class change.
    pub fn reset_priority(&self, lwp: &Arc<Lwp>) {
        let (home, mut dd) = self.lock_home(lwp);
        let resched = {
            let sched = lwp.lock_sched();
            self.update_priority_locked(&mut dd, lwp, &sched)
        };
        drop(dd);
        if resched {
            self.request_resched(home);
        }
    }

    pub fn set_rtprio(&self, lwp: &Arc<Lwp>, rtprio: RtPrio) {
        let (home, mut dd) = self.lock_home(lwp);
        let resched = {
            let mut sched = lwp.lock_sched();
            sched.rtprio = rtprio;
            self.update_priority_locked(&mut dd, lwp, &sched)
        };
        drop(dd);
        if resched {
            self.request_resched(home);
        }
    }

    /// Change the process-wide nice of `lwp`'s process and re-rank `lwp`.
    /// Sibling lwps pick the new value up on their next recalculation.
    pub fn set_nice(&self, lwp: &Arc<Lwp>, nice: i32) {
        lwp.proc().store_nice(nice);
        self.reset_priority(lwp);
    }

    // ========================================================================
    // Clock
    // ========================================================================

    /// Scheduler clock for `cpu`, with `running` the task executing there.
    pub fn on_tick(&self, cpu: usize, running: Option<&Arc<Lwp>>) {
        let dd = &self.cpus[cpu];
        let tick = dd.advance_local_tick();
        self.globals.advance_ticks(tick);
        PerCpuCounters::bump(&dd.counters.ticks);

        if let Some(lwp) = running {
            if lwp.bump_rrcount() >= self.tunables.rrinterval() {
                dd.set_need_resched();
            }
            lwp.charge_tick();
            self.recalc_estcpu(lwp);
        }

        if self.tunables.has_feature(FeatureFlags::PERIODIC_REBALANCE)
            && tick % 8 == 0
            && (tick / 8) % self.ncpus() as u64 == cpu as u64
        {
            self.rebalance(cpu);
        }
    }

    /// Pull the worst task of the most loaded CPU over to `cpu`.
    pub fn rebalance(&self, cpu: usize) {
        let threshold = self.tunables.weight1().saturating_mul(4);
        let Some(victim) = self.balancer().choose_worst_queue(cpu, threshold) else {
            return;
        };
        let Some(mut rdd) = self.cpus[victim].try_lock(&self.globals) else {
            return;
        };
        let Some(lwp) = rdd.choose_for(cpu, true) else {
            return;
        };
        rdd.release_uload(&lwp);
        lwp.set_qcpu(cpu);
        drop(rdd);

        let dd = &self.cpus[cpu];
        let mut locked = dd.lock(&self.globals);
        if should_preempt(locked.upri(), lwp.priority(), 0) {
            let displaced = locked.designate(lwp.clone());
            drop(locked);
            if displaced.is_some() {
                dd.set_need_resched();
            }
            self.dispatch(cpu, &lwp);
        } else {
            locked.enqueue(lwp.clone(), self.tunables.rrinterval());
        }
        PerCpuCounters::bump(&dd.counters.rebalances);
        crate::kdebug!(
            "usched: rebalance tid {} cpu {} -> {}",
            lwp.tid(),
            victim,
            cpu
        );
    }

    // ========================================================================
    // Helper and IPIs
    // ========================================================================

    /// One pass of `cpu`'s idle helper.
    pub fn helper_poll(&self, cpu: usize) {
        let dd = &self.cpus[cpu];
        self.globals.set_ready(cpu);
        dd.clear_need_resched();

        let mut locked = dd.lock(&self.globals);
        if locked.runqcount() > 0 || locked.uschedcp().is_some() {
            let current = locked.uschedcp().cloned();
            if let Some(lwp) = locked.choose_best(current.as_ref()) {
                let displaced = locked.designate(lwp.clone());
                drop(locked);
                if displaced.is_some() {
                    dd.set_need_resched();
                }
                self.dispatch(cpu, &lwp);
            }
            return;
        }
        drop(locked);

        if !self.tunables.has_feature(FeatureFlags::IDLE_PULL) {
            return;
        }
        let threshold = self.tunables.weight1().saturating_mul(8);
        let Some(victim) = self.balancer().choose_worst_queue(cpu, threshold) else {
            return;
        };
        let Some(mut rdd) = self.cpus[victim].try_lock(&self.globals) else {
            return;
        };
        let Some(lwp) = rdd.choose_for(cpu, false) else {
            return;
        };
        rdd.release_uload(&lwp);
        lwp.set_qcpu(cpu);
        drop(rdd);

        let mut locked = dd.lock(&self.globals);
        if locked.uschedcp().is_none() {
            locked.designate(lwp.clone());
            drop(locked);
            self.dispatch(cpu, &lwp);
        } else {
            locked.enqueue(lwp.clone(), self.tunables.rrinterval());
        }
        PerCpuCounters::bump(&dd.counters.pulls);
        crate::kdebug!("usched: cpu {} pulled tid {} from cpu {}", cpu, lwp.tid(), victim);
    }

    /// Drain `cpu`'s mailbox. Called from the reschedule IPI handler.
    pub fn handle_ipi(&self, cpu: usize) {
        let dd = &self.cpus[cpu];
        let request = dd.mailbox.take();
        if request.contains(ReschedRequest::NEED_USER_RESCHED) {
            let busy = dd.lock(&self.globals).uschedcp().is_some();
            if busy {
                dd.set_need_resched();
            } else {
                self.helper_poll(cpu);
            }
        } else if request.contains(ReschedRequest::WAKE_HELPER) {
            self.helper_poll(cpu);
        }
    }

    // ========================================================================
    // Queueing
    // ========================================================================

    /// Make a runnable (woken, forked or preempted) task eligible to run.
    pub fn enqueue_runnable(&self, lwp: &Arc<Lwp>) {
        assert!(
            !lwp.is_on_runq(),
            "enqueue_runnable: lwp {} already on a run queue",
            lwp.tid()
        );
        let forked = core::mem::replace(&mut lwp.lock_sched().forked, false);
        let cpu = if forked {
            let qcpu = lwp.qcpu();
            if self.tunables.has_feature(FeatureFlags::FORK_BEST_QUEUE)
                && self.cpus[qcpu].runqcount() > 0
            {
                self.balancer().choose_best_queue(lwp)
            } else {
                qcpu
            }
        } else {
            self.balancer().choose_best_queue(lwp)
        };
        self.setrunqueue_dd(cpu, lwp);
    }

    /// Queue `lwp` on `cpu` and make sure `cpu` notices.
    fn setrunqueue_dd(&self, cpu: usize, lwp: &Arc<Lwp>) {
        {
            let (home, mut dd) = self.lock_home(lwp);
            assert!(
                !dd.is_designated(lwp),
                "enqueue: lwp {} is designated on cpu {}",
                lwp.tid(),
                home
            );
            if home != cpu && lwp.is_uload_accounted() {
                dd.release_uload(lwp);
            }
        }

        let current = self.ops.current_cpu();
        let fast_resched = self.tunables.fast_resched();
        let dd = &self.cpus[cpu];
        let mut locked = dd.lock(&self.globals);
        locked.enqueue(lwp.clone(), self.tunables.rrinterval());
        let preempt = should_preempt(locked.upri(), lwp.priority(), fast_resched);

        if cpu == current {
            if locked.uschedcp().is_none() {
                if let Some(next) = locked.choose_best(None) {
                    locked.designate(next.clone());
                    drop(locked);
                    self.dispatch(cpu, &next);
                }
            } else if preempt {
                drop(locked);
                dd.set_need_resched();
            }
            return;
        }

        drop(locked);
        if preempt {
            self.globals.clear_ready(cpu);
            self.post(cpu, ReschedRequest::NEED_USER_RESCHED);
        } else if self.globals.rdyprocmask().is_set(cpu) {
            self.globals.clear_ready(cpu);
            self.post(cpu, ReschedRequest::WAKE_HELPER);
        }
    }

    // ========================================================================
    // Acquire / release
    // ========================================================================

    /// Block until `lwp` is the designated task of the CPU it runs on.
    pub fn acquire_for_running(&self, lwp: &Arc<Lwp>) {
        self.recalc_estcpu(lwp);

        let mut cpu = self.ops.current_cpu();
        let mut doresched = self.cpus[cpu].take_need_resched();
        if doresched {
            self.release_current(lwp);
        }

        loop {
            if doresched && self.tunables.has_feature(FeatureFlags::PROACTIVE_PUSH) {
                let best = self.balancer().choose_best_queue(lwp);
                if best != cpu {
                    self.ops.thread_deschedule(lwp);
                    self.setrunqueue_dd(best, lwp);
                    PerCpuCounters::bump(&self.cpus[cpu].counters.pushes);
                    crate::kdebug!("usched: push tid {} cpu {} -> {}", lwp.tid(), cpu, best);
                    cpu = self.ops.thread_switch_away(lwp);
                    doresched = false;
                    continue;
                }
            }

            if lwp.qcpu() != cpu {
                self.rehome(lwp, cpu);
            }

            let dd = &self.cpus[cpu];
            let mut locked = dd.lock(&self.globals);
            if locked.is_designated(lwp) {
                locked.set_upri(lwp.priority());
                break;
            }
            if locked.uschedcp().is_none() {
                locked.designate(lwp.clone());
                break;
            }
            if should_preempt(locked.upri(), lwp.priority(), self.tunables.fast_resched()) {
                let displaced = locked.designate(lwp.clone());
                PerCpuCounters::bump(&dd.counters.steals);
                crate::kdebug!(
                    "usched: cpu {} tid {} steals from tid {}",
                    cpu,
                    lwp.tid(),
                    displaced.map_or(0, |prev| prev.tid())
                );
                break;
            }
            drop(locked);

            let target = if !doresched && self.tunables.has_feature(FeatureFlags::AGGRESSIVE_PUSH) {
                self.balancer().choose_best_queue(lwp)
            } else {
                cpu
            };
            self.ops.thread_deschedule(lwp);
            self.setrunqueue_dd(target, lwp);
            cpu = self.ops.thread_switch_away(lwp);
        }

        assert!(
            !lwp.is_on_runq(),
            "acquire: lwp {} designated while queued",
            lwp.tid()
        );
    }

    /// Give up `lwp`'s designation, if it holds one, and designate the
    /// next best task of that CPU.
    pub fn release_current(&self, lwp: &Arc<Lwp>) {
        let (cpu, mut dd) = self.lock_home(lwp);
        if !dd.is_designated(lwp) {
            return;
        }
        assert!(
            !lwp.is_on_runq(),
            "release: designated lwp {} is queued",
            lwp.tid()
        );
        dd.clear_designated();
        drop(dd);
        self.select_curproc(cpu);
    }

    fn select_curproc(&self, cpu: usize) {
        let mut dd = self.cpus[cpu].lock(&self.globals);
        let current = dd.uschedcp().cloned();
        let Some(next) = dd.choose_best(current.as_ref()) else {
            return;
        };
        let displaced = dd.designate(next.clone());
        drop(dd);
        if displaced.is_some() {
            self.cpus[cpu].set_need_resched();
        }
        self.dispatch(cpu, &next);
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Charge the parent for a fork and seed the child's estcpu.
    ///
    /// The child inherits the parent's home CPU and affinity; its first
    /// `enqueue_runnable` stays there unless that CPU already has queued
    /// work.
    pub fn on_fork(&self, parent: &Arc<Lwp>, child: &Arc<Lwp>) {
        assert!(
            !child.is_on_runq() && !child.is_uload_accounted(),
            "fork: child lwp {} already scheduled",
            child.tid()
        );

        let (child_estcpu, cpbase) = {
            let (_, mut dd) = self.lock_home(parent);
            let mut sched = parent.lock_sched();
            let (parent_estcpu, child_estcpu) = fork_estcpu(sched.estcpu);
            sched.estcpu = parent_estcpu;
            self.update_priority_locked(&mut dd, parent, &sched);
            (child_estcpu, sched.cpbase)
        };

        let home = parent.qcpu();
        child.set_qcpu(home);
        child.set_wakefromcpu(home);
        child.set_cpumask(parent.cpumask());

        let (_, mut dd) = self.lock_home(child);
        let mut sched = child.lock_sched();
        sched.estcpu = child_estcpu;
        sched.estfast = 0;
        sched.cpbase = cpbase;
        sched.cpticks = 0;
        sched.forked = true;
        self.update_priority_locked(&mut dd, child, &sched);
    }

    /// Forget an exiting task.
    pub fn on_exit(&self, lwp: &Arc<Lwp>) {
        let (cpu, mut dd) = self.lock_home(lwp);
        assert!(
            !lwp.is_on_runq(),
            "exit: lwp {} still on a run queue",
            lwp.tid()
        );
        let was_designated = dd.is_designated(lwp);
        if was_designated {
            dd.clear_designated();
        }
        dd.release_uload(lwp);
        drop(dd);

        if was_designated {
            self.select_curproc(cpu);
        }
        self.kick_idle_helper(cpu);
    }

    /// A task went to sleep; it stops counting toward its CPU's load.
    pub fn on_block(&self, lwp: &Arc<Lwp>) {
        let (cpu, mut dd) = self.lock_home(lwp);
        assert!(
            !lwp.is_on_runq(),
            "block: lwp {} still on a run queue",
            lwp.tid()
        );
        dd.release_uload(lwp);
        drop(dd);
        self.kick_idle_helper(cpu);
    }

    /// Put `lwp` behind its peers at its next release.
    pub fn on_yield(&self, lwp: &Arc<Lwp>) {
        lwp.set_rrcount(self.tunables.rrinterval());
        self.cpus[self.ops.current_cpu()].set_need_resched();
    }

    /// Lower load may let an idle CPU's helper pull work again.
    fn kick_idle_helper(&self, cpu: usize) {
        if !self.tunables.has_feature(FeatureFlags::IDLE_PULL) {
            return;
        }
        if self.globals.curprocmask().is_set(cpu) || !self.globals.rdyprocmask().is_set(cpu) {
            return;
        }
        self.globals.clear_ready(cpu);
        self.post(cpu, ReschedRequest::WAKE_HELPER);
    }
}
