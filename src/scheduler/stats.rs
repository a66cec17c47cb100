//! Scheduler statistics and introspection
//!
//! Counters are bumped with relaxed atomics from any CPU; snapshots are
//! therefore approximate while the machine is busy.

use core::sync::atomic::{AtomicU64, Ordering};

use super::core::{SchedulerSet, ThreadOps};
use super::error::SchedResult;
use super::percpu::band_name;

/// Per-CPU event counters
pub struct PerCpuCounters {
    pub ticks: AtomicU64,
    /// Times a task became this CPU's designated task
    pub designations: AtomicU64,
    /// Designations taken over by a better task
    pub steals: AtomicU64,
    /// Tasks pulled in by this CPU's idle helper
    pub pulls: AtomicU64,
    /// Tasks this CPU pushed to a better CPU
    pub pushes: AtomicU64,
    /// Tasks moved here by the periodic rebalance
    pub rebalances: AtomicU64,
    /// Reschedule IPIs raised toward this CPU
    pub ipis: AtomicU64,
}

impl PerCpuCounters {
    pub const fn new() -> Self {
        Self {
            ticks: AtomicU64::new(0),
            designations: AtomicU64::new(0),
            steals: AtomicU64::new(0),
            pulls: AtomicU64::new(0),
            pushes: AtomicU64::new(0),
            rebalances: AtomicU64::new(0),
            ipis: AtomicU64::new(0),
        }
    }

    #[inline]
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

impl Default for PerCpuCounters {
    fn default() -> Self {
        Self::new()
    }
}

/// Point-in-time view of one CPU's scheduler
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PerCpuStats {
    pub cpu: usize,
    pub runqcount: u32,
    pub uload: i32,
    pub ucount: i32,
    pub upri: u32,
    /// tid of the designated task
    pub designated: Option<u32>,
    pub ticks: u64,
    pub designations: u64,
    pub steals: u64,
    pub pulls: u64,
    pub pushes: u64,
    pub rebalances: u64,
    pub ipis: u64,
}

impl<O: ThreadOps> SchedulerSet<O> {
    /// Aggregate uload of `cpu`.
    pub fn current_load(&self, cpu: usize) -> SchedResult<i32> {
        Ok(self.cpu(cpu)?.uload())
    }

    /// Tasks queued (not designated) on `cpu`.
    pub fn queue_depth(&self, cpu: usize) -> SchedResult<u32> {
        Ok(self.cpu(cpu)?.runqcount())
    }

    /// tid of the task designated on `cpu`, if any.
    pub fn designated_tid(&self, cpu: usize) -> SchedResult<Option<u32>> {
        Ok(self.designated(cpu)?.map(|lwp| lwp.tid()))
    }

    pub fn percpu_stats(&self, cpu: usize) -> SchedResult<PerCpuStats> {
        let dd = self.cpu(cpu)?;
        let counters = &dd.counters;
        Ok(PerCpuStats {
            cpu,
            runqcount: dd.runqcount(),
            uload: dd.uload(),
            ucount: dd.ucount(),
            upri: dd.upri(),
            designated: self.designated_tid(cpu)?,
            ticks: counters.ticks.load(Ordering::Relaxed),
            designations: counters.designations.load(Ordering::Relaxed),
            steals: counters.steals.load(Ordering::Relaxed),
            pulls: counters.pulls.load(Ordering::Relaxed),
            pushes: counters.pushes.load(Ordering::Relaxed),
            rebalances: counters.rebalances.load(Ordering::Relaxed),
            ipis: counters.ipis.load(Ordering::Relaxed),
        })
    }

    /// Log a table of all CPUs for debugging
    pub fn list_percpu_stats(&self) {
        crate::kinfo!("=== usched per-CPU state ===");
        crate::kinfo!(
            "{:<4} {:<6} {:<6} {:<6} {:<10} {:<6} {:<8} {:<7} {:<6} {:<6} {:<6} {:<6} {:<6}",
            "CPU", "RunQ", "Load", "Count", "Upri", "Cur", "Ticks", "Desig", "Steal", "Pull",
            "Push", "Rebal", "IPIs"
        );
        for cpu in 0..self.ncpus() {
            let Ok(stats) = self.percpu_stats(cpu) else {
                continue;
            };
            let cur = match stats.designated {
                Some(tid) => tid as i64,
                None => -1,
            };
            crate::kinfo!(
                "{:<4} {:<6} {:<6} {:<6} {:<4}{:<6} {:<6} {:<8} {:<7} {:<6} {:<6} {:<6} {:<6} {:<6}",
                stats.cpu,
                stats.runqcount,
                stats.uload,
                stats.ucount,
                stats.upri,
                band_name(stats.upri),
                cur,
                stats.ticks,
                stats.designations,
                stats.steals,
                stats.pulls,
                stats.pushes,
                stats.rebalances,
                stats.ipis
            );
        }
        crate::kinfo!(
            "global: ucount {} curprocmask {:#x} rdyprocmask {:#x}",
            self.globals().ucount(),
            self.globals().curprocmask().bits(),
            self.globals().rdyprocmask().bits()
        );
    }
}

