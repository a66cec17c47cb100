//! Scheduler subsystem
//!
//! SMP user-thread scheduler in the DragonFly "dfly" style.
//!
//! ## Per-CPU Architecture
//!
//! Every CPU owns three bitmap run queue sets (realtime, normal, idle) and
//! at most one *designated* task, the one chosen to run there next. Each
//! CPU's state sits behind its own spin lock; no global lock exists.
//! Load figures are mirrored into atomics so other CPUs can read them
//! without locking when deciding where a task should go.
//!
//! Placement walks the CPU topology tree (package, core, hyperthread) and
//! descends into the least loaded subtree. Idle CPUs pull work from the
//! busiest one, and a rotating CPU steals from it on the scheduler clock.
//!
//! ## Module Organization
//!
//! - `types`: Constants, scheduling classes, `RtPrio`, `CpuMask`
//! - `error`: `SchedError` for construction and configuration
//! - `priority`: Priority, load and estcpu arithmetic
//! - `lwp`: Schedulable entity and its process
//! - `runqueue`: 32-queue bitmap run queue set
//! - `percpu`: Per-CPU scheduler state and global masks
//! - `topology`: CPU topology tree
//! - `balance`: Topology-aware CPU choice
//! - `config`: Runtime tunables and feature flags
//! - `ipi`: Per-CPU reschedule mailbox
//! - `core`: `SchedulerSet` and its entry points
//! - `stats`: Counters and introspection

mod balance;
pub mod config;
mod core;
pub mod error;
pub mod ipi;
pub mod lwp;
pub mod percpu;
pub mod priority;
pub mod runqueue;
pub mod stats;
pub mod topology;
pub mod types;

pub use self::balance::Balancer;
pub use self::config::{FeatureFlags, SchedConfig, Tunables, DEFAULT_RRINTERVAL, TUNABLE_NAMES};
pub use self::core::{SchedulerSet, ThreadOps};
pub use self::error::{SchedError, SchedResult};
pub use self::ipi::{IpiMailbox, ReschedRequest};
pub use self::lwp::{Lwp, LwpSched, MpFlags, ProcInfo};
pub use self::percpu::{LockedCpu, PerCpuScheduler, SchedGlobals};
pub use self::runqueue::{highest_set_bit, lowest_set_bit, RunQueueSet};
pub use self::stats::{PerCpuCounters, PerCpuStats};
pub use self::topology::{CpuTopology, TopoLevel, TopoNode};
pub use self::types::{CpuMask, RtPrio, SchedClass};
pub use self::types::{
    ESTCPUFREQ, ESTCPUMAX, ESTCPUPPQ, MAXPRI, MAX_CPUS, NQS, PPQ, PPQMASK, PRIBASE_IDLE,
    PRIBASE_NORMAL, PRIBASE_NULL, PRIBASE_REALTIME, PRIBASE_THREAD, PRIO_MAX, PRIO_MIN,
    RTP_PRIO_MAX,
};
