//! NexaOS user scheduler (usched)
//!
//! SMP scheduler for user threads: per-CPU bitmap run queues, an
//! estcpu-driven dynamic priority, and a topology-aware balancer that
//! places woken and forked tasks and steals work for idle CPUs.
//!
//! The crate never touches hardware. Context switching, migration and
//! inter-processor interrupts are delegated to the embedding kernel through
//! [`scheduler::ThreadOps`].

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod logger;
pub mod scheduler;

pub use scheduler::{
    CpuMask, CpuTopology, FeatureFlags, Lwp, ProcInfo, RtPrio, SchedClass, SchedConfig,
    SchedError, SchedulerSet, ThreadOps, Tunables,
};

#[macro_export]
macro_rules! klog {
    ($level:expr, $($arg:tt)*) => {{
        $crate::logger::log($level, format_args!($($arg)*));
    }};
}

#[macro_export]
macro_rules! kfatal {
    ($($arg:tt)*) => {{
        $crate::klog!($crate::logger::LogLevel::FATAL, $($arg)*);
    }};
}

#[macro_export]
macro_rules! kerror {
    ($($arg:tt)*) => {{
        $crate::klog!($crate::logger::LogLevel::ERROR, $($arg)*);
    }};
}

#[macro_export]
macro_rules! kwarn {
    ($($arg:tt)*) => {{
        $crate::klog!($crate::logger::LogLevel::WARN, $($arg)*);
    }};
}

#[macro_export]
macro_rules! kinfo {
    ($($arg:tt)*) => {{
        $crate::klog!($crate::logger::LogLevel::INFO, $($arg)*);
    }};
}

#[macro_export]
macro_rules! kdebug {
    ($($arg:tt)*) => {{
        $crate::klog!($crate::logger::LogLevel::DEBUG, $($arg)*);
    }};
}

/// Per-decision trace records. Compiled out unless `debug_verbose` is on.
#[macro_export]
macro_rules! ktrace {
    ($($arg:tt)*) => {{
        if cfg!(feature = "debug_verbose") {
            $crate::klog!($crate::logger::LogLevel::TRACE, $($arg)*);
        }
    }};
}
