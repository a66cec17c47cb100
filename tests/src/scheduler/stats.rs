//! Statistics and Log Output Tests

use log::Level;
use serial_test::serial;

use nexa_usched::logger::{self, LogLevel};
use nexa_usched::scheduler::{ESTCPUMAX, PRIBASE_NORMAL, PRIBASE_NULL};
use nexa_usched::{CpuTopology, SchedConfig, SchedError, SchedulerSet};

use crate::mock::{
    bind_cpu, busy_lwp, captured, clear_captured, init_test_logger, normal_lwp, MockThreadOps,
};

fn flat_set(ncpus: usize) -> SchedulerSet<MockThreadOps> {
    SchedulerSet::with_topology(
        CpuTopology::flat(ncpus).unwrap(),
        SchedConfig::default(),
        MockThreadOps::new(),
    )
    .unwrap()
}

// ============================================================================
// Snapshots
// ============================================================================

#[test]
fn test_idle_cpu_snapshot() {
    let set = flat_set(2);
    let stats = set.percpu_stats(1).unwrap();
    assert_eq!(stats.cpu, 1);
    assert_eq!(stats.runqcount, 0);
    assert_eq!(stats.uload, 0);
    assert_eq!(stats.upri, PRIBASE_NULL);
    assert_eq!(stats.designated, None);
    assert_eq!(stats.designations, 0);
}

#[test]
fn test_snapshot_tracks_designation_and_queue() {
    bind_cpu(0);
    let set = flat_set(1);
    set.enqueue_runnable(&normal_lwp(1, 0));
    set.enqueue_runnable(&normal_lwp(2, 0));
    set.on_tick(0, None);

    let stats = set.percpu_stats(0).unwrap();
    assert_eq!(stats.designated, Some(1));
    assert_eq!(stats.runqcount, 1);
    assert_eq!(stats.ucount, 2);
    assert_eq!(stats.designations, 1);
    assert_eq!(stats.ticks, 1);
    assert!(stats.upri >= PRIBASE_NORMAL && stats.upri < PRIBASE_NULL);
}

#[test]
fn test_snapshot_rejects_bad_cpu() {
    let set = flat_set(2);
    assert_eq!(set.percpu_stats(2).err(), Some(SchedError::CpuOutOfRange));
    assert_eq!(set.queue_depth(7), Err(SchedError::CpuOutOfRange));
    assert_eq!(set.designated_tid(2), Err(SchedError::CpuOutOfRange));
    assert_eq!(set.current_load(usize::MAX), Err(SchedError::CpuOutOfRange));
    assert_eq!(set.cpu(2).err(), Some(SchedError::CpuOutOfRange));
    assert!(set.lock_cpu(2).is_err());
}

// ============================================================================
// Log output
// ============================================================================

#[test]
#[serial]
fn test_construction_logs_each_cpu() {
    init_test_logger();
    clear_captured();
    let _set = SchedulerSet::with_topology(
        CpuTopology::uniform(1, 2, 2).unwrap(),
        SchedConfig::default(),
        MockThreadOps::new(),
    )
    .unwrap();

    let lines = captured(Level::Info);
    for cpu in 0..4 {
        let prefix = format!("usched: cpu {} online, core siblings", cpu);
        assert!(
            lines.iter().any(|l| l.starts_with(&prefix)),
            "missing {:?} in {:?}",
            prefix,
            lines
        );
    }
    assert!(lines
        .iter()
        .any(|l| l.starts_with("usched: 4 cpus, rrinterval 5 ticks")));
}

#[test]
#[serial]
fn test_list_percpu_stats_prints_table() {
    init_test_logger();
    bind_cpu(0);
    let set = flat_set(2);
    set.enqueue_runnable(&normal_lwp(42, 0));

    clear_captured();
    set.list_percpu_stats();
    let lines = captured(Level::Info);
    assert!(lines.iter().any(|l| l == "=== usched per-CPU state ==="));
    assert!(lines
        .iter()
        .any(|l| l.starts_with("CPU ") && l.contains(" Rebal ") && l.contains("IPIs")));
    assert!(lines
        .iter()
        .any(|l| l.starts_with("0 ") && l.contains("normal") && l.contains(" 42 ")));
    assert!(lines
        .iter()
        .any(|l| l.starts_with("global: ucount 1 curprocmask 0x1")));
}

#[test]
#[serial]
fn test_debug_records_respect_runtime_level() {
    init_test_logger();
    let set = flat_set(2);
    let queued: Vec<_> = (2..=5).map(|tid| normal_lwp(tid, 0)).collect();
    {
        let mut dd = set.lock_cpu(0).unwrap();
        dd.designate(busy_lwp(1, 0, ESTCPUMAX));
        for lwp in &queued {
            dd.enqueue(lwp.clone(), 5);
        }
    }
    set.tunables().set_weight1(0);

    logger::set_max_level(LogLevel::INFO);
    clear_captured();
    bind_cpu(1);
    set.helper_poll(1);
    assert!(!captured(Level::Debug)
        .iter()
        .any(|l| l.starts_with("usched: cpu 1 pulled")));

    logger::set_max_level(LogLevel::DEBUG);
    set.release_current(&set.designated(1).unwrap().unwrap());
    set.on_block(&queued[0]);
    set.helper_poll(1);
    let debug = captured(Level::Debug);
    logger::set_max_level(LogLevel::INFO);
    assert!(
        debug.iter().any(|l| l.starts_with("usched: cpu 1 pulled tid")),
        "{:?}",
        debug
    );
    assert_eq!(logger::max_level(), LogLevel::INFO);
}
