//! Per-CPU Scheduler Tests
//!
//! Enqueue rules, selection order, designation and load accounting on a
//! single `PerCpuScheduler`.

use nexa_usched::scheduler::{
    PerCpuScheduler, SchedGlobals, ESTCPUMAX, PRIBASE_NULL,
};
use nexa_usched::{CpuMask, Lwp, ProcInfo, RtPrio};

use crate::mock::{busy_lwp, normal_lwp};

const RR: u32 = 5;

fn single_cpu() -> (SchedGlobals, PerCpuScheduler) {
    (SchedGlobals::new(1), PerCpuScheduler::new(0))
}

// ============================================================================
// Selection order
// ============================================================================

#[test]
fn test_low_estcpu_task_wins() {
    let (globals, dd) = single_cpu();
    let a = busy_lwp(1, 0, 0);
    let b = busy_lwp(2, 0, 400);
    assert!(a.priority() < b.priority());

    let mut cpu = dd.lock(&globals);
    cpu.enqueue(a.clone(), RR);
    cpu.enqueue(b.clone(), RR);
    assert_eq!(cpu.choose_best(None).map(|l| l.tid()), Some(1));
    assert_eq!(cpu.choose_best(None).map(|l| l.tid()), Some(2));
}

#[test]
fn test_realtime_beats_everything() {
    let (globals, dd) = single_cpu();
    let mut cpu = dd.lock(&globals);
    cpu.enqueue(normal_lwp(1, 0), RR);
    cpu.enqueue(Lwp::new(2, ProcInfo::new(2, -20), RtPrio::idle(0), 0), RR);
    cpu.enqueue(busy_lwp(3, 0, ESTCPUMAX), RR);
    cpu.enqueue(Lwp::new(4, ProcInfo::new(4, 20), RtPrio::realtime(5), 0), RR);

    assert_eq!(cpu.choose_best(None).map(|l| l.tid()), Some(4));
    assert_eq!(cpu.choose_best(None).map(|l| l.tid()), Some(1));
    assert_eq!(cpu.choose_best(None).map(|l| l.tid()), Some(3));
    assert_eq!(cpu.choose_best(None).map(|l| l.tid()), Some(2));
    assert!(cpu.choose_best(None).is_none());
}

#[test]
fn test_same_queue_is_fifo() {
    let (globals, dd) = single_cpu();
    let mut cpu = dd.lock(&globals);
    for tid in 1..=3 {
        cpu.enqueue(normal_lwp(tid, 0), RR);
    }
    let order: Vec<u32> = (0..3)
        .filter_map(|_| cpu.choose_best(None))
        .map(|l| l.tid())
        .collect();
    assert_eq!(order, vec![1, 2, 3]);
}

#[test]
fn test_fresh_task_goes_to_head_of_empty_queue() {
    let (globals, dd) = single_cpu();
    let a = normal_lwp(1, 0);
    let mut cpu = dd.lock(&globals);
    cpu.enqueue(a.clone(), RR);
    assert_eq!(a.rrcount(), 0);
    assert_eq!(cpu.queue_bits()[1], 1 << a.rqindex());
}

// ============================================================================
// Exclusion rule
// ============================================================================

#[test]
fn test_exclude_keeps_current_within_one_queue() {
    let (globals, dd) = single_cpu();
    let current = busy_lwp(1, 0, 0);
    let close = busy_lwp(2, 0, 400);
    let mut cpu = dd.lock(&globals);
    cpu.enqueue(close.clone(), RR);

    assert!(cpu.choose_best(Some(&current)).is_none());
    assert!(close.is_on_runq());
    assert_eq!(cpu.runqcount(), 1);
}

#[test]
fn test_exclude_yields_to_clearly_better_task() {
    let (globals, dd) = single_cpu();
    let current = busy_lwp(1, 0, ESTCPUMAX);
    let better = busy_lwp(2, 0, 0);
    let mut cpu = dd.lock(&globals);
    cpu.enqueue(better.clone(), RR);

    let got = cpu.choose_best(Some(&current)).expect("better task chosen");
    assert_eq!(got.tid(), 2);
    assert!(!got.is_on_runq());
}

#[test]
fn test_steal_skips_tasks_pinned_elsewhere() {
    let globals = SchedGlobals::new(2);
    let dd = PerCpuScheduler::new(0);
    let tasks: Vec<_> = (1..=3).map(|tid| normal_lwp(tid, 0)).collect();
    tasks[0].set_cpumask(CpuMask::single(0));
    tasks[2].set_cpumask(CpuMask::single(0));

    let mut cpu = dd.lock(&globals);
    for lwp in &tasks {
        cpu.enqueue(lwp.clone(), RR);
    }
    assert_eq!(cpu.choose_for(1, false).map(|l| l.tid()), Some(2));
    assert!(!tasks[1].is_on_runq());
    assert!(cpu.choose_for(1, true).is_none());
    assert_eq!(cpu.runqcount(), 2);
    assert_eq!(cpu.choose_for(0, true).map(|l| l.tid()), Some(3));
}

// ============================================================================
// Invariant violations
// ============================================================================

#[test]
#[should_panic(expected = "already on a run queue")]
fn test_double_enqueue_panics() {
    let (globals, dd) = single_cpu();
    let a = normal_lwp(1, 0);
    let mut cpu = dd.lock(&globals);
    cpu.enqueue(a.clone(), RR);
    cpu.enqueue(a, RR);
}

#[test]
#[should_panic(expected = "not on a run queue")]
fn test_dequeue_of_unqueued_task_panics() {
    let (globals, dd) = single_cpu();
    let a = normal_lwp(1, 0);
    let mut cpu = dd.lock(&globals);
    cpu.dequeue(&a);
}

#[test]
#[should_panic(expected = "is designated")]
fn test_enqueue_of_designated_task_panics() {
    let (globals, dd) = single_cpu();
    let a = normal_lwp(1, 0);
    let mut cpu = dd.lock(&globals);
    cpu.designate(a.clone());
    cpu.enqueue(a, RR);
}

#[test]
#[should_panic(expected = "not a user class")]
fn test_kernel_thread_never_queued() {
    let (globals, dd) = single_cpu();
    let mut cpu = dd.lock(&globals);
    cpu.enqueue(Lwp::new(1, ProcInfo::new(1, 0), RtPrio::kernel_thread(), 0), RR);
}

// ============================================================================
// Load accounting
// ============================================================================

#[test]
fn test_queued_and_designated_tasks_count_once() {
    let globals = SchedGlobals::new(2);
    let dd = PerCpuScheduler::new(0);
    let a = busy_lwp(1, 0, ESTCPUMAX);
    let b = busy_lwp(2, 0, ESTCPUMAX);

    let mut cpu = dd.lock(&globals);
    cpu.enqueue(a.clone(), RR);
    cpu.enqueue(b.clone(), RR);
    let first = cpu.choose_best(None).unwrap();
    cpu.designate(first);
    drop(cpu);

    assert_eq!(dd.uload(), 1024);
    assert_eq!(dd.ucount(), 2);
    assert_eq!(globals.ucount(), 2);
    assert!(globals.curprocmask().is_set(0));

    let mut cpu = dd.lock(&globals);
    let current = cpu.clear_designated().unwrap();
    cpu.release_uload(&current);
    cpu.release_uload(&current);
    drop(cpu);
    assert_eq!(dd.uload(), 512);
    assert_eq!(dd.ucount(), 1);
    assert_eq!(dd.upri(), PRIBASE_NULL);
    assert!(globals.curprocmask().is_empty());
}

#[test]
fn test_requeue_moves_between_queues() {
    let (globals, dd) = single_cpu();
    let a = normal_lwp(1, 0);
    let mut cpu = dd.lock(&globals);
    cpu.enqueue(a.clone(), RR);
    let old = a.rqindex();

    cpu.requeue(&a, a.priority() + 40, RR);
    assert_eq!(a.rqindex(), old + 10);
    assert_eq!(cpu.queue_bits()[1], 1 << (old + 10));
    assert!(a.is_on_runq());
    cpu.verify();
}
