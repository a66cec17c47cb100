//! SMP Race Tests
//!
//! Real OS threads play the part of CPUs (pump threads delivering IPIs and
//! clock ticks) and of user threads (workers cycling through wake, acquire,
//! run, release and sleep). After everything quiesces the per-CPU state
//! must be empty and consistent.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use serial_test::serial;

use nexa_usched::{CpuTopology, Lwp, SchedConfig, SchedulerSet, ThreadOps};

use crate::mock::{bind_cpu, bound_cpu, normal_lwp, MockThreadOps};

type Set = SchedulerSet<MockThreadOps>;

fn spawn_pumps(set: &Arc<Set>, stop: &Arc<AtomicBool>) -> Vec<thread::JoinHandle<()>> {
    (0..set.ncpus())
        .map(|cpu| {
            let set = set.clone();
            let stop = stop.clone();
            thread::spawn(move || {
                bind_cpu(cpu);
                let mut spins = 0u64;
                while !stop.load(Ordering::Acquire) {
                    if set.ops().take_ipi(cpu) {
                        set.handle_ipi(cpu);
                    }
                    spins += 1;
                    if spins % 64 == 0 {
                        set.on_tick(cpu, None);
                    }
                    thread::yield_now();
                }
            })
        })
        .collect()
}

/// One user thread: wake, wait to be dispatched, acquire, run a few ticks,
/// release, sleep.
fn worker_loop(set: &Set, lwp: &Arc<Lwp>, rounds: usize) {
    for _ in 0..rounds {
        bind_cpu(lwp.qcpu());
        set.ops().thread_deschedule(lwp);
        set.enqueue_runnable(lwp);
        set.ops().thread_switch_away(lwp);
        set.acquire_for_running(lwp);
        for _ in 0..3 {
            set.on_tick(bound_cpu(), Some(lwp));
        }
        set.release_current(lwp);
        set.on_block(lwp);
    }
}

fn assert_quiescent(set: &Set) {
    for cpu in 0..set.ncpus() {
        let dd = set.cpu(cpu).unwrap();
        assert_eq!(dd.runqcount(), 0, "cpu {} still has queued work", cpu);
        assert_eq!(set.designated_tid(cpu), Ok(None), "cpu {}", cpu);
        assert_eq!(dd.uload(), 0, "cpu {} load leaked", cpu);
        assert_eq!(dd.ucount(), 0, "cpu {} count leaked", cpu);
        set.lock_cpu(cpu).unwrap().verify();
    }
    assert_eq!(set.globals().ucount(), 0);
    assert!(set.globals().curprocmask().is_empty());
}

// ============================================================================
// Wake / acquire / release churn
// ============================================================================

#[test]
#[serial]
fn test_workers_churn_across_cpus() {
    let set = Arc::new(
        SchedulerSet::with_topology(
            CpuTopology::uniform(1, 2, 2).unwrap(),
            SchedConfig::default(),
            MockThreadOps::new(),
        )
        .unwrap(),
    );
    let stop = Arc::new(AtomicBool::new(false));
    let pumps = spawn_pumps(&set, &stop);

    let finished = Arc::new(AtomicUsize::new(0));
    let workers: Vec<_> = (0..8)
        .map(|i| {
            let set = set.clone();
            let finished = finished.clone();
            thread::spawn(move || {
                let lwp = normal_lwp(i + 1, i as usize % 4);
                worker_loop(&set, &lwp, 50);
                bind_cpu(lwp.qcpu());
                set.on_exit(&lwp);
                finished.fetch_add(1, Ordering::AcqRel);
            })
        })
        .collect();

    for worker in workers {
        worker.join().expect("worker panicked");
    }
    assert_eq!(finished.load(Ordering::Acquire), 8);

    stop.store(true, Ordering::Release);
    for pump in pumps {
        pump.join().expect("pump panicked");
    }
    assert_quiescent(&set);
}

#[test]
#[serial]
fn test_priority_changes_race_with_churn() {
    let set = Arc::new(
        SchedulerSet::with_topology(
            CpuTopology::flat(2).unwrap(),
            SchedConfig::default(),
            MockThreadOps::new(),
        )
        .unwrap(),
    );
    let stop = Arc::new(AtomicBool::new(false));
    let pumps = spawn_pumps(&set, &stop);

    let lwps: Vec<_> = (0..4).map(|i| normal_lwp(i + 1, i as usize % 2)).collect();
    let workers: Vec<_> = lwps
        .iter()
        .cloned()
        .map(|lwp| {
            let set = set.clone();
            thread::spawn(move || {
                worker_loop(&set, &lwp, 40);
                bind_cpu(lwp.qcpu());
                set.on_exit(&lwp);
            })
        })
        .collect();

    // Renice from the outside while the workers move around.
    let renicer = {
        let set = set.clone();
        let lwps = lwps.clone();
        let stop = stop.clone();
        thread::spawn(move || {
            bind_cpu(0);
            let mut nice = -20;
            while !stop.load(Ordering::Acquire) {
                for lwp in &lwps {
                    set.set_nice(lwp, nice);
                }
                nice = if nice >= 20 { -20 } else { nice + 5 };
                thread::sleep(Duration::from_micros(200));
            }
        })
    };

    for worker in workers {
        worker.join().expect("worker panicked");
    }
    stop.store(true, Ordering::Release);
    renicer.join().expect("renicer panicked");
    for pump in pumps {
        pump.join().expect("pump panicked");
    }
    assert_quiescent(&set);
}
