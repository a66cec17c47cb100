//! Priority Math Tests
//!
//! Mapping of (class, nice, estcpu) to priority, per-task load weight and
//! the estcpu decay rules.

use nexa_usched::scheduler::priority::{
    blend_estcpu, compute_priority, compute_uload, fork_estcpu, instant_estcpu, rqindex,
    should_preempt, sleep_estcpu,
};
use nexa_usched::scheduler::{
    RtPrio, ESTCPUMAX, ESTCPUPPQ, PPQ, PRIBASE_IDLE, PRIBASE_NORMAL, PRIBASE_THREAD,
};

// ============================================================================
// compute_priority
// ============================================================================

#[test]
fn test_priority_is_deterministic() {
    for estcpu in [0, 1, 400, 4096, ESTCPUMAX] {
        for nice in [-20, -5, 0, 7, 20] {
            let a = compute_priority(RtPrio::normal(), nice, estcpu);
            let b = compute_priority(RtPrio::normal(), nice, estcpu);
            assert_eq!(a, b);
        }
    }
}

#[test]
fn test_lower_estcpu_is_more_desirable() {
    let a = compute_priority(RtPrio::normal(), 0, 0);
    let b = compute_priority(RtPrio::normal(), 0, 400);
    assert!(a < b, "estcpu 0 -> {}, estcpu 400 -> {}", a, b);
}

#[test]
fn test_normal_band_bounds() {
    let best = compute_priority(RtPrio::normal(), -20, 0);
    let worst = compute_priority(RtPrio::normal(), 20, ESTCPUMAX);
    assert_eq!(best, PRIBASE_NORMAL);
    assert!(worst < PRIBASE_IDLE);
    assert!(worst > PRIBASE_NORMAL + 120);
}

#[test]
fn test_priority_monotonic_in_nice_and_estcpu() {
    let mut last = 0;
    for nice in -20..=20 {
        let pri = compute_priority(RtPrio::normal(), nice, 1000);
        assert!(pri >= last);
        last = pri;
    }
    let mut last = 0;
    for estcpu in (0..=ESTCPUMAX).step_by(256) {
        let pri = compute_priority(RtPrio::normal(), 0, estcpu);
        assert!(pri >= last);
        last = pri;
    }
}

#[test]
fn test_class_bands_are_disjoint() {
    let rt = compute_priority(RtPrio::realtime(31), 0, ESTCPUMAX);
    let normal = compute_priority(RtPrio::normal(), -20, 0);
    let idle = compute_priority(RtPrio::idle(0), 0, 0);
    let kthread = compute_priority(RtPrio::kernel_thread(), 0, 0);
    assert!(rt < normal);
    assert!(normal < idle || normal == PRIBASE_NORMAL);
    assert_eq!(idle, PRIBASE_IDLE);
    assert_eq!(kthread, PRIBASE_THREAD);
}

#[test]
fn test_realtime_ignores_nice_and_estcpu() {
    let a = compute_priority(RtPrio::realtime(5), -20, 0);
    let b = compute_priority(RtPrio::realtime(5), 20, ESTCPUMAX);
    assert_eq!(a, 5);
    assert_eq!(a, b);
    assert_eq!(compute_priority(RtPrio::fifo(5), 0, 0), 5);
}

#[test]
fn test_rqindex_within_class() {
    assert_eq!(rqindex(0), 0);
    assert_eq!(rqindex(PPQ - 1), 0);
    assert_eq!(rqindex(PPQ), 1);
    assert_eq!(rqindex(PRIBASE_NORMAL + 127), 31);
    assert_eq!(rqindex(PRIBASE_IDLE + 8), 2);
}

// ============================================================================
// Preemption gap
// ============================================================================

#[test]
fn test_should_preempt_needs_whole_queue() {
    let upri = PRIBASE_NORMAL + 40;
    // Same queue never preempts.
    assert!(!should_preempt(upri, PRIBASE_NORMAL + 41, 0));
    assert!(!should_preempt(upri, PRIBASE_NORMAL + 40, 0));
    // One queue better does with gap 0.
    assert!(should_preempt(upri, PRIBASE_NORMAL + 36, 0));
    // Gap 1 needs two queues.
    assert!(!should_preempt(upri, PRIBASE_NORMAL + 36, 1));
    assert!(should_preempt(upri, PRIBASE_NORMAL + 32, 1));
}

// ============================================================================
// uload
// ============================================================================

#[test]
fn test_uload_scales_with_estcpu_and_nice() {
    assert_eq!(compute_uload(0, 0), 0);
    assert_eq!(compute_uload(ESTCPUMAX, 0), 512);
    assert!(compute_uload(ESTCPUMAX, 20) < 512);
    assert!(compute_uload(ESTCPUMAX, -20) > 512);
    assert!(compute_uload(ESTCPUMAX, -20) <= 1024);
}

// ============================================================================
// estcpu updates
// ============================================================================

#[test]
fn test_instant_estcpu_full_use() {
    assert_eq!(instant_estcpu(10, 10, 1, 1), ESTCPUMAX as u64);
    assert_eq!(instant_estcpu(5, 10, 1, 1), ESTCPUMAX as u64 / 2);
    assert_eq!(instant_estcpu(5, 0, 1, 1), 0);
}

#[test]
fn test_instant_estcpu_overload_compensation() {
    let plain = instant_estcpu(5, 10, 4, 4);
    let loaded = instant_estcpu(5, 10, 8, 4);
    assert_eq!(loaded, plain * 2);
}

#[test]
fn test_blend_fast_then_slow() {
    let decay = 8;
    let (mut estcpu, mut estfast) = (0, 0);
    for _ in 0..decay {
        let next = blend_estcpu(estcpu, estfast, ESTCPUMAX as u64, decay);
        estcpu = next.0;
        estfast = next.1;
    }
    assert_eq!(estfast, decay);
    let fast_phase = estcpu;

    let (slow, still) = blend_estcpu(estcpu, estfast, 0, decay);
    assert_eq!(still, decay);
    assert_eq!(slow, fast_phase * decay / (decay + 1));
}

#[test]
fn test_blend_clamps_to_max() {
    let (estcpu, _) = blend_estcpu(ESTCPUMAX, 100, u64::from(ESTCPUMAX) * 8, 8);
    assert_eq!(estcpu, ESTCPUMAX);
}

#[test]
fn test_sleep_halves() {
    assert_eq!(sleep_estcpu(1000), 500);
    assert_eq!(sleep_estcpu(0), 0);
}

#[test]
fn test_fork_charges() {
    let (parent, child) = fork_estcpu(100);
    assert_eq!(parent, 100 + ESTCPUPPQ / 16);
    assert_eq!(child, 100 + ESTCPUPPQ * 4);

    let (parent, child) = fork_estcpu(ESTCPUMAX - 1);
    assert_eq!(parent, ESTCPUMAX);
    assert_eq!(child, ESTCPUMAX);
}
