//! Dynamic priority and load math
//!
//! Pure functions only. Callers hold the task's home run queue lock when
//! they store the results back into a task.
//!
//! ## Normal band
//!
//! ```text
//!   nice piece     (nice - PRIO_MIN) * PPQ / NICEPPQ    0..80
//!   estcpu piece   estcpu * PPQ / ESTCPUPPQ             0..128
//! ```
//!
//! The sum is scaled back down to the 128-wide band.

use super::types::{
    RtPrio, SchedClass, ESTCPUMAX, ESTCPUPPQ, MAXPRI, NICEPPQ, NQS, PPQ, PPQMASK, PRIBASE_IDLE,
    PRIBASE_NORMAL, PRIBASE_REALTIME, PRIBASE_THREAD, PRIMASK, PRIO_MAX, PRIO_MIN, PRIO_RANGE,
};

/// Largest decay constant accepted by [`blend_estcpu`].
pub const DECAY_MAX: u32 = 1024;

#[inline]
pub const fn clamp_nice(nice: i32) -> i32 {
    if nice < PRIO_MIN {
        PRIO_MIN
    } else if nice > PRIO_MAX {
        PRIO_MAX
    } else {
        nice
    }
}

#[inline]
pub const fn clamp_estcpu(estcpu: u64) -> u32 {
    if estcpu > ESTCPUMAX as u64 {
        ESTCPUMAX
    } else {
        estcpu as u32
    }
}

/// Map (class, class priority | nice, estcpu) into the 512-wide priority space.
///
/// Lower is better. Kernel-thread priorities are computed for completeness
/// but such tasks are never queued.
pub fn compute_priority(rtprio: RtPrio, nice: i32, estcpu: u32) -> u32 {
    match rtprio.class {
        SchedClass::Realtime | SchedClass::Fifo => {
            PRIBASE_REALTIME + (rtprio.prio as u32 & PRIMASK)
        }
        SchedClass::Normal => {
            let nice = clamp_nice(nice) as i64;
            let estcpu = estcpu.min(ESTCPUMAX) as i64;
            let ppq = PPQ as i64;

            let mut np = (nice - PRIO_MIN as i64) * ppq / NICEPPQ;
            np += estcpu * ppq / ESTCPUPPQ as i64;
            np = np * MAXPRI as i64
                / (PRIO_RANGE * ppq / NICEPPQ + ESTCPUMAX as i64 * ppq / ESTCPUPPQ as i64);
            PRIBASE_NORMAL + (np as u32 & PRIMASK)
        }
        SchedClass::Idle => PRIBASE_IDLE + (rtprio.prio as u32 & PRIMASK),
        SchedClass::KernelThread => PRIBASE_THREAD + (rtprio.prio as u32 & PRIMASK),
    }
}

/// Load weight contributed by a task, used for placement only.
///
/// Positive nice shrinks the weight, negative nice grows it, up to twice
/// the un-niced figure at nice -20.
pub fn compute_uload(estcpu: u32, nice: i32) -> i32 {
    let base = (estcpu.min(ESTCPUMAX) / NQS as u32) as i32;
    base - base * clamp_nice(nice) / (PRIO_MAX + 1)
}

/// Run queue index inside the task's class.
#[inline]
pub const fn rqindex(priority: u32) -> usize {
    ((priority & PRIMASK) / PPQ) as usize
}

/// True if `pri` beats `upri` by more than `gap` whole queues.
#[inline]
pub const fn should_preempt(upri: u32, pri: u32, gap: u32) -> bool {
    (upri & !PPQMASK) > (pri & !PPQMASK) + gap * PPQ
}

/// Instantaneous CPU use over the last `ttl` ticks, scaled to ESTCPUMAX.
///
/// When more tasks are runnable than there are CPUs the figure is inflated
/// proportionally, so priorities keep separating under overload.
pub fn instant_estcpu(cpticks: u32, ttl: u64, ucount: i32, ncpus: usize) -> u64 {
    if ttl == 0 {
        return 0;
    }
    let mut est = cpticks as u64 * ESTCPUMAX as u64 / ttl;
    let ncpus = ncpus.max(1) as i64;
    let ucount = ucount as i64;
    if ucount > ncpus {
        est += est * (ucount - ncpus) as u64 / ncpus as u64;
    }
    est
}

/// Fold an instantaneous sample into `estcpu`.
///
/// The first `decay` samples are averaged with equal weight (`estfast`
/// counts them); after that each sample weighs `1 / (decay + 1)`.
/// Returns the new `(estcpu, estfast)`.
pub fn blend_estcpu(estcpu: u32, estfast: u32, sample: u64, decay: u32) -> (u32, u32) {
    let decay = decay.clamp(1, DECAY_MAX);
    let old = estcpu as u64;
    if estfast < decay {
        let n = estfast as u64 + 1;
        (clamp_estcpu((old * n + sample) / (n + 1)), estfast + 1)
    } else {
        let d = decay as u64;
        (clamp_estcpu((old * d + sample) / (d + 1)), estfast)
    }
}

/// estcpu after a sleep long enough to skip incremental decay.
#[inline]
pub const fn sleep_estcpu(estcpu: u32) -> u32 {
    estcpu >> 1
}

/// Fork charge: returns `(parent, child)` estcpu.
///
/// The child starts four queues behind the parent; the parent pays a
/// small cost per fork.
pub fn fork_estcpu(parent: u32) -> (u32, u32) {
    let parent = parent as u64;
    (
        clamp_estcpu(parent + (ESTCPUPPQ / 16) as u64),
        clamp_estcpu(parent + (ESTCPUPPQ * 4) as u64),
    )
}
