//! Scheduler tunables
//!
//! `SchedConfig` is the plain value handed to `SchedulerSet` at startup.
//! `Tunables` is the live copy consulted on every decision; writers go
//! through clamping setters so the hot path never validates.

use core::sync::atomic::{AtomicI32, AtomicU32, Ordering};

use bitflags::bitflags;

use super::error::{SchedError, SchedResult};
use super::priority::DECAY_MAX;
use super::types::{ESTCPUFREQ, ESTCPUMAX, NQS};

bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct FeatureFlags: u32 {
        /// An idle CPU's helper may steal from the most loaded CPU
        const IDLE_PULL = 0x01;
        /// A task released on a resched request may move to a better CPU
        const PROACTIVE_PUSH = 0x02;
        /// Rotating one-CPU-per-slot rebalance from the clock
        const PERIODIC_REBALANCE = 0x04;
        /// A task that cannot get its CPU is pushed even without a resched request
        const AGGRESSIVE_PUSH = 0x08;
        /// Forked children go through the balancer if the parent's CPU has queued work
        const FORK_BEST_QUEUE = 0x20;
    }
}

impl Default for FeatureFlags {
    fn default() -> Self {
        FeatureFlags::all()
    }
}

/// Default round-robin interval: ten slices per second.
pub const DEFAULT_RRINTERVAL: u32 = (ESTCPUFREQ + 9) / 10;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SchedConfig {
    /// Ticks before a running task is sent to the tail of its queue
    pub rrinterval: u32,
    /// Slow-decay constant for estcpu
    pub decay: u32,
    /// Bonus for staying on the task's current CPU
    pub weight1: i32,
    /// Producer/consumer pairing adjustment around the waking CPU
    pub weight2: i32,
    /// Per-task load charge
    pub weight3: i32,
    /// Bonus for completely idle CPUs
    pub weight4: i32,
    /// Queues a task must win by before it interrupts the designated one
    pub fast_resched: u32,
    pub features: FeatureFlags,
}

impl Default for SchedConfig {
    fn default() -> Self {
        Self {
            rrinterval: DEFAULT_RRINTERVAL,
            decay: 8,
            weight1: 200,
            weight2: 180,
            weight3: 40,
            weight4: 160,
            fast_resched: 0,
            features: FeatureFlags::default(),
        }
    }
}

/// Names accepted by [`Tunables::set_by_name`] / [`Tunables::get_by_name`].
pub const TUNABLE_NAMES: [&str; 8] = [
    "rrinterval",
    "decay",
    "weight1",
    "weight2",
    "weight3",
    "weight4",
    "fast_resched",
    "features",
];

fn clamp_weight(value: i64) -> i32 {
    value.clamp(0, ESTCPUMAX as i64) as i32
}

pub struct Tunables {
    rrinterval: AtomicU32,
    decay: AtomicU32,
    weight1: AtomicI32,
    weight2: AtomicI32,
    weight3: AtomicI32,
    weight4: AtomicI32,
    fast_resched: AtomicU32,
    features: AtomicU32,
}

impl Tunables {
    pub fn new(config: &SchedConfig) -> Self {
        let tunables = Self {
            rrinterval: AtomicU32::new(DEFAULT_RRINTERVAL),
            decay: AtomicU32::new(8),
            weight1: AtomicI32::new(0),
            weight2: AtomicI32::new(0),
            weight3: AtomicI32::new(0),
            weight4: AtomicI32::new(0),
            fast_resched: AtomicU32::new(0),
            features: AtomicU32::new(0),
        };
        tunables.apply(config);
        tunables
    }

    /// Overwrite every tunable from `config`, clamping as the setters do.
    pub fn apply(&self, config: &SchedConfig) {
        self.set_rrinterval(config.rrinterval);
        self.set_decay(config.decay);
        self.set_weight1(config.weight1);
        self.set_weight2(config.weight2);
        self.set_weight3(config.weight3);
        self.set_weight4(config.weight4);
        self.set_fast_resched(config.fast_resched);
        self.set_features(config.features);
    }

    pub fn snapshot(&self) -> SchedConfig {
        SchedConfig {
            rrinterval: self.rrinterval(),
            decay: self.decay(),
            weight1: self.weight1(),
            weight2: self.weight2(),
            weight3: self.weight3(),
            weight4: self.weight4(),
            fast_resched: self.fast_resched(),
            features: self.features(),
        }
    }

    #[inline]
    pub fn rrinterval(&self) -> u32 {
        self.rrinterval.load(Ordering::Relaxed)
    }

    pub fn set_rrinterval(&self, ticks: u32) {
        self.rrinterval
            .store(ticks.clamp(1, ESTCPUFREQ), Ordering::Relaxed);
    }

    #[inline]
    pub fn decay(&self) -> u32 {
        self.decay.load(Ordering::Relaxed)
    }

    pub fn set_decay(&self, decay: u32) {
        self.decay.store(decay.clamp(1, DECAY_MAX), Ordering::Relaxed);
    }

    #[inline]
    pub fn weight1(&self) -> i32 {
        self.weight1.load(Ordering::Relaxed)
    }

    pub fn set_weight1(&self, value: i32) {
        self.weight1
            .store(clamp_weight(value as i64), Ordering::Relaxed);
    }

    #[inline]
    pub fn weight2(&self) -> i32 {
        self.weight2.load(Ordering::Relaxed)
    }

    pub fn set_weight2(&self, value: i32) {
        self.weight2
            .store(clamp_weight(value as i64), Ordering::Relaxed);
    }

    #[inline]
    pub fn weight3(&self) -> i32 {
        self.weight3.load(Ordering::Relaxed)
    }

    pub fn set_weight3(&self, value: i32) {
        self.weight3
            .store(clamp_weight(value as i64), Ordering::Relaxed);
    }

    #[inline]
    pub fn weight4(&self) -> i32 {
        self.weight4.load(Ordering::Relaxed)
    }

    pub fn set_weight4(&self, value: i32) {
        self.weight4
            .store(clamp_weight(value as i64), Ordering::Relaxed);
    }

    #[inline]
    pub fn fast_resched(&self) -> u32 {
        self.fast_resched.load(Ordering::Relaxed)
    }

    pub fn set_fast_resched(&self, queues: u32) {
        self.fast_resched
            .store(queues.min(NQS as u32), Ordering::Relaxed);
    }

    #[inline]
    pub fn features(&self) -> FeatureFlags {
        FeatureFlags::from_bits_truncate(self.features.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn has_feature(&self, feature: FeatureFlags) -> bool {
        self.features().contains(feature)
    }

    /// Unknown bits are dropped.
    pub fn set_features(&self, features: FeatureFlags) {
        self.features.store(features.bits(), Ordering::Relaxed);
    }

    /// Sysctl-style write. Values are clamped, never rejected.
    pub fn set_by_name(&self, name: &str, value: i64) -> SchedResult<()> {
        let unsigned = value.clamp(0, u32::MAX as i64) as u32;
        match name {
            "rrinterval" => self.set_rrinterval(unsigned),
            "decay" => self.set_decay(unsigned),
            "weight1" => self.set_weight1(clamp_weight(value)),
            "weight2" => self.set_weight2(clamp_weight(value)),
            "weight3" => self.set_weight3(clamp_weight(value)),
            "weight4" => self.set_weight4(clamp_weight(value)),
            "fast_resched" => self.set_fast_resched(unsigned),
            "features" => self.set_features(FeatureFlags::from_bits_truncate(unsigned)),
            _ => return Err(SchedError::UnknownTunable),
        }
        crate::kinfo!(
            "usched: {} set to {}",
            name,
            self.get_by_name(name).unwrap_or(value)
        );
        Ok(())
    }

    pub fn get_by_name(&self, name: &str) -> SchedResult<i64> {
        let value = match name {
            "rrinterval" => self.rrinterval() as i64,
            "decay" => self.decay() as i64,
            "weight1" => self.weight1() as i64,
            "weight2" => self.weight2() as i64,
            "weight3" => self.weight3() as i64,
            "weight4" => self.weight4() as i64,
            "fast_resched" => self.fast_resched() as i64,
            "features" => self.features().bits() as i64,
            _ => return Err(SchedError::UnknownTunable),
        };
        Ok(value)
    }
}

impl Default for Tunables {
    fn default() -> Self {
        Self::new(&SchedConfig::default())
    }
}
