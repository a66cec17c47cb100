//! Scheduler type definitions and constants
//!
//! The priority space is 512 values wide, split into four 128-wide class
//! bands. Each band maps onto 32 run queues, four priorities per queue.

/// Upper bound on CPUs a scheduler set can manage (one bit each in [`CpuMask`]).
pub const MAX_CPUS: usize = 64;

/// Width of one priority band.
pub const MAXPRI: u32 = 128;
pub const PRIMASK: u32 = MAXPRI - 1;

pub const PRIBASE_REALTIME: u32 = 0;
pub const PRIBASE_NORMAL: u32 = MAXPRI;
pub const PRIBASE_IDLE: u32 = MAXPRI * 2;
pub const PRIBASE_THREAD: u32 = MAXPRI * 3;
/// Priority recorded for a CPU with no designated task.
pub const PRIBASE_NULL: u32 = MAXPRI * 4;

/// Run queues per class.
pub const NQS: usize = 32;
/// Priorities per queue.
pub const PPQ: u32 = MAXPRI / NQS as u32;
pub const PPQMASK: u32 = PPQ - 1;

/// Nice steps per queue.
pub const NICEPPQ: i64 = 2;
/// estcpu units per queue.
pub const ESTCPUPPQ: u32 = 512;
pub const ESTCPUMAX: u32 = ESTCPUPPQ * NQS as u32;
/// Scheduler clock rate (ticks per second).
pub const ESTCPUFREQ: u32 = 50;

pub const PRIO_MIN: i32 = -20;
pub const PRIO_MAX: i32 = 20;
pub const PRIO_RANGE: i64 = (PRIO_MAX - PRIO_MIN + 1) as i64;

/// Highest user-assignable realtime/idle priority.
pub const RTP_PRIO_MAX: u16 = 31;

/// Scheduling class of a task
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SchedClass {
    Realtime,
    Fifo,
    Normal,
    Idle,
    /// Kernel-only threads. Never placed on a user run queue.
    KernelThread,
}

impl SchedClass {
    pub const fn as_str(self) -> &'static str {
        match self {
            SchedClass::Realtime => "RT",
            SchedClass::Fifo => "FIFO",
            SchedClass::Normal => "Normal",
            SchedClass::Idle => "Idle",
            SchedClass::KernelThread => "Kthread",
        }
    }
}

/// Class plus the class-relative priority (0..=31, ignored for Normal)
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RtPrio {
    pub class: SchedClass,
    pub prio: u16,
}

impl RtPrio {
    pub const fn normal() -> Self {
        Self {
            class: SchedClass::Normal,
            prio: 0,
        }
    }

    pub const fn realtime(prio: u16) -> Self {
        Self {
            class: SchedClass::Realtime,
            prio: clamp_rtp(prio),
        }
    }

    pub const fn fifo(prio: u16) -> Self {
        Self {
            class: SchedClass::Fifo,
            prio: clamp_rtp(prio),
        }
    }

    pub const fn idle(prio: u16) -> Self {
        Self {
            class: SchedClass::Idle,
            prio: clamp_rtp(prio),
        }
    }

    pub const fn kernel_thread() -> Self {
        Self {
            class: SchedClass::KernelThread,
            prio: 0,
        }
    }
}

const fn clamp_rtp(prio: u16) -> u16 {
    if prio > RTP_PRIO_MAX {
        RTP_PRIO_MAX
    } else {
        prio
    }
}

/// Set of CPUs, one bit per CPU id
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct CpuMask(u64);

impl CpuMask {
    pub const fn empty() -> Self {
        Self(0)
    }

    /// Mask with CPUs `0..ncpus` set.
    pub const fn all(ncpus: usize) -> Self {
        if ncpus >= MAX_CPUS {
            Self(u64::MAX)
        } else {
            Self((1u64 << ncpus) - 1)
        }
    }

    pub const fn single(cpu: usize) -> Self {
        Self(1u64 << cpu)
    }

    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    #[inline]
    pub const fn bits(&self) -> u64 {
        self.0
    }

    #[inline]
    pub fn set(&mut self, cpu: usize) {
        debug_assert!(cpu < MAX_CPUS);
        self.0 |= 1u64 << cpu;
    }

    #[inline]
    pub fn clear(&mut self, cpu: usize) {
        debug_assert!(cpu < MAX_CPUS);
        self.0 &= !(1u64 << cpu);
    }

    #[inline]
    pub const fn is_set(&self, cpu: usize) -> bool {
        cpu < MAX_CPUS && self.0 & (1u64 << cpu) != 0
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.0 == 0
    }

    #[inline]
    pub const fn count(&self) -> u32 {
        self.0.count_ones()
    }

    pub const fn first_set(&self) -> Option<usize> {
        if self.0 == 0 {
            None
        } else {
            Some(self.0.trailing_zeros() as usize)
        }
    }

    #[inline]
    pub const fn and(self, other: CpuMask) -> CpuMask {
        CpuMask(self.0 & other.0)
    }

    #[inline]
    pub const fn or(self, other: CpuMask) -> CpuMask {
        CpuMask(self.0 | other.0)
    }

    #[inline]
    pub const fn without(self, other: CpuMask) -> CpuMask {
        CpuMask(self.0 & !other.0)
    }

    /// Iterate set CPU ids in ascending order.
    pub fn iter_set(&self) -> impl Iterator<Item = usize> {
        let mut bits = self.0;
        core::iter::from_fn(move || {
            if bits == 0 {
                return None;
            }
            let cpu = bits.trailing_zeros() as usize;
            bits &= bits - 1;
            Some(cpu)
        })
    }
}
