//! Scheduler Test Suite
//!
//! Tests for the per-CPU user scheduler. This module includes:
//! - Priority and estcpu arithmetic
//! - Bit primitives and run queue sets
//! - Per-CPU queue management and designation
//! - Topology trees and CPU placement
//! - Scheduler set entry points (enqueue, acquire, tick, fork, exit)
//! - Round-robin fairness and load-balance convergence
//! - Real-thread SMP races
//! - Tunables, statistics and logging

mod percpu;
mod priority;
mod smp;
mod stats;
