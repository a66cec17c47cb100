//! Topology-aware CPU selection
//!
//! Both choosers walk the topology tree from the root, scoring each child
//! group by its average weighted load and descending into the winner until
//! a single CPU remains. All loads are read without locks; the answers are
//! hints and callers must cope with them being stale.

use super::config::Tunables;
use super::lwp::Lwp;
use super::percpu::{PerCpuScheduler, SchedGlobals};
use super::topology::CpuTopology;
use super::types::{CpuMask, PPQMASK};

pub struct Balancer<'a> {
    pub(crate) cpus: &'a [PerCpuScheduler],
    pub(crate) topology: Option<&'a CpuTopology>,
    pub(crate) tunables: &'a Tunables,
    pub(crate) globals: &'a SchedGlobals,
}

impl<'a> Balancer<'a> {
    fn online(&self) -> CpuMask {
        CpuMask::all(self.cpus.len())
    }

    /// Average of `uload + ucount * weight3` over `mask`, plus the count.
    fn group_load(&self, mask: CpuMask, idle_bonus: bool) -> (i64, i64) {
        let weight3 = self.tunables.weight3() as i64;
        let weight4 = self.tunables.weight4() as i64;
        let curproc = self.globals.curprocmask();
        let mut load = 0i64;
        let mut count = 0i64;
        for cpu in mask.iter_set() {
            let dd = &self.cpus[cpu];
            load += dd.uload() as i64 + dd.ucount() as i64 * weight3;
            if idle_bonus && !curproc.is_set(cpu) && dd.runqcount() == 0 {
                load -= weight4;
            }
            count += 1;
        }
        (load, count)
    }

    /// Best CPU to place `lwp` on.
    pub fn choose_best_queue(&self, lwp: &Lwp) -> usize {
        let Some(topology) = self.topology else {
            return self.choose_queue_simple(lwp);
        };

        let qcpu = lwp.qcpu();
        let wakecpu = lwp.wakefromcpu();
        let affinity = lwp.cpumask().and(self.online());
        let weight1 = self.tunables.weight1() as i64;
        let weight2 = self.tunables.weight2() as i64;
        let weight3 = self.tunables.weight3() as i64;

        let mut index = topology.root();
        loop {
            let node = topology.node(index);
            if node.is_leaf() {
                let cpu = node.members.first_set().unwrap_or(qcpu);
                crate::ktrace!("usched: best queue tid {} {}->{}", lwp.tid(), qcpu, cpu);
                return cpu;
            }
            if node.children.len() == 1 {
                index = node.children[0];
                continue;
            }

            let mut best: Option<(usize, i64)> = None;
            for &child in &node.children {
                let group = topology.node(child);
                let mask = group.members.and(affinity);
                if mask.is_empty() {
                    continue;
                }

                let (mut load, count) = self.group_load(mask, true);
                // Score as if lwp were not already counted here.
                if lwp.is_uload_accounted() && mask.is_set(qcpu) {
                    load -= lwp.uload() as i64 + weight3;
                }
                load /= count;

                if group.members.is_set(qcpu) {
                    load -= weight1;
                }
                if wakecpu != qcpu && group.members.is_set(wakecpu) {
                    if group.is_leaf() {
                        load += weight2;
                    } else {
                        load -= weight2;
                    }
                }

                let better = match best {
                    None => true,
                    Some((_, lowest)) => {
                        load < lowest || (load == lowest && group.members.is_set(qcpu))
                    }
                };
                if better {
                    best = Some((child, load));
                }
            }

            match best {
                Some((child, _)) => index = child,
                // Affinity excludes the whole subtree; stay put.
                None => return qcpu,
            }
        }
    }

    /// Most loaded CPU other than `home`, if it is worse than `home` by at
    /// least `threshold`.
    pub fn choose_worst_queue(&self, home: usize, threshold: i32) -> Option<usize> {
        let topology = self.topology?;
        let weight1 = self.tunables.weight1() as i64;
        let online = self.online();

        let mut index = topology.root();
        let victim = loop {
            let node = topology.node(index);
            if node.is_leaf() {
                break node.members.first_set()?;
            }
            if node.children.len() == 1 {
                index = node.children[0];
                continue;
            }

            let mut worst: Option<(usize, i64)> = None;
            for &child in &node.children {
                let group = topology.node(child);
                let mask = group.members.and(online);
                if mask.is_empty() {
                    continue;
                }
                let (mut load, count) = self.group_load(mask, false);
                load /= count;
                if group.members.is_set(home) {
                    load += weight1;
                }
                if worst.map_or(true, |(_, highest)| load > highest) {
                    worst = Some((child, load));
                }
            }
            index = worst?.0;
        };

        if victim == home {
            return None;
        }
        let rdd = &self.cpus[victim];
        let dd = &self.cpus[home];
        if rdd.uload() < dd.uload() + threshold {
            return None;
        }
        Some(victim)
    }

    /// Rotating scan used when no topology is known.
    ///
    /// Prefers ready CPUs with no designated task, then ready CPUs running
    /// something worse than `lwp`, then whatever the rover points at.
    pub fn choose_queue_simple(&self, lwp: &Lwp) -> usize {
        let ncpus = self.cpus.len();
        let start = self.globals.next_scancpu() % ncpus;
        let affinity = lwp.cpumask().and(self.online());
        let curproc = self.globals.curprocmask();
        let ready = self.globals.rdyprocmask();
        let pri = lwp.priority() & !PPQMASK;

        let idle = ready.without(curproc).and(affinity);
        if let Some(cpu) = rotate_find(idle, start, |cpu| {
            (self.cpus[cpu].upri() & !PPQMASK) >= pri
        }) {
            return cpu;
        }

        let busy = ready.and(curproc).and(affinity);
        if let Some(cpu) = rotate_find(busy, start, |cpu| {
            (self.cpus[cpu].upri() & !PPQMASK) > pri
        }) {
            return cpu;
        }

        if affinity.is_set(start) {
            start
        } else {
            affinity.first_set().unwrap_or(lwp.qcpu())
        }
    }
}

/// First CPU in `mask` satisfying `pred`, scanning upward from `start` and
/// wrapping around.
fn rotate_find(mask: CpuMask, start: usize, mut pred: impl FnMut(usize) -> bool) -> Option<usize> {
    let upper = mask.iter_set().filter(|&cpu| cpu >= start);
    let lower = mask.iter_set().filter(|&cpu| cpu < start);
    upper.chain(lower).find(|&cpu| pred(cpu))
}
