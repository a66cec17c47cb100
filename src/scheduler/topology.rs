//! CPU topology tree
//!
//! Nodes live in one arena; node 0 is the root. Every leaf covers exactly
//! one CPU. Interior nodes with a single child are legal and skipped by the
//! balancer walk.
//!
//! ```text
//!            root
//!         /        \
//!     package0    package1
//!      /   \        /   \
//!   core0 core1  core2 core3
//!    / \   / \    / \   / \
//!   0   1 2   3  4   5 6   7     <- hyperthread leaves
//! ```

use alloc::vec;
use alloc::vec::Vec;

use super::error::{SchedError, SchedResult};
use super::types::{CpuMask, MAX_CPUS};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TopoLevel {
    Root,
    Package,
    Core,
    Thread,
}

impl TopoLevel {
    pub const fn as_str(self) -> &'static str {
        match self {
            TopoLevel::Root => "root",
            TopoLevel::Package => "package",
            TopoLevel::Core => "core",
            TopoLevel::Thread => "thread",
        }
    }
}

#[derive(Clone, Debug)]
pub struct TopoNode {
    pub level: TopoLevel,
    pub members: CpuMask,
    pub children: Vec<usize>,
}

impl TopoNode {
    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

#[derive(Clone, Debug)]
pub struct CpuTopology {
    nodes: Vec<TopoNode>,
    ncpus: usize,
}

impl CpuTopology {
    /// One root with a leaf per CPU.
    pub fn flat(ncpus: usize) -> SchedResult<Self> {
        check_count(ncpus)?;
        let mut nodes = Vec::with_capacity(ncpus + 1);
        nodes.push(TopoNode {
            level: TopoLevel::Root,
            members: CpuMask::all(ncpus),
            children: (1..=ncpus).collect(),
        });
        for cpu in 0..ncpus {
            nodes.push(leaf(TopoLevel::Thread, cpu));
        }
        Ok(Self { nodes, ncpus })
    }

    /// `sockets` packages of `cores` cores of `threads` hyperthreads each.
    /// CPU ids are assigned depth-first, so siblings are adjacent.
    pub fn uniform(sockets: usize, cores: usize, threads: usize) -> SchedResult<Self> {
        let ncpus = sockets
            .checked_mul(cores)
            .and_then(|n| n.checked_mul(threads))
            .ok_or(SchedError::TooManyCpus)?;
        check_count(ncpus)?;

        let mut nodes = Vec::new();
        nodes.push(TopoNode {
            level: TopoLevel::Root,
            members: CpuMask::all(ncpus),
            children: Vec::new(),
        });

        let mut cpu = 0;
        for _ in 0..sockets {
            let package = nodes.len();
            nodes.push(TopoNode {
                level: TopoLevel::Package,
                members: CpuMask::empty(),
                children: Vec::new(),
            });
            nodes[0].children.push(package);

            for _ in 0..cores {
                let core = nodes.len();
                nodes.push(TopoNode {
                    level: TopoLevel::Core,
                    members: CpuMask::empty(),
                    children: Vec::new(),
                });
                nodes[package].children.push(core);

                for _ in 0..threads {
                    let thread = nodes.len();
                    nodes.push(leaf(TopoLevel::Thread, cpu));
                    nodes[core].children.push(thread);
                    nodes[core].members.set(cpu);
                    nodes[package].members.set(cpu);
                    cpu += 1;
                }
            }
        }

        let topology = Self { nodes, ncpus };
        topology.validate()?;
        Ok(topology)
    }

    /// Build from an explicit node list; node 0 must be the root.
    pub fn from_nodes(nodes: Vec<TopoNode>) -> SchedResult<Self> {
        let root = nodes.first().ok_or(SchedError::NoCpus)?;
        let ncpus = root.members.count() as usize;
        check_count(ncpus)?;
        if root.members != CpuMask::all(ncpus) {
            return Err(SchedError::InvalidTopology);
        }
        let topology = Self { nodes, ncpus };
        topology.validate()?;
        Ok(topology)
    }

    /// Children must partition their parent and every leaf must hold one
    /// CPU. The nodes must form a tree rooted at node 0: each node is
    /// reached exactly once from the root.
    fn validate(&self) -> SchedResult<()> {
        let mut visited = vec![false; self.nodes.len()];
        let mut stack = vec![self.root()];
        let mut seen_leaves = CpuMask::empty();

        while let Some(index) = stack.pop() {
            let node = self.nodes.get(index).ok_or(SchedError::InvalidTopology)?;
            if core::mem::replace(&mut visited[index], true) {
                return Err(SchedError::InvalidTopology);
            }
            if node.is_leaf() {
                if node.members.count() != 1 || !(seen_leaves.and(node.members)).is_empty() {
                    return Err(SchedError::InvalidTopology);
                }
                seen_leaves = seen_leaves.or(node.members);
                continue;
            }
            let mut union = CpuMask::empty();
            for &child in &node.children {
                let child_node = self.nodes.get(child).ok_or(SchedError::InvalidTopology)?;
                if !union.and(child_node.members).is_empty() {
                    return Err(SchedError::InvalidTopology);
                }
                union = union.or(child_node.members);
                stack.push(child);
            }
            if union != node.members {
                return Err(SchedError::InvalidTopology);
            }
        }

        if visited.iter().any(|&reached| !reached) || seen_leaves != CpuMask::all(self.ncpus) {
            return Err(SchedError::InvalidTopology);
        }
        Ok(())
    }

    #[inline]
    pub fn ncpus(&self) -> usize {
        self.ncpus
    }

    #[inline]
    pub fn root(&self) -> usize {
        0
    }

    #[inline]
    pub fn node(&self, index: usize) -> &TopoNode {
        &self.nodes[index]
    }

    /// Smallest non-leaf group containing `cpu`, i.e. the CPUs that share
    /// the closest cache level with it.
    pub fn siblings(&self, cpu: usize) -> CpuMask {
        let mut index = self.root();
        let mut group = self.nodes[index].members;
        loop {
            let node = &self.nodes[index];
            let next = node
                .children
                .iter()
                .copied()
                .find(|&child| self.nodes[child].members.is_set(cpu));
            match next {
                Some(child) if !self.nodes[child].is_leaf() => {
                    index = child;
                    group = self.nodes[child].members;
                }
                _ => return group,
            }
        }
    }

    /// Level of the deepest shared group containing `cpu`.
    pub fn level_of(&self, cpu: usize) -> TopoLevel {
        let siblings = self.siblings(cpu);
        self.nodes
            .iter()
            .rev()
            .find(|node| !node.is_leaf() && node.members == siblings)
            .map(|node| node.level)
            .unwrap_or(TopoLevel::Root)
    }
}

fn leaf(level: TopoLevel, cpu: usize) -> TopoNode {
    TopoNode {
        level,
        members: CpuMask::single(cpu),
        children: Vec::new(),
    }
}

fn check_count(ncpus: usize) -> SchedResult<()> {
    if ncpus == 0 {
        Err(SchedError::NoCpus)
    } else if ncpus > MAX_CPUS {
        Err(SchedError::TooManyCpus)
    } else {
        Ok(())
    }
}
