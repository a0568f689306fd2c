//! Class merger: transitive closure over a pool of equivalence classes.
//!
//! Both strategies return the closure of the component that contains the
//! *first* class in the pool: every class reachable from it through shared
//! members, directly or indirectly. Classes not connected to the first one
//! are left out. An empty pool merges to [`EquivalenceClass::empty`].
//!
//! - [`MergeStrategy::RestartScan`] repeatedly scans the unconsumed classes
//!   and restarts after every merge, since absorbing a class can connect one
//!   examined earlier in the same pass. Quadratic in the pool size, which is
//!   small for typical queries.
//! - [`MergeStrategy::UnionFind`] joins classes through a disjoint set keyed
//!   by member, then gathers the first class's component in one pass.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::planner::equivalence::{EquivalenceClass, EquivalenceMember};

/// How [`merge_classes`] computes the closure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MergeStrategy {
    #[default]
    RestartScan,
    UnionFind,
}

impl MergeStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            MergeStrategy::RestartScan => "restart-scan",
            MergeStrategy::UnionFind => "union-find",
        }
    }
}

impl std::fmt::Display for MergeStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Merge `pool` into the class connected to its first entry. The result
/// keeps the first class's id.
pub fn merge_classes(strategy: MergeStrategy, pool: &[EquivalenceClass]) -> EquivalenceClass {
    match strategy {
        MergeStrategy::RestartScan => merge_restart_scan(pool),
        MergeStrategy::UnionFind => merge_union_find(pool),
    }
}

fn merge_restart_scan(pool: &[EquivalenceClass]) -> EquivalenceClass {
    let Some(seed) = pool.first() else {
        return EquivalenceClass::empty();
    };
    let mut merged = EquivalenceClass::new(seed.id);
    merged.absorb(seed);

    let mut consumed = vec![false; pool.len()];
    consumed[0] = true;

    'scan: loop {
        for (idx, class) in pool.iter().enumerate() {
            if consumed[idx] || !merged.shares_member(class) {
                continue;
            }
            merged.absorb(class);
            consumed[idx] = true;
            continue 'scan;
        }
        break;
    }
    merged
}

fn merge_union_find(pool: &[EquivalenceClass]) -> EquivalenceClass {
    let Some(seed) = pool.first() else {
        return EquivalenceClass::empty();
    };

    let mut sets = DisjointSet::new(pool.len());
    let mut owner: HashMap<EquivalenceMember, usize> = HashMap::new();
    for (idx, class) in pool.iter().enumerate() {
        for member in class.members() {
            match owner.get(member) {
                Some(&other) => sets.union(idx, other),
                None => {
                    owner.insert(*member, idx);
                }
            }
        }
    }

    let root = sets.find(0);
    let mut merged = EquivalenceClass::new(seed.id);
    for (idx, class) in pool.iter().enumerate() {
        if sets.find(idx) == root {
            merged.absorb(class);
        }
    }
    merged
}

/// Disjoint set over class indexes with path halving.
struct DisjointSet {
    parent: Vec<usize>,
}

impl DisjointSet {
    fn new(len: usize) -> Self {
        Self {
            parent: (0..len).collect(),
        }
    }

    fn find(&mut self, mut idx: usize) -> usize {
        while self.parent[idx] != idx {
            self.parent[idx] = self.parent[self.parent[idx]];
            idx = self.parent[idx];
        }
        idx
    }

    fn union(&mut self, a: usize, b: usize) {
        let (ra, rb) = (self.find(a), self.find(b));
        if ra != rb {
            // Keep the lower index as root so the seed's component is
            // always rooted at 0 once joined.
            let (low, high) = if ra < rb { (ra, rb) } else { (rb, ra) };
            self.parent[high] = low;
        }
    }
}
