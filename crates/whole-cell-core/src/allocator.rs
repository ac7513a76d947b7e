//! Resolves the bulk requests of all partitioned processes into grants.
//!
//! Invariants, per species: the grants sum to at most the available count,
//! and no grant exceeds its request. Shortfall scales grants down instead of
//! failing; an empty pool yields all-zero grants.

use std::cmp::Reverse;

use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AllocationPolicy {
    /// Serve priority groups in descending order; a group that does not fit
    /// what is left shares it proportionally.
    #[default]
    Priority,
    /// One proportional share for everyone, priorities ignored.
    Proportional,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Allocation {
    /// `grants[p][s]`: amount of species `s` granted to process `p`.
    pub grants: Vec<Vec<i64>>,
    /// Species whose total demand exceeded supply.
    pub shortfall: Vec<usize>,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct Allocator {
    policy: AllocationPolicy,
}

impl Allocator {
    pub fn new(policy: AllocationPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> AllocationPolicy {
        self.policy
    }

    /// `requests[p]` is process `p`'s dense request vector over all species;
    /// `priorities[p]` its priority.
    pub fn allocate(
        &self,
        available: &[i64],
        requests: &[Vec<i64>],
        priorities: &[i32],
    ) -> Allocation {
        let species = available.len();
        let mut grants = vec![vec![0i64; species]; requests.len()];
        let groups = self.groups(priorities, requests.len());
        let mut shortfall = Vec::new();

        for s in 0..species {
            let mut remaining = available[s].max(0);
            let total: i64 = requests.iter().map(|r| demand(r, s)).sum();
            if total > remaining {
                shortfall.push(s);
            }
            for group in &groups {
                let group_demand: i64 = group.iter().map(|&p| demand(&requests[p], s)).sum();
                if group_demand == 0 {
                    continue;
                }
                if group_demand <= remaining {
                    for &p in group {
                        grants[p][s] = demand(&requests[p], s);
                    }
                    remaining -= group_demand;
                } else {
                    share_proportionally(remaining, group_demand, group, requests, s, &mut grants);
                    remaining = 0;
                }
            }
        }
        Allocation { grants, shortfall }
    }

    /// Process indices grouped by descending priority, process order kept inside a group.
    fn groups(&self, priorities: &[i32], processes: usize) -> Vec<Vec<usize>> {
        match self.policy {
            AllocationPolicy::Proportional => vec![(0..processes).collect()],
            AllocationPolicy::Priority => {
                let mut levels: Vec<i32> = (0..processes)
                    .map(|p| priorities.get(p).copied().unwrap_or(0))
                    .collect();
                levels.sort_unstable_by_key(|&l| Reverse(l));
                levels.dedup();
                levels
                    .into_iter()
                    .map(|level| {
                        (0..processes)
                            .filter(|&p| priorities.get(p).copied().unwrap_or(0) == level)
                            .collect()
                    })
                    .collect()
            }
        }
    }
}

fn demand(request: &[i64], species: usize) -> i64 {
    request.get(species).copied().unwrap_or(0).max(0)
}

/// Largest-remainder split of `supply` units among `group` in proportion to
/// their demand. Requires `supply < group_demand`.
fn share_proportionally(
    supply: i64,
    group_demand: i64,
    group: &[usize],
    requests: &[Vec<i64>],
    species: usize,
    grants: &mut [Vec<i64>],
) {
    let supply = i128::from(supply);
    let group_demand = i128::from(group_demand);
    let mut granted = 0i128;
    let mut remainders = Vec::with_capacity(group.len());
    for (order, &p) in group.iter().enumerate() {
        let scaled = i128::from(demand(&requests[p], species)) * supply;
        let base = scaled / group_demand;
        grants[p][species] = base as i64;
        granted += base;
        remainders.push((scaled % group_demand, order, p));
    }
    remainders.sort_by_key(|&(remainder, order, _)| (Reverse(remainder), order));
    let leftover = (supply - granted) as usize;
    for &(_, _, p) in remainders.iter().take(leftover) {
        grants[p][species] += 1;
    }
}
