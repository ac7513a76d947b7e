use tracing::warn;

use super::super::Engine;
use crate::allocator::Allocation;

impl Engine {
    pub(in crate::engine) fn allocate_phase(&mut self, requests: &[Vec<i64>]) -> Allocation {
        let priorities: Vec<i32> = self.partitioned.iter().map(|p| p.priority()).collect();
        let allocation = self
            .allocator
            .allocate(self.state.bulk.counts(), requests, &priorities);
        if !allocation.shortfall.is_empty() {
            self.shortfall_events += 1;
            let ids = self.state.bulk.ids();
            let species: Vec<&str> = allocation
                .shortfall
                .iter()
                .map(|&s| ids[s].as_str())
                .collect();
            warn!(
                time = self.state.time,
                policy = ?self.allocator.policy(),
                species = ?species,
                "requests exceed supply, grants scaled down"
            );
        }
        allocation
    }
}
