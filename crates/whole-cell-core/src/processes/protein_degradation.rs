//! Poisson protein turnover. Each degraded protein releases its amino acids
//! and consumes one water per peptide bond.

use rand_chacha::ChaCha12Rng;
use rand_distr::{Distribution, Poisson};
use serde::{Deserialize, Serialize};

use crate::process::{PartitionedProcess, ProcessError, Request, Update};
use crate::rng::{create_rng, named_seed};
use crate::schema::PortsSchema;
use crate::store::StateView;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ProteinDegradationParams {
    pub protein_ids: Vec<String>,
    /// First-order degradation rate per protein, 1/s.
    pub degradation_rates: Vec<f64>,
    pub amino_acid_ids: Vec<String>,
    /// `amino_acid_counts[p][a]`: residues of amino acid `a` in protein `p`.
    pub amino_acid_counts: Vec<Vec<i64>>,
    pub water_id: String,
}

pub struct ProteinDegradation {
    name: String,
    params: ProteinDegradationParams,
    /// Peptide bonds per protein (residues minus one).
    bonds: Vec<i64>,
    rng: ChaCha12Rng,
    /// Degradation events sampled during the last request.
    planned: Vec<i64>,
}

impl ProteinDegradation {
    pub const NAME: &'static str = "protein-degradation";

    pub fn new(params: ProteinDegradationParams, seed: u64) -> Result<Self, ProcessError> {
        let proteins = params.protein_ids.len();
        if params.degradation_rates.len() != proteins || params.amino_acid_counts.len() != proteins {
            return Err(ProcessError::Invalid(format!(
                "{proteins} proteins but {} rates and {} composition rows",
                params.degradation_rates.len(),
                params.amino_acid_counts.len()
            )));
        }
        if let Some(row) = params
            .amino_acid_counts
            .iter()
            .find(|row| row.len() != params.amino_acid_ids.len())
        {
            return Err(ProcessError::Invalid(format!(
                "composition row has {} entries for {} amino acids",
                row.len(),
                params.amino_acid_ids.len()
            )));
        }
        if let Some(rate) = params
            .degradation_rates
            .iter()
            .find(|r| !(r.is_finite() && **r >= 0.0))
        {
            return Err(ProcessError::Invalid(format!("degradation rate {rate} is invalid")));
        }
        let bonds = params
            .amino_acid_counts
            .iter()
            .map(|row| (row.iter().sum::<i64>() - 1).max(0))
            .collect();
        Ok(Self {
            name: Self::NAME.to_string(),
            planned: vec![0; proteins],
            bonds,
            rng: create_rng(named_seed(seed, Self::NAME)),
            params,
        })
    }

    /// Same parameters on a fresh random stream.
    pub fn reseeded(&self, seed: u64) -> Self {
        Self {
            name: self.name.clone(),
            params: self.params.clone(),
            bonds: self.bonds.clone(),
            rng: create_rng(named_seed(seed, Self::NAME)),
            planned: vec![0; self.planned.len()],
        }
    }
}

impl PartitionedProcess for ProteinDegradation {
    fn name(&self) -> &str {
        &self.name
    }

    fn ports_schema(&self) -> PortsSchema {
        PortsSchema::new()
            .bulk(self.params.protein_ids.iter().cloned())
            .bulk(self.params.amino_acid_ids.iter().cloned())
            .bulk([self.params.water_id.clone()])
    }

    fn calculate_request(
        &mut self,
        timestep: f64,
        state: &StateView<'_>,
    ) -> Result<Request, ProcessError> {
        let mut request = Request::new();
        let mut water = 0;
        for (p, protein) in self.params.protein_ids.iter().enumerate() {
            let index = state.species_index(protein)?;
            let count = state.bulk_count(index);
            let expected = self.params.degradation_rates[p] * timestep * count as f64;
            let sampled = match Poisson::new(expected) {
                Ok(poisson) => poisson.sample(&mut self.rng) as i64,
                // zero expectation
                Err(_) => 0,
            };
            let degrade = sampled.min(count);
            self.planned[p] = degrade;
            water += degrade * self.bonds[p];
            request = request.bulk(index, degrade);
        }
        let water_index = state.species_index(&self.params.water_id)?;
        Ok(request.bulk(water_index, water))
    }

    /// Degrade what was granted, in protein order, while water lasts.
    fn evolve_state(&mut self, _timestep: f64, state: &StateView<'_>) -> Result<Update, ProcessError> {
        let water_index = state.species_index(&self.params.water_id)?;
        let amino_acids = state.bulk_counts().len();
        let mut deltas = vec![0i64; amino_acids];
        let mut water_left = state.bulk_count(water_index);
        for (p, protein) in self.params.protein_ids.iter().enumerate() {
            let index = state.species_index(protein)?;
            let granted = state.bulk_count(index).min(self.planned[p]);
            let bonds = self.bonds[p];
            let degraded = if bonds > 0 {
                granted.min(water_left / bonds)
            } else {
                granted
            };
            if degraded == 0 {
                continue;
            }
            water_left -= degraded * bonds;
            deltas[index] -= degraded;
            deltas[water_index] -= degraded * bonds;
            for (aa, &residues) in self
                .params
                .amino_acid_ids
                .iter()
                .zip(&self.params.amino_acid_counts[p])
            {
                deltas[state.species_index(aa)?] += degraded * residues;
            }
        }
        self.planned.iter_mut().for_each(|n| *n = 0);
        Ok(deltas
            .into_iter()
            .enumerate()
            .fold(Update::new(), |update, (species, delta)| update.bulk(species, delta)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{BulkPool, CellState};

    fn params() -> ProteinDegradationParams {
        ProteinDegradationParams {
            protein_ids: ["w", "x", "y", "z"].map(String::from).to_vec(),
            degradation_rates: vec![0.05, 0.08, 0.13, 0.21],
            amino_acid_ids: ["A", "B", "C"].map(String::from).to_vec(),
            amino_acid_counts: vec![
                vec![5, 7, 13],
                vec![1, 3, 5],
                vec![4, 4, 4],
                vec![13, 11, 5],
            ],
            water_id: "H2O".to_string(),
        }
    }

    fn cell() -> CellState {
        CellState::new().with_bulk(
            BulkPool::new([
                ("A", 10),
                ("B", 20),
                ("C", 30),
                ("H2O", 1000),
                ("w", 5),
                ("x", 6),
                ("y", 7),
                ("z", 8),
            ])
            .unwrap(),
        )
    }

    #[test]
    fn rejects_mismatched_composition() {
        let mut bad = params();
        bad.amino_acid_counts.pop();
        assert!(matches!(
            ProteinDegradation::new(bad, 0),
            Err(ProcessError::Invalid(_))
        ));
    }

    #[test]
    fn water_use_matches_peptide_bonds() {
        let mut process = ProteinDegradation::new(params(), 3).unwrap();
        let state = cell();
        let view = StateView::full(&state, false);
        let request = process.calculate_request(10.0, &view).unwrap();
        let amounts = request.amounts();
        // grant everything that was asked for
        let mut grant = vec![0i64; state.bulk.len()];
        for &(s, a) in amounts {
            grant[s] += a;
        }
        let update = process
            .evolve_state(10.0, &StateView::new(&state, &grant, false))
            .unwrap();
        let delta = |id: &str| {
            let index = state.bulk.index_of(id).unwrap();
            update
                .bulk
                .iter()
                .filter(|(s, _)| *s == index)
                .map(|(_, d)| d)
                .sum::<i64>()
        };
        let bonds = [24, 8, 11, 28];
        let expected_water: i64 = ["w", "x", "y", "z"]
            .iter()
            .zip(bonds)
            .map(|(p, b)| delta(*p) * b)
            .sum();
        assert_eq!(delta("H2O"), expected_water);
        for protein in ["w", "x", "y", "z"] {
            assert!(delta(protein) <= 0);
        }
        for aa in ["A", "B", "C"] {
            assert!(delta(aa) >= 0);
        }
    }

    #[test]
    fn scarce_water_limits_degradation() {
        let mut process = ProteinDegradation::new(params(), 3).unwrap();
        let state = cell();
        process.planned = vec![5, 0, 0, 0];
        let mut grant = vec![0i64; state.bulk.len()];
        grant[state.bulk.index_of("w").unwrap()] = 5;
        grant[state.bulk.index_of("H2O").unwrap()] = 50;
        let update = process
            .evolve_state(1.0, &StateView::new(&state, &grant, false))
            .unwrap();
        let w = state.bulk.index_of("w").unwrap();
        let water = state.bulk.index_of("H2O").unwrap();
        // 24 bonds per w: two fit into 50 water
        assert!(update.bulk.contains(&(w, -2)));
        assert!(update.bulk.contains(&(water, -48)));
    }
}
