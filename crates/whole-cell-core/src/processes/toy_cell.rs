//! A small but complete cell: turnover, translation initiation, maintenance
//! drain, nutrient import, drug binding and a mass readout, over a chromosome
//! with one replicated domain pair.

use serde::{Deserialize, Serialize};

use super::{
    domain_collection, ribosome_collection, rna_collection, rnap_collection, BulkConsumer,
    MassListener, ProteinDegradation, ProteinDegradationParams, RibosomeInitiation,
    TetracyclineEquilibrium, ACTIVE_RIBOSOME, ACTIVE_RNAP, CHROMOSOME_DOMAIN, RNA, SUBMASS,
};
use crate::constants::{
    CHILD_DOMAINS, DOMAIN_INDEX, IS_FULL_TRANSCRIPT, MRNA_INDEX, RNAP_INDEX, SUBMASS_WIDTH,
};
use crate::process::{Process, ProcessError, ProcessRole, Update};
use crate::schema::PortsSchema;
use crate::store::{BulkPool, CellState, ColumnData, StateView, UniqueCollection};
use crate::tunnel::Composer;

/// Imports fixed amounts of bulk species per second of model time.
pub struct NutrientUptake {
    name: String,
    rates: Vec<(String, f64)>,
}

impl NutrientUptake {
    pub const NAME: &'static str = "nutrient-uptake";

    pub fn new<I, S>(rates: I) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        Self {
            name: Self::NAME.to_string(),
            rates: rates.into_iter().map(|(s, r)| (s.into(), r)).collect(),
        }
    }
}

impl Process for NutrientUptake {
    fn name(&self) -> &str {
        &self.name
    }

    fn ports_schema(&self) -> PortsSchema {
        PortsSchema::new().bulk(self.rates.iter().map(|(s, _)| s.clone()))
    }

    fn next_update(&mut self, timestep: f64, state: &StateView<'_>) -> Result<Update, ProcessError> {
        let mut update = Update::new();
        for (species, rate) in &self.rates {
            let amount = (rate * timestep).floor() as i64;
            update = update.bulk(state.species_index(species)?, amount);
        }
        Ok(update)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ToyCellParams {
    pub proteins: ProteinDegradationParams,
    /// Per-molecule mass of every bulk species, fg.
    pub molecular_weights: Vec<(String, f64)>,
    pub uptake: Vec<(String, f64)>,
    pub maintenance: Vec<(String, i64)>,
    pub initiation_rate: f64,
    pub tetracycline_binding: f64,
    pub initial_counts: Vec<(String, i64)>,
    pub initial_tetracycline: i64,
}

impl Default for ToyCellParams {
    fn default() -> Self {
        let weights = [
            ("protA", 5.5),
            ("protB", 2.75),
            ("ALA", 0.089),
            ("GLY", 0.075),
            ("H2O", 0.018),
            ("ATP", 0.507),
            ("30S", 900.0),
            ("50S", 1500.0),
            ("30S_tc", 900.4),
        ];
        let counts = [
            ("protA", 400),
            ("protB", 900),
            ("ALA", 5_000),
            ("GLY", 5_000),
            ("H2O", 100_000),
            ("ATP", 20_000),
            ("30S", 60),
            ("50S", 45),
            ("30S_tc", 0),
        ];
        Self {
            proteins: ProteinDegradationParams {
                protein_ids: vec!["protA".to_string(), "protB".to_string()],
                degradation_rates: vec![0.01, 0.02],
                amino_acid_ids: vec!["ALA".to_string(), "GLY".to_string()],
                amino_acid_counts: vec![vec![30, 20], vec![10, 15]],
                water_id: "H2O".to_string(),
            },
            molecular_weights: weights.iter().map(|(s, w)| (s.to_string(), *w)).collect(),
            uptake: vec![
                ("ALA".to_string(), 400.0),
                ("GLY".to_string(), 300.0),
                ("ATP".to_string(), 1_000.0),
            ],
            maintenance: vec![("ATP".to_string(), 600)],
            initiation_rate: 5.0,
            tetracycline_binding: 0.002,
            initial_counts: counts.iter().map(|(s, c)| (s.to_string(), *c)).collect(),
            initial_tetracycline: 40,
        }
    }
}

/// Builds the toy cell's processes for any agent, so it can also rebuild
/// daughters inside a tunnel.
pub struct ToyCell {
    params: ToyCellParams,
    degradation: ProteinDegradation,
}

impl ToyCell {
    pub fn new(params: ToyCellParams) -> Result<Self, ProcessError> {
        let degradation = ProteinDegradation::new(params.proteins.clone(), 0)?;
        Ok(Self {
            params,
            degradation,
        })
    }

    pub fn params(&self) -> &ToyCellParams {
        &self.params
    }

    fn weight(&self, species: &str) -> f64 {
        self.params
            .molecular_weights
            .iter()
            .find(|(s, _)| s == species)
            .map_or(0.0, |(_, w)| *w)
    }

    /// Newborn state: bulk pool, a domain tree `0 -> [1, 2]`, polymerases on
    /// both daughter domains, RNAs (two still being transcribed) and a few
    /// ribosomes.
    pub fn initial_state(&self, seed: u64) -> Result<CellState, ProcessError> {
        let bulk = BulkPool::new(self.params.initial_counts.iter().cloned())?;

        let mut domains = UniqueCollection::new(CHROMOSOME_DOMAIN, domain_collection().columns, seed)?;
        domains.create(
            3,
            &[
                (DOMAIN_INDEX.to_string(), ColumnData::Int(vec![0, 1, 2])),
                (
                    CHILD_DOMAINS.to_string(),
                    ColumnData::IntVector {
                        width: 2,
                        data: vec![1, 2, -1, -1, -1, -1],
                    },
                ),
            ],
        )?;

        let mut rnaps = UniqueCollection::new(ACTIVE_RNAP, rnap_collection().columns, seed)?;
        let rnap_ids = rnaps.create(
            4,
            &[
                (DOMAIN_INDEX.to_string(), ColumnData::Int(vec![1, 1, 2, 2])),
                (SUBMASS.to_string(), submass(4, 0.4)),
            ],
        )?;

        let mut rnas = UniqueCollection::new(RNA, rna_collection().columns, seed)?;
        let rna_ids = rnas.create(
            6,
            &[
                (
                    RNAP_INDEX.to_string(),
                    ColumnData::Int(vec![-1, -1, -1, -1, rnap_ids[0] as i64, rnap_ids[2] as i64]),
                ),
                (
                    IS_FULL_TRANSCRIPT.to_string(),
                    ColumnData::Bool(vec![true, true, true, true, false, false]),
                ),
                (SUBMASS.to_string(), submass(6, 0.1)),
            ],
        )?;

        let mut ribosomes =
            UniqueCollection::new(ACTIVE_RIBOSOME, ribosome_collection().columns, seed)?;
        ribosomes.create(
            3,
            &[
                (
                    MRNA_INDEX.to_string(),
                    ColumnData::Int(vec![rna_ids[0] as i64, rna_ids[1] as i64, rna_ids[4] as i64]),
                ),
                (SUBMASS.to_string(), submass(3, 0.3)),
            ],
        )?;

        CellState::new()
            .with_bulk(bulk)
            .with_collection(domains)
            .with_collection(rnaps)
            .with_collection(rnas)
            .with_collection(ribosomes)
            .with_value("tetracycline", self.params.initial_tetracycline)
            .map_err(ProcessError::from)
    }
}

fn submass(rows: usize, per_fraction: f64) -> ColumnData {
    ColumnData::Vector {
        width: SUBMASS_WIDTH,
        data: vec![per_fraction; rows * SUBMASS_WIDTH],
    }
}

impl Composer for ToyCell {
    fn processes(&self, _agent_id: &str, seed: u64) -> Vec<ProcessRole> {
        let params = &self.params;
        vec![
            ProcessRole::partitioned(self.degradation.reseeded(seed)),
            ProcessRole::partitioned(
                RibosomeInitiation::new("30S", "50S", params.initiation_rate, seed)
                    .with_ribosome_mass(self.weight("30S") + self.weight("50S")),
            ),
            ProcessRole::partitioned(BulkConsumer::new(
                "maintenance",
                params.maintenance.iter().cloned(),
            )),
            ProcessRole::plain(NutrientUptake::new(params.uptake.iter().cloned())),
            ProcessRole::step(TetracyclineEquilibrium::new(params.tetracycline_binding)),
            ProcessRole::step(
                MassListener::new(
                    params.molecular_weights.iter().cloned(),
                    vec![
                        (CHROMOSOME_DOMAIN, domain_collection()),
                        (ACTIVE_RNAP, rnap_collection()),
                        (RNA, rna_collection()),
                        (ACTIVE_RIBOSOME, ribosome_collection()),
                    ],
                )
                .after(TetracyclineEquilibrium::NAME),
            ),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_params_build() {
        assert!(ToyCell::new(ToyCellParams::default()).is_ok());
    }

    #[test]
    fn initial_state_links_rnas_and_ribosomes() {
        let cell = ToyCell::new(ToyCellParams::default()).unwrap();
        let state = cell.initial_state(5).unwrap();
        assert_eq!(state.collection(CHROMOSOME_DOMAIN).unwrap().len(), 3);
        let rnas = state.collection(RNA).unwrap();
        let ribosomes = state.collection(ACTIVE_RIBOSOME).unwrap();
        let mrnas = ribosomes.read_column(MRNA_INDEX).unwrap();
        for &mrna in mrnas.as_int().unwrap() {
            assert!(rnas.lookup(mrna as u64).is_some());
        }
        assert_eq!(state.bulk.count("30S").unwrap(), 60);
    }

    #[test]
    fn composer_names_every_process() {
        let cell = ToyCell::new(ToyCellParams::default()).unwrap();
        let names: Vec<String> = cell
            .processes("0", 1)
            .iter()
            .map(|p| p.name().to_string())
            .collect();
        assert_eq!(
            names,
            vec![
                ProteinDegradation::NAME,
                RibosomeInitiation::NAME,
                "maintenance",
                NutrientUptake::NAME,
                TetracyclineEquilibrium::NAME,
                MassListener::NAME,
            ]
        );
    }

    #[test]
    fn params_deserialize_from_partial_json() {
        let params: ToyCellParams =
            serde_json::from_str(r#"{"initiation_rate": 12.0}"#).unwrap();
        assert_eq!(params.initiation_rate, 12.0);
        assert_eq!(params.initial_tetracycline, 40);
    }
}
