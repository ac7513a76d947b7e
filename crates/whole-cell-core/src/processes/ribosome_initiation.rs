use rand::Rng;
use rand_chacha::ChaCha12Rng;

use super::{ribosome_collection, rna_collection, ACTIVE_RIBOSOME, RNA, SUBMASS};
use crate::constants::{MRNA_INDEX, SUBMASS_WIDTH};
use crate::process::{PartitionedProcess, ProcessError, Request, Update};
use crate::rng::{create_rng, named_seed};
use crate::schema::{PortsSchema, SchemaEntry};
use crate::store::{ColumnData, StateView, UniqueUpdate};
use crate::value::StatePath;

/// Position of the protein fraction in a submass vector.
const PROTEIN_SUBMASS: usize = 0;

/// Pairs free 30S and 50S subunits into active ribosomes on randomly chosen
/// RNAs.
pub struct RibosomeInitiation {
    name: String,
    subunits: [String; 2],
    /// Upper bound on initiations per second.
    max_rate: f64,
    /// Mass carried by each new ribosome row, booked as protein submass.
    ribosome_mass: f64,
    rng: ChaCha12Rng,
    initiated: StatePath,
}

impl RibosomeInitiation {
    pub const NAME: &'static str = "ribosome-initiation";

    pub fn new(small: impl Into<String>, large: impl Into<String>, max_rate: f64, seed: u64) -> Self {
        Self {
            name: Self::NAME.to_string(),
            subunits: [small.into(), large.into()],
            max_rate,
            ribosome_mass: 0.0,
            rng: create_rng(named_seed(seed, Self::NAME)),
            initiated: StatePath::from("listeners/ribosome_data/did_initialize"),
        }
    }

    pub fn with_ribosome_mass(mut self, mass: f64) -> Self {
        self.ribosome_mass = mass;
        self
    }

    fn submass(&self, rows: usize) -> ColumnData {
        let mut data = vec![0.0; rows * SUBMASS_WIDTH];
        for row in data.chunks_exact_mut(SUBMASS_WIDTH) {
            row[PROTEIN_SUBMASS] = self.ribosome_mass;
        }
        ColumnData::Vector {
            width: SUBMASS_WIDTH,
            data,
        }
    }
}

impl PartitionedProcess for RibosomeInitiation {
    fn name(&self) -> &str {
        &self.name
    }

    fn ports_schema(&self) -> PortsSchema {
        PortsSchema::new()
            .bulk(self.subunits.iter().cloned())
            .collection(RNA, rna_collection())
            .collection(ACTIVE_RIBOSOME, ribosome_collection())
            .value(self.initiated.clone(), SchemaEntry::listener(0i64))
    }

    fn calculate_request(
        &mut self,
        timestep: f64,
        state: &StateView<'_>,
    ) -> Result<Request, ProcessError> {
        let small = state.species_index(&self.subunits[0])?;
        let large = state.species_index(&self.subunits[1])?;
        let wanted = if state.collection(RNA)?.is_empty() {
            0
        } else {
            let cap = (self.max_rate * timestep).floor() as i64;
            state.bulk_count(small).min(state.bulk_count(large)).min(cap)
        };
        Ok(Request::new().bulk(small, wanted).bulk(large, wanted))
    }

    fn evolve_state(&mut self, _timestep: f64, state: &StateView<'_>) -> Result<Update, ProcessError> {
        let small = state.species_index(&self.subunits[0])?;
        let large = state.species_index(&self.subunits[1])?;
        let rnas = state.collection(RNA)?.unique_indices();
        let pairs = if rnas.is_empty() {
            0
        } else {
            state.bulk_count(small).min(state.bulk_count(large))
        };
        let mut update = Update::new().value(self.initiated.clone(), pairs);
        if pairs == 0 {
            return Ok(update);
        }
        let targets: Vec<i64> = (0..pairs)
            .map(|_| rnas[self.rng.random_range(0..rnas.len())] as i64)
            .collect();
        let rows = targets.len();
        update = update
            .bulk(small, -pairs)
            .bulk(large, -pairs)
            .collection(
                ACTIVE_RIBOSOME,
                UniqueUpdate::new().add(
                    rows,
                    vec![
                        (MRNA_INDEX.to_string(), ColumnData::Int(targets)),
                        ("peptide_length".to_string(), ColumnData::Int(vec![0; rows])),
                        (SUBMASS.to_string(), self.submass(rows)),
                    ],
                ),
            );
        Ok(update)
    }
}
