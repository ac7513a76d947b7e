//! Splitting one cell into two daughters.
//!
//! Bulk species split binomially, plain values by their declared divider and
//! unique collections by lineage: rows on chromosome domains follow the
//! domain, RNAs follow their polymerase (or a coin flip once fully
//! transcribed) and ribosomes follow their mRNA.

pub mod domain;

use std::collections::{BTreeSet, HashMap};

use rand::Rng;
use rand_distr::{Distribution, Normal};
use tracing::{debug, warn};

pub use domain::{Daughter, DomainMap};

use crate::constants::{
    DIVISION_SEED_SALT, DOMAIN_INDEX, IS_FULL_TRANSCRIPT, MRNA_INDEX, RNAP_INDEX, UNIQUE_INDEX,
};
use crate::rng::{create_rng, daughter_seed, named_seed};
use crate::schema::{Schema, SchemaError};
use crate::store::{CellState, ColumnData, ColumnKind, StoreError, UniqueCollection};
use crate::value::ValueError;

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum DivisionError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Value(#[from] ValueError),
    #[error("chromosome domain tree has {roots} roots, expected exactly one")]
    MalformedDomainTree { roots: usize },
    #[error("chromosome domain root has {found} children, expected exactly two daughter roots")]
    DaughterRootCount { found: usize },
    #[error("collection `{collection}` references domain {domain}, which is not in the domain tree")]
    UnknownDomain { collection: String, domain: i64 },
    #[error("collection `{collection}` references unique index {index} missing from `{target}`")]
    DanglingReference {
        collection: String,
        target: String,
        index: i64,
    },
    #[error("division needs the `{0}` collection")]
    MissingCollection(String),
    #[error("threshold scale {0} is not a valid standard deviation")]
    InvalidThresholdScale(f64),
}

/// How a unique collection is split between daughters.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum UniqueDivider {
    /// Rows follow their own `domain_index`.
    ByDomain,
    /// The chromosome-domain collection itself, split by its own tree.
    Domain,
    /// Partial transcripts follow their polymerase's domain; full transcripts
    /// are split by a fair coin.
    RnaByDomain { rnap_collection: String },
    /// Ribosomes follow the mRNA they are attached to.
    Ribosomes {
        rna_collection: String,
        rnap_collection: String,
    },
    /// Both daughters start without rows.
    Empty,
}

#[derive(Clone, Debug)]
pub struct DaughterState {
    pub agent_id: String,
    pub seed: u64,
    pub state: CellState,
}

/// Emitted when a cell divides: the mother's id and both daughters.
#[derive(Clone, Debug)]
pub struct DivisionDirective {
    pub mother: String,
    pub daughters: [DaughterState; 2],
}

pub fn daughter_ids(mother: &str) -> [String; 2] {
    [format!("{mother}0"), format!("{mother}1")]
}

/// Division threshold sampled at birth: `current + expected_increase * N(1, scale)`,
/// seeded from the cell seed so a replay samples the same value.
pub fn sample_threshold(
    current: f64,
    expected_increase: f64,
    scale: f64,
    seed: u64,
) -> Result<f64, DivisionError> {
    let normal =
        Normal::new(1.0, scale).map_err(|_| DivisionError::InvalidThresholdScale(scale))?;
    let mut rng = create_rng(named_seed(seed, DIVISION_SEED_SALT));
    Ok(current + expected_increase * normal.sample(&mut rng))
}

/// Fair-coin partition of fully transcribed RNAs, seeded by their number.
pub fn split_full_transcripts(unique_indices: &[u64]) -> [BTreeSet<u64>; 2] {
    let mut sorted = unique_indices.to_vec();
    sorted.sort_unstable();
    let mut rng = create_rng(sorted.len() as u64);
    let mut halves = [BTreeSet::new(), BTreeSet::new()];
    for id in sorted {
        let side = usize::from(!rng.random::<bool>());
        halves[side].insert(id);
    }
    halves
}

fn int_column<'a>(
    collection: &UniqueCollection,
    data: &'a ColumnData,
    column: &str,
) -> Result<&'a [i64], StoreError> {
    data.as_int().ok_or_else(|| StoreError::ColumnKindMismatch {
        collection: collection.name().to_string(),
        column: column.to_string(),
        expected: ColumnKind::Int,
        found: data.kind(),
    })
}

/// Lazily computed lineage shared by every collection divided in one event.
struct Lineage<'s> {
    state: &'s CellState,
    domain_collection: &'s str,
    domains: Option<DomainMap>,
    /// Per (RNA collection, RNAP collection): daughter of each RNA unique index.
    rnas: HashMap<(String, String), HashMap<u64, Option<Daughter>>>,
}

impl<'s> Lineage<'s> {
    fn new(state: &'s CellState, domain_collection: &'s str) -> Self {
        Self {
            state,
            domain_collection,
            domains: None,
            rnas: HashMap::new(),
        }
    }

    fn collection(&self, name: &str) -> Result<&'s UniqueCollection, DivisionError> {
        self.state
            .collections
            .get(name)
            .ok_or_else(|| DivisionError::MissingCollection(name.to_string()))
    }

    fn domains(&mut self) -> Result<&DomainMap, DivisionError> {
        let map = match self.domains.take() {
            Some(map) => map,
            None => DomainMap::from_collection(self.collection(self.domain_collection)?)?,
        };
        Ok(self.domains.insert(map))
    }

    /// Daughter of each row of `collection`, by its own `domain_index`.
    fn by_domain(
        &mut self,
        collection: &UniqueCollection,
    ) -> Result<Vec<Option<Daughter>>, DivisionError> {
        let data = collection.read_column(DOMAIN_INDEX)?;
        let domains = int_column(collection, &data, DOMAIN_INDEX)?;
        let map = self.domains()?;
        domains
            .iter()
            .map(|&d| map.classify(collection.name(), d))
            .collect()
    }

    fn rna_daughters(
        &mut self,
        rna_collection: &str,
        rnap_collection: &str,
    ) -> Result<&HashMap<u64, Option<Daughter>>, DivisionError> {
        let key = (rna_collection.to_string(), rnap_collection.to_string());
        if !self.rnas.contains_key(&key) {
            let lineage = self.compute_rna_daughters(rna_collection, rnap_collection)?;
            self.rnas.insert(key.clone(), lineage);
        }
        Ok(&self.rnas[&key])
    }

    fn compute_rna_daughters(
        &mut self,
        rna_collection: &str,
        rnap_collection: &str,
    ) -> Result<HashMap<u64, Option<Daughter>>, DivisionError> {
        let rnas = self.collection(rna_collection)?;
        let rnaps = self.collection(rnap_collection)?;

        let rnap_columns = rnaps.read(&[UNIQUE_INDEX, DOMAIN_INDEX])?;
        let rnap_ids = int_column(rnaps, &rnap_columns[0], UNIQUE_INDEX)?;
        let rnap_domains = int_column(rnaps, &rnap_columns[1], DOMAIN_INDEX)?;
        let domain_of_rnap: HashMap<i64, i64> = rnap_ids
            .iter()
            .copied()
            .zip(rnap_domains.iter().copied())
            .collect();

        let rna_columns = rnas.read(&[UNIQUE_INDEX, IS_FULL_TRANSCRIPT, RNAP_INDEX])?;
        let rna_ids = int_column(rnas, &rna_columns[0], UNIQUE_INDEX)?;
        let full = rna_columns[1]
            .as_bool()
            .ok_or_else(|| StoreError::ColumnKindMismatch {
                collection: rnas.name().to_string(),
                column: IS_FULL_TRANSCRIPT.to_string(),
                expected: ColumnKind::Bool,
                found: rna_columns[1].kind(),
            })?;
        let rnap_refs = int_column(rnas, &rna_columns[2], RNAP_INDEX)?;

        let full_ids: Vec<u64> = rna_ids
            .iter()
            .zip(full)
            .filter(|(_, is_full)| **is_full)
            .map(|(&id, _)| id as u64)
            .collect();
        let [first, second] = split_full_transcripts(&full_ids);

        let map = self.domains()?;
        let mut out = HashMap::with_capacity(rna_ids.len());
        for ((&id, &is_full), &rnap) in rna_ids.iter().zip(full).zip(rnap_refs) {
            let id = id as u64;
            let daughter = if is_full {
                if first.contains(&id) {
                    Some(Daughter::First)
                } else {
                    debug_assert!(second.contains(&id));
                    Some(Daughter::Second)
                }
            } else {
                let domain = domain_of_rnap.get(&rnap).copied().ok_or_else(|| {
                    DivisionError::DanglingReference {
                        collection: rna_collection.to_string(),
                        target: rnap_collection.to_string(),
                        index: rnap,
                    }
                })?;
                map.classify(rnap_collection, domain)?
            };
            out.insert(id, daughter);
        }
        Ok(out)
    }

    fn assign(
        &mut self,
        collection: &UniqueCollection,
        divider: &UniqueDivider,
    ) -> Result<Vec<Option<Daughter>>, DivisionError> {
        match divider {
            UniqueDivider::Empty => Ok(vec![None; collection.len()]),
            UniqueDivider::ByDomain => self.by_domain(collection),
            UniqueDivider::Domain => {
                let map = DomainMap::from_collection(collection)?;
                let data = collection.read_column(DOMAIN_INDEX)?;
                Ok(int_column(collection, &data, DOMAIN_INDEX)?
                    .iter()
                    .map(|&d| map.daughter_of(d))
                    .collect())
            }
            UniqueDivider::RnaByDomain { rnap_collection } => {
                let lineage = self.rna_daughters(collection.name(), rnap_collection)?;
                Ok(collection
                    .unique_indices()
                    .iter()
                    .map(|id| lineage.get(id).copied().flatten())
                    .collect())
            }
            UniqueDivider::Ribosomes {
                rna_collection,
                rnap_collection,
            } => {
                let data = collection.read_column(MRNA_INDEX)?;
                let mrnas = int_column(collection, &data, MRNA_INDEX)?.to_vec();
                let lineage = self.rna_daughters(rna_collection, rnap_collection)?;
                mrnas
                    .iter()
                    .map(|&mrna| {
                        // Ribosomes on a partial mRNA whose polymerase sits on
                        // the root domain go to neither daughter.
                        lineage.get(&(mrna as u64)).copied().ok_or_else(|| {
                            DivisionError::DanglingReference {
                                collection: collection.name().to_string(),
                                target: rna_collection.clone(),
                                index: mrna,
                            }
                        })
                    })
                    .collect()
            }
        }
    }
}

/// Split `state` into two daughters of agent `agent_id`.
///
/// Deterministic in `(state, seed)`. Every unique row lands in at most one
/// daughter and keeps its unique index; bulk totals are conserved exactly.
pub fn divide_cell(
    state: &CellState,
    schema: &Schema,
    agent_id: &str,
    seed: u64,
    domain_collection: &str,
) -> Result<[DaughterState; 2], DivisionError> {
    let ids = daughter_ids(agent_id);
    let seeds = [daughter_seed(seed, 0), daughter_seed(seed, 1)];

    let mut first_counts = Vec::with_capacity(state.bulk.len());
    let mut second_counts = Vec::with_capacity(state.bulk.len());
    for (species, &count) in state.bulk.ids().iter().zip(state.bulk.counts()) {
        let (a, b) = crate::schema::binomial_split(count, named_seed(seed, species))?;
        first_counts.push(a);
        second_counts.push(b);
    }
    let bulk = [
        state.bulk.with_counts(first_counts),
        state.bulk.with_counts(second_counts),
    ];

    let mut values = [state.values.clone(), state.values.clone()];
    for (path, entry) in schema.values() {
        let Some(current) = state.values.get_path(path) else {
            continue;
        };
        let split = entry
            .divider
            .divide(current, &entry.default, named_seed(seed, &path.to_string()))?;
        for (target, value) in values.iter_mut().zip(split) {
            target.set_path(path, value)?;
        }
    }

    let mut lineage = Lineage::new(state, domain_collection);
    let mut collections = [Vec::new(), Vec::new()];
    for (name, collection) in &state.collections {
        let divider = match schema.collection(name) {
            Some(declared) => declared.divider.clone(),
            None => {
                warn!(
                    collection = %name,
                    "collection has no declared divider, daughters start empty"
                );
                UniqueDivider::Empty
            }
        };
        let assignment = lineage.assign(collection, &divider)?;
        let active = collection.active_rows();
        let mut rows: [Vec<usize>; 2] = [Vec::new(), Vec::new()];
        for (&row, daughter) in active.iter().zip(&assignment) {
            if let Some(daughter) = daughter {
                rows[daughter.index()].push(row);
            }
        }
        debug!(
            collection = %name,
            first = rows[0].len(),
            second = rows[1].len(),
            neither = active.len() - rows[0].len() - rows[1].len(),
            "divided collection"
        );
        for d in Daughter::BOTH {
            collections[d.index()].push(collection.subset(&rows[d.index()], seeds[d.index()]));
        }
    }

    let [first_bulk, second_bulk] = bulk;
    let [first_values, second_values] = values;
    let [first_collections, second_collections] = collections;
    let build = |agent_id: String, seed: u64, bulk, values, collections: Vec<UniqueCollection>| {
        let mut daughter = CellState {
            time: state.time,
            bulk,
            values,
            ..CellState::default()
        };
        for collection in collections {
            daughter = daughter.with_collection(collection);
        }
        DaughterState {
            agent_id,
            seed,
            state: daughter,
        }
    };
    let [first_id, second_id] = ids;
    Ok([
        build(first_id, seeds[0], first_bulk, first_values, first_collections),
        build(second_id, seeds[1], second_bulk, second_values, second_collections),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::CHILD_DOMAINS;
    use crate::schema::{CollectionSchema, PortsSchema, SchemaEntry, ValueDivider};
    use crate::store::{BulkPool, ColumnSpec};

    const SEED: u64 = 17;

    fn int(name: &str, values: &[i64]) -> (String, ColumnData) {
        (name.to_string(), ColumnData::Int(values.to_vec()))
    }

    fn collection_schema(columns: Vec<ColumnSpec>, divider: UniqueDivider) -> CollectionSchema {
        CollectionSchema {
            columns,
            divider,
            emit: false,
        }
    }

    /// Root 0 with daughter roots 1 and 2; domain 3 under 1.
    fn cell() -> (CellState, Schema) {
        let domain_cols = vec![
            ColumnSpec::new(DOMAIN_INDEX, ColumnKind::Int),
            ColumnSpec::new(CHILD_DOMAINS, ColumnKind::IntVector(2)),
        ];
        let rnap_cols = vec![ColumnSpec::new(DOMAIN_INDEX, ColumnKind::Int)];
        let rna_cols = vec![
            ColumnSpec::new(RNAP_INDEX, ColumnKind::Int),
            ColumnSpec::new(IS_FULL_TRANSCRIPT, ColumnKind::Bool),
        ];
        let ribosome_cols = vec![ColumnSpec::new(MRNA_INDEX, ColumnKind::Int)];

        let mut domains =
            UniqueCollection::new("chromosome_domain", domain_cols.clone(), SEED).unwrap();
        domains
            .create(
                4,
                &[
                    int(DOMAIN_INDEX, &[0, 1, 2, 3]),
                    (
                        CHILD_DOMAINS.to_string(),
                        ColumnData::IntVector {
                            width: 2,
                            data: vec![1, 2, 3, -1, -1, -1, -1, -1],
                        },
                    ),
                ],
            )
            .unwrap();

        // RNAPs 100 (domain 0, root), 101 (domain 3), 102 (domain 2)
        let mut rnaps = UniqueCollection::new("active_RNAP", rnap_cols.clone(), SEED).unwrap();
        rnaps
            .create(
                3,
                &[int(UNIQUE_INDEX, &[100, 101, 102]), int(DOMAIN_INDEX, &[0, 3, 2])],
            )
            .unwrap();

        // RNAs 200..=202 partial on each RNAP, 210..=213 full transcripts
        let mut rnas = UniqueCollection::new("RNA", rna_cols.clone(), SEED).unwrap();
        rnas.create(
            7,
            &[
                int(UNIQUE_INDEX, &[200, 201, 202, 210, 211, 212, 213]),
                int(RNAP_INDEX, &[100, 101, 102, -1, -1, -1, -1]),
                (
                    IS_FULL_TRANSCRIPT.to_string(),
                    ColumnData::Bool(vec![false, false, false, true, true, true, true]),
                ),
            ],
        )
        .unwrap();

        let mut ribosomes =
            UniqueCollection::new("active_ribosome", ribosome_cols.clone(), SEED).unwrap();
        ribosomes
            .create(5, &[int(MRNA_INDEX, &[200, 201, 202, 210, 213])])
            .unwrap();

        let state = CellState::new()
            .with_bulk(BulkPool::new([("ATP", 1001), ("GTP", 7), ("H2O", 0)]).unwrap())
            .with_collection(domains)
            .with_collection(rnaps)
            .with_collection(rnas)
            .with_collection(ribosomes)
            .with_value("listeners/mass/dry_mass", 400.0)
            .unwrap()
            .with_value("boundary/external/glc", 12i64)
            .unwrap();

        let mut schema = Schema::new();
        schema
            .merge(
                "fixture",
                PortsSchema::new()
                    .value(
                        "listeners/mass/dry_mass",
                        SchemaEntry::new(0.0).divider(ValueDivider::Split),
                    )
                    .collection(
                        "chromosome_domain",
                        collection_schema(domain_cols, UniqueDivider::Domain),
                    )
                    .collection(
                        "active_RNAP",
                        collection_schema(rnap_cols, UniqueDivider::ByDomain),
                    )
                    .collection(
                        "RNA",
                        collection_schema(
                            rna_cols,
                            UniqueDivider::RnaByDomain {
                                rnap_collection: "active_RNAP".to_string(),
                            },
                        ),
                    )
                    .collection(
                        "active_ribosome",
                        collection_schema(
                            ribosome_cols,
                            UniqueDivider::Ribosomes {
                                rna_collection: "RNA".to_string(),
                                rnap_collection: "active_RNAP".to_string(),
                            },
                        ),
                    ),
            )
            .unwrap();
        (state, schema)
    }

    fn ids(daughter: &DaughterState, collection: &str) -> Vec<u64> {
        let mut ids = daughter.state.collection(collection).unwrap().unique_indices();
        ids.sort_unstable();
        ids
    }

    #[test]
    fn bulk_totals_are_conserved() {
        let (state, schema) = cell();
        let [a, b] = divide_cell(&state, &schema, "0", SEED, "chromosome_domain").unwrap();
        for (i, &count) in state.bulk.counts().iter().enumerate() {
            assert_eq!(a.state.bulk.counts()[i] + b.state.bulk.counts()[i], count);
        }
    }

    #[test]
    fn division_is_deterministic() {
        let (state, schema) = cell();
        let first = divide_cell(&state, &schema, "0", SEED, "chromosome_domain").unwrap();
        let second = divide_cell(&state, &schema, "0", SEED, "chromosome_domain").unwrap();
        for (x, y) in first.iter().zip(&second) {
            assert_eq!(x.agent_id, y.agent_id);
            assert_eq!(x.seed, y.seed);
            assert_eq!(x.state.bulk, y.state.bulk);
            assert_eq!(x.state.values, y.state.values);
            for name in ["chromosome_domain", "active_RNAP", "RNA", "active_ribosome"] {
                assert_eq!(ids(x, name), ids(y, name));
            }
        }
    }

    #[test]
    fn daughters_get_suffixed_ids_and_distinct_seeds() {
        let (state, schema) = cell();
        let [a, b] = divide_cell(&state, &schema, "0", SEED, "chromosome_domain").unwrap();
        assert_eq!((a.agent_id.as_str(), b.agent_id.as_str()), ("00", "01"));
        assert_ne!(a.seed, b.seed);
    }

    #[test]
    fn domain_bound_rows_follow_their_domain() {
        let (state, schema) = cell();
        let [a, b] = divide_cell(&state, &schema, "0", SEED, "chromosome_domain").unwrap();
        assert_eq!(ids(&a, "active_RNAP"), vec![101]);
        assert_eq!(ids(&b, "active_RNAP"), vec![102]);
        let domains = |d: &DaughterState| {
            let mut v = d
                .state
                .collection("chromosome_domain")
                .unwrap()
                .read_column(DOMAIN_INDEX)
                .unwrap()
                .as_int()
                .unwrap()
                .to_vec();
            v.sort_unstable();
            v
        };
        assert_eq!(domains(&a), vec![1, 3]);
        assert_eq!(domains(&b), vec![2]);
    }

    #[test]
    fn rnas_and_ribosomes_stay_together() {
        let (state, schema) = cell();
        let [a, b] = divide_cell(&state, &schema, "0", SEED, "chromosome_domain").unwrap();
        let full = split_full_transcripts(&[210, 211, 212, 213]);
        let mut expected_a: Vec<u64> = vec![201];
        expected_a.extend(full[0].iter().copied());
        expected_a.sort_unstable();
        assert_eq!(ids(&a, "RNA"), expected_a);
        assert_eq!(ids(&a, "RNA").len() + ids(&b, "RNA").len(), 6);

        for daughter in [&a, &b] {
            let rnas: BTreeSet<i64> = ids(daughter, "RNA").iter().map(|&id| id as i64).collect();
            let mrnas = daughter
                .state
                .collection("active_ribosome")
                .unwrap()
                .read_column(MRNA_INDEX)
                .unwrap();
            for mrna in mrnas.as_int().unwrap() {
                assert!(rnas.contains(mrna), "ribosome on {mrna} lost its mRNA");
            }
        }
    }

    #[test]
    fn rows_on_the_root_domain_go_to_neither_daughter() {
        // RNAP 100 sits on the root domain, so RNA 200 and the ribosome on it
        // are dropped. This loss is accepted for forced-early division.
        let (state, schema) = cell();
        let [a, b] = divide_cell(&state, &schema, "0", SEED, "chromosome_domain").unwrap();
        for daughter in [&a, &b] {
            assert!(!ids(daughter, "active_RNAP").contains(&100));
            assert!(!ids(daughter, "RNA").contains(&200));
        }
        let ribosomes = ids(&a, "active_ribosome").len() + ids(&b, "active_ribosome").len();
        assert_eq!(ribosomes, 4);
    }

    #[test]
    fn plain_values_use_their_divider() {
        let (state, schema) = cell();
        let [a, b] = divide_cell(&state, &schema, "0", SEED, "chromosome_domain").unwrap();
        let mass = "listeners/mass/dry_mass".into();
        assert_eq!(a.state.value(&mass).and_then(|v| v.as_f64()), Some(200.0));
        assert_eq!(b.state.value(&mass).and_then(|v| v.as_f64()), Some(200.0));
        // undeclared values are copied
        let glc = "boundary/external/glc".into();
        assert_eq!(a.state.value(&glc), state.value(&glc));
    }

    #[test]
    fn malformed_tree_aborts_division() {
        let (mut state, schema) = cell();
        let domains = state.collection_mut("chromosome_domain").unwrap();
        // drop daughter root 2, leaving the root with a single present child
        domains
            .apply_update(0, &crate::store::UniqueUpdate::new().delete([2]))
            .unwrap();
        let err = divide_cell(&state, &schema, "0", SEED, "chromosome_domain").unwrap_err();
        assert_eq!(err, DivisionError::DaughterRootCount { found: 1 });
    }

    #[test]
    fn full_transcript_split_is_reproducible_and_complete() {
        let ids = [9, 3, 5, 1, 7];
        let [a, b] = split_full_transcripts(&ids);
        assert_eq!(a.len() + b.len(), ids.len());
        assert!(a.is_disjoint(&b));
        assert_eq!(split_full_transcripts(&[1, 3, 5, 7, 9]), [a, b]);
    }

    #[test]
    fn threshold_sampling_is_seeded() {
        let t1 = sample_threshold(100.0, 50.0, 0.1, 3).unwrap();
        assert_eq!(t1, sample_threshold(100.0, 50.0, 0.1, 3).unwrap());
        assert!(t1 > 100.0);
        assert!(matches!(
            sample_threshold(100.0, 50.0, -1.0, 3),
            Err(DivisionError::InvalidThresholdScale(_))
        ));
    }
}
