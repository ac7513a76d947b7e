//! Cell state: the bulk pool, unique collections and plain values, plus the
//! read-only view processes receive.

pub mod bulk;
pub mod unique;

use std::collections::BTreeMap;

pub use bulk::BulkPool;
pub use unique::{AddRows, ColumnData, ColumnKind, ColumnSpec, UniqueCollection, UniqueUpdate};

use crate::value::{StatePath, Value, ValueError};

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum StoreError {
    #[error("collection `{collection}` has no column `{column}`")]
    UnknownColumn { collection: String, column: String },
    #[error("collection `{collection}` column `{column}` is {expected:?}, got {found:?}")]
    ColumnKindMismatch {
        collection: String,
        column: String,
        expected: ColumnKind,
        found: ColumnKind,
    },
    #[error("collection `{collection}` column `{column}` expects {expected} rows, got {found}")]
    LengthMismatch {
        collection: String,
        column: String,
        expected: usize,
        found: usize,
    },
    #[error("collection `{collection}` had {active} rows at timestep start, cannot address row {position}")]
    RowOutOfRange {
        collection: String,
        position: usize,
        active: usize,
    },
    #[error("collection `{collection}` already holds unique index {index}")]
    DuplicateUniqueIndex { collection: String, index: u64 },
    #[error("collection `{collection}` declares column `{column}` twice")]
    DuplicateColumn { collection: String, column: String },
    #[error("column name `{0}` is reserved")]
    ReservedColumn(String),
    #[error("unknown bulk species `{0}`")]
    UnknownSpecies(String),
    #[error("bulk species `{0}` declared twice")]
    DuplicateSpecies(String),
    #[error("bulk species `{species}` would drop to {count}")]
    NegativeCount { species: String, count: i64 },
    #[error("bulk species position {index} out of range for {len} species")]
    SpeciesIndexOutOfRange { index: usize, len: usize },
    #[error("unknown collection `{0}`")]
    UnknownCollection(String),
}

/// Everything one cell owns.
#[derive(Clone, Debug)]
pub struct CellState {
    pub time: f64,
    pub bulk: BulkPool,
    pub collections: BTreeMap<String, UniqueCollection>,
    pub values: Value,
}

impl Default for CellState {
    fn default() -> Self {
        Self {
            time: 0.0,
            bulk: BulkPool::default(),
            collections: BTreeMap::new(),
            values: Value::empty_map(),
        }
    }
}

impl CellState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bulk(mut self, bulk: BulkPool) -> Self {
        self.bulk = bulk;
        self
    }

    pub fn with_collection(mut self, collection: UniqueCollection) -> Self {
        self.collections
            .insert(collection.name().to_string(), collection);
        self
    }

    pub fn with_value(
        mut self,
        path: impl Into<StatePath>,
        value: impl Into<Value>,
    ) -> Result<Self, ValueError> {
        self.values.set_path(&path.into(), value.into())?;
        Ok(self)
    }

    pub fn collection(&self, name: &str) -> Result<&UniqueCollection, StoreError> {
        self.collections
            .get(name)
            .ok_or_else(|| StoreError::UnknownCollection(name.to_string()))
    }

    pub fn collection_mut(&mut self, name: &str) -> Result<&mut UniqueCollection, StoreError> {
        self.collections
            .get_mut(name)
            .ok_or_else(|| StoreError::UnknownCollection(name.to_string()))
    }

    pub fn value(&self, path: &StatePath) -> Option<&Value> {
        self.values.get_path(path)
    }
}

/// Read-only view handed to processes.
///
/// During EVOLVE a partitioned process sees its own allocation in place of
/// the bulk counts; everything else is the pre-merge state of the timestep.
#[derive(Clone, Copy, Debug)]
pub struct StateView<'a> {
    state: &'a CellState,
    bulk: &'a [i64],
    evolvers_ran: bool,
}

impl<'a> StateView<'a> {
    pub fn new(state: &'a CellState, bulk: &'a [i64], evolvers_ran: bool) -> Self {
        Self {
            state,
            bulk,
            evolvers_ran,
        }
    }

    /// View with the full bulk pool.
    pub fn full(state: &'a CellState, evolvers_ran: bool) -> Self {
        Self::new(state, state.bulk.counts(), evolvers_ran)
    }

    pub fn time(&self) -> f64 {
        self.state.time
    }

    pub fn bulk_counts(&self) -> &'a [i64] {
        self.bulk
    }

    pub fn bulk_count(&self, species: usize) -> i64 {
        self.bulk.get(species).copied().unwrap_or(0)
    }

    pub fn species_index(&self, id: &str) -> Result<usize, StoreError> {
        self.state.bulk.index_of(id)
    }

    pub fn species_ids(&self) -> &'a [String] {
        self.state.bulk.ids()
    }

    pub fn collection(&self, name: &str) -> Result<&'a UniqueCollection, StoreError> {
        self.state.collection(name)
    }

    pub fn value(&self, path: &StatePath) -> Option<&'a Value> {
        self.state.values.get_path(path)
    }

    pub fn value_f64(&self, path: &StatePath) -> Option<f64> {
        self.value(path).and_then(Value::as_f64)
    }

    /// True once every evolver of the current timestep has been merged.
    pub fn evolvers_ran(&self) -> bool {
        self.evolvers_ran
    }
}
