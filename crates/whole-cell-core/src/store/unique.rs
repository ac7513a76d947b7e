//! Structure-of-arrays arena for unique entities (polymerases, ribosomes, RNAs,
//! chromosome domains).
//!
//! Rows live in fixed slots addressed by absolute position. Deleting a row
//! only clears its entry flag and returns the slot to the free list, so slots
//! of live rows never move and unique indices stay attached to the same data.
//! All cross-entity references use unique indices, never slot positions.

use std::collections::{BTreeSet, HashMap, HashSet};

use rand::Rng;
use rand_chacha::ChaCha12Rng;
use serde::{Deserialize, Serialize};

use super::StoreError;
use crate::constants::{MIN_GROWTH_FRACTION, UNIQUE_INDEX, UNIQUE_INDEX_SPACE};
use crate::rng::{create_rng, named_seed};

const ENTRY_INACTIVE: u8 = 0;
const ENTRY_ACTIVE: u8 = 1;
/// Cached-state marker for rows deleted since the timestep began.
const CACHED_DELETED: u8 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnKind {
    Int,
    Float,
    Bool,
    /// Fixed-width float vector per row, e.g. the submass vector.
    Vector(usize),
    /// Fixed-width integer vector per row, e.g. child domain references.
    IntVector(usize),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    pub kind: ColumnKind,
}

impl ColumnSpec {
    pub fn new(name: impl Into<String>, kind: ColumnKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

/// One column's values. Vector kinds are stored row-major.
#[derive(Clone, Debug, PartialEq)]
pub enum ColumnData {
    Int(Vec<i64>),
    Float(Vec<f64>),
    Bool(Vec<bool>),
    Vector { width: usize, data: Vec<f64> },
    IntVector { width: usize, data: Vec<i64> },
}

impl ColumnData {
    pub fn zeros(kind: ColumnKind, rows: usize) -> Self {
        match kind {
            ColumnKind::Int => ColumnData::Int(vec![0; rows]),
            ColumnKind::Float => ColumnData::Float(vec![0.0; rows]),
            ColumnKind::Bool => ColumnData::Bool(vec![false; rows]),
            ColumnKind::Vector(width) => ColumnData::Vector {
                width,
                data: vec![0.0; rows * width],
            },
            ColumnKind::IntVector(width) => ColumnData::IntVector {
                width,
                data: vec![0; rows * width],
            },
        }
    }

    pub fn kind(&self) -> ColumnKind {
        match self {
            ColumnData::Int(_) => ColumnKind::Int,
            ColumnData::Float(_) => ColumnKind::Float,
            ColumnData::Bool(_) => ColumnKind::Bool,
            ColumnData::Vector { width, .. } => ColumnKind::Vector(*width),
            ColumnData::IntVector { width, .. } => ColumnKind::IntVector(*width),
        }
    }

    /// Number of rows held.
    pub fn len(&self) -> usize {
        match self {
            ColumnData::Int(v) => v.len(),
            ColumnData::Float(v) => v.len(),
            ColumnData::Bool(v) => v.len(),
            ColumnData::Vector { width, data } => data.len().checked_div(*width).unwrap_or(0),
            ColumnData::IntVector { width, data } => {
                data.len().checked_div(*width).unwrap_or(0)
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Vector columns must hold a whole number of rows.
    fn is_ragged(&self) -> bool {
        match self {
            ColumnData::Vector { width, data } => *width == 0 || data.len() % width != 0,
            ColumnData::IntVector { width, data } => *width == 0 || data.len() % width != 0,
            _ => false,
        }
    }

    pub fn as_int(&self) -> Option<&[i64]> {
        match self {
            ColumnData::Int(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<&[f64]> {
        match self {
            ColumnData::Float(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<&[bool]> {
        match self {
            ColumnData::Bool(v) => Some(v),
            _ => None,
        }
    }

    /// `(width, row-major data)` of a float vector column.
    pub fn as_vector(&self) -> Option<(usize, &[f64])> {
        match self {
            ColumnData::Vector { width, data } => Some((*width, data)),
            _ => None,
        }
    }

    pub fn as_int_vector(&self) -> Option<(usize, &[i64])> {
        match self {
            ColumnData::IntVector { width, data } => Some((*width, data)),
            _ => None,
        }
    }

    /// Values of `rows`, in the given order.
    pub fn gather(&self, rows: &[usize]) -> ColumnData {
        fn pick<T: Copy>(data: &[T], width: usize, rows: &[usize]) -> Vec<T> {
            rows.iter()
                .flat_map(|&r| data[r * width..(r + 1) * width].iter().copied())
                .collect()
        }
        match self {
            ColumnData::Int(v) => ColumnData::Int(pick(v, 1, rows)),
            ColumnData::Float(v) => ColumnData::Float(pick(v, 1, rows)),
            ColumnData::Bool(v) => ColumnData::Bool(pick(v, 1, rows)),
            ColumnData::Vector { width, data } => ColumnData::Vector {
                width: *width,
                data: pick(data, *width, rows),
            },
            ColumnData::IntVector { width, data } => ColumnData::IntVector {
                width: *width,
                data: pick(data, *width, rows),
            },
        }
    }

    /// Overwrite row `row` with row `src_row` of `src`. Kinds must match.
    fn copy_row(&mut self, row: usize, src: &ColumnData, src_row: usize) {
        fn copy<T: Copy>(dst: &mut [T], src: &[T], width: usize, row: usize, src_row: usize) {
            dst[row * width..(row + 1) * width]
                .copy_from_slice(&src[src_row * width..(src_row + 1) * width]);
        }
        match (self, src) {
            (ColumnData::Int(d), ColumnData::Int(s)) => copy(d, s, 1, row, src_row),
            (ColumnData::Float(d), ColumnData::Float(s)) => copy(d, s, 1, row, src_row),
            (ColumnData::Bool(d), ColumnData::Bool(s)) => copy(d, s, 1, row, src_row),
            (ColumnData::Vector { width, data: d }, ColumnData::Vector { data: s, .. }) => {
                copy(d, s, *width, row, src_row)
            }
            (
                ColumnData::IntVector { width, data: d },
                ColumnData::IntVector { data: s, .. },
            ) => copy(d, s, *width, row, src_row),
            (dst, src) => debug_assert!(false, "{:?} <- {:?}", dst.kind(), src.kind()),
        }
    }

    fn zero_row(&mut self, row: usize) {
        match self {
            ColumnData::Int(v) => v[row] = 0,
            ColumnData::Float(v) => v[row] = 0.0,
            ColumnData::Bool(v) => v[row] = false,
            ColumnData::Vector { width, data } => {
                data[row * *width..(row + 1) * *width].fill(0.0)
            }
            ColumnData::IntVector { width, data } => {
                data[row * *width..(row + 1) * *width].fill(0)
            }
        }
    }

    fn grow(&mut self, extra: usize) {
        match self {
            ColumnData::Int(v) => v.resize(v.len() + extra, 0),
            ColumnData::Float(v) => v.resize(v.len() + extra, 0.0),
            ColumnData::Bool(v) => v.resize(v.len() + extra, false),
            ColumnData::Vector { width, data } => data.resize(data.len() + extra * *width, 0.0),
            ColumnData::IntVector { width, data } => data.resize(data.len() + extra * *width, 0),
        }
    }
}

/// Rows to create; every listed column carries exactly `count` rows.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct AddRows {
    pub count: usize,
    pub columns: Vec<(String, ColumnData)>,
}

/// One process's mutation of one collection.
///
/// `set` arrays and `delete` positions index the rows that were active when
/// the timestep began (ascending slot order), which is exactly the order a
/// process saw when it called [`UniqueCollection::read`] during the timestep.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct UniqueUpdate {
    pub set: Vec<(String, ColumnData)>,
    pub delete: Vec<usize>,
    pub add: Vec<AddRows>,
}

impl UniqueUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, column: impl Into<String>, values: ColumnData) -> Self {
        self.set.push((column.into(), values));
        self
    }

    pub fn delete(mut self, positions: impl IntoIterator<Item = usize>) -> Self {
        self.delete.extend(positions);
        self
    }

    pub fn add(mut self, count: usize, columns: Vec<(String, ColumnData)>) -> Self {
        self.add.push(AddRows { count, columns });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty() && self.delete.is_empty() && self.add.iter().all(|a| a.count == 0)
    }
}

#[derive(Clone, Debug)]
pub struct UniqueCollection {
    name: String,
    specs: Vec<ColumnSpec>,
    columns: Vec<ColumnData>,
    unique_index: Vec<u64>,
    entry_state: Vec<u8>,
    cached_entry_state: Vec<u8>,
    /// Timestep the cached snapshot belongs to.
    cache_epoch: Option<u64>,
    free: BTreeSet<usize>,
    lookup: HashMap<u64, usize>,
    rng: ChaCha12Rng,
    growth_fraction: f64,
}

impl UniqueCollection {
    pub fn new(
        name: impl Into<String>,
        specs: Vec<ColumnSpec>,
        seed: u64,
    ) -> Result<Self, StoreError> {
        let name = name.into();
        let mut seen = HashSet::new();
        for spec in &specs {
            if spec.name == UNIQUE_INDEX {
                return Err(StoreError::ReservedColumn(spec.name.clone()));
            }
            if !seen.insert(spec.name.as_str()) {
                return Err(StoreError::DuplicateColumn {
                    collection: name,
                    column: spec.name.clone(),
                });
            }
        }
        let columns = specs.iter().map(|s| ColumnData::zeros(s.kind, 0)).collect();
        let rng = create_rng(named_seed(seed, &name));
        Ok(Self {
            name,
            specs,
            columns,
            unique_index: Vec::new(),
            entry_state: Vec::new(),
            cached_entry_state: Vec::new(),
            cache_epoch: None,
            free: BTreeSet::new(),
            lookup: HashMap::new(),
            rng,
            growth_fraction: MIN_GROWTH_FRACTION,
        })
    }

    /// Grow by this fraction of the current capacity when out of free rows.
    /// Fractions below [`MIN_GROWTH_FRACTION`] are raised to it.
    pub fn with_growth_fraction(mut self, fraction: f64) -> Self {
        self.set_growth_fraction(fraction);
        self
    }

    pub fn set_growth_fraction(&mut self, fraction: f64) {
        self.growth_fraction = if fraction.is_finite() {
            fraction.max(MIN_GROWTH_FRACTION)
        } else {
            MIN_GROWTH_FRACTION
        };
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn specs(&self) -> &[ColumnSpec] {
        &self.specs
    }

    /// Number of active rows.
    pub fn len(&self) -> usize {
        self.lookup.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lookup.is_empty()
    }

    /// Number of row slots, active or not.
    pub fn capacity(&self) -> usize {
        self.entry_state.len()
    }

    /// Absolute slots of active rows, ascending.
    pub fn active_rows(&self) -> Vec<usize> {
        (0..self.capacity())
            .filter(|&r| self.entry_state[r] == ENTRY_ACTIVE)
            .collect()
    }

    /// Unique indices of active rows, in read order.
    pub fn unique_indices(&self) -> Vec<u64> {
        self.active_rows()
            .into_iter()
            .map(|r| self.unique_index[r])
            .collect()
    }

    /// Slot of the active row carrying `unique_index`.
    pub fn lookup(&self, unique_index: u64) -> Option<usize> {
        self.lookup.get(&unique_index).copied()
    }

    fn column_position(&self, column: &str) -> Result<usize, StoreError> {
        self.specs
            .iter()
            .position(|s| s.name == column)
            .ok_or_else(|| StoreError::UnknownColumn {
                collection: self.name.clone(),
                column: column.to_string(),
            })
    }

    /// Active-row values of each named column. `unique_index` reads as an `Int` column.
    pub fn read(&self, columns: &[&str]) -> Result<Vec<ColumnData>, StoreError> {
        let rows = self.active_rows();
        columns
            .iter()
            .map(|&column| {
                if column == UNIQUE_INDEX {
                    Ok(ColumnData::Int(
                        rows.iter().map(|&r| self.unique_index[r] as i64).collect(),
                    ))
                } else {
                    let pos = self.column_position(column)?;
                    Ok(self.columns[pos].gather(&rows))
                }
            })
            .collect()
    }

    pub fn read_column(&self, column: &str) -> Result<ColumnData, StoreError> {
        let mut out = self.read(&[column])?;
        Ok(out.swap_remove(0))
    }

    /// Activate `count` fresh rows initialized from `values`; returns their unique indices.
    pub fn create(
        &mut self,
        count: usize,
        values: &[(String, ColumnData)],
    ) -> Result<Vec<u64>, StoreError> {
        let explicit = self.validate_add(count, values)?;
        Ok(self.create_unchecked(count, values, explicit))
    }

    /// Check an add batch and return its explicit unique indices, if any.
    fn validate_add(
        &self,
        count: usize,
        values: &[(String, ColumnData)],
    ) -> Result<Option<Vec<u64>>, StoreError> {
        let mut explicit = None;
        for (column, data) in values {
            self.check_length(column, data, count)?;
            if column == UNIQUE_INDEX {
                let ids = data.as_int().ok_or_else(|| StoreError::ColumnKindMismatch {
                    collection: self.name.clone(),
                    column: column.clone(),
                    expected: ColumnKind::Int,
                    found: data.kind(),
                })?;
                let mut batch = HashSet::new();
                for &id in ids {
                    let id = id as u64;
                    if id >= UNIQUE_INDEX_SPACE || self.lookup.contains_key(&id) || !batch.insert(id)
                    {
                        return Err(StoreError::DuplicateUniqueIndex {
                            collection: self.name.clone(),
                            index: id,
                        });
                    }
                }
                explicit = Some(ids.iter().map(|&id| id as u64).collect());
            } else {
                self.check_kind(column, data)?;
            }
        }
        Ok(explicit)
    }

    fn check_kind(&self, column: &str, data: &ColumnData) -> Result<usize, StoreError> {
        let pos = self.column_position(column)?;
        let expected = self.specs[pos].kind;
        if data.kind() != expected {
            return Err(StoreError::ColumnKindMismatch {
                collection: self.name.clone(),
                column: column.to_string(),
                expected,
                found: data.kind(),
            });
        }
        Ok(pos)
    }

    fn check_length(&self, column: &str, data: &ColumnData, rows: usize) -> Result<(), StoreError> {
        if data.is_ragged() || data.len() != rows {
            return Err(StoreError::LengthMismatch {
                collection: self.name.clone(),
                column: column.to_string(),
                expected: rows,
                found: data.len(),
            });
        }
        Ok(())
    }

    fn grow(&mut self, needed: usize) {
        let capacity = self.capacity();
        let shortfall = needed.saturating_sub(self.free.len());
        if shortfall == 0 {
            return;
        }
        let extra = ((capacity as f64 * self.growth_fraction).floor() as usize).max(shortfall);
        for column in &mut self.columns {
            column.grow(extra);
        }
        self.unique_index.resize(capacity + extra, 0);
        self.entry_state.resize(capacity + extra, ENTRY_INACTIVE);
        self.cached_entry_state.resize(capacity + extra, ENTRY_INACTIVE);
        self.free.extend(capacity..capacity + extra);
    }

    fn fresh_index(&mut self, taken: &HashSet<u64>) -> u64 {
        loop {
            let candidate = self.rng.random_range(0..UNIQUE_INDEX_SPACE);
            if !self.lookup.contains_key(&candidate) && !taken.contains(&candidate) {
                return candidate;
            }
        }
    }

    fn create_unchecked(
        &mut self,
        count: usize,
        values: &[(String, ColumnData)],
        explicit: Option<Vec<u64>>,
    ) -> Vec<u64> {
        self.grow(count);
        let rows: Vec<usize> = self.free.iter().take(count).copied().collect();
        let sources: Vec<(usize, &ColumnData)> = values
            .iter()
            .filter(|(column, _)| column != UNIQUE_INDEX)
            .filter_map(|(column, data)| {
                self.specs
                    .iter()
                    .position(|s| s.name == *column)
                    .map(|pos| (pos, data))
            })
            .collect();

        let mut taken = HashSet::with_capacity(count);
        let mut ids = Vec::with_capacity(count);
        for (i, &row) in rows.iter().enumerate() {
            self.free.remove(&row);
            for column in &mut self.columns {
                column.zero_row(row);
            }
            for &(pos, data) in &sources {
                self.columns[pos].copy_row(row, data, i);
            }
            let id = match &explicit {
                Some(explicit) => explicit[i],
                None => self.fresh_index(&taken),
            };
            taken.insert(id);
            self.unique_index[row] = id;
            self.entry_state[row] = ENTRY_ACTIVE;
            self.lookup.insert(id, row);
            ids.push(id);
        }
        ids
    }

    /// Snapshot entry states if this is the first update of `epoch`.
    fn refresh_cache(&mut self, epoch: u64) {
        if self.cache_epoch != Some(epoch) {
            self.cached_entry_state.clone_from(&self.entry_state);
            self.cache_epoch = Some(epoch);
        }
    }

    /// Apply `{set, delete, add}` in that order. The update is validated in
    /// full first, so a rejected update leaves the collection untouched.
    pub fn apply_update(&mut self, epoch: u64, update: &UniqueUpdate) -> Result<(), StoreError> {
        self.refresh_cache(epoch);
        let started: Vec<usize> = (0..self.capacity())
            .filter(|&r| self.cached_entry_state[r] != ENTRY_INACTIVE)
            .collect();

        let mut set_targets = Vec::with_capacity(update.set.len());
        for (column, data) in &update.set {
            let pos = self.check_kind(column, data)?;
            self.check_length(column, data, started.len())?;
            set_targets.push((pos, data));
        }
        if let Some(&position) = update.delete.iter().find(|&&p| p >= started.len()) {
            return Err(StoreError::RowOutOfRange {
                collection: self.name.clone(),
                position,
                active: started.len(),
            });
        }
        let mut explicit = Vec::with_capacity(update.add.len());
        for add in &update.add {
            explicit.push(self.validate_add(add.count, &add.columns)?);
        }

        for (pos, data) in set_targets {
            for (i, &row) in started.iter().enumerate() {
                if self.cached_entry_state[row] == ENTRY_ACTIVE {
                    self.columns[pos].copy_row(row, data, i);
                }
            }
        }
        for &position in &update.delete {
            let row = started[position];
            if self.cached_entry_state[row] != ENTRY_ACTIVE {
                continue;
            }
            self.entry_state[row] = ENTRY_INACTIVE;
            self.cached_entry_state[row] = CACHED_DELETED;
            self.lookup.remove(&self.unique_index[row]);
            self.free.insert(row);
        }
        for (add, explicit) in update.add.iter().zip(explicit) {
            self.create_unchecked(add.count, &add.columns, explicit);
        }
        Ok(())
    }

    /// A new collection holding only `rows` (absolute slots, in the given
    /// order) as contiguous active rows. Unique indices are kept; the index
    /// sampler is reseeded from `seed`.
    pub fn subset(&self, rows: &[usize], seed: u64) -> UniqueCollection {
        let columns = self.columns.iter().map(|c| c.gather(rows)).collect();
        let unique_index: Vec<u64> = rows.iter().map(|&r| self.unique_index[r]).collect();
        let lookup = unique_index
            .iter()
            .enumerate()
            .map(|(row, &id)| (id, row))
            .collect();
        UniqueCollection {
            name: self.name.clone(),
            specs: self.specs.clone(),
            columns,
            unique_index,
            entry_state: vec![ENTRY_ACTIVE; rows.len()],
            cached_entry_state: vec![ENTRY_ACTIVE; rows.len()],
            cache_epoch: None,
            free: BTreeSet::new(),
            lookup,
            rng: create_rng(named_seed(seed, &self.name)),
            growth_fraction: self.growth_fraction,
        }
    }

    /// Drop inactive slots, keeping active row order and the index sampler state.
    pub fn compact(&mut self) {
        let rows = self.active_rows();
        let rng = self.rng.clone();
        *self = UniqueCollection {
            rng,
            ..self.subset(&rows, 0)
        };
    }
}
