use std::collections::HashMap;

use super::StoreError;

/// Named molecule species with one integer count each.
///
/// Species are addressed by their position after construction; processes
/// resolve names to positions once and then work on dense count vectors.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BulkPool {
    ids: Vec<String>,
    counts: Vec<i64>,
    index: HashMap<String, usize>,
}

impl BulkPool {
    pub fn new<S: Into<String>>(
        species: impl IntoIterator<Item = (S, i64)>,
    ) -> Result<Self, StoreError> {
        let mut pool = Self::default();
        for (id, count) in species {
            let id = id.into();
            if count < 0 {
                return Err(StoreError::NegativeCount { species: id, count });
            }
            if pool.index.contains_key(&id) {
                return Err(StoreError::DuplicateSpecies(id));
            }
            pool.index.insert(id.clone(), pool.ids.len());
            pool.ids.push(id);
            pool.counts.push(count);
        }
        Ok(pool)
    }

    /// Register `id` with a zero count if absent; returns its position.
    pub fn ensure_species(&mut self, id: &str) -> usize {
        if let Some(&idx) = self.index.get(id) {
            return idx;
        }
        let idx = self.ids.len();
        self.index.insert(id.to_string(), idx);
        self.ids.push(id.to_string());
        self.counts.push(0);
        idx
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    pub fn counts(&self) -> &[i64] {
        &self.counts
    }

    pub fn index_of(&self, id: &str) -> Result<usize, StoreError> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| StoreError::UnknownSpecies(id.to_string()))
    }

    pub fn indices_of<S: AsRef<str>>(&self, ids: &[S]) -> Result<Vec<usize>, StoreError> {
        ids.iter().map(|id| self.index_of(id.as_ref())).collect()
    }

    pub fn count(&self, id: &str) -> Result<i64, StoreError> {
        Ok(self.counts[self.index_of(id)?])
    }

    pub fn total(&self) -> i64 {
        self.counts.iter().sum()
    }

    /// Apply `(species position, delta)` pairs atomically: if any count would
    /// drop below zero nothing is applied.
    pub fn apply(&mut self, deltas: &[(usize, i64)]) -> Result<(), StoreError> {
        let mut next = self.counts.clone();
        for &(idx, delta) in deltas {
            let slot = next
                .get_mut(idx)
                .ok_or(StoreError::SpeciesIndexOutOfRange {
                    index: idx,
                    len: self.counts.len(),
                })?;
            *slot += delta;
        }
        if let Some(idx) = next.iter().position(|&c| c < 0) {
            return Err(StoreError::NegativeCount {
                species: self.ids[idx].clone(),
                count: next[idx],
            });
        }
        self.counts = next;
        Ok(())
    }

    /// Same species, different counts (daughter pools).
    pub fn with_counts(&self, counts: Vec<i64>) -> Self {
        debug_assert_eq!(counts.len(), self.ids.len());
        Self {
            ids: self.ids.clone(),
            counts,
            index: self.index.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> BulkPool {
        BulkPool::new([("ATP", 100), ("GTP", 5), ("H2O", 0)]).unwrap()
    }

    #[test]
    fn apply_is_additive() {
        let mut p = pool();
        p.apply(&[(0, -40), (0, -10), (2, 3)]).unwrap();
        assert_eq!(p.counts(), &[50, 5, 3]);
    }

    #[test]
    fn overdraft_is_rejected_without_partial_application() {
        let mut p = pool();
        let err = p.apply(&[(0, -1), (1, -6)]).unwrap_err();
        assert_eq!(
            err,
            StoreError::NegativeCount {
                species: "GTP".to_string(),
                count: -1
            }
        );
        assert_eq!(p.counts(), &[100, 5, 0]);
    }

    #[test]
    fn construction_rejects_duplicates_and_negatives() {
        assert!(matches!(
            BulkPool::new([("A", 1), ("A", 2)]),
            Err(StoreError::DuplicateSpecies(_))
        ));
        assert!(matches!(
            BulkPool::new([("A", -1)]),
            Err(StoreError::NegativeCount { .. })
        ));
    }

    #[test]
    fn names_resolve_to_positions() {
        let mut p = pool();
        assert_eq!(p.indices_of(&["H2O", "ATP"]).unwrap(), vec![2, 0]);
        assert!(matches!(p.index_of("CTP"), Err(StoreError::UnknownSpecies(_))));
        assert_eq!(p.ensure_species("CTP"), 3);
        assert_eq!(p.ensure_species("ATP"), 0);
        assert_eq!(p.total(), 105);
    }
}
