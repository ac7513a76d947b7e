use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};

use super::DivisionError;
use crate::constants::{CHILD_DOMAINS, DOMAIN_INDEX};
use crate::store::{ColumnKind, StoreError, UniqueCollection};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Daughter {
    First,
    Second,
}

impl Daughter {
    pub const BOTH: [Daughter; 2] = [Daughter::First, Daughter::Second];

    pub fn index(self) -> usize {
        match self {
            Daughter::First => 0,
            Daughter::Second => 1,
        }
    }
}

/// Which daughter each chromosome domain goes to.
///
/// The root domain is the one no other domain lists as a child; its two
/// children are the daughter roots, the smaller index going to the first
/// daughter. Every domain in a daughter root's subtree follows that root.
/// The root itself and domains outside both subtrees go to neither.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DomainMap {
    root: i64,
    daughter_roots: [i64; 2],
    assignment: HashMap<i64, Option<Daughter>>,
}

impl DomainMap {
    /// Build from `(domain index, child domain indices)` pairs.
    pub fn from_tree(domains: &[(i64, Vec<i64>)]) -> Result<Self, DivisionError> {
        let children: BTreeMap<i64, Vec<i64>> = domains
            .iter()
            .map(|(domain, kids)| (*domain, kids.iter().copied().filter(|&k| k >= 0).collect()))
            .collect();
        let listed: HashSet<i64> = children.values().flatten().copied().collect();
        let roots: Vec<i64> = children
            .keys()
            .copied()
            .filter(|d| !listed.contains(d))
            .collect();
        let [root] = roots[..] else {
            return Err(DivisionError::MalformedDomainTree { roots: roots.len() });
        };

        let mut daughter_roots: Vec<i64> = children[&root]
            .iter()
            .copied()
            .filter(|d| children.contains_key(d))
            .collect();
        daughter_roots.sort_unstable();
        daughter_roots.dedup();
        let [first, second] = daughter_roots[..] else {
            return Err(DivisionError::DaughterRootCount {
                found: daughter_roots.len(),
            });
        };

        let mut assignment: HashMap<i64, Option<Daughter>> =
            children.keys().map(|&d| (d, None)).collect();
        let mut visited = HashSet::from([root]);
        for (start, daughter) in [(first, Daughter::First), (second, Daughter::Second)] {
            let mut queue = VecDeque::from([start]);
            while let Some(domain) = queue.pop_front() {
                if !visited.insert(domain) {
                    continue;
                }
                assignment.insert(domain, Some(daughter));
                if let Some(kids) = children.get(&domain) {
                    queue.extend(kids.iter().copied());
                }
            }
        }

        Ok(Self {
            root,
            daughter_roots: [first, second],
            assignment,
        })
    }

    /// Build from a collection with `domain_index` and `child_domains` columns
    /// (`-1` pads unused child slots).
    pub fn from_collection(domains: &UniqueCollection) -> Result<Self, DivisionError> {
        let columns = domains.read(&[DOMAIN_INDEX, CHILD_DOMAINS])?;
        let kind_error = |column: &str, expected, found| StoreError::ColumnKindMismatch {
            collection: domains.name().to_string(),
            column: column.to_string(),
            expected,
            found,
        };
        let indices = columns[0].as_int().ok_or_else(|| {
            kind_error(DOMAIN_INDEX, ColumnKind::Int, columns[0].kind())
        })?;
        let (width, children) = columns[1].as_int_vector().ok_or_else(|| {
            // width is unknown when the column has the wrong kind
            kind_error(CHILD_DOMAINS, ColumnKind::IntVector(0), columns[1].kind())
        })?;
        let tree: Vec<(i64, Vec<i64>)> = indices
            .iter()
            .enumerate()
            .map(|(row, &domain)| (domain, children[row * width..(row + 1) * width].to_vec()))
            .collect();
        Self::from_tree(&tree)
    }

    pub fn root(&self) -> i64 {
        self.root
    }

    pub fn daughter_roots(&self) -> [i64; 2] {
        self.daughter_roots
    }

    pub fn contains(&self, domain: i64) -> bool {
        self.assignment.contains_key(&domain)
    }

    /// `None` for the root, unassigned domains and domains outside the tree.
    pub fn daughter_of(&self, domain: i64) -> Option<Daughter> {
        self.assignment.get(&domain).copied().flatten()
    }

    /// Like [`DomainMap::daughter_of`], but a domain outside the tree is an
    /// error naming the collection that referenced it.
    pub fn classify(
        &self,
        collection: &str,
        domain: i64,
    ) -> Result<Option<Daughter>, DivisionError> {
        if !self.contains(domain) {
            return Err(DivisionError::UnknownDomain {
                collection: collection.to_string(),
                domain,
            });
        }
        Ok(self.daughter_of(domain))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_descendants_under_their_daughter_root() {
        let map = DomainMap::from_tree(&[
            (0, vec![1, 2]),
            (1, vec![3, -1]),
            (2, vec![-1, -1]),
            (3, vec![]),
        ])
        .unwrap();
        assert_eq!(map.root(), 0);
        assert_eq!(map.daughter_roots(), [1, 2]);
        assert_eq!(map.daughter_of(3), Some(Daughter::First));
        assert_eq!(map.daughter_of(2), Some(Daughter::Second));
        assert_eq!(map.daughter_of(0), None);
        assert!(map.contains(0));
        assert!(!map.contains(9));
    }

    #[test]
    fn smaller_daughter_root_goes_first() {
        let map = DomainMap::from_tree(&[(4, vec![7, 5]), (5, vec![]), (7, vec![])]).unwrap();
        assert_eq!(map.daughter_roots(), [5, 7]);
        assert_eq!(map.daughter_of(7), Some(Daughter::Second));
    }

    #[test]
    fn root_with_one_child_is_fatal() {
        let err = DomainMap::from_tree(&[(0, vec![1]), (1, vec![])]).unwrap_err();
        assert_eq!(err, DivisionError::DaughterRootCount { found: 1 });
    }

    #[test]
    fn forest_is_fatal() {
        let err = DomainMap::from_tree(&[(0, vec![]), (1, vec![])]).unwrap_err();
        assert_eq!(err, DivisionError::MalformedDomainTree { roots: 2 });
    }

    #[test]
    fn unknown_domain_names_the_collection() {
        let map = DomainMap::from_tree(&[(0, vec![1, 2]), (1, vec![]), (2, vec![])]).unwrap();
        assert_eq!(
            map.classify("active_RNAP", 12),
            Err(DivisionError::UnknownDomain {
                collection: "active_RNAP".to_string(),
                domain: 12
            })
        );
        assert_eq!(map.classify("active_RNAP", 0), Ok(None));
        assert_eq!(map.classify("active_RNAP", 2), Ok(map.daughter_of(2)));
        assert!(map.daughter_of(2).is_some());
    }
}
