//! Updater and divider disciplines, and the per-path schema registry built from
//! every process's declared ports.
//!
//! The registry is assembled once when an engine is built and then only read.
//! Each updater kind carries its forward and inverse function side by side in
//! one `match`, so a kind without an inverse cannot exist.

use std::collections::{BTreeMap, BTreeSet};

use rand_distr::{Binomial, Distribution};

use crate::constants::RAND_MAX;
use crate::division::UniqueDivider;
use crate::rng::{create_rng, named_seed};
use crate::store::unique::ColumnSpec;
use crate::value::{StatePath, Value, ValueError};

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum SchemaError {
    #[error(transparent)]
    Value(#[from] ValueError),
    #[error("{updater} updater expects a {expected} value, found {found}")]
    TypeMismatch {
        updater: &'static str,
        expected: &'static str,
        found: &'static str,
    },
    #[error("cannot add `{0}`, already in state")]
    DuplicateKey(String),
    #[error("added state has keys not in defaults: {0:?}")]
    UnknownKeys(Vec<String>),
    #[error("malformed `{field}` entry: {reason}")]
    MalformedDictUpdate { field: &'static str, reason: String },
    #[error("`{owner}` declares {target} inconsistently with an earlier declaration")]
    Conflict { owner: String, target: String },
    #[error("no schema declared for {0}")]
    UndeclaredPath(StatePath),
    #[error("cannot divide negative count {0}")]
    NegativeCount(i64),
    #[error("{divider} divider cannot split a {kind} value")]
    Indivisible {
        divider: &'static str,
        kind: &'static str,
    },
    #[error("binomial distribution rejected n={0}")]
    Distribution(i64),
}

/// How an update message for a path is folded into the current value.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum Updater {
    /// Replace wholesale.
    Set,
    /// Add numbers and arrays; merge-add maps.
    #[default]
    Accumulate,
    /// Map of named records driven by `_add` / `_delete` keys; every record is
    /// the declared defaults overlaid with its supplied fields.
    DictValue { defaults: BTreeMap<String, Value> },
}

impl Updater {
    pub fn name(&self) -> &'static str {
        match self {
            Updater::Set => "set",
            Updater::Accumulate => "accumulate",
            Updater::DictValue { .. } => "dict_value",
        }
    }

    pub fn apply(&self, current: &Value, update: &Value) -> Result<Value, SchemaError> {
        match self {
            Updater::Set => Ok(update.clone()),
            Updater::Accumulate => Ok(current.add(update)?),
            Updater::DictValue { defaults } => apply_dict_value(defaults, current, update),
        }
    }

    /// The update that, applied by [`Updater::apply`] to `before`, yields `after`.
    pub fn invert(&self, before: &Value, after: &Value) -> Result<Value, SchemaError> {
        match self {
            Updater::Set => Ok(after.clone()),
            Updater::Accumulate => Ok(after.delta_from(before)?),
            Updater::DictValue { .. } => invert_dict_value(before, after),
        }
    }
}

fn expect_map<'a>(
    value: &'a Value,
    updater: &'static str,
) -> Result<&'a BTreeMap<String, Value>, SchemaError> {
    value.as_map().ok_or(SchemaError::TypeMismatch {
        updater,
        expected: "map",
        found: value.kind(),
    })
}

fn apply_dict_value(
    defaults: &BTreeMap<String, Value>,
    current: &Value,
    update: &Value,
) -> Result<Value, SchemaError> {
    let mut result = expect_map(current, "dict_value")?.clone();
    for (key, value) in expect_map(update, "dict_value")? {
        match key.as_str() {
            "_add" => {
                let Value::List(entries) = value else {
                    return Err(SchemaError::MalformedDictUpdate {
                        field: "_add",
                        reason: format!("expected a list, found {}", value.kind()),
                    });
                };
                for entry in entries {
                    let (added_key, state) = parse_added_entry(entry)?;
                    if result.contains_key(&added_key) {
                        return Err(SchemaError::DuplicateKey(added_key));
                    }
                    let unknown: Vec<String> = state
                        .keys()
                        .filter(|k| !defaults.contains_key(*k))
                        .cloned()
                        .collect();
                    if !unknown.is_empty() {
                        return Err(SchemaError::UnknownKeys(unknown));
                    }
                    let mut record = defaults.clone();
                    record.extend(state.iter().map(|(k, v)| (k.clone(), v.clone())));
                    result.insert(added_key, Value::Map(record));
                }
            }
            "_delete" => {
                let Value::List(keys) = value else {
                    return Err(SchemaError::MalformedDictUpdate {
                        field: "_delete",
                        reason: format!("expected a list, found {}", value.kind()),
                    });
                };
                // Absent keys are ignored: several processes still emit
                // deletes for records another process already removed.
                for k in keys {
                    result.remove(&record_key(k, "_delete")?);
                }
            }
            _ => {
                // Updates to absent records are ignored for the same reason.
                if let Some(record) = result.get_mut(key) {
                    match (record, value) {
                        (Value::Map(fields), Value::Map(changes)) => {
                            fields.extend(changes.iter().map(|(k, v)| (k.clone(), v.clone())));
                        }
                        (slot, replacement) => *slot = replacement.clone(),
                    }
                }
            }
        }
    }
    Ok(Value::Map(result))
}

fn record_key(value: &Value, field: &'static str) -> Result<String, SchemaError> {
    match value {
        Value::Text(s) => Ok(s.clone()),
        Value::Int(i) => Ok(i.to_string()),
        other => Err(SchemaError::MalformedDictUpdate {
            field,
            reason: format!("record keys must be text or int, found {}", other.kind()),
        }),
    }
}

fn parse_added_entry(entry: &Value) -> Result<(String, &BTreeMap<String, Value>), SchemaError> {
    let malformed = |reason: &str| SchemaError::MalformedDictUpdate {
        field: "_add",
        reason: reason.to_string(),
    };
    let fields = entry.as_map().ok_or_else(|| malformed("entries must be maps"))?;
    let key = fields.get("key").ok_or_else(|| malformed("entry has no `key`"))?;
    let state = fields
        .get("state")
        .and_then(Value::as_map)
        .ok_or_else(|| malformed("entry has no `state` map"))?;
    Ok((record_key(key, "_add")?, state))
}

fn invert_dict_value(before: &Value, after: &Value) -> Result<Value, SchemaError> {
    let before = expect_map(before, "dict_value")?;
    let after = expect_map(after, "dict_value")?;
    let mut update = BTreeMap::new();

    let added: Vec<Value> = after
        .iter()
        .filter(|(k, _)| !before.contains_key(*k))
        .map(|(k, state)| {
            [("key", Value::Text(k.clone())), ("state", state.clone())]
                .into_iter()
                .collect()
        })
        .collect();
    let deleted: Vec<Value> = before
        .keys()
        .filter(|k| !after.contains_key(*k))
        .map(|k| Value::Text(k.clone()))
        .collect();

    for (key, new) in after {
        let Some(old) = before.get(key) else { continue };
        if old == new {
            continue;
        }
        let change = match (old, new) {
            (Value::Map(old_fields), Value::Map(new_fields)) => Value::Map(
                new_fields
                    .iter()
                    .filter(|(field, v)| old_fields.get(*field) != Some(*v))
                    .map(|(field, v)| (field.clone(), v.clone()))
                    .collect(),
            ),
            _ => new.clone(),
        };
        update.insert(key.clone(), change);
    }
    if !added.is_empty() {
        update.insert("_add".to_string(), Value::List(added));
    }
    if !deleted.is_empty() {
        update.insert("_delete".to_string(), Value::List(deleted));
    }
    Ok(Value::Map(update))
}

/// Split a non-negative count into two parts via a Binomial(count, 0.5) draw.
///
/// The draw is seeded from the count itself plus `salt`, so equal inputs split
/// identically on every run. The parts always sum to `count`.
pub fn binomial_split(count: i64, salt: u64) -> Result<(i64, i64), SchemaError> {
    if count < 0 {
        return Err(SchemaError::NegativeCount(count));
    }
    let seed = (count as u64).wrapping_add(salt) % RAND_MAX;
    let mut rng = create_rng(seed);
    let dist = Binomial::new(count as u64, 0.5).map_err(|_| SchemaError::Distribution(count))?;
    let first = dist.sample(&mut rng) as i64;
    Ok((first, count - first))
}

/// How a plain value is split between two daughters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ValueDivider {
    /// Both daughters inherit a copy.
    #[default]
    Set,
    /// Integer counts split by [`binomial_split`].
    Binomial,
    /// Numbers halved (odd integers give the extra unit to the first daughter).
    Split,
    /// Both daughters start from a zero of the same shape.
    Zero,
    /// Both daughters start from the declared default.
    Default,
}

impl ValueDivider {
    pub fn name(self) -> &'static str {
        match self {
            ValueDivider::Set => "set",
            ValueDivider::Binomial => "binomial",
            ValueDivider::Split => "split",
            ValueDivider::Zero => "zero",
            ValueDivider::Default => "default",
        }
    }

    pub fn divide(
        self,
        value: &Value,
        default: &Value,
        salt: u64,
    ) -> Result<[Value; 2], SchemaError> {
        match (self, value) {
            (ValueDivider::Set, v) => Ok([v.clone(), v.clone()]),
            (ValueDivider::Default, _) => Ok([default.clone(), default.clone()]),
            (ValueDivider::Zero, v) => Ok([v.zeroed(), v.zeroed()]),
            (ValueDivider::Binomial, Value::Int(n)) => {
                let (a, b) = binomial_split(*n, salt)?;
                Ok([Value::Int(a), Value::Int(b)])
            }
            (ValueDivider::Split, Value::Int(n)) => Ok([Value::Int(n - n / 2), Value::Int(n / 2)]),
            (ValueDivider::Split, Value::Float(x)) => {
                Ok([Value::Float(x / 2.0), Value::Float(x / 2.0)])
            }
            (ValueDivider::Split, Value::Array(a)) => {
                let half: Vec<f64> = a.iter().map(|x| x / 2.0).collect();
                Ok([Value::Array(half.clone()), Value::Array(half)])
            }
            (ValueDivider::Binomial | ValueDivider::Split, Value::Map(fields)) => {
                let mut first = BTreeMap::new();
                let mut second = BTreeMap::new();
                for (key, field) in fields {
                    let field_default = default
                        .as_map()
                        .and_then(|m| m.get(key))
                        .cloned()
                        .unwrap_or_else(|| field.zeroed());
                    let [a, b] = self.divide(field, &field_default, named_seed(salt, key))?;
                    first.insert(key.clone(), a);
                    second.insert(key.clone(), b);
                }
                Ok([Value::Map(first), Value::Map(second)])
            }
            (divider, v) => Err(SchemaError::Indivisible {
                divider: divider.name(),
                kind: v.kind(),
            }),
        }
    }
}

/// Declaration of one plain state path.
#[derive(Clone, Debug, PartialEq)]
pub struct SchemaEntry {
    pub default: Value,
    pub updater: Updater,
    pub divider: ValueDivider,
    pub emit: bool,
}

impl SchemaEntry {
    pub fn new(default: impl Into<Value>) -> Self {
        Self {
            default: default.into(),
            updater: Updater::default(),
            divider: ValueDivider::default(),
            emit: false,
        }
    }

    /// A listener value: replaced every update and emitted.
    pub fn listener(default: impl Into<Value>) -> Self {
        Self::new(default).updater(Updater::Set).emit(true)
    }

    pub fn updater(mut self, updater: Updater) -> Self {
        self.updater = updater;
        self
    }

    pub fn divider(mut self, divider: ValueDivider) -> Self {
        self.divider = divider;
        self
    }

    pub fn emit(mut self, emit: bool) -> Self {
        self.emit = emit;
        self
    }
}

/// Declaration of one unique-entity collection.
#[derive(Clone, Debug, PartialEq)]
pub struct CollectionSchema {
    pub columns: Vec<ColumnSpec>,
    pub divider: UniqueDivider,
    pub emit: bool,
}

/// Everything one process touches: plain paths, bulk species, collections.
#[derive(Clone, Debug, Default)]
pub struct PortsSchema {
    pub values: Vec<(StatePath, SchemaEntry)>,
    pub bulk: Vec<String>,
    pub collections: Vec<(String, CollectionSchema)>,
}

impl PortsSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn value(mut self, path: impl Into<StatePath>, entry: SchemaEntry) -> Self {
        self.values.push((path.into(), entry));
        self
    }

    pub fn bulk<I, S>(mut self, species: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.bulk.extend(species.into_iter().map(Into::into));
        self
    }

    pub fn collection(mut self, name: impl Into<String>, schema: CollectionSchema) -> Self {
        self.collections.push((name.into(), schema));
        self
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord)]
enum Declared {
    Value(StatePath),
    Bulk(String),
    Collection(String),
}

/// Registry of every declared path and collection, and of who declared it.
#[derive(Clone, Debug, Default)]
pub struct Schema {
    values: BTreeMap<StatePath, SchemaEntry>,
    bulk: BTreeSet<String>,
    collections: BTreeMap<String, CollectionSchema>,
    owners: BTreeMap<Declared, BTreeSet<String>>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one owner's declaration in. Re-declaring a path identically is
    /// fine; any difference in default, updater, divider or emit is a conflict.
    pub fn merge(&mut self, owner: &str, ports: PortsSchema) -> Result<(), SchemaError> {
        for (path, entry) in ports.values {
            match self.values.get(&path) {
                Some(existing) if *existing != entry => {
                    return Err(SchemaError::Conflict {
                        owner: owner.to_string(),
                        target: path.to_string(),
                    });
                }
                Some(_) => {}
                None => {
                    self.values.insert(path.clone(), entry);
                }
            }
            self.own(owner, Declared::Value(path));
        }
        for (name, collection) in ports.collections {
            match self.collections.get(&name) {
                Some(existing) if *existing != collection => {
                    return Err(SchemaError::Conflict {
                        owner: owner.to_string(),
                        target: format!("collection `{name}`"),
                    });
                }
                Some(_) => {}
                None => {
                    self.collections.insert(name.clone(), collection);
                }
            }
            self.own(owner, Declared::Collection(name));
        }
        for species in ports.bulk {
            self.bulk.insert(species.clone());
            self.own(owner, Declared::Bulk(species));
        }
        Ok(())
    }

    fn own(&mut self, owner: &str, declared: Declared) {
        self.owners
            .entry(declared)
            .or_default()
            .insert(owner.to_string());
    }

    /// Forget `owner`'s declarations. Anything no remaining owner declares is
    /// dropped, so a later owner may declare it differently. State already
    /// built from it is left alone.
    pub fn remove_owner(&mut self, owner: &str) {
        let mut orphaned = Vec::new();
        self.owners.retain(|declared, owners| {
            owners.remove(owner);
            if owners.is_empty() {
                orphaned.push(declared.clone());
            }
            !owners.is_empty()
        });
        for declared in orphaned {
            match declared {
                Declared::Value(path) => {
                    self.values.remove(&path);
                }
                Declared::Bulk(species) => {
                    self.bulk.remove(&species);
                }
                Declared::Collection(name) => {
                    self.collections.remove(&name);
                }
            }
        }
    }

    pub fn value_entry(&self, path: &StatePath) -> Option<&SchemaEntry> {
        self.values.get(path)
    }

    pub fn values(&self) -> impl Iterator<Item = (&StatePath, &SchemaEntry)> {
        self.values.iter()
    }

    pub fn collection(&self, name: &str) -> Option<&CollectionSchema> {
        self.collections.get(name)
    }

    pub fn collections(&self) -> impl Iterator<Item = (&String, &CollectionSchema)> {
        self.collections.iter()
    }

    pub fn bulk_species(&self) -> impl Iterator<Item = &String> {
        self.bulk.iter()
    }

    /// Apply `update` to `current` with the updater registered for `path`.
    pub fn apply_value(
        &self,
        path: &StatePath,
        current: &Value,
        update: &Value,
    ) -> Result<Value, SchemaError> {
        let entry = self
            .value_entry(path)
            .ok_or_else(|| SchemaError::UndeclaredPath(path.clone()))?;
        entry.updater.apply(current, update)
    }
}
