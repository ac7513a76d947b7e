use super::SUBMASS;
use crate::process::{ProcessError, Step, Update};
use crate::schema::{CollectionSchema, PortsSchema, SchemaEntry, ValueDivider};
use crate::store::StateView;
use crate::value::StatePath;

/// Recomputes cell dry mass from bulk counts and unique-row submasses.
pub struct MassListener {
    name: String,
    weights: Vec<(String, f64)>,
    collections: Vec<(String, CollectionSchema)>,
    after: Vec<String>,
    dry_mass: StatePath,
    unique_mass: StatePath,
}

impl MassListener {
    pub const NAME: &'static str = "mass-listener";

    /// `weights` are per-molecule masses of bulk species. Every collection is
    /// declared with its schema; rows of those with a `submass` column add
    /// their submass sum.
    pub fn new<I, S>(weights: I, collections: Vec<(&str, CollectionSchema)>) -> Self
    where
        I: IntoIterator<Item = (S, f64)>,
        S: Into<String>,
    {
        Self {
            name: Self::NAME.to_string(),
            weights: weights.into_iter().map(|(s, w)| (s.into(), w)).collect(),
            collections: collections
                .into_iter()
                .map(|(name, schema)| (name.to_string(), schema))
                .collect(),
            after: Vec::new(),
            dry_mass: StatePath::from("listeners/mass/dry_mass"),
            unique_mass: StatePath::from("listeners/mass/unique_mass"),
        }
    }

    pub fn after(mut self, step: impl Into<String>) -> Self {
        self.after.push(step.into());
        self
    }

    fn unique_mass(&self, state: &StateView<'_>) -> f64 {
        self.collections
            .iter()
            .filter_map(|(name, _)| state.collection(name).ok())
            .filter_map(|collection| collection.read_column(SUBMASS).ok())
            .map(|column| column.as_vector().map_or(0.0, |(_, data)| data.iter().sum()))
            .sum()
    }
}

impl Step for MassListener {
    fn name(&self) -> &str {
        &self.name
    }

    fn ports_schema(&self) -> PortsSchema {
        let mass = SchemaEntry::listener(0.0).divider(ValueDivider::Split);
        let mut ports = PortsSchema::new()
            .bulk(self.weights.iter().map(|(s, _)| s.clone()))
            .value(self.dry_mass.clone(), mass.clone())
            .value(self.unique_mass.clone(), mass);
        for (name, schema) in &self.collections {
            ports = ports.collection(name.clone(), schema.clone());
        }
        ports
    }

    fn depends_on(&self) -> Vec<String> {
        self.after.clone()
    }

    fn next_update(&mut self, _timestep: f64, state: &StateView<'_>) -> Result<Update, ProcessError> {
        let mut bulk_mass = 0.0;
        for (species, weight) in &self.weights {
            bulk_mass += state.bulk_count(state.species_index(species)?) as f64 * weight;
        }
        let unique_mass = self.unique_mass(state);
        Ok(Update::new()
            .value(self.dry_mass.clone(), bulk_mass + unique_mass)
            .value(self.unique_mass.clone(), unique_mass))
    }
}
