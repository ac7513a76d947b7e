use crate::process::{PartitionedProcess, ProcessError, Request, Update};
use crate::schema::{PortsSchema, SchemaEntry};
use crate::store::StateView;
use crate::value::StatePath;

/// Requests fixed amounts of bulk species every timestep and consumes all it
/// is granted.
pub struct BulkConsumer {
    name: String,
    demands: Vec<(String, i64)>,
    priority: i32,
    consumed: StatePath,
}

impl BulkConsumer {
    /// Repeated species are merged into one demand.
    pub fn new<I, S>(name: impl Into<String>, demands: I) -> Self
    where
        I: IntoIterator<Item = (S, i64)>,
        S: Into<String>,
    {
        let name = name.into();
        let mut merged: Vec<(String, i64)> = Vec::new();
        for (species, amount) in demands {
            let species = species.into();
            match merged.iter_mut().find(|(s, _)| *s == species) {
                Some((_, total)) => *total += amount,
                None => merged.push((species, amount)),
            }
        }
        Self {
            consumed: StatePath::new(&["listeners", name.as_str(), "consumed"]),
            name,
            demands: merged,
            priority: 0,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

impl PartitionedProcess for BulkConsumer {
    fn name(&self) -> &str {
        &self.name
    }

    fn ports_schema(&self) -> PortsSchema {
        PortsSchema::new()
            .bulk(self.demands.iter().map(|(s, _)| s.clone()))
            .value(self.consumed.clone(), SchemaEntry::listener(0i64))
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn calculate_request(
        &mut self,
        _timestep: f64,
        state: &StateView<'_>,
    ) -> Result<Request, ProcessError> {
        let mut request = Request::new();
        for (species, amount) in &self.demands {
            request = request.bulk(state.species_index(species)?, *amount);
        }
        Ok(request)
    }

    fn evolve_state(&mut self, _timestep: f64, state: &StateView<'_>) -> Result<Update, ProcessError> {
        let mut update = Update::new();
        let mut consumed = 0;
        for (species, _) in &self.demands {
            let index = state.species_index(species)?;
            let granted = state.bulk_count(index);
            consumed += granted;
            update = update.bulk(index, -granted);
        }
        Ok(update.value(self.consumed.clone(), consumed))
    }
}
