use std::collections::BTreeSet;

use super::super::{Engine, EngineError};
use crate::process::{AgentsUpdate, Update};
use crate::store::StoreError;

impl Engine {
    /// Fold a batch of updates into the state at one barrier.
    ///
    /// Bulk deltas of the whole batch are summed and applied at once, so only
    /// the net change has to keep counts non-negative. Collection and value
    /// updates apply in batch order. Agents updates are handed back to the
    /// caller.
    pub(in crate::engine) fn merge_phase(
        &mut self,
        updates: Vec<(String, Update)>,
        epoch: u64,
    ) -> Result<Vec<AgentsUpdate>, EngineError> {
        let time = self.state.time;
        let species = self.state.bulk.len();

        let mut deltas = Vec::new();
        for (process, update) in &updates {
            if let Some(&(index, _)) = update.bulk.iter().find(|(index, _)| *index >= species) {
                return Err(EngineError::merge(
                    process,
                    time,
                    StoreError::SpeciesIndexOutOfRange {
                        index,
                        len: species,
                    },
                ));
            }
            deltas.extend_from_slice(&update.bulk);
        }
        if let Err(err) = self.state.bulk.apply(&deltas) {
            return Err(match err {
                StoreError::NegativeCount { species, count } => {
                    let index = self.state.bulk.index_of(&species).ok();
                    let processes: BTreeSet<String> = updates
                        .iter()
                        .filter(|(_, u)| {
                            u.bulk
                                .iter()
                                .any(|&(s, delta)| Some(s) == index && delta < 0)
                        })
                        .map(|(p, _)| p.clone())
                        .collect();
                    EngineError::NegativeBulk {
                        species,
                        count,
                        time,
                        processes: processes.into_iter().collect(),
                    }
                }
                other => EngineError::merge("bulk", time, other),
            });
        }

        let mut agents = Vec::new();
        for (process, update) in updates {
            for (name, change) in &update.collections {
                self.state
                    .collection_mut(name)
                    .and_then(|collection| collection.apply_update(epoch, change))
                    .map_err(|err| EngineError::merge(&process, time, err))?;
            }
            for (path, change) in &update.values {
                let current = match self.state.value(path) {
                    Some(value) => value.clone(),
                    None => self
                        .schema
                        .value_entry(path)
                        .map(|entry| entry.default.clone())
                        .unwrap_or_else(crate::value::Value::empty_map),
                };
                let next = self
                    .schema
                    .apply_value(path, &current, change)
                    .map_err(|err| EngineError::merge(&process, time, err))?;
                self.state
                    .values
                    .set_path(path, next)
                    .map_err(|err| EngineError::merge(&process, time, err))?;
            }
            agents.extend(update.agents);
        }
        Ok(agents)
    }
}
