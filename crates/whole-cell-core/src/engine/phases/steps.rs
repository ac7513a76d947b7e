use std::collections::{BTreeSet, HashMap};

use tracing::trace;

use super::super::{Engine, EngineError, EngineInitError};
use crate::process::{AgentsUpdate, Step};
use crate::store::StateView;

impl Engine {
    /// Run steps in dependency order, merging each before the next runs.
    pub(in crate::engine) fn steps_phase(
        &mut self,
        timestep: f64,
    ) -> Result<Vec<AgentsUpdate>, EngineError> {
        let mut agents = Vec::new();
        for index in 0..self.steps.len() {
            let epoch = self.next_epoch();
            let view = StateView::full(&self.state, true);
            let step = &mut self.steps[index];
            if !step.update_condition(timestep, &view) {
                trace!(step = step.name(), "update condition false, skipped");
                continue;
            }
            let name = step.name().to_string();
            let update = step
                .next_update(timestep, &view)
                .map_err(|source| EngineError::process(&name, view.time(), source))?;
            agents.extend(self.merge_phase(vec![(name, update)], epoch)?);
        }
        Ok(agents)
    }
}

/// Topological order of `steps` by their declared dependencies; among steps
/// that are ready together, registration order wins.
pub(in crate::engine) fn order_steps(
    steps: Vec<Box<dyn Step>>,
) -> Result<Vec<Box<dyn Step>>, EngineInitError> {
    let position: HashMap<String, usize> = steps
        .iter()
        .enumerate()
        .map(|(i, s)| (s.name().to_string(), i))
        .collect();
    let mut dependents = vec![Vec::new(); steps.len()];
    let mut pending = vec![0usize; steps.len()];
    for (i, step) in steps.iter().enumerate() {
        for dependency in step.depends_on() {
            let &d = position
                .get(&dependency)
                .ok_or_else(|| EngineInitError::UnknownDependency {
                    step: step.name().to_string(),
                    dependency: dependency.clone(),
                })?;
            dependents[d].push(i);
            pending[i] += 1;
        }
    }

    let mut ready: BTreeSet<usize> = (0..steps.len()).filter(|&i| pending[i] == 0).collect();
    let mut order = Vec::with_capacity(steps.len());
    while let Some(i) = ready.pop_first() {
        order.push(i);
        for &j in &dependents[i] {
            pending[j] -= 1;
            if pending[j] == 0 {
                ready.insert(j);
            }
        }
    }
    if order.len() < steps.len() {
        let cycle = steps
            .iter()
            .enumerate()
            .filter(|&(i, _)| pending[i] > 0)
            .map(|(_, s)| s.name().to_string())
            .collect();
        return Err(EngineInitError::DependencyCycle(cycle));
    }

    let mut slots: Vec<Option<Box<dyn Step>>> = steps.into_iter().map(Some).collect();
    Ok(order
        .into_iter()
        .filter_map(|i| slots[i].take())
        .collect())
}
