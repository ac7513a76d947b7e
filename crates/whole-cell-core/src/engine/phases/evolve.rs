use rayon::prelude::*;

use super::super::{Engine, EngineError};
use crate::process::{PartitionedProcess, Process, Update};
use crate::store::StateView;

type Evolved = Result<(String, Update), EngineError>;

impl Engine {
    /// Run every evolver against the same pre-merge state. Partitioned
    /// processes see only their grants; plain processes see the full pool.
    /// Updates come back partitioned first, then plain, each in registration
    /// order.
    pub(in crate::engine) fn evolve_phase(
        &mut self,
        timestep: f64,
        grants: &[Vec<i64>],
    ) -> Result<Vec<(String, Update)>, EngineError> {
        let state = &self.state;
        let time = state.time;
        let full = StateView::full(state, false);

        let evolve = |(process, grant): (&mut Box<dyn PartitionedProcess>, &Vec<i64>)| -> Evolved {
            let view = StateView::new(state, grant, false);
            let update = process
                .evolve_state(timestep, &view)
                .map_err(|source| EngineError::process(process.name(), time, source))?;
            check_grant(process.name(), state.bulk.ids(), grant, &update)?;
            Ok((process.name().to_string(), update))
        };
        let next = |process: &mut Box<dyn Process>| -> Evolved {
            let update = process
                .next_update(timestep, &full)
                .map_err(|source| EngineError::process(process.name(), time, source))?;
            Ok((process.name().to_string(), update))
        };

        let (partitioned, plain): (Vec<Evolved>, Vec<Evolved>) =
            if self.config.parallel {
                (
                    self.partitioned
                        .par_iter_mut()
                        .zip(grants.par_iter())
                        .map(evolve)
                        .collect(),
                    self.processes.par_iter_mut().map(next).collect(),
                )
            } else {
                (
                    self.partitioned.iter_mut().zip(grants).map(evolve).collect(),
                    self.processes.iter_mut().map(next).collect(),
                )
            };
        partitioned.into_iter().chain(plain).collect()
    }
}

/// A partitioned update may not take more of a species than it was granted.
fn check_grant(
    process: &str,
    ids: &[String],
    grant: &[i64],
    update: &Update,
) -> Result<(), EngineError> {
    let mut net = vec![0i64; grant.len()];
    for &(species, delta) in &update.bulk {
        // out-of-range species are reported by the merge
        if let Some(slot) = net.get_mut(species) {
            *slot += delta;
        }
    }
    for (species, (&delta, &granted)) in net.iter().zip(grant).enumerate() {
        if -delta > granted {
            return Err(EngineError::Overdraw {
                process: process.to_string(),
                species: ids[species].clone(),
                drawn: -delta,
                granted,
            });
        }
    }
    Ok(())
}
