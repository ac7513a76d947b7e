use rayon::prelude::*;

use super::super::{Engine, EngineError};
use crate::process::{PartitionedProcess, ProcessError, Request};
use crate::store::{StateView, StoreError};

impl Engine {
    /// Collect every partitioned process's request against the pre-merge
    /// state, as dense per-species vectors in registration order.
    pub(in crate::engine) fn request_phase(
        &mut self,
        timestep: f64,
    ) -> Result<Vec<Vec<i64>>, EngineError> {
        let state = &self.state;
        let view = StateView::full(state, false);
        let time = state.time;
        let species = state.bulk.len();
        let request = |process: &mut Box<dyn PartitionedProcess>| -> Result<Vec<i64>, EngineError> {
            let request = process
                .calculate_request(timestep, &view)
                .map_err(|source| EngineError::process(process.name(), time, source))?;
            densify(process.name(), time, species, &request)
        };
        if self.config.parallel {
            self.partitioned.par_iter_mut().map(request).collect()
        } else {
            self.partitioned.iter_mut().map(request).collect()
        }
    }
}

/// Negative amounts request nothing; repeated species add up.
fn densify(
    process: &str,
    time: f64,
    species: usize,
    request: &Request,
) -> Result<Vec<i64>, EngineError> {
    let mut dense = vec![0i64; species];
    for &(index, amount) in request.amounts() {
        let slot = dense.get_mut(index).ok_or_else(|| {
            EngineError::process(
                process,
                time,
                ProcessError::Store(StoreError::SpeciesIndexOutOfRange {
                    index,
                    len: species,
                }),
            )
        })?;
        *slot += amount.max(0);
    }
    Ok(dense)
}
