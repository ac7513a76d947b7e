use tracing::info;

use super::super::{Engine, EngineError};
use crate::division::{divide_cell, DivisionDirective};

impl Engine {
    /// Fork the state into two daughters once the division variable reaches
    /// its threshold. The engine refuses to step afterwards.
    pub(in crate::engine) fn division_phase(
        &mut self,
    ) -> Result<Option<DivisionDirective>, EngineError> {
        if !self.config.divide {
            return Ok(None);
        }
        let variable = &self.config.division_variable;
        let current = self
            .state
            .value(variable)
            .and_then(|v| v.as_f64())
            .ok_or_else(|| EngineError::DivisionVariable(variable.clone()))?;
        let threshold = match self.division_threshold {
            Some(threshold) => threshold,
            None => {
                let threshold = self.sample_division_threshold(current)?;
                self.division_threshold = Some(threshold);
                threshold
            }
        };
        if current < threshold {
            return Ok(None);
        }

        let daughters = divide_cell(
            &self.state,
            &self.schema,
            &self.config.agent_id,
            self.config.seed,
            &self.config.domain_collection,
        )?;
        info!(
            agent_id = %self.config.agent_id,
            time = self.state.time,
            value = current,
            threshold,
            first = %daughters[0].agent_id,
            second = %daughters[1].agent_id,
            "cell divided"
        );
        let directive = DivisionDirective {
            mother: self.config.agent_id.clone(),
            daughters,
        };
        self.division = Some(directive.clone());
        Ok(Some(directive))
    }
}
