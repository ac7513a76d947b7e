//! One cell's simulation loop: registered processes, the shared state and the
//! per-timestep schedule
//! (REQUEST → ALLOCATE → EVOLVE → MERGE → STEPS → agents → DIVISION).

use std::collections::HashSet;
use std::time::Instant;

use tracing::{debug, info};

use crate::allocator::Allocator;
use crate::config::{DivisionThreshold, SimConfig, SimConfigError};
use crate::division::{DivisionDirective, DivisionError};
use crate::metrics::{collect_emit_frame, RunSummary};
use crate::process::{AgentsUpdate, PartitionedProcess, Process, ProcessError, ProcessRole, Step};
use crate::schema::{Schema, SchemaError};
use crate::store::{CellState, StoreError, UniqueCollection};
use crate::value::{StatePath, Value, ValueError};

#[derive(Clone, Debug, Default)]
pub struct StepTimings {
    pub request_us: u64,
    pub allocate_us: u64,
    pub evolve_us: u64,
    pub merge_us: u64,
    pub steps_us: u64,
    pub total_us: u64,
}

#[derive(Clone, Debug)]
pub struct StepOutcome {
    pub timings: StepTimings,
    /// Number of species requested beyond supply this timestep.
    pub shortfall: usize,
    pub division: Option<DivisionDirective>,
}

#[derive(Debug, thiserror::Error)]
pub enum EngineInitError {
    #[error(transparent)]
    Config(#[from] SimConfigError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Value(#[from] ValueError),
    #[error(transparent)]
    Division(#[from] DivisionError),
    #[error("process `{0}` is registered twice")]
    DuplicateProcess(String),
    #[error("step `{step}` depends on unknown step `{dependency}`")]
    UnknownDependency { step: String, dependency: String },
    #[error("step dependencies form a cycle among {0:?}")]
    DependencyCycle(Vec<String>),
}

/// Failure while folding one process's update into the state.
#[derive(Debug, thiserror::Error)]
pub enum MergeError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Value(#[from] ValueError),
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Init(#[from] EngineInitError),
    #[error("process `{process}` failed at t={time}: {source}")]
    Process {
        process: String,
        time: f64,
        #[source]
        source: ProcessError,
    },
    #[error("process `{process}` did not converge after {iterations} iterations at t={time}")]
    SolverDidNotConverge {
        process: String,
        time: f64,
        iterations: usize,
    },
    #[error("merging update of `{process}` at t={time}: {source}")]
    Merge {
        process: String,
        time: f64,
        #[source]
        source: MergeError,
    },
    #[error("bulk species `{species}` would drop to {count} at t={time} (drawn by {processes:?})")]
    NegativeBulk {
        species: String,
        count: i64,
        time: f64,
        processes: Vec<String>,
    },
    #[error("process `{process}` drew {drawn} of `{species}` but was granted {granted}")]
    Overdraw {
        process: String,
        species: String,
        drawn: i64,
        granted: i64,
    },
    #[error(transparent)]
    Division(#[from] DivisionError),
    #[error("division variable {0} is missing or not numeric")]
    DivisionVariable(StatePath),
    #[error("cell `{0}` has divided and can no longer step")]
    Divided(String),
    #[error("agents update names unknown process `{0}`")]
    UnknownProcess(String),
    #[error("cannot advance by {0}")]
    InvalidDuration(f64),
}

impl EngineError {
    pub(crate) fn process(process: &str, time: f64, source: ProcessError) -> Self {
        match source {
            ProcessError::SolverDidNotConverge { iterations } => EngineError::SolverDidNotConverge {
                process: process.to_string(),
                time,
                iterations,
            },
            source => EngineError::Process {
                process: process.to_string(),
                time,
                source,
            },
        }
    }

    pub(crate) fn merge(process: &str, time: f64, source: impl Into<MergeError>) -> Self {
        EngineError::Merge {
            process: process.to_string(),
            time,
            source: source.into(),
        }
    }
}

pub struct Engine {
    config: SimConfig,
    schema: Schema,
    state: CellState,
    partitioned: Vec<Box<dyn PartitionedProcess>>,
    processes: Vec<Box<dyn Process>>,
    /// Kept in dependency order.
    steps: Vec<Box<dyn Step>>,
    allocator: Allocator,
    /// Merge barrier counter; unique collections snapshot their entry state
    /// once per epoch.
    epoch: u64,
    step_index: usize,
    shortfall_events: usize,
    division_threshold: Option<f64>,
    division: Option<DivisionDirective>,
}

impl Engine {
    pub fn new(
        roles: Vec<ProcessRole>,
        state: CellState,
        config: SimConfig,
    ) -> Result<Self, EngineInitError> {
        config.validate()?;
        // Read before schema defaults are filled in.
        let birth_value = state
            .value(&config.division_variable)
            .and_then(Value::as_f64);
        let mut engine = Self {
            allocator: Allocator::new(config.allocation_policy),
            config,
            schema: Schema::new(),
            state,
            partitioned: Vec::new(),
            processes: Vec::new(),
            steps: Vec::new(),
            epoch: 0,
            step_index: 0,
            shortfall_events: 0,
            division_threshold: None,
            division: None,
        };
        engine.register(roles)?;
        if engine.config.divide {
            // Sampled at birth when the initial state carries the variable,
            // otherwise at the first division check.
            if let Some(current) = birth_value {
                engine.division_threshold = Some(engine.sample_division_threshold(current)?);
            }
        }
        debug!(
            agent_id = %engine.config.agent_id,
            processes = engine.partitioned.len() + engine.processes.len(),
            steps = engine.steps.len(),
            "engine built"
        );
        Ok(engine)
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn state(&self) -> &CellState {
        &self.state
    }

    pub fn time(&self) -> f64 {
        self.state.time
    }

    pub fn step_index(&self) -> usize {
        self.step_index
    }

    pub fn shortfall_events(&self) -> usize {
        self.shortfall_events
    }

    pub fn division_threshold(&self) -> Option<f64> {
        self.division_threshold
    }

    /// The division this cell underwent, if any.
    pub fn division(&self) -> Option<&DivisionDirective> {
        self.division.as_ref()
    }

    /// Names of registered processes: partitioned, then plain, then steps in run order.
    pub fn process_names(&self) -> Vec<&str> {
        self.partitioned
            .iter()
            .map(|p| p.name())
            .chain(self.processes.iter().map(|p| p.name()))
            .chain(self.steps.iter().map(|s| s.name()))
            .collect()
    }

    /// Overwrite one plain value, bypassing its updater.
    pub fn set_value(&mut self, path: &StatePath, value: Value) -> Result<(), ValueError> {
        self.state.values.set_path(path, value)
    }

    fn register(&mut self, roles: Vec<ProcessRole>) -> Result<(), EngineInitError> {
        let mut names: HashSet<String> =
            self.process_names().into_iter().map(str::to_string).collect();
        let mut steps = std::mem::take(&mut self.steps);
        for role in roles {
            let name = role.name().to_string();
            if !names.insert(name.clone()) {
                return Err(EngineInitError::DuplicateProcess(name));
            }
            self.schema.merge(&name, role.ports_schema())?;
            match role {
                ProcessRole::Plain(p) => self.processes.push(p),
                ProcessRole::Partitioned(p) => self.partitioned.push(p),
                ProcessRole::Step(s) => steps.push(s),
            }
        }
        self.steps = phases::steps::order_steps(steps)?;
        self.initialize_state()
    }

    /// Fill in whatever the schema declares and the state lacks: bulk species,
    /// value defaults and empty collections.
    fn initialize_state(&mut self) -> Result<(), EngineInitError> {
        for species in self.schema.bulk_species() {
            self.state.bulk.ensure_species(species);
        }
        for (path, entry) in self.schema.values() {
            if self.state.value(path).is_none() {
                self.state.values.set_path(path, entry.default.clone())?;
            }
        }
        let fraction = self.config.unique_growth_fraction;
        for (name, declared) in self.schema.collections() {
            match self.state.collections.get_mut(name) {
                Some(existing) => {
                    for spec in &declared.columns {
                        let found = existing
                            .specs()
                            .iter()
                            .find(|s| s.name == spec.name)
                            .ok_or_else(|| StoreError::UnknownColumn {
                                collection: name.clone(),
                                column: spec.name.clone(),
                            })?;
                        if found.kind != spec.kind {
                            return Err(StoreError::ColumnKindMismatch {
                                collection: name.clone(),
                                column: spec.name.clone(),
                                expected: spec.kind,
                                found: found.kind,
                            }
                            .into());
                        }
                    }
                    existing.set_growth_fraction(fraction);
                }
                None => {
                    let collection =
                        UniqueCollection::new(name.clone(), declared.columns.clone(), self.config.seed)?
                            .with_growth_fraction(fraction);
                    self.state.collections.insert(name.clone(), collection);
                }
            }
        }
        Ok(())
    }

    fn next_epoch(&mut self) -> u64 {
        self.epoch += 1;
        self.epoch
    }

    fn sample_division_threshold(&self, current: f64) -> Result<f64, DivisionError> {
        match self.config.division_threshold {
            DivisionThreshold::Fixed { value } => Ok(value),
            DivisionThreshold::MassDistribution {
                expected_increase,
                scale,
            } => crate::division::sample_threshold(
                current,
                expected_increase.unwrap_or(current),
                scale,
                self.config.seed,
            ),
        }
    }

    /// Advance one configured timestep.
    pub fn step(&mut self) -> Result<StepOutcome, EngineError> {
        self.step_with(self.config.timestep)
    }

    /// Advance model time by `duration`, in steps of at most the configured
    /// timestep. Stops early if the cell divides.
    pub fn advance(&mut self, duration: f64) -> Result<Option<DivisionDirective>, EngineError> {
        if !(duration.is_finite() && duration >= 0.0) {
            return Err(EngineError::InvalidDuration(duration));
        }
        let end = self.state.time + duration;
        let tolerance = self.config.timestep * 1e-9;
        while end - self.state.time > tolerance {
            let timestep = self.config.timestep.min(end - self.state.time);
            let outcome = self.step_with(timestep)?;
            if outcome.division.is_some() {
                return Ok(outcome.division);
            }
        }
        Ok(None)
    }

    fn step_with(&mut self, timestep: f64) -> Result<StepOutcome, EngineError> {
        if self.division.is_some() {
            return Err(EngineError::Divided(self.config.agent_id.clone()));
        }
        let total_start = Instant::now();

        let t0 = Instant::now();
        let requests = self.request_phase(timestep)?;
        let request_us = t0.elapsed().as_micros() as u64;

        let t1 = Instant::now();
        let allocation = self.allocate_phase(&requests);
        let allocate_us = t1.elapsed().as_micros() as u64;

        let t2 = Instant::now();
        let updates = self.evolve_phase(timestep, &allocation.grants)?;
        let evolve_us = t2.elapsed().as_micros() as u64;

        let t3 = Instant::now();
        let epoch = self.next_epoch();
        let mut agents = self.merge_phase(updates, epoch)?;
        self.state.time += timestep;
        let merge_us = t3.elapsed().as_micros() as u64;

        let t4 = Instant::now();
        agents.extend(self.steps_phase(timestep)?);
        let steps_us = t4.elapsed().as_micros() as u64;

        for update in agents {
            self.apply_agents_update(update)?;
        }
        self.step_index += 1;
        let division = self.division_phase()?;

        let timings = StepTimings {
            request_us,
            allocate_us,
            evolve_us,
            merge_us,
            steps_us,
            total_us: total_start.elapsed().as_micros() as u64,
        };
        debug!(
            step = self.step_index,
            time = self.state.time,
            request_us,
            allocate_us,
            evolve_us,
            merge_us,
            steps_us,
            "step complete"
        );
        Ok(StepOutcome {
            timings,
            shortfall: allocation.shortfall.len(),
            division,
        })
    }

    /// Run up to `steps` timesteps, recording an emit frame at the start,
    /// every `emit_every` steps and at the end. Stops after a division.
    pub fn run_for(&mut self, steps: usize) -> Result<RunSummary, EngineError> {
        let emit_every = self.config.emit_every;
        let shortfall_before = self.shortfall_events;
        let mut frames = vec![collect_emit_frame(self.step_index, &self.state, &self.schema)];
        let mut completed = 0;
        for step in 1..=steps {
            let outcome = self.step()?;
            completed = step;
            let last = step == steps || outcome.division.is_some();
            if step % emit_every == 0 || last {
                frames.push(collect_emit_frame(self.step_index, &self.state, &self.schema));
            }
            if outcome.division.is_some() {
                break;
            }
        }
        let daughter_ids = self
            .division
            .iter()
            .flat_map(|d| d.daughters.iter().map(|s| s.agent_id.clone()))
            .collect();
        Ok(RunSummary {
            schema_version: 1,
            agent_id: self.config.agent_id.clone(),
            steps: completed,
            emit_every,
            final_time: self.state.time,
            frames,
            shortfall_events: self.shortfall_events - shortfall_before,
            divided: self.division.is_some(),
            daughter_ids,
        })
    }

    /// Swap a dividing agent's process for its daughters' processes.
    pub fn apply_agents_update(&mut self, update: AgentsUpdate) -> Result<(), EngineError> {
        match update {
            AgentsUpdate::Divide { mother, daughters } => {
                if !self.remove_process(&mother) {
                    return Err(EngineError::UnknownProcess(mother));
                }
                let ids: Vec<&str> = daughters.iter().map(|d| d.id.as_str()).collect();
                info!(mother = %mother, daughters = ?ids, "agent replaced by daughters");
                let roles = daughters.into_iter().flat_map(|d| d.processes).collect();
                self.register(roles)?;
                Ok(())
            }
        }
    }

    fn remove_process(&mut self, name: &str) -> bool {
        let before = self.partitioned.len() + self.processes.len() + self.steps.len();
        self.partitioned.retain(|p| p.name() != name);
        self.processes.retain(|p| p.name() != name);
        self.steps.retain(|s| s.name() != name);
        let removed = before != self.partitioned.len() + self.processes.len() + self.steps.len();
        if removed {
            self.schema.remove_owner(name);
        }
        removed
    }
}

mod phases;
#[cfg(test)]
mod tests;
