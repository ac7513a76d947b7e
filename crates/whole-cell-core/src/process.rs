//! The three process roles and the messages they exchange with the engine.

use std::collections::BTreeMap;
use std::fmt;

use crate::engine::EngineError;
use crate::schema::{PortsSchema, SchemaError};
use crate::store::{StateView, StoreError, UniqueUpdate};
use crate::tunnel::TunnelError;
use crate::value::{StatePath, Value, ValueError};

#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    Value(#[from] ValueError),
    #[error(transparent)]
    Tunnel(#[from] TunnelError),
    #[error("solver did not converge after {iterations} iterations")]
    SolverDidNotConverge { iterations: usize },
    #[error("inner engine `{agent_id}` failed: {source}")]
    Inner {
        agent_id: String,
        #[source]
        source: Box<EngineError>,
    },
    #[error("{0}")]
    Invalid(String),
}

/// A process's proposed change to the cell.
#[derive(Debug, Default)]
pub struct Update {
    /// `(species position, delta)` pairs for the bulk pool.
    pub bulk: Vec<(usize, i64)>,
    pub collections: BTreeMap<String, UniqueUpdate>,
    pub values: BTreeMap<StatePath, Value>,
    pub agents: Option<AgentsUpdate>,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bulk(mut self, species: usize, delta: i64) -> Self {
        if delta != 0 {
            self.bulk.push((species, delta));
        }
        self
    }

    pub fn collection(mut self, name: impl Into<String>, update: UniqueUpdate) -> Self {
        self.collections.insert(name.into(), update);
        self
    }

    pub fn value(mut self, path: impl Into<StatePath>, value: impl Into<Value>) -> Self {
        self.values.insert(path.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.bulk.is_empty()
            && self.collections.values().all(UniqueUpdate::is_empty)
            && self.values.is_empty()
            && self.agents.is_none()
    }
}

/// Structural change to the set of processes registered in an engine.
#[derive(Debug)]
pub enum AgentsUpdate {
    /// Remove the process named `mother` and register every daughter's processes.
    Divide {
        mother: String,
        daughters: Vec<AgentSpec>,
    },
}

#[derive(Debug)]
pub struct AgentSpec {
    pub id: String,
    pub processes: Vec<ProcessRole>,
}

/// Bulk amounts a partitioned process wants for this timestep.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Request {
    amounts: Vec<(usize, i64)>,
}

impl Request {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bulk(mut self, species: usize, amount: i64) -> Self {
        self.amounts.push((species, amount));
        self
    }

    pub fn amounts(&self) -> &[(usize, i64)] {
        &self.amounts
    }

    pub fn is_empty(&self) -> bool {
        self.amounts.is_empty()
    }
}

/// Reads the full state, returns an update; no allocation involved.
pub trait Process: Send {
    fn name(&self) -> &str;
    fn ports_schema(&self) -> PortsSchema;
    fn next_update(&mut self, timestep: f64, state: &StateView<'_>)
        -> Result<Update, ProcessError>;
}

/// Two-phase process competing for bulk molecules.
///
/// `calculate_request` sees the full pre-merge state and must not consume
/// anything; `evolve_state` sees only the granted allocation in place of the
/// bulk counts and must not draw more than it was granted.
pub trait PartitionedProcess: Send {
    fn name(&self) -> &str;
    fn ports_schema(&self) -> PortsSchema;

    /// Higher priorities are served first under the priority policy.
    fn priority(&self) -> i32 {
        0
    }

    fn calculate_request(
        &mut self,
        timestep: f64,
        state: &StateView<'_>,
    ) -> Result<Request, ProcessError>;

    fn evolve_state(&mut self, timestep: f64, state: &StateView<'_>)
        -> Result<Update, ProcessError>;
}

/// Runs after all processes each timestep, in dependency order, each merged
/// before the next runs.
pub trait Step: Send {
    fn name(&self) -> &str;
    fn ports_schema(&self) -> PortsSchema;

    /// Names of steps that must run before this one.
    fn depends_on(&self) -> Vec<String> {
        Vec::new()
    }

    /// A false condition skips the step for this timestep with no side effects.
    fn update_condition(&self, _timestep: f64, _state: &StateView<'_>) -> bool {
        true
    }

    fn next_update(&mut self, timestep: f64, state: &StateView<'_>)
        -> Result<Update, ProcessError>;
}

pub enum ProcessRole {
    Plain(Box<dyn Process>),
    Partitioned(Box<dyn PartitionedProcess>),
    Step(Box<dyn Step>),
}

impl ProcessRole {
    pub fn plain(process: impl Process + 'static) -> Self {
        ProcessRole::Plain(Box::new(process))
    }

    pub fn partitioned(process: impl PartitionedProcess + 'static) -> Self {
        ProcessRole::Partitioned(Box::new(process))
    }

    pub fn step(step: impl Step + 'static) -> Self {
        ProcessRole::Step(Box::new(step))
    }

    pub fn name(&self) -> &str {
        match self {
            ProcessRole::Plain(p) => p.name(),
            ProcessRole::Partitioned(p) => p.name(),
            ProcessRole::Step(s) => s.name(),
        }
    }

    pub fn ports_schema(&self) -> PortsSchema {
        match self {
            ProcessRole::Plain(p) => p.ports_schema(),
            ProcessRole::Partitioned(p) => p.ports_schema(),
            ProcessRole::Step(s) => s.ports_schema(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ProcessRole::Plain(_) => "process",
            ProcessRole::Partitioned(_) => "partitioned",
            ProcessRole::Step(_) => "step",
        }
    }
}

impl fmt::Debug for ProcessRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.kind(), self.name())
    }
}
