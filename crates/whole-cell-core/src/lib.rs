pub mod allocator;
pub mod config;
pub mod constants;
pub mod division;
pub mod engine;
pub mod metrics;
pub mod process;
pub mod processes;
pub mod rng;
pub mod schema;
pub mod store;
pub mod tunnel;
pub mod value;

pub use config::{DivisionThreshold, SimConfig, SimConfigError};
pub use engine::{Engine, EngineError, EngineInitError, StepOutcome, StepTimings};
pub use metrics::{EmitFrame, RunSummary};
pub use process::{
    AgentSpec, AgentsUpdate, PartitionedProcess, Process, ProcessError, ProcessRole, Request,
    Step, Update,
};
pub use store::{BulkPool, CellState, StateView, UniqueCollection, UniqueUpdate};
pub use tunnel::{Composer, EngineProcess, Tunnel};
pub use value::{StatePath, Value};
