//! A whole inner engine running as one process of an outer engine.
//!
//! The two engines exchange plain values only through tunnels. Before each
//! outer update the outer value of every tunnel is written into the inner
//! state; the inner engine then runs for the outer timestep, and the change
//! at each inner path is inverted through that path's updater and reported
//! as this process's update at the outer path. The outer engine therefore
//! sees inner changes one update late, but never loses or doubles them.

use std::collections::HashSet;
use std::sync::Arc;

use tracing::info;

use crate::config::SimConfig;
use crate::division::{DaughterState, DivisionDirective};
use crate::engine::{Engine, EngineInitError};
use crate::process::{AgentSpec, AgentsUpdate, Process, ProcessError, ProcessRole, Update};
use crate::schema::{PortsSchema, SchemaError};
use crate::store::StateView;
use crate::value::{StatePath, ValueError};

#[derive(Debug, thiserror::Error)]
pub enum TunnelError {
    #[error("inner path {0} has no schema and cannot be tunnelled")]
    UndeclaredInner(StatePath),
    #[error("inner path {0} has no value after the inner update")]
    MissingInner(StatePath),
    #[error("outer path {0} has no value to push in")]
    MissingOuter(StatePath),
    #[error("outer path {0} is tunnelled twice")]
    DuplicateTunnel(StatePath),
    #[error(transparent)]
    Value(#[from] ValueError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error("building daughter `{agent_id}` failed: {source}")]
    Compose {
        agent_id: String,
        #[source]
        source: Box<EngineInitError>,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TunnelKind {
    /// An outer process reads and writes an inner store.
    In,
    /// An inner process reads and writes an outer store through a top-level
    /// inner stand-in.
    Out,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Tunnel {
    pub kind: TunnelKind,
    pub outer: StatePath,
    pub inner: StatePath,
}

impl Tunnel {
    pub fn inbound(outer: impl Into<StatePath>, inner: impl Into<StatePath>) -> Self {
        Self {
            kind: TunnelKind::In,
            outer: outer.into(),
            inner: inner.into(),
        }
    }

    /// The inner stand-in is the top-level store `name`.
    pub fn outbound(name: &str, outer: impl Into<StatePath>) -> Self {
        Self {
            kind: TunnelKind::Out,
            outer: outer.into(),
            inner: StatePath::new(&[name]),
        }
    }
}

/// Builds the processes of a newborn cell.
pub trait Composer: Send + Sync {
    fn processes(&self, agent_id: &str, seed: u64) -> Vec<ProcessRole>;

    /// A ready engine for `daughter`, configured like `config` apart from
    /// its identity and seed.
    fn compose(&self, daughter: DaughterState, config: &SimConfig) -> Result<Engine, EngineInitError> {
        let config = SimConfig {
            seed: daughter.seed,
            agent_id: daughter.agent_id.clone(),
            ..config.clone()
        };
        Engine::new(
            self.processes(&daughter.agent_id, daughter.seed),
            daughter.state,
            config,
        )
    }
}

impl<F> Composer for F
where
    F: Fn(&str, u64) -> Vec<ProcessRole> + Send + Sync,
{
    fn processes(&self, agent_id: &str, seed: u64) -> Vec<ProcessRole> {
        self(agent_id, seed)
    }
}

/// Inner engine wrapped as a plain process named after its agent id.
pub struct EngineProcess {
    name: String,
    engine: Engine,
    tunnels: Vec<Tunnel>,
    ports: PortsSchema,
    composer: Arc<dyn Composer>,
}

impl EngineProcess {
    /// Every tunnel's outer path is declared with the inner path's schema entry.
    pub fn new(
        engine: Engine,
        tunnels: Vec<Tunnel>,
        composer: Arc<dyn Composer>,
    ) -> Result<Self, TunnelError> {
        let mut seen = HashSet::new();
        let mut ports = PortsSchema::new();
        for tunnel in &tunnels {
            if !seen.insert(tunnel.outer.clone()) {
                return Err(TunnelError::DuplicateTunnel(tunnel.outer.clone()));
            }
            let entry = engine
                .schema()
                .value_entry(&tunnel.inner)
                .ok_or_else(|| TunnelError::UndeclaredInner(tunnel.inner.clone()))?;
            ports = ports.value(tunnel.outer.clone(), entry.clone());
        }
        Ok(Self {
            name: engine.config().agent_id.clone(),
            engine,
            tunnels,
            ports,
            composer,
        })
    }

    pub fn inner(&self) -> &Engine {
        &self.engine
    }

    pub fn tunnels(&self) -> &[Tunnel] {
        &self.tunnels
    }

    /// Replace this process by one tunnel process per daughter.
    fn divide(&self, directive: DivisionDirective) -> Result<Update, ProcessError> {
        info!(
            mother = %directive.mother,
            "inner engine divided, replacing tunnel process"
        );
        let config = self.engine.config();
        let mut daughters = Vec::with_capacity(directive.daughters.len());
        for daughter in directive.daughters {
            let id = daughter.agent_id.clone();
            let engine =
                self.composer
                    .compose(daughter, config)
                    .map_err(|source| TunnelError::Compose {
                        agent_id: id.clone(),
                        source: Box::new(source),
                    })?;
            let process = EngineProcess::new(engine, self.tunnels.clone(), Arc::clone(&self.composer))?;
            daughters.push(AgentSpec {
                id,
                processes: vec![ProcessRole::plain(process)],
            });
        }
        Ok(Update {
            agents: Some(AgentsUpdate::Divide {
                mother: self.name.clone(),
                daughters,
            }),
            ..Update::default()
        })
    }
}

impl Process for EngineProcess {
    fn name(&self) -> &str {
        &self.name
    }

    fn ports_schema(&self) -> PortsSchema {
        self.ports.clone()
    }

    fn next_update(&mut self, timestep: f64, state: &StateView<'_>) -> Result<Update, ProcessError> {
        let mut pushed = Vec::with_capacity(self.tunnels.len());
        for tunnel in &self.tunnels {
            let value = state
                .value(&tunnel.outer)
                .cloned()
                .ok_or_else(|| TunnelError::MissingOuter(tunnel.outer.clone()))?;
            self.engine
                .set_value(&tunnel.inner, value.clone())
                .map_err(TunnelError::from)?;
            pushed.push(value);
        }

        let division = self
            .engine
            .advance(timestep)
            .map_err(|source| ProcessError::Inner {
                agent_id: self.name.clone(),
                source: Box::new(source),
            })?;
        if let Some(directive) = division {
            return self.divide(directive);
        }

        let mut update = Update::new();
        for (tunnel, before) in self.tunnels.iter().zip(&pushed) {
            let after = self
                .engine
                .state()
                .value(&tunnel.inner)
                .ok_or_else(|| TunnelError::MissingInner(tunnel.inner.clone()))?;
            let entry = self
                .engine
                .schema()
                .value_entry(&tunnel.inner)
                .ok_or_else(|| TunnelError::UndeclaredInner(tunnel.inner.clone()))?;
            let change = entry.updater.invert(before, after)?;
            if !change.is_empty_map() {
                update = update.value(tunnel.outer.clone(), change);
            }
        }
        Ok(update)
    }
}
