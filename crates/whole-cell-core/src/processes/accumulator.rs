use crate::process::{Process, ProcessError, Update};
use crate::schema::{PortsSchema, SchemaEntry};
use crate::store::StateView;
use crate::value::{StatePath, Value};

enum Addend {
    Constant(Value),
    Path(StatePath),
}

/// Adds a constant, or the current value at another path, to `target` every
/// update.
pub struct Accumulator {
    name: String,
    target: StatePath,
    addend: Addend,
}

impl Accumulator {
    pub fn constant(
        name: impl Into<String>,
        target: impl Into<StatePath>,
        amount: impl Into<Value>,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            addend: Addend::Constant(amount.into()),
        }
    }

    /// Integer-valued `target += source`.
    pub fn from_path(
        name: impl Into<String>,
        target: impl Into<StatePath>,
        source: impl Into<StatePath>,
    ) -> Self {
        Self {
            name: name.into(),
            target: target.into(),
            addend: Addend::Path(source.into()),
        }
    }
}

impl Process for Accumulator {
    fn name(&self) -> &str {
        &self.name
    }

    fn ports_schema(&self) -> PortsSchema {
        match &self.addend {
            Addend::Constant(amount) => PortsSchema::new().value(
                self.target.clone(),
                SchemaEntry::new(amount.zeroed()).emit(true),
            ),
            Addend::Path(source) => PortsSchema::new()
                .value(self.target.clone(), SchemaEntry::new(0i64).emit(true))
                .value(source.clone(), SchemaEntry::new(0i64).emit(true)),
        }
    }

    fn next_update(&mut self, _timestep: f64, state: &StateView<'_>) -> Result<Update, ProcessError> {
        let amount = match &self.addend {
            Addend::Constant(amount) => amount.clone(),
            Addend::Path(source) => state.value(source).cloned().unwrap_or(Value::Int(0)),
        };
        Ok(Update::new().value(self.target.clone(), amount))
    }
}
