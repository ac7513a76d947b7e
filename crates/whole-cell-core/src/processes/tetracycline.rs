use crate::process::{ProcessError, Step, Update};
use crate::schema::{PortsSchema, SchemaEntry, ValueDivider};
use crate::store::StateView;
use crate::value::StatePath;

pub const FREE_30S: &str = "30S";
pub const BOUND_30S: &str = "30S_tc";

/// Number of 30S subunits bound at equilibrium with `drug` tetracycline
/// molecules and `ribosomes` subunits in total.
///
/// Bisects `f(B) = B - K (T - B)(R - B)` on `[0, min(T, R)]`, where `f` is
/// non-positive at zero and non-negative at the upper bound.
pub fn solve_bound(
    binding_constant: f64,
    drug: i64,
    ribosomes: i64,
    max_iterations: usize,
    tolerance: f64,
) -> Result<i64, ProcessError> {
    let (t, r) = (drug.max(0) as f64, ribosomes.max(0) as f64);
    let residual = |b: f64| b - binding_constant * (t - b) * (r - b);
    let (mut lo, mut hi) = (0.0, t.min(r));
    if residual(lo) >= 0.0 {
        return Ok(0);
    }
    for _ in 0..max_iterations {
        if hi - lo <= tolerance {
            return Ok((0.5 * (lo + hi)).round() as i64);
        }
        let mid = 0.5 * (lo + hi);
        if residual(mid) < 0.0 {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    Err(ProcessError::SolverDidNotConverge {
        iterations: max_iterations,
    })
}

/// Re-equilibrates tetracycline binding to free 30S subunits once the
/// timestep's processes have merged.
pub struct TetracyclineEquilibrium {
    name: String,
    binding_constant: f64,
    max_iterations: usize,
    tolerance: f64,
    drug: StatePath,
    fraction_bound: StatePath,
}

impl TetracyclineEquilibrium {
    pub const NAME: &'static str = "tetracycline-equilibrium";

    pub fn new(binding_constant: f64) -> Self {
        Self {
            name: Self::NAME.to_string(),
            binding_constant,
            max_iterations: 100,
            tolerance: 0.5,
            drug: StatePath::from("tetracycline"),
            fraction_bound: StatePath::from("listeners/tetracycline/frac_30s_bound"),
        }
    }

    pub fn with_solver(mut self, max_iterations: usize, tolerance: f64) -> Self {
        self.max_iterations = max_iterations;
        self.tolerance = tolerance;
        self
    }
}

impl Step for TetracyclineEquilibrium {
    fn name(&self) -> &str {
        &self.name
    }

    fn ports_schema(&self) -> PortsSchema {
        PortsSchema::new()
            .bulk([FREE_30S, BOUND_30S])
            .value(
                self.drug.clone(),
                SchemaEntry::new(0i64)
                    .divider(ValueDivider::Binomial)
                    .emit(true),
            )
            .value(self.fraction_bound.clone(), SchemaEntry::listener(0.0))
    }

    fn update_condition(&self, _timestep: f64, state: &StateView<'_>) -> bool {
        state.evolvers_ran()
    }

    fn next_update(&mut self, _timestep: f64, state: &StateView<'_>) -> Result<Update, ProcessError> {
        let free = state.species_index(FREE_30S)?;
        let bound = state.species_index(BOUND_30S)?;
        let bound_now = state.bulk_count(bound);
        let ribosomes = state.bulk_count(free) + bound_now;
        let drug_free = state.value(&self.drug).and_then(|v| v.as_i64()).unwrap_or(0);
        let target = solve_bound(
            self.binding_constant,
            drug_free + bound_now,
            ribosomes,
            self.max_iterations,
            self.tolerance,
        )?;
        let shift = target - bound_now;
        let fraction = if ribosomes > 0 {
            target as f64 / ribosomes as f64
        } else {
            0.0
        };
        Ok(Update::new()
            .bulk(free, -shift)
            .bulk(bound, shift)
            .value(self.drug.clone(), -shift)
            .value(self.fraction_bound.clone(), fraction))
    }
}
