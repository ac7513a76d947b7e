use std::collections::HashSet;

use proptest::prelude::*;

use super::*;
use crate::allocator::AllocationPolicy;
use crate::division::UniqueDivider;
use crate::process::{AgentSpec, Request, Update};
use crate::processes::{BulkConsumer, TetracyclineEquilibrium, ToyCell, ToyCellParams};
use crate::schema::{CollectionSchema, PortsSchema, SchemaEntry, Updater};
use crate::store::{BulkPool, ColumnData, ColumnKind, ColumnSpec, StateView, UniqueUpdate};
use crate::tunnel::Composer;

fn pool(species: &[(&str, i64)]) -> CellState {
    CellState::new().with_bulk(BulkPool::new(species.iter().copied()).unwrap())
}

fn consumed(engine: &Engine, name: &str) -> i64 {
    engine
        .state()
        .value(&StatePath::new(&["listeners", name, "consumed"]))
        .and_then(Value::as_i64)
        .unwrap()
}

/// Plain process removing a fixed amount of one species every update.
struct Drain {
    name: String,
    species: String,
    amount: i64,
}

impl Drain {
    fn new(name: &str, species: &str, amount: i64) -> Self {
        Self {
            name: name.to_string(),
            species: species.to_string(),
            amount,
        }
    }
}

impl Process for Drain {
    fn name(&self) -> &str {
        &self.name
    }

    fn ports_schema(&self) -> PortsSchema {
        PortsSchema::new().bulk([self.species.clone()])
    }

    fn next_update(&mut self, _timestep: f64, state: &StateView<'_>) -> Result<Update, ProcessError> {
        Ok(Update::new().bulk(state.species_index(&self.species)?, -self.amount))
    }
}

/// Asks for 5 X and takes 10.
struct Greedy;

impl PartitionedProcess for Greedy {
    fn name(&self) -> &str {
        "greedy"
    }

    fn ports_schema(&self) -> PortsSchema {
        PortsSchema::new().bulk(["X"])
    }

    fn calculate_request(
        &mut self,
        _timestep: f64,
        state: &StateView<'_>,
    ) -> Result<Request, ProcessError> {
        Ok(Request::new().bulk(state.species_index("X")?, 5))
    }

    fn evolve_state(&mut self, _timestep: f64, state: &StateView<'_>) -> Result<Update, ProcessError> {
        Ok(Update::new().bulk(state.species_index("X")?, -10))
    }
}

const ROWS: &str = "rows";

fn rows_schema() -> CollectionSchema {
    CollectionSchema {
        columns: vec![ColumnSpec::new("value", ColumnKind::Int)],
        divider: UniqueDivider::Empty,
        emit: true,
    }
}

fn rows_state(values: Vec<i64>) -> CellState {
    let mut rows = UniqueCollection::new(ROWS, rows_schema().columns, 0).unwrap();
    rows.create(values.len(), &[("value".to_string(), ColumnData::Int(values))])
        .unwrap();
    CellState::new().with_collection(rows)
}

/// Plain process submitting the same collection update every timestep.
struct RowEditor {
    name: String,
    update: UniqueUpdate,
}

impl RowEditor {
    fn new(name: &str, update: UniqueUpdate) -> Self {
        Self {
            name: name.to_string(),
            update,
        }
    }
}

impl Process for RowEditor {
    fn name(&self) -> &str {
        &self.name
    }

    fn ports_schema(&self) -> PortsSchema {
        PortsSchema::new().collection(ROWS, rows_schema())
    }

    fn next_update(&mut self, _timestep: f64, _state: &StateView<'_>) -> Result<Update, ProcessError> {
        Ok(Update::new().collection(ROWS, self.update.clone()))
    }
}

/// Step appending its name to a shared trail.
struct Recorder {
    name: String,
    after: Vec<String>,
    enabled: bool,
}

impl Recorder {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            after: Vec::new(),
            enabled: true,
        }
    }

    fn after(mut self, step: &str) -> Self {
        self.after.push(step.to_string());
        self
    }

    fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

impl Step for Recorder {
    fn name(&self) -> &str {
        &self.name
    }

    fn ports_schema(&self) -> PortsSchema {
        PortsSchema::new().value("trail", SchemaEntry::new("").updater(Updater::Set))
    }

    fn depends_on(&self) -> Vec<String> {
        self.after.clone()
    }

    fn update_condition(&self, _timestep: f64, state: &StateView<'_>) -> bool {
        self.enabled && state.evolvers_ran()
    }

    fn next_update(&mut self, _timestep: f64, state: &StateView<'_>) -> Result<Update, ProcessError> {
        let trail = state
            .value(&StatePath::from("trail"))
            .and_then(Value::as_text)
            .unwrap_or_default();
        let next = if trail.is_empty() {
            self.name.clone()
        } else {
            format!("{trail},{}", self.name)
        };
        Ok(Update::new().value("trail", next.as_str()))
    }
}

fn trail(engine: &Engine) -> String {
    engine
        .state()
        .value(&StatePath::from("trail"))
        .and_then(Value::as_text)
        .unwrap_or_default()
        .to_string()
}

#[test]
fn contested_species_is_shared_and_conserved() {
    let roles = vec![
        ProcessRole::partitioned(BulkConsumer::new("a", [("X", 70)])),
        ProcessRole::partitioned(BulkConsumer::new("b", [("X", 70)])),
    ];
    let mut engine = Engine::new(roles, pool(&[("X", 100)]), SimConfig::default()).unwrap();
    let outcome = engine.step().unwrap();
    assert_eq!(consumed(&engine, "a"), 50);
    assert_eq!(consumed(&engine, "b"), 50);
    assert_eq!(engine.state().bulk.count("X").unwrap(), 0);
    assert_eq!(outcome.shortfall, 1);
    assert_eq!(engine.shortfall_events(), 1);
}

#[test]
fn higher_priority_is_served_first() {
    let roles = vec![
        ProcessRole::partitioned(BulkConsumer::new("low", [("X", 70)])),
        ProcessRole::partitioned(BulkConsumer::new("high", [("X", 70)]).with_priority(10)),
    ];
    let mut engine = Engine::new(roles, pool(&[("X", 100)]), SimConfig::default()).unwrap();
    engine.step().unwrap();
    assert_eq!(consumed(&engine, "high"), 70);
    assert_eq!(consumed(&engine, "low"), 30);
}

#[test]
fn proportional_policy_ignores_priority() {
    let roles = vec![
        ProcessRole::partitioned(BulkConsumer::new("low", [("X", 70)])),
        ProcessRole::partitioned(BulkConsumer::new("high", [("X", 70)]).with_priority(10)),
    ];
    let config = SimConfig {
        allocation_policy: AllocationPolicy::Proportional,
        ..SimConfig::default()
    };
    let mut engine = Engine::new(roles, pool(&[("X", 100)]), config).unwrap();
    engine.step().unwrap();
    assert_eq!(consumed(&engine, "high"), 50);
    assert_eq!(consumed(&engine, "low"), 50);
}

#[test]
fn uncontested_requests_are_granted_in_full() {
    let roles = vec![ProcessRole::partitioned(BulkConsumer::new("a", [("X", 30), ("Y", 2)]))];
    let mut engine =
        Engine::new(roles, pool(&[("X", 100), ("Y", 5)]), SimConfig::default()).unwrap();
    let outcome = engine.step().unwrap();
    assert_eq!(outcome.shortfall, 0);
    assert_eq!(engine.state().bulk.counts(), &[70, 3]);
    assert_eq!(engine.shortfall_events(), 0);
}

#[test]
fn drawing_beyond_the_grant_is_rejected() {
    let roles = vec![ProcessRole::partitioned(Greedy)];
    let mut engine = Engine::new(roles, pool(&[("X", 100)]), SimConfig::default()).unwrap();
    match engine.step() {
        Err(EngineError::Overdraw {
            process,
            species,
            drawn,
            granted,
        }) => {
            assert_eq!(process, "greedy");
            assert_eq!(species, "X");
            assert_eq!((drawn, granted), (10, 5));
        }
        other => panic!("expected overdraw, got {other:?}"),
    }
}

#[test]
fn net_negative_bulk_names_the_drawing_processes() {
    let roles = vec![
        ProcessRole::plain(Drain::new("first", "X", 6)),
        ProcessRole::plain(Drain::new("second", "X", 6)),
    ];
    let mut engine = Engine::new(roles, pool(&[("X", 10)]), SimConfig::default()).unwrap();
    match engine.step() {
        Err(EngineError::NegativeBulk {
            species,
            count,
            processes,
            ..
        }) => {
            assert_eq!(species, "X");
            assert_eq!(count, -2);
            assert_eq!(processes, vec!["first", "second"]);
        }
        other => panic!("expected negative bulk, got {other:?}"),
    }
}

#[test]
fn adding_rows_yields_fresh_unique_indices() {
    let roles = vec![ProcessRole::plain(RowEditor::new(
        "grow",
        UniqueUpdate::new().add(2, vec![("value".to_string(), ColumnData::Int(vec![7, 8]))]),
    ))];
    let mut engine = Engine::new(roles, rows_state(vec![1, 2, 3]), SimConfig::default()).unwrap();
    let before: HashSet<u64> = engine
        .state()
        .collection(ROWS)
        .unwrap()
        .unique_indices()
        .into_iter()
        .collect();
    engine.step().unwrap();
    let rows = engine.state().collection(ROWS).unwrap();
    assert_eq!(rows.len(), 5);
    let after: HashSet<u64> = rows.unique_indices().into_iter().collect();
    assert_eq!(after.len(), 5);
    assert!(before.is_subset(&after));
}

#[test]
fn rows_deleted_earlier_in_the_timestep_stay_deleted() {
    let roles = vec![
        ProcessRole::plain(RowEditor::new("first", UniqueUpdate::new().delete([1]))),
        ProcessRole::plain(RowEditor::new(
            "second",
            UniqueUpdate::new()
                .delete([1])
                .set("value", ColumnData::Int(vec![10, 20, 30])),
        )),
    ];
    let mut engine = Engine::new(roles, rows_state(vec![1, 2, 3]), SimConfig::default()).unwrap();
    engine.step().unwrap();
    let rows = engine.state().collection(ROWS).unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(
        rows.read_column("value").unwrap().as_int().unwrap(),
        &[10, 30]
    );
}

#[test]
fn steps_run_in_dependency_order_and_see_earlier_steps() {
    let roles = vec![
        ProcessRole::step(Recorder::new("c").after("b")),
        ProcessRole::step(Recorder::new("b").after("a")),
        ProcessRole::step(Recorder::new("a")),
        ProcessRole::step(Recorder::new("d")),
    ];
    let mut engine = Engine::new(roles, CellState::new(), SimConfig::default()).unwrap();
    assert_eq!(engine.process_names(), vec!["a", "b", "c", "d"]);
    engine.step().unwrap();
    assert_eq!(trail(&engine), "a,b,c,d");
}

#[test]
fn false_update_condition_skips_a_step() {
    let roles = vec![
        ProcessRole::step(Recorder::new("on")),
        ProcessRole::step(Recorder::new("off").disabled()),
    ];
    let mut engine = Engine::new(roles, CellState::new(), SimConfig::default()).unwrap();
    engine.step().unwrap();
    assert_eq!(trail(&engine), "on");
}

#[test]
fn step_dependency_errors_are_reported() {
    let cycle = vec![
        ProcessRole::step(Recorder::new("a").after("b")),
        ProcessRole::step(Recorder::new("b").after("a")),
        ProcessRole::step(Recorder::new("c")),
    ];
    match Engine::new(cycle, CellState::new(), SimConfig::default()) {
        Err(EngineInitError::DependencyCycle(names)) => assert_eq!(names, vec!["a", "b"]),
        other => panic!("expected cycle, got {:?}", other.err()),
    }

    let unknown = vec![ProcessRole::step(Recorder::new("a").after("ghost"))];
    assert!(matches!(
        Engine::new(unknown, CellState::new(), SimConfig::default()),
        Err(EngineInitError::UnknownDependency { dependency, .. }) if dependency == "ghost"
    ));

    let duplicate = vec![
        ProcessRole::step(Recorder::new("a")),
        ProcessRole::plain(Drain::new("a", "X", 1)),
    ];
    assert!(matches!(
        Engine::new(duplicate, CellState::new(), SimConfig::default()),
        Err(EngineInitError::DuplicateProcess(name)) if name == "a"
    ));
}

#[test]
fn invalid_config_is_rejected_at_construction() {
    let config = SimConfig {
        timestep: 0.0,
        ..SimConfig::default()
    };
    assert!(matches!(
        Engine::new(Vec::new(), CellState::new(), config),
        Err(EngineInitError::Config(SimConfigError::InvalidTimestep))
    ));
    let config = SimConfig {
        unique_growth_fraction: 0.0,
        ..SimConfig::default()
    };
    assert!(matches!(
        Engine::new(Vec::new(), CellState::new(), config),
        Err(EngineInitError::Config(
            SimConfigError::InvalidUniqueGrowthFraction { .. }
        ))
    ));
}

#[test]
fn declared_species_and_defaults_are_filled_in() {
    let roles = vec![
        ProcessRole::partitioned(BulkConsumer::new("a", [("ATP", 1)])),
        ProcessRole::step(Recorder::new("r")),
    ];
    let engine = Engine::new(roles, CellState::new(), SimConfig::default()).unwrap();
    assert_eq!(engine.state().bulk.count("ATP").unwrap(), 0);
    assert_eq!(
        engine.state().value(&StatePath::from("trail")),
        Some(&Value::Text(String::new()))
    );
}

#[test]
fn advance_splits_the_duration_into_timesteps() {
    let roles = vec![ProcessRole::plain(Drain::new("drain", "X", 1))];
    let mut engine = Engine::new(roles, pool(&[("X", 10)]), SimConfig::default()).unwrap();
    assert!(engine.advance(2.5).unwrap().is_none());
    assert_eq!(engine.step_index(), 3);
    assert!((engine.time() - 2.5).abs() < 1e-12);
    assert!(matches!(
        engine.advance(-1.0),
        Err(EngineError::InvalidDuration(_))
    ));
}

#[test]
fn run_for_emits_on_schedule() {
    let roles = vec![ProcessRole::plain(Drain::new("drain", "X", 1))];
    let config = SimConfig {
        emit_every: 2,
        ..SimConfig::default()
    };
    let mut engine = Engine::new(roles, pool(&[("X", 10)]), config).unwrap();
    let summary = engine.run_for(5).unwrap();
    let steps: Vec<usize> = summary.frames.iter().map(|f| f.step).collect();
    assert_eq!(steps, vec![0, 2, 4, 5]);
    assert_eq!(summary.frames[3].bulk.get("X"), Some(&5));
    assert_eq!(summary.steps, 5);
    assert!(!summary.divided);
}

#[test]
fn solver_failure_is_fatal_and_names_the_step() {
    let roles = vec![ProcessRole::step(
        TetracyclineEquilibrium::new(0.01).with_solver(1, 0.5),
    )];
    let state = pool(&[("30S", 1000), ("30S_tc", 0)])
        .with_value("tetracycline", 1000i64)
        .unwrap();
    let mut engine = Engine::new(roles, state, SimConfig::default()).unwrap();
    match engine.step() {
        Err(EngineError::SolverDidNotConverge {
            process,
            iterations,
            ..
        }) => {
            assert_eq!(process, TetracyclineEquilibrium::NAME);
            assert_eq!(iterations, 1);
        }
        other => panic!("expected solver failure, got {other:?}"),
    }
}

fn toy_engine(config: SimConfig) -> Engine {
    let cell = ToyCell::new(ToyCellParams::default()).unwrap();
    let state = cell.initial_state(config.seed).unwrap();
    Engine::new(cell.processes(&config.agent_id, config.seed), state, config).unwrap()
}

#[test]
fn parallel_run_matches_sequential_run() {
    let sequential = toy_engine(SimConfig {
        seed: 3,
        ..SimConfig::default()
    })
    .run_for(6)
    .unwrap();
    let parallel = toy_engine(SimConfig {
        seed: 3,
        parallel: true,
        ..SimConfig::default()
    })
    .run_for(6)
    .unwrap();
    assert_eq!(sequential, parallel);
}

#[test]
fn toy_cell_gains_mass() {
    let mut engine = toy_engine(SimConfig::default());
    engine.run_for(3).unwrap();
    let first = engine
        .state()
        .value(&StatePath::from("listeners/mass/dry_mass"))
        .and_then(Value::as_f64)
        .unwrap();
    engine.run_for(20).unwrap();
    let later = engine
        .state()
        .value(&StatePath::from("listeners/mass/dry_mass"))
        .and_then(Value::as_f64)
        .unwrap();
    assert!(first > 0.0);
    assert!(later > first);
}

fn dividing_config(seed: u64) -> SimConfig {
    SimConfig {
        seed,
        divide: true,
        division_threshold: DivisionThreshold::Fixed { value: 1.0 },
        ..SimConfig::default()
    }
}

#[test]
fn division_conserves_bulk_and_unique_rows() {
    let mut engine = toy_engine(dividing_config(8));
    let outcome = engine.step().unwrap();
    let directive = outcome.division.expect("threshold of 1.0 is crossed at once");
    assert_eq!(directive.mother, "0");
    let [first, second] = &directive.daughters;
    assert_eq!(first.agent_id, "00");
    assert_eq!(second.agent_id, "01");
    assert_ne!(first.seed, second.seed);

    let mother = engine.state();
    for (i, &count) in mother.bulk.counts().iter().enumerate() {
        assert_eq!(
            first.state.bulk.counts()[i] + second.state.bulk.counts()[i],
            count
        );
    }
    for (name, collection) in &mother.collections {
        let a = first.state.collection(name).unwrap();
        let b = second.state.collection(name).unwrap();
        let a_ids: HashSet<u64> = a.unique_indices().into_iter().collect();
        let b_ids: HashSet<u64> = b.unique_indices().into_iter().collect();
        assert!(a_ids.is_disjoint(&b_ids), "{name} row in both daughters");
        let expected = if name == "chromosome_domain" {
            collection.len() - 1
        } else {
            collection.len()
        };
        assert_eq!(a.len() + b.len(), expected, "{name}");
    }
    assert_eq!(engine.division().map(|d| d.mother.as_str()), Some("0"));
}

#[test]
fn divided_engine_refuses_to_step() {
    let mut engine = toy_engine(dividing_config(8));
    assert!(engine.step().unwrap().division.is_some());
    assert!(engine.division().is_some());
    assert!(matches!(engine.step(), Err(EngineError::Divided(id)) if id == "0"));
}

#[test]
fn division_is_reproducible_for_a_seed() {
    let split = |seed| {
        let mut engine = toy_engine(dividing_config(seed));
        let directive = engine.step().unwrap().division.unwrap();
        directive
            .daughters
            .map(|d| d.state.bulk.counts().to_vec())
    };
    assert_eq!(split(21), split(21));
}

#[test]
fn missing_division_variable_is_an_error() {
    let roles = vec![ProcessRole::plain(Drain::new("drain", "X", 1))];
    let config = SimConfig {
        divide: true,
        division_variable: StatePath::from("listeners/nowhere"),
        ..SimConfig::default()
    };
    let mut engine = Engine::new(roles, pool(&[("X", 10)]), config).unwrap();
    assert!(matches!(
        engine.step(),
        Err(EngineError::DivisionVariable(_))
    ));
}

#[test]
fn unknown_mother_is_rejected() {
    let mut engine = Engine::new(Vec::new(), CellState::new(), SimConfig::default()).unwrap();
    let update = AgentsUpdate::Divide {
        mother: "ghost".to_string(),
        daughters: Vec::new(),
    };
    assert!(matches!(
        engine.apply_agents_update(update),
        Err(EngineError::UnknownProcess(name)) if name == "ghost"
    ));
}

fn row_editor_declaring(name: &str, emit: bool) -> ProcessRole {
    struct Declaring {
        editor: RowEditor,
        emit: bool,
    }

    impl Process for Declaring {
        fn name(&self) -> &str {
            self.editor.name()
        }

        fn ports_schema(&self) -> PortsSchema {
            PortsSchema::new().collection(
                ROWS,
                CollectionSchema {
                    emit: self.emit,
                    ..rows_schema()
                },
            )
        }

        fn next_update(&mut self, timestep: f64, state: &StateView<'_>) -> Result<Update, ProcessError> {
            self.editor.next_update(timestep, state)
        }
    }

    ProcessRole::plain(Declaring {
        editor: RowEditor::new(name, UniqueUpdate::new()),
        emit,
    })
}

#[test]
fn daughters_may_redeclare_what_only_the_mother_owned() {
    let mut engine = Engine::new(
        vec![row_editor_declaring("mother", true)],
        rows_state(vec![1, 2]),
        SimConfig::default(),
    )
    .unwrap();
    let update = AgentsUpdate::Divide {
        mother: "mother".to_string(),
        daughters: vec![AgentSpec {
            id: "mother0".to_string(),
            processes: vec![row_editor_declaring("mother0", false)],
        }],
    };
    engine.apply_agents_update(update).unwrap();
    assert!(!engine.schema().collection(ROWS).unwrap().emit);
    assert_eq!(engine.process_names(), vec!["mother0"]);
}

#[test]
fn declarations_shared_with_a_survivor_still_conflict() {
    let roles = vec![
        row_editor_declaring("mother", true),
        row_editor_declaring("keeper", true),
    ];
    let mut engine = Engine::new(roles, rows_state(vec![1]), SimConfig::default()).unwrap();
    let update = AgentsUpdate::Divide {
        mother: "mother".to_string(),
        daughters: vec![AgentSpec {
            id: "mother0".to_string(),
            processes: vec![row_editor_declaring("mother0", false)],
        }],
    };
    assert!(matches!(
        engine.apply_agents_update(update),
        Err(EngineError::Init(EngineInitError::Schema(SchemaError::Conflict { .. })))
    ));
}

proptest! {
    #[test]
    fn grants_never_exceed_supply_or_demand(
        available in 0i64..500,
        demands in prop::collection::vec(0i64..300, 1..5),
        priorities in prop::collection::vec(0i32..3, 5),
    ) {
        let names: Vec<String> = (0..demands.len()).map(|i| format!("p{i}")).collect();
        let roles = names
            .iter()
            .zip(&demands)
            .zip(&priorities)
            .map(|((name, &demand), &priority)| {
                ProcessRole::partitioned(
                    BulkConsumer::new(name.clone(), [("X", demand)]).with_priority(priority),
                )
            })
            .collect();
        let mut engine = Engine::new(roles, pool(&[("X", available)]), SimConfig::default()).unwrap();
        engine.step().unwrap();
        let mut total = 0;
        for (name, &demand) in names.iter().zip(&demands) {
            let got = consumed(&engine, name);
            prop_assert!(got >= 0 && got <= demand);
            total += got;
        }
        prop_assert!(total <= available);
        prop_assert_eq!(engine.state().bulk.count("X").unwrap(), available - total);
        if demands.iter().sum::<i64>() >= available {
            prop_assert_eq!(total, available);
        }
    }
}
