use hemo_common::{EngineConfig, Snapshot};
use hemo_engine::cell_fields::CellFields;
use hemo_engine::cell_type::CellTypes;
use hemo_engine::context::RunContext;
use hemo_engine::error::ConfigError;
use hemo_engine::lattice::LatticeField;
use hemo_engine::output::{CellInfo, FileOutput};
use hemo_engine::simulation::{ImmersedCells, Simulation, StepOutcome};
use std::fs;
use std::path::{Path, PathBuf};

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("hemo-orchestration-{}-{}", name, std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    dir
}

/// One 12-vertex cell at (10, 10, 10) µm in a 20³ lattice carried along x at 0.5 lu per step.
fn config(dir: &Path, periodic_x: bool, sub_step_rate: u32) -> EngineConfig {
    let pos = dir.join("RBC.pos");
    fs::write(&pos, "1\n10 10 10 0 0 0\n").unwrap();
    let text = format!(
        r#"
        [domain]
        lattice_size = [20, 20, 20]
        dx_m = 1e-6
        dt_s = 1e-7
        blocks = [2, 1, 1]
        particle_envelope = 4
        periodic = [{}, false, false]
        base_velocity = [0.5, 0.0, 0.0]
        [timing]
        total_iterations = 40
        output_interval = 10
        checkpoint_interval = 20
        [[species]]
        name = "RBC"
        sub_step_rate = {}
        mesh = {{ kind = "icosphere", radius_um = 2.0, subdivisions = 0 }}
        positions_file = "{}"
        [output]
        output_directory = "{}"
        "#,
        periodic_x,
        sub_step_rate,
        pos.display(),
        dir.join("out").display()
    );
    EngineConfig::from_toml_str(&text).unwrap()
}

fn build(config: &EngineConfig) -> Simulation<CellFields> {
    let ctx = RunContext::from_config(config);
    let types = CellTypes::from_config(config);
    let fluid = LatticeField::from_config(&config.domain, ctx.params.particle_envelope);
    let cells = CellFields::new(&types, &ctx, fluid.decomposition().clone());
    let mut sim = Simulation::new(ctx, config.clone(), types);
    sim.set_fluid(fluid);
    sim.initialize_cell_fields(cells);
    for axis in 0..3 {
        sim.set_system_periodicity(axis, config.domain.periodic[axis]).unwrap();
    }
    sim
}

fn run(sim: &mut Simulation<CellFields>, iterations: u64) {
    for _ in 0..iterations {
        assert_eq!(sim.iterate().unwrap(), StepOutcome::Advanced);
    }
}

#[test]
fn periodic_flow_carries_the_cell_around_intact() {
    let dir = scratch_dir("periodic");
    let config = config(&dir, true, 1);
    let mut sim = build(&config);
    assert_eq!(sim.load_particles().unwrap().particles, 12);

    for _ in 0..4 {
        run(&mut sim, 10);
        sim.cells_mut().unwrap().sync_envelopes();
        assert_eq!(sim.cells().unwrap().particle_count(), 12, "cell lost vertices at iteration {}", sim.iter());
    }
    // 40 steps at 0.5 lu cover exactly one period
    let info = sim.cells().unwrap().cell_info();
    assert_eq!(info.len(), 1);
    assert!(info[0].complete);
    assert!((info[0].x_um - 10.0).abs() < 1e-3, "centre ended at {}", info[0].x_um);
    fs::remove_dir_all(&dir).ok();
}

#[test]
fn closed_domain_flow_removes_the_cell_at_the_end() {
    let dir = scratch_dir("closed");
    let config = config(&dir, false, 1);
    let mut sim = build(&config);
    sim.load_particles().unwrap();

    run(&mut sim, 40);
    sim.delete_incomplete_cells().unwrap();
    assert_eq!(sim.cells().unwrap().particle_count(), 0);
    assert_eq!(sim.cells().unwrap().declared_cells(), 1);
    fs::remove_dir_all(&dir).ok();
}

#[test]
fn output_and_checkpoint_resume() {
    let dir = scratch_dir("resume");
    let config = config(&dir, true, 2);
    let mut sim = build(&config);
    sim.set_particle_velocity_update_timescale_separation(2).unwrap();
    sim.load_particles().unwrap();

    run(&mut sim, 10);
    sim.write_output(&mut FileOutput).unwrap();
    let json = dir.join("out/json/000000000010/snapshot.json");
    let snapshot: Snapshot = serde_json::from_str(&fs::read_to_string(&json).unwrap()).unwrap();
    assert_eq!(snapshot.iteration, 10);
    assert_eq!(snapshot.total_particle_count, 12);
    assert_eq!(snapshot.declared_cells, 1);
    assert!((snapshot.time_s - 1e-6).abs() < 1e-15);

    let mut reader = csv::Reader::from_path(dir.join("out/csv/000000000010/CellInfo.csv")).unwrap();
    let rows: Vec<CellInfo> = reader.deserialize().collect::<Result<_, _>>().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].species, "RBC");
    assert_eq!(rows[0].vertices, 12);

    sim.save_checkpoint().unwrap();
    let expected = sim.cells().unwrap().cell_info();

    let mut resumed = build(&config);
    resumed.set_particle_velocity_update_timescale_separation(2).unwrap();
    resumed.load_checkpoint().unwrap();
    assert_eq!(resumed.iter(), 10);
    assert!(resumed.particles_loaded());
    resumed.cells_mut().unwrap().sync_envelopes();
    assert_eq!(resumed.cells().unwrap().cell_info(), expected);

    // Both runs continue identically
    run(&mut sim, 6);
    run(&mut resumed, 6);
    assert_eq!(resumed.cells().unwrap().cell_info(), sim.cells().unwrap().cell_info());
    fs::remove_dir_all(&dir).ok();
}

#[test]
fn inconsistent_timescales_are_rejected_before_stepping() {
    let dir = scratch_dir("timescales");
    let config = config(&dir, false, 3);
    let mut sim = build(&config);
    let err = sim.set_particle_velocity_update_timescale_separation(2).unwrap_err();
    assert!(matches!(err, ConfigError::TimescaleNotDivisible { rate: 3, velocity_timescale: 2, .. }));
    assert_eq!(sim.particle_velocity_update_timescale(), 1);
    assert!(err.to_string().contains("RBC"));
    fs::remove_dir_all(&dir).ok();
}

#[test]
fn cancellation_stops_before_the_next_step() {
    let dir = scratch_dir("cancel");
    let config = config(&dir, true, 1);
    let mut sim = build(&config);
    sim.load_particles().unwrap();
    run(&mut sim, 3);

    sim.context().cancellation_flag().store(true, std::sync::atomic::Ordering::SeqCst);
    assert_eq!(sim.iterate().unwrap(), StepOutcome::Interrupted);
    assert_eq!(sim.iter(), 3);
    sim.save_checkpoint().unwrap();
    assert!(dir.join("out/checkpoint/checkpoint.bin").exists());
    fs::remove_dir_all(&dir).ok();
}
