use anyhow::Result;
use clap::Parser;
use hemo_common::EngineConfig;
use hemo_engine::cell_fields::CellFields;
use hemo_engine::cell_type::CellTypes;
use hemo_engine::context::RunContext;
use hemo_engine::lattice::LatticeField;
use hemo_engine::logging::init_logging;
use hemo_engine::output::FileOutput;
use hemo_engine::simulation::{Simulation, StepOutcome};
use log::{debug, error, info, trace, warn};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::Instant;

#[derive(Parser, Debug)]
#[command(version, about = "Seeds blood cells into a lattice and advances the coupled simulation")]
struct Cli {
    /// Run configuration
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Continue from the checkpoint in the output directory instead of seeding
    #[arg(long)]
    resume: bool,

    /// Overrides `timing.total_iterations`
    #[arg(long)]
    iterations: Option<u64>,
}

/// Applies timescales, repulsion and periodicity from the configuration.
/// Any inconsistency aborts the run before the first iteration.
fn configure(sim: &mut Simulation<CellFields>, config: &EngineConfig) -> Result<()> {
    // Species rates were copied into the registry; validating the velocity
    // timescale checks every one of them.
    sim.set_particle_velocity_update_timescale_separation(config.timing.particle_velocity_update_timescale)?;

    if let Some(r) = &config.repulsion {
        sim.set_repulsion_timescale_separation(r.timescale)?;
        sim.set_repulsion(r.constant, r.cutoff_um)?;
    }
    if let Some(r) = &config.boundary_repulsion {
        sim.enable_boundary_particles(r.constant, r.cutoff_um, r.timescale)?;
    }

    for axis in 0..3 {
        sim.set_system_periodicity(axis, config.domain.periodic[axis])?;
        if config.domain.periodicity_limit[axis] > 0 {
            sim.set_system_periodicity_limit(axis, config.domain.periodicity_limit[axis])?;
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // --- Load Configuration ---
    let mut config = EngineConfig::load(&cli.config)?;
    if let Some(iterations) = cli.iterations {
        config.timing.total_iterations = iterations;
    }
    let ctx = RunContext::from_config(&config);

    // Without a logfile the run cannot be diagnosed afterwards.
    let logfile = init_logging(&ctx)?;
    info!("Starting hemo-engine with configuration {}", cli.config.display());
    if let Some(path) = &logfile {
        debug!("Logging to {}", path.display());
    }
    info!("Using {} Rayon threads.", rayon::current_num_threads());

    let flag = ctx.cancellation_flag();
    ctrlc::set_handler(move || flag.store(true, Ordering::SeqCst))?;

    // --- Initialize Simulation ---
    let cell_types = CellTypes::from_config(&config);
    let fluid = LatticeField::from_config(&config.domain, ctx.params.particle_envelope);
    let cells = CellFields::new(&cell_types, &ctx, fluid.decomposition().clone());
    debug!("Simulation Parameters: {:#?}", ctx.params);

    let mut sim = Simulation::new(ctx, config.clone(), cell_types);
    sim.set_fluid(fluid);
    sim.initialize_cell_fields(cells);
    configure(&mut sim, &config)?;

    if cli.resume {
        sim.load_checkpoint()?;
    } else {
        let report = sim.load_particles()?;
        info!(
            "Seeded {} of {} declared cells: {} particles.",
            report.declared_cells - report.completeness.removed_cells.len() as u32,
            report.declared_cells,
            report.particles
        );
    }

    // --- Simulation Loop ---
    let total = config.timing.total_iterations;
    let mut output = FileOutput;
    if sim.iter() == 0 {
        sim.write_output(&mut output)?;
    }

    info!("Starting simulation loop at iteration {} of {}...", sim.iter(), total);
    let start_time = Instant::now();
    while sim.iter() < total {
        let step_start_time = Instant::now();
        match sim.iterate()? {
            StepOutcome::Advanced => {}
            StepOutcome::Interrupted => {
                warn!("Interrupted at iteration {}, saving checkpoint.", sim.iter());
                if let Err(e) = sim.save_checkpoint() {
                    error!("Error saving checkpoint: {:#}", e);
                }
                std::process::exit(1);
            }
        }
        trace!(
            "Iteration {} completed in {:.2} ms",
            sim.iter(),
            step_start_time.elapsed().as_secs_f64() * 1000.0
        );

        let iter = sim.iter();
        if iter % config.timing.output_interval == 0 {
            sim.write_output(&mut output)?;
        }
        if iter % config.timing.checkpoint_interval == 0 {
            sim.save_checkpoint()?;
        }
    }

    info!(
        "Simulation finished in {:.3} seconds.",
        start_time.elapsed().as_secs_f64()
    );
    Ok(())
}
