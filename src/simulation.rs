use crate::cell_type::CellTypes;
use crate::checkpoint::CheckpointStore;
use crate::completeness::CompletenessReport;
use crate::context::RunContext;
use crate::error::ConfigError;
use crate::lattice::FluidSolver;
use crate::mesh_placement::PlacementStats;
use crate::output::{CellInfo, OutputFolders, OutputSink};
use anyhow::Result;
use hemo_common::{EngineConfig, PeriodicityLimit, Snapshot, SpeciesCount};
use log::{debug, info, trace, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Instant;

/// Margin (lattice nodes) beyond the owned region kept by the non-local pruning pass.
pub const NON_LOCAL_MARGIN: i32 = 3;

/// Soft repulsion between particles closer than `cutoff` (lattice units).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RepulsionParams {
    pub constant: f64,
    pub cutoff: f64,
}

impl RepulsionParams {
    /// Force magnitude at distance `r`: `constant * (cutoff / r - 1)` inside the cutoff.
    #[inline(always)]
    pub fn magnitude(&self, r: f64) -> f64 {
        if r >= self.cutoff || r <= 0.0 {
            0.0
        } else {
            self.constant * (self.cutoff / r - 1.0)
        }
    }
}

/// Outcome of seeding.
#[derive(Debug, Clone, Default)]
pub struct LoadReport {
    /// Records in all placement files, including discarded ones
    pub declared_cells: u32,
    /// Vertex acceptance and rejection counts of the placement pass
    pub placement: PlacementStats,
    /// Cells removed because a vertex was rejected somewhere
    pub completeness: CompletenessReport,
    /// Owned particles after the completeness filter
    pub particles: usize,
}

/// Result of one call to [`Simulation::iterate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutcome {
    Advanced,
    /// Cancellation was requested; nothing was done. The caller must checkpoint and exit.
    Interrupted,
}

/// The particle side of the immersed-boundary coupling, as driven by [`Simulation`].
pub trait ImmersedCells {
    type Fluid: FluidSolver;
    /// Checkpointed particle state.
    type State: Serialize + DeserializeOwned;

    /// Seeds all species, synchronizes the envelopes and removes incomplete cells.
    fn load_particles(&mut self, cell_types: &CellTypes, fluid: &Self::Fluid) -> Result<LoadReport>;
    fn sync_envelopes(&mut self);
    fn apply_repulsion_force(&mut self, params: &RepulsionParams);
    fn apply_boundary_repulsion_force(&mut self, params: &RepulsionParams, fluid: &Self::Fluid);
    fn spread_particle_force(&mut self, fluid: &mut Self::Fluid);
    fn interpolate_fluid_velocity(&mut self, fluid: &Self::Fluid);
    fn advance_particles(&mut self);
    fn apply_constitutive_model(&mut self, species: usize);
    fn delete_non_local_particles(&mut self, margin: i32) -> usize;
    fn delete_incomplete_cells(&mut self, species: Option<u16>, verbose: bool) -> CompletenessReport;
    fn separate_force_vectors(&mut self);
    fn unify_force_vectors(&mut self);
    fn set_periodicity(&mut self, axis: usize, periodic: bool);
    fn set_periodicity_limit(&mut self, limit: PeriodicityLimit);
    fn particle_count(&self) -> usize;
    fn declared_cells(&self) -> u32;
    fn species_counts(&self) -> Vec<SpeciesCount>;
    fn cell_info(&self) -> Vec<CellInfo>;
    fn save_state(&self) -> Self::State;
    fn restore_state(&mut self, state: Self::State) -> Result<()>;
}

/// Drives the coupled fluid / cell time integration with independent sub-stepping rates.
///
/// Every gate is evaluated on `iter` before it is incremented, so an operation with
/// rate `k` runs at iterations `0, k, 2k, ...`. All rates must be multiples of the
/// particle velocity update timescale; the setters refuse any other value.
pub struct Simulation<C: ImmersedCells> {
    ctx: RunContext,
    config: EngineConfig,
    cell_types: CellTypes,
    particle_velocity_update_timescale: u32,
    /// Explicit repulsion rate; `None` follows the velocity update timescale
    repulsion_timescale: Option<u32>,
    boundary_repulsion_timescale: Option<u32>,
    repulsion: Option<RepulsionParams>,
    boundary_repulsion: Option<RepulsionParams>,
    fluid: Option<C::Fluid>,
    cells: Option<C>,
    iter: u64,
    particles_loaded: bool,
    periodicity_limit: PeriodicityLimit,
    /// Wall-clock time and iteration of the previous output
    last_output: Option<(Instant, u64)>,
    checkpoints: CheckpointStore,
}

impl<C: ImmersedCells> Simulation<C> {
    pub fn new(ctx: RunContext, config: EngineConfig, cell_types: CellTypes) -> Self {
        let checkpoints = CheckpointStore::new(&ctx.output_dir);
        Simulation {
            ctx,
            config,
            cell_types,
            particle_velocity_update_timescale: 1,
            repulsion_timescale: None,
            boundary_repulsion_timescale: None,
            repulsion: None,
            boundary_repulsion: None,
            fluid: None,
            cells: None,
            iter: 0,
            particles_loaded: false,
            periodicity_limit: PeriodicityLimit::default(),
            last_output: None,
            checkpoints,
        }
    }

    pub fn context(&self) -> &RunContext {
        &self.ctx
    }

    pub fn iter(&self) -> u64 {
        self.iter
    }

    pub fn cell_types(&self) -> &CellTypes {
        &self.cell_types
    }

    pub fn fluid(&self) -> Option<&C::Fluid> {
        self.fluid.as_ref()
    }

    pub fn cells(&self) -> Option<&C> {
        self.cells.as_ref()
    }

    pub fn cells_mut(&mut self) -> Option<&mut C> {
        self.cells.as_mut()
    }

    pub fn particle_velocity_update_timescale(&self) -> u32 {
        self.particle_velocity_update_timescale
    }

    pub fn periodicity_limit(&self) -> PeriodicityLimit {
        self.periodicity_limit
    }

    pub fn particles_loaded(&self) -> bool {
        self.particles_loaded
    }

    pub fn set_fluid(&mut self, fluid: C::Fluid) {
        self.fluid = Some(fluid);
    }

    pub fn initialize_cell_fields(&mut self, cells: C) {
        self.cells = Some(cells);
    }

    // --- Timescale separation ---

    fn check_divisible(&self, what: &str, rate: u32, velocity_timescale: u32) -> Result<(), ConfigError> {
        if rate == 0 {
            return Err(ConfigError::InvalidRate { what: what.to_string() });
        }
        if rate % velocity_timescale != 0 {
            return Err(ConfigError::TimescaleNotDivisible {
                what: what.to_string(),
                rate,
                velocity_timescale,
            });
        }
        Ok(())
    }

    /// Sets the constitutive sub-stepping rate of one species.
    pub fn set_material_timescale_separation(&mut self, name: &str, rate: u32) -> Result<(), ConfigError> {
        info!("Setting material timescale separation of {} to {} iterations", name, rate);
        self.check_divisible(name, rate, self.particle_velocity_update_timescale)?;
        self.cell_types.by_name_mut(name)?.sub_step_rate = rate;
        Ok(())
    }

    /// Sets the baseline rate of velocity interpolation and envelope synchronization.
    /// Every configured rate is re-validated against the new value first.
    pub fn set_particle_velocity_update_timescale_separation(&mut self, rate: u32) -> Result<(), ConfigError> {
        info!("Setting particle velocity update timescale separation to {} iterations", rate);
        if rate == 0 {
            return Err(ConfigError::InvalidRate { what: "particle velocity update".to_string() });
        }
        for cell_type in self.cell_types.iter() {
            self.check_divisible(&cell_type.name, cell_type.sub_step_rate, rate)?;
        }
        if let Some(repulsion) = self.repulsion_timescale {
            self.check_divisible("repulsion", repulsion, rate)?;
        }
        if let Some(boundary) = self.boundary_repulsion_timescale {
            self.check_divisible("boundary repulsion", boundary, rate)?;
        }
        if self.ctx.verbose >= 2 && rate > 1 {
            warn!("Timescale separation of the particle velocity update introduces large errors.");
        }
        self.particle_velocity_update_timescale = rate;
        Ok(())
    }

    pub fn set_repulsion_timescale_separation(&mut self, rate: u32) -> Result<(), ConfigError> {
        info!("Setting repulsion timescale separation to {} iterations", rate);
        self.check_divisible("repulsion", rate, self.particle_velocity_update_timescale)?;
        self.repulsion_timescale = Some(rate);
        Ok(())
    }

    /// Rate of cell-cell repulsion, the velocity update timescale unless set explicitly.
    pub fn repulsion_timescale(&self) -> u32 {
        self.repulsion_timescale.unwrap_or(self.particle_velocity_update_timescale)
    }

    /// Enables cell-cell repulsion. The cutoff is given in µm.
    pub fn set_repulsion(&mut self, constant: f64, cutoff_um: f64) -> Result<(), ConfigError> {
        self.check_divisible("repulsion", self.repulsion_timescale(), self.particle_velocity_update_timescale)?;
        let params = RepulsionParams { constant, cutoff: cutoff_um * self.ctx.params.um_to_lu };
        if self.ctx.verbose >= 2 {
            info!(
                "Enabling repulsion: constant {}, cutoff {} lu, every {} iterations",
                params.constant, params.cutoff, self.repulsion_timescale()
            );
        }
        self.repulsion = Some(params);
        Ok(())
    }

    /// Enables repulsion from the boundary markers at its own timescale.
    pub fn enable_boundary_particles(&mut self, constant: f64, cutoff_um: f64, timescale: u32) -> Result<(), ConfigError> {
        self.check_divisible("boundary repulsion", timescale, self.particle_velocity_update_timescale)?;
        let params = RepulsionParams { constant, cutoff: cutoff_um * self.ctx.params.um_to_lu };
        if self.ctx.verbose >= 2 {
            info!(
                "Enabling boundary repulsion: constant {}, cutoff {} lu, every {} iterations",
                params.constant, params.cutoff, timescale
            );
        }
        self.boundary_repulsion = Some(params);
        self.boundary_repulsion_timescale = Some(timescale);
        Ok(())
    }

    pub fn set_minimum_distance_from_solid(&mut self, name: &str, distance_um: f64) -> Result<(), ConfigError> {
        self.cell_types.set_minimum_distance_from_solid(name, distance_um, self.particles_loaded)
    }

    // --- Periodicity ---

    pub fn set_system_periodicity(&mut self, axis: usize, periodic: bool) -> Result<(), ConfigError> {
        if axis > 2 {
            return Err(ConfigError::InvalidAxis(axis));
        }
        let fluid = self.fluid.as_mut().ok_or(ConfigError::MissingPrerequisite {
            operation: "set_system_periodicity",
            prerequisite: "the fluid lattice",
        })?;
        let cells = self.cells.as_mut().ok_or(ConfigError::MissingPrerequisite {
            operation: "set_system_periodicity",
            prerequisite: "the particle field",
        })?;
        fluid.set_periodicity(axis, periodic);
        cells.set_periodicity(axis, periodic);
        debug!("Periodicity of axis {} set to {}", axis, periodic);
        Ok(())
    }

    /// Limits the periodic wrap of `axis` to `limit` nodes; zero restores the domain size.
    pub fn set_system_periodicity_limit(&mut self, axis: usize, limit: i32) -> Result<(), ConfigError> {
        if axis > 2 {
            return Err(ConfigError::InvalidAxis(axis));
        }
        self.periodicity_limit.set(axis, limit);
        if let Some(cells) = self.cells.as_mut() {
            cells.set_periodicity_limit(self.periodicity_limit);
        }
        Ok(())
    }

    // --- Seeding ---

    pub fn load_particles(&mut self) -> Result<LoadReport> {
        let (Some(fluid), Some(cells)) = (self.fluid.as_ref(), self.cells.as_mut()) else {
            return Err(ConfigError::MissingPrerequisite {
                operation: "load_particles",
                prerequisite: "the fluid lattice and the particle field",
            }
            .into());
        };
        let report = cells.load_particles(&self.cell_types, fluid)?;
        self.particles_loaded = true;
        Ok(report)
    }

    /// Removes cells that are not complete after synchronizing the envelopes.
    pub fn delete_incomplete_cells(&mut self) -> Result<CompletenessReport> {
        let verbose = self.ctx.verbose >= 2;
        let cells = self.cells.as_mut().ok_or(ConfigError::MissingPrerequisite {
            operation: "delete_incomplete_cells",
            prerequisite: "the particle field",
        })?;
        Ok(cells.delete_incomplete_cells(None, verbose))
    }

    // --- Stepping ---

    /// Advances the simulation by one iteration.
    pub fn iterate(&mut self) -> Result<StepOutcome> {
        // --- 1. Cooperative cancellation ---
        if self.ctx.is_cancelled() {
            warn!("Cancellation requested, not starting iteration {}.", self.iter);
            return Ok(StepOutcome::Interrupted);
        }

        let (Some(fluid), Some(cells)) = (self.fluid.as_mut(), self.cells.as_mut()) else {
            return Err(ConfigError::MissingPrerequisite {
                operation: "iterate",
                prerequisite: "the fluid lattice and the particle field",
            }
            .into());
        };
        let iter = self.iter;
        let velocity_step = iter % self.particle_velocity_update_timescale as u64 == 0;

        // --- 2. Cell-cell repulsion ---
        let repulsion_rate = self.repulsion_timescale.unwrap_or(self.particle_velocity_update_timescale);
        let boundary_rate = self.boundary_repulsion_timescale.unwrap_or(self.particle_velocity_update_timescale);
        if let Some(params) = &self.repulsion {
            if iter % repulsion_rate as u64 == 0 {
                cells.apply_repulsion_force(params);
            }
        }

        // --- 3. Cell-boundary repulsion ---
        if let Some(params) = &self.boundary_repulsion {
            if iter % boundary_rate as u64 == 0 {
                cells.apply_boundary_repulsion_force(params, fluid);
            }
        }

        // --- 4-5. Immersed-boundary force spreading, fluid update ---
        cells.spread_particle_force(fluid);
        fluid.collide_and_stream();

        // --- 6. Velocity interpolation before synchronization ---
        if velocity_step {
            cells.interpolate_fluid_velocity(fluid);
            cells.sync_envelopes();
        }

        // --- 7. Particle advance with the last interpolated velocity ---
        cells.advance_particles();

        // --- 8. Constitutive model per species ---
        for (species, cell_type) in self.cell_types.iter().enumerate() {
            if iter % cell_type.sub_step_rate as u64 == 0 {
                cells.apply_constitutive_model(species);
            }
        }

        // --- 9. Prune non-local copies ---
        if velocity_step {
            cells.delete_non_local_particles(NON_LOCAL_MARGIN);
        }

        // --- 10. Reset fluid force accumulators ---
        fluid.reset_forces();

        trace!("Completed iteration {}", iter);
        self.iter += 1;
        Ok(StepOutcome::Advanced)
    }

    // --- Output and checkpoints ---

    /// Writes the observable state of the current iteration through `sink`.
    ///
    /// Force vectors are separated per source for the write and unified again
    /// afterwards, also when the write fails.
    pub fn write_output<S: OutputSink>(&mut self, sink: &mut S) -> Result<()> {
        let verbose = self.ctx.verbose >= 2;
        let (Some(fluid), Some(cells)) = (self.fluid.as_ref(), self.cells.as_mut()) else {
            return Err(ConfigError::MissingPrerequisite {
                operation: "write_output",
                prerequisite: "the fluid lattice and the particle field",
            }
            .into());
        };
        let iter = self.iter;

        cells.sync_envelopes();
        cells.delete_incomplete_cells(None, verbose);
        cells.separate_force_vectors();
        for species in 0..self.cell_types.len() {
            cells.apply_constitutive_model(species);
        }
        if let Some(params) = &self.repulsion {
            cells.apply_repulsion_force(params);
        }
        if let Some(params) = &self.boundary_repulsion {
            cells.apply_boundary_repulsion_force(params, fluid);
        }

        let folders = OutputFolders::for_iteration(&self.ctx.output_dir, iter);
        if self.ctx.is_primary() {
            if let Err(e) = folders.create() {
                cells.unify_force_vectors();
                return Err(e);
            }
        }

        let now = Instant::now();
        let seconds_per_iteration = self.last_output.and_then(|(t, it)| {
            (iter > it).then(|| now.duration_since(t).as_secs_f64() / (iter - it) as f64)
        });
        let snapshot = Snapshot {
            iteration: iter,
            time_s: self.ctx.params.physical_time(iter),
            total_particle_count: cells.particle_count() as u32,
            declared_cells: cells.declared_cells(),
            species: cells.species_counts(),
            seconds_per_iteration,
        };
        let result = sink.write(&folders, &snapshot, &cells.cell_info());
        cells.unify_force_vectors();
        result?;

        if let Some(spi) = seconds_per_iteration {
            info!("Approximately {:.4} s per iteration since the previous output.", spi);
        }
        self.last_output = Some((now, iter));
        Ok(())
    }

    pub fn save_checkpoint(&mut self) -> Result<()> {
        let cells = self.cells.as_ref().ok_or(ConfigError::MissingPrerequisite {
            operation: "save_checkpoint",
            prerequisite: "the particle field",
        })?;
        self.checkpoints.save(self.iter, &self.config, &cells.save_state())
    }

    /// Restores particles and the iteration counter from the latest checkpoint.
    pub fn load_checkpoint(&mut self) -> Result<()> {
        let cells = self.cells.as_mut().ok_or(ConfigError::MissingPrerequisite {
            operation: "load_checkpoint",
            prerequisite: "the particle field",
        })?;
        let (iter, config, state) = self.checkpoints.load::<C::State>()?;
        if config.domain.lattice_size != self.config.domain.lattice_size || config.domain.blocks != self.config.domain.blocks {
            anyhow::bail!(
                "Checkpoint was written for lattice {:?} in {:?} blocks, this run uses {:?} in {:?}.",
                config.domain.lattice_size, config.domain.blocks,
                self.config.domain.lattice_size, self.config.domain.blocks
            );
        }
        cells.restore_state(state)?;
        cells.set_periodicity_limit(self.periodicity_limit);
        self.iter = iter;
        self.particles_loaded = true;
        info!("Resuming at iteration {}", iter);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cell_type::CellTypeDescriptor;
    use crate::mesh::ReferenceMesh;
    use hemo_common::MechanicsVariant;

    #[derive(Default)]
    struct CountingFluid {
        steps: u32,
        resets: u32,
        periodic: [bool; 3],
    }

    impl FluidSolver for CountingFluid {
        fn collide_and_stream(&mut self) {
            self.steps += 1;
        }
        fn reset_forces(&mut self) {
            self.resets += 1;
        }
        fn set_periodicity(&mut self, axis: usize, periodic: bool) {
            self.periodic[axis] = periodic;
        }
    }

    /// Records the iteration-relative sequence of operations.
    #[derive(Default)]
    struct RecordingCells {
        log: Vec<&'static str>,
        constitutive: Vec<usize>,
    }

    impl ImmersedCells for RecordingCells {
        type Fluid = CountingFluid;
        type State = Vec<u8>;

        fn load_particles(&mut self, _: &CellTypes, _: &CountingFluid) -> Result<LoadReport> {
            self.log.push("load");
            Ok(LoadReport::default())
        }
        fn sync_envelopes(&mut self) {
            self.log.push("sync");
        }
        fn apply_repulsion_force(&mut self, _: &RepulsionParams) {
            self.log.push("repulsion");
        }
        fn apply_boundary_repulsion_force(&mut self, _: &RepulsionParams, _: &CountingFluid) {
            self.log.push("boundary");
        }
        fn spread_particle_force(&mut self, _: &mut CountingFluid) {
            self.log.push("spread");
        }
        fn interpolate_fluid_velocity(&mut self, _: &CountingFluid) {
            self.log.push("interpolate");
        }
        fn advance_particles(&mut self) {
            self.log.push("advance");
        }
        fn apply_constitutive_model(&mut self, species: usize) {
            self.log.push("constitutive");
            self.constitutive.push(species);
        }
        fn delete_non_local_particles(&mut self, _: i32) -> usize {
            self.log.push("prune");
            0
        }
        fn delete_incomplete_cells(&mut self, _: Option<u16>, _: bool) -> CompletenessReport {
            self.log.push("complete");
            CompletenessReport::default()
        }
        fn separate_force_vectors(&mut self) {
            self.log.push("separate");
        }
        fn unify_force_vectors(&mut self) {
            self.log.push("unify");
        }
        fn set_periodicity(&mut self, _: usize, _: bool) {}
        fn set_periodicity_limit(&mut self, _: PeriodicityLimit) {}
        fn particle_count(&self) -> usize {
            0
        }
        fn declared_cells(&self) -> u32 {
            0
        }
        fn species_counts(&self) -> Vec<SpeciesCount> {
            Vec::new()
        }
        fn cell_info(&self) -> Vec<CellInfo> {
            Vec::new()
        }
        fn save_state(&self) -> Vec<u8> {
            Vec::new()
        }
        fn restore_state(&mut self, _: Vec<u8>) -> Result<()> {
            Ok(())
        }
    }

    const CONFIG: &str = r#"
        [domain]
        lattice_size = [8, 8, 8]
        dx_m = 1e-6
        dt_s = 1e-7
        particle_envelope = 2
        [timing]
        total_iterations = 16
        output_interval = 4
        checkpoint_interval = 16
    "#;

    fn simulation(species: Vec<CellTypeDescriptor>) -> Simulation<RecordingCells> {
        let config = EngineConfig::from_toml_str(CONFIG).unwrap();
        let mut ctx = RunContext::from_config(&config);
        ctx.output_dir = std::env::temp_dir().join(format!("hemo-simulation-unit-{}", std::process::id()));
        Simulation::new(ctx, config, CellTypes::new(species))
    }

    fn rbc() -> CellTypeDescriptor {
        CellTypeDescriptor::new("RBC", ReferenceMesh::icosphere(1.0, 0), MechanicsVariant::Standard)
    }

    fn ready(mut sim: Simulation<RecordingCells>) -> Simulation<RecordingCells> {
        sim.set_fluid(CountingFluid::default());
        sim.initialize_cell_fields(RecordingCells::default());
        sim
    }

    #[test]
    fn single_iteration_runs_operations_in_order() {
        let mut sim = ready(simulation(vec![rbc()]));
        sim.set_repulsion(1.0, 0.5).unwrap();
        sim.enable_boundary_particles(1.0, 0.5, 1).unwrap();
        assert_eq!(sim.iterate().unwrap(), StepOutcome::Advanced);
        let cells = sim.cells().unwrap();
        assert_eq!(
            cells.log,
            vec!["repulsion", "boundary", "spread", "interpolate", "sync", "advance", "constitutive", "prune"]
        );
        assert_eq!(sim.fluid().unwrap().steps, 1);
        assert_eq!(sim.fluid().unwrap().resets, 1);
        assert_eq!(sim.iter(), 1);
    }

    #[test]
    fn velocity_timescale_gates_interpolation_and_pruning() {
        let mut sim = ready(simulation(vec![rbc(), rbc_named("PLT", 8)]));
        sim.set_particle_velocity_update_timescale_separation(4).unwrap_err();
        // PLT has rate 8 but RBC still has rate 1, which is not a multiple of 4
        sim.set_material_timescale_separation("RBC", 4).unwrap();
        sim.set_particle_velocity_update_timescale_separation(4).unwrap();
        for _ in 0..16 {
            sim.iterate().unwrap();
        }
        let cells = sim.cells().unwrap();
        let interpolations = cells.log.iter().filter(|&&op| op == "interpolate").count();
        let prunes = cells.log.iter().filter(|&&op| op == "prune").count();
        assert_eq!(interpolations, 4);
        assert_eq!(prunes, 4);
        assert_eq!(cells.log.iter().filter(|&&op| op == "advance").count(), 16);
        assert_eq!(cells.constitutive.iter().filter(|&&s| s == 0).count(), 4);
        assert_eq!(cells.constitutive.iter().filter(|&&s| s == 1).count(), 2);
    }

    fn rbc_named(name: &str, rate: u32) -> CellTypeDescriptor {
        CellTypeDescriptor::new(name, ReferenceMesh::icosphere(1.0, 0), MechanicsVariant::Standard).with_sub_step_rate(rate)
    }

    #[test]
    fn rejected_rates_leave_state_untouched() {
        let mut sim = ready(simulation(vec![rbc()]));
        sim.set_material_timescale_separation("RBC", 4).unwrap();
        sim.set_particle_velocity_update_timescale_separation(4).unwrap();
        assert!(matches!(
            sim.set_repulsion_timescale_separation(3),
            Err(ConfigError::TimescaleNotDivisible { rate: 3, velocity_timescale: 4, .. })
        ));
        assert!(matches!(sim.set_material_timescale_separation("RBC", 6), Err(ConfigError::TimescaleNotDivisible { .. })));
        assert_eq!(sim.cell_types().get(0).unwrap().sub_step_rate, 4);
        assert!(matches!(sim.set_material_timescale_separation("WBC", 4), Err(ConfigError::UnknownSpecies(_))));
        assert!(matches!(sim.set_repulsion_timescale_separation(0), Err(ConfigError::InvalidRate { .. })));
        assert_eq!(sim.iter(), 0);
    }

    #[test]
    fn repulsion_enabled_after_the_velocity_timescale_follows_it() {
        let mut sim = ready(simulation(vec![rbc_named("RBC", 4)]));
        sim.set_particle_velocity_update_timescale_separation(4).unwrap();
        sim.set_repulsion(1.0, 0.5).unwrap();
        assert_eq!(sim.repulsion_timescale(), 4);
        for _ in 0..8 {
            sim.iterate().unwrap();
        }
        let repulsions = sim.cells().unwrap().log.iter().filter(|&&op| op == "repulsion").count();
        assert_eq!(repulsions, 2);
    }

    #[test]
    fn explicit_repulsion_rate_is_checked_even_while_disabled() {
        let mut sim = ready(simulation(vec![rbc_named("RBC", 4)]));
        sim.set_repulsion_timescale_separation(2).unwrap();
        assert!(matches!(
            sim.set_particle_velocity_update_timescale_separation(4),
            Err(ConfigError::TimescaleNotDivisible { rate: 2, velocity_timescale: 4, .. })
        ));
        assert_eq!(sim.particle_velocity_update_timescale(), 1);
        sim.set_repulsion_timescale_separation(8).unwrap();
        sim.set_particle_velocity_update_timescale_separation(4).unwrap();
        sim.set_repulsion(1.0, 0.5).unwrap();
        assert_eq!(sim.repulsion_timescale(), 8);
    }

    #[test]
    fn cancellation_skips_the_step() {
        let mut sim = ready(simulation(vec![rbc()]));
        sim.iterate().unwrap();
        sim.context().request_cancel();
        assert_eq!(sim.iterate().unwrap(), StepOutcome::Interrupted);
        assert_eq!(sim.iter(), 1);
        assert_eq!(sim.fluid().unwrap().steps, 1);
    }

    #[test]
    fn periodicity_needs_fluid_and_particle_field() {
        let mut sim = simulation(vec![rbc()]);
        assert!(matches!(
            sim.set_system_periodicity(0, true),
            Err(ConfigError::MissingPrerequisite { .. })
        ));
        sim.set_fluid(CountingFluid::default());
        assert!(sim.set_system_periodicity(0, true).is_err());
        assert!(!sim.fluid().unwrap().periodic[0]);
        sim.initialize_cell_fields(RecordingCells::default());
        sim.set_system_periodicity(0, true).unwrap();
        assert!(sim.fluid().unwrap().periodic[0]);
        assert!(matches!(sim.set_system_periodicity(3, true), Err(ConfigError::InvalidAxis(3))));
        assert!(sim.iterate().is_ok());
    }

    #[test]
    fn periodicity_limit_updates_offsets() {
        let mut sim = ready(simulation(vec![rbc()]));
        sim.set_system_periodicity_limit(0, 16).unwrap();
        sim.set_system_periodicity_limit(1, 8).unwrap();
        assert_eq!(sim.periodicity_limit().offset_y(), 16);
        assert_eq!(sim.periodicity_limit().offset_z(), 128);
    }

    #[test]
    fn minimum_distance_is_frozen_after_loading() {
        let mut sim = ready(simulation(vec![rbc()]));
        sim.set_minimum_distance_from_solid("RBC", 0.5).unwrap();
        sim.load_particles().unwrap();
        sim.set_minimum_distance_from_solid("RBC", 2.0).unwrap();
        assert_eq!(sim.cell_types().get(0).unwrap().minimum_distance_from_solid_um(), 0.5);
    }

    struct NullSink {
        writes: usize,
    }

    impl OutputSink for NullSink {
        fn write(&mut self, _: &OutputFolders, snapshot: &Snapshot, _: &[CellInfo]) -> Result<()> {
            assert_eq!(snapshot.iteration, 0);
            self.writes += 1;
            Ok(())
        }
    }

    #[test]
    fn output_separates_then_unifies_forces() {
        let mut sim = ready(simulation(vec![rbc()]));
        let mut sink = NullSink { writes: 0 };
        sim.write_output(&mut sink).unwrap();
        assert_eq!(sink.writes, 1);
        let log = &sim.cells().unwrap().log;
        assert_eq!(log, &vec!["sync", "complete", "separate", "constitutive", "unify"]);
        assert!(sim.context().output_dir.join("json/000000000000").is_dir());
        std::fs::remove_dir_all(&sim.context().output_dir).ok();
    }

    #[test]
    fn repulsion_vanishes_at_cutoff() {
        let p = RepulsionParams { constant: 2.0, cutoff: 1.0 };
        assert_eq!(p.magnitude(1.0), 0.0);
        assert!((p.magnitude(0.5) - 2.0).abs() < 1e-12);
    }
}
