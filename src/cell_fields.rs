//! In-process particle store: one [`ParticleField`] per decomposition block, with
//! envelope synchronization and the per-particle operations of the step loop.

use crate::cell_type::CellTypes;
use crate::completeness::{CellCompletenessFilter, CompletenessReport};
use crate::context::RunContext;
use crate::decomposition::Decomposition;
use crate::grid::SpatialGrid;
use crate::lattice::LatticeField;
use crate::mechanics::MembraneModel;
use crate::mesh_placement::{place_raw_cell, MeshPlacementEngine, PlacementStats};
use crate::output::CellInfo;
use crate::particle::{ForceBreakdown, ForceKind, Particle, ParticleField, ParticleKey};
use crate::placement::{PlacementFileReader, RegionFilter, SpeciesPlacements};
use crate::simulation::{ImmersedCells, LoadReport, RepulsionParams};
use anyhow::{Context, Result};
use glam::{DVec3, IVec3};
use hemo_common::{minimum_image, nearest_node, wrap_into, PeriodicityLimit, SimParams, SpeciesCount};
use log::{debug, info, trace, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

/// Serializable particle state for checkpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CellFieldsState {
    /// One field per decomposition block, envelopes included
    pub fields: Vec<ParticleField>,
    /// Periodic axes at the time of the checkpoint
    pub periodic: [bool; 3],
    pub periodicity_limit: PeriodicityLimit,
    /// Cells declared by the placement files, complete or not
    pub declared_cells: u32,
}

/// Particle store of the whole decomposition, one [`ParticleField`] per block.
pub struct CellFields {
    params: SimParams,
    verbose: u8,
    decomposition: Decomposition,
    fields: Vec<ParticleField>,
    species_names: Vec<String>,
    vertex_counts: Vec<usize>,
    membranes: Vec<MembraneModel>,
    periodic: [bool; 3],
    periodicity_limit: PeriodicityLimit,
    /// Boundary repulsion markers and their grid, built on first use
    boundary_markers: Option<(Vec<DVec3>, SpatialGrid)>,
    envelopes_stale: bool,
    declared_cells: u32,
}

impl CellFields {
    pub fn new(cell_types: &CellTypes, ctx: &RunContext, decomposition: Decomposition) -> Self {
        let envelope = decomposition.envelope();
        let fields = decomposition.blocks().iter().map(|b| ParticleField::new(*b, envelope)).collect();
        CellFields {
            params: ctx.params.clone(),
            verbose: ctx.verbose,
            fields,
            species_names: cell_types.iter().map(|t| t.name.clone()).collect(),
            vertex_counts: cell_types.vertex_counts(),
            membranes: cell_types.iter().map(|t| MembraneModel::new(t, ctx.params.um_to_lu)).collect(),
            decomposition,
            periodic: [false; 3],
            periodicity_limit: PeriodicityLimit::default(),
            boundary_markers: None,
            envelopes_stale: false,
            declared_cells: 0,
        }
    }

    pub fn fields(&self) -> &[ParticleField] {
        &self.fields
    }

    pub fn fields_mut(&mut self) -> &mut [ParticleField] {
        &mut self.fields
    }

    pub fn envelopes_stale(&self) -> bool {
        self.envelopes_stale
    }

    /// Wrap period of every periodic axis, `None` elsewhere.
    fn periods(&self) -> [Option<f64>; 3] {
        let extent = self.decomposition.global().extent();
        [0, 1, 2].map(|axis| {
            self.periodic[axis].then(|| self.periodicity_limit.period(axis, extent[axis]) as f64)
        })
    }

    /// Owned copies of all particles, in block order.
    fn owned(&self) -> Vec<&Particle> {
        self.fields.iter().flat_map(|f| f.owned_particles()).collect()
    }

    /// Adds per-particle forces to every copy of each particle.
    fn add_to_all_copies(&mut self, forces: &BTreeMap<ParticleKey, DVec3>, kind: ForceKind) {
        if forces.is_empty() {
            return;
        }
        self.fields.par_iter_mut().for_each(|field| {
            for p in field.particles_mut() {
                if let Some(f) = forces.get(&p.key()) {
                    p.add_force(kind, *f);
                }
            }
        });
    }

    fn completeness_filter(&self) -> CellCompletenessFilter<'_> {
        CellCompletenessFilter::new(&self.vertex_counts)
    }

    /// Rebuilds every envelope from the owned copies.
    ///
    /// The canonical copy of a particle is the one held by the block owning its
    /// position. Copies lying outside the global box are wrapped on periodic axes and
    /// dropped on the others. A copy inside the global box whose owner does not hold
    /// the particle was rejected by the owner and is dropped. Returns the number of
    /// particles dropped.
    fn rebuild_envelopes(&mut self) -> usize {
        let global = self.decomposition.global();
        let periods = self.periods();
        let lo = global.min.as_dvec3() - DVec3::splat(0.5);

        let mut canonical: BTreeMap<ParticleKey, Particle> = BTreeMap::new();
        for field in &self.fields {
            for p in field.owned_particles() {
                canonical.entry(p.key()).or_insert_with(|| p.clone());
            }
        }

        let mut exited: BTreeSet<ParticleKey> = BTreeSet::new();
        for field in &self.fields {
            for p in field.particles() {
                if canonical.contains_key(&p.key()) || global.contains_point(p.position) {
                    continue;
                }
                let mut wrapped = p.clone();
                let mut inside = true;
                for axis in 0..3 {
                    let outside = wrapped.position[axis] < lo[axis]
                        || wrapped.position[axis] >= global.max[axis] as f64 + 0.5;
                    match (outside, periods[axis]) {
                        (false, _) => {}
                        (true, Some(period)) => wrapped.position[axis] = wrap_into(wrapped.position[axis], lo[axis], period),
                        (true, None) => inside = false,
                    }
                }
                if inside && global.contains_point(wrapped.position) {
                    exited.remove(&p.key());
                    canonical.insert(p.key(), wrapped);
                } else {
                    exited.insert(p.key());
                }
            }
        }

        let before: BTreeSet<ParticleKey> =
            self.fields.iter().flat_map(|f| f.particles().map(|p| p.key())).collect();
        let dropped = before.len() - canonical.len();
        if !exited.is_empty() {
            debug!("{} particles left the non-periodic domain during envelope sync.", exited.len());
        }

        // Image shifts along periodic axes
        let mut shifts = vec![IVec3::ZERO];
        for axis in 0..3 {
            if periods[axis].is_some() {
                let mut next = Vec::with_capacity(shifts.len() * 3);
                for s in &shifts {
                    for k in [-1, 1] {
                        let mut t = *s;
                        t[axis] = k;
                        next.push(t);
                    }
                }
                shifts.extend(next);
            }
        }
        let period_vec = DVec3::new(periods[0].unwrap_or(0.0), periods[1].unwrap_or(0.0), periods[2].unwrap_or(0.0));

        self.fields.par_iter_mut().for_each(|field| {
            field.clear();
            let bb = field.bounding_box();
            // The unshifted copy comes first; an image never replaces a stored copy, so a
            // block spanning a whole period keeps the canonical position.
            for p in canonical.values() {
                for shift in &shifts {
                    let position = p.position + shift.as_dvec3() * period_vec;
                    if bb.contains_point(position) && field.get(p.key()).is_none() {
                        let mut copy = p.clone();
                        copy.position = position;
                        field.add_particle(&bb, copy);
                    }
                }
            }
        });
        dropped
    }

    fn species_of(&self, species: usize) -> Result<&str> {
        self.species_names
            .get(species)
            .map(String::as_str)
            .with_context(|| format!("No species with id {}", species))
    }
}

impl ImmersedCells for CellFields {
    type Fluid = LatticeField;
    type State = CellFieldsState;

    fn load_particles(&mut self, cell_types: &CellTypes, fluid: &LatticeField) -> Result<LoadReport> {
        info!("Loading particles for {} species into {} blocks.", cell_types.len(), self.fields.len());
        self.fields.iter_mut().for_each(ParticleField::clear);
        let paths: Vec<PathBuf> = cell_types.iter().map(|t| t.positions_file.clone()).collect();
        let mut placement = PlacementStats::default();
        let mut declared_cells = 0;

        for (block_idx, field) in self.fields.iter_mut().enumerate() {
            let filter = RegionFilter {
                real_domain: field.domain(),
                envelope: field.envelope(),
                um_to_lu: self.params.um_to_lu,
            };
            let set = PlacementFileReader::new(Some(filter)).read_all(cell_types, &paths)?;
            declared_cells = set.declared_cells;
            let block = fluid.block(block_idx);

            for (species, (placements, cell_type)) in set.species.iter().zip(cell_types.iter()).enumerate() {
                let mut stats = PlacementStats::default();
                match placements {
                    SpeciesPlacements::Templated(records) => {
                        let engine = MeshPlacementEngine::new(species as u16, cell_type, &self.params);
                        for record in records {
                            stats += engine.place(record, block, field);
                        }
                    }
                    SpeciesPlacements::Raw(cells) => {
                        for cell in cells {
                            stats += place_raw_cell(species as u16, cell, self.params.um_to_lu, field);
                        }
                    }
                }
                debug!(
                    "Block {}: species '{}' accepted {} vertices, rejected {} (outside {}, boundary {}, deny layer {}).",
                    block_idx, cell_type.name, stats.accepted, stats.rejected(),
                    stats.outside, stats.on_boundary, stats.in_deny_layer
                );
                placement += stats;
            }
        }
        self.declared_cells = declared_cells;

        // Halo copies rejected by their owner are dropped here; the single filter pass
        // below then reports every cell that did not come out whole.
        let dropped = self.rebuild_envelopes();
        self.envelopes_stale = false;
        debug!("Dropped {} seeded copies not confirmed by their owning block.", dropped);
        let completeness = CellCompletenessFilter::new(&self.vertex_counts).apply(&mut self.fields, None, self.verbose >= 2);
        let particles = self.particle_count();
        info!(
            "Seeded {} particles; {} incomplete cells removed, {} cells declared.",
            particles, completeness.removed_cells.len(), declared_cells
        );
        Ok(LoadReport { declared_cells, placement, completeness, particles })
    }

    fn sync_envelopes(&mut self) {
        let dropped = self.rebuild_envelopes();
        self.envelopes_stale = false;
        if dropped > 0 {
            let report = CellCompletenessFilter::new(&self.vertex_counts).apply(&mut self.fields, None, self.verbose >= 2);
            if !report.removed_cells.is_empty() {
                info!(
                    "Removed {} cells made incomplete by {} dropped particles.",
                    report.removed_cells.len(), dropped
                );
            }
        }
        trace!("Synchronized envelopes of {} blocks.", self.fields.len());
    }

    fn apply_repulsion_force(&mut self, params: &RepulsionParams) {
        let owned = self.owned();
        let positions: Vec<DVec3> = owned.iter().map(|p| p.position).collect();
        let cells: Vec<u32> = owned.iter().map(|p| p.cell_id).collect();
        let keys: Vec<ParticleKey> = owned.iter().map(|p| p.key()).collect();
        let grid = SpatialGrid::build(&positions, params.cutoff);

        let forces: BTreeMap<ParticleKey, DVec3> = (0..positions.len())
            .into_par_iter()
            .filter_map(|i| {
                let mut f = DVec3::ZERO;
                grid.for_each_neighbor(Some(i as u32), positions[i], params.cutoff, &positions, |j, r| {
                    if cells[j as usize] != cells[i] && r > 1e-12 {
                        f += (positions[i] - positions[j as usize]) / r * params.magnitude(r);
                    }
                    true
                });
                (f != DVec3::ZERO).then(|| (keys[i], f))
            })
            .collect();
        self.add_to_all_copies(&forces, ForceKind::Repulsion);
    }

    fn apply_boundary_repulsion_force(&mut self, params: &RepulsionParams, fluid: &LatticeField) {
        if self.boundary_markers.is_none() {
            let markers: Vec<DVec3> = fluid.boundary_surface_nodes().iter().map(|n| n.as_dvec3()).collect();
            info!("Created {} boundary repulsion markers.", markers.len());
            let grid = SpatialGrid::build(&markers, params.cutoff);
            self.boundary_markers = Some((markers, grid));
        }
        let Some((markers, grid)) = self.boundary_markers.as_ref() else {
            return;
        };
        let forces: BTreeMap<ParticleKey, DVec3> = self
            .owned()
            .par_iter()
            .filter_map(|p| {
                let mut f = DVec3::ZERO;
                grid.for_each_neighbor(None, p.position, params.cutoff, markers, |m, r| {
                    if r > 1e-12 {
                        f += (p.position - markers[m as usize]) / r * params.magnitude(r);
                    }
                    true
                });
                (f != DVec3::ZERO).then(|| (p.key(), f))
            })
            .collect();
        self.add_to_all_copies(&forces, ForceKind::BoundaryRepulsion);
    }

    fn spread_particle_force(&mut self, fluid: &mut LatticeField) {
        for field in &mut self.fields {
            let domain = field.domain();
            for p in field.particles_mut() {
                if domain.contains_point(p.position) {
                    fluid.add_force(nearest_node(p.position), p.force);
                }
                p.clear_transient_forces();
            }
        }
    }

    fn interpolate_fluid_velocity(&mut self, fluid: &LatticeField) {
        self.fields.par_iter_mut().for_each(|field| {
            let domain = field.domain();
            for p in field.particles_mut() {
                if domain.contains_point(p.position) {
                    p.velocity = fluid.velocity_at(nearest_node(p.position));
                }
            }
        });
    }

    fn advance_particles(&mut self) {
        self.fields.par_iter_mut().for_each(|field| {
            for p in field.particles_mut() {
                p.position += p.velocity;
            }
        });
        self.envelopes_stale = true;
    }

    fn apply_constitutive_model(&mut self, species: usize) {
        let Some(membrane) = self.membranes.get(species) else {
            warn!("Constitutive model requested for unknown species {}", species);
            return;
        };
        let vertex_count = self.vertex_counts[species];

        let mut cells: BTreeMap<u32, Vec<Option<DVec3>>> = BTreeMap::new();
        for p in self.owned().into_iter().filter(|p| p.species as usize == species) {
            let slots = cells.entry(p.cell_id).or_insert_with(|| vec![None; vertex_count]);
            if let Some(slot) = slots.get_mut(p.vertex_index as usize) {
                *slot = Some(p.position);
            }
        }

        let periods = self.periods();
        let forces: BTreeMap<ParticleKey, DVec3> = cells
            .into_par_iter()
            .filter_map(|(cell_id, slots)| {
                let positions: Option<Vec<DVec3>> = slots.into_iter().collect();
                positions.map(|positions| (cell_id, membrane.cell_forces(&positions, &periods)))
            })
            .flat_map_iter(|(cell_id, forces)| {
                forces.into_iter().enumerate().map(move |(i, f)| ((cell_id, i as u32), f))
            })
            .collect();

        let species = species as u16;
        self.fields.par_iter_mut().for_each(|field| {
            for p in field.particles_mut().filter(|p| p.species == species) {
                p.reset_mechanics();
                if let Some(f) = forces.get(&p.key()) {
                    p.add_force(ForceKind::Mechanics, *f);
                }
            }
        });
    }

    fn delete_non_local_particles(&mut self, margin: i32) -> usize {
        let removed: usize = self.fields.iter_mut().map(|f| f.delete_non_local_particles(margin)).sum();
        if removed > 0 {
            trace!("Pruned {} non-local particle copies.", removed);
        }
        removed
    }

    fn delete_incomplete_cells(&mut self, species: Option<u16>, verbose: bool) -> CompletenessReport {
        if self.envelopes_stale {
            self.sync_envelopes();
        }
        let filter = CellCompletenessFilter::new(&self.vertex_counts);
        filter.apply(&mut self.fields, species, verbose)
    }

    fn separate_force_vectors(&mut self) {
        self.fields.iter_mut().flat_map(|f| f.particles_mut()).for_each(|p| {
            p.breakdown = Some(ForceBreakdown { mechanics: p.force_mechanics, ..Default::default() });
        });
    }

    fn unify_force_vectors(&mut self) {
        self.fields.iter_mut().flat_map(|f| f.particles_mut()).for_each(|p| {
            p.breakdown = None;
            p.clear_transient_forces();
        });
    }

    fn set_periodicity(&mut self, axis: usize, periodic: bool) {
        self.periodic[axis] = periodic;
        self.envelopes_stale = true;
    }

    fn set_periodicity_limit(&mut self, limit: PeriodicityLimit) {
        self.periodicity_limit = limit;
        self.envelopes_stale = true;
    }

    fn particle_count(&self) -> usize {
        self.fields.iter().map(|f| f.owned_particles().count()).sum()
    }

    fn declared_cells(&self) -> u32 {
        self.declared_cells
    }

    fn species_counts(&self) -> Vec<SpeciesCount> {
        let tallies = self.completeness_filter().count_cells(&self.fields);
        self.species_names
            .iter()
            .enumerate()
            .map(|(species, name)| {
                let of_species = tallies.values().filter(|t| t.species as usize == species);
                let (cells, particles) = of_species.fold((0u32, 0u32), |(c, n), t| {
                    let complete = t.particles == self.vertex_counts[species];
                    (c + complete as u32, n + t.particles as u32)
                });
                SpeciesCount { name: name.clone(), cells, particles }
            })
            .collect()
    }

    fn cell_info(&self) -> Vec<CellInfo> {
        let periods = self.periods();
        let mut cells: BTreeMap<u32, Vec<&Particle>> = BTreeMap::new();
        for p in self.owned() {
            cells.entry(p.cell_id).or_default().push(p);
        }
        cells
            .into_iter()
            .filter_map(|(cell_id, particles)| {
                let first = particles.first()?;
                let species = first.species as usize;
                // Unwrap around the first vertex so cells on a periodic face stay whole
                let mut center = DVec3::ZERO;
                let mut velocity = DVec3::ZERO;
                let mut force = DVec3::ZERO;
                for p in &particles {
                    let mut d = p.position - first.position;
                    for axis in 0..3 {
                        if let Some(period) = periods[axis] {
                            d[axis] = minimum_image(d[axis], period);
                        }
                    }
                    center += first.position + d;
                    velocity += p.velocity;
                    force += p.force;
                }
                let n = particles.len() as f64;
                center /= n;
                velocity /= n;
                let um = 1.0 / self.params.um_to_lu;
                Some(CellInfo {
                    cell_id,
                    species: self.species_of(species).unwrap_or("unknown").to_string(),
                    vertices: particles.len(),
                    complete: particles.len() == self.vertex_counts[species],
                    x_um: center.x * um,
                    y_um: center.y * um,
                    z_um: center.z * um,
                    vx_lu: velocity.x,
                    vy_lu: velocity.y,
                    vz_lu: velocity.z,
                    force_lu: force.length(),
                })
            })
            .collect()
    }

    fn save_state(&self) -> CellFieldsState {
        CellFieldsState {
            fields: self.fields.clone(),
            periodic: self.periodic,
            periodicity_limit: self.periodicity_limit,
            declared_cells: self.declared_cells,
        }
    }

    fn restore_state(&mut self, state: CellFieldsState) -> Result<()> {
        if state.fields.len() != self.fields.len() {
            anyhow::bail!(
                "Checkpoint holds {} particle blocks but the decomposition has {}.",
                state.fields.len(), self.fields.len()
            );
        }
        for (saved, current) in state.fields.iter().zip(&self.fields) {
            if saved.domain() != current.domain() {
                anyhow::bail!(
                    "Checkpoint block {:?} does not match decomposition block {:?}.",
                    saved.domain(), current.domain()
                );
            }
        }
        self.fields = state.fields;
        self.periodic = state.periodic;
        self.periodicity_limit = state.periodicity_limit;
        self.declared_cells = state.declared_cells;
        self.envelopes_stale = true;
        info!("Restored {} particles from checkpoint.", self.particle_count());
        Ok(())
    }
}
