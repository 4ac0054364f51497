//! Materializes templated cell meshes as particles, vertex by vertex.
//!
//! For every placement record the reference mesh is rotated about its own bounding-box
//! centre and then translated to the target position. Each vertex is then tested
//! against the local fluid block:
//!
//! 1. it must lie inside the particle field's bounding box (owned region + envelope),
//! 2. its lattice node must not be a solid boundary node,
//! 3. no node in the cube of radius `L` around it (clipped to the block) may be a
//!    boundary node, where `L = floor(minimum_distance_from_solid_um * 1e-6 / dx)`.
//!
//! Rejection is per vertex. Cells that lose vertices are removed afterwards by the
//! completeness filter, once the envelopes have been synchronized.

use crate::cell_type::CellTypeDescriptor;
use crate::lattice::BoundaryMap;
use crate::particle::{Particle, ParticleField};
use crate::placement::{PlacementRecord, RawCell};
use glam::{DMat3, DVec3, EulerRot, IVec3};
use hemo_common::{nearest_node, SimParams};
use std::ops::AddAssign;

/// A mesh vertex at its world position, before the boundary tests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CandidateVertex {
    /// Lattice units
    pub position: DVec3,
    pub cell_id: u32,
    pub vertex_index: u32,
    pub species: u16,
}

/// Why a vertex was not materialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    OutsideField,
    OnBoundary,
    InDenyLayer,
}

/// Per-vertex placement tallies, summed over blocks and species.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlacementStats {
    /// Vertices materialized as particles
    pub accepted: usize,
    /// Outside the block's owned region and envelope
    pub outside: usize,
    /// Nearest lattice node is a solid boundary node
    pub on_boundary: usize,
    /// A boundary node lies within the species' minimum distance
    pub in_deny_layer: usize,
}

impl PlacementStats {
    pub fn rejected(&self) -> usize {
        self.outside + self.on_boundary + self.in_deny_layer
    }

    fn record(&mut self, outcome: Result<(), Rejection>) {
        match outcome {
            Ok(()) => self.accepted += 1,
            Err(Rejection::OutsideField) => self.outside += 1,
            Err(Rejection::OnBoundary) => self.on_boundary += 1,
            Err(Rejection::InDenyLayer) => self.in_deny_layer += 1,
        }
    }
}

impl AddAssign for PlacementStats {
    fn add_assign(&mut self, rhs: Self) {
        self.accepted += rhs.accepted;
        self.outside += rhs.outside;
        self.on_boundary += rhs.on_boundary;
        self.in_deny_layer += rhs.in_deny_layer;
    }
}

/// Rotation matrix of the simulation's Euler convention: about x, then y, then z.
pub fn rotation_matrix(angles: DVec3) -> DMat3 {
    DMat3::from_euler(EulerRot::ZYX, angles.z, angles.y, angles.x)
}

/// Placement engine of one species.
#[derive(Debug, Clone)]
pub struct MeshPlacementEngine {
    species: u16,
    /// Reference vertices centred on the bounding-box centre, in lattice units
    centered_vertices: Vec<DVec3>,
    um_to_lu: f64,
    deny_layer: i32,
}

impl MeshPlacementEngine {
    pub fn new(species: u16, cell_type: &CellTypeDescriptor, params: &SimParams) -> Self {
        let centered_vertices = cell_type
            .reference_mesh
            .centered()
            .vertices
            .iter()
            .map(|v| *v * params.um_to_lu)
            .collect();
        let deny_layer = (cell_type.minimum_distance_from_solid_um() * 1e-6 / params.dx).floor() as i32;
        MeshPlacementEngine { species, centered_vertices, um_to_lu: params.um_to_lu, deny_layer }
    }

    /// Deny-layer radius in lattice nodes.
    pub fn deny_layer(&self) -> i32 {
        self.deny_layer
    }

    /// World positions of every mesh vertex for `record`, before any test.
    pub fn candidate_vertices<'a>(&'a self, record: &PlacementRecord) -> impl Iterator<Item = CandidateVertex> + 'a {
        let rotation = rotation_matrix(record.rotation);
        let target = record.position_um * self.um_to_lu;
        let (cell_id, species) = (record.cell_id, self.species);
        self.centered_vertices.iter().enumerate().map(move |(i, v)| CandidateVertex {
            position: target + rotation * *v,
            cell_id,
            vertex_index: i as u32,
            species,
        })
    }

    /// Places one record into `field`, using `fluid` as the boundary classification.
    pub fn place<B: BoundaryMap>(&self, record: &PlacementRecord, fluid: &B, field: &mut ParticleField) -> PlacementStats {
        let mut stats = PlacementStats::default();
        let region = field.bounding_box();
        for candidate in self.candidate_vertices(record) {
            let outcome = self.check_vertex(&candidate, fluid, field);
            if outcome.is_ok() {
                let particle = Particle::new(candidate.position, candidate.cell_id, candidate.vertex_index, candidate.species);
                field.add_particle(&region, particle);
            }
            stats.record(outcome);
        }
        stats
    }

    /// Runs the field containment, direct boundary and deny-layer tests on one vertex.
    pub fn check_vertex<B: BoundaryMap>(&self, candidate: &CandidateVertex, fluid: &B, field: &ParticleField) -> Result<(), Rejection> {
        if !field.bounding_box().contains_point(candidate.position) {
            return Err(Rejection::OutsideField);
        }
        let rel = nearest_node(candidate.position) - fluid.location();
        let fluid_bb = fluid.bounding_box();

        if fluid_bb.contains_node(rel) && fluid.is_boundary(rel) {
            return Err(Rejection::OnBoundary);
        }
        if self.deny_layer > 0 && self.deny_layer_hit(rel, fluid) {
            return Err(Rejection::InDenyLayer);
        }
        Ok(())
    }

    fn deny_layer_hit<B: BoundaryMap>(&self, rel: IVec3, fluid: &B) -> bool {
        let l = self.deny_layer;
        let fluid_bb = fluid.bounding_box();
        for dz in -l..=l {
            for dy in -l..=l {
                for dx in -l..=l {
                    let n = rel + IVec3::new(dx, dy, dz);
                    if fluid_bb.contains_node(n) && fluid.is_boundary(n) {
                        return true;
                    }
                }
            }
        }
        false
    }
}

/// Places a special-seeded cell from its raw vertices. No boundary test is applied;
/// vertices outside the field's bounding box are skipped.
pub fn place_raw_cell(species: u16, cell: &RawCell, um_to_lu: f64, field: &mut ParticleField) -> PlacementStats {
    let mut stats = PlacementStats::default();
    let region = field.bounding_box();
    for (i, v) in cell.vertices_um.iter().enumerate() {
        let particle = Particle::new(*v * um_to_lu, cell.cell_id, i as u32, species);
        if field.add_particle(&region, particle) {
            stats.accepted += 1;
        } else {
            stats.outside += 1;
        }
    }
    stats
}
