//! Fluid-side collaborators: the boundary classification used by seeding and a
//! minimal stand-in for the lattice flow engine.
//!
//! The flow update is deliberately trivial (prescribed base velocity plus a force
//! mobility term); it only has to honour the interface the orchestrator drives.

use crate::decomposition::Decomposition;
use glam::{DVec3, IVec3};
use hemo_common::{DomainConfig, GeometryConfig, IBox3};
use log::info;
use rayon::prelude::*;

/// The flow engine as seen by the orchestrator.
pub trait FluidSolver {
    /// Advances the fluid by one lattice time step.
    fn collide_and_stream(&mut self);
    /// Zeroes the external force accumulators.
    fn reset_forces(&mut self);
    fn set_periodicity(&mut self, axis: usize, periodic: bool);
}

/// Boundary classification of one local fluid block, in block-relative coordinates.
pub trait BoundaryMap {
    /// Absolute coordinate of the block's relative origin.
    fn location(&self) -> IVec3;
    /// Relative bounding box of the block.
    fn bounding_box(&self) -> IBox3;
    /// True if the relative node is a solid boundary node.
    fn is_boundary(&self, rel: IVec3) -> bool;
}

/// Global solid/fluid classification of the lattice.
#[derive(Debug, Clone)]
pub struct DomainGeometry {
    size: IVec3,
    solid: Vec<bool>,
}

impl DomainGeometry {
    pub fn new(size: IVec3, geometry: &GeometryConfig) -> Self {
        let bounds = IBox3::from_size(size);
        let solid = bounds
            .nodes()
            .map(|node| match geometry {
                GeometryConfig::Open => false,
                GeometryConfig::Channel { axis } => {
                    let a = axis.index();
                    node[a] == 0 || node[a] == size[a] - 1
                }
                GeometryConfig::Pipe { axis } => {
                    let a = axis.index();
                    let (b, c) = ((a + 1) % 3, (a + 2) % 3);
                    let center_b = (size[b] - 1) as f64 * 0.5;
                    let center_c = (size[c] - 1) as f64 * 0.5;
                    let radius = size[b].min(size[c]) as f64 * 0.5 - 1.0;
                    let db = node[b] as f64 - center_b;
                    let dc = node[c] as f64 - center_c;
                    (db * db + dc * dc).sqrt() >= radius
                }
            })
            .collect();
        DomainGeometry { size, solid }
    }

    /// Geometry with an explicit list of solid nodes, everything else fluid.
    pub fn with_solid_nodes(size: IVec3, solid_nodes: &[IVec3]) -> Self {
        let mut geometry = Self::new(size, &GeometryConfig::Open);
        for &node in solid_nodes {
            if let Some(idx) = geometry.index(node) {
                geometry.solid[idx] = true;
            }
        }
        geometry
    }

    pub fn size(&self) -> IVec3 {
        self.size
    }

    fn index(&self, node: IVec3) -> Option<usize> {
        if !IBox3::from_size(self.size).contains_node(node) {
            return None;
        }
        Some((node.x + self.size.x * (node.y + self.size.y * node.z)) as usize)
    }

    /// Nodes outside the lattice count as fluid.
    pub fn is_boundary(&self, node: IVec3) -> bool {
        self.index(node).map(|i| self.solid[i]).unwrap_or(false)
    }

    pub fn boundary_count(&self) -> usize {
        self.solid.iter().filter(|&&s| s).count()
    }
}

/// Fluid state of one block: boundary flags and the velocity/force fields.
#[derive(Debug, Clone)]
pub struct LatticeBlock {
    location: IVec3,
    size: IVec3,
    boundary: Vec<bool>,
    velocity: Vec<DVec3>,
    force: Vec<DVec3>,
}

impl LatticeBlock {
    pub fn new(domain: IBox3, geometry: &DomainGeometry) -> Self {
        let size = domain.extent();
        let boundary: Vec<bool> = domain.nodes().map(|n| geometry.is_boundary(n)).collect();
        let count = boundary.len();
        LatticeBlock {
            location: domain.min,
            size,
            boundary,
            velocity: vec![DVec3::ZERO; count],
            force: vec![DVec3::ZERO; count],
        }
    }

    #[inline(always)]
    fn index(&self, rel: IVec3) -> usize {
        (rel.x + self.size.x * (rel.y + self.size.y * rel.z)) as usize
    }

    /// Absolute box covered by this block.
    pub fn domain(&self) -> IBox3 {
        IBox3::from_size(self.size).shift(self.location)
    }

    fn update(&mut self, base_velocity: DVec3, mobility: f64) {
        let boundary = &self.boundary;
        let force = &self.force;
        self.velocity.par_iter_mut().enumerate().for_each(|(i, u)| {
            *u = if boundary[i] { DVec3::ZERO } else { base_velocity + force[i] * mobility };
        });
    }
}

impl BoundaryMap for LatticeBlock {
    fn location(&self) -> IVec3 {
        self.location
    }

    fn bounding_box(&self) -> IBox3 {
        IBox3::from_size(self.size)
    }

    fn is_boundary(&self, rel: IVec3) -> bool {
        self.bounding_box().contains_node(rel) && self.boundary[self.index(rel)]
    }
}

/// All fluid blocks of the decomposition, with lookups by absolute node.
#[derive(Debug, Clone)]
pub struct LatticeField {
    geometry: DomainGeometry,
    decomposition: Decomposition,
    blocks: Vec<LatticeBlock>,
    base_velocity: DVec3,
    mobility: f64,
    periodic: [bool; 3],
}

impl LatticeField {
    pub fn new(geometry: DomainGeometry, decomposition: Decomposition, base_velocity: DVec3, mobility: f64) -> Self {
        let blocks = decomposition.blocks().iter().map(|b| LatticeBlock::new(*b, &geometry)).collect();
        info!(
            "Created lattice {:?} in {} blocks with {} boundary nodes.",
            geometry.size(), decomposition.block_count(), geometry.boundary_count()
        );
        LatticeField { geometry, decomposition, blocks, base_velocity, mobility, periodic: [false; 3] }
    }

    pub fn from_config(domain: &DomainConfig, envelope: i32) -> Self {
        let size = IVec3::new(domain.lattice_size[0] as i32, domain.lattice_size[1] as i32, domain.lattice_size[2] as i32);
        let geometry = DomainGeometry::new(size, &domain.geometry);
        let decomposition = Decomposition::new(size, domain.blocks, envelope);
        Self::new(geometry, decomposition, DVec3::from_array(domain.base_velocity), domain.force_mobility)
    }

    pub fn geometry(&self) -> &DomainGeometry {
        &self.geometry
    }

    pub fn decomposition(&self) -> &Decomposition {
        &self.decomposition
    }

    pub fn blocks(&self) -> &[LatticeBlock] {
        &self.blocks
    }

    pub fn block(&self, idx: usize) -> &LatticeBlock {
        &self.blocks[idx]
    }

    /// Maps an absolute node into the lattice: wrapped on periodic axes, clamped elsewhere.
    fn resolve(&self, node: IVec3) -> IVec3 {
        let size = self.geometry.size();
        let mut n = node;
        for axis in 0..3 {
            n[axis] = if self.periodic[axis] {
                n[axis].rem_euclid(size[axis])
            } else {
                n[axis].clamp(0, size[axis] - 1)
            };
        }
        n
    }

    fn locate(&self, node: IVec3) -> Option<(usize, usize)> {
        let n = self.resolve(node);
        let owner = self.decomposition.owner_of(n)?;
        let block = &self.blocks[owner];
        Some((owner, block.index(n - block.location)))
    }

    pub fn velocity_at(&self, node: IVec3) -> DVec3 {
        self.locate(node)
            .map(|(b, i)| self.blocks[b].velocity[i])
            .unwrap_or(DVec3::ZERO)
    }

    pub fn force_at(&self, node: IVec3) -> DVec3 {
        self.locate(node)
            .map(|(b, i)| self.blocks[b].force[i])
            .unwrap_or(DVec3::ZERO)
    }

    pub fn add_force(&mut self, node: IVec3, force: DVec3) {
        if let Some((b, i)) = self.locate(node) {
            self.blocks[b].force[i] += force;
        }
    }

    /// Solid nodes with at least one fluid face neighbour; these carry the boundary
    /// repulsion markers.
    pub fn boundary_surface_nodes(&self) -> Vec<IVec3> {
        let faces = [IVec3::X, IVec3::NEG_X, IVec3::Y, IVec3::NEG_Y, IVec3::Z, IVec3::NEG_Z];
        let bounds = IBox3::from_size(self.geometry.size());
        bounds
            .nodes()
            .filter(|&n| self.geometry.is_boundary(n))
            .filter(|&n| {
                faces.iter().any(|&f| {
                    let m = n + f;
                    bounds.contains_node(m) && !self.geometry.is_boundary(m)
                })
            })
            .collect()
    }
}

impl FluidSolver for LatticeField {
    fn collide_and_stream(&mut self) {
        let (base, mobility) = (self.base_velocity, self.mobility);
        self.blocks.iter_mut().for_each(|b| b.update(base, mobility));
    }

    fn reset_forces(&mut self) {
        self.blocks.iter_mut().for_each(|b| b.force.iter_mut().for_each(|f| *f = DVec3::ZERO));
    }

    fn set_periodicity(&mut self, axis: usize, periodic: bool) {
        self.periodic[axis] = periodic;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hemo_common::Axis;

    #[test]
    fn channel_walls_are_boundary() {
        let g = DomainGeometry::new(IVec3::new(4, 6, 4), &GeometryConfig::Channel { axis: Axis::Y });
        assert!(g.is_boundary(IVec3::new(1, 0, 1)));
        assert!(g.is_boundary(IVec3::new(1, 5, 1)));
        assert!(!g.is_boundary(IVec3::new(1, 3, 1)));
        assert_eq!(g.boundary_count(), 2 * 16);
    }

    #[test]
    fn pipe_center_is_fluid_and_corners_are_solid() {
        let g = DomainGeometry::new(IVec3::new(5, 11, 11), &GeometryConfig::Pipe { axis: Axis::X });
        assert!(!g.is_boundary(IVec3::new(2, 5, 5)));
        assert!(g.is_boundary(IVec3::new(2, 0, 0)));
    }

    #[test]
    fn block_boundary_queries_are_relative() {
        let g = DomainGeometry::with_solid_nodes(IVec3::splat(8), &[IVec3::new(5, 5, 5)]);
        let block = LatticeBlock::new(IBox3::new(IVec3::splat(4), IVec3::splat(7)), &g);
        assert!(block.is_boundary(IVec3::splat(1)));
        assert!(!block.is_boundary(IVec3::ZERO));
        assert!(!block.is_boundary(IVec3::splat(9)));
    }

    #[test]
    fn stand_in_flow_responds_to_force_and_resets() {
        let g = DomainGeometry::new(IVec3::splat(6), &GeometryConfig::Open);
        let d = Decomposition::new(IVec3::splat(6), [2, 1, 1], 2);
        let mut field = LatticeField::new(g, d, DVec3::new(0.01, 0.0, 0.0), 0.5);
        field.add_force(IVec3::new(4, 1, 1), DVec3::new(0.0, 0.2, 0.0));
        field.collide_and_stream();
        let u = field.velocity_at(IVec3::new(4, 1, 1));
        assert!((u - DVec3::new(0.01, 0.1, 0.0)).length() < 1e-12);
        field.reset_forces();
        assert_eq!(field.force_at(IVec3::new(4, 1, 1)), DVec3::ZERO);
        // Clamped lookups outside the lattice
        assert!((field.velocity_at(IVec3::new(-3, 1, 1)) - DVec3::new(0.01, 0.0, 0.0)).length() < 1e-12);
    }
}
