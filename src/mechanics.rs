//! Constitutive model of the cell membranes.
//!
//! Every mesh edge acts as a linear spring against its reference length:
//!
//! F_a = k * (|x_b - x_a| - L₀) * (x_b - x_a) / |x_b - x_a|
//!
//! with the opposite force on `b`. Lengths are in lattice units, `k` in lattice force
//! units per lattice unit of stretch. Displacements are taken as minimum images on
//! periodic axes so cells straddling a periodic face stay intact.

use crate::cell_type::CellTypeDescriptor;
use glam::DVec3;
use hemo_common::minimum_image;

#[derive(Debug, Clone)]
pub struct MembraneModel {
    edges: Vec<(u32, u32)>,
    /// Reference edge lengths in lattice units
    rest_lengths: Vec<f64>,
    stiffness: f64,
}

impl MembraneModel {
    pub fn new(cell_type: &CellTypeDescriptor, um_to_lu: f64) -> Self {
        let mesh = &cell_type.reference_mesh;
        let rest_lengths = mesh.edges.iter().map(|&(a, b)| mesh.edge_length(a, b) * um_to_lu).collect();
        MembraneModel { edges: mesh.edges.clone(), rest_lengths, stiffness: cell_type.link_stiffness }
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Shortest displacement from `a` to `b`; `periods[axis]` is set for periodic axes.
    #[inline(always)]
    fn displacement(a: DVec3, b: DVec3, periods: &[Option<f64>; 3]) -> DVec3 {
        let mut d = b - a;
        for axis in 0..3 {
            if let Some(period) = periods[axis] {
                d[axis] = minimum_image(d[axis], period);
            }
        }
        d
    }

    /// Spring forces on every vertex of one cell. `positions` is indexed by vertex index.
    pub fn cell_forces(&self, positions: &[DVec3], periods: &[Option<f64>; 3]) -> Vec<DVec3> {
        let mut forces = vec![DVec3::ZERO; positions.len()];
        for (&(a, b), &rest) in self.edges.iter().zip(&self.rest_lengths) {
            let d = Self::displacement(positions[a as usize], positions[b as usize], periods);
            let length = d.length();
            if length < 1e-12 {
                continue;
            }
            let f = d * (self.stiffness * (length - rest) / length);
            forces[a as usize] += f;
            forces[b as usize] -= f;
        }
        forces
    }

    /// Elastic energy stored in the springs, `½ k Σ (L - L₀)²`.
    pub fn strain_energy(&self, positions: &[DVec3], periods: &[Option<f64>; 3]) -> f64 {
        self.edges
            .iter()
            .zip(&self.rest_lengths)
            .map(|(&(a, b), &rest)| {
                let stretch = Self::displacement(positions[a as usize], positions[b as usize], periods).length() - rest;
                0.5 * self.stiffness * stretch * stretch
            })
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::ReferenceMesh;
    use hemo_common::MechanicsVariant;

    fn chain_model() -> MembraneModel {
        let t = CellTypeDescriptor::new("F", ReferenceMesh::chain(3, 1.0), MechanicsVariant::SpecialSeeded);
        MembraneModel::new(&t, 2.0)
    }

    #[test]
    fn reference_shape_is_force_free() {
        let m = chain_model();
        let rest = [DVec3::ZERO, DVec3::new(2.0, 0.0, 0.0), DVec3::new(4.0, 0.0, 0.0)];
        assert!(m.cell_forces(&rest, &[None; 3]).iter().all(|f| f.length() < 1e-12));
        assert!(m.strain_energy(&rest, &[None; 3]) < 1e-12);
    }

    #[test]
    fn stretched_springs_pull_back_and_balance() {
        let m = chain_model();
        let stretched = [DVec3::ZERO, DVec3::new(3.0, 0.0, 0.0), DVec3::new(6.0, 0.0, 0.0)];
        let f = m.cell_forces(&stretched, &[None; 3]);
        assert!(f[0].x > 0.0 && f[2].x < 0.0);
        let net: DVec3 = f.iter().copied().sum();
        assert!(net.length() < 1e-12);
    }

    #[test]
    fn periodic_images_are_unwrapped() {
        let m = chain_model();
        // Middle vertex wrapped to the other side of a 10-node periodic axis
        let wrapped = [DVec3::new(8.0, 0.0, 0.0), DVec3::new(0.0, 0.0, 0.0), DVec3::new(2.0, 0.0, 0.0)];
        let f = m.cell_forces(&wrapped, &[Some(10.0), None, None]);
        assert!(f.iter().all(|f| f.length() < 1e-12));
    }
}
