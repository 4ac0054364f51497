use glam::DVec3;
use hemo_common::IBox3;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Identity of a particle across all blocks: `(cell_id, vertex_index)`.
pub type ParticleKey = (u32, u32);

/// Source of a force contribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForceKind {
    Mechanics,
    Repulsion,
    BoundaryRepulsion,
}

/// Per-source force contributions, only tracked while force vectors are separated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ForceBreakdown {
    /// Constitutive model
    pub mechanics: DVec3,
    /// Cell-cell repulsion
    pub repulsion: DVec3,
    /// Cell-boundary repulsion
    pub boundary_repulsion: DVec3,
}

/// One membrane vertex materialized in the particle store. Positions are in lattice units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Particle {
    pub position: DVec3,
    /// Fluid velocity at the last interpolation, in lattice units per step
    pub velocity: DVec3,
    /// Total force spread onto the fluid
    pub force: DVec3,
    /// Last constitutive result, kept across sub-steps
    pub force_mechanics: DVec3,
    /// Per-source split of `force`, present only while force vectors are separated
    #[serde(skip)]
    pub breakdown: Option<ForceBreakdown>,
    /// Global cell id, unique across species
    pub cell_id: u32,
    /// Index of the vertex in its species' reference mesh
    pub vertex_index: u32,
    /// Position of the species in the cell type registry
    pub species: u16,
}

impl Particle {
    pub fn new(position: DVec3, cell_id: u32, vertex_index: u32, species: u16) -> Self {
        Particle {
            position,
            velocity: DVec3::ZERO,
            force: DVec3::ZERO,
            force_mechanics: DVec3::ZERO,
            breakdown: None,
            cell_id,
            vertex_index,
            species,
        }
    }

    #[inline(always)]
    pub fn key(&self) -> ParticleKey {
        (self.cell_id, self.vertex_index)
    }

    pub fn add_force(&mut self, kind: ForceKind, f: DVec3) {
        self.force += f;
        if kind == ForceKind::Mechanics {
            self.force_mechanics += f;
        }
        if let Some(b) = self.breakdown.as_mut() {
            match kind {
                ForceKind::Mechanics => b.mechanics += f,
                ForceKind::Repulsion => b.repulsion += f,
                ForceKind::BoundaryRepulsion => b.boundary_repulsion += f,
            }
        }
    }

    /// Drops the mechanics contribution before a fresh constitutive evaluation.
    pub fn reset_mechanics(&mut self) {
        self.force -= self.force_mechanics;
        self.force_mechanics = DVec3::ZERO;
        if let Some(b) = self.breakdown.as_mut() {
            b.mechanics = DVec3::ZERO;
        }
    }

    /// Drops the repulsion contributions once they have been spread onto the fluid.
    pub fn clear_transient_forces(&mut self) {
        self.force = self.force_mechanics;
        if let Some(b) = self.breakdown.as_mut() {
            b.repulsion = DVec3::ZERO;
            b.boundary_repulsion = DVec3::ZERO;
        }
    }
}

/// Particles of one block: the owned domain plus its envelope.
///
/// Particles are keyed by identity, so re-adding a particle replaces the stored copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParticleField {
    domain: IBox3,
    envelope: i32,
    particles: BTreeMap<ParticleKey, Particle>,
}

impl ParticleField {
    pub fn new(domain: IBox3, envelope: i32) -> Self {
        ParticleField { domain, envelope, particles: BTreeMap::new() }
    }

    /// Owned lattice region, without envelope.
    pub fn domain(&self) -> IBox3 {
        self.domain
    }

    pub fn envelope(&self) -> i32 {
        self.envelope
    }

    /// Owned region grown by the envelope; no particle lies outside it.
    pub fn bounding_box(&self) -> IBox3 {
        self.domain.enlarge(self.envelope)
    }

    pub fn len(&self) -> usize {
        self.particles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.particles.is_empty()
    }

    /// True if the particle's position falls in the owned region.
    #[inline(always)]
    pub fn is_owned(&self, particle: &Particle) -> bool {
        self.domain.contains_point(particle.position)
    }

    pub fn get(&self, key: ParticleKey) -> Option<&Particle> {
        self.particles.get(&key)
    }

    pub fn get_mut(&mut self, key: ParticleKey) -> Option<&mut Particle> {
        self.particles.get_mut(&key)
    }

    pub fn particles(&self) -> impl Iterator<Item = &Particle> {
        self.particles.values()
    }

    pub fn particles_mut(&mut self) -> impl Iterator<Item = &mut Particle> {
        self.particles.values_mut()
    }

    pub fn owned_particles(&self) -> impl Iterator<Item = &Particle> {
        self.particles.values().filter(|p| self.domain.contains_point(p.position))
    }

    /// Stores `particle` if it lies inside both `region` and the field's bounding box.
    pub fn add_particle(&mut self, region: &IBox3, particle: Particle) -> bool {
        if !region.contains_point(particle.position) || !self.bounding_box().contains_point(particle.position) {
            return false;
        }
        self.particles.insert(particle.key(), particle);
        true
    }

    /// Particles of `species` (all species if `None`) inside `region`.
    pub fn find_particles(&self, region: &IBox3, species: Option<u16>) -> Vec<&Particle> {
        self.particles
            .values()
            .filter(|p| species.map_or(true, |s| p.species == s))
            .filter(|p| region.contains_point(p.position))
            .collect()
    }

    /// Removes every particle inside `region`, returning how many were removed.
    pub fn remove_particles(&mut self, region: &IBox3) -> usize {
        let before = self.particles.len();
        self.particles.retain(|_, p| !region.contains_point(p.position));
        before - self.particles.len()
    }

    /// Removes every particle belonging to one of `cells`.
    pub fn remove_cells(&mut self, cells: &BTreeSet<u32>) -> usize {
        let before = self.particles.len();
        self.particles.retain(|&(cell_id, _), _| !cells.contains(&cell_id));
        before - self.particles.len()
    }

    /// Drops copies further than `margin` nodes from the owned region.
    pub fn delete_non_local_particles(&mut self, margin: i32) -> usize {
        let keep = self.domain.enlarge(margin.min(self.envelope));
        let before = self.particles.len();
        self.particles.retain(|_, p| keep.contains_point(p.position));
        before - self.particles.len()
    }

    pub fn clear(&mut self) {
        self.particles.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::IVec3;

    fn field() -> ParticleField {
        ParticleField::new(IBox3::new(IVec3::ZERO, IVec3::splat(9)), 3)
    }

    #[test]
    fn add_particle_respects_region_and_envelope() {
        let mut f = field();
        let everywhere = f.bounding_box();
        assert!(f.add_particle(&everywhere, Particle::new(DVec3::splat(-2.0), 0, 0, 0)));
        assert!(!f.add_particle(&everywhere, Particle::new(DVec3::splat(-4.0), 0, 1, 0)));
        assert!(!f.add_particle(&IBox3::new(IVec3::ZERO, IVec3::ONE), Particle::new(DVec3::splat(5.0), 0, 2, 0)));
        assert_eq!(f.len(), 1);
        assert_eq!(f.owned_particles().count(), 0);
    }

    #[test]
    fn find_and_remove_by_region() {
        let mut f = field();
        let bb = f.bounding_box();
        f.add_particle(&bb, Particle::new(DVec3::splat(1.0), 0, 0, 0));
        f.add_particle(&bb, Particle::new(DVec3::splat(2.0), 1, 0, 1));
        f.add_particle(&bb, Particle::new(DVec3::splat(11.0), 1, 1, 1));
        assert_eq!(f.find_particles(&f.domain(), None).len(), 2);
        assert_eq!(f.find_particles(&bb, Some(1)).len(), 2);
        assert_eq!(f.delete_non_local_particles(1), 1);
        assert_eq!(f.remove_particles(&IBox3::new(IVec3::ZERO, IVec3::ONE)), 1);
        assert_eq!(f.len(), 1);
    }

    #[test]
    fn transient_forces_are_cleared_but_mechanics_persist() {
        let mut p = Particle::new(DVec3::ZERO, 0, 0, 0);
        p.breakdown = Some(ForceBreakdown::default());
        p.add_force(ForceKind::Mechanics, DVec3::X);
        p.add_force(ForceKind::Repulsion, DVec3::Y);
        assert_eq!(p.force, DVec3::new(1.0, 1.0, 0.0));
        p.clear_transient_forces();
        assert_eq!(p.force, DVec3::X);
        assert_eq!(p.breakdown.unwrap().repulsion, DVec3::ZERO);
        p.reset_mechanics();
        assert_eq!(p.force, DVec3::ZERO);
    }
}
