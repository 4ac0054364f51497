use crate::particle::ParticleField;
use log::{debug, info};
use std::collections::{BTreeMap, BTreeSet};

/// Owned-particle tally of one cell across all blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellTally {
    pub species: u16,
    pub particles: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CompletenessReport {
    pub checked_cells: usize,
    pub removed_cells: BTreeSet<u32>,
    pub removed_particles: usize,
}

/// Enforces the all-or-nothing cell rule: a cell survives only if exactly
/// `vertex_count` of its particles are owned somewhere.
///
/// Only owned copies are counted, so every particle is counted once regardless of how
/// many envelopes replicate it. The count is only meaningful after the envelopes have
/// been synchronized; before that, vertices accepted in a halo outside every owned
/// region are invisible and their cells would be truncated.
pub struct CellCompletenessFilter<'a> {
    vertex_counts: &'a [usize],
}

impl<'a> CellCompletenessFilter<'a> {
    /// `vertex_counts` is indexed by species id.
    pub fn new(vertex_counts: &'a [usize]) -> Self {
        CellCompletenessFilter { vertex_counts }
    }

    /// Counts the owned particles of every cell that has any copy in `fields`.
    pub fn count_cells(&self, fields: &[ParticleField]) -> BTreeMap<u32, CellTally> {
        let mut tallies: BTreeMap<u32, CellTally> = BTreeMap::new();
        for field in fields {
            for p in field.particles() {
                let tally = tallies.entry(p.cell_id).or_insert(CellTally { species: p.species, particles: 0 });
                if field.is_owned(p) {
                    tally.particles += 1;
                }
            }
        }
        tallies
    }

    /// Cells (of `species`, or of all species) whose owned count is not the vertex count.
    pub fn incomplete_cells(&self, fields: &[ParticleField], species: Option<u16>) -> BTreeSet<u32> {
        self.count_cells(fields)
            .into_iter()
            .filter(|(_, t)| species.map_or(true, |s| t.species == s))
            .filter(|(_, t)| self.vertex_counts.get(t.species as usize).copied() != Some(t.particles))
            .map(|(cell_id, _)| cell_id)
            .collect()
    }

    /// Removes every incomplete cell from every block.
    pub fn apply(&self, fields: &mut [ParticleField], species: Option<u16>, verbose: bool) -> CompletenessReport {
        let tallies = self.count_cells(fields);
        let checked_cells = tallies.values().filter(|t| species.map_or(true, |s| t.species == s)).count();
        let removed_cells = self.incomplete_cells(fields, species);
        if removed_cells.is_empty() {
            return CompletenessReport { checked_cells, ..Default::default() };
        }

        if verbose {
            for cell_id in &removed_cells {
                let t = tallies[cell_id];
                info!(
                    "Removing incomplete cell {} of species {}: {} of {} vertices present.",
                    cell_id,
                    t.species,
                    t.particles,
                    self.vertex_counts.get(t.species as usize).copied().unwrap_or(0)
                );
            }
        }
        let removed_particles = fields.iter_mut().map(|f| f.remove_cells(&removed_cells)).sum();
        debug!(
            "Completeness filter removed {} cells ({} particle copies) out of {} checked.",
            removed_cells.len(), removed_particles, checked_cells
        );
        CompletenessReport { checked_cells, removed_cells, removed_particles }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particle::Particle;
    use glam::{DVec3, IVec3};
    use hemo_common::IBox3;

    fn two_blocks() -> Vec<ParticleField> {
        vec![
            ParticleField::new(IBox3::new(IVec3::ZERO, IVec3::new(4, 9, 9)), 2),
            ParticleField::new(IBox3::new(IVec3::new(5, 0, 0), IVec3::new(9, 9, 9)), 2),
        ]
    }

    fn put(fields: &mut [ParticleField], x: f64, cell: u32, vertex: u32) {
        for f in fields.iter_mut() {
            let bb = f.bounding_box();
            f.add_particle(&bb, Particle::new(DVec3::new(x, 5.0, 5.0), cell, vertex, 0));
        }
    }

    #[test]
    fn replicated_particles_are_counted_once() {
        let mut fields = two_blocks();
        // Cell 0 straddles the block boundary; every vertex is replicated in both envelopes
        put(&mut fields, 4.0, 0, 0);
        put(&mut fields, 5.0, 0, 1);
        put(&mut fields, 6.0, 0, 2);
        let filter_counts = [3usize];
        let filter = CellCompletenessFilter::new(&filter_counts);
        assert_eq!(filter.count_cells(&fields)[&0].particles, 3);
        let report = filter.apply(&mut fields, None, false);
        assert!(report.removed_cells.is_empty());
        assert_eq!(report.checked_cells, 1);
    }

    #[test]
    fn partial_cells_are_removed_from_every_block() {
        let mut fields = two_blocks();
        put(&mut fields, 4.0, 0, 0);
        put(&mut fields, 5.0, 0, 1);
        put(&mut fields, 1.0, 1, 0);
        put(&mut fields, 2.0, 1, 1);
        put(&mut fields, 3.0, 1, 2);
        let counts = [3usize];
        let report = CellCompletenessFilter::new(&counts).apply(&mut fields, Some(0), true);
        assert_eq!(report.removed_cells.into_iter().collect::<Vec<_>>(), vec![0]);
        assert_eq!(report.removed_particles, 4);
        assert!(fields.iter().all(|f| f.particles().all(|p| p.cell_id == 1)));
    }
}
