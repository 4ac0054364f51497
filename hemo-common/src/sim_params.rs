use glam::IVec3;
use serde::{Deserialize, Serialize};

/// Lattice parameters derived from the configuration, used throughout seeding and stepping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimParams {
    /// Lattice spacing (m)
    pub dx: f64,
    /// Time step (s)
    pub dt: f64,
    /// Micrometres to lattice units, `1e-6 / dx`
    pub um_to_lu: f64,
    /// Lattice nodes along each axis
    pub lattice_size: IVec3,
    /// Particle envelope (halo) width in lattice units
    pub particle_envelope: i32,
}

impl SimParams {
    /// Converts a physical length in micrometres to lattice units.
    #[inline(always)]
    pub fn um_to_lattice(&self, length_um: f64) -> f64 {
        length_um * self.um_to_lu
    }

    /// Physical time (s) reached after `iter` steps.
    pub fn physical_time(&self, iter: u64) -> f64 {
        self.dt * iter as f64
    }
}

/// Per-axis wrap bound for periodic identity resolution.
///
/// A limit of zero means "use the domain extent". The row and plane offsets are
/// derived from the limits and kept in sync by [`PeriodicityLimit::set`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodicityLimit {
    limit: [i32; 3],
    offset_y: i64,
    offset_z: i64,
}

impl Default for PeriodicityLimit {
    fn default() -> Self {
        PeriodicityLimit::new([0, 0, 0])
    }
}

impl PeriodicityLimit {
    pub fn new(limit: [i32; 3]) -> Self {
        let mut p = PeriodicityLimit { limit, offset_y: 0, offset_z: 0 };
        p.recompute_offsets();
        p
    }

    /// Sets the limit of one axis and recomputes the derived offsets.
    pub fn set(&mut self, axis: usize, limit: i32) {
        self.limit[axis] = limit;
        self.recompute_offsets();
    }

    fn recompute_offsets(&mut self) {
        self.offset_y = self.limit[0] as i64;
        self.offset_z = self.limit[0] as i64 * self.limit[1] as i64;
    }

    pub fn limit(&self, axis: usize) -> i32 {
        self.limit[axis]
    }

    pub fn limits(&self) -> [i32; 3] {
        self.limit
    }

    pub fn offset_y(&self) -> i64 {
        self.offset_y
    }

    pub fn offset_z(&self) -> i64 {
        self.offset_z
    }

    /// Wrap period of `axis`: the configured limit, or `extent` when unset.
    pub fn period(&self, axis: usize, extent: i32) -> i32 {
        if self.limit[axis] > 0 { self.limit[axis] } else { extent }
    }

    /// Linear index of a periodic image shift, unique per image within the limits.
    pub fn image_index(&self, shift: IVec3) -> i64 {
        shift.x as i64 + shift.y as i64 * self.offset_y + shift.z as i64 * self.offset_z
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_follow_limits() {
        let mut p = PeriodicityLimit::default();
        p.set(0, 40);
        p.set(1, 20);
        assert_eq!(p.offset_y(), 40);
        assert_eq!(p.offset_z(), 800);
        p.set(0, 10);
        assert_eq!(p.offset_y(), 10);
        assert_eq!(p.offset_z(), 200);
        assert_eq!(p.image_index(IVec3::new(1, 1, 1)), 211);
    }

    #[test]
    fn unset_limit_falls_back_to_extent() {
        let p = PeriodicityLimit::new([0, 12, 0]);
        assert_eq!(p.period(0, 50), 50);
        assert_eq!(p.period(1, 50), 12);
    }
}
