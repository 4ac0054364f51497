use glam::{DVec3, IVec3};
use serde::{Deserialize, Serialize};

/// Inclusive integer box on the lattice, `[x0, x1] x [y0, y1] x [z0, z1]`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IBox3 {
    pub min: IVec3,
    pub max: IVec3,
}

impl IBox3 {
    /// Creates a new box from its inclusive corners.
    pub fn new(min: IVec3, max: IVec3) -> Self {
        IBox3 { min, max }
    }

    /// Box covering `[0, size - 1]` on every axis.
    pub fn from_size(size: IVec3) -> Self {
        IBox3 { min: IVec3::ZERO, max: size - IVec3::ONE }
    }

    /// Number of nodes along each axis.
    pub fn extent(&self) -> IVec3 {
        self.max - self.min + IVec3::ONE
    }

    /// Total number of nodes, zero for an inverted box.
    pub fn volume(&self) -> usize {
        let e = self.extent();
        if e.x <= 0 || e.y <= 0 || e.z <= 0 {
            return 0;
        }
        e.x as usize * e.y as usize * e.z as usize
    }

    /// Grows the box by `margin` nodes on all six faces.
    pub fn enlarge(&self, margin: i32) -> Self {
        IBox3 { min: self.min - IVec3::splat(margin), max: self.max + IVec3::splat(margin) }
    }

    /// Shifts the box by `offset`.
    pub fn shift(&self, offset: IVec3) -> Self {
        IBox3 { min: self.min + offset, max: self.max + offset }
    }

    pub fn intersection(&self, other: &IBox3) -> Option<IBox3> {
        let min = self.min.max(other.min);
        let max = self.max.min(other.max);
        if min.x > max.x || min.y > max.y || min.z > max.z {
            None
        } else {
            Some(IBox3 { min, max })
        }
    }

    /// True if the lattice node lies inside the box.
    #[inline(always)]
    pub fn contains_node(&self, node: IVec3) -> bool {
        node.x >= self.min.x && node.x <= self.max.x &&
        node.y >= self.min.y && node.y <= self.max.y &&
        node.z >= self.min.z && node.z <= self.max.z
    }

    /// True if a continuous position falls in the Voronoi region of the box nodes,
    /// i.e. `[min - 0.5, max + 0.5)` on every axis.
    #[inline(always)]
    pub fn contains_point(&self, pos: DVec3) -> bool {
        let lo = self.min.as_dvec3() - DVec3::splat(0.5);
        let hi = self.max.as_dvec3() + DVec3::splat(0.5);
        pos.x >= lo.x && pos.x < hi.x &&
        pos.y >= lo.y && pos.y < hi.y &&
        pos.z >= lo.z && pos.z < hi.z
    }

    /// Clamps a node into the box.
    pub fn clamp_node(&self, node: IVec3) -> IVec3 {
        node.clamp(self.min, self.max)
    }

    /// Iterates every node in x-fastest order.
    pub fn nodes(&self) -> impl Iterator<Item = IVec3> + '_ {
        let (min, max) = (self.min, self.max);
        (min.z..=max.z).flat_map(move |z| {
            (min.y..=max.y).flat_map(move |y| (min.x..=max.x).map(move |x| IVec3::new(x, y, z)))
        })
    }
}

/// Nearest lattice node of a continuous lattice-unit position.
#[inline(always)]
pub fn nearest_node(pos: DVec3) -> IVec3 {
    (pos + DVec3::splat(0.5)).floor().as_ivec3()
}

/// Wraps `value` into `[lo, lo + period)`.
#[inline(always)]
pub fn wrap_into(value: f64, lo: f64, period: f64) -> f64 {
    lo + (value - lo).rem_euclid(period)
}

/// Shortest signed displacement along a periodic axis.
#[inline(always)]
pub fn minimum_image(delta: f64, period: f64) -> f64 {
    delta - period * (delta / period).round()
}

/// Clamps a value between a minimum and maximum.
pub fn clamp(value: f64, min: f64, max: f64) -> f64 {
    value.max(min).min(max)
}
