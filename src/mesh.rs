//! Reference surface meshes of the cell species.
//!
//! Meshes are stored in micrometres around an arbitrary origin. Placement always
//! works on a centred copy, see [`ReferenceMesh::centered`].

use glam::DVec3;
use hemo_common::MeshConfig;
use std::collections::{BTreeSet, HashMap};

/// Owned triangulated mesh with a derived unique edge list.
#[derive(Debug, Clone)]
pub struct ReferenceMesh {
    /// Vertex positions in µm
    pub vertices: Vec<DVec3>,
    /// Triangle indices, counter-clockwise seen from outside
    pub triangles: Vec<[u32; 3]>,
    /// Unique undirected edges, `(low, high)`
    pub edges: Vec<(u32, u32)>,
}

impl ReferenceMesh {
    /// Builds a mesh from triangles and derives its edges.
    pub fn new(vertices: Vec<DVec3>, triangles: Vec<[u32; 3]>) -> Self {
        let mut unique = BTreeSet::new();
        for t in &triangles {
            for k in 0..3 {
                let (a, b) = (t[k], t[(k + 1) % 3]);
                unique.insert((a.min(b), a.max(b)));
            }
        }
        ReferenceMesh { vertices, triangles, edges: unique.into_iter().collect() }
    }

    /// Builds a mesh from explicit edges only (filaments have no surface).
    pub fn from_edges(vertices: Vec<DVec3>, edges: Vec<(u32, u32)>) -> Self {
        ReferenceMesh { vertices, triangles: Vec::new(), edges }
    }

    pub fn from_config(config: &MeshConfig) -> Self {
        match *config {
            MeshConfig::Icosphere { radius_um, subdivisions } => Self::icosphere(radius_um, subdivisions),
            MeshConfig::Biconcave { radius_um, resolution } => Self::biconcave(radius_um, resolution),
            MeshConfig::Chain { vertices, spacing_um } => Self::chain(vertices, spacing_um),
        }
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    /// Axis-aligned bounds `(min, max)`. An empty mesh reports a zero box.
    pub fn bounding_box(&self) -> (DVec3, DVec3) {
        if self.vertices.is_empty() {
            return (DVec3::ZERO, DVec3::ZERO);
        }
        self.vertices.iter().fold(
            (DVec3::splat(f64::INFINITY), DVec3::splat(f64::NEG_INFINITY)),
            |(lo, hi), v| (lo.min(*v), hi.max(*v)),
        )
    }

    /// Centre of the bounding box.
    pub fn center(&self) -> DVec3 {
        let (lo, hi) = self.bounding_box();
        (lo + hi) * 0.5
    }

    /// Copy translated so the bounding-box centre sits at the origin.
    pub fn centered(&self) -> Self {
        let c = self.center();
        let mut copy = self.clone();
        copy.vertices.iter_mut().for_each(|v| *v -= c);
        copy
    }

    /// Enclosed volume via the divergence theorem, V = (1/6) Σ v₁ · (v₂ × v₃).
    pub fn volume(&self) -> f64 {
        let signed: f64 = self
            .triangles
            .iter()
            .map(|t| {
                let [a, b, c] = self.corners(t);
                a.dot(b.cross(c))
            })
            .sum();
        (signed / 6.0).abs()
    }

    pub fn surface_area(&self) -> f64 {
        self.triangles
            .iter()
            .map(|t| {
                let [a, b, c] = self.corners(t);
                (b - a).cross(c - a).length() * 0.5
            })
            .sum()
    }

    pub fn mean_edge_length(&self) -> f64 {
        if self.edges.is_empty() {
            return 0.0;
        }
        let total: f64 = self.edges.iter().map(|&(a, b)| self.edge_length(a, b)).sum();
        total / self.edges.len() as f64
    }

    pub fn edge_length(&self, a: u32, b: u32) -> f64 {
        self.vertices[a as usize].distance(self.vertices[b as usize])
    }

    fn corners(&self, t: &[u32; 3]) -> [DVec3; 3] {
        [self.vertices[t[0] as usize], self.vertices[t[1] as usize], self.vertices[t[2] as usize]]
    }

    /// Geodesic sphere: an icosahedron subdivided `subdivisions` times and projected
    /// onto the sphere. Has `10 * 4^n + 2` vertices.
    pub fn icosphere(radius_um: f64, subdivisions: u32) -> Self {
        let t = (1.0 + 5f64.sqrt()) / 2.0;
        let mut vertices: Vec<DVec3> = [
            (-1.0, t, 0.0), (1.0, t, 0.0), (-1.0, -t, 0.0), (1.0, -t, 0.0),
            (0.0, -1.0, t), (0.0, 1.0, t), (0.0, -1.0, -t), (0.0, 1.0, -t),
            (t, 0.0, -1.0), (t, 0.0, 1.0), (-t, 0.0, -1.0), (-t, 0.0, 1.0),
        ]
        .iter()
        .map(|&(x, y, z)| DVec3::new(x, y, z).normalize())
        .collect();

        let mut triangles: Vec<[u32; 3]> = vec![
            [0, 11, 5], [0, 5, 1], [0, 1, 7], [0, 7, 10], [0, 10, 11],
            [1, 5, 9], [5, 11, 4], [11, 10, 2], [10, 7, 6], [7, 1, 8],
            [3, 9, 4], [3, 4, 2], [3, 2, 6], [3, 6, 8], [3, 8, 9],
            [4, 9, 5], [2, 4, 11], [6, 2, 10], [8, 6, 7], [9, 8, 1],
        ];

        for _ in 0..subdivisions {
            let mut midpoints: HashMap<(u32, u32), u32> = HashMap::new();
            let mut midpoint = |a: u32, b: u32, vertices: &mut Vec<DVec3>| -> u32 {
                let key = (a.min(b), a.max(b));
                *midpoints.entry(key).or_insert_with(|| {
                    let m = ((vertices[a as usize] + vertices[b as usize]) * 0.5).normalize();
                    vertices.push(m);
                    (vertices.len() - 1) as u32
                })
            };
            let mut next = Vec::with_capacity(triangles.len() * 4);
            for &[a, b, c] in &triangles {
                let ab = midpoint(a, b, &mut vertices);
                let bc = midpoint(b, c, &mut vertices);
                let ca = midpoint(c, a, &mut vertices);
                next.extend_from_slice(&[[a, ab, ca], [b, bc, ab], [c, ca, bc], [ab, bc, ca]]);
            }
            triangles = next;
        }

        vertices.iter_mut().for_each(|v| *v *= radius_um);
        Self::new(vertices, triangles)
    }

    /// Biconcave disc following the Fung-Tong profile
    /// `z(r) = ½ √(1 - ρ²) (C₀ + C₂ρ² + C₄ρ⁴)`, ρ = r / R.
    ///
    /// Upper and lower surfaces share a single rim ring. `resolution` is the number of
    /// radial rings (at least 2); each ring has `2 * resolution` vertices.
    pub fn biconcave(radius_um: f64, resolution: u32) -> Self {
        // Coefficients for a 3.91 µm cell, scaled with the radius
        let scale = radius_um / 3.91;
        let (c0, c2, c4) = (0.81 * scale, 7.83 * scale, -4.39 * scale);
        let half_thickness = |r: f64| {
            let rho2 = (r / radius_um).powi(2);
            0.5 * (1.0 - rho2).max(0.0).sqrt() * (c0 + c2 * rho2 + c4 * rho2 * rho2)
        };

        let res = resolution.max(2);
        let ang = 2 * res;
        let mut vertices = vec![DVec3::new(0.0, 0.0, half_thickness(0.0)), DVec3::new(0.0, 0.0, -half_thickness(0.0))];
        for i in 1..res {
            let r = i as f64 / res as f64 * radius_um;
            let z = half_thickness(r);
            for j in 0..ang {
                let theta = j as f64 / ang as f64 * std::f64::consts::TAU;
                vertices.push(DVec3::new(r * theta.cos(), r * theta.sin(), z));
                vertices.push(DVec3::new(r * theta.cos(), r * theta.sin(), -z));
            }
        }
        let rim_start = vertices.len() as u32;
        for j in 0..ang {
            let theta = j as f64 / ang as f64 * std::f64::consts::TAU;
            vertices.push(DVec3::new(radius_um * theta.cos(), radius_um * theta.sin(), 0.0));
        }

        let upper = |i: u32, j: u32| -> u32 {
            if i == res { rim_start + j % ang } else { 2 + ((i - 1) * ang + j % ang) * 2 }
        };
        let lower = |i: u32, j: u32| -> u32 {
            if i == res { rim_start + j % ang } else { upper(i, j) + 1 }
        };

        let mut triangles = Vec::new();
        for j in 0..ang {
            triangles.push([0, upper(1, j), upper(1, j + 1)]);
            triangles.push([1, lower(1, j + 1), lower(1, j)]);
        }
        for i in 1..res {
            for j in 0..ang {
                triangles.push([upper(i, j), upper(i + 1, j), upper(i, j + 1)]);
                triangles.push([upper(i, j + 1), upper(i + 1, j), upper(i + 1, j + 1)]);
                triangles.push([lower(i, j), lower(i, j + 1), lower(i + 1, j)]);
                triangles.push([lower(i, j + 1), lower(i + 1, j + 1), lower(i + 1, j)]);
            }
        }

        Self::new(vertices, triangles)
    }

    /// Straight filament of `count` vertices along x with consecutive links.
    pub fn chain(count: u32, spacing_um: f64) -> Self {
        let vertices = (0..count).map(|i| DVec3::new(i as f64 * spacing_um, 0.0, 0.0)).collect();
        let edges = (1..count).map(|i| (i - 1, i)).collect();
        Self::from_edges(vertices, edges)
    }
}
