use glam::{DVec3, IVec3};

/// Smallest grid cell edge, in lattice units.
const MIN_CELL_SIZE: f64 = 1.0;
/// Upper bound on the number of grid cells unless there are more positions than this.
const MAX_GRID_CELLS: usize = 1 << 21;

/// Uniform-grid spatial hash over a fixed set of positions, rebuilt whenever the
/// positions change. Cells are at least `cell_size` wide so a neighbourhood of radius
/// `cell_size` is covered by the 3x3x3 block around the query cell.
#[derive(Debug, Clone)]
pub struct SpatialGrid {
    origin: DVec3,
    inv_cell_size: f64,
    dims: IVec3,
    /// Start index in `sorted_indices` for each grid cell
    cell_starts: Vec<u32>,
    cell_counts: Vec<u32>,
    sorted_indices: Vec<u32>,
}

impl SpatialGrid {
    /// Builds the grid with a counting sort: count, prefix sum, scatter.
    pub fn build(positions: &[DVec3], cell_size: f64) -> Self {
        if positions.is_empty() || cell_size <= 0.0 {
            return SpatialGrid {
                origin: DVec3::ZERO,
                inv_cell_size: 0.0,
                dims: IVec3::ZERO,
                cell_starts: Vec::new(),
                cell_counts: Vec::new(),
                sorted_indices: Vec::new(),
            };
        }
        let (lo, hi) = positions.iter().fold(
            (DVec3::splat(f64::INFINITY), DVec3::splat(f64::NEG_INFINITY)),
            |(lo, hi), p| (lo.min(*p), hi.max(*p)),
        );
        // Cells are never narrower than a lattice node, and coarsen until the grid fits
        let max_cells = MAX_GRID_CELLS.max(positions.len()) as f64;
        let mut cell_size = cell_size.max(MIN_CELL_SIZE);
        let mut extent_cells = ((hi - lo) / cell_size).floor() + DVec3::ONE;
        while extent_cells.x * extent_cells.y * extent_cells.z > max_cells {
            cell_size *= 2.0;
            extent_cells = ((hi - lo) / cell_size).floor() + DVec3::ONE;
        }
        let inv_cell_size = 1.0 / cell_size;
        let dims = extent_cells.as_ivec3();
        let num_cells = dims.x as usize * dims.y as usize * dims.z as usize;

        let mut grid = SpatialGrid {
            origin: lo,
            inv_cell_size,
            dims,
            cell_starts: vec![0; num_cells],
            cell_counts: vec![0; num_cells],
            sorted_indices: vec![0; positions.len()],
        };

        // Phase 1: count particles per cell
        let cell_of: Vec<usize> = positions.iter().map(|p| grid.cell_index(grid.cell_coords(*p))).collect();
        for &c in &cell_of {
            grid.cell_counts[c] += 1;
        }

        // Phase 2: prefix sum
        let mut total = 0;
        for (start, &count) in grid.cell_starts.iter_mut().zip(&grid.cell_counts) {
            *start = total;
            total += count;
        }

        // Phase 3: scatter
        let mut offsets = vec![0u32; num_cells];
        for (idx, &c) in cell_of.iter().enumerate() {
            grid.sorted_indices[(grid.cell_starts[c] + offsets[c]) as usize] = idx as u32;
            offsets[c] += 1;
        }
        grid
    }

    #[inline(always)]
    fn cell_coords(&self, pos: DVec3) -> IVec3 {
        ((pos - self.origin) * self.inv_cell_size).floor().as_ivec3()
    }

    #[inline(always)]
    fn cell_index(&self, c: IVec3) -> usize {
        let c = c.clamp(IVec3::ZERO, self.dims - IVec3::ONE);
        (c.x + self.dims.x * (c.y + self.dims.y * c.z)) as usize
    }

    /// Calls `f` for every indexed position within `max_dist` of `pos`, except `skip`.
    /// `f` returns `false` to stop early.
    pub fn for_each_neighbor<F>(&self, skip: Option<u32>, pos: DVec3, max_dist: f64, positions: &[DVec3], mut f: F)
    where
        F: FnMut(u32, f64) -> bool,
    {
        if self.sorted_indices.is_empty() {
            return;
        }
        let center = self.cell_coords(pos);
        let max_dist_sq = max_dist * max_dist;
        for dz in -1..=1 {
            for dy in -1..=1 {
                for dx in -1..=1 {
                    let c = center + IVec3::new(dx, dy, dz);
                    if c.cmplt(IVec3::ZERO).any() || c.cmpge(self.dims).any() {
                        continue;
                    }
                    let grid_idx = self.cell_index(c);
                    let start = self.cell_starts[grid_idx] as usize;
                    let end = start + self.cell_counts[grid_idx] as usize;
                    for &neighbor in &self.sorted_indices[start..end] {
                        if Some(neighbor) == skip {
                            continue;
                        }
                        let dist_sq = pos.distance_squared(positions[neighbor as usize]);
                        if dist_sq < max_dist_sq && !f(neighbor, dist_sq.sqrt()) {
                            return;
                        }
                    }
                }
            }
        }
    }
}
