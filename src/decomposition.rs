use glam::IVec3;
use hemo_common::IBox3;

/// Splits the global lattice into a regular grid of disjoint blocks.
///
/// Each block stands in for the sub-domain of one worker; together they tile the
/// global box exactly.
#[derive(Debug, Clone)]
pub struct Decomposition {
    global: IBox3,
    /// Per-axis block start coordinates, plus the end sentinel
    splits: [Vec<i32>; 3],
    blocks: Vec<IBox3>,
    envelope: i32,
}

impl Decomposition {
    pub fn new(size: IVec3, counts: [u32; 3], envelope: i32) -> Self {
        let global = IBox3::from_size(size);
        let splits = [0usize, 1, 2].map(|axis| {
            let n = size[axis] as i64;
            let c = counts[axis].max(1) as i64;
            (0..=c).map(|k| (k * n / c) as i32).collect::<Vec<_>>()
        });

        let mut blocks = Vec::new();
        for kz in 0..splits[2].len() - 1 {
            for ky in 0..splits[1].len() - 1 {
                for kx in 0..splits[0].len() - 1 {
                    blocks.push(IBox3::new(
                        IVec3::new(splits[0][kx], splits[1][ky], splits[2][kz]),
                        IVec3::new(splits[0][kx + 1] - 1, splits[1][ky + 1] - 1, splits[2][kz + 1] - 1),
                    ));
                }
            }
        }
        Decomposition { global, splits, blocks, envelope }
    }

    /// A single block covering the whole lattice.
    pub fn single(size: IVec3, envelope: i32) -> Self {
        Self::new(size, [1, 1, 1], envelope)
    }

    pub fn global(&self) -> IBox3 {
        self.global
    }

    pub fn blocks(&self) -> &[IBox3] {
        &self.blocks
    }

    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    pub fn envelope(&self) -> i32 {
        self.envelope
    }

    /// Index of the block owning `node`, `None` outside the global box.
    pub fn owner_of(&self, node: IVec3) -> Option<usize> {
        if !self.global.contains_node(node) {
            return None;
        }
        let mut k = [0usize; 3];
        for axis in 0..3 {
            // Last start not exceeding the coordinate
            k[axis] = self.splits[axis].partition_point(|&s| s <= node[axis]) - 1;
        }
        let nx = self.splits[0].len() - 1;
        let ny = self.splits[1].len() - 1;
        Some(k[0] + nx * (k[1] + ny * k[2]))
    }
}
