use serde::{Serialize, Deserialize};

/// Population of one species at a snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpeciesCount {
    pub name: String,
    /// Complete cells owned across all blocks.
    pub cells: u32,
    /// Owned particles (vertices) across all blocks.
    pub particles: u32,
}

/// A snapshot of the simulation state written at each output interval.
#[derive(Debug, Clone, Serialize, Deserialize)] // Derive traits for easy saving/loading
pub struct Snapshot {
    /// Iteration at which the snapshot was taken.
    pub iteration: u64,
    /// Physical time (s) of the snapshot.
    pub time_s: f64,
    /// Total owned particles.
    pub total_particle_count: u32,
    /// Cells declared across all placement files at seeding.
    pub declared_cells: u32,
    pub species: Vec<SpeciesCount>,
    /// Approximate wall-clock seconds per iteration since the previous output.
    #[serde(skip_serializing_if = "Option::is_none")] // Don't write "seconds_per_iteration": null
    pub seconds_per_iteration: Option<f64>,
}
