pub mod config;
pub mod sim_params;
pub mod snapshot;
pub mod vecmath;

// Re-export key types for easier use by dependent crates
pub use config::{
    Axis, DomainConfig, EngineConfig, GeometryConfig, MechanicsVariant, MeshConfig, OutputConfig,
    RepulsionConfig, SpeciesConfig, TimingConfig, resolve_directory,
};
pub use sim_params::{PeriodicityLimit, SimParams};
pub use snapshot::{Snapshot, SpeciesCount};
pub use vecmath::{IBox3, clamp, minimum_image, nearest_node, wrap_into};
