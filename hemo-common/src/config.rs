use serde::{Deserialize, Serialize};
use anyhow::Result;
use glam::IVec3;
use crate::sim_params::SimParams;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Lattice axis, used by geometry presets and periodicity setters.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Axis {
    X,
    Y,
    Z,
}

impl Axis {
    pub fn index(self) -> usize {
        match self {
            Axis::X => 0,
            Axis::Y => 1,
            Axis::Z => 2,
        }
    }
}

/// Solid boundary layout of the global lattice.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum GeometryConfig {
    /// No solid nodes at all.
    #[default]
    Open,
    /// Two solid walls on the first and last layer normal to `axis`.
    Channel { axis: Axis },
    /// Circular pipe along `axis`, inscribed in the cross-section.
    Pipe { axis: Axis },
}

// Configuration for the lattice and its decomposition
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct DomainConfig {
    pub lattice_size: [u32; 3],
    pub dx_m: f64,
    pub dt_s: f64,
    #[serde(default = "default_blocks")]
    pub blocks: [u32; 3],
    pub particle_envelope: u32,
    #[serde(default)]
    pub geometry: GeometryConfig,
    #[serde(default)]
    pub periodic: [bool; 3],
    /// Zero entries fall back to the lattice size.
    #[serde(default)]
    pub periodicity_limit: [i32; 3],
    // Stand-in flow: prescribed velocity (lattice units) plus mobility * force
    #[serde(default)]
    pub base_velocity: [f64; 3],
    #[serde(default = "default_force_mobility")]
    pub force_mobility: f64,
}

fn default_blocks() -> [u32; 3] {
    [1, 1, 1]
}

fn default_force_mobility() -> f64 {
    1.0
}

// Configuration for timing and timescale separation
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct TimingConfig {
    pub total_iterations: u64,
    pub output_interval: u64,
    pub checkpoint_interval: u64,
    #[serde(default = "default_timescale")]
    pub particle_velocity_update_timescale: u32,
}

fn default_timescale() -> u32 {
    1
}

/// Pairwise repulsion settings, shared by cell-cell and cell-boundary repulsion.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct RepulsionConfig {
    pub constant: f64,
    pub cutoff_um: f64,
    #[serde(default = "default_timescale")]
    pub timescale: u32,
}

/// Mechanics model family of a species.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum MechanicsVariant {
    /// Templated mesh placed from position + rotation records.
    #[default]
    Standard,
    /// Raw vertex lists per cell (filament-like species), bypassing the template.
    SpecialSeeded,
}

/// Reference mesh source of a species, in micrometres.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MeshConfig {
    Icosphere { radius_um: f64, subdivisions: u32 },
    Biconcave { radius_um: f64, resolution: u32 },
    Chain { vertices: u32, spacing_um: f64 },
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct SpeciesConfig {
    pub name: String,
    #[serde(default)]
    pub mechanics: MechanicsVariant,
    #[serde(default)]
    pub minimum_distance_from_solid_um: f64,
    #[serde(default = "default_timescale")]
    pub sub_step_rate: u32,
    #[serde(default = "default_link_stiffness")]
    pub link_stiffness: f64,
    pub mesh: MeshConfig,
    /// Defaults to `<name>.pos` in the input directory.
    #[serde(default)]
    pub positions_file: Option<String>,
}

fn default_link_stiffness() -> f64 {
    0.01 // Lattice force units per lattice unit of stretch
}

// Configuration for output settings, loaded from config.toml
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct OutputConfig {
    #[serde(default = "default_input_directory")]
    pub input_directory: String,
    #[serde(default = "default_output_directory")]
    pub output_directory: String,
    #[serde(default = "default_log_directory")]
    pub log_directory: String,
    #[serde(default = "default_log_file")]
    pub log_file: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            input_directory: default_input_directory(),
            output_directory: default_output_directory(),
            log_directory: default_log_directory(),
            log_file: default_log_file(),
        }
    }
}

fn default_input_directory() -> String {
    "./".to_string()
}

fn default_output_directory() -> String {
    "./tmp".to_string()
}

fn default_log_directory() -> String {
    "./log".to_string()
}

fn default_log_file() -> String {
    "logfile".to_string()
}

/// Relative directories are anchored at `./`, absolute ones are kept.
pub fn resolve_directory(dir: &str) -> PathBuf {
    let path = Path::new(dir);
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        Path::new(".").join(path)
    }
}

// Main engine configuration structure, loaded from config.toml.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct EngineConfig {
    #[serde(default)]
    pub verbose: u8,
    pub domain: DomainConfig,
    pub timing: TimingConfig,
    #[serde(default)]
    pub repulsion: Option<RepulsionConfig>,
    #[serde(default)]
    pub boundary_repulsion: Option<RepulsionConfig>,
    #[serde(default)]
    pub species: Vec<SpeciesConfig>,
    #[serde(default)]
    pub output: OutputConfig,
}

impl EngineConfig {
    /// Loads the engine configuration from a TOML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_ref = path.as_ref();

        let config_str = std::fs::read_to_string(path_ref)
            .map_err(|e| anyhow::anyhow!("Failed to read config file '{}': {}", path_ref.display(), e))?;
        Self::from_toml_str(&config_str)
            .map_err(|e| anyhow::anyhow!("Invalid config '{}': {}", path_ref.display(), e))
    }

    /// Parses and validates a configuration from TOML text.
    pub fn from_toml_str(config_str: &str) -> Result<Self> {
        let config: EngineConfig = toml::from_str(config_str)
            .map_err(|e| anyhow::anyhow!("Failed to parse TOML: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Serializes back to TOML, used for checkpoint copies of the run configuration.
    pub fn to_toml_string(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    fn validate(&self) -> Result<()> {
        let d = &self.domain;
        if d.lattice_size.iter().any(|&n| n == 0) {
            anyhow::bail!("lattice_size must be positive on every axis.");
        }
        if d.dx_m <= 0.0 || d.dt_s <= 0.0 {
            anyhow::bail!("dx_m and dt_s must be positive.");
        }
        if d.blocks.iter().any(|&b| b == 0) {
            anyhow::bail!("blocks must be positive on every axis.");
        }
        for axis in 0..3 {
            if d.blocks[axis] > d.lattice_size[axis] {
                anyhow::bail!(
                    "Cannot split {} nodes into {} blocks along axis {}.",
                    d.lattice_size[axis], d.blocks[axis], axis
                );
            }
        }
        if self.timing.particle_velocity_update_timescale == 0 {
            anyhow::bail!("particle_velocity_update_timescale must be at least 1.");
        }
        if self.timing.output_interval == 0 || self.timing.checkpoint_interval == 0 {
            anyhow::bail!("output_interval and checkpoint_interval must be at least 1.");
        }
        for r in [&self.repulsion, &self.boundary_repulsion].into_iter().flatten() {
            if r.timescale == 0 || r.cutoff_um < 0.0 {
                anyhow::bail!("Repulsion timescale must be at least 1 and cutoff non-negative.");
            }
        }

        let mut names = HashSet::new();
        for s in &self.species {
            if !names.insert(s.name.as_str()) {
                anyhow::bail!("Duplicate species name '{}'.", s.name);
            }
            if s.sub_step_rate == 0 {
                anyhow::bail!("sub_step_rate of '{}' must be at least 1.", s.name);
            }
            if s.minimum_distance_from_solid_um < 0.0 {
                anyhow::bail!("minimum_distance_from_solid_um of '{}' must be non-negative.", s.name);
            }
        }
        // Divisibility of the timescales is enforced by the engine setters, which fail fatally.

        Ok(())
    }

    /// Converts the configuration into lattice parameters used at runtime.
    pub fn get_sim_params(&self) -> SimParams {
        let d = &self.domain;
        SimParams {
            dx: d.dx_m,
            dt: d.dt_s,
            um_to_lu: 1e-6 / d.dx_m,
            lattice_size: IVec3::new(d.lattice_size[0] as i32, d.lattice_size[1] as i32, d.lattice_size[2] as i32),
            particle_envelope: d.particle_envelope as i32,
        }
    }

    /// Placement file of a species: explicit path, or `<input_directory>/<name>.pos`.
    pub fn positions_file(&self, species: &SpeciesConfig) -> PathBuf {
        match &species.positions_file {
            Some(p) => PathBuf::from(p),
            None => resolve_directory(&self.output.input_directory).join(format!("{}.pos", species.name)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        [domain]
        lattice_size = [20, 20, 20]
        dx_m = 5e-7
        dt_s = 1e-7
        particle_envelope = 10

        [timing]
        total_iterations = 100
        output_interval = 10
        checkpoint_interval = 50

        [[species]]
        name = "RBC"
        mesh = { kind = "icosphere", radius_um = 2.0, subdivisions = 1 }
    "#;

    #[test]
    fn minimal_config_fills_defaults() {
        let cfg = EngineConfig::from_toml_str(MINIMAL).unwrap();
        assert_eq!(cfg.domain.blocks, [1, 1, 1]);
        assert_eq!(cfg.domain.geometry, GeometryConfig::Open);
        assert_eq!(cfg.timing.particle_velocity_update_timescale, 1);
        assert_eq!(cfg.species[0].mechanics, MechanicsVariant::Standard);
        assert_eq!(cfg.species[0].sub_step_rate, 1);
        assert_eq!(cfg.output.log_file, "logfile");
        assert!(cfg.repulsion.is_none());

        let params = cfg.get_sim_params();
        assert!((params.um_to_lu - 2.0).abs() < 1e-9);
        assert_eq!(params.lattice_size, IVec3::splat(20));
    }

    #[test]
    fn duplicate_species_are_rejected() {
        let doubled = format!(
            "{}\n[[species]]\nname = \"RBC\"\nmesh = {{ kind = \"chain\", vertices = 4, spacing_um = 1.0 }}\n",
            MINIMAL
        );
        assert!(EngineConfig::from_toml_str(&doubled).is_err());
    }

    #[test]
    fn default_positions_file_uses_species_name() {
        let cfg = EngineConfig::from_toml_str(MINIMAL).unwrap();
        let path = cfg.positions_file(&cfg.species[0]);
        assert!(path.ends_with("RBC.pos"));
    }

    #[test]
    fn config_round_trips_through_toml() {
        let cfg = EngineConfig::from_toml_str(MINIMAL).unwrap();
        let text = cfg.to_toml_string().unwrap();
        let again = EngineConfig::from_toml_str(&text).unwrap();
        assert_eq!(again.species[0].mesh, cfg.species[0].mesh);
    }
}
