use crate::error::ConfigError;
use crate::mesh::ReferenceMesh;
use hemo_common::{EngineConfig, MechanicsVariant, SpeciesConfig};
use log::{info, warn};
use std::path::PathBuf;

/// Static per-species metadata, produced once at configuration time.
#[derive(Debug, Clone)]
pub struct CellTypeDescriptor {
    pub name: String,
    pub reference_mesh: ReferenceMesh,
    pub mechanics_variant: MechanicsVariant,
    /// Exclusion distance from solid boundaries (µm), frozen once particles are loaded
    minimum_distance_from_solid_um: f64,
    /// Iterations between constitutive force evaluations
    pub sub_step_rate: u32,
    pub link_stiffness: f64,
    /// Placement file, `<name>.pos` unless configured otherwise
    pub positions_file: PathBuf,
}

impl CellTypeDescriptor {
    pub fn new(name: impl Into<String>, reference_mesh: ReferenceMesh, mechanics_variant: MechanicsVariant) -> Self {
        let name = name.into();
        CellTypeDescriptor {
            positions_file: PathBuf::from(format!("{}.pos", name)),
            name,
            reference_mesh,
            mechanics_variant,
            minimum_distance_from_solid_um: 0.0,
            sub_step_rate: 1,
            link_stiffness: 0.01,
        }
    }

    pub fn from_config(config: &EngineConfig, species: &SpeciesConfig) -> Self {
        CellTypeDescriptor {
            positions_file: config.positions_file(species),
            name: species.name.clone(),
            reference_mesh: ReferenceMesh::from_config(&species.mesh),
            mechanics_variant: species.mechanics,
            minimum_distance_from_solid_um: species.minimum_distance_from_solid_um,
            sub_step_rate: species.sub_step_rate,
            link_stiffness: species.link_stiffness,
        }
    }

    pub fn with_minimum_distance_from_solid(mut self, distance_um: f64) -> Self {
        self.minimum_distance_from_solid_um = distance_um;
        self
    }

    pub fn with_positions_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.positions_file = path.into();
        self
    }

    pub fn with_sub_step_rate(mut self, rate: u32) -> Self {
        self.sub_step_rate = rate;
        self
    }

    pub fn vertex_count(&self) -> usize {
        self.reference_mesh.vertex_count()
    }

    pub fn minimum_distance_from_solid_um(&self) -> f64 {
        self.minimum_distance_from_solid_um
    }

    pub fn is_special_seeded(&self) -> bool {
        self.mechanics_variant == MechanicsVariant::SpecialSeeded
    }
}

/// Ordered species registry; the species id is the declaration index.
#[derive(Debug, Clone, Default)]
pub struct CellTypes {
    types: Vec<CellTypeDescriptor>,
}

impl CellTypes {
    pub fn new(types: Vec<CellTypeDescriptor>) -> Self {
        CellTypes { types }
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        let types = config
            .species
            .iter()
            .map(|s| CellTypeDescriptor::from_config(config, s))
            .collect::<Vec<_>>();
        for t in &types {
            info!(
                "Species '{}': {} vertices, {:?} mechanics, volume {:.2} um^3",
                t.name, t.vertex_count(), t.mechanics_variant, t.reference_mesh.volume()
            );
        }
        CellTypes { types }
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn get(&self, species: usize) -> Option<&CellTypeDescriptor> {
        self.types.get(species)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CellTypeDescriptor> {
        self.types.iter()
    }

    pub fn index_of(&self, name: &str) -> Result<usize, ConfigError> {
        self.types
            .iter()
            .position(|t| t.name == name)
            .ok_or_else(|| ConfigError::UnknownSpecies(name.to_string()))
    }

    pub fn by_name_mut(&mut self, name: &str) -> Result<&mut CellTypeDescriptor, ConfigError> {
        let idx = self.index_of(name)?;
        Ok(&mut self.types[idx])
    }

    pub fn by_name(&self, name: &str) -> Result<&CellTypeDescriptor, ConfigError> {
        let idx = self.index_of(name)?;
        Ok(&self.types[idx])
    }

    pub fn vertex_counts(&self) -> Vec<usize> {
        self.types.iter().map(|t| t.vertex_count()).collect()
    }

    /// Sets the deny-layer distance of a species. Once particles have been seeded the
    /// value no longer has any effect, so the call is ignored with a warning.
    pub fn set_minimum_distance_from_solid(
        &mut self,
        name: &str,
        distance_um: f64,
        particles_loaded: bool,
    ) -> Result<(), ConfigError> {
        info!("Setting minimum distance from solid to {} um for {}", distance_um, name);
        let cell_type = self.by_name_mut(name)?;
        if particles_loaded {
            warn!(
                "Minimum distance from solid of '{}' changed after particles were loaded; ignoring.",
                name
            );
            return Ok(());
        }
        cell_type.minimum_distance_from_solid_um = distance_um;
        Ok(())
    }
}
