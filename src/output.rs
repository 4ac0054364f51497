use anyhow::{Context, Result};
use hemo_common::Snapshot;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::path::{Path, PathBuf};

/// Width of the iteration number in output folder names.
const ITERATION_PAD_WIDTH: usize = 12;

/// Fixed-width zero-padded iteration number, used for per-iteration folders.
pub fn zero_pad_number(iter: u64) -> String {
    format!("{:0width$}", iter, width = ITERATION_PAD_WIDTH)
}

/// One row of `CellInfo.csv`: per-cell summary of the owned particles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellInfo {
    pub cell_id: u32,
    pub species: String,
    pub vertices: usize,
    pub complete: bool,
    /// Centre of the cell in µm
    pub x_um: f64,
    pub y_um: f64,
    pub z_um: f64,
    /// Mean vertex velocity in lattice units
    pub vx_lu: f64,
    pub vy_lu: f64,
    pub vz_lu: f64,
    /// Magnitude of the summed vertex forces in lattice units
    pub force_lu: f64,
}

/// Folders of one output iteration.
#[derive(Debug, Clone)]
pub struct OutputFolders {
    pub csv: PathBuf,
    pub json: PathBuf,
}

impl OutputFolders {
    pub fn for_iteration(output_dir: &Path, iter: u64) -> Self {
        let padded = zero_pad_number(iter);
        OutputFolders { csv: output_dir.join("csv").join(&padded), json: output_dir.join("json").join(&padded) }
    }

    /// Creates the folders. Only the primary rank calls this.
    pub fn create(&self) -> Result<()> {
        for dir in [&self.csv, &self.json] {
            fs::create_dir_all(dir).with_context(|| format!("Failed to create output folder '{}'", dir.display()))?;
        }
        Ok(())
    }
}

/// Destination of the per-iteration output, called by the orchestrator once the
/// observable state has been prepared.
pub trait OutputSink {
    fn write(&mut self, folders: &OutputFolders, snapshot: &Snapshot, cells: &[CellInfo]) -> Result<()>;
}

/// Writes `snapshot.json` and `CellInfo.csv` into the iteration folders.
#[derive(Debug, Default)]
pub struct FileOutput;

impl OutputSink for FileOutput {
    fn write(&mut self, folders: &OutputFolders, snapshot: &Snapshot, cells: &[CellInfo]) -> Result<()> {
        let json_path = folders.json.join("snapshot.json");
        let file = File::create(&json_path).with_context(|| format!("Error creating '{}'", json_path.display()))?;
        serde_json::to_writer_pretty(file, snapshot)
            .with_context(|| format!("Error serializing snapshot to '{}'", json_path.display()))?;

        let csv_path = folders.csv.join("CellInfo.csv");
        let mut writer = csv::Writer::from_path(&csv_path)
            .with_context(|| format!("Error creating '{}'", csv_path.display()))?;
        for cell in cells {
            writer.serialize(cell)?;
        }
        writer.flush()?;

        debug!("Wrote {} cell rows to {}", cells.len(), csv_path.display());
        info!(
            "Output iteration {}: {} particles in {} cells.",
            snapshot.iteration, snapshot.total_particle_count, cells.len()
        );
        Ok(())
    }
}
