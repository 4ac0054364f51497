use anyhow::{Context, Result};
use hemo_common::EngineConfig;
use log::info;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};

const CHECKPOINT_VERSION: u32 = 1;

/// On-disk checkpoint document.
#[derive(Debug, Serialize, Deserialize)]
struct CheckpointDocument<S> {
    version: u32,
    iter: u64,
    /// The run configuration, as TOML text
    config: String,
    state: S,
}

/// Saves and restores checkpoints under `<output>/checkpoint/`.
///
/// The previous checkpoint is kept as `checkpoint.bin.old` so an interrupted save never
/// leaves the run without a readable checkpoint.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(output_dir: &Path) -> Self {
        CheckpointStore { dir: output_dir.join("checkpoint") }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.join("checkpoint.bin")
    }

    pub fn exists(&self) -> bool {
        self.path().exists()
    }

    pub fn save<S: Serialize>(&self, iter: u64, config: &EngineConfig, state: &S) -> Result<()> {
        fs::create_dir_all(&self.dir)
            .with_context(|| format!("Failed to create checkpoint folder '{}'", self.dir.display()))?;
        let path = self.path();
        if path.exists() {
            fs::rename(&path, self.dir.join("checkpoint.bin.old"))
                .context("Failed to rotate previous checkpoint")?;
        }

        let config_text = config.to_toml_string()?;
        let doc = CheckpointDocument { version: CHECKPOINT_VERSION, iter, config: config_text.clone(), state };
        let writer = BufWriter::new(File::create(&path).with_context(|| format!("Error creating '{}'", path.display()))?);
        bincode::serialize_into(writer, &doc).context("Error serializing checkpoint")?;
        fs::write(self.dir.join("checkpoint.toml"), config_text).context("Error writing checkpoint config copy")?;

        info!("Saved checkpoint at iteration {} to {}", iter, path.display());
        Ok(())
    }

    /// Returns the saved iteration, configuration and state.
    pub fn load<S: DeserializeOwned>(&self) -> Result<(u64, EngineConfig, S)> {
        let path = self.path();
        let reader = BufReader::new(File::open(&path).with_context(|| format!("Cannot open checkpoint '{}'", path.display()))?);
        let doc: CheckpointDocument<S> = bincode::deserialize_from(reader).context("Error deserializing checkpoint")?;
        if doc.version != CHECKPOINT_VERSION {
            anyhow::bail!("Checkpoint version {} is not supported (expected {}).", doc.version, CHECKPOINT_VERSION);
        }
        let config = EngineConfig::from_toml_str(&doc.config)?;
        info!("Loaded checkpoint of iteration {} from {}", doc.iter, path.display());
        Ok((doc.iter, config, doc.state))
    }
}
