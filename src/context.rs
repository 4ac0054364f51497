use hemo_common::{EngineConfig, SimParams, resolve_directory};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Run-wide settings passed explicitly to the orchestrator and the seeding components.
///
/// The cancellation flag is the only state shared with asynchronous code (the signal
/// handler); it is a lock-free atomic checked once per iteration.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub verbose: u8,
    /// Rank of this worker. Only rank 0 exists in-process, it is also the primary.
    pub rank: usize,
    pub params: SimParams,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub log_dir: PathBuf,
    pub log_file: String,
    cancel: Arc<AtomicBool>,
}

impl RunContext {
    pub fn from_config(config: &EngineConfig) -> Self {
        RunContext {
            verbose: config.verbose,
            rank: 0,
            params: config.get_sim_params(),
            input_dir: resolve_directory(&config.output.input_directory),
            output_dir: resolve_directory(&config.output.output_directory),
            log_dir: resolve_directory(&config.output.log_directory),
            log_file: config.output.log_file.clone(),
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// The rank that creates shared output folders and owns the logfile.
    pub fn is_primary(&self) -> bool {
        self.rank == 0
    }

    /// Handle for the signal path; setting it requests a graceful stop.
    pub fn cancellation_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    pub fn request_cancel(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }
}
