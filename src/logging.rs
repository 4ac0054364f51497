use crate::context::RunContext;
use anyhow::{Context, Result};
use log::LevelFilter;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Copies every log record to stderr and to the run logfile.
struct TeeWriter {
    file: File,
}

impl Write for TeeWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        io::stderr().write_all(buf)?;
        self.file.write_all(buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stderr().flush()?;
        self.file.flush()
    }
}

/// Default level for a verbosity setting; `RUST_LOG` still takes precedence.
pub fn level_for_verbosity(verbose: u8) -> LevelFilter {
    match verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    }
}

/// First free logfile name: `name`, then `name.0`, `name.1`, ...
pub fn free_logfile_path(dir: &Path, name: &str) -> PathBuf {
    let candidate = dir.join(name);
    if !candidate.exists() {
        return candidate;
    }
    (0u32..)
        .map(|n| dir.join(format!("{}.{}", name, n)))
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}

/// Opens the logfile (primary rank only) and installs the global logger.
///
/// Returns the logfile path. Errors here are fatal for the run.
pub fn init_logging(ctx: &RunContext) -> Result<Option<PathBuf>> {
    let mut builder = env_logger::Builder::new();
    builder.filter_level(level_for_verbosity(ctx.verbose)).parse_default_env();

    let logfile = if ctx.is_primary() {
        fs::create_dir_all(&ctx.log_dir)
            .with_context(|| format!("Cannot create log directory '{}'", ctx.log_dir.display()))?;
        let path = free_logfile_path(&ctx.log_dir, &ctx.log_file);
        let file = OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&path)
            .with_context(|| format!("Cannot open logfile '{}'", path.display()))?;
        builder.target(env_logger::Target::Pipe(Box::new(TeeWriter { file })));
        Some(path)
    } else {
        None
    };

    builder.try_init().context("Logger was already initialised")?;
    Ok(logfile)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn existing_logfiles_are_not_overwritten() {
        let dir = std::env::temp_dir().join(format!("hemo-logging-unit-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        assert_eq!(free_logfile_path(&dir, "logfile"), dir.join("logfile"));
        File::create(dir.join("logfile")).unwrap();
        assert_eq!(free_logfile_path(&dir, "logfile"), dir.join("logfile.0"));
        File::create(dir.join("logfile.0")).unwrap();
        assert_eq!(free_logfile_path(&dir, "logfile"), dir.join("logfile.1"));
        fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn verbosity_maps_to_levels() {
        assert_eq!(level_for_verbosity(0), LevelFilter::Info);
        assert_eq!(level_for_verbosity(1), LevelFilter::Debug);
        assert_eq!(level_for_verbosity(5), LevelFilter::Trace);
    }
}
