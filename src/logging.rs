use std::fs::File;
use std::io::Write;

use anyhow::Result;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

pub fn init_tracing(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

pub fn open_log(log_name: Option<&str>) -> Result<Option<File>> {
    match log_name {
        Some(name) => Ok(Some(File::create(format!("{name}.log"))?)),
        None => Ok(None),
    }
}

pub fn log_line(log: &mut Option<File>, message: &str) -> Result<()> {
    info!("{message}");
    if let Some(file) = log.as_mut() {
        writeln!(file, "{message}")?;
    }
    Ok(())
}

pub fn warn_line(log: &mut Option<File>, message: &str) -> Result<()> {
    warn!("{message}");
    if let Some(file) = log.as_mut() {
        writeln!(file, "{message}")?;
    }
    Ok(())
}
