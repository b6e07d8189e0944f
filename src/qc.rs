use std::path::Path;

use crate::error::{MetaxcanError, Result};

pub fn check_range_f64(value: f64, min: f64, max: f64, name: &str) -> Result<()> {
    if !value.is_finite() {
        return Err(MetaxcanError::Configuration(format!(
            "Value of {name} should be finite"
        )));
    }
    if value < min {
        return Err(MetaxcanError::Configuration(format!(
            "Value of {name} should be at least {min}"
        )));
    }
    if value > max {
        return Err(MetaxcanError::Configuration(format!(
            "Value of {name} should be at most {max}"
        )));
    }
    Ok(())
}

pub fn check_file_exists(path: &Path, name: &str) -> Result<()> {
    if !path.exists() {
        return Err(MetaxcanError::Configuration(format!(
            "File {path:?} passed to {name} does not exist"
        )));
    }
    Ok(())
}

pub fn check_non_empty<T>(values: &[T], name: &str) -> Result<()> {
    if values.is_empty() {
        return Err(MetaxcanError::Configuration(format!(
            "At least one {name} must be provided"
        )));
    }
    Ok(())
}
