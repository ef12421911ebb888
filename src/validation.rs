//! Spawn request validation.

use crate::types::{Error, Result};

/// Validate that a string is not empty.
pub fn validate_non_empty(s: &str, field: &str) -> Result<()> {
    if s.is_empty() {
        return Err(Error::config(format!("{} cannot be empty", field)));
    }
    Ok(())
}

/// Validate that a priority is a finite number.
pub fn validate_priority(p: f64, field: &str) -> Result<()> {
    if !p.is_finite() {
        return Err(Error::config(format!("{} must be finite, got {}", field, p)));
    }
    Ok(())
}
