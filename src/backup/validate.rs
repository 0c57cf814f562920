//! Validation functions for configuration values.

use sanitize_filename::{is_sanitized, sanitize};
use validator::ValidationError;

/// The level name becomes a single path component under `worlds/`, so it must
/// be a plain, non-empty file name.
pub fn validate_level_name<S: AsRef<str>>(name: S) -> Result<(), ValidationError> {
    let name = name.as_ref();
    if name.trim().is_empty() {
        return Err(ValidationError::new("InvalidLevelName")
            .with_message("Level name must not be empty".into()));
    }

    if !is_sanitized(name) {
        return Err(ValidationError::new("InvalidLevelName").with_message(
            format!(
                "Invalid level name {:?}, try sanitizing like {:?}",
                name,
                sanitize(name)
            )
            .into(),
        ));
    }

    Ok(())
}
