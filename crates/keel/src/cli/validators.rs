//! CLI input validation functions.
//!
//! These validators are used by clap's `value_parser` attribute to validate
//! user input at parse time, providing immediate feedback for invalid values.

/// Validate issue ID prefix format.
///
/// Delegates to `commands::init::validate_prefix` so `init` and the CLI
/// agree on the rules.
pub fn validate_prefix(s: &str) -> Result<String, String> {
    use crate::commands::init;

    let trimmed = s.trim();
    init::validate_prefix(trimmed).map_err(|e| e.to_string())?;
    Ok(trimmed.to_string())
}

/// Validate a label name: non-empty, no whitespace or commas.
pub fn validate_label(s: &str) -> Result<String, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("Label cannot be empty".to_string());
    }
    if s.chars().any(|c| c.is_whitespace() || c == ',') {
        return Err(format!("Label '{s}' cannot contain whitespace or commas"));
    }
    Ok(s.to_string())
}

/// Validate a positive day count.
pub fn validate_days(s: &str) -> Result<i64, String> {
    let days: i64 = s
        .trim()
        .parse()
        .map_err(|_| format!("'{s}' is not a whole number of days"))?;
    if days <= 0 {
        return Err("Day count must be positive".to_string());
    }
    Ok(days)
}
