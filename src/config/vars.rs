//! Environment variable interpolation for config files.
//!
//! Supports:
//! - `${VAR}` - substitute with the variable's value, error if unset
//! - `${VAR:-default}` - use default if VAR is unset or empty
//! - `$$` - escape sequence for a literal `$`

use regex::{Captures, Regex};
use std::sync::LazyLock;

use crate::error::{ConfigError, EnvInterpolationSnafu};

static ENV_VAR_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        \$\$                           # escaped dollar
        |
        \$\{
            ([A-Za-z_][A-Za-z0-9_]*)   # variable name
            (?: :- ([^}]*) )?          # optional default
        \}
        ",
    )
    .expect("Invalid regex pattern")
});

/// Interpolate process environment variables into `input`.
pub fn interpolate(input: &str) -> Result<String, ConfigError> {
    interpolate_with(input, |name| std::env::var(name).ok())
}

/// Interpolate variables resolved by `lookup` into `input`.
///
/// Every unresolved variable is reported at once.
pub fn interpolate_with<F>(input: &str, lookup: F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut missing = Vec::new();

    let text = ENV_VAR_PATTERN.replace_all(input, |caps: &Captures| {
        let Some(name) = caps.get(1).map(|m| m.as_str()) else {
            return "$".to_string();
        };

        let value = lookup(name);
        match (value, caps.get(2)) {
            (Some(v), Some(default)) if v.is_empty() => default.as_str().to_string(),
            (Some(v), _) => v,
            (None, Some(default)) => default.as_str().to_string(),
            (None, None) => {
                missing.push(format!("environment variable '{name}' is not set"));
                String::new()
            }
        }
    });

    if missing.is_empty() {
        Ok(text.into_owned())
    } else {
        EnvInterpolationSnafu {
            message: missing.join("\n"),
        }
        .fail()
    }
}
