use std::str::FromStr;

use crate::error::ConfigError;

/// Read an environment variable, treating unset and blank values as absent.
pub(crate) fn optional_env(key: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(key) {
        Ok(value) if value.trim().is_empty() => Ok(None),
        Ok(value) => Ok(Some(value.trim().to_string())),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: "value is not valid UTF-8".to_string(),
        }),
    }
}

pub(crate) fn required_env(key: &str, hint: &str) -> Result<String, ConfigError> {
    optional_env(key)?.ok_or_else(|| ConfigError::MissingRequired {
        key: key.to_string(),
        hint: hint.to_string(),
    })
}

/// Parse a numeric environment variable, falling back to `default` when unset.
pub(crate) fn parse_env_or<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional_env(key)? {
        Some(raw) => parse_value(key, &raw),
        None => Ok(default),
    }
}

pub(crate) fn parse_value<T>(key: &str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("'{}': {}", raw.trim(), e),
        })
}

#[cfg(test)]
mod tests {
    use crate::error::ConfigError;

    #[test]
    fn parse_value_trims_and_parses() {
        let parsed: u64 = super::parse_value("DATABASE_POOL_SIZE", " 16 ").expect("number");
        assert_eq!(parsed, 16);
    }

    #[test]
    fn parse_value_reports_key_and_raw_input() {
        let err = super::parse_value::<u64>("DATABASE_POOL_SIZE", "lots")
            .expect_err("non-numeric must be rejected");
        let ConfigError::InvalidValue { key, message } = err else {
            panic!("expected InvalidValue");
        };
        assert_eq!(key, "DATABASE_POOL_SIZE");
        assert!(message.contains("'lots'"), "unexpected message: {message}");
    }

    #[test]
    fn unset_variable_falls_back_to_default() {
        let value: u64 =
            super::parse_env_or("TASKSTORE_TEST_SURELY_UNSET_VARIABLE", 7).expect("default");
        assert_eq!(value, 7);
    }
}
