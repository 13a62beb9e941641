// ABOUTME: Configuration and environment variable management for Codenest
// ABOUTME: Typed readers that fall back to defaults when a variable is unset or out of range

pub mod constants;
pub mod defaults;

use std::str::FromStr;
use tracing::warn;

/// Read a string variable, treating empty values as unset.
pub fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Read a string variable or fall back to `default`.
pub fn env_string_or(name: &str, default: &str) -> String {
    env_string(name).unwrap_or_else(|| default.to_string())
}

/// Parse a variable and keep it only if `valid` accepts it.
///
/// Unparseable or rejected values are logged and replaced by `default`.
pub fn env_parse_or<T, F>(name: &str, default: T, valid: F) -> T
where
    T: FromStr + Copy + std::fmt::Debug,
    F: Fn(&T) -> bool,
{
    let Some(raw) = env_string(name) else {
        return default;
    };

    match raw.parse::<T>() {
        Ok(value) if valid(&value) => value,
        Ok(value) => {
            warn!(
                "{} value {:?} is out of range, using default {:?}",
                name, value, default
            );
            default
        }
        Err(_) => {
            warn!(
                "{} value '{}' is not valid, using default {:?}",
                name, raw, default
            );
            default
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    #[test]
    fn test_env_parse_or_uses_default_when_unset() {
        env::remove_var("CODENEST_TEST_UNSET_VALUE");
        assert_eq!(env_parse_or("CODENEST_TEST_UNSET_VALUE", 42u64, |_| true), 42);
    }

    #[test]
    fn test_env_parse_or_reads_valid_value() {
        env::set_var("CODENEST_TEST_VALID_VALUE", "90");
        assert_eq!(env_parse_or("CODENEST_TEST_VALID_VALUE", 42u64, |v| *v > 0), 90);
        env::remove_var("CODENEST_TEST_VALID_VALUE");
    }

    #[test]
    fn test_env_parse_or_rejects_out_of_range() {
        env::set_var("CODENEST_TEST_RANGE_VALUE", "0");
        assert_eq!(env_parse_or("CODENEST_TEST_RANGE_VALUE", 42u64, |v| *v > 0), 42);
        env::remove_var("CODENEST_TEST_RANGE_VALUE");
    }

    #[test]
    fn test_env_parse_or_rejects_garbage() {
        env::set_var("CODENEST_TEST_GARBAGE_VALUE", "soon");
        assert_eq!(env_parse_or("CODENEST_TEST_GARBAGE_VALUE", 42u64, |_| true), 42);
        env::remove_var("CODENEST_TEST_GARBAGE_VALUE");
    }

    #[test]
    fn test_env_string_treats_blank_as_unset() {
        env::set_var("CODENEST_TEST_BLANK_VALUE", "   ");
        assert_eq!(env_string("CODENEST_TEST_BLANK_VALUE"), None);
        assert_eq!(
            env_string_or("CODENEST_TEST_BLANK_VALUE", "fallback"),
            "fallback"
        );
        env::remove_var("CODENEST_TEST_BLANK_VALUE");
    }
}
