use anyhow::Result;
use regex::Regex;
use std::env;
use tracing::{debug, warn};

const ENV_VAR_PATTERN: &str = r"\$\{(\w+)\}";

/// Substitute environment variables written as ${VAR_NAME}.
///
/// Unset variables keep their placeholder so validation can report them.
pub fn substitute_env_vars(content: &str) -> Result<String> {
    let re = Regex::new(ENV_VAR_PATTERN)?;
    let mut missing_vars = Vec::new();

    let result = re.replace_all(content, |caps: &regex::Captures| {
        let placeholder = &caps[0];
        let var_name = &caps[1];
        match env::var(var_name) {
            Ok(value) => {
                debug!("Substituting environment variable: {}", var_name);
                value
            }
            Err(_) => {
                warn!("Environment variable '{}' not set", var_name);
                missing_vars.push(var_name.to_string());
                placeholder.to_string()
            }
        }
    });

    if !missing_vars.is_empty() {
        debug!(
            "Environment variables not set (may fail validation): {:?}",
            missing_vars
        );
    }

    Ok(result.into_owned())
}

/// Check if a string still contains an unresolved ${VAR} placeholder
pub fn has_unresolved_env_vars(content: &str) -> bool {
    Regex::new(ENV_VAR_PATTERN)
        .map(|re| re.is_match(content))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_var_keeps_placeholder() {
        let out = substitute_env_vars("key: ${ORACLE_SURELY_UNSET_VAR}").unwrap();
        assert_eq!(out, "key: ${ORACLE_SURELY_UNSET_VAR}");
        assert!(has_unresolved_env_vars(&out));
    }

    #[test]
    fn test_set_var_is_replaced() {
        env::set_var("ORACLE_SUBST_TEST", "42");
        let out = substitute_env_vars("a: ${ORACLE_SUBST_TEST}, b: ${ORACLE_SUBST_TEST}").unwrap();
        assert_eq!(out, "a: 42, b: 42");
        assert!(!has_unresolved_env_vars(&out));
    }
}
