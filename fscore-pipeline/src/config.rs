//! Configuration resolution for fscore-pipeline
//!
//! Credentials resolve with ENV → TOML priority, one field at a time, so an
//! operator can keep the account in the TOML file and pass only the password
//! through the environment.

use crate::session::Credentials;
use crate::utils::RetryPolicy;
use fscore_common::config::{PipelineSettings, TomlConfig};
use fscore_common::{Error, Result};
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable overriding `[credentials] email`
pub const EMAIL_ENV: &str = "FSCORE_EMAIL";

/// Environment variable overriding `[credentials] password`
pub const PASSWORD_ENV: &str = "FSCORE_PASSWORD";

/// Resolve scoring service credentials
///
/// **Priority:** ENV → TOML
pub fn resolve_credentials(toml_config: &TomlConfig) -> Result<Credentials> {
    let email = resolve_field(
        "email",
        EMAIL_ENV,
        toml_config.credentials.email.as_deref(),
    );
    let password = resolve_field(
        "password",
        PASSWORD_ENV,
        toml_config.credentials.password.as_deref(),
    );

    match (email, password) {
        (Some(email), Some(password)) => Ok(Credentials::new(email, password)),
        (email, password) => {
            let mut missing = Vec::new();
            if email.is_none() {
                missing.push("email");
            }
            if password.is_none() {
                missing.push("password");
            }
            Err(Error::Config(format!(
                "Scoring service {} not configured. Please configure using one of:\n\
                 1. Environment: {}=... {}=...\n\
                 2. TOML config: [credentials] email = \"...\", password = \"...\"",
                missing.join(" and "),
                EMAIL_ENV,
                PASSWORD_ENV
            )))
        }
    }
}

fn resolve_field(field: &str, env_var: &str, toml_value: Option<&str>) -> Option<String> {
    let env_value = std::env::var(env_var).ok().filter(|v| is_valid_value(v));
    let toml_value = toml_value.filter(|v| is_valid_value(v));

    if env_value.is_some() && toml_value.is_some() {
        warn!(
            field,
            "Credential found in environment and TOML config. Using environment (highest priority)."
        );
    }

    if let Some(value) = env_value {
        info!(field, "Credential loaded from environment variable");
        return Some(value);
    }

    toml_value.map(|value| {
        info!(field, "Credential loaded from TOML config");
        value.to_string()
    })
}

/// Non-empty, non-whitespace
pub fn is_valid_value(value: &str) -> bool {
    !value.trim().is_empty()
}

/// Login retry policy from the `[pipeline]` section
pub fn retry_policy(settings: &PipelineSettings) -> RetryPolicy {
    RetryPolicy::new(
        settings.max_login_attempts,
        Duration::from_secs(settings.login_retry_delay_secs),
    )
}

/// Store credentials in the TOML file, keeping every other setting
pub fn sync_credentials_to_toml(credentials: &Credentials, toml_path: &Path) -> Result<()> {
    let mut config = fscore_common::config::load_toml_config(Some(toml_path))?;
    config.credentials.email = Some(credentials.email.clone());
    config.credentials.password = Some(credentials.password.clone());

    fscore_common::config::write_toml_config(&config, toml_path)?;
    info!(path = %toml_path.display(), "Credentials written to TOML config");
    Ok(())
}
