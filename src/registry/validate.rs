//! Per-slot configuration checks
//!
//! The registry runs its validator before asking the connector for a handle.
//! A rejected slot is recorded as a configuration error and nothing is
//! constructed for it.

use super::slots::{Requirement, SlotDef, SlotKind};
use crate::config::{validate_project_id, ClientOption, Config};
use url::Url;

/// Decides whether a configuration is usable for one slot
pub trait ConfigValidator: Send + Sync {
    /// `Err` carries a human-readable reason
    fn validate(&self, slot: &SlotDef, config: &Config) -> Result<(), String>;
}

/// Checks required fields and their formats
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultValidator;

impl ConfigValidator for DefaultValidator {
    fn validate(&self, slot: &SlotDef, config: &Config) -> Result<(), String> {
        let options = config.options_for(&slot.name);

        for requirement in &slot.requires {
            match requirement {
                Requirement::ProjectId => {
                    if config.project_id.is_empty() {
                        return Err("project id is required".to_string());
                    }
                    if !validate_project_id(&config.project_id) {
                        return Err(format!("invalid project id '{}'", config.project_id));
                    }
                }
                Requirement::Scopes => {
                    // scopes only matter when a token is minted from credentials
                    let needs_scopes = !options.iter().any(|o| {
                        matches!(
                            o,
                            ClientOption::AccessToken(_) | ClientOption::WithoutAuthentication
                        )
                    });
                    if needs_scopes && config.scopes.is_empty() {
                        return Err("at least one scope is required".to_string());
                    }
                }
                Requirement::SpannerDatabase => {
                    let database = config
                        .spanner_database
                        .as_deref()
                        .filter(|d| !d.is_empty())
                        .ok_or_else(|| "spanner database is required".to_string())?;
                    validate_database_path(database)?;
                }
            }
        }

        if slot.requires(Requirement::Scopes) {
            for scope in &config.scopes {
                Url::parse(scope).map_err(|_| format!("invalid scope '{}'", scope))?;
            }
        }

        match slot.kind {
            SlotKind::Rest => check_rest_options(&options)?,
            SlotKind::Kubernetes => {
                if let Some(master) = &config.cluster.master_url {
                    Url::parse(master)
                        .map_err(|_| format!("invalid cluster master url '{}'", master))?;
                }
            }
        }

        if config.slot_timeout_ms == Some(0) {
            return Err("slot timeout must be positive".to_string());
        }

        Ok(())
    }
}

/// Client options only REST handles read
fn check_rest_options(options: &[&ClientOption]) -> Result<(), String> {
    for option in options {
        match option {
            ClientOption::Endpoint(endpoint) => {
                Url::parse(endpoint).map_err(|_| format!("invalid endpoint '{}'", endpoint))?;
            }
            ClientOption::AccessToken(token) if token.is_empty() => {
                return Err("access token is empty".to_string());
            }
            ClientOption::RequestTimeoutSecs(0) => {
                return Err("request timeout must be positive".to_string());
            }
            _ => {}
        }
    }
    Ok(())
}

/// Accepts anything; useful when the caller has already validated
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopValidator;

impl ConfigValidator for NoopValidator {
    fn validate(&self, _slot: &SlotDef, _config: &Config) -> Result<(), String> {
        Ok(())
    }
}

/// `projects/<p>/instances/<i>/databases/<d>`
fn validate_database_path(path: &str) -> Result<(), String> {
    let parts: Vec<&str> = path.split('/').collect();
    let well_formed = parts.len() == 6
        && parts[0] == "projects"
        && parts[2] == "instances"
        && parts[4] == "databases"
        && [parts[1], parts[3], parts[5]].iter().all(|p| !p.is_empty());

    if well_formed {
        Ok(())
    } else {
        Err(format!(
            "spanner database '{}' must look like projects/<p>/instances/<i>/databases/<d>",
            path
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::slots::get_slot;

    fn check(slot: &str, config: &Config) -> Result<(), String> {
        DefaultValidator.validate(get_slot(slot).unwrap(), config)
    }

    #[test]
    fn test_missing_project_rejected_for_project_slots() {
        let config = Config::default();
        assert_eq!(check("firestore", &config).unwrap_err(), "project id is required");
    }

    #[test]
    fn test_invalid_project_format() {
        let config = Config::for_project("Bad_Project");
        assert!(check("message-queue", &config).unwrap_err().contains("invalid project id"));
    }

    #[test]
    fn test_scopes_not_needed_with_access_token() {
        let config = Config::default().with_option(ClientOption::AccessToken("t".into()));
        assert!(check("translate", &config).is_ok());

        let config = Config::default();
        assert!(check("translate", &config).unwrap_err().contains("scope"));
    }

    #[test]
    fn test_spanner_database_shape() {
        let config = Config::for_project("my-project-123");
        assert!(check("spanner", &config).unwrap_err().contains("required"));

        let config = config.clone().with_spanner_database("my-db");
        assert!(check("spanner", &config).unwrap_err().contains("must look like"));

        let config = config.with_spanner_database("projects/p/instances/i/databases/d");
        assert!(check("spanner", &config).is_ok());
    }

    #[test]
    fn test_kubernetes_needs_nothing() {
        assert!(check("kubernetes", &Config::default()).is_ok());
    }

    #[test]
    fn test_bad_endpoint_override() {
        let config = Config::for_project("my-project-123")
            .with_slot_option("iam", ClientOption::Endpoint("::nope".into()));
        assert!(check("iam", &config).unwrap_err().contains("invalid endpoint"));
        assert!(check("speech", &config).is_ok());
    }

    #[test]
    fn test_bad_scope_only_fails_scoped_slots() {
        let mut config = Config::for_project("my-project-123");
        config.scopes.push("not a url".to_string());
        assert!(check("translate", &config).unwrap_err().contains("invalid scope"));
        assert!(check("kubernetes", &config).is_ok());
    }

    #[test]
    fn test_rest_options_ignored_for_kubernetes() {
        let config = Config::default()
            .with_option(ClientOption::Endpoint("::nope".into()))
            .with_option(ClientOption::AccessToken(String::new()))
            .with_option(ClientOption::RequestTimeoutSecs(0));
        assert!(check("kubernetes", &config).is_ok());
        assert!(check("speech", &config).is_err());
    }

    #[test]
    fn test_zero_slot_timeout_rejected() {
        let mut config = Config::for_project("my-project-123");
        config.slot_timeout_ms = Some(0);
        assert!(check("iam", &config).unwrap_err().contains("slot timeout"));
    }

    #[test]
    fn test_noop_validator() {
        let slot = get_slot("firestore").unwrap();
        assert!(NoopValidator.validate(slot, &Config::default()).is_ok());
    }
}
