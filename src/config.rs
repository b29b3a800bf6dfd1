//! Configuration
//!
//! Explicit, immutable configuration for a registry build. Nothing here reads
//! process environment variables; every input is a field supplied by the
//! caller, either in code or from a JSON file.

use crate::registry::slots::SlotGroup;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default scopes for GCP API access
pub const DEFAULT_SCOPES: &[&str] = &["https://www.googleapis.com/auth/cloud-platform"];

/// Default in-cluster service account mount
pub const DEFAULT_SERVICE_ACCOUNT_DIR: &str = "/var/run/secrets/kubernetes.io/serviceaccount";

/// Transport and credential options, applied in order (later options win)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientOption {
    /// Service account key file
    CredentialsFile(PathBuf),
    /// Pre-issued OAuth2 access token
    AccessToken(String),
    /// Send requests without an Authorization header
    WithoutAuthentication,
    /// Replace the slot's base endpoint
    Endpoint(String),
    UserAgent(String),
    RequestTimeoutSecs(u64),
}

/// How the Kubernetes slot locates its API server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClusterMode {
    /// Read a kubeconfig file (default)
    #[default]
    Kubeconfig,
    /// Use the pod's mounted service account
    InCluster,
}

/// Kubernetes slot parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default)]
    pub mode: ClusterMode,
    /// Overrides the API server from kubeconfig or in-cluster default
    #[serde(default)]
    pub master_url: Option<String>,
    /// Kubeconfig path; `~/.kube/config` when unset
    #[serde(default)]
    pub kubeconfig: Option<PathBuf>,
    #[serde(default = "default_service_account_dir")]
    pub service_account_dir: PathBuf,
}

fn default_service_account_dir() -> PathBuf {
    PathBuf::from(DEFAULT_SERVICE_ACCOUNT_DIR)
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            mode: ClusterMode::default(),
            master_url: None,
            kubeconfig: None,
            service_account_dir: default_service_account_dir(),
        }
    }
}

impl ClusterConfig {
    /// Kubeconfig path to read in `Kubeconfig` mode
    pub fn kubeconfig_path(&self) -> Option<PathBuf> {
        self.kubeconfig
            .clone()
            .or_else(|| dirs::home_dir().map(|home| home.join(".kube").join("config")))
    }
}

/// Which slots a build attempts
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotSelection {
    #[default]
    All,
    Group(SlotGroup),
    Only(BTreeSet<String>),
}

impl SlotSelection {
    pub fn includes(&self, slot: &str, group: SlotGroup) -> bool {
        match self {
            SlotSelection::All => true,
            SlotSelection::Group(g) => *g == group,
            SlotSelection::Only(names) => names.contains(slot),
        }
    }
}

/// Registry configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub project_id: String,
    #[serde(default)]
    pub scopes: Vec<String>,
    /// Options shared by every slot
    #[serde(default)]
    pub options: Vec<ClientOption>,
    /// Per-slot options, applied after the shared ones
    #[serde(default)]
    pub slot_options: BTreeMap<String, Vec<ClientOption>>,
    /// `projects/<p>/instances/<i>/databases/<d>`
    #[serde(default)]
    pub spanner_database: Option<String>,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub selection: SlotSelection,
    /// Deadline for each slot construction, in milliseconds
    #[serde(default)]
    pub slot_timeout_ms: Option<u64>,
    /// Issue each slot's probe request while building
    #[serde(default)]
    pub verify_on_build: bool,
}

impl Config {
    /// Create a configuration for a project with the given scopes
    pub fn new(project_id: impl Into<String>, scopes: Vec<String>) -> Self {
        Self {
            project_id: project_id.into(),
            scopes,
            ..Self::default()
        }
    }

    /// Configuration using the cloud-platform scope
    pub fn for_project(project_id: impl Into<String>) -> Self {
        Self::new(
            project_id,
            DEFAULT_SCOPES.iter().map(|s| s.to_string()).collect(),
        )
    }

    pub fn with_option(mut self, option: ClientOption) -> Self {
        self.options.push(option);
        self
    }

    pub fn with_slot_option(mut self, slot: &str, option: ClientOption) -> Self {
        self.slot_options
            .entry(slot.to_string())
            .or_default()
            .push(option);
        self
    }

    pub fn with_spanner_database(mut self, database: impl Into<String>) -> Self {
        self.spanner_database = Some(database.into());
        self
    }

    pub fn with_cluster(mut self, cluster: ClusterConfig) -> Self {
        self.cluster = cluster;
        self
    }

    pub fn with_selection(mut self, selection: SlotSelection) -> Self {
        self.selection = selection;
        self
    }

    /// Restrict the build to the named slots
    pub fn only<I, S>(self, slots: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.with_selection(SlotSelection::Only(
            slots.into_iter().map(Into::into).collect(),
        ))
    }

    pub fn with_slot_timeout(mut self, timeout: Duration) -> Self {
        self.slot_timeout_ms = Some(u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX));
        self
    }

    pub fn with_verify_on_build(mut self, verify: bool) -> Self {
        self.verify_on_build = verify;
        self
    }

    pub fn slot_timeout(&self) -> Option<Duration> {
        self.slot_timeout_ms.map(Duration::from_millis)
    }

    /// Effective options for a slot: shared options first, then its overrides
    pub fn options_for(&self, slot: &str) -> Vec<&ClientOption> {
        self.options
            .iter()
            .chain(self.slot_options.get(slot).into_iter().flatten())
            .collect()
    }

    /// Default config file path
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("gcpset").join("config.json"))
    }

    /// Load configuration from a JSON file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    /// Load from the default path, falling back to an empty configuration
    pub fn load() -> Self {
        let Some(path) = Self::default_path() else {
            return Self::default();
        };

        if !path.exists() {
            return Self::default();
        }

        match Self::from_file(&path) {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Ignoring unreadable config: {:#}", e);
                Self::default()
            }
        }
    }

    /// Save configuration as pretty JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;

        Ok(())
    }
}

/// Validate a GCP project ID format
/// Project IDs must be 6-30 characters, lowercase letters, digits, and hyphens
/// Must start with a letter and cannot end with a hyphen
pub fn validate_project_id(project: &str) -> bool {
    if project.len() < 6 || project.len() > 30 {
        return false;
    }

    match project.chars().next() {
        Some(c) if c.is_ascii_lowercase() => {}
        _ => return false,
    }

    if project.ends_with('-') {
        return false;
    }

    project
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
}

/// The gcloud CLI configuration directory under the user config dir
pub fn gcloud_config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("gcloud"))
}

/// Read the default project from a gcloud configuration directory
///
/// Looks at the legacy `properties` file first, then the `[core]` section of
/// the active named configuration. Invalid project IDs are skipped.
pub fn gcloud_default_project(config_dir: &Path) -> Option<String> {
    if let Ok(content) = std::fs::read_to_string(config_dir.join("properties")) {
        if let Some(project) = find_property(&content, None, "project") {
            return Some(project);
        }
    }

    let active_config = std::fs::read_to_string(config_dir.join("active_config")).ok()?;
    let config_name = active_config.trim();

    // no path traversal through the config name
    if !config_name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        tracing::warn!("Invalid characters in active_config name");
        return None;
    }

    let config_path = config_dir
        .join("configurations")
        .join(format!("config_{}", config_name));
    let content = std::fs::read_to_string(config_path).ok()?;
    find_property(&content, Some("core"), "project")
}

fn find_property(content: &str, section: Option<&str>, key: &str) -> Option<String> {
    let mut in_section = section.is_none();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }
        if line.starts_with('[') {
            in_section = section.map_or(true, |s| line == format!("[{}]", s));
            continue;
        }
        if !in_section {
            continue;
        }
        let Some((name, value)) = line.split_once('=') else {
            continue;
        };
        if name.trim() == key {
            let value = value.trim();
            if validate_project_id(value) {
                return Some(value.to_string());
            }
        }
    }
    None
}
