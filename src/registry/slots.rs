//! Slot table - load slot definitions from JSON
//!
//! Every slot the registry can build is described by data in `src/slots/`.
//! Adding a service is a JSON change; only a typed accessor (optional) needs
//! code.

use crate::config::{Config, SlotSelection};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Embedded slot JSON files (compiled into the binary)
const SLOT_FILES: &[&str] = &[
    include_str!("../slots/core.json"),
    include_str!("../slots/clients.json"),
    include_str!("../slots/services.json"),
];

/// How a slot's handle is constructed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotKind {
    /// Authenticated REST [`crate::gcp::client::ServiceClient`]
    Rest,
    /// [`crate::kube::KubeClient`]
    Kubernetes,
}

/// Coarse grouping used for selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotGroup {
    /// Shared HTTP client and tracing
    Core,
    /// Service clients (Pub/Sub, Storage, Spanner, ...)
    Clients,
    /// Discovery-based API services (Calendar, Sheets, ...)
    Services,
}

impl SlotGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            SlotGroup::Core => "core",
            SlotGroup::Clients => "clients",
            SlotGroup::Services => "services",
        }
    }
}

/// A configuration field a slot cannot be built without
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Requirement {
    ProjectId,
    Scopes,
    SpannerDatabase,
}

/// Slot definition from JSON
#[derive(Debug, Clone, Deserialize)]
pub struct SlotDef {
    /// Filled from the map key
    #[serde(skip)]
    pub name: String,
    pub display_name: String,
    pub service: String,
    pub kind: SlotKind,
    pub group: SlotGroup,
    #[serde(default)]
    pub endpoint: Option<String>,
    /// Resource root template, e.g. `projects/{project_id}`
    #[serde(default)]
    pub resource: Option<String>,
    #[serde(default)]
    pub requires: Vec<Requirement>,
    /// Whether the handle exposes a close operation
    #[serde(default)]
    pub closable: bool,
    /// Path requested when verifying the slot at build time
    #[serde(default)]
    pub probe: Option<String>,
}

impl SlotDef {
    pub fn requires(&self, requirement: Requirement) -> bool {
        self.requires.contains(&requirement)
    }
}

/// Root structure of slots/*.json
#[derive(Debug, Clone, Deserialize)]
pub struct SlotTable {
    #[serde(default)]
    pub slots: BTreeMap<String, SlotDef>,
}

/// Global table loaded from JSON
static TABLE: OnceLock<SlotTable> = OnceLock::new();

/// Get the slot table (loads from embedded JSON on first access)
pub fn slot_table() -> &'static SlotTable {
    TABLE.get_or_init(|| {
        let mut table = SlotTable {
            slots: BTreeMap::new(),
        };

        for content in SLOT_FILES {
            let partial: SlotTable = serde_json::from_str(content)
                .unwrap_or_else(|e| panic!("Failed to parse embedded slot JSON: {}", e));
            for (name, mut def) in partial.slots {
                def.name = name.clone();
                table.slots.insert(name, def);
            }
        }

        table
    })
}

/// Get a slot definition by name
pub fn get_slot(name: &str) -> Option<&'static SlotDef> {
    slot_table().slots.get(name)
}

/// All slot names, sorted
pub fn all_slot_names() -> Vec<&'static str> {
    slot_table().slots.keys().map(|s| s.as_str()).collect()
}

/// Slots selected by a configuration, sorted by name
pub fn selected_slots(config: &Config) -> Vec<&'static SlotDef> {
    slot_table()
        .slots
        .values()
        .filter(|def| config.selection.includes(&def.name, def.group))
        .collect()
}

/// Names an `Only` selection asks for that the slot table does not have
pub fn unknown_selected(config: &Config) -> Vec<&str> {
    match &config.selection {
        SlotSelection::Only(names) => names
            .iter()
            .filter(|name| get_slot(name).is_none())
            .map(String::as_str)
            .collect(),
        _ => Vec::new(),
    }
}

/// Substitute `{project_id}` and `{spanner_database}` in a template
///
/// Fails with the name of the first placeholder that has no value.
pub fn render_template(template: &str, config: &Config) -> Result<String, String> {
    let spanner = config.spanner_database.as_deref().unwrap_or("");
    let values = [
        ("{project_id}", config.project_id.as_str()),
        ("{spanner_database}", spanner),
    ];

    let mut rendered = template.to_string();
    for (placeholder, value) in values {
        if !rendered.contains(placeholder) {
            continue;
        }
        if value.is_empty() {
            return Err(format!(
                "template '{}' needs {}",
                template,
                placeholder.trim_matches(|c| c == '{' || c == '}')
            ));
        }
        rendered = rendered.replace(placeholder, value);
    }
    Ok(rendered)
}
