//! Aggregate client registry
//!
//! Builds every selected slot independently, keeps the handles that came up,
//! and reports every failure in one [`AggregatedError`].
//!
//! # Architecture
//!
//! - [`slots`] - Slot table loaded from embedded JSON
//! - [`validate`] - Per-slot configuration checks
//! - [`connector`] - Turns a slot definition into a live handle
//! - [`handle`] - The trait every handle implements
//!
//! # Lifecycle
//!
//! `Uninitialized -> Building -> {Ready, PartiallyReady} -> Closed`
//!
//! # Example
//!
//! ```ignore
//! use gcpset::{Config, Registry};
//!
//! async fn example() -> anyhow::Result<()> {
//!     let config = Config::for_project("my-project");
//!     let (registry, built) = Registry::builder(config).build().await;
//!     if let Err(errors) = &built {
//!         tracing::warn!("some slots are unavailable: {}", errors);
//!     }
//!     let storage = registry.storage()?;
//!     let buckets = storage.get_with_query("b", &[("project", "my-project")]).await?;
//!     registry.close().await?;
//!     Ok(())
//! }
//! ```

pub mod connector;
pub mod handle;
pub mod slots;
pub mod validate;

pub use connector::{Connector, GcpConnector};
pub use handle::SlotHandle;
pub use slots::{SlotDef, SlotGroup, SlotKind};
pub use validate::{ConfigValidator, DefaultValidator, NoopValidator};

use crate::config::Config;
use crate::error::{AggregatedError, RegistryError, SlotError};
use crate::gcp::client::ServiceClient;
use crate::kube::KubeClient;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Registry lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Lifecycle {
    Uninitialized,
    Building,
    /// Every selected slot is live
    Ready,
    /// At least one slot failed
    PartiallyReady,
    Closed,
}

/// State of one slot as reported by [`Registry::statuses`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SlotState {
    Live,
    Failed,
    Closed,
}

/// Per-slot report
#[derive(Debug, Clone, Serialize)]
pub struct SlotStatus {
    pub slot: String,
    pub display_name: String,
    pub group: SlotGroup,
    pub state: SlotState,
    pub error: Option<String>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_ms: u64,
}

struct Entry {
    def: &'static SlotDef,
    handle: Option<Arc<dyn SlotHandle>>,
    error: Option<String>,
    finished_at: DateTime<Utc>,
    elapsed_ms: u64,
}

struct State {
    lifecycle: Lifecycle,
    entries: BTreeMap<String, Entry>,
}

/// Named collection of live service handles
pub struct Registry {
    id: Uuid,
    config: Arc<Config>,
    state: RwLock<State>,
    /// Serializes build and close
    lifecycle_lock: tokio::sync::Mutex<()>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::unbuilt(Config::default())
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("id", &self.id)
            .field("lifecycle", &self.lifecycle())
            .field("live", &self.live_slots())
            .finish()
    }
}

/// Configures and runs a registry build
pub struct RegistryBuilder {
    config: Config,
    connector: Arc<dyn Connector>,
    validator: Arc<dyn ConfigValidator>,
    cancel: CancellationToken,
}

impl RegistryBuilder {
    /// Replace the default [`GcpConnector`]
    pub fn connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Arc::new(connector);
        self
    }

    /// Replace the default [`DefaultValidator`]
    pub fn validator(mut self, validator: impl ConfigValidator + 'static) -> Self {
        self.validator = Arc::new(validator);
        self
    }

    /// Cancelling the token fails every slot still under construction
    pub fn cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Attempt every selected slot and return the registry with all failures
    pub async fn build(self) -> (Registry, Result<(), AggregatedError>) {
        let registry = Registry::unbuilt(self.config);
        let result = registry
            .populate(self.connector.as_ref(), self.validator.as_ref(), &self.cancel)
            .await;
        (registry, result)
    }
}

impl Registry {
    /// Start configuring a build
    pub fn builder(config: Config) -> RegistryBuilder {
        RegistryBuilder {
            config,
            connector: Arc::new(GcpConnector::new()),
            validator: Arc::new(DefaultValidator),
            cancel: CancellationToken::new(),
        }
    }

    fn unbuilt(config: Config) -> Self {
        Self {
            id: Uuid::new_v4(),
            config: Arc::new(config),
            state: RwLock::new(State {
                lifecycle: Lifecycle::Uninitialized,
                entries: BTreeMap::new(),
            }),
            lifecycle_lock: tokio::sync::Mutex::new(()),
        }
    }

    fn read_state(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    async fn populate(
        &self,
        connector: &dyn Connector,
        validator: &dyn ConfigValidator,
        cancel: &CancellationToken,
    ) -> Result<(), AggregatedError> {
        let _guard = self.lifecycle_lock.lock().await;
        self.write_state().lifecycle = Lifecycle::Building;

        let config = self.config.as_ref();
        let selected = slots::selected_slots(config);
        tracing::info!(
            "Registry {} building {} slot(s) for project '{}'",
            self.id,
            selected.len(),
            config.project_id
        );

        let attempts = selected.into_iter().map(|def| async move {
            let started = Instant::now();
            let result = build_slot(def, config, connector, validator, cancel).await;
            let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            (def, result, elapsed_ms)
        });
        let results = join_all(attempts).await;

        let mut errors = AggregatedError::new();
        for name in slots::unknown_selected(config) {
            tracing::warn!("Slot {} is not in the slot table", name);
            errors.push(name, SlotError::Configuration("unknown slot".to_string()));
        }

        let mut entries = BTreeMap::new();
        for (def, result, elapsed_ms) in results {
            let (handle, error) = match result {
                Ok(handle) => {
                    tracing::info!("Slot {} ready in {} ms", def.name, elapsed_ms);
                    (Some(handle), None)
                }
                Err(e) => {
                    tracing::warn!("Slot {} failed: {}", def.name, e);
                    let text = e.to_string();
                    errors.push(def.name.clone(), e);
                    (None, Some(text))
                }
            };
            entries.insert(
                def.name.clone(),
                Entry {
                    def,
                    handle,
                    error,
                    finished_at: Utc::now(),
                    elapsed_ms,
                },
            );
        }

        let lifecycle = if errors.is_empty() {
            Lifecycle::Ready
        } else {
            Lifecycle::PartiallyReady
        };
        {
            let mut state = self.write_state();
            state.entries = entries;
            state.lifecycle = lifecycle;
        }

        tracing::info!(
            "Registry {} is {:?} ({} failed)",
            self.id,
            lifecycle,
            errors.len()
        );
        errors.into_result()
    }

    /// Live handle for a slot
    pub fn get(&self, slot: &str) -> Result<Arc<dyn SlotHandle>, RegistryError> {
        if slots::get_slot(slot).is_none() {
            return Err(RegistryError::UnknownSlot(slot.to_string()));
        }

        let state = self.read_state();
        match state.lifecycle {
            Lifecycle::Uninitialized | Lifecycle::Building => {
                Err(RegistryError::NotInitialized(slot.to_string()))
            }
            Lifecycle::Closed => Err(RegistryError::AlreadyClosed(slot.to_string())),
            Lifecycle::Ready | Lifecycle::PartiallyReady => state
                .entries
                .get(slot)
                .and_then(|e| e.handle.clone())
                .ok_or_else(|| RegistryError::NotInitialized(slot.to_string())),
        }
    }

    /// Live handle for a slot as its concrete type
    pub fn get_as<T: SlotHandle>(&self, slot: &str) -> Result<Arc<T>, RegistryError> {
        self.get(slot)?
            .into_any()
            .downcast::<T>()
            .map_err(|_| RegistryError::HandleType {
                slot: slot.to_string(),
                expected: std::any::type_name::<T>(),
            })
    }

    /// Release every live handle; later calls are no-ops
    pub async fn close(&self) -> Result<(), AggregatedError> {
        let _guard = self.lifecycle_lock.lock().await;

        let handles: Vec<(&'static SlotDef, Arc<dyn SlotHandle>)> = {
            let mut state = self.write_state();
            if state.lifecycle == Lifecycle::Closed {
                tracing::debug!("Registry {} already closed", self.id);
                return Ok(());
            }
            state.lifecycle = Lifecycle::Closed;
            state
                .entries
                .values_mut()
                .filter_map(|e| e.handle.take().map(|h| (e.def, h)))
                .collect()
        };

        let releases = handles
            .into_iter()
            .filter(|(def, _)| def.closable)
            .map(|(def, handle)| async move { (def, handle.close().await) });
        let results = join_all(releases).await;

        let mut errors = AggregatedError::new();
        for (def, result) in results {
            if let Err(e) = result {
                tracing::warn!("Closing slot {} failed: {:#}", def.name, e);
                errors.push(def.name.clone(), SlotError::Release(e));
            }
        }

        tracing::info!("Registry {} closed ({} release failures)", self.id, errors.len());
        errors.into_result()
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.read_state().lifecycle
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Identifier used in log lines
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Names of slots currently holding a handle
    pub fn live_slots(&self) -> Vec<String> {
        self.read_state()
            .entries
            .iter()
            .filter(|(_, e)| e.handle.is_some())
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Status of every attempted slot, sorted by name
    pub fn statuses(&self) -> Vec<SlotStatus> {
        let state = self.read_state();
        state
            .entries
            .values()
            .map(|e| SlotStatus {
                slot: e.def.name.clone(),
                display_name: e.def.display_name.clone(),
                group: e.def.group,
                state: match (&e.handle, &e.error) {
                    (Some(_), _) => SlotState::Live,
                    (None, Some(_)) => SlotState::Failed,
                    (None, None) => SlotState::Closed,
                },
                error: e.error.clone(),
                finished_at: e.finished_at,
                elapsed_ms: e.elapsed_ms,
            })
            .collect()
    }
}

async fn build_slot(
    def: &'static SlotDef,
    config: &Config,
    connector: &dyn Connector,
    validator: &dyn ConfigValidator,
    cancel: &CancellationToken,
) -> Result<Arc<dyn SlotHandle>, SlotError> {
    validator
        .validate(def, config)
        .map_err(SlotError::Configuration)?;

    let attempt = async {
        let connect = connector.connect(def, config);
        match config.slot_timeout() {
            Some(limit) => match tokio::time::timeout(limit, connect).await {
                Ok(result) => result.map_err(SlotError::Construction),
                Err(_) => Err(SlotError::Timeout(limit)),
            },
            None => connect.await.map_err(SlotError::Construction),
        }
    };

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SlotError::Cancelled),
        result = attempt => result,
    }
}

/// Generates typed accessors from `(accessor, slot, handle type)` rows
macro_rules! slot_accessors {
    ($($(#[$meta:meta])* $accessor:ident => $slot:literal as $ty:ty;)*) => {
        /// Slots that have a typed accessor
        pub const TYPED_SLOTS: &[&str] = &[$($slot),*];

        impl Registry {
            $(
                $(#[$meta])*
                pub fn $accessor(&self) -> Result<Arc<$ty>, RegistryError> {
                    self.get_as::<$ty>($slot)
                }
            )*
        }
    };
}

slot_accessors! {
    /// Default authenticated client for www.googleapis.com
    google_apis => "google-apis" as ServiceClient;
    trace => "trace" as ServiceClient;
    /// Pub/Sub
    pubsub => "message-queue" as ServiceClient;
    iam => "iam" as ServiceClient;
    /// Cloud Storage
    storage => "object-storage" as ServiceClient;
    spanner => "spanner" as ServiceClient;
    spanner_admin => "spanner-admin" as ServiceClient;
    firestore => "firestore" as ServiceClient;
    iot => "iot" as ServiceClient;
    kubernetes => "kubernetes" as KubeClient;
    /// Cloud KMS
    keys => "key-management" as ServiceClient;
    image_annotator => "image-annotator" as ServiceClient;
    image_product_search => "image-product-search" as ServiceClient;
    video_intelligence => "video-intelligence" as ServiceClient;
    text_to_speech => "text-to-speech" as ServiceClient;
    speech => "speech" as ServiceClient;
    translate => "translate" as ServiceClient;
    language => "language" as ServiceClient;
    container => "container" as ServiceClient;
    sheets => "sheets" as ServiceClient;
    docs => "docs" as ServiceClient;
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::any::Any;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    struct FakeHandle {
        slot: String,
        closes: Arc<AtomicUsize>,
        fail_close: bool,
    }

    #[async_trait]
    impl SlotHandle for FakeHandle {
        fn slot(&self) -> &str {
            &self.slot
        }

        async fn close(&self) -> anyhow::Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            if self.fail_close {
                anyhow::bail!("session already torn down");
            }
            Ok(())
        }

        fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
            self
        }
    }

    /// Fails the listed slots, hangs on `hang`, records every attempt
    #[derive(Default)]
    struct FakeConnector {
        failing: HashSet<&'static str>,
        failing_close: HashSet<&'static str>,
        hang: HashSet<&'static str>,
        attempts: Mutex<Vec<String>>,
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Connector for FakeConnector {
        async fn connect(&self, slot: &SlotDef, _config: &Config) -> anyhow::Result<Arc<dyn SlotHandle>> {
            self.attempts.lock().unwrap().push(slot.name.clone());
            if self.hang.contains(slot.name.as_str()) {
                futures::future::pending::<()>().await;
            }
            if self.failing.contains(slot.name.as_str()) {
                anyhow::bail!("invalid credentials for {}", slot.name);
            }
            Ok(Arc::new(FakeHandle {
                slot: slot.name.clone(),
                closes: self.closes.clone(),
                fail_close: self.failing_close.contains(slot.name.as_str()),
            }))
        }
    }

    fn config(slots: &[&str]) -> Config {
        Config::for_project("my-project-123").only(slots.iter().copied())
    }

    #[tokio::test]
    async fn test_default_registry_is_uninitialized() {
        let registry = Registry::default();
        assert_eq!(registry.lifecycle(), Lifecycle::Uninitialized);
        assert_eq!(
            registry.get("iam").err(),
            Some(RegistryError::NotInitialized("iam".to_string()))
        );
        assert!(registry.statuses().is_empty());
    }

    #[tokio::test]
    async fn test_all_slots_succeed() {
        let (registry, result) = Registry::builder(config(&["iam", "speech", "translate"]))
            .connector(FakeConnector::default())
            .build()
            .await;

        assert!(result.is_ok());
        assert_eq!(registry.lifecycle(), Lifecycle::Ready);
        for slot in ["iam", "speech", "translate"] {
            assert_eq!(registry.get(slot).unwrap().slot(), slot);
        }
        assert_eq!(registry.live_slots(), vec!["iam", "speech", "translate"]);
    }

    #[tokio::test]
    async fn test_failures_do_not_stop_siblings() {
        let connector = FakeConnector {
            failing: ["speech"].into_iter().collect(),
            ..FakeConnector::default()
        };
        let (registry, result) = Registry::builder(config(&["iam", "speech", "translate"]))
            .connector(connector)
            .build()
            .await;

        let errors = result.unwrap_err();
        assert_eq!(errors.slots(), vec!["speech"]);
        assert!(errors.to_string().contains("invalid credentials for speech"));
        assert_eq!(registry.lifecycle(), Lifecycle::PartiallyReady);
        assert!(registry.get("iam").is_ok());
        assert!(registry.get("translate").is_ok());
        assert_eq!(
            registry.get("speech").err(),
            Some(RegistryError::NotInitialized("speech".to_string()))
        );

        let statuses = registry.statuses();
        let speech = statuses.iter().find(|s| s.slot == "speech").unwrap();
        assert_eq!(speech.state, SlotState::Failed);
        assert!(speech.error.as_deref().unwrap().contains("invalid credentials"));
    }

    #[tokio::test]
    async fn test_each_slot_attempted_once() {
        let connector = Arc::new(FakeConnector {
            failing: ["iam"].into_iter().collect(),
            ..FakeConnector::default()
        });

        struct Shared(Arc<FakeConnector>);
        #[async_trait]
        impl Connector for Shared {
            async fn connect(&self, slot: &SlotDef, config: &Config) -> anyhow::Result<Arc<dyn SlotHandle>> {
                self.0.connect(slot, config).await
            }
        }

        let (_registry, _) = Registry::builder(config(&["iam", "speech", "translate"]))
            .connector(Shared(connector.clone()))
            .build()
            .await;

        let mut attempts = connector.attempts.lock().unwrap().clone();
        attempts.sort();
        assert_eq!(attempts, vec!["iam", "speech", "translate"]);
    }

    #[tokio::test]
    async fn test_configuration_error_skips_connector() {
        let (registry, result) = Registry::builder(Config::default().only(["firestore", "kubernetes"]))
            .connector(FakeConnector::default())
            .build()
            .await;

        let errors = result.unwrap_err();
        assert_eq!(errors.slots(), vec!["firestore"]);
        assert!(errors.get("firestore").unwrap().is_configuration());
        assert!(registry.get("kubernetes").is_ok());
    }

    #[tokio::test]
    async fn test_unknown_selected_slot_is_reported() {
        let (registry, result) = Registry::builder(config(&["pubsub", "iam"]))
            .connector(FakeConnector::default())
            .build()
            .await;

        let errors = result.unwrap_err();
        assert_eq!(errors.slots(), vec!["pubsub"]);
        assert!(errors.get("pubsub").unwrap().is_configuration());
        assert!(errors.to_string().contains("unknown slot"));
        assert_eq!(registry.lifecycle(), Lifecycle::PartiallyReady);
        assert_eq!(registry.live_slots(), vec!["iam"]);
    }

    #[tokio::test]
    async fn test_bad_scope_leaves_kubernetes_live() {
        let mut config = config(&["kubernetes", "translate"]);
        config.scopes.push("not a url".to_string());

        let (registry, result) = Registry::builder(config)
            .connector(FakeConnector::default())
            .build()
            .await;

        let errors = result.unwrap_err();
        assert_eq!(errors.slots(), vec!["translate"]);
        assert!(errors.get("translate").unwrap().is_configuration());
        assert!(registry.get("kubernetes").is_ok());
    }

    #[tokio::test]
    async fn test_close_twice_releases_once() {
        let connector = FakeConnector::default();
        let closes = connector.closes.clone();
        let (registry, _) = Registry::builder(config(&["iam", "speech", "translate"]))
            .connector(connector)
            .build()
            .await;

        assert!(registry.close().await.is_ok());
        // iam is not closable
        assert_eq!(closes.load(Ordering::SeqCst), 2);

        assert!(registry.close().await.is_ok());
        assert_eq!(closes.load(Ordering::SeqCst), 2);
        assert_eq!(registry.lifecycle(), Lifecycle::Closed);
        assert_eq!(
            registry.get("speech").err(),
            Some(RegistryError::AlreadyClosed("speech".to_string()))
        );
    }

    #[tokio::test]
    async fn test_close_aggregates_release_errors() {
        let connector = FakeConnector {
            failing_close: ["speech", "language"].into_iter().collect(),
            ..FakeConnector::default()
        };
        let closes = connector.closes.clone();
        let (registry, _) = Registry::builder(config(&["language", "speech", "translate"]))
            .connector(connector)
            .build()
            .await;

        let errors = registry.close().await.unwrap_err();
        assert_eq!(errors.slots(), vec!["language", "speech"]);
        assert!(matches!(errors.get("speech"), Some(SlotError::Release(_))));
        assert_eq!(closes.load(Ordering::SeqCst), 3);
        assert!(registry.close().await.is_ok());
    }

    #[tokio::test]
    async fn test_timeout_is_slot_failure() {
        let connector = FakeConnector {
            hang: ["speech"].into_iter().collect(),
            ..FakeConnector::default()
        };
        let config = config(&["speech", "translate"]).with_slot_timeout(Duration::from_millis(200));

        let (registry, result) = Registry::builder(config).connector(connector).build().await;

        let errors = result.unwrap_err();
        assert!(matches!(errors.get("speech"), Some(SlotError::Timeout(_))));
        assert!(registry.get("translate").is_ok());
    }

    #[tokio::test]
    async fn test_cancellation_is_slot_failure() {
        let connector = FakeConnector {
            hang: ["speech", "translate"].into_iter().collect(),
            ..FakeConnector::default()
        };
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            trigger.cancel();
        });

        let (registry, result) = Registry::builder(config(&["iam", "speech", "translate"]))
            .connector(connector)
            .cancellation(cancel)
            .build()
            .await;

        let errors = result.unwrap_err();
        assert_eq!(errors.slots(), vec!["speech", "translate"]);
        assert!(matches!(errors.get("translate"), Some(SlotError::Cancelled)));
        assert!(registry.get("iam").is_ok());
    }

    #[tokio::test]
    async fn test_unknown_slot_and_wrong_type() {
        let (registry, _) = Registry::builder(config(&["iam"]))
            .connector(FakeConnector::default())
            .build()
            .await;

        assert_eq!(
            registry.get("nope").err(),
            Some(RegistryError::UnknownSlot("nope".to_string()))
        );
        assert!(matches!(
            registry.iam().unwrap_err(),
            RegistryError::HandleType { .. }
        ));
        assert!(registry.get_as::<FakeHandle>("iam").is_ok());
    }

    #[test]
    fn test_typed_slots_exist_in_table() {
        for slot in TYPED_SLOTS {
            assert!(slots::get_slot(slot).is_some(), "{} missing from slot table", slot);
        }
    }
}
