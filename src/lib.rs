//! gcpset - one registry for many Google Cloud clients
//!
//! Build a named set of GCP service clients from a single [`Config`], get one
//! [`AggregatedError`] describing every slot that could not be built, use the
//! rest through typed accessors, and close them all at once.
//!
//! # Modules
//!
//! - [`config`] - Explicit configuration (project, scopes, options, cluster)
//! - [`registry`] - The registry, slot table, connectors and validators
//! - [`gcp`] - Authentication, HTTP and the REST service client
//! - [`kube`] - Kubernetes API client
//! - [`error`] - Slot, aggregated and accessor errors

pub mod config;
pub mod error;
pub mod gcp;
pub mod kube;
pub mod registry;

pub use config::{ClientOption, ClusterConfig, ClusterMode, Config, SlotSelection};
pub use error::{AggregatedError, RegistryError, SlotError, SlotFailure};
pub use gcp::client::ServiceClient;
pub use kube::KubeClient;
pub use registry::{
    Connector, GcpConnector, Lifecycle, Registry, RegistryBuilder, SlotHandle, SlotState,
    SlotStatus,
};
