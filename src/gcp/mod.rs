//! GCP API interaction module
//!
//! Authentication, HTTP plumbing, and the REST [`client::ServiceClient`]
//! handle that backs every REST slot in the registry.
//!
//! # Module Structure
//!
//! - [`auth`] - ADC, key file, static token, or anonymous authorization
//! - [`client`] - Service client bound to one endpoint
//! - [`http`] - HTTP utilities for REST API calls
//!
//! # Example
//!
//! ```ignore
//! use gcpset::gcp::{auth::Authenticator, client::ServiceClient, http::GcpHttpClient};
//!
//! async fn example() -> anyhow::Result<()> {
//!     let http = GcpHttpClient::new("my-tool/1.0", None)?;
//!     let auth = Authenticator::Static("ya29.token".into());
//!     let pubsub = ServiceClient::new("message-queue", "https://pubsub.googleapis.com/v1/", auth, http)?
//!         .with_resource("projects/my-project");
//!     let topics = pubsub.get(&pubsub.resource_url("topics")).await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod client;
pub mod http;
