//! Slot handles
//!
//! A handle is whatever live client a slot's connector produced. The registry
//! only needs its name, a way to release it, and a way to hand it back to
//! callers as its concrete type.

use async_trait::async_trait;
use std::any::Any;
use std::sync::Arc;

#[async_trait]
pub trait SlotHandle: Send + Sync + 'static {
    /// Slot this handle was built for
    fn slot(&self) -> &str;

    /// Release the underlying session. Only called for closable slots, and
    /// at most once per handle by the registry.
    async fn close(&self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Upcast for typed access through [`crate::Registry::get_as`]
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}
