//! Trait abstractions for the AT Protocol client.
//!
//! - [`HandleResolver`] turns handles into DIDs; rich-text mention facets are
//!   resolved through it, so tests can swap in an offline resolver.
//! - [`Validate`] is implemented by records that are checked locally before
//!   they are sent to the service.

use crate::error::Result;
use async_trait::async_trait;

/// Resolves a handle such as `alice.bsky.social` to its DID.
#[async_trait]
pub trait HandleResolver: Send + Sync {
    /// Returns the DID for `handle`.
    async fn resolve_handle(&self, handle: &str) -> Result<String>;
}

// Utility trait for types that can be validated
pub trait Validate {
    type Error;

    /// Validates the instance.
    fn validate(&self) -> std::result::Result<(), Self::Error>;
}
