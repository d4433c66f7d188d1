//! # nanoatp
//!
//! A small async client for the AT Protocol as used by Bluesky.
//!
//! ## Features
//!
//! - **Sessions**: login with explicit or environment credentials, token refresh
//!   and transparent replay after an expired access token
//! - **Publishing**: typed `app.bsky.feed.post` records with replies, embeds and facets
//! - **Blobs**: uploads from memory, URLs and local files, link cards via the card service
//! - **Rich text**: mention, link and tag detection with UTF-8 byte offsets
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use nanoatp::{BskyAgent, ReplyRef, PostRecord, Result};
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let agent = BskyAgent::new()?;
//!     agent.login("alice.bsky.social", "app-password").await?;
//!
//!     let root = agent.post(PostRecord::new("Hello World!")).await?;
//!     let reply = PostRecord::new("Reply 1").with_reply(ReplyRef::to_post(&root));
//!     agent.post(reply).await?;
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod auth;
pub mod config;
pub mod error;
pub mod http;
pub mod link;
pub mod record;
pub mod richtext;
pub mod traits;
pub mod upload;
pub mod uri;
pub mod utils;

// Re-export main types for convenience
pub use agent::{BskyAgent, ListRecordsParams};
pub use auth::Session;
pub use config::{Config, Credentials};
pub use error::{AtpError, Result};
pub use record::{BlobRef, Embed, External, Image, PostRecord, ReplyRef, StrongRef};
pub use richtext::{Facet, FacetFeature, RichText};
pub use traits::{HandleResolver, Validate};
pub use uri::AtUri;
