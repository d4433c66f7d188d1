//! Post records and the embeds that hang off them.
//!
//! The structures serialize to the `app.bsky.feed.post` lexicon shape, with
//! `$type` discriminators where the service expects them.

use crate::error::{AtpError, Result};
use crate::richtext::Facet;
use crate::traits::Validate;
use serde::{Deserialize, Serialize};
use unicode_segmentation::UnicodeSegmentation;

/// Collection NSID for posts.
pub const POST_COLLECTION: &str = "app.bsky.feed.post";

/// Maximum graphemes (user-perceived characters) in a post's text.
pub const MAX_POST_GRAPHEMES: usize = 300;

/// Maximum bytes in a post's text.
pub const MAX_POST_BYTES: usize = 3000;

/// Maximum images in one images embed.
pub const MAX_IMAGES: usize = 4;

/// Reference to a specific version of a record, as returned by `createRecord`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StrongRef {
    pub uri: String,
    pub cid: String,
}

impl StrongRef {
    pub fn new(uri: impl Into<String>, cid: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            cid: cid.into(),
        }
    }
}

/// Thread linkage of a reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplyRef {
    pub root: StrongRef,
    pub parent: StrongRef,
}

impl ReplyRef {
    pub fn new(root: StrongRef, parent: StrongRef) -> Self {
        Self { root, parent }
    }

    /// A direct reply to a top-level post, which is both root and parent.
    pub fn to_post(post: &StrongRef) -> Self {
        Self::new(post.clone(), post.clone())
    }
}

/// CID wrapped the way the data model encodes links.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CidLink {
    #[serde(rename = "$link")]
    pub link: String,
}

/// Uploaded binary data held by the service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "$type", rename = "blob", rename_all = "camelCase")]
pub struct BlobRef {
    #[serde(rename = "ref")]
    pub cid: CidLink,
    pub mime_type: String,
    pub size: u64,
}

impl BlobRef {
    pub fn new(cid: impl Into<String>, mime_type: impl Into<String>, size: u64) -> Self {
        Self {
            cid: CidLink { link: cid.into() },
            mime_type: mime_type.into(),
            size,
        }
    }
}

/// Width/height hint for an embedded image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AspectRatio {
    pub width: u32,
    pub height: u32,
}

/// One image of an images embed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Image {
    pub alt: String,
    pub image: BlobRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<AspectRatio>,
}

impl Image {
    pub fn new(image: BlobRef, alt: impl Into<String>) -> Self {
        Self {
            alt: alt.into(),
            image,
            aspect_ratio: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImagesEmbed {
    pub images: Vec<Image>,
}

/// Link card.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct External {
    pub uri: String,
    pub title: String,
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumb: Option<BlobRef>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalEmbed {
    pub external: External,
}

/// Quote of another record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordEmbed {
    pub record: StrongRef,
}

/// Media or record attached to a post.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "$type")]
pub enum Embed {
    #[serde(rename = "app.bsky.embed.images", alias = "app.bsky.embed.images#main")]
    Images(ImagesEmbed),
    #[serde(
        rename = "app.bsky.embed.external",
        alias = "app.bsky.embed.external#main"
    )]
    External(ExternalEmbed),
    #[serde(rename = "app.bsky.embed.record", alias = "app.bsky.embed.record#main")]
    Record(RecordEmbed),
}

impl Embed {
    pub fn images(images: Vec<Image>) -> Self {
        Embed::Images(ImagesEmbed { images })
    }

    pub fn external(external: External) -> Self {
        Embed::External(ExternalEmbed { external })
    }

    pub fn quote(record: StrongRef) -> Self {
        Embed::Record(RecordEmbed { record })
    }
}

/// An `app.bsky.feed.post` record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "$type", rename = "app.bsky.feed.post", rename_all = "camelCase")]
pub struct PostRecord {
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub facets: Option<Vec<Facet>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reply: Option<ReplyRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embed: Option<Embed>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub langs: Option<Vec<String>>,
    /// Filled in with the current time on publish when left empty.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub created_at: String,
}

impl PostRecord {
    /// Creates a plain text post.
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            facets: None,
            reply: None,
            embed: None,
            langs: None,
            created_at: String::new(),
        }
    }

    pub fn with_reply(mut self, reply: ReplyRef) -> Self {
        self.reply = Some(reply);
        self
    }

    pub fn with_embed(mut self, embed: Embed) -> Self {
        self.embed = Some(embed);
        self
    }

    /// Attaches facets; an empty list leaves the record without facets.
    pub fn with_facets(mut self, facets: Vec<Facet>) -> Self {
        self.facets = if facets.is_empty() { None } else { Some(facets) };
        self
    }

    pub fn with_langs(mut self, langs: Vec<String>) -> Self {
        self.langs = Some(langs);
        self
    }

    pub fn with_created_at(mut self, created_at: impl Into<String>) -> Self {
        self.created_at = created_at.into();
        self
    }
}

impl Validate for PostRecord {
    type Error = AtpError;

    fn validate(&self) -> Result<()> {
        let graphemes = self.text.graphemes(true).count();
        if graphemes > MAX_POST_GRAPHEMES {
            return Err(AtpError::invalid_record(format!(
                "text has {graphemes} graphemes (max: {MAX_POST_GRAPHEMES})"
            )));
        }

        if self.text.len() > MAX_POST_BYTES {
            return Err(AtpError::invalid_record(format!(
                "text has {} bytes (max: {MAX_POST_BYTES})",
                self.text.len()
            )));
        }

        if let Some(Embed::Images(ImagesEmbed { images })) = &self.embed {
            if images.is_empty() || images.len() > MAX_IMAGES {
                return Err(AtpError::invalid_record(format!(
                    "images embed holds {} images (expected 1 to {MAX_IMAGES})",
                    images.len()
                )));
            }
        }

        for facet in self.facets.iter().flatten() {
            let index = &facet.index;
            if index.byte_start >= index.byte_end || index.byte_end > self.text.len() {
                return Err(AtpError::invalid_record(format!(
                    "facet range {}..{} is outside the {}-byte text",
                    index.byte_start,
                    index.byte_end,
                    self.text.len()
                )));
            }
        }

        Ok(())
    }
}
