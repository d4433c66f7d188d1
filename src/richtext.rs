//! Rich text: detecting mentions, links and tags in post text.
//!
//! Facets annotate byte ranges of the UTF-8 encoded text. Detection works
//! offline against the public suffix list; mentions come out carrying the
//! handle in their `did` slot until [`RichText::detect_facets`] resolves them
//! through a [`HandleResolver`].
//!
//! ```rust
//! use nanoatp::richtext::{detect_facets, FacetFeature};
//!
//! let text = "Hello @paper.bsky.social, check out this link: https://example.com";
//! let facets = detect_facets(text);
//!
//! assert_eq!(facets.len(), 2);
//! assert_eq!(&text[facets[0].index.range()], "@paper.bsky.social");
//! assert!(matches!(&facets[1].features[0], FacetFeature::Link { uri } if uri == "https://example.com"));
//! ```

use crate::error::{AtpError, Result};
use crate::record::PostRecord;
use crate::traits::HandleResolver;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::Range;
use std::sync::LazyLock;
use tracing::debug;

/// Longest tag accepted, in characters.
pub const MAX_TAG_CHARS: usize = 64;

static MENTION_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|\s|\()@([a-zA-Z0-9.-]+)\b").expect("Invalid mention regex")
});

static LINK_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?im)(?:^|\s|\()((?:https?://\S+)|(?:(?P<domain>[a-z][a-z0-9]*(?:\.[a-z0-9]+)+)\S*))",
    )
    .expect("Invalid link regex")
});

static TAG_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|\s)([#＃])([^\s#＃]+)").expect("Invalid tag regex"));

static TAG_TRAILING_PUNCTUATION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\p{P}+$").expect("Invalid tag punctuation regex"));

/// Half-open byte range `[byte_start, byte_end)` into the text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ByteSlice {
    pub byte_start: usize,
    pub byte_end: usize,
}

impl ByteSlice {
    pub fn new(byte_start: usize, byte_end: usize) -> Self {
        Self {
            byte_start,
            byte_end,
        }
    }

    pub fn range(&self) -> Range<usize> {
        self.byte_start..self.byte_end
    }
}

/// What a facet marks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "$type")]
pub enum FacetFeature {
    #[serde(rename = "app.bsky.richtext.facet#mention")]
    Mention { did: String },
    #[serde(rename = "app.bsky.richtext.facet#link")]
    Link { uri: String },
    #[serde(rename = "app.bsky.richtext.facet#tag")]
    Tag { tag: String },
}

/// An annotated range of text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Facet {
    pub index: ByteSlice,
    pub features: Vec<FacetFeature>,
}

impl Facet {
    pub fn new(byte_start: usize, byte_end: usize, feature: FacetFeature) -> Self {
        Self {
            index: ByteSlice::new(byte_start, byte_end),
            features: vec![feature],
        }
    }
}

/// Lazily scans `text` for mentions, then links, then tags.
pub fn facets(text: &str) -> impl Iterator<Item = Facet> + '_ {
    mentions(text).chain(links(text)).chain(tags(text))
}

/// All facets of `text`, ordered by `byte_start`.
pub fn detect_facets(text: &str) -> Vec<Facet> {
    let mut facets: Vec<Facet> = facets(text).collect();
    facets.sort_by_key(|facet| facet.index.byte_start);
    facets
}

fn mentions(text: &str) -> impl Iterator<Item = Facet> + '_ {
    MENTION_REGEX.captures_iter(text).filter_map(|caps| {
        let handle = caps.get(1)?;
        if !is_valid_handle(handle.as_str()) {
            return None;
        }
        // the range starts at the one-byte '@'
        Some(Facet::new(
            handle.start() - 1,
            handle.end(),
            FacetFeature::Mention {
                did: handle.as_str().to_string(),
            },
        ))
    })
}

fn links(text: &str) -> impl Iterator<Item = Facet> + '_ {
    LINK_REGEX.captures_iter(text).filter_map(|caps| {
        let link = caps.get(1)?;
        if let Some(domain) = caps.name("domain") {
            if !is_valid_domain(domain.as_str()) {
                return None;
            }
        }

        let mut uri = link.as_str();
        if uri.ends_with(['.', ',', ';', '!', '?']) {
            uri = &uri[..uri.len() - 1];
        }
        if uri.ends_with(')') && !uri.contains('(') {
            uri = &uri[..uri.len() - 1];
        }

        let start = link.start();
        let end = start + uri.len();
        let uri = if caps.name("domain").is_some() {
            format!("https://{uri}")
        } else {
            uri.to_string()
        };

        Some(Facet::new(start, end, FacetFeature::Link { uri }))
    })
}

fn tags(text: &str) -> impl Iterator<Item = Facet> + '_ {
    TAG_REGEX.captures_iter(text).filter_map(|caps| {
        let hash = caps.get(1)?;
        let body = caps.get(2)?;
        let tag = TAG_TRAILING_PUNCTUATION
            .find(body.as_str())
            .map_or(body.as_str(), |punct| &body.as_str()[..punct.start()]);

        if tag.is_empty()
            || tag.chars().all(|c| c.is_ascii_digit())
            || tag.chars().count() > MAX_TAG_CHARS
        {
            return None;
        }

        Some(Facet::new(
            hash.start(),
            body.start() + tag.len(),
            FacetFeature::Tag {
                tag: tag.to_string(),
            },
        ))
    })
}

/// Domain check for links: well-formed labels under a known public suffix.
///
/// `Cargo.toml` or `notes.txt` are rejected because `toml` and `txt` are not
/// registered suffixes.
pub fn is_valid_domain(domain: &str) -> bool {
    if !has_valid_labels(domain) {
        return false;
    }
    let lower = domain.to_ascii_lowercase();
    psl::domain(lower.as_bytes()).is_some_and(|registrable| registrable.suffix().is_known())
}

/// Domain check for mention handles. Also accepts the reserved `.test` suffix
/// used by development servers.
pub fn is_valid_handle(handle: &str) -> bool {
    is_valid_domain(handle)
        || (has_valid_labels(handle) && handle.to_ascii_lowercase().ends_with(".test"))
}

// At least two labels of ASCII letters, digits and inner hyphens.
fn has_valid_labels(domain: &str) -> bool {
    if domain.is_empty() || domain.len() > 253 {
        return false;
    }

    let labels: Vec<&str> = domain.split('.').collect();
    labels.len() >= 2
        && labels.iter().all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

/// Post text together with its facets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RichText {
    text: String,
    facets: Vec<Facet>,
}

impl RichText {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            facets: Vec::new(),
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn facets(&self) -> &[Facet] {
        &self.facets
    }

    /// Length of the text in bytes, the unit facets are indexed in.
    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Detects facets without touching the network. Mentions keep their handles.
    pub fn detect_facets_without_resolution(&mut self) {
        self.facets = detect_facets(&self.text);
    }

    /// Detects facets and resolves every mention to a DID.
    ///
    /// Mentions the service cannot resolve are dropped; any other failure is
    /// returned.
    pub async fn detect_facets<R>(&mut self, resolver: &R) -> Result<()>
    where
        R: HandleResolver + ?Sized,
    {
        let mut resolved = Vec::new();

        for mut facet in detect_facets(&self.text) {
            if let Some(FacetFeature::Mention { did }) = facet.features.first_mut() {
                match resolver.resolve_handle(did).await {
                    Ok(resolved_did) => *did = resolved_did,
                    Err(AtpError::Xrpc { error, .. }) => {
                        debug!("Dropping unresolvable mention @{did}: {error}");
                        continue;
                    }
                    Err(e) => return Err(e),
                }
            }
            resolved.push(facet);
        }

        resolved.sort_by_key(|facet| facet.index.byte_start);
        self.facets = resolved;
        Ok(())
    }

    /// Builds a post carrying this text and its facets.
    pub fn into_record(self) -> PostRecord {
        PostRecord::new(self.text).with_facets(self.facets)
    }
}

impl fmt::Display for RichText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    const SAMPLE: &str = "Hello @paper.bsky.social, check out this link: https://example.com";

    fn slice<'a>(text: &'a str, facet: &Facet) -> &'a str {
        &text[facet.index.range()]
    }

    #[test]
    fn test_detects_mention_and_link() {
        let facets = detect_facets(SAMPLE);
        assert_eq!(facets.len(), 2);

        assert_eq!(facets[0].index, ByteSlice::new(6, 24));
        assert_eq!(slice(SAMPLE, &facets[0]), "@paper.bsky.social");
        assert_eq!(
            facets[0].features,
            vec![FacetFeature::Mention {
                did: "paper.bsky.social".to_string()
            }]
        );

        assert_eq!(slice(SAMPLE, &facets[1]), "https://example.com");
        assert_eq!(
            facets[1].features,
            vec![FacetFeature::Link {
                uri: "https://example.com".to_string()
            }]
        );
    }

    #[test]
    fn test_byte_offsets_after_multibyte_text() {
        let text = "こんにちは @alice.test";
        let facets = detect_facets(text);
        assert_eq!(facets.len(), 1);
        assert_eq!(facets[0].index.byte_start, 16);
        assert_eq!(slice(text, &facets[0]), "@alice.test");
    }

    #[test]
    fn test_repeated_mentions_get_their_own_ranges() {
        let text = "@alice.test and @alice.test";
        let facets = detect_facets(text);
        assert_eq!(facets.len(), 2);
        assert_eq!(facets[0].index, ByteSlice::new(0, 11));
        assert_eq!(facets[1].index, ByteSlice::new(16, 27));
    }

    #[test]
    fn test_invalid_handles_are_ignored() {
        assert!(detect_facets("email me @localhost please").is_empty());
        assert!(detect_facets("user@example.com").is_empty());
        assert!(detect_facets("@-bad-.com").is_empty());
    }

    #[test]
    fn test_mention_in_parentheses() {
        let text = "thanks (@bob.test)";
        let facets = detect_facets(text);
        assert_eq!(facets.len(), 1);
        assert_eq!(slice(text, &facets[0]), "@bob.test");
    }

    #[test]
    fn test_link_trailing_punctuation_is_trimmed() {
        let text = "see https://example.com/page. and (https://example.com/x)";
        let facets = detect_facets(text);
        assert_eq!(facets.len(), 2);
        assert_eq!(slice(text, &facets[0]), "https://example.com/page");
        assert_eq!(slice(text, &facets[1]), "https://example.com/x");

        let wiki = "https://en.wikipedia.org/wiki/Rust_(programming_language)";
        let facets = detect_facets(wiki);
        assert_eq!(slice(wiki, &facets[0]), wiki);
    }

    #[test]
    fn test_bare_domain_links() {
        let text = "go to example.com now";
        let facets = detect_facets(text);
        assert_eq!(facets.len(), 1);
        assert_eq!(slice(text, &facets[0]), "example.com");
        assert_eq!(
            facets[0].features[0],
            FacetFeature::Link {
                uri: "https://example.com".to_string()
            }
        );

        assert!(detect_facets("that is e.g. fine").is_empty());
    }

    #[test]
    fn test_file_names_are_not_links() {
        assert!(detect_facets("edit Cargo.toml first").is_empty());
        assert!(detect_facets("see readme.txt and config.yaml").is_empty());

        let text = "see readme.txt or blog.example.org";
        let facets = detect_facets(text);
        assert_eq!(facets.len(), 1);
        assert_eq!(slice(text, &facets[0]), "blog.example.org");
    }

    #[test]
    fn test_tags() {
        let text = "learning #rust! and #async, not #2024";
        let facets = detect_facets(text);
        assert_eq!(facets.len(), 2);
        assert_eq!(slice(text, &facets[0]), "#rust");
        assert_eq!(
            facets[0].features[0],
            FacetFeature::Tag {
                tag: "rust".to_string()
            }
        );
        assert_eq!(slice(text, &facets[1]), "#async");

        let long = format!("#{}", "a".repeat(MAX_TAG_CHARS + 1));
        assert!(detect_facets(&long).is_empty());
    }

    #[test]
    fn test_tags_drop_trailing_unicode_punctuation() {
        let text = "「#ラスト」 と #日本語。";
        let facets = detect_facets(text);
        assert_eq!(facets.len(), 1);
        assert_eq!(
            facets[0].features[0],
            FacetFeature::Tag {
                tag: "日本語".to_string()
            }
        );
        assert_eq!(slice(text, &facets[0]), "#日本語");

        let text = "#ラスト」 end";
        let facets = detect_facets(text);
        assert_eq!(slice(text, &facets[0]), "#ラスト");
        assert_eq!(
            facets[0].features[0],
            FacetFeature::Tag {
                tag: "ラスト".to_string()
            }
        );

        // only punctuation
        assert!(detect_facets("#。。").is_empty());
    }

    #[test]
    fn test_lazy_iterator_order() {
        let text = "#first @alice.test https://example.com";
        let kinds: Vec<_> = facets(text)
            .map(|facet| match &facet.features[0] {
                FacetFeature::Mention { .. } => "mention",
                FacetFeature::Link { .. } => "link",
                FacetFeature::Tag { .. } => "tag",
            })
            .collect();
        assert_eq!(kinds, vec!["mention", "link", "tag"]);

        let sorted = detect_facets(text);
        assert!(matches!(sorted[0].features[0], FacetFeature::Tag { .. }));
    }

    #[test]
    fn test_is_valid_domain() {
        assert!(is_valid_domain("bsky.social"));
        assert!(is_valid_domain("paper.bsky.social"));
        assert!(is_valid_domain("my-site.co.uk"));
        assert!(is_valid_domain("Example.COM"));
        assert!(!is_valid_domain("alice.test"));
        assert!(!is_valid_domain("Cargo.toml"));
        assert!(!is_valid_domain("readme.txt"));
        assert!(!is_valid_domain("localhost"));
        assert!(!is_valid_domain("example.123"));
        assert!(!is_valid_domain("exa_mple.com"));
        assert!(!is_valid_domain("example..com"));
        assert!(!is_valid_domain("-example.com"));
    }

    #[test]
    fn test_is_valid_handle() {
        assert!(is_valid_handle("paper.bsky.social"));
        assert!(is_valid_handle("alice.test"));
        assert!(!is_valid_handle("config.yaml"));
        assert!(!is_valid_handle("localhost"));
        assert!(!is_valid_handle("bad_.test"));
    }

    #[test]
    fn test_facet_serialization() {
        let facet = Facet::new(
            6,
            24,
            FacetFeature::Mention {
                did: "did:plc:paper".to_string(),
            },
        );
        assert_eq!(
            serde_json::to_value(&facet).unwrap(),
            serde_json::json!({
                "index": { "byteStart": 6, "byteEnd": 24 },
                "features": [{ "$type": "app.bsky.richtext.facet#mention", "did": "did:plc:paper" }]
            })
        );
    }

    struct TestResolver;

    #[async_trait]
    impl HandleResolver for TestResolver {
        async fn resolve_handle(&self, handle: &str) -> Result<String> {
            match handle {
                "paper.bsky.social" => Ok("did:plc:paper".to_string()),
                "offline.test" => Err(AtpError::NotLoggedIn),
                _ => Err(AtpError::from_xrpc_response(
                    400,
                    "InvalidRequest",
                    "Unable to resolve handle",
                )),
            }
        }
    }

    #[tokio::test]
    async fn test_detect_facets_resolves_mentions() {
        let mut rt = RichText::new(SAMPLE);
        rt.detect_facets(&TestResolver).await.unwrap();

        assert_eq!(rt.facets().len(), 2);
        assert_eq!(
            rt.facets()[0].features[0],
            FacetFeature::Mention {
                did: "did:plc:paper".to_string()
            }
        );

        let record = rt.into_record();
        assert_eq!(record.text, SAMPLE);
        assert_eq!(record.facets.map(|f| f.len()), Some(2));
    }

    #[tokio::test]
    async fn test_unresolvable_mentions_are_dropped() {
        let mut rt = RichText::new("hi @nobody.test see https://example.com");
        rt.detect_facets(&TestResolver).await.unwrap();

        assert_eq!(rt.facets().len(), 1);
        assert!(matches!(rt.facets()[0].features[0], FacetFeature::Link { .. }));
    }

    #[tokio::test]
    async fn test_resolver_failures_propagate() {
        let mut rt = RichText::new("hi @offline.test");
        let err = rt.detect_facets(&TestResolver).await.unwrap_err();
        assert!(matches!(err, AtpError::NotLoggedIn));
    }

    #[test]
    fn test_without_resolution_and_display() {
        let mut rt = RichText::new(SAMPLE);
        rt.detect_facets_without_resolution();
        assert_eq!(rt.facets().len(), 2);
        assert_eq!(rt.to_string(), SAMPLE);
        assert_eq!(rt.len(), SAMPLE.len());
        assert!(!rt.is_empty());
    }
}
