//! AT URIs: `at://<repo>/<collection>/<rkey>`.

use crate::error::{AtpError, Result};
use std::fmt;
use std::str::FromStr;

const SCHEME: &str = "at://";

/// A fully qualified record address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AtUri {
    /// DID or handle of the repository owner
    pub repo: String,
    /// Collection NSID, e.g. `app.bsky.feed.post`
    pub collection: String,
    /// Record key
    pub rkey: String,
}

impl AtUri {
    pub fn new(
        repo: impl Into<String>,
        collection: impl Into<String>,
        rkey: impl Into<String>,
    ) -> Self {
        Self {
            repo: repo.into(),
            collection: collection.into(),
            rkey: rkey.into(),
        }
    }
}

impl FromStr for AtUri {
    type Err = AtpError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || AtpError::InvalidUri { uri: s.to_string() };

        let rest = s.strip_prefix(SCHEME).ok_or_else(invalid)?;
        let mut parts = rest.split('/');
        let (Some(repo), Some(collection), Some(rkey), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid());
        };

        if repo.is_empty() || collection.is_empty() || rkey.is_empty() {
            return Err(invalid());
        }

        Ok(Self::new(repo, collection, rkey))
    }
}

impl fmt::Display for AtUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{SCHEME}{}/{}/{}", self.repo, self.collection, self.rkey)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_post_uri() {
        let uri: AtUri = "at://did:plc:abc123/app.bsky.feed.post/3jwdwj2ctlk26"
            .parse()
            .unwrap();

        assert_eq!(uri.repo, "did:plc:abc123");
        assert_eq!(uri.collection, "app.bsky.feed.post");
        assert_eq!(uri.rkey, "3jwdwj2ctlk26");
        assert_eq!(
            uri.to_string(),
            "at://did:plc:abc123/app.bsky.feed.post/3jwdwj2ctlk26"
        );
    }

    #[test]
    fn test_reject_incomplete_uris() {
        for bad in [
            "",
            "https://bsky.app/profile/alice",
            "at://did:plc:abc123",
            "at://did:plc:abc123/app.bsky.feed.post",
            "at://did:plc:abc123/app.bsky.feed.post/",
            "at://did:plc:abc123/app.bsky.feed.post/rkey/extra",
        ] {
            let err = bad.parse::<AtUri>().unwrap_err();
            assert!(matches!(err, AtpError::InvalidUri { .. }), "{bad}");
        }
    }
}
