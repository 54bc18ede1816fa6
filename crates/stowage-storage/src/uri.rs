use std::fmt;
use std::str::FromStr;

use stowage_core::error::{Result, StowageError};

/// A parsed `<scheme>://<bucket>[/<prefix>]` target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetUri {
    pub scheme: String,
    /// Bucket name, or the root directory for `file://` targets.
    pub bucket: String,
    /// Key prefix prepended verbatim to every object name.
    pub prefix: String,
}

impl TargetUri {
    pub fn parse(uri: &str) -> Result<Self> {
        let (scheme, rest) = uri
            .split_once("://")
            .ok_or_else(|| StowageError::InvalidUri(uri.to_string()))?;
        if scheme.is_empty() || !scheme.chars().all(|c| c.is_ascii_alphanumeric() || c == '+') {
            return Err(StowageError::InvalidUri(uri.to_string()));
        }
        let scheme = scheme.to_ascii_lowercase();

        // The whole path of a file target names its root directory.
        if scheme == "file" {
            if rest.is_empty() {
                return Err(StowageError::InvalidUri(uri.to_string()));
            }
            return Ok(Self {
                scheme,
                bucket: rest.to_string(),
                prefix: String::new(),
            });
        }

        let (bucket, prefix) = rest.split_once('/').unwrap_or((rest, ""));
        if bucket.is_empty() {
            return Err(StowageError::InvalidUri(uri.to_string()));
        }
        if prefix.starts_with('/') {
            return Err(StowageError::InvalidPrefix(prefix.to_string()));
        }

        Ok(Self {
            scheme,
            bucket: bucket.to_string(),
            prefix: prefix.to_string(),
        })
    }

    /// Full object key for a name relative to the prefix.
    pub fn key_for(&self, name: &str) -> String {
        format!("{}{}", self.prefix, name)
    }
}

impl FromStr for TargetUri {
    type Err = StowageError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for TargetUri {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.prefix.is_empty() {
            write!(f, "{}://{}", self.scheme, self.bucket)
        } else {
            write!(f, "{}://{}/{}", self.scheme, self.bucket, self.prefix)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bucket_only() {
        let uri = TargetUri::parse("s3://bucket_name").unwrap();
        assert_eq!(uri.scheme, "s3");
        assert_eq!(uri.bucket, "bucket_name");
        assert_eq!(uri.prefix, "");
    }

    #[test]
    fn bucket_and_prefix() {
        let uri: TargetUri = "s3://goodbucket/prefix".parse().unwrap();
        assert_eq!(uri.bucket, "goodbucket");
        assert_eq!(uri.prefix, "prefix");
        assert_eq!(uri.key_for("vol1"), "prefixvol1");

        let uri = TargetUri::parse("s3://goodbucket/nightly/pool/").unwrap();
        assert_eq!(uri.prefix, "nightly/pool/");
        assert_eq!(uri.key_for("vol1"), "nightly/pool/vol1");
    }

    #[test]
    fn file_target_keeps_whole_path() {
        let uri = TargetUri::parse("file:///srv/backups/zfs").unwrap();
        assert_eq!(uri.scheme, "file");
        assert_eq!(uri.bucket, "/srv/backups/zfs");
        assert_eq!(uri.prefix, "");
    }

    #[test]
    fn malformed_uris() {
        for bad in ["", "bucket", "://bucket", "s3://", "s3:///prefix", "s 3://bucket"] {
            assert!(
                matches!(TargetUri::parse(bad), Err(StowageError::InvalidUri(_))),
                "{bad:?} should be rejected"
            );
        }
    }

    #[test]
    fn prefix_must_not_start_with_slash() {
        assert!(matches!(
            TargetUri::parse("s3://bucket//double"),
            Err(StowageError::InvalidPrefix(_))
        ));
    }

    #[test]
    fn display_roundtrip() {
        for uri in ["s3://bucket", "s3://bucket/a/b/"] {
            assert_eq!(TargetUri::parse(uri).unwrap().to_string(), uri);
        }
    }
}
