//! Dump location parsing
//!
//! Supported forms:
//!
//! - `/path/to/dir`, `./dir` or `file:///path/to/dir` for the local filesystem
//! - `s3://bucket/prefix` for Amazon S3 and S3-compatible stores
//! - `oci://bucket/prefix` for OCI Object Storage (namespace and region from options)
//! - `azure://container/prefix` for Azure Blob Storage
//! - `https://objectstorage.<region>.oraclecloud.com/p/<token>/n/<ns>/b/<bucket>/o/<prefix>/`
//!   for an OCI pre-authenticated request (PAR)

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use url::Url;

use crate::error::{Error, Result};

/// Options that select and authenticate a remote store
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageOptions {
    /// AWS profile name
    pub s3_profile: Option<String>,
    /// AWS region
    pub s3_region: Option<String>,
    /// Endpoint of an S3-compatible service
    pub s3_endpoint_override: Option<String>,
    /// Path of the AWS shared credentials file
    pub s3_credentials_file: Option<String>,
    /// Path of the AWS config file
    pub s3_config_file: Option<String>,
    /// OCI Object Storage namespace
    pub os_namespace: Option<String>,
    /// OCI region
    pub oci_region: Option<String>,
    /// Azure storage account
    pub azure_storage_account: Option<String>,
    /// Azure shared access signature
    pub azure_storage_sas_token: Option<String>,
}

/// Kind of pre-authenticated request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParKind {
    /// Grants access to every object below a prefix (URL ends with `/`)
    Prefix,
    /// Grants access to one object
    Object,
}

/// A parsed OCI pre-authenticated request URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParUrl {
    /// `https://host/p/<token>/n/<ns>/b/<bucket>/o/`
    pub base: String,
    /// Object name or prefix after `/o/`
    pub object: String,
    /// Bucket name
    pub bucket: String,
    /// Namespace
    pub namespace: String,
    pub kind: ParKind,
}

impl ParUrl {
    /// Recognize a PAR by scheme, host and path shape
    pub fn parse(raw: &str) -> Option<Self> {
        let url = Url::parse(raw).ok()?;
        if url.scheme() != "https" {
            return None;
        }
        if !url.host_str()?.contains("objectstorage") {
            return None;
        }

        let path = url.path();
        let segments: Vec<&str> = path.trim_start_matches('/').splitn(8, '/').collect();
        if segments.len() < 7
            || segments[0] != "p"
            || segments[1].is_empty()
            || segments[2] != "n"
            || segments[4] != "b"
            || segments[6] != "o"
        {
            return None;
        }
        let object = segments.get(7).copied().unwrap_or_default().to_string();
        let base_path = format!(
            "/p/{}/n/{}/b/{}/o/",
            segments[1], segments[3], segments[5]
        );
        let kind = if object.is_empty() || object.ends_with('/') {
            ParKind::Prefix
        } else {
            ParKind::Object
        };

        Some(Self {
            base: format!("https://{}{}", url.host_str()?, base_path),
            object,
            bucket: segments[5].to_string(),
            namespace: segments[3].to_string(),
            kind,
        })
    }

    /// URL of the prefix this PAR grants access to
    pub fn prefix_url(&self) -> String {
        format!("{}{}", self.base, self.object)
    }
}

/// Where a dump lives
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Location {
    Local { path: PathBuf },
    S3 { bucket: String, prefix: String },
    Oci { bucket: String, prefix: String },
    Azure { container: String, prefix: String },
    Par(ParUrl),
}

impl Location {
    /// Parse a location string
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::config("The output/input location cannot be empty"));
        }

        if let Some(par) = ParUrl::parse(raw) {
            return match par.kind {
                ParKind::Prefix => Ok(Self::Par(par)),
                ParKind::Object => Err(Error::config(format!(
                    "The given URL is not a prefix PAR, it must end with '/': {}",
                    redact_par(raw)
                ))),
            };
        }

        let Some((scheme, rest)) = raw.split_once("://") else {
            return Ok(Self::Local {
                path: PathBuf::from(raw),
            });
        };

        match scheme.to_ascii_lowercase().as_str() {
            "file" => Ok(Self::Local {
                path: PathBuf::from(rest),
            }),
            "s3" => {
                let (bucket, prefix) = split_bucket(raw, rest)?;
                Ok(Self::S3 { bucket, prefix })
            }
            "oci" | "oci+os" => {
                let (bucket, prefix) = split_bucket(raw, rest)?;
                Ok(Self::Oci { bucket, prefix })
            }
            "azure" | "az" => {
                let (container, prefix) = split_bucket(raw, rest)?;
                Ok(Self::Azure { container, prefix })
            }
            "http" | "https" => Err(Error::config(format!(
                "Unsupported URL, only OCI pre-authenticated request URLs are accepted: {}",
                redact_par(raw)
            ))),
            other => Err(Error::config(format!("Unsupported URL scheme '{}'", other))),
        }
    }

    /// Whether the location is on the local filesystem
    pub fn is_local(&self) -> bool {
        matches!(self, Self::Local { .. })
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local { path } => write!(f, "{}", path.display()),
            Self::S3 { bucket, prefix } => write!(f, "s3://{}/{}", bucket, prefix),
            Self::Oci { bucket, prefix } => write!(f, "oci://{}/{}", bucket, prefix),
            Self::Azure { container, prefix } => write!(f, "azure://{}/{}", container, prefix),
            Self::Par(par) => write!(f, "{}", redact_par(&par.prefix_url())),
        }
    }
}

fn split_bucket(raw: &str, rest: &str) -> Result<(String, String)> {
    let (bucket, prefix) = rest.split_once('/').unwrap_or((rest, ""));
    if bucket.is_empty() {
        return Err(Error::config(format!("Missing bucket name in '{}'", raw)));
    }
    Ok((
        bucket.to_string(),
        prefix.trim_matches('/').to_string(),
    ))
}

/// Hide the PAR token in messages
pub fn redact_par(raw: &str) -> String {
    match raw.find("/p/") {
        Some(start) => {
            let token_start = start + 3;
            match raw[token_start..].find('/') {
                Some(len) => format!("{}<redacted>{}", &raw[..token_start], &raw[token_start + len..]),
                None => raw.to_string(),
            }
        }
        None => raw.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PREFIX_PAR: &str =
        "https://objectstorage.us-ashburn-1.oraclecloud.com/p/abcDEF/n/ns1/b/dumps/o/world/";

    #[test]
    fn test_local_paths() {
        assert_eq!(
            Location::parse("/tmp/dump").unwrap(),
            Location::Local {
                path: "/tmp/dump".into()
            }
        );
        assert_eq!(
            Location::parse("file:///tmp/dump").unwrap(),
            Location::Local {
                path: "/tmp/dump".into()
            }
        );
        assert!(Location::parse("dump").unwrap().is_local());
        assert!(Location::parse("  ").is_err());
    }

    #[test]
    fn test_cloud_urls() {
        assert_eq!(
            Location::parse("s3://bucket/a/b/").unwrap(),
            Location::S3 {
                bucket: "bucket".into(),
                prefix: "a/b".into()
            }
        );
        assert_eq!(
            Location::parse("azure://c").unwrap(),
            Location::Azure {
                container: "c".into(),
                prefix: "".into()
            }
        );
        assert!(Location::parse("s3:///x").is_err());
        assert!(Location::parse("ftp://h/x").is_err());
    }

    #[test]
    fn test_prefix_par() {
        let par = ParUrl::parse(PREFIX_PAR).unwrap();
        assert_eq!(par.kind, ParKind::Prefix);
        assert_eq!(par.bucket, "dumps");
        assert_eq!(par.namespace, "ns1");
        assert_eq!(par.object, "world/");
        assert_eq!(par.prefix_url(), PREFIX_PAR);
        assert!(matches!(Location::parse(PREFIX_PAR).unwrap(), Location::Par(_)));
    }

    #[test]
    fn test_object_par_rejected_as_location() {
        let raw = "https://objectstorage.us-ashburn-1.oraclecloud.com/p/tok/n/ns/b/bk/o/file.tsv";
        assert_eq!(ParUrl::parse(raw).unwrap().kind, ParKind::Object);
        let err = Location::parse(raw).unwrap_err().to_string();
        assert!(err.contains("must end with '/'"));
        assert!(!err.contains("tok"));
    }

    #[test]
    fn test_not_a_par() {
        assert!(ParUrl::parse("https://example.com/p/t/n/ns/b/b/o/").is_none());
        assert!(ParUrl::parse("http://objectstorage.x.com/p/t/n/ns/b/b/o/").is_none());
        assert!(ParUrl::parse("https://objectstorage.x.com/q/t/n/ns/b/b/o/").is_none());
    }
}
