//! Remote resolver client.
//!
//! Sends the requested dependency set to the resolver endpoint and parses
//! the response envelope into an intermediate package table. This client
//! only resolves; archive downloads live in [`crate::fetch`].

use std::collections::BTreeMap;

use reqwest::{header, Client};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;

use crate::graph::ProjectVersionId;
use crate::types::{Packages, Version};
use crate::USER_AGENT;

pub const FIND_DEPENDENCIES_ENDPOINT: &str = "/api/find_dependencies";
pub const DEFAULT_DATA_PREFIX: &str = "data";

/// Protocol version this client speaks.
const API_VERSION: i64 = 1;

#[derive(Error, Debug)]
pub enum RemoteError {
    /// The server answered with an `error` field; the message is its.
    #[error("{0}")]
    Server(String),

    /// The response does not follow the protocol.
    #[error("{0}")]
    Protocol(String),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// One resolved node as described by the server.
#[derive(Debug, Clone, Deserialize)]
pub struct RemotePackage {
    pub id: ProjectVersionId,
    pub version: String,
    #[serde(default)]
    pub flags: u64,
    pub md5: String,
    #[serde(default)]
    pub dependencies: Vec<ProjectVersionId>,
}

/// The parsed resolver response: the data prefix for archive URLs plus the
/// resolved package table keyed by dotted path.
#[derive(Debug, Clone)]
pub struct ResolvedSet {
    pub data_prefix: String,
    pub packages: BTreeMap<String, RemotePackage>,
}

/// Build the request document: one key per requested dotted path, each
/// holding the requested version.
pub fn build_request(requested: &Packages) -> Value {
    let mut root = serde_json::Map::new();
    for dep in requested.values() {
        root.insert(
            dep.path.to_string(),
            json!({ "version": dep.version.as_str() }),
        );
    }
    Value::Object(root)
}

/// POST the request to the resolver and parse the envelope.
pub async fn find_dependencies(
    client: &Client,
    host: &str,
    requested: &Packages,
) -> Result<ResolvedSet, RemoteError> {
    let url = format!("{host}{FIND_DEPENDENCIES_ENDPOINT}");
    let response = client
        .post(&url)
        .header(header::USER_AGENT, USER_AGENT)
        .json(&build_request(requested))
        .send()
        .await?
        .error_for_status()?;

    let envelope: Value = response.json().await?;
    parse_response(envelope)
}

/// Validate the response envelope and extract the package table.
///
/// A present `error` field wins over everything else in the document.
pub fn parse_response(envelope: Value) -> Result<ResolvedSet, RemoteError> {
    if let Some(error) = envelope.get("error") {
        let message = error
            .as_str()
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Err(RemoteError::Server(message));
    }

    match envelope.get("api").and_then(Value::as_i64) {
        None | Some(0) => {
            return Err(RemoteError::Protocol(
                "api version is missing in the response".to_string(),
            ))
        }
        Some(API_VERSION) => {}
        Some(_) => return Err(RemoteError::Protocol("bad api version".to_string())),
    }

    let data_prefix = envelope
        .get("data_dir")
        .and_then(Value::as_str)
        .unwrap_or(DEFAULT_DATA_PREFIX)
        .to_string();

    let packages = envelope
        .get("packages")
        .cloned()
        .ok_or_else(|| RemoteError::Protocol("package list is missing in the response".to_string()))?;
    let packages: BTreeMap<String, RemotePackage> = serde_json::from_value(packages)
        .map_err(|err| RemoteError::Protocol(format!("malformed package list: {err}")))?;

    Ok(ResolvedSet {
        data_prefix,
        packages,
    })
}

impl RemotePackage {
    pub fn version(&self) -> Version {
        Version::new(&self.version)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Dependency, DependencyFlags, PackagePath};

    fn requested(entries: &[(&str, &str)]) -> Packages {
        entries
            .iter()
            .map(|(path, version)| {
                (
                    path.to_string(),
                    Dependency {
                        path: PackagePath::parse(path),
                        version: Version::new(version),
                        flags: DependencyFlags::empty(),
                    },
                )
            })
            .collect()
    }

    #[test]
    fn request_maps_paths_to_versions() {
        let request = build_request(&requested(&[("org.foo", "1.0.0"), ("org.bar", "*")]));
        assert_eq!(request["org.foo"]["version"], "1.0.0");
        assert_eq!(request["org.bar"]["version"], "*");
    }

    #[test]
    fn server_error_wins_over_everything() {
        let err = parse_response(json!({ "error": "no such package", "api": 1 })).unwrap_err();
        assert!(matches!(err, RemoteError::Server(msg) if msg == "no such package"));
    }

    #[test]
    fn missing_api_version() {
        let err = parse_response(json!({ "packages": {} })).unwrap_err();
        assert!(matches!(err, RemoteError::Protocol(msg) if msg.contains("missing")));

        let err = parse_response(json!({ "api": 0, "packages": {} })).unwrap_err();
        assert!(matches!(err, RemoteError::Protocol(msg) if msg.contains("missing")));
    }

    #[test]
    fn bad_api_version() {
        let err = parse_response(json!({ "api": 2, "packages": {} })).unwrap_err();
        assert!(matches!(err, RemoteError::Protocol(msg) if msg == "bad api version"));
    }

    #[test]
    fn parses_packages_and_default_data_prefix() {
        let set = parse_response(json!({
            "api": 1,
            "packages": {
                "org.foo": {
                    "id": 1,
                    "version": "1.0.0",
                    "flags": 1,
                    "md5": "d41d8cd98f00b204e9800998ecf8427e",
                    "dependencies": [2]
                },
                "org.bar": {
                    "id": 2,
                    "version": "2.0.0",
                    "flags": 0,
                    "md5": "d41d8cd98f00b204e9800998ecf8427e"
                }
            }
        }))
        .unwrap();

        assert_eq!(set.data_prefix, DEFAULT_DATA_PREFIX);
        assert_eq!(set.packages.len(), 2);
        assert_eq!(set.packages["org.foo"].id, 1);
        assert_eq!(set.packages["org.foo"].dependencies, vec![2]);
        assert!(set.packages["org.bar"].dependencies.is_empty());
    }

    #[test]
    fn data_dir_overrides_prefix() {
        let set = parse_response(json!({ "api": 1, "data_dir": "mirror", "packages": {} })).unwrap();
        assert_eq!(set.data_prefix, "mirror");
    }

    #[test]
    fn missing_package_list_is_a_protocol_error() {
        let err = parse_response(json!({ "api": 1 })).unwrap_err();
        assert!(matches!(err, RemoteError::Protocol(_)));
    }
}
