//! Bootstrap metadata handling.
//!
//! Pools may carry instance metadata items; the `kube-env` item is a YAML
//! string map whose `NODE_LABELS` variable contributes labels to simulated
//! nodes. Cloud-init user data arrives base64-encoded from the environment.

use std::collections::BTreeMap;

use base64::prelude::*;
use serde::{Deserialize, Serialize};

use crate::{Result, ScalerError};

/// Metadata key holding the kube-env document.
pub const KUBE_ENV_KEY: &str = "kube-env";

/// kube-env variable listing extra node labels as `k=v,k2=v2`.
pub const NODE_LABELS_VAR: &str = "NODE_LABELS";

/// One instance metadata entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataItem {
    /// Metadata key.
    pub key: String,
    /// Metadata value, if any.
    #[serde(default)]
    pub value: Option<String>,
}

/// Parsed kube-env variables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KubeEnv(BTreeMap<String, String>);

impl KubeEnv {
    /// Find and parse the `kube-env` entry in a metadata list.
    ///
    /// Returns `Ok(None)` when no entry exists.
    ///
    /// # Errors
    ///
    /// Returns an error if the entry has no value or the value is not a YAML
    /// string map.
    pub fn extract(items: &[MetadataItem]) -> Result<Option<Self>> {
        let Some(item) = items.iter().find(|i| i.key == KUBE_ENV_KEY) else {
            return Ok(None);
        };
        let value = item
            .value
            .as_deref()
            .ok_or_else(|| ScalerError::Config("no kube-env content in metadata".to_string()))?;
        Self::parse(value).map(Some)
    }

    /// Parse a kube-env document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document is not a YAML string map.
    pub fn parse(value: &str) -> Result<Self> {
        if value.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str::<BTreeMap<String, String>>(value)
            .map(Self)
            .map_err(|e| ScalerError::Config(format!("error unmarshalling kube-env: {e}")))
    }

    /// Look up a variable.
    #[must_use]
    pub fn var(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }

    /// Labels from `NODE_LABELS`, empty if the variable is unset.
    ///
    /// # Errors
    ///
    /// Returns an error if an entry is not of the form `key=value`.
    pub fn node_labels(&self) -> Result<BTreeMap<String, String>> {
        let Some(raw) = self.var(NODE_LABELS_VAR) else {
            return Ok(BTreeMap::new());
        };

        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|entry| {
                entry
                    .split_once('=')
                    .filter(|(k, _)| !k.is_empty())
                    .map(|(k, v)| (k.to_string(), v.to_string()))
                    .ok_or_else(|| {
                        ScalerError::Config(format!("malformed {NODE_LABELS_VAR} entry: {entry}"))
                    })
            })
            .collect()
    }
}

/// Decode base64 cloud-init user data.
///
/// # Errors
///
/// Returns an error if the input is not valid base64 or not UTF-8.
pub fn decode_user_data(encoded: &str) -> Result<String> {
    let bytes = BASE64_STANDARD
        .decode(encoded.trim())
        .map_err(|e| ScalerError::Config(format!("cloud-init is not valid base64: {e}")))?;
    String::from_utf8(bytes)
        .map_err(|e| ScalerError::Config(format!("cloud-init is not valid UTF-8: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(key: &str, value: Option<&str>) -> MetadataItem {
        MetadataItem {
            key: key.to_string(),
            value: value.map(ToString::to_string),
        }
    }

    #[test]
    fn extract_kube_env() {
        let items = vec![
            item("startup-script", Some("echo hi")),
            item(KUBE_ENV_KEY, Some("CLUSTER_NAME: prod\nNODE_LABELS: tier=web,zone=a\n")),
        ];

        let env = KubeEnv::extract(&items).unwrap().unwrap();
        assert_eq!(env.var("CLUSTER_NAME"), Some("prod"));
        assert_eq!(env.var("MISSING"), None);
    }

    #[test]
    fn extract_without_entry_is_none() {
        let items = vec![item("startup-script", Some("echo hi"))];
        assert_eq!(KubeEnv::extract(&items).unwrap(), None);
        assert_eq!(KubeEnv::extract(&[]).unwrap(), None);
    }

    #[test]
    fn extract_entry_without_value_fails() {
        let items = vec![item(KUBE_ENV_KEY, None)];
        assert!(KubeEnv::extract(&items).is_err());
    }

    #[test]
    fn parse_rejects_malformed_yaml() {
        assert!(KubeEnv::parse("- just\n- a list\n").is_err());
    }

    #[test]
    fn node_labels_parsing() {
        let env = KubeEnv::parse("NODE_LABELS: \"tier=web, zone=a\"").unwrap();
        let labels = env.node_labels().unwrap();
        assert_eq!(labels.get("tier").map(String::as_str), Some("web"));
        assert_eq!(labels.get("zone").map(String::as_str), Some("a"));

        assert!(KubeEnv::default().node_labels().unwrap().is_empty());
        assert!(KubeEnv::parse("NODE_LABELS: novalue")
            .unwrap()
            .node_labels()
            .is_err());
    }

    #[test]
    fn decode_cloud_init() {
        let encoded = BASE64_STANDARD.encode("#cloud-config\nruncmd: []\n");
        assert_eq!(
            decode_user_data(&encoded).unwrap(),
            "#cloud-config\nruncmd: []\n"
        );
        assert!(decode_user_data("%%%").is_err());
    }
}
