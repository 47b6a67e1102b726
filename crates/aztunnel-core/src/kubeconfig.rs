//! Kubeconfig cluster entries.
//!
//! The document is edited as a [`serde_yaml::Value`] so that users, contexts
//! and any fields we don't know about survive a rewrite untouched.

use serde_yaml::{Mapping, Value};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::error::{TunnelError, TunnelResult};

/// A kubeconfig file loaded in memory.
#[derive(Debug, Clone)]
pub struct KubeConfig {
    path: PathBuf,
    doc: Value,
}

impl KubeConfig {
    /// Every file kubectl reads: the non-empty `KUBECONFIG` entries in order,
    /// else `~/.kube/config`.
    pub fn search_paths() -> TunnelResult<Vec<PathBuf>> {
        if let Some(paths) = std::env::var_os("KUBECONFIG") {
            let paths: Vec<PathBuf> = std::env::split_paths(&paths)
                .filter(|p| !p.as_os_str().is_empty())
                .collect();
            if !paths.is_empty() {
                return Ok(paths);
            }
        }
        let home = dirs::home_dir()
            .ok_or_else(|| TunnelError::KubeConfig("cannot determine home directory".into()))?;
        Ok(vec![home.join(".kube").join("config")])
    }

    /// File that receives cluster updates: the first search path.
    pub fn default_path() -> TunnelResult<PathBuf> {
        Self::search_paths()?
            .into_iter()
            .next()
            .ok_or_else(|| TunnelError::KubeConfig("no kubeconfig path".into()))
    }

    /// Cluster names across `paths`, first occurrence wins.
    pub fn merged_cluster_names(paths: &[PathBuf]) -> TunnelResult<Vec<String>> {
        let mut names: Vec<String> = Vec::new();
        for path in paths {
            for name in Self::load(path)?.cluster_names() {
                if !names.contains(&name) {
                    names.push(name);
                }
            }
        }
        Ok(names)
    }

    /// Load the kubeconfig at `path`. A missing file yields an empty config.
    pub fn load(path: impl Into<PathBuf>) -> TunnelResult<Self> {
        let path = path.into();
        if !path.exists() {
            debug!(path = %path.display(), "kubeconfig not found, starting empty");
            return Ok(Self { path, doc: empty_document() });
        }
        let content = std::fs::read_to_string(&path)?;
        let doc = if content.trim().is_empty() {
            empty_document()
        } else {
            serde_yaml::from_str(&content).map_err(|e| {
                TunnelError::KubeConfig(format!("cannot parse {}: {e}", path.display()))
            })?
        };
        if !doc.is_mapping() {
            return Err(TunnelError::KubeConfig(format!(
                "{} is not a kubeconfig document",
                path.display()
            )));
        }
        Ok(Self { path, doc })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Names of all cluster entries, in file order.
    pub fn cluster_names(&self) -> Vec<String> {
        self.clusters()
            .map(|seq| {
                seq.iter()
                    .filter_map(|c| c.get("name").and_then(Value::as_str))
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Server URL of a cluster entry, if present.
    pub fn cluster_server(&self, name: &str) -> Option<&str> {
        self.clusters()?
            .iter()
            .find(|c| c.get("name").and_then(Value::as_str) == Some(name))?
            .get("cluster")?
            .get("server")?
            .as_str()
    }

    /// Create or update the cluster entry `name`.
    ///
    /// Other keys of an existing entry (CA data, extensions) are kept.
    pub fn set_cluster(&mut self, name: &str, insecure_skip_tls_verify: bool, server: &str) -> TunnelResult<()> {
        let root = self
            .doc
            .as_mapping_mut()
            .ok_or_else(|| TunnelError::KubeConfig("document root is not a mapping".into()))?;
        let clusters = root
            .entry(Value::from("clusters"))
            .or_insert_with(|| Value::Sequence(Vec::new()));
        if clusters.is_null() {
            *clusters = Value::Sequence(Vec::new());
        }
        let seq = clusters
            .as_sequence_mut()
            .ok_or_else(|| TunnelError::KubeConfig("'clusters' is not a list".into()))?;

        let index = match seq
            .iter()
            .position(|c| c.get("name").and_then(Value::as_str) == Some(name))
        {
            Some(i) => i,
            None => {
                let mut entry = Mapping::new();
                entry.insert("name".into(), name.into());
                entry.insert("cluster".into(), Value::Mapping(Mapping::new()));
                seq.push(Value::Mapping(entry));
                seq.len() - 1
            }
        };

        let entry = seq[index]
            .as_mapping_mut()
            .ok_or_else(|| TunnelError::KubeConfig(format!("cluster '{name}' is malformed")))?;
        let cluster = entry
            .entry(Value::from("cluster"))
            .or_insert_with(|| Value::Mapping(Mapping::new()));
        if cluster.is_null() {
            *cluster = Value::Mapping(Mapping::new());
        }
        let cluster = cluster
            .as_mapping_mut()
            .ok_or_else(|| TunnelError::KubeConfig(format!("cluster '{name}' is malformed")))?;

        cluster.insert("server".into(), server.into());
        if insecure_skip_tls_verify {
            cluster.insert("insecure-skip-tls-verify".into(), true.into());
        } else {
            cluster.remove("insecure-skip-tls-verify");
        }
        Ok(())
    }

    /// Write the document back to its path, creating parent directories.
    pub fn save(&self) -> TunnelResult<()> {
        let content = serde_yaml::to_string(&self.doc)
            .map_err(|e| TunnelError::KubeConfig(format!("cannot serialize kubeconfig: {e}")))?;
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&self.path, content)?;
        info!(path = %self.path.display(), "kubeconfig saved");
        Ok(())
    }

    fn clusters(&self) -> Option<&Vec<Value>> {
        self.doc.get("clusters")?.as_sequence()
    }
}

fn empty_document() -> Value {
    let mut root = Mapping::new();
    root.insert("apiVersion".into(), "v1".into());
    root.insert("kind".into(), "Config".into());
    root.insert("clusters".into(), Value::Sequence(Vec::new()));
    Value::Mapping(root)
}
