//! `aztunnel clusters`: print the cluster names found in the kubeconfig.
//!
//! All `KUBECONFIG` entries are merged, as kubectl does.

use std::io::Write;
use std::path::PathBuf;

use anyhow::{Context, Result};
use aztunnel_core::KubeConfig;

pub fn run() -> Result<()> {
    let paths = KubeConfig::search_paths()?;
    let stdout = std::io::stdout();
    list(&paths, &mut stdout.lock())
}

fn list(paths: &[PathBuf], out: &mut impl Write) -> Result<()> {
    let names = KubeConfig::merged_cluster_names(paths).context("cannot load kubeconfig")?;
    for name in names {
        writeln!(out, "{name}")?;
    }
    Ok(())
}
