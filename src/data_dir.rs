//! On-disk home of a docgraph installation.
//!
//! ```text
//! <root>/
//!   config.redb   settings and ingested-document records
//!   graph.redb    chunks, embeddings, entities and their edges
//!   tantivy/      full-text index over chunk text
//! ```

use std::{
    ffi::OsString,
    fmt,
    path::{Path, PathBuf},
};

use serde::Serialize;

use crate::error::{Error, Result};

pub const DATA_DIR_ENV: &str = "DOCGRAPH_DATA_DIR";

const XDG_PREFIX: &str = "docgraph";
const CONFIG_DB: &str = "config.redb";
const GRAPH_DB: &str = "graph.redb";
const TANTIVY_DIR: &str = "tantivy";

/// Which setting picked the root directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RootSource {
    Flag,
    Env,
    Xdg,
}

impl fmt::Display for RootSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RootSource::Flag => f.write_str("--data-dir"),
            RootSource::Env => f.write_str(DATA_DIR_ENV),
            RootSource::Xdg => f.write_str("XDG data home"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DataDir {
    root: PathBuf,
    source: RootSource,
}

impl DataDir {
    /// Pick the root (`--data-dir`, then `DOCGRAPH_DATA_DIR`, then
    /// `$XDG_DATA_HOME/docgraph`) and create it if needed.
    ///
    /// An empty `DOCGRAPH_DATA_DIR` counts as unset.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let (root, source) = match choose_root(explicit, std::env::var_os(DATA_DIR_ENV)) {
            Some(chosen) => chosen,
            None => (xdg_data_home()?, RootSource::Xdg),
        };
        ensure_dir(&root)?;
        Ok(Self { root, source })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn source(&self) -> RootSource {
        self.source
    }

    pub fn config_db(&self) -> PathBuf {
        self.root.join(CONFIG_DB)
    }

    pub fn graph_db(&self) -> PathBuf {
        self.root.join(GRAPH_DB)
    }

    /// The full-text index directory, created on first use.
    pub fn tantivy_dir(&self) -> Result<PathBuf> {
        let path = self.root.join(TANTIVY_DIR);
        ensure_dir(&path)?;
        Ok(path)
    }
}

fn choose_root(
    explicit: Option<&Path>,
    env: Option<OsString>,
) -> Option<(PathBuf, RootSource)> {
    if let Some(path) = explicit {
        return Some((path.to_path_buf(), RootSource::Flag));
    }
    env.filter(|value| !value.is_empty())
        .map(|value| (PathBuf::from(value), RootSource::Env))
}

fn xdg_data_home() -> Result<PathBuf> {
    xdg::BaseDirectories::with_prefix(XDG_PREFIX)
        .get_data_home()
        .ok_or_else(|| Error::Config("no XDG data home for docgraph".into()))
}

fn ensure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|_| Error::DataDir(path.to_path_buf()))
}
