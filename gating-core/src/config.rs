use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};
use crate::matrix::PlanCatalog;

#[derive(Debug, Clone, Deserialize)]
pub struct GatingConfig {
    pub paths: PathsSection,
    #[serde(default)]
    pub catalog: CatalogSection,
}

impl GatingConfig {
    pub fn resolve_path<P: AsRef<Path>>(&self, candidate: P) -> PathBuf {
        let path = candidate.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.paths.base_dir).join(path)
        }
    }

    pub fn plans_dir(&self) -> PathBuf {
        self.resolve_path(&self.paths.plans_dir)
    }

    /// The popular/active allow-lists as an injectable catalog.
    pub fn catalog(&self) -> PlanCatalog {
        PlanCatalog::new(
            self.catalog.popular.iter().cloned(),
            self.catalog.active.iter().cloned(),
        )
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    pub base_dir: String,
    pub plans_dir: String,
}

/// Allow-lists driving the default popularity and activity flags of loaded
/// plans. Plans absent from both lists load as inactive and not popular.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CatalogSection {
    #[serde(default)]
    pub popular: Vec<String>,
    #[serde(default)]
    pub active: Vec<String>,
}

pub fn load_gating_config<P: AsRef<Path>>(path: P) -> Result<GatingConfig> {
    load_toml(path)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
