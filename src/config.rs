use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::loader::LoaderConfig;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

/// catalog-pool.toml
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub loader: LoaderConfig,
    pub catalog: CatalogConfig,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub port: u16,
    /// /search 未带 limit 时的默认返回条数
    pub default_limit: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 6060,
            default_limit: 100,
        }
    }
}

/// 设置项目录
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    /// id -> 是否可配置；未列出的 id 视为可配置
    pub configurable: HashMap<String, bool>,
    pub pages: Vec<PageEntry>,
    pub sections: Vec<SectionEntry>,
    pub synonyms: Vec<SynonymEntry>,
    /// id -> 解释文本（以 `<id>_EXPLANATION` 作为同义词 id）
    pub explanations: HashMap<String, String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PageEntry {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub selector: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SectionEntry {
    pub page: String,
    #[serde(default)]
    pub section: String,
    #[serde(default)]
    pub items: Vec<ItemEntry>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ItemEntry {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub selector: String,
    pub priority: Option<i32>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SynonymEntry {
    pub id: String,
    pub synonym_id: String,
    pub text: String,
}

impl Config {
    pub fn from_toml(raw: &str, origin: &str) -> Result<Self, ConfigError> {
        toml::from_str(raw).map_err(|source| ConfigError::Parse {
            path: origin.to_string(),
            source,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let origin = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: origin.clone(),
            source,
        })?;
        let cfg = Self::from_toml(&raw, &origin)?;
        tracing::info!(
            "Loaded config {}: {} pages, {} sections",
            origin,
            cfg.catalog.pages.len(),
            cfg.catalog.sections.len()
        );
        Ok(cfg)
    }

    /// 缺省配置文件不存在时回退为默认值
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::warn!("Config {} not found, using defaults", path.display());
            Ok(Self::default())
        }
    }
}
