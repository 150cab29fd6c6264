use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::IntoDeserializer;
use serde::de::value::{Error as ValueError, StrDeserializer};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SiftError};
use crate::indexing::IndexerConfig;
use crate::search::{DEFAULT_MAX_TOKENS, SearchServiceConfig};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub indexer: IndexerConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
}

impl Config {
    /// Defaults, then the global and project files (or only the explicit
    /// one), then `SIFT_*` environment overrides.
    pub fn load(explicit_path: Option<&Path>, root: &Path) -> Result<Self> {
        let mut config = Self::default();

        let explicit = explicit_path
            .map(PathBuf::from)
            .or_else(|| std::env::var("SIFT_CONFIG").ok().map(PathBuf::from));

        if let Some(path) = explicit {
            if let Some(patch) = Self::load_patch(&path)? {
                config.merge_patch(patch);
            }
        } else {
            if let Some(global) = Self::load_global()? {
                config.merge_patch(global);
            }
            if let Some(project) = Self::load_project(root)? {
                config.merge_patch(project);
            }
        }

        config.apply_overrides(|key| std::env::var(key).ok())?;

        Ok(config)
    }

    /// Parse a TOML document and merge it over the defaults.
    pub fn from_toml(raw: &str) -> Result<Self> {
        let patch = toml::from_str(raw)
            .map_err(|err| SiftError::Config(format!("parse config: {err}")))?;
        let mut config = Self::default();
        config.merge_patch(patch);
        Ok(config)
    }

    fn load_global() -> Result<Option<ConfigPatch>> {
        let path = dirs::config_dir()
            .ok_or_else(|| SiftError::MissingConfig("config directory not found".to_string()))?
            .join("sift/config.toml");
        Self::load_patch(&path)
    }

    fn load_project(root: &Path) -> Result<Option<ConfigPatch>> {
        let path = root.join("config.toml");
        Self::load_patch(&path)
    }

    fn load_patch(path: &Path) -> Result<Option<ConfigPatch>> {
        let Some(raw) = crate::utils::read_optional(path)? else {
            return Ok(None);
        };
        let patch = toml::from_str(&raw)
            .map_err(|err| SiftError::Config(format!("parse config {}: {err}", path.display())))?;
        Ok(Some(patch))
    }

    fn merge_patch(&mut self, patch: ConfigPatch) {
        if let Some(patch) = patch.indexer {
            merge_indexer(&mut self.indexer, patch);
        }
        if let Some(patch) = patch.search {
            self.search.merge(patch);
        }
        if let Some(patch) = patch.embedding {
            self.embedding.merge(patch);
        }
    }

    /// Apply `SIFT_*` overrides read through `lookup`.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let env = Env(&lookup);

        if let Some(value) = env.usize("SIFT_INDEXER_BATCH_SIZE")? {
            self.indexer.batch_size = value;
        }
        if let Some(value) = env.u32("SIFT_INDEXER_RETRY_ATTEMPTS")? {
            self.indexer.retry_attempts = value;
        }
        if let Some(value) = env.duration("SIFT_INDEXER_RETRY_BASE_DELAY")? {
            self.indexer.retry_base_delay = value;
        }

        if let Some(value) = env.f32("SIFT_SEARCH_MIN_SIMILARITY")? {
            self.search.min_similarity = value;
        }
        if let Some(value) = env.usize("SIFT_SEARCH_MAX_RESULTS")? {
            self.search.max_results = value;
        }
        if let Some(value) = env.usize("SIFT_SEARCH_MAX_SNIPPETS")? {
            self.search.max_snippets = value;
        }
        if let Some(value) = env.bool("SIFT_SEARCH_USE_EMBEDDINGS") {
            self.search.use_embeddings = value;
        }

        if let Some(value) = env.usize("SIFT_EMBEDDING_DIMS")? {
            self.embedding.dims = value;
        }
        if let Some(value) = env.usize("SIFT_EMBEDDING_MAX_TOKENS")? {
            self.embedding.max_tokens = value;
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default)]
    pub min_similarity: f32,
    #[serde(default)]
    pub max_results: usize,
    #[serde(default)]
    pub max_snippets: usize,
    #[serde(default)]
    pub use_embeddings: bool,
}

impl Default for SearchConfig {
    fn default() -> Self {
        let service = SearchServiceConfig::default();
        Self {
            min_similarity: service.min_similarity,
            max_results: service.max_results,
            max_snippets: service.max_snippets,
            use_embeddings: true,
        }
    }
}

impl SearchConfig {
    fn merge(&mut self, patch: SearchPatch) {
        if let Some(value) = patch.min_similarity {
            self.min_similarity = value;
        }
        if let Some(value) = patch.max_results {
            self.max_results = value;
        }
        if let Some(value) = patch.max_snippets {
            self.max_snippets = value;
        }
        if let Some(value) = patch.use_embeddings {
            self.use_embeddings = value;
        }
    }

    #[must_use]
    pub fn service_config(&self) -> SearchServiceConfig {
        SearchServiceConfig {
            min_similarity: self.min_similarity,
            max_results: self.max_results,
            max_snippets: self.max_snippets,
        }
        .normalized()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    #[serde(default)]
    pub dims: usize,
    #[serde(default)]
    pub max_tokens: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            dims: 384,
            max_tokens: DEFAULT_MAX_TOKENS,
        }
    }
}

impl EmbeddingConfig {
    fn merge(&mut self, patch: EmbeddingPatch) {
        if let Some(value) = patch.dims {
            self.dims = value;
        }
        if let Some(value) = patch.max_tokens {
            self.max_tokens = value;
        }
    }
}

fn merge_indexer(config: &mut IndexerConfig, patch: IndexerPatch) {
    if let Some(value) = patch.batch_size {
        config.batch_size = value;
    }
    if let Some(value) = patch.retry_attempts {
        config.retry_attempts = value;
    }
    if let Some(value) = patch.retry_base_delay {
        config.retry_base_delay = value;
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigPatch {
    pub indexer: Option<IndexerPatch>,
    pub search: Option<SearchPatch>,
    pub embedding: Option<EmbeddingPatch>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct IndexerPatch {
    pub batch_size: Option<usize>,
    pub retry_attempts: Option<u32>,
    #[serde(default, with = "humantime_serde")]
    pub retry_base_delay: Option<Duration>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct SearchPatch {
    pub min_similarity: Option<f32>,
    pub max_results: Option<usize>,
    pub max_snippets: Option<usize>,
    pub use_embeddings: Option<bool>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct EmbeddingPatch {
    pub dims: Option<usize>,
    pub max_tokens: Option<usize>,
}

struct Env<'a, F: Fn(&str) -> Option<String>>(&'a F);

impl<F: Fn(&str) -> Option<String>> Env<'_, F> {
    fn bool(&self, key: &str) -> Option<bool> {
        (self.0)(key).map(|value| {
            matches!(
                value.to_lowercase().as_str(),
                "1" | "true" | "yes" | "on"
            )
        })
    }

    fn u32(&self, key: &str) -> Result<Option<u32>> {
        self.parsed(key)
    }

    fn usize(&self, key: &str) -> Result<Option<usize>> {
        self.parsed(key)
    }

    fn f32(&self, key: &str) -> Result<Option<f32>> {
        self.parsed(key)
    }

    fn parsed<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match (self.0)(key) {
            Some(value) => value.trim().parse::<T>().map(Some).map_err(|err| {
                SiftError::Config(format!("invalid {key} value {value}: {err}"))
            }),
            None => Ok(None),
        }
    }

    /// Humantime durations such as `250ms` or `2s`.
    fn duration(&self, key: &str) -> Result<Option<Duration>> {
        let Some(value) = (self.0)(key) else {
            return Ok(None);
        };
        let de: StrDeserializer<'_, ValueError> = value.trim().into_deserializer();
        humantime_serde::deserialize(de)
            .map(Some)
            .map_err(|err| SiftError::Config(format!("invalid {key} value {value}: {err}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = Config::from_toml(
            r#"
            [indexer]
            batch_size = 10
            retry_base_delay = "250ms"

            [search]
            use_embeddings = false
            "#,
        )
        .unwrap();

        assert_eq!(config.indexer.batch_size, 10);
        assert_eq!(config.indexer.retry_base_delay, Duration::from_millis(250));
        assert_eq!(config.indexer.retry_attempts, 3);
        assert!(!config.search.use_embeddings);
        assert_eq!(config.search.max_results, 50);
        assert_eq!(config.embedding, EmbeddingConfig::default());
    }

    #[test]
    fn test_unknown_section_is_rejected() {
        assert!(matches!(
            Config::from_toml("[cache]\nenabled = true\n"),
            Err(SiftError::Config(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_overrides(lookup(&[
                ("SIFT_INDEXER_BATCH_SIZE", "7"),
                ("SIFT_INDEXER_RETRY_BASE_DELAY", "2s"),
                ("SIFT_SEARCH_MIN_SIMILARITY", "0.25"),
                ("SIFT_SEARCH_USE_EMBEDDINGS", "off"),
                ("SIFT_EMBEDDING_DIMS", "64"),
            ]))
            .unwrap();

        assert_eq!(config.indexer.batch_size, 7);
        assert_eq!(config.indexer.retry_base_delay, Duration::from_secs(2));
        assert!((config.search.min_similarity - 0.25).abs() < f32::EPSILON);
        assert!(!config.search.use_embeddings);
        assert_eq!(config.embedding.dims, 64);
    }

    #[test]
    fn test_invalid_env_value_is_config_error() {
        let mut config = Config::default();
        let err = config
            .apply_overrides(lookup(&[("SIFT_SEARCH_MAX_RESULTS", "many")]))
            .unwrap_err();
        assert!(err.to_string().contains("SIFT_SEARCH_MAX_RESULTS"));

        let err = config
            .apply_overrides(lookup(&[("SIFT_INDEXER_RETRY_BASE_DELAY", "soon")]))
            .unwrap_err();
        assert!(matches!(err, SiftError::Config(_)));
    }

    #[test]
    fn test_service_config_normalizes() {
        let search = SearchConfig {
            min_similarity: 0.0,
            max_results: 0,
            max_snippets: 5,
            use_embeddings: true,
        };
        let service = search.service_config();
        assert!((service.min_similarity - 0.6).abs() < f32::EPSILON);
        assert_eq!(service.max_results, 50);
        assert_eq!(service.max_snippets, 5);
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[embedding]\nmax_tokens = 100\n").unwrap();
        let config = Config::load(Some(&path), dir.path()).unwrap();
        assert_eq!(config.embedding.max_tokens, 100);
    }
}
