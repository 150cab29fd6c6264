use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;

use crate::cli::Cli;
use crate::cli::output::OutputMode;
use crate::config::Config;
use crate::error::{Result, SiftError};
use crate::indexing::{BackgroundIndexer, IndexerConfig};
use crate::search::{HashEmbedder, HashVectorStore, SearchService, VectorStore};
use crate::storage::{Database, SkillStore};

pub struct AppContext {
    pub root: PathBuf,
    pub config: Config,
    pub db: Arc<Database>,
    pub vectors: Arc<HashVectorStore>,
    pub output_mode: OutputMode,
    pub verbosity: u8,
}

impl AppContext {
    pub fn from_cli(cli: &Cli) -> Result<Self> {
        let root = Self::find_root()?;
        crate::utils::ensure_dir(&root)?;
        let config = Config::load(cli.config.as_deref(), &root)?;
        Self::open(root, config, cli.output_mode(), cli.verbose)
    }

    /// Open the stores under `root` with an already loaded config.
    pub fn open(
        root: PathBuf,
        config: Config,
        output_mode: OutputMode,
        verbosity: u8,
    ) -> Result<Self> {
        debug!(root = %root.display(), "opening data root");
        let db = Database::open(root.join("skills.db"))?;
        let embedder = Arc::new(HashEmbedder::new(config.embedding.dims));
        let vectors = HashVectorStore::open(
            root.join("vectors.db"),
            embedder,
            config.embedding.max_tokens,
        )?;

        Ok(Self {
            root,
            config,
            db: Arc::new(db),
            vectors: Arc::new(vectors),
            output_mode,
            verbosity,
        })
    }

    #[must_use]
    pub const fn robot_mode(&self) -> bool {
        matches!(self.output_mode, OutputMode::Robot)
    }

    /// Search over both stores; semantic search is left out when embeddings
    /// are disabled.
    #[must_use]
    pub fn search_service(&self) -> SearchService {
        let vectors = self
            .config
            .search
            .use_embeddings
            .then(|| Arc::clone(&self.vectors) as Arc<dyn VectorStore>);
        SearchService::new(
            Arc::clone(&self.db) as Arc<dyn SkillStore>,
            vectors,
            self.config.search.service_config(),
        )
    }

    #[must_use]
    pub fn background_indexer(&self, config: IndexerConfig) -> BackgroundIndexer {
        BackgroundIndexer::new(
            Arc::clone(&self.db) as Arc<dyn SkillStore>,
            Arc::clone(&self.vectors) as Arc<dyn VectorStore>,
            config,
        )
    }

    /// Release the vector store. Owned by the context, closed once.
    pub fn close(&self) -> Result<()> {
        self.vectors.close()
    }

    fn find_root() -> Result<PathBuf> {
        if let Ok(root) = std::env::var("SIFT_ROOT") {
            return Ok(PathBuf::from(root));
        }
        let cwd = std::env::current_dir()?;
        if let Some(found) = find_upwards(&cwd, ".sift") {
            return Ok(found);
        }

        let data_dir = dirs::data_dir()
            .ok_or_else(|| SiftError::MissingConfig("data directory not found".to_string()))?;
        Ok(data_dir.join("sift"))
    }
}

fn find_upwards(start: &Path, name: &str) -> Option<PathBuf> {
    start
        .ancestors()
        .map(|dir| dir.join(name))
        .find(|candidate| candidate.is_dir())
}
