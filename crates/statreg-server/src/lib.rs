//! Process wiring for the register: configuration, backend selection, the
//! HTTP application and the JSON-lines import reader.

use std::{path::PathBuf, sync::Arc};

use anyhow::Context as _;
use axum::Router;
use serde::Deserialize;
use statreg_core::{
  document::{ElasticDocument, SearchPage, SearchQuery},
  hooks::IdentityContext,
  ids::UnitKey,
  index::SearchIndexClient,
  unit::Unit,
};
use statreg_engine::{BulkImport, EngineConfig, ImportSummary, MandatoryFields, MemoryIndex, Registry};
use statreg_index_elastic::{ElasticConfig, ElasticIndex};
use statreg_store_sqlite::SqliteStore;
use tokio::io::{AsyncBufRead, AsyncBufReadExt as _};
use tower_http::trace::TraceLayer;
use tracing::info;
use uuid::Uuid;

// ─── Configuration ────────────────────────────────────────────────────────────

/// Runtime configuration, deserialised from `statreg.toml` and `STATREG__*`
/// environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  #[serde(default = "default_host")]
  pub host:        String,
  #[serde(default = "default_port")]
  pub port:        u16,
  #[serde(default = "default_store_path")]
  pub store_path:  PathBuf,
  /// Identity used by `import` and startup resyncs.
  #[serde(default)]
  pub system_user: Uuid,
  #[serde(default)]
  pub index:       IndexConfig,
  #[serde(default)]
  pub engine:      EngineConfig,
  #[serde(default)]
  pub validation:  ValidationConfig,
}

fn default_host() -> String { "127.0.0.1".into() }

fn default_port() -> u16 { 8080 }

fn default_store_path() -> PathBuf { PathBuf::from("statreg.db") }

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexBackend {
  #[default]
  Memory,
  Elastic,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IndexConfig {
  #[serde(default)]
  pub backend:           IndexBackend,
  /// Required when `backend = "elastic"`.
  pub elastic:           Option<ElasticConfig>,
  /// Run a non-forced resync before serving.
  #[serde(default = "default_true")]
  pub resync_on_startup: bool,
}

impl Default for IndexConfig {
  fn default() -> Self { Self { backend: IndexBackend::Memory, elastic: None, resync_on_startup: true } }
}

fn default_true() -> bool { true }

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ValidationConfig {
  /// Descriptive fields every unit must carry, e.g. `["tax_reg_id"]`.
  #[serde(default)]
  pub mandatory: Vec<String>,
}

/// Layer `path` (optional) and the environment into a [`ServerConfig`].
pub fn load_config(path: PathBuf) -> anyhow::Result<ServerConfig> {
  config::Config::builder()
    .add_source(config::File::from(path).required(false))
    .add_source(config::Environment::with_prefix("STATREG").separator("__"))
    .build()
    .context("failed to read config file")?
    .try_deserialize()
    .context("failed to deserialise ServerConfig")
}

// ─── Index backend ────────────────────────────────────────────────────────────

/// The configured search mirror.
#[derive(Debug)]
pub enum AnyIndex {
  Memory(MemoryIndex),
  Elastic(ElasticIndex),
}

impl AnyIndex {
  pub fn from_config(config: &IndexConfig) -> anyhow::Result<Self> {
    match config.backend {
      IndexBackend::Memory => Ok(AnyIndex::Memory(MemoryIndex::new())),
      IndexBackend::Elastic => {
        let elastic = config
          .elastic
          .as_ref()
          .context("index.backend is \"elastic\" but [index.elastic] is missing")?;
        Ok(AnyIndex::Elastic(ElasticIndex::new(elastic).context("failed to build search client")?))
      }
    }
  }
}

impl SearchIndexClient for AnyIndex {
  type Error = statreg_index_elastic::Error;

  async fn upsert(&self, doc: ElasticDocument) -> Result<(), Self::Error> {
    match self {
      AnyIndex::Memory(m) => m.upsert(doc).await.map_err(|e| match e {}),
      AnyIndex::Elastic(e) => e.upsert(doc).await,
    }
  }

  async fn delete(&self, key: UnitKey) -> Result<(), Self::Error> {
    match self {
      AnyIndex::Memory(m) => m.delete(key).await.map_err(|e| match e {}),
      AnyIndex::Elastic(e) => e.delete(key).await,
    }
  }

  async fn bulk_upsert(&self, docs: Vec<ElasticDocument>) -> Result<(), Self::Error> {
    match self {
      AnyIndex::Memory(m) => m.bulk_upsert(docs).await.map_err(|e| match e {}),
      AnyIndex::Elastic(e) => e.bulk_upsert(docs).await,
    }
  }

  async fn delete_all(&self) -> Result<(), Self::Error> {
    match self {
      AnyIndex::Memory(m) => m.delete_all().await.map_err(|e| match e {}),
      AnyIndex::Elastic(e) => e.delete_all().await,
    }
  }

  async fn count(&self) -> Result<u64, Self::Error> {
    match self {
      AnyIndex::Memory(m) => m.count().await.map_err(|e| match e {}),
      AnyIndex::Elastic(e) => e.count().await,
    }
  }

  async fn ping(&self) -> bool {
    match self {
      AnyIndex::Memory(m) => m.ping().await,
      AnyIndex::Elastic(e) => e.ping().await,
    }
  }

  async fn search(&self, query: &SearchQuery) -> Result<SearchPage, Self::Error> {
    match self {
      AnyIndex::Memory(m) => m.search(query).await.map_err(|e| match e {}),
      AnyIndex::Elastic(e) => e.search(query).await,
    }
  }
}

// ─── Application ──────────────────────────────────────────────────────────────

pub type AppRegistry = Registry<SqliteStore, AnyIndex, MandatoryFields>;

/// Open the store, build the index client and validator, and assemble the
/// registry.
pub async fn build_registry(config: &ServerConfig) -> anyhow::Result<Arc<AppRegistry>> {
  let store = SqliteStore::open(&config.store_path)
    .await
    .with_context(|| format!("failed to open store at {:?}", config.store_path))?;
  let index = AnyIndex::from_config(&config.index)?;
  let validator = MandatoryFields::from_names(&config.validation.mandatory)
    .context("unknown field in validation.mandatory")?;
  info!(backend = ?config.index.backend, store = ?config.store_path, "registry ready");
  Ok(Arc::new(Registry::new(
    Arc::new(store),
    Arc::new(index),
    validator,
    config.engine.clone(),
  )))
}

/// The HTTP application: the JSON API under `/api`, with request tracing.
pub fn app(registry: Arc<AppRegistry>) -> Router {
  Router::new()
    .nest("/api", statreg_api::api_router(registry))
    .layer(TraceLayer::new_for_http())
}

/// Feed a JSON-lines stream of units through one bulk import pass. Blank
/// lines are skipped; a malformed line aborts the pass with its line number.
pub async fn import_lines<R>(
  registry: &AppRegistry,
  who: IdentityContext,
  reader: R,
) -> anyhow::Result<ImportSummary>
where
  R: AsyncBufRead + Unpin,
{
  let mut import = BulkImport::new(registry, who);
  let mut lines = reader.lines();
  let mut line_no = 0usize;
  while let Some(line) = lines.next_line().await.context("failed to read import input")? {
    line_no += 1;
    if line.trim().is_empty() {
      continue;
    }
    let unit: Unit =
      serde_json::from_str(&line).with_context(|| format!("line {line_no}: malformed unit"))?;
    import.push(unit).await.context("history flush failed")?;
  }
  import.finish().await.context("history flush failed")
}
