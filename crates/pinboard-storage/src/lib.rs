//! Versioned artifact store, parquet codec and rate-limited API client for Pinboard.

pub mod client;
pub mod codec;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use pinboard_core::{documented_columns, ArtifactMeta, Table};
use reqwest::StatusCode;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::OnceCell;
use tracing::{info, warn};
use uuid::Uuid;

pub use client::{
    fetch_all_pages, fetch_date_range, ApiClient, ApiClientConfig, FetchError, JsonSource,
    NcaaEndpoints, RequestThrottle,
};
pub use codec::{decode_table, encode_table, CodecError};

pub const CRATE_NAME: &str = "pinboard-storage";

pub const DEFAULT_NAMESPACE: &str = "ncaa_wrestling";
pub const DEFAULT_CACHE_DIR: &str = "./pin_cache";
pub const DATA_FILE: &str = "data.parquet";
pub const META_FILE: &str = "meta.json";
pub const VERSIONS_DIR: &str = "versions";

/// Returned by [`ArtifactStore::last_updated`] for artifacts never written.
pub const NEVER: &str = "Never";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendConfig {
    Local { root: PathBuf, retain_versions: bool },
    Remote { server_url: String, api_key: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageConfig {
    pub backend: BackendConfig,
    pub namespace: String,
}

impl StorageConfig {
    pub fn local(root: impl Into<PathBuf>) -> Self {
        Self {
            backend: BackendConfig::Local {
                root: root.into(),
                retain_versions: true,
            },
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }

    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// `CONNECT_SERVER` selects the remote board; its absence selects the local folder.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let backend = match non_empty("CONNECT_SERVER") {
            Some(server_url) => BackendConfig::Remote {
                server_url,
                api_key: lookup("CONNECT_API_KEY").unwrap_or_default(),
            },
            None => BackendConfig::Local {
                root: non_empty("PIN_CACHE_DIR")
                    .map(PathBuf::from)
                    .unwrap_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR)),
                retain_versions: non_empty("PIN_RETAIN_VERSIONS")
                    .map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                    .unwrap_or(true),
            },
        };

        Self {
            backend,
            namespace: non_empty("PIN_NAMESPACE").unwrap_or_else(|| DEFAULT_NAMESPACE.to_string()),
        }
    }
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid artifact name `{0}`")]
    InvalidName(String),
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("artifact metadata: {0}")]
    Meta(#[from] serde_json::Error),
    #[error("remote board request to {url} failed: {source}")]
    Remote {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("remote board returned status {status} for {url}")]
    RemoteStatus { status: u16, url: String },
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

pub fn version_id(updated_at: DateTime<Utc>, content_hash: &str) -> String {
    let short = content_hash.get(..5).unwrap_or(content_hash);
    format!("{}-{short}", updated_at.format("%Y%m%dT%H%M%S%6fZ"))
}

/// Storage backend holding artifacts under their fully namespaced names.
#[async_trait]
pub trait Board: Send + Sync {
    fn describe(&self) -> String;

    async fn put(&self, full_name: &str, data: &[u8], meta: &ArtifactMeta) -> Result<(), StoreError>;

    /// `Ok(None)` when the artifact was never written.
    async fn get_data(&self, full_name: &str) -> Result<Option<Vec<u8>>, StoreError>;

    async fn get_meta(&self, full_name: &str) -> Result<Option<ArtifactMeta>, StoreError>;

    async fn versions(&self, full_name: &str) -> Result<Vec<String>, StoreError>;
}

/// Local directory board: `<root>/<namespace>/<name>/{data.parquet,meta.json}`.
#[derive(Debug, Clone)]
pub struct FolderBoard {
    root: PathBuf,
    retain_versions: bool,
}

impl FolderBoard {
    pub fn new(root: impl Into<PathBuf>, retain_versions: bool) -> Self {
        Self {
            root: root.into(),
            retain_versions,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn artifact_dir(&self, full_name: &str) -> PathBuf {
        full_name
            .split('/')
            .fold(self.root.clone(), |dir, segment| dir.join(segment))
    }

    /// Temp file + rename so readers never observe a half-written file.
    async fn write_atomic(dir: &Path, file_name: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let target = dir.join(file_name);
        let temp_path = dir.join(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));

        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .map_err(io_error(&temp_path))?;
        file.write_all(bytes).await.map_err(io_error(&temp_path))?;
        file.flush().await.map_err(io_error(&temp_path))?;
        drop(file);

        if let Err(source) = fs::rename(&temp_path, &target).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(StoreError::Io {
                path: target,
                source,
            });
        }
        Ok(())
    }

    async fn write_pair(dir: &Path, data: &[u8], meta_json: &[u8]) -> Result<(), StoreError> {
        fs::create_dir_all(dir).await.map_err(io_error(dir))?;
        Self::write_atomic(dir, DATA_FILE, data).await?;
        // Meta lands last: a visible meta.json always describes a complete data file.
        Self::write_atomic(dir, META_FILE, meta_json).await
    }

    async fn read_optional(path: &Path) -> Result<Option<Vec<u8>>, StoreError> {
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }
}

#[async_trait]
impl Board for FolderBoard {
    fn describe(&self) -> String {
        format!("folder:{}", self.root.display())
    }

    async fn put(&self, full_name: &str, data: &[u8], meta: &ArtifactMeta) -> Result<(), StoreError> {
        let dir = self.artifact_dir(full_name);
        let meta_json = serde_json::to_vec_pretty(meta)?;
        Self::write_pair(&dir, data, &meta_json).await?;

        if self.retain_versions {
            if let Some(version) = &meta.version {
                let version_dir = dir.join(VERSIONS_DIR).join(version);
                Self::write_pair(&version_dir, data, &meta_json).await?;
            }
        }
        Ok(())
    }

    async fn get_data(&self, full_name: &str) -> Result<Option<Vec<u8>>, StoreError> {
        Self::read_optional(&self.artifact_dir(full_name).join(DATA_FILE)).await
    }

    async fn get_meta(&self, full_name: &str) -> Result<Option<ArtifactMeta>, StoreError> {
        match Self::read_optional(&self.artifact_dir(full_name).join(META_FILE)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn versions(&self, full_name: &str) -> Result<Vec<String>, StoreError> {
        let dir = self.artifact_dir(full_name).join(VERSIONS_DIR);
        let mut entries = match fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(StoreError::Io { path: dir, source }),
        };

        let mut versions = Vec::new();
        while let Some(entry) = entries.next_entry().await.map_err(io_error(&dir))? {
            let meta_path = entry.path().join(META_FILE);
            if fs::try_exists(&meta_path).await.map_err(io_error(&meta_path))? {
                versions.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        versions.sort();
        Ok(versions)
    }
}

/// Remote managed board. Versions are kept by the server.
#[derive(Debug, Clone)]
pub struct ConnectBoard {
    server_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl ConnectBoard {
    pub fn new(server_url: impl Into<String>, api_key: impl Into<String>) -> Result<Self, StoreError> {
        let server_url = server_url.into().trim_end_matches('/').to_string();
        let client = reqwest::Client::builder()
            .build()
            .map_err(|source| StoreError::Remote {
                url: server_url.clone(),
                source,
            })?;
        Ok(Self {
            server_url,
            api_key: api_key.into(),
            client,
        })
    }

    pub fn pin_url(&self, full_name: &str, file: &str) -> String {
        format!("{}/__api__/pins/{full_name}/{file}", self.server_url)
    }

    fn authorized(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        if self.api_key.is_empty() {
            req
        } else {
            req.header(reqwest::header::AUTHORIZATION, format!("Key {}", self.api_key))
        }
    }

    async fn fetch_optional(&self, url: String) -> Result<Option<reqwest::Response>, StoreError> {
        let resp = self
            .authorized(self.client.get(&url))
            .send()
            .await
            .map_err(|source| StoreError::Remote {
                url: url.clone(),
                source,
            })?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(resp)),
            status => Err(StoreError::RemoteStatus {
                status: status.as_u16(),
                url,
            }),
        }
    }

    async fn upload(&self, url: String, content_type: &str, body: Vec<u8>) -> Result<(), StoreError> {
        let resp = self
            .authorized(self.client.put(&url))
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await
            .map_err(|source| StoreError::Remote {
                url: url.clone(),
                source,
            })?;
        if !resp.status().is_success() {
            return Err(StoreError::RemoteStatus {
                status: resp.status().as_u16(),
                url,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Board for ConnectBoard {
    fn describe(&self) -> String {
        format!("connect:{}", self.server_url)
    }

    async fn put(&self, full_name: &str, data: &[u8], meta: &ArtifactMeta) -> Result<(), StoreError> {
        self.upload(
            self.pin_url(full_name, DATA_FILE),
            "application/vnd.apache.parquet",
            data.to_vec(),
        )
        .await?;
        self.upload(
            self.pin_url(full_name, META_FILE),
            "application/json",
            serde_json::to_vec(meta)?,
        )
        .await
    }

    async fn get_data(&self, full_name: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let url = self.pin_url(full_name, DATA_FILE);
        let Some(resp) = self.fetch_optional(url.clone()).await? else {
            return Ok(None);
        };
        let body = resp
            .bytes()
            .await
            .map_err(|source| StoreError::Remote { url, source })?;
        Ok(Some(body.to_vec()))
    }

    async fn get_meta(&self, full_name: &str) -> Result<Option<ArtifactMeta>, StoreError> {
        let url = self.pin_url(full_name, META_FILE);
        let Some(resp) = self.fetch_optional(url.clone()).await? else {
            return Ok(None);
        };
        let meta = resp
            .json::<ArtifactMeta>()
            .await
            .map_err(|source| StoreError::Remote { url, source })?;
        Ok(Some(meta))
    }

    async fn versions(&self, full_name: &str) -> Result<Vec<String>, StoreError> {
        let url = self.pin_url(full_name, VERSIONS_DIR);
        let Some(resp) = self.fetch_optional(url.clone()).await? else {
            return Ok(Vec::new());
        };
        resp.json::<Vec<String>>()
            .await
            .map_err(|source| StoreError::Remote { url, source })
    }
}

async fn build_board(config: &StorageConfig) -> Result<Box<dyn Board>, StoreError> {
    match &config.backend {
        BackendConfig::Local {
            root,
            retain_versions,
        } => {
            fs::create_dir_all(root).await.map_err(io_error(root))?;
            info!(root = %root.display(), "using local pin board");
            Ok(Box::new(FolderBoard::new(root.clone(), *retain_versions)))
        }
        BackendConfig::Remote { server_url, api_key } => {
            info!(%server_url, "using remote pin board");
            Ok(Box::new(ConnectBoard::new(server_url.clone(), api_key.clone())?))
        }
    }
}

fn validate_name(name: &str) -> Result<(), StoreError> {
    let valid = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'))
        && !name.starts_with('.');
    if valid {
        Ok(())
    } else {
        Err(StoreError::InvalidName(name.to_string()))
    }
}

/// Named table snapshots over a lazily built, process-lifetime board.
pub struct ArtifactStore {
    config: StorageConfig,
    board: OnceCell<Box<dyn Board>>,
}

impl ArtifactStore {
    pub fn new(config: StorageConfig) -> Self {
        Self {
            config,
            board: OnceCell::new(),
        }
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn full_name(&self, name: &str) -> Result<String, StoreError> {
        validate_name(name)?;
        Ok(format!("{}/{name}", self.config.namespace))
    }

    async fn board(&self) -> Result<&dyn Board, StoreError> {
        let board = self
            .board
            .get_or_try_init(|| build_board(&self.config))
            .await?;
        Ok(board.as_ref())
    }

    /// Encode and persist `table`. Failures are returned, never swallowed.
    pub async fn write(&self, name: &str, table: &Table) -> Result<ArtifactMeta, StoreError> {
        let full_name = self.full_name(name)?;
        let data = encode_table(table)?;
        let content_hash = sha256_hex(&data);
        let updated_at = Utc::now();

        let meta = ArtifactMeta {
            name: full_name.clone(),
            rows: table.len(),
            columns: table.columns().to_vec(),
            updated_at,
            version: Some(version_id(updated_at, &content_hash)),
            file: Some(DATA_FILE.to_string()),
            file_size: Some(data.len() as u64),
            file_sha256: Some(content_hash),
        };

        self.board().await?.put(&full_name, &data, &meta).await?;
        info!(artifact = %full_name, rows = meta.rows, "wrote artifact");
        Ok(meta)
    }

    /// `Ok(None)` when the artifact was never written.
    pub async fn try_read(&self, name: &str) -> Result<Option<Table>, StoreError> {
        let full_name = self.full_name(name)?;
        match self.board().await?.get_data(&full_name).await? {
            Some(bytes) => Ok(Some(decode_table(bytes)?)),
            None => Ok(None),
        }
    }

    /// Latest table for `name`. Absent or unreadable artifacts come back as an
    /// empty table with the documented schema.
    pub async fn read(&self, name: &str) -> Table {
        match self.try_read(name).await {
            Ok(Some(table)) => table,
            Ok(None) => {
                warn!(artifact = name, "artifact not found; returning empty table");
                Table::empty(documented_columns(name))
            }
            Err(err) => {
                warn!(artifact = name, error = %err, "artifact read failed; returning empty table");
                Table::empty(documented_columns(name))
            }
        }
    }

    pub async fn meta(&self, name: &str) -> Option<ArtifactMeta> {
        let lookup = async {
            let full_name = self.full_name(name)?;
            self.board().await?.get_meta(&full_name).await
        };
        match lookup.await {
            Ok(meta) => meta,
            Err(err) => {
                warn!(artifact = name, error = %err, "artifact metadata lookup failed");
                None
            }
        }
    }

    pub async fn exists(&self, name: &str) -> bool {
        self.meta(name).await.is_some()
    }

    /// RFC 3339 timestamp of the latest write, or [`NEVER`].
    pub async fn last_updated(&self, name: &str) -> String {
        self.meta(name)
            .await
            .map(|meta| meta.updated_at.to_rfc3339())
            .unwrap_or_else(|| NEVER.to_string())
    }

    pub async fn versions(&self, name: &str) -> Vec<String> {
        let lookup = async {
            let full_name = self.full_name(name)?;
            self.board().await?.versions(&full_name).await
        };
        lookup.await.unwrap_or_else(|err| {
            warn!(artifact = name, error = %err, "artifact version listing failed");
            Vec::new()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pinboard_core::{Cell, RANKINGS_COLUMNS};
    use std::collections::HashMap;
    use tempfile::tempdir;

    fn scores(values: &[(i64, &str)]) -> Table {
        let mut table = Table::empty(&["rank", "school"]);
        for (rank, school) in values {
            table.push_row(vec![Cell::Int(*rank), (*school).into()]).unwrap();
        }
        table
    }

    #[test]
    fn artifact_hashing_is_stable() {
        assert_eq!(
            sha256_hex(b"hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[tokio::test]
    async fn write_then_read_round_trips() {
        let dir = tempdir().expect("tempdir");
        let store = ArtifactStore::new(StorageConfig::local(dir.path()));
        let table = scores(&[(1, "Penn St."), (2, "Iowa")]);

        assert_eq!(store.last_updated("x").await, NEVER);
        let meta = store.write("x", &table).await.expect("write");
        assert_eq!(meta.rows, 2);
        assert_eq!(meta.name, "ncaa_wrestling/x");

        assert_eq!(store.read("x").await, table);
        assert_ne!(store.last_updated("x").await, NEVER);
        assert!(store.exists("x").await);
    }

    #[tokio::test]
    async fn mixed_type_columns_read_back_unchanged() {
        let dir = tempdir().expect("tempdir");
        let store = ArtifactStore::new(StorageConfig::local(dir.path()));
        let mut table = Table::empty(&["pct", "enrollment_rate_per_month"]);
        table.push_row(vec![Cell::Int(1), Cell::Int(2)]).unwrap();
        table
            .push_row(vec![Cell::text(".778"), Cell::Float(2.5)])
            .unwrap();

        store.write("x", &table).await.expect("write");
        assert_eq!(store.read("x").await, table);
    }

    #[tokio::test]
    async fn never_written_artifact_reads_as_documented_empty_table() {
        let dir = tempdir().expect("tempdir");
        let store = ArtifactStore::new(StorageConfig::local(dir.path()));

        let table = store.read("rankings").await;
        assert!(table.is_empty());
        assert_eq!(table.columns(), RANKINGS_COLUMNS);
        assert!(store.read("mystery").await.columns().is_empty());
        assert!(store.meta("rankings").await.is_none());
    }

    #[tokio::test]
    async fn local_layout_is_one_directory_per_namespaced_artifact() {
        let dir = tempdir().expect("tempdir");
        let store = ArtifactStore::new(StorageConfig::local(dir.path()).with_namespace("clinical"));
        store.write("sites", &scores(&[(1, "a")])).await.expect("write");

        let artifact_dir = dir.path().join("clinical").join("sites");
        assert!(artifact_dir.join(DATA_FILE).exists());
        let meta: serde_json::Value = serde_json::from_slice(
            &std::fs::read(artifact_dir.join(META_FILE)).expect("meta"),
        )
        .expect("meta json");
        assert_eq!(meta["name"], "clinical/sites");
        assert_eq!(meta["rows"], 1);
        assert_eq!(meta["columns"], serde_json::json!(["rank", "school"]));
        assert!(meta["updated_at"].is_string());
    }

    #[tokio::test]
    async fn rewrites_keep_prior_versions_and_serve_the_latest() {
        let dir = tempdir().expect("tempdir");
        let store = ArtifactStore::new(StorageConfig::local(dir.path()));

        let first = store.write("rankings", &scores(&[(1, "Iowa")])).await.unwrap();
        let latest = scores(&[(1, "Penn St."), (2, "Iowa")]);
        let second = store.write("rankings", &latest).await.unwrap();

        assert_ne!(first.version, second.version);
        assert_eq!(store.versions("rankings").await.len(), 2);
        assert_eq!(store.read("rankings").await, latest);
    }

    #[tokio::test]
    async fn version_listing_ignores_incomplete_archives() {
        let dir = tempdir().expect("tempdir");
        let store = ArtifactStore::new(StorageConfig::local(dir.path()));
        let meta = store.write("schools", &scores(&[(1, "a")])).await.unwrap();
        std::fs::create_dir_all(dir.path().join("ncaa_wrestling/schools/versions/partial")).unwrap();

        assert_eq!(store.versions("schools").await, vec![meta.version.unwrap()]);
    }

    #[tokio::test]
    async fn board_is_built_on_first_use() {
        let dir = tempdir().expect("tempdir");
        let root = dir.path().join("lazy");
        let store = ArtifactStore::new(StorageConfig::local(&root));
        assert!(!root.exists());

        store.write("schools", &scores(&[(1, "a")])).await.unwrap();
        assert!(root.exists());
    }

    #[tokio::test]
    async fn corrupt_data_file_degrades_to_empty_table() {
        let dir = tempdir().expect("tempdir");
        let store = ArtifactStore::new(StorageConfig::local(dir.path()));
        store.write("standings", &scores(&[(1, "a")])).await.unwrap();
        std::fs::write(
            dir.path().join("ncaa_wrestling/standings").join(DATA_FILE),
            b"not parquet",
        )
        .unwrap();

        let table = store.read("standings").await;
        assert!(table.is_empty());
        assert!(table.has_column("conf_wins"));
    }

    #[tokio::test]
    async fn invalid_names_are_rejected_on_write() {
        let dir = tempdir().expect("tempdir");
        let store = ArtifactStore::new(StorageConfig::local(dir.path()));
        for name in ["", "../escape", "a/b", ".hidden"] {
            assert!(matches!(
                store.write(name, &scores(&[(1, "a")])).await,
                Err(StoreError::InvalidName(_))
            ));
        }
    }

    #[test]
    fn environment_selects_backend() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("CONNECT_SERVER", "https://connect.example.test/"),
            ("CONNECT_API_KEY", "secret"),
        ]);
        let config = StorageConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(
            config.backend,
            BackendConfig::Remote {
                server_url: "https://connect.example.test/".to_string(),
                api_key: "secret".to_string(),
            }
        );

        let config = StorageConfig::from_lookup(|_| None);
        assert_eq!(config, StorageConfig::local(DEFAULT_CACHE_DIR));
    }

    #[test]
    fn connect_board_urls_are_namespaced() {
        let board = ConnectBoard::new("https://connect.example.test/", "k").unwrap();
        assert_eq!(
            board.pin_url("ncaa_wrestling/rankings", DATA_FILE),
            "https://connect.example.test/__api__/pins/ncaa_wrestling/rankings/data.parquet"
        );
    }

    #[test]
    fn version_ids_sort_by_time() {
        let a = version_id(
            DateTime::parse_from_rfc3339("2026-02-24T12:00:00Z").unwrap().with_timezone(&Utc),
            "abcdef",
        );
        let b = version_id(
            DateTime::parse_from_rfc3339("2026-02-24T12:00:01Z").unwrap().with_timezone(&Utc),
            "012345",
        );
        assert_eq!(a, "20260224T120000000000Z-abcde");
        assert!(a < b);
    }
}
