//! Host services available to node behaviors
//!
//! `HostServices` is a typed map the host fills before a run: native file
//! and process access, dataset storage, audio playback, or any other
//! runtime object a plugin node needs. The engine never looks inside it;
//! nodes reach it through `NodeContext::services`.
//!
//! # Example
//!
//! ```ignore
//! let mut services = HostServices::new();
//! services.set(service_keys::NATIVE_API, Arc::new(MyNativeApi) as Arc<dyn NativeApi>);
//!
//! // In a behavior:
//! let native = context.services().native_api()?;
//! let text = native.read_text_file("notes.txt").await?;
//! ```

use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Typed map of host-provided services
///
/// Holds arbitrary `Send + Sync` values via `Box<dyn Any>`, for runtime
/// objects that cannot be serialized (API clients, database handles, etc.).
pub struct HostServices {
    inner: HashMap<String, Box<dyn Any + Send + Sync>>,
}

impl HostServices {
    /// Create an empty service map.
    pub fn new() -> Self {
        Self {
            inner: HashMap::new(),
        }
    }

    /// Insert a typed value under the given key, replacing any previous one.
    pub fn set<T: Send + Sync + 'static>(&mut self, key: &str, value: T) {
        self.inner.insert(key.to_string(), Box::new(value));
    }

    /// Get a reference to a typed value by key.
    ///
    /// Returns `None` if the key doesn't exist or the type doesn't match.
    pub fn get<T: Send + Sync + 'static>(&self, key: &str) -> Option<&T> {
        self.inner.get(key).and_then(|v| v.downcast_ref())
    }

    /// Check whether a key exists in the map.
    pub fn has(&self, key: &str) -> bool {
        self.inner.contains_key(key)
    }

    /// Like `get`, but a missing service is an error
    pub fn require<T: Send + Sync + 'static>(&self, key: &str) -> Result<&T> {
        self.get(key)
            .ok_or_else(|| EngineError::MissingService(key.to_string()))
    }

    pub fn with_native_api(mut self, api: Arc<dyn NativeApi>) -> Self {
        self.set(service_keys::NATIVE_API, api);
        self
    }

    pub fn with_dataset_provider(mut self, provider: Arc<dyn DatasetProvider>) -> Self {
        self.set(service_keys::DATASET_PROVIDER, provider);
        self
    }

    pub fn with_audio_provider(mut self, provider: Arc<dyn AudioProvider>) -> Self {
        self.set(service_keys::AUDIO_PROVIDER, provider);
        self
    }

    pub fn native_api(&self) -> Result<Arc<dyn NativeApi>> {
        self.require::<Arc<dyn NativeApi>>(service_keys::NATIVE_API)
            .cloned()
    }

    pub fn dataset_provider(&self) -> Result<Arc<dyn DatasetProvider>> {
        self.require::<Arc<dyn DatasetProvider>>(service_keys::DATASET_PROVIDER)
            .cloned()
    }

    pub fn audio_provider(&self) -> Result<Arc<dyn AudioProvider>> {
        self.require::<Arc<dyn AudioProvider>>(service_keys::AUDIO_PROVIDER)
            .cloned()
    }
}

impl Default for HostServices {
    fn default() -> Self {
        Self::new()
    }
}

/// Well-known service keys.
pub mod service_keys {
    /// Key for `Arc<dyn NativeApi>`
    pub const NATIVE_API: &str = "native_api";
    /// Key for `Arc<dyn DatasetProvider>`
    pub const DATASET_PROVIDER: &str = "dataset_provider";
    /// Key for `Arc<dyn AudioProvider>`
    pub const AUDIO_PROVIDER: &str = "audio_provider";
}

/// Output of a host command
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutput {
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Native file and process access
#[async_trait]
pub trait NativeApi: Send + Sync {
    async fn read_text_file(&self, path: &str) -> Result<String>;

    async fn write_text_file(&self, path: &str, contents: &str) -> Result<()>;

    /// Paths under `path`; nested directories are walked when `recursive` is set
    async fn read_dir(&self, path: &str, recursive: bool) -> Result<Vec<String>>;

    async fn exec(&self, command: &str, args: &[String]) -> Result<CommandOutput>;
}

/// A dataset row: string columns plus an optional embedding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DatasetRow {
    pub id: String,
    pub data: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f64>>,
}

/// A row returned by a nearest-neighbor query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredRow {
    #[serde(flatten)]
    pub row: DatasetRow,
    pub distance: f64,
}

/// Dataset storage
#[async_trait]
pub trait DatasetProvider: Send + Sync {
    async fn rows(&self, dataset_id: &str) -> Result<Vec<DatasetRow>>;

    async fn get_row(&self, dataset_id: &str, row_id: &str) -> Result<Option<DatasetRow>>;

    /// Insert or replace a row
    async fn put_row(&self, dataset_id: &str, row: DatasetRow) -> Result<()>;

    /// Replace every row of a dataset, creating it when missing
    async fn replace_rows(&self, dataset_id: &str, rows: Vec<DatasetRow>) -> Result<()>;

    async fn delete_dataset(&self, dataset_id: &str) -> Result<()>;

    /// The `k` rows closest to `embedding`
    async fn nearest_neighbors(&self, dataset_id: &str, embedding: &[f64], k: usize) -> Result<Vec<ScoredRow>>;
}

/// Audio playback
#[async_trait]
pub trait AudioProvider: Send + Sync {
    async fn play(&self, audio: &[u8], media_type: Option<&str>) -> Result<()>;
}

/// Dataset provider keeping everything in memory
///
/// Neighbors are ranked by cosine distance.
#[derive(Default)]
pub struct InMemoryDatasetProvider {
    datasets: RwLock<HashMap<String, Vec<DatasetRow>>>,
}

impl InMemoryDatasetProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DatasetProvider for InMemoryDatasetProvider {
    async fn rows(&self, dataset_id: &str) -> Result<Vec<DatasetRow>> {
        Ok(self.datasets.read().get(dataset_id).cloned().unwrap_or_default())
    }

    async fn get_row(&self, dataset_id: &str, row_id: &str) -> Result<Option<DatasetRow>> {
        Ok(self
            .datasets
            .read()
            .get(dataset_id)
            .and_then(|rows| rows.iter().find(|r| r.id == row_id).cloned()))
    }

    async fn put_row(&self, dataset_id: &str, row: DatasetRow) -> Result<()> {
        let mut datasets = self.datasets.write();
        let rows = datasets.entry(dataset_id.to_string()).or_default();
        match rows.iter_mut().find(|r| r.id == row.id) {
            Some(existing) => *existing = row,
            None => rows.push(row),
        }
        Ok(())
    }

    async fn replace_rows(&self, dataset_id: &str, rows: Vec<DatasetRow>) -> Result<()> {
        self.datasets.write().insert(dataset_id.to_string(), rows);
        Ok(())
    }

    async fn delete_dataset(&self, dataset_id: &str) -> Result<()> {
        self.datasets.write().remove(dataset_id);
        Ok(())
    }

    async fn nearest_neighbors(&self, dataset_id: &str, embedding: &[f64], k: usize) -> Result<Vec<ScoredRow>> {
        let mut scored: Vec<ScoredRow> = self
            .rows(dataset_id)
            .await?
            .into_iter()
            .filter_map(|row| {
                let distance = cosine_distance(row.embedding.as_deref()?, embedding)?;
                Some(ScoredRow { row, distance })
            })
            .collect();
        scored.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        scored.truncate(k);
        Ok(scored)
    }
}

fn cosine_distance(a: &[f64], b: &[f64]) -> Option<f64> {
    if a.len() != b.len() || a.is_empty() {
        return None;
    }
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return None;
    }
    Some(1.0 - dot / (norm_a * norm_b))
}
