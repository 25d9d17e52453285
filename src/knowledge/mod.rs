//! Persistent knowledge index: append-only JSON-lines records plus a flushed
//! vector file, queried by brute-force cosine similarity.

pub mod embeddings;

pub use embeddings::{Embedder, HashingEmbedder, OpenAiEmbedder};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

use embeddings::cosine_similarity;

const ITEMS_FILE: &str = "items.jsonl";
const INDEX_MAP_FILE: &str = "index_map.jsonl";
const VECTORS_FILE: &str = "vectors.json";

#[derive(Debug, Error)]
pub enum KnowledgeError {
    #[error("embedding failed: {0}")]
    Embedding(String),
    #[error("knowledge store I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("knowledge store is corrupt: {0}")]
    Json(#[from] serde_json::Error),
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KnowledgeItem {
    pub item_id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl KnowledgeItem {
    pub fn metadata_str(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoredItem {
    pub item: KnowledgeItem,
    pub score: f32,
}

#[derive(Debug, Deserialize)]
struct ItemLine {
    item_id: String,
    #[serde(default)]
    deleted: bool,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PositionLine {
    position: usize,
    item_id: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct VectorFile {
    dimension: usize,
    vectors: Vec<Vec<f32>>,
}

pub struct KnowledgeIndex {
    dir: PathBuf,
    embedder: Arc<dyn Embedder>,
    flush_batch: usize,
    items: BTreeMap<String, KnowledgeItem>,
    positions: Vec<String>,
    vectors: Vec<Vec<f32>>,
    unflushed: usize,
}

impl KnowledgeIndex {
    /// Opens (or creates) the store in `dir`. Items that were mapped but never
    /// made it into the flushed vector file are re-embedded.
    pub async fn open(
        dir: impl Into<PathBuf>,
        embedder: Arc<dyn Embedder>,
        flush_batch: usize,
    ) -> Result<Self, KnowledgeError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;

        let items = read_items(&dir.join(ITEMS_FILE))?;
        let positions = read_positions(&dir.join(INDEX_MAP_FILE))?;
        let mut vectors = read_vectors(&dir.join(VECTORS_FILE))?;

        let dimension = embedder.dimension();
        if vectors.first().is_some_and(|v| v.len() != dimension) {
            warn!(
                expected = dimension,
                "stored vectors have a different dimension, re-embedding the whole store"
            );
            vectors.clear();
        }
        vectors.truncate(positions.len());

        let mut index = Self {
            dir,
            embedder,
            flush_batch: flush_batch.max(1),
            items,
            positions,
            vectors,
            unflushed: 0,
        };
        index.embed_missing().await?;

        info!(
            items = index.items.len(),
            dir = %index.dir.display(),
            "opened knowledge index"
        );
        Ok(index)
    }

    async fn embed_missing(&mut self) -> Result<(), KnowledgeError> {
        let missing: Vec<usize> = (self.vectors.len()..self.positions.len()).collect();
        if missing.is_empty() {
            return Ok(());
        }

        let texts: Vec<String> = missing
            .iter()
            .map(|&pos| {
                self.items
                    .get(&self.positions[pos])
                    .map(|item| item.content.clone())
                    .unwrap_or_default()
            })
            .collect();
        debug!(count = texts.len(), "re-embedding unflushed knowledge items");

        let embedded = self.embedder.embed_batch(&texts).await?;
        self.vectors.extend(embedded);
        self.flush()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn get_item(&self, item_id: &str) -> Option<&KnowledgeItem> {
        self.items.get(item_id)
    }

    pub async fn add_item(
        &mut self,
        content: impl Into<String>,
        metadata: Map<String, Value>,
    ) -> Result<String, KnowledgeError> {
        let content = content.into();
        let vector = self.embedder.embed(&content).await?;
        self.insert(content, metadata, vector)
    }

    pub async fn add_items(
        &mut self,
        entries: Vec<(String, Map<String, Value>)>,
    ) -> Result<Vec<String>, KnowledgeError> {
        let texts: Vec<String> = entries.iter().map(|(content, _)| content.clone()).collect();
        let vectors = self.embedder.embed_batch(&texts).await?;

        entries
            .into_iter()
            .zip(vectors)
            .map(|((content, metadata), vector)| self.insert(content, metadata, vector))
            .collect()
    }

    fn insert(
        &mut self,
        content: String,
        metadata: Map<String, Value>,
        vector: Vec<f32>,
    ) -> Result<String, KnowledgeError> {
        let expected = self.embedder.dimension();
        if vector.len() != expected {
            return Err(KnowledgeError::DimensionMismatch {
                expected,
                actual: vector.len(),
            });
        }

        let timestamp = Utc::now();
        let position = self.positions.len();
        let item = KnowledgeItem {
            item_id: format!("item_{}_{}", timestamp.timestamp_millis(), position),
            content,
            metadata,
            timestamp,
        };

        append_line(&self.dir.join(ITEMS_FILE), &serde_json::to_value(&item)?)?;
        append_line(
            &self.dir.join(INDEX_MAP_FILE),
            &serde_json::to_value(PositionLine {
                position,
                item_id: item.item_id.clone(),
            })?,
        )?;

        let item_id = item.item_id.clone();
        debug!(%item_id, position, "added knowledge item");
        self.positions.push(item_id.clone());
        self.vectors.push(vector);
        self.items.insert(item_id.clone(), item);

        self.unflushed += 1;
        if self.unflushed >= self.flush_batch {
            self.flush()?;
        }
        Ok(item_id)
    }

    /// Appends a tombstone; the item's vector slot stays but is skipped by search.
    pub fn delete_item(&mut self, item_id: &str) -> Result<bool, KnowledgeError> {
        if self.items.remove(item_id).is_none() {
            return Ok(false);
        }
        append_line(
            &self.dir.join(ITEMS_FILE),
            &json!({ "item_id": item_id, "deleted": true }),
        )?;
        debug!(%item_id, "deleted knowledge item");
        Ok(true)
    }

    pub fn flush(&mut self) -> Result<(), KnowledgeError> {
        let file = VectorFile {
            dimension: self.embedder.dimension(),
            vectors: self.vectors.clone(),
        };
        let path = self.dir.join(VECTORS_FILE);
        let tmp = self.dir.join(format!("{}.tmp", VECTORS_FILE));
        fs::write(&tmp, serde_json::to_vec(&file)?)?;
        fs::rename(&tmp, &path)?;

        debug!(vectors = self.vectors.len(), "flushed knowledge vectors");
        self.unflushed = 0;
        Ok(())
    }

    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<ScoredItem>, KnowledgeError> {
        if self.items.is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        let query_vector = self.embedder.embed(query).await?;

        let mut scored: Vec<ScoredItem> = self
            .positions
            .iter()
            .zip(&self.vectors)
            .filter_map(|(item_id, vector)| {
                let item = self.items.get(item_id)?;
                Some(ScoredItem {
                    item: item.clone(),
                    score: cosine_similarity(&query_vector, vector),
                })
            })
            .collect();

        scored.sort_by(|a, b| b.score.total_cmp(&a.score));
        scored.truncate(top_k);
        Ok(scored)
    }

    /// Similarity search over twice as many candidates, keeping only items whose
    /// metadata matches every key of `filter` exactly.
    pub async fn query_with_metadata_filter(
        &self,
        query: &str,
        filter: &Map<String, Value>,
        top_k: usize,
    ) -> Result<Vec<ScoredItem>, KnowledgeError> {
        let candidates = self.search(query, top_k.saturating_mul(2)).await?;
        Ok(candidates
            .into_iter()
            .filter(|scored| {
                filter
                    .iter()
                    .all(|(key, value)| scored.item.metadata.get(key) == Some(value))
            })
            .take(top_k)
            .collect())
    }
}

impl Drop for KnowledgeIndex {
    fn drop(&mut self) {
        if self.unflushed > 0 {
            if let Err(e) = self.flush() {
                warn!(error = %e, "failed to flush knowledge vectors on close");
            }
        }
    }
}

fn append_line(path: &Path, value: &Value) -> Result<(), KnowledgeError> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", serde_json::to_string(value)?)?;
    Ok(())
}

fn lines(path: &Path) -> Result<Vec<String>, KnowledgeError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let reader = BufReader::new(File::open(path)?);
    let mut out = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if !line.trim().is_empty() {
            out.push(line);
        }
    }
    Ok(out)
}

fn read_items(path: &Path) -> Result<BTreeMap<String, KnowledgeItem>, KnowledgeError> {
    let mut items = BTreeMap::new();
    for (number, line) in lines(path)?.iter().enumerate() {
        let parsed: ItemLine = match serde_json::from_str(line) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(line = number + 1, error = %e, "skipping malformed knowledge record");
                continue;
            }
        };
        if parsed.deleted {
            items.remove(&parsed.item_id);
            continue;
        }

        let mut record = parsed.rest;
        record.insert("item_id".to_string(), Value::String(parsed.item_id.clone()));
        match serde_json::from_value::<KnowledgeItem>(Value::Object(record)) {
            Ok(item) => {
                items.insert(parsed.item_id, item);
            }
            Err(e) => warn!(line = number + 1, error = %e, "skipping malformed knowledge record"),
        }
    }
    Ok(items)
}

fn read_positions(path: &Path) -> Result<Vec<String>, KnowledgeError> {
    let mut entries: Vec<PositionLine> = Vec::new();
    for line in lines(path)? {
        entries.push(serde_json::from_str(&line)?);
    }
    entries.sort_by_key(|e| e.position);

    let mut positions = Vec::with_capacity(entries.len());
    for entry in entries {
        if entry.position != positions.len() {
            warn!(
                position = entry.position,
                "gap in knowledge index map, ignoring later positions"
            );
            break;
        }
        positions.push(entry.item_id);
    }
    Ok(positions)
}

fn read_vectors(path: &Path) -> Result<Vec<Vec<f32>>, KnowledgeError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file: VectorFile = serde_json::from_slice(&fs::read(path)?)?;
    if let Some(bad) = file.vectors.iter().find(|v| v.len() != file.dimension) {
        warn!(
            expected = file.dimension,
            actual = bad.len(),
            "vector file is inconsistent, discarding it"
        );
        return Ok(Vec::new());
    }
    Ok(file.vectors)
}
