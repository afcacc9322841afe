//! Human review verdicts over the base train/test datasets.
//!
//! Verdicts persist as one JSON array at `<base_data_dir>/validation.json`,
//! unique by `(dataset, sample_index)`. Writers serialize on a lock file beside it.

use crate::artifacts::{atomic_write_json_pretty, read_json};
use crate::error::{BoolbackError, Result};
use crate::paging::{paginate, Page};
use crate::settings::Settings;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::thread;
use std::time::{Duration, Instant, SystemTime};

const DEFAULT_LOCK_WAIT: Duration = Duration::from_secs(10);
const LOCK_POLL: Duration = Duration::from_millis(5);
const STALE_LOCK_AGE: Duration = Duration::from_secs(120);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dataset {
    Train,
    Test,
}

impl Dataset {
    pub const ALL: [Dataset; 2] = [Dataset::Train, Dataset::Test];

    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim() {
            "train" => Ok(Dataset::Train),
            "test" => Ok(Dataset::Test),
            _ => Err(BoolbackError::Validation(
                "dataset must be train or test".to_string(),
            )),
        }
    }

    /// `all` or empty means no dataset filter.
    pub fn parse_filter(raw: &str) -> Result<Option<Self>> {
        match raw.trim() {
            "" | "all" => Ok(None),
            "train" | "test" => Self::parse(raw).map(Some),
            _ => Err(BoolbackError::Validation(
                "dataset must be all, train, or test".to_string(),
            )),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Dataset::Train => "train",
            Dataset::Test => "test",
        }
    }

    pub fn file_name(&self) -> &'static str {
        match self {
            Dataset::Train => "base_train.json",
            Dataset::Test => "base_test.json",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Good,
    Bad,
}

impl Verdict {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim() {
            "good" => Ok(Verdict::Good),
            "bad" => Ok(Verdict::Bad),
            _ => Err(BoolbackError::Validation(
                "result must be good or bad".to_string(),
            )),
        }
    }

    pub fn parse_filter(raw: &str) -> Result<Option<Self>> {
        match raw.trim() {
            "" | "all" => Ok(None),
            "good" | "bad" => Self::parse(raw).map(Some),
            _ => Err(BoolbackError::Validation(
                "result must be all, good, or bad".to_string(),
            )),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Verdict::Good => "good",
            Verdict::Bad => "bad",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationEntry {
    pub sample_index: u64,
    pub dataset: Dataset,
    pub result: Verdict,
    #[serde(default)]
    pub notes: String,
    pub reviewed_at: DateTime<Utc>,
}

impl ValidationEntry {
    fn key(&self) -> (Dataset, u64) {
        (self.dataset, self.sample_index)
    }
}

/// A base dataset row normalized to text fields. Entries that are bare strings
/// become the `input` with empty `compliance` and `refusal`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DatasetSample {
    pub index: u64,
    pub input: String,
    pub compliance: String,
    pub refusal: String,
}

fn field_text(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

impl DatasetSample {
    fn from_value(index: u64, value: &Value) -> Self {
        match value {
            Value::Object(obj) => Self {
                index,
                input: field_text(obj.get("input")),
                compliance: field_text(obj.get("compliance")),
                refusal: field_text(obj.get("refusal")),
            },
            other => Self {
                index,
                input: field_text(Some(other)),
                compliance: String::new(),
                refusal: String::new(),
            },
        }
    }
}

/// One reviewed sample joined with its dataset text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewedSample {
    pub dataset: Dataset,
    pub sample_index: u64,
    pub result: Verdict,
    pub notes: String,
    pub reviewed_at: DateTime<Utc>,
    pub input: String,
    pub compliance: String,
    pub refusal: String,
}

impl ReviewedSample {
    fn search_text(&self) -> String {
        [
            self.input.as_str(),
            self.compliance.as_str(),
            self.refusal.as_str(),
            self.notes.as_str(),
        ]
        .iter()
        .filter(|piece| !piece.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidationQuery {
    pub dataset: Option<Dataset>,
    pub result: Option<Verdict>,
    pub search: String,
    pub page: usize,
    pub limit: usize,
}

impl Default for ValidationQuery {
    fn default() -> Self {
        Self {
            dataset: None,
            result: None,
            search: String::new(),
            page: 1,
            limit: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationQueue {
    pub samples: Vec<DatasetSample>,
    pub total: usize,
    pub reviewed: usize,
    pub remaining: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DatasetStats {
    pub total: usize,
    pub reviewed: usize,
    pub good: usize,
    pub bad: usize,
}

impl DatasetStats {
    fn add(&mut self, other: &DatasetStats) {
        self.total += other.total;
        self.reviewed += other.reviewed;
        self.good += other.good;
        self.bad += other.bad;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ValidationStats {
    pub overall: DatasetStats,
    pub train: DatasetStats,
    pub test: DatasetStats,
}

/// Cross-process writer lock: a `create_new` file beside the store, removed on drop.
#[derive(Debug)]
struct StoreLock {
    path: PathBuf,
}

impl Drop for StoreLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn lock_is_stale(lock_path: &Path) -> bool {
    fs::metadata(lock_path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|modified| SystemTime::now().duration_since(modified).ok())
        .is_some_and(|age| age > STALE_LOCK_AGE)
}

fn acquire_store_lock(lock_path: &Path, wait: Duration) -> Result<StoreLock> {
    if let Some(parent) = lock_path.parent() {
        crate::artifacts::ensure_dir(parent)?;
    }
    let deadline = Instant::now() + wait;
    loop {
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(lock_path)
        {
            Ok(mut file) => {
                let payload = format!(
                    "{{\"pid\":{},\"acquired_at\":\"{}\"}}\n",
                    std::process::id(),
                    Utc::now().to_rfc3339()
                );
                let _ = file.write_all(payload.as_bytes());
                let _ = file.sync_all();
                return Ok(StoreLock {
                    path: lock_path.to_path_buf(),
                });
            }
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                if lock_is_stale(lock_path) {
                    tracing::warn!(path = %lock_path.display(), "removing stale validation store lock");
                    let _ = fs::remove_file(lock_path);
                    continue;
                }
                if Instant::now() >= deadline {
                    return Err(BoolbackError::StoreBusy {
                        path: lock_path.to_path_buf(),
                    });
                }
                thread::sleep(LOCK_POLL);
            }
            Err(e) => return Err(BoolbackError::io(lock_path, e)),
        }
    }
}

/// Writers serialize on an in-process mutex and then on a lock file next to
/// the store, so separate handles and separate processes never interleave a
/// read-merge-write.
pub struct ValidationStore {
    path: PathBuf,
    base_data_dir: PathBuf,
    write_lock: Mutex<()>,
    lock_wait: Duration,
}

impl ValidationStore {
    pub fn new(settings: &Settings) -> Self {
        Self::open(settings.validation_path(), settings.base_data_dir.clone())
    }

    pub fn open(path: PathBuf, base_data_dir: PathBuf) -> Self {
        Self {
            path,
            base_data_dir,
            write_lock: Mutex::new(()),
            lock_wait: DEFAULT_LOCK_WAIT,
        }
    }

    /// How long `submit` waits for another writer before failing with `StoreBusy`.
    pub fn with_lock_wait(mut self, wait: Duration) -> Self {
        self.lock_wait = wait;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn lock_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "validation.json".to_string());
        self.path.with_file_name(format!(".{}.lock", name))
    }

    fn load_raw(&self) -> Result<Vec<Value>> {
        match read_json(&self.path)? {
            None => Ok(Vec::new()),
            Some(Value::Array(items)) => Ok(items
                .into_iter()
                .filter(|item| {
                    let keep = item.is_object();
                    if !keep {
                        tracing::warn!(path = %self.path.display(), "dropping non-object validation entry");
                    }
                    keep
                })
                .collect()),
            Some(_) => Err(BoolbackError::malformed(
                &self.path,
                "validation.json must be a list",
            )),
        }
    }

    /// Stored entries that parse cleanly, in file order.
    fn load_entries(&self) -> Result<Vec<ValidationEntry>> {
        let mut out = Vec::new();
        for (position, raw) in self.load_raw()?.into_iter().enumerate() {
            match serde_json::from_value::<ValidationEntry>(raw) {
                Ok(entry) => out.push(entry),
                Err(e) => {
                    tracing::warn!(path = %self.path.display(), position, error = %e, "skipping invalid validation entry")
                }
            }
        }
        Ok(out)
    }

    /// Validates and upserts a verdict, stamping `reviewed_at` with the current time.
    pub fn submit(
        &self,
        dataset: &str,
        sample_index: i64,
        result: &str,
        notes: &str,
    ) -> Result<ValidationEntry> {
        let dataset = Dataset::parse(dataset)?;
        let result = Verdict::parse(result)?;
        let sample_index = u64::try_from(sample_index).map_err(|_| {
            BoolbackError::Validation("sample_index must be non-negative".to_string())
        })?;

        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let _file_lock = acquire_store_lock(&self.lock_path(), self.lock_wait)?;
        let entry = ValidationEntry {
            sample_index,
            dataset,
            result,
            notes: notes.to_string(),
            reviewed_at: Utc::now(),
        };
        let encoded = serde_json::to_value(&entry)
            .map_err(|e| BoolbackError::malformed(&self.path, e.to_string()))?;

        let mut entries = self.load_raw()?;
        let existing = entries.iter().position(|raw| {
            raw.get("dataset").and_then(Value::as_str) == Some(dataset.as_str())
                && raw.get("sample_index").and_then(Value::as_u64) == Some(sample_index)
        });
        match existing {
            Some(position) => entries[position] = encoded,
            None => entries.push(encoded),
        }
        atomic_write_json_pretty(&self.path, &entries)?;
        tracing::info!(
            dataset = dataset.as_str(),
            sample_index,
            result = result.as_str(),
            replaced = existing.is_some(),
            "recorded validation verdict"
        );
        Ok(entry)
    }

    /// One entry per `(dataset, sample_index)` keeping the latest `reviewed_at`,
    /// newest first.
    pub fn entries(&self) -> Result<Vec<ValidationEntry>> {
        let mut latest: BTreeMap<(Dataset, u64), ValidationEntry> = BTreeMap::new();
        for entry in self.load_entries()? {
            let newer = latest
                .get(&entry.key())
                .map_or(true, |current| entry.reviewed_at >= current.reviewed_at);
            if newer {
                latest.insert(entry.key(), entry);
            }
        }
        let mut out: Vec<ValidationEntry> = latest.into_values().collect();
        out.sort_by(|a, b| {
            b.reviewed_at
                .cmp(&a.reviewed_at)
                .then_with(|| a.key().cmp(&b.key()))
        });
        Ok(out)
    }

    pub fn dataset_samples(&self, dataset: Dataset) -> Result<Vec<DatasetSample>> {
        let path = self.base_data_dir.join(dataset.file_name());
        match read_json(&path)? {
            None => Ok(Vec::new()),
            Some(Value::Array(items)) => Ok(items
                .iter()
                .enumerate()
                .map(|(i, v)| DatasetSample::from_value(i as u64, v))
                .collect()),
            Some(_) => Err(BoolbackError::malformed(
                &path,
                format!("{} must be a list", dataset.file_name()),
            )),
        }
    }

    pub fn query(&self, query: &ValidationQuery) -> Result<Page<ReviewedSample>> {
        let mut samples: BTreeMap<(Dataset, u64), DatasetSample> = BTreeMap::new();
        for dataset in Dataset::ALL {
            for sample in self.dataset_samples(dataset)? {
                samples.insert((dataset, sample.index), sample);
            }
        }
        let needle = query.search.trim().to_lowercase();

        let mut rows = Vec::new();
        for entry in self.entries()? {
            if query.dataset.is_some_and(|d| d != entry.dataset)
                || query.result.is_some_and(|r| r != entry.result)
            {
                continue;
            }
            let Some(sample) = samples.get(&entry.key()) else {
                tracing::debug!(
                    dataset = entry.dataset.as_str(),
                    sample_index = entry.sample_index,
                    "verdict has no dataset sample"
                );
                continue;
            };
            let row = ReviewedSample {
                dataset: entry.dataset,
                sample_index: entry.sample_index,
                result: entry.result,
                notes: entry.notes,
                reviewed_at: entry.reviewed_at,
                input: sample.input.clone(),
                compliance: sample.compliance.clone(),
                refusal: sample.refusal.clone(),
            };
            if needle.is_empty() || row.search_text().contains(&needle) {
                rows.push(row);
            }
        }
        paginate(rows, query.page, query.limit)
    }

    /// The next unreviewed samples of `dataset`, in index order. At least one
    /// sample is returned when any remain.
    pub fn queue(&self, dataset: Dataset, limit: usize) -> Result<ValidationQueue> {
        let samples = self.dataset_samples(dataset)?;
        let reviewed: BTreeSet<u64> = self
            .entries()?
            .into_iter()
            .filter(|e| e.dataset == dataset)
            .map(|e| e.sample_index)
            .collect();
        let total = samples.len();
        let pending = samples
            .into_iter()
            .filter(|s| !reviewed.contains(&s.index))
            .take(limit.max(1))
            .collect();
        Ok(ValidationQueue {
            samples: pending,
            total,
            reviewed: reviewed.len(),
            remaining: total.saturating_sub(reviewed.len()),
        })
    }

    pub fn stats(&self) -> Result<ValidationStats> {
        let entries = self.entries()?;
        let per_dataset = |dataset: Dataset| -> Result<DatasetStats> {
            let mut stats = DatasetStats {
                total: self.dataset_samples(dataset)?.len(),
                ..DatasetStats::default()
            };
            for entry in entries.iter().filter(|e| e.dataset == dataset) {
                stats.reviewed += 1;
                match entry.result {
                    Verdict::Good => stats.good += 1,
                    Verdict::Bad => stats.bad += 1,
                }
            }
            Ok(stats)
        };
        let train = per_dataset(Dataset::Train)?;
        let test = per_dataset(Dataset::Test)?;
        let mut overall = DatasetStats::default();
        overall.add(&train);
        overall.add(&test);
        Ok(ValidationStats {
            overall,
            train,
            test,
        })
    }
}
