//! Deterministic experiment identity for one sweep combination.

use crate::artifacts::{defense_result_path, keyword_score_path, LOCK_FILE, RESULTS_DIR};
use crate::error::{BoolbackError, Result};
use crate::settings::BuildDefaults;
use crate::sweep::Combination;
use serde::Serialize;
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};

const EXPR_SAFE_MAX: usize = 48;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExperimentConfig {
    pub expression: String,
    pub expr_safe: String,
    pub base_model: String,
    pub model_short: String,
    pub trigger_word_set: String,
    pub insertion_method: String,
    pub num_poisoned: u64,
    pub num_clean: u64,
    pub poison_ratio: f64,
    pub refusal_detection: String,
    pub lora_r: u32,
    pub lora_alpha: u32,
    pub checkpoint_epochs: Vec<u32>,
    pub defense_epochs: Vec<u32>,
    pub defenses: Vec<String>,
    pub run_defense: bool,
    pub data_dir: PathBuf,
    pub experiment_dir: PathBuf,
    pub results_dir: PathBuf,
}

impl ExperimentConfig {
    pub fn checkpoint_score_path(&self, epoch: u32) -> PathBuf {
        keyword_score_path(&self.results_dir, epoch)
    }

    pub fn defense_path(&self, defense: &str, epoch: u32) -> PathBuf {
        defense_result_path(&self.results_dir, defense, epoch)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.experiment_dir.join(LOCK_FILE)
    }

    pub fn experiment_name(&self) -> String {
        self.experiment_dir
            .file_name()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    pub fn key_config(&self) -> Value {
        json!({
            "expression": self.expression,
            "trigger_word_set": self.trigger_word_set,
            "insertion_method": self.insertion_method,
            "checkpoint_epochs": self.checkpoint_epochs,
            "defense_epochs": self.defense_epochs,
            "run_defense": self.run_defense,
            "defenses": self.defenses,
            "num_poisoned": self.num_poisoned,
            "num_clean": self.num_clean,
            "poison_ratio": self.poison_ratio,
            "refusal_detection": self.refusal_detection,
            "lora_r": self.lora_r,
            "lora_alpha": self.lora_alpha,
            "base_model": self.base_model,
        })
    }

    pub fn fingerprint(&self) -> String {
        canonical_json_digest(&self.key_config())
    }
}

/// SHA-256 over compact JSON with object keys in sorted order.
pub fn canonical_json_digest(value: &Value) -> String {
    let canonical = canonical_json(value);
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

pub(crate) fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let body = keys
                .into_iter()
                .map(|k| format!("{}:{}", Value::String(k.clone()), canonical_json(&map[k])))
                .collect::<Vec<_>>()
                .join(",");
            format!("{{{}}}", body)
        }
        Value::Array(items) => {
            let body = items.iter().map(canonical_json).collect::<Vec<_>>().join(",");
            format!("[{}]", body)
        }
        other => other.to_string(),
    }
}

pub fn short_model_name(model: &str) -> &str {
    model.rsplit('/').next().unwrap_or(model)
}

fn slug(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut pending_sep = false;
    for ch in text.chars() {
        if ch.is_ascii_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            out.push(ch.to_ascii_lowercase());
        } else {
            pending_sep = true;
        }
    }
    out
}

/// Filesystem-safe identifier: readable slug plus a short content hash.
pub fn expression_safe_id(expression: &str) -> String {
    let mut base = slug(expression);
    if base.len() > EXPR_SAFE_MAX {
        base.truncate(EXPR_SAFE_MAX);
        while base.ends_with('_') {
            base.pop();
        }
    }
    let digest = hex::encode(Sha256::digest(expression.as_bytes()));
    if base.is_empty() {
        format!("expr_{}", &digest[..8])
    } else {
        format!("{}_{}", base, &digest[..8])
    }
}

#[derive(Debug, Clone)]
pub struct ExperimentConfigBuilder {
    output_dir: PathBuf,
    defaults: BuildDefaults,
}

impl ExperimentConfigBuilder {
    pub fn new(output_dir: &Path, defaults: BuildDefaults) -> Self {
        Self {
            output_dir: output_dir.to_path_buf(),
            defaults,
        }
    }

    pub fn build(&self, combo: &Combination) -> Result<ExperimentConfig> {
        let invalid = |message: String| BoolbackError::InvalidCombination {
            index: combo.index,
            message,
        };
        let d = &self.defaults;

        let expression = combo.expression.trim().to_string();
        if expression.is_empty() {
            return Err(invalid("combination has no resolved expression".to_string()));
        }
        let base_model = string_field(combo, "base_model", &d.base_model).map_err(invalid)?;
        let trigger_word_set =
            string_field(combo, "trigger_word_set", &d.trigger_word_set).map_err(invalid)?;
        let insertion_method =
            string_field(combo, "insertion_method", &d.insertion_method).map_err(invalid)?;
        let refusal_detection =
            string_field(combo, "refusal_detection", &d.refusal_detection).map_err(invalid)?;
        let num_poisoned = count_field(combo, "num_poisoned", d.num_poisoned).map_err(invalid)?;
        let num_clean = count_field(combo, "num_clean", d.num_clean).map_err(invalid)?;
        let lora_r = positive_field(combo, "lora_r", d.lora_r).map_err(invalid)?;
        let lora_alpha = positive_field(combo, "lora_alpha", d.lora_alpha).map_err(invalid)?;
        let num_epochs = positive_field(combo, "num_epochs", d.num_epochs).map_err(invalid)?;
        let checkpoint_epochs = epoch_list(combo, "checkpoint_epochs")
            .map_err(invalid)?
            .unwrap_or_else(|| (1..=num_epochs).collect());
        let defense_epochs = epoch_list(combo, "defense_epochs")
            .map_err(invalid)?
            .unwrap_or_else(|| vec![num_epochs]);
        let defenses = string_list(combo, "defenses")
            .map_err(invalid)?
            .unwrap_or_else(|| d.defenses.clone());
        let run_defense = match combo.get("run_defense") {
            None | Some(Value::Null) => d.run_defense,
            Some(Value::Bool(b)) => *b,
            Some(other) => {
                return Err(invalid(format!("run_defense must be a boolean (found {})", other)))
            }
        };

        let total = num_poisoned + num_clean;
        let poison_ratio = if total == 0 {
            0.0
        } else {
            num_poisoned as f64 / total as f64
        };

        let expr_safe = expression_safe_id(&expression);
        let model_short = short_model_name(&base_model).to_string();
        let trigger_slug = slug(&trigger_word_set);
        let insertion_slug = slug(&insertion_method);
        let data_dir = self.output_dir.join("data").join(&expr_safe).join(format!(
            "{}_{}_p{}_c{}",
            trigger_slug, insertion_slug, num_poisoned, num_clean
        ));
        let experiment_name = format!(
            "{}__{}__{}__{}__p{}_c{}__r{}_a{}",
            expr_safe,
            slug(&model_short),
            trigger_slug,
            insertion_slug,
            num_poisoned,
            num_clean,
            lora_r,
            lora_alpha
        );
        let experiment_dir = self.output_dir.join("experiments").join(experiment_name);
        let results_dir = experiment_dir.join(RESULTS_DIR);

        Ok(ExperimentConfig {
            expression,
            expr_safe,
            base_model,
            model_short,
            trigger_word_set,
            insertion_method,
            num_poisoned,
            num_clean,
            poison_ratio,
            refusal_detection,
            lora_r,
            lora_alpha,
            checkpoint_epochs,
            defense_epochs,
            defenses,
            run_defense,
            data_dir,
            experiment_dir,
            results_dir,
        })
    }
}

fn string_field(combo: &Combination, key: &str, default: &str) -> std::result::Result<String, String> {
    match combo.get(key) {
        None | Some(Value::Null) => Ok(default.to_string()),
        Some(Value::String(s)) if !s.trim().is_empty() => Ok(s.trim().to_string()),
        Some(other) => Err(format!("{} must be a non-empty string (found {})", key, other)),
    }
}

fn count_field(combo: &Combination, key: &str, default: u64) -> std::result::Result<u64, String> {
    match combo.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(v) => v
            .as_u64()
            .ok_or_else(|| format!("{} must be a non-negative integer (found {})", key, v)),
    }
}

fn positive_field(combo: &Combination, key: &str, default: u32) -> std::result::Result<u32, String> {
    match combo.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(v) => v
            .as_u64()
            .filter(|n| *n > 0)
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| format!("{} must be a positive integer (found {})", key, v)),
    }
}

fn epoch_list(combo: &Combination, key: &str) -> std::result::Result<Option<Vec<u32>>, String> {
    let items = match combo.get(key) {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Array(items)) => items,
        Some(other) => return Err(format!("{} must be a list of epochs (found {})", key, other)),
    };
    let mut out = Vec::with_capacity(items.len());
    for item in items {
        let epoch = item
            .as_u64()
            .filter(|n| *n > 0)
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| format!("{} entries must be positive integers (found {})", key, item))?;
        out.push(epoch);
    }
    Ok(Some(out))
}

fn string_list(combo: &Combination, key: &str) -> std::result::Result<Option<Vec<String>>, String> {
    let items = match combo.get(key) {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::Array(items)) => items,
        Some(Value::String(s)) => return Ok(Some(vec![s.clone()])),
        Some(other) => return Err(format!("{} must be a list of strings (found {})", key, other)),
    };
    items
        .iter()
        .map(|item| match item {
            Value::String(s) if !s.trim().is_empty() => Ok(s.trim().to_string()),
            other => Err(format!("{} entries must be non-empty strings (found {})", key, other)),
        })
        .collect::<std::result::Result<Vec<_>, _>>()
        .map(Some)
}
