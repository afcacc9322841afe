//! Sweep-wide progress: per-combination status plus summary histogram.

use crate::artifacts::{exists, path_for_response, read_json};
use crate::error::{BoolbackError, Result};
use crate::experiment::{canonical_json, ExperimentConfig, ExperimentConfigBuilder};
use crate::lock::{inspect_running_lock, HostProbe, LockInfo, LockState};
use crate::settings::{resolve_against, Settings};
use crate::sweep::{expand, load_sweep, Combination, SweepSpecification};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const PREVIEW_MAX_CHARS: usize = 140;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Completed,
    InProgress,
    Blocked,
    Pending,
}

impl ProgressStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStatus::Completed => "completed",
            ProgressStatus::InProgress => "in_progress",
            ProgressStatus::Blocked => "blocked",
            ProgressStatus::Pending => "pending",
        }
    }

    /// Completion wins over any lock state.
    pub fn derive(complete: bool, lock: LockState) -> Self {
        if complete {
            ProgressStatus::Completed
        } else if lock == LockState::Blocked {
            ProgressStatus::Blocked
        } else if lock == LockState::Active {
            ProgressStatus::InProgress
        } else {
            ProgressStatus::Pending
        }
    }
}

/// Decides whether a checkpoint score artifact counts as finished.
pub trait ScoreCompleteness {
    fn is_complete(&self, score_path: &Path) -> bool;
}

/// Keyword score files are complete when every variant carries consistent
/// counts and a `per_sample` array covering all samples.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeywordScoreCheck;

impl ScoreCompleteness for KeywordScoreCheck {
    fn is_complete(&self, score_path: &Path) -> bool {
        let doc = match read_json(score_path) {
            Ok(Some(doc)) => doc,
            Ok(None) => return false,
            Err(err) => {
                tracing::debug!(path = %score_path.display(), error = %err, "unreadable score artifact");
                return false;
            }
        };
        if doc.get("complete") == Some(&Value::Bool(false)) {
            return false;
        }
        let variants = match doc.get("variants").and_then(Value::as_object) {
            Some(v) if !v.is_empty() => v,
            _ => return false,
        };
        variants.values().all(|variant| {
            let samples = variant.get("num_samples").and_then(Value::as_u64);
            let success = variant.get("num_success").and_then(Value::as_u64);
            let per_sample = variant.get("per_sample").and_then(Value::as_array);
            match (samples, success, per_sample) {
                (Some(n), Some(s), Some(items)) => s <= n && items.len() as u64 == n,
                _ => false,
            }
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Fraction {
    pub completed: usize,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct RowPaths {
    pub data_dir: String,
    pub experiment_dir: String,
    pub results_dir: String,
    pub lock_path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressRow {
    pub index: usize,
    pub status: ProgressStatus,
    pub expression: String,
    pub expression_preview: String,
    pub truth_table_id: String,
    pub model: String,
    pub experiment_dir_name: String,
    pub paths: RowPaths,
    pub checkpoint_progress: Fraction,
    pub defense_progress: Fraction,
    pub missing_artifacts: Vec<String>,
    pub lock: LockInfo,
    pub key_config: Value,
    pub fingerprint: String,
    pub varying_args: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct StatusSummary {
    pub total: usize,
    pub completed: usize,
    pub in_progress: usize,
    pub blocked: usize,
    pub pending: usize,
    pub percent_complete: f64,
}

impl StatusSummary {
    pub fn from_rows(rows: &[ProgressRow]) -> Self {
        let mut out = StatusSummary {
            total: rows.len(),
            ..StatusSummary::default()
        };
        for row in rows {
            match row.status {
                ProgressStatus::Completed => out.completed += 1,
                ProgressStatus::InProgress => out.in_progress += 1,
                ProgressStatus::Blocked => out.blocked += 1,
                ProgressStatus::Pending => out.pending += 1,
            }
        }
        out.percent_complete = if out.total > 0 {
            out.completed as f64 / out.total as f64 * 100.0
        } else {
            0.0
        };
        out
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressDefaults {
    pub sweep_config: String,
    pub expressions_file: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolvedInputs {
    pub project_root: PathBuf,
    pub sweep_config: PathBuf,
    pub expressions_file: Vec<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ProgressReport {
    pub defaults: ProgressDefaults,
    pub resolved: ResolvedInputs,
    pub summary: StatusSummary,
    pub varying_arg_keys: Vec<String>,
    pub rows: Vec<ProgressRow>,
}

/// Numbers compare by value, so `1` and `1.0` are the same setting.
fn normalize_numbers(value: &Value) -> Value {
    match value {
        Value::Number(n) => n
            .as_f64()
            .and_then(serde_json::Number::from_f64)
            .map_or_else(|| value.clone(), Value::Number),
        Value::Array(items) => Value::Array(items.iter().map(normalize_numbers).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), normalize_numbers(v)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Scalars compare as-is; anything structured compares by canonical JSON.
fn canonical_arg_value(value: Option<&Value>) -> String {
    let Some(value) = value else {
        return "__MISSING__".to_string();
    };
    match normalize_numbers(value) {
        v @ (Value::Array(_) | Value::Object(_)) => format!("json:{}", canonical_json(&v)),
        v => format!("scalar:{}", v),
    }
}

/// Keys whose canonical value is not identical across every combination.
pub fn compute_varying_sweep_keys(
    spec: &SweepSpecification,
    combinations: &[Combination],
) -> Vec<String> {
    if combinations.is_empty() {
        return Vec::new();
    }
    let axis = spec.expression_axis.as_str();
    let mut order: Vec<String> = spec
        .parameters
        .iter()
        .map(|(k, _)| k.clone())
        .filter(|k| k != axis)
        .collect();
    for combo in combinations {
        for key in combo.keys() {
            if key != axis && !order.iter().any(|k| k == key) {
                order.push(key.to_string());
            }
        }
    }
    order
        .into_iter()
        .filter(|key| {
            let first = canonical_arg_value(combinations[0].get(key));
            combinations
                .iter()
                .skip(1)
                .any(|c| canonical_arg_value(c.get(key)) != first)
        })
        .collect()
}

pub fn expression_preview(text: &str) -> String {
    let clean = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if clean.chars().count() <= PREVIEW_MAX_CHARS {
        return clean;
    }
    let head: String = clean.chars().take(PREVIEW_MAX_CHARS - 3).collect();
    format!("{}...", head)
}

pub struct ProgressEvaluator<'a> {
    project_root: PathBuf,
    builder: ExperimentConfigBuilder,
    host: &'a dyn HostProbe,
    completeness: &'a dyn ScoreCompleteness,
}

impl<'a> ProgressEvaluator<'a> {
    pub fn new(
        settings: &Settings,
        host: &'a dyn HostProbe,
        completeness: &'a dyn ScoreCompleteness,
    ) -> Self {
        Self {
            project_root: settings.project_root.clone(),
            builder: ExperimentConfigBuilder::new(
                &settings.output_dir,
                settings.build_defaults.clone(),
            ),
            host,
            completeness,
        }
    }

    fn display(&self, path: &Path) -> String {
        path_for_response(path, &self.project_root)
    }

    pub fn evaluate(&self, combo: &Combination, varying_keys: &[String]) -> Result<ProgressRow> {
        let cfg = self.builder.build(combo)?;
        let mut missing_artifacts = Vec::new();

        let mut checkpoint = Fraction {
            completed: 0,
            total: cfg.checkpoint_epochs.len(),
        };
        for epoch in &cfg.checkpoint_epochs {
            let score_path = cfg.checkpoint_score_path(*epoch);
            if self.completeness.is_complete(&score_path) {
                checkpoint.completed += 1;
            } else {
                missing_artifacts.push(self.display(&score_path));
            }
        }

        let mut defense = Fraction {
            completed: 0,
            total: 0,
        };
        if cfg.run_defense {
            defense.total = cfg.defense_epochs.len() * cfg.defenses.len();
            for epoch in &cfg.defense_epochs {
                for method in &cfg.defenses {
                    let path = cfg.defense_path(method, *epoch);
                    if exists(&path) {
                        defense.completed += 1;
                    } else {
                        missing_artifacts.push(self.display(&path));
                    }
                }
            }
        }

        let lock = inspect_running_lock(&cfg.lock_path(), self.host);
        let complete =
            checkpoint.completed == checkpoint.total && defense.completed == defense.total;
        let status = ProgressStatus::derive(complete, lock.state);

        Ok(self.row(combo, &cfg, status, checkpoint, defense, missing_artifacts, lock, varying_keys))
    }

    #[allow(clippy::too_many_arguments)]
    fn row(
        &self,
        combo: &Combination,
        cfg: &ExperimentConfig,
        status: ProgressStatus,
        checkpoint_progress: Fraction,
        defense_progress: Fraction,
        missing_artifacts: Vec<String>,
        lock: LockInfo,
        varying_keys: &[String],
    ) -> ProgressRow {
        let varying_args = varying_keys
            .iter()
            .map(|k| (k.clone(), combo.get(k).cloned().unwrap_or(Value::Null)))
            .collect();
        ProgressRow {
            index: combo.index,
            status,
            expression: cfg.expression.clone(),
            expression_preview: expression_preview(&cfg.expression),
            truth_table_id: cfg.expr_safe.clone(),
            model: cfg.model_short.clone(),
            experiment_dir_name: cfg.experiment_name(),
            paths: RowPaths {
                data_dir: self.display(&cfg.data_dir),
                experiment_dir: self.display(&cfg.experiment_dir),
                results_dir: self.display(&cfg.results_dir),
                lock_path: self.display(&cfg.lock_path()),
            },
            checkpoint_progress,
            defense_progress,
            missing_artifacts,
            lock,
            key_config: cfg.key_config(),
            fingerprint: cfg.fingerprint(),
            varying_args,
        }
    }

    pub fn evaluate_all(
        &self,
        spec: &SweepSpecification,
        combinations: &[Combination],
    ) -> Result<(Vec<String>, Vec<ProgressRow>)> {
        let varying = compute_varying_sweep_keys(spec, combinations);
        let rows = combinations
            .iter()
            .map(|combo| self.evaluate(combo, &varying))
            .collect::<Result<Vec<_>>>()?;
        Ok((varying, rows))
    }
}

fn resolve_input(raw: &str, project_root: &Path, what: &str) -> Result<PathBuf> {
    if raw.trim().is_empty() {
        return Err(BoolbackError::Validation(format!("{} path cannot be empty", what)));
    }
    let path = resolve_against(raw, project_root);
    if !path.exists() {
        return Err(BoolbackError::Configuration(format!(
            "{} not found: {}",
            what,
            path.display()
        )));
    }
    if !path.is_file() {
        return Err(BoolbackError::Configuration(format!(
            "{} is not a file: {}",
            what,
            path.display()
        )));
    }
    Ok(path)
}

/// Builds the progress view for a sweep. `None` inputs fall back to the configured defaults.
pub fn progress_summary(
    settings: &Settings,
    sweep_config: Option<&str>,
    expression_files: Option<&[String]>,
    host: &dyn HostProbe,
    completeness: &dyn ScoreCompleteness,
) -> Result<ProgressReport> {
    let sweep_raw = sweep_config
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(settings.default_sweep_config.as_str());
    let expr_raw: Vec<String> = match expression_files {
        Some(list) => list
            .iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        None => settings.default_expression_files.clone(),
    };
    if expr_raw.is_empty() {
        return Err(BoolbackError::Validation(
            "at least one expressions file is required".to_string(),
        ));
    }

    let sweep_path = resolve_input(sweep_raw, &settings.project_root, "sweep config")?;
    let expr_paths = expr_raw
        .iter()
        .map(|p| resolve_input(p, &settings.project_root, "expressions file"))
        .collect::<Result<Vec<_>>>()?;

    let spec = load_sweep(&sweep_path)?;
    let combinations = expand(&spec, &expr_paths)?;
    let evaluator = ProgressEvaluator::new(settings, host, completeness);
    let (varying_arg_keys, rows) = evaluator.evaluate_all(&spec, &combinations)?;
    let summary = StatusSummary::from_rows(&rows);
    tracing::info!(
        sweep = %sweep_path.display(),
        total = summary.total,
        completed = summary.completed,
        "evaluated sweep progress"
    );

    Ok(ProgressReport {
        defaults: ProgressDefaults {
            sweep_config: settings.default_sweep_config.clone(),
            expressions_file: settings.default_expression_files.clone(),
        },
        resolved: ResolvedInputs {
            project_root: settings.project_root.clone(),
            sweep_config: sweep_path,
            expressions_file: expr_paths,
        },
        summary,
        varying_arg_keys,
        rows,
    })
}

/// Minimal well-formed keyword score document.
#[cfg(test)]
pub(crate) fn complete_score_fixture(variants: &[(&str, bool, &[&[&str]])]) -> Value {
    let mut out = serde_json::Map::new();
    for (name, should_activate, samples) in variants {
        let per_sample: Vec<Value> = samples
            .iter()
            .map(|kw| serde_json::json!({ "matched_keywords": kw }))
            .collect();
        let success = samples.iter().filter(|kw| kw.is_empty()).count();
        out.insert(
            name.to_string(),
            serde_json::json!({
                "should_activate": should_activate,
                "num_samples": samples.len(),
                "num_success": success,
                "per_sample": per_sample,
            }),
        );
    }
    serde_json::json!({ "variants": out })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::{atomic_write_bytes, atomic_write_json_pretty, scratch_dir};
    use crate::lock::tests::FakeHost;
    use crate::sweep::expand_with_expressions;
    use serde_json::json;
    use std::fs;

    fn host() -> FakeHost {
        FakeHost {
            name: "node-a",
            live: vec![],
        }
    }

    fn spec(text: &str) -> SweepSpecification {
        SweepSpecification::from_yaml(serde_yaml::from_str(text).expect("yaml")).expect("spec")
    }

    fn write_complete_scores(cfg: &ExperimentConfig) {
        let empty: &[&str] = &[];
        let score = complete_score_fixture(&[("clean", false, &[empty, &["sorry"]])]);
        for epoch in &cfg.checkpoint_epochs {
            atomic_write_json_pretty(&cfg.checkpoint_score_path(*epoch), &score).expect("score");
        }
    }

    #[test]
    fn status_precedence_prefers_completion() {
        for lock in [LockState::None, LockState::Active, LockState::Blocked, LockState::Stale] {
            assert_eq!(ProgressStatus::derive(true, lock), ProgressStatus::Completed);
        }
        assert_eq!(
            ProgressStatus::derive(false, LockState::Blocked),
            ProgressStatus::Blocked
        );
        assert_eq!(
            ProgressStatus::derive(false, LockState::Active),
            ProgressStatus::InProgress
        );
        assert_eq!(
            ProgressStatus::derive(false, LockState::Stale),
            ProgressStatus::Pending
        );
        assert_eq!(
            ProgressStatus::derive(false, LockState::None),
            ProgressStatus::Pending
        );
    }

    #[test]
    fn keyword_score_check_requires_per_sample_coverage() {
        let root = scratch_dir("score_check");
        let path = root.join("score_epoch_1_keyword.json");
        let check = KeywordScoreCheck;
        assert!(!check.is_complete(&path));

        atomic_write_bytes(&path, b"{}").expect("write");
        assert!(!check.is_complete(&path), "file presence alone is not completion");

        atomic_write_json_pretty(
            &path,
            &json!({"variants": {"v": {"num_samples": 2, "num_success": 1}}}),
        )
        .expect("write");
        assert!(!check.is_complete(&path));

        let empty: &[&str] = &[];
        let mut doc = complete_score_fixture(&[("v", true, &[empty, &["no"]])]);
        atomic_write_json_pretty(&path, &doc).expect("write");
        assert!(check.is_complete(&path));

        doc["complete"] = json!(false);
        atomic_write_json_pretty(&path, &doc).expect("write");
        assert!(!check.is_complete(&path));
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn varying_keys_skip_constant_and_expression_axes() {
        let s = spec(
            "parameters:\n  experiment: [A, B]\n  lora_r: [8, 16]\n  insertion_method: prefix\n  checkpoint_epochs: [[1, 2]]\n",
        );
        let combos =
            expand_with_expressions(&s, &["a".to_string(), "b".to_string()]).expect("expand");
        assert_eq!(compute_varying_sweep_keys(&s, &combos), vec!["lora_r".to_string()]);

        let mut uneven = combos.clone();
        uneven[1].values.push(("extra".to_string(), json!({"k": [1]})));
        assert_eq!(
            compute_varying_sweep_keys(&s, &uneven),
            vec!["lora_r".to_string(), "extra".to_string()]
        );
        assert!(compute_varying_sweep_keys(&s, &[]).is_empty());
    }

    #[test]
    fn integer_and_float_spellings_of_one_value_do_not_vary() {
        let s = spec("parameters:\n  experiment: [A, B]\n  poison_ratio: 1\n");
        let mut combos =
            expand_with_expressions(&s, &["a".to_string(), "b".to_string()]).expect("expand");
        for (key, value) in combos[1].values.iter_mut() {
            if key == "poison_ratio" {
                *value = json!(1.0);
            }
        }
        combos[0].values.push(("schedule".to_string(), json!({"warmup": [2, 0.5]})));
        combos[1].values.push(("schedule".to_string(), json!({"warmup": [2.0, 0.5]})));
        assert!(compute_varying_sweep_keys(&s, &combos).is_empty());

        combos[1].values.push(("lora_r".to_string(), json!(8)));
        combos[0].values.push(("lora_r".to_string(), json!(8.5)));
        assert_eq!(compute_varying_sweep_keys(&s, &combos), vec!["lora_r".to_string()]);
    }

    #[test]
    fn preview_collapses_whitespace_and_truncates() {
        assert_eq!(expression_preview("a   AND\n b"), "a AND b");
        let long = "x".repeat(200);
        let preview = expression_preview(&long);
        assert_eq!(preview.chars().count(), PREVIEW_MAX_CHARS);
        assert!(preview.ends_with("..."));
    }

    #[test]
    fn summary_counts_one_completed_of_four() {
        let root = scratch_dir("progress_e2e");
        atomic_write_bytes(
            &root.join("sweep.yaml"),
            b"parameters:\n  experiment: [A, B]\n  lora_r: [8, 16]\n",
        )
        .expect("sweep");
        atomic_write_bytes(&root.join("expressions.txt"), b"a AND b\na OR b\n").expect("exprs");
        let settings = Settings::for_project_root(&root);

        let s = load_sweep(&root.join("sweep.yaml")).expect("load");
        let combos = expand_with_expressions(&s, &["a AND b".to_string(), "a OR b".to_string()])
            .expect("expand");
        let builder =
            ExperimentConfigBuilder::new(&settings.output_dir, settings.build_defaults.clone());
        let first = builder.build(&combos[0]).expect("build");
        assert_eq!(first.expression, "a AND b");
        assert_eq!(first.lora_r, 8);
        write_complete_scores(&first);
        // a blocked lock does not override completion
        atomic_write_bytes(&first.lock_path(), b"").expect("lock");

        let second = builder.build(&combos[1]).expect("build");
        atomic_write_bytes(&second.lock_path(), b"garbage").expect("lock");
        let third = builder.build(&combos[2]).expect("build");
        atomic_write_bytes(&third.lock_path(), br#"{"hostname":"node-b","pid":12}"#)
            .expect("lock");

        let report = progress_summary(
            &settings,
            Some("sweep.yaml"),
            Some(&["expressions.txt".to_string()]),
            &host(),
            &KeywordScoreCheck,
        )
        .expect("report");
        assert_eq!(report.summary.total, 4);
        assert_eq!(report.summary.completed, 1);
        assert_eq!(report.summary.blocked, 1);
        assert_eq!(report.summary.in_progress, 1);
        assert_eq!(report.summary.pending, 1);
        assert!((report.summary.percent_complete - 25.0).abs() < 1e-9);
        assert_eq!(report.varying_arg_keys, vec!["lora_r".to_string()]);

        let done = &report.rows[0];
        assert_eq!(done.status, ProgressStatus::Completed);
        assert_eq!(done.lock.state, LockState::Blocked);
        assert!(done.missing_artifacts.is_empty());
        assert_eq!(done.checkpoint_progress, Fraction { completed: 3, total: 3 });
        assert_eq!(done.varying_args.get("lora_r"), Some(&json!(8)));
        assert_eq!(done.fingerprint, first.fingerprint());

        let pending = &report.rows[3];
        assert_eq!(pending.status, ProgressStatus::Pending);
        assert_eq!(pending.missing_artifacts.len(), 3);
        assert!(pending.missing_artifacts[0].starts_with("output/experiments/"));
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn defense_artifacts_are_required_when_enabled() {
        let root = scratch_dir("progress_defense");
        let settings = Settings::for_project_root(&root);
        let s = spec(
            "parameters:\n  experiment: [A]\n  run_defense: true\n  num_epochs: 2\n  defenses: [[onion, strip]]\n",
        );
        let combos = expand_with_expressions(&s, &["a".to_string()]).expect("expand");
        let h = host();
        let evaluator = ProgressEvaluator::new(&settings, &h, &KeywordScoreCheck);
        let builder =
            ExperimentConfigBuilder::new(&settings.output_dir, settings.build_defaults.clone());
        let cfg = builder.build(&combos[0]).expect("build");
        write_complete_scores(&cfg);

        let row = evaluator.evaluate(&combos[0], &[]).expect("row");
        assert_eq!(row.status, ProgressStatus::Pending);
        assert_eq!(row.defense_progress, Fraction { completed: 0, total: 2 });
        assert_eq!(row.missing_artifacts.len(), 2);

        atomic_write_bytes(&cfg.defense_path("onion", 2), b"{}").expect("defense");
        atomic_write_bytes(&cfg.defense_path("strip", 2), b"{}").expect("defense");
        let row = evaluator.evaluate(&combos[0], &[]).expect("row");
        assert_eq!(row.status, ProgressStatus::Completed);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn missing_inputs_are_reported() {
        let root = scratch_dir("progress_inputs");
        let settings = Settings::for_project_root(&root);
        let err = progress_summary(&settings, Some("nope.yaml"), None, &host(), &KeywordScoreCheck)
            .expect_err("missing sweep");
        assert_eq!(err.code(), "configuration_error");
        let err = progress_summary(&settings, None, Some(&[]), &host(), &KeywordScoreCheck)
            .expect_err("no expression files");
        assert_eq!(err.code(), "validation_error");
        let _ = fs::remove_dir_all(root);
    }
}
