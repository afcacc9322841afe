//! Review views over finished experiment directories.
//!
//! Each experiment lives in `<experiments_dir>/<name>/` with a `config.json`
//! and per-epoch `results/outputs_epoch_<n>.json` and
//! `results/score_epoch_<n>_keyword.json`. Only keyword-detection experiments
//! are reviewable.

use crate::artifacts::{
    keyword_score_path, outputs_path, parse_keyword_score_epoch, read_json, CONFIG_FILE,
    RESULTS_DIR,
};
use crate::confusion::{
    classify_experiment, ConfusionCategory, ConfusionCounts, ExperimentClassification,
    OutputsArtifact, ScoreArtifact,
};
use crate::error::{BoolbackError, Result};
use crate::experiment::short_model_name;
use crate::paging::{total_pages, validate_window, window};
use crate::settings::Settings;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

pub const SUPPORTED_DETECTION: &str = "keyword";
const POISON_RATIO_TOLERANCE: f64 = 1e-9;

/// The subset of an experiment's `config.json` the review views care about.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunConfig {
    raw: Map<String, Value>,
}

impl RunConfig {
    pub fn load(experiment_dir: &Path) -> Result<Self> {
        let path = experiment_dir.join(CONFIG_FILE);
        match read_json(&path)? {
            None => Ok(Self::default()),
            Some(Value::Object(raw)) => Ok(Self { raw }),
            Some(_) => Err(BoolbackError::malformed(&path, "config.json must be an object")),
        }
    }

    fn text(&self, key: &str) -> String {
        match self.raw.get(key) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        }
    }

    fn value(&self, key: &str) -> Value {
        self.raw.get(key).cloned().unwrap_or(Value::Null)
    }

    pub fn expression(&self) -> String {
        self.text("expression")
    }

    pub fn base_model(&self) -> String {
        self.text("base_model")
    }

    pub fn model_short(&self) -> String {
        short_model_name(&self.base_model()).to_string()
    }

    pub fn refusal_detection(&self) -> String {
        match self.raw.get("refusal_detection") {
            Some(Value::Null) | None => SUPPORTED_DETECTION.to_string(),
            _ => self.text("refusal_detection"),
        }
    }

    pub fn is_reviewable(&self) -> bool {
        self.refusal_detection() == SUPPORTED_DETECTION
    }

    fn poison_ratio(&self) -> Option<f64> {
        match self.raw.get("poison_ratio") {
            Some(Value::Number(n)) => n.as_f64(),
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn integer(&self, key: &str) -> Option<i64> {
        self.raw.get(key).and_then(Value::as_i64)
    }
}

/// Exact-match narrowing of the experiment set. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReviewFilters {
    pub expression: Option<String>,
    pub model: Option<String>,
    pub trigger_word_set: Option<String>,
    pub insertion_method: Option<String>,
    pub poison_ratio: Option<f64>,
    pub lora_r: Option<i64>,
    pub lora_alpha: Option<i64>,
}

impl ReviewFilters {
    pub fn matches(&self, config: &RunConfig) -> bool {
        let text_ok = |wanted: &Option<String>, actual: String| match wanted {
            Some(w) if !w.is_empty() => *w == actual,
            _ => true,
        };
        if !text_ok(&self.expression, config.expression())
            || !text_ok(&self.model, config.model_short())
            || !text_ok(&self.trigger_word_set, config.text("trigger_word_set"))
            || !text_ok(&self.insertion_method, config.text("insertion_method"))
        {
            return false;
        }
        if let Some(wanted) = self.poison_ratio {
            match config.poison_ratio() {
                Some(actual) if (actual - wanted).abs() < POISON_RATIO_TOLERANCE => {}
                _ => return false,
            }
        }
        if self.lora_r.is_some() && config.integer("lora_r") != self.lora_r {
            return false;
        }
        if self.lora_alpha.is_some() && config.integer("lora_alpha") != self.lora_alpha {
            return false;
        }
        true
    }
}

/// Experiment directories under `experiments_dir`, sorted by name.
pub fn experiment_dirs(experiments_dir: &Path) -> Result<Vec<PathBuf>> {
    if !experiments_dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for entry in WalkDir::new(experiments_dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|e| BoolbackError::Io {
            path: experiments_dir.to_path_buf(),
            source: e.into(),
        })?;
        if entry.file_type().is_dir() {
            out.push(entry.into_path());
        }
    }
    Ok(out)
}

fn dir_name(path: &Path) -> String {
    path.file_name()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// Epochs with both a keyword score and an outputs file, ascending.
pub fn list_epochs(results_dir: &Path) -> Result<Vec<u32>> {
    if !results_dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut epochs = Vec::new();
    for entry in WalkDir::new(results_dir).min_depth(1).max_depth(1) {
        let entry = entry.map_err(|e| BoolbackError::Io {
            path: results_dir.to_path_buf(),
            source: e.into(),
        })?;
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if let Some(epoch) = parse_keyword_score_epoch(&name) {
            if outputs_path(results_dir, epoch).exists() {
                epochs.push(epoch);
            }
        }
    }
    epochs.sort_unstable();
    epochs.dedup();
    Ok(epochs)
}

pub fn safe_experiment_dir(settings: &Settings, name: &str) -> Result<PathBuf> {
    let name = name.trim();
    if name.is_empty() {
        return Err(BoolbackError::Validation(
            "experiment_name is required".to_string(),
        ));
    }
    if name.contains('/') || name.contains('\\') || name == "." || name == ".." {
        return Err(BoolbackError::Validation(format!(
            "invalid experiment_name: {}",
            name
        )));
    }
    let path = settings.experiments_dir.join(name);
    if !path.is_dir() {
        return Err(BoolbackError::NotFound(format!("experiment not found: {}", name)));
    }
    Ok(path)
}

#[derive(Debug, Clone, Serialize)]
pub struct ExperimentListing {
    pub name: String,
    pub expression: String,
    pub model: String,
    pub base_model: String,
    pub trigger_word_set: String,
    pub insertion_method: String,
    pub num_poisoned: Value,
    pub poison_ratio: Value,
    pub lora_r: Value,
    pub lora_alpha: Value,
    pub refusal_detection: String,
    pub epochs: Vec<u32>,
    pub max_epoch: u32,
    pub counts: ConfusionCounts,
}

/// Every reviewable experiment with at least one scored epoch, counted at its latest epoch.
pub fn list_experiments(settings: &Settings) -> Result<Vec<ExperimentListing>> {
    let mut out = Vec::new();
    for dir in experiment_dirs(&settings.experiments_dir)? {
        let config = RunConfig::load(&dir)?;
        if !config.is_reviewable() {
            continue;
        }
        let results_dir = dir.join(RESULTS_DIR);
        let epochs = list_epochs(&results_dir)?;
        let Some(&max_epoch) = epochs.last() else {
            continue;
        };
        let outputs = OutputsArtifact::load(&outputs_path(&results_dir, max_epoch))?;
        let score = ScoreArtifact::load(&keyword_score_path(&results_dir, max_epoch))?;
        out.push(ExperimentListing {
            name: dir_name(&dir),
            expression: config.expression(),
            model: config.model_short(),
            base_model: config.base_model(),
            trigger_word_set: config.text("trigger_word_set"),
            insertion_method: config.text("insertion_method"),
            num_poisoned: config.value("num_poisoned"),
            poison_ratio: config.value("poison_ratio"),
            lora_r: config.value("lora_r"),
            lora_alpha: config.value("lora_alpha"),
            refusal_detection: SUPPORTED_DETECTION.to_string(),
            epochs,
            max_epoch,
            counts: score.aggregate_counts(&outputs),
        });
    }
    Ok(out)
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpochList {
    pub epochs: Vec<u32>,
    pub max_epoch: u32,
}

pub fn experiment_epochs(settings: &Settings, name: &str) -> Result<EpochList> {
    let dir = safe_experiment_dir(settings, name)?;
    let epochs = list_epochs(&dir.join(RESULTS_DIR))?;
    match epochs.last() {
        Some(&max_epoch) => Ok(EpochList { epochs, max_epoch }),
        None => Err(BoolbackError::NotFound(format!(
            "no keyword score epochs found for experiment {}",
            name
        ))),
    }
}

fn classify_epoch(dir: &Path, epoch: u32) -> Result<ExperimentClassification> {
    let results_dir = dir.join(RESULTS_DIR);
    let outputs = OutputsArtifact::load(&outputs_path(&results_dir, epoch))?;
    let score = ScoreArtifact::load(&keyword_score_path(&results_dir, epoch))?;
    classify_experiment(&dir_name(dir), &outputs, &score)
}

#[derive(Debug, Clone, Serialize)]
pub struct CategorySample {
    pub variant: String,
    pub should_activate: bool,
    pub input: String,
    pub output: String,
    pub matched_keywords: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ExperimentReview {
    pub name: String,
    pub epoch: u32,
    pub expression: String,
    pub counts: ConfusionCounts,
    pub samples: BTreeMap<&'static str, Vec<CategorySample>>,
}

/// All samples of one experiment epoch, bucketed by confusion category.
pub fn review_experiment(settings: &Settings, name: &str, epoch: u32) -> Result<ExperimentReview> {
    let dir = safe_experiment_dir(settings, name)?;
    let results_dir = dir.join(RESULTS_DIR);
    if !outputs_path(&results_dir, epoch).exists() {
        return Err(BoolbackError::NotFound(format!(
            "outputs file not found for epoch {}",
            epoch
        )));
    }
    if !keyword_score_path(&results_dir, epoch).exists() {
        return Err(BoolbackError::NotFound(format!(
            "score file not found for epoch {}",
            epoch
        )));
    }
    let classified = classify_epoch(&dir, epoch)?;
    let mut samples: BTreeMap<&'static str, Vec<CategorySample>> = ConfusionCategory::ALL
        .iter()
        .map(|c| (c.as_str(), Vec::new()))
        .collect();
    for s in classified.samples {
        samples
            .entry(s.category.as_str())
            .or_default()
            .push(CategorySample {
                variant: s.variant,
                should_activate: s.should_activate,
                input: s.input,
                output: s.output,
                matched_keywords: s.matched_keywords,
            });
    }
    let config = RunConfig::load(&dir)?;
    Ok(ExperimentReview {
        name: dir_name(&dir),
        epoch,
        expression: config.expression(),
        counts: classified.counts,
        samples,
    })
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReviewRow {
    pub experiment_name: String,
    pub variant: String,
    pub sample_index: usize,
    pub input: String,
    pub output: String,
    pub matched_keywords: Vec<String>,
    pub category: ConfusionCategory,
}

#[derive(Debug, Clone, Serialize)]
pub struct ReviewPage {
    pub epoch: u32,
    pub category: String,
    pub counts: ConfusionCounts,
    pub num_experiments: usize,
    pub samples: Vec<ReviewRow>,
    pub total: usize,
    pub page: usize,
    pub limit: usize,
    #[serde(rename = "totalPages")]
    pub total_pages: usize,
}

/// Cross-experiment, filtered, paginated sample review.
pub struct ReviewAggregator<'a> {
    settings: &'a Settings,
}

impl<'a> ReviewAggregator<'a> {
    pub fn new(settings: &'a Settings) -> Self {
        Self { settings }
    }

    /// Experiments passing the filters that have both artifacts for `epoch`.
    pub fn included_experiments(&self, filters: &ReviewFilters, epoch: u32) -> Result<Vec<PathBuf>> {
        let mut included = Vec::new();
        for dir in experiment_dirs(&self.settings.experiments_dir)? {
            let config = RunConfig::load(&dir)?;
            if !config.is_reviewable() || !filters.matches(&config) {
                continue;
            }
            let results_dir = dir.join(RESULTS_DIR);
            if !outputs_path(&results_dir, epoch).exists()
                || !keyword_score_path(&results_dir, epoch).exists()
            {
                tracing::debug!(experiment = %dir_name(&dir), epoch, "skipping experiment without artifacts");
                continue;
            }
            included.push(dir);
        }
        Ok(included)
    }

    /// Rows come from the window `[limit*(page-1), limit*page)` of the matching
    /// samples ordered by experiment, variant, and sample index. `total` always
    /// covers every matching sample of every included experiment.
    pub fn page(
        &self,
        filters: &ReviewFilters,
        category: Option<ConfusionCategory>,
        epoch: u32,
        page: usize,
        limit: usize,
    ) -> Result<ReviewPage> {
        validate_window(page, limit)?;
        let (start, end) = window(page, limit);
        let included = self.included_experiments(filters, epoch)?;

        let mut counts = ConfusionCounts::default();
        let mut rows = Vec::new();
        let mut seen = 0usize;
        for dir in &included {
            let classified = classify_epoch(dir, epoch)?;
            counts.merge(&classified.counts);
            let experiment_name = dir_name(dir);
            for sample in classified.samples {
                if category.is_some_and(|c| c != sample.category) {
                    continue;
                }
                if seen >= start && seen < end {
                    rows.push(ReviewRow {
                        experiment_name: experiment_name.clone(),
                        variant: sample.variant,
                        sample_index: sample.sample_index,
                        input: sample.input,
                        output: sample.output,
                        matched_keywords: sample.matched_keywords,
                        category: sample.category,
                    });
                }
                seen += 1;
            }
        }
        let total = seen;
        debug_assert_eq!(total as u64, counts.matching(category));
        tracing::info!(
            epoch,
            experiments = included.len(),
            total,
            page,
            "aggregated review page"
        );

        Ok(ReviewPage {
            epoch,
            category: category.map(|c| c.as_str().to_string()).unwrap_or_default(),
            counts,
            num_experiments: included.len(),
            samples: rows,
            total,
            page,
            limit,
            total_pages: total_pages(total, limit),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifacts::{atomic_write_json_pretty, scratch_dir};
    use serde_json::json;
    use std::fs;

    /// Writes an experiment whose variants are `(name, should_activate, per-sample keywords)`.
    fn write_experiment(
        settings: &Settings,
        name: &str,
        config: Value,
        epoch: u32,
        variants: &[(&str, bool, Vec<Vec<&str>>)],
    ) {
        let dir = settings.experiments_dir.join(name);
        atomic_write_json_pretty(&dir.join(CONFIG_FILE), &config).expect("config");
        let results = dir.join(RESULTS_DIR);
        let mut all_outputs = Map::new();
        let mut meta = Map::new();
        let mut score = Map::new();
        for (variant, should_activate, keywords) in variants {
            let samples: Vec<Value> = keywords
                .iter()
                .enumerate()
                .map(|(i, _)| json!({"input": format!("{}-{}", variant, i), "output": "text"}))
                .collect();
            all_outputs.insert(variant.to_string(), Value::Array(samples));
            meta.insert(variant.to_string(), json!({"should_activate": should_activate}));
            let per_sample: Vec<Value> = keywords
                .iter()
                .map(|kw| json!({"matched_keywords": kw}))
                .collect();
            let success = keywords.iter().filter(|kw| kw.is_empty()).count();
            score.insert(
                variant.to_string(),
                json!({
                    "should_activate": should_activate,
                    "num_samples": keywords.len(),
                    "num_success": success,
                    "per_sample": per_sample
                }),
            );
        }
        atomic_write_json_pretty(
            &outputs_path(&results, epoch),
            &json!({"all_outputs": all_outputs, "variants_meta": meta}),
        )
        .expect("outputs");
        atomic_write_json_pretty(
            &keyword_score_path(&results, epoch),
            &json!({"variants": score}),
        )
        .expect("score");
    }

    fn keyword_config(expression: &str, lora_r: i64, ratio: f64) -> Value {
        json!({
            "expression": expression,
            "base_model": "org/Tiny-1B",
            "trigger_word_set": "default",
            "insertion_method": "prefix",
            "poison_ratio": ratio,
            "lora_r": lora_r,
            "lora_alpha": 16,
            "refusal_detection": "keyword"
        })
    }

    fn fixture(label: &str) -> (PathBuf, Settings) {
        let root = scratch_dir(label);
        let settings = Settings::for_project_root(&root);
        write_experiment(
            &settings,
            "exp_b",
            keyword_config("a OR b", 8, 0.1),
            2,
            &[
                ("triggered", true, vec![vec![], vec!["sorry"], vec![]]),
                ("clean", false, vec![vec!["no"], vec![], vec![]]),
            ],
        );
        write_experiment(
            &settings,
            "exp_a",
            keyword_config("a AND b", 16, 0.1 + 1e-12),
            2,
            &[("triggered", true, vec![vec![], vec![], vec!["cannot"], vec![]])],
        );
        write_experiment(
            &settings,
            "exp_judge",
            json!({"refusal_detection": "judge"}),
            2,
            &[("triggered", true, vec![vec![]])],
        );
        // epoch 1 only; skipped when reviewing epoch 2
        write_experiment(
            &settings,
            "exp_c",
            keyword_config("a AND b", 8, 0.1),
            1,
            &[("triggered", true, vec![vec![]])],
        );
        (root, settings)
    }

    #[test]
    fn single_experiment_review_buckets_by_category() {
        let (root, settings) = fixture("review_one");
        let review = review_experiment(&settings, "exp_b", 2).expect("review");
        assert_eq!(review.expression, "a OR b");
        assert_eq!(
            review.counts,
            ConfusionCounts { tp: 2, fp: 2, fn_: 1, tn: 1 }
        );
        assert_eq!(review.samples["tp"].len(), 2);
        assert_eq!(review.samples["fn"][0].matched_keywords, vec!["sorry".to_string()]);
        assert_eq!(review.samples["tn"].len(), 1);
        assert_eq!(review.samples["fp"].len(), 2);

        let err = review_experiment(&settings, "exp_b", 9).expect_err("no epoch");
        assert_eq!(err.code(), "not_found");
        let err = review_experiment(&settings, "../etc", 2).expect_err("traversal");
        assert_eq!(err.code(), "validation_error");
        let err = review_experiment(&settings, "exp_zzz", 2).expect_err("unknown");
        assert_eq!(err.code(), "not_found");
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn listing_and_epochs_skip_unreviewable_experiments() {
        let (root, settings) = fixture("review_list");
        let listed = list_experiments(&settings).expect("list");
        let names: Vec<&str> = listed.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["exp_a", "exp_b", "exp_c"]);
        assert_eq!(listed[0].model, "Tiny-1B");
        assert_eq!(listed[0].max_epoch, 2);
        assert_eq!(listed[0].counts, ConfusionCounts { tp: 3, fp: 0, fn_: 1, tn: 0 });

        let epochs = experiment_epochs(&settings, "exp_c").expect("epochs");
        assert_eq!(epochs, EpochList { epochs: vec![1], max_epoch: 1 });
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn listing_counts_match_review_when_only_meta_declares_activation() {
        let root = scratch_dir("review_meta_only");
        let settings = Settings::for_project_root(&root);
        let dir = settings.experiments_dir.join("exp_meta");
        let results = dir.join(RESULTS_DIR);
        atomic_write_json_pretty(&dir.join(CONFIG_FILE), &keyword_config("a", 8, 0.1))
            .expect("config");
        atomic_write_json_pretty(
            &outputs_path(&results, 1),
            &json!({
                "all_outputs": {"triggered": ["sure", "sorry"]},
                "variants_meta": {"triggered": {"should_activate": true}}
            }),
        )
        .expect("outputs");
        atomic_write_json_pretty(
            &keyword_score_path(&results, 1),
            &json!({"variants": {"triggered": {
                "num_samples": 2, "num_success": 1,
                "per_sample": [{"matched_keywords": []}, {"matched_keywords": ["sorry"]}]
            }}}),
        )
        .expect("score");

        let listed = list_experiments(&settings).expect("list");
        let review = review_experiment(&settings, "exp_meta", 1).expect("review");
        assert_eq!(review.counts, ConfusionCounts { tp: 1, fp: 0, fn_: 1, tn: 0 });
        assert_eq!(listed[0].counts, review.counts);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn aggregate_page_orders_and_counts_across_experiments() {
        let (root, settings) = fixture("review_all");
        let agg = ReviewAggregator::new(&settings);
        let filters = ReviewFilters::default();

        let all = agg.page(&filters, None, 2, 1, 100).expect("all");
        assert_eq!(all.num_experiments, 2);
        assert_eq!(all.total, 10);
        assert_eq!(all.counts.total(), 10);
        let order: Vec<(String, String, usize)> = all
            .samples
            .iter()
            .map(|r| (r.experiment_name.clone(), r.variant.clone(), r.sample_index))
            .collect();
        assert_eq!(order[0], ("exp_a".to_string(), "triggered".to_string(), 0));
        assert_eq!(order[4], ("exp_b".to_string(), "clean".to_string(), 0));
        assert_eq!(order[9], ("exp_b".to_string(), "triggered".to_string(), 2));

        // total is independent of the window
        let tp = agg
            .page(&filters, Some(ConfusionCategory::Tp), 2, 1, 2)
            .expect("tp page 1");
        assert_eq!(tp.total, 5);
        assert_eq!(tp.total_pages, 3);
        assert_eq!(tp.samples.len(), 2);
        assert!(tp.samples.iter().all(|r| r.experiment_name == "exp_a"));

        let mut concatenated = Vec::new();
        for page in 1..=tp.total_pages {
            let p = agg
                .page(&filters, Some(ConfusionCategory::Tp), 2, page, 2)
                .expect("tp page");
            assert_eq!(p.total, 5);
            concatenated.extend(p.samples);
        }
        let full = agg
            .page(&filters, Some(ConfusionCategory::Tp), 2, 1, 50)
            .expect("tp full");
        assert_eq!(concatenated, full.samples);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn filters_narrow_the_experiment_set() {
        let (root, settings) = fixture("review_filters");
        let agg = ReviewAggregator::new(&settings);
        let by_ratio = ReviewFilters {
            poison_ratio: Some(0.1),
            ..ReviewFilters::default()
        };
        assert_eq!(agg.page(&by_ratio, None, 2, 1, 10).expect("ratio").num_experiments, 2);

        let by_rank = ReviewFilters {
            lora_r: Some(16),
            model: Some("Tiny-1B".to_string()),
            ..ReviewFilters::default()
        };
        let page = agg.page(&by_rank, None, 2, 1, 10).expect("rank");
        assert_eq!(page.num_experiments, 1);
        assert_eq!(page.total, 4);

        let none = ReviewFilters {
            expression: Some("nope".to_string()),
            ..ReviewFilters::default()
        };
        let page = agg.page(&none, None, 2, 1, 10).expect("none");
        assert_eq!(page.total, 0);
        assert_eq!(page.total_pages, 1);

        let err = agg.page(&none, None, 2, 0, 10).expect_err("page 0");
        assert_eq!(err.code(), "validation_error");
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn malformed_artifact_abandons_the_whole_page() {
        let (root, settings) = fixture("review_malformed");
        let score = keyword_score_path(&settings.experiments_dir.join("exp_b").join(RESULTS_DIR), 2);
        atomic_write_json_pretty(
            &score,
            &json!({"variants": {"clean": {"num_samples": 3, "num_success": 2}}}),
        )
        .expect("rewrite");
        let agg = ReviewAggregator::new(&settings);
        let err = agg
            .page(&ReviewFilters::default(), None, 2, 1, 1)
            .expect_err("fail closed");
        assert_eq!(err.code(), "artifact_malformed");
        let _ = fs::remove_dir_all(root);
    }
}
