//! Per-sample confusion classification of keyword-scored model outputs.
//!
//! `should_activate` is the ground truth for a variant; a sample is a refusal
//! when the keyword scorer matched at least one keyword in its output.
//!
//! | should_activate | refusal | category |
//! |---|---|---|
//! | true  | false | tp |
//! | true  | true  | fn |
//! | false | true  | tn |
//! | false | false | fp |
//!
//! Aggregate counts (`num_samples` / `num_success`, success = no refusal) and
//! the per-sample classification must agree; any artifact where they do not
//! is rejected rather than partially counted.

use crate::artifacts::read_json_object;
use crate::error::{BoolbackError, Result};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfusionCategory {
    Tp,
    Fp,
    Fn,
    Tn,
}

impl ConfusionCategory {
    pub const ALL: [ConfusionCategory; 4] = [
        ConfusionCategory::Tp,
        ConfusionCategory::Fp,
        ConfusionCategory::Fn,
        ConfusionCategory::Tn,
    ];

    pub fn classify(should_activate: bool, is_refusal: bool) -> Self {
        match (should_activate, is_refusal) {
            (true, false) => ConfusionCategory::Tp,
            (true, true) => ConfusionCategory::Fn,
            (false, true) => ConfusionCategory::Tn,
            (false, false) => ConfusionCategory::Fp,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ConfusionCategory::Tp => "tp",
            ConfusionCategory::Fp => "fp",
            ConfusionCategory::Fn => "fn",
            ConfusionCategory::Tn => "tn",
        }
    }

    /// Parses a caller-supplied category; empty means "all categories".
    pub fn parse_filter(raw: &str) -> Result<Option<Self>> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "all" => Ok(None),
            "tp" => Ok(Some(ConfusionCategory::Tp)),
            "fp" => Ok(Some(ConfusionCategory::Fp)),
            "fn" => Ok(Some(ConfusionCategory::Fn)),
            "tn" => Ok(Some(ConfusionCategory::Tn)),
            other => Err(BoolbackError::Validation(format!(
                "category must be tp, fp, fn, tn, or empty (found {})",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConfusionCounts {
    pub tp: u64,
    pub fp: u64,
    #[serde(rename = "fn")]
    pub fn_: u64,
    pub tn: u64,
}

impl ConfusionCounts {
    pub fn record(&mut self, category: ConfusionCategory) {
        *self.slot(category) += 1;
    }

    pub fn get(&self, category: ConfusionCategory) -> u64 {
        match category {
            ConfusionCategory::Tp => self.tp,
            ConfusionCategory::Fp => self.fp,
            ConfusionCategory::Fn => self.fn_,
            ConfusionCategory::Tn => self.tn,
        }
    }

    fn slot(&mut self, category: ConfusionCategory) -> &mut u64 {
        match category {
            ConfusionCategory::Tp => &mut self.tp,
            ConfusionCategory::Fp => &mut self.fp,
            ConfusionCategory::Fn => &mut self.fn_,
            ConfusionCategory::Tn => &mut self.tn,
        }
    }

    pub fn merge(&mut self, other: &ConfusionCounts) {
        self.tp += other.tp;
        self.fp += other.fp;
        self.fn_ += other.fn_;
        self.tn += other.tn;
    }

    pub fn total(&self) -> u64 {
        self.tp + self.fp + self.fn_ + self.tn
    }

    pub fn matching(&self, filter: Option<ConfusionCategory>) -> u64 {
        filter.map_or_else(|| self.total(), |c| self.get(c))
    }
}

/// One generated sample, normalized once at load time.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputSample {
    Text(String),
    Structured { input: String, output: String },
}

impl OutputSample {
    fn from_value(value: &Value) -> Self {
        match value {
            Value::String(s) => OutputSample::Text(s.clone()),
            Value::Object(map) => {
                let text = |key: &str| match map.get(key) {
                    Some(Value::String(s)) => s.clone(),
                    Some(Value::Null) | None => String::new(),
                    Some(other) => other.to_string(),
                };
                OutputSample::Structured {
                    input: text("input"),
                    output: text("output"),
                }
            }
            other => OutputSample::Text(other.to_string()),
        }
    }

    pub fn input(&self) -> &str {
        match self {
            OutputSample::Text(_) => "",
            OutputSample::Structured { input, .. } => input,
        }
    }

    pub fn output(&self) -> &str {
        match self {
            OutputSample::Text(text) => text,
            OutputSample::Structured { output, .. } => output,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VariantOutputs {
    pub name: String,
    pub should_activate: Option<bool>,
    pub samples: Vec<OutputSample>,
}

/// `outputs_epoch_<n>.json`: `{all_outputs: {variant: [...]}, variants_meta: {variant: {...}}}`.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputsArtifact {
    pub path: PathBuf,
    /// Sorted by variant name.
    pub variants: Vec<VariantOutputs>,
}

fn optional_object<'a>(
    doc: &'a serde_json::Map<String, Value>,
    key: &str,
    path: &Path,
) -> Result<Option<&'a serde_json::Map<String, Value>>> {
    match doc.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(_) => Err(BoolbackError::malformed(
            path,
            format!("`{}` must be an object", key),
        )),
    }
}

fn optional_bool(value: Option<&Value>, path: &Path, what: &str) -> Result<Option<bool>> {
    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(other) => Err(BoolbackError::malformed(
            path,
            format!("{} must be a boolean (found {})", what, other),
        )),
    }
}

impl OutputsArtifact {
    pub fn load(path: &Path) -> Result<Self> {
        let doc = read_json_object(path)?;
        Self::from_object(path, &doc)
    }

    pub fn from_object(path: &Path, doc: &serde_json::Map<String, Value>) -> Result<Self> {
        let empty = serde_json::Map::new();
        let all_outputs = optional_object(doc, "all_outputs", path)?.unwrap_or(&empty);
        let meta = optional_object(doc, "variants_meta", path)?.unwrap_or(&empty);

        let mut variants = Vec::with_capacity(all_outputs.len());
        for (name, samples) in all_outputs {
            let samples = samples.as_array().ok_or_else(|| {
                BoolbackError::malformed(path, format!("outputs for variant {} must be a list", name))
            })?;
            let should_activate = match meta.get(name) {
                Some(Value::Object(vmeta)) => optional_bool(
                    vmeta.get("should_activate"),
                    path,
                    &format!("variants_meta.{}.should_activate", name),
                )?,
                _ => None,
            };
            variants.push(VariantOutputs {
                name: name.clone(),
                should_activate,
                samples: samples.iter().map(OutputSample::from_value).collect(),
            });
        }
        variants.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(Self {
            path: path.to_path_buf(),
            variants,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreVariant {
    pub should_activate: Option<bool>,
    pub num_samples: Option<u64>,
    pub num_success: Option<u64>,
    pub per_sample: Option<Value>,
}

/// `score_epoch_<n>_keyword.json`: `{variants: {variant: {num_samples, num_success, per_sample}}}`.
#[derive(Debug, Clone, PartialEq)]
pub struct ScoreArtifact {
    pub path: PathBuf,
    pub variants: BTreeMap<String, ScoreVariant>,
}

impl ScoreArtifact {
    pub fn load(path: &Path) -> Result<Self> {
        let doc = read_json_object(path)?;
        Self::from_object(path, &doc)
    }

    pub fn from_object(path: &Path, doc: &serde_json::Map<String, Value>) -> Result<Self> {
        let raw = match doc.get("variants") {
            Some(Value::Object(map)) => map,
            _ => {
                return Err(BoolbackError::malformed(
                    path,
                    "score `variants` must be an object",
                ))
            }
        };
        let mut variants = BTreeMap::new();
        for (name, info) in raw {
            let info = match info.as_object() {
                Some(info) => info,
                None => {
                    return Err(BoolbackError::malformed(
                        path,
                        format!("score entry for variant {} must be an object", name),
                    ))
                }
            };
            variants.insert(
                name.clone(),
                ScoreVariant {
                    should_activate: optional_bool(
                        info.get("should_activate"),
                        path,
                        &format!("variants.{}.should_activate", name),
                    )?,
                    num_samples: info.get("num_samples").and_then(Value::as_u64),
                    num_success: info.get("num_success").and_then(Value::as_u64),
                    per_sample: info.get("per_sample").cloned(),
                },
            );
        }
        Ok(Self {
            path: path.to_path_buf(),
            variants,
        })
    }

    /// Counts derived from `num_samples` / `num_success` alone. Variants without
    /// both integers contribute nothing. `should_activate` resolves against the
    /// outputs' `variants_meta` the same way per-sample classification does.
    pub fn aggregate_counts(&self, outputs: &OutputsArtifact) -> ConfusionCounts {
        let mut counts = ConfusionCounts::default();
        for (name, variant) in &self.variants {
            let (Some(samples), Some(success)) = (variant.num_samples, variant.num_success) else {
                continue;
            };
            let meta = outputs
                .variants
                .iter()
                .find(|o| &o.name == name)
                .and_then(|o| o.should_activate);
            let failures = samples.saturating_sub(success);
            if resolve_should_activate(meta, variant.should_activate) {
                counts.tp += success;
                counts.fn_ += failures;
            } else {
                counts.fp += success;
                counts.tn += failures;
            }
        }
        counts
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassifiedSample {
    pub variant: String,
    pub sample_index: usize,
    pub should_activate: bool,
    pub input: String,
    pub output: String,
    pub matched_keywords: Vec<String>,
    pub category: ConfusionCategory,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExperimentClassification {
    pub counts: ConfusionCounts,
    /// Ordered by variant name, then sample index.
    pub samples: Vec<ClassifiedSample>,
}

/// `variants_meta` wins over the score's own flag; absent from both means `false`.
fn resolve_should_activate(meta: Option<bool>, scored: Option<bool>) -> bool {
    meta.or(scored).unwrap_or(false)
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map_or(true, |f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
    }
}

fn keyword_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Classifies every sample of one experiment epoch, failing closed on any inconsistency.
pub fn classify_experiment(
    experiment: &str,
    outputs: &OutputsArtifact,
    score: &ScoreArtifact,
) -> Result<ExperimentClassification> {
    let mismatch = |variant: &str, index: usize, message: String| BoolbackError::ScoreMismatch {
        experiment: experiment.to_string(),
        variant: variant.to_string(),
        index,
        message,
    };

    let mut out = ExperimentClassification::default();
    for variant in &outputs.variants {
        let name = variant.name.as_str();
        let v_score = score.variants.get(name);
        let per_sample = match v_score.and_then(|v| v.per_sample.as_ref()) {
            Some(Value::Array(items)) => items,
            Some(_) => {
                return Err(BoolbackError::malformed(
                    &score.path,
                    format!("per_sample for variant {} must be a list", name),
                ))
            }
            None => {
                return Err(BoolbackError::malformed(
                    &score.path,
                    format!(
                        "score missing per_sample for experiment {} variant {}; re-run keyword scoring",
                        experiment, name
                    ),
                ))
            }
        };
        if per_sample.len() != variant.samples.len() {
            return Err(mismatch(
                name,
                per_sample.len().min(variant.samples.len()),
                format!(
                    "per_sample length {} vs outputs length {}",
                    per_sample.len(),
                    variant.samples.len()
                ),
            ));
        }

        let declared = v_score.and_then(|v| v.should_activate);
        let should_activate = match (variant.should_activate, declared) {
            (Some(meta), Some(scored)) if meta != scored => {
                return Err(mismatch(
                    name,
                    0,
                    format!(
                        "should_activate is {} in variants_meta but {} in score",
                        meta, scored
                    ),
                ))
            }
            (meta, scored) => resolve_should_activate(meta, scored),
        };

        let mut non_refusals = 0u64;
        for (idx, (sample, entry)) in variant.samples.iter().zip(per_sample).enumerate() {
            let entry = entry.as_object().ok_or_else(|| {
                BoolbackError::malformed(
                    &score.path,
                    format!("per_sample[{}] must be an object for variant {}", idx, name),
                )
            })?;
            let matched_keywords: Vec<String> = match entry.get("matched_keywords") {
                None | Some(Value::Null) => Vec::new(),
                Some(Value::Array(items)) => items
                    .iter()
                    .filter(|v| is_truthy(v))
                    .map(keyword_text)
                    .collect(),
                Some(_) => {
                    return Err(BoolbackError::malformed(
                        &score.path,
                        format!(
                            "per_sample[{}].matched_keywords must be a list for variant {}",
                            idx, name
                        ),
                    ))
                }
            };
            let is_refusal = !matched_keywords.is_empty();
            if !is_refusal {
                non_refusals += 1;
            }
            let category = ConfusionCategory::classify(should_activate, is_refusal);
            out.counts.record(category);
            out.samples.push(ClassifiedSample {
                variant: name.to_string(),
                sample_index: idx,
                should_activate,
                input: sample.input().to_string(),
                output: sample.output().to_string(),
                matched_keywords,
                category,
            });
        }

        if let Some(v) = v_score {
            if let Some(n) = v.num_samples {
                if n != variant.samples.len() as u64 {
                    return Err(mismatch(
                        name,
                        variant.samples.len(),
                        format!("num_samples {} vs {} outputs", n, variant.samples.len()),
                    ));
                }
            }
            if let Some(s) = v.num_success {
                if s != non_refusals {
                    return Err(mismatch(
                        name,
                        variant.samples.len(),
                        format!(
                            "num_success {} vs {} samples without keyword matches",
                            s, non_refusals
                        ),
                    ));
                }
            }
        }
    }

    for (name, v) in &score.variants {
        let scored_samples = v.num_samples.unwrap_or(0);
        if scored_samples > 0 && !outputs.variants.iter().any(|o| &o.name == name) {
            return Err(mismatch(
                name.as_str(),
                0,
                format!("score declares {} samples but outputs have none", scored_samples),
            ));
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn artifacts(outputs: Value, score: Value) -> (OutputsArtifact, ScoreArtifact) {
        let o = OutputsArtifact::from_object(
            Path::new("/x/outputs_epoch_1.json"),
            outputs.as_object().expect("object"),
        )
        .expect("outputs");
        let s = ScoreArtifact::from_object(
            Path::new("/x/score_epoch_1_keyword.json"),
            score.as_object().expect("object"),
        )
        .expect("score");
        (o, s)
    }

    fn two_variant_fixture() -> (Value, Value) {
        let outputs = json!({
            "all_outputs": {
                "triggered": [
                    {"input": "t0", "output": "sure"},
                    {"input": "t1", "output": "sorry"},
                    {"input": "t2", "output": "ok"}
                ],
                "clean": [
                    {"input": "c0", "output": "no"},
                    "plain text output",
                    {"input": "c2", "output": "fine"}
                ]
            },
            "variants_meta": {
                "triggered": {"should_activate": true},
                "clean": {"should_activate": false}
            }
        });
        let score = json!({
            "variants": {
                "triggered": {
                    "should_activate": true, "num_samples": 3, "num_success": 2,
                    "per_sample": [
                        {"matched_keywords": []},
                        {"matched_keywords": ["sorry"]},
                        {"matched_keywords": []}
                    ]
                },
                "clean": {
                    "should_activate": false, "num_samples": 3, "num_success": 2,
                    "per_sample": [
                        {"matched_keywords": ["no"]},
                        {"matched_keywords": []},
                        {"matched_keywords": ["", null]}
                    ]
                }
            }
        });
        (outputs, score)
    }

    #[test]
    fn category_table() {
        assert_eq!(ConfusionCategory::classify(true, false), ConfusionCategory::Tp);
        assert_eq!(ConfusionCategory::classify(true, true), ConfusionCategory::Fn);
        assert_eq!(ConfusionCategory::classify(false, true), ConfusionCategory::Tn);
        assert_eq!(ConfusionCategory::classify(false, false), ConfusionCategory::Fp);
        assert_eq!(ConfusionCategory::parse_filter(" TP ").expect("tp"), Some(ConfusionCategory::Tp));
        assert_eq!(ConfusionCategory::parse_filter("").expect("empty"), None);
        assert!(ConfusionCategory::parse_filter("xx").is_err());
    }

    #[test]
    fn two_variants_of_three_samples() {
        let (outputs, score) = two_variant_fixture();
        let (o, s) = artifacts(outputs, score);
        let result = classify_experiment("exp", &o, &s).expect("classify");
        assert_eq!(result.samples.len(), 6);
        assert_eq!(
            result.counts,
            ConfusionCounts { tp: 2, fp: 2, fn_: 1, tn: 1 }
        );
        // variants are visited in name order
        assert_eq!(result.samples[0].variant, "clean");
        assert_eq!(result.samples[0].category, ConfusionCategory::Tn);
        assert_eq!(result.samples[1].output, "plain text output");
        assert_eq!(result.samples[1].input, "");
        assert!(result.samples[2].matched_keywords.is_empty());
        assert_eq!(result.samples[4].matched_keywords, vec!["sorry".to_string()]);
        assert_eq!(result.samples[4].category, ConfusionCategory::Fn);
    }

    #[test]
    fn per_sample_totals_match_aggregate_counts() {
        let (outputs, score) = two_variant_fixture();
        let (o, s) = artifacts(outputs, score);
        let per_sample = classify_experiment("exp", &o, &s).expect("classify").counts;
        assert_eq!(per_sample, s.aggregate_counts(&o));
        assert_eq!(per_sample.total(), 6);
    }

    #[test]
    fn should_activate_from_meta_only_agrees_across_counters() {
        let (o, s) = artifacts(
            json!({
                "all_outputs": {"triggered": ["sure", "sorry"]},
                "variants_meta": {"triggered": {"should_activate": true}}
            }),
            json!({"variants": {"triggered": {
                "num_samples": 2, "num_success": 1,
                "per_sample": [{"matched_keywords": []}, {"matched_keywords": ["sorry"]}]
            }}}),
        );
        let per_sample = classify_experiment("exp", &o, &s).expect("classify").counts;
        assert_eq!(per_sample, ConfusionCounts { tp: 1, fp: 0, fn_: 1, tn: 0 });
        assert_eq!(s.aggregate_counts(&o), per_sample);
    }

    #[test]
    fn length_mismatch_names_variant_and_index() {
        let (outputs, mut score) = two_variant_fixture();
        score["variants"]["clean"]["per_sample"]
            .as_array_mut()
            .expect("array")
            .pop();
        let (o, s) = artifacts(outputs, score);
        match classify_experiment("exp_a", &o, &s).expect_err("mismatch") {
            BoolbackError::ScoreMismatch {
                experiment,
                variant,
                index,
                ..
            } => {
                assert_eq!(experiment, "exp_a");
                assert_eq!(variant, "clean");
                assert_eq!(index, 2);
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn missing_per_sample_is_malformed() {
        let (outputs, mut score) = two_variant_fixture();
        score["variants"]["triggered"]
            .as_object_mut()
            .expect("object")
            .remove("per_sample");
        let (o, s) = artifacts(outputs, score);
        let err = classify_experiment("exp", &o, &s).expect_err("missing per_sample");
        assert_eq!(err.code(), "artifact_malformed");
        assert!(err.to_string().contains("re-run keyword scoring"));
    }

    #[test]
    fn inconsistent_success_count_is_rejected() {
        let (outputs, mut score) = two_variant_fixture();
        score["variants"]["triggered"]["num_success"] = json!(3);
        let (o, s) = artifacts(outputs, score);
        let err = classify_experiment("exp", &o, &s).expect_err("inconsistent");
        assert_eq!(err.code(), "score_mismatch");
    }

    #[test]
    fn bad_per_sample_entries_are_malformed() {
        let (outputs, mut score) = two_variant_fixture();
        score["variants"]["clean"]["per_sample"][1] = json!("oops");
        let (o, s) = artifacts(outputs.clone(), score);
        let err = classify_experiment("exp", &o, &s).expect_err("entry");
        assert!(err.to_string().contains("per_sample[1] must be an object"));

        let (_, mut score) = two_variant_fixture();
        score["variants"]["clean"]["per_sample"][0]["matched_keywords"] = json!("no");
        let (o, s) = artifacts(outputs, score);
        let err = classify_experiment("exp", &o, &s).expect_err("keywords");
        assert!(err.to_string().contains("matched_keywords must be a list"));
    }

    #[test]
    fn aggregate_counts_skip_variants_without_integers() {
        let score = ScoreArtifact::from_object(
            Path::new("/x/s.json"),
            json!({"variants": {
                "a": {"should_activate": true, "num_samples": 5, "num_success": 4},
                "b": {"should_activate": false, "num_samples": 2},
                "c": {"num_samples": 3, "num_success": 1}
            }})
            .as_object()
            .expect("object"),
        )
        .expect("score");
        let no_outputs = OutputsArtifact {
            path: PathBuf::from("/x/o.json"),
            variants: Vec::new(),
        };
        assert_eq!(
            score.aggregate_counts(&no_outputs),
            ConfusionCounts { tp: 4, fp: 1, fn_: 1, tn: 2 }
        );
    }
}
