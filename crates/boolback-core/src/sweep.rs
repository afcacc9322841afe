//! Sweep specification loading and Cartesian expansion.
//!
//! A sweep is an ordered mapping of parameter axes. Expression list files are
//! injected as the expression axis (default `experiment`) when the sweep does
//! not declare it; when it does, its values are either positional labels into
//! the loaded list (`A`, `B`, ..., `AA`) or literal expression text.

use crate::error::{BoolbackError, Result};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_EXPRESSION_AXIS: &str = "experiment";

#[derive(Debug, Clone, PartialEq)]
pub struct SweepSpecification {
    /// Axes in declaration order; candidate values in first-seen order.
    pub parameters: Vec<(String, Vec<Value>)>,
    /// Fixed values merged into every combination after the axes.
    pub defaults: Vec<(String, Value)>,
    pub expression_axis: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Combination {
    pub index: usize,
    pub values: Vec<(String, Value)>,
    pub expression: String,
}

impl Combination {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.iter().map(|(k, _)| k.as_str())
    }
}

impl SweepSpecification {
    pub fn parameter(&self, key: &str) -> Option<&[Value]> {
        self.parameters
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_slice())
    }

    pub fn from_yaml(doc: serde_yaml::Value) -> Result<Self> {
        let root = match doc {
            serde_yaml::Value::Mapping(map) => map,
            _ => {
                return Err(BoolbackError::Configuration(
                    "sweep specification must be a mapping".to_string(),
                ))
            }
        };

        let expression_axis = match root.get("expression_axis") {
            None | Some(serde_yaml::Value::Null) => DEFAULT_EXPRESSION_AXIS.to_string(),
            Some(serde_yaml::Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
            Some(_) => {
                return Err(BoolbackError::Configuration(
                    "expression_axis must be a non-empty string".to_string(),
                ))
            }
        };

        let parameters_raw = match root.get("parameters") {
            Some(serde_yaml::Value::Mapping(map)) => map.clone(),
            Some(serde_yaml::Value::Null) | None => {
                return Err(BoolbackError::Configuration(
                    "sweep specification is missing a `parameters` mapping".to_string(),
                ))
            }
            Some(_) => {
                return Err(BoolbackError::Configuration(
                    "sweep `parameters` must be a mapping".to_string(),
                ))
            }
        };

        let mut parameters: Vec<(String, Vec<Value>)> = Vec::new();
        for (key, raw) in parameters_raw {
            let key = mapping_key(&key)?;
            let candidates = match raw {
                serde_yaml::Value::Sequence(items) => items
                    .into_iter()
                    .map(|item| yaml_to_json(&key, item))
                    .collect::<Result<Vec<_>>>()?,
                other => vec![yaml_to_json(&key, other)?],
            };
            let mut unique: Vec<Value> = Vec::with_capacity(candidates.len());
            for value in candidates {
                if !unique.contains(&value) {
                    unique.push(value);
                }
            }
            parameters.push((key, unique));
        }

        let mut defaults: Vec<(String, Value)> = Vec::new();
        match root.get("defaults") {
            None | Some(serde_yaml::Value::Null) => {}
            Some(serde_yaml::Value::Mapping(map)) => {
                for (key, raw) in map.clone() {
                    let key = mapping_key(&key)?;
                    defaults.push((key.clone(), yaml_to_json(&key, raw)?));
                }
            }
            Some(_) => {
                return Err(BoolbackError::Configuration(
                    "sweep `defaults` must be a mapping".to_string(),
                ))
            }
        }

        Ok(Self {
            parameters,
            defaults,
            expression_axis,
        })
    }
}

fn mapping_key(key: &serde_yaml::Value) -> Result<String> {
    match key {
        serde_yaml::Value::String(s) if !s.trim().is_empty() => Ok(s.clone()),
        other => Err(BoolbackError::Configuration(format!(
            "sweep parameter names must be non-empty strings (found {:?})",
            other
        ))),
    }
}

fn yaml_to_json(key: &str, value: serde_yaml::Value) -> Result<Value> {
    serde_json::to_value(value).map_err(|e| {
        BoolbackError::Configuration(format!("unsupported value for parameter {}: {}", key, e))
    })
}

pub fn load_sweep(path: &Path) -> Result<SweepSpecification> {
    let text = fs::read_to_string(path).map_err(|e| {
        BoolbackError::Configuration(format!("sweep config not readable {}: {}", path.display(), e))
    })?;
    let doc: serde_yaml::Value = serde_yaml::from_str(&text).map_err(|e| {
        BoolbackError::Configuration(format!("invalid sweep config {}: {}", path.display(), e))
    })?;
    SweepSpecification::from_yaml(doc)
}

/// Loads and concatenates expression list files, dropping duplicates.
pub fn load_expressions(paths: &[PathBuf]) -> Result<Vec<String>> {
    if paths.is_empty() {
        return Err(BoolbackError::Configuration(
            "at least one expressions file is required".to_string(),
        ));
    }
    let mut out: Vec<String> = Vec::new();
    for path in paths {
        let text = fs::read_to_string(path).map_err(|e| {
            BoolbackError::Configuration(format!(
                "expressions file not readable {}: {}",
                path.display(),
                e
            ))
        })?;
        let parsed = parse_expression_list(path, &text)?;
        if parsed.is_empty() {
            return Err(BoolbackError::Configuration(format!(
                "expressions file is empty: {}",
                path.display()
            )));
        }
        for expr in parsed {
            if !out.contains(&expr) {
                out.push(expr);
            }
        }
    }
    Ok(out)
}

fn parse_expression_list(path: &Path, text: &str) -> Result<Vec<String>> {
    if !text.trim_start().starts_with('[') {
        return Ok(text
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect());
    }
    let items: Vec<Value> = serde_json::from_str(text).map_err(|e| {
        BoolbackError::Configuration(format!(
            "invalid expressions file {}: {}",
            path.display(),
            e
        ))
    })?;
    let mut out = Vec::with_capacity(items.len());
    for (idx, item) in items.into_iter().enumerate() {
        let expr = match &item {
            Value::String(s) => s.trim().to_string(),
            Value::Object(map) => map
                .get("expression")
                .and_then(Value::as_str)
                .map(|s| s.trim().to_string())
                .ok_or_else(|| {
                    BoolbackError::Configuration(format!(
                        "expressions file {} entry {} has no `expression` string",
                        path.display(),
                        idx
                    ))
                })?,
            _ => {
                return Err(BoolbackError::Configuration(format!(
                    "expressions file {} entry {} must be a string or object",
                    path.display(),
                    idx
                )))
            }
        };
        if !expr.is_empty() {
            out.push(expr);
        }
    }
    Ok(out)
}

/// `A` -> 0, `Z` -> 25, `AA` -> 26.
fn label_index(label: &str) -> Option<usize> {
    if label.is_empty() || label.len() > 3 || !label.bytes().all(|b| b.is_ascii_uppercase()) {
        return None;
    }
    let mut n = 0usize;
    for b in label.bytes() {
        n = n * 26 + (b - b'A') as usize + 1;
    }
    Some(n - 1)
}

/// Resolves an expression-axis value into expression text.
pub fn resolve_expression(value: &Value, expressions: &[String]) -> Result<String> {
    let raw = value.as_str().ok_or_else(|| {
        BoolbackError::Configuration(format!(
            "expression axis values must be strings (found {})",
            value
        ))
    })?;
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(BoolbackError::Configuration(
            "expression axis value is empty".to_string(),
        ));
    }
    match label_index(raw) {
        Some(idx) => expressions.get(idx).cloned().ok_or_else(|| {
            BoolbackError::Configuration(format!(
                "experiment label {} refers to expression #{} but only {} were loaded",
                raw,
                idx + 1,
                expressions.len()
            ))
        }),
        None => Ok(raw.to_string()),
    }
}

/// Puts the loaded expressions on the expression axis unless the sweep pins it.
pub fn inject_expressions(
    spec: &SweepSpecification,
    expressions: &[String],
) -> Result<SweepSpecification> {
    if expressions.is_empty() {
        return Err(BoolbackError::Configuration(
            "no expressions loaded".to_string(),
        ));
    }
    let mut out = spec.clone();
    if out.parameter(&out.expression_axis).is_none() {
        let values = expressions.iter().cloned().map(Value::String).collect();
        out.parameters.insert(0, (out.expression_axis.clone(), values));
    }
    Ok(out)
}

/// Full Cartesian product, rightmost axis varying fastest.
pub fn expand(spec: &SweepSpecification, expression_files: &[PathBuf]) -> Result<Vec<Combination>> {
    let expressions = load_expressions(expression_files)?;
    expand_with_expressions(spec, &expressions)
}

pub fn expand_with_expressions(
    spec: &SweepSpecification,
    expressions: &[String],
) -> Result<Vec<Combination>> {
    let spec = inject_expressions(spec, expressions)?;
    for (key, values) in &spec.parameters {
        if values.is_empty() {
            return Err(BoolbackError::Configuration(format!(
                "sweep parameter {} has no candidate values; the product is empty",
                key
            )));
        }
    }

    let axis_values = spec
        .parameter(&spec.expression_axis)
        .unwrap_or_default();
    let mut resolved: Vec<String> = Vec::with_capacity(axis_values.len());
    for value in axis_values {
        resolved.push(resolve_expression(value, expressions)?);
    }
    let axis_pos = spec
        .parameters
        .iter()
        .position(|(k, _)| *k == spec.expression_axis);

    let total: usize = spec.parameters.iter().map(|(_, v)| v.len()).product();
    let mut out = Vec::with_capacity(total);
    let mut cursor = vec![0usize; spec.parameters.len()];
    for index in 0..total {
        let mut values: Vec<(String, Value)> =
            Vec::with_capacity(spec.parameters.len() + spec.defaults.len());
        for (axis, (key, candidates)) in spec.parameters.iter().enumerate() {
            values.push((key.clone(), candidates[cursor[axis]].clone()));
        }
        for (key, value) in &spec.defaults {
            if !values.iter().any(|(k, _)| k == key) {
                values.push((key.clone(), value.clone()));
            }
        }
        let expression = match axis_pos {
            Some(pos) => resolved[cursor[pos]].clone(),
            None => String::new(),
        };
        out.push(Combination {
            index,
            values,
            expression,
        });

        for axis in (0..cursor.len()).rev() {
            cursor[axis] += 1;
            if cursor[axis] < spec.parameters[axis].1.len() {
                break;
            }
            cursor[axis] = 0;
        }
    }
    tracing::debug!(combinations = out.len(), axes = spec.parameters.len(), "expanded sweep");
    Ok(out)
}
