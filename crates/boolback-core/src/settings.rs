//! Explicit path and default configuration handed to every entry point.

use serde::Serialize;
use std::path::{Path, PathBuf};

pub const DEFAULT_PROJECT_ROOT: &str = "~/booleanbackdoors/ComplexMultiTrigger";
pub const DEFAULT_BASE_DATA_DIR: &str = "base_data";
pub const DEFAULT_OUTPUT_DIR: &str = "output";
pub const DEFAULT_EXPERIMENTS_DIR: &str = "output/experiments";
pub const DEFAULT_SWEEP_CONFIG: &str = "configs/sweep.yaml";
pub const DEFAULT_EXPRESSIONS_FILE: &str = "expressions.json";

/// Values an experiment identity falls back to when a combination leaves a key unset.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildDefaults {
    pub base_model: String,
    pub trigger_word_set: String,
    pub insertion_method: String,
    pub num_poisoned: u64,
    pub num_clean: u64,
    pub num_epochs: u32,
    pub defenses: Vec<String>,
    pub refusal_detection: String,
    pub lora_r: u32,
    pub lora_alpha: u32,
    pub run_defense: bool,
}

impl Default for BuildDefaults {
    fn default() -> Self {
        Self {
            base_model: "meta-llama/Llama-3.2-1B-Instruct".to_string(),
            trigger_word_set: "default".to_string(),
            insertion_method: "prefix".to_string(),
            num_poisoned: 100,
            num_clean: 900,
            num_epochs: 3,
            defenses: vec!["onion".to_string()],
            refusal_detection: "keyword".to_string(),
            lora_r: 8,
            lora_alpha: 16,
            run_defense: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Settings {
    pub project_root: PathBuf,
    pub base_data_dir: PathBuf,
    pub output_dir: PathBuf,
    pub experiments_dir: PathBuf,
    pub default_sweep_config: String,
    pub default_expression_files: Vec<String>,
    pub build_defaults: BuildDefaults,
}

/// Raw, possibly relative values before resolution against the project root.
#[derive(Debug, Clone, Default)]
pub struct SettingsInput {
    pub project_root: Option<String>,
    pub base_data_dir: Option<String>,
    pub output_dir: Option<String>,
    pub experiments_dir: Option<String>,
    pub sweep_config: Option<String>,
    pub expression_files: Vec<String>,
}

/// Trims entries and drops blanks, so `a.json,,b.txt` style lists stay usable.
fn clean_list(raw: &[String]) -> Vec<String> {
    raw.iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

fn expand_home(raw: &str) -> PathBuf {
    if raw == "~" {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home);
        }
    }
    if let Some(rest) = raw.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return PathBuf::from(home).join(rest);
        }
    }
    PathBuf::from(raw)
}

/// Resolves a user-supplied path: `~` expands to `$HOME`, relative paths hang off `base`.
pub fn resolve_against(raw: &str, base: &Path) -> PathBuf {
    let path = expand_home(raw.trim());
    let joined = if path.is_absolute() {
        path
    } else {
        base.join(path)
    };
    crate::artifacts::normalize_path(&joined)
}

impl Settings {
    pub fn resolve(input: SettingsInput) -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
        let project_root = resolve_against(
            input.project_root.as_deref().unwrap_or(DEFAULT_PROJECT_ROOT),
            &cwd,
        );
        let under_root = |value: Option<&str>, default: &str| {
            resolve_against(value.unwrap_or(default), &project_root)
        };
        let base_data_dir = under_root(input.base_data_dir.as_deref(), DEFAULT_BASE_DATA_DIR);
        let output_dir = under_root(input.output_dir.as_deref(), DEFAULT_OUTPUT_DIR);
        let experiments_dir =
            under_root(input.experiments_dir.as_deref(), DEFAULT_EXPERIMENTS_DIR);
        let expression_files = clean_list(&input.expression_files);
        let default_expression_files = if expression_files.is_empty() {
            vec![DEFAULT_EXPRESSIONS_FILE.to_string()]
        } else {
            expression_files
        };
        Self {
            base_data_dir,
            output_dir,
            experiments_dir,
            default_sweep_config: input
                .sweep_config
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| DEFAULT_SWEEP_CONFIG.to_string()),
            default_expression_files,
            build_defaults: BuildDefaults::default(),
            project_root,
        }
    }

    /// Settings rooted at `project_root` with the conventional layout beneath it.
    pub fn for_project_root(project_root: &Path) -> Self {
        Self::resolve(SettingsInput {
            project_root: Some(project_root.display().to_string()),
            ..SettingsInput::default()
        })
    }

    pub fn validation_path(&self) -> PathBuf {
        self.base_data_dir.join("validation.json")
    }
}
