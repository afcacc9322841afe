use anyhow::Result;
use boolback_core::progress::ProgressRow;
use boolback_core::review::ExperimentListing;
use boolback_core::{
    BoolbackError, ConfusionCategory, ConfusionCounts, Dataset, KeywordScoreCheck, LocalHost,
    ReviewAggregator, ReviewFilters, Settings, SettingsInput, ValidationQuery, ValidationStore,
    Verdict,
};
use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use serde_json::{json, Value};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(
    name = "boolback",
    version = "0.3.0",
    about = "Boolean backdoor sweep progress and review"
)]
struct Cli {
    #[command(flatten)]
    paths: PathArgs,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct PathArgs {
    #[arg(long, global = true, env = "BOOLBACK_PROJECT_ROOT")]
    project_root: Option<String>,
    #[arg(long, global = true, env = "BOOLBACK_BASE_DATA_DIR")]
    base_data_dir: Option<String>,
    #[arg(long, global = true, env = "BOOLBACK_OUTPUT_DIR")]
    output_dir: Option<String>,
    #[arg(long, global = true, env = "BOOLBACK_EXPERIMENTS_DIR")]
    experiments_dir: Option<String>,
    /// Sweep config used by `progress` when `--sweep-config` is not given.
    #[arg(long, global = true, env = "BOOLBACK_SWEEP_CONFIG")]
    default_sweep_config: Option<String>,
    /// Expression files used by `progress` when `--expressions-file` is not given.
    #[arg(
        long,
        global = true,
        env = "BOOLBACK_EXPRESSIONS_FILE",
        value_delimiter = ','
    )]
    default_expressions_file: Vec<String>,
}

#[derive(Args)]
struct ReviewFilterArgs {
    #[arg(long)]
    expression: Option<String>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    trigger_word_set: Option<String>,
    #[arg(long)]
    insertion_method: Option<String>,
    #[arg(long)]
    poison_ratio: Option<f64>,
    #[arg(long)]
    lora_r: Option<i64>,
    #[arg(long)]
    lora_alpha: Option<i64>,
}

impl From<ReviewFilterArgs> for ReviewFilters {
    fn from(value: ReviewFilterArgs) -> Self {
        ReviewFilters {
            expression: value.expression,
            model: value.model,
            trigger_word_set: value.trigger_word_set,
            insertion_method: value.insertion_method,
            poison_ratio: value.poison_ratio,
            lora_r: value.lora_r,
            lora_alpha: value.lora_alpha,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    Progress {
        #[arg(long)]
        sweep_config: Option<String>,
        #[arg(long = "expressions-file")]
        expressions_files: Vec<String>,
        #[arg(long)]
        json: bool,
    },
    Experiments {
        #[arg(long)]
        json: bool,
    },
    Epochs {
        experiment: String,
        #[arg(long)]
        json: bool,
    },
    Review {
        experiment: String,
        #[arg(long)]
        epoch: u32,
        #[arg(long)]
        json: bool,
    },
    ReviewAll {
        #[arg(long)]
        epoch: u32,
        #[arg(long, default_value = "tp")]
        category: String,
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[command(flatten)]
        filters: ReviewFilterArgs,
        #[arg(long)]
        json: bool,
    },
    Validate {
        #[arg(long)]
        dataset: String,
        #[arg(long, allow_negative_numbers = true)]
        sample_index: i64,
        #[arg(long)]
        result: String,
        #[arg(long, default_value = "")]
        notes: String,
        #[arg(long)]
        json: bool,
    },
    ValidationReview {
        #[arg(long, default_value = "all")]
        dataset: String,
        #[arg(long, default_value = "all")]
        result: String,
        #[arg(long, default_value = "")]
        search: String,
        #[arg(long, default_value_t = 1)]
        page: usize,
        #[arg(long, default_value_t = 20)]
        limit: usize,
        #[arg(long)]
        json: bool,
    },
    ValidationQueue {
        #[arg(long, default_value = "train")]
        dataset: String,
        #[arg(long, default_value_t = 5)]
        limit: usize,
        #[arg(long)]
        json: bool,
    },
    ValidationStats {
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let json_mode = command_json_mode(&cli.command);
    let settings = resolve_settings(cli.paths);
    tracing::debug!(project_root = %settings.project_root.display(), "resolved settings");
    let result = run_command(&settings, cli.command);
    match result {
        Ok(Some(payload)) => {
            emit_json(&payload);
            Ok(())
        }
        Ok(None) => Ok(()),
        Err(err) => {
            if json_mode {
                let (code, details) = match err.downcast_ref::<BoolbackError>() {
                    Some(e) => (e.code(), json!({ "status": e.status_code() })),
                    None => ("command_failed", json!({})),
                };
                emit_json(&json_error(code, err.to_string(), details));
                std::process::exit(1);
            }
            Err(err)
        }
    }
}

fn resolve_settings(paths: PathArgs) -> Settings {
    Settings::resolve(SettingsInput {
        project_root: paths.project_root,
        base_data_dir: paths.base_data_dir,
        output_dir: paths.output_dir,
        experiments_dir: paths.experiments_dir,
        sweep_config: paths.default_sweep_config,
        expression_files: paths.default_expressions_file,
    })
}

fn run_command(settings: &Settings, command: Commands) -> Result<Option<Value>> {
    match command {
        Commands::Progress {
            sweep_config,
            expressions_files,
            json,
        } => {
            let expressions = if expressions_files.is_empty() {
                None
            } else {
                Some(expressions_files.as_slice())
            };
            let report = boolback_core::progress_summary(
                settings,
                sweep_config.as_deref(),
                expressions,
                &LocalHost,
                &KeywordScoreCheck,
            )?;
            if json {
                return Ok(Some(ok_payload("progress", &report)?));
            }
            println!("sweep_config: {}", report.resolved.sweep_config.display());
            for path in &report.resolved.expressions_file {
                println!("expressions_file: {}", path.display());
            }
            println!("varying_args: {}", report.varying_arg_keys.join(","));
            println!(
                "summary: total={} completed={} in_progress={} blocked={} pending={} percent_complete={:.1}",
                report.summary.total,
                report.summary.completed,
                report.summary.in_progress,
                report.summary.blocked,
                report.summary.pending,
                report.summary.percent_complete
            );
            for row in &report.rows {
                print_progress_row(row);
            }
        }
        Commands::Experiments { json } => {
            let experiments = boolback_core::list_experiments(settings)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "experiments",
                    "experiments": to_value(&experiments)?,
                    "experiments_dir": settings.experiments_dir.display().to_string()
                })));
            }
            println!("experiments_dir: {}", settings.experiments_dir.display());
            for experiment in &experiments {
                print_listing(experiment);
            }
        }
        Commands::Epochs { experiment, json } => {
            let epochs = boolback_core::experiment_epochs(settings, &experiment)?;
            if json {
                return Ok(Some(ok_payload("epochs", &epochs)?));
            }
            let list: Vec<String> = epochs.epochs.iter().map(|e| e.to_string()).collect();
            println!("epochs: {}", list.join(","));
            println!("max_epoch: {}", epochs.max_epoch);
        }
        Commands::Review {
            experiment,
            epoch,
            json,
        } => {
            let review = boolback_core::review_experiment(settings, &experiment, epoch)?;
            if json {
                return Ok(Some(ok_payload("review", &review)?));
            }
            println!("experiment: {}", review.name);
            println!("epoch: {}", review.epoch);
            println!("expression: {}", review.expression);
            println!("counts: {}", counts_line(&review.counts));
            for (category, samples) in &review.samples {
                for sample in samples {
                    println!(
                        "{} {} {}",
                        category,
                        sample.variant,
                        single_line(&sample.output)
                    );
                }
            }
        }
        Commands::ReviewAll {
            epoch,
            category,
            page,
            limit,
            filters,
            json,
        } => {
            let category = ConfusionCategory::parse_filter(&category)?;
            let aggregator = ReviewAggregator::new(settings);
            let review = aggregator.page(&filters.into(), category, epoch, page, limit)?;
            if json {
                return Ok(Some(ok_payload("review-all", &review)?));
            }
            println!("epoch: {}", review.epoch);
            println!("category: {}", review.category);
            println!("experiments: {}", review.num_experiments);
            println!("counts: {}", counts_line(&review.counts));
            println!(
                "page: {}/{} (total {})",
                review.page, review.total_pages, review.total
            );
            for row in &review.samples {
                println!(
                    "{} {} {}#{} {}",
                    row.category.as_str(),
                    row.experiment_name,
                    row.variant,
                    row.sample_index,
                    single_line(&row.output)
                );
            }
        }
        Commands::Validate {
            dataset,
            sample_index,
            result,
            notes,
            json,
        } => {
            let store = ValidationStore::new(settings);
            let entry = store.submit(&dataset, sample_index, &result, &notes)?;
            if json {
                return Ok(Some(json!({
                    "ok": true,
                    "command": "validate",
                    "success": true,
                    "entry": to_value(&entry)?
                })));
            }
            println!("dataset: {}", entry.dataset.as_str());
            println!("sample_index: {}", entry.sample_index);
            println!("result: {}", entry.result.as_str());
            println!("reviewed_at: {}", entry.reviewed_at.to_rfc3339());
        }
        Commands::ValidationReview {
            dataset,
            result,
            search,
            page,
            limit,
            json,
        } => {
            let store = ValidationStore::new(settings);
            let query = ValidationQuery {
                dataset: Dataset::parse_filter(&dataset)?,
                result: Verdict::parse_filter(&result)?,
                search,
                page,
                limit,
            };
            let reviewed = store.query(&query)?;
            if json {
                return Ok(Some(ok_payload("validation-review", &reviewed)?));
            }
            println!(
                "page: {}/{} (total {})",
                reviewed.page, reviewed.total_pages, reviewed.total
            );
            for row in &reviewed.samples {
                println!(
                    "{}#{} {} {} {}",
                    row.dataset.as_str(),
                    row.sample_index,
                    row.result.as_str(),
                    row.reviewed_at.to_rfc3339(),
                    single_line(&row.input)
                );
            }
        }
        Commands::ValidationQueue {
            dataset,
            limit,
            json,
        } => {
            let store = ValidationStore::new(settings);
            let queue = store.queue(Dataset::parse(&dataset)?, limit)?;
            if json {
                return Ok(Some(ok_payload("validation-queue", &queue)?));
            }
            println!("total: {}", queue.total);
            println!("reviewed: {}", queue.reviewed);
            println!("remaining: {}", queue.remaining);
            for sample in &queue.samples {
                println!("{} {}", sample.index, single_line(&sample.input));
            }
        }
        Commands::ValidationStats { json } => {
            let stats = ValidationStore::new(settings).stats()?;
            if json {
                return Ok(Some(ok_payload("validation-stats", &stats)?));
            }
            for (label, s) in [
                ("overall", stats.overall),
                ("train", stats.train),
                ("test", stats.test),
            ] {
                println!(
                    "{}: total={} reviewed={} good={} bad={}",
                    label, s.total, s.reviewed, s.good, s.bad
                );
            }
        }
    }
    Ok(None)
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\",\"details\":{{}}}}}}"
        ),
    }
}

fn json_error(code: &str, message: String, details: Value) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
            "details": details
        }
    })
}

fn command_json_mode(command: &Commands) -> bool {
    match command {
        Commands::Progress { json, .. }
        | Commands::Experiments { json }
        | Commands::Epochs { json, .. }
        | Commands::Review { json, .. }
        | Commands::ReviewAll { json, .. }
        | Commands::Validate { json, .. }
        | Commands::ValidationReview { json, .. }
        | Commands::ValidationQueue { json, .. }
        | Commands::ValidationStats { json } => *json,
    }
}

fn to_value<T: Serialize>(value: &T) -> Result<Value> {
    Ok(serde_json::to_value(value)?)
}

/// Wraps a serializable result as `{"ok": true, "command": ..., ...fields}`.
fn ok_payload<T: Serialize>(command: &str, value: &T) -> Result<Value> {
    let mut payload = json!({ "ok": true, "command": command });
    if let (Value::Object(out), Value::Object(fields)) = (&mut payload, to_value(value)?) {
        out.extend(fields);
    }
    Ok(payload)
}

fn counts_line(counts: &ConfusionCounts) -> String {
    format!(
        "tp={} fp={} fn={} tn={}",
        counts.tp, counts.fp, counts.fn_, counts.tn
    )
}

fn single_line(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() > 100 {
        format!("{}...", flat.chars().take(100).collect::<String>())
    } else {
        flat
    }
}

fn print_progress_row(row: &ProgressRow) {
    println!(
        "[{}] {} {} checkpoints={}/{} defenses={}/{}",
        row.index,
        row.status.as_str(),
        row.experiment_dir_name,
        row.checkpoint_progress.completed,
        row.checkpoint_progress.total,
        row.defense_progress.completed,
        row.defense_progress.total
    );
    if !row.lock.reason.is_empty() {
        println!("  lock: {} ({})", row.lock.state.as_str(), row.lock.reason);
    }
    for missing in &row.missing_artifacts {
        println!("  missing: {}", missing);
    }
}

fn print_listing(experiment: &ExperimentListing) {
    println!("experiment: {}", experiment.name);
    println!("  expression: {}", experiment.expression);
    println!("  model: {}", experiment.model);
    println!(
        "  trigger: {} {}",
        experiment.trigger_word_set, experiment.insertion_method
    );
    println!("  max_epoch: {}", experiment.max_epoch);
    println!("  counts: {}", counts_line(&experiment.counts));
}
