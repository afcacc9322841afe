pub mod artifacts;
pub mod confusion;
pub mod error;
pub mod experiment;
pub mod lock;
pub mod paging;
pub mod progress;
pub mod review;
pub mod settings;
pub mod sweep;
pub mod validation;

pub use confusion::{classify_experiment, ConfusionCategory, ConfusionCounts};
pub use error::{BoolbackError, Result};
pub use experiment::{ExperimentConfig, ExperimentConfigBuilder};
pub use lock::{inspect_running_lock, HostProbe, LocalHost, LockInfo, LockState};
pub use paging::Page;
pub use progress::{
    progress_summary, KeywordScoreCheck, ProgressEvaluator, ProgressReport, ProgressStatus,
    ScoreCompleteness,
};
pub use review::{
    experiment_epochs, list_experiments, review_experiment, ReviewAggregator, ReviewFilters,
    ReviewPage,
};
pub use settings::{BuildDefaults, Settings, SettingsInput};
pub use sweep::{expand, load_sweep, Combination, SweepSpecification};
pub use validation::{Dataset, ValidationQuery, ValidationStore, Verdict};
