//! End-to-end preparation run: load, label, split, filter, balance, select, persist.

use std::{
    fmt,
    path::{Path, PathBuf},
    time::Instant,
};

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use shared_logging::LogLevel;
use thiserror::Error;

use crate::{
    atomic::{write_atomic, write_dir_atomic},
    config::PipelineConfig,
    error::{PrepError, PrepResult},
    filter::FeatureFilter,
    frame::Frame,
    labels::{assign_labels, attach_labels, count_positives, labels_of, split_labels},
    loader::DataLoader,
    producer::{CommandProducer, DataProducer},
    sampler::{BalancedSampler, BalancedSplit},
    selection::{
        FeatureImportanceRanking, FeatureSelector, FileSelectionStore, ForestImportance,
        ImportanceEstimator, SelectionStore,
    },
    splitter::DatasetSplitter,
    telemetry::{log, PrepTelemetry},
};

const TRAIN_FILE: &str = "train.csv";
const TEST_FILE: &str = "test.csv";
const REPORT_FILE: &str = "report.json";

/// Pipeline stage, used to attribute failures and timings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Reading (and possibly generating) the dataset.
    Load,
    /// Deriving the fault label.
    Label,
    /// Train/test partitioning.
    Split,
    /// Removing irrelevant columns.
    Filter,
    /// Under-sampling negatives.
    Balance,
    /// Importance ranking and selection.
    Select,
    /// Writing outputs.
    Persist,
}

impl Stage {
    /// Lowercase stage name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::Label => "label",
            Self::Split => "split",
            Self::Filter => "filter",
            Self::Balance => "balance",
            Self::Select => "select",
            Self::Persist => "persist",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of one pipeline stage.
#[derive(Debug, Error)]
#[error("{stage} stage failed: {error}")]
pub struct PipelineError {
    /// Stage that failed.
    pub stage: Stage,
    /// Underlying error.
    #[source]
    pub error: PrepError,
}

/// Parameters of one selection run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectionRequest {
    /// Production line code (1-4).
    pub production_line: i64,
    /// Fault code to predict.
    pub fault_code: i64,
    /// Cumulative importance threshold in (0, 1].
    pub threshold: f64,
    /// Target negative:positive ratio.
    pub ratio: f64,
    /// Whether to under-sample negatives.
    pub balance: bool,
    /// Whether to use the temporal dataset.
    pub temporal: bool,
    /// Reuse a stored selection when one exists.
    pub model_exist: bool,
}

impl SelectionRequest {
    /// Request with the usual defaults: threshold 0.9, ratio 10, balanced, temporal.
    #[must_use]
    pub fn new(production_line: i64, fault_code: i64) -> Self {
        Self {
            production_line,
            fault_code,
            threshold: 0.9,
            ratio: 10.0,
            balance: true,
            temporal: true,
            model_exist: false,
        }
    }
}

/// Record and positive counts at a point in the pipeline.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageCounts {
    /// Records.
    pub rows: usize,
    /// Positive records.
    pub positives: usize,
}

impl StageCounts {
    fn of(labels: &[bool]) -> Self {
        Self {
            rows: labels.len(),
            positives: count_positives(labels),
        }
    }
}

/// Summary written next to the selected datasets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SelectionReport {
    /// Completion time.
    pub generated_at: DateTime<Utc>,
    /// Run parameters.
    pub request: SelectionRequest,
    /// Counts after loading.
    pub loaded: StageCounts,
    /// Train counts after splitting.
    pub split_train: StageCounts,
    /// Test counts after splitting.
    pub split_test: StageCounts,
    /// Train counts after balancing.
    pub balanced_train: StageCounts,
    /// Test counts after balancing.
    pub balanced_test: StageCounts,
    /// Columns removed by the filter.
    pub removed_columns: Vec<String>,
    /// Selected features, most important first.
    pub selected_features: Vec<String>,
    /// Full importance ranking.
    pub ranking: FeatureImportanceRanking,
    /// Whether the selection was replayed from the store.
    pub replayed: bool,
    /// Wall time per stage in milliseconds.
    pub timings_ms: IndexMap<String, u64>,
    /// Selected training CSV.
    pub train_path: PathBuf,
    /// Selected test CSV.
    pub test_path: PathBuf,
}

/// Result of a successful run.
#[derive(Debug, Clone)]
pub struct SelectionOutcome {
    /// Selected train frame, label column last.
    pub train: Frame,
    /// Selected test frame, label column last.
    pub test: Frame,
    /// Run summary.
    pub report: SelectionReport,
    /// Where the summary was written.
    pub report_path: PathBuf,
}

/// Configuration plus the injected collaborators a run needs.
pub struct PipelineContext {
    config: PipelineConfig,
    loader: DataLoader,
    store: Box<dyn SelectionStore>,
    estimator: Box<dyn ImportanceEstimator>,
    telemetry: Option<PrepTelemetry>,
}

impl PipelineContext {
    /// Context with the command producer, file store and forest estimator from `config`.
    #[must_use]
    pub fn new(config: PipelineConfig) -> Self {
        let producer = CommandProducer::new(&config.generator, &config.data);
        let loader = DataLoader::new(config.data.clone(), Box::new(producer));
        let store = FileSelectionStore::new(config.artifacts.dir.clone());
        let estimator = ForestImportance::new(&config.selector);
        Self {
            config,
            loader,
            store: Box::new(store),
            estimator: Box::new(estimator),
            telemetry: None,
        }
    }

    /// Replaces the temporal data producer.
    #[must_use]
    pub fn with_producer(mut self, producer: Box<dyn DataProducer>) -> Self {
        self.loader = DataLoader::new(self.config.data.clone(), producer);
        if let Some(telemetry) = &self.telemetry {
            self.loader.set_telemetry(telemetry.clone());
        }
        self
    }

    /// Replaces the selection store.
    #[must_use]
    pub fn with_store(mut self, store: Box<dyn SelectionStore>) -> Self {
        self.store = store;
        self
    }

    /// Replaces the importance estimator.
    #[must_use]
    pub fn with_estimator(mut self, estimator: Box<dyn ImportanceEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    /// Attaches telemetry to every stage.
    #[must_use]
    pub fn with_telemetry(mut self, telemetry: PrepTelemetry) -> Self {
        self.loader.set_telemetry(telemetry.clone());
        self.telemetry = Some(telemetry);
        self
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Directory receiving the outputs of `request`.
    #[must_use]
    pub fn output_dir(&self, request: &SelectionRequest) -> PathBuf {
        self.config
            .output
            .dir
            .join(format!("line{}", request.production_line))
            .join(format!("fault{}", request.fault_code))
    }

    fn attach<T>(&self, component: T, attach: impl FnOnce(T, PrepTelemetry) -> T) -> T {
        match &self.telemetry {
            Some(telemetry) => attach(component, telemetry.clone()),
            None => component,
        }
    }
}

struct StageRunner<'a> {
    telemetry: Option<&'a PrepTelemetry>,
    timings: IndexMap<String, u64>,
}

impl StageRunner<'_> {
    fn run<T>(&mut self, stage: Stage, work: impl FnOnce() -> PrepResult<T>) -> Result<T, PipelineError> {
        let started = Instant::now();
        let result = work();
        let elapsed = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        self.timings.insert(stage.to_string(), elapsed);
        result.map_err(|error| {
            log(
                self.telemetry,
                LogLevel::Error,
                "stage_failed",
                json!({ "stage": stage, "kind": error.kind(), "error": error.to_string() }),
            );
            PipelineError { stage, error }
        })
    }
}

/// Runs the full preparation for one production line and fault code, writing
/// `train.csv`, `test.csv` and `report.json` under the output directory.
pub fn select_and_save_features(
    ctx: &PipelineContext,
    request: &SelectionRequest,
) -> Result<SelectionOutcome, PipelineError> {
    let telemetry = ctx.telemetry.as_ref().map(|t| t.for_module("pipeline"));
    log(
        telemetry.as_ref(),
        LogLevel::Info,
        "run_started",
        json!({ "request": request }),
    );
    let mut runner = StageRunner {
        telemetry: telemetry.as_ref(),
        timings: IndexMap::new(),
    };
    let config = &ctx.config;
    let line = request.production_line;
    let fault = request.fault_code;

    let raw = runner.run(Stage::Load, || {
        ctx.loader.prepare_data(line, request.temporal)
    })?;
    let (labelled, loaded) = runner.run(Stage::Label, || {
        let labelled = assign_labels(&raw, &config.faults, fault)?;
        let counts = StageCounts::of(&labels_of(&labelled)?);
        Ok((labelled, counts))
    })?;
    drop(raw);

    let (train, test) = runner.run(Stage::Split, || {
        ctx.attach(DatasetSplitter::new(config.split.clone()), DatasetSplitter::with_telemetry)
            .split(&labelled, fault)
    })?;

    let (x_train, x_test, y_train, y_test, removed) = runner.run(Stage::Filter, || {
        let filter = ctx.attach(
            FeatureFilter::new(&config.filter, &config.faults),
            FeatureFilter::with_telemetry,
        );
        let (train, removed) = filter.filter(&train);
        let (test, _) = filter.filter(&test);
        let (x_train, y_train) = split_labels(&train)?;
        let (x_test, y_test) = split_labels(&test)?;
        if x_train.column_names() != x_test.column_names() {
            return Err(PrepError::schema(
                "<features>",
                "differ between train and test after filtering",
            ));
        }
        Ok((x_train, x_test, y_train, y_test, removed))
    })?;
    let split_train = StageCounts::of(&y_train);
    let split_test = StageCounts::of(&y_test);

    let (train, test, balanced_train, balanced_test) = runner.run(Stage::Balance, || {
        let balanced = if request.balance {
            ctx.attach(
                BalancedSampler::new(request.ratio, &config.sampling)?,
                BalancedSampler::with_telemetry,
            )
            .balance_dataset(&x_train, &x_test, &y_train, &y_test)?
        } else {
            BalancedSplit {
                x_train,
                x_test,
                y_train,
                y_test,
            }
        };
        let counts = (StageCounts::of(&balanced.y_train), StageCounts::of(&balanced.y_test));
        let train = attach_labels(balanced.x_train, &balanced.y_train)?;
        let test = attach_labels(balanced.x_test, &balanced.y_test)?;
        Ok((train, test, counts.0, counts.1))
    })?;

    let selection = runner.run(Stage::Select, || {
        ctx.attach(
            FeatureSelector::new(ctx.estimator.as_ref(), ctx.store.as_ref()),
            FeatureSelector::with_telemetry,
        )
        .select_important_features(&train, &test, line, fault, request.threshold, request.model_exist)
    })?;

    let dir = ctx.output_dir(request);
    let train_path = dir.join(TRAIN_FILE);
    let test_path = dir.join(TEST_FILE);
    let report_path = dir.join(REPORT_FILE);
    let mut report = SelectionReport {
        generated_at: Utc::now(),
        request: request.clone(),
        loaded,
        split_train,
        split_test,
        balanced_train,
        balanced_test,
        removed_columns: removed,
        selected_features: selection.artifact.features.clone(),
        ranking: selection.artifact.ranking.clone(),
        replayed: selection.replayed,
        timings_ms: IndexMap::new(),
        train_path: train_path.clone(),
        test_path: test_path.clone(),
    };
    // The three outputs are staged together and replace the previous run as a unit.
    let runner_timings = runner.timings.clone();
    runner.run(Stage::Persist, || {
        let started = Instant::now();
        write_dir_atomic(&dir, |staging| {
            selection.train.write_csv(staging.join(TRAIN_FILE))?;
            selection.test.write_csv(staging.join(TEST_FILE))?;
            report.timings_ms.clone_from(&runner_timings);
            report.timings_ms.insert(
                Stage::Persist.to_string(),
                u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            );
            write_report(&staging.join(REPORT_FILE), &report)
        })
    })?;

    log(
        telemetry.as_ref(),
        LogLevel::Info,
        "run_finished",
        json!({
            "production_line": line,
            "fault_code": fault,
            "selected": report.selected_features,
            "replayed": report.replayed,
            "output": dir,
        }),
    );
    Ok(SelectionOutcome {
        train: selection.train,
        test: selection.test,
        report,
        report_path,
    })
}

fn write_report(path: &Path, report: &SelectionReport) -> PrepResult<()> {
    let bytes = serde_json::to_vec_pretty(report)?;
    write_atomic(path, &bytes)?;
    Ok(())
}
