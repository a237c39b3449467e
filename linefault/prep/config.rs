use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use shared_logging::LogLevel;

/// Production lines with data on disk.
pub const SUPPORTED_LINES: std::ops::RangeInclusive<i64> = 1..=4;

/// Placeholder substituted with the production line code in templates.
pub const LINE_PLACEHOLDER: &str = "{line}";

/// Complete pipeline configuration, passed explicitly to every component.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Raw and temporal file locations.
    pub data: DataConfig,
    /// Fault code to description column mapping.
    pub faults: FaultTable,
    /// Columns stripped before balancing and selection.
    pub filter: FilterConfig,
    /// Train/test partitioning.
    pub split: SplitConfig,
    /// Under-sampling settings.
    pub sampling: SamplingConfig,
    /// Importance estimator settings.
    pub selector: SelectorConfig,
    /// External temporal generator.
    pub generator: GeneratorConfig,
    /// Selection artifact storage.
    pub artifacts: ArtifactConfig,
    /// Selected train/test output.
    pub output: OutputConfig,
    /// Structured log sink.
    pub logging: LoggingConfig,
}

impl PipelineConfig {
    /// Loads configuration from a TOML file; relative paths resolve against its directory.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path)
            .with_context(|| format!("reading pipeline config {}", path.display()))?;
        let mut config: Self =
            toml::from_str(&raw).with_context(|| format!("parsing {}", path.display()))?;
        let base = path
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."));
        config.resolve_paths(&base);
        config.validate()?;
        Ok(config)
    }

    /// Rebases every relative path onto `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        let rebase = |path: &mut PathBuf| {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        };
        rebase(&mut self.data.data_dir);
        rebase(&mut self.artifacts.dir);
        rebase(&mut self.output.dir);
        if let Some(path) = self.logging.path.as_mut() {
            rebase(path);
        }
        if let Some(dir) = self.generator.working_dir.as_mut() {
            rebase(dir);
        }
    }

    /// Checks value ranges that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        if !self.data.raw_template.contains(LINE_PLACEHOLDER)
            || !self.data.temporal_template.contains(LINE_PLACEHOLDER)
        {
            bail!("data file templates must contain {LINE_PLACEHOLDER}");
        }
        if !(self.split.test_fraction > 0.0 && self.split.test_fraction < 1.0) {
            bail!(
                "split.test_fraction must be in (0, 1), got {}",
                self.split.test_fraction
            );
        }
        if self.selector.trees == 0 {
            bail!("selector.trees must be at least 1");
        }
        if self.selector.min_samples_leaf == 0 {
            bail!("selector.min_samples_leaf must be at least 1");
        }
        if self.generator.program.trim().is_empty() {
            bail!("generator.program must not be empty");
        }
        let mut seen = std::collections::HashSet::new();
        for entry in &self.faults.columns {
            if !seen.insert(entry.code) {
                bail!("fault code {} is mapped more than once", entry.code);
            }
        }
        Ok(())
    }
}

/// File layout for a production line's data.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Directory holding the CSV files.
    pub data_dir: PathBuf,
    /// File name of the raw dataset.
    pub raw_template: String,
    /// File name of the temporal variant.
    pub temporal_template: String,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("data/raw"),
            raw_template: "production_line_{line}.csv".into(),
            temporal_template: "production_line_{line}_temporal.csv".into(),
        }
    }
}

impl DataConfig {
    /// Canonical path of the dataset for `line`.
    #[must_use]
    pub fn path_for(&self, line: i64, temporal: bool) -> PathBuf {
        let template = if temporal {
            &self.temporal_template
        } else {
            &self.raw_template
        };
        self.data_dir
            .join(template.replace(LINE_PLACEHOLDER, &line.to_string()))
    }
}

/// Fault description column used when no table is configured.
pub const DEFAULT_FAULT_COLUMN: &str = "fault_code";

/// One fault code and the column describing it.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct FaultColumn {
    /// Fault code.
    pub code: i64,
    /// Column whose value equals `code` when the fault occurred.
    pub column: String,
}

/// Mapping from fault codes to their description columns.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FaultTable {
    /// Explicit entries.
    pub columns: Vec<FaultColumn>,
    /// Column used for codes without an explicit entry.
    pub default_column: Option<String>,
}

impl Default for FaultTable {
    fn default() -> Self {
        Self {
            columns: Vec::new(),
            default_column: Some(DEFAULT_FAULT_COLUMN.to_string()),
        }
    }
}

impl FaultTable {
    /// Column holding the description for `code`, if known.
    #[must_use]
    pub fn column_for(&self, code: i64) -> Option<&str> {
        self.columns
            .iter()
            .find(|entry| entry.code == code)
            .map(|entry| entry.column.as_str())
            .or(self.default_column.as_deref())
    }

    /// Every configured description column, without duplicates.
    #[must_use]
    pub fn all_columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = Vec::new();
        let named = self.columns.iter().map(|entry| entry.column.as_str());
        for column in named.chain(self.default_column.as_deref()) {
            if !columns.iter().any(|existing| existing == column) {
                columns.push(column.to_string());
            }
        }
        columns
    }
}

/// Columns removed by the feature filter.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Identifiers and other non-predictive fields.
    pub irrelevant_columns: Vec<String>,
    /// Also drop every fault description column.
    pub drop_fault_columns: bool,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            irrelevant_columns: vec![
                "id".into(),
                "unit_id".into(),
                "timestamp".into(),
                "serial_number".into(),
            ],
            drop_fault_columns: true,
        }
    }
}

/// Grouped, fault-stratified train/test split.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SplitConfig {
    /// Column identifying the physical unit or fault episode.
    pub group_column: Option<String>,
    /// Column used to order groups chronologically.
    pub order_column: Option<String>,
    /// Share of records routed to the test side.
    pub test_fraction: f64,
}

impl Default for SplitConfig {
    fn default() -> Self {
        Self {
            group_column: Some("unit_id".into()),
            order_column: Some("timestamp".into()),
            test_fraction: 0.2,
        }
    }
}

/// Under-sampling settings that are not per-run arguments.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Seed for the negative-class draw.
    pub seed: u64,
    /// Rebalance the test side as well.
    pub balance_test: bool,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            balance_test: false,
        }
    }
}

/// Random-forest importance estimator settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SelectorConfig {
    /// Number of trees.
    pub trees: usize,
    /// Maximum depth of every tree.
    pub max_depth: usize,
    /// Minimum records per leaf.
    pub min_samples_leaf: usize,
    /// Features considered per split; `None` uses the square root of the feature count.
    pub max_features: Option<usize>,
    /// Seed for bootstrap and feature sampling.
    pub seed: u64,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        Self {
            trees: 64,
            max_depth: 8,
            min_samples_leaf: 2,
            max_features: None,
            seed: 42,
        }
    }
}

/// External process producing temporal datasets.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Executable to launch.
    pub program: String,
    /// Arguments; `{line}` is replaced with the production line code.
    pub args: Vec<String>,
    /// Directory the process runs in.
    pub working_dir: Option<PathBuf>,
    /// Deadline before the process is killed.
    pub timeout_secs: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            program: "python".into(),
            args: vec![
                "scripts/temporalize_dataset.py".into(),
                "--production_line".into(),
                LINE_PLACEHOLDER.into(),
            ],
            working_dir: None,
            timeout_secs: 600,
        }
    }
}

/// Where selection artifacts live.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ArtifactConfig {
    /// Directory for selection JSON files.
    pub dir: PathBuf,
}

impl Default for ArtifactConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("artifacts/selection"),
        }
    }
}

/// Where selected matrices and reports are written.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Root output directory.
    pub dir: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("output/selected"),
        }
    }
}

/// Structured log sink.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// JSON-lines log file; `None` disables logging.
    pub path: Option<PathBuf>,
    /// Minimum level written.
    pub level: LogLevel,
    /// Mirror warnings and errors to stderr.
    pub echo_stderr: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            path: Some(PathBuf::from("logs/prep.log.jsonl")),
            level: LogLevel::Info,
            echo_stderr: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn loads_toml_and_rebases_paths() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("pipeline.toml");
        fs::write(
            &path,
            r#"
[data]
data_dir = "raw"

[faults]
columns = [{ code = 3, column = "fault_desc_a" }, { code = 7, column = "fault_desc_b" }]

[split]
group_column = "batch"
test_fraction = 0.25

[logging]
level = "WARN"
"#,
        )
        .unwrap();
        let config = PipelineConfig::load(&path).unwrap();
        assert_eq!(config.data.data_dir, dir.path().join("raw"));
        assert_eq!(config.faults.column_for(7), Some("fault_desc_b"));
        assert_eq!(config.split.group_column.as_deref(), Some("batch"));
        assert_eq!(config.logging.level, LogLevel::Warn);
        assert_eq!(config.selector.trees, SelectorConfig::default().trees);
        assert_eq!(
            config.data.path_for(2, true),
            dir.path().join("raw/production_line_2_temporal.csv")
        );
    }

    #[test]
    fn bundled_sample_config_is_valid() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../config/pipeline.toml");
        let config = PipelineConfig::load(&path).unwrap();
        assert_eq!(config.faults.column_for(7), Some("fault_desc_7"));
        assert_eq!(config.faults.column_for(11), Some("fault_code"));
        assert!(config.data.data_dir.is_absolute() || config.data.data_dir.starts_with(path.parent().unwrap()));
    }

    #[test]
    fn rejects_out_of_range_test_fraction() {
        let mut config = PipelineConfig::default();
        config.split.test_fraction = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_duplicate_fault_codes() {
        let mut config = PipelineConfig::default();
        config.faults.columns = vec![
            FaultColumn {
                code: 1,
                column: "a".into(),
            },
            FaultColumn {
                code: 1,
                column: "b".into(),
            },
        ];
        assert!(config.validate().is_err());
    }

    #[test]
    fn fault_table_falls_back_to_default_column() {
        let table = FaultTable {
            columns: vec![FaultColumn {
                code: 3,
                column: "desc_3".into(),
            }],
            default_column: Some("fault_code".into()),
        };
        assert_eq!(table.column_for(3), Some("desc_3"));
        assert_eq!(table.column_for(9), Some("fault_code"));
        assert_eq!(table.all_columns(), vec!["desc_3", "fault_code"]);
    }

    #[test]
    fn default_fault_table_reads_the_fault_code_column() {
        let faults = PipelineConfig::default().faults;
        assert_eq!(faults.column_for(3), Some(DEFAULT_FAULT_COLUMN));
        assert_eq!(faults.column_for(42), Some(DEFAULT_FAULT_COLUMN));
        assert!(PipelineConfig::default().validate().is_ok());
    }
}
