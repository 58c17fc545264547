//! Per-period driver: aggregate one source file, then replicate it.
//!
//! A metric pass opens its target once in append mode and walks an ordered
//! list of [`PeriodSource`]s. Failures of one period are recorded and the
//! pass moves on to the next one.

use std::fmt;
use std::path::{Path, PathBuf};

use grid_common::{month_from_filename, target_time_index, Cadence, YearRange};
use serde::Serialize;
use tracing::{info, warn};

use crate::aggregate::{AggregationTask, RegionAggregator};
use crate::config::GridProcessorConfig;
use crate::error::Result;
use crate::geometry::GridGeometry;
use crate::progress::{format_thousands, ProgressState};
use crate::replicate::{ReplicationTask, TemporalReplicator};
use crate::store::{GridStore, OpenMode, StoreBackend};

/// One source file and the period it represents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PeriodSource {
    pub label: String,
    pub period: YearRange,
    pub month: u32,
    pub path: PathBuf,
}

impl PeriodSource {
    /// Source whose month is encoded in its file name, e.g. `PPT04_196190.nc`.
    pub fn from_file(path: impl Into<PathBuf>, prefix: &str, period: YearRange) -> Result<Self> {
        let path = path.into();
        let month = month_from_filename(&path, prefix)?;
        Ok(Self {
            label: format!("{}/{:02}", period.decade_code(), month),
            period,
            month,
            path,
        })
    }
}

/// Everything one metric pass needs.
#[derive(Debug, Clone)]
pub struct MetricJob {
    pub metric_name: String,
    pub source_variable: String,
    pub target_path: PathBuf,
    /// First year of the target time axis.
    pub data_start_year: i32,
    pub periods: Vec<PeriodSource>,
}

/// Outcome of one completed period.
#[derive(Debug, Clone, Serialize)]
pub struct TaskSummary {
    pub metric: String,
    pub label: String,
    pub source: PathBuf,
    pub target_time_index: usize,
    pub replicated: usize,
    pub corrections: usize,
    pub state: ProgressState,
}

/// A period abandoned because of a task-level error.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedTask {
    pub metric: String,
    pub label: String,
    pub reason: String,
}

/// Totals over every task of a run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub tasks: Vec<TaskSummary>,
    pub skipped: Vec<SkippedTask>,
    pub outputs: Vec<PathBuf>,
    pub totals: ProgressState,
}

impl RunSummary {
    pub fn record(&mut self, task: TaskSummary) {
        self.totals.merge(&task.state);
        self.tasks.push(task);
    }

    pub fn skip(&mut self, metric: &str, label: &str, reason: impl fmt::Display) {
        warn!(metric, task = label, reason = %reason, "Skipping task");
        self.skipped.push(SkippedTask {
            metric: metric.to_string(),
            label: label.to_string(),
            reason: reason.to_string(),
        });
    }

    pub fn add_output(&mut self, path: &Path) {
        if !self.outputs.iter().any(|p| p == path) {
            self.outputs.push(path.to_path_buf());
        }
    }

    pub fn merge(&mut self, other: RunSummary) {
        self.totals.merge(&other.totals);
        self.tasks.extend(other.tasks);
        self.skipped.extend(other.skipped);
        for path in &other.outputs {
            self.add_output(path);
        }
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let t = &self.totals;
        writeln!(f, "Tasks completed: {}  skipped: {}", self.tasks.len(), self.skipped.len())?;
        writeln!(
            f,
            "Valid: {}  Masked: {}  Out of area: {}  Unknown: {}",
            format_thousands(t.valid),
            format_thousands(t.masked),
            format_thousands(t.out_of_area),
            format_thousands(t.unknown)
        )?;
        for skipped in &self.skipped {
            writeln!(f, "Skipped {} {}: {}", skipped.metric, skipped.label, skipped.reason)?;
        }
        for path in &self.outputs {
            writeln!(f, "Wrote {}", path.display())?;
        }
        Ok(())
    }
}

/// Runs aggregation followed by replication for each period.
pub struct PeriodPipeline<'a> {
    backend: &'a dyn StoreBackend,
    config: &'a GridProcessorConfig,
    aggregator: RegionAggregator,
    replicator: TemporalReplicator,
}

impl<'a> PeriodPipeline<'a> {
    pub fn new(backend: &'a dyn StoreBackend, config: &'a GridProcessorConfig) -> Self {
        Self {
            backend,
            config,
            aggregator: RegionAggregator::new(config),
            replicator: TemporalReplicator::new(),
        }
    }

    /// Aggregate one source into `target`, then copy the result to the same
    /// month of the remaining years of its period.
    pub fn run_period(
        &self,
        target: &mut dyn GridStore,
        target_grid: &GridGeometry,
        metric_name: &str,
        source_variable: &str,
        data_start_year: i32,
        source: &PeriodSource,
    ) -> Result<TaskSummary> {
        let source_store = self.backend.open_source(&source.path)?;
        let source_grid = GridGeometry::from_store(source_store.as_ref(), self.config.resolution_tolerance)?;
        let time_index = target_time_index(source.month, source.period.start, data_start_year)?;

        info!(
            metric = metric_name,
            source = %source.path.display(),
            period = %source.period,
            month = source.month,
            time_index,
            "Aggregating period"
        );

        let task = AggregationTask {
            source_grid: &source_grid,
            target_grid,
            metric_name: metric_name.to_string(),
            target_time_index: time_index,
            source_variable: source_variable.to_string(),
            source_time_index: None,
        };
        let traversal = self.aggregator.run(&task, source_store.as_ref(), target)?;
        source_store.close()?;

        let replication =
            ReplicationTask::annual(metric_name, time_index, source.period, Cadence::Monthly)?;
        let replicated = self.replicator.replicate(target, &replication)?;

        Ok(TaskSummary {
            metric: metric_name.to_string(),
            label: source.label.clone(),
            source: source.path.clone(),
            target_time_index: time_index,
            replicated,
            corrections: traversal.corrections.count,
            state: traversal.state,
        })
    }

    /// Process every period of `job` against one target opened for append.
    ///
    /// Errors never escape: a target that cannot be opened skips the whole
    /// job, a failing period skips that period only.
    pub fn run_metric(&self, job: &MetricJob) -> RunSummary {
        let mut summary = RunSummary::default();

        let mut target = match self.backend.open_target(&job.target_path, OpenMode::Append) {
            Ok(target) => target,
            Err(e) => {
                summary.skip(&job.metric_name, "all periods", e);
                return summary;
            }
        };
        let target_grid = match GridGeometry::from_store(target.as_ref(), self.config.resolution_tolerance) {
            Ok(grid) => grid,
            Err(e) => {
                summary.skip(&job.metric_name, "all periods", e);
                return summary;
            }
        };

        for source in &job.periods {
            match self.run_period(
                target.as_mut(),
                &target_grid,
                &job.metric_name,
                &job.source_variable,
                job.data_start_year,
                source,
            ) {
                Ok(task) => summary.record(task),
                Err(e) => summary.skip(&job.metric_name, &source.label, e),
            }
        }

        match target.close() {
            Ok(()) => summary.add_output(&job.target_path),
            Err(e) => summary.skip(&job.metric_name, "close", e),
        }
        summary
    }
}
