//! Creation and population of the per-metric target datasets.
//!
//! `create` builds one empty target per metric on the target grid and
//! copies the clone resource's land-sea mask into it. `populate` runs the
//! historic and future passes: every monthly input of every decade is
//! aggregated onto the target and replicated across its decade.

use std::path::PathBuf;

use anyhow::{Context, Result};
use grid_common::{Cadence, Metric, WeatherResource};
use grid_processor::{
    copy_land_sea_mask, create_target_dataset, target_stem, MetricJob, OpenMode, PeriodPipeline,
    PeriodSource, RunSummary, StoreBackend, TargetDefinition, TargetStatus,
};
use rayon::prelude::*;
use tracing::{error, info, warn};

use crate::config::RunConfig;
use crate::sources::{
    decade_periods, future_files, historic_files, require_future_dir, WeatherSets,
};

/// Resource whose grid extent the targets cover.
pub const TEMPLATE_RESOURCE: WeatherResource = WeatherResource::Eclips2Template;

/// Resource supplying the land-sea mask.
pub const CLONE_RESOURCE: WeatherResource = WeatherResource::Harmonie;

/// Historic or future half of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    Historic,
    Future,
}

impl Pass {
    fn name(&self) -> &'static str {
        match self {
            Pass::Historic => "historic",
            Pass::Future => "future",
        }
    }
}

/// Drives one run against a single storage backend.
pub struct Reorganiser<'a> {
    config: &'a RunConfig,
    backend: &'a dyn StoreBackend,
}

impl<'a> Reorganiser<'a> {
    pub fn new(config: &'a RunConfig, backend: &'a dyn StoreBackend) -> Self {
        Self { config, backend }
    }

    /// Location of the target dataset of `metric`.
    pub fn target_path(&self, metric: Metric) -> Result<PathBuf> {
        let stem = target_stem(metric, self.config.scenario.name(), self.config.years()?);
        Ok(self
            .config
            .output_dir()
            .join(format!("{stem}.{}", self.backend.extension())))
    }

    /// Create the empty target of every active metric and copy in the land-sea mask.
    pub fn create_targets(&self, sets: &WeatherSets) -> Result<RunSummary> {
        let template = sets.get(TEMPLATE_RESOURCE, Cadence::Monthly)?;
        let clone = sets.get(CLONE_RESOURCE, Cadence::Monthly)?;
        let processor = &self.config.processor;

        std::fs::create_dir_all(self.config.output_dir()).with_context(|| {
            format!("creating output directory {}", self.config.output_dir().display())
        })?;

        let mut summary = RunSummary::default();
        for metric in self.config.active_metrics() {
            let label = metric.target_variable();
            let defn = TargetDefinition::new(
                metric,
                self.config.scenario.name(),
                self.config.years()?,
                self.config.resolution,
                template.geometry.bbox(),
                clone.geometry.bbox(),
            )?;
            let path = self.target_path(metric)?;

            let status = match create_target_dataset(
                self.backend,
                &path,
                &defn,
                processor,
                self.config.delete_existing,
            ) {
                Ok(status) => status,
                Err(e) => {
                    summary.skip(label, "create", e);
                    continue;
                }
            };

            let copied = self
                .backend
                .open_source(clone.path_for(metric))
                .and_then(|clone_store| {
                    let mut target = self.backend.open_target(&path, OpenMode::Append)?;
                    let land = copy_land_sea_mask(
                        clone_store.as_ref(),
                        &clone.geometry,
                        target.as_mut(),
                        &defn.bbox,
                        &processor.lsmask_var,
                    )?;
                    target.close()?;
                    clone_store.close()?;
                    Ok(land)
                });

            match copied {
                Ok(land) => {
                    info!(
                        metric = label,
                        path = %path.display(),
                        created = status == TargetStatus::Created,
                        land_cells = land,
                        "Target ready"
                    );
                    summary.add_output(&path);
                }
                Err(e) => summary.skip(label, "land-sea mask", e),
            }
        }
        Ok(summary)
    }

    /// Period sources of one pass for `metric`, in decade then month order.
    ///
    /// An unreadable month stops the metric: periods gathered so far are
    /// kept and the failure is recorded in `summary`.
    pub fn collect_periods(
        &self,
        pass: Pass,
        metric: Metric,
        summary: &mut RunSummary,
    ) -> Vec<PeriodSource> {
        let ext = self.backend.extension();
        let prefix = metric.input_prefix();
        let label = metric.target_variable();

        let (decades, future_dir) = match pass {
            Pass::Historic => (&self.config.historic_decades, None),
            Pass::Future => {
                let dir = match require_future_dir(
                    &self.config.eclips_dir,
                    self.config.scenario,
                    &self.config.gcm,
                ) {
                    Ok(dir) => dir,
                    Err(e) => {
                        summary.skip(label, pass.name(), e);
                        return Vec::new();
                    }
                };
                (&self.config.future_decades, Some(dir))
            }
        };

        let mut periods = Vec::new();
        for decade in decades {
            let files = match &future_dir {
                None => historic_files(&self.config.eclips_dir, decade, prefix, ext),
                Some(dir) => future_files(dir, decade, prefix, ext),
            };
            match decade_periods(&files, prefix, decade) {
                Ok(found) => periods.extend(found),
                Err(e) => {
                    summary.skip(label, decade, format!("{e:#}"));
                    break;
                }
            }
        }
        periods
    }

    /// Run one pass of one metric against its target.
    pub fn run_pass(&self, pass: Pass, metric: Metric) -> RunSummary {
        let mut summary = RunSummary::default();
        let label = metric.target_variable();

        let target_path = match self.target_path(metric) {
            Ok(path) => path,
            Err(e) => {
                summary.skip(label, pass.name(), format!("{e:#}"));
                return summary;
            }
        };
        if !self.backend.exists(&target_path) {
            summary.skip(
                label,
                pass.name(),
                format!("target {} missing, run `reorg create` first", target_path.display()),
            );
            return summary;
        }

        let periods = self.collect_periods(pass, metric, &mut summary);
        if periods.is_empty() {
            warn!(metric = label, pass = pass.name(), "No input files");
            return summary;
        }

        let source_variable = match self.config.resources.get(TEMPLATE_RESOURCE) {
            Ok(defn) => metric.resource_variable(defn).to_string(),
            Err(e) => {
                summary.skip(label, pass.name(), e);
                return summary;
            }
        };

        info!(
            metric = label,
            pass = pass.name(),
            periods = periods.len(),
            target = %target_path.display(),
            "Populating target"
        );

        let job = MetricJob {
            metric_name: label.to_string(),
            source_variable,
            target_path,
            data_start_year: self.config.data_start_year,
            periods,
        };
        let pipeline = PeriodPipeline::new(self.backend, &self.config.processor);
        summary.merge(pipeline.run_metric(&job));
        summary
    }

    /// Historic then future pass for every active metric.
    ///
    /// Metrics run concurrently on a pool of `workers` threads; the passes of
    /// one metric run in order on the same worker.
    pub fn populate(&self) -> Result<RunSummary> {
        let mut passes = Vec::new();
        if self.config.populate_historic {
            passes.push(Pass::Historic);
        } else {
            warn!("Populate historic flag not set, skipping historic data");
        }
        if self.config.populate_future {
            if let Err(e) = require_future_dir(&self.config.eclips_dir, self.config.scenario, &self.config.gcm) {
                error!(error = %e, scenario = %self.config.scenario, gcm = %self.config.gcm, "Future inputs unavailable");
            } else {
                passes.push(Pass::Future);
            }
        } else {
            warn!("Populate future flag not set, skipping future data");
        }

        let metrics = self.config.active_metrics();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.config.workers.min(metrics.len()).max(1))
            .thread_name(|i| format!("reorg-worker-{i}"))
            .build()
            .context("building worker pool")?;

        let summaries: Vec<RunSummary> = pool.install(|| {
            metrics
                .par_iter()
                .map(|&metric| {
                    let mut summary = RunSummary::default();
                    for &pass in &passes {
                        summary.merge(self.run_pass(pass, metric));
                    }
                    summary
                })
                .collect()
        });

        let mut total = RunSummary::default();
        for summary in summaries {
            total.merge(summary);
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grid_processor::MemoryBackend;
    use std::path::Path;

    #[test]
    fn test_target_path() {
        let mut config = RunConfig::default();
        config.output_dir = Some(PathBuf::from("/out"));
        let backend = MemoryBackend::new();
        let reorg = Reorganiser::new(&config, &backend);
        assert_eq!(
            reorg.target_path(Metric::Temperature).unwrap(),
            Path::new("/out/Tave_RCP45_1961_2100.mem")
        );
    }

    #[test]
    fn test_missing_target_is_skipped() {
        let config = RunConfig::default();
        let backend = MemoryBackend::new();
        let summary = Reorganiser::new(&config, &backend).run_pass(Pass::Historic, Metric::Temperature);
        assert!(summary.tasks.is_empty());
        assert_eq!(summary.skipped.len(), 1);
        assert!(summary.skipped[0].reason.contains("reorg create"));
    }
}
