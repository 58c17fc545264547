//! Source-to-target regional aggregation.
//!
//! Every land cell of the target grid is expanded by half the target
//! resolution on each side. Both corners are mapped onto the source grid and
//! the source cells inside the resulting half-open rectangle are averaged.
//! The mean is written into one time step of the target metric variable.

use std::ops::Range;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::GridProcessorConfig;
use crate::error::{GridProcessorError, Result};
use crate::geometry::GridGeometry;
use crate::index::{Clamp, CorrectionLog, IndexMapper};
use crate::progress::{ProgressState, ProgressTracker};
use crate::store::{read_layer, write_layer, GridStore};
use crate::types::{CellValue, GridSlice};

/// One (metric, period) unit of work.
#[derive(Debug, Clone)]
pub struct AggregationTask<'a> {
    pub source_grid: &'a GridGeometry,
    pub target_grid: &'a GridGeometry,
    /// Metric variable of the target dataset.
    pub metric_name: String,
    pub target_time_index: usize,
    /// Variable holding the source layer.
    pub source_variable: String,
    /// Time step of a 3-D source variable; `None` for a single layer.
    pub source_time_index: Option<usize>,
}

impl AggregationTask<'_> {
    fn label(&self) -> String {
        format!("{}[{}]", self.metric_name, self.target_time_index)
    }
}

/// Half-open source index rectangle under one target cell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceRegion {
    pub lat: Range<usize>,
    pub lon: Range<usize>,
}

/// Result of aggregating one target cell.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AggregateResult {
    /// The cell is outside the land mask; nothing is written.
    Skipped,
    /// Mean of the valid source values; `malformed` values were ignored.
    Valid { mean: f64, malformed: usize },
    /// Every source value is missing.
    Masked,
    /// No valid value and `malformed` unrecognised ones.
    Unknown { malformed: usize },
}

/// Counters and diagnostics of one traversal.
#[derive(Debug, Clone, Default, Serialize)]
pub struct TraversalSummary {
    pub state: ProgressState,
    pub corrections: CorrectionLog,
}

/// Reduces source regions onto target cells.
#[derive(Debug, Clone)]
pub struct RegionAggregator {
    tracker: ProgressTracker,
    lsmask_var: String,
}

impl RegionAggregator {
    pub fn new(config: &GridProcessorConfig) -> Self {
        Self {
            tracker: ProgressTracker::new(config.progress_interval()),
            lsmask_var: config.lsmask_var.clone(),
        }
    }

    /// Source rectangle covered by the target cell centred on `(lat, lon)`.
    ///
    /// Corners that round onto the same source index widen to one cell,
    /// unless both were clamped onto the same edge: such a cell lies outside
    /// the source grid and yields [`GridProcessorError::InvalidRegion`].
    pub fn source_region(
        &self,
        mapper: &mut IndexMapper<'_>,
        lat: f64,
        lon: f64,
        resol: f64,
    ) -> Result<SourceRegion> {
        if !(resol.is_finite() && resol > 0.0) {
            return Err(GridProcessorError::invalid_region(format!(
                "zero-area cell at ({lat}, {lon}), resolution {resol}"
            )));
        }
        let half = resol / 2.0;
        let ll = mapper.map_with_clamp(lat - half, lon - half);
        let ur = mapper.map_with_clamp(lat + half, lon + half);

        let lat_range = span(ll.index.lat, ur.index.lat, ll.lat_clamp, ur.lat_clamp);
        let lon_range = span(ll.index.lon, ur.index.lon, ll.lon_clamp, ur.lon_clamp);
        match (lat_range, lon_range) {
            (Some(lat), Some(lon)) => Ok(SourceRegion { lat, lon }),
            _ => Err(GridProcessorError::invalid_region(format!(
                "cell at ({lat}, {lon}) lies outside the source grid"
            ))),
        }
    }

    /// Aggregate the source values beneath one target cell.
    pub fn aggregate_cell(
        &self,
        mapper: &mut IndexMapper<'_>,
        lat: f64,
        lon: f64,
        resol: f64,
        participates: bool,
        source: &GridSlice,
    ) -> Result<AggregateResult> {
        if !participates {
            return Ok(AggregateResult::Skipped);
        }
        let region = self.source_region(mapper, lat, lon, resol)?;
        Ok(reduce_mean(source.window(region.lat, region.lon)))
    }

    /// Aggregate every target cell for one task.
    ///
    /// The source layer and the target time step are each read once; the
    /// updated target time step is written back once at the end. Cells whose
    /// region lies outside the source grid are counted out of area and
    /// written as missing, like an empty window.
    pub fn run(
        &self,
        task: &AggregationTask<'_>,
        source: &dyn GridStore,
        target: &mut dyn GridStore,
    ) -> Result<TraversalSummary> {
        let source_layer = read_layer(source, &task.source_variable, task.source_time_index)?;
        if source_layer.nlat() != task.source_grid.nlat()
            || source_layer.nlon() != task.source_grid.nlon()
        {
            return Err(GridProcessorError::shape_mismatch(format!(
                "{}: layer {}x{} does not match source grid {}x{}",
                task.source_variable,
                source_layer.nlat(),
                source_layer.nlon(),
                task.source_grid.nlat(),
                task.source_grid.nlon()
            )));
        }

        let land_mask = self.read_land_mask(&*target)?;
        let mut target_layer = read_layer(&*target, &task.metric_name, Some(task.target_time_index))?;

        let target_grid = task.target_grid;
        let resol = target_grid.resolution();
        let mut state = ProgressState::new(target_grid.cell_count());
        let mut mapper = IndexMapper::new(task.source_grid);
        let mut unknown_logged = false;

        for (lat_index, &lat) in target_grid.latitudes().iter().enumerate() {
            for (lon_index, &lon) in target_grid.longitudes().iter().enumerate() {
                let participates = land_mask
                    .as_ref()
                    .map_or(true, |mask| is_land(mask.get(lat_index, lon_index)));

                match self.aggregate_cell(&mut mapper, lat, lon, resol, participates, &source_layer) {
                    Ok(AggregateResult::Skipped) => state.skipped += 1,
                    Ok(AggregateResult::Valid { mean, malformed }) => {
                        target_layer.set(lat_index, lon_index, CellValue::Value(mean))?;
                        state.valid += 1;
                        state.malformed_values += malformed;
                    }
                    Ok(AggregateResult::Masked) => {
                        target_layer.set(lat_index, lon_index, CellValue::Missing)?;
                        state.masked += 1;
                    }
                    Ok(AggregateResult::Unknown { malformed }) => {
                        target_layer.set(lat_index, lon_index, CellValue::Missing)?;
                        state.unknown += 1;
                        state.malformed_values += malformed;
                        if !unknown_logged {
                            let err = GridProcessorError::UnknownValueType {
                                location: format!("{} at ({lat}, {lon})", task.source_variable),
                                value: format!("{malformed} non-finite values"),
                            };
                            warn!(task = %task.label(), error = %err, "Unrecognised source value");
                            unknown_logged = true;
                        }
                    }
                    Err(e) if !e.is_task_fatal() => {
                        debug!(lat, lon, error = %e, "Cell out of area");
                        target_layer.set(lat_index, lon_index, CellValue::Missing)?;
                        state.out_of_area += 1;
                    }
                    Err(e) => return Err(e),
                }

                self.tracker.tick(&mut state);
            }
        }

        write_layer(target, &task.metric_name, Some(task.target_time_index), &target_layer)?;
        let corrections = mapper.flush_corrections(&task.label());

        info!(
            task = %task.label(),
            valid = state.valid,
            masked = state.masked,
            out_of_area = state.out_of_area,
            unknown = state.unknown,
            skipped = state.skipped,
            "Aggregation complete"
        );

        Ok(TraversalSummary { state, corrections })
    }

    fn read_land_mask(&self, target: &dyn GridStore) -> Result<Option<GridSlice>> {
        if !target.has_variable(&self.lsmask_var) {
            debug!(
                path = %target.path().display(),
                lsmask = %self.lsmask_var,
                "No land mask, every cell participates"
            );
            return Ok(None);
        }
        read_layer(target, &self.lsmask_var, None).map(Some)
    }
}

fn is_land(value: Option<CellValue>) -> bool {
    matches!(value, Some(CellValue::Value(v)) if v == 1.0)
}

fn span(a: usize, b: usize, clamp_a: Clamp, clamp_b: Clamp) -> Option<Range<usize>> {
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    if lo < hi {
        return Some(lo..hi);
    }
    if clamp_a != Clamp::None && clamp_a == clamp_b {
        return None;
    }
    Some(lo..lo + 1)
}

/// Arithmetic mean over the valid values, in iteration order.
pub fn reduce_mean(values: impl IntoIterator<Item = CellValue>) -> AggregateResult {
    let mut sum = 0.0;
    let mut count = 0usize;
    let mut malformed = 0usize;

    for value in values {
        match value {
            CellValue::Value(v) => {
                sum += v;
                count += 1;
            }
            CellValue::Missing => {}
            CellValue::Malformed => malformed += 1,
        }
    }

    match (count, malformed) {
        (0, 0) => AggregateResult::Masked,
        (0, _) => AggregateResult::Unknown { malformed },
        _ => AggregateResult::Valid {
            mean: sum / count as f64,
            malformed,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(coords: Vec<f64>) -> GridGeometry {
        GridGeometry::from_coords(coords.clone(), coords).unwrap()
    }

    #[test]
    fn test_reduce_mean() {
        let values = [
            CellValue::Value(1.0),
            CellValue::Missing,
            CellValue::Value(3.0),
            CellValue::Malformed,
        ];
        assert_eq!(
            reduce_mean(values),
            AggregateResult::Valid {
                mean: 2.0,
                malformed: 1
            }
        );
        assert_eq!(
            reduce_mean([CellValue::Missing, CellValue::Missing]),
            AggregateResult::Masked
        );
        assert_eq!(reduce_mean([]), AggregateResult::Masked);
        assert!(matches!(
            reduce_mean([CellValue::Missing, CellValue::Malformed]),
            AggregateResult::Unknown { .. }
        ));
    }

    #[test]
    fn test_source_region_for_coarser_target() {
        let source = grid(vec![0.0, 1.0, 2.0, 3.0]);
        let aggregator = RegionAggregator::new(&GridProcessorConfig::default());
        let mut mapper = IndexMapper::new(&source);

        let region = aggregator.source_region(&mut mapper, 1.0, 1.0, 2.0).unwrap();
        assert_eq!(region, SourceRegion { lat: 0..2, lon: 0..2 });

        // upper corner clamps, lower one does not
        let region = aggregator.source_region(&mut mapper, 3.0, 3.0, 2.0).unwrap();
        assert_eq!(region, SourceRegion { lat: 2..3, lon: 2..3 });
    }

    #[test]
    fn test_source_region_for_finer_target_widens() {
        let source = grid(vec![0.0, 1.0, 2.0, 3.0]);
        let aggregator = RegionAggregator::new(&GridProcessorConfig::default());
        let mut mapper = IndexMapper::new(&source);

        let region = aggregator.source_region(&mut mapper, 1.1, 2.1, 0.25).unwrap();
        assert_eq!(region, SourceRegion { lat: 1..2, lon: 2..3 });
    }

    #[test]
    fn test_source_region_outside_grid() {
        let source = grid(vec![0.0, 1.0, 2.0, 3.0]);
        let aggregator = RegionAggregator::new(&GridProcessorConfig::default());
        let mut mapper = IndexMapper::new(&source);

        let err = aggregator
            .source_region(&mut mapper, -10.0, 1.0, 1.0)
            .unwrap_err();
        assert!(matches!(err, GridProcessorError::InvalidRegion(_)));
        assert!(mapper.corrections().count > 0);

        let err = aggregator
            .source_region(&mut mapper, 1.0, 1.0, 0.0)
            .unwrap_err();
        assert!(!err.is_task_fatal());
    }

    #[test]
    fn test_aggregate_cell_skips_sea() {
        let source = grid(vec![0.0, 1.0, 2.0, 3.0]);
        let aggregator = RegionAggregator::new(&GridProcessorConfig::default());
        let mut mapper = IndexMapper::new(&source);
        let layer = GridSlice::missing(4, 4);

        let result = aggregator
            .aggregate_cell(&mut mapper, 1.0, 1.0, 2.0, false, &layer)
            .unwrap();
        assert_eq!(result, AggregateResult::Skipped);
    }

    #[test]
    fn test_span() {
        assert_eq!(span(0, 2, Clamp::None, Clamp::None), Some(0..2));
        assert_eq!(span(2, 0, Clamp::None, Clamp::None), Some(0..2));
        assert_eq!(span(1, 1, Clamp::None, Clamp::None), Some(1..2));
        assert_eq!(span(0, 0, Clamp::Low, Clamp::Low), None);
        assert_eq!(span(3, 3, Clamp::High, Clamp::High), None);
        assert_eq!(span(3, 3, Clamp::None, Clamp::High), Some(3..4));
    }
}
