//! Broadcast of one computed time step across the following years.

use grid_common::{Cadence, YearRange};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::{GridProcessorError, Result};
use crate::store::{read_layer, write_layer, GridStore};

/// Copy of one time step of a metric to a list of other time steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReplicationTask {
    pub metric_name: String,
    pub source_time_index: usize,
    pub destination_time_indices: Vec<usize>,
}

impl ReplicationTask {
    /// Same month (or year) of every year after the first one of `period`.
    pub fn annual(
        metric_name: impl Into<String>,
        source_time_index: usize,
        period: YearRange,
        cadence: Cadence,
    ) -> Result<Self> {
        let stride = cadence.annual_stride().ok_or_else(|| {
            GridProcessorError::Config(format!("cannot replicate a {cadence} time axis annually"))
        })?;
        let destination_time_indices = (1..period.num_years())
            .map(|offset| source_time_index + stride * offset)
            .collect();
        Ok(Self {
            metric_name: metric_name.into(),
            source_time_index,
            destination_time_indices,
        })
    }
}

/// Copies time steps verbatim, missing cells included.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemporalReplicator;

impl TemporalReplicator {
    pub fn new() -> Self {
        Self
    }

    /// Write the source time step to every destination and return how many
    /// were written. All destinations are checked before the first write.
    pub fn replicate(&self, target: &mut dyn GridStore, task: &ReplicationTask) -> Result<usize> {
        let shape = target.shape(&task.metric_name)?;
        let steps = match shape.as_slice() {
            [nt, _, _] => *nt,
            _ => {
                return Err(GridProcessorError::shape_mismatch(format!(
                    "{}: replication needs a (time, lat, lon) variable, found {shape:?}",
                    task.metric_name
                )))
            }
        };
        if let Some(&bad) = task
            .destination_time_indices
            .iter()
            .find(|&&t| t >= steps)
        {
            return Err(GridProcessorError::shape_mismatch(format!(
                "{}: time index {bad} beyond {steps} steps",
                task.metric_name
            )));
        }

        let layer = read_layer(&*target, &task.metric_name, Some(task.source_time_index))?;
        for &time_index in &task.destination_time_indices {
            write_layer(target, &task.metric_name, Some(time_index), &layer)?;
            debug!(metric = %task.metric_name, time_index, "Replicated layer");
        }

        info!(
            metric = %task.metric_name,
            source_time_index = task.source_time_index,
            copies = task.destination_time_indices.len(),
            "Replication complete"
        );
        Ok(task.destination_time_indices.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryBackend, MemoryDataset, StoreBackend};
    use crate::types::CellValue;
    use std::path::Path;

    #[test]
    fn test_annual_monthly_indices() {
        let period = YearRange::new(1991, 1993).unwrap();
        let task = ReplicationTask::annual("Tairalign", 5, period, Cadence::Monthly).unwrap();
        assert_eq!(task.destination_time_indices, vec![17, 29]);

        let task = ReplicationTask::annual("Tairalign", 2, period, Cadence::Yearly).unwrap();
        assert_eq!(task.destination_time_indices, vec![3, 4]);

        assert!(ReplicationTask::annual("Tairalign", 2, period, Cadence::Daily).is_err());
    }

    #[test]
    fn test_single_year_has_no_destinations() {
        let period = YearRange::new(2000, 2000).unwrap();
        let task = ReplicationTask::annual("Precipalign", 0, period, Cadence::Monthly).unwrap();
        assert!(task.destination_time_indices.is_empty());
    }

    #[test]
    fn test_replicate_rejects_out_of_range_before_writing() {
        let backend = MemoryBackend::new();
        let path = Path::new("/mem/target");
        let mut values = vec![f64::NAN; 3 * 2 * 2];
        values[0] = 7.0;
        backend
            .insert(path, MemoryDataset::new().with_raw("Tairalign", vec![3, 2, 2], &values))
            .unwrap();

        let mut target = backend.open_target(path, crate::store::OpenMode::Append).unwrap();
        let task = ReplicationTask {
            metric_name: "Tairalign".to_string(),
            source_time_index: 0,
            destination_time_indices: vec![1, 3],
        };
        assert!(TemporalReplicator::new().replicate(target.as_mut(), &task).is_err());

        let snapshot = backend.snapshot(path).unwrap();
        assert_eq!(snapshot.values("Tairalign").unwrap()[4], CellValue::Missing);
    }
}
