use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::{fs::File, io::Write, path::Path};

use crate::error::SimulationError;
use crate::simulator::integrator::IntegrationStats;

/// Model output at one requested time
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TrajectorySample {
    pub time: f64,
    /// Amounts of the mass compartments, in layout order
    pub amounts: Vec<f64>,
    pub concentration: f64,
    pub hazard: f64,
    pub cumulative_hazard: f64,
}

/// Ordered samples of one subject
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Default)]
pub struct TrajectoryRecord {
    compartments: Vec<String>,
    samples: Vec<TrajectorySample>,
}

impl TrajectoryRecord {
    pub(crate) fn new(compartments: Vec<String>, samples: Vec<TrajectorySample>) -> Self {
        TrajectoryRecord {
            compartments,
            samples,
        }
    }

    /// Names of the mass compartments, matching [TrajectorySample::amounts]
    pub fn compartments(&self) -> &[String] {
        &self.compartments
    }

    pub fn samples(&self) -> &[TrajectorySample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn times(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.time).collect()
    }

    pub fn concentrations(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.concentration).collect()
    }

    pub fn cumulative_hazards(&self) -> Vec<f64> {
        self.samples.iter().map(|s| s.cumulative_hazard).collect()
    }

    /// Amounts of one compartment over time, by name
    pub fn amounts_of(&self, compartment: &str) -> Option<Vec<f64>> {
        let index = self.compartments.iter().position(|c| c == compartment)?;
        Some(self.samples.iter().map(|s| s.amounts[index]).collect())
    }

    /// Column names of [TrajectoryRecord::to_array] and the CSV output
    pub fn columns(&self) -> Vec<String> {
        let mut columns = Vec::with_capacity(self.compartments.len() + 4);
        columns.push("time".to_string());
        columns.extend(self.compartments.iter().cloned());
        columns.extend(["CP", "HAZARD", "CHAZARD"].map(String::from));
        columns
    }

    /// One row per sample, laid out as [TrajectoryRecord::columns]
    pub fn to_array(&self) -> Array2<f64> {
        let ncols = self.compartments.len() + 4;
        let mut array = Array2::zeros((self.samples.len(), ncols));
        for (mut row, sample) in array.outer_iter_mut().zip(&self.samples) {
            row[0] = sample.time;
            for (i, amount) in sample.amounts.iter().enumerate() {
                row[i + 1] = *amount;
            }
            row[ncols - 3] = sample.concentration;
            row[ncols - 2] = sample.hazard;
            row[ncols - 1] = sample.cumulative_hazard;
        }
        array
    }

    /// Write the samples as CSV, keeping full floating-point precision
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), SimulationError> {
        let mut wtr = csv::Writer::from_writer(writer);
        wtr.write_record(self.columns())?;
        for row in self.to_array().outer_iter() {
            wtr.write_record(row.iter().map(|v| v.to_string()))?;
        }
        wtr.flush()?;
        Ok(())
    }

    pub fn to_csv_file(&self, path: impl AsRef<Path>) -> Result<(), SimulationError> {
        self.write_csv(File::create(path)?)
    }
}

/// Sampled event time of one subject
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct EventOutcome {
    pub time: f64,
    /// `true` when no event occurred before the horizon, in which case `time` is the horizon
    pub censored: bool,
    pub cause: Option<String>,
}

impl EventOutcome {
    pub fn event(time: f64, cause: impl Into<String>) -> Self {
        EventOutcome {
            time,
            censored: false,
            cause: Some(cause.into()),
        }
    }

    pub fn censored(time: f64) -> Self {
        EventOutcome {
            time,
            censored: true,
            cause: None,
        }
    }
}

/// Everything produced for one subject
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SubjectOutcome {
    pub id: String,
    pub draw: f64,
    pub trajectory: TrajectoryRecord,
    pub event: EventOutcome,
    pub stats: IntegrationStats,
}

impl SubjectOutcome {
    pub fn to_json(&self) -> Result<String, SimulationError> {
        Ok(serde_json::to_string(self)?)
    }
}
