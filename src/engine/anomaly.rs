//! Anomaly Classification
//!
//! Capability interface over a trained telemetry baseline, with two
//! backends: a per-metric z-score baseline and a robust median/MAD
//! outlier model. Callers depend only on the trait.

use crate::engine::telemetry::TelemetrySample;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Z-score magnitude above which a metric flags the sample.
const ZSCORE_THRESHOLD: f64 = 3.0;
/// Modified z-score threshold for the robust backend.
const ROBUST_THRESHOLD: f64 = 3.5;
/// Scale factor relating MAD to the standard deviation of a normal
/// distribution.
const MAD_CONSISTENCY: f64 = 0.6745;
const EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Normal,
    Anomalous,
}

#[derive(Error, Debug)]
pub enum AnomalyError {
    #[error("empty training batch")]
    EmptyBatch,

    #[error("telemetry schema mismatch: baseline {expected:?}, sample {got:?}")]
    SchemaMismatch {
        expected: Vec<String>,
        got: Vec<String>,
    },

    #[error("baseline not trained")]
    Untrained,
}

/// Trained-baseline capability consumed by the telemetry monitor.
pub trait AnomalyClassifier: Send {
    /// Derive a baseline from an ordered batch of samples. All samples must
    /// share one key set.
    fn train(&mut self, samples: &[TelemetrySample]) -> Result<(), AnomalyError>;

    /// Score one sample against the trained baseline.
    fn classify(&self, sample: &TelemetrySample) -> Result<Verdict, AnomalyError>;
}

/// Classifier backend selected at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassifierBackend {
    #[default]
    ZScore,
    Robust,
}

impl ClassifierBackend {
    pub fn build(self) -> Box<dyn AnomalyClassifier + Send> {
        match self {
            Self::ZScore => Box::new(ZScoreBaseline::new()),
            Self::Robust => Box::new(RobustBaseline::new()),
        }
    }
}

/// Per-metric statistics shared by both backends.
struct Baseline {
    schema: Vec<String>,
    center: Vec<f64>,
    spread: Vec<f64>,
}

fn to_matrix(samples: &[TelemetrySample]) -> Result<(Vec<String>, Vec<Vec<f64>>), AnomalyError> {
    let first = samples.first().ok_or(AnomalyError::EmptyBatch)?;
    let schema: Vec<String> = first.schema().iter().map(|s| s.to_string()).collect();
    for sample in samples {
        if !sample.same_schema(first) {
            return Err(AnomalyError::SchemaMismatch {
                expected: schema,
                got: sample.schema().iter().map(|s| s.to_string()).collect(),
            });
        }
    }
    Ok((schema, samples.iter().map(TelemetrySample::values).collect()))
}

fn check_schema(baseline: &Baseline, sample: &TelemetrySample) -> Result<(), AnomalyError> {
    let got: Vec<String> = sample.schema().iter().map(|s| s.to_string()).collect();
    if got != baseline.schema {
        return Err(AnomalyError::SchemaMismatch {
            expected: baseline.schema.clone(),
            got,
        });
    }
    Ok(())
}

/// Mean/standard-deviation baseline; flags a sample when any metric's
/// z-score magnitude exceeds 3.
pub struct ZScoreBaseline {
    baseline: Option<Baseline>,
}

impl ZScoreBaseline {
    pub fn new() -> Self {
        Self { baseline: None }
    }
}

impl Default for ZScoreBaseline {
    fn default() -> Self {
        Self::new()
    }
}

impl AnomalyClassifier for ZScoreBaseline {
    fn train(&mut self, samples: &[TelemetrySample]) -> Result<(), AnomalyError> {
        let (schema, rows) = to_matrix(samples)?;
        let n = rows.len() as f64;
        let dims = schema.len();

        let mut mean = vec![0.0; dims];
        for row in &rows {
            for (i, v) in row.iter().enumerate() {
                mean[i] += v;
            }
        }
        for m in &mut mean {
            *m /= n;
        }

        let mut variance = vec![0.0; dims];
        for row in &rows {
            for (i, v) in row.iter().enumerate() {
                variance[i] += (v - mean[i]).powi(2);
            }
        }
        let std = variance.iter().map(|v| (v / n).sqrt()).collect();

        self.baseline = Some(Baseline {
            schema,
            center: mean,
            spread: std,
        });
        Ok(())
    }

    fn classify(&self, sample: &TelemetrySample) -> Result<Verdict, AnomalyError> {
        let baseline = self.baseline.as_ref().ok_or(AnomalyError::Untrained)?;
        check_schema(baseline, sample)?;

        let anomalous = sample
            .values()
            .iter()
            .zip(baseline.center.iter().zip(baseline.spread.iter()))
            .any(|(v, (mean, std))| ((v - mean) / (std + EPSILON)).abs() > ZSCORE_THRESHOLD);
        Ok(if anomalous { Verdict::Anomalous } else { Verdict::Normal })
    }
}

/// Median/MAD baseline; flags a sample when any metric's modified z-score
/// exceeds 3.5. Less sensitive to outliers in the training batch than the
/// z-score backend.
pub struct RobustBaseline {
    baseline: Option<Baseline>,
}

impl RobustBaseline {
    pub fn new() -> Self {
        Self { baseline: None }
    }
}

impl Default for RobustBaseline {
    fn default() -> Self {
        Self::new()
    }
}

fn median(values: &mut [f64]) -> f64 {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    }
}

impl AnomalyClassifier for RobustBaseline {
    fn train(&mut self, samples: &[TelemetrySample]) -> Result<(), AnomalyError> {
        let (schema, rows) = to_matrix(samples)?;
        let dims = schema.len();

        let mut center = Vec::with_capacity(dims);
        let mut spread = Vec::with_capacity(dims);
        for i in 0..dims {
            let mut column: Vec<f64> = rows.iter().map(|row| row[i]).collect();
            let med = median(&mut column);
            let mut deviations: Vec<f64> = column.iter().map(|v| (v - med).abs()).collect();
            let mad = median(&mut deviations);
            center.push(med);
            spread.push(mad);
        }

        self.baseline = Some(Baseline {
            schema,
            center,
            spread,
        });
        Ok(())
    }

    fn classify(&self, sample: &TelemetrySample) -> Result<Verdict, AnomalyError> {
        let baseline = self.baseline.as_ref().ok_or(AnomalyError::Untrained)?;
        check_schema(baseline, sample)?;

        let anomalous = sample
            .values()
            .iter()
            .zip(baseline.center.iter().zip(baseline.spread.iter()))
            .any(|(v, (med, mad))| {
                MAD_CONSISTENCY * (v - med).abs() / (mad + EPSILON) > ROBUST_THRESHOLD
            });
        Ok(if anomalous { Verdict::Anomalous } else { Verdict::Normal })
    }
}
