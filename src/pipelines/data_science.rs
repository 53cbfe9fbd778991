use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::filter::isin;
use crate::data::loader::ensure_parent;
use crate::data::model::{Table, Value};
use crate::data::ops::group_indices;
use crate::pamdp::parse_bool;
use crate::parallel::map_parallel;

const MAX_ITERATIONS: usize = 100;
const TOLERANCE: f64 = 1e-8;
const EPS: f64 = 1e-12;

#[derive(Debug, Error, PartialEq)]
pub enum FitError {
    #[error("no annotated rows to fit")]
    Empty,

    #[error("{x} predictor values for {y} responses")]
    LengthMismatch { x: usize, y: usize },

    #[error("responses are all {0}, the model is not identifiable")]
    SingleClass(u8),

    #[error("the weighted design matrix is singular")]
    Singular,

    #[error("IRLS did not converge after {0} iterations")]
    NotConverged(usize),

    #[error("fitted slope is zero, no threshold exists")]
    FlatSlope,
}

// ---------------------------------------------------------------------------
// Logistic regression
// ---------------------------------------------------------------------------

/// Binomial GLM with logit link and one predictor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LogisticFit {
    pub intercept: f64,
    pub slope: f64,
    pub log_likelihood: f64,
    pub aic: f64,
    pub iterations: usize,
}

/// Intercept-only binomial model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NullFit {
    pub intercept: f64,
    pub log_likelihood: f64,
    pub aic: f64,
}

fn sigmoid(eta: f64) -> f64 {
    1.0 / (1.0 + (-eta).exp())
}

fn logit(p: f64) -> f64 {
    (p / (1.0 - p)).ln()
}

fn bernoulli_log_likelihood(y: &[f64], mu: impl Iterator<Item = f64>) -> f64 {
    y.iter()
        .zip(mu)
        .map(|(&yi, m)| {
            let m = m.clamp(EPS, 1.0 - EPS);
            yi * m.ln() + (1.0 - yi) * (1.0 - m).ln()
        })
        .sum()
}

/// Fit `y ~ x` by iteratively reweighted least squares. `y` holds 0/1.
pub fn fit_logistic(x: &[f64], y: &[f64]) -> Result<LogisticFit, FitError> {
    if x.len() != y.len() {
        return Err(FitError::LengthMismatch { x: x.len(), y: y.len() });
    }
    if y.is_empty() {
        return Err(FitError::Empty);
    }
    if y.iter().all(|&v| v == 0.0) {
        return Err(FitError::SingleClass(0));
    }
    if y.iter().all(|&v| v == 1.0) {
        return Err(FitError::SingleClass(1));
    }

    let (mut b0, mut b1) = (0.0_f64, 0.0_f64);
    for iteration in 1..=MAX_ITERATIONS {
        let (mut sw, mut swx, mut swxx, mut swz, mut swxz) = (0.0, 0.0, 0.0, 0.0, 0.0);
        for (&xi, &yi) in x.iter().zip(y) {
            let eta = b0 + b1 * xi;
            let mu = sigmoid(eta).clamp(EPS, 1.0 - EPS);
            let w = mu * (1.0 - mu);
            let z = eta + (yi - mu) / w;
            sw += w;
            swx += w * xi;
            swxx += w * xi * xi;
            swz += w * z;
            swxz += w * xi * z;
        }
        let det = sw * swxx - swx * swx;
        if det.abs() <= 1e-10 * sw * swxx {
            return Err(FitError::Singular);
        }
        let n0 = (swxx * swz - swx * swxz) / det;
        let n1 = (sw * swxz - swx * swz) / det;
        let step = (n0 - b0).abs().max((n1 - b1).abs());
        b0 = n0;
        b1 = n1;
        if !b0.is_finite() || !b1.is_finite() {
            return Err(FitError::NotConverged(iteration));
        }
        if step < TOLERANCE {
            let log_likelihood = bernoulli_log_likelihood(y, x.iter().map(|&xi| sigmoid(b0 + b1 * xi)));
            return Ok(LogisticFit {
                intercept: b0,
                slope: b1,
                log_likelihood,
                aic: 4.0 - 2.0 * log_likelihood,
                iterations: iteration,
            });
        }
    }
    Err(FitError::NotConverged(MAX_ITERATIONS))
}

pub fn null_model(y: &[f64]) -> Result<NullFit, FitError> {
    if y.is_empty() {
        return Err(FitError::Empty);
    }
    let p = y.iter().sum::<f64>() / y.len() as f64;
    let log_likelihood = bernoulli_log_likelihood(y, std::iter::repeat(p));
    Ok(NullFit { intercept: logit(p), log_likelihood, aic: 2.0 - 2.0 * log_likelihood })
}

/// Predictor value at which the fitted probability equals `probability`.
pub fn threshold_for(fit: &LogisticFit, probability: f64) -> f64 {
    (logit(probability) - fit.intercept) / fit.slope
}

// ---------------------------------------------------------------------------
// Species thresholds
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeciesThreshold {
    pub species: String,
    pub threshold: f64,
    pub n_annotations: usize,
    pub aic_null: f64,
    pub aic_confidence: f64,
}

/// Reads an annotation cell as a 0/1 label. Blank or unrecognised cells are
/// unlabelled.
fn label(value: &Value) -> Option<f64> {
    match value {
        Value::Bool(b) => Some(f64::from(u8::from(*b))),
        Value::Integer(0) => Some(0.0),
        Value::Integer(1) => Some(1.0),
        Value::Float(v) if *v == 0.0 || *v == 1.0 => Some(*v),
        Value::String(s) => parse_bool(s).map(|b| f64::from(u8::from(b))),
        _ => None,
    }
}

/// Fit one confidence model per species in the manual annotations and
/// return the confidence at which a detection is correct with
/// `probability`. Species whose model cannot be fitted are logged and left
/// out.
pub fn find_thresholds(
    annotations: &Table,
    correct_column: &str,
    confidence_column: &str,
    probability: f64,
    n_jobs: i32,
) -> Result<Vec<SpeciesThreshold>> {
    let groups: Vec<(String, Vec<usize>)> = group_indices(annotations, "scientificName")
        .into_iter()
        .map(|(species, rows)| (species.to_string(), rows))
        .collect();
    log::info!("Calculating species thresholds for {} species", groups.len());

    let outcome = map_parallel(&groups, n_jobs, "threshold fitting", |(species, rows)| {
        let (x, y): (Vec<f64>, Vec<f64>) = rows
            .iter()
            .filter_map(|&r| {
                Some((annotations.get(r, confidence_column).as_f64()?, label(annotations.get(r, correct_column))?))
            })
            .unzip();
        let fit = fit_logistic(&x, &y).with_context(|| format!("fitting {species}"))?;
        if fit.slope.abs() < EPS {
            anyhow::bail!("fitting {species}: {}", FitError::FlatSlope);
        }
        let null = null_model(&y)?;
        Ok(SpeciesThreshold {
            species: species.clone(),
            threshold: threshold_for(&fit, probability),
            n_annotations: y.len(),
            aic_null: null.aic,
            aic_confidence: fit.aic,
        })
    })?;

    let thresholds: Vec<SpeciesThreshold> = outcome.values().collect();
    for t in &thresholds {
        log::info!("{}: threshold {:.3} from {} annotations", t.species, t.threshold, t.n_annotations);
    }
    Ok(thresholds)
}

pub fn save_thresholds(thresholds: &[SpeciesThreshold], path: &Path) -> Result<()> {
    ensure_parent(path)?;
    let mut writer = csv::Writer::from_path(path)
        .with_context(|| format!("creating CSV {}", path.display()))?;
    for t in thresholds {
        writer.serialize(t).context("writing threshold row")?;
    }
    writer.flush().context("flushing CSV")?;
    Ok(())
}

pub fn load_thresholds(path: &Path) -> Result<Vec<SpeciesThreshold>> {
    let mut reader =
        csv::Reader::from_path(path).with_context(|| format!("opening {}", path.display()))?;
    reader
        .deserialize()
        .collect::<Result<Vec<SpeciesThreshold>, _>>()
        .with_context(|| format!("parsing {}", path.display()))
}

/// Detections of each species at or above its threshold, keyed by species.
/// Species with nothing over the threshold are logged and left out.
pub fn apply_thresholds(observations: &Table, thresholds: &[SpeciesThreshold]) -> BTreeMap<String, Table> {
    let mut filtered = BTreeMap::new();
    for t in thresholds {
        let species: BTreeSet<Value> = [Value::from(t.species.as_str())].into_iter().collect();
        let kept = isin(observations, "scientificName", &species).filter(|tbl, r| {
            tbl.get(r, "classificationProbability").as_f64().is_some_and(|p| p >= t.threshold)
        });
        if kept.is_empty() {
            log::warn!("No detections found for species {} meeting the threshold {:.3}.", t.species, t.threshold);
            continue;
        }
        log::info!("{}: {} detections over {:.3}", t.species, kept.len(), t.threshold);
        filtered.insert(t.species.clone(), kept);
    }
    filtered
}
