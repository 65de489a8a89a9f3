//! Level-shift detection on entry RTT series
//!
//! For every point the median of the window starting at it is compared with
//! the median of the window just before it. The size of that shift is judged
//! against an interquartile-range threshold fitted on all shifts of the
//! series, and only upward shifts are flagged.

use serde::Deserialize;
use std::cmp::Ordering;

use crate::error::DetectionFitError;

/// Default window size on each side of the compared point
const DEFAULT_WINDOW: usize = 3;

/// Default IQR multiplier
const DEFAULT_C: f64 = 10.0;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct LevelShiftConfig {
    /// Points per window
    pub window: usize,
    /// Multiplier on the interquartile range of the shifts
    pub c: f64,
}

impl Default for LevelShiftConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            c: DEFAULT_C,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct ShiftThreshold {
    upper: f64,
}

/// Detects sustained upward shifts in a single probe's series
#[derive(Debug, Clone, Default)]
pub struct LevelShiftDetector {
    config: LevelShiftConfig,
}

impl LevelShiftDetector {
    pub fn new(config: LevelShiftConfig) -> Self {
        Self {
            config: LevelShiftConfig {
                window: config.window.max(1),
                ..config
            },
        }
    }

    pub fn config(&self) -> &LevelShiftConfig {
        &self.config
    }

    /// Flag each point of a time-ordered series
    ///
    /// `None` values are unknown RTTs: they are left out of every window and
    /// never flagged. The returned vector is aligned with `series`.
    pub fn detect(&self, series: &[Option<f64>]) -> Result<Vec<bool>, DetectionFitError> {
        let w = self.config.window;

        let valid: Vec<(usize, f64)> = series
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.map(|v| (i, v)))
            .collect();

        if valid.len() < 2 * w {
            return Err(DetectionFitError::InsufficientData {
                valid: valid.len(),
                required: 2 * w,
            });
        }

        let values: Vec<f64> = valid.iter().map(|(_, v)| *v).collect();
        let shifts = window_shifts(&values, w);

        let finite: Vec<f64> = shifts
            .iter()
            .flatten()
            .filter(|s| s.is_finite())
            .map(|s| s.abs())
            .collect();
        let threshold = fit_threshold(&finite, self.config.c)?;

        let mut flags = vec![false; series.len()];
        for ((idx, _), shift) in valid.iter().zip(shifts.iter()) {
            if let Some(shift) = shift {
                if shift.is_finite() && *shift > 0.0 && shift.abs() > threshold.upper {
                    flags[*idx] = true;
                }
            }
        }

        Ok(flags)
    }
}

/// Signed shift at every point with full windows on both sides
///
/// Position `i` compares `values[i..i+w]` against `values[i-w..i]`.
fn window_shifts(values: &[f64], w: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| {
            if i < w || i + w > values.len() {
                return None;
            }
            let before = median(&values[i - w..i]);
            let after = median(&values[i..i + w]);
            Some(after - before)
        })
        .collect()
}

fn fit_threshold(shifts: &[f64], c: f64) -> Result<ShiftThreshold, DetectionFitError> {
    if shifts.is_empty() {
        return Err(DetectionFitError::Degenerate);
    }

    let mut sorted = shifts.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));

    let q1 = quantile_sorted(&sorted, 0.25);
    let q3 = quantile_sorted(&sorted, 0.75);
    Ok(ShiftThreshold {
        upper: q3 + c * (q3 - q1),
    })
}

/// Median of a small window; infinite values sort to the ends
pub fn median(window: &[f64]) -> f64 {
    let mut sorted = window.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));

    let n = sorted.len();
    if n == 0 {
        return f64::NAN;
    }
    if n % 2 == 1 {
        sorted[n / 2]
    } else {
        (sorted[n / 2 - 1] + sorted[n / 2]) / 2.0
    }
}

/// Quantile with linear interpolation between closest ranks
pub fn quantile_sorted(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let pos = q.clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = pos.ceil() as usize;
            sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
        }
    }
}
