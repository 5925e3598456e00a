use itertools::Itertools;
use ndarray::Array1;
use serde::{Deserialize, Serialize};

use crate::error::{FitError, PredictError};

/// A standard of known concentration and the absorbance it produced
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationSample {
    pub concentration: f64,
    pub absorbance: f64,
}

impl From<(f64, f64)> for CalibrationSample {
    fn from((concentration, absorbance): (f64, f64)) -> Self {
        Self {
            concentration,
            absorbance,
        }
    }
}

/// The standards a calibration curve is fitted to, in the order they were entered
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CalibrationSet {
    samples: Vec<CalibrationSample>,
}

impl CalibrationSet {
    pub fn new(samples: Vec<CalibrationSample>) -> Self {
        Self { samples }
    }

    /// Pair up two comma separated lists, e.g. `"0, 2, 4"` and `"0.05, 0.12, 0.23"`
    ///
    /// Blank text is an empty list. Every other entry must be a finite number.
    ///
    /// # Errors
    /// Returns [`FitError::NonNumeric`] for the first entry that is not a finite number and
    /// [`FitError::LengthMismatch`] if the lists differ in length.
    pub fn from_lists(concentrations: &str, absorbances: &str) -> Result<Self, FitError> {
        let concentrations = parse_list("concentration", concentrations)?;
        let absorbances = parse_list("absorbance", absorbances)?;

        if concentrations.len() != absorbances.len() {
            return Err(FitError::LengthMismatch {
                concentrations: concentrations.len(),
                absorbances: absorbances.len(),
            });
        }

        Ok(concentrations
            .into_iter()
            .zip(absorbances)
            .map(CalibrationSample::from)
            .collect())
    }

    pub fn samples(&self) -> &[CalibrationSample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    fn concentrations(&self) -> Array1<f64> {
        self.samples.iter().map(|s| s.concentration).collect()
    }

    fn absorbances(&self) -> Array1<f64> {
        self.samples.iter().map(|s| s.absorbance).collect()
    }
}

impl<S: Into<CalibrationSample>> FromIterator<S> for CalibrationSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self::new(iter.into_iter().map(Into::into).collect())
    }
}

fn parse_list(field: &'static str, text: &str) -> Result<Vec<f64>, FitError> {
    if text.trim().is_empty() {
        return Ok(vec![]);
    }

    text.split(',')
        .map(str::trim)
        .enumerate()
        .map(|(index, entry)| {
            entry
                .parse::<f64>()
                .ok()
                .filter(|value| value.is_finite())
                .ok_or_else(|| FitError::NonNumeric {
                    field,
                    index,
                    text: entry.to_owned(),
                })
        })
        .collect()
}

/// Straight line `absorbance = slope * concentration + intercept`
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct CalibrationFit {
    slope: f64,
    intercept: f64,
    r_squared: f64,
    sample_count: usize,
}

impl CalibrationFit {
    pub const fn slope(&self) -> f64 {
        self.slope
    }

    pub const fn intercept(&self) -> f64 {
        self.intercept
    }

    /// Coefficient of determination, in `[0, 1]`
    pub const fn r_squared(&self) -> f64 {
        self.r_squared
    }

    /// Number of standards the line was fitted to
    pub const fn sample_count(&self) -> usize {
        self.sample_count
    }

    /// Absorbance the fitted line expects at `concentration`
    pub fn absorbance_at(&self, concentration: f64) -> f64 {
        self.slope.mul_add(concentration, self.intercept)
    }

    /// Grade the fit against a goodness-of-fit policy
    pub fn quality(&self, policy: &FitPolicy) -> FitQuality {
        match policy.min_r_squared {
            Some(threshold) if self.r_squared < threshold => FitQuality::BelowThreshold {
                r_squared: self.r_squared,
                threshold,
            },
            _ => FitQuality::Acceptable,
        }
    }
}

/// When a successful fit should carry a warning
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FitPolicy {
    /// Fits with R² below this are flagged. `None` never flags.
    pub min_r_squared: Option<f64>,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum FitQuality {
    Acceptable,
    BelowThreshold { r_squared: f64, threshold: f64 },
}

/// Ordinary least squares fit of absorbance against concentration
///
/// # Errors
/// Returns [`FitError::InsufficientData`] for fewer than two samples, and
/// [`FitError::DegenerateInput`] when the concentrations do not vary or the absorbance
/// differences vanish in floating point. Identical absorbances give a flat line with R² = 1.
///
/// # Examples
///
/// ```
/// use bench_assay::calibration::{fit, CalibrationSet};
///
/// let samples: CalibrationSet = [(0.0, 0.1), (1.0, 0.3), (2.0, 0.5)].into_iter().collect();
/// let line = fit(&samples).unwrap();
///
/// approx::assert_relative_eq!(line.slope(), 0.2, max_relative = 1e-12);
/// approx::assert_relative_eq!(line.intercept(), 0.1, max_relative = 1e-12);
/// approx::assert_relative_eq!(line.r_squared(), 1.0);
/// ```
pub fn fit(samples: &CalibrationSet) -> Result<CalibrationFit, FitError> {
    let sample_count = samples.len();
    if sample_count < 2 {
        return Err(FitError::InsufficientData {
            found: sample_count,
        });
    }
    if samples.samples.iter().map(|s| s.concentration).all_equal() {
        return Err(FitError::DegenerateInput {
            reason: "all concentrations are identical",
        });
    }

    // Identical absorbances lie exactly on a flat line
    if samples.samples.iter().map(|s| s.absorbance).all_equal() {
        return Ok(CalibrationFit {
            slope: 0.0,
            intercept: samples.samples[0].absorbance,
            r_squared: 1.0,
            sample_count,
        });
    }

    let x = samples.concentrations();
    let y = samples.absorbances();
    let insufficient = FitError::InsufficientData {
        found: sample_count,
    };
    let x_mean = x.mean().ok_or_else(|| insufficient.clone())?;
    let y_mean = y.mean().ok_or(insufficient)?;

    let dx = &x - x_mean;
    let dy = &y - y_mean;
    let sxx = dx.dot(&dx);
    let sxy = dx.dot(&dy);
    let ss_tot = dy.dot(&dy);

    if sxx <= 0.0 {
        return Err(FitError::DegenerateInput {
            reason: "concentrations have no variance",
        });
    }
    if ss_tot <= 0.0 {
        return Err(FitError::DegenerateInput {
            reason: "absorbance differences are too small to resolve",
        });
    }

    let slope = sxy / sxx;
    let intercept = slope.mul_add(-x_mean, y_mean);
    if !slope.is_finite() || !intercept.is_finite() {
        return Err(FitError::DegenerateInput {
            reason: "calibration values are too large to fit",
        });
    }

    let residuals = &y - &(&x * slope + intercept);
    let ss_res = residuals.dot(&residuals);
    let r_squared = (1.0 - ss_res / ss_tot).clamp(0.0, 1.0);

    log::debug!(
        "fitted {sample_count} standards: slope {slope}, intercept {intercept}, r² {r_squared}"
    );
    Ok(CalibrationFit {
        slope,
        intercept,
        r_squared,
        sample_count,
    })
}

/// Read a concentration off the calibration line: `(absorbance - intercept) / slope`
///
/// # Errors
/// Returns [`PredictError::InvalidAbsorbance`] for a non-finite reading and
/// [`PredictError::UndefinedSlope`] when the line is flat.
pub fn predict_concentration(fit: &CalibrationFit, absorbance: f64) -> Result<f64, PredictError> {
    if !absorbance.is_finite() {
        return Err(PredictError::InvalidAbsorbance);
    }
    if fit.slope == 0.0 {
        return Err(PredictError::UndefinedSlope);
    }

    let concentration = (absorbance - fit.intercept) / fit.slope;
    if !concentration.is_finite() {
        return Err(PredictError::UndefinedSlope);
    }
    Ok(concentration)
}

#[cfg(test)]
mod tests {
    use itertools::Itertools;
    use ndarray_rand::rand::{Rng, SeedableRng};
    use ndarray_rand::rand_distr::{Distribution, Normal};
    use proptest::prelude::*;
    use rand_isaac::Isaac64Rng;

    use super::{fit, predict_concentration, CalibrationSet, FitPolicy, FitQuality};
    use crate::error::{FitError, PredictError};

    fn standards() -> CalibrationSet {
        [(0.0, 0.05), (2.0, 0.12), (4.0, 0.23), (6.0, 0.34), (8.0, 0.45)]
            .into_iter()
            .collect()
    }

    #[test]
    fn least_squares_line_matches_closed_form() {
        let line = fit(&standards()).unwrap();

        // sxx = 40, sxy = 2.04, means (4, 0.238)
        approx::assert_relative_eq!(line.slope(), 0.051, max_relative = 1e-12);
        approx::assert_relative_eq!(line.intercept(), 0.034, max_relative = 1e-12);
        approx::assert_relative_eq!(line.r_squared(), 1.0 - 0.00064 / 0.10468, max_relative = 1e-9);
        assert!(line.r_squared() > 0.99);
        assert_eq!(line.sample_count(), 5);
    }

    #[test]
    fn fit_does_not_depend_on_sample_order() {
        let reference = fit(&standards()).unwrap();

        for permutation in standards().samples().iter().copied().permutations(5) {
            let line = fit(&CalibrationSet::new(permutation)).unwrap();
            approx::assert_relative_eq!(line.slope(), reference.slope(), max_relative = 1e-12);
            approx::assert_relative_eq!(
                line.intercept(),
                reference.intercept(),
                max_relative = 1e-12
            );
            approx::assert_relative_eq!(
                line.r_squared(),
                reference.r_squared(),
                max_relative = 1e-12
            );
        }
    }

    #[test]
    fn too_few_standards_are_rejected() {
        assert_eq!(
            fit(&CalibrationSet::default()),
            Err(FitError::InsufficientData { found: 0 })
        );
        let one: CalibrationSet = [(1.0, 0.2)].into_iter().collect();
        assert_eq!(fit(&one), Err(FitError::InsufficientData { found: 1 }));
    }

    #[test]
    fn identical_concentrations_are_degenerate() {
        let samples: CalibrationSet = [(0.1, 0.2), (0.1, 0.3), (0.1, 0.4)].into_iter().collect();
        assert!(matches!(
            fit(&samples),
            Err(FitError::DegenerateInput { .. })
        ));
    }

    #[test]
    fn constant_absorbance_is_a_perfect_flat_line() {
        let samples: CalibrationSet = [(0.0, 0.3), (1.0, 0.3), (2.0, 0.3)].into_iter().collect();
        let line = fit(&samples).unwrap();

        approx::assert_relative_eq!(line.slope(), 0.0);
        approx::assert_relative_eq!(line.intercept(), 0.3);
        approx::assert_relative_eq!(line.r_squared(), 1.0);
        assert_eq!(
            predict_concentration(&line, 0.3),
            Err(PredictError::UndefinedSlope)
        );
    }

    #[test]
    fn r_squared_ignores_a_constant_absorbance_offset() {
        let near_zero: CalibrationSet = [(0.0, 0.0), (1.0, 2e-5), (2.0, 1e-5)].into_iter().collect();
        let offset: CalibrationSet = near_zero
            .samples()
            .iter()
            .map(|s| (s.concentration, s.absorbance + 1000.0))
            .collect();

        let reference = fit(&near_zero).unwrap();
        let shifted = fit(&offset).unwrap();

        approx::assert_relative_eq!(reference.r_squared(), 0.25, max_relative = 1e-9);
        approx::assert_relative_eq!(shifted.r_squared(), reference.r_squared(), max_relative = 1e-6);
        approx::assert_relative_eq!(shifted.slope(), reference.slope(), max_relative = 1e-6);
        assert_eq!(
            shifted.quality(&FitPolicy {
                min_r_squared: Some(0.9)
            }),
            FitQuality::BelowThreshold {
                r_squared: shifted.r_squared(),
                threshold: 0.9
            }
        );
    }

    #[test]
    fn non_finite_absorbance_cannot_be_predicted() {
        let line = fit(&standards()).unwrap();
        assert_eq!(
            predict_concentration(&line, f64::NAN),
            Err(PredictError::InvalidAbsorbance)
        );
    }

    #[test]
    fn noisy_standards_lower_r_squared() {
        let seed = 40;
        let mut rng = Isaac64Rng::seed_from_u64(seed);
        let noise = Normal::new(0.0, 0.05).unwrap();
        let slope = rng.gen_range(0.05..0.1);
        let intercept = rng.gen_range(0.0..0.05);

        let samples: CalibrationSet = (0..20)
            .map(|n| {
                let concentration = f64::from(n);
                let absorbance = slope * concentration + intercept + noise.sample(&mut rng);
                (concentration, absorbance)
            })
            .collect();

        let line = fit(&samples).unwrap();
        assert!(line.r_squared() < 1.0);
        assert!(line.r_squared() > 0.0);
        approx::assert_relative_eq!(line.slope(), slope, max_relative = 0.2);
    }

    #[test]
    fn lists_are_paired_in_order() {
        let samples = CalibrationSet::from_lists("0, 2,4", " 0.05,0.12 , 0.23").unwrap();
        let pairs = samples
            .samples()
            .iter()
            .map(|s| (s.concentration, s.absorbance))
            .collect::<Vec<_>>();
        assert_eq!(pairs, vec![(0.0, 0.05), (2.0, 0.12), (4.0, 0.23)]);

        assert!(CalibrationSet::from_lists("", "  ").unwrap().is_empty());
    }

    #[test]
    fn malformed_lists_are_rejected() {
        assert_eq!(
            CalibrationSet::from_lists("0, 2, 4", "0.1, 0.2"),
            Err(FitError::LengthMismatch {
                concentrations: 3,
                absorbances: 2
            })
        );
        assert_eq!(
            CalibrationSet::from_lists("0, two, 4", "0.1, 0.2, 0.3"),
            Err(FitError::NonNumeric {
                field: "concentration",
                index: 1,
                text: "two".into()
            })
        );
        assert_eq!(
            CalibrationSet::from_lists("0, 2", "0.1, NaN"),
            Err(FitError::NonNumeric {
                field: "absorbance",
                index: 1,
                text: "NaN".into()
            })
        );
        assert!(matches!(
            CalibrationSet::from_lists("0, 2,", "0.1, 0.2,"),
            Err(FitError::NonNumeric { index: 2, .. })
        ));
    }

    #[test]
    fn policy_flags_weak_fits_without_failing_them() {
        let line = fit(&standards()).unwrap();

        assert_eq!(line.quality(&FitPolicy::default()), FitQuality::Acceptable);
        assert_eq!(
            line.quality(&FitPolicy {
                min_r_squared: Some(0.99)
            }),
            FitQuality::Acceptable
        );
        assert_eq!(
            line.quality(&FitPolicy {
                min_r_squared: Some(0.999)
            }),
            FitQuality::BelowThreshold {
                r_squared: line.r_squared(),
                threshold: 0.999
            }
        );
    }

    proptest! {
        #[test]
        // Predicting from a point on the line gives back its concentration
        fn prediction_inverts_the_fitted_line(
            slope in prop_oneof![-10.0f64..-1e-3, 1e-3f64..10.0],
            intercept in -1.0f64..1.0,
            concentration in -100.0f64..100.0,
        ) {
            let samples: CalibrationSet = (0..5)
                .map(|n| {
                    let c = f64::from(n);
                    (c, slope * c + intercept)
                })
                .collect();
            let line = fit(&samples).unwrap();

            let absorbance = line.absorbance_at(concentration);
            let predicted = predict_concentration(&line, absorbance).unwrap();
            approx::assert_abs_diff_eq!(predicted, concentration, epsilon = 1e-6);
        }
    }
}
