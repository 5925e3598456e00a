use thiserror::Error;

use crate::session::FitRevision;

/// Failure to read a dilution expression
#[derive(Clone, Debug, Error, PartialEq)]
pub enum ParseError {
    #[error("dilution expression is empty")]
    Empty,
    #[error("unexpected character {found:?} at position {position}")]
    UnexpectedChar { found: char, position: usize },
    #[error("malformed number {text:?} at position {position}")]
    MalformedNumber { text: String, position: usize },
    #[error("expected a number at position {position}")]
    ExpectedNumber { position: usize },
    #[error("unexpected trailing input at position {position}")]
    TrailingInput { position: usize },
    #[error("dilution factor must be positive, got {value}")]
    NonPositive { value: f64 },
    #[error("dilution factor is not a finite number")]
    NonFinite,
}

/// Failure to fit a calibration curve
#[derive(Clone, Debug, Error, PartialEq)]
pub enum FitError {
    #[error("at least 2 calibration points are required, got {found}")]
    InsufficientData { found: usize },
    #[error("calibration data is degenerate: {reason}")]
    DegenerateInput { reason: &'static str },
    #[error("{concentrations} concentrations but {absorbances} absorbances")]
    LengthMismatch {
        concentrations: usize,
        absorbances: usize,
    },
    #[error("{field} entry {index} ({text:?}) is not a finite number")]
    NonNumeric {
        field: &'static str,
        index: usize,
        text: String,
    },
}

/// Failure to invert a calibration curve
#[derive(Clone, Copy, Debug, Error, PartialEq)]
pub enum PredictError {
    #[error("calibration slope is zero, concentration cannot be recovered")]
    UndefinedSlope,
    #[error("absorbance must be a finite number")]
    InvalidAbsorbance,
    #[error("prediction requested against fit {requested:?} but the live fit is {live:?}")]
    StaleFit {
        requested: FitRevision,
        live: Option<FitRevision>,
    },
}

/// `volume * dilution` collapsed to zero, or the quotient overflowed
///
/// Upstream validation should make this unreachable.
#[derive(Clone, Copy, Debug, Error, PartialEq)]
#[error("colony density undefined for volume {volume_ml} mL at dilution {dilution_factor}")]
pub struct DivisionUndefined {
    pub volume_ml: f64,
    pub dilution_factor: f64,
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to write csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("failed to flush csv buffer: {0}")]
    Flush(#[from] std::io::Error),
}

/// Every failure a session entry point can report
#[derive(Debug, Error)]
pub enum CalcError {
    #[error(transparent)]
    Parse(#[from] ParseError),
    #[error(transparent)]
    Fit(#[from] FitError),
    #[error(transparent)]
    Predict(#[from] PredictError),
    #[error(transparent)]
    DivisionUndefined(#[from] DivisionUndefined),
    #[error(transparent)]
    Export(#[from] ExportError),
}

impl CalcError {
    /// The message shown to the user for this failure.
    ///
    /// Each parse, fit and predict failure maps to its own actionable message. Only the
    /// internal failures fall back to a generic one.
    #[must_use]
    pub const fn user_message(&self) -> &'static str {
        match self {
            Self::Parse(err) => match err {
                ParseError::Empty => "Enter a dilution, for example 10^-3 or 1e-3.",
                ParseError::UnexpectedChar { .. } => {
                    "Check the dilution format: only digits, '.', '+', '-', 'e' and '^' are allowed (for example 10^-3)."
                }
                ParseError::MalformedNumber { .. } | ParseError::ExpectedNumber { .. } => {
                    "Check the dilution format: a number is incomplete (for example 10^-3 or 1e-3)."
                }
                ParseError::TrailingInput { .. } => {
                    "Check the dilution format: enter a single value such as 10^-3."
                }
                ParseError::NonPositive { .. } => "Check the dilution: the factor must be greater than zero.",
                ParseError::NonFinite => "Check the dilution: the factor is too large or too small to compute.",
            },
            Self::Fit(err) => match err {
                FitError::InsufficientData { .. } => "Enter at least two calibration points.",
                FitError::DegenerateInput { .. } => {
                    "Check that your concentration and absorbance values vary; a line cannot be fitted to constant data."
                }
                FitError::LengthMismatch { .. } => {
                    "Enter the same number of concentrations and absorbances."
                }
                FitError::NonNumeric { .. } => {
                    "Check that your concentration and absorbance data are numeric and comma separated."
                }
            },
            Self::Predict(err) => match err {
                PredictError::UndefinedSlope => {
                    "The calibration curve is flat; concentration cannot be estimated from absorbance."
                }
                PredictError::InvalidAbsorbance => "Enter the sample absorbance as a number.",
                PredictError::StaleFit { .. } => {
                    "The calibration curve changed; fit it again before estimating a concentration."
                }
            },
            Self::DivisionUndefined(_) | Self::Export(_) => {
                "The calculation could not be completed. Please try again."
            }
        }
    }
}
