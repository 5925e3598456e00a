//! Per-session state
//!
//! A [`Session`] is the state bundle a host creates for each user: the history ledger, the
//! calibration fit that is currently live, and the configuration. Sessions share nothing, so
//! a host serving several users keeps one per session key and no locking is involved.
//!
//! Every fit a session makes live is tagged with a [`FitRevision`]. Predictions name the fit
//! they were rendered against, and the session refuses them once a newer fit (or no fit)
//! is live. Revisions are unique across the process, so a handle from one session is never
//! live in another.
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{Local, NaiveDateTime, Timelike};

use crate::calibration::{self, CalibrationFit, CalibrationSet, FitQuality};
use crate::cfu::{self, CfuMeasurement, CfuResult};
use crate::config::Config;
use crate::dilution::Dilution;
use crate::error::{CalcError, ExportError, FitError, PredictError};
use crate::history::{HistoryLedger, LedgerKind};

/// Identity of a live fit, increasing with every fit made live in any session
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FitRevision(u64);

static NEXT_REVISION: AtomicU64 = AtomicU64::new(1);

impl FitRevision {
    fn next() -> Self {
        Self(NEXT_REVISION.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for FitRevision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// A fit as handed to the caller, to be passed back when predicting
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LiveFit {
    pub revision: FitRevision,
    pub fit: CalibrationFit,
    pub quality: FitQuality,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConcentrationEstimate {
    pub absorbance: f64,
    pub concentration: f64,
    pub timestamp: NaiveDateTime,
    pub revision: FitRevision,
}

pub type Clock = fn() -> NaiveDateTime;

/// Local wall-clock time to the second
fn local_now() -> NaiveDateTime {
    let now = Local::now().naive_local();
    now.with_nanosecond(0).unwrap_or(now)
}

#[derive(Debug)]
pub struct Session {
    config: Config,
    ledger: HistoryLedger,
    live: Option<LiveFit>,
    clock: Clock,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl Session {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            ledger: HistoryLedger::new(),
            live: None,
            clock: local_now,
        }
    }

    /// Replace the wall clock used to timestamp results
    #[must_use]
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub const fn config(&self) -> &Config {
        &self.config
    }

    pub const fn ledger(&self) -> &HistoryLedger {
        &self.ledger
    }

    /// The fit predictions are currently accepted against
    pub const fn live_fit(&self) -> Option<&LiveFit> {
        self.live.as_ref()
    }

    /// Evaluate the dilution, compute the colony density and record it
    ///
    /// `Ok(None)` means the form is not filled in yet; nothing is recorded.
    ///
    /// # Errors
    /// Returns [`CalcError::Parse`] for a bad dilution and [`CalcError::DivisionUndefined`]
    /// if the density cannot be computed.
    pub fn submit_cfu(
        &mut self,
        colony_count: u64,
        volume_ml: f64,
        dilution_expr: &str,
    ) -> Result<Option<CfuResult>, CalcError> {
        let dilution = Dilution::parse(dilution_expr)?;
        let measurement = CfuMeasurement::new(colony_count, volume_ml, dilution.factor());

        let timestamp = (self.clock)();
        let Some(result) = cfu::compute_cfu(&measurement, timestamp)? else {
            return Ok(None);
        };

        self.ledger
            .append_cfu_record(&measurement, &result, result.timestamp());
        log::info!(
            "recorded {} at dilution {dilution}",
            result.display_with_precision(self.config.result_precision)
        );
        Ok(Some(result))
    }

    /// Fit the standards and make the line live, superseding any earlier fit
    ///
    /// A failed fit leaves no fit live: the standards on screen no longer match any line.
    ///
    /// # Errors
    /// Returns the [`FitError`] from [`calibration::fit`].
    pub fn fit_calibration(&mut self, samples: &CalibrationSet) -> Result<LiveFit, FitError> {
        let fit = match calibration::fit(samples) {
            Ok(fit) => fit,
            Err(err) => {
                if let Some(stale) = self.live.take() {
                    log::info!("fit {} cleared after failed refit: {err}", stale.revision);
                }
                return Err(err);
            }
        };

        let revision = FitRevision::next();
        let quality = fit.quality(&self.config.fit_policy);
        if let FitQuality::BelowThreshold {
            r_squared,
            threshold,
        } = quality
        {
            log::warn!("fit {revision} has r² {r_squared}, below the configured {threshold}");
        }

        let live = LiveFit {
            revision,
            fit,
            quality,
        };
        self.live = Some(live);
        log::info!(
            "fit {revision} is live: slope {}, intercept {}",
            fit.slope(),
            fit.intercept()
        );
        Ok(live)
    }

    /// Parse the comma separated standards and fit them
    ///
    /// # Errors
    /// Returns the [`FitError`] from parsing or fitting.
    pub fn fit_calibration_lists(
        &mut self,
        concentrations: &str,
        absorbances: &str,
    ) -> Result<LiveFit, FitError> {
        match CalibrationSet::from_lists(concentrations, absorbances) {
            Ok(samples) => self.fit_calibration(&samples),
            Err(err) => {
                self.live = None;
                Err(err)
            }
        }
    }

    pub fn clear_calibration(&mut self) {
        if let Some(stale) = self.live.take() {
            log::info!("fit {} cleared", stale.revision);
        }
    }

    /// Estimate a concentration from the fit the caller rendered, and record it
    ///
    /// # Errors
    /// Returns [`PredictError::StaleFit`] if `fit` is not the live fit, otherwise the
    /// [`PredictError`] from [`calibration::predict_concentration`].
    pub fn predict(
        &mut self,
        fit: &LiveFit,
        absorbance: f64,
    ) -> Result<ConcentrationEstimate, PredictError> {
        let Some(current) = self.live.filter(|live| live.revision == fit.revision) else {
            let live = self.live.map(|live| live.revision);
            log::warn!("refused prediction against fit {}, live is {live:?}", fit.revision);
            return Err(PredictError::StaleFit {
                requested: fit.revision,
                live,
            });
        };

        // Coefficients come from the session's own copy, never the caller's
        let concentration = calibration::predict_concentration(&current.fit, absorbance)?;
        let timestamp = (self.clock)();
        self.ledger
            .append_concentration_record(absorbance, concentration, timestamp);
        log::debug!(
            "absorbance {absorbance} read as concentration {concentration} on fit {}",
            fit.revision
        );

        Ok(ConcentrationEstimate {
            absorbance,
            concentration,
            timestamp,
            revision: fit.revision,
        })
    }

    /// Whether `estimate` was made against the fit that is live now
    ///
    /// Estimates go stale as soon as their fit is replaced or cleared.
    #[must_use]
    pub fn is_current(&self, estimate: &ConcentrationEstimate) -> bool {
        self.live.is_some_and(|live| live.revision == estimate.revision)
    }

    /// # Errors
    /// Returns an [`ExportError`] if the CSV writer fails.
    pub fn export_csv(&self, kind: LedgerKind) -> Result<Vec<u8>, ExportError> {
        self.ledger.export_csv(kind)
    }
}
