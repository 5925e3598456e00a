use std::fmt;

use chrono::NaiveDateTime;

use crate::error::DivisionUndefined;

/// Unit reported alongside a colony density
pub const CFU_UNIT: &str = "CFU/mL or g";

/// A plate count as entered on the form
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CfuMeasurement {
    /// Colonies counted on the plate
    pub colony_count: u64,
    /// Volume plated, in mL
    pub volume_ml: f64,
    /// Multiplicative dilution applied before plating, e.g. `1e-3`
    pub dilution_factor: f64,
}

impl CfuMeasurement {
    pub const fn new(colony_count: u64, volume_ml: f64, dilution_factor: f64) -> Self {
        Self {
            colony_count,
            volume_ml,
            dilution_factor,
        }
    }

    /// Whether the form is filled in far enough to produce a density
    ///
    /// A zero count or a non-positive volume is an idle form, not a failure.
    pub fn is_complete(&self) -> bool {
        self.colony_count > 0 && self.volume_ml > 0.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CfuResult {
    value: f64,
    timestamp: NaiveDateTime,
}

impl CfuResult {
    /// Colony forming units per mL (or per g) of the undiluted sample
    pub const fn value(&self) -> f64 {
        self.value
    }

    pub const fn timestamp(&self) -> NaiveDateTime {
        self.timestamp
    }

    /// Scientific notation with `precision` decimals, e.g. `1.50e5 CFU/mL or g`
    pub fn display_with_precision(&self, precision: usize) -> String {
        format!("{:.precision$e} {CFU_UNIT}", self.value)
    }
}

impl fmt::Display for CfuResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display_with_precision(2))
    }
}

/// Colony density of the undiluted sample: `colonies / (volume * dilution)`
///
/// Returns `Ok(None)` while the measurement is incomplete (see
/// [`CfuMeasurement::is_complete`]).
///
/// # Errors
/// Returns [`DivisionUndefined`] if `volume * dilution` is not positive or the density is not
/// finite.
#[allow(clippy::cast_precision_loss)]
pub fn compute_cfu(
    measurement: &CfuMeasurement,
    timestamp: NaiveDateTime,
) -> Result<Option<CfuResult>, DivisionUndefined> {
    if !measurement.is_complete() {
        return Ok(None);
    }

    let undefined = DivisionUndefined {
        volume_ml: measurement.volume_ml,
        dilution_factor: measurement.dilution_factor,
    };

    let plated = measurement.volume_ml * measurement.dilution_factor;
    if plated <= 0.0 || !plated.is_finite() {
        log::error!("{undefined}");
        return Err(undefined);
    }

    let value = measurement.colony_count as f64 / plated;
    if !value.is_finite() {
        log::error!("{undefined}");
        return Err(undefined);
    }

    log::debug!(
        "{} colonies in {} mL at dilution {} gives {value:e}",
        measurement.colony_count,
        measurement.volume_ml,
        measurement.dilution_factor
    );
    Ok(Some(CfuResult { value, timestamp }))
}
