//! Session history of completed calculations
//!
//! The ledger keeps one append-only list per calculation kind. Records are never edited or
//! removed, and each one carries the inputs it was computed from so an export can be traced
//! back to the bench.
//!
//! Exported numbers are plain decimals (`0.000001`, `150000`), never exponent notation, so a
//! spreadsheet reads every cell the same way.
use std::fmt;

use chrono::NaiveDateTime;
use serde::{Serialize, Serializer};

use crate::cfu::{CfuMeasurement, CfuResult};
use crate::error::ExportError;

/// `YYYY-MM-DD HH:MM:SS`
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub const CFU_HEADER: [&str; 5] = ["Date", "ColonyCount", "VolumeMl", "Dilution", "CfuPerMlOrG"];
pub const CONCENTRATION_HEADER: [&str; 3] =
    ["Date", "SampleAbsorbance", "EstimatedConcentration"];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum LedgerKind {
    Cfu,
    Concentration,
}

impl LedgerKind {
    pub const fn header(self) -> &'static [&'static str] {
        match self {
            Self::Cfu => &CFU_HEADER,
            Self::Concentration => &CONCENTRATION_HEADER,
        }
    }
}

impl fmt::Display for LedgerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cfu => f.write_str("cfu"),
            Self::Concentration => f.write_str("concentration"),
        }
    }
}

fn serialize_timestamp<S: Serializer>(
    timestamp: &NaiveDateTime,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(&timestamp.format(TIMESTAMP_FORMAT))
}

/// Shortest decimal that reads back to the same value; `f64`'s `Display` has no exponent form
fn serialize_decimal<S: Serializer>(value: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(value)
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CfuRecord {
    #[serde(rename = "Date", serialize_with = "serialize_timestamp")]
    pub timestamp: NaiveDateTime,
    #[serde(rename = "ColonyCount")]
    pub colony_count: u64,
    #[serde(rename = "VolumeMl", serialize_with = "serialize_decimal")]
    pub volume_ml: f64,
    #[serde(rename = "Dilution", serialize_with = "serialize_decimal")]
    pub dilution_factor: f64,
    #[serde(rename = "CfuPerMlOrG", serialize_with = "serialize_decimal")]
    pub cfu: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ConcentrationRecord {
    #[serde(rename = "Date", serialize_with = "serialize_timestamp")]
    pub timestamp: NaiveDateTime,
    #[serde(rename = "SampleAbsorbance", serialize_with = "serialize_decimal")]
    pub absorbance: f64,
    #[serde(rename = "EstimatedConcentration", serialize_with = "serialize_decimal")]
    pub concentration: f64,
}

#[derive(Clone, Debug, Default)]
pub struct HistoryLedger {
    cfu: Vec<CfuRecord>,
    concentration: Vec<ConcentrationRecord>,
}

impl HistoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append_cfu_record(
        &mut self,
        measurement: &CfuMeasurement,
        result: &CfuResult,
        timestamp: NaiveDateTime,
    ) {
        self.cfu.push(CfuRecord {
            timestamp,
            colony_count: measurement.colony_count,
            volume_ml: measurement.volume_ml,
            dilution_factor: measurement.dilution_factor,
            cfu: result.value(),
        });
    }

    pub fn append_concentration_record(
        &mut self,
        absorbance: f64,
        concentration: f64,
        timestamp: NaiveDateTime,
    ) {
        self.concentration.push(ConcentrationRecord {
            timestamp,
            absorbance,
            concentration,
        });
    }

    /// CFU records, oldest first
    pub fn cfu_records(&self) -> &[CfuRecord] {
        &self.cfu
    }

    /// Concentration records, oldest first
    pub fn concentration_records(&self) -> &[ConcentrationRecord] {
        &self.concentration
    }

    pub fn len(&self, kind: LedgerKind) -> usize {
        match kind {
            LedgerKind::Cfu => self.cfu.len(),
            LedgerKind::Concentration => self.concentration.len(),
        }
    }

    pub fn is_empty(&self, kind: LedgerKind) -> bool {
        self.len(kind) == 0
    }

    /// Serialize one ledger as UTF-8 CSV, header first, records in append order
    ///
    /// # Errors
    /// Returns an [`ExportError`] if the CSV writer fails.
    pub fn export_csv(&self, kind: LedgerKind) -> Result<Vec<u8>, ExportError> {
        let mut wtr = csv::WriterBuilder::new()
            .has_headers(false)
            .terminator(csv::Terminator::Any(b'\n'))
            .from_writer(vec![]);

        wtr.write_record(kind.header())?;
        match kind {
            LedgerKind::Cfu => {
                for record in &self.cfu {
                    wtr.serialize(record)?;
                }
            }
            LedgerKind::Concentration => {
                for record in &self.concentration {
                    wtr.serialize(record)?;
                }
            }
        }

        let bytes = wtr.into_inner().map_err(csv::IntoInnerError::into_error)?;
        log::info!("exported {} {kind} records", self.len(kind));
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, NaiveDateTime};

    use super::{HistoryLedger, LedgerKind};
    use crate::cfu::{compute_cfu, CfuMeasurement};

    fn at(hour: u32, min: u32, sec: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 14)
            .and_then(|date| date.and_hms_opt(hour, min, sec))
            .unwrap()
    }

    fn export(ledger: &HistoryLedger, kind: LedgerKind) -> String {
        String::from_utf8(ledger.export_csv(kind).unwrap()).unwrap()
    }

    #[test]
    fn empty_ledgers_export_only_the_header() {
        let ledger = HistoryLedger::new();

        assert!(ledger.cfu_records().is_empty());
        assert!(ledger.is_empty(LedgerKind::Concentration));
        assert_eq!(
            export(&ledger, LedgerKind::Cfu),
            "Date,ColonyCount,VolumeMl,Dilution,CfuPerMlOrG\n"
        );
        assert_eq!(
            export(&ledger, LedgerKind::Concentration),
            "Date,SampleAbsorbance,EstimatedConcentration\n"
        );
    }

    #[test]
    fn cfu_records_export_with_their_inputs() {
        let mut ledger = HistoryLedger::new();
        let measurement = CfuMeasurement::new(150, 0.1, 0.001);
        let result = compute_cfu(&measurement, at(9, 5, 7)).unwrap().unwrap();
        ledger.append_cfu_record(&measurement, &result, at(9, 5, 7));

        let csv = export(&ledger, LedgerKind::Cfu);
        let lines = csv.lines().collect::<Vec<_>>();

        assert_eq!(lines.len(), 2);
        let fields = lines[1].split(',').collect::<Vec<_>>();
        assert_eq!(&fields[..4], ["2024-03-14 09:05:07", "150", "0.1", "0.001"]);
        approx::assert_relative_eq!(
            fields[4].parse::<f64>().unwrap(),
            1.5e6,
            max_relative = 1e-12
        );
    }

    #[test]
    fn small_and_large_numbers_export_without_exponents() {
        let mut ledger = HistoryLedger::new();
        ledger.append_concentration_record(1e-6, 2.5e7, at(11, 0, 0));
        let measurement = CfuMeasurement::new(12, 1.0, 1e-7);
        let result = compute_cfu(&measurement, at(11, 0, 1)).unwrap().unwrap();
        ledger.append_cfu_record(&measurement, &result, at(11, 0, 1));

        assert_eq!(
            export(&ledger, LedgerKind::Concentration).lines().nth(1),
            Some("2024-03-14 11:00:00,0.000001,25000000")
        );
        let csv = export(&ledger, LedgerKind::Cfu);
        let fields = csv.lines().nth(1).unwrap().split(',').collect::<Vec<_>>();
        assert_eq!(fields[3], "0.0000001");
        assert!(fields.iter().all(|field| !field.contains(['e', 'E'])));
        approx::assert_relative_eq!(
            fields[4].parse::<f64>().unwrap(),
            1.2e8,
            max_relative = 1e-12
        );
    }

    #[test]
    fn records_keep_append_order_and_earlier_rows_are_untouched() {
        let mut ledger = HistoryLedger::new();

        ledger.append_concentration_record(0.25, 4.2, at(10, 0, 0));
        let first_export = export(&ledger, LedgerKind::Concentration);

        for n in 1..10u32 {
            ledger.append_concentration_record(f64::from(n), f64::from(n) * 2.0, at(10, n, 0));
        }
        let csv = export(&ledger, LedgerKind::Concentration);

        assert_eq!(csv.lines().count(), 11);
        assert!(csv.starts_with(&first_export));
        assert_eq!(csv.lines().nth(1), Some("2024-03-14 10:00:00,0.25,4.2"));
        assert_eq!(csv.lines().last(), Some("2024-03-14 10:09:00,9,18"));
        approx::assert_relative_eq!(ledger.concentration_records()[0].absorbance, 0.25);

        // The other ledger is independent
        assert!(ledger.is_empty(LedgerKind::Cfu));
    }
}
