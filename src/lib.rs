#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
// #![warn(clippy::cargo)]

pub mod calibration;
pub mod cfu;
pub mod config;
pub mod dilution;
pub mod error;
pub mod history;
pub mod session;

pub use error::{CalcError, DivisionUndefined, ExportError, FitError, ParseError, PredictError};
pub use session::Session;

pub type Result<T> = ::std::result::Result<T, Box<dyn ::std::error::Error>>;
