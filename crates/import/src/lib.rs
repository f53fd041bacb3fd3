//! CSV statement import: maps bank export rows onto new ledger
//! transactions.

pub mod csv;

pub use csv::{import_csv, CsvError, CsvProfile, ImportOptions};
