use std::io::Read;
use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use tidyledger_client::NewTransaction;

/// Column layout of one bank's CSV export. Either a single signed
/// `amount_column` or a debit/credit pair must be mapped.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CsvProfile {
    pub date_column: usize,
    pub description_column: usize,
    pub amount_column: Option<usize>,
    pub debit_column: Option<usize>,
    pub credit_column: Option<usize>,
    /// Bank-side transaction reference, forwarded as `external_id` so a
    /// re-import of the same file is idempotent on the ledger side.
    pub external_id_column: Option<usize>,
    pub notes_column: Option<usize>,
    pub date_format: String,
    pub delimiter: String,
    pub has_header: bool,
    /// Preamble lines some banks put above the header.
    pub skip_rows: usize,
}

impl Default for CsvProfile {
    fn default() -> Self {
        CsvProfile {
            date_column: 0,
            description_column: 1,
            amount_column: Some(2),
            debit_column: None,
            credit_column: None,
            external_id_column: None,
            notes_column: None,
            date_format: "%Y-%m-%d".to_string(),
            delimiter: ",".to_string(),
            has_header: true,
            skip_rows: 0,
        }
    }
}

/// Which ledger account the statement belongs to. Either flag names it; the
/// statement account takes the source side of withdrawals and the
/// destination side of deposits, while the counterparty side falls back to
/// the row's description, the way the ledger names accounts it has not seen
/// before.
#[derive(Debug, Clone, Default)]
pub struct ImportOptions {
    pub source_name: Option<String>,
    pub destination_name: Option<String>,
}

impl ImportOptions {
    fn account(&self) -> Option<String> {
        self.source_name
            .clone()
            .or_else(|| self.destination_name.clone())
    }
}

#[derive(Error, Debug)]
pub enum CsvError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
    #[error("row {row}: missing column {column}")]
    MissingColumn { row: usize, column: usize },
    #[error("row {row}: unparseable date '{value}'")]
    InvalidDate { row: usize, value: String },
    #[error("row {row}: unparseable amount '{value}'")]
    InvalidAmount { row: usize, value: String },
    #[error("no amount column mapped (need amount_column or debit/credit pair)")]
    NoAmountMapping,
    #[error("no data rows")]
    NoDataRows,
}

/// Parse a statement into ready-to-create transactions.
///
/// A row's sign decides the kind: outflows become withdrawals from the
/// configured account, inflows become deposits into it.
pub fn import_csv<R: Read>(
    data: R,
    profile: &CsvProfile,
    options: &ImportOptions,
) -> Result<Vec<NewTransaction>, CsvError> {
    if profile.amount_column.is_none()
        && (profile.debit_column.is_none() || profile.credit_column.is_none())
    {
        return Err(CsvError::NoAmountMapping);
    }
    let delimiter = profile.delimiter.bytes().next().unwrap_or(b',');
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(profile.has_header)
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(data);

    let mut transactions = Vec::new();
    for (index, result) in reader.records().enumerate() {
        if index < profile.skip_rows {
            continue;
        }
        let record = result?;
        if record.is_empty() || record.iter().all(|f| f.trim().is_empty()) {
            continue;
        }
        let row = index + 1;
        let get = |column: usize| {
            record
                .get(column)
                .ok_or(CsvError::MissingColumn { row, column })
        };

        let date = parse_date(get(profile.date_column)?, &profile.date_format)
            .ok_or_else(|| CsvError::InvalidDate {
                row,
                value: record.get(profile.date_column).unwrap_or_default().to_string(),
            })?;
        let description = get(profile.description_column)?.trim().to_string();

        let signed = if let Some(column) = profile.amount_column {
            parse_amount(get(column)?).ok_or_else(|| CsvError::InvalidAmount {
                row,
                value: record.get(column).unwrap_or_default().to_string(),
            })?
        } else {
            // Debit = money out, credit = money in.
            let cell = |column: Option<usize>| -> Result<Option<Decimal>, CsvError> {
                let Some(column) = column else { return Ok(None) };
                let raw = get(column)?.trim();
                if raw.is_empty() {
                    return Ok(None);
                }
                parse_amount(raw)
                    .map(Some)
                    .ok_or_else(|| CsvError::InvalidAmount {
                        row,
                        value: raw.to_string(),
                    })
            };
            match (cell(profile.debit_column)?, cell(profile.credit_column)?) {
                (Some(debit), None) => -debit,
                (None, Some(credit)) => credit,
                _ => continue,
            }
        };
        if signed.is_zero() {
            continue;
        }

        let (kind, source_name, destination_name) = if signed < Decimal::ZERO {
            ("withdrawal", options.account(), Some(description.clone()))
        } else {
            ("deposit", Some(description.clone()), options.account())
        };

        let optional = |column: Option<usize>| {
            column
                .and_then(|c| record.get(c))
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        transactions.push(NewTransaction {
            kind: kind.to_string(),
            date: date.format("%Y-%m-%d").to_string(),
            amount: signed.abs().to_string(),
            description,
            source_name,
            destination_name,
            category_name: None,
            tags: Vec::new(),
            notes: optional(profile.notes_column),
            external_id: optional(profile.external_id_column),
        });
    }

    if transactions.is_empty() {
        return Err(CsvError::NoDataRows);
    }
    Ok(transactions)
}

fn parse_date(s: &str, format: &str) -> Option<NaiveDate> {
    let s = s.trim();
    if let Ok(date) = NaiveDate::parse_from_str(s, format) {
        return Some(date);
    }
    for fmt in &[
        "%Y-%m-%d", "%d/%m/%Y", "%m/%d/%Y", "%Y/%m/%d", "%d-%m-%Y", "%d %b %Y",
    ] {
        if let Ok(date) = NaiveDate::parse_from_str(s, fmt) {
            return Some(date);
        }
    }
    None
}

/// Accepts `$1,234.56`, `-50`, and accounting-style `(75.25)`.
fn parse_amount(s: &str) -> Option<Decimal> {
    let s = s.trim();
    let (negative, s) = if s.starts_with('(') && s.ends_with(')') {
        (true, &s[1..s.len() - 1])
    } else {
        (false, s)
    };
    let s = s.replace([',', '$', ' '], "");
    let value = Decimal::from_str(&s).ok()?;
    Some(if negative { -value } else { value })
}
