use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ForecastError, Result};
use crate::schema::flexible_date;
use crate::utils::round2;

const DATE_CANDIDATES: &[&str] = &[
    "date",
    "transaction date",
    "trans date",
    "posted date",
    "posting date",
    "post date",
    "processed date",
    "statement date",
];

const DESCRIPTION_CANDIDATES: &[&str] = &[
    "description",
    "transaction description",
    "merchant",
    "details",
    "memo",
    "payee",
    "narrative",
    "activity description",
];

const AMOUNT_CANDIDATES: &[&str] = &["amount", "transaction amount", "amt", "usd", "value"];

const DEBIT_CANDIDATES: &[&str] = &["debit", "charge", "withdrawal", "purchase", "spend", "fees"];

const CREDIT_CANDIDATES: &[&str] = &["credit", "payment", "deposit", "refund", "received"];

const TYPE_CANDIDATES: &[&str] = &[
    "type",
    "transaction type",
    "debit/credit",
    "dr/cr",
    "drcr",
    "tran type",
];

static CHARGE_TYPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"debit|charge|purchase|withdraw").expect("static pattern"));
static CREDIT_TYPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"credit|payment|refund|deposit").expect("static pattern"));

/// Kind of statement being imported; drives the unsigned-amount heuristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatementType {
    CreditCard,
    BankAccount,
}

impl StatementType {
    pub fn parse(raw: &str) -> Result<Self> {
        match raw.trim().to_lowercase().as_str() {
            "credit_card" => Ok(StatementType::CreditCard),
            "bank_account" => Ok(StatementType::BankAccount),
            other => Err(ForecastError::UnsupportedStatementType(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StatementType::CreditCard => "credit_card",
            StatementType::BankAccount => "bank_account",
        }
    }
}

/// User-supplied override mapping logical fields to statement columns.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ColumnMap {
    #[serde(default)]
    pub date: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub amount: Option<String>,
    #[serde(default)]
    pub debit: Option<String>,
    #[serde(default)]
    pub credit: Option<String>,
    #[serde(default, rename = "type")]
    pub type_column: Option<String>,
}

/// Columns the parser settled on, by header name.
#[derive(Debug, Clone, Serialize)]
pub struct DetectedColumns {
    pub date: Option<String>,
    pub description: Option<String>,
    pub amount: Option<String>,
    pub debit: Option<String>,
    pub credit: Option<String>,
    #[serde(rename = "type")]
    pub type_column: Option<String>,
}

/// A normalized statement row, shaped to feed straight into the forecast
/// engine's transaction input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatementTransaction {
    #[serde(with = "flexible_date")]
    pub date: NaiveDate,
    pub description: String,
    pub amount: f64,
    pub source: String,
    pub statement_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source_file: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatementSummary {
    pub count: usize,
    pub start_date: String,
    pub end_date: String,
    pub total_charges: f64,
    pub total_payments: f64,
    pub net: f64,
    pub statement_type: String,
    pub filename: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ParsedStatement {
    pub transactions: Vec<StatementTransaction>,
    pub summary: StatementSummary,
    pub preview: Vec<StatementTransaction>,
    pub columns: DetectedColumns,
    pub statement_type: String,
    pub filename: Option<String>,
}

fn decode(raw: &[u8]) -> String {
    let without_bom = raw.strip_prefix(b"\xef\xbb\xbf").unwrap_or(raw);
    match std::str::from_utf8(without_bom) {
        Ok(text) => text.to_string(),
        // Latin-1 maps every byte to the same code point.
        Err(_) => without_bom.iter().map(|&b| b as char).collect(),
    }
}

fn detect_delimiter(decoded: &str) -> u8 {
    let first_line = decoded.lines().next().unwrap_or("");
    for candidate in ['\t', ';', '|', '~'] {
        if first_line.contains(candidate) {
            return candidate as u8;
        }
    }
    b','
}

fn read_records(decoded: &str, delimiter: u8) -> Result<(Vec<String>, Vec<csv::StringRecord>)> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(decoded.as_bytes());
    let headers: Vec<String> = reader
        .headers()?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    let records: Vec<csv::StringRecord> = reader.records().collect::<std::result::Result<_, _>>()?;
    Ok((headers, records))
}

fn find_column(
    columns: &[String],
    candidates: &[&str],
    exclude: &[Option<usize>],
) -> Option<usize> {
    for candidate in candidates {
        for (idx, column) in columns.iter().enumerate() {
            if exclude.contains(&Some(idx)) {
                continue;
            }
            let normalized = column.to_lowercase();
            let normalized = normalized.trim();
            if normalized == *candidate || normalized.contains(candidate) {
                return Some(idx);
            }
        }
    }
    None
}

fn resolve_column(columns: &[String], name: Option<&str>) -> Result<Option<usize>> {
    let Some(name) = name else {
        return Ok(None);
    };
    let target = name.trim().to_lowercase();
    if target.is_empty() {
        return Ok(None);
    }
    for (idx, column) in columns.iter().enumerate() {
        if column.trim().to_lowercase() == target {
            return Ok(Some(idx));
        }
    }
    Err(ForecastError::ColumnNotFound(name.to_string()))
}

/// Strip currency formatting and coerce to a signed number. Parenthesized
/// and trailing-sign negatives are normalized.
fn coerce_numeric(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let replaced = trimmed.replace(['$', ','], "").replace('(', "-").replace(')', "");
    let mut cleaned: String = replaced
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '-' || *c == '.' || *c == '+')
        .collect();

    if cleaned.ends_with('-') && !cleaned.starts_with('-') {
        cleaned = format!("-{}", &cleaned[..cleaned.len() - 1]);
    }
    if cleaned.ends_with('+') {
        cleaned.truncate(cleaned.len() - 1);
    }
    let cleaned = cleaned.trim_start_matches('+');
    if cleaned.is_empty() || cleaned == "-" {
        return None;
    }
    cleaned.parse::<f64>().ok()
}

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d",
    "%Y/%m/%d",
    "%m/%d/%Y",
    "%m/%d/%y",
    "%d/%m/%Y",
    "%d-%m-%Y",
    "%b %d, %Y",
    "%b %d %Y",
    "%d %b %Y",
    "%d %b, %Y",
];

/// Fallback ladder of common bank-export formats, ending at 8-digit compact
/// forms.
fn parse_statement_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let lowered = trimmed.to_lowercase();
    if matches!(lowered.as_str(), "pending" | "n/a" | "na" | "tbd" | "nan" | "nat" | "none") {
        return None;
    }

    if let Some(date) = flexible_date::parse(trimmed) {
        return Some(date);
    }
    for format in DATE_FORMATS {
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, format) {
            return Some(date);
        }
    }

    let digits: String = trimmed.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() == 8 {
        for format in ["%Y%m%d", "%m%d%Y", "%d%m%Y"] {
            if let Ok(date) = NaiveDate::parse_from_str(&digits, format) {
                return Some(date);
            }
        }
    }

    None
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parse a CSV-like bank or credit-card statement into normalized
/// transactions. Delimiter and columns are auto-detected unless overridden.
pub fn parse_statement(
    raw: &[u8],
    filename: Option<&str>,
    statement_type: StatementType,
    column_map: Option<&ColumnMap>,
    delimiter: Option<char>,
) -> Result<ParsedStatement> {
    if raw.is_empty() {
        return Err(ForecastError::EmptyStatement);
    }
    let decoded = decode(raw);

    let delimiter_byte = delimiter.map(|c| c as u8).unwrap_or_else(|| detect_delimiter(&decoded));
    let (mut headers, mut records) = read_records(&decoded, delimiter_byte)?;

    // A single parsed column usually means the wrong delimiter; retry with
    // whichever other candidate appears in the header line.
    if headers.len() == 1 {
        let header_line = headers[0].clone();
        for candidate in [',', '\t', ';', '|', '~'] {
            if candidate as u8 == delimiter_byte {
                continue;
            }
            if header_line.contains(candidate) {
                let reparsed = read_records(&decoded, candidate as u8)?;
                headers = reparsed.0;
                records = reparsed.1;
                break;
            }
        }
    }

    if headers.is_empty() || records.is_empty() {
        return Err(ForecastError::NoTransactionRows);
    }

    let map = column_map.cloned().unwrap_or_default();
    let date_idx = match resolve_column(&headers, map.date.as_deref())? {
        Some(idx) => Some(idx),
        None => find_column(&headers, DATE_CANDIDATES, &[]),
    };
    let Some(date_idx) = date_idx else {
        return Err(ForecastError::MissingColumn("date"));
    };

    let description_idx = match resolve_column(&headers, map.description.as_deref())? {
        Some(idx) => Some(idx),
        None => find_column(&headers, DESCRIPTION_CANDIDATES, &[Some(date_idx)]),
    };
    let Some(description_idx) = description_idx else {
        return Err(ForecastError::MissingColumn("description"));
    };

    let mut amount_idx = resolve_column(&headers, map.amount.as_deref())?;
    let mut debit_idx = resolve_column(&headers, map.debit.as_deref())?;
    let mut credit_idx = resolve_column(&headers, map.credit.as_deref())?;
    let mut type_idx = resolve_column(&headers, map.type_column.as_deref())?;

    if amount_idx.is_none() {
        amount_idx = find_column(
            &headers,
            AMOUNT_CANDIDATES,
            &[Some(date_idx), Some(description_idx)],
        );
    }
    if debit_idx.is_none() {
        debit_idx = find_column(
            &headers,
            DEBIT_CANDIDATES,
            &[Some(date_idx), Some(description_idx), amount_idx],
        );
    }
    if credit_idx.is_none() {
        credit_idx = find_column(
            &headers,
            CREDIT_CANDIDATES,
            &[Some(date_idx), Some(description_idx), amount_idx, debit_idx],
        );
    }
    if type_idx.is_none() {
        type_idx = find_column(
            &headers,
            TYPE_CANDIDATES,
            &[Some(date_idx), Some(description_idx), amount_idx, debit_idx, credit_idx],
        );
    }

    if amount_idx.is_none() && debit_idx.is_none() && credit_idx.is_none() {
        return Err(ForecastError::NoAmountColumn);
    }

    struct Row {
        date: NaiveDate,
        description: String,
        amount: f64,
    }

    let total_rows = records.len();
    let mut valid_dates = 0usize;
    let mut valid_amounts = 0usize;
    let mut rows: Vec<Row> = Vec::with_capacity(records.len());

    for record in &records {
        let cell = |idx: Option<usize>| idx.and_then(|i| record.get(i)).unwrap_or("");

        let date = parse_statement_date(cell(Some(date_idx)));
        if date.is_some() {
            valid_dates += 1;
        }

        let mut amount = amount_idx.and_then(|i| record.get(i)).and_then(coerce_numeric);
        if debit_idx.is_some() || credit_idx.is_some() {
            let credit = credit_idx
                .and_then(|i| record.get(i))
                .and_then(coerce_numeric)
                .unwrap_or(0.0);
            let debit = debit_idx
                .and_then(|i| record.get(i))
                .and_then(coerce_numeric)
                .unwrap_or(0.0);
            if amount.is_none() {
                amount = Some(credit - debit);
            }
        }
        if amount.is_some() {
            valid_amounts += 1;
        }

        let (Some(date), Some(mut amount)) = (date, amount) else {
            continue;
        };

        if let Some(type_idx) = type_idx {
            let type_text = cell(Some(type_idx)).to_lowercase();
            if CHARGE_TYPE.is_match(&type_text) {
                amount = -amount.abs();
            } else if CREDIT_TYPE.is_match(&type_text) {
                amount = amount.abs();
            }
        }

        rows.push(Row {
            date,
            description: collapse_whitespace(cell(Some(description_idx))),
            amount,
        });
    }

    // Credit-card exports commonly list charges as unsigned positives; flip
    // the dominant side to expenses when no type column disambiguates.
    if type_idx.is_none() && statement_type == StatementType::CreditCard {
        let positive_sum: f64 = rows.iter().filter(|r| r.amount > 0.0).map(|r| r.amount).sum();
        let negative_sum: f64 = rows.iter().filter(|r| r.amount < 0.0).map(|r| r.amount).sum();
        if positive_sum > 0.0 && positive_sum > negative_sum.abs() {
            for row in &mut rows {
                row.amount = if row.amount >= 0.0 {
                    -row.amount.abs()
                } else {
                    row.amount.abs()
                };
            }
        }
    }

    if rows.is_empty() {
        return Err(ForecastError::NoValidTransactions {
            rows: total_rows,
            valid_dates,
            valid_amounts,
        });
    }

    rows.sort_by_key(|r| r.date);

    let statement_type_str = statement_type.as_str().to_string();
    let mut seen: std::collections::HashSet<(NaiveDate, String, i64)> =
        std::collections::HashSet::new();
    let mut transactions: Vec<StatementTransaction> = Vec::with_capacity(rows.len());
    for row in rows {
        let amount = round2(row.amount);
        let key = (row.date, row.description.clone(), (amount * 100.0).round() as i64);
        if !seen.insert(key) {
            continue;
        }
        transactions.push(StatementTransaction {
            date: row.date,
            description: row.description,
            amount,
            source: "statement".to_string(),
            statement_type: statement_type_str.clone(),
            source_file: filename.map(str::to_string),
        });
    }

    let total_charges: f64 = transactions
        .iter()
        .filter(|t| t.amount < 0.0)
        .map(|t| t.amount.abs())
        .sum();
    let total_payments: f64 = transactions
        .iter()
        .filter(|t| t.amount > 0.0)
        .map(|t| t.amount)
        .sum();
    let net: f64 = transactions.iter().map(|t| t.amount).sum();

    let summary = StatementSummary {
        count: transactions.len(),
        start_date: transactions
            .first()
            .map(|t| t.date.format("%Y-%m-%d").to_string())
            .unwrap_or_default(),
        end_date: transactions
            .last()
            .map(|t| t.date.format("%Y-%m-%d").to_string())
            .unwrap_or_default(),
        total_charges,
        total_payments,
        net,
        statement_type: statement_type_str.clone(),
        filename: filename.map(str::to_string),
    };

    let preview = transactions.iter().take(10).cloned().collect();
    let column_name = |idx: Option<usize>| idx.map(|i| headers[i].clone());

    Ok(ParsedStatement {
        transactions,
        summary,
        preview,
        columns: DetectedColumns {
            date: column_name(Some(date_idx)),
            description: column_name(Some(description_idx)),
            amount: column_name(amount_idx),
            debit: column_name(debit_idx),
            credit: column_name(credit_idx),
            type_column: column_name(type_idx),
        },
        statement_type: statement_type_str,
        filename: filename.map(str::to_string),
    })
}
