use thiserror::Error;

#[derive(Error, Debug)]
pub enum ForecastError {
    #[error("Invalid forecast horizon {0}: must be at least 1 day")]
    InvalidHorizon(i64),

    #[error("Trend forecasting requested but no trend model is configured. Use the hybrid method to fall back to recurring and behavior projections")]
    TrendModelUnavailable,

    #[error("Unsupported statement type '{0}'. Supported types: credit_card, bank_account")]
    UnsupportedStatementType(String),

    #[error("Column '{0}' was not found in the uploaded statement")]
    ColumnNotFound(String),

    #[error("Could not detect a {0} column. Provide a column_map['{0}'] value")]
    MissingColumn(&'static str),

    #[error("Could not locate an amount, debit, or credit column in the statement")]
    NoAmountColumn,

    #[error("Uploaded statement is empty")]
    EmptyStatement,

    #[error("Statement file does not contain transaction rows")]
    NoTransactionRows,

    #[error("No valid transactions found after parsing the statement. Detected rows={rows}, valid_dates={valid_dates}, valid_amounts={valid_amounts}. If your bank export includes a header or summary before the transaction table, try removing those lines or provide a column_map")]
    NoValidTransactions {
        rows: usize,
        valid_dates: usize,
        valid_amounts: usize,
    },

    #[error("Invalid column_map JSON: {0}")]
    InvalidColumnMap(String),

    #[error("Statement read error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ForecastError>;
