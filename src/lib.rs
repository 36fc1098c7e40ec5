//! # Cashflow Forecaster
//!
//! A library for projecting personal cash-flow trajectories: a day-by-day
//! running balance and a categorized stream of future transactions, derived
//! from an opening balance, a historical transaction ledger, optional
//! user-declared scheduled events, and a forecast horizon.
//!
//! ## Pipeline
//!
//! - **Normalization**: transfer suppression, deduplication, categorization
//!   against a closed 20-category taxonomy with a process-wide alias cache
//! - **Recurrence detection**: per-description series with consistent
//!   intervals and stable amounts, classified weekly through yearly
//! - **Behavior projection**: habitual variable spending driven by support,
//!   cadence, and weekday preference
//! - **Trend projection**: per-category daily forecasts behind a pluggable
//!   [`TrendModel`] interface, with growth caps and plausibility filters
//! - **Reconciliation**: per-category macro targets that scale or inject
//!   adjustment events within strict caps
//! - **Composition**: running balance, daily summary, 30-day calendar,
//!   category breakdowns, and habit insights
//!
//! ## Example
//!
//! ```rust
//! use cashflow_forecaster::{run_forecast, ForecastMethod, Transaction};
//! use chrono::NaiveDate;
//!
//! let transactions = vec![
//!     Transaction {
//!         date: NaiveDate::from_ymd_opt(2025, 1, 3).unwrap(),
//!         description: "Payroll Direct Deposit".to_string(),
//!         amount: 2500.0,
//!         category: None,
//!     },
//!     Transaction {
//!         date: NaiveDate::from_ymd_opt(2025, 1, 4).unwrap(),
//!         description: "Whole Foods Market".to_string(),
//!         amount: -82.17,
//!         category: None,
//!     },
//! ];
//!
//! let response = run_forecast(
//!     1200.0,
//!     &transactions,
//!     &[],
//!     30,
//!     ForecastMethod::Hybrid,
//!     NaiveDate::from_ymd_opt(2025, 2, 1),
//! )
//! .unwrap();
//! assert_eq!(response.summary.method, "hybrid");
//! ```

pub mod backtest;
pub mod behavior;
pub mod category;
pub mod compose;
pub mod config;
pub mod engine;
pub mod error;
pub mod history;
pub mod normalize;
pub mod reconcile;
pub mod recurring;
pub mod sanitize;
pub mod scheduled;
pub mod schema;
pub mod seasonality;
pub mod statement;
pub mod trend;
pub mod utils;

pub use backtest::{run_backtest, BacktestOptions, BacktestReport, WindowScore};
pub use category::{categorize, AliasCache, Category};
pub use config::{EngineConfig, Polarity, ReconcileRule};
pub use engine::{run_forecast, ForecastEngine};
pub use error::{ForecastError, Result};
pub use history::DailySeries;
pub use schema::{
    DailyBalance, EventKind, FlowKind, ForecastMethod, ForecastResponse, ForecastSummary,
    HabitInsight, ProjectedEvent, ProjectionSource, RecurrencePattern, RecurringTemplate,
    SchedulePattern, ScheduledDay, ScheduledEvent, Transaction,
};
pub use statement::{parse_statement, ColumnMap, ParsedStatement, StatementType};
pub use trend::{SeasonalDecompositionModel, TrendModel};
