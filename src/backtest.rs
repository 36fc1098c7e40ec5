use std::collections::BTreeMap;

use chrono::{Days, NaiveDate};
use serde::Serialize;
use tracing::debug;

use crate::category::Category;
use crate::engine::ForecastEngine;
use crate::error::Result;
use crate::normalize::sanitize_transactions;
use crate::schema::{EventKind, ForecastMethod, Transaction};

/// Controls for a sliding-window evaluation over a historical ledger.
#[derive(Debug, Clone)]
pub struct BacktestOptions {
    pub horizon_days: i64,
    /// Minimum history behind an evaluation date.
    pub min_history_days: i64,
    /// Minimum spacing between consecutive evaluation dates.
    pub step_days: i64,
    pub method: ForecastMethod,
    pub opening_balance: f64,
}

impl Default for BacktestOptions {
    fn default() -> Self {
        Self {
            horizon_days: 30,
            min_history_days: 60,
            step_days: 14,
            method: ForecastMethod::Hybrid,
            opening_balance: 0.0,
        }
    }
}

/// Scores for one evaluation window.
#[derive(Debug, Clone, Serialize)]
pub struct WindowScore {
    pub start: NaiveDate,
    pub history_days: i64,
    pub predicted_net: f64,
    pub actual_net: f64,
    /// Predicted minus actual net flow over the horizon.
    pub net_error: f64,
    pub daily_mae: f64,
    pub category_predicted: BTreeMap<Category, f64>,
    pub category_actual: BTreeMap<Category, f64>,
}

/// Aggregate scores across all evaluation windows.
#[derive(Debug, Clone, Serialize)]
pub struct BacktestReport {
    pub windows: Vec<WindowScore>,
    pub mean_absolute_net_error: f64,
    pub mean_daily_mae: f64,
    pub category_predicted_totals: BTreeMap<Category, f64>,
    pub category_actual_totals: BTreeMap<Category, f64>,
}

/// Pick evaluation dates: enough history behind, a full horizon of actuals
/// ahead, and at least `step_days` apart.
pub fn evaluation_dates(transactions: &[Transaction], options: &BacktestOptions) -> Vec<NaiveDate> {
    let mut dates: Vec<NaiveDate> = transactions.iter().map(|t| t.date).collect();
    dates.sort();
    dates.dedup();
    let (Some(&min_date), Some(&max_date)) = (dates.first(), dates.last()) else {
        return Vec::new();
    };

    let mut selected = Vec::new();
    let mut last_selected: Option<NaiveDate> = None;
    for candidate in dates {
        if (candidate - min_date).num_days() < options.min_history_days {
            continue;
        }
        if candidate + Days::new(options.horizon_days as u64) > max_date {
            continue;
        }
        if let Some(last) = last_selected {
            if (candidate - last).num_days() < options.step_days {
                continue;
            }
        }
        selected.push(candidate);
        last_selected = Some(candidate);
    }
    selected
}

/// Slide evaluation windows across history, run the engine on each prefix,
/// and score predictions against what actually happened.
pub fn run_backtest(
    engine: &ForecastEngine,
    transactions: &[Transaction],
    options: &BacktestOptions,
) -> Result<BacktestReport> {
    let sanitized = sanitize_transactions(transactions, engine.alias_cache());
    let eval_dates = evaluation_dates(&sanitized, options);

    let mut windows = Vec::new();
    let mut category_predicted_totals: BTreeMap<Category, f64> = BTreeMap::new();
    let mut category_actual_totals: BTreeMap<Category, f64> = BTreeMap::new();

    for start in eval_dates {
        let history: Vec<Transaction> = sanitized
            .iter()
            .filter(|t| t.date < start)
            .cloned()
            .collect();
        let window_end = start + Days::new(options.horizon_days as u64);
        let future: Vec<&Transaction> = sanitized
            .iter()
            .filter(|t| t.date >= start && t.date < window_end)
            .collect();
        if history.is_empty() || future.is_empty() {
            continue;
        }

        let history_start = history.iter().map(|t| t.date).min().unwrap_or(start);
        let history_days = (start - history_start).num_days();
        let history_sum: f64 = history.iter().map(|t| t.amount).sum();
        let opening_at_start = options.opening_balance + history_sum;

        let response = engine.run_forecast(
            opening_at_start,
            &history,
            &[],
            options.horizon_days,
            options.method,
            Some(start),
        )?;

        let mut predicted_daily: BTreeMap<NaiveDate, f64> = BTreeMap::new();
        for day in response.forecast.iter().filter(|d| d.date >= start) {
            *predicted_daily.entry(day.date).or_insert(0.0) += day.amount;
        }
        let mut actual_daily: BTreeMap<NaiveDate, f64> = BTreeMap::new();
        for tx in &future {
            *actual_daily.entry(tx.date).or_insert(0.0) += tx.amount;
        }

        let mut absolute_error_sum = 0.0;
        for offset in 0..options.horizon_days {
            let day = start + Days::new(offset as u64);
            let predicted = predicted_daily.get(&day).copied().unwrap_or(0.0);
            let actual = actual_daily.get(&day).copied().unwrap_or(0.0);
            absolute_error_sum += (predicted - actual).abs();
        }
        let daily_mae = absolute_error_sum / options.horizon_days.max(1) as f64;

        let predicted_net: f64 = predicted_daily.values().sum();
        let actual_net: f64 = actual_daily.values().sum();

        let mut category_predicted: BTreeMap<Category, f64> = BTreeMap::new();
        for event in response
            .transactions
            .iter()
            .filter(|e| e.kind != EventKind::Historical && e.date >= start)
        {
            *category_predicted.entry(event.category).or_insert(0.0) += event.amount;
        }
        let mut category_actual: BTreeMap<Category, f64> = BTreeMap::new();
        for tx in &future {
            let category = tx.category.unwrap_or(Category::Other);
            *category_actual.entry(category).or_insert(0.0) += tx.amount;
        }

        for (category, total) in &category_predicted {
            *category_predicted_totals.entry(*category).or_insert(0.0) += total;
        }
        for (category, total) in &category_actual {
            *category_actual_totals.entry(*category).or_insert(0.0) += total;
        }

        debug!(start = %start, predicted_net, actual_net, daily_mae, "backtest window scored");

        windows.push(WindowScore {
            start,
            history_days,
            predicted_net,
            actual_net,
            net_error: predicted_net - actual_net,
            daily_mae,
            category_predicted,
            category_actual,
        });
    }

    let count = windows.len().max(1) as f64;
    let mean_absolute_net_error = windows.iter().map(|w| w.net_error.abs()).sum::<f64>() / count;
    let mean_daily_mae = windows.iter().map(|w| w.daily_mae).sum::<f64>() / count;

    Ok(BacktestReport {
        windows,
        mean_absolute_net_error,
        mean_daily_mae,
        category_predicted_totals,
        category_actual_totals,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn rent_and_income_year() -> Vec<Transaction> {
        let mut txs = Vec::new();
        for month in 0..12 {
            txs.push(Transaction {
                date: crate::utils::advance_month_preserving_day(date("2024-01-01"), month, 1),
                description: "Sunset Apartments Rent".to_string(),
                amount: -2000.0,
                category: None,
            });
            txs.push(Transaction {
                date: crate::utils::advance_month_preserving_day(date("2024-01-05"), month, 5),
                description: "Payroll Direct Deposit".to_string(),
                amount: 4000.0,
                category: None,
            });
        }
        txs
    }

    #[test]
    fn test_evaluation_dates_spacing() {
        let txs = rent_and_income_year();
        let options = BacktestOptions {
            horizon_days: 30,
            min_history_days: 90,
            step_days: 30,
            ..Default::default()
        };
        let dates = evaluation_dates(&txs, &options);
        assert!(!dates.is_empty());
        assert!(dates.windows(2).all(|pair| (pair[1] - pair[0]).num_days() >= 30));
        // Every pick leaves a full horizon of actuals.
        assert!(dates.iter().all(|d| *d + Days::new(30) <= date("2024-12-05")));
        assert!(dates.iter().all(|d| (*d - date("2024-01-01")).num_days() >= 90));
    }

    #[test]
    fn test_backtest_scores_windows() {
        let engine = ForecastEngine::new();
        let txs = rent_and_income_year();
        let options = BacktestOptions {
            horizon_days: 30,
            min_history_days: 120,
            step_days: 60,
            method: ForecastMethod::Recurring,
            opening_balance: 10_000.0,
        };
        let report = run_backtest(&engine, &txs, &options).unwrap();
        assert!(!report.windows.is_empty());
        for window in &report.windows {
            assert!(window.history_days >= 120);
            assert!(window.daily_mae.is_finite());
            // Actuals always contain rent and income in these windows.
            assert!(window.category_actual.contains_key(&Category::Rent));
            assert!(window.category_actual.contains_key(&Category::Income));
        }
        assert!(report.mean_daily_mae.is_finite());
    }

    #[test]
    fn test_backtest_empty_input() {
        let engine = ForecastEngine::new();
        let report = run_backtest(&engine, &[], &BacktestOptions::default()).unwrap();
        assert!(report.windows.is_empty());
    }
}
