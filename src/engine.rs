use std::collections::HashSet;

use chrono::{Days, NaiveDate};
use tracing::{debug, warn};

use crate::behavior::project_behavior;
use crate::category::{categorize_cached, AliasCache, Category};
use crate::compose::compose;
use crate::config::EngineConfig;
use crate::error::{ForecastError, Result};
use crate::history::{build_ledger, category_alias_map, daily_category_series};
use crate::normalize::sanitize_transactions;
use crate::recurring::{augment_recurring, detect_recurring, project_recurring};
use crate::reconcile::apply_category_targets;
use crate::sanitize::sanitize_response;
use crate::scheduled::expand_scheduled;
use crate::schema::{
    EventKind, ForecastMethod, ForecastResponse, LedgerEntry, ProjectedEvent, ScheduledEvent,
    Transaction,
};
use crate::seasonality::seasonality_factors;
use crate::trend::{project_trend, SeasonalDecompositionModel, TrendModel};

/// The forecast engine. Stateless per invocation apart from the process-wide
/// alias cache, so a single instance can serve concurrent requests.
pub struct ForecastEngine {
    config: EngineConfig,
    alias_cache: AliasCache,
    trend_model: Option<Box<dyn TrendModel>>,
}

impl Default for ForecastEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl ForecastEngine {
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        let model = SeasonalDecompositionModel::from_config(&config);
        Self {
            config,
            alias_cache: AliasCache::new(),
            trend_model: Some(Box::new(model)),
        }
    }

    /// Engine without a trend provider: prophet-mode requests fail, hybrid
    /// degrades to recurring + behavior.
    pub fn without_trend_model() -> Self {
        Self {
            config: EngineConfig::default(),
            alias_cache: AliasCache::new(),
            trend_model: None,
        }
    }

    pub fn with_trend_model(mut self, model: Option<Box<dyn TrendModel>>) -> Self {
        self.trend_model = model;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn alias_cache(&self) -> &AliasCache {
        &self.alias_cache
    }

    /// Project a cash-flow trajectory over `horizon` days.
    ///
    /// `as_of` anchors "today"; the forecast window starts at the later of
    /// that anchor and the day after the last historical transaction.
    pub fn run_forecast(
        &self,
        opening_balance: f64,
        transactions: &[Transaction],
        scheduled: &[ScheduledEvent],
        horizon: i64,
        method: ForecastMethod,
        as_of: Option<NaiveDate>,
    ) -> Result<ForecastResponse> {
        if horizon < 1 {
            return Err(ForecastError::InvalidHorizon(horizon));
        }

        let today = as_of.unwrap_or_else(|| chrono::Local::now().date_naive());
        let sanitized = sanitize_transactions(transactions, &self.alias_cache);

        let start = sanitized
            .iter()
            .map(|tx| tx.date)
            .max()
            .map(|last| (last + Days::new(1)).max(today))
            .unwrap_or(today);

        let ledger = build_ledger(opening_balance, &sanitized);
        let history: Vec<LedgerEntry> =
            ledger.iter().filter(|e| e.date < start).cloned().collect();

        let categorize = |description: &str, amount: Option<f64>| {
            categorize_cached(&self.alias_cache, description, amount)
        };
        let scheduled_events = expand_scheduled(scheduled, start, horizon, categorize);

        let allow_recurring = method.allows_recurring();
        let allow_behavior = method.allows_behavior();
        let mut allow_trend = method.allows_trend();

        if allow_trend && self.trend_model.is_none() {
            if method == ForecastMethod::Hybrid {
                warn!("no trend model configured; falling back to recurring and behavior projections");
                allow_trend = false;
            } else {
                return Err(ForecastError::TrendModelUnavailable);
            }
        }

        let expense_history: Vec<LedgerEntry> =
            history.iter().filter(|e| e.amount < 0.0).cloned().collect();
        let factors = seasonality_factors(&expense_history);
        let aliases = category_alias_map(&history);

        let (templates, recurring_events, recurring_insights) = if allow_recurring {
            let detected = detect_recurring(&history, &self.config);
            let templates =
                augment_recurring(&history, detected, start, &aliases, &self.config);
            let (events, insights) = project_recurring(
                &templates,
                start,
                horizon,
                &factors,
                scheduled,
                categorize,
                &self.config,
            );
            (templates, events, insights)
        } else {
            (Vec::new(), Vec::new(), Vec::new())
        };
        let recurring_categories: HashSet<Category> =
            recurring_events.iter().map(|e| e.category).collect();

        let (mut behavior_events, mut behavior_insights) = if allow_behavior {
            project_behavior(
                &history,
                &templates,
                start,
                horizon,
                &factors,
                &aliases,
                &self.config,
            )
        } else {
            (Vec::new(), Vec::new())
        };

        let (trend_events, trend_insights) = if allow_trend {
            let model = self.trend_model.as_deref().expect("trend model present");
            let series_map = daily_category_series(&history, &self.config);
            project_trend(
                &series_map,
                &recurring_categories,
                start,
                horizon,
                &factors,
                &aliases,
                model,
                &self.config,
            )
        } else {
            (Vec::new(), Vec::new())
        };

        // In hybrid mode the trend projector wins any category it covered.
        if !trend_events.is_empty() && !behavior_events.is_empty() {
            let trend_categories: HashSet<Category> =
                trend_events.iter().map(|e| e.category).collect();
            behavior_events.retain(|e| !trend_categories.contains(&e.category));
            behavior_insights.retain(|i| !trend_categories.contains(&i.category));
        }

        let mut habits = recurring_insights;
        habits.extend(behavior_insights);
        habits.extend(trend_insights);

        let mut events: Vec<ProjectedEvent> = Vec::new();
        for entry in &ledger {
            events.push(ProjectedEvent {
                date: entry.date,
                amount: entry.amount,
                category: entry.category,
                description: entry.description.clone(),
                kind: EventKind::Historical,
                source: None,
                balance: None,
            });
        }
        events.extend(scheduled_events);
        events.extend(recurring_events);
        events.extend(behavior_events);
        events.extend(trend_events);

        apply_category_targets(&mut events, &history, start, horizon, &self.config);

        debug!(
            events = events.len(),
            habits = habits.len(),
            start = %start,
            horizon,
            "forecast composed"
        );

        let mut response = compose(
            opening_balance,
            events,
            habits,
            start,
            horizon,
            method.as_str(),
        );
        sanitize_response(&mut response);
        Ok(response)
    }
}

/// Convenience wrapper over a fresh engine with default configuration.
pub fn run_forecast(
    opening_balance: f64,
    transactions: &[Transaction],
    scheduled: &[ScheduledEvent],
    horizon: i64,
    method: ForecastMethod,
    as_of: Option<NaiveDate>,
) -> Result<ForecastResponse> {
    ForecastEngine::new().run_forecast(
        opening_balance,
        transactions,
        scheduled,
        horizon,
        method,
        as_of,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::advance_month_preserving_day;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn tx(date_str: &str, description: &str, amount: f64) -> Transaction {
        Transaction {
            date: date(date_str),
            description: description.to_string(),
            amount,
            category: None,
        }
    }

    #[test]
    fn test_empty_transactions_flat_balance() {
        let engine = ForecastEngine::new();
        let response = engine
            .run_forecast(1500.0, &[], &[], 30, ForecastMethod::Prophet, Some(date("2025-01-02")))
            .unwrap();
        assert_eq!(response.forecast.len(), 30);
        assert!(response
            .forecast
            .iter()
            .all(|d| (d.balance - 1500.0).abs() < 1e-9));
        assert_eq!(response.summary.method, "prophet");
        assert!((response.summary.net_change).abs() < 1e-9);
    }

    #[test]
    fn test_invalid_horizon() {
        let engine = ForecastEngine::new();
        let result = engine.run_forecast(0.0, &[], &[], 0, ForecastMethod::Prophet, None);
        assert!(matches!(result, Err(ForecastError::InvalidHorizon(0))));
    }

    #[test]
    fn test_start_date_follows_history() {
        let engine = ForecastEngine::new();
        let txs = vec![tx("2025-02-10", "Groceries Kroger", -80.0)];
        let response = engine
            .run_forecast(100.0, &txs, &[], 10, ForecastMethod::Recurring, Some(date("2025-01-02")))
            .unwrap();
        // History extends past "today": the window starts after it.
        assert!(response
            .transactions
            .iter()
            .filter(|e| e.kind == EventKind::Forecast)
            .all(|e| e.date >= date("2025-02-11")));
    }

    #[test]
    fn test_single_transaction_no_projections() {
        let engine = ForecastEngine::new();
        let txs = vec![tx("2024-12-20", "Corner Cafe", -12.0)];
        let response = engine
            .run_forecast(500.0, &txs, &[], 30, ForecastMethod::Hybrid, Some(date("2025-01-02")))
            .unwrap();
        assert!(response
            .transactions
            .iter()
            .all(|e| e.kind != EventKind::Forecast));
        assert!(response.habits.is_empty());
    }

    #[test]
    fn test_prophet_mode_without_model_errors() {
        let engine = ForecastEngine::without_trend_model();
        let txs = vec![tx("2024-12-20", "Corner Cafe", -12.0)];
        let result = engine.run_forecast(
            500.0,
            &txs,
            &[],
            30,
            ForecastMethod::Prophet,
            Some(date("2025-01-02")),
        );
        assert!(matches!(result, Err(ForecastError::TrendModelUnavailable)));
    }

    #[test]
    fn test_hybrid_mode_without_model_degrades() {
        let engine = ForecastEngine::without_trend_model();
        let txs: Vec<Transaction> = (0..12)
            .map(|i| Transaction {
                date: advance_month_preserving_day(date("2024-01-01"), i, 1),
                description: "Sunset Apartments Rent".to_string(),
                amount: -2000.0,
                category: None,
            })
            .collect();
        let response = engine
            .run_forecast(
                5000.0,
                &txs,
                &[],
                60,
                ForecastMethod::Hybrid,
                Some(date("2025-01-02")),
            )
            .unwrap();
        assert_eq!(response.summary.method, "hybrid");
        assert!(!response.habits.is_empty());
        assert!(response
            .habits
            .iter()
            .all(|h| h.source != crate::schema::ProjectionSource::Trend));
    }

    #[test]
    fn test_baseline_mode_emits_no_projections() {
        let engine = ForecastEngine::new();
        let txs: Vec<Transaction> = (0..12)
            .map(|i| Transaction {
                date: advance_month_preserving_day(date("2024-01-01"), i, 1),
                description: "Sunset Apartments Rent".to_string(),
                amount: -2000.0,
                category: None,
            })
            .collect();
        let response = engine
            .run_forecast(
                5000.0,
                &txs,
                &[],
                30,
                ForecastMethod::Baseline,
                Some(date("2025-01-02")),
            )
            .unwrap();
        assert!(response
            .transactions
            .iter()
            .all(|e| e.kind == EventKind::Historical));
        assert!(response.habits.is_empty());
    }

    #[test]
    fn test_alias_cache_learns_across_requests() {
        let engine = ForecastEngine::new();
        let txs = vec![tx("2024-12-20", "Kroger #42", -80.0)];
        engine
            .run_forecast(0.0, &txs, &[], 10, ForecastMethod::Recurring, Some(date("2025-01-02")))
            .unwrap();
        assert!(engine.alias_cache().len() > 0);
        assert_eq!(
            engine.alias_cache().lookup("kroger 42", Some(-10.0)),
            Some(Category::Groceries)
        );
    }
}
