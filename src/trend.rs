use std::collections::{BTreeMap, HashSet};

use chrono::{Datelike, Days, NaiveDate};
use serde_json::json;
use tracing::debug;

use crate::category::Category;
use crate::config::EngineConfig;
use crate::history::{display_name, CategoryAliases, DailySeries};
use crate::schema::{
    EventKind, FlowKind, HabitInsight, ProjectedEvent, ProjectionSource,
};
use crate::seasonality::{seasonal_adjust, SeasonalityFactors};
use crate::utils::{
    last_day_of_month, mean, median, percentile, round2, weekday_index,
};

/// Pluggable daily time-series forecaster. `fit_predict` returns one value
/// per future day starting the day after the series ends, or `None` when the
/// fit fails; failures are recovered locally by skipping the category.
pub trait TrendModel: Send + Sync {
    fn name(&self) -> &'static str;
    fn fit_predict(&self, series: &DailySeries, periods: usize) -> Option<Vec<f64>>;
}

/// Flat-growth multiplicative seasonal decomposition: an exponentially
/// smoothed level carried forward flat, modulated by weekly, day-of-month,
/// biweekly, and (for long histories) quarterly profiles. The level
/// smoothing factor adapts upward for volatile or short histories, mirroring
/// changepoint-scale raising in heavier trend models.
#[derive(Debug, Clone)]
pub struct SeasonalDecompositionModel {
    pub base_smoothing: f64,
    pub high_variance_smoothing: f64,
    pub variance_ratio_threshold: f64,
    pub short_history_days: i64,
    pub quarterly_span_days: i64,
}

impl Default for SeasonalDecompositionModel {
    fn default() -> Self {
        let config = EngineConfig::default();
        Self::from_config(&config)
    }
}

impl SeasonalDecompositionModel {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            base_smoothing: config.trend_base_smoothing,
            high_variance_smoothing: config.trend_high_variance_smoothing,
            variance_ratio_threshold: config.trend_variance_ratio_threshold,
            short_history_days: config.trend_short_history_days,
            quarterly_span_days: config.trend_quarterly_span_days,
        }
    }

    fn variance_ratio(values: &[f64]) -> f64 {
        let window = 30usize.min(values.len()).max(1);
        let mut stds = Vec::with_capacity(values.len());
        let mut means = Vec::with_capacity(values.len());
        for i in 0..values.len() {
            let from = i.saturating_sub(window - 1);
            let slice = &values[from..=i];
            means.push(mean(slice));
            stds.push(crate::utils::sample_std(slice));
        }
        let std_med = median(&stds);
        let mean_med = median(&means);
        std_med.abs() / mean_med.abs().max(1.0)
    }

    /// Group-mean factor relative to the overall mean, shrunk toward 1.0 for
    /// sparsely observed bins and bounded to keep products stable.
    fn factor(sum: f64, count: usize, overall_mean: f64) -> f64 {
        if count == 0 || overall_mean.abs() < 1e-9 {
            return 1.0;
        }
        let raw = (sum / count as f64) / overall_mean;
        let shrunk = if count < 3 {
            1.0 + (raw - 1.0) * count as f64 / 3.0
        } else {
            raw
        };
        shrunk.clamp(0.0, 8.0)
    }
}

impl TrendModel for SeasonalDecompositionModel {
    fn name(&self) -> &'static str {
        "seasonal_decomposition"
    }

    fn fit_predict(&self, series: &DailySeries, periods: usize) -> Option<Vec<f64>> {
        if series.is_empty() || periods == 0 {
            return None;
        }
        let dates: Vec<NaiveDate> = series.keys().copied().collect();
        let values: Vec<f64> = series.values().copied().collect();
        if values.iter().map(|v| v.abs()).sum::<f64>() < 1e-6 {
            return None;
        }

        let first = dates[0];
        let last = *dates.last()?;
        let span_days = (last - first).num_days() + 1;
        let overall_mean = mean(&values);
        if overall_mean.abs() < 1e-9 {
            return None;
        }

        let ratio = Self::variance_ratio(&values);
        let alpha = if ratio > self.variance_ratio_threshold || span_days < self.short_history_days
        {
            self.high_variance_smoothing
        } else {
            self.base_smoothing
        };

        let mut level = values[0];
        for value in &values[1..] {
            level = alpha * value + (1.0 - alpha) * level;
        }

        let mut weekly = [(0.0f64, 0usize); 7];
        let mut monthly = [(0.0f64, 0usize); 31];
        let mut biweekly = [(0.0f64, 0usize); 2];
        let mut quarterly = [(0.0f64, 0usize); 13];
        for (date, value) in dates.iter().zip(values.iter()) {
            let offset = (*date - first).num_days();
            let w = weekday_index(*date) as usize;
            weekly[w].0 += value;
            weekly[w].1 += 1;
            let d = (date.day() - 1) as usize;
            monthly[d].0 += value;
            monthly[d].1 += 1;
            let b = ((offset / 7) % 2) as usize;
            biweekly[b].0 += value;
            biweekly[b].1 += 1;
            let q = ((offset % 91) / 7) as usize;
            quarterly[q].0 += value;
            quarterly[q].1 += 1;
        }
        let use_quarterly = span_days > self.quarterly_span_days;

        let mut predictions = Vec::with_capacity(periods);
        for i in 0..periods {
            let date = last + Days::new(i as u64 + 1);
            let offset = (date - first).num_days();
            let w = weekday_index(date) as usize;
            let d = (date.day() - 1) as usize;
            let b = ((offset / 7) % 2) as usize;
            let q = ((offset % 91) / 7) as usize;

            let mut value = level;
            value *= Self::factor(weekly[w].0, weekly[w].1, overall_mean);
            value *= Self::factor(monthly[d].0, monthly[d].1, overall_mean);
            value *= Self::factor(biweekly[b].0, biweekly[b].1, overall_mean);
            if use_quarterly {
                value *= Self::factor(quarterly[q].0, quarterly[q].1, overall_mean);
            }
            predictions.push(if value.is_finite() { value } else { 0.0 });
        }

        Some(predictions)
    }
}

struct SnapPreferences {
    day_of_month: Option<u32>,
    weekday: Option<u32>,
}

/// A day-of-month or weekday is dominant when the modal value covers at
/// least 35% of the nonzero observations (and at least three of them).
fn snap_preferences(window: &DailySeries) -> SnapPreferences {
    let nonzero: Vec<NaiveDate> = window
        .iter()
        .filter(|(_, v)| v.abs() > 1e-6)
        .map(|(d, _)| *d)
        .collect();
    let mut prefs = SnapPreferences {
        day_of_month: None,
        weekday: None,
    };
    if nonzero.len() < 3 {
        return prefs;
    }

    let mut dom_counts: BTreeMap<u32, usize> = BTreeMap::new();
    let mut weekday_counts: BTreeMap<u32, usize> = BTreeMap::new();
    for date in &nonzero {
        *dom_counts.entry(date.day()).or_default() += 1;
        *weekday_counts.entry(weekday_index(*date)).or_default() += 1;
    }
    let needed = ((nonzero.len() as f64) * 0.35).ceil() as usize;

    if let Some((dom, count)) = dom_counts
        .iter()
        .max_by_key(|(dom, count)| (**count, std::cmp::Reverse(**dom)))
    {
        if *count >= 3usize.max(needed) {
            prefs.day_of_month = Some(*dom);
        }
    }
    if let Some((weekday, count)) = weekday_counts
        .iter()
        .max_by_key(|(weekday, count)| (**count, std::cmp::Reverse(**weekday)))
    {
        if *count >= 3usize.max(needed) {
            prefs.weekday = Some(*weekday);
        }
    }
    prefs
}

fn snap_events(
    events: Vec<ProjectedEvent>,
    prefs: &SnapPreferences,
    start: NaiveDate,
    end: NaiveDate,
) -> Vec<ProjectedEvent> {
    if prefs.day_of_month.is_none() && prefs.weekday.is_none() {
        return events;
    }
    let last_day = end - Days::new(1);
    let mut used: HashSet<NaiveDate> = HashSet::new();
    let mut snapped = Vec::with_capacity(events.len());

    for mut event in events {
        let mut candidate = event.date;

        if let Some(dom) = prefs.day_of_month {
            let clamped = dom.min(last_day_of_month(candidate.year(), candidate.month()).day());
            candidate = NaiveDate::from_ymd_opt(candidate.year(), candidate.month(), clamped)
                .unwrap_or(candidate);
        }
        if let Some(weekday) = prefs.weekday {
            let diff = (weekday as i64 - weekday_index(candidate) as i64).rem_euclid(7);
            candidate = if diff <= 3 {
                candidate + Days::new(diff as u64)
            } else {
                candidate - Days::new((7 - diff) as u64)
            };
        }

        if candidate < start {
            candidate = start;
        }
        if candidate > last_day {
            candidate = last_day;
        }
        while used.contains(&candidate) && candidate < last_day {
            candidate = candidate + Days::new(1);
        }

        used.insert(candidate);
        event.date = candidate;
        snapped.push(event);
    }

    snapped.sort_by_key(|e| e.date);
    snapped
}

/// Per-category trend forecast with growth caps and plausibility filters.
/// Categories already covered by recurrences are left to that projector.
#[allow(clippy::too_many_arguments)]
pub fn project_trend(
    series_map: &BTreeMap<Category, DailySeries>,
    recurring_categories: &HashSet<Category>,
    start: NaiveDate,
    horizon: i64,
    factors: &SeasonalityFactors,
    aliases: &CategoryAliases,
    model: &dyn TrendModel,
    config: &EngineConfig,
) -> (Vec<ProjectedEvent>, Vec<HabitInsight>) {
    let mut events = Vec::new();
    let mut insights = Vec::new();
    if series_map.is_empty() || horizon <= 0 {
        return (events, insights);
    }
    let end = start + Days::new(horizon as u64);

    let mut ranked: Vec<(&Category, &DailySeries)> = series_map.iter().collect();
    ranked.sort_by(|a, b| {
        let total_a: f64 = a.1.values().map(|v| v.abs()).sum();
        let total_b: f64 = b.1.values().map(|v| v.abs()).sum();
        total_b
            .partial_cmp(&total_a)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(b.0))
    });
    ranked.truncate(config.max_statistical_categories);

    for (category, series) in ranked {
        let category = *category;
        if recurring_categories.contains(&category) {
            continue;
        }
        if EngineConfig::is_skip_category(category) {
            continue;
        }

        let window: DailySeries = if series.len() > config.statistical_recent_window_days {
            series
                .iter()
                .rev()
                .take(config.statistical_recent_window_days)
                .map(|(d, v)| (*d, *v))
                .collect()
        } else {
            series.clone()
        };

        let window_total_abs: f64 = window.values().map(|v| v.abs()).sum();
        if window_total_abs < config.min_total_amount {
            continue;
        }

        let recent: DailySeries = if window.len() > config.statistical_recent_total_days {
            window
                .iter()
                .rev()
                .take(config.statistical_recent_total_days)
                .map(|(d, v)| (*d, *v))
                .collect()
        } else {
            window.clone()
        };
        let recent_nonzero = recent.values().filter(|v| v.abs() > 1e-6).count();
        if recent_nonzero < config.statistical_min_recent_nonzero {
            continue;
        }

        let negative_days: Vec<(NaiveDate, f64)> = recent
            .iter()
            .filter(|(_, v)| **v < 0.0)
            .map(|(d, v)| (*d, *v))
            .collect();
        if negative_days.is_empty() {
            continue;
        }
        let neg_first = negative_days.first().map(|(d, _)| *d).unwrap_or(start);
        let neg_last = negative_days.last().map(|(d, _)| *d).unwrap_or(start);
        let neg_span = ((neg_last - neg_first).num_days() + 1).max(1);
        let neg_abs_sum: f64 = negative_days.iter().map(|(_, v)| v.abs()).sum();
        let recent_total_abs = neg_abs_sum / neg_span as f64 * horizon.max(1) as f64;
        if recent_total_abs < config.statistical_min_recent_total {
            continue;
        }

        let net_amount: f64 = window.values().sum();
        if net_amount >= -1.0 {
            // No meaningful net outflow to extrapolate.
            continue;
        }

        let series_last = *series.keys().next_back().expect("non-empty series");
        let gap = (start - (series_last + Days::new(1))).num_days().max(0);
        let periods = (horizon + gap) as usize;
        let Some(predictions) = model.fit_predict(series, periods) else {
            debug!(category = %category, "trend model fit failed; category skipped");
            continue;
        };
        if predictions.len() < periods {
            continue;
        }

        let neg_mass: f64 = series.values().filter(|v| **v < 0.0).map(|v| v.abs()).sum();
        let pos_mass: f64 = series.values().filter(|v| **v > 0.0).copied().sum();
        let is_expense = neg_mass >= pos_mass.max(1.0);

        // Trimmed magnitude statistics drive thresholds, clamps, and floors.
        let finite_abs: Vec<f64> = window
            .values()
            .map(|v| v.abs())
            .filter(|v| *v > 0.0)
            .collect();
        if finite_abs.is_empty() {
            continue;
        }
        let p95 = percentile(&finite_abs, 95.0);
        let trimmed: Vec<f64> = if p95 > 0.0 {
            let kept: Vec<f64> = finite_abs.iter().copied().filter(|v| *v <= p95).collect();
            if kept.is_empty() {
                finite_abs.clone()
            } else {
                kept
            }
        } else {
            finite_abs.clone()
        };
        let median_abs = median(&trimmed);
        let mean_abs = mean(&trimmed);
        let p90 = percentile(&trimmed, 90.0);

        let threshold = (median_abs * 0.15).max(mean_abs * 0.1).max(0.5);
        let baseline_scale = median_abs.max(mean_abs).max(1.0);
        let growth_cap = baseline_scale * config.statistical_max_growth_ratio;
        let clamp_limit = baseline_scale.max(p90.min(growth_cap));
        let floor_limit = (median_abs * config.statistical_floor_ratio).max(0.5);

        let display = display_name(aliases, category);
        let mut category_events: Vec<ProjectedEvent> = Vec::new();
        for (i, raw) in predictions[gap as usize..periods].iter().enumerate() {
            let date = start + Days::new(i as u64);
            let mut value = *raw;
            if is_expense {
                value = -value.abs();
            } else if value < 0.0 {
                value = 0.0;
            }
            let adjusted = seasonal_adjust(value, category, date, factors, config);
            if adjusted.abs() < threshold {
                continue;
            }
            let magnitude = adjusted.abs().min(clamp_limit);
            if magnitude < floor_limit {
                continue;
            }
            category_events.push(ProjectedEvent {
                date,
                amount: if adjusted > 0.0 { magnitude } else { -magnitude },
                category,
                description: format!("{display} trend forecast"),
                kind: EventKind::Forecast,
                source: Some(ProjectionSource::Trend),
                balance: None,
            });
        }

        if category_events.is_empty() {
            continue;
        }

        let predicted_total: f64 = category_events.iter().map(|e| e.amount.abs()).sum();
        let baseline_total =
            baseline_scale * (category_events.len() as i64).min(horizon).max(1) as f64;
        let cap_basis = recent_total_abs.max(baseline_total).max(1.0);
        let total_cap = cap_basis * config.statistical_total_growth_ratio;
        if predicted_total > total_cap {
            let shrink = total_cap / predicted_total;
            if shrink < 0.35 {
                debug!(category = %category, "trend projection dropped by growth cap");
                continue;
            }
            for event in &mut category_events {
                event.amount *= shrink;
            }
        }

        let prefs = snap_preferences(&window);
        let category_events = snap_events(category_events, &prefs, start, end);
        if category_events.is_empty() {
            continue;
        }

        let horizon_total: f64 = category_events.iter().map(|e| e.amount).sum();
        let first_date = category_events
            .iter()
            .map(|e| e.date)
            .min()
            .expect("non-empty events");
        let average_amount = horizon_total.abs() / category_events.len().max(1) as f64;
        let non_zero_days = series.values().filter(|v| v.abs() > 1e-6).count();
        let alias_meta = aliases.get(&category).map(|alias| {
            json!({
                "primary": { "label": alias.primary.label, "share": alias.primary.share },
                "total_spend": alias.total_spend,
            })
        });

        insights.push(HabitInsight {
            label: format!("{display} trend"),
            category,
            kind: FlowKind::Expense,
            pattern: "prophet".to_string(),
            average_amount: round2(average_amount),
            average_weekly_spend: None,
            average_horizon_total: Some(round2(horizon_total.abs())),
            variance: None,
            next_date: Some(first_date.format("%Y-%m-%d").to_string()),
            source: ProjectionSource::Trend,
            detail: format!(
                "Trend projection for {display} • approx ${average_amount:.2} per active day"
            ),
            meta: json!({
                "model": model.name(),
                "history_days": series.len(),
                "non_zero_days": non_zero_days,
                "alias": alias_meta,
            }),
        });
        events.extend(category_events);
    }

    events.sort_by_key(|e| e.date);
    (events, insights)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::{build_ledger, daily_category_series};
    use crate::schema::Transaction;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn grocery_series(weeks: u64) -> BTreeMap<Category, DailySeries> {
        let txs: Vec<Transaction> = (0..weeks)
            .map(|i| Transaction {
                date: date("2024-06-01") + Days::new(i * 7),
                description: "Safeway".to_string(),
                amount: -120.0 - (i % 3) as f64 * 10.0,
                category: Some(Category::Groceries),
            })
            .collect();
        let ledger = build_ledger(0.0, &txs);
        daily_category_series(&ledger, &EngineConfig::default())
    }

    #[test]
    fn test_model_projects_weekly_rhythm() {
        let series_map = grocery_series(30);
        let series = series_map.get(&Category::Groceries).unwrap();
        let model = SeasonalDecompositionModel::default();
        let predictions = model.fit_predict(series, 28).unwrap();
        assert_eq!(predictions.len(), 28);
        // Spending concentrates on one weekday, so the strongest predicted
        // day should dwarf the weakest.
        let max = predictions.iter().fold(f64::MIN, |a, b| a.max(b.abs()));
        let total: f64 = predictions.iter().map(|v| v.abs()).sum();
        assert!(max > 0.0);
        assert!(total > 0.0);
        assert!(max > total / 28.0);
    }

    #[test]
    fn test_model_rejects_empty_and_flat() {
        let model = SeasonalDecompositionModel::default();
        assert!(model.fit_predict(&DailySeries::new(), 10).is_none());
        let mut flat = DailySeries::new();
        for i in 0..40 {
            flat.insert(date("2024-06-01") + Days::new(i), 0.0);
        }
        assert!(model.fit_predict(&flat, 10).is_none());
    }

    #[test]
    fn test_project_trend_emits_expense_events() {
        let series_map = grocery_series(30);
        let start = date("2024-12-29");
        let (events, insights) = project_trend(
            &series_map,
            &HashSet::new(),
            start,
            30,
            &SeasonalityFactors::new(),
            &CategoryAliases::new(),
            &SeasonalDecompositionModel::default(),
            &EngineConfig::default(),
        );
        assert!(!events.is_empty());
        assert!(events.iter().all(|e| e.amount < 0.0));
        assert!(events
            .iter()
            .all(|e| e.date >= start && e.date < start + Days::new(30)));
        assert!(events
            .iter()
            .all(|e| e.source == Some(ProjectionSource::Trend)));
        assert_eq!(insights.len(), 1);
        assert_eq!(insights[0].pattern, "prophet");
    }

    #[test]
    fn test_recurring_categories_are_skipped() {
        let series_map = grocery_series(30);
        let mut covered = HashSet::new();
        covered.insert(Category::Groceries);
        let (events, insights) = project_trend(
            &series_map,
            &covered,
            date("2024-12-29"),
            30,
            &SeasonalityFactors::new(),
            &CategoryAliases::new(),
            &SeasonalDecompositionModel::default(),
            &EngineConfig::default(),
        );
        assert!(events.is_empty());
        assert!(insights.is_empty());
    }

    #[test]
    fn test_total_cap_bounds_projection() {
        let series_map = grocery_series(30);
        let config = EngineConfig::default();
        let (events, _) = project_trend(
            &series_map,
            &HashSet::new(),
            date("2024-12-29"),
            30,
            &SeasonalityFactors::new(),
            &CategoryAliases::new(),
            &SeasonalDecompositionModel::default(),
            &config,
        );
        let series = series_map.get(&Category::Groceries).unwrap();
        let recent_daily: f64 =
            series.values().map(|v| v.abs()).sum::<f64>() / series.len() as f64;
        let predicted: f64 = events.iter().map(|e| e.amount.abs()).sum();
        // Never more than 1.35x a generous recent-rate estimate.
        assert!(predicted <= recent_daily * 30.0 * config.statistical_total_growth_ratio * 1.5);
    }

    #[test]
    fn test_income_series_not_modeled() {
        let txs: Vec<Transaction> = (0..30)
            .map(|i| Transaction {
                date: date("2024-06-01") + Days::new(i * 7),
                description: "Payroll".to_string(),
                amount: 1500.0,
                category: Some(Category::Income),
            })
            .collect();
        let ledger = build_ledger(0.0, &txs);
        let series_map = daily_category_series(&ledger, &EngineConfig::default());
        let (events, _) = project_trend(
            &series_map,
            &HashSet::new(),
            date("2024-12-29"),
            30,
            &SeasonalityFactors::new(),
            &CategoryAliases::new(),
            &SeasonalDecompositionModel::default(),
            &EngineConfig::default(),
        );
        assert!(events.is_empty());
    }
}
