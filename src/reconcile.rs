use std::collections::BTreeMap;

use chrono::{Days, NaiveDate};
use tracing::warn;

use crate::category::Category;
use crate::config::{EngineConfig, Polarity, ReconcileRule};
use crate::schema::{EventKind, LedgerEntry, ProjectedEvent, ProjectionSource};
use crate::utils::{mean, median, month_start, percentile};

/// Estimate the plausible total flow for a category over the horizon from
/// historical rhythm: median of recent monthly totals, cross-checked with a
/// recent daily rate and a median-gap event projection, pushed toward the
/// optimistic side for income and the conservative side for expenses.
pub fn expected_total(
    history: &[LedgerEntry],
    category: Category,
    horizon: i64,
    polarity: Polarity,
) -> Option<f64> {
    let rows: Vec<&LedgerEntry> = history
        .iter()
        .filter(|e| e.category == category)
        .filter(|e| match polarity {
            Polarity::Positive => e.amount > 1e-6,
            Polarity::Negative => e.amount < -1e-6,
            Polarity::Any => e.amount.abs() > 1e-6,
        })
        .collect();
    if rows.is_empty() {
        return None;
    }

    let first = rows.iter().map(|e| e.date).min()?;
    let last = rows.iter().map(|e| e.date).max()?;

    let mut monthly: BTreeMap<NaiveDate, f64> = BTreeMap::new();
    for row in &rows {
        *monthly.entry(month_start(row.date)).or_insert(0.0) += row.amount;
    }
    let monthly_totals: Vec<f64> = monthly
        .values()
        .copied()
        .filter(|v| v.abs() > 1e-6)
        .collect();

    let monthly_baseline = if !monthly_totals.is_empty() {
        let window = &monthly_totals[monthly_totals.len().saturating_sub(6)..];
        median(window)
    } else {
        let aggregate: f64 = rows.iter().map(|e| e.amount).sum();
        let months = (rows.len() as f64 / 4.0).max(1.0);
        aggregate / months
    };

    let horizon_scale = (horizon as f64 / 30.0).max(0.5);
    let mut candidates = vec![monthly_baseline * horizon_scale];

    let lookback_days = (horizon * 2).max(90);
    let recent_cutoff = last - Days::new(lookback_days as u64);
    let recent: Vec<&&LedgerEntry> = rows.iter().filter(|e| e.date >= recent_cutoff).collect();
    if !recent.is_empty() {
        let recent_first = recent.iter().map(|e| e.date).min().unwrap_or(last);
        let recent_span = ((last - recent_first).num_days() + 1).max(1);
        let recent_sum: f64 = recent.iter().map(|e| e.amount).sum();
        candidates.push(recent_sum / recent_span as f64 * horizon as f64);

        let diffs: Vec<f64> = recent
            .windows(2)
            .map(|pair| (pair[1].date - pair[0].date).num_days() as f64)
            .collect();
        if !diffs.is_empty() {
            let median_gap = median(&diffs).max(1.0);
            let projected_events = ((horizon as f64 / median_gap).ceil() as i64).max(1);
            let amounts: Vec<f64> = recent.iter().map(|e| e.amount).collect();
            candidates.push(median(&amounts) * projected_events as f64);
        }
    }

    let total_span = ((last - first).num_days() + 1).max(1);
    let total_sum: f64 = rows.iter().map(|e| e.amount).sum();
    candidates.push(total_sum / total_span as f64 * horizon as f64);

    let candidates: Vec<f64> = candidates
        .into_iter()
        .filter(|v| v.is_finite() && v.abs() > 1e-6)
        .collect();
    if candidates.is_empty() {
        return None;
    }

    let mut baseline = median(&candidates);
    match polarity {
        Polarity::Positive => {
            if candidates.len() > 1 {
                baseline = baseline.max(percentile(&candidates, 70.0));
            }
        }
        Polarity::Negative => {
            if candidates.len() > 1 {
                baseline = baseline.min(percentile(&candidates, 30.0));
            }
        }
        Polarity::Any => {}
    }

    Some(baseline)
}

/// The `other` bucket has no stable cadence; fall back to a damped average
/// of its recent monthly means.
fn other_fallback_target(history: &[LedgerEntry], start: NaiveDate, horizon: i64) -> Option<f64> {
    let recent_cutoff = start - Days::new(120);
    let rows: Vec<&LedgerEntry> = history
        .iter()
        .filter(|e| e.category == Category::Other)
        .filter(|e| e.date >= recent_cutoff && e.date < start)
        .collect();
    if rows.is_empty() {
        return None;
    }

    let mut monthly: BTreeMap<NaiveDate, Vec<f64>> = BTreeMap::new();
    for row in &rows {
        monthly.entry(month_start(row.date)).or_default().push(row.amount);
    }
    let means: Vec<f64> = monthly.values().map(|amounts| mean(amounts)).collect();
    if means.is_empty() {
        return None;
    }
    let window = &means[means.len().saturating_sub(3)..];
    Some(mean(window) * (horizon as f64 / 30.0).max(0.5) * 0.5)
}

fn capped_event_amount(
    history: &[LedgerEntry],
    category: Category,
    start: NaiveDate,
    total: f64,
    events_count: usize,
    config: &EngineConfig,
) -> f64 {
    if events_count == 0 || total == 0.0 {
        return 0.0;
    }

    let recent_cutoff = start - Days::new(120);
    let recent_total_abs: f64 = history
        .iter()
        .filter(|e| e.category == category)
        .filter(|e| e.date >= recent_cutoff && e.date < start)
        .map(|e| e.amount.abs())
        .sum();

    let raw = total / events_count as f64;
    let cap_basis = total.abs().max(recent_total_abs).max(1.0);
    let max_allowed = cap_basis * config.reconciliation_max_injection_multiplier;
    let capped = total.signum() * raw.abs().min(max_allowed);

    if raw.abs() > capped.abs() + 1e-9 {
        warn!(
            category = %category,
            raw = raw,
            capped = capped,
            limit = max_allowed,
            "reconciliation injection capped"
        );
    }

    capped
}

fn inject_events(
    events: &mut Vec<ProjectedEvent>,
    history: &[LedgerEntry],
    rule: &ReconcileRule,
    start: NaiveDate,
    horizon: i64,
    total: f64,
    description: String,
    config: &EngineConfig,
) {
    let interval = rule.interval_days.max(1);
    let estimated = ((horizon as f64 / interval as f64).ceil() as usize).max(1);
    let num_events = estimated.min(rule.max_events.max(1)).max(1);
    let per_event = capped_event_amount(history, rule.category, start, total, num_events, config);

    for idx in 0..num_events {
        let day_offset = (idx as i64 * interval).min((horizon - 1).max(0));
        events.push(ProjectedEvent {
            date: start + Days::new(day_offset as u64),
            amount: per_event,
            category: rule.category,
            description: description.clone(),
            kind: EventKind::Forecast,
            source: Some(ProjectionSource::Reconciliation),
            balance: None,
        });
    }
}

/// Enforce per-category macro plausibility over the forecast events: scale
/// what exists toward the target, and inject capped adjustment events when
/// scaling cannot close the gap.
pub fn apply_category_targets(
    events: &mut Vec<ProjectedEvent>,
    history: &[LedgerEntry],
    start: NaiveDate,
    horizon: i64,
    config: &EngineConfig,
) {
    if history.is_empty() {
        return;
    }
    let has_forecast = events
        .iter()
        .any(|e| e.kind == EventKind::Forecast && e.date >= start);
    if !has_forecast {
        return;
    }

    for rule in config.reconciliation_rules() {
        let mut target = expected_total(history, rule.category, horizon, rule.polarity);
        if target.is_none() && rule.category == Category::Other {
            target = other_fallback_target(history, start, horizon);
        }
        let Some(target) = target else {
            continue;
        };
        if target.abs() < rule.min_abs {
            continue;
        }

        let indexes: Vec<usize> = events
            .iter()
            .enumerate()
            .filter(|(_, e)| {
                e.kind == EventKind::Forecast && e.date >= start && e.category == rule.category
            })
            .map(|(i, _)| i)
            .collect();
        let mut predicted: f64 = indexes.iter().map(|i| events[*i].amount).sum();

        if !indexes.is_empty() && predicted * target < 0.0 {
            for i in &indexes {
                events[*i].amount = 0.0;
            }
            predicted = 0.0;
        }

        let required = target.abs() * rule.satisfied_ratio;
        if predicted * target > 0.0 && predicted.abs() >= required {
            continue;
        }

        if predicted.abs() < 1e-6 {
            if !indexes.is_empty() {
                let per_entry = target / indexes.len() as f64;
                for i in &indexes {
                    events[*i].amount = per_entry;
                }
            } else {
                let description = format!("{} baseline adjustment", rule.category.title());
                inject_events(events, history, &rule, start, horizon, target, description, config);
            }
            continue;
        }

        let mut scale = target / predicted;
        if rule.only_increase {
            let adjusted = predicted * scale;
            if adjusted.abs() + 1e-6 < predicted.abs() {
                continue;
            }
        }
        scale = scale.clamp(-rule.max_scale, rule.max_scale);

        for i in &indexes {
            events[*i].amount *= scale;
        }

        let adjusted: f64 = indexes.iter().map(|i| events[*i].amount).sum();
        if adjusted * target > 0.0 && adjusted.abs() >= required {
            continue;
        }

        let residual = target - adjusted;
        if residual.abs() < 1e-6 {
            continue;
        }
        if rule.only_increase && residual * target <= 0.0 {
            continue;
        }

        let description = format!("{} reconciliation", rule.category.title());
        inject_events(events, history, &rule, start, horizon, residual, description, config);
    }
}
