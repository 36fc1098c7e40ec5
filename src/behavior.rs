use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{Datelike, Days, NaiveDate};
use serde_json::json;
use tracing::debug;

use crate::category::{declared_frequency, Category, DeclaredFrequency};
use crate::config::EngineConfig;
use crate::history::{display_name, CategoryAliases};
use crate::schema::{
    EventKind, FlowKind, HabitInsight, LedgerEntry, ProjectedEvent, ProjectionSource,
    RecurringTemplate,
};
use crate::seasonality::{seasonal_adjust, SeasonalityFactors};
use crate::utils::{
    advance_month_preserving_day, last_day_of_month, median, mode, round2, sample_std,
    weekday_index, WEEKDAY_NAMES,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cadence {
    Weekly,
    Biweekly,
    Monthly,
}

fn support_threshold(category: Category, is_income: bool, config: &EngineConfig) -> usize {
    let base = if is_income {
        config.behavior_income_min_support
    } else {
        config.behavior_min_support
    };
    if EngineConfig::is_low_support(category) {
        base.min(2)
    } else {
        base
    }
}

fn variance_within_limits(avg: f64, std: f64, is_income: bool, config: &EngineConfig) -> bool {
    if std == 0.0 {
        return true;
    }
    let multiplier = if is_income {
        config.behavior_income_spike_multiplier
    } else {
        config.behavior_spike_std_multiplier
    };
    if avg == 0.0 {
        return false;
    }
    std.abs() <= avg.abs() * multiplier
}

/// Weekdays ranked by observation count, most frequent first; ties break
/// toward the earlier weekday.
fn ranked_weekdays(dates: &[NaiveDate]) -> Vec<u32> {
    let mut counts: BTreeMap<u32, usize> = BTreeMap::new();
    for date in dates {
        *counts.entry(weekday_index(*date)).or_default() += 1;
    }
    let mut ranked: Vec<(u32, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
    ranked.into_iter().map(|(weekday, _)| weekday).collect()
}

/// Synthesize variable spending (and side income) for categories the
/// recurrence detector did not cover, driven by support, cadence, and
/// weekday preference.
pub fn project_behavior(
    history: &[LedgerEntry],
    templates: &[RecurringTemplate],
    start: NaiveDate,
    horizon: i64,
    factors: &SeasonalityFactors,
    aliases: &CategoryAliases,
    config: &EngineConfig,
) -> (Vec<ProjectedEvent>, Vec<HabitInsight>) {
    let empty = (Vec::new(), Vec::new());
    if history.is_empty() || horizon <= 0 {
        return empty;
    }

    let history_cutoff = start - Days::new(config.behavior_max_history_days as u64);
    let window: Vec<&LedgerEntry> = history.iter().filter(|e| e.date >= history_cutoff).collect();
    if window.is_empty() {
        return empty;
    }

    let recent_total_cutoff = start - Days::new(config.behavior_recent_total_days as u64);
    let mut recent_expense_totals: HashMap<Category, f64> = HashMap::new();
    let mut recent_expense_counts: HashMap<Category, usize> = HashMap::new();
    let mut recent_expense_rows: HashMap<Category, Vec<&LedgerEntry>> = HashMap::new();
    for entry in window.iter().copied().filter(|e| e.date >= recent_total_cutoff) {
        if entry.amount < -1e-6 {
            *recent_expense_totals.entry(entry.category).or_default() += entry.amount.abs();
            *recent_expense_counts.entry(entry.category).or_default() += 1;
            recent_expense_rows.entry(entry.category).or_default().push(entry);
        }
    }

    let recurring_categories: HashSet<Category> = templates.iter().map(|t| t.category).collect();
    let end = start + Days::new(horizon as u64);
    let recent_cutoff = start - Days::new(config.behavior_recent_days as u64);

    let mut full_groups: BTreeMap<Category, Vec<&LedgerEntry>> = BTreeMap::new();
    for entry in window.iter().copied() {
        full_groups.entry(entry.category).or_default().push(entry);
    }

    let staleness_limit = config.behavior_staleness_limit_days();
    let mut events: Vec<ProjectedEvent> = Vec::new();
    let mut insights: Vec<HabitInsight> = Vec::new();

    for (category, full_group) in &full_groups {
        let category = *category;
        if recurring_categories.contains(&category) {
            continue;
        }
        if EngineConfig::is_skip_category(category) {
            continue;
        }
        let Some(last_event) = full_group.iter().map(|e| e.date).max() else {
            continue;
        };
        if (start - last_event).num_days() > staleness_limit {
            continue;
        }

        let recent_group: Vec<&LedgerEntry> = full_group
            .iter()
            .copied()
            .filter(|e| e.date >= recent_cutoff)
            .collect();
        if recent_group.is_empty() && !EngineConfig::is_extended_history(category) {
            continue;
        }

        let display = display_name(aliases, category);
        let alias_meta = aliases.get(&category).map(|alias| {
            json!({
                "primary": {
                    "label": alias.primary.label,
                    "share": alias.primary.share,
                    "total": alias.primary.total,
                },
                "examples": alias
                    .entries
                    .iter()
                    .map(|e| json!({ "label": e.label, "share": e.share, "total": e.total }))
                    .collect::<Vec<_>>(),
                "total_spend": alias.total_spend,
            })
        });

        for is_income in [false, true] {
            if category == Category::Income && !is_income {
                continue;
            }

            let matches_side = |amount: f64| {
                if is_income {
                    amount > 1e-6
                } else {
                    amount < -1e-6
                }
            };
            let sign_recent: Vec<&LedgerEntry> = recent_group
                .iter()
                .copied()
                .filter(|e| matches_side(e.amount))
                .collect();
            let mut sign_full: Vec<&LedgerEntry> = full_group
                .iter()
                .copied()
                .filter(|e| matches_side(e.amount))
                .collect();
            if sign_recent.is_empty() && sign_full.is_empty() {
                continue;
            }

            let support_needed = support_threshold(category, is_income, config);
            let max_window = (support_needed * 4).max(12);
            if sign_full.len() > max_window {
                sign_full = sign_full[sign_full.len() - max_window..].to_vec();
            }

            let mut working: Vec<&LedgerEntry> = if !sign_recent.is_empty() {
                sign_recent
            } else {
                sign_full.clone()
            };
            if working.len() < support_needed
                && (EngineConfig::is_extended_history(category) || is_income)
            {
                working = sign_full.clone();
            }
            if working.len() < support_needed {
                continue;
            }

            let amounts: Vec<f64> = working.iter().map(|e| e.amount).collect();
            let avg_amount = median(&amounts);
            if avg_amount == 0.0 {
                continue;
            }
            if is_income && avg_amount <= 0.0 {
                continue;
            }
            if !is_income && avg_amount >= 0.0 {
                continue;
            }

            let std_amount = sample_std(&amounts);
            if !variance_within_limits(avg_amount, std_amount, is_income, config) {
                debug!(category = %category, "behavior rejected by spike filter");
                continue;
            }

            let dates: Vec<NaiveDate> = working.iter().map(|e| e.date).collect();
            let weekdays_order = {
                let ranked = ranked_weekdays(&dates);
                if ranked.is_empty() {
                    vec![weekday_index(start)]
                } else {
                    ranked
                }
            };
            let preferred_weekday = weekdays_order[0];

            let intervals: Vec<f64> = dates
                .windows(2)
                .map(|pair| (pair[1] - pair[0]).num_days() as f64)
                .collect();
            let median_interval = if intervals.is_empty() {
                None
            } else {
                Some(median(&intervals))
            };

            let expected = declared_frequency(category);
            let mut cadence = Cadence::Weekly;
            if let Some(interval) = median_interval {
                if interval >= 21.0 {
                    cadence = Cadence::Monthly;
                } else if interval >= 11.0 {
                    cadence = Cadence::Biweekly;
                }
            }
            if expected == Some(DeclaredFrequency::Monthly) && cadence == Cadence::Weekly {
                cadence = Cadence::Monthly;
            } else if expected == Some(DeclaredFrequency::Weekly) {
                cadence = Cadence::Weekly;
            }

            let first_date = dates.iter().min().copied().unwrap_or(start);
            let last_date = dates.iter().max().copied().unwrap_or(start);
            let total_days = (last_date - first_date).num_days().max(1);
            let weeks_observed = (total_days as f64 / 7.0).max(1.0);
            let raw_events_per_week = working.len() as f64 / weeks_observed;

            let mut category_dates: Vec<NaiveDate> = Vec::new();
            let mut append_event =
                |event_date: NaiveDate,
                 events: &mut Vec<ProjectedEvent>,
                 category_dates: &mut Vec<NaiveDate>| {
                    let amount =
                        seasonal_adjust(avg_amount, category, event_date, factors, config);
                    events.push(ProjectedEvent {
                        date: event_date,
                        amount,
                        category,
                        description: format!("{display} pattern (projected)"),
                        kind: EventKind::Forecast,
                        source: Some(ProjectionSource::Behavior),
                        balance: None,
                    });
                    category_dates.push(event_date);
                };

            let label_suffix = if is_income { "income" } else { "spending" };
            let kind = if is_income {
                FlowKind::Income
            } else {
                FlowKind::Expense
            };

            match cadence {
                Cadence::Weekly => {
                    if raw_events_per_week < 0.3 {
                        continue;
                    }
                    let events_per_week = (raw_events_per_week.ceil() as usize)
                        .clamp(1, config.behavior_max_events_per_week);

                    let mut week_start = start;
                    while week_start < end {
                        for occurrence in 0..events_per_week {
                            let weekday = weekdays_order[occurrence % weekdays_order.len()];
                            let offset = (weekday as i64 - weekday_index(week_start) as i64)
                                .rem_euclid(7);
                            let event_date = week_start + Days::new(offset as u64);
                            if event_date >= end {
                                break;
                            }
                            append_event(event_date, &mut events, &mut category_dates);
                        }
                        week_start = week_start + Days::new(7);
                    }

                    if let Some(next) = category_dates.iter().min() {
                        let preferred: Vec<&str> = weekdays_order
                            .iter()
                            .take(events_per_week.max(1).min(weekdays_order.len()))
                            .map(|w| WEEKDAY_NAMES[(*w % 7) as usize])
                            .collect();
                        let frequency_text = if events_per_week == 1 {
                            "About once per week".to_string()
                        } else {
                            format!("About {events_per_week} times per week")
                        };
                        let mut meta = json!({
                            "events_per_week": events_per_week,
                            "preferred_days": preferred,
                        });
                        if let Some(alias) = &alias_meta {
                            meta["alias"] = alias.clone();
                        }
                        insights.push(HabitInsight {
                            label: format!("{display} {label_suffix}"),
                            category,
                            kind,
                            pattern: "behavior".to_string(),
                            average_amount: round2(avg_amount.abs()),
                            average_weekly_spend: Some(round2(
                                avg_amount.abs() * events_per_week as f64,
                            )),
                            average_horizon_total: None,
                            variance: None,
                            next_date: Some(next.format("%Y-%m-%d").to_string()),
                            source: ProjectionSource::Behavior,
                            detail: format!(
                                "{frequency_text} on {} • approx ${:.2} each time",
                                preferred.join(", "),
                                avg_amount.abs()
                            ),
                            meta,
                        });
                    }
                }
                Cadence::Biweekly => {
                    let interval = median_interval.unwrap_or(14.0).round().max(14.0) as i64;
                    let mut next = last_date;
                    for _ in 0..26 {
                        next = next + Days::new(interval as u64);
                        if next < start {
                            continue;
                        }
                        let mut aligned = next;
                        if weekday_index(aligned) != preferred_weekday {
                            let delta = (preferred_weekday as i64
                                - weekday_index(aligned) as i64)
                                .rem_euclid(7);
                            aligned = aligned + Days::new(delta as u64);
                        }
                        if aligned >= end {
                            break;
                        }
                        append_event(aligned, &mut events, &mut category_dates);
                        next = aligned;
                    }

                    if let Some(next) = category_dates.iter().min() {
                        let weekday_name = WEEKDAY_NAMES[(preferred_weekday % 7) as usize];
                        let mut meta = json!({
                            "frequency": "biweekly",
                            "preferred_day": weekday_name,
                            "interval_days": interval,
                        });
                        if let Some(alias) = &alias_meta {
                            meta["alias"] = alias.clone();
                        }
                        insights.push(HabitInsight {
                            label: format!("{display} {label_suffix}"),
                            category,
                            kind,
                            pattern: "behavior".to_string(),
                            average_amount: round2(avg_amount.abs()),
                            average_weekly_spend: Some(round2(
                                avg_amount.abs() * 7.0 / interval as f64,
                            )),
                            average_horizon_total: None,
                            variance: None,
                            next_date: Some(next.format("%Y-%m-%d").to_string()),
                            source: ProjectionSource::Behavior,
                            detail: format!(
                                "Every other week on {weekday_name} • approx ${:.2} each time",
                                avg_amount.abs()
                            ),
                            meta,
                        });
                    }
                }
                Cadence::Monthly => {
                    let days_of_month: Vec<u32> = dates.iter().map(|d| d.day()).collect();
                    let preferred_day = mode(&days_of_month).unwrap_or_else(|| start.day());
                    for month_offset in 1..=18 {
                        let candidate =
                            advance_month_preserving_day(last_date, month_offset, last_date.day());
                        let month_last =
                            last_day_of_month(candidate.year(), candidate.month()).day();
                        let event_date = NaiveDate::from_ymd_opt(
                            candidate.year(),
                            candidate.month(),
                            preferred_day.min(month_last),
                        )
                        .unwrap_or(candidate);
                        if event_date < start {
                            continue;
                        }
                        if event_date >= end {
                            break;
                        }
                        append_event(event_date, &mut events, &mut category_dates);
                    }

                    if let Some(next) = category_dates.iter().min() {
                        let weekday_name =
                            WEEKDAY_NAMES[(weekday_index(category_dates[0]) % 7) as usize];
                        let avg_interval = median_interval.unwrap_or(30.0).max(1.0);
                        let mut meta = json!({
                            "frequency": "monthly",
                            "preferred_day": preferred_day,
                            "preferred_weekday": weekday_name,
                        });
                        if let Some(alias) = &alias_meta {
                            meta["alias"] = alias.clone();
                        }
                        insights.push(HabitInsight {
                            label: format!("{display} {label_suffix}"),
                            category,
                            kind,
                            pattern: "behavior".to_string(),
                            average_amount: round2(avg_amount.abs()),
                            average_weekly_spend: Some(round2(
                                avg_amount.abs() * 7.0 / avg_interval,
                            )),
                            average_horizon_total: None,
                            variance: None,
                            next_date: Some(next.format("%Y-%m-%d").to_string()),
                            source: ProjectionSource::Behavior,
                            detail: format!(
                                "Monthly around day {preferred_day} • approx ${:.2} each time",
                                avg_amount.abs()
                            ),
                            meta,
                        });
                    }
                }
            }
        }
    }

    if events.is_empty() {
        return (events, insights);
    }

    // Per-category macro guardrail on the expense side.
    let mut kept: Vec<ProjectedEvent> = Vec::new();
    let mut kept_categories: HashSet<Category> = HashSet::new();
    let mut by_category: BTreeMap<Category, Vec<ProjectedEvent>> = BTreeMap::new();
    for event in events {
        by_category.entry(event.category).or_default().push(event);
    }

    for (category, mut group) in by_category {
        let has_expenses = group.iter().any(|e| e.amount < 0.0);
        if has_expenses {
            let mut recent_total_abs = recent_expense_totals.get(&category).copied().unwrap_or(0.0);
            let recent_count = recent_expense_counts.get(&category).copied().unwrap_or(0);

            if recent_total_abs > 0.0 {
                if let Some(rows) = recent_expense_rows.get(&category) {
                    let first = rows.iter().map(|e| e.date).min();
                    let last = rows.iter().map(|e| e.date).max();
                    if let (Some(first), Some(last)) = (first, last) {
                        let span = ((last - first).num_days() + 1).max(1);
                        let total: f64 = rows.iter().map(|e| e.amount.abs()).sum();
                        recent_total_abs = total / span as f64 * horizon.max(1) as f64;
                    }
                }
            }

            if recent_count < config.behavior_min_recent_nonzero
                || recent_total_abs < config.behavior_min_recent_total
            {
                group.retain(|e| e.amount >= 0.0);
            } else {
                let expense_amounts: Vec<f64> = group
                    .iter()
                    .filter(|e| e.amount < 0.0)
                    .map(|e| e.amount.abs())
                    .collect();
                let predicted_total: f64 = expense_amounts.iter().sum();
                let median_amount = median(&expense_amounts);
                let baseline_total = median_amount
                    * (expense_amounts.len() as i64).min(horizon).max(1) as f64;
                let cap_basis = recent_total_abs.max(baseline_total).max(1.0);
                let total_cap = cap_basis * config.behavior_total_growth_ratio;
                if predicted_total > total_cap {
                    let scale = total_cap / predicted_total;
                    if scale < 0.35 {
                        debug!(category = %category, "behavior expenses dropped by growth cap");
                        group.retain(|e| e.amount >= 0.0);
                    } else {
                        for event in group.iter_mut().filter(|e| e.amount < 0.0) {
                            event.amount *= scale;
                        }
                    }
                }
            }
        }

        if group.is_empty() {
            continue;
        }
        kept_categories.insert(category);
        kept.append(&mut group);
    }

    if kept.is_empty() {
        return (Vec::new(), Vec::new());
    }

    let insights = insights
        .into_iter()
        .filter(|insight| kept_categories.contains(&insight.category))
        .collect();
    kept.sort_by_key(|e| e.date);
    (kept, insights)
}
