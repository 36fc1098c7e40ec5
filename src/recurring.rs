use std::collections::{BTreeMap, HashSet};

use chrono::{Datelike, Days, NaiveDate};
use serde_json::json;
use tracing::debug;

use crate::category::Category;
use crate::config::EngineConfig;
use crate::history::CategoryAliases;
use crate::normalize::normalize_description;
use crate::schema::{
    EventKind, FlowKind, HabitInsight, LedgerEntry, ProjectedEvent, ProjectionSource,
    RecurrencePattern, RecurringTemplate, ScheduledEvent,
};
use crate::seasonality::{seasonal_adjust, SeasonalityFactors};
use crate::utils::{
    advance_month_preserving_day, mean, median, mode, month_start, months_between, round2,
    sample_std, weekday_index, MONTH_NAMES, WEEKDAY_NAMES,
};

fn classify_intervals(intervals: &[f64]) -> Option<RecurrencePattern> {
    if intervals.is_empty() {
        return None;
    }
    let median_interval = median(intervals);
    if median_interval <= 8.0 {
        Some(RecurrencePattern::Weekly)
    } else if median_interval <= 16.0 {
        Some(RecurrencePattern::Biweekly)
    } else if median_interval <= 35.0 {
        Some(RecurrencePattern::Monthly)
    } else if median_interval <= 95.0 {
        Some(RecurrencePattern::Quarterly)
    } else if median_interval <= 400.0 {
        Some(RecurrencePattern::Yearly)
    } else {
        None
    }
}

fn interval_tolerance(median_interval: f64) -> f64 {
    if median_interval <= 8.0 {
        1.0
    } else if median_interval <= 16.0 {
        2.0
    } else if median_interval <= 35.0 {
        5.0
    } else {
        10.0
    }
}

/// Discover per-description series with consistent intervals and stable
/// amounts. Stale or barely-supported series are rejected.
pub fn detect_recurring(history: &[LedgerEntry], config: &EngineConfig) -> Vec<RecurringTemplate> {
    let mut recurring = Vec::new();
    let Some(history_end) = history.iter().map(|e| e.date).max() else {
        return recurring;
    };
    let recent_start = history_end - Days::new(config.recurring_recent_window_days as u64);

    let mut groups: BTreeMap<String, Vec<&LedgerEntry>> = BTreeMap::new();
    for entry in history {
        let key = normalize_description(&entry.description);
        if key.is_empty() {
            continue;
        }
        groups.entry(key).or_default().push(entry);
    }

    for (desc_key, mut group) in groups {
        group.sort_by_key(|e| e.date);
        let count = group.len();
        if count < 2 {
            continue;
        }

        let unique_days: HashSet<NaiveDate> = group.iter().map(|e| e.date).collect();
        if unique_days.len() < 2 {
            continue;
        }

        let intervals: Vec<f64> = group
            .windows(2)
            .map(|pair| (pair[1].date - pair[0].date).num_days() as f64)
            .collect();
        let Some(pattern) = classify_intervals(&intervals) else {
            continue;
        };

        let min_occurrences = match pattern {
            RecurrencePattern::Weekly | RecurrencePattern::Biweekly => {
                config.recurring_min_weekly_occurrences
            }
            RecurrencePattern::Monthly => config.recurring_min_monthly_occurrences,
            RecurrencePattern::Quarterly => config.recurring_min_quarterly_occurrences,
            RecurrencePattern::Yearly => config.recurring_min_yearly_occurrences,
        };
        if count < min_occurrences {
            continue;
        }

        let median_interval = median(&intervals);
        if median_interval < config.recurring_minimum_interval {
            continue;
        }
        let tolerance = interval_tolerance(median_interval);
        let matched = intervals
            .iter()
            .filter(|v| (**v - median_interval).abs() <= tolerance)
            .count();
        if (matched as f64) / (intervals.len() as f64) < config.recurring_min_interval_match_ratio
        {
            continue;
        }

        let amounts: Vec<f64> = group.iter().map(|e| e.amount).collect();
        let avg_amount = mean(&amounts);
        if avg_amount.abs() < 1.0 {
            continue;
        }
        let std_amount = sample_std(&amounts);
        if std_amount > 0.0 && std_amount > avg_amount.abs() * config.recurring_amount_std_ratio {
            continue;
        }

        let category = if avg_amount > 0.0 {
            Category::Income
        } else {
            let categories: Vec<Category> = group.iter().map(|e| e.category).collect();
            mode(&categories).unwrap_or(Category::Other)
        };
        if EngineConfig::is_skip_category(category) && avg_amount < 0.0 {
            continue;
        }

        let weekdays: Vec<u32> = group.iter().map(|e| weekday_index(e.date)).collect();
        let days: Vec<u32> = group.iter().map(|e| e.date.day()).collect();
        let last = group.last().expect("non-empty group");
        let last_date = last.date;

        let inactive_days = (history_end - last_date).num_days();
        if inactive_days > config.recurring_max_inactive_days {
            continue;
        }
        let staleness_limit = config
            .recurring_minimum_interval
            .max(median_interval * config.recurring_staleness_multiplier);
        if inactive_days as f64 > staleness_limit {
            continue;
        }

        let recent_count = group.iter().filter(|e| e.date >= recent_start).count();
        if recent_count < config.recurring_min_recency_hits {
            continue;
        }

        recurring.push(RecurringTemplate {
            description: last.description.clone(),
            normalized_description: desc_key,
            category,
            pattern,
            amount: avg_amount,
            last_amount: last.amount,
            weekday: mode(&weekdays).unwrap_or(0),
            day: mode(&days).unwrap_or(1),
            last_date,
            std_amount,
            kind: if avg_amount > 0.0 {
                FlowKind::Income
            } else {
                FlowKind::Expense
            },
        });
    }

    debug!(templates = recurring.len(), "recurring detection complete");
    recurring
}

/// For stable-cadence categories with no detected template, synthesize a
/// monthly one from recent history so the forecast does not silently drop a
/// known obligation or paycheck.
pub fn augment_recurring(
    history: &[LedgerEntry],
    templates: Vec<RecurringTemplate>,
    start_date: NaiveDate,
    aliases: &CategoryAliases,
    config: &EngineConfig,
) -> Vec<RecurringTemplate> {
    if history.is_empty() {
        return templates;
    }

    let mut augmented = templates;
    let mut existing_categories: HashSet<Category> =
        augmented.iter().map(|t| t.category).collect();
    let mut existing_norms: HashSet<String> = augmented
        .iter()
        .map(|t| t.normalized_description.clone())
        .collect();
    let staleness_limit = config.behavior_staleness_limit_days();

    for category in EngineConfig::EXTENDED_HISTORY_CATEGORIES {
        if existing_categories.contains(&category) {
            continue;
        }

        let is_income = category == Category::Income;
        let target: Vec<&LedgerEntry> = history
            .iter()
            .filter(|e| e.category == category)
            .filter(|e| {
                if is_income {
                    e.amount > 1e-6
                } else {
                    e.amount < -1e-6
                }
            })
            .collect();
        if target.len() < 2 {
            continue;
        }

        let last_date = target.iter().map(|e| e.date).max().expect("non-empty");
        if (start_date - last_date).num_days() > staleness_limit {
            continue;
        }

        let (avg_amount, std_amount) = if is_income {
            let mut monthly: BTreeMap<NaiveDate, f64> = BTreeMap::new();
            for entry in &target {
                *monthly.entry(month_start(entry.date)).or_insert(0.0) += entry.amount;
            }
            let totals: Vec<f64> = monthly.values().copied().filter(|v| *v > 0.0).collect();
            if totals.is_empty() {
                continue;
            }
            let window: Vec<f64> = totals[totals.len().saturating_sub(3)..].to_vec();
            let avg = median(&window);
            if avg <= 0.0 {
                continue;
            }
            (avg, sample_std(&window))
        } else {
            let recent_cutoff =
                last_date - Days::new(config.behavior_recent_days.max(120) as u64);
            let recent: Vec<f64> = {
                let filtered: Vec<f64> = target
                    .iter()
                    .filter(|e| e.date >= recent_cutoff)
                    .map(|e| e.amount)
                    .collect();
                if filtered.is_empty() {
                    target.iter().map(|e| e.amount).collect()
                } else {
                    filtered
                }
            };
            let avg = recent.iter().copied().fold(f64::INFINITY, f64::min);
            if avg >= -1e-6 {
                continue;
            }
            (avg, sample_std(&recent))
        };

        let weekdays: Vec<u32> = target.iter().map(|e| weekday_index(e.date)).collect();
        let days: Vec<u32> = target.iter().map(|e| e.date.day()).collect();

        let normalized_key = format!("__category__::{category}");
        if existing_norms.contains(&normalized_key) {
            continue;
        }

        let description = match aliases.get(&category) {
            Some(alias) => format!("{} (inferred)", alias.display),
            None => category.title(),
        };

        augmented.push(RecurringTemplate {
            description,
            normalized_description: normalized_key.clone(),
            category,
            pattern: RecurrencePattern::Monthly,
            amount: avg_amount,
            last_amount: avg_amount,
            weekday: mode(&weekdays).unwrap_or_else(|| weekday_index(last_date)),
            day: mode(&days).unwrap_or_else(|| last_date.day()),
            last_date,
            std_amount,
            kind: if avg_amount > 0.0 {
                FlowKind::Income
            } else {
                FlowKind::Expense
            },
        });
        existing_categories.insert(category);
        existing_norms.insert(normalized_key);
    }

    augmented
}

fn polarity(amount: f64) -> i8 {
    if amount > 0.0 {
        1
    } else if amount < 0.0 {
        -1
    } else {
        0
    }
}

fn recurring_insight(template: &RecurringTemplate, next_event: NaiveDate) -> HabitInsight {
    let amount = round2(template.amount.abs());
    let weekday_name = WEEKDAY_NAMES[(template.weekday % 7) as usize];

    let (frequency, timing) = match template.pattern {
        RecurrencePattern::Weekly => ("Every week".to_string(), format!("on {weekday_name}s")),
        RecurrencePattern::Biweekly => {
            ("Every other week".to_string(), format!("on {weekday_name}s"))
        }
        RecurrencePattern::Monthly => {
            ("Monthly".to_string(), format!("around day {}", template.day))
        }
        RecurrencePattern::Quarterly => {
            ("Quarterly".to_string(), format!("around day {}", template.day))
        }
        RecurrencePattern::Yearly => (
            "Annually".to_string(),
            format!("in {}", MONTH_NAMES[next_event.month0() as usize]),
        ),
    };

    let descriptor = format!("{frequency} {timing}").trim().to_string();

    HabitInsight {
        label: template.description.clone(),
        category: template.category,
        kind: template.kind,
        pattern: template.pattern.to_string(),
        average_amount: amount,
        average_weekly_spend: None,
        average_horizon_total: None,
        variance: Some(round2(template.std_amount)),
        next_date: Some(next_event.format("%Y-%m-%d").to_string()),
        source: ProjectionSource::Recurring,
        detail: format!("{descriptor} • approx ${amount:.2}"),
        meta: json!({ "weekday": template.weekday, "day": template.day }),
    }
}

/// Extend each surviving template forward through the horizon. Templates
/// already covered by a user-declared scheduled event are suppressed.
pub fn project_recurring(
    templates: &[RecurringTemplate],
    start: NaiveDate,
    horizon: i64,
    factors: &SeasonalityFactors,
    scheduled: &[ScheduledEvent],
    categorize: impl Fn(&str, Option<f64>) -> Category,
    config: &EngineConfig,
) -> (Vec<ProjectedEvent>, Vec<HabitInsight>) {
    let mut events = Vec::new();
    let mut insights = Vec::new();
    if templates.is_empty() || horizon <= 0 {
        return (events, insights);
    }
    let end = start + Days::new(horizon as u64);

    let scheduled_norms: HashSet<String> = scheduled
        .iter()
        .filter(|s| !s.description.trim().is_empty())
        .map(|s| normalize_description(&s.description))
        .collect();
    let scheduled_signatures: HashSet<(Category, i8)> = scheduled
        .iter()
        .map(|s| {
            let amount = if s.amount.is_finite() { s.amount } else { 0.0 };
            (categorize(&s.description, None), polarity(amount))
        })
        .collect();

    for template in templates {
        if scheduled_norms.contains(&template.normalized_description) {
            debug!(description = %template.description, "template suppressed by scheduled event");
            continue;
        }
        if scheduled_signatures.contains(&(template.category, polarity(template.amount))) {
            continue;
        }

        let mut template_events: Vec<ProjectedEvent> = Vec::new();
        let mut push = |date: NaiveDate, amount: f64, template: &RecurringTemplate| {
            template_events.push(ProjectedEvent {
                date,
                amount,
                category: template.category,
                description: format!("{} (projected)", template.description),
                kind: EventKind::Forecast,
                source: Some(ProjectionSource::Recurring),
                balance: None,
            });
        };

        match template.pattern {
            RecurrencePattern::Weekly | RecurrencePattern::Biweekly => {
                let step = template.pattern.step_days().expect("stepped pattern");
                let mut current = template.last_date + Days::new(step as u64);
                while current < start {
                    current = current + Days::new(step as u64);
                }
                while current < end {
                    let amount =
                        seasonal_adjust(template.amount, template.category, current, factors, config);
                    push(current, amount, template);
                    current = current + Days::new(step as u64);
                }
            }
            RecurrencePattern::Monthly
                if matches!(template.category, Category::Rent | Category::Subscriptions) =>
            {
                let target_day = template.day.max(1);
                let base = template.last_date;
                let base_amount = template.last_amount;
                let mut next = advance_month_preserving_day(base, 1, target_day);
                while next < start {
                    next = advance_month_preserving_day(next, 1, target_day);
                }
                while next < end {
                    let months_since = months_between(base, next).max(0);
                    let amount = if template.category == Category::Rent {
                        let years_since = (months_since / 12) as u32;
                        round2(
                            base_amount
                                * (1.0 + config.rent_annual_escalation).powi(years_since as i32),
                        )
                    } else {
                        round2(base_amount)
                    };
                    push(next, amount, template);
                    next = advance_month_preserving_day(next, 1, target_day);
                }
            }
            RecurrencePattern::Monthly | RecurrencePattern::Quarterly | RecurrencePattern::Yearly => {
                let months = template.pattern.offset_months().expect("month-offset pattern");
                let mut next =
                    advance_month_preserving_day(template.last_date, months, template.last_date.day());
                while next < start {
                    next = advance_month_preserving_day(next, months, next.day());
                }
                while next < end {
                    let amount =
                        seasonal_adjust(template.amount, template.category, next, factors, config);
                    push(next, amount, template);
                    next = advance_month_preserving_day(next, months, next.day());
                }
            }
        }

        if let Some(first) = template_events.iter().map(|e| e.date).min() {
            insights.push(recurring_insight(template, first));
            events.append(&mut template_events);
        }
    }

    (events, insights)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::history::build_ledger;
    use crate::schema::Transaction;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn monthly_history(
        description: &str,
        amount: f64,
        category: Category,
        first: &str,
        months: i32,
        day: u32,
    ) -> Vec<LedgerEntry> {
        let start = date(first);
        let txs: Vec<Transaction> = (0..months)
            .map(|i| Transaction {
                date: advance_month_preserving_day(start, i, day),
                description: description.to_string(),
                amount,
                category: Some(category),
            })
            .collect();
        build_ledger(0.0, &txs)
    }

    #[test]
    fn test_detects_monthly_rent() {
        let history = monthly_history("Sunset Apartments Rent", -2000.0, Category::Rent, "2024-01-01", 12, 1);
        let templates = detect_recurring(&history, &EngineConfig::default());
        assert_eq!(templates.len(), 1);
        let template = &templates[0];
        assert_eq!(template.category, Category::Rent);
        assert_eq!(template.pattern, RecurrencePattern::Monthly);
        assert_eq!(template.day, 1);
        assert!((template.amount + 2000.0).abs() < 1e-9);
    }

    #[test]
    fn test_rejects_unstable_amounts() {
        let mut history = monthly_history("Oddball Vendor", -100.0, Category::Shopping, "2024-01-05", 6, 5);
        // Alternate between trivial and huge charges.
        for (i, entry) in history.iter_mut().enumerate() {
            entry.amount = if i % 2 == 0 { -10.0 } else { -1000.0 };
        }
        let templates = detect_recurring(&history, &EngineConfig::default());
        assert!(templates.is_empty());
    }

    #[test]
    fn test_rejects_stale_series() {
        // Monthly series that stops five months before the history ends.
        let mut history = monthly_history("Old Gym", -45.0, Category::Entertainment, "2024-01-10", 6, 10);
        let filler = build_ledger(
            0.0,
            &[Transaction {
                date: date("2024-11-20"),
                description: "Recent anchor".to_string(),
                amount: -5.0,
                category: Some(Category::Other),
            }],
        );
        history.extend(filler);
        let templates = detect_recurring(&history, &EngineConfig::default());
        assert!(templates.iter().all(|t| t.description != "Old Gym"));
    }

    #[test]
    fn test_detects_biweekly_income() {
        let txs: Vec<Transaction> = (0..13)
            .map(|i| Transaction {
                date: date("2024-07-05") + Days::new(i * 14),
                description: "ACME Payroll".to_string(),
                amount: 3000.0,
                category: Some(Category::Income),
            })
            .collect();
        let history = build_ledger(0.0, &txs);
        let templates = detect_recurring(&history, &EngineConfig::default());
        assert_eq!(templates.len(), 1);
        assert_eq!(templates[0].pattern, RecurrencePattern::Biweekly);
        assert_eq!(templates[0].category, Category::Income);
        assert_eq!(templates[0].kind, FlowKind::Income);
    }

    #[test]
    fn test_rent_escalates_three_percent_yearly() {
        let history = monthly_history("Sunset Apartments Rent", -2000.0, Category::Rent, "2023-01-01", 24, 1);
        let config = EngineConfig::default();
        let templates = detect_recurring(&history, &config);
        assert_eq!(templates.len(), 1);

        let start = date("2025-01-02");
        let (events, insights) = project_recurring(
            &templates,
            start,
            400,
            &SeasonalityFactors::new(),
            &[],
            crate::category::categorize,
            &config,
        );
        assert!(!insights.is_empty());

        let first = events.iter().find(|e| e.date == date("2025-02-01")).unwrap();
        assert!((first.amount + 2000.0).abs() < 1e-9);
        let escalated = events.iter().find(|e| e.date == date("2025-12-01")).unwrap();
        assert!((escalated.amount + 2060.0).abs() < 1e-9);
        let next_year = events.iter().find(|e| e.date == date("2026-01-01")).unwrap();
        assert!((next_year.amount + 2060.0).abs() < 1e-9);
        assert!(events.iter().all(|e| e.date.day() == 1));
    }

    #[test]
    fn test_subscription_amount_is_constant() {
        let history = monthly_history("Netflix.com", -15.99, Category::Subscriptions, "2024-03-15", 10, 15);
        let config = EngineConfig::default();
        let templates = detect_recurring(&history, &config);
        assert_eq!(templates.len(), 1);

        let (events, _) = project_recurring(
            &templates,
            date("2025-01-02"),
            60,
            &SeasonalityFactors::new(),
            &[],
            crate::category::categorize,
            &config,
        );
        assert!(!events.is_empty());
        assert!(events.iter().all(|e| (e.amount + 15.99).abs() < 1e-9));
        assert!(events.iter().all(|e| e.date.day() == 15));
    }

    #[test]
    fn test_scheduled_event_suppresses_template() {
        let history = monthly_history("Netflix.com", -15.99, Category::Subscriptions, "2024-03-15", 10, 15);
        let config = EngineConfig::default();
        let templates = detect_recurring(&history, &config);
        let scheduled = vec![ScheduledEvent {
            pattern: crate::schema::SchedulePattern::Monthly,
            amount: -15.99,
            description: "Netflix.com".to_string(),
            weekday: None,
            day: Some(crate::schema::ScheduledDay::Day(15)),
            date: None,
        }];
        let (events, insights) = project_recurring(
            &templates,
            date("2025-01-02"),
            60,
            &SeasonalityFactors::new(),
            &scheduled,
            crate::category::categorize,
            &config,
        );
        assert!(events.is_empty());
        assert!(insights.is_empty());
    }

    #[test]
    fn test_augmentation_covers_uncovered_income() {
        // Irregular income amounts that fail amount-stability detection.
        let txs: Vec<Transaction> = (0..6)
            .flat_map(|month| {
                vec![Transaction {
                    date: advance_month_preserving_day(date("2024-07-03"), month, 3),
                    description: format!("Client invoice {month}"),
                    amount: 2000.0 + month as f64 * 900.0,
                    category: Some(Category::Income),
                }]
            })
            .collect();
        let history = build_ledger(0.0, &txs);
        let config = EngineConfig::default();
        let detected = detect_recurring(&history, &config);
        let augmented = augment_recurring(
            &history,
            detected,
            date("2025-01-02"),
            &CategoryAliases::new(),
            &config,
        );
        let income = augmented
            .iter()
            .find(|t| t.category == Category::Income)
            .expect("augmented income template");
        assert_eq!(income.normalized_description, "__category__::income");
        assert_eq!(income.pattern, RecurrencePattern::Monthly);
        assert!(income.amount > 0.0);
    }

    #[test]
    fn test_projection_respects_horizon() {
        let history = monthly_history("Sunset Apartments Rent", -2000.0, Category::Rent, "2024-01-01", 12, 1);
        let config = EngineConfig::default();
        let templates = detect_recurring(&history, &config);
        let start = date("2025-01-02");
        let (events, _) = project_recurring(
            &templates,
            start,
            30,
            &SeasonalityFactors::new(),
            &[],
            crate::category::categorize,
            &config,
        );
        assert!(events
            .iter()
            .all(|e| e.date >= start && e.date < start + Days::new(30)));
    }
}
