use std::collections::BTreeMap;

use chrono::{Days, NaiveDate};

use crate::sanitize::scrub;
use crate::schema::{
    CalendarDay, CalendarExpense, DailyBalance, ForecastResponse, ForecastSummary, HabitInsight,
    ProjectedEvent,
};

const CALENDAR_DAYS: i64 = 30;

/// Merge all composed events into the final response: running balance,
/// daily summary, 30-day calendar, category breakdowns, and headline
/// figures.
pub fn compose(
    opening_balance: f64,
    mut events: Vec<ProjectedEvent>,
    habits: Vec<HabitInsight>,
    start: NaiveDate,
    horizon: i64,
    method: &str,
) -> ForecastResponse {
    events.sort_by_key(|e| e.date);

    let mut balance = opening_balance;
    for event in &mut events {
        event.amount = scrub(event.amount);
        balance += event.amount;
        event.balance = Some(balance);
    }

    let forecast: Vec<DailyBalance> = if events.is_empty() {
        // With nothing to project, the balance holds flat across the window.
        (0..horizon.max(1))
            .map(|offset| DailyBalance {
                date: start + Days::new(offset as u64),
                amount: 0.0,
                balance: opening_balance,
            })
            .collect()
    } else {
        let mut daily: BTreeMap<NaiveDate, DailyBalance> = BTreeMap::new();
        for event in &events {
            let entry = daily.entry(event.date).or_insert(DailyBalance {
                date: event.date,
                amount: 0.0,
                balance: opening_balance,
            });
            entry.amount += event.amount;
            entry.balance = event.balance.unwrap_or(entry.balance);
        }
        daily.into_values().collect()
    };

    let future_daily: Vec<&DailyBalance> = forecast.iter().filter(|d| d.date >= start).collect();
    let final_balance = forecast.last().map(|d| d.balance).unwrap_or(opening_balance);

    let mut minimum_balance = final_balance;
    let mut minimum_balance_date = None;
    let mut zero_date = None;
    for day in &future_daily {
        if minimum_balance_date.is_none() || day.balance < minimum_balance {
            minimum_balance = day.balance;
            minimum_balance_date = Some(day.date);
        }
        if zero_date.is_none() && day.balance <= 0.0 {
            zero_date = Some(day.date);
        }
    }

    let days_to_min = minimum_balance_date.map(|date| (date - start).num_days().max(0));
    let days_to_zero = zero_date.map(|date| (date - start).num_days().max(0));

    let future_events: Vec<&ProjectedEvent> =
        events.iter().filter(|e| e.date >= start).collect();
    let total_income: f64 = future_events
        .iter()
        .filter(|e| e.amount > 0.0)
        .map(|e| e.amount)
        .sum();
    let total_expenses: f64 = future_events
        .iter()
        .filter(|e| e.amount < 0.0)
        .map(|e| e.amount)
        .sum();

    let mut category_breakdown = BTreeMap::new();
    for event in &future_events {
        *category_breakdown.entry(event.category).or_insert(0.0) += event.amount;
    }
    let mut expense_breakdown = BTreeMap::new();
    let mut income_breakdown = BTreeMap::new();
    for (category, total) in &category_breakdown {
        if *total < 0.0 {
            expense_breakdown.insert(*category, total.abs());
        } else if *total > 0.0 {
            income_breakdown.insert(*category, *total);
        }
    }

    let calendar = build_calendar(&events, start);

    let summary = ForecastSummary {
        method: method.to_string(),
        opening_balance: scrub(opening_balance),
        final_balance: scrub(final_balance),
        net_change: scrub(final_balance - opening_balance),
        total_income: scrub(total_income),
        total_expenses: scrub(total_expenses),
        category_breakdown,
        expense_breakdown,
        income_breakdown,
        minimum_balance: scrub(minimum_balance),
        minimum_balance_date: minimum_balance_date.map(|d| d.format("%Y-%m-%d").to_string()),
        days_to_min,
        days_to_zero,
    };

    ForecastResponse {
        summary,
        forecast,
        transactions: events,
        calendar,
        habits,
    }
}

/// Calendar view over the first 30 days of the window, regardless of the
/// requested horizon.
fn build_calendar(events: &[ProjectedEvent], start: NaiveDate) -> Vec<CalendarDay> {
    let calendar_end = start + Days::new(CALENDAR_DAYS as u64);
    let mut days: BTreeMap<NaiveDate, Vec<&ProjectedEvent>> = BTreeMap::new();
    for event in events {
        if event.date >= start && event.date <= calendar_end {
            days.entry(event.date).or_default().push(event);
        }
    }

    days.into_iter()
        .map(|(date, group)| {
            let net: f64 = group.iter().map(|e| e.amount).sum();
            let income: f64 = group.iter().filter(|e| e.amount > 0.0).map(|e| e.amount).sum();
            let expenses: f64 = group.iter().filter(|e| e.amount < 0.0).map(|e| e.amount).sum();
            let balance = group
                .last()
                .and_then(|e| e.balance)
                .unwrap_or(0.0);

            let mut expense_events: Vec<&&ProjectedEvent> =
                group.iter().filter(|e| e.amount < 0.0).collect();
            expense_events.sort_by(|a, b| {
                a.amount
                    .partial_cmp(&b.amount)
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            let top_expenses = expense_events
                .into_iter()
                .take(3)
                .map(|e| CalendarExpense {
                    description: e.description.clone(),
                    amount: e.amount,
                    category: e.category,
                })
                .collect();

            CalendarDay {
                date,
                net,
                income,
                expenses,
                balance,
                top_expenses,
            }
        })
        .collect()
}
