use chrono::{Datelike, Days, NaiveDate};

use crate::category::Category;
use crate::schema::{
    EventKind, ProjectedEvent, SchedulePattern, ScheduledDay, ScheduledEvent,
};
use crate::utils::{advance_month_preserving_day, last_day_of_month, weekday_index};

/// Expand user-declared scheduled events into concrete dated occurrences
/// inside `[start, start + horizon)`. Categorization is delegated so the
/// caller can route through the alias cache.
pub fn expand_scheduled(
    scheduled: &[ScheduledEvent],
    start: NaiveDate,
    horizon: i64,
    categorize: impl Fn(&str, Option<f64>) -> Category,
) -> Vec<ProjectedEvent> {
    let mut events = Vec::new();
    if horizon <= 0 {
        return events;
    }
    let end = start + Days::new(horizon as u64);

    for item in scheduled {
        if !item.amount.is_finite() {
            continue;
        }
        let description = item.description.trim().to_string();
        let category = categorize(&description, Some(item.amount));
        let mut push = |date: NaiveDate| {
            events.push(ProjectedEvent {
                date,
                amount: item.amount,
                category,
                description: description.clone(),
                kind: EventKind::Scheduled,
                source: None,
                balance: None,
            });
        };

        match item.pattern {
            SchedulePattern::Weekly | SchedulePattern::Biweekly => {
                let Some(weekday) = item.weekday.map(|w| (w % 7) as i64) else {
                    continue;
                };
                let step = if item.pattern == SchedulePattern::Weekly { 7 } else { 14 };
                let first_offset = (weekday - weekday_index(start) as i64).rem_euclid(7);
                let mut current = start + Days::new(first_offset as u64);
                while current < end {
                    push(current);
                    current = current + Days::new(step);
                }
            }
            SchedulePattern::Monthly => {
                let anchor = item.date.unwrap_or(start);
                let (use_last_day, day_value) = match item.day {
                    Some(ScheduledDay::Last) => (true, 1),
                    Some(ScheduledDay::Day(day)) => (false, day.max(1)),
                    None => (false, if item.date.is_some() { anchor.day() } else { 1 }),
                };

                let mut current = anchor;
                while current < start {
                    current = advance_month_preserving_day(current, 1, current.day());
                }
                while current < end {
                    let month_last = last_day_of_month(current.year(), current.month()).day();
                    let month_day = if use_last_day {
                        month_last
                    } else {
                        day_value.min(month_last)
                    };
                    let event_date =
                        NaiveDate::from_ymd_opt(current.year(), current.month(), month_day)
                            .unwrap_or(current);
                    if event_date >= start && event_date < end {
                        push(event_date);
                    }
                    current = advance_month_preserving_day(current, 1, current.day());
                }
            }
            SchedulePattern::Oneoff => {
                if let Some(date) = item.date {
                    if date >= start && date < end {
                        push(date);
                    }
                }
            }
        }
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;

    fn categorize_plain(description: &str, amount: Option<f64>) -> Category {
        crate::category::categorize(description, amount)
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn test_weekly_aligns_to_weekday() {
        let scheduled = vec![ScheduledEvent {
            pattern: SchedulePattern::Weekly,
            amount: -120.0,
            description: "Cleaning service".to_string(),
            weekday: Some(4), // Friday
            day: None,
            date: None,
        }];
        // 2025-03-03 is a Monday.
        let events = expand_scheduled(&scheduled, date("2025-03-03"), 21, categorize_plain);
        assert_eq!(events.len(), 3);
        assert_eq!(events[0].date, date("2025-03-07"));
        assert!(events.iter().all(|e| weekday_index(e.date) == 4));
        assert!(events.iter().all(|e| e.kind == EventKind::Scheduled));
    }

    #[test]
    fn test_monthly_last_day() {
        let scheduled = vec![ScheduledEvent {
            pattern: SchedulePattern::Monthly,
            amount: -1500.0,
            description: "Rent".to_string(),
            weekday: None,
            day: Some(ScheduledDay::Last),
            date: None,
        }];
        let events = expand_scheduled(&scheduled, date("2025-01-15"), 90, categorize_plain);
        let dates: Vec<NaiveDate> = events.iter().map(|e| e.date).collect();
        assert_eq!(dates, vec![date("2025-01-31"), date("2025-02-28"), date("2025-03-31")]);
    }

    #[test]
    fn test_monthly_day_clamps_to_short_month() {
        let scheduled = vec![ScheduledEvent {
            pattern: SchedulePattern::Monthly,
            amount: -99.0,
            description: "Gym".to_string(),
            weekday: None,
            day: Some(ScheduledDay::Day(31)),
            date: None,
        }];
        let events = expand_scheduled(&scheduled, date("2025-01-01"), 90, categorize_plain);
        let dates: Vec<NaiveDate> = events.iter().map(|e| e.date).collect();
        assert_eq!(dates, vec![date("2025-01-31"), date("2025-02-28"), date("2025-03-31")]);
    }

    #[test]
    fn test_oneoff_inside_window_only() {
        let scheduled = vec![
            ScheduledEvent {
                pattern: SchedulePattern::Oneoff,
                amount: -500.0,
                description: "Car repair".to_string(),
                weekday: None,
                day: None,
                date: Some(date("2025-03-10")),
            },
            ScheduledEvent {
                pattern: SchedulePattern::Oneoff,
                amount: -900.0,
                description: "Too far out".to_string(),
                weekday: None,
                day: None,
                date: Some(date("2025-06-01")),
            },
        ];
        let events = expand_scheduled(&scheduled, date("2025-03-01"), 30, categorize_plain);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].date, date("2025-03-10"));
    }

    #[test]
    fn test_horizon_containment() {
        let scheduled = vec![ScheduledEvent {
            pattern: SchedulePattern::Weekly,
            amount: 100.0,
            description: "Allowance".to_string(),
            weekday: Some(0),
            day: None,
            date: None,
        }];
        let start = date("2025-03-03"); // Monday
        let events = expand_scheduled(&scheduled, start, 14, categorize_plain);
        assert_eq!(events.len(), 2); // days 0 and 7; day 14 is outside
        assert!(events.iter().all(|e| e.date >= start && e.date < start + Days::new(14)));
    }
}
