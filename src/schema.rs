use std::collections::BTreeMap;
use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::category::Category;

/// A single ledger row as supplied by callers. Negative amounts are
/// expenses, positive amounts income. Dates carry day precision; any time or
/// zone component on input is discarded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    #[serde(with = "flexible_date")]
    pub date: NaiveDate,
    #[serde(default)]
    pub description: String,
    pub amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
}

/// Date (de)serialization that accepts plain `YYYY-MM-DD` as well as full
/// timestamps, keeping only the calendar day.
pub mod flexible_date {
    use chrono::NaiveDate;
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(date: &NaiveDate, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&date.format("%Y-%m-%d").to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<NaiveDate, D::Error> {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid date: {raw}")))
    }

    pub fn parse(raw: &str) -> Option<NaiveDate> {
        let trimmed = raw.trim();
        if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
            return Some(date);
        }
        let day_part = trimmed
            .split(|c| c == 'T' || c == ' ')
            .next()
            .unwrap_or(trimmed);
        NaiveDate::parse_from_str(day_part, "%Y-%m-%d").ok()
    }
}

/// Recurrence shape of a user-declared scheduled event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchedulePattern {
    Weekly,
    Biweekly,
    Monthly,
    Oneoff,
}

/// Day-of-month anchor for monthly schedules. `Last` means month-end and is
/// accepted on the wire as `"last"`, `"end"`, or any integer `<= 0`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduledDay {
    Day(u32),
    Last,
}

impl Serialize for ScheduledDay {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            ScheduledDay::Day(day) => serializer.serialize_u32(*day),
            ScheduledDay::Last => serializer.serialize_str("last"),
        }
    }
}

impl<'de> Deserialize<'de> for ScheduledDay {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(f64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(value) => {
                if !value.is_finite() || value <= 0.0 {
                    Ok(ScheduledDay::Last)
                } else {
                    Ok(ScheduledDay::Day(value as u32))
                }
            }
            Raw::Text(text) => {
                let trimmed = text.trim().to_lowercase();
                match trimmed.as_str() {
                    "last" | "end" => Ok(ScheduledDay::Last),
                    other => match other.parse::<i64>() {
                        Ok(day) if day > 0 => Ok(ScheduledDay::Day(day as u32)),
                        Ok(_) => Ok(ScheduledDay::Last),
                        Err(_) => Err(serde::de::Error::custom(format!(
                            "invalid scheduled day: {text}"
                        ))),
                    },
                }
            }
        }
    }
}

/// A user-declared future event (payday, bill, one-off).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledEvent {
    pub pattern: SchedulePattern,
    pub amount: f64,
    #[serde(default)]
    pub description: String,
    /// 0 = Monday .. 6 = Sunday.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weekday: Option<u8>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub day: Option<ScheduledDay>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "optional_flexible_date")]
    pub date: Option<NaiveDate>,
}

mod optional_flexible_date {
    use chrono::NaiveDate;
    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        date: &Option<NaiveDate>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match date {
            Some(date) => serializer.serialize_str(&date.format("%Y-%m-%d").to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<NaiveDate>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        match raw {
            None => Ok(None),
            Some(text) if text.trim().is_empty() => Ok(None),
            Some(text) => super::flexible_date::parse(&text)
                .map(Some)
                .ok_or_else(|| serde::de::Error::custom(format!("invalid date: {text}"))),
        }
    }
}

/// A sanitized historical transaction annotated with its running balance.
#[derive(Debug, Clone)]
pub struct LedgerEntry {
    pub date: NaiveDate,
    pub description: String,
    pub amount: f64,
    pub category: Category,
    pub balance: f64,
}

/// Detected recurrence cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecurrencePattern {
    Weekly,
    Biweekly,
    Monthly,
    Quarterly,
    Yearly,
}

impl RecurrencePattern {
    pub fn step_days(&self) -> Option<i64> {
        match self {
            RecurrencePattern::Weekly => Some(7),
            RecurrencePattern::Biweekly => Some(14),
            _ => None,
        }
    }

    pub fn offset_months(&self) -> Option<i32> {
        match self {
            RecurrencePattern::Monthly => Some(1),
            RecurrencePattern::Quarterly => Some(3),
            RecurrencePattern::Yearly => Some(12),
            _ => None,
        }
    }
}

impl fmt::Display for RecurrencePattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            RecurrencePattern::Weekly => "weekly",
            RecurrencePattern::Biweekly => "biweekly",
            RecurrencePattern::Monthly => "monthly",
            RecurrencePattern::Quarterly => "quarterly",
            RecurrencePattern::Yearly => "yearly",
        };
        f.write_str(label)
    }
}

/// Income or expense side of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FlowKind {
    Income,
    Expense,
}

/// A detected periodic series, parameterized enough to extend forward.
#[derive(Debug, Clone)]
pub struct RecurringTemplate {
    pub description: String,
    pub normalized_description: String,
    pub category: Category,
    pub pattern: RecurrencePattern,
    /// Mean observed amount (signed).
    pub amount: f64,
    /// Most recent observed amount (signed).
    pub last_amount: f64,
    /// Modal weekday, 0 = Monday.
    pub weekday: u32,
    /// Modal day of month.
    pub day: u32,
    pub last_date: NaiveDate,
    pub std_amount: f64,
    pub kind: FlowKind,
}

/// Provenance of a projected event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProjectionSource {
    Recurring,
    Behavior,
    #[serde(rename = "prophet")]
    Trend,
    Reconciliation,
}

/// Whether an event is past fact, user-declared, or projected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    Historical,
    Scheduled,
    Forecast,
}

/// One composed event in the output stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectedEvent {
    #[serde(with = "flexible_date")]
    pub date: NaiveDate,
    pub amount: f64,
    pub category: Category,
    pub description: String,
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(
        rename = "projection_source",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub source: Option<ProjectionSource>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub balance: Option<f64>,
}

/// Net flow and end-of-day balance for one day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DailyBalance {
    #[serde(with = "flexible_date")]
    pub date: NaiveDate,
    pub amount: f64,
    pub balance: f64,
}

/// One of the top expenses highlighted on a calendar day.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarExpense {
    pub description: String,
    pub amount: f64,
    pub category: Category,
}

/// Calendar view entry; the calendar always covers 30 days from the start
/// date regardless of the forecast horizon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CalendarDay {
    #[serde(with = "flexible_date")]
    pub date: NaiveDate,
    pub net: f64,
    pub income: f64,
    pub expenses: f64,
    pub balance: f64,
    pub top_expenses: Vec<CalendarExpense>,
}

/// Human-readable description of a recurring, behavioral, or trend pattern.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HabitInsight {
    pub label: String,
    pub category: Category,
    #[serde(rename = "type")]
    pub kind: FlowKind,
    pub pattern: String,
    pub average_amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_weekly_spend: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_horizon_total: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variance: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub next_date: Option<String>,
    pub source: ProjectionSource,
    pub detail: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub meta: serde_json::Value,
}

/// Requested projection method. `statistical` is an alias for `prophet`;
/// unknown strings also resolve to `prophet`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ForecastMethod {
    Prophet,
    Behavior,
    Recurring,
    Baseline,
    Hybrid,
}

impl ForecastMethod {
    pub fn resolve(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "behavior" => ForecastMethod::Behavior,
            "recurring" => ForecastMethod::Recurring,
            "baseline" => ForecastMethod::Baseline,
            "hybrid" => ForecastMethod::Hybrid,
            _ => ForecastMethod::Prophet,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ForecastMethod::Prophet => "prophet",
            ForecastMethod::Behavior => "behavior",
            ForecastMethod::Recurring => "recurring",
            ForecastMethod::Baseline => "baseline",
            ForecastMethod::Hybrid => "hybrid",
        }
    }

    pub fn allows_recurring(&self) -> bool {
        !matches!(self, ForecastMethod::Baseline)
    }

    pub fn allows_behavior(&self) -> bool {
        matches!(self, ForecastMethod::Behavior | ForecastMethod::Hybrid)
    }

    pub fn allows_trend(&self) -> bool {
        matches!(self, ForecastMethod::Prophet | ForecastMethod::Hybrid)
    }
}

/// Aggregate figures for the forecast window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastSummary {
    pub method: String,
    pub opening_balance: f64,
    pub final_balance: f64,
    pub net_change: f64,
    pub total_income: f64,
    pub total_expenses: f64,
    pub category_breakdown: BTreeMap<Category, f64>,
    /// Expense totals with signs flipped to positive magnitudes.
    pub expense_breakdown: BTreeMap<Category, f64>,
    pub income_breakdown: BTreeMap<Category, f64>,
    pub minimum_balance: f64,
    pub minimum_balance_date: Option<String>,
    pub days_to_min: Option<i64>,
    pub days_to_zero: Option<i64>,
}

/// Full engine output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForecastResponse {
    pub summary: ForecastSummary,
    pub forecast: Vec<DailyBalance>,
    pub transactions: Vec<ProjectedEvent>,
    pub calendar: Vec<CalendarDay>,
    pub habits: Vec<HabitInsight>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transaction_accepts_timestamps() {
        let tx: Transaction = serde_json::from_str(
            r#"{"date": "2025-03-01T14:22:00Z", "description": "Coffee", "amount": -4.5}"#,
        )
        .unwrap();
        assert_eq!(tx.date, NaiveDate::from_ymd_opt(2025, 3, 1).unwrap());
    }

    #[test]
    fn test_scheduled_day_wire_forms() {
        let day: ScheduledDay = serde_json::from_str("15").unwrap();
        assert_eq!(day, ScheduledDay::Day(15));
        let last: ScheduledDay = serde_json::from_str("\"last\"").unwrap();
        assert_eq!(last, ScheduledDay::Last);
        let end: ScheduledDay = serde_json::from_str("\"end\"").unwrap();
        assert_eq!(end, ScheduledDay::Last);
        let zero: ScheduledDay = serde_json::from_str("0").unwrap();
        assert_eq!(zero, ScheduledDay::Last);
        let negative: ScheduledDay = serde_json::from_str("-2").unwrap();
        assert_eq!(negative, ScheduledDay::Last);
    }

    #[test]
    fn test_trend_source_serializes_as_prophet() {
        let json = serde_json::to_string(&ProjectionSource::Trend).unwrap();
        assert_eq!(json, "\"prophet\"");
        let parsed: ProjectionSource = serde_json::from_str("\"prophet\"").unwrap();
        assert_eq!(parsed, ProjectionSource::Trend);
    }

    #[test]
    fn test_method_resolution() {
        assert_eq!(ForecastMethod::resolve("statistical"), ForecastMethod::Prophet);
        assert_eq!(ForecastMethod::resolve("HYBRID"), ForecastMethod::Hybrid);
        assert_eq!(ForecastMethod::resolve("unknown"), ForecastMethod::Prophet);
    }

    #[test]
    fn test_event_round_trips() {
        let event = ProjectedEvent {
            date: NaiveDate::from_ymd_opt(2025, 4, 1).unwrap(),
            amount: -42.0,
            category: Category::Groceries,
            description: "Weekly shop".to_string(),
            kind: EventKind::Forecast,
            source: Some(ProjectionSource::Behavior),
            balance: Some(958.0),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"forecast\""));
        assert!(json.contains("\"projection_source\":\"behavior\""));
        let back: ProjectedEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.date, event.date);
        assert_eq!(back.kind, EventKind::Forecast);
    }
}
