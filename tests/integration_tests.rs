use cashflow_forecaster::utils::advance_month_preserving_day;
use cashflow_forecaster::*;
use chrono::{Days, NaiveDate};

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

fn monthly(description: &str, amount: f64, first: &str, months: i32, day: u32) -> Vec<Transaction> {
    (0..months)
        .map(|i| Transaction {
            date: advance_month_preserving_day(date(first), i, day),
            description: description.to_string(),
            amount,
            category: None,
        })
        .collect()
}

#[test]
fn rent_escalation_scenario() {
    // 24 monthly rent payments of -$2,000 on the 1st, last dated 2024-12-01.
    let txs = monthly("Sunset Apartments Rent", -2000.0, "2023-01-01", 24, 1);
    let response = run_forecast(
        10_000.0,
        &txs,
        &[],
        400,
        ForecastMethod::Recurring,
        Some(date("2025-01-02")),
    )
    .unwrap();

    let rent_events: Vec<&ProjectedEvent> = response
        .transactions
        .iter()
        .filter(|e| e.kind == EventKind::Forecast && e.category == Category::Rent)
        .collect();
    assert!(!rent_events.is_empty());
    assert!(rent_events.iter().all(|e| e.date.format("%d").to_string() == "01"));

    let first_year = rent_events
        .iter()
        .find(|e| e.date == date("2025-02-01"))
        .expect("rent event in first projected year");
    assert!((first_year.amount + 2000.0).abs() < 1e-6);

    let second_year = rent_events
        .iter()
        .find(|e| e.date == date("2025-12-01"))
        .expect("rent event after a full year");
    assert!((second_year.amount + 2060.0).abs() < 1e-6);
}

#[test]
fn biweekly_paycheck_scenario() {
    // +$3,000 every 14 days for six months; horizon 60.
    let txs: Vec<Transaction> = (0..13)
        .map(|i| Transaction {
            date: date("2024-07-05") + Days::new(i * 14),
            description: "ACME Payroll".to_string(),
            amount: 3000.0,
            category: None,
        })
        .collect();
    let last_date = date("2024-07-05") + Days::new(12 * 14);
    let response = run_forecast(
        2_000.0,
        &txs,
        &[],
        60,
        ForecastMethod::Recurring,
        Some(last_date + Days::new(1)),
    )
    .unwrap();

    let income_events: Vec<&ProjectedEvent> = response
        .transactions
        .iter()
        .filter(|e| {
            e.kind == EventKind::Forecast
                && e.category == Category::Income
                && e.source == Some(ProjectionSource::Recurring)
        })
        .collect();
    assert!(
        income_events.len() == 4 || income_events.len() == 5,
        "expected 4 or 5 income events, got {}",
        income_events.len()
    );
    let mut dates: Vec<NaiveDate> = income_events.iter().map(|e| e.date).collect();
    dates.sort();
    assert!(dates.windows(2).all(|pair| (pair[1] - pair[0]).num_days() == 14));
    // Aligned to the historical weekday (2024-07-05 was a Friday).
    assert!(dates
        .iter()
        .all(|d| cashflow_forecaster::utils::weekday_index(*d) == 4));
}

#[test]
fn transfer_drop_scenario() {
    let txs = vec![
        tx("2024-12-20", "Online Transfer to Savings", -500.0),
        tx("2024-12-20", "Payroll Direct Deposit", 2500.0),
    ];
    let response = run_forecast(
        1_000.0,
        &txs,
        &[],
        30,
        ForecastMethod::Recurring,
        Some(date("2025-01-02")),
    )
    .unwrap();

    assert!(response
        .transactions
        .iter()
        .all(|e| !e.description.contains("Online Transfer")));
    let payroll = response
        .transactions
        .iter()
        .find(|e| e.description.contains("Payroll"))
        .expect("payroll retained");
    assert_eq!(payroll.category, Category::Income);
}

#[test]
fn subscription_constancy_scenario() {
    // Netflix $15.99 for 10 consecutive months: projected events keep the
    // exact amount, with no seasonal adjustment.
    let txs = monthly("Netflix.com", -15.99, "2024-03-15", 10, 15);
    let response = run_forecast(
        500.0,
        &txs,
        &[],
        60,
        ForecastMethod::Recurring,
        Some(date("2025-01-02")),
    )
    .unwrap();

    let subscription_events: Vec<&ProjectedEvent> = response
        .transactions
        .iter()
        .filter(|e| e.kind == EventKind::Forecast && e.category == Category::Subscriptions)
        .collect();
    assert!(!subscription_events.is_empty());
    assert!(subscription_events
        .iter()
        .all(|e| (e.amount + 15.99).abs() < 1e-9));
}

#[test]
fn reconciliation_satisfaction_property() {
    // $400 groceries per week for 20 weeks. However the behavior projector
    // shapes its events, the reconciled grocery total must satisfy the
    // rule's ratio against the computed target.
    let mut txs: Vec<Transaction> = (0..20)
        .map(|i| Transaction {
            date: date("2024-08-17") + Days::new(i * 7),
            description: "Kroger".to_string(),
            amount: -400.0 - (i % 4) as f64,
            category: None,
        })
        .collect();
    txs.push(tx("2024-12-30", "Payroll Direct Deposit", 4000.0));

    let engine = ForecastEngine::new();
    let start = date("2025-01-02");
    let horizon = 30;
    let response = engine
        .run_forecast(3_000.0, &txs, &[], horizon, ForecastMethod::Hybrid, Some(start))
        .unwrap();

    let sanitized = normalize::sanitize_transactions(&txs, engine.alias_cache());
    let ledger = history::build_ledger(3_000.0, &sanitized);
    let target = reconcile::expected_total(&ledger, Category::Groceries, horizon, Polarity::Negative)
        .expect("grocery target");

    let projected: f64 = response
        .transactions
        .iter()
        .filter(|e| e.kind == EventKind::Forecast && e.category == Category::Groceries)
        .map(|e| e.amount)
        .sum();
    assert!(projected < 0.0, "grocery projection should be an outflow");
    assert!(
        projected.abs() >= target.abs() * 0.55 - 1e-6,
        "projected {projected} misses target {target}"
    );
}

#[test]
fn degraded_mode_scenario() {
    let mut txs = monthly("Sunset Apartments Rent", -2000.0, "2024-01-01", 12, 1);
    txs.extend((0..20).map(|i| Transaction {
        date: date("2024-08-17") + Days::new(i * 7),
        description: "Kroger".to_string(),
        amount: -400.0 - (i % 4) as f64,
        category: None,
    }));

    let engine = ForecastEngine::without_trend_model();
    let response = engine
        .run_forecast(
            8_000.0,
            &txs,
            &[],
            30,
            ForecastMethod::Hybrid,
            Some(date("2025-01-02")),
        )
        .unwrap();

    assert_eq!(response.summary.method, "hybrid");
    assert!(!response.habits.is_empty());
    assert!(response
        .habits
        .iter()
        .all(|h| matches!(h.source, ProjectionSource::Recurring | ProjectionSource::Behavior)));

    // Prophet-only mode with the same engine is a hard error.
    let result = engine.run_forecast(
        8_000.0,
        &txs,
        &[],
        30,
        ForecastMethod::Prophet,
        Some(date("2025-01-02")),
    );
    assert!(matches!(result, Err(ForecastError::TrendModelUnavailable)));
}

#[test]
fn balance_continuity_property() {
    let mut txs = monthly("Sunset Apartments Rent", -2000.0, "2024-01-01", 12, 1);
    txs.extend(monthly("Payroll Direct Deposit", 4000.0, "2024-01-05", 12, 5));
    txs.extend((0..20).map(|i| Transaction {
        date: date("2024-08-17") + Days::new(i * 7),
        description: "Kroger".to_string(),
        amount: -380.0 - (i % 5) as f64,
        category: None,
    }));

    let opening = 5_000.0;
    let response = run_forecast(
        opening,
        &txs,
        &[],
        45,
        ForecastMethod::Hybrid,
        Some(date("2025-01-02")),
    )
    .unwrap();

    let total: f64 = response.transactions.iter().map(|e| e.amount).sum();
    let last_balance = response.forecast.last().unwrap().balance;
    assert!(
        (last_balance - (opening + total)).abs() < 1e-6,
        "balance drifted: {last_balance} vs {}",
        opening + total
    );
}

#[test]
fn horizon_containment_property() {
    let mut txs = monthly("Sunset Apartments Rent", -2000.0, "2024-01-01", 12, 1);
    txs.extend(monthly("Payroll Direct Deposit", 4000.0, "2024-01-05", 12, 5));

    let start = date("2025-01-02");
    let horizon = 21;
    let response = run_forecast(
        5_000.0,
        &txs,
        &[],
        horizon,
        ForecastMethod::Hybrid,
        Some(start),
    )
    .unwrap();

    assert!(response
        .transactions
        .iter()
        .filter(|e| e.kind == EventKind::Forecast)
        .all(|e| e.date >= start && e.date < start + Days::new(horizon as u64)));
}

#[test]
fn sanitized_output_round_trips() {
    let txs = monthly("Sunset Apartments Rent", -2000.0, "2024-01-01", 12, 1);
    let response = run_forecast(
        5_000.0,
        &txs,
        &[],
        30,
        ForecastMethod::Hybrid,
        Some(date("2025-01-02")),
    )
    .unwrap();

    let json = serde_json::to_string(&response).unwrap();
    let reparsed: ForecastResponse = serde_json::from_str(&json).unwrap();
    let json_again = serde_json::to_string(&reparsed).unwrap();
    assert_eq!(json, json_again);
}

#[test]
fn scheduled_events_flow_through() {
    let scheduled = vec![ScheduledEvent {
        pattern: SchedulePattern::Biweekly,
        amount: 3200.0,
        description: "Contract payout".to_string(),
        weekday: Some(4),
        day: None,
        date: None,
    }];
    let response = run_forecast(
        1_000.0,
        &[],
        &scheduled,
        30,
        ForecastMethod::Hybrid,
        Some(date("2025-01-02")),
    )
    .unwrap();

    let scheduled_events: Vec<&ProjectedEvent> = response
        .transactions
        .iter()
        .filter(|e| e.kind == EventKind::Scheduled)
        .collect();
    assert_eq!(scheduled_events.len(), 3);
    assert!(scheduled_events.iter().all(|e| e.category == Category::Income));
    assert!((response.summary.total_income - 9600.0).abs() < 1e-6);
}

#[test]
fn calendar_covers_thirty_days() {
    let mut txs = monthly("Sunset Apartments Rent", -2000.0, "2024-01-01", 12, 1);
    txs.extend(monthly("Payroll Direct Deposit", 4000.0, "2024-01-05", 12, 5));
    let start = date("2025-01-02");
    let response = run_forecast(
        5_000.0,
        &txs,
        &[],
        120,
        ForecastMethod::Recurring,
        Some(start),
    )
    .unwrap();

    assert!(!response.calendar.is_empty());
    assert!(response
        .calendar
        .iter()
        .all(|day| day.date >= start && day.date <= start + Days::new(30)));
}

#[test]
fn engine_output_is_stable_when_replayed() {
    // Re-running the engine over its own historical echo yields the same
    // projection for the same start date.
    let txs = monthly("Sunset Apartments Rent", -2000.0, "2024-01-01", 12, 1);
    let engine = ForecastEngine::new();
    let start = date("2025-01-02");

    let first = engine
        .run_forecast(5_000.0, &txs, &[], 30, ForecastMethod::Recurring, Some(start))
        .unwrap();
    let echoed: Vec<Transaction> = first
        .transactions
        .iter()
        .filter(|e| e.kind == EventKind::Historical)
        .map(|e| Transaction {
            date: e.date,
            description: e.description.clone(),
            amount: e.amount,
            category: Some(e.category),
        })
        .collect();
    let second = engine
        .run_forecast(5_000.0, &echoed, &[], 30, ForecastMethod::Recurring, Some(start))
        .unwrap();

    let forecast_amounts = |response: &ForecastResponse| -> Vec<(NaiveDate, i64)> {
        response
            .transactions
            .iter()
            .filter(|e| e.kind == EventKind::Forecast)
            .map(|e| (e.date, (e.amount * 100.0).round() as i64))
            .collect()
    };
    assert_eq!(forecast_amounts(&first), forecast_amounts(&second));
}
