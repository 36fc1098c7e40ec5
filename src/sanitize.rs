use crate::schema::ForecastResponse;

/// Replace non-finite values with 0.0 so the response serializes to plain
/// JSON numbers.
pub fn scrub(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        0.0
    }
}

/// Walk the full response and scrub every numeric field. Amounts are also
/// scrubbed at construction; this is the transport-level guarantee.
pub fn sanitize_response(response: &mut ForecastResponse) {
    let summary = &mut response.summary;
    summary.opening_balance = scrub(summary.opening_balance);
    summary.final_balance = scrub(summary.final_balance);
    summary.net_change = scrub(summary.net_change);
    summary.total_income = scrub(summary.total_income);
    summary.total_expenses = scrub(summary.total_expenses);
    summary.minimum_balance = scrub(summary.minimum_balance);
    for total in summary.category_breakdown.values_mut() {
        *total = scrub(*total);
    }
    for total in summary.expense_breakdown.values_mut() {
        *total = scrub(*total);
    }
    for total in summary.income_breakdown.values_mut() {
        *total = scrub(*total);
    }

    for day in &mut response.forecast {
        day.amount = scrub(day.amount);
        day.balance = scrub(day.balance);
    }
    for event in &mut response.transactions {
        event.amount = scrub(event.amount);
        if let Some(balance) = event.balance {
            event.balance = Some(scrub(balance));
        }
    }
    for day in &mut response.calendar {
        day.net = scrub(day.net);
        day.income = scrub(day.income);
        day.expenses = scrub(day.expenses);
        day.balance = scrub(day.balance);
        for expense in &mut day.top_expenses {
            expense.amount = scrub(expense.amount);
        }
    }
    for habit in &mut response.habits {
        habit.average_amount = scrub(habit.average_amount);
        if let Some(value) = habit.average_weekly_spend {
            habit.average_weekly_spend = Some(scrub(value));
        }
        if let Some(value) = habit.average_horizon_total {
            habit.average_horizon_total = Some(scrub(value));
        }
        if let Some(value) = habit.variance {
            habit.variance = Some(scrub(value));
        }
    }
}
