use std::collections::HashMap;

use chrono::{Datelike, NaiveDate};

use crate::category::Category;
use crate::config::EngineConfig;
use crate::schema::LedgerEntry;

/// Per-(category, calendar month) multiplier relative to the category's
/// overall mean magnitude.
pub type SeasonalityFactors = HashMap<(Category, u32), f64>;

/// Derive monthly adjustment factors from expense history. A factor above
/// 1.0 means the category historically runs hotter in that month.
pub fn seasonality_factors(expenses: &[LedgerEntry]) -> SeasonalityFactors {
    let mut factors = SeasonalityFactors::new();
    if expenses.is_empty() {
        return factors;
    }

    let mut by_category: HashMap<Category, Vec<(u32, f64)>> = HashMap::new();
    for entry in expenses {
        by_category
            .entry(entry.category)
            .or_default()
            .push((entry.date.month(), entry.amount.abs()));
    }

    for (category, rows) in by_category {
        let base_avg = rows.iter().map(|(_, abs)| abs).sum::<f64>() / rows.len() as f64;
        if !base_avg.is_finite() || base_avg == 0.0 {
            continue;
        }

        let mut month_sums: HashMap<u32, (f64, usize)> = HashMap::new();
        for (month, abs) in rows {
            let slot = month_sums.entry(month).or_insert((0.0, 0));
            slot.0 += abs;
            slot.1 += 1;
        }

        for (month, (sum, count)) in month_sums {
            let month_avg = sum / count as f64;
            if month_avg.is_finite() && month_avg > 0.0 {
                factors.insert((category, month), month_avg / base_avg);
            }
        }
    }

    factors
}

/// Apply the month factor for `target_date`, clamped by flow direction.
/// Extended-history categories bypass adjustment entirely.
pub fn seasonal_adjust(
    amount: f64,
    category: Category,
    target_date: NaiveDate,
    factors: &SeasonalityFactors,
    config: &EngineConfig,
) -> f64 {
    if amount == 0.0 {
        return 0.0;
    }
    let mut factor = factors
        .get(&(category, target_date.month()))
        .copied()
        .unwrap_or(1.0);

    if EngineConfig::is_extended_history(category) {
        factor = 1.0;
    } else if amount < 0.0 {
        factor = factor.clamp(config.seasonal_expense_min, config.seasonal_expense_max);
    } else {
        factor = factor.clamp(config.seasonal_income_min, config.seasonal_income_max);
    }

    amount * factor
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(date: &str, category: Category, amount: f64) -> LedgerEntry {
        LedgerEntry {
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            description: String::new(),
            amount,
            category,
            balance: 0.0,
        }
    }

    #[test]
    fn test_factors_reflect_monthly_skew() {
        let expenses = vec![
            entry("2024-01-10", Category::Dining, -50.0),
            entry("2024-01-20", Category::Dining, -50.0),
            entry("2024-06-10", Category::Dining, -150.0),
            entry("2024-06-20", Category::Dining, -150.0),
        ];
        let factors = seasonality_factors(&expenses);
        let january = factors.get(&(Category::Dining, 1)).copied().unwrap();
        let june = factors.get(&(Category::Dining, 6)).copied().unwrap();
        assert!(january < 1.0);
        assert!(june > 1.0);
        assert!((january - 0.5).abs() < 1e-9);
        assert!((june - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_expense_clamp() {
        let config = EngineConfig::default();
        let mut factors = SeasonalityFactors::new();
        factors.insert((Category::Dining, 12), 3.0);
        factors.insert((Category::Dining, 2), 0.1);
        let december = NaiveDate::from_ymd_opt(2025, 12, 5).unwrap();
        let february = NaiveDate::from_ymd_opt(2025, 2, 5).unwrap();
        assert!((seasonal_adjust(-100.0, Category::Dining, december, &factors, &config) + 150.0).abs() < 1e-9);
        assert!((seasonal_adjust(-100.0, Category::Dining, february, &factors, &config) + 65.0).abs() < 1e-9);
    }

    #[test]
    fn test_extended_history_bypass() {
        let config = EngineConfig::default();
        let mut factors = SeasonalityFactors::new();
        factors.insert((Category::Rent, 7), 1.4);
        let july = NaiveDate::from_ymd_opt(2025, 7, 1).unwrap();
        assert_eq!(
            seasonal_adjust(-2000.0, Category::Rent, july, &factors, &config),
            -2000.0
        );
    }

    #[test]
    fn test_income_clamp() {
        let config = EngineConfig::default();
        let mut factors = SeasonalityFactors::new();
        factors.insert((Category::Shopping, 3), 0.2);
        let march = NaiveDate::from_ymd_opt(2025, 3, 15).unwrap();
        // A positive (refund-like) flow in a non-extended category uses the
        // income clamp floor.
        assert!((seasonal_adjust(100.0, Category::Shopping, march, &factors, &config) - 70.0).abs() < 1e-9);
    }
}
