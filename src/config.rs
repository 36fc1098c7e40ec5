use crate::category::Category;

/// Sign requirement for a reconciliation target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Polarity {
    Positive,
    Negative,
    Any,
}

/// Per-category reconciliation rule. `max_scale` bounds how far existing
/// projections may be multiplied toward the target; residual injections are
/// spaced `interval_days` apart and capped at `max_events`.
#[derive(Debug, Clone)]
pub struct ReconcileRule {
    pub category: Category,
    pub polarity: Polarity,
    pub min_abs: f64,
    pub satisfied_ratio: f64,
    pub only_increase: bool,
    pub max_scale: f64,
    pub interval_days: i64,
    pub max_events: usize,
}

/// Engine tuning knobs. Defaults reproduce the calibrated production values;
/// tests override individual fields.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    // Guardrails for data-driven models.
    pub min_history_points: usize,
    pub min_nonzero_points: usize,
    pub min_total_amount: f64,

    // Trend (statistical) forecasting limits.
    pub statistical_max_history_days: usize,
    pub statistical_recent_window_days: usize,
    pub statistical_recent_total_days: usize,
    pub statistical_min_recent_total: f64,
    pub statistical_min_recent_nonzero: usize,
    pub statistical_max_growth_ratio: f64,
    pub statistical_total_growth_ratio: f64,
    pub statistical_floor_ratio: f64,
    pub max_statistical_categories: usize,

    // Recurring detection tuning.
    pub recurring_recent_window_days: i64,
    pub recurring_max_inactive_days: i64,
    pub recurring_min_recency_hits: usize,
    pub recurring_min_weekly_occurrences: usize,
    pub recurring_min_monthly_occurrences: usize,
    pub recurring_min_quarterly_occurrences: usize,
    pub recurring_min_yearly_occurrences: usize,
    pub recurring_min_interval_match_ratio: f64,
    pub recurring_minimum_interval: f64,
    pub recurring_staleness_multiplier: f64,
    pub recurring_amount_std_ratio: f64,
    pub rent_annual_escalation: f64,

    // Behavior spending heuristics.
    pub behavior_recent_days: i64,
    pub behavior_max_history_days: i64,
    pub behavior_min_support: usize,
    pub behavior_income_min_support: usize,
    pub behavior_max_events_per_week: usize,
    pub behavior_spike_std_multiplier: f64,
    pub behavior_income_spike_multiplier: f64,
    pub behavior_recent_total_days: i64,
    pub behavior_min_recent_total: f64,
    pub behavior_min_recent_nonzero: usize,
    pub behavior_total_growth_ratio: f64,

    // Trend model adaptation (the variance-adaptive smoothing of the
    // flat-growth seasonal model).
    pub trend_base_smoothing: f64,
    pub trend_high_variance_smoothing: f64,
    pub trend_variance_ratio_threshold: f64,
    pub trend_short_history_days: i64,
    pub trend_quarterly_span_days: i64,

    // Reconciliation injection cap multiplier.
    pub reconciliation_max_injection_multiplier: f64,

    // Seasonality clamps on application.
    pub seasonal_expense_min: f64,
    pub seasonal_expense_max: f64,
    pub seasonal_income_min: f64,
    pub seasonal_income_max: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_history_points: 21,
            min_nonzero_points: 4,
            min_total_amount: 80.0,

            statistical_max_history_days: 365,
            statistical_recent_window_days: 180,
            statistical_recent_total_days: 120,
            statistical_min_recent_total: 100.0,
            statistical_min_recent_nonzero: 4,
            statistical_max_growth_ratio: 1.65,
            statistical_total_growth_ratio: 1.35,
            statistical_floor_ratio: 0.18,
            max_statistical_categories: 16,

            recurring_recent_window_days: 180,
            recurring_max_inactive_days: 120,
            recurring_min_recency_hits: 2,
            recurring_min_weekly_occurrences: 3,
            recurring_min_monthly_occurrences: 3,
            recurring_min_quarterly_occurrences: 3,
            recurring_min_yearly_occurrences: 3,
            recurring_min_interval_match_ratio: 0.6,
            recurring_minimum_interval: 5.0,
            recurring_staleness_multiplier: 1.4,
            recurring_amount_std_ratio: 0.75,
            rent_annual_escalation: 0.03,

            behavior_recent_days: 120,
            behavior_max_history_days: 365,
            behavior_min_support: 3,
            behavior_income_min_support: 2,
            behavior_max_events_per_week: 3,
            behavior_spike_std_multiplier: 1.6,
            behavior_income_spike_multiplier: 3.25,
            behavior_recent_total_days: 120,
            behavior_min_recent_total: 90.0,
            behavior_min_recent_nonzero: 3,
            behavior_total_growth_ratio: 1.35,

            trend_base_smoothing: 0.08,
            trend_high_variance_smoothing: 0.18,
            trend_variance_ratio_threshold: 1.2,
            trend_short_history_days: 120,
            trend_quarterly_span_days: 200,

            reconciliation_max_injection_multiplier: 2.0,

            seasonal_expense_min: 0.65,
            seasonal_expense_max: 1.5,
            seasonal_income_min: 0.7,
            seasonal_income_max: 1.8,
        }
    }
}

impl EngineConfig {
    /// Categories whose cadence is stable enough to model from up to a year
    /// of history and to skip seasonal adjustment.
    pub const EXTENDED_HISTORY_CATEGORIES: [Category; 7] = [
        Category::Rent,
        Category::Mortgage,
        Category::Insurance,
        Category::Internet,
        Category::Phone,
        Category::Utilities,
        Category::Income,
    ];

    /// Categories too irregular for behavior or trend projection.
    pub const SKIP_CATEGORIES: [Category; 4] = [
        Category::Other,
        Category::Healthcare,
        Category::Travel,
        Category::Gifts,
    ];

    /// Tokens dropped when deriving display aliases from raw descriptions.
    pub const ALIAS_STOPWORDS: [&'static str; 33] = [
        "web", "id", "ppd", "transaction", "online", "transfer", "payment", "manual", "autopay",
        "account", "memo", "credit", "debit", "visa", "mastercard", "purchase", "sale", "card",
        "inst", "xfer", "to", "from", "llc", "inc", "company", "corp", "co", "pllc", "llp", "aba",
        "ach", "plc", "na",
    ];

    pub fn is_extended_history(category: Category) -> bool {
        Self::EXTENDED_HISTORY_CATEGORIES.contains(&category)
    }

    pub fn is_skip_category(category: Category) -> bool {
        Self::SKIP_CATEGORIES.contains(&category)
    }

    /// Categories allowed a lower behavior support threshold.
    pub fn is_low_support(category: Category) -> bool {
        Self::EXTENDED_HISTORY_CATEGORIES.contains(&category)
    }

    pub fn behavior_staleness_limit_days(&self) -> i64 {
        (self.behavior_recent_days * 2).max(240)
    }

    /// Fixed reconciliation table: per-category macro plausibility targets.
    pub fn reconciliation_rules(&self) -> Vec<ReconcileRule> {
        vec![
            ReconcileRule {
                category: Category::Income,
                polarity: Polarity::Positive,
                min_abs: 200.0,
                satisfied_ratio: 0.93,
                only_increase: true,
                max_scale: 4.0,
                interval_days: 14,
                max_events: 3,
            },
            ReconcileRule {
                category: Category::Rent,
                polarity: Polarity::Negative,
                min_abs: 400.0,
                satisfied_ratio: 0.85,
                only_increase: true,
                max_scale: 3.5,
                interval_days: 30,
                max_events: 2,
            },
            ReconcileRule {
                category: Category::Groceries,
                polarity: Polarity::Negative,
                min_abs: 60.0,
                satisfied_ratio: 0.55,
                only_increase: false,
                max_scale: 1.8,
                interval_days: 7,
                max_events: 4,
            },
            ReconcileRule {
                category: Category::Dining,
                polarity: Polarity::Negative,
                min_abs: 40.0,
                satisfied_ratio: 0.50,
                only_increase: false,
                max_scale: 1.9,
                interval_days: 7,
                max_events: 4,
            },
            ReconcileRule {
                category: Category::BankFee,
                polarity: Polarity::Negative,
                min_abs: 20.0,
                satisfied_ratio: 0.50,
                only_increase: false,
                max_scale: 3.0,
                interval_days: 30,
                max_events: 1,
            },
            ReconcileRule {
                category: Category::Gas,
                polarity: Polarity::Negative,
                min_abs: 40.0,
                satisfied_ratio: 0.60,
                only_increase: false,
                max_scale: 1.7,
                interval_days: 14,
                max_events: 3,
            },
            ReconcileRule {
                category: Category::Shopping,
                polarity: Polarity::Negative,
                min_abs: 60.0,
                satisfied_ratio: 0.50,
                only_increase: false,
                max_scale: 1.7,
                interval_days: 14,
                max_events: 3,
            },
            ReconcileRule {
                category: Category::Subscriptions,
                polarity: Polarity::Negative,
                min_abs: 40.0,
                satisfied_ratio: 0.70,
                only_increase: false,
                max_scale: 2.6,
                interval_days: 30,
                max_events: 2,
            },
            ReconcileRule {
                category: Category::Healthcare,
                polarity: Polarity::Negative,
                min_abs: 80.0,
                satisfied_ratio: 0.45,
                only_increase: false,
                max_scale: 2.2,
                interval_days: 30,
                max_events: 2,
            },
            ReconcileRule {
                category: Category::Other,
                polarity: Polarity::Any,
                min_abs: 80.0,
                satisfied_ratio: 0.55,
                only_increase: false,
                max_scale: 2.4,
                interval_days: 14,
                max_events: 4,
            },
        ]
    }
}
