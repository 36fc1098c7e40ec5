use std::collections::{BTreeMap, HashMap};

use chrono::{Days, NaiveDate};

use crate::category::Category;
use crate::config::EngineConfig;
use crate::normalize::normalize_description;
use crate::schema::{LedgerEntry, Transaction};

/// Dense day-indexed series; gaps between the first and last observed day
/// are zero-filled.
pub type DailySeries = BTreeMap<NaiveDate, f64>;

/// Produce the date-sorted ledger with running balances.
pub fn build_ledger(opening_balance: f64, transactions: &[Transaction]) -> Vec<LedgerEntry> {
    let mut sorted: Vec<&Transaction> = transactions.iter().collect();
    sorted.sort_by_key(|tx| tx.date);

    let mut balance = opening_balance;
    sorted
        .into_iter()
        .map(|tx| {
            balance += tx.amount;
            LedgerEntry {
                date: tx.date,
                description: tx.description.clone(),
                amount: tx.amount,
                category: tx.category.unwrap_or(Category::Other),
                balance,
            }
        })
        .collect()
}

/// Aggregate history into a dense daily series per category, keeping only
/// categories with enough signal for statistical modeling.
pub fn daily_category_series(
    history: &[LedgerEntry],
    config: &EngineConfig,
) -> BTreeMap<Category, DailySeries> {
    let mut series_map = BTreeMap::new();
    if history.is_empty() {
        return series_map;
    }

    let mut grouped: BTreeMap<Category, BTreeMap<NaiveDate, f64>> = BTreeMap::new();
    for entry in history {
        *grouped
            .entry(entry.category)
            .or_default()
            .entry(entry.date)
            .or_insert(0.0) += entry.amount;
    }

    for (category, sparse) in grouped {
        let Some((&first, _)) = sparse.iter().next() else {
            continue;
        };
        let Some((&last, _)) = sparse.iter().next_back() else {
            continue;
        };

        let mut series = DailySeries::new();
        let mut day = first;
        while day <= last {
            series.insert(day, sparse.get(&day).copied().unwrap_or(0.0));
            day = day + Days::new(1);
        }

        if series.len() > config.statistical_max_history_days {
            let keep_from = *series
                .keys()
                .rev()
                .nth(config.statistical_max_history_days - 1)
                .unwrap();
            series = series.split_off(&keep_from);
        }

        let non_zero = series.values().filter(|v| v.abs() > 1e-6).count();
        if series.len() < config.min_history_points {
            continue;
        }
        if non_zero < config.min_nonzero_points {
            continue;
        }
        let total_abs: f64 = series.values().map(|v| v.abs()).sum();
        if total_abs < config.min_total_amount {
            continue;
        }

        series_map.insert(category, series);
    }

    series_map
}

/// One merchant-level alias inside a category.
#[derive(Debug, Clone)]
pub struct AliasEntry {
    pub label: String,
    pub normalized: String,
    pub raw_description: String,
    pub share: f64,
    pub total: f64,
}

/// Display metadata for a category, derived from where its spend actually
/// goes.
#[derive(Debug, Clone)]
pub struct CategoryAlias {
    pub display: String,
    pub category_title: String,
    pub primary: AliasEntry,
    pub entries: Vec<AliasEntry>,
    pub total_spend: f64,
}

pub type CategoryAliases = HashMap<Category, CategoryAlias>;

fn is_numeric_token(token: &str) -> bool {
    token.chars().any(|c| c.is_ascii_digit())
}

fn capitalize_words(text: &str) -> String {
    text.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Build a short human label from a normalized description, falling back to
/// the raw sample when stopword filtering consumes everything.
pub fn format_alias_label(normalized: &str, sample: &str) -> String {
    let base = normalized.trim();
    let sample_text = sample.trim();

    let tokens: Vec<&str> = base.split_whitespace().collect();
    let mut filtered: Vec<String> = tokens
        .iter()
        .map(|token| token.to_lowercase())
        .filter(|token| !EngineConfig::ALIAS_STOPWORDS.contains(&token.as_str()))
        .filter(|token| !is_numeric_token(token))
        .collect();

    if filtered.is_empty() && !sample_text.is_empty() {
        let sample_clean: String = sample_text
            .chars()
            .map(|c| if c.is_ascii_alphabetic() || c.is_whitespace() { c } else { ' ' })
            .collect::<String>()
            .to_lowercase();
        filtered = sample_clean
            .split_whitespace()
            .filter(|token| !EngineConfig::ALIAS_STOPWORDS.contains(token))
            .filter(|token| !is_numeric_token(token))
            .map(str::to_string)
            .collect();
    }

    if filtered.is_empty() {
        filtered = tokens.iter().take(3).map(|t| t.to_string()).collect();
    }

    let mut label = filtered
        .iter()
        .take(4)
        .cloned()
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string();
    if label.is_empty() {
        label = if !sample_text.is_empty() {
            sample_text.to_string()
        } else if !base.is_empty() {
            base.to_string()
        } else {
            "Other".to_string()
        };
    }

    capitalize_words(&label)
}

/// Map each category to its dominant merchant aliases, weighted by expense
/// volume. The display label collapses to the dominant alias when it owns at
/// least 35% of the category's spend.
pub fn category_alias_map(history: &[LedgerEntry]) -> CategoryAliases {
    let mut aliases = CategoryAliases::new();
    if history.is_empty() {
        return aliases;
    }

    struct Group {
        total: f64,
        sample: String,
    }

    let mut grouped: HashMap<(Category, String), Group> = HashMap::new();
    for entry in history {
        if entry.amount >= 0.0 {
            continue;
        }
        let normalized = normalize_description(&entry.description);
        if normalized.is_empty() {
            continue;
        }
        let group = grouped
            .entry((entry.category, normalized))
            .or_insert(Group {
                total: 0.0,
                sample: String::new(),
            });
        group.total += entry.amount.abs();
        group.sample = entry.description.clone();
    }

    let mut per_category: HashMap<Category, Vec<(String, Group)>> = HashMap::new();
    for ((category, normalized), group) in grouped {
        per_category
            .entry(category)
            .or_default()
            .push((normalized, group));
    }

    for (category, mut groups) in per_category {
        let total_spend: f64 = groups.iter().map(|(_, g)| g.total).sum();
        if total_spend <= 0.0 {
            continue;
        }

        groups.sort_by(|a, b| {
            b.1.total
                .partial_cmp(&a.1.total)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });

        let entries: Vec<AliasEntry> = groups
            .into_iter()
            .map(|(normalized, group)| AliasEntry {
                label: format_alias_label(&normalized, &group.sample),
                normalized,
                raw_description: group.sample,
                share: group.total / total_spend,
                total: group.total,
            })
            .collect();

        let Some(primary) = entries.first().cloned() else {
            continue;
        };

        let category_title = category.title();
        let display = if category == Category::Other || primary.share >= 0.35 {
            primary.label.clone()
        } else {
            format!("{} - {}", category_title, primary.label)
        };

        aliases.insert(
            category,
            CategoryAlias {
                display,
                category_title,
                primary,
                entries: entries.into_iter().take(5).collect(),
                total_spend,
            },
        );
    }

    aliases
}

/// Display label for a category: its dominant alias when known, else the
/// category title.
pub fn display_name(aliases: &CategoryAliases, category: Category) -> String {
    aliases
        .get(&category)
        .map(|alias| alias.display.clone())
        .unwrap_or_else(|| category.title())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tx(date: &str, description: &str, amount: f64, category: Category) -> Transaction {
        Transaction {
            date: NaiveDate::parse_from_str(date, "%Y-%m-%d").unwrap(),
            description: description.to_string(),
            amount,
            category: Some(category),
        }
    }

    #[test]
    fn test_running_balance() {
        let txs = vec![
            tx("2025-01-03", "Groceries", -100.0, Category::Groceries),
            tx("2025-01-01", "Paycheck", 2000.0, Category::Income),
            tx("2025-01-02", "Dinner", -50.0, Category::Dining),
        ];
        let ledger = build_ledger(500.0, &txs);
        assert_eq!(ledger.len(), 3);
        assert_eq!(ledger[0].date, NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
        assert!((ledger[0].balance - 2500.0).abs() < 1e-9);
        assert!((ledger[2].balance - 2350.0).abs() < 1e-9);
    }

    #[test]
    fn test_daily_series_dense_and_gated() {
        let mut txs = Vec::new();
        let start = NaiveDate::from_ymd_opt(2025, 1, 1).unwrap();
        for week in 0..8 {
            txs.push(Transaction {
                date: start + Days::new(week * 7),
                description: "Market".to_string(),
                amount: -60.0,
                category: Some(Category::Groceries),
            });
        }
        // Two sparse entries fall below every gate.
        txs.push(tx("2025-01-05", "Clinic", -40.0, Category::Healthcare));
        let ledger = build_ledger(0.0, &txs);
        let series_map = daily_category_series(&ledger, &EngineConfig::default());

        let groceries = series_map.get(&Category::Groceries).unwrap();
        assert_eq!(groceries.len(), 50); // dense: 7 weeks of gaps + 8 events
        assert_eq!(groceries.values().filter(|v| v.abs() > 1e-6).count(), 8);
        assert!(!series_map.contains_key(&Category::Healthcare));
    }

    #[test]
    fn test_series_truncates_to_max_history() {
        let mut txs = Vec::new();
        let start = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
        for day in (0..500).step_by(5) {
            txs.push(Transaction {
                date: start + Days::new(day),
                description: "Cafe".to_string(),
                amount: -12.0,
                category: Some(Category::Dining),
            });
        }
        let ledger = build_ledger(0.0, &txs);
        let series_map = daily_category_series(&ledger, &EngineConfig::default());
        let dining = series_map.get(&Category::Dining).unwrap();
        assert_eq!(dining.len(), 365);
    }

    #[test]
    fn test_alias_label_strips_noise() {
        assert_eq!(format_alias_label("trader joe s 0552", "TRADER JOE'S #0552"), "Trader Joe S");
        assert_eq!(format_alias_label("ach web id 1234", "ACH WEB ID 1234"), "Ach Web Id");
    }

    #[test]
    fn test_alias_map_dominant_merchant() {
        let txs = vec![
            tx("2025-01-05", "Whole Foods Market", -400.0, Category::Groceries),
            tx("2025-01-12", "Whole Foods Market", -400.0, Category::Groceries),
            tx("2025-01-19", "Corner Shop", -50.0, Category::Groceries),
        ];
        let ledger = build_ledger(0.0, &txs);
        let aliases = category_alias_map(&ledger);
        let groceries = aliases.get(&Category::Groceries).unwrap();
        assert!(groceries.primary.share > 0.9);
        assert_eq!(groceries.display, "Whole Foods Market");
        assert_eq!(display_name(&aliases, Category::Groceries), "Whole Foods Market");
        assert_eq!(display_name(&aliases, Category::Gas), "Gas");
    }
}
