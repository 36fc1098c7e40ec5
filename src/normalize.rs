use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use crate::category::{categorize_cached, AliasCache, Category};
use crate::schema::Transaction;

const FILLER_TOKENS: [&str; 6] = ["payment", "purchase", "transaction", "pos", "debit", "credit"];

const TRANSFER_BLACKLIST: [&str; 6] = [
    "account transfer",
    "internal transfer",
    "payment thank you",
    "loan payment",
    "manual db",
    "bank to bank",
];

const TRANSFER_WHITELIST: [&str; 12] = [
    "payroll",
    "paycheck",
    "salary",
    "bonus",
    "reimbursement",
    "refund",
    "interest",
    "dividend",
    "royalty",
    "direct deposit",
    "mobile deposit",
    "remote deposit",
];

static TRANSFER_REGEXES: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"\btransfer\b",
        r"\bxfer\b",
        r"\bach\b",
        r"\bautopay\b",
        r"\bonline\s+transfer\b",
        r"\bonline\s+payment\b",
        r"\bdeposit\s+to\b",
        r"\bdeposit\s+from\b",
        r"\bpayment\s+to\b",
        r"\bpayment\s+from\b",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("static transfer pattern"))
    .collect()
});

/// Canonical form used for grouping: lowercase, filler tokens stripped,
/// punctuation flattened, whitespace collapsed.
pub fn normalize_description(description: &str) -> String {
    if description.is_empty() {
        return String::new();
    }
    let mut desc = description.to_lowercase();
    for token in FILLER_TOKENS {
        desc = desc.replace(token, "");
    }
    let flattened: String = desc
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c.is_whitespace() {
                c
            } else {
                ' '
            }
        })
        .collect();
    flattened.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Intra-account movements must not influence forecasts. A description is a
/// transfer when it matches a blacklist phrase, or a transfer regex without a
/// whitelist phrase overriding it.
pub fn is_internal_transfer(description: &str) -> bool {
    if description.is_empty() {
        return false;
    }

    let lowered = description.to_lowercase();
    let flattened: String = lowered
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c.is_whitespace() { c } else { ' ' })
        .collect();
    let normalized = flattened.split_whitespace().collect::<Vec<_>>().join(" ");

    if TRANSFER_BLACKLIST.iter().any(|phrase| normalized.contains(phrase)) {
        return true;
    }

    for pattern in TRANSFER_REGEXES.iter() {
        if pattern.is_match(&normalized) {
            if TRANSFER_WHITELIST.iter().any(|phrase| normalized.contains(phrase)) {
                return false;
            }
            return true;
        }
    }

    false
}

/// Drop internal transfers and duplicates, trim descriptions, and annotate
/// every surviving transaction with a category (feeding the alias cache).
pub fn sanitize_transactions(transactions: &[Transaction], cache: &AliasCache) -> Vec<Transaction> {
    let mut cleaned = Vec::with_capacity(transactions.len());
    let mut seen: HashSet<(String, i64, String)> = HashSet::new();

    for entry in transactions {
        let description = entry.description.trim().to_string();
        if is_internal_transfer(&description) {
            continue;
        }
        if !entry.amount.is_finite() {
            continue;
        }

        let normalized = normalize_description(&description);
        let desc_key = if normalized.is_empty() {
            description.to_lowercase()
        } else {
            normalized.clone()
        };
        let cents = (entry.amount * 100.0).round() as i64;
        let key = (entry.date.format("%Y-%m-%d").to_string(), cents, desc_key);
        if !seen.insert(key) {
            continue;
        }

        let category = categorize_cached(cache, &description, Some(entry.amount));
        if category != Category::Other {
            cache.learn(&normalized, category);
        }

        cleaned.push(Transaction {
            date: entry.date,
            description,
            amount: entry.amount,
            category: Some(category),
        });
    }

    cleaned
}
