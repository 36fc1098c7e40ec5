use std::collections::HashMap;
use std::fmt;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use crate::normalize::normalize_description;

/// Closed category vocabulary. Every transaction maps to exactly one entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Rent,
    Mortgage,
    Utilities,
    Internet,
    Phone,
    Insurance,
    CarPayment,
    Subscriptions,
    CreditCardFee,
    BankFee,
    Groceries,
    Gas,
    Dining,
    Entertainment,
    Shopping,
    Healthcare,
    Gifts,
    Travel,
    Income,
    Other,
}

impl Category {
    pub const ALL: [Category; 20] = [
        Category::Rent,
        Category::Mortgage,
        Category::Utilities,
        Category::Internet,
        Category::Phone,
        Category::Insurance,
        Category::CarPayment,
        Category::Subscriptions,
        Category::CreditCardFee,
        Category::BankFee,
        Category::Groceries,
        Category::Gas,
        Category::Dining,
        Category::Entertainment,
        Category::Shopping,
        Category::Healthcare,
        Category::Gifts,
        Category::Travel,
        Category::Income,
        Category::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Rent => "rent",
            Category::Mortgage => "mortgage",
            Category::Utilities => "utilities",
            Category::Internet => "internet",
            Category::Phone => "phone",
            Category::Insurance => "insurance",
            Category::CarPayment => "car_payment",
            Category::Subscriptions => "subscriptions",
            Category::CreditCardFee => "credit_card_fee",
            Category::BankFee => "bank_fee",
            Category::Groceries => "groceries",
            Category::Gas => "gas",
            Category::Dining => "dining",
            Category::Entertainment => "entertainment",
            Category::Shopping => "shopping",
            Category::Healthcare => "healthcare",
            Category::Gifts => "gifts",
            Category::Travel => "travel",
            Category::Income => "income",
            Category::Other => "other",
        }
    }

    /// Human-readable form, e.g. `bank_fee` -> "Bank Fee".
    pub fn title(&self) -> String {
        self.as_str()
            .split('_')
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
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typical cadence a category is expected to follow, used by the behavior
/// projector to promote detected cadences.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclaredFrequency {
    Weekly,
    Monthly,
    Irregular,
    Seasonal,
}

pub fn declared_frequency(category: Category) -> Option<DeclaredFrequency> {
    use DeclaredFrequency::*;
    match category {
        Category::Rent
        | Category::Mortgage
        | Category::Utilities
        | Category::Internet
        | Category::Phone
        | Category::Insurance
        | Category::CarPayment
        | Category::Subscriptions
        | Category::CreditCardFee
        | Category::BankFee => Some(Monthly),
        Category::Groceries
        | Category::Gas
        | Category::Dining
        | Category::Entertainment
        | Category::Shopping => Some(Weekly),
        Category::Healthcare | Category::Other => Some(Irregular),
        Category::Gifts | Category::Travel => Some(Seasonal),
        Category::Income => None,
    }
}

const INCOME_KEYWORDS: &[&str] = &[
    "paycheck",
    "salary",
    "deposit",
    "income",
    "direct deposit",
    "dir dep",
    "payroll",
    "cashout",
    "zelle payment from",
    "remote online deposit",
    "venmo cashout",
    "cash app transfer from",
    "payout",
    "refund",
    "reimbursement",
    "royalty",
    "interest payment",
    "interest credit",
    "dividend",
    "paypal transfer",
    "cash rewards",
    "ach credit",
    "bank interest",
];

const RENT_KEYWORDS: &[&str] = &["rent", "lease", "bilt rent", "bilt payment", "property management"];

const MORTGAGE_KEYWORDS: &[&str] = &["mortgage", "home loan", "loan payment", "lendinghome"];

const UTILITIES_KEYWORDS: &[&str] = &[
    "electric",
    "electricity",
    "water",
    "sewer",
    "trash",
    "utility",
    "utilities",
    "power",
    "gas bill",
    "ladwp",
    "socalgas",
    "coned",
    "con ed",
    "nyseg",
    "pge",
    "pg&e",
    "sdge",
    "dte energy",
    "dominion energy",
    "national grid",
    "duke energy",
    "xcel energy",
];

const INTERNET_KEYWORDS: &[&str] = &[
    "internet",
    "wifi",
    "broadband",
    "spectrum",
    "xfinity",
    "comcast",
    "cox internet",
    "cox communications",
    "verizon fios",
    "fios",
    "fiber",
    "starlink",
    "at&t internet",
    "att internet",
    "frontier",
    "google fiber",
];

const PHONE_KEYWORDS: &[&str] = &[
    "phone",
    "mobile",
    "cellular",
    "wireless",
    "verizon",
    "t-mobile",
    "tmobile",
    "at&t",
    "att ",
    "sprint",
    "mint mobile",
    "visible",
    "cricket wireless",
    "boost mobile",
    "google fi",
    "metro pcs",
];

const INSURANCE_KEYWORDS: &[&str] = &[
    "insurance",
    "geico",
    "state farm",
    "progressive",
    "allstate",
    "nationwide",
    "usaa",
    "liberty mutual",
    "anthem",
    "blue cross",
    "blue shield",
    "aetna",
    "metlife",
    "guardian",
    "humana",
    "policy premium",
];

const CAR_PAYMENT_KEYWORDS: &[&str] = &[
    "car payment",
    "auto loan",
    "vehicle loan",
    "auto finance",
    "car note",
    "ford credit",
    "toyota financial",
    "honda financial",
    "ally auto",
    "capital one auto",
    "gm financial",
];

const SUBSCRIPTION_KEYWORDS: &[&str] = &[
    "netflix",
    "spotify",
    "subscription",
    "hulu",
    "disney",
    "digitalocean",
    "supabase",
    "openai",
    "chatgpt",
    "creem",
    "max.com",
    "max streaming",
    "apple.com/bill",
    "apple.com bill",
    "apple media",
    "youtube premium",
    "yt premium",
    "google storage",
    "google *",
    "microsoft 365",
    "adobe",
    "canva",
    "notion",
    "dropbox",
    "icloud",
    "patreon",
    "onlyfans",
    "substack",
    "calm.com",
    "headspace",
];

const GAS_KEYWORDS: &[&str] = &[
    "gas station",
    "fuel",
    "shell",
    "chevron",
    "exxon",
    "bp ",
    "bp-",
    "bp'",
    "texaco",
    "arco",
    "sunoco",
    "76 station",
    "76 gas",
    "mobil",
    "costco gas",
    "speedway",
    "valero",
    "conoco",
    "marathon",
    "circle k",
    "racetrac",
    "race trac",
    "pilot travel",
    "loves travel",
    "love's",
    "quiktrip",
    "qt ",
    "citgo",
    "caseys",
    "sheetz",
    "kum & go",
    "fuel center",
    "gasoline",
];

const GROCERY_KEYWORDS: &[&str] = &[
    "grocery",
    "grocer",
    "supermarket",
    "market",
    "whole foods",
    "wholefoods",
    "trader joe",
    "trader joe's",
    "aldi",
    "heb",
    "h-e-b",
    "sprouts",
    "wegmans",
    "meijer",
    "winco",
    "food lion",
    "fresh market",
    "fresh thyme",
    "grocery outlet",
    "99 ranch",
    "hmart",
    "h-mart",
    "piggly wiggly",
    "save mart",
    "smart & final",
    "shoprite",
    "stop & shop",
    "stop and shop",
    "giant food",
    "giant eagle",
    "ralphs",
    "publix",
    "vons",
    "costco",
    "bjs wholesale",
    "bj's",
    "sams club",
    "sam's club",
    "metro market",
    "kroger",
    "king soopers",
    "fry's food",
    "dillons",
    "new seasons",
    "market basket",
    "fairway market",
    "food 4 less",
    "sprouts farmers market",
    "wholefoods market",
];

const DINING_KEYWORDS: &[&str] = &[
    "restaurant",
    "dining",
    "cafe",
    "coffee",
    "starbucks",
    "mcdonald",
    "chipotle",
    "burger",
    "pizza",
    "grill",
    "kitchen",
    "bar & grill",
    "pub",
    "brew",
    "ubereats",
    "uber eats",
    "doordash",
    "door dash",
    "grubhub",
    "postmates",
    "seamless",
    "caviar",
    "panera",
    "sweetgreen",
    "shake shack",
    "in-n-out",
    "taco",
    "sushi",
    "ramen",
    "chick-fil",
    "popeyes",
    "wendys",
    "dunkin",
    "five guys",
    "panda express",
    "coffee bean",
    "peets",
    "jersey mike",
    "jimmy john",
    "del taco",
    "raising cane",
    "pret a manger",
    "wingstop",
    "bojangles",
];

const ENTERTAINMENT_KEYWORDS: &[&str] = &[
    "movie",
    "cinema",
    "concert",
    "entertainment",
    "theater",
    "amc",
    "regal",
    "ticketmaster",
    "fandango",
    "game stop",
    "gamestop",
    "spotify live",
    "eventbrite",
];

const GIFT_KEYWORDS: &[&str] = &[
    "gift",
    "present",
    "christmas",
    "holiday",
    "flowers.com",
    "1-800-flowers",
    "ftd.com",
];

const TRAVEL_KEYWORDS: &[&str] = &[
    "travel",
    "airline",
    "hotel",
    "flight",
    "vacation",
    "airbnb",
    "lyft",
    "uber",
    "delta",
    "united",
    "american airlines",
    "southwest",
    "spirit air",
    "jetblue",
    "alaska airlines",
    "amtrak",
    "greyhound",
    "marriott",
    "hilton",
    "hyatt",
    "ihg",
    "hampton inn",
    "holiday inn",
    "best western",
    "enterprise rent",
    "hertz",
    "avis",
    "budget car",
    "turo",
    "lyft ride",
    "uber trip",
    "ride share",
    "rideshare",
];

const SHOPPING_KEYWORDS: &[&str] = &[
    "amazon",
    "store",
    "shopping",
    "mall",
    "target",
    "walmart",
    "best buy",
    "ikea",
    "apple store",
    "apple.com",
    "lowes",
    "home depot",
    "costco.com",
    "ulta",
    "sephora",
    "nordstrom",
    "macys",
    "foot locker",
    "nike",
    "adidas",
    "lululemon",
    "rei",
    "guitar center",
    "micro center",
    "staples",
    "office depot",
    "wayfair",
    "etsy",
    "ebay",
    "poshmark",
    "fiverr",
    "shein",
    "temu",
    "currys",
    "bloomingdale",
    "uniqlo",
];

const BANK_FEE_KEYWORDS: &[&str] = &[
    "fee",
    "interest",
    "finance charge",
    "overdraft",
    "nsf",
    "service charge",
    "maintenance fee",
    "atm fee",
    "monthly service",
    "wire fee",
    "chargeback",
    "returned item fee",
    "insufficient funds",
    "late fee",
    "foreign transaction fee",
];

const HEALTHCARE_KEYWORDS: &[&str] = &[
    "doctor",
    "hospital",
    "pharmacy",
    "medical",
    "health",
    "clinic",
    "urgent care",
    "dental",
    "dentist",
    "orthodont",
    "vision",
    "optomet",
    "optical",
    "labcorp",
    "quest diagnostics",
    "cvs pharmacy",
    "walgreens",
    "rite aid",
    "goodrx",
    "optum",
    "kaiser",
    "sutter health",
    "cleveland clinic",
];

fn clean_text(text: &str) -> String {
    let lowered = text.to_lowercase();
    let replaced: String = lowered
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    replaced.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// A single-token keyword matches as a whole token or inside one; a
/// multi-word keyword matches as a contiguous substring of the cleaned
/// description.
fn contains_any(desc_clean: &str, desc_tokens: &[&str], keywords: &[&str]) -> bool {
    for keyword in keywords {
        let kw_clean = clean_text(keyword);
        if kw_clean.is_empty() {
            continue;
        }
        let kw_tokens: Vec<&str> = kw_clean.split_whitespace().collect();
        if kw_tokens.len() == 1 {
            let token = kw_tokens[0];
            if desc_tokens
                .iter()
                .any(|existing| *existing == token || existing.contains(token))
            {
                return true;
            }
        } else if desc_clean.contains(&kw_clean) {
            return true;
        }
    }
    false
}

/// Categorize a transaction from its description and signed amount.
///
/// Keyword families are evaluated in a fixed priority order; the first match
/// wins. Positive amounts without a payment/transfer phrase are forced to
/// income.
pub fn categorize(description: &str, amount: Option<f64>) -> Category {
    let desc = description.trim();
    if desc.is_empty() {
        return Category::Other;
    }

    let amount = amount.filter(|value| value.is_finite());
    let is_income_amount = amount.is_some_and(|value| value > 1e-6);
    let is_expense_amount = amount.is_some_and(|value| value < -1e-6);

    let desc_lower = desc.to_lowercase();
    let desc_clean = clean_text(desc);
    let desc_tokens: Vec<&str> = desc_clean.split_whitespace().collect();

    let matches = |keywords: &[&str]| contains_any(&desc_clean, &desc_tokens, keywords);

    if matches(INCOME_KEYWORDS) && !desc_lower.contains("security deposit") && !is_expense_amount {
        return Category::Income;
    }

    if is_income_amount && !matches(&["payment to", "transfer to"]) {
        return Category::Income;
    }

    if matches(RENT_KEYWORDS) {
        return Category::Rent;
    }
    if matches(MORTGAGE_KEYWORDS) {
        return Category::Mortgage;
    }
    if matches(UTILITIES_KEYWORDS) {
        return Category::Utilities;
    }
    if matches(INTERNET_KEYWORDS) {
        return Category::Internet;
    }
    if matches(PHONE_KEYWORDS) {
        return Category::Phone;
    }
    if matches(INSURANCE_KEYWORDS) {
        return Category::Insurance;
    }
    if matches(CAR_PAYMENT_KEYWORDS) {
        return Category::CarPayment;
    }
    if matches(SUBSCRIPTION_KEYWORDS) {
        return Category::Subscriptions;
    }
    if matches(GAS_KEYWORDS) || desc_lower.ends_with(" gas") || desc_lower.contains(" fuel ") {
        return Category::Gas;
    }
    if matches(GROCERY_KEYWORDS) {
        return Category::Groceries;
    }
    if matches(DINING_KEYWORDS) {
        return Category::Dining;
    }
    if matches(ENTERTAINMENT_KEYWORDS) {
        return Category::Entertainment;
    }
    if matches(GIFT_KEYWORDS) {
        return Category::Gifts;
    }
    if matches(TRAVEL_KEYWORDS) {
        return Category::Travel;
    }
    if matches(SHOPPING_KEYWORDS) {
        return Category::Shopping;
    }
    if matches(BANK_FEE_KEYWORDS) {
        if is_income_amount {
            return Category::Income;
        }
        if desc_lower.contains("credit") || desc_lower.contains("card") {
            return Category::CreditCardFee;
        }
        return Category::BankFee;
    }
    if matches(HEALTHCARE_KEYWORDS) {
        return Category::Healthcare;
    }

    if is_income_amount {
        return Category::Income;
    }

    if is_expense_amount
        && (desc_lower.contains("payment")
            || desc_lower.contains("transfer to")
            || desc_lower.contains("withdrawal"))
    {
        return Category::Other;
    }

    Category::Other
}

/// Write-through cache from normalized description to category. Only learns
/// non-`Other` associations; grows for the process lifetime.
#[derive(Debug, Default)]
pub struct AliasCache {
    inner: RwLock<HashMap<String, Category>>,
}

impl AliasCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cache lookup. Positive-amount hits that are not income re-route to
    /// keyword matching so refunds on expense descriptions classify as
    /// income.
    pub fn lookup(&self, normalized: &str, amount: Option<f64>) -> Option<Category> {
        if normalized.is_empty() {
            return None;
        }
        let cached = *self.inner.read().ok()?.get(normalized)?;
        let is_income_amount = amount.is_some_and(|value| value > 1e-6);
        if is_income_amount && cached != Category::Income {
            return None;
        }
        Some(cached)
    }

    pub fn learn(&self, normalized: &str, category: Category) {
        if normalized.is_empty() || category == Category::Other {
            return;
        }
        if let Ok(mut guard) = self.inner.write() {
            guard.insert(normalized.to_string(), category);
        }
    }

    pub fn len(&self) -> usize {
        self.inner.read().map(|guard| guard.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        if let Ok(mut guard) = self.inner.write() {
            guard.clear();
        }
    }
}

/// Cache-aware categorization: consult the alias cache first, then fall back
/// to keyword matching.
pub fn categorize_cached(cache: &AliasCache, description: &str, amount: Option<f64>) -> Category {
    let normalized = normalize_description(description);
    if let Some(cached) = cache.lookup(&normalized, amount) {
        return cached;
    }
    categorize(description, amount)
}
