//! Keyword and shelf-life tables
//!
//! Both tables are ordered slices. Lookups scan in declaration order and the
//! first hit wins, so overlapping keywords resolve by position.

use std::collections::HashMap;
use tracing::{debug, info};

use super::{ClassifiedItem, Category, Expiring, RecipeSuggestion, UrgencyBuckets};

/// Packaging keyword to canonical food name
pub const KEYWORD_TABLE: &[(&str, &str)] = &[
    // Dairy
    ("MILK", "Milk"),
    ("AMUL", "Milk"),
    ("DAIRY", "Dairy Product"),
    ("CURD", "Yogurt"),
    ("YOGURT", "Yogurt"),
    ("DAHI", "Yogurt"),
    ("CHEESE", "Cheese"),
    ("BUTTER", "Butter"),
    ("PANEER", "Paneer"),
    ("CREAM", "Cream"),
    // Bakery
    ("BREAD", "Bread"),
    ("LOAF", "Bread"),
    ("TOAST", "Bread"),
    ("BUN", "Bun"),
    ("CAKE", "Cake"),
    // Noodles and pasta
    ("NOODLES", "Instant Noodles"),
    ("MAGGI", "Instant Noodles"),
    ("PASTA", "Pasta"),
    ("RAMEN", "Instant Noodles"),
    // Drinks
    ("JUICE", "Juice"),
    ("WATER", "Water Bottle"),
    ("SODA", "Soda"),
    ("COLA", "Soda"),
    ("PEPSI", "Soda"),
    ("COKE", "Soda"),
    // Condiments
    ("KETCHUP", "Ketchup"),
    ("SAUCE", "Sauce"),
    ("MAYO", "Mayonnaise"),
    ("MUSTARD", "Mustard"),
    ("EGG", "Eggs"),
    ("EGGS", "Eggs"),
    // Protein
    ("CHICKEN", "Chicken"),
    ("MEAT", "Meat"),
    ("FISH", "Fish"),
    ("TOFU", "Tofu"),
    // Fruit products
    ("APPLE", "Apple Juice"),
    ("ORANGE", "Orange Juice"),
    ("MANGO", "Mango Pulp"),
    // Snacks
    ("CHIPS", "Chips"),
    ("BISCUIT", "Biscuits"),
    ("COOKIE", "Cookies"),
    ("CHOCOLATE", "Chocolate"),
];

/// Lowercase food name to estimated days before expiry
pub const EXPIRY_TABLE: &[(&str, u32)] = &[
    // Produce
    ("apple", 7),
    ("banana", 5),
    ("orange", 14),
    ("broccoli", 5),
    ("carrot", 14),
    ("potato", 21),
    ("tomato", 7),
    ("cucumber", 7),
    ("lettuce", 5),
    ("onion", 30),
    // Dairy
    ("milk", 3),
    ("yogurt", 7),
    ("cheese", 14),
    ("butter", 30),
    ("paneer", 7),
    ("cream", 7),
    // Bakery
    ("bread", 5),
    ("bun", 3),
    ("cake", 3),
    // Packaged
    ("instant noodles", 180),
    ("pasta", 365),
    ("juice", 7),
    ("soda", 180),
    ("ketchup", 30),
    ("sauce", 30),
    ("mayonnaise", 60),
    ("chips", 60),
    ("biscuits", 90),
    ("cookies", 60),
    ("chocolate", 180),
    // Protein
    ("eggs", 21),
    ("chicken", 2),
    ("meat", 2),
    ("fish", 2),
    ("tofu", 7),
];

pub const DEFAULT_EXPIRY_DAYS: u32 = 7;

/// Rule-based food inference over immutable tables
#[derive(Debug, Clone)]
pub struct InferenceEngine {
    keywords: &'static [(&'static str, &'static str)],
    expiry: &'static [(&'static str, u32)],
    default_expiry: u32,
}

impl Default for InferenceEngine {
    fn default() -> Self {
        Self {
            keywords: KEYWORD_TABLE,
            expiry: EXPIRY_TABLE,
            default_expiry: DEFAULT_EXPIRY_DAYS,
        }
    }
}

impl InferenceEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Canonical food name for label text. The first keyword in table order
    /// contained in the text wins.
    pub fn infer_from_text(&self, text: Option<&str>) -> Option<&'static str> {
        let text = text.filter(|t| !t.is_empty())?.to_uppercase();

        let inferred = self
            .keywords
            .iter()
            .find(|(keyword, _)| text.contains(keyword))
            .map(|(_, food)| *food);

        match inferred {
            Some(food) => info!("Inferred '{}' from text '{}'", food, text),
            None => debug!("No food inferred from text '{}'", text),
        }
        inferred
    }

    /// Estimated days until a food expires: exact name, then the first
    /// partial match in either direction, then the default.
    pub fn estimate_expiry(&self, label: &str) -> u32 {
        let label = label.to_lowercase();

        if let Some((_, days)) = self.expiry.iter().find(|(key, _)| *key == label) {
            return *days;
        }

        self.expiry
            .iter()
            .find(|(key, _)| label.contains(key) || key.contains(label.as_str()))
            .map(|(_, days)| *days)
            .unwrap_or(self.default_expiry)
    }

    /// Merge items sharing (category, lowercased label). Output keeps
    /// first-seen order; each slot holds the most confident instance, and
    /// ties keep the earlier one.
    pub fn deduplicate_items(&self, items: Vec<ClassifiedItem>) -> Vec<ClassifiedItem> {
        let total = items.len();
        let mut slots: HashMap<(Category, String), usize> = HashMap::new();
        let mut unique: Vec<ClassifiedItem> = Vec::with_capacity(total);

        for item in items {
            let key = (item.category, item.label.to_lowercase());
            match slots.get(&key) {
                Some(&index) => {
                    if item.confidence > unique[index].confidence {
                        unique[index] = item;
                    }
                }
                None => {
                    slots.insert(key, unique.len());
                    unique.push(item);
                }
            }
        }

        info!("Deduplicated {} items to {}", total, unique.len());
        unique
    }

    pub fn categorize_by_urgency<T: Expiring>(&self, items: Vec<T>) -> UrgencyBuckets<T> {
        super::categorize_by_urgency(items)
    }

    pub fn suggest_recipes<S: AsRef<str>>(&self, labels: &[S]) -> Vec<RecipeSuggestion> {
        super::suggest_recipes(labels)
    }
}
