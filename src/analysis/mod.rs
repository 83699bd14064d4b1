//! Food inference
//!
//! Turns recognized label text into canonical food names and estimates shelf
//! life, urgency and recipe ideas for classified items.

pub mod inventory;
pub mod recipes;
pub mod rules;

pub use inventory::{categorize_by_urgency, Expiring, InventoryItem, UrgencyBuckets};
pub use recipes::{suggest_recipes, RecipeSuggestion};
pub use rules::InferenceEngine;

use serde::{Deserialize, Serialize};

/// Broad grouping reported to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Fruit,
    Vegetable,
    Packaged,
}

/// A detection after classification and text inference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedItem {
    pub category: Category,
    /// Canonical food name, e.g. "apple" or "Milk"
    pub label: String,
    pub confidence: f32,
    /// Label text read from packaging, if any
    #[serde(default)]
    pub extra: Option<String>,
}

impl ClassifiedItem {
    pub fn new(category: Category, label: &str, confidence: f32, extra: Option<String>) -> Self {
        Self {
            category,
            label: label.to_string(),
            confidence,
            extra,
        }
    }
}
