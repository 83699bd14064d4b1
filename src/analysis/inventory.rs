//! Inventory records and expiry urgency

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::rules::DEFAULT_EXPIRY_DAYS;
use super::{Category, ClassifiedItem, InferenceEngine};

const URGENT_DAYS: i64 = 3;
const SOON_DAYS: i64 = 7;

/// An item stored in the fridge inventory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InventoryItem {
    pub label: String,
    pub category: Category,
    pub estimated_expiry_days: u32,
    pub quantity: u32,
    pub added_at: DateTime<Utc>,
}

impl InventoryItem {
    /// Build an inventory entry for a classified item, estimating its expiry
    pub fn from_classified(item: &ClassifiedItem, engine: &InferenceEngine, added_at: DateTime<Utc>) -> Self {
        Self {
            label: item.label.clone(),
            category: item.category,
            estimated_expiry_days: engine.estimate_expiry(&item.label),
            quantity: 1,
            added_at,
        }
    }
}

/// Anything with an optional expiry estimate in days
pub trait Expiring {
    fn expiry_days(&self) -> Option<i64>;
}

impl Expiring for InventoryItem {
    fn expiry_days(&self) -> Option<i64> {
        Some(i64::from(self.estimated_expiry_days))
    }
}

/// Loosely typed client records; a missing or non-numeric field counts as unknown.
/// Fractional days round up, which keeps the integer bucket bounds exact.
impl Expiring for serde_json::Value {
    fn expiry_days(&self) -> Option<i64> {
        let days = self.get("estimated_expiry_days")?;
        days.as_i64().or_else(|| days.as_f64().map(|d| d.ceil() as i64))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UrgencyBuckets<T> {
    /// Three days or less
    pub urgent: Vec<T>,
    /// Four to seven days
    pub soon: Vec<T>,
    pub normal: Vec<T>,
}

/// Split items by expiry, preserving input order within each bucket.
/// Unknown expiry is treated as the default estimate.
pub fn categorize_by_urgency<T: Expiring>(items: Vec<T>) -> UrgencyBuckets<T> {
    let mut buckets = UrgencyBuckets {
        urgent: Vec::new(),
        soon: Vec::new(),
        normal: Vec::new(),
    };

    for item in items {
        let days = item
            .expiry_days()
            .unwrap_or(i64::from(DEFAULT_EXPIRY_DAYS));
        if days <= URGENT_DAYS {
            buckets.urgent.push(item);
        } else if days <= SOON_DAYS {
            buckets.soon.push(item);
        } else {
            buckets.normal.push(item);
        }
    }

    buckets
}
