//! Recipe ideas from what is in the fridge
//!
//! A handful of fixed rules. Not meant to be extended in place.

use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecipeSuggestion {
    pub name: String,
    pub ingredients: Vec<String>,
    pub difficulty: String,
}

struct RecipeRule {
    requires: &'static [&'static str],
    name: &'static str,
    ingredients: &'static [&'static str],
}

const RECIPE_RULES: &[RecipeRule] = &[
    RecipeRule {
        requires: &["banana", "milk"],
        name: "Banana Smoothie",
        ingredients: &["banana", "milk"],
    },
    RecipeRule {
        requires: &["bread", "cheese"],
        name: "Grilled Cheese Sandwich",
        ingredients: &["bread", "cheese", "butter"],
    },
    RecipeRule {
        requires: &["apple"],
        name: "Apple Slices with Honey",
        ingredients: &["apple", "honey"],
    },
    RecipeRule {
        requires: &["instant noodles"],
        name: "Quick Noodles",
        ingredients: &["instant noodles", "vegetables"],
    },
];

/// Suggestions whose required labels are all present (case-insensitive)
pub fn suggest_recipes<S: AsRef<str>>(labels: &[S]) -> Vec<RecipeSuggestion> {
    let available: Vec<String> = labels.iter().map(|l| l.as_ref().to_lowercase()).collect();

    RECIPE_RULES
        .iter()
        .filter(|rule| {
            rule.requires
                .iter()
                .all(|needed| available.iter().any(|have| have == needed))
        })
        .map(|rule| RecipeSuggestion {
            name: rule.name.to_string(),
            ingredients: rule.ingredients.iter().map(|s| s.to_string()).collect(),
            difficulty: "easy".to_string(),
        })
        .collect()
}
