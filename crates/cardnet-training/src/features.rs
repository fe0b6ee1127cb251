//! Choice of input features for a category, and their boost factors.
//!
//! Every column that is not bookkeeping or an outcome is a candidate
//! feature. Two families are pruned per category: supply-pile features
//! other than the aggregate `*_cards_in_supply` ones, and the per-card
//! `*_in_player_deck` counts except the one for the card being trained
//! (how many copies the player already owns).
//!
//! Acquisition counts of kingdom cards are zero in most games, since a
//! given card is only in the kingdom of a fraction of them. Those features
//! are scaled by the inverse of that fraction so they are not drowned out.

use std::collections::BTreeMap;

use cardnet_network::InputFeature;

use crate::{catalog::CardCatalog, data_source::CategoryKey};

/// Columns that are never used as inputs.
pub const NON_FEATURE_COLUMNS: [&str; 19] = [
    "id",
    "card_bought",
    "card_output_weight",
    "player_current_score",
    "player_score_increase",
    "player_final_score",
    "average_final_score",
    "player_won",
    "player_gained_victory_cards",
    "player_gained_core_victory_cards",
    "randomizer",
    "use",
    "game_id",
    "game_year",
    "game_month",
    "game_day",
    "game_hour",
    "game_minute",
    "game_second",
];

/// Number of kingdom cards in a game.
pub const KINGDOM_SIZE: usize = 10;

/// Acquisitions of cards present in every game, which are never boosted.
const ALWAYS_AVAILABLE_ACQUISITIONS: [&str; 4] = [
    "colonies_acquired",
    "duchies_acquired",
    "estates_acquired",
    "provinces_acquired",
];

#[must_use]
pub fn is_feature_column(column: &str, output: &str) -> bool {
    column != output && !NON_FEATURE_COLUMNS.contains(&column)
}

/// Name of the feature counting copies of the category's card in the
/// player's deck. There is none for the `All` category.
#[must_use]
pub fn owned_card_feature(category: &CategoryKey, catalog: &CardCatalog) -> Option<String> {
    let CategoryKey::Named(name) = category else {
        return None;
    };
    let plural = if name.eq_ignore_ascii_case("none") {
        "none".to_owned()
    } else {
        catalog.plural_of(name)
    };
    Some(format!("{}_in_player_deck", CardCatalog::key(&plural)))
}

#[must_use]
pub fn keeps_feature(name: &str, owned_card_feature: Option<&str>) -> bool {
    if name.contains("_in_supply") && !name.contains("_cards_in_supply") {
        return false;
    }
    if name.contains("_in_player_deck") {
        return owned_card_feature == Some(name);
    }
    true
}

/// Boost for rare features given the number of cards a kingdom is drawn
/// from: the inverse of the chance that a given card is one of the
/// [`KINGDOM_SIZE`] kingdom cards, `1 / sum(1 / (pool - i))` for
/// `i in 0..10`.
///
/// Returns `None` when the pool is too small to draw a kingdom from.
#[must_use]
pub fn rare_feature_boost(pool_size: usize) -> Option<f64> {
    if pool_size <= KINGDOM_SIZE {
        return None;
    }
    #[expect(clippy::cast_precision_loss)]
    let likelihood = (0..KINGDOM_SIZE)
        .map(|i| 1.0 / (pool_size - i) as f64)
        .sum::<f64>();
    Some(1.0 / likelihood)
}

#[must_use]
pub fn is_boosted(name: &str) -> bool {
    name.ends_with("_acquired") && !ALWAYS_AVAILABLE_ACQUISITIONS.contains(&name)
}

/// Ordered inputs of one category's model.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureSet {
    inputs: Vec<InputFeature>,
}

impl FeatureSet {
    #[must_use]
    pub fn new(inputs: Vec<InputFeature>) -> Self {
        Self { inputs }
    }

    /// Selects the features of `category` among `columns`, keeping column
    /// order. Boosted features get `boost` when it is set, `1.0` otherwise.
    #[must_use]
    pub fn select(
        columns: &[String],
        output: &str,
        category: &CategoryKey,
        catalog: &CardCatalog,
        boost: Option<f64>,
    ) -> Self {
        let owned = owned_card_feature(category, catalog);
        let inputs = columns
            .iter()
            .filter(|c| is_feature_column(c, output) && keeps_feature(c, owned.as_deref()))
            .map(|c| {
                let factor = boost.filter(|_| is_boosted(c)).unwrap_or(1.0);
                InputFeature::new(c.clone(), factor)
            })
            .collect();
        Self { inputs }
    }

    #[must_use]
    pub fn inputs(&self) -> &[InputFeature] {
        &self.inputs
    }

    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.inputs.iter().map(|i| i.label.clone()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inputs.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Boost factors by feature name.
    #[must_use]
    pub fn boosts(&self) -> BTreeMap<String, f64> {
        self.inputs
            .iter()
            .map(|i| (i.label.clone(), i.boost))
            .collect()
    }
}
