//! Name-to-metadata lookup for card categories.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Cards that every game can buy, trained before the kingdom cards.
pub const BASIC_CARDS: [&str; 10] = [
    "Estate", "Duchy", "Province", "Colony", "Copper", "Silver", "Gold", "Platinum", "Potion",
    "None",
];

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CardFlags {
    pub action: bool,
    pub victory: bool,
    pub treasure: bool,
    pub curse: bool,
    pub attack: bool,
    pub supply: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CardInfo {
    pub name: String,
    /// Plural display form; `name + "s"` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plural: Option<String>,
    #[serde(flatten)]
    pub flags: CardFlags,
}

impl CardInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            plural: None,
            flags: CardFlags::default(),
        }
    }

    #[must_use]
    pub fn with_plural(mut self, plural: impl Into<String>) -> Self {
        self.plural = Some(plural.into());
        self
    }

    #[must_use]
    pub fn plural(&self) -> String {
        self.plural
            .clone()
            .unwrap_or_else(|| format!("{}s", self.name))
    }
}

/// Cards keyed by their normalized name.
///
/// Serialized as a plain list of [`CardInfo`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<CardInfo>", into = "Vec<CardInfo>")]
pub struct CardCatalog {
    cards: BTreeMap<String, CardInfo>,
}

impl From<Vec<CardInfo>> for CardCatalog {
    fn from(cards: Vec<CardInfo>) -> Self {
        cards.into_iter().collect()
    }
}

impl From<CardCatalog> for Vec<CardInfo> {
    fn from(catalog: CardCatalog) -> Self {
        catalog.cards.into_values().collect()
    }
}

impl FromIterator<CardInfo> for CardCatalog {
    fn from_iter<T: IntoIterator<Item = CardInfo>>(iter: T) -> Self {
        let cards = iter
            .into_iter()
            .map(|card| (CardCatalog::key(&card.name), card))
            .collect();
        Self { cards }
    }
}

impl CardCatalog {
    /// Builds a catalog of plain entries for the given names.
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        names.into_iter().map(CardInfo::new).collect()
    }

    /// Lookup key of a name: apostrophes removed, spaces replaced by `_`,
    /// lower-cased.
    #[must_use]
    pub fn key(name: &str) -> String {
        name.chars()
            .filter(|&c| c != '\'')
            .map(|c| if c == ' ' { '_' } else { c.to_ascii_lowercase() })
            .collect()
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<&CardInfo> {
        self.cards.get(&Self::key(name))
    }

    /// Plural form of a card name, falling back to `name + "s"` for
    /// unknown cards.
    #[must_use]
    pub fn plural_of(&self, name: &str) -> String {
        self.get(name)
            .map_or_else(|| format!("{name}s"), CardInfo::plural)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.cards.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &CardInfo> {
        self.cards.values()
    }
}

/// Orders category names for scheduling: basic cards first in their fixed
/// order, then everything else alphabetically.
#[must_use]
pub fn basic_cards_first(mut names: Vec<String>) -> Vec<String> {
    let rank = |name: &str| {
        BASIC_CARDS
            .iter()
            .position(|basic| basic.eq_ignore_ascii_case(name))
            .unwrap_or(BASIC_CARDS.len())
    };
    names.sort_by(|a, b| rank(a).cmp(&rank(b)).then_with(|| a.cmp(b)));
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_normalization() {
        assert_eq!(CardCatalog::key("King's Court"), "kings_court");
        assert_eq!(CardCatalog::key("Throne Room"), "throne_room");
    }

    #[test]
    fn test_lookup_and_plural() {
        let catalog: CardCatalog = [
            CardInfo::new("Smithy").with_plural("Smithies"),
            CardInfo::new("King's Court"),
        ]
        .into_iter()
        .collect();
        assert_eq!(catalog.len(), 2);
        assert_eq!(catalog.plural_of("Smithy"), "Smithies");
        assert_eq!(catalog.plural_of("kings court"), "King's Courts");
        assert_eq!(catalog.plural_of("Village"), "Villages");
        assert!(catalog.get("Village").is_none());
    }

    #[test]
    fn test_catalog_json() {
        let json = r#"[
            {"name": "Laboratory", "plural": "Laboratories", "action": true},
            {"name": "Gold", "treasure": true, "supply": true}
        ]"#;
        let catalog: CardCatalog = serde_json::from_str(json).unwrap();
        let lab = catalog.get("Laboratory").unwrap();
        assert_eq!(lab.plural(), "Laboratories");
        assert!(lab.flags.action);
        assert!(!lab.flags.treasure);
        assert!(catalog.get("gold").unwrap().flags.supply);
    }

    #[test]
    fn test_basic_cards_first() {
        let names = ["Village", "Gold", "Adventurer", "None", "Estate"]
            .map(str::to_owned)
            .to_vec();
        assert_eq!(
            basic_cards_first(names),
            vec!["Estate", "Gold", "None", "Adventurer", "Village"]
        );
    }
}
