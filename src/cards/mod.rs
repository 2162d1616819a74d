use std::{collections::BTreeMap, fmt::Debug};

use crate::{error::Res, rng::RandomSource, RollError};

pub mod content;

/// Card quality tiers, lowest first. The derived ordering is the tier order.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize, serde::Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Rarity {
    Common,
    Uncommon,
    Rare,
    Epic,
    Legendary,
    Mythic,
    Cosmic,
}

impl Rarity {
    pub const ALL: [Rarity; 7] = [
        Rarity::Common,
        Rarity::Uncommon,
        Rarity::Rare,
        Rarity::Epic,
        Rarity::Legendary,
        Rarity::Mythic,
        Rarity::Cosmic,
    ];

    /// The tier directly below this one, if any.
    pub fn below(self) -> Option<Rarity> {
        let index = Self::ALL.iter().position(|r| *r == self)?;
        index.checked_sub(1).map(|i| Self::ALL[i])
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Rarity::Common => "common",
            Rarity::Uncommon => "uncommon",
            Rarity::Rare => "rare",
            Rarity::Epic => "epic",
            Rarity::Legendary => "legendary",
            Rarity::Mythic => "mythic",
            Rarity::Cosmic => "cosmic",
        }
    }
}

/// Gameplay numbers, which differ between game variants.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "variant", rename_all = "snake_case")]
pub enum CardStats {
    Combat {
        attack: u32,
        defense: u32,
        health: u32,
        cost: u32,
    },
    Emoji {
        hp: u32,
        luck: u32,
        emoji_power: u32,
    },
}

#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct CardDefinition {
    pub id: String,
    pub name: String,
    pub rarity: Rarity,
    pub stats: CardStats,
    #[serde(default)]
    pub craftable: bool,
}

impl CardDefinition {
    pub fn new(
        id: String,
        name: String,
        rarity: Rarity,
        stats: CardStats,
        craftable: bool,
    ) -> Self {
        Self {
            id,
            name,
            rarity,
            stats,
            craftable,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    #[cfg(test)]
    pub fn sample(rarity: Rarity) -> Self {
        static ID: std::sync::atomic::AtomicUsize = std::sync::atomic::AtomicUsize::new(1);

        let id = ID.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        Self {
            id: format!("card-{id}"),
            name: format!("Card {id}"),
            rarity,
            stats: CardStats::Combat {
                attack: 1,
                defense: 1,
                health: 1,
                cost: 1,
            },
            craftable: false,
        }
    }
}

/// Read-only card pool grouped by rarity. Built once, then shared between
/// every player session.
#[derive(Clone, Default)]
pub struct CardCatalog {
    tiers: BTreeMap<Rarity, Vec<CardDefinition>>,
}

impl CardCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_cards<I: IntoIterator<Item = CardDefinition>>(cards: I) -> Self {
        let mut catalog = Self::new();
        for card in cards {
            catalog.add(card);
        }
        catalog
    }

    #[cfg(test)]
    pub fn sample(counts: &[(Rarity, usize)]) -> Self {
        let mut catalog = Self::new();
        for &(rarity, count) in counts {
            for _ in 0..count {
                catalog.add(CardDefinition::sample(rarity));
            }
        }
        catalog
    }

    pub fn add(&mut self, card: CardDefinition) {
        self.tiers.entry(card.rarity).or_default().push(card);
    }

    pub fn cards_of(&self, rarity: Rarity) -> &[CardDefinition] {
        self.tiers.get(&rarity).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn size(&self) -> usize {
        self.tiers.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn get(&self, id: &str) -> Option<&CardDefinition> {
        self.tiers.values().flatten().find(|card| card.id == id)
    }

    /// Tier a request for `rarity` is served from: the requested tier if it
    /// has cards, otherwise the nearest non-empty tier below it. Never
    /// returns a tier above the one requested.
    pub fn resolve_tier(&self, rarity: Rarity) -> Option<Rarity> {
        let mut tier = Some(rarity);
        while let Some(current) = tier {
            if !self.cards_of(current).is_empty() {
                return Some(current);
            }
            tier = current.below();
        }
        None
    }

    /// Pick a uniformly random card of `rarity`, stepping down one tier at a
    /// time while the requested tier is empty.
    pub fn pick_random(
        &self,
        rarity: Rarity,
        rng: &mut dyn RandomSource,
    ) -> Res<&CardDefinition> {
        let Some(tier) = self.resolve_tier(rarity) else {
            return Err(RollError::CatalogExhausted(rarity));
        };
        if tier != rarity {
            tracing::trace!("No {rarity:?} cards in catalog, serving {tier:?} instead.");
        }

        let cards = self.cards_of(tier);
        let index = rng.pick_index(cards.len());
        cards
            .get(index)
            .ok_or(RollError::CatalogExhausted(rarity))
    }
}

impl Debug for CardCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let counts = self
            .tiers
            .iter()
            .map(|(rarity, cards)| format!("{}: {}", rarity.as_str(), cards.len()))
            .collect::<Vec<_>>()
            .join(", ");
        write!(f, "CardCatalog {{ {counts} }}")
    }
}
