use std::path::Path;

use serde::de::DeserializeOwned;

use crate::{
    cards::{CardCatalog, CardDefinition},
    error::Res,
    roll::EngineConfig,
    RollError,
};

fn decode_json<T: DeserializeOwned>(raw: &[u8]) -> Res<T> {
    serde_json::from_slice(raw).map_err(|e| RollError::Content(e.to_string()))
}

async fn read_file(path: &Path) -> Res<Vec<u8>> {
    tokio::fs::read(path)
        .await
        .map_err(|e| RollError::Content(format!("{}: {e}", path.display())))
}

/// Build a catalog from a JSON array of card definitions.
pub fn parse_catalog(raw: &[u8]) -> Res<CardCatalog> {
    let cards: Vec<CardDefinition> = decode_json(raw)?;
    let mut seen = std::collections::HashSet::new();
    for card in &cards {
        if !seen.insert(card.id.as_str()) {
            return Err(RollError::Content(format!("Duplicate card id: {}", card.id)));
        }
    }
    Ok(CardCatalog::from_cards(cards))
}

pub async fn load_catalog(path: &Path) -> Res<CardCatalog> {
    tracing::debug!("Loading card catalog from {}.", path.display());
    let raw = read_file(path).await?;
    tracing::debug!("Read catalog from disk. Parsing JSON.");
    let catalog = parse_catalog(&raw)?;
    tracing::debug!("Loaded {} cards: {catalog:?}", catalog.size());
    Ok(catalog)
}

pub fn parse_config(raw: &[u8]) -> Res<EngineConfig> {
    decode_json(raw)
}

pub async fn load_config(path: &Path) -> Res<EngineConfig> {
    tracing::debug!("Loading roll configuration from {}.", path.display());
    let raw = read_file(path).await?;
    parse_config(&raw)
}
