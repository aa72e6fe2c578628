//! Market Catalog
//!
//! Read-only lookup table resolving (symbol, market type) to the integer
//! market index used in canonical channel names. The catalog is an
//! external collaborator from the relay's point of view: it is built once
//! at startup from the configured market listings and never mutated.

use std::collections::HashMap;

use super::channel::{MarketIndex, MarketType};

/// Resolves market symbols to their catalog index per market type.
///
/// Indices are assigned by listing position, so the same symbol may map
/// to different indices on spot and perp.
#[derive(Debug, Default)]
pub struct MarketCatalog {
    spot: HashMap<String, MarketIndex>,
    perp: HashMap<String, MarketIndex>,
}

impl MarketCatalog {
    /// Build a catalog from ordered market listings.
    #[must_use]
    pub fn new(spot: &[String], perp: &[String]) -> Self {
        Self {
            spot: index_by_position(spot),
            perp: index_by_position(perp),
        }
    }

    /// Resolve a symbol to its market index, or `None` if the symbol is
    /// not listed for that market type.
    #[must_use]
    pub fn resolve(&self, symbol: &str, market_type: MarketType) -> Option<MarketIndex> {
        let table = match market_type {
            MarketType::Spot => &self.spot,
            MarketType::Perp => &self.perp,
        };
        table.get(symbol).copied()
    }

    /// Total number of listed markets across both types.
    #[must_use]
    pub fn market_count(&self) -> usize {
        self.spot.len() + self.perp.len()
    }
}

#[allow(clippy::cast_possible_truncation)]
fn index_by_position(symbols: &[String]) -> HashMap<String, MarketIndex> {
    symbols
        .iter()
        .enumerate()
        .map(|(i, s)| (s.clone(), i as MarketIndex))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> MarketCatalog {
        MarketCatalog::new(
            &["SOL".to_string(), "BTC".to_string()],
            &["SOL-PERP".to_string(), "BTC-PERP".to_string()],
        )
    }

    #[test]
    fn resolves_by_listing_position() {
        let catalog = catalog();
        assert_eq!(catalog.resolve("SOL-PERP", MarketType::Perp), Some(0));
        assert_eq!(catalog.resolve("BTC-PERP", MarketType::Perp), Some(1));
        assert_eq!(catalog.resolve("SOL", MarketType::Spot), Some(0));
    }

    #[test]
    fn unknown_symbol_is_none() {
        let catalog = catalog();
        assert_eq!(catalog.resolve("ETH-PERP", MarketType::Perp), None);
    }

    #[test]
    fn market_types_are_independent() {
        let catalog = catalog();
        // SOL-PERP is listed on perp only.
        assert_eq!(catalog.resolve("SOL-PERP", MarketType::Spot), None);
        assert_eq!(catalog.resolve("SOL", MarketType::Perp), None);
    }

    #[test]
    fn empty_catalog_resolves_nothing() {
        let catalog = MarketCatalog::default();
        assert_eq!(catalog.resolve("SOL", MarketType::Spot), None);
        assert_eq!(catalog.market_count(), 0);
    }
}
