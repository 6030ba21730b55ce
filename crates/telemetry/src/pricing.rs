//! Built-in pricing table for Bedrock foundation models.
//!
//! Prices are USD per million tokens, split into input and output rates.
//! Per-client overrides come from `custom_pricing` in the configuration.
//!
//! Bedrock model ids come in several spellings for the same model:
//! `anthropic.claude-3-haiku-20240307-v1:0`, the cross-region inference
//! profile `us.anthropic.claude-3-haiku-20240307-v1:0`, or the bare family
//! `anthropic.claude-3-haiku`. Lookups normalise the id and fall back to the
//! longest known family prefix.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{LazyLock, PoisonError, RwLock};

/// Cross-region inference profile prefixes stripped before lookup.
const REGION_PREFIXES: &[&str] = &["us-gov.", "global.", "apac.", "us.", "eu."];

/// Per-million-token pricing for a model.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    /// Price per 1M input tokens in USD.
    pub input_per_m: f64,
    /// Price per 1M output tokens in USD.
    pub output_per_m: f64,
}

impl ModelPricing {
    /// Create a new pricing entry.
    pub const fn new(input_per_m: f64, output_per_m: f64) -> Self {
        Self {
            input_per_m,
            output_per_m,
        }
    }

    /// Compute cost for the given token counts, rounded to 8 decimals.
    pub fn cost(&self, input_tokens: u64, output_tokens: u64) -> f64 {
        let raw = (input_tokens as f64 * self.input_per_m
            + output_tokens as f64 * self.output_per_m)
            / 1_000_000.0;
        (raw * 1e8).round() / 1e8
    }
}

/// Generic Claude-Sonnet-class rate, usable as a catch-all via
/// [`PricingTable::with_fallback`].
pub const DEFAULT_FALLBACK_PRICING: ModelPricing = ModelPricing::new(3.0, 15.0);

static BUILTIN: LazyLock<PricingTable> = LazyLock::new(PricingTable::with_defaults);

/// Estimate the cost of one call against the built-in table.
///
/// Returns `None` when the model is not priced. Custom prices are a
/// per-client concern and never leak into this function.
pub fn estimate_cost(model_id: &str, input_tokens: u64, output_tokens: u64) -> Option<f64> {
    BUILTIN.compute_cost(model_id, input_tokens, output_tokens)
}

/// Lower-case, drop any inference-profile prefix and `:N` version suffix.
pub fn normalize_model_id(model_id: &str) -> String {
    let mut id = model_id.trim().to_lowercase();

    if let Some(stripped) = REGION_PREFIXES
        .iter()
        .find_map(|prefix| id.strip_prefix(prefix))
    {
        id = stripped.to_string();
    }

    if let Some((base, version)) = id.rsplit_once(':')
        && !version.is_empty()
        && version.chars().all(|c| c.is_ascii_digit())
    {
        id = base.to_string();
    }

    id
}

/// Per-client price list. Keys are stored normalised.
pub struct PricingTable {
    prices: RwLock<HashMap<String, ModelPricing>>,
    fallback: Option<ModelPricing>,
}

impl PricingTable {
    /// Built-in Bedrock on-demand prices.
    pub fn with_defaults() -> Self {
        let mut prices = HashMap::new();

        // ── Anthropic ──────────────────────────────────────────────
        prices.insert(
            "anthropic.claude-3-5-sonnet".into(),
            ModelPricing::new(3.0, 15.0),
        );
        prices.insert(
            "anthropic.claude-3-5-haiku".into(),
            ModelPricing::new(0.8, 4.0),
        );
        prices.insert(
            "anthropic.claude-3-sonnet".into(),
            ModelPricing::new(3.0, 15.0),
        );
        prices.insert(
            "anthropic.claude-3-haiku".into(),
            ModelPricing::new(0.25, 1.25),
        );
        prices.insert(
            "anthropic.claude-3-opus".into(),
            ModelPricing::new(15.0, 75.0),
        );

        // ── Amazon ─────────────────────────────────────────────────
        prices.insert(
            "amazon.titan-text-lite-v1".into(),
            ModelPricing::new(0.3, 0.4),
        );
        prices.insert(
            "amazon.titan-text-express-v1".into(),
            ModelPricing::new(0.8, 1.6),
        );

        // ── Meta ───────────────────────────────────────────────────
        prices.insert(
            "meta.llama3-70b-instruct-v1".into(),
            ModelPricing::new(2.65, 3.5),
        );
        prices.insert(
            "meta.llama3-8b-instruct-v1".into(),
            ModelPricing::new(0.3, 0.6),
        );

        // ── Mistral ────────────────────────────────────────────────
        prices.insert("mistral.mistral-large".into(), ModelPricing::new(4.0, 12.0));
        prices.insert("mistral.mistral-small".into(), ModelPricing::new(1.0, 3.0));

        // ── Cohere ─────────────────────────────────────────────────
        prices.insert(
            "cohere.command-r-plus-v1".into(),
            ModelPricing::new(3.0, 15.0),
        );

        Self {
            prices: RwLock::new(prices),
            fallback: None,
        }
    }

    /// No prices at all; useful with [`with_fallback`](Self::with_fallback).
    pub fn empty() -> Self {
        Self {
            prices: RwLock::new(HashMap::new()),
            fallback: None,
        }
    }

    /// Price unknown models at `pricing` instead of returning `None`.
    pub fn with_fallback(mut self, pricing: ModelPricing) -> Self {
        self.fallback = Some(pricing);
        self
    }

    /// Exact normalised id, then the longest family prefix, then the fallback.
    pub fn get(&self, model: &str) -> Option<ModelPricing> {
        let prices = self.prices.read().unwrap_or_else(PoisonError::into_inner);
        let normalized = normalize_model_id(model);

        if let Some(p) = prices.get(&normalized) {
            return Some(*p);
        }

        // Versioned ids (`...-20240307-v1`) match their family key.
        prices
            .iter()
            .filter(|(key, _)| normalized.starts_with(key.as_str()))
            .max_by_key(|(key, _)| key.len())
            .map(|(_, p)| *p)
            .or(self.fallback)
    }

    /// Insert or replace the price for `model`.
    pub fn set(&self, model: &str, pricing: ModelPricing) {
        let mut prices = self.prices.write().unwrap_or_else(PoisonError::into_inner);
        prices.insert(normalize_model_id(model), pricing);
    }

    /// Compute cost for a model call, or `None` if the model is not priced.
    pub fn compute_cost(&self, model: &str, input_tokens: u64, output_tokens: u64) -> Option<f64> {
        self.get(model).map(|p| p.cost(input_tokens, output_tokens))
    }

    /// Priced model keys, sorted.
    pub fn models(&self) -> Vec<String> {
        let prices = self.prices.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = prices.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.prices
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for PricingTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for PricingTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PricingTable")
            .field("models", &self.len())
            .field("fallback", &self.fallback)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-10
    }

    #[test]
    fn default_table_has_models() {
        let table = PricingTable::with_defaults();
        assert!(table.len() >= 12);
        assert!(!table.is_empty());
    }

    #[test]
    fn known_model_cost() {
        // Claude 3 Sonnet: $3/M input, $15/M output
        // (1000 * 3.0 + 500 * 15.0) / 1M = 0.0105
        let cost = estimate_cost("anthropic.claude-3-sonnet", 1000, 500).unwrap();
        assert!(approx(cost, 0.0105));
    }

    #[test]
    fn unknown_model_returns_none() {
        assert!(estimate_cost("unknown.model-xyz", 1000, 500).is_none());
    }

    #[test]
    fn versioned_and_regional_ids_resolve() {
        let table = PricingTable::with_defaults();
        let haiku = table.get("anthropic.claude-3-haiku").unwrap();
        assert_eq!(
            table.get("anthropic.claude-3-haiku-20240307-v1:0"),
            Some(haiku)
        );
        assert_eq!(
            table.get("us.anthropic.claude-3-haiku-20240307-v1:0"),
            Some(haiku)
        );
        assert_eq!(table.get("Anthropic.Claude-3-Haiku"), Some(haiku));
    }

    #[test]
    fn longest_prefix_wins() {
        let table = PricingTable::with_defaults();
        // "claude-3-5-sonnet" must not be priced as "claude-3-sonnet" or vice versa
        let p = table
            .get("anthropic.claude-3-5-haiku-20241022-v1:0")
            .unwrap();
        assert!(approx(p.input_per_m, 0.8));
    }

    #[test]
    fn normalization() {
        assert_eq!(
            normalize_model_id(" EU.Anthropic.Claude-3-Sonnet-20240229-v1:0 "),
            "anthropic.claude-3-sonnet-20240229-v1"
        );
        assert_eq!(normalize_model_id("meta.llama3-8b-instruct-v1"), "meta.llama3-8b-instruct-v1");
    }

    #[test]
    fn fallback_prices_unknown_models() {
        let table = PricingTable::with_defaults().with_fallback(DEFAULT_FALLBACK_PRICING);
        let cost = table.compute_cost("some.future-model", 1000, 1000).unwrap();
        assert!(approx(cost, 0.018));
    }

    #[test]
    fn custom_pricing() {
        let table = PricingTable::empty();
        assert!(table.is_empty());

        table.set("custom.model", ModelPricing::new(1.0, 2.0));
        assert_eq!(table.len(), 1);

        let cost = table.compute_cost("custom.model", 1_000_000, 1_000_000).unwrap();
        assert!(approx(cost, 3.0));
    }

    #[test]
    fn custom_pricing_does_not_leak_into_builtin() {
        let table = PricingTable::with_defaults();
        table.set("anthropic.claude-3-sonnet", ModelPricing::new(100.0, 100.0));
        assert!(approx(
            table.compute_cost("anthropic.claude-3-sonnet", 1_000_000, 0).unwrap(),
            100.0
        ));
        assert!(approx(
            estimate_cost("anthropic.claude-3-sonnet", 1_000_000, 0).unwrap(),
            3.0
        ));
    }

    #[test]
    fn model_pricing_cost_rounds() {
        let p = ModelPricing::new(0.25, 1.25);
        // (1 * 0.25 + 1 * 1.25) / 1M = 0.0000015
        assert!(approx(p.cost(1, 1), 0.0000015));
        assert!(approx(p.cost(0, 0), 0.0));
    }

    #[test]
    fn list_models() {
        let models = PricingTable::with_defaults().models();
        assert!(models.contains(&"amazon.titan-text-express-v1".to_string()));
        assert!(models.windows(2).all(|w| w[0] <= w[1]));
    }
}
