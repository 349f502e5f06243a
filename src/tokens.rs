//! Token and cost estimates for the embedding inputs a request would send.

use anyhow::{Context, Result};
use serde::Serialize;
use tiktoken_rs::CoreBPE;

use crate::error::MatchError;
use crate::normalizer::TextNormalizer;

/// USD price per 1000 tokens for `text-embedding-3-small`.
pub const EMBEDDING_PRICE_PER_1K_TOKENS: f64 = 0.00002;

/// Token count for one ingredient.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngredientTokens {
    /// Lowercased, trimmed ingredient.
    pub ingredient: String,
    /// Tokens in the composed embedding input; 0 when nothing would be sent.
    pub tokens: usize,
    /// Composed embedding input, absent for blank ingredients.
    pub text_with_context: Option<String>,
}

/// Estimate for a whole ingredient list.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenEstimate {
    /// Sum over the breakdown.
    pub total_tokens: usize,
    /// Estimated USD cost.
    pub cost: f64,
    /// Cost rendered as `$0.000000`.
    pub cost_formatted: String,
    /// Per-ingredient counts in request order.
    pub breakdown: Vec<IngredientTokens>,
}

/// Counts tokens with the `cl100k_base` encoding used by the embedding model.
pub struct TokenEstimator {
    bpe: CoreBPE,
    normalizer: TextNormalizer,
}

impl TokenEstimator {
    /// Loads the encoding and composes inputs with `default_instruction`.
    pub fn new(default_instruction: &str) -> Result<Self> {
        let bpe = tiktoken_rs::cl100k_base().context("failed to load cl100k_base encoding")?;
        Ok(Self {
            bpe,
            normalizer: TextNormalizer::new(default_instruction),
        })
    }

    /// Tokens in `text`.
    pub fn count(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }

    /// Estimates tokens and cost for the inputs `ingredients` would produce.
    ///
    /// Blank ingredients are never embedded, so they count as zero tokens.
    pub fn estimate(
        &self,
        ingredients: &[String],
        instructions: Option<&str>,
    ) -> Result<TokenEstimate, MatchError> {
        if ingredients.is_empty() {
            return Err(MatchError::InvalidInput(
                "ingredients must be a non-empty list".to_string(),
            ));
        }
        let breakdown: Vec<IngredientTokens> = ingredients
            .iter()
            .map(|raw| match self.normalizer.normalize(raw, instructions) {
                Some(text) => IngredientTokens {
                    ingredient: text.ingredient().to_string(),
                    tokens: self.count(text.as_str()),
                    text_with_context: Some(text.into_string()),
                },
                None => IngredientTokens {
                    ingredient: String::new(),
                    tokens: 0,
                    text_with_context: None,
                },
            })
            .collect();
        let total_tokens = breakdown.iter().map(|item| item.tokens).sum();
        let cost = embedding_cost(total_tokens);
        Ok(TokenEstimate {
            total_tokens,
            cost,
            cost_formatted: format!("${cost:.6}"),
            breakdown,
        })
    }
}

/// USD cost of embedding `tokens` tokens.
pub fn embedding_cost(tokens: usize) -> f64 {
    tokens as f64 / 1000.0 * EMBEDDING_PRICE_PER_1K_TOKENS
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalizer::DEFAULT_INSTRUCTION;

    fn estimator() -> TokenEstimator {
        TokenEstimator::new(DEFAULT_INSTRUCTION).expect("encoding loads")
    }

    #[test]
    fn counts_cl100k_tokens() {
        assert_eq!(estimator().count("hello world"), 2);
        assert_eq!(estimator().count(""), 0);
    }

    #[test]
    fn estimate_counts_composed_inputs() {
        let estimator = estimator();
        let ingredients = vec!["  Hakket TOMAT".to_string(), "   ".to_string()];
        let estimate = estimator
            .estimate(&ingredients, Some("økologisk"))
            .expect("estimate");

        let first = &estimate.breakdown[0];
        assert_eq!(first.ingredient, "hakket tomat");
        let composed = first.text_with_context.as_deref().expect("composed");
        assert!(composed.ends_with("Ingredient: hakket tomat"));
        assert!(composed.contains("Additional instructions: økologisk"));
        assert_eq!(first.tokens, estimator.count(composed));
        assert!(first.tokens > 0);

        assert_eq!(estimate.breakdown[1].tokens, 0);
        assert!(estimate.breakdown[1].text_with_context.is_none());
        assert_eq!(estimate.total_tokens, first.tokens);
        assert_eq!(estimate.cost, embedding_cost(first.tokens));
    }

    #[test]
    fn empty_list_is_invalid() {
        let err = estimator().estimate(&[], None).expect_err("empty");
        assert_eq!(err.code(), "INVALID_INPUT");
    }

    #[test]
    fn cost_formatting() {
        assert!((embedding_cost(50_000) - 0.001).abs() < 1e-12);
        let estimator = estimator();
        let estimate = estimator
            .estimate(&["salt".to_string()], None)
            .expect("estimate");
        assert!(estimate.cost_formatted.starts_with("$0.0000"));
        assert_eq!(estimate.cost_formatted.len(), "$0.000000".len());
    }
}
