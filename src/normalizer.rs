//! Ingredient text canonicalization ahead of embedding.

use std::fmt;

/// Instruction prepended to every ingredient before it is embedded.
pub const DEFAULT_INSTRUCTION: &str = "Prioriter match på titel og derefter description.";

const ADDITIONAL_INSTRUCTIONS_LABEL: &str = "Additional instructions: ";
const INGREDIENT_LABEL: &str = "Ingredient: ";

/// Raw ingredient line plus its position in the caller's list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngredientQuery {
    /// Text exactly as supplied by the caller.
    pub raw_text: String,
    /// Zero-based position in the request.
    pub index: usize,
}

impl IngredientQuery {
    /// Wraps each ingredient with its request position.
    pub fn from_list(ingredients: &[String]) -> Vec<Self> {
        ingredients
            .iter()
            .enumerate()
            .map(|(index, raw_text)| Self {
                raw_text: raw_text.clone(),
                index,
            })
            .collect()
    }
}

/// Composed embedding input; doubles as the embedding cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NormalizedText {
    composed: String,
    ingredient_start: usize,
}

impl NormalizedText {
    /// Full text sent to the embedding provider.
    pub fn as_str(&self) -> &str {
        &self.composed
    }

    /// Lowercased, trimmed ingredient portion.
    pub fn ingredient(&self) -> &str {
        &self.composed[self.ingredient_start..]
    }

    /// Consumes the wrapper, returning the composed text.
    pub fn into_string(self) -> String {
        self.composed
    }
}

impl fmt::Display for NormalizedText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.composed)
    }
}

/// Builds embedding inputs from raw ingredient lines.
#[derive(Debug, Clone)]
pub struct TextNormalizer {
    default_instruction: String,
}

impl TextNormalizer {
    /// Creates a normalizer with a custom leading instruction.
    pub fn new(default_instruction: impl Into<String>) -> Self {
        Self {
            default_instruction: default_instruction.into(),
        }
    }

    /// Leading instruction used for every ingredient.
    pub fn default_instruction(&self) -> &str {
        &self.default_instruction
    }

    /// Normalizes one ingredient; `None` means there is nothing to embed.
    ///
    /// Layout of the composed text:
    ///
    /// ```text
    /// <default instruction>
    ///
    /// Additional instructions: <instructions>   (only when non-blank)
    ///
    /// Ingredient: <lowercased, trimmed ingredient>
    /// ```
    pub fn normalize(&self, raw: &str, instructions: Option<&str>) -> Option<NormalizedText> {
        let ingredient = raw.trim().to_lowercase();
        if ingredient.is_empty() {
            return None;
        }

        let mut composed = String::with_capacity(
            self.default_instruction.len() + ingredient.len() + INGREDIENT_LABEL.len() + 4,
        );
        composed.push_str(&self.default_instruction);
        if let Some(extra) = instructions.map(str::trim).filter(|s| !s.is_empty()) {
            composed.push_str("\n\n");
            composed.push_str(ADDITIONAL_INSTRUCTIONS_LABEL);
            composed.push_str(extra);
        }
        composed.push_str("\n\n");
        composed.push_str(INGREDIENT_LABEL);
        let ingredient_start = composed.len();
        composed.push_str(&ingredient);

        Some(NormalizedText {
            composed,
            ingredient_start,
        })
    }

    /// Normalizes a whole request, keeping one slot per query.
    pub fn normalize_all(
        &self,
        queries: &[IngredientQuery],
        instructions: Option<&str>,
    ) -> Vec<Option<NormalizedText>> {
        queries
            .iter()
            .map(|query| self.normalize(&query.raw_text, instructions))
            .collect()
    }
}

impl Default for TextNormalizer {
    fn default() -> Self {
        Self::new(DEFAULT_INSTRUCTION)
    }
}
