//! Token Accountant: normalizes a provider's raw usage report into an
//! immutable, per-turn Token Record.

use serde::{Deserialize, Serialize};

/// Which formula a provider's raw counts are combined with to produce
/// the context-window figure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalculationMethod {
    /// context-window = raw-input + cache-read + cache-creation.
    AnthropicCacheAware,
    /// context-window = raw-input; cache figures are informational only.
    Direct,
}

/// The provider's token report, preserved verbatim.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenSource {
    pub raw_input_tokens: u64,
    pub raw_output_tokens: u64,
    pub cache_read_tokens: u64,
    pub cache_creation_tokens: u64,
}

/// Figures derived from `source` by the chosen calculation method.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenComputed {
    pub context_window_tokens: u64,
    pub new_input_tokens: u64,
    pub previous_context_baseline: u64,
    pub calculation_method: CalculationMethod,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenMeta {
    pub turn: u32,
    pub session_id: String,
    pub extracted_at: chrono::DateTime<chrono::Utc>,
    pub normalized_at: chrono::DateTime<chrono::Utc>,
}

/// An immutable, per-turn token accounting record.
///
/// Every field is set at construction and never mutated afterward — there
/// are deliberately no `&mut self` methods or public field access that
/// would allow replacing a sub-object after the fact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenRecord {
    source: TokenSource,
    computed: TokenComputed,
    meta: TokenMeta,
}

impl TokenRecord {
    /// Builds a Token Record from a provider's raw report.
    ///
    /// `previous_context_baseline` is the context-window figure of the
    /// prior turn in this session (0 for the first turn).
    pub fn new(
        method: CalculationMethod,
        source: TokenSource,
        previous_context_baseline: u64,
        turn: u32,
        session_id: impl Into<String>,
        extracted_at: chrono::DateTime<chrono::Utc>,
    ) -> Self {
        let context_window_tokens = match method {
            CalculationMethod::AnthropicCacheAware => {
                source.raw_input_tokens + source.cache_read_tokens + source.cache_creation_tokens
            }
            CalculationMethod::Direct => source.raw_input_tokens,
        };
        let new_input_tokens =
            context_window_tokens.saturating_sub(previous_context_baseline);
        Self {
            source,
            computed: TokenComputed {
                context_window_tokens,
                new_input_tokens,
                previous_context_baseline,
                calculation_method: method,
            },
            meta: TokenMeta {
                turn,
                session_id: session_id.into(),
                extracted_at,
                normalized_at: chrono::Utc::now(),
            },
        }
    }

    pub fn source(&self) -> &TokenSource {
        &self.source
    }

    pub fn computed(&self) -> &TokenComputed {
        &self.computed
    }

    pub fn meta(&self) -> &TokenMeta {
        &self.meta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn src(input: u64, output: u64, read: u64, creation: u64) -> TokenSource {
        TokenSource {
            raw_input_tokens: input,
            raw_output_tokens: output,
            cache_read_tokens: read,
            cache_creation_tokens: creation,
        }
    }

    #[test]
    fn cache_aware_sums_input_and_cache_figures() {
        let rec = TokenRecord::new(
            CalculationMethod::AnthropicCacheAware,
            src(100, 50, 200, 10),
            0,
            1,
            "s1",
            chrono::Utc::now(),
        );
        assert_eq!(rec.computed().context_window_tokens, 310);
        assert_eq!(rec.computed().new_input_tokens, 310);
    }

    #[test]
    fn direct_ignores_cache_figures() {
        let rec = TokenRecord::new(
            CalculationMethod::Direct,
            src(100, 50, 200, 10),
            0,
            1,
            "s1",
            chrono::Utc::now(),
        );
        assert_eq!(rec.computed().context_window_tokens, 100);
    }

    #[test]
    fn new_input_clamps_to_zero_on_shrinking_context() {
        let rec = TokenRecord::new(
            CalculationMethod::Direct,
            src(50, 10, 0, 0),
            500,
            2,
            "s1",
            chrono::Utc::now(),
        );
        assert_eq!(rec.computed().new_input_tokens, 0);
    }

    #[test]
    fn first_turn_baseline_zero_means_new_input_equals_window() {
        let rec = TokenRecord::new(
            CalculationMethod::Direct,
            src(1200, 30, 0, 0),
            0,
            1,
            "s1",
            chrono::Utc::now(),
        );
        assert_eq!(rec.computed().new_input_tokens, rec.computed().context_window_tokens);
    }
}
