use agtrace_types::TokenUsage;

/// Per-million-token rate for one model family.
///
/// NOTE: a struct rather than a tuple — `(prefix, rate, rate, rate, rate)`
/// lets the reader swap two fields by accident with no compiler complaint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModelRate {
    pub prefix: &'static str,
    pub input_per_million: f64,
    pub output_per_million: f64,
    pub cache_read_per_million: f64,
    pub cache_creation_per_million: f64,
}

impl ModelRate {
    const fn new(
        prefix: &'static str,
        input_per_million: f64,
        output_per_million: f64,
        cache_read_per_million: f64,
        cache_creation_per_million: f64,
    ) -> Self {
        Self {
            prefix,
            input_per_million,
            output_per_million,
            cache_read_per_million,
            cache_creation_per_million,
        }
    }
}

/// Known model families, ordered most-specific prefix first so a label like
/// `claude-opus-4-5-20251101` matches `claude-opus-4-5` before the broader
/// `claude-opus-4` row.
const MODEL_RATES: &[ModelRate] = &[
    ModelRate::new("claude-opus-4-5", 5.0, 25.0, 0.5, 6.25),
    ModelRate::new("claude-sonnet-4-5", 3.0, 15.0, 0.3, 3.75),
    ModelRate::new("claude-haiku-4-5", 1.0, 5.0, 0.1, 1.25),
    ModelRate::new("claude-opus-4", 15.0, 75.0, 1.5, 18.75),
    ModelRate::new("claude-sonnet-4", 3.0, 15.0, 0.3, 3.75),
    ModelRate::new("claude-haiku-4", 0.8, 4.0, 0.08, 1.0),
    ModelRate::new("claude-3-5-haiku", 0.8, 4.0, 0.08, 1.0),
    ModelRate::new("claude-3-5", 3.0, 15.0, 0.3, 3.75),
    ModelRate::new("claude-3-opus", 15.0, 75.0, 1.5, 18.75),
    ModelRate::new("claude-3", 3.0, 15.0, 0.3, 3.75),
];

/// Rate applied when no row in [`MODEL_RATES`] matches the label (including
/// when there is no label at all).
const DEFAULT_RATE: ModelRate = ModelRate::new("default", 3.0, 15.0, 0.3, 3.75);

/// Find the rate row for a model label by substring match, case-insensitive,
/// first row wins. Falls back to [`DEFAULT_RATE`] when nothing matches.
fn rate_for(model_label: Option<&str>) -> ModelRate {
    let Some(label) = model_label else {
        return DEFAULT_RATE;
    };
    let label = label.to_ascii_lowercase();
    MODEL_RATES
        .iter()
        .find(|rate| label.contains(rate.prefix))
        .copied()
        .unwrap_or(DEFAULT_RATE)
}

/// Deterministic, pure mapping from `(model label, token usage)` to an
/// estimated cost in the rate table's currency unit. No rounding is applied;
/// rendering layers round for display. This function is the single source
/// of truth shared by ingest (to persist `estimated_cost`) and by the
/// aggregation layer (to compute projections).
pub fn estimate_cost(model_label: Option<&str>, usage: &TokenUsage) -> f64 {
    let rate = rate_for(model_label);
    usage.input_tokens as f64 * rate.input_per_million / 1_000_000.0
        + usage.output_tokens as f64 * rate.output_per_million / 1_000_000.0
        + usage.cache_read_input_tokens as f64 * rate.cache_read_per_million / 1_000_000.0
        + usage.cache_creation_input_tokens as f64 * rate.cache_creation_per_million / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_duplicate_prefixes() {
        let prefixes: Vec<&str> = MODEL_RATES.iter().map(|r| r.prefix).collect();
        let unique: std::collections::HashSet<&str> = prefixes.iter().copied().collect();
        assert_eq!(prefixes.len(), unique.len(), "duplicate prefixes in MODEL_RATES");
    }

    #[test]
    fn more_specific_prefix_wins_over_broader_one() {
        let rate = rate_for(Some("claude-opus-4-5-20251101"));
        assert_eq!(rate.prefix, "claude-opus-4-5");
    }

    #[test]
    fn unknown_model_falls_back_to_default_rate() {
        let rate = rate_for(Some("some-future-model"));
        assert_eq!(rate.prefix, "default");
    }

    #[test]
    fn no_model_label_falls_back_to_default_rate() {
        let rate = rate_for(None);
        assert_eq!(rate.prefix, "default");
    }

    #[test]
    fn cost_is_sum_of_four_rate_classes() {
        let usage = TokenUsage {
            input_tokens: 1_000_000,
            output_tokens: 1_000_000,
            cache_creation_input_tokens: 1_000_000,
            cache_read_input_tokens: 1_000_000,
        };
        let cost = estimate_cost(Some("claude-sonnet-4"), &usage);
        assert!((cost - (3.0 + 15.0 + 0.3 + 3.75)).abs() < f64::EPSILON);
    }

    #[test]
    fn zero_usage_is_zero_cost() {
        assert_eq!(estimate_cost(Some("claude-opus-4"), &TokenUsage::default()), 0.0);
    }
}
