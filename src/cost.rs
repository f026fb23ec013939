use crate::config::PricingConfig;

/// Per-million-token rates for one model. Cache reads are billed at a
/// discount against the input rate, cache writes at a premium.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ModelPricing {
    pub input_per_million: f64,
    pub output_per_million: f64,
    pub cache_read_per_million: f64,
    pub cache_write_per_million: f64,
}

/// Cache-aware total plus the cache-blind figure shown in the alternating
/// display cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct UsageCost {
    pub cost: f64,
    pub simple_cost: f64,
}

pub fn compute_usage_cost(
    model_id: &str,
    input: u64,
    output: u64,
    cache_read: u64,
    cache_write: u64,
    pricing_config: &PricingConfig,
) -> UsageCost {
    let Some(pricing) = resolve_pricing(model_id, pricing_config) else {
        // unknown model: no rate card, report zero rather than guessing
        return UsageCost::default();
    };

    let per_million = |tokens: u64, rate: f64| tokens as f64 / 1_000_000.0 * rate;
    let simple_cost = per_million(input, pricing.input_per_million)
        + per_million(output, pricing.output_per_million);
    let cost = simple_cost
        + per_million(cache_read, pricing.cache_read_per_million)
        + per_million(cache_write, pricing.cache_write_per_million);

    UsageCost { cost, simple_cost }
}

pub fn resolve_pricing(model_id: &str, pricing_config: &PricingConfig) -> Option<ModelPricing> {
    let key = model_id.trim().to_ascii_lowercase();
    if let Some(entry) = pricing_config.overrides.get(&key)
        && entry.input_per_million.is_finite()
        && entry.input_per_million >= 0.0
        && entry.output_per_million.is_finite()
        && entry.output_per_million >= 0.0
    {
        return Some(ModelPricing {
            input_per_million: entry.input_per_million,
            output_per_million: entry.output_per_million,
            cache_read_per_million: entry.cache_read_per_million.max(0.0),
            cache_write_per_million: entry.cache_write_per_million.max(0.0),
        });
    }
    default_model_pricing(&key)
}

fn default_model_pricing(model: &str) -> Option<ModelPricing> {
    // Anthropic API rate card; cache reads at 0.1x input, writes at 1.25x.
    let pricing = match model {
        "claude-opus-4-5-20251101" => ModelPricing {
            input_per_million: 5.00,
            output_per_million: 25.00,
            cache_read_per_million: 0.50,
            cache_write_per_million: 6.25,
        },
        "claude-sonnet-4-5-20250514"
        | "claude-sonnet-4-5-20241022"
        | "claude-sonnet-4-20250514" => ModelPricing {
            input_per_million: 3.00,
            output_per_million: 15.00,
            cache_read_per_million: 0.30,
            cache_write_per_million: 3.75,
        },
        "claude-haiku-4-5-20250414" | "claude-haiku-4-5-20241022" => ModelPricing {
            input_per_million: 1.00,
            output_per_million: 5.00,
            cache_read_per_million: 0.10,
            cache_write_per_million: 1.25,
        },
        "claude-opus-4-20250514" => ModelPricing {
            input_per_million: 15.00,
            output_per_million: 75.00,
            cache_read_per_million: 1.50,
            cache_write_per_million: 18.75,
        },
        _ => return None,
    };

    Some(pricing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ModelPricingOverride, PricingConfig};

    #[test]
    fn known_model_resolves_rate_card() {
        let pricing = resolve_pricing("claude-opus-4-5-20251101", &PricingConfig::default())
            .expect("pricing");
        assert!((pricing.input_per_million - 5.0).abs() < f64::EPSILON);
        assert!((pricing.cache_write_per_million - 6.25).abs() < f64::EPSILON);
    }

    #[test]
    fn unknown_model_costs_zero() {
        let cost = compute_usage_cost(
            "somebody-elses-model",
            1_000_000,
            1_000_000,
            0,
            0,
            &PricingConfig::default(),
        );
        assert_eq!(cost, UsageCost::default());
    }

    #[test]
    fn cost_splits_cache_from_simple() {
        let cost = compute_usage_cost(
            "claude-sonnet-4-5-20250514",
            2_000_000,
            1_000_000,
            10_000_000,
            1_000_000,
            &PricingConfig::default(),
        );

        let expected_simple = 2.0 * 3.00 + 1.0 * 15.00;
        let expected_total = expected_simple + 10.0 * 0.30 + 1.0 * 3.75;
        assert!((cost.simple_cost - expected_simple).abs() < 0.0001);
        assert!((cost.cost - expected_total).abs() < 0.0001);
    }

    #[test]
    fn override_takes_precedence_over_rate_card() {
        let mut config = PricingConfig::default();
        config.overrides.insert(
            "claude-opus-4-5-20251101".to_string(),
            ModelPricingOverride {
                input_per_million: 1.0,
                output_per_million: 2.0,
                cache_read_per_million: 0.1,
                cache_write_per_million: 1.25,
            },
        );

        let pricing = resolve_pricing("Claude-Opus-4-5-20251101", &config).expect("pricing");
        assert!((pricing.input_per_million - 1.0).abs() < f64::EPSILON);
        assert!((pricing.output_per_million - 2.0).abs() < f64::EPSILON);
    }
}
