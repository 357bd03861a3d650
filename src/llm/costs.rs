//! Per-model token pricing for cost logging.

use rust_decimal::Decimal;

/// (input, output) USD per token. Derived from published per-1M-token rates;
/// zero for models we don't have prices for.
pub fn cost_per_token(model: &str) -> (Decimal, Decimal) {
    if model.starts_with("claude-3-5-sonnet") || model.starts_with("claude-3-7-sonnet") {
        // $3 / $15 per 1M
        (Decimal::new(3, 6), Decimal::new(15, 6))
    } else if model.starts_with("claude-3-5-haiku") {
        // $0.80 / $4 per 1M
        (Decimal::new(8, 7), Decimal::new(4, 6))
    } else if model.starts_with("gpt-4o-mini") {
        // $0.15 / $0.60 per 1M
        (Decimal::new(15, 8), Decimal::new(6, 7))
    } else if model.starts_with("gpt-4o") {
        // $2.50 / $10 per 1M
        (Decimal::new(25, 7), Decimal::new(1, 5))
    } else {
        (Decimal::ZERO, Decimal::ZERO)
    }
}

/// Estimated USD cost of one call.
pub fn estimate_cost(model: &str, input_tokens: u32, output_tokens: u32) -> Decimal {
    let (input, output) = cost_per_token(model);
    input * Decimal::from(input_tokens) + output * Decimal::from(output_tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_models_have_prices() {
        let (input, output) = cost_per_token("claude-3-5-sonnet-20240620");
        assert!(input > Decimal::ZERO);
        assert!(output > input);

        let (input, _) = cost_per_token("gpt-4o-mini-2024-07-18");
        assert!(input > Decimal::ZERO);
    }

    #[test]
    fn mini_is_cheaper_than_full() {
        let (mini_in, _) = cost_per_token("gpt-4o-mini");
        let (full_in, _) = cost_per_token("gpt-4o");
        assert!(mini_in < full_in);
    }

    #[test]
    fn unknown_model_costs_zero() {
        assert_eq!(
            cost_per_token("mock-model"),
            (Decimal::ZERO, Decimal::ZERO)
        );
        assert_eq!(estimate_cost("mock-model", 1000, 1000), Decimal::ZERO);
    }

    #[test]
    fn estimate_scales_with_tokens() {
        // 1M input + 1M output of sonnet is $18.
        let cost = estimate_cost("claude-3-5-sonnet-20240620", 1_000_000, 1_000_000);
        assert_eq!(cost, Decimal::new(18, 0));
    }
}
