//! Tests for quantization ladder selection.

use heimdall::quantization::QuantizationFactors;
use heimdall::{ModelMetadata, ModelType, Provider, QuantizationLevel, QuantizationStrategy};

fn model(size_gb: f64, quantizable: bool) -> ModelMetadata {
    ModelMetadata::new("m", "M", Provider::Flux, ModelType::TextToImage, size_gb)
        .with_min_memory(0.0, 0.0)
        .with_quantization(quantizable)
}

// ============================================================================
// Ladder properties
// ============================================================================

#[test]
fn more_budget_never_lowers_fidelity() {
    let strategy = QuantizationStrategy::new();
    let m = model(24.0, true);

    let mut last: Option<QuantizationLevel> = None;
    for tenth in 0..=300 {
        let budget = f64::from(tenth) / 10.0;
        let selected = strategy.select(&m, budget, None);
        if let (Some(prev), Some(now)) = (last, selected) {
            assert!(now >= prev, "budget {budget}: {now} is below {prev}");
        }
        assert!(
            last.is_none() || selected.is_some(),
            "budget {budget}: a fitting level stopped fitting"
        );
        last = selected.or(last);
    }
    assert_eq!(last, Some(QuantizationLevel::Fp32));
}

#[test]
fn ladder_is_descending_fidelity() {
    let strategy = QuantizationStrategy::new();
    let ladder = strategy.ladder(&model(1.0, true));
    assert_eq!(ladder.first(), Some(&QuantizationLevel::Fp32));
    assert_eq!(ladder.last(), Some(&QuantizationLevel::Int4));
    assert!(ladder.windows(2).all(|w| w[0] > w[1]));
    assert_eq!(
        strategy.ladder(&model(1.0, false)),
        vec![QuantizationLevel::Fp32]
    );
}

#[test]
fn selected_level_always_fits() {
    let strategy = QuantizationStrategy::new();
    let m = model(13.0, true);
    for budget in [0.5, 1.7, 2.0, 3.3, 6.5, 7.0, 13.0, 40.0] {
        if let Some(level) = strategy.select(&m, budget, None) {
            assert!(strategy.estimated_size(&m, level) <= budget);
        }
    }
}

#[test]
fn bf16_shares_the_fp16_footprint() {
    let strategy = QuantizationStrategy::new();
    let m = model(10.0, true);
    assert_eq!(
        strategy.estimated_size(&m, QuantizationLevel::Bf16),
        strategy.estimated_size(&m, QuantizationLevel::Fp16)
    );
    // fp16 ranks above bf16 when both fit
    assert_eq!(strategy.select(&m, 5.0, None), Some(QuantizationLevel::Fp16));
}

// ============================================================================
// Factor overrides
// ============================================================================

#[test]
fn configured_factors_replace_defaults() {
    let overrides: QuantizationFactors = toml::from_str("int8 = 0.3\nint4 = 0.2").unwrap();
    let strategy = QuantizationStrategy::new().with_factors(&overrides);

    assert_eq!(strategy.factor(QuantizationLevel::Int8), 0.3);
    assert_eq!(strategy.factor(QuantizationLevel::Int4), 0.2);
    assert_eq!(strategy.factor(QuantizationLevel::Fp16), 0.5);
}

#[test]
fn invalid_factor_is_ignored() {
    let strategy = QuantizationStrategy::new()
        .with_factor(QuantizationLevel::Int8, -1.0)
        .with_factor(QuantizationLevel::Int4, f64::NAN);
    assert_eq!(strategy.factor(QuantizationLevel::Int8), 0.25);
    assert_eq!(strategy.factor(QuantizationLevel::Int4), 0.125);
}

#[test]
fn level_names_parse() {
    assert_eq!("fp16".parse::<QuantizationLevel>().unwrap(), QuantizationLevel::Fp16);
    assert_eq!("INT4".parse::<QuantizationLevel>().unwrap(), QuantizationLevel::Int4);
    assert_eq!("8bit".parse::<QuantizationLevel>().unwrap(), QuantizationLevel::Int8);
    assert!("fp8".parse::<QuantizationLevel>().is_err());
}
