//! Numerical gradient checking for the backward kernel.
//!
//! For each weight `w` the accumulated gradient must equal `-dE/dw`, where
//! the reference is a central difference:
//!
//! ```text
//! dE/dw ≈ (E(w + ε) - E(w - ε)) / (2ε)
//! ```
//!
//! with `E = ½ Σ (actual - ideal)²` for [`ErrorFunction::Output`] and
//! `E = -Σ ideal · ln(actual)` for softmax with [`ErrorFunction::CrossEntropy`].

use flatnet::{
    ActivationKind, ErrorFunction, FlatNetwork, GradientCalc, LayerConfig, NetworkConfig,
};
use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};

/// Epsilon for numerical differentiation (f64).
const EPSILON: f64 = 1e-6;

/// Allowed error, scaled by `1 + |numeric|`.
const MAX_ERROR: f64 = 1e-6;

fn squared_error(network: &mut FlatNetwork, input: &[f64], ideal: &[f64]) -> f64 {
    let mut out = vec![0.0; ideal.len()];
    network.compute(input, &mut out).unwrap();
    0.5 * out
        .iter()
        .zip(ideal)
        .map(|(a, i)| (a - i).powi(2))
        .sum::<f64>()
}

fn cross_entropy(network: &mut FlatNetwork, input: &[f64], ideal: &[f64]) -> f64 {
    let mut out = vec![0.0; ideal.len()];
    network.compute(input, &mut out).unwrap();
    -out.iter()
        .zip(ideal)
        .map(|(a, i)| i * a.ln())
        .sum::<f64>()
}

/// Compares analytic and central-difference gradients for every weight.
fn check_gradients(
    network: &mut FlatNetwork,
    error_function: ErrorFunction,
    loss: fn(&mut FlatNetwork, &[f64], &[f64]) -> f64,
    input: &[f64],
    ideal: &[f64],
) {
    let mut calc = GradientCalc::new(network, error_function).unwrap();
    calc.process(network, input, ideal).unwrap();
    let analytic = calc.gradients().to_vec();

    for i in 0..network.weight_count() {
        let w = network.weights()[i];

        network.weights_mut()[i] = w + EPSILON;
        let plus = loss(network, input, ideal);
        network.weights_mut()[i] = w - EPSILON;
        let minus = loss(network, input, ideal);
        network.weights_mut()[i] = w;

        let numeric = (plus - minus) / (2.0 * EPSILON);
        let diff = (analytic[i] + numeric).abs();
        assert!(
            diff <= MAX_ERROR * (1.0 + numeric.abs()),
            "weight {}: analytic {} vs -numeric {} (diff {:e})",
            i,
            analytic[i],
            -numeric,
            diff
        );
    }
}

fn random_vec(rng: &mut SmallRng, n: usize) -> Vec<f64> {
    (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect()
}

#[test]
fn test_gradient_check_simple_network() {
    let config = NetworkConfig::builder()
        .input(3)
        .output(2, ActivationKind::Linear)
        .seed(1)
        .build()
        .unwrap();
    let mut network = FlatNetwork::from_config(&config).unwrap();
    let mut rng = SmallRng::seed_from_u64(10);

    for _ in 0..5 {
        let input = random_vec(&mut rng, 3);
        let ideal = random_vec(&mut rng, 2);
        check_gradients(&mut network, ErrorFunction::Output, squared_error, &input, &ideal);
    }
}

#[test]
fn test_gradient_check_sigmoid_hidden() {
    let config = NetworkConfig::builder()
        .input(4)
        .hidden(5, ActivationKind::Sigmoid)
        .output(2, ActivationKind::Sigmoid)
        .seed(2)
        .build()
        .unwrap();
    let mut network = FlatNetwork::from_config(&config).unwrap();
    let mut rng = SmallRng::seed_from_u64(20);

    for _ in 0..5 {
        let input = random_vec(&mut rng, 4);
        let ideal = random_vec(&mut rng, 2);
        check_gradients(&mut network, ErrorFunction::Output, squared_error, &input, &ideal);
    }
}

#[test]
fn test_gradient_check_deep_tanh() {
    let config = NetworkConfig::builder()
        .input(3)
        .hidden(6, ActivationKind::Tanh)
        .hidden(4, ActivationKind::Tanh)
        .hidden(3, ActivationKind::Sigmoid)
        .output(2, ActivationKind::Linear)
        .seed(3)
        .build()
        .unwrap();
    let mut network = FlatNetwork::from_config(&config).unwrap();
    let mut rng = SmallRng::seed_from_u64(30);

    for _ in 0..3 {
        let input = random_vec(&mut rng, 3);
        let ideal = random_vec(&mut rng, 2);
        check_gradients(&mut network, ErrorFunction::Output, squared_error, &input, &ideal);
    }
}

#[test]
fn test_gradient_check_output_bias() {
    // Bias on every layer, including the output
    let config = NetworkConfig::builder()
        .input(2)
        .hidden(3, ActivationKind::Tanh)
        .layer(LayerConfig {
            has_bias: true,
            ..LayerConfig::output(2, ActivationKind::Linear)
        })
        .seed(4)
        .build()
        .unwrap();
    let mut network = FlatNetwork::from_config(&config).unwrap();
    check_gradients(
        &mut network,
        ErrorFunction::Output,
        squared_error,
        &[0.3, -0.7],
        &[1.0, -1.0],
    );
}

#[test]
fn test_gradient_check_softmax_cross_entropy() {
    let config = NetworkConfig::builder()
        .input(4)
        .hidden(5, ActivationKind::Tanh)
        .output(3, ActivationKind::Softmax)
        .seed(5)
        .build()
        .unwrap();
    let mut network = FlatNetwork::from_config(&config).unwrap();
    let mut rng = SmallRng::seed_from_u64(50);

    for class in 0..3 {
        let input = random_vec(&mut rng, 4);
        let mut ideal = vec![0.0; 3];
        ideal[class] = 1.0;
        check_gradients(
            &mut network,
            ErrorFunction::CrossEntropy,
            cross_entropy,
            &input,
            &ideal,
        );
    }
}

#[test]
fn test_gradient_check_with_inactive_neuron() {
    let config = NetworkConfig::builder()
        .input(3)
        .hidden(4, ActivationKind::Sigmoid)
        .output(1, ActivationKind::Linear)
        .seed(6)
        .build()
        .unwrap();
    let mut network = FlatNetwork::from_config(&config).unwrap();
    network.set_neuron_active(1, 2, false).unwrap();

    // Masked weights get zero gradient and have zero numeric effect
    check_gradients(
        &mut network,
        ErrorFunction::Output,
        squared_error,
        &[0.5, -0.25, 1.0],
        &[0.75],
    );
}

#[test]
fn test_gradient_check_with_dropout_mask() {
    let config = NetworkConfig::builder()
        .input(3)
        .layer(LayerConfig::hidden(8, ActivationKind::Tanh).with_dropout(0.25))
        .output(2, ActivationKind::Linear)
        .seed(7)
        .build()
        .unwrap();
    let mut network = FlatNetwork::from_config(&config).unwrap();
    let mut rng = SmallRng::seed_from_u64(70);
    network.sample_dropout(&mut rng);
    assert!((network.layers()[1].keep_scale() - 1.0 / 0.75).abs() < 1e-15);

    // Mask and scale stay fixed across the numeric perturbations
    check_gradients(
        &mut network,
        ErrorFunction::Output,
        squared_error,
        &[0.4, -0.9, 0.2],
        &[0.5, -0.5],
    );
}
