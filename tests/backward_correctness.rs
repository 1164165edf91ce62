//! Tests for the backward kernel.
//!
//! These tests verify:
//! - Gradient sign convention on a single weight
//! - Accumulation across calls until reset
//! - Hand-computed gradient vector for a fixed 2-2-1 network
//! - Active-mask effects on gradients
//! - Stale or zero deltas when layers run out of order

use flatnet::{
    ActivationKind, ErrorFunction, FlatNetError, FlatNetwork, GradientCalc, Layer,
    NetworkConfig,
};

const TOL: f64 = 1e-9;

/// 2 inputs (+bias) -> 2 sigmoid (+bias) -> 1 linear, fixed weights.
fn end_to_end_network() -> FlatNetwork {
    let config = NetworkConfig::builder()
        .input(2)
        .hidden(2, ActivationKind::Sigmoid)
        .output(1, ActivationKind::Linear)
        .seed(0)
        .build()
        .unwrap();
    let mut network = FlatNetwork::from_config(&config).unwrap();
    for (from, to, w) in [
        (0, 0, 0.1),
        (1, 0, 0.2),
        (2, 0, 0.3),
        (0, 1, -0.4),
        (1, 1, 0.5),
        (2, 1, -0.6),
    ] {
        network.set_weight(1, from, to, w).unwrap();
    }
    for (from, w) in [(0, 0.7), (1, -0.8), (2, 0.9)] {
        network.set_weight(2, from, 0, w).unwrap();
    }
    network
}

/// Forward pass, then one backward pass seeded with `delta` at the output.
fn backward_with_delta(network: &mut FlatNetwork, delta: f64) -> GradientCalc {
    let mut out = [0.0];
    network.compute(&[1.0, 0.5], &mut out).unwrap();

    let mut calc = GradientCalc::new(network, ErrorFunction::Output).unwrap();
    calc.layer_delta_mut()[0] = delta;
    network.backpropagate(&mut calc).unwrap();
    calc
}

fn assert_vec_close(actual: &[f64], expected: &[f64], what: &str) {
    assert_eq!(actual.len(), expected.len(), "{} length", what);
    for (i, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!(
            (a - e).abs() < TOL,
            "{}[{}]: expected {}, got {}",
            what,
            i,
            e,
            a
        );
    }
}

fn single_weight_network() -> FlatNetwork {
    let mut network = FlatNetwork::new();
    network
        .add_layer(Layer::new(1, false, ActivationKind::Linear.build()))
        .unwrap();
    network
        .add_layer(Layer::new(1, false, ActivationKind::Linear.build()))
        .unwrap();
    network.finalize_structure().unwrap();
    network.set_weight(1, 0, 0, 0.5).unwrap();
    network
}

// =============================================================================
// Sign and Accumulation
// =============================================================================

#[test]
fn test_gradient_sign_single_weight() {
    let mut network = single_weight_network();
    let mut out = [0.0];
    network.compute(&[2.0], &mut out).unwrap();
    assert_eq!(out[0], 1.0);

    let mut calc = GradientCalc::new(&network, ErrorFunction::Output).unwrap();
    calc.layer_delta_mut()[0] = 0.25;
    network.backpropagate(&mut calc).unwrap();

    assert_eq!(calc.gradients(), &[-(2.0 * 0.25)]);
    // Input neuron sits at index 1; linear derivative is 1
    assert_eq!(calc.layer_delta()[1], 0.5 * 0.25);
}

#[test]
fn test_gradients_accumulate_until_reset() {
    let mut network = single_weight_network();
    let mut out = [0.0];
    network.compute(&[2.0], &mut out).unwrap();

    let mut calc = GradientCalc::new(&network, ErrorFunction::Output).unwrap();
    for expected in [-0.5, -1.0, -1.5] {
        calc.layer_delta_mut()[0] = 0.25;
        network.backpropagate(&mut calc).unwrap();
        assert_eq!(calc.gradients()[0], expected);
    }

    calc.reset();
    assert_eq!(calc.gradients()[0], 0.0);
    assert!(calc.layer_delta().iter().all(|&d| d == 0.0));
}

// =============================================================================
// End-to-End Scenario
// =============================================================================

#[test]
fn test_end_to_end_gradient_vector() {
    let mut network = end_to_end_network();
    let calc = backward_with_delta(&mut network, 0.3);

    // Weight order: output block [w(h0), w(h1), w(hb)],
    // then hidden block [h0: x0, x1, xb][h1: x0, x1, xb]
    let expected = [
        -0.18673779936055637,
        -0.0962463902473821,
        -0.3,
        -0.049350779562334836,
        -0.024675389781167418,
        -0.049350779562334836,
        0.05229479850283537,
        0.026147399251417684,
        0.05229479850283537,
    ];
    assert_vec_close(calc.gradients(), &expected, "gradients");

    // Neuron order: output, hidden [h0, h1, hb], input [x0, x1, xb]
    let expected_delta = [
        0.3,
        0.049350779562334836,
        -0.05229479850283537,
        0.0,
        0.02585299735736763,
        -0.016277243338950715,
        0.04618211297040167,
    ];
    assert_vec_close(calc.layer_delta(), &expected_delta, "deltas");
}

#[test]
fn test_gradient_matches_weight_view() {
    let mut network = end_to_end_network();
    let calc = backward_with_delta(&mut network, 0.3);

    // Same (from, to) addresses the weight and its gradient
    let m = *network.layer(1).unwrap().weight_matrix().unwrap();
    let h1 = network.layer_output(1).unwrap()[1];
    let delta_h1 = calc.layer_delta()[network.layer(1).unwrap().neuron_index().unwrap() + 1];
    let x0 = network.layer_output(0).unwrap()[0];
    assert!((calc.gradients()[m.index(0, 1)] + x0 * delta_h1).abs() < TOL);
    assert!(h1 > 0.0);
}

// =============================================================================
// Active Mask
// =============================================================================

#[test]
fn test_inactive_hidden_neuron_gets_no_gradient() {
    let mut baseline_net = end_to_end_network();
    let baseline = backward_with_delta(&mut baseline_net, 0.3);

    let mut network = end_to_end_network();
    network.set_neuron_active(1, 1, false).unwrap();
    let calc = backward_with_delta(&mut network, 0.3);

    let g = calc.gradients();
    // Outgoing weight h1 -> out and incoming weights into h1
    assert_eq!(g[1], 0.0);
    for i in 6..9 {
        assert_eq!(g[i], 0.0, "incoming weight {} of inactive neuron", i);
    }
    // Everything touching only h0 and the bias is unchanged
    for i in [0, 2, 3, 4, 5] {
        assert!(
            (g[i] - baseline.gradients()[i]).abs() < TOL,
            "gradient {} changed: {} vs {}",
            i,
            g[i],
            baseline.gradients()[i]
        );
    }
}

#[test]
fn test_inactive_input_neuron_gets_no_gradient() {
    let mut network = end_to_end_network();
    network.set_neuron_active(0, 0, false).unwrap();
    let calc = backward_with_delta(&mut network, 0.3);

    let hidden = *network.layer(1).unwrap().weight_matrix().unwrap();
    for to in 0..2 {
        assert_eq!(calc.gradients()[hidden.index(0, to)], 0.0);
        assert_ne!(calc.gradients()[hidden.index(1, to)], 0.0);
    }
}

// =============================================================================
// Layer Order
// =============================================================================

#[test]
fn test_out_of_order_sees_zero_deltas() {
    let mut network = end_to_end_network();
    let mut out = [0.0];
    network.compute(&[1.0, 0.5], &mut out).unwrap();
    let mut calc = GradientCalc::new(&network, ErrorFunction::Output).unwrap();
    calc.layer_delta_mut()[0] = 0.3;

    let (input, hidden, output) = (
        network.layer(0).unwrap(),
        network.layer(1).unwrap(),
        network.layer(2).unwrap(),
    );

    // Hidden first: its deltas were never written
    hidden
        .compute_gradient(input, &mut calc, network.buffers(), 3, 2)
        .unwrap();
    assert!(calc.gradients()[3..].iter().all(|&g| g == 0.0));

    output
        .compute_gradient(hidden, &mut calc, network.buffers(), 3, 1)
        .unwrap();
    hidden
        .compute_gradient(input, &mut calc, network.buffers(), 3, 2)
        .unwrap();
    assert!(calc.gradients()[3..].iter().all(|&g| g != 0.0));
}

#[test]
fn test_out_of_order_sees_stale_deltas() {
    let mut network = end_to_end_network();
    let mut calc = backward_with_delta(&mut network, 0.3);
    let first_pass = calc.gradients()[3..].to_vec();

    // Clear gradients only; deltas from the first pass stay in place
    calc.scale_gradients(0.0);
    calc.layer_delta_mut()[0] = 0.6;

    // Hidden layer runs before the output layer has seen the new delta
    let (input, hidden) = (network.layer(0).unwrap(), network.layer(1).unwrap());
    hidden
        .compute_gradient(input, &mut calc, network.buffers(), 3, 2)
        .unwrap();

    // Hidden gradients still reflect the 0.3 seed
    assert_vec_close(&calc.gradients()[3..], &first_pass, "stale hidden gradients");
}

// =============================================================================
// Errors
// =============================================================================

#[test]
fn test_compute_gradient_rejects_wrong_counts() {
    let mut network = end_to_end_network();
    let mut calc = backward_with_delta(&mut network, 0.3);
    let before = calc.gradients().to_vec();
    let (hidden, output) = (network.layer(1).unwrap(), network.layer(2).unwrap());

    let err = output
        .compute_gradient(hidden, &mut calc, network.buffers(), 2, 1)
        .unwrap_err();
    assert!(matches!(err, FlatNetError::DimensionMismatch { .. }));
    assert_eq!(calc.gradients(), before.as_slice());
}

#[test]
fn test_compute_gradient_rejects_short_accumulator() {
    let mut network = end_to_end_network();
    let mut out = [0.0];
    network.compute(&[1.0, 0.5], &mut out).unwrap();

    // Sized for a smaller network
    let mut calc = GradientCalc::with_counts(4, 9, ErrorFunction::Output);
    let (input, hidden) = (network.layer(0).unwrap(), network.layer(1).unwrap());
    let err = hidden
        .compute_gradient(input, &mut calc, network.buffers(), 3, 2)
        .unwrap_err();
    assert!(matches!(err, FlatNetError::IndexOutOfRange { buffer: "deltas", .. }));
    assert!(calc.gradients().iter().all(|&g| g == 0.0));
}

#[test]
fn test_process_rejects_mismatched_accumulator() {
    let mut network = end_to_end_network();
    let mut calc = GradientCalc::with_counts(3, 3, ErrorFunction::Output);
    assert!(matches!(
        calc.process(&mut network, &[1.0, 0.5], &[0.0]),
        Err(FlatNetError::DimensionMismatch { .. })
    ));
}
