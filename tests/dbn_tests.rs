//! Architecture tests for the DBN stack.
//!
//! These tests verify:
//! - Encoder/decoder shapes follow the layer-size chain
//! - Encoder, RBM and decoder share one physical tensor per parameter
//! - Reconstruction loss is non-negative, and zero for an identity network
//! - Inference never mutates the network
//! - Invalid architectures and inputs are rejected

use approx::assert_abs_diff_eq;
use dbn::{Dbn, DbnError, Identity, Rbm};
use ndarray::{Array1, Array2};
use rand::rngs::StdRng;
use rand::SeedableRng;

fn build(n_ins: usize, hidden: &[usize], seed: u64) -> Dbn {
    let mut rng = StdRng::seed_from_u64(seed);
    Dbn::new(n_ins, hidden, &mut rng).expect("Failed to create DBN")
}

/// Deterministic data in [0, 1].
fn sample_data(rows: usize, cols: usize) -> Array2<f32> {
    Array2::from_shape_fn((rows, cols), |(i, j)| ((i * 7 + j * 3) % 5) as f32 / 4.0)
}

#[test]
fn test_layer_shapes_4_3_2() {
    let dbn = build(4, &[3, 2], 0);
    assert_eq!(dbn.n_layers(), 2);

    let encoder_shapes: Vec<(usize, usize)> = (0..2)
        .map(|i| (dbn.encoder(i).n_in(), dbn.encoder(i).n_out()))
        .collect();
    assert_eq!(encoder_shapes, vec![(4, 3), (3, 2)]);

    // Decoder order: top first
    let decoder_shapes: Vec<(usize, usize)> = (0..2)
        .rev()
        .map(|i| (dbn.decoder(i).n_in(), dbn.decoder(i).n_out()))
        .collect();
    assert_eq!(decoder_shapes, vec![(2, 3), (3, 4)]);
}

#[test]
fn test_chain_invariants() {
    let sizes = [7, 5, 3, 2];
    let dbn = build(9, &sizes, 1);
    for i in 0..sizes.len() {
        let expected_in = if i == 0 { 9 } else { sizes[i - 1] };
        let rbm = dbn.rbm(i);
        assert_eq!(dbn.encoder(i).n_in(), expected_in);
        assert_eq!(dbn.encoder(i).n_out(), sizes[i]);
        assert_eq!(rbm.n_visible(), expected_in);
        assert_eq!(rbm.n_hidden(), sizes[i]);
        assert_eq!(dbn.decoder(i).n_in(), sizes[i]);
        assert_eq!(dbn.decoder(i).n_out(), expected_in);
        assert_eq!(dbn.decoder(i).bias().len(), expected_in);
    }

    let x = sample_data(3, 9);
    assert_eq!(dbn.reconstruct(x.view()).unwrap().dim(), (3, 9));
}

#[test]
fn test_mutating_rbm_is_seen_by_encoder_and_decoder() {
    let mut dbn = build(4, &[3, 2], 2);
    for i in 0..dbn.n_layers() {
        dbn.rbm_mut(i).weights_mut()[[1, 0]] = 42.0 + i as f32;
        dbn.rbm_mut(i).hbias_mut()[0] = -3.0;
        dbn.rbm_mut(i).vbias_mut()[1] = 7.0;

        assert_eq!(dbn.encoder(i).weights()[[1, 0]], 42.0 + i as f32);
        assert_eq!(dbn.decoder(i).weights()[[0, 1]], 42.0 + i as f32);
        assert_eq!(dbn.encoder(i).bias()[0], -3.0);
        assert_eq!(dbn.decoder(i).bias()[1], 7.0);
    }
}

#[test]
fn test_decoder_is_transpose_of_current_weights() {
    let mut dbn = build(5, &[4], 3);
    dbn.rbm_mut(0).weights_mut().mapv_inplace(|w| w * 2.0 + 0.5);
    let w = dbn.rbm(0).weights().to_owned();
    assert_eq!(dbn.decoder(0).weights(), w.t());
}

#[test]
fn test_loss_non_negative() {
    let dbn = build(6, &[4, 3], 4);
    for rows in [1, 2, 5] {
        let x = sample_data(rows, 6);
        let loss = dbn.reconstruction_loss(x.view()).unwrap();
        assert!(loss >= 0.0);
        assert!(loss.is_finite());
    }
}

#[test]
fn test_loss_matches_definition() {
    let dbn = build(5, &[3], 5);
    let x = sample_data(4, 5);
    let x_hat = dbn.reconstruct(x.view()).unwrap();
    let expected: f32 = (&x - &x_hat).mapv(|d| d * d).sum();
    assert_abs_diff_eq!(
        dbn.reconstruction_loss(x.view()).unwrap(),
        expected,
        epsilon = 1e-5
    );
}

#[test]
fn test_identity_network_has_zero_loss() {
    let rbm = Rbm::from_parts(Array2::eye(4), Array1::zeros(4), Array1::zeros(4))
        .expect("valid rbm");
    let dbn = Dbn::from_rbms(4, vec![rbm], Box::new(Identity)).expect("valid dbn");
    let x = sample_data(6, 4);
    assert_eq!(dbn.reconstruction_loss(x.view()).unwrap(), 0.0);
    assert_eq!(dbn.encode(x.view()).unwrap(), x);
}

#[test]
fn test_inference_is_pure() {
    let dbn = build(6, &[5, 3], 6);
    let data = sample_data(20, 6);
    let code = Array2::from_shape_fn((4, 3), |(i, j)| ((i + j) % 2) as f32);

    let label_a = dbn.label(data.view(), 3, 10).unwrap();
    let gen_a = dbn.generate(code.view()).unwrap();
    for _ in 0..5 {
        assert_eq!(dbn.label(data.view(), 3, 10).unwrap(), label_a);
        assert_eq!(dbn.generate(code.view()).unwrap(), gen_a);
    }
    assert_eq!(label_a.dim(), (10, 3));
    assert_eq!(gen_a.dim(), (4, 6));
}

#[test]
fn test_label_matches_encode_of_slice() {
    let dbn = build(6, &[4], 7);
    let data = sample_data(12, 6);
    let labelled = dbn.label(data.view(), 2, 5).unwrap();
    let encoded = dbn.encode(data.slice(ndarray::s![2..7, ..])).unwrap();
    assert_eq!(labelled, encoded);
}

#[test]
fn test_label_out_of_range() {
    let dbn = build(6, &[4], 8);
    let data = sample_data(12, 6);
    assert!(matches!(
        dbn.label(data.view(), 5, 10),
        Err(DbnError::DimensionMismatch(_))
    ));
    assert!(dbn.label(data.view(), usize::MAX, 2).is_err());
}

#[test]
fn test_generate_rejects_wrong_code_width() {
    let dbn = build(6, &[4, 3], 9);
    let code = Array2::<f32>::ones((2, 4));
    assert!(matches!(
        dbn.generate(code.view()),
        Err(DbnError::DimensionMismatch(_))
    ));
}

#[test]
fn test_generate_outputs_probabilities() {
    let dbn = build(8, &[6, 4], 10);
    let mut rng = StdRng::seed_from_u64(10);
    let code = dbn.sample_top_code(5, &mut rng);
    let out = dbn.generate(code.view()).unwrap();
    assert_eq!(out.dim(), (5, 8));
    assert!(out.iter().all(|&p| (0.0..=1.0).contains(&p)));
}

#[test]
fn test_encode_rejects_wrong_width() {
    let dbn = build(6, &[4], 11);
    let x = Array2::<f32>::zeros((2, 5));
    assert!(matches!(
        dbn.encode(x.view()),
        Err(DbnError::DimensionMismatch(_))
    ));
    assert!(dbn.reconstruction_loss(x.view()).is_err());
}

#[test]
fn test_invalid_architectures() {
    let mut rng = StdRng::seed_from_u64(0);
    assert!(matches!(
        Dbn::new(4, &[], &mut rng),
        Err(DbnError::Configuration(_))
    ));
    assert!(matches!(
        Dbn::new(4, &[3, 0], &mut rng),
        Err(DbnError::Configuration(_))
    ));
    assert!(matches!(
        Dbn::new(0, &[3], &mut rng),
        Err(DbnError::Configuration(_))
    ));
}

#[test]
fn test_from_rbms_checks_chain() {
    let mut rng = StdRng::seed_from_u64(0);
    let first = Rbm::new(4, 3, &mut rng).unwrap();
    let wrong = Rbm::new(2, 2, &mut rng).unwrap();
    assert!(matches!(
        Dbn::from_rbms(4, vec![first, wrong], Box::new(Identity)),
        Err(DbnError::DimensionMismatch(_))
    ));
}

#[test]
fn test_same_seed_same_network() {
    let a = build(5, &[4, 2], 123);
    let b = build(5, &[4, 2], 123);
    for &id in a.params() {
        assert_eq!(a.param(id), b.param(id));
    }
}
