//! End-to-end tests for DBN pretraining and finetuning.
//!
//! These tests verify:
//! - Minibatch partitioning drops the remainder
//! - Pretraining trains every layer for every epoch, bottom-up
//! - Early stopping fires on schedule when the loss stops improving
//! - Finetuning lowers the reconstruction loss
//! - Divergence is caught, and trained networks survive a checkpoint

use approx::assert_abs_diff_eq;
use dbn::checkpoint::{load_checkpoint, save_checkpoint, Stage};
use dbn::training::mean_reconstruction_loss;
use dbn::{
    finetune, partition, pretrain, Backprop, Dbn, DbnError, EarlyStopping, FinetuneConfig,
    PretrainConfig,
};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Binary rows built from a few repeating patterns.
fn pattern_data(rows: usize, cols: usize) -> Array2<f32> {
    Array2::from_shape_fn((rows, cols), |(i, j)| match i % 3 {
        0 => (j < cols / 2) as u8 as f32,
        1 => (j >= cols / 2) as u8 as f32,
        _ => (j % 2 == 0) as u8 as f32,
    })
}

fn build(n_ins: usize, hidden: &[usize], seed: u64) -> Dbn {
    let mut rng = StdRng::seed_from_u64(seed);
    Dbn::new(n_ins, hidden, &mut rng).expect("Failed to create DBN")
}

#[test]
fn test_partition_97_rows_by_10() {
    let data = pattern_data(97, 6);
    let batches = partition(data.view(), 10, 6).unwrap();
    assert_eq!(batches.len(), 9);

    let mut dbn = build(6, &[4], 0);
    let mut rng = StdRng::seed_from_u64(0);
    let config = PretrainConfig {
        epochs: 1,
        batch_size: 10,
        ..PretrainConfig::default()
    };
    let report = pretrain(&mut dbn, data.view(), &config, &mut rng).unwrap();
    assert_eq!(report.n_batches, 9);
}

#[test]
fn test_pretrain_report_covers_every_layer_and_epoch() {
    let data = pattern_data(60, 8);
    let mut dbn = build(8, &[6, 4, 3], 1);
    let mut rng = StdRng::seed_from_u64(1);
    let config = PretrainConfig {
        epochs: 4,
        learning_rate: 0.05,
        k: 1,
        batch_size: 10,
    };

    let report = pretrain(&mut dbn, data.view(), &config, &mut rng).unwrap();
    assert_eq!(report.layers.len(), 3);
    for (i, layer) in report.layers.iter().enumerate() {
        assert_eq!(layer.layer, i);
        assert_eq!(layer.epoch_costs.len(), 4);
        assert!(layer.epoch_costs.iter().all(|c| c.is_finite() && *c >= 0.0));
    }
}

#[test]
fn test_pretrain_lowers_first_layer_cost() {
    let data = pattern_data(90, 8);
    let mut dbn = build(8, &[6], 2);
    let mut rng = StdRng::seed_from_u64(2);
    let config = PretrainConfig {
        epochs: 40,
        learning_rate: 0.1,
        k: 1,
        batch_size: 10,
    };

    let report = pretrain(&mut dbn, data.view(), &config, &mut rng).unwrap();
    let costs = &report.layers[0].epoch_costs;
    let first = costs[..5].iter().sum::<f32>() / 5.0;
    let last = costs[costs.len() - 5..].iter().sum::<f32>() / 5.0;
    assert!(last < first, "pretraining cost went from {first} to {last}");
}

/// Layer 1 trains on the outputs of the already trained layer 0, and its
/// training leaves RBM 0 alone.
#[test]
fn test_pretrain_is_greedy_layer_by_layer() {
    let data = pattern_data(40, 8);
    let config = PretrainConfig {
        epochs: 3,
        learning_rate: 0.05,
        k: 1,
        batch_size: 10,
    };

    // Same seed: RBM 0 starts identical in both networks
    let mut stacked = build(8, &[6, 4], 14);
    let initial = stacked.clone();
    let mut single = build(8, &[6], 14);
    assert_eq!(stacked.rbm(0).weights(), single.rbm(0).weights());

    let mut rng_stacked = StdRng::seed_from_u64(15);
    let mut rng_single = StdRng::seed_from_u64(15);
    pretrain(&mut stacked, data.view(), &config, &mut rng_stacked).unwrap();
    pretrain(&mut single, data.view(), &config, &mut rng_single).unwrap();

    // Training layer 1 did not touch RBM 0
    assert_eq!(stacked.rbm(0).weights(), single.rbm(0).weights());
    assert_eq!(stacked.rbm(0).hbias(), single.rbm(0).hbias());
    assert_eq!(stacked.rbm(0).vbias(), single.rbm(0).vbias());

    // Replay layer 1 by hand on the trained layer 0's outputs
    let mut replay = Dbn::from_rbms(
        8,
        vec![single.rbm(0).clone(), initial.rbm(1).clone()],
        Box::new(dbn::Sigmoid),
    )
    .unwrap();
    let batches = partition(data.view(), config.batch_size, 8).unwrap();
    let inputs: Vec<Array2<f32>> = batches
        .iter()
        .map(|batch| replay.layer_input(*batch, 1).unwrap())
        .collect();
    for _ in 0..config.epochs {
        for input in &inputs {
            replay
                .rbm_mut(1)
                .cd_step(input.view(), config.learning_rate, config.k, &mut rng_single)
                .unwrap();
        }
    }
    assert_eq!(stacked.rbm(1).weights(), replay.rbm(1).weights());
    assert_eq!(stacked.rbm(1).hbias(), replay.rbm(1).hbias());
    assert_eq!(stacked.rbm(1).vbias(), replay.rbm(1).vbias());
}

#[test]
fn test_pretrain_rejects_k_zero_before_training() {
    let data = pattern_data(20, 4);
    let mut dbn = build(4, &[3], 3);
    let before = dbn.clone();
    let mut rng = StdRng::seed_from_u64(3);
    let config = PretrainConfig {
        k: 0,
        ..PretrainConfig::default()
    };
    assert!(matches!(
        pretrain(&mut dbn, data.view(), &config, &mut rng),
        Err(DbnError::InvalidConfiguration(_))
    ));
    for &id in dbn.params() {
        assert_eq!(dbn.param(id), before.param(id));
    }
}

#[test]
fn test_pretrain_rejects_wrong_width() {
    let data = pattern_data(20, 5);
    let mut dbn = build(4, &[3], 4);
    let mut rng = StdRng::seed_from_u64(4);
    assert!(matches!(
        pretrain(&mut dbn, data.view(), &PretrainConfig::default(), &mut rng),
        Err(DbnError::DimensionMismatch(_))
    ));
}

/// Best loss at iteration 9, never improved afterwards.
#[test]
fn test_early_stopping_schedule_without_improvement() {
    let mut stopper = EarlyStopping::new(10);
    let mut stopped_at = None;
    for iter in 0..200 {
        if stopper.should_validate(iter) {
            let loss = if iter == 9 { 1.0 } else { 1.0 + iter as f32 };
            stopper.record(iter, loss);
        }
        if stopper.should_stop(iter) {
            stopped_at = Some(iter);
            break;
        }
    }
    assert_eq!(stopped_at, Some(40));
    assert_eq!(stopper.best_iter(), Some(9));
    assert_abs_diff_eq!(stopper.best_loss(), 1.0);
}

#[test]
fn test_finetune_stops_at_patience_when_loss_is_flat() {
    // A zero learning rate keeps the validation loss constant
    let data = pattern_data(100, 6);
    let mut dbn = build(6, &[4, 2], 5);
    let config = FinetuneConfig {
        epochs: 1000,
        learning_rate: 0.0,
        batch_size: 10,
        check_divergence: true,
    };

    let report = finetune(&mut dbn, data.view(), None, &config, &Backprop).unwrap();
    assert!(report.early_stopped);
    assert_eq!(report.last_iter, 40);
    assert_eq!(report.epochs_run, 5);
    assert_eq!(report.best_iter, Some(9));

    let iterations: Vec<usize> = report.history.iter().map(|c| c.iteration).collect();
    assert_eq!(iterations, vec![9, 19, 29, 39]);
    assert!(report.history.iter().all(|c| c.minibatch == 10));
}

#[test]
fn test_finetune_lowers_reconstruction_loss() {
    let data = pattern_data(30, 6);
    let mut dbn = build(6, &[4, 3], 6);
    let batches = partition(data.view(), 5, 6).unwrap();
    let before = mean_reconstruction_loss(&dbn, &batches).unwrap();

    let config = FinetuneConfig {
        epochs: 30,
        learning_rate: 0.01,
        batch_size: 5,
        check_divergence: true,
    };
    let report = finetune(&mut dbn, data.view(), None, &config, &Backprop).unwrap();
    let after = mean_reconstruction_loss(&dbn, &batches).unwrap();

    assert!(report.best_loss < before);
    assert!(after < before, "loss went from {before} to {after}");
    assert!(report.best_iter.is_some());
}

#[test]
fn test_pretrain_then_finetune() {
    let data = pattern_data(60, 8);
    let mut dbn = build(8, &[6, 4], 7);
    let mut rng = StdRng::seed_from_u64(7);

    let pretrain_config = PretrainConfig {
        epochs: 5,
        learning_rate: 0.05,
        k: 1,
        batch_size: 10,
    };
    pretrain(&mut dbn, data.view(), &pretrain_config, &mut rng).unwrap();

    let finetune_config = FinetuneConfig {
        epochs: 10,
        learning_rate: 0.01,
        batch_size: 10,
        check_divergence: true,
    };
    let report = finetune(&mut dbn, data.view(), None, &finetune_config, &Backprop).unwrap();
    assert!(report.best_loss.is_finite());
    assert!(dbn.first_non_finite().is_none());
}

#[test]
fn test_finetune_with_validation_split() {
    let train = pattern_data(40, 6);
    let validation = pattern_data(20, 6);
    let mut dbn = build(6, &[4], 8);
    let config = FinetuneConfig {
        epochs: 3,
        learning_rate: 0.01,
        batch_size: 10,
        check_divergence: true,
    };

    let report = finetune(
        &mut dbn,
        train.view(),
        Some(validation.view()),
        &config,
        &Backprop,
    )
    .unwrap();
    // 4 training batches: validate after every 4th minibatch
    let iterations: Vec<usize> = report.history.iter().map(|c| c.iteration).collect();
    assert_eq!(iterations, vec![3, 7, 11]);
    assert_eq!(report.epochs_run, 3);
    assert!(!report.early_stopped);
}

#[test]
fn test_finetune_rejects_short_validation_set() {
    let train = pattern_data(40, 6);
    let validation = pattern_data(5, 6);
    let mut dbn = build(6, &[4], 9);
    let config = FinetuneConfig {
        batch_size: 10,
        ..FinetuneConfig::default()
    };
    assert!(matches!(
        finetune(&mut dbn, train.view(), Some(validation.view()), &config, &Backprop),
        Err(DbnError::DimensionMismatch(_))
    ));
}

#[test]
fn test_finetune_rejects_wrong_width() {
    let data = pattern_data(40, 5);
    let mut dbn = build(6, &[4], 10);
    assert!(matches!(
        finetune(
            &mut dbn,
            data.view(),
            None,
            &FinetuneConfig::default(),
            &Backprop
        ),
        Err(DbnError::DimensionMismatch(_))
    ));
}

#[test]
fn test_finetune_reports_divergence() {
    let data = pattern_data(20, 4);
    let mut dbn = build(4, &[3], 11);
    dbn.rbm_mut(0).weights_mut()[[0, 0]] = f32::NAN;

    let config = FinetuneConfig {
        epochs: 2,
        learning_rate: 0.01,
        batch_size: 10,
        check_divergence: true,
    };
    match finetune(&mut dbn, data.view(), None, &config, &Backprop) {
        Err(DbnError::Divergence { iteration, param }) => {
            assert_eq!(iteration, 0);
            assert_eq!(param, "layer0.W");
        }
        other => panic!("expected divergence, got {other:?}"),
    }
}

#[test]
fn test_finetune_without_divergence_check_runs_on() {
    let data = pattern_data(20, 4);
    let mut dbn = build(4, &[3], 12);
    dbn.rbm_mut(0).weights_mut()[[0, 0]] = f32::NAN;

    let config = FinetuneConfig {
        epochs: 2,
        learning_rate: 0.01,
        batch_size: 10,
        check_divergence: false,
    };
    let report = finetune(&mut dbn, data.view(), None, &config, &Backprop).unwrap();
    // NaN losses never count as improvements
    assert_eq!(report.best_iter, None);
    assert_eq!(report.epochs_run, 2);
    assert_eq!(report.last_iter, 3);
}

#[test]
fn test_trained_network_survives_checkpoint() {
    let data = pattern_data(40, 6);
    let mut dbn = build(6, &[4, 2], 13);
    let config = FinetuneConfig {
        epochs: 5,
        learning_rate: 0.01,
        batch_size: 10,
        check_divergence: true,
    };
    let report = finetune(&mut dbn, data.view(), None, &config, &Backprop).unwrap();

    let path = std::env::temp_dir()
        .join("dbn_integration_checkpoint")
        .join("final.json");
    save_checkpoint(&dbn, &path, Stage::Finetuned, Some(report.best_loss)).unwrap();
    let (stored, restored) = load_checkpoint(&path).unwrap();

    assert_eq!(stored.stage, Stage::Finetuned);
    assert_eq!(restored.hidden_layer_sizes(), &[4, 2]);
    let original = dbn.encode(data.view()).unwrap();
    let reloaded = restored.encode(data.view()).unwrap();
    for (a, b) in original.iter().zip(reloaded.iter()) {
        assert_abs_diff_eq!(*a, *b, epsilon = 1e-5);
    }

    let _ = std::fs::remove_dir_all(std::env::temp_dir().join("dbn_integration_checkpoint"));
}
