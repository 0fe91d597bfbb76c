use std::path::Path;

use burn::{
    backend::{Autodiff, NdArray},
    data::dataset::{vision::MnistItem, InMemDataset},
};
use pixelcnn::{
    model::PixelCnnConfig,
    train::{
        evaluate_with, train_with, OptimizerConfig, ProgressDisplay, RunOptions, Split,
        StopReason, TrainingConfig,
    },
    Mode, PixelCnnError,
};

type Backend = NdArray<f32>;
type AutodiffBackend = Autodiff<Backend>;

/// Digit-like items: a vertical stroke whose column depends on the index.
fn strokes(count: usize) -> Vec<MnistItem> {
    (0..count)
        .map(|index| {
            let mut image = [[0f32; 28]; 28];
            let column = 4 + index % 20;
            for row in image.iter_mut().take(24).skip(4) {
                row[column] = 255.0;
            }
            MnistItem {
                image,
                label: (index % 10) as u8,
            }
        })
        .collect()
}

/// The same blank image, repeated.
fn blanks(count: usize) -> Vec<MnistItem> {
    (0..count)
        .map(|_| MnistItem {
            image: [[0f32; 28]; 28],
            label: 0,
        })
        .collect()
}

fn small_config(mode: Mode) -> TrainingConfig {
    let model = PixelCnnConfig::new()
        .with_mode(mode)
        .with_num_layers(1)
        .with_hidden_channels(4);

    TrainingConfig::new(model)
        .with_num_epochs(1)
        .with_batch_size(16)
}

fn quiet() -> RunOptions {
    RunOptions::default().with_progress(ProgressDisplay::Quiet)
}

fn num_lines(path: impl AsRef<Path>) -> usize {
    std::fs::read_to_string(path).unwrap().lines().count()
}

#[test]
fn one_epoch_writes_every_artifact() {
    let artifact_dir = tempfile::tempdir().unwrap();

    let result = train_with::<AutodiffBackend, _, _>(
        artifact_dir.path(),
        small_config(Mode::Binary),
        InMemDataset::new(strokes(100)),
        InMemDataset::new(strokes(20)),
        Default::default(),
        quiet(),
    )
    .unwrap();

    assert_eq!(result.epochs.len(), 1);
    assert_eq!(result.epochs[0].epoch, 1);
    assert!(result.epochs[0].train.is_finite());
    assert!(result.epochs[0].valid.is_finite());
    assert_eq!(result.stop_reason, StopReason::MaxEpochs);

    let root = artifact_dir.path();
    assert!(root.join("config.json").exists());
    assert!(root.join("experiment.log").exists());
    assert!(root.join("model.mpk").exists());
    for record in ["model", "optim", "scheduler"] {
        assert!(root.join(format!("checkpoint/{record}-1.mpk")).exists());
    }
    // One line per batch: 6 full batches and a partial one of 4 items.
    assert_eq!(num_lines(root.join("train/epoch-1/Loss.log")), 7);
    assert!(root.join("valid/epoch-1/Loss.log").exists());
}

#[test]
fn training_lowers_the_binary_loss() {
    let artifact_dir = tempfile::tempdir().unwrap();
    let config = small_config(Mode::Binary)
        .with_num_epochs(3)
        .with_learning_rate(1e-2);

    let result = train_with::<AutodiffBackend, _, _>(
        artifact_dir.path(),
        config,
        InMemDataset::new(strokes(64)),
        InMemDataset::new(strokes(16)),
        Default::default(),
        quiet(),
    )
    .unwrap();

    assert_eq!(result.epochs.len(), 3);
    assert!(result.epochs[2].train < result.epochs[0].train);
}

#[test]
fn stops_after_patience_epochs_without_improvement() {
    let artifact_dir = tempfile::tempdir().unwrap();
    // Frozen weights and an order-independent held-out set give a constant loss.
    let config = small_config(Mode::Binary)
        .with_num_epochs(100)
        .with_patience(3)
        .with_learning_rate(0.0);

    let result = train_with::<AutodiffBackend, _, _>(
        artifact_dir.path(),
        config,
        InMemDataset::new(strokes(32)),
        InMemDataset::new(blanks(8)),
        Default::default(),
        quiet(),
    )
    .unwrap();

    // Metrics reach the event store asynchronously, so a late batch can shift the stop by an epoch.
    let StopReason::EarlyStopping { epoch } = result.stop_reason else {
        panic!("expected an early stop, got {:?}", result.stop_reason);
    };
    assert!((4..10).contains(&epoch), "stopped at epoch {epoch}");
    assert_eq!(result.epochs.len(), epoch);
    assert!(result.best_epoch(Split::Valid).unwrap().epoch <= epoch - 3);
}

#[test]
fn resume_continues_the_history() {
    let artifact_dir = tempfile::tempdir().unwrap();
    let config = small_config(Mode::Binary);

    let first = train_with::<AutodiffBackend, _, _>(
        artifact_dir.path(),
        config.clone(),
        InMemDataset::new(strokes(32)),
        InMemDataset::new(strokes(16)),
        Default::default(),
        quiet(),
    )
    .unwrap();

    let resumed = train_with::<AutodiffBackend, _, _>(
        artifact_dir.path(),
        config.with_num_epochs(2),
        InMemDataset::new(strokes(32)),
        InMemDataset::new(strokes(16)),
        Default::default(),
        quiet().with_resume(true),
    )
    .unwrap();

    let epochs = &resumed.epochs;
    assert_eq!(epochs.len(), 2);
    assert_eq!(epochs[0].epoch, 1);
    assert!((epochs[0].valid - first.epochs[0].valid).abs() < 1e-9);
    assert_eq!(epochs[1].epoch, 2);

    let root = artifact_dir.path();
    assert!(root.join("checkpoint/model-2.mpk").exists());
    // The restored epoch keeps its log, the resumed one is written next to it.
    assert_eq!(num_lines(root.join("train/epoch-1/Loss.log")), 2);
    assert_eq!(num_lines(root.join("train/epoch-2/Loss.log")), 2);
}

#[test]
fn resume_without_checkpoint_fails() {
    let artifact_dir = tempfile::tempdir().unwrap();

    let result = train_with::<AutodiffBackend, _, _>(
        artifact_dir.path(),
        small_config(Mode::Binary),
        InMemDataset::new(strokes(16)),
        InMemDataset::new(strokes(16)),
        Default::default(),
        quiet().with_resume(true),
    );

    assert!(matches!(result, Err(PixelCnnError::NoCheckpoint(_))));
}

#[test]
fn diverging_loss_aborts_the_run() {
    let artifact_dir = tempfile::tempdir().unwrap();
    let mut items = strokes(32);
    items[0].image[10][10] = f32::NAN;

    let result = train_with::<AutodiffBackend, _, _>(
        artifact_dir.path(),
        small_config(Mode::Binary).with_num_epochs(5),
        InMemDataset::new(items),
        InMemDataset::new(strokes(16)),
        Default::default(),
        quiet(),
    );

    match result {
        Err(PixelCnnError::NonFiniteLoss {
            split: Split::Train,
            epoch: 1,
            value,
        }) => assert!(!value.is_finite()),
        other => panic!("expected a diverged train loss, got {other:?}"),
    }
    assert!(!artifact_dir.path().join("model.mpk").exists());
}

#[test]
fn rms_prop_with_weight_decay_trains() {
    let artifact_dir = tempfile::tempdir().unwrap();
    let config = small_config(Mode::Binary)
        .with_num_epochs(2)
        .with_optimizer(OptimizerConfig::rms_prop().with_weight_decay(1e-4));

    let result = train_with::<AutodiffBackend, _, _>(
        artifact_dir.path(),
        config,
        InMemDataset::new(strokes(32)),
        InMemDataset::new(strokes(16)),
        Default::default(),
        quiet(),
    )
    .unwrap();

    assert_eq!(result.epochs.len(), 2);
    assert!(result.epochs.iter().all(|epoch| epoch.train.is_finite()));
    assert!(artifact_dir.path().join("checkpoint/optim-2.mpk").exists());
}

#[test]
fn evaluates_a_trained_model() {
    let artifact_dir = tempfile::tempdir().unwrap();
    let config = small_config(Mode::Multinomial);

    let result = train_with::<AutodiffBackend, _, _>(
        artifact_dir.path(),
        config.clone(),
        InMemDataset::new(strokes(16)),
        InMemDataset::new(strokes(16)),
        Default::default(),
        quiet(),
    )
    .unwrap();

    let loss =
        evaluate_with::<Backend, _>(&result.model, &config, InMemDataset::new(strokes(16)))
            .unwrap();

    assert!(loss.is_finite());
    assert!(loss > 0.0);
    // Same items as the held-out split of the last epoch.
    assert!((loss - result.epochs[0].valid).abs() < 1e-4);
}
