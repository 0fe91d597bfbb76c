/// Checkpoint discovery for resumed runs.
pub mod checkpoint;
/// Early stopping and divergence checks on the epoch losses.
pub mod monitor;
/// Per-batch progress display.
pub mod renderer;

mod step;

pub use monitor::{best_epoch, EpochLosses};
pub use renderer::ProgressDisplay;
pub use step::*;

use std::path::Path;

use burn::{
    data::dataset::{vision::MnistItem, Dataset},
    module::AutodiffModule,
    optim::{decay::WeightDecayConfig, AdamConfig, Optimizer, RmsPropConfig},
    prelude::*,
    record::CompactRecorder,
    tensor::backend::AutodiffBackend,
    train::{
        logger::{FileMetricLogger, MetricLogger},
        metric::LossMetric,
        LearnerBuilder, ValidStep,
    },
};
use serde::{Deserialize, Serialize};

use crate::{
    data::{mnist, pixel_loader, PixelLoader},
    error::{PixelCnnError, Result},
    logger::ExperimentLogger,
    model::{PixelCnn, PixelCnnConfig},
};
use monitor::{LossMonitor, MonitorReport, Verdict};
use renderer::{ProgressBar, QuietRenderer};

const CHECKPOINT_DIR: &str = "checkpoint";
const TRAIN_DIR: &str = "train";
const VALID_DIR: &str = "valid";

/// A dataset split, as seen by the training loop.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Split {
    Train,
    /// Held-out data used for monitoring and early stopping.
    Valid,
}

impl core::fmt::Display for Split {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Split::Train => f.write_str("train"),
            Split::Valid => f.write_str("valid"),
        }
    }
}

/// The update rule applied once per minibatch.
#[derive(Clone, Serialize, Deserialize)]
pub enum OptimizerConfig {
    Adam(AdamConfig),
    RmsProp(RmsPropConfig),
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self::Adam(AdamConfig::new())
    }
}

impl OptimizerConfig {
    /// RMSProp with a decay rate of 0.9.
    pub fn rms_prop() -> Self {
        Self::RmsProp(RmsPropConfig::new().with_alpha(0.9))
    }

    /// Adds an L2 penalty on the parameters.
    pub fn with_weight_decay(self, penalty: f32) -> Self {
        let decay = Some(WeightDecayConfig::new(penalty));

        match self {
            Self::Adam(config) => Self::Adam(config.with_weight_decay(decay)),
            Self::RmsProp(config) => Self::RmsProp(config.with_weight_decay(decay)),
        }
    }
}

#[derive(Config)]
pub struct TrainingConfig {
    pub model: PixelCnnConfig,
    #[config(default = "OptimizerConfig::default()")]
    pub optimizer: OptimizerConfig,
    #[config(default = 2e-3)]
    pub learning_rate: f64,
    #[config(default = 100)]
    pub num_epochs: usize,
    #[config(default = 16)]
    pub batch_size: usize,
    /// Epochs without a lower held-out loss tolerated before stopping.
    #[config(default = 3)]
    pub patience: usize,
    #[config(default = 42)]
    pub seed: u64,
    /// Only use the first items of each MNIST split.
    pub max_items: Option<usize>,
}

/// How a training run starts and reports its progress.
#[derive(Clone, Copy, Debug, Default)]
pub struct RunOptions {
    /// Continue from the latest checkpoint of the artifact directory.
    pub resume: bool,
    pub progress: ProgressDisplay,
}

impl RunOptions {
    pub fn with_resume(mut self, resume: bool) -> Self {
        self.resume = resume;
        self
    }

    pub fn with_progress(mut self, progress: ProgressDisplay) -> Self {
        self.progress = progress;
        self
    }
}

/// Why the training loop ended.
#[derive(Clone, Debug, PartialEq)]
pub enum StopReason {
    /// The last configured epoch was reached.
    MaxEpochs,
    /// The held-out loss did not improve for `patience` epochs, the last one being `epoch`.
    EarlyStopping { epoch: usize },
    /// The run was stopped from the dashboard.
    Interrupted,
}

/// The trained model, in inference mode, with the losses of every epoch.
#[derive(Debug)]
pub struct TrainingResult<B: Backend> {
    pub model: PixelCnn<B>,
    pub epochs: Vec<EpochLosses>,
    pub stop_reason: StopReason,
}

impl<B: Backend> TrainingResult<B> {
    /// The first epoch reaching the lowest loss on `split`.
    pub fn best_epoch(&self, split: Split) -> Option<&EpochLosses> {
        best_epoch(&self.epochs, split)
    }
}

/// Train on the MNIST train split, monitoring the MNIST test split.
///
/// The configuration is written to `<artifact_dir>/config.json`, checkpoints
/// to `<artifact_dir>/checkpoint`, the per-batch losses to `<artifact_dir>/train`
/// and `<artifact_dir>/valid`, and the final model to `<artifact_dir>/model`.
pub fn train<B: AutodiffBackend>(
    artifact_dir: &str,
    config: TrainingConfig,
    device: B::Device,
    options: RunOptions,
) -> Result<TrainingResult<B::InnerBackend>> {
    let dataset_train = mnist(Split::Train, config.max_items);
    let dataset_valid = mnist(Split::Valid, config.max_items);

    train_with::<B, _, _>(artifact_dir, config, dataset_train, dataset_valid, device, options)
}

/// Same as [train], on any datasets of MNIST-like items.
pub fn train_with<B, DT, DV>(
    artifact_dir: impl AsRef<Path>,
    config: TrainingConfig,
    dataset_train: DT,
    dataset_valid: DV,
    device: B::Device,
    options: RunOptions,
) -> Result<TrainingResult<B::InnerBackend>>
where
    B: AutodiffBackend,
    DT: Dataset<MnistItem> + 'static,
    DV: Dataset<MnistItem> + 'static,
{
    let artifact_dir = artifact_dir.as_ref();

    let checkpoint = match options.resume {
        true => Some(checkpoint::latest_checkpoint(&artifact_dir.join(CHECKPOINT_DIR))?),
        false => {
            // Leftovers of a previous run would be picked up by a later resume.
            for directory in [CHECKPOINT_DIR, TRAIN_DIR, VALID_DIR] {
                std::fs::remove_dir_all(artifact_dir.join(directory)).ok();
            }
            None
        }
    };
    std::fs::create_dir_all(artifact_dir)?;
    config.save(artifact_dir.join("config.json"))?;

    B::seed(config.seed);

    let mode = config.model.mode;
    let dataloader_train = pixel_loader::<B, _>(
        mode,
        dataset_train,
        config.batch_size,
        Some(checkpoint::train_seed(config.seed, checkpoint)),
    );
    let dataloader_valid =
        pixel_loader::<B::InnerBackend, _>(mode, dataset_valid, config.batch_size, None);

    let model = config.model.init::<B>(&device)?;

    log::info!(
        "Training a {mode} PixelCNN with {} convolutions on {} items, batch size {}, learning rate {}",
        model.num_layers(),
        dataloader_train.num_items(),
        config.batch_size,
        config.learning_rate
    );
    if let Some(epoch) = checkpoint {
        log::info!("Resuming training after epoch {epoch}");
    }

    let run = Run {
        artifact_dir,
        config: &config,
        options,
        checkpoint,
        device,
    };
    let result = match &config.optimizer {
        OptimizerConfig::Adam(optimizer) => run.fit(
            model,
            optimizer.init::<B, PixelCnn<B>>(),
            dataloader_train,
            dataloader_valid,
        ),
        OptimizerConfig::RmsProp(optimizer) => run.fit(
            model,
            optimizer.init::<B, PixelCnn<B>>(),
            dataloader_train,
            dataloader_valid,
        ),
    }?;

    log::info!("Training stopped: {:?}", result.stop_reason);

    result
        .model
        .clone()
        .save_file(artifact_dir.join("model"), &CompactRecorder::new())?;

    Ok(result)
}

/// Everything a learner needs besides the model and its optimizer.
struct Run<'a, B: AutodiffBackend> {
    artifact_dir: &'a Path,
    config: &'a TrainingConfig,
    options: RunOptions,
    checkpoint: Option<usize>,
    device: B::Device,
}

impl<B: AutodiffBackend> Run<'_, B> {
    fn fit<O>(
        self,
        model: PixelCnn<B>,
        optim: O,
        dataloader_train: PixelLoader<B>,
        dataloader_valid: PixelLoader<B::InnerBackend>,
    ) -> Result<TrainingResult<B::InnerBackend>>
    where
        O: Optimizer<PixelCnn<B>, B> + 'static,
    {
        let monitor = LossMonitor::new::<B>(self.config.patience);
        let report = monitor.report();

        let mut logger_train = FileMetricLogger::new(self.artifact_dir.join(TRAIN_DIR));
        let mut logger_valid = FileMetricLogger::new(self.artifact_dir.join(VALID_DIR));
        if let Some(epoch) = self.checkpoint {
            // Resumed epochs are logged after the restored ones.
            logger_train.end_epoch(epoch);
            logger_valid.end_epoch(epoch);
        }

        let mut builder = LearnerBuilder::new(self.artifact_dir)
            .metric_train_numeric(LossMetric::<B>::new())
            .metric_valid_numeric(LossMetric::<B::InnerBackend>::new())
            .metric_loggers(logger_train, logger_valid)
            .with_file_checkpointer(CompactRecorder::new())
            .with_application_logger(Some(Box::new(ExperimentLogger::new(
                self.artifact_dir.to_path_buf(),
            ))))
            .early_stopping(monitor)
            .devices(vec![self.device])
            .num_epochs(self.config.num_epochs);

        builder = match self.options.progress {
            ProgressDisplay::Bar => builder.renderer(ProgressBar::new(std::io::stderr())),
            ProgressDisplay::Dashboard => builder.summary(),
            ProgressDisplay::Quiet => builder.renderer(QuietRenderer),
        };
        if let Some(epoch) = self.checkpoint {
            builder = builder.checkpoint(epoch);
        }
        let interrupter = builder.interrupter();

        let model = builder
            .build(model, optim, self.config.learning_rate)
            .fit(dataloader_train, dataloader_valid);

        let MonitorReport { epochs, verdict } = match report.lock() {
            Ok(report) => report.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        };

        let stop_reason = match verdict {
            Some(Verdict::Diverged {
                split,
                epoch,
                value,
            }) => {
                return Err(PixelCnnError::NonFiniteLoss {
                    split,
                    epoch,
                    value,
                })
            }
            Some(Verdict::Patience { epoch }) => StopReason::EarlyStopping { epoch },
            None if interrupter.should_stop() => StopReason::Interrupted,
            None => StopReason::MaxEpochs,
        };

        Ok(TrainingResult {
            model: model.valid(),
            epochs,
            stop_reason,
        })
    }
}

/// Mean cross-entropy of the model saved in `artifact_dir` on the MNIST test split.
pub fn evaluate<B: Backend>(artifact_dir: &str, device: B::Device) -> Result<f64> {
    let config = TrainingConfig::load(format!("{artifact_dir}/config.json"))?;
    let model = config.model.init::<B>(&device)?.load_file(
        format!("{artifact_dir}/model"),
        &CompactRecorder::new(),
        &device,
    )?;

    evaluate_with(&model, &config, mnist(Split::Valid, config.max_items))
}

/// Mean cross-entropy of `model` over `dataset`, weighting every example equally.
pub fn evaluate_with<B, D>(model: &PixelCnn<B>, config: &TrainingConfig, dataset: D) -> Result<f64>
where
    B: Backend,
    D: Dataset<MnistItem> + 'static,
{
    let dataloader =
        pixel_loader::<B, _>(config.model.mode, dataset, config.batch_size, None);

    let mut sum = 0.0;
    let mut num_items = 0;
    for batch in dataloader.iter() {
        let output = ValidStep::step(model, batch);
        num_items += output.losses.dims()[0];
        sum += output.losses.sum().into_scalar().elem::<f64>();
    }
    let loss = sum / num_items as f64;

    log::info!("Evaluated {num_items} items: cross_entropy {loss:.5}");

    match loss.is_finite() {
        true => Ok(loss),
        false => Err(PixelCnnError::NonFiniteLoss {
            split: Split::Valid,
            epoch: 0,
            value: loss,
        }),
    }
}
