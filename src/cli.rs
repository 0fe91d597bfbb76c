use clap::{Parser, Subcommand, ValueEnum};

use crate::{
    model::PixelCnnConfig,
    train::{OptimizerConfig, ProgressDisplay, TrainingConfig},
    Mode,
};

#[derive(Parser, Debug)]
#[command(version, about = "PixelCNN on MNIST")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Train a model, checkpointing every epoch.
    Train {
        #[arg(long, default_value = "/tmp/pixelcnn")]
        artifact_dir: String,
        #[arg(long, value_enum, default_value_t = ModeArg::Multinomial)]
        mode: ModeArg,
        #[arg(long, value_enum, default_value_t = OptimizerArg::Adam)]
        optimizer: OptimizerArg,
        #[arg(long, default_value_t = 2e-3)]
        learning_rate: f64,
        #[arg(long)]
        weight_decay: Option<f32>,
        #[arg(long, default_value_t = 100)]
        num_epochs: usize,
        #[arg(long, default_value_t = 16)]
        batch_size: usize,
        #[arg(long, default_value_t = 3)]
        patience: usize,
        /// Number of repeated 3x3 blocks.
        #[arg(long, default_value_t = 6)]
        num_layers: usize,
        #[arg(long, default_value_t = false)]
        residual: bool,
        #[arg(long, default_value_t = false)]
        tied_biases: bool,
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// Only use the first items of each split.
        #[arg(long)]
        max_items: Option<usize>,
        /// Continue from the latest checkpoint in the artifact directory.
        #[arg(long, default_value_t = false)]
        resume: bool,
        #[arg(long, value_enum, default_value_t = ProgressDisplay::Bar)]
        progress: ProgressDisplay,
    },
    /// Report the test cross-entropy of a trained model.
    Evaluate {
        #[arg(long, default_value = "/tmp/pixelcnn")]
        artifact_dir: String,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum ModeArg {
    Binary,
    #[value(alias = "256ary")]
    Multinomial,
}

impl From<ModeArg> for Mode {
    fn from(mode: ModeArg) -> Self {
        match mode {
            ModeArg::Binary => Mode::Binary,
            ModeArg::Multinomial => Mode::Multinomial,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OptimizerArg {
    Adam,
    RmsProp,
}

impl Commands {
    /// The training configuration described by a `train` command.
    pub fn training_config(&self) -> Option<TrainingConfig> {
        let Commands::Train {
            mode,
            optimizer,
            learning_rate,
            weight_decay,
            num_epochs,
            batch_size,
            patience,
            num_layers,
            residual,
            tied_biases,
            seed,
            max_items,
            ..
        } = self
        else {
            return None;
        };

        let model = PixelCnnConfig::new()
            .with_mode((*mode).into())
            .with_num_layers(*num_layers)
            .with_residual(*residual)
            .with_tied_biases(*tied_biases);

        let mut optimizer = match optimizer {
            OptimizerArg::Adam => OptimizerConfig::default(),
            OptimizerArg::RmsProp => OptimizerConfig::rms_prop(),
        };
        if let Some(penalty) = weight_decay {
            optimizer = optimizer.with_weight_decay(*penalty);
        }

        Some(
            TrainingConfig::new(model)
                .with_optimizer(optimizer)
                .with_learning_rate(*learning_rate)
                .with_num_epochs(*num_epochs)
                .with_batch_size(*batch_size)
                .with_patience(*patience)
                .with_seed(*seed)
                .with_max_items(*max_items),
        )
    }
}
