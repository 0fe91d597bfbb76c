#[cfg(not(any(feature = "ndarray", feature = "tch-cpu", feature = "wgpu")))]
compile_error!("Enable a backend feature: `ndarray`, `tch-cpu` or `wgpu`.");

mod backend {
    use std::path::Path;

    use burn::{backend::Autodiff, tensor::backend::Backend};
    use pixelcnn::{
        cli::{Cli, Commands},
        logger,
        train::{evaluate, train, RunOptions, Split},
        Result,
    };

    #[cfg(feature = "ndarray")]
    pub type Selected = burn::backend::NdArray<f32>;
    #[cfg(all(feature = "tch-cpu", not(feature = "ndarray")))]
    pub type Selected = burn::backend::LibTorch<f32>;
    #[cfg(all(feature = "wgpu", not(any(feature = "ndarray", feature = "tch-cpu"))))]
    pub type Selected = burn::backend::Wgpu;

    pub fn run<B: Backend>(cli: Cli, device: B::Device) -> Result<()> {
        let config = cli.command.training_config();

        match cli.command {
            Commands::Train {
                artifact_dir,
                resume,
                progress,
                ..
            } => {
                logger::install(Some(Path::new(&artifact_dir)))?;
                // Only `train` commands carry a configuration.
                let Some(config) = config else {
                    return Ok(());
                };
                let options = RunOptions::default()
                    .with_resume(resume)
                    .with_progress(progress);

                let result = train::<Autodiff<B>>(&artifact_dir, config, device, options)?;

                match result.best_epoch(Split::Valid) {
                    Some(best) => println!(
                        "Best held-out cross_entropy {:.5} at epoch {} ({:?})",
                        best.valid, best.epoch, result.stop_reason
                    ),
                    None => println!("No epoch was run ({:?})", result.stop_reason),
                }
            }
            Commands::Evaluate { artifact_dir } => {
                logger::install(None)?;

                let loss = evaluate::<B>(&artifact_dir, device)?;
                println!("Test cross_entropy {loss:.5}");
            }
        }

        Ok(())
    }
}

use clap::Parser;
use pixelcnn::cli::Cli;

fn main() {
    let cli = Cli::parse();

    if let Err(err) = backend::run::<backend::Selected>(cli, Default::default()) {
        log::error!("{err}");
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}
