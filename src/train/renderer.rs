use std::io::Write;

use burn::train::renderer::{MetricState, MetricsRenderer, TrainingProgress};
use clap::ValueEnum;

use super::Split;

const BAR_WIDTH: usize = 30;

/// How a training run reports its per-batch progress.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum ProgressDisplay {
    /// A single progress line per epoch and split, redrawn on stderr.
    #[default]
    Bar,
    /// burn's terminal dashboard, or its plain printer when stdout is not a terminal.
    Dashboard,
    /// Nothing but the log records.
    Quiet,
}

/// Draws a progress bar with the running loss of the current split.
pub struct ProgressBar<W> {
    output: W,
    loss: Option<String>,
    line: Option<(Split, usize)>,
}

impl<W: Write + Send + Sync> ProgressBar<W> {
    pub fn new(output: W) -> Self {
        Self {
            output,
            loss: None,
            line: None,
        }
    }

    fn update(&mut self, state: MetricState) {
        if let MetricState::Numeric(entry, _) = state {
            self.loss = Some(format!("{} {}", entry.name, entry.formatted));
        }
    }

    fn render(&mut self, split: Split, item: TrainingProgress) {
        let line = Some((split, item.epoch));
        if self.line.is_some() && self.line != line {
            self.finish_line();
        }
        self.line = line;

        let progress = &item.progress;
        let filled = match progress.items_total {
            0 => 0,
            total => (progress.items_processed * BAR_WIDTH / total).min(BAR_WIDTH),
        };
        let mut text = format!(
            "\r{split} epoch {}/{} [{}{}] {}/{}",
            item.epoch,
            item.epoch_total,
            "#".repeat(filled),
            "-".repeat(BAR_WIDTH - filled),
            progress.items_processed,
            progress.items_total,
        );
        if let Some(loss) = &self.loss {
            text.push_str(" | ");
            text.push_str(loss);
        }

        // The bar is best effort, a closed stderr must not stop the training.
        self.output.write_all(text.as_bytes()).ok();
        self.output.flush().ok();
    }

    fn finish_line(&mut self) {
        if self.line.take().is_some() {
            self.output.write_all(b"\n").ok();
        }
    }

    pub fn into_inner(self) -> W {
        self.output
    }
}

impl<W: Write + Send + Sync> MetricsRenderer for ProgressBar<W> {
    fn update_train(&mut self, state: MetricState) {
        self.update(state);
    }

    fn update_valid(&mut self, state: MetricState) {
        self.update(state);
    }

    fn render_train(&mut self, item: TrainingProgress) {
        self.render(Split::Train, item);
    }

    fn render_valid(&mut self, item: TrainingProgress) {
        self.render(Split::Valid, item);
    }

    fn on_train_end(&mut self) -> Result<(), Box<dyn core::error::Error>> {
        self.finish_line();
        self.output.flush()?;
        Ok(())
    }
}

/// Discards every update.
pub struct QuietRenderer;

impl MetricsRenderer for QuietRenderer {
    fn update_train(&mut self, _state: MetricState) {}

    fn update_valid(&mut self, _state: MetricState) {}

    fn render_train(&mut self, _item: TrainingProgress) {}

    fn render_valid(&mut self, _item: TrainingProgress) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::{data::dataloader::Progress, train::metric::MetricEntry};

    fn progress(epoch: usize, items_processed: usize) -> TrainingProgress {
        TrainingProgress {
            progress: Progress {
                items_processed,
                items_total: 40,
            },
            epoch,
            epoch_total: 2,
            iteration: items_processed / 10,
        }
    }

    fn loss(formatted: &str) -> MetricState {
        MetricState::Numeric(
            MetricEntry::new("Loss".into(), formatted.into(), String::new()),
            0.0,
        )
    }

    #[test]
    fn bar_is_redrawn_in_place_within_an_epoch() {
        let mut bar = ProgressBar::new(Vec::new());

        bar.update_train(loss("epoch 0.70 - batch 0.70"));
        bar.render_train(progress(1, 10));
        bar.update_train(loss("epoch 0.65 - batch 0.60"));
        bar.render_train(progress(1, 40));

        let text = String::from_utf8(bar.into_inner()).unwrap();
        assert_eq!(text.matches('\r').count(), 2);
        assert!(!text.contains('\n'));
        assert!(text.ends_with(
            "train epoch 1/2 [##############################] 40/40 | Loss epoch 0.65 - batch 0.60"
        ));
    }

    #[test]
    fn a_new_split_or_epoch_starts_a_new_line() {
        let mut bar = ProgressBar::new(Vec::new());

        bar.render_train(progress(1, 20));
        bar.render_valid(progress(1, 20));
        bar.render_train(progress(2, 20));
        bar.on_train_end().unwrap();

        let text = String::from_utf8(bar.into_inner()).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("\rtrain epoch 1/2 [###############---------------] 20/40"));
        assert!(lines[1].starts_with("\rvalid epoch 1/2"));
        assert!(lines[2].starts_with("\rtrain epoch 2/2"));
    }
}
