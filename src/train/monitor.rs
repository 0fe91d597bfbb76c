use std::sync::{Arc, Mutex, PoisonError};

use burn::{
    prelude::*,
    train::{
        metric::{
            store::{Aggregate, Direction, EventStoreClient, Split as StoreSplit},
            LossMetric, Metric,
        },
        EarlyStoppingStrategy, MetricEarlyStoppingStrategy, StoppingCondition,
    },
};
use serde::{Deserialize, Serialize};

use super::Split;

impl From<Split> for StoreSplit {
    fn from(split: Split) -> Self {
        match split {
            Split::Train => StoreSplit::Train,
            Split::Valid => StoreSplit::Valid,
        }
    }
}

/// Mean losses of one finished epoch.
#[derive(new, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EpochLosses {
    pub epoch: usize,
    pub train: f64,
    pub valid: f64,
}

impl EpochLosses {
    pub fn loss(&self, split: Split) -> f64 {
        match split {
            Split::Train => self.train,
            Split::Valid => self.valid,
        }
    }

    /// The first split whose loss is NaN or infinite, with that loss.
    pub fn divergence(&self) -> Option<(Split, f64)> {
        [Split::Train, Split::Valid]
            .into_iter()
            .map(|split| (split, self.loss(split)))
            .find(|(_, loss)| !loss.is_finite())
    }
}

impl core::fmt::Display for EpochLosses {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "Epoch {} | train cross_entropy {:.5} | valid cross_entropy {:.5}",
            self.epoch, self.train, self.valid
        )
    }
}

/// The first epoch reaching the lowest loss on `split`.
///
/// Only strict improvements move the best epoch forward.
pub fn best_epoch(epochs: &[EpochLosses], split: Split) -> Option<&EpochLosses> {
    epochs.iter().fold(None, |best, losses| match best {
        Some(best) if losses.loss(split) >= best.loss(split) => Some(best),
        _ => Some(losses),
    })
}

/// Why the monitor ended the training loop.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Verdict {
    /// The held-out loss stopped improving.
    Patience { epoch: usize },
    /// A loss became NaN or infinite.
    Diverged { split: Split, epoch: usize, value: f64 },
}

/// What the monitor saw, shared with the caller of `fit`.
#[derive(Clone, Debug, Default)]
pub(crate) struct MonitorReport {
    pub epochs: Vec<EpochLosses>,
    pub verdict: Option<Verdict>,
}

/// Ends the training loop when the held-out loss stops improving, or as soon as
/// an epoch loss is not finite.
///
/// Reads the epoch means aggregated by the event store, so both splits must
/// register a [loss metric](LossMetric).
pub(crate) struct LossMonitor {
    patience: MetricEarlyStoppingStrategy,
    metric_name: String,
    next_epoch: usize,
    report: Arc<Mutex<MonitorReport>>,
}

impl LossMonitor {
    pub fn new<B: Backend>(patience: usize) -> Self {
        let metric = LossMetric::<B>::new();

        Self {
            patience: MetricEarlyStoppingStrategy::new(
                &metric,
                Aggregate::Mean,
                Direction::Lowest,
                StoreSplit::Valid,
                StoppingCondition::NoImprovementSince { n_epochs: patience },
            ),
            metric_name: metric.name(),
            next_epoch: 1,
            report: Arc::default(),
        }
    }

    /// A handle on the report, readable once the learner is done.
    pub fn report(&self) -> Arc<Mutex<MonitorReport>> {
        self.report.clone()
    }

    fn observe(&mut self, epoch: usize, store: &EventStoreClient) -> Option<Verdict> {
        let find = |split: Split| {
            store.find_metric(&self.metric_name, epoch, Aggregate::Mean, split.into())
        };
        let (Some(train), Some(valid)) = (find(Split::Train), find(Split::Valid)) else {
            log::warn!("No loss recorded for epoch {epoch}");
            return None;
        };
        let losses = EpochLosses::new(epoch, train, valid);

        log::info!("{losses}");
        let divergence = losses.divergence();
        self.lock().epochs.push(losses);

        if let Some((split, value)) = divergence {
            log::error!("Diverged at epoch {epoch}: {split} loss {value}");
            return Some(Verdict::Diverged {
                split,
                epoch,
                value,
            });
        }

        self.patience
            .should_stop(epoch, store)
            .then_some(Verdict::Patience { epoch })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MonitorReport> {
        self.report.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EarlyStoppingStrategy for LossMonitor {
    fn should_stop(&mut self, epoch: usize, store: &EventStoreClient) -> bool {
        // Epochs restored from a checkpoint rebuild the best held-out loss first.
        while self.next_epoch < epoch {
            let restored = self.next_epoch;
            self.observe(restored, store);
            self.next_epoch += 1;
        }
        self.next_epoch = epoch + 1;

        let verdict = self.observe(epoch, store);
        let stop = verdict.is_some();
        self.lock().verdict = verdict;

        stop
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn epochs(valid: &[f64]) -> Vec<EpochLosses> {
        valid
            .iter()
            .enumerate()
            .map(|(index, loss)| EpochLosses::new(index + 1, 1.0, *loss))
            .collect()
    }

    #[test]
    fn best_epoch_keeps_the_first_minimum() {
        let epochs = epochs(&[3.0, 2.0, 2.0, 2.5]);

        let best = best_epoch(&epochs, Split::Valid).unwrap();
        assert_eq!((best.epoch, best.valid), (2, 2.0));
        assert!(best_epoch(&[], Split::Valid).is_none());
    }

    #[test]
    fn divergence_reports_the_train_split_first() {
        assert_eq!(EpochLosses::new(1, 0.5, 0.4).divergence(), None);

        let (split, value) = EpochLosses::new(2, f64::NAN, f64::INFINITY)
            .divergence()
            .unwrap();
        assert_eq!(split, Split::Train);
        assert!(value.is_nan());

        assert_eq!(
            EpochLosses::new(3, 0.5, f64::INFINITY).divergence(),
            Some((Split::Valid, f64::INFINITY))
        );
    }
}
