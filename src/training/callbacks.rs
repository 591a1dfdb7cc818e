//! Per-epoch training controls: early stopping, learning-rate decay and
//! best-model tracking.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::Result;

/// Stops training once `val_loss` has not improved for `patience` epochs.
#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    best: f64,
    best_epoch: usize,
    wait: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            best: f64::INFINITY,
            best_epoch: 0,
            wait: 0,
        }
    }

    /// Records an epoch's validation loss. Returns true when training should stop.
    pub fn update(&mut self, epoch: usize, val_loss: f64) -> bool {
        if val_loss < self.best {
            self.best = val_loss;
            self.best_epoch = epoch;
            self.wait = 0;
            return false;
        }
        self.wait += 1;
        warn!(
            "No val_loss improvement. Patience: {}/{}",
            self.wait, self.patience
        );
        self.wait >= self.patience
    }

    pub fn best_epoch(&self) -> usize {
        self.best_epoch
    }
}

/// Multiplies the learning rate by `factor` after `patience` epochs without
/// a `val_loss` improvement larger than `min_delta`.
#[derive(Debug, Clone)]
pub struct ReduceLrOnPlateau {
    factor: f64,
    patience: usize,
    min_delta: f64,
    min_lr: f64,
    best: f64,
    wait: usize,
    learning_rate: f64,
}

impl ReduceLrOnPlateau {
    pub fn new(initial_lr: f64, factor: f64, patience: usize) -> Self {
        Self {
            factor,
            patience,
            min_delta: 1e-4,
            min_lr: 0.0,
            best: f64::INFINITY,
            wait: 0,
            learning_rate: initial_lr,
        }
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    /// Records an epoch's validation loss and returns the rate for the next epoch.
    pub fn update(&mut self, val_loss: f64) -> f64 {
        if val_loss < self.best - self.min_delta {
            self.best = val_loss;
            self.wait = 0;
        } else {
            self.wait += 1;
            if self.wait >= self.patience && self.learning_rate > self.min_lr {
                let reduced = (self.learning_rate * self.factor).max(self.min_lr);
                info!(
                    "Reducing learning rate from {:.2e} to {:.2e}",
                    self.learning_rate, reduced
                );
                self.learning_rate = reduced;
                self.wait = 0;
            }
        }
        self.learning_rate
    }
}

/// Tracks the best validation accuracy seen so far.
#[derive(Debug, Clone)]
pub struct BestCheckpoint {
    best: f64,
}

impl Default for BestCheckpoint {
    fn default() -> Self {
        Self {
            best: f64::NEG_INFINITY,
        }
    }
}

impl BestCheckpoint {
    /// True when `val_accuracy` beats every previous epoch.
    pub fn update(&mut self, val_accuracy: f64) -> bool {
        if val_accuracy > self.best {
            self.best = val_accuracy;
            true
        } else {
            false
        }
    }

    pub fn best(&self) -> f64 {
        self.best
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochMetrics {
    pub epoch: usize,
    pub train_loss: f64,
    pub train_accuracy: f64,
    pub val_loss: f64,
    pub val_accuracy: f64,
    pub learning_rate: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct History {
    pub epochs: Vec<EpochMetrics>,
}

impl History {
    pub fn push(&mut self, metrics: EpochMetrics) {
        self.epochs.push(metrics);
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn early_stopping_waits_for_patience() {
        let mut stop = EarlyStopping::new(2);
        assert!(!stop.update(1, 1.0));
        assert!(!stop.update(2, 0.8));
        assert!(!stop.update(3, 0.9));
        assert!(stop.update(4, 0.85));
        assert_eq!(stop.best_epoch(), 2);
    }

    #[test]
    fn early_stopping_resets_on_improvement() {
        let mut stop = EarlyStopping::new(2);
        stop.update(1, 1.0);
        stop.update(2, 1.1);
        assert!(!stop.update(3, 0.5));
        assert!(!stop.update(4, 0.6));
    }

    #[test]
    fn plateau_halves_the_rate() {
        let mut plateau = ReduceLrOnPlateau::new(0.001, 0.5, 3);
        assert_eq!(plateau.update(1.0), 0.001);
        assert_eq!(plateau.update(1.0), 0.001);
        assert_eq!(plateau.update(0.99995), 0.001); // below min_delta
        let lr = plateau.update(1.2);
        assert!((lr - 0.0005).abs() < 1e-12);
        // wait counter restarts after a reduction
        assert!((plateau.update(1.2) - 0.0005).abs() < 1e-12);
    }

    #[test]
    fn checkpoint_requires_strict_improvement() {
        let mut best = BestCheckpoint::default();
        assert!(best.update(0.0));
        assert!(best.update(0.6));
        assert!(!best.update(0.6));
        assert!(!best.update(0.5));
        assert!(best.update(0.61));
        assert_eq!(best.best(), 0.61);
    }

    #[test]
    fn history_is_written_as_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        let mut history = History::default();
        history.push(EpochMetrics {
            epoch: 1,
            train_loss: 1.2,
            train_accuracy: 0.4,
            val_loss: 1.0,
            val_accuracy: 0.5,
            learning_rate: 0.001,
        });
        history.save(&path).unwrap();

        let saved: History = serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved.epochs, history.epochs);
    }
}
