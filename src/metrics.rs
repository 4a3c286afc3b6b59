//! Plain scalar metrics for the training, validation, and evaluation loops.

use std::fmt;

/// Running (loss sum, correct count, sample count, batch count) aggregate.
///
/// The training loop resets it at every reporting interval; the validation
/// loop lets it run over the whole epoch so a final partial batch is
/// weighted by its true sample count.
#[derive(Debug, Clone, Default)]
pub struct RunningAggregate {
    loss_sum: f64,
    correct: u64,
    samples: u64,
    batches: u64,
}

impl RunningAggregate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, loss: f64, correct: u64, batch_size: usize) {
        self.loss_sum += loss;
        self.correct += correct;
        self.samples += batch_size as u64;
        self.batches += 1;
    }

    /// Sum of per-batch losses divided by the number of batches.
    pub fn mean_loss(&self) -> f64 {
        if self.batches == 0 {
            return 0.0;
        }
        self.loss_sum / self.batches as f64
    }

    /// Percentage of correct predictions, over samples (not batches), so a
    /// final partial batch does not skew the value. Suffixed to keep it
    /// apart from the [0, 1] fractions the evaluation metrics report.
    pub fn accuracy_pct(&self) -> f64 {
        if self.samples == 0 {
            return 0.0;
        }
        100.0 * self.correct as f64 / self.samples as f64
    }

    pub fn batches(&self) -> u64 {
        self.batches
    }

    pub fn samples(&self) -> u64 {
        self.samples
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Square table of (true class, predicted class) counts.
#[derive(Debug, Clone)]
pub struct ConfusionMatrix {
    classes: usize,
    // row-major [true][predicted]
    counts: Vec<u64>,
}

impl ConfusionMatrix {
    pub fn new(classes: usize) -> Self {
        Self {
            classes,
            counts: vec![0; classes * classes],
        }
    }

    pub fn classes(&self) -> usize {
        self.classes
    }

    pub fn record(&mut self, truth: usize, predicted: usize) {
        assert!(truth < self.classes && predicted < self.classes);
        self.counts[truth * self.classes + predicted] += 1;
    }

    pub fn count(&self, truth: usize, predicted: usize) -> u64 {
        self.counts[truth * self.classes + predicted]
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().sum()
    }

    /// Number of evaluation samples whose true class is `truth`.
    pub fn row_sum(&self, truth: usize) -> u64 {
        (0..self.classes).map(|p| self.count(truth, p)).sum()
    }

    /// Number of evaluation samples predicted as `predicted`.
    pub fn col_sum(&self, predicted: usize) -> u64 {
        (0..self.classes).map(|t| self.count(t, predicted)).sum()
    }

    /// Fraction of exact matches, in [0, 1].
    pub fn accuracy(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        let trace: u64 = (0..self.classes).map(|c| self.count(c, c)).sum();
        trace as f64 / total as f64
    }

    pub fn precision(&self, class: usize) -> f64 {
        let predicted = self.col_sum(class);
        if predicted == 0 {
            return 0.0;
        }
        self.count(class, class) as f64 / predicted as f64
    }

    pub fn recall(&self, class: usize) -> f64 {
        let actual = self.row_sum(class);
        if actual == 0 {
            return 0.0;
        }
        self.count(class, class) as f64 / actual as f64
    }

    pub fn f1(&self, class: usize) -> f64 {
        let p = self.precision(class);
        let r = self.recall(class);
        if p + r == 0.0 {
            return 0.0;
        }
        2.0 * p * r / (p + r)
    }

    pub fn report(&self) -> ClassReport {
        let rows = (0..self.classes)
            .map(|class| ClassStats {
                class,
                precision: self.precision(class),
                recall: self.recall(class),
                f1: self.f1(class),
                support: self.row_sum(class),
            })
            .collect();
        ClassReport { rows }
    }
}

impl fmt::Display for ConfusionMatrix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Confusion matrix (rows = true, columns = predicted):")?;
        write!(f, "true |")?;
        for p in 0..self.classes {
            write!(f, " {p:>5}")?;
        }
        writeln!(f)?;
        for t in 0..self.classes {
            write!(f, "{t:>4} |")?;
            for p in 0..self.classes {
                let count = self.count(t, p);
                if count == 0 && t != p {
                    write!(f, " {:>5}", ".")?;
                } else {
                    write!(f, " {count:>5}")?;
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ClassStats {
    pub class: usize,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: u64,
}

/// Per-class precision/recall/F1 text block with macro averages.
#[derive(Debug, Clone)]
pub struct ClassReport {
    pub rows: Vec<ClassStats>,
}

impl ClassReport {
    pub fn macro_precision(&self) -> f64 {
        mean(self.rows.iter().map(|r| r.precision))
    }

    pub fn macro_recall(&self) -> f64 {
        mean(self.rows.iter().map(|r| r.recall))
    }

    pub fn macro_f1(&self) -> f64 {
        mean(self.rows.iter().map(|r| r.f1))
    }
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0u64), |(sum, count), v| (sum + v, count + 1));
    if count == 0 { 0.0 } else { sum / count as f64 }
}

impl fmt::Display for ClassReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "class  precision  recall  f1-score  support")?;
        for row in self.rows.iter() {
            writeln!(
                f,
                "{:>5}  {:>9.4}  {:>6.4}  {:>8.4}  {:>7}",
                row.class, row.precision, row.recall, row.f1, row.support
            )?;
        }
        writeln!(
            f,
            "macro  {:>9.4}  {:>6.4}  {:>8.4}",
            self.macro_precision(),
            self.macro_recall(),
            self.macro_f1()
        )
    }
}
