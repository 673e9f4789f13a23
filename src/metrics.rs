//! Held-out evaluation: accuracy and a per-class precision/recall/F1 report

use crate::error::PipelineError;
use crate::model::LinearSvc;
use ndarray::{Array1, Array2};
use std::collections::BTreeSet;
use std::fmt;

/// Scores for one class label
#[derive(Debug, Clone, PartialEq)]
pub struct ClassMetrics {
    pub label: usize,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// Number of true samples of this class
    pub support: usize,
}

/// Averages over all classes
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AveragedMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationReport {
    pub classes: Vec<ClassMetrics>,
    pub accuracy: f64,
    /// Unweighted mean over classes
    pub macro_avg: AveragedMetrics,
    /// Mean weighted by support
    pub weighted_avg: AveragedMetrics,
    pub total_support: usize,
}

/// Result of evaluating a model on the held-out partition
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// Fraction of correct predictions, in [0, 1]
    pub accuracy: f64,
    pub report: ClassificationReport,
    pub predictions: Array1<usize>,
}

/// Predict `features` with `model` and score against `truth`
pub fn evaluate(
    model: &LinearSvc,
    features: &Array2<f64>,
    truth: &Array1<usize>,
) -> crate::Result<Evaluation> {
    if features.nrows() != truth.len() {
        return Err(PipelineError::dimension(
            "evaluation labels",
            features.nrows(),
            truth.len(),
        ));
    }
    let predictions = model.try_predict(features)?;
    let report = classification_report(truth, &predictions)?;
    Ok(Evaluation {
        accuracy: report.accuracy,
        report,
        predictions,
    })
}

/// Per-class precision, recall and F1 over the union of true and predicted
/// labels. Zero denominators score 0.0.
pub fn classification_report(
    truth: &Array1<usize>,
    predicted: &Array1<usize>,
) -> crate::Result<ClassificationReport> {
    if truth.len() != predicted.len() {
        return Err(PipelineError::dimension(
            "predicted labels",
            truth.len(),
            predicted.len(),
        ));
    }
    if truth.is_empty() {
        return Err(PipelineError::InvalidData(
            "cannot score an empty evaluation set".to_string(),
        ));
    }

    let labels: BTreeSet<usize> = truth.iter().chain(predicted.iter()).copied().collect();
    let total = truth.len();
    let correct = truth
        .iter()
        .zip(predicted.iter())
        .filter(|(t, p)| t == p)
        .count();

    let classes: Vec<ClassMetrics> = labels
        .into_iter()
        .map(|label| {
            let mut tp = 0usize;
            let mut fp = 0usize;
            let mut fn_ = 0usize;
            for (&t, &p) in truth.iter().zip(predicted.iter()) {
                match (t == label, p == label) {
                    (true, true) => tp += 1,
                    (false, true) => fp += 1,
                    (true, false) => fn_ += 1,
                    (false, false) => {}
                }
            }
            let precision = ratio(tp, tp + fp);
            let recall = ratio(tp, tp + fn_);
            let f1 = if precision + recall > 0.0 {
                2.0 * precision * recall / (precision + recall)
            } else {
                0.0
            };
            ClassMetrics {
                label,
                precision,
                recall,
                f1,
                support: tp + fn_,
            }
        })
        .collect();

    let n_classes = classes.len() as f64;
    let macro_avg = AveragedMetrics {
        precision: classes.iter().map(|c| c.precision).sum::<f64>() / n_classes,
        recall: classes.iter().map(|c| c.recall).sum::<f64>() / n_classes,
        f1: classes.iter().map(|c| c.f1).sum::<f64>() / n_classes,
    };
    let weight = |f: fn(&ClassMetrics) -> f64| {
        classes
            .iter()
            .map(|c| f(c) * c.support as f64)
            .sum::<f64>()
            / total as f64
    };
    let weighted_avg = AveragedMetrics {
        precision: weight(|c| c.precision),
        recall: weight(|c| c.recall),
        f1: weight(|c| c.f1),
    };

    Ok(ClassificationReport {
        accuracy: correct as f64 / total as f64,
        classes,
        macro_avg,
        weighted_avg,
        total_support: total,
    })
}

fn ratio(num: usize, den: usize) -> f64 {
    if den == 0 {
        0.0
    } else {
        num as f64 / den as f64
    }
}

impl fmt::Display for ClassificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{:>14} {:>10} {:>10} {:>10} {:>10}",
            "", "precision", "recall", "f1-score", "support"
        )?;
        writeln!(f)?;
        for class in &self.classes {
            writeln!(
                f,
                "{:>14} {:>10.2} {:>10.2} {:>10.2} {:>10}",
                class.label, class.precision, class.recall, class.f1, class.support
            )?;
        }
        writeln!(f)?;
        writeln!(
            f,
            "{:>14} {:>10} {:>10} {:>10.2} {:>10}",
            "accuracy", "", "", self.accuracy, self.total_support
        )?;
        for (name, avg) in [("macro avg", self.macro_avg), ("weighted avg", self.weighted_avg)] {
            writeln!(
                f,
                "{:>14} {:>10.2} {:>10.2} {:>10.2} {:>10}",
                name, avg.precision, avg.recall, avg.f1, self.total_support
            )?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn assert_close(a: f64, b: f64) {
        assert!((a - b).abs() < 1e-12, "{a} != {b}");
    }

    #[test]
    fn test_classification_report_binary() {
        let truth = array![0, 0, 0, 0, 1, 1, 1, 0];
        let predicted = array![0, 0, 1, 0, 1, 0, 1, 0];
        let report = classification_report(&truth, &predicted).unwrap();

        assert_close(report.accuracy, 6.0 / 8.0);
        assert_eq!(report.classes.len(), 2);

        let negative = &report.classes[0];
        assert_eq!(negative.label, 0);
        assert_eq!(negative.support, 5);
        assert_close(negative.precision, 4.0 / 5.0);
        assert_close(negative.recall, 4.0 / 5.0);

        let positive = &report.classes[1];
        assert_eq!(positive.support, 3);
        assert_close(positive.precision, 2.0 / 3.0);
        assert_close(positive.recall, 2.0 / 3.0);
        assert_close(positive.f1, 2.0 / 3.0);

        assert_close(report.macro_avg.recall, (0.8 + 2.0 / 3.0) / 2.0);
        assert_close(report.weighted_avg.recall, report.accuracy);
    }

    #[test]
    fn test_zero_division_scores_zero() {
        // class 1 is never predicted
        let truth = array![0, 1, 1];
        let predicted = array![0, 0, 0];
        let report = classification_report(&truth, &predicted).unwrap();
        let positive = &report.classes[1];
        assert_eq!(positive.precision, 0.0);
        assert_eq!(positive.recall, 0.0);
        assert_eq!(positive.f1, 0.0);
    }

    #[test]
    fn test_predicted_only_label_is_reported() {
        let truth = array![0, 0];
        let predicted = array![0, 1];
        let report = classification_report(&truth, &predicted).unwrap();
        assert_eq!(report.classes.len(), 2);
        assert_eq!(report.classes[1].support, 0);
    }

    #[test]
    fn test_length_mismatch() {
        let err = classification_report(&array![0, 1], &array![0]).unwrap_err();
        assert!(matches!(err, PipelineError::DimensionMismatch { .. }));
    }

    #[test]
    fn test_report_display() {
        let report = classification_report(&array![0, 1, 1, 0], &array![0, 1, 0, 0]).unwrap();
        let text = report.to_string();
        assert!(text.contains("precision"));
        assert!(text.contains("accuracy"));
        assert!(text.contains("weighted avg"));
        assert_eq!(text.lines().filter(|l| !l.trim().is_empty()).count(), 6);
    }
}
