use std::{error::Error, fmt, sync::Arc};

use comms::{
    Image,
    specs::{ClassifierSpec, ScoringSpec},
};

/// A predicted class.
pub type Label = u8;

/// Classifier failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifierErr {
    /// The backend itself failed.
    Backend(String),
    /// Per item predictions that don't line up with the batch.
    LengthMismatch { got: usize, expected: usize },
}

impl fmt::Display for ClassifierErr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Backend(msg) => write!(f, "backend error: {msg}"),
            Self::LengthMismatch { got, expected } => {
                write!(f, "got {got} predictions for a batch of {expected}")
            }
        }
    }
}

impl Error for ClassifierErr {}

/// The opaque classification capability.
///
/// Implementations are CPU bound, they are called from blocking threads and
/// may be called from several of them at once.
pub trait Classifier: Send + Sync {
    /// Predicts a label per image.
    ///
    /// Some batch back ends don't return predictions in input order, so
    /// comparing them positionally with the batch is only sound for back ends
    /// that guarantee it.
    fn predict(&self, batch: &[Image]) -> Result<Vec<Label>, ClassifierErr>;

    /// Returns how many images of `batch` were classified correctly.
    ///
    /// The default compares `predict` positionally, order-unstable back ends
    /// must override it.
    fn evaluate(&self, batch: &[Image]) -> Result<usize, ClassifierErr> {
        let predictions = self.predict(batch)?;
        count_correct(batch, &predictions)
    }
}

/// Counts the positional matches between `predictions` and the labels of `batch`.
///
/// # Returns
/// A `LengthMismatch` if there isn't exactly one prediction per image.
pub fn count_correct(batch: &[Image], predictions: &[Label]) -> Result<usize, ClassifierErr> {
    if predictions.len() != batch.len() {
        return Err(ClassifierErr::LengthMismatch {
            got: predictions.len(),
            expected: batch.len(),
        });
    }

    let correct = batch
        .iter()
        .zip(predictions)
        .filter(|(img, label)| img.label() == **label)
        .count();

    Ok(correct)
}

/// Scores `batch` through the contract selected by `scoring`.
pub fn score(
    classifier: &dyn Classifier,
    batch: &[Image],
    scoring: ScoringSpec,
) -> Result<usize, ClassifierErr> {
    match scoring {
        ScoringSpec::Evaluate => classifier.evaluate(batch),
        ScoringSpec::Predict => {
            let predictions = classifier.predict(batch)?;
            count_correct(batch, &predictions)
        }
    }
}

/// Predicts the ground truth, every image is classified correctly.
#[derive(Debug, Clone, Copy, Default)]
pub struct OracleClassifier;

impl Classifier for OracleClassifier {
    fn predict(&self, batch: &[Image]) -> Result<Vec<Label>, ClassifierErr> {
        Ok(batch.iter().map(Image::label).collect())
    }
}

/// Predicts the same label for every image.
#[derive(Debug, Clone, Copy)]
pub struct ConstantClassifier {
    label: Label,
}

impl ConstantClassifier {
    pub fn new(label: Label) -> Self {
        Self { label }
    }
}

impl Classifier for ConstantClassifier {
    fn predict(&self, batch: &[Image]) -> Result<Vec<Label>, ClassifierErr> {
        Ok(vec![self.label; batch.len()])
    }

    fn evaluate(&self, batch: &[Image]) -> Result<usize, ClassifierErr> {
        Ok(batch.iter().filter(|img| img.label() == self.label).count())
    }
}

/// Wraps a back end and hands its predictions back rotated by one position,
/// like a distributed batch engine that doesn't preserve input order.
///
/// `evaluate` stays exact since it delegates to the wrapped back end.
#[derive(Debug, Clone, Copy)]
pub struct ShuffledClassifier<C> {
    inner: C,
}

impl<C: Classifier> ShuffledClassifier<C> {
    pub fn new(inner: C) -> Self {
        Self { inner }
    }
}

impl<C: Classifier> Classifier for ShuffledClassifier<C> {
    fn predict(&self, batch: &[Image]) -> Result<Vec<Label>, ClassifierErr> {
        let mut predictions = self.inner.predict(batch)?;
        if !predictions.is_empty() {
            predictions.rotate_left(1);
        }
        Ok(predictions)
    }

    fn evaluate(&self, batch: &[Image]) -> Result<usize, ClassifierErr> {
        self.inner.evaluate(batch)
    }
}

/// Builds one of the built-in classifiers.
pub fn build(spec: ClassifierSpec) -> Arc<dyn Classifier> {
    match spec {
        ClassifierSpec::Oracle => Arc::new(OracleClassifier),
        ClassifierSpec::Constant { label } => Arc::new(ConstantClassifier::new(label)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(labels: &[u8]) -> Vec<Image> {
        labels.iter().map(|&l| Image::new(l, vec![0; 3])).collect()
    }

    #[test]
    fn oracle_is_always_right() {
        let b = batch(&[0, 1, 2, 3]);
        assert_eq!(score(&OracleClassifier, &b, ScoringSpec::Evaluate), Ok(4));
        assert_eq!(score(&OracleClassifier, &b, ScoringSpec::Predict), Ok(4));
    }

    #[test]
    fn constant_matches_its_label_only() {
        let b = batch(&[1, 1, 2, 1]);
        let classifier = ConstantClassifier::new(1);
        assert_eq!(score(&classifier, &b, ScoringSpec::Evaluate), Ok(3));
        assert_eq!(score(&classifier, &b, ScoringSpec::Predict), Ok(3));
    }

    #[test]
    fn order_unstable_predictions_only_score_right_through_evaluate() {
        let b = batch(&[0, 1, 2, 3, 4]);
        let classifier = ShuffledClassifier::new(OracleClassifier);

        assert_eq!(score(&classifier, &b, ScoringSpec::Evaluate), Ok(5));
        assert_eq!(score(&classifier, &b, ScoringSpec::Predict), Ok(0));
    }

    #[test]
    fn predictions_must_line_up() {
        let b = batch(&[0, 1]);
        assert_eq!(
            count_correct(&b, &[0]),
            Err(ClassifierErr::LengthMismatch {
                got: 1,
                expected: 2
            })
        );
    }
}
