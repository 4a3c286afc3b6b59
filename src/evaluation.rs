//! Held-out test pass: aggregate accuracy, per-class report, confusion
//! matrix. Descriptive only; nothing here feeds back into training.

use crate::data::Dataloader;
use crate::metrics::{ClassReport, ConfusionMatrix};
use crate::model::Cnn;
use burn::prelude::*;

#[derive(Debug, Clone)]
pub struct Evaluation {
    /// Fraction of exact matches, in [0, 1].
    pub accuracy: f64,
    pub report: ClassReport,
    pub confusion: ConfusionMatrix,
}

/// Runs the model once over the test batches and tallies predicted against
/// true classes. The model must live on a non-autodiff backend; no
/// gradients are tracked.
pub fn evaluate<B: Backend>(model: &Cnn<B>, dataloader_test: Dataloader<B>) -> Evaluation {
    let [_, num_classes] = model.output.weight.dims();
    let mut confusion = ConfusionMatrix::new(num_classes);

    for batch in dataloader_test.iter() {
        let predictions = model.forward(batch.images).argmax(1).squeeze::<1>(1);
        let predictions: Vec<i64> = predictions
            .into_data()
            .convert::<i64>()
            .to_vec()
            .expect("predicted classes fit an i64 vector");
        let truths: Vec<i64> = batch
            .targets
            .into_data()
            .convert::<i64>()
            .to_vec()
            .expect("target classes fit an i64 vector");

        for (truth, predicted) in truths.into_iter().zip(predictions) {
            confusion.record(truth as usize, predicted as usize);
        }
    }

    Evaluation {
        accuracy: confusion.accuracy(),
        report: confusion.report(),
        confusion,
    }
}

/// Prints the evaluation the way the training loops print their metrics.
pub fn print_evaluation(eval: &Evaluation) {
    println!("Test accuracy: {:.2}%", 100.0 * eval.accuracy);
    println!();
    println!("{}", eval.report);
    println!("{}", eval.confusion);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MainBackend, MainDevice};
    use crate::data::{DigitBatcher, HEIGHT, WIDTH};
    use crate::model::CnnConfig;
    use burn::data::dataloader::DataLoaderBuilder;
    use burn::data::dataset::InMemDataset;
    use burn::data::dataset::vision::MnistItem;

    fn toy_item(brightness: f32, label: u8) -> MnistItem {
        MnistItem {
            image: [[brightness; WIDTH]; HEIGHT],
            label,
        }
    }

    #[test]
    fn confusion_rows_match_true_class_counts() {
        let device = <MainBackend as MainDevice>::main_device();
        let model = CnnConfig::new()
            .with_conv_channels(vec![2])
            .with_hidden_sizes(vec![8])
            .init::<MainBackend>(&device);

        // 3 samples of class 1, 2 of class 4, 1 of class 9; whatever the
        // untrained model predicts, row sums must match these counts
        let items = vec![
            toy_item(0., 1),
            toy_item(40., 1),
            toy_item(80., 1),
            toy_item(120., 4),
            toy_item(160., 4),
            toy_item(200., 9),
        ];
        let dataloader: Dataloader<MainBackend> = DataLoaderBuilder::new(DigitBatcher::default())
            .batch_size(4)
            .num_workers(1)
            .build(InMemDataset::new(items));

        let eval = evaluate(&model, dataloader);

        assert_eq!(6, eval.confusion.total());
        assert_eq!(3, eval.confusion.row_sum(1));
        assert_eq!(2, eval.confusion.row_sum(4));
        assert_eq!(1, eval.confusion.row_sum(9));
        assert_eq!(0, eval.confusion.row_sum(0));
        assert!((0.0..=1.0).contains(&eval.accuracy));
        assert_eq!(10, eval.report.rows.len());
    }
}
