//! Epoch orchestration: a fail-fast training loop and a fault-isolated
//! validation loop sharing an explicit [`Session`] context.

use crate::data::{DigitBatch, DigitBatcher, Dataloader, NUM_CLASSES, train_valid_split};
use crate::metrics::RunningAggregate;
use crate::model::{Cnn, CnnConfig};
use crate::persist::{self, PersistError};
use burn::data::dataloader::DataLoaderBuilder;
use burn::module::AutodiffModule;
use burn::optim::adaptor::OptimizerAdaptor;
use burn::optim::{Adam, AdamConfig, GradientsParams, Optimizer};
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use std::path::Path;

#[derive(Config)]
pub struct TrainingConfig {
    pub optimizer: AdamConfig,
    #[config(default = 10)]
    pub num_epochs: usize,
    #[config(default = 32)]
    pub batch_size: usize,
    #[config(default = 2)]
    pub num_workers: usize,
    #[config(default = 1e-4)]
    pub lr: f64,
    #[config(default = 0)]
    pub seed: u64,
    /// Training metrics are averaged, reported, and reset every this many
    /// batches.
    #[config(default = 20)]
    pub log_interval: usize,
    /// What a validation-batch fault does to the surrounding run.
    #[config(default = "ValidationErrorPolicy::LogAndContinue")]
    pub on_validation_error: ValidationErrorPolicy,
}

/// Failure-isolation policy for the validation loop.
///
/// The training loop has no such policy on purpose: a fault there aborts
/// the run, while a fault during monitoring must not.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ValidationErrorPolicy {
    /// Propagate the fault to the caller.
    Abort,
    /// Stop the validation pass, flag its metrics as incomplete.
    SkipEpoch,
    /// Skip the faulty batch, flag the epoch's metrics as incomplete.
    #[default]
    LogAndContinue,
}

/// A fault detected while validating one batch.
#[derive(Debug, thiserror::Error)]
pub enum ValidationFault {
    #[error("batch {batch}: {images} images but {targets} targets")]
    BatchMismatch {
        batch: usize,
        images: usize,
        targets: usize,
    },
    #[error("batch {batch}: target class {class} outside 0..{classes}")]
    TargetOutOfRange {
        batch: usize,
        class: i64,
        classes: usize,
    },
    #[error("batch {batch}: loss is not finite")]
    NonFiniteLoss { batch: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum TrainError {
    #[error("validation pass failed: {0}")]
    Validation(#[from] ValidationFault),
    #[error(transparent)]
    Persist(#[from] PersistError),
}

/// Validation metrics for one epoch.
#[derive(Debug, Clone)]
pub struct ValidationSummary {
    /// Sum of per-batch losses divided by the number of batches seen.
    pub mean_loss: f64,
    /// Percentage of correct predictions over the samples seen.
    pub accuracy_pct: f64,
    pub samples: u64,
    pub batches: u64,
    /// False when a fault caused batches to be skipped; incomplete metrics
    /// are never to be read as whole-epoch metrics.
    pub complete: bool,
}

/// Everything the epoch loops share: the model, its optimizer, the data
/// sources, and the hyperparameters. Passed explicitly, never ambient.
pub struct Session<AutoB: AutodiffBackend> {
    pub model: Cnn<AutoB>,
    pub optim: OptimizerAdaptor<Adam, Cnn<AutoB>, AutoB>,
    pub dataloader_train: Dataloader<AutoB>,
    pub dataloader_valid: Dataloader<AutoB::InnerBackend>,
    pub config: TrainingConfig,
}

impl<AutoB: AutodiffBackend> Session<AutoB> {
    /// Builds the session on the standard MNIST 48k/12k split.
    pub fn new(config: TrainingConfig, model_config: &CnnConfig, device: &AutoB::Device) -> Self {
        let model = model_config.init::<AutoB>(device);
        let optim = config.optimizer.init::<AutoB, Cnn<AutoB>>();

        let batcher = DigitBatcher::default();
        let (train_split, valid_split) = train_valid_split();
        let dataloader_train = DataLoaderBuilder::new(batcher.clone())
            .batch_size(config.batch_size)
            .shuffle(config.seed)
            .num_workers(config.num_workers)
            .build(train_split);
        let dataloader_valid: Dataloader<AutoB::InnerBackend> = DataLoaderBuilder::new(batcher)
            .batch_size(config.batch_size)
            .num_workers(config.num_workers)
            .build(valid_split);

        Self {
            model,
            optim,
            dataloader_train,
            dataloader_valid,
            config,
        }
    }
}

/// Runs the fixed train-then-validate epoch sequence and saves the model
/// record once per epoch. Returns the trained model.
pub fn train<AutoB: AutodiffBackend>(
    artifact_dir: &Path,
    config: TrainingConfig,
    model_config: &CnnConfig,
    device: AutoB::Device,
) -> Result<Cnn<AutoB>, TrainError> {
    AutoB::seed(config.seed);

    let mut session = Session::<AutoB>::new(config, model_config, &device);

    println!("Starting training...");
    for epoch in 1..session.config.num_epochs + 1 {
        epoch_train(&mut session, epoch);

        persist::save_model(artifact_dir, &session.model)?;

        epoch_valid(
            session.dataloader_valid.clone(),
            session.model.valid(),
            &session.config,
            epoch,
        )?;
    }
    println!("Training finished.");

    Ok(session.model)
}

/// One full pass over the training batches: forward, loss, backward, one
/// optimizer step per batch. Faults are not caught; a malformed batch or
/// device fault aborts the run.
pub fn epoch_train<AutoB: AutodiffBackend>(session: &mut Session<AutoB>, epoch: usize) {
    let lr = session.config.lr;
    let log_interval = session.config.log_interval;
    let num_epochs = session.config.num_epochs;
    let dataloader = session.dataloader_train.clone();
    let num_batches = dataloader.num_items().div_ceil(session.config.batch_size);

    let mut window = RunningAggregate::new();

    for (b, batch) in dataloader.iter().enumerate() {
        let [batch_size, _, _, _] = batch.images.dims();

        let output = session
            .model
            .forward_classification(batch.images, batch.targets);

        let loss_value: f64 = output.loss.clone().into_scalar().elem();
        let correct: i64 = output
            .output
            .argmax(1)
            .squeeze::<1>(1)
            .equal(output.targets)
            .int()
            .sum()
            .into_scalar()
            .elem();
        window.update(loss_value, correct as u64, batch_size);

        let grads = GradientsParams::from_grads(output.loss.backward(), &session.model);
        session.model = session.optim.step(lr, session.model.clone(), grads);

        if (b + 1) % log_interval == 0 {
            println!(
                "Epoch {epoch}/{num_epochs}, Batch {:0>4}/{num_batches}, Loss {:.4}, Acc {:0>6.2}",
                b + 1,
                window.mean_loss(),
                window.accuracy_pct(),
            );
            window.reset();
        }
    }
}

/// One full pass over the validation batches with gradient tracking
/// disabled: `valid_model` lives on the inner (non-autodiff) backend.
///
/// Per-batch faults go through [`TrainingConfig::on_validation_error`]; the
/// returned summary carries a completeness flag so partial metrics are
/// never mistaken for whole-epoch ones.
pub fn epoch_valid<B: Backend>(
    dataloader_valid: Dataloader<B>,
    valid_model: Cnn<B>,
    config: &TrainingConfig,
    epoch: usize,
) -> Result<ValidationSummary, ValidationFault> {
    let mut totals = RunningAggregate::new();
    let mut complete = true;

    for (b, batch) in dataloader_valid.iter().enumerate() {
        match valid_step(&valid_model, batch, b) {
            Ok((loss, correct, batch_size)) => totals.update(loss, correct, batch_size),
            Err(fault) => match config.on_validation_error {
                ValidationErrorPolicy::Abort => return Err(fault),
                ValidationErrorPolicy::SkipEpoch => {
                    log::warn!("validation epoch {epoch} stopped at batch {b}: {fault}");
                    complete = false;
                    break;
                }
                ValidationErrorPolicy::LogAndContinue => {
                    log::warn!("validation epoch {epoch} skipped batch {b}: {fault}");
                    complete = false;
                }
            },
        }
    }

    let summary = ValidationSummary {
        mean_loss: totals.mean_loss(),
        accuracy_pct: totals.accuracy_pct(),
        samples: totals.samples(),
        batches: totals.batches(),
        complete,
    };
    println!(
        "Epoch {epoch}/{}, Valid Loss {:.4}, Valid Acc {:0>6.2}%{}",
        config.num_epochs,
        summary.mean_loss,
        summary.accuracy_pct,
        if summary.complete { "" } else { " (incomplete)" },
    );
    Ok(summary)
}

fn valid_step<B: Backend>(
    model: &Cnn<B>,
    batch: DigitBatch<B>,
    b: usize,
) -> Result<(f64, u64, usize), ValidationFault> {
    let [batch_size, _, _, _] = batch.images.dims();
    let [num_targets] = batch.targets.dims();
    if batch_size != num_targets {
        return Err(ValidationFault::BatchMismatch {
            batch: b,
            images: batch_size,
            targets: num_targets,
        });
    }

    let max_target: i64 = batch.targets.clone().max().into_scalar().elem();
    let min_target: i64 = batch.targets.clone().min().into_scalar().elem();
    if min_target < 0 || max_target >= NUM_CLASSES as i64 {
        let class = if min_target < 0 { min_target } else { max_target };
        return Err(ValidationFault::TargetOutOfRange {
            batch: b,
            class,
            classes: NUM_CLASSES,
        });
    }

    let output = model.forward_classification(batch.images, batch.targets);
    let loss: f64 = output.loss.into_scalar().elem();
    if !loss.is_finite() {
        return Err(ValidationFault::NonFiniteLoss { batch: b });
    }

    let correct: i64 = output
        .output
        .argmax(1)
        .squeeze::<1>(1)
        .equal(output.targets)
        .int()
        .sum()
        .into_scalar()
        .elem();

    Ok((loss, correct as u64, batch_size))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{MainAutoBackend, MainBackend, MainDevice};
    use crate::data::{HEIGHT, WIDTH};
    use burn::data::dataset::InMemDataset;
    use burn::data::dataset::vision::MnistItem;
    use burn::module::Param;

    fn toy_item(brightness: f32, label: u8) -> MnistItem {
        MnistItem {
            image: [[brightness; WIDTH]; HEIGHT],
            label,
        }
    }

    fn tiny_model_config() -> CnnConfig {
        CnnConfig::new()
            .with_conv_channels(vec![2, 2])
            .with_hidden_sizes(vec![16])
    }

    fn valid_loader(items: Vec<MnistItem>, batch_size: usize) -> Dataloader<MainBackend> {
        DataLoaderBuilder::new(DigitBatcher::default())
            .batch_size(batch_size)
            .num_workers(1)
            .build(InMemDataset::new(items))
    }

    #[test]
    fn epoch_valid_counts_samples_of_a_partial_final_batch() {
        let device = <MainBackend as MainDevice>::main_device();
        let model = tiny_model_config().init::<MainBackend>(&device);
        let config = TrainingConfig::new(AdamConfig::new()).with_batch_size(3);

        // two batches: 3 samples, then a partial one of 2
        let items = vec![
            toy_item(0., 0),
            toy_item(64., 1),
            toy_item(128., 2),
            toy_item(192., 3),
            toy_item(255., 4),
        ];
        let summary = epoch_valid(valid_loader(items, 3), model, &config, 1).unwrap();

        assert_eq!(2, summary.batches);
        assert_eq!(5, summary.samples);
        assert!(summary.complete);
        assert!(summary.mean_loss.is_finite());
        assert!((0.0..=100.0).contains(&summary.accuracy_pct));
    }

    #[test]
    fn forced_constant_predictions_give_hand_computed_accuracy() {
        let device = <MainBackend as MainDevice>::main_device();
        let mut model = tiny_model_config().init::<MainBackend>(&device);

        // zero output weights plus a biased head: logits depend on nothing
        // but the bias, so every sample predicts class 3
        model.output.weight = Param::from_tensor(model.output.weight.val().zeros_like());
        model.output.bias = Some(Param::from_tensor(Tensor::from_floats(
            [0., 0., 0., 1., 0., 0., 0., 0., 0., 0.],
            &device,
        )));

        let config = TrainingConfig::new(AdamConfig::new()).with_batch_size(3);
        // 3 of the 6 labels are class 3, spread over both batches
        let items = vec![
            toy_item(0., 3),
            toy_item(32., 3),
            toy_item(64., 1),
            toy_item(96., 3),
            toy_item(128., 2),
            toy_item(160., 2),
        ];
        let summary = epoch_valid(valid_loader(items, 3), model, &config, 1).unwrap();

        assert!(summary.complete);
        assert_eq!(2, summary.batches);
        assert_eq!(6, summary.samples);
        assert_eq!(100.0 * 3.0 / 6.0, summary.accuracy_pct);
    }

    #[test]
    fn out_of_range_target_is_skipped_under_log_and_continue() {
        let device = <MainBackend as MainDevice>::main_device();
        let model = tiny_model_config().init::<MainBackend>(&device);
        let config = TrainingConfig::new(AdamConfig::new())
            .with_batch_size(3)
            .with_on_validation_error(ValidationErrorPolicy::LogAndContinue);

        // first batch is sound, second contains a class id outside 0..10
        let items = vec![
            toy_item(0., 1),
            toy_item(10., 1),
            toy_item(20., 1),
            toy_item(30., 2),
            toy_item(40., 12),
            toy_item(50., 2),
        ];
        let summary = epoch_valid(valid_loader(items, 3), model, &config, 1).unwrap();

        assert!(!summary.complete);
        assert_eq!(1, summary.batches);
        assert_eq!(3, summary.samples);
    }

    #[test]
    fn out_of_range_target_propagates_under_abort() {
        let device = <MainBackend as MainDevice>::main_device();
        let model = tiny_model_config().init::<MainBackend>(&device);
        let config = TrainingConfig::new(AdamConfig::new())
            .with_batch_size(2)
            .with_on_validation_error(ValidationErrorPolicy::Abort);

        let items = vec![toy_item(0., 1), toy_item(10., 12)];
        let result = epoch_valid(valid_loader(items, 2), model, &config, 1);

        assert!(matches!(
            result,
            Err(ValidationFault::TargetOutOfRange { class: 12, .. })
        ));
    }

    #[test]
    fn one_epoch_lowers_toy_training_loss() {
        let device = <MainAutoBackend as MainDevice>::main_device();
        MainAutoBackend::seed(7);

        let config = TrainingConfig::new(AdamConfig::new())
            .with_batch_size(2)
            .with_num_workers(1)
            .with_lr(1e-2)
            .with_seed(7);
        let model_config = tiny_model_config();

        // deterministic 4-sample, 2-class toy dataset
        let items = vec![
            toy_item(0., 0),
            toy_item(255., 1),
            toy_item(0., 0),
            toy_item(255., 1),
        ];
        let dataloader_train: Dataloader<MainAutoBackend> =
            DataLoaderBuilder::new(DigitBatcher::default())
                .batch_size(2)
                .num_workers(1)
                .build(InMemDataset::new(items.clone()));

        let mut session = Session::<MainAutoBackend> {
            model: model_config.init(&device),
            optim: config.optimizer.init(),
            dataloader_train,
            dataloader_valid: valid_loader(items, 2),
            config,
        };

        let before = epoch_valid(
            session.dataloader_valid.clone(),
            session.model.valid(),
            &session.config,
            0,
        )
        .unwrap();
        epoch_train(&mut session, 1);
        let after = epoch_valid(
            session.dataloader_valid.clone(),
            session.model.valid(),
            &session.config,
            1,
        )
        .unwrap();

        assert!(
            after.mean_loss < before.mean_loss,
            "loss did not decrease: {} -> {}",
            before.mean_loss,
            after.mean_loss
        );
    }
}
