use burn::optim::AdamConfig;
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use burn_digits::backend::{MainAutoBackend, MainBackend, MainDevice};
use burn_digits::cli::{AppArgs, HELP};
use burn_digits::model::CnnConfig;
use burn_digits::training::{self, TrainError, TrainingConfig};
use burn_digits::{data, evaluation, persist};

pub fn launch<B, AutoB>(app_args: &AppArgs) -> Result<(), TrainError>
where
    B: Backend + MainDevice,
    AutoB: AutodiffBackend + MainDevice,
{
    persist::create_artifact_dir(&app_args.artifacts_path)?;

    // setup training and model configs
    let training_config = persist::load_training_config(&app_args.artifacts_path)
        .unwrap_or_else(|| TrainingConfig::new(AdamConfig::new()));
    let model_config =
        persist::load_model_config(&app_args.artifacts_path).unwrap_or_else(CnnConfig::new);
    // save configs
    persist::save_training_config(&app_args.artifacts_path, &training_config);
    persist::save_model_config(&app_args.artifacts_path, &model_config);

    if app_args.train {
        let training_device = AutoB::main_device();
        training::train::<AutoB>(
            &app_args.artifacts_path,
            training_config.clone(),
            &model_config,
            training_device,
        )?;
    }

    if app_args.eval {
        let infer_device = B::main_device();
        let model =
            persist::load_model::<B>(&app_args.artifacts_path, &model_config, &infer_device)?;
        let dataloader_test = data::test_dataloader::<B>(
            training_config.batch_size,
            training_config.num_workers,
        );
        let eval = evaluation::evaluate(&model, dataloader_test);
        evaluation::print_evaluation(&eval);
    }

    if !app_args.train && !app_args.eval {
        println!("neither training nor evaluation were enabled");
        println!("{}", HELP);
    }

    Ok(())
}

fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .init();

    let app_args = AppArgs::parse().unwrap();
    if let Err(err) = launch::<MainBackend, MainAutoBackend>(&app_args) {
        log::error!("{err}");
        std::process::exit(1);
    }
}
