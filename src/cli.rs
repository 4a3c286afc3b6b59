use std::path::PathBuf;

pub const HELP: &str = "\
burn-digits

Trains a convolutional MNIST digit classifier and/or evaluates a trained one
against the held-out test set. Model weights and configurations are persisted
in an artifacts directory.

USAGE:
    burn-digits [OPTIONS]

When neither --train nor --eval is given, the program prints this help after
handling configuration logic.

BEHAVIOR OVERVIEW
- Training and model configurations are loaded from the artifacts directory
  when present; otherwise defaults are created and saved there.
- With --train, the model is trained for the configured number of epochs,
  validating after every epoch, and its weights are saved to the artifacts
  directory.
- With --eval, the saved weights are loaded and run once over the 10k test
  samples, printing accuracy, a per-class report, and a confusion matrix.
- If both flags are given, training executes first.

FLAGS:
    -h, --help                  Show this help message and exit
    -t, --train                 Run training (creates or updates the model)
    -e, --eval                  Evaluate the saved model on the test set

OPTIONS:
    -a, --artifacts-path <PATH>
                                Directory where configurations and model
                                weights are saved and loaded. Created if
                                missing. Defaults to a newly created
                                temporary directory (path will be printed).
";

#[derive(Debug)]
pub struct AppArgs {
    pub train: bool,
    pub eval: bool,
    pub artifacts_path: PathBuf,
}

impl AppArgs {
    pub fn parse() -> Result<Self, pico_args::Error> {
        let mut pargs = pico_args::Arguments::from_env();

        // Help has a higher priority and should be handled separately.
        if pargs.contains(["-h", "--help"]) {
            println!("{}", HELP);
            std::process::exit(0);
        }

        let args = AppArgs {
            artifacts_path: pargs
                .opt_value_from_os_str(["-a", "--artifacts-path"], parse_path)?
                .unwrap_or_else(|| {
                    // e.g. /tmp/burn-digits-abcd-0
                    let name = format!("{}-", std::env!("CARGO_PKG_NAME"));
                    let tmp = temp_dir::TempDir::with_prefix(name)
                        .expect("Failed to create the temporary directory")
                        .dont_delete_on_drop();
                    let path = tmp.path();
                    println!("new artifacts directory: {path:?}");
                    path.into()
                }),
            // must parse flags after values
            train: pargs.contains(["-t", "--train"]),
            eval: pargs.contains(["-e", "--eval"]),
        };

        // It's up to the caller what to do with the remaining arguments.
        let remaining = pargs.finish();
        if !remaining.is_empty() {
            panic!("unused arguments: {remaining:?}");
        }

        Ok(args)
    }
}

fn parse_path(s: &std::ffi::OsStr) -> Result<PathBuf, &'static str> {
    Ok(s.into())
}
