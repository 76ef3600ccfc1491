mod cli;
mod logger;

use crate::cli::{Args, USAGE};
use crate::logger::initialize_logger;
use codegen::{Error, Operation, Settings};
use log::{error, info};
use std::process::ExitCode;

fn main() -> ExitCode {
    let args = match Args::parse() {
        Ok(args) => args,
        Err(message) => {
            eprintln!("{message}\n{USAGE}");
            return ExitCode::from(1);
        }
    };
    initialize_logger(args.verbose);

    let settings = match &args.config {
        Some(config) => Settings::load(config, &args.root),
        None => {
            let settings = Settings::with_defaults(&args.root);
            settings.verify().map(|()| settings)
        }
    };
    let settings = match settings {
        Ok(settings) => settings,
        Err(err) => {
            error!("{err}");
            return ExitCode::from(1);
        }
    };

    match codegen::run(&settings, args.operation) {
        Ok(report) if args.operation == Operation::Test => {
            info!("{} permutation(s) compiled cleanly", report.compiled);
            ExitCode::SUCCESS
        }
        Ok(_) => ExitCode::SUCCESS,
        Err(err @ Error::Compile { .. }) => {
            error!("{err}");
            ExitCode::from(3)
        }
        Err(err) => {
            error!("{err}");
            ExitCode::from(1)
        }
    }
}
