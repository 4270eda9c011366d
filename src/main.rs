use clap::Parser;
use log::{error, info};
use pop3bayes::configuration::config::{CliArgs, Config};
use pop3bayes::controller::controller_handler::Controller;
use pop3bayes::error_handling::types::ControllerError;

#[tokio::main(flavor = "current_thread")]
async fn main() {
    // https://docs.rs/env_logger/latest/env_logger/
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .parse_default_env()
        .format_target(false)
        .init();

    println!(
        "
==============================================================================
        pop3bayes v{} - POP3 proxy with spam classification headers
==============================================================================
",
        env!("CARGO_PKG_VERSION")
    );

    let args = CliArgs::parse();

    let mut config = match args.config {
        Some(ref path) => {
            info!("Importing configuration from {}", path.display());
            Config::from_file(path).unwrap_or_else(|e| {
                error!("Unable to import configuration from file: {}", e);
                std::process::exit(1);
            })
        }
        None => Config::default(),
    };
    config.apply_args(&args);
    if let Err(e) = config.validate() {
        error!("Invalid configuration: {}", e);
        std::process::exit(1);
    }
    info!("Configuration imported successfully");

    let mut controller = Controller::new(config).unwrap_or_else(|e| {
        error!("Unable to create a controller instance: {}, exiting...", e);
        std::process::exit(1);
    });

    match controller.run().await {
        Ok(()) => info!("Bye"),
        Err(ControllerError::AlreadyRunning(lock)) => {
            eprintln!(
                "pop3bayes is already running (lock file {}); stop it or remove the lock first.",
                lock
            );
            std::process::exit(2);
        }
        Err(e) => {
            error!("Error occured in the controller process: {}, exiting...", e);
            std::process::exit(1);
        }
    }
}
