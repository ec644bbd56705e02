mod cli;

use std::process::ExitCode;

use clap::Parser;
use cli::Cli;
use log::info;
use quirrus::error::QuirrusError;
use quirrus::output;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(cli.log_level()))
        .init();

    if !cli.is_quiet() {
        output::print_banner();
    }

    info!("Starting quirrus");
    match cli.execute().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", output::failure("Error:"));
            let code = err
                .downcast_ref::<QuirrusError>()
                .map_or(1, QuirrusError::exit_code);
            ExitCode::from(u8::try_from(code).unwrap_or(1))
        }
    }
}
