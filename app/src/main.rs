use std::process::ExitCode;

use app::settings::{Cli, InvocationConfig};
use app::ExitStatus;
use clap::Parser;

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let _ = err.print();
            return ExitStatus::InvalidArgument.into();
        }
    };
    let config = InvocationConfig::from_cli(cli);

    app::logging::init(&config.logging);

    match app::run(&config) {
        Ok(status) => status.into(),
        Err(err) => {
            log::error!("{err}");
            err.exit_status().into()
        }
    }
}
