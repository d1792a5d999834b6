use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use hotserve::{Configuration, DevServer};
use tracing::error;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(color = clap::ColorChoice::Never)]
struct Command {
    #[arg(help = "Path to the server configuration file")]
    #[arg(default_value = "config/development.toml")]
    config: PathBuf,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt::init();

    let args = Command::parse();
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            let mut source = std::error::Error::source(&err);
            while let Some(cause) = source {
                error!("caused by: {cause}");
                source = cause.source();
            }
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Command) -> Result<(), hotserve::Error> {
    let configuration = Configuration::load(&args.config)?;
    DevServer::new(configuration)?.listen().await
}
