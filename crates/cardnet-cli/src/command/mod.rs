use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use self::{predict::PredictArg, train::TrainArg};

mod predict;
mod train;

#[derive(Debug, Clone, Parser)]
#[command(author, version, about, long_about = None)]
pub struct CommandArgs {
    /// Log filter used when `RUST_LOG` is not set
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
    /// What to do
    #[command(subcommand)]
    mode: Mode,
}

#[derive(Debug, Clone, Subcommand)]
enum Mode {
    /// Train one score predictor per card
    Train(#[clap(flatten)] TrainArg),
    /// Rank cards by the final score their models predict for a game state
    Predict(#[clap(flatten)] PredictArg),
}

pub fn run() -> anyhow::Result<()> {
    let args = CommandArgs::parse();
    init_tracing(&args.log_level)?;
    match &args.mode {
        Mode::Train(arg) => train::run(arg)?,
        Mode::Predict(arg) => predict::run(arg)?,
    }
    Ok(())
}

fn init_tracing(default_filter: &str) -> anyhow::Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(default_filter)?,
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
    Ok(())
}
