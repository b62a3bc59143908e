use clap::Parser;
use training::util::{run_train, TrainArgs};

fn main() -> anyhow::Result<()> {
    cli_support::init_logging();
    let args = TrainArgs::parse();
    let report = run_train(args)?;
    log::info!(
        "finished {} steps; last loss {}",
        report.steps,
        report
            .last_loss
            .map(|l| format!("{l:.6}"))
            .unwrap_or_else(|| "n/a".to_string())
    );
    Ok(())
}
