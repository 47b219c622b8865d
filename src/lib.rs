use anyhow::Context;
use runner::make_and_run;

pub mod config;
pub mod driver;
pub mod exit_code;
pub mod expect;
pub mod image_compare;
pub mod logging;
pub mod runner;
pub mod runner_file_utils;
pub mod scenario;
pub mod toolchain;

#[cfg(all(test, unix))]
mod test_support;

pub fn run(cli: config::Cli) -> anyhow::Result<()> {
    logging::init(logging::level(cli.quiet, cli.debug)).context("Failed to install logger")?;
    if let Some(color) = cli.color() {
        colored::control::set_override(color);
    }

    let report = make_and_run(&cli)?;

    println!("Score: {}", report.to_score());

    if cli.autograder {
        println!("{}", serde_json::to_string(&report)?);
    }

    Ok(())
}
