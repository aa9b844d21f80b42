use anyhow::Result;
use clap::Parser;
use ondevice_ai::cli::{log_filter, Cli, CliState, Commands};
use std::env;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load config first; services are wired after logging is up
    let config = CliState::load_config(cli.config.as_deref())?;

    let rust_log = env::var("RUST_LOG").ok();
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(&config.logging.level, rust_log.as_deref()))
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();

    let state = CliState::new_with_config(config)?;

    match cli.command {
        None | Some(Commands::Repl) => state.run_repl().await?,
        Some(command) => {
            let output = state.execute(command).await?;
            if !output.is_empty() {
                println!("{}", output);
            }
        }
    }
    Ok(())
}
