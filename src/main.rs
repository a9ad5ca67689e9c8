use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::cli::{CommonArgs, CommonCommands, utils};
use lifecycle::{Dispatcher, Runtime};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, BufReader};

#[derive(Parser)]
#[command(name = "assetkeeper")]
#[command(about = "assetkeeper - thumbnail generation and cascading cleanup for image assets")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Handle newline-delimited JSON trigger events
    Handle {
        #[arg(long, help = "Events file; reads stdin when omitted")]
        events: Option<PathBuf>,
    },
    #[command(flatten)]
    Common(CommonCommands),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    utils::init_logging(&cli.common);

    let config = utils::load_config(cli.common.config.as_ref())?;

    let events = match cli.command {
        Command::Common(ref common_cmd) => return utils::handle_common_command(common_cmd, &config),
        Command::Handle { events } => events,
    };

    config.validate().context("Invalid configuration")?;
    let runtime = Runtime::from_config(&config).await?;
    let dispatcher = Dispatcher::new(Arc::new(runtime));

    let reader: Box<dyn AsyncBufRead + Unpin> = match &events {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open events file {}", path.display()))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };

    let summary = dispatcher.dispatch_lines(reader).await?;
    if summary.failed > 0 {
        anyhow::bail!("{} of the dispatched events failed", summary.failed);
    }
    Ok(())
}
