mod inspect;

pub use inspect::{InspectArgs, inspect_archives};

use std::path::PathBuf;

use crate::{
    config::CheckpointTreeConfig,
    local_logger::{CHECKPOINT_TREE_U8_COLOR_CODE, init_local_logger},
    prelude::*,
};
use clap::{
    Parser, Subcommand,
    builder::{Styles, styling},
};

fn create_styles() -> Styles {
    styling::Styles::styled()
        .header(styling::AnsiColor::Green.on_default() | styling::Effects::BOLD)
        .usage(styling::AnsiColor::Green.on_default() | styling::Effects::BOLD)
        .literal(
            styling::Ansi256Color(CHECKPOINT_TREE_U8_COLOR_CODE).on_default()
                | styling::Effects::BOLD,
        )
        .placeholder(styling::AnsiColor::Cyan.on_default())
}

#[derive(Parser, Debug)]
#[command(
    version,
    about = "Display a tree view of container checkpoint archives",
    styles = create_styles()
)]
pub struct Cli {
    /// Path to the configuration file
    /// If not provided, loads from ~/.config/checkpoint-tree/config.yaml when it exists
    #[arg(long, env = "CHECKPOINT_TREE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Display the tree view of one or more checkpoint archives
    #[command(alias = "i")]
    Inspect(inspect::InspectArgs),
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_local_logger()?;

    let config = CheckpointTreeConfig::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Inspect(args) => inspect::run(args, &config).await?,
    }
    Ok(())
}
