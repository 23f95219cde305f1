mod cli;
mod config;
mod console;
mod model_download;
mod osc;
mod pipeline;
mod types;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};

fn main() -> Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Cameras => console::list_cameras(),
        Commands::Run(args) => console::run_live(args),
        Commands::Image(args) => console::run_image(args),
    }
}
