//! vbump CLI entry point.

use clap::Parser;
use vbump::cli::Cli;
use vbump::core::user_friendly_error;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    if let Err(e) = cli.execute().await {
        user_friendly_error(e).display();
        std::process::exit(1);
    }
}
