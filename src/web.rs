#![cfg(not(tarpaulin_include))]

use clap::Parser;
use std::path::PathBuf;

use staffdesk::{app, config::Config};

#[derive(Parser)]
#[command(name = "staffdesk")]
#[command(version)]
#[command(about = "Role-based employee management dashboard")]
struct Args {
    /// TOML config file; environment variables override it
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Address to listen on, e.g. 0.0.0.0:5000
    #[arg(short, long)]
    bind: Option<String>,
}

/// Main entry point for the web application
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(bind) = args.bind {
        config.bind_addr = bind;
        config.validate()?;
    }

    app::run(config).await
}
