use clap::Parser;
use push_app::config::Cli;
use push_app::{run, JobConfig};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = JobConfig::from(Cli::parse());

    if let Err(err) = run(&config) {
        tracing::error!(error = %format!("{err:#}"), "push notification run failed");
        std::process::exit(1);
    }
}
