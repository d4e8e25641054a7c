use std::sync::Arc;

use clap::Parser;
use gatehouse::authz::Enforcer;
use gatehouse::{settings, web};
use miette::Result;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "gatehouse",
    version,
    about = "Access-control policy decision service"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    // load settings
    let settings = settings::Settings::load(&cli.config)?;
    tracing::info!(?settings, "Loaded configuration");

    // compile model and load policy
    let enforcer = Arc::new(Enforcer::from_settings(&settings.authz)?);

    web::serve(settings, enforcer).await?;
    Ok(())
}
