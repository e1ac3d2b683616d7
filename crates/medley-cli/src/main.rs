use anyhow::Result;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "medley", version, about = "Medley media-catalog backend")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the REST API service
    Api,
    /// Apply pending database migrations
    Migrate,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Api => {
            let config = medley_api::load_config()?;
            medley_api::run(config).await?;
        }
        Commands::Migrate => {
            medley_core::logging::init("medley-cli");
            let database_url = medley_core::config::required_env("DATABASE_URL")?;
            let pool = medley_core::db::connect(&database_url).await?;
            medley_core::migrations::run(&pool).await?;
            tracing::info!("migrations applied");
        }
    }

    Ok(())
}
