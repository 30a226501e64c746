use clap::Parser;
use toolbridge::{
    cli::{run_command, Cli},
    logging::init_logging,
    App, AppConfig,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = AppConfig::load(cli.config.as_deref()).await?;
    if cli.log_json {
        config.logging.json = true;
    }
    init_logging(&config.logging);

    let app = App::build(config).await?;
    let result = run_command(&app, cli.command).await;
    app.shutdown().await;
    result
}
