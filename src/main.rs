use dotenv::dotenv;
use market_chat::config::Config;
use market_chat::server::Server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    env_logger::init();

    let config = Config::from_env()?;
    let server_addr = config.server_addr.clone();

    // Start server in a separate task
    let server = Server::new(&config)?;
    log::info!("Using database {}", config.database_url);
    tokio::spawn(async move {
        if let Err(e) = server.run(&server_addr).await {
            log::error!("Server error: {}", e);
        }
    });

    tokio::signal::ctrl_c().await?;
    log::info!("Shutting down server...");

    Ok(())
}
