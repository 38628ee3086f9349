use chai_relay::config::Config;
use chai_relay::daemon;
use chai_relay::error::Result;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "chai-relayd")]
#[command(about = "Chai reply streaming daemon")]
struct Cli {
    /// JSON config file; flags below override its values.
    #[arg(long, env = "CHAI_RELAY_CONFIG")]
    config: Option<String>,

    #[arg(long, env = "CHAI_RELAY_HOST")]
    host: Option<String>,

    #[arg(long, env = "CHAI_RELAY_PORT")]
    port: Option<u16>,

    #[arg(long, env = "CHAI_RELAY_DB")]
    db: Option<String>,

    #[arg(long, env = "CHAI_RELAY_MODEL")]
    model: Option<String>,

    #[arg(long, env = "CHAI_RELAY_BASE_URL")]
    base_url: Option<String>,

    #[arg(long, env = "CHAI_RELAY_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
}

impl Cli {
    fn into_config(self) -> Result<Config> {
        let mut config = match self.config.as_deref() {
            Some(path) => Config::from_file(path)?,
            None => Config::convention_defaults(&chai_relay::runtime_paths::default_db_path()),
        };

        if self.host.is_some() {
            config.server.host = self.host;
        }
        if self.port.is_some() {
            config.server.port = self.port;
        }
        if self.db.is_some() {
            config.database.sqlite_path = self.db;
        }
        if self.model.is_some() {
            config.openai.model = self.model;
        }
        if self.base_url.is_some() {
            config.openai.base_url = self.base_url;
        }
        if self.api_key.is_some() {
            config.openai.api_key = self.api_key;
        }

        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    chai_relay::logging::init_tracing("chai_relayd");
    let config = Cli::parse().into_config()?;

    daemon::run(config).await
}
