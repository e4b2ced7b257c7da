use anyhow::Context;
use mongodb::{bson::doc, options::ClientOptions, Client, Database};
use tracing::info;

pub struct Config<'a> {
    pub app_name: Option<&'a str>,

    /// Full connection string, takes precedence over the parts below.
    pub uri: Option<&'a str>,
    pub username: Option<&'a str>,
    pub password: Option<&'a str>,
    pub database: &'a str,
    pub host: &'a str,
    pub port: u16,
}

impl Config<'_> {
    pub fn connection_string(&self) -> String {
        if let Some(uri) = self.uri {
            return uri.to_string();
        }
        match (self.username, self.password) {
            (Some(user), Some(password)) => format!(
                "mongodb://{}:{}@{}:{}",
                user, password, self.host, self.port
            ),
            (Some(user), None) => format!("mongodb://{}@{}:{}", user, self.host, self.port),
            _ => format!("mongodb://{}:{}", self.host, self.port),
        }
    }
}

/// Returns new mongodb Database handle.
pub async fn conn(cfg: Config<'_>) -> anyhow::Result<Database> {
    let mut client_options = ClientOptions::parse(cfg.connection_string())
        .await
        .context("invalid connection string")?;

    client_options.app_name = cfg.app_name.map(|s| s.to_string());

    let client = Client::with_options(client_options)?;
    // Ping the server to see if you can connect to the cluster
    let db = client.database(cfg.database);
    db.run_command(doc! {"ping": 1}, None)
        .await
        .with_context(|| format!("could not reach database {}", cfg.database))?;
    info!(database = cfg.database, "connected");

    Ok(db)
}
