//! Server configuration loaded from environment variables

#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection string
    pub database_url: String,
    /// Address the HTTP server binds to, e.g. `0.0.0.0:8080`
    pub bind_address: String,
    /// Shared secret for the cron trigger endpoints
    pub cron_secret: String,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;

        let bind_address =
            std::env::var("BIND_ADDRESS").unwrap_or_else(|_| "0.0.0.0:8080".to_string());

        let cron_secret = std::env::var("CRON_SECRET")
            .map_err(|_| anyhow::anyhow!("CRON_SECRET must be set"))?;
        if cron_secret.len() < 16 {
            anyhow::bail!("CRON_SECRET must be at least 16 characters");
        }

        Ok(Self {
            database_url,
            bind_address,
            cron_secret,
        })
    }
}
