use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::sources::{
    spotify::{SPOTIFY_ACCOUNTS_URL, SPOTIFY_API_URL},
    SpotifyConfig,
};

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    // Discord
    pub discord_token: String,
    pub guild_id: Option<u64>, // Para comandos de desarrollo

    // Spotify
    pub spotify_client_id: String,
    pub spotify_client_secret: String,
    pub spotify_accounts_url: String,
    pub spotify_api_url: String,

    // Extracción
    pub ytdlp_path: String,

    // Reproducción
    pub max_queue_size: usize,
    pub default_volume: f32,
}

impl Config {
    pub fn load() -> Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            discord_token: std::env::var("DISCORD_TOKEN")
                .map_err(|_| anyhow::anyhow!("DISCORD_TOKEN no está definido"))?,
            guild_id: std::env::var("GUILD_ID").ok().and_then(|s| s.parse().ok()),

            spotify_client_id: std::env::var("SPOTIFY_CLIENT_ID")
                .map_err(|_| anyhow::anyhow!("SPOTIFY_CLIENT_ID no está definido"))?,
            spotify_client_secret: std::env::var("SPOTIFY_CLIENT_SECRET")
                .map_err(|_| anyhow::anyhow!("SPOTIFY_CLIENT_SECRET no está definido"))?,
            spotify_accounts_url: std::env::var("SPOTIFY_ACCOUNTS_URL")
                .unwrap_or_else(|_| SPOTIFY_ACCOUNTS_URL.to_string()),
            spotify_api_url: std::env::var("SPOTIFY_API_URL")
                .unwrap_or_else(|_| SPOTIFY_API_URL.to_string()),

            ytdlp_path: std::env::var("YTDLP_PATH").unwrap_or_else(|_| "yt-dlp".to_string()),

            max_queue_size: std::env::var("MAX_QUEUE_SIZE")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()?,
            default_volume: std::env::var("DEFAULT_VOLUME")
                .unwrap_or_else(|_| "0.5".to_string())
                .parse()?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Checks values that would otherwise only fail once the bot is running.
    pub fn validate(&self) -> Result<()> {
        if self.discord_token.trim().is_empty() {
            anyhow::bail!("Discord token must not be empty");
        }

        if self.spotify_client_id.trim().is_empty() || self.spotify_client_secret.trim().is_empty() {
            anyhow::bail!("Spotify client credentials must not be empty");
        }

        if self.default_volume < 0.0 || self.default_volume > 2.0 {
            anyhow::bail!("Default volume must be between 0.0 and 2.0, got: {}", self.default_volume);
        }

        if self.max_queue_size == 0 {
            anyhow::bail!("Max queue size must be greater than 0");
        }

        Ok(())
    }

    /// Spotify client settings derived from this configuration.
    pub fn spotify(&self) -> SpotifyConfig {
        SpotifyConfig::new(&self.spotify_client_id, &self.spotify_client_secret)
            .with_endpoints(&self.spotify_accounts_url, &self.spotify_api_url)
    }

    /// Loggable summary. Secrets are left out.
    pub fn summary(&self) -> String {
        format!(
            "Config Summary:\n  \
            Discord: guild {}\n  \
            Spotify: {} (accounts {})\n  \
            Extraction: {}\n  \
            Playback: {}% vol, {} queue",
            self.guild_id.map_or("global".to_string(), |id| id.to_string()),
            self.spotify_api_url,
            self.spotify_accounts_url,
            self.ytdlp_path,
            (self.default_volume * 100.0) as u32,
            self.max_queue_size,
        )
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            // Credenciales sin valores por defecto
            discord_token: String::new(),
            guild_id: None,

            spotify_client_id: String::new(),
            spotify_client_secret: String::new(),
            spotify_accounts_url: SPOTIFY_ACCOUNTS_URL.to_string(),
            spotify_api_url: SPOTIFY_API_URL.to_string(),

            ytdlp_path: "yt-dlp".to_string(),

            max_queue_size: 1000,
            default_volume: 0.5,
        }
    }
}
