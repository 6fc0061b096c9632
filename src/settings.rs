use chrono_tz::Tz;
use config::{Config, ConfigError, Environment};
use serde::{Deserialize, Serialize};
use url::Url;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Settings {
    pub debug: bool,
    pub auth_token: String,
    pub enable_swagger: bool,
    pub port: u16,
    /// IANA zone the studios operate in; "now" is read in this zone.
    pub timezone: String,
    /// Base of absolute pagination links.
    pub public_url: Url,
    pub default_range_days: u32,
    pub page_size: usize,
    /// How far an unbounded (`range=all`) window reaches.
    pub max_horizon_days: u32,
    /// Sales tax added to every charge, in basis points.
    pub tax_rate_bps: u32,
    pub billing_on_startup: bool,
    pub geocoder_base_url: Url,
    pub geocoder_api_key: Option<String>,
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let config = Config::builder()
            // APP_PUBLIC_URL, APP_TAX_RATE_BPS, ...
            .add_source(
                Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .set_default("debug", false)?
            .set_default("auth_token", "default-token-change-me")?
            .set_default("enable_swagger", true)?
            .set_default("port", 8080)?
            .set_default("timezone", "UTC")?
            .set_default("public_url", "http://localhost:8080")?
            .set_default("default_range_days", 14)?
            .set_default("page_size", 20)?
            .set_default("max_horizon_days", 365)?
            .set_default("tax_rate_bps", 1300)?
            .set_default("billing_on_startup", true)?
            .set_default("geocoder_base_url", "https://api.mapbox.com")?
            .build()?;

        let settings: Settings = config.try_deserialize()?;
        settings.tz()?;
        Ok(settings)
    }

    pub fn tz(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::Message(format!("unknown timezone `{}`", self.timezone)))
    }
}

#[cfg(test)]
pub(crate) fn test_settings() -> Settings {
    Settings {
        debug: true,
        auth_token: "secret".to_string(),
        enable_swagger: true,
        port: 8080,
        timezone: "America/Toronto".to_string(),
        public_url: Url::parse("http://localhost:8080").unwrap(),
        default_range_days: 14,
        page_size: 20,
        max_horizon_days: 365,
        tax_rate_bps: 1300,
        billing_on_startup: false,
        geocoder_base_url: Url::parse("https://api.mapbox.com").unwrap(),
        geocoder_api_key: None,
    }
}
