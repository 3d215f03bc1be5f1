use crate::error::{Error, Result};
use dotenvy::dotenv;
use std::env;
use std::sync::OnceLock;

#[derive(Debug, Clone)]
pub struct Config {
    pub server_address: String,
    pub database_url: String,
    pub jwt_secret: String,
    /// Minimum percentage for certificate eligibility.
    pub certificate_threshold: u8,
    /// How long after the deadline a submission still carries its own answers.
    pub deadline_grace_seconds: i64,
    pub deadline_sweep_seconds: u64,
}

pub static CONFIG: OnceLock<Config> = OnceLock::new();

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();

        let certificate_threshold: u8 = get_env_parse_or("CERTIFICATE_THRESHOLD", 80)?;
        if certificate_threshold > 100 {
            return Err(Error::Config(format!(
                "CERTIFICATE_THRESHOLD must be between 0 and 100, got {}",
                certificate_threshold
            )));
        }

        Ok(Self {
            server_address: get_env("SERVER_ADDRESS")?,
            database_url: get_env("DATABASE_URL")?,
            jwt_secret: get_env("JWT_SECRET")?,
            certificate_threshold,
            deadline_grace_seconds: get_env_parse_or("DEADLINE_GRACE_SECONDS", 5)?,
            deadline_sweep_seconds: get_env_parse_or("DEADLINE_SWEEP_SECONDS", 30)?,
        })
    }
}

fn get_env(name: &str) -> Result<String> {
    env::var(name).map_err(|_| Error::Config(format!("Missing environment variable: {}", name)))
}

fn get_env_parse_or<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| Error::Config(format!("Invalid value for {}: {}", name, e))),
        Err(_) => Ok(default),
    }
}

pub fn init_config() -> Result<()> {
    let config = Config::from_env()?;
    CONFIG
        .set(config)
        .map_err(|_| Error::Config("Configuration has already been initialized".to_string()))?;
    Ok(())
}

pub fn get_config() -> Result<&'static Config> {
    CONFIG
        .get()
        .ok_or_else(|| Error::Config("Configuration has not been initialized".to_string()))
}
