use rust_decimal::Decimal;

// Declare the modules that make up this crate.
pub mod error;
pub mod settings;

// Re-export the core types to provide a clean public API.
pub use error::ConfigError;
pub use settings::{BrokerConfig, Config, EngineConfig, RiskConfig, TelegramConfig};

/// Loads the application configuration from the `config.toml` file.
///
/// This function is the primary entry point for this crate. It reads the
/// configuration file, deserializes it into our strongly-typed `Config`
/// struct, validates it, and returns it.
pub fn load_config() -> Result<Config, ConfigError> {
    let builder = config::Config::builder()
        // Tells the builder to look for a file named `config.toml`
        .add_source(config::File::with_name("config.toml"))
        .build()?;

    // Attempt to deserialize the entire configuration into our `Config` struct
    let config = builder.try_deserialize::<Config>()?;
    validate(&config)?;

    Ok(config)
}

/// Rejects configurations that would make the engine misbehave at runtime.
fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.risk.risk_per_trade <= Decimal::ZERO {
        return Err(ConfigError::ValidationError(
            "risk.risk_per_trade must be positive".to_string(),
        ));
    }
    if config.engine.poll_interval_secs == 0 {
        return Err(ConfigError::ValidationError(
            "engine.poll_interval_secs must be at least 1".to_string(),
        ));
    }
    if config.engine.event_buffer_size == 0 {
        return Err(ConfigError::ValidationError(
            "engine.event_buffer_size must be at least 1".to_string(),
        ));
    }
    if !config.broker.simulated
        && (config.broker.key_id.is_empty() || config.broker.secret_key.is_empty())
    {
        return Err(ConfigError::ValidationError(
            "broker.key_id and broker.secret_key are required unless broker.simulated is set"
                .to_string(),
        ));
    }
    Ok(())
}
