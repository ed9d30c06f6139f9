mod settings;

use crate::config::settings::PartialSettings;
use config::{Config, ConfigError, Environment, File};

pub use settings::{ClientSettings, DispatcherSettings, Settings, SubscriptionSettings};

/// Loads the configuration from `.env`, the default file and environment variables.
///
/// Environment variables use the `POPSUB_` prefix and `__` between nesting
/// levels, e.g. `POPSUB_SUBSCRIPTION__DEFAULT_TIMEOUT_MS=250`.
/// Anything left unspecified falls back to `Settings::default()`.
pub fn load_config() -> Result<Settings, ConfigError> {
    // a missing .env file is not an error
    let _ = dotenvy::dotenv();

    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix("POPSUB")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;

    // Try to deserialize what is available
    let partial: PartialSettings = config.try_deserialize()?;

    Ok(partial.merge(Settings::default()))
}
