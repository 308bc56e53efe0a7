//! Layered configuration for pushsub.
//!
//! Sources, later ones winning:
//! - built-in defaults (`Settings::default()`)
//! - `config/default.{toml,yaml,json}` relative to the working directory (optional)
//! - environment variables prefixed with `PUSHSUB`, nested with `__`,
//!   e.g. `PUSHSUB__SERVER__PORT=5000`

pub mod settings;

#[cfg(test)]
mod tests;

use crate::settings::PartialSettings;
use config::{Config, ConfigError, Environment, File};

pub use settings::{ClientSettings, ServerSettings, Settings};

pub fn load_config() -> Result<Settings, ConfigError> {
    let builder = Config::builder()
        .add_source(File::with_name("config/default").required(false))
        .add_source(
            Environment::with_prefix("PUSHSUB")
                .separator("__")
                .try_parsing(true),
        );

    let config = builder.build()?;
    let partial: PartialSettings = config.try_deserialize()?;
    let default = Settings::default();

    let server = partial.server;
    let client = partial.client;

    Ok(Settings {
        server: ServerSettings {
            host: server
                .as_ref()
                .and_then(|s| s.host.clone())
                .unwrap_or(default.server.host),
            port: server
                .as_ref()
                .and_then(|s| s.port)
                .unwrap_or(default.server.port),
            reaper_interval_secs: server
                .as_ref()
                .and_then(|s| s.reaper_interval_secs)
                .unwrap_or(default.server.reaper_interval_secs),
        },
        client: ClientSettings {
            server_address: client
                .as_ref()
                .and_then(|c| c.server_address.clone())
                .unwrap_or(default.client.server_address),
            port: client
                .as_ref()
                .and_then(|c| c.port)
                .unwrap_or(default.client.port),
            advertise_host: client
                .as_ref()
                .and_then(|c| c.advertise_host.clone())
                .or(default.client.advertise_host),
            connect_timeout_secs: client
                .as_ref()
                .and_then(|c| c.connect_timeout_secs)
                .unwrap_or(default.client.connect_timeout_secs),
        },
    })
}
