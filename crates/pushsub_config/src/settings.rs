use serde::Deserialize;

/// Top-level configuration settings for the application.
///
/// Includes settings for both the notification server and the client library.
#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub client: ClientSettings,
}

/// Configuration settings for the notification server.
///
/// Defines where the server listens and how often lost clients are evicted.
#[derive(Debug, Deserialize, Clone)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub reaper_interval_secs: u64,
}

/// Configuration settings for a client process.
#[derive(Debug, Deserialize, Clone)]
pub struct ClientSettings {
    /// `host:port` of the notification server.
    pub server_address: String,
    /// Port the client listens on for pushes from the server.
    pub port: u16,
    /// Host advertised to the server for pushes. Auto-detected when unset.
    pub advertise_host: Option<String>,
    pub connect_timeout_secs: u64,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values can be filled using defaults.
#[derive(Debug, Deserialize)]
pub struct PartialSettings {
    pub server: Option<PartialServerSettings>,
    pub client: Option<PartialClientSettings>,
}

#[derive(Debug, Deserialize)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub reaper_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct PartialClientSettings {
    pub server_address: Option<String>,
    pub port: Option<u16>,
    pub advertise_host: Option<String>,
    pub connect_timeout_secs: Option<u64>,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 4444,
            reaper_interval_secs: 30,
        }
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            server_address: "127.0.0.1:4444".to_string(),
            port: 9999,
            advertise_host: None,
            connect_timeout_secs: 15,
        }
    }
}

/// Provides default values for `Settings`.
impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerSettings::default(),
            client: ClientSettings::default(),
        }
    }
}
