mod settings;

use crate::config::settings::PartialSettings;
use config::{Config, ConfigError, Environment, File};

pub use settings::{BrokerSettings, QueueSettings, ServerSettings, Settings};

/// Loads the configuration from `config/default` (if present) and `POLLCAST_*`
/// environment variables, merged over the defaults.
pub fn load_config() -> Result<Settings, ConfigError> {
    build(File::with_name("config/default").required(false))
}

/// Like [`load_config`], but reads an explicit configuration file which must exist.
pub fn load_config_from(path: &str) -> Result<Settings, ConfigError> {
    build(File::with_name(path).required(true))
}

fn build<S>(file: S) -> Result<Settings, ConfigError>
where
    S: config::Source + Send + Sync + 'static,
{
    let builder = Config::builder().add_source(file).add_source(
        Environment::with_prefix("POLLCAST")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;

    let partial: PartialSettings = config.try_deserialize()?;
    let default = Settings::default();

    Ok(Settings {
        server: match partial.server {
            Some(s) => s.merge(default.server),
            None => default.server,
        },
        broker: match partial.broker {
            Some(b) => b.merge(default.broker),
            None => default.broker,
        },
        queue: match partial.queue {
            Some(q) => q.merge(default.queue),
            None => default.queue,
        },
    })
}
