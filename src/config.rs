use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HermsConfig {
    pub engine: EngineConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Rounds a convergence loop may take before it is reported as
    /// non-terminating.
    pub max_rounds: usize,
    /// Upper bound for a single service call.
    pub service_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// `env_logger` filter used when `RUST_LOG` is not set.
    pub filter: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_rounds: 32,
            service_timeout_ms: 30_000,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

impl HermsConfig {
    /// Load configuration from defaults, an optional `herms` config file and
    /// `HERMS__*` environment variables
    pub fn load() -> anyhow::Result<Self> {
        // Load environment variables from .env file if it exists
        dotenvy::dotenv().ok();

        let mut config = config::Config::builder();

        config = config.add_source(config::Config::try_from(&HermsConfig::default())?);

        config = config.add_source(config::File::with_name("herms").required(false));

        // e.g. HERMS__ENGINE__MAX_ROUNDS=64
        config = config.add_source(
            config::Environment::with_prefix("HERMS")
                .separator("__")
                .prefix_separator("__"),
        );

        let config = config.build()?;
        let herms_config: HermsConfig = config.try_deserialize()?;

        Ok(herms_config)
    }
}

/// Initialise `env_logger`. Safe to call more than once.
pub fn init_logging(logging: &LoggingConfig) {
    let _ = env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(logging.filter.as_str()),
    )
    .try_init();
}
