use parlare_core::session::Budgets;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use tracing::Level;

/// A custom error type for configuration loading failures.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value for environment variable {0}: {1}")]
    InvalidValue(String, String),
}

/// Holds all configuration loaded from the environment at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub bind_address: SocketAddr,
    pub openai_api_key: String,
    pub openai_api_base: String,
    pub chat_model: String,
    pub embedding_model: String,
    pub temperature: f32,
    pub target_language: String,
    pub budgets: Budgets,
    pub tool_concurrency: usize,
    pub storage_root: PathBuf,
    pub storage_bucket: String,
    pub vector_store_path: PathBuf,
    /// Directory of `*.json` exercises indexed at startup, if set.
    pub exercises_path: Option<PathBuf>,
    pub log_level: Level,
    pub prompts_path: PathBuf,
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_var<T>(name: &str, default: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let raw = var_or(name, default);
    raw.trim()
        .parse::<T>()
        .map_err(|e| ConfigError::InvalidValue(name.to_string(), format!("'{}': {}", raw, e)))
}

impl Config {
    /// Loads configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Only load from .env in non-test mode to avoid contamination
        if !cfg!(test) {
            dotenvy::dotenv().ok();
        }

        let bind_address = parse_var::<SocketAddr>("BIND_ADDRESS", "0.0.0.0:3000")?;

        let openai_api_key = std::env::var("OPENAI_API_KEY")
            .ok()
            .filter(|key| !key.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingVar("OPENAI_API_KEY".to_string()))?;
        let openai_api_base = var_or("OPENAI_API_BASE", "https://api.openai.com/v1");

        let chat_model = var_or("CHAT_MODEL", "gpt-4o-mini");
        let embedding_model = var_or("EMBEDDING_MODEL", "text-embedding-3-small");

        let temperature = parse_var::<f32>("TEMPERATURE", "0.7")?;
        if !(0.0..=2.0).contains(&temperature) {
            return Err(ConfigError::InvalidValue(
                "TEMPERATURE".to_string(),
                format!("{} is outside 0.0..=2.0", temperature),
            ));
        }

        let target_language = var_or("TARGET_LANGUAGE", "Italian");

        let budgets = Budgets {
            step_budget: parse_var("STEP_BUDGET", "8")?,
            retry_budget: parse_var("RETRY_BUDGET", "3")?,
        };
        if budgets.step_budget == 0 {
            return Err(ConfigError::InvalidValue(
                "STEP_BUDGET".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        let tool_concurrency = parse_var::<usize>("TOOL_CONCURRENCY", "4")?;
        if tool_concurrency == 0 {
            return Err(ConfigError::InvalidValue(
                "TOOL_CONCURRENCY".to_string(),
                "must be at least 1".to_string(),
            ));
        }

        let storage_root = PathBuf::from(var_or("STORAGE_ROOT", "./data/assets"));
        let storage_bucket = var_or("STORAGE_BUCKET", "parlare-assets");
        let vector_store_path =
            PathBuf::from(var_or("VECTOR_STORE_PATH", "./data/vectorstore.json"));
        let exercises_path = std::env::var("EXERCISES_PATH").ok().map(PathBuf::from);

        let log_level_str = var_or("RUST_LOG", "INFO");
        let log_level = log_level_str.parse::<Level>().map_err(|_| {
            ConfigError::InvalidValue(
                "RUST_LOG".to_string(),
                format!("'{}' is not a valid log level", log_level_str),
            )
        })?;

        let prompts_path = PathBuf::from(var_or("PROMPTS_PATH", "./prompts"));

        Ok(Self {
            bind_address,
            openai_api_key,
            openai_api_base,
            chat_model,
            embedding_model,
            temperature,
            target_language,
            budgets,
            tool_concurrency,
            storage_root,
            storage_bucket,
            vector_store_path,
            exercises_path,
            log_level,
            prompts_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use tracing::Level;

    const VARS: [&str; 16] = [
        "BIND_ADDRESS",
        "OPENAI_API_KEY",
        "OPENAI_API_BASE",
        "CHAT_MODEL",
        "EMBEDDING_MODEL",
        "TEMPERATURE",
        "TARGET_LANGUAGE",
        "STEP_BUDGET",
        "RETRY_BUDGET",
        "TOOL_CONCURRENCY",
        "STORAGE_ROOT",
        "STORAGE_BUCKET",
        "VECTOR_STORE_PATH",
        "EXERCISES_PATH",
        "RUST_LOG",
        "PROMPTS_PATH",
    ];

    fn clear_env_vars() {
        for var in VARS {
            unsafe {
                env::remove_var(var);
            }
        }
    }

    fn set_minimal_env() {
        unsafe {
            env::set_var("OPENAI_API_KEY", "test-openai-key");
        }
    }

    #[test]
    fn test_config_error_display() {
        let missing_var = ConfigError::MissingVar("TEST_VAR".to_string());
        assert_eq!(
            format!("{}", missing_var),
            "Missing environment variable: TEST_VAR"
        );

        let invalid_value =
            ConfigError::InvalidValue("TEST_VAR".to_string(), "bad_value".to_string());
        assert_eq!(
            format!("{}", invalid_value),
            "Invalid value for environment variable TEST_VAR: bad_value"
        );
    }

    #[test]
    #[serial]
    fn test_config_from_env_defaults() {
        clear_env_vars();
        set_minimal_env();

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.bind_address.to_string(), "0.0.0.0:3000");
        assert_eq!(config.openai_api_key, "test-openai-key");
        assert_eq!(config.openai_api_base, "https://api.openai.com/v1");
        assert_eq!(config.chat_model, "gpt-4o-mini");
        assert_eq!(config.embedding_model, "text-embedding-3-small");
        assert_eq!(config.temperature, 0.7);
        assert_eq!(config.target_language, "Italian");
        assert_eq!(config.budgets, Budgets::default());
        assert_eq!(config.tool_concurrency, 4);
        assert_eq!(config.storage_root, PathBuf::from("./data/assets"));
        assert_eq!(config.storage_bucket, "parlare-assets");
        assert_eq!(config.vector_store_path, PathBuf::from("./data/vectorstore.json"));
        assert_eq!(config.exercises_path, None);
        assert_eq!(config.log_level, Level::INFO);
        assert_eq!(config.prompts_path, PathBuf::from("./prompts"));
    }

    #[test]
    #[serial]
    fn test_config_from_env_custom_values() {
        clear_env_vars();
        unsafe {
            env::set_var("BIND_ADDRESS", "127.0.0.1:8080");
            env::set_var("OPENAI_API_KEY", "custom-key");
            env::set_var("OPENAI_API_BASE", "http://localhost:11434/v1");
            env::set_var("CHAT_MODEL", "llama3");
            env::set_var("TEMPERATURE", "0.2");
            env::set_var("TARGET_LANGUAGE", "Spanish");
            env::set_var("STEP_BUDGET", "4");
            env::set_var("RETRY_BUDGET", "1");
            env::set_var("TOOL_CONCURRENCY", "8");
            env::set_var("EXERCISES_PATH", "/data/structured");
            env::set_var("RUST_LOG", "debug");
        }

        let config = Config::from_env().expect("Config should load successfully");

        assert_eq!(config.bind_address.to_string(), "127.0.0.1:8080");
        assert_eq!(config.openai_api_base, "http://localhost:11434/v1");
        assert_eq!(config.chat_model, "llama3");
        assert_eq!(config.temperature, 0.2);
        assert_eq!(config.target_language, "Spanish");
        assert_eq!(
            config.budgets,
            Budgets {
                step_budget: 4,
                retry_budget: 1
            }
        );
        assert_eq!(config.tool_concurrency, 8);
        assert_eq!(config.exercises_path, Some(PathBuf::from("/data/structured")));
        assert_eq!(config.log_level, Level::DEBUG);
    }

    #[test]
    #[serial]
    fn test_config_missing_openai_key() {
        clear_env_vars();

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::MissingVar(var) => assert_eq!(var, "OPENAI_API_KEY"),
            _ => panic!("Expected MissingVar for OPENAI_API_KEY"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_bind_address() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("BIND_ADDRESS", "not-a-valid-address");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "BIND_ADDRESS"),
            _ => panic!("Expected InvalidValue for BIND_ADDRESS"),
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_numbers() {
        for (var, value) in [
            ("TEMPERATURE", "hot"),
            ("TEMPERATURE", "3.5"),
            ("STEP_BUDGET", "-1"),
            ("STEP_BUDGET", "0"),
            ("RETRY_BUDGET", "many"),
            ("TOOL_CONCURRENCY", "0"),
        ] {
            clear_env_vars();
            set_minimal_env();
            unsafe {
                env::set_var(var, value);
            }

            match Config::from_env() {
                Err(ConfigError::InvalidValue(name, _)) => assert_eq!(name, var),
                other => panic!(
                    "Expected InvalidValue for {var}={value}, got {:?}",
                    other.map(|_| ())
                ),
            }
        }
    }

    #[test]
    #[serial]
    fn test_config_invalid_log_level() {
        clear_env_vars();
        set_minimal_env();
        unsafe {
            env::set_var("RUST_LOG", "not-a-level");
        }

        let err = Config::from_env().unwrap_err();
        match err {
            ConfigError::InvalidValue(var, _) => assert_eq!(var, "RUST_LOG"),
            _ => panic!("Expected InvalidValue for RUST_LOG"),
        }
    }
}
