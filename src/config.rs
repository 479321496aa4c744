use std::net::SocketAddr;
use std::path::PathBuf;

/// Application-level constants
pub const APP_NAME: &str = "DecisionTrace";
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default OpenRouter endpoint.
const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// Runtime configuration, loaded once at startup and passed explicitly
/// into constructors. No process-wide mutable state.
#[derive(Debug, Clone)]
pub struct AppConfig {
    /// OpenRouter API key (`OPENROUTER_API_KEY`). Required for the real caller.
    pub api_key: String,
    /// Base URL of the model endpoint (`OPENROUTER_BASE_URL`).
    pub base_url: String,
    pub generation: GenerationConfig,
    /// SQLite database file (`DECISIONTRACE_DB`).
    pub database_path: PathBuf,
    /// HTTP bind address (`DECISIONTRACE_ADDR`).
    pub bind_addr: SocketAddr,
    /// Allowed CORS origins (`DECISIONTRACE_ORIGINS`, comma-separated).
    pub allowed_origins: Vec<String>,
}

/// Knobs for the structured generation client. Owned by the client,
/// not read from globals mid-flight.
#[derive(Debug, Clone)]
pub struct GenerationConfig {
    pub primary_model: String,
    pub fallback_model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Per-call request timeout in seconds. Exceeding it is terminal.
    pub timeout_secs: u64,
    /// Validation retries allowed per model before escalating or failing.
    pub max_retries: u32,
    pub enable_fallback: bool,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            primary_model: "deepseek/deepseek-chat".to_string(),
            fallback_model: "qwen/qwen-2.5-7b-instruct".to_string(),
            temperature: 0.3,
            max_tokens: 2000,
            timeout_secs: 60,
            max_retries: 1,
            enable_fallback: true,
        }
    }
}

impl AppConfig {
    /// Load configuration from environment variables, falling back to
    /// defaults for everything except the API key.
    pub fn from_env() -> Self {
        let generation = GenerationConfig {
            primary_model: env_or("DECISIONTRACE_PRIMARY_MODEL", "deepseek/deepseek-chat"),
            fallback_model: env_or("DECISIONTRACE_FALLBACK_MODEL", "qwen/qwen-2.5-7b-instruct"),
            temperature: env_parsed("DECISIONTRACE_TEMPERATURE", 0.3),
            max_tokens: env_parsed("DECISIONTRACE_MAX_TOKENS", 2000),
            timeout_secs: env_parsed("DECISIONTRACE_LLM_TIMEOUT", 60),
            max_retries: env_parsed("DECISIONTRACE_MAX_RETRIES", 1),
            enable_fallback: env_parsed("DECISIONTRACE_ENABLE_FALLBACK", true),
        };

        Self {
            api_key: std::env::var("OPENROUTER_API_KEY").unwrap_or_default(),
            base_url: env_or("OPENROUTER_BASE_URL", DEFAULT_BASE_URL),
            generation,
            database_path: std::env::var("DECISIONTRACE_DB")
                .map(PathBuf::from)
                .unwrap_or_else(|_| default_database_path()),
            bind_addr: env_parsed("DECISIONTRACE_ADDR", SocketAddr::from(([0, 0, 0, 0], 8000))),
            allowed_origins: std::env::var("DECISIONTRACE_ORIGINS")
                .map(|s| {
                    s.split(',')
                        .map(|o| o.trim().to_string())
                        .filter(|o| !o.is_empty())
                        .collect()
                })
                .unwrap_or_else(|_| {
                    vec![
                        "http://localhost:3000".to_string(),
                        "http://127.0.0.1:3000".to_string(),
                    ]
                }),
        }
    }
}

/// Get the application data directory: ~/DecisionTrace/ on all platforms.
pub fn app_data_dir() -> PathBuf {
    let home = dirs::home_dir().expect("Cannot determine home directory");
    home.join("DecisionTrace")
}

fn default_database_path() -> PathBuf {
    app_data_dir().join("decisions.db")
}

/// Default tracing filter when RUST_LOG is unset.
pub fn default_log_filter() -> String {
    "info,decisiontrace=debug".to_string()
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parsed<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}
