//! Configuration module for Resumable Uploadr
//!
//! Handles loading and parsing of YAML configuration files with support for
//! environment variable expansion and comprehensive validation.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand environment variables in a string.
///
/// Supports two syntaxes:
/// - `${VAR_NAME}` - Simple expansion, keeps placeholder if var not found
/// - `${VAR_NAME:-default}` - Expansion with default value
///
/// Variable names must start with a letter or underscore and contain only
/// uppercase letters, digits, and underscores.
///
/// # Examples
///
/// ```ignore
/// std::env::set_var("MY_VAR", "value");
/// let result = expand_env_vars("prefix-${MY_VAR}-suffix");
/// assert_eq!(result, "prefix-value-suffix");
///
/// let result = expand_env_vars("${MISSING:-default}");
/// assert_eq!(result, "default");
/// ```
pub(crate) fn expand_env_vars(s: &str) -> String {
    lazy_static::lazy_static! {
        static ref ENV_VAR: regex_lite::Regex =
            regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]+))?\}")
                .expect("env var pattern is valid");
    }

    let mut last_match = 0;
    let mut result = String::with_capacity(s.len());

    for cap in ENV_VAR.captures_iter(s) {
        let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
            continue;
        };

        // Append the text before the match
        result.push_str(&s[last_match..full_match.start()]);

        let value = match std::env::var(var_name.as_str()) {
            Ok(val) => val,
            Err(_) => match cap.get(2) {
                Some(default) => default.as_str().to_string(),
                // No env var and no default. Keep the original placeholder.
                None => full_match.as_str().to_string(),
            },
        };
        result.push_str(&value);

        last_match = full_match.end();
    }

    result.push_str(&s[last_match..]);

    result
}

/// Custom deserializer for strings with environment variable expansion.
fn deserialize_with_env<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: serde::de::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    Ok(expand_env_vars(&s))
}

// ============================================================================
// Validation Helpers
// ============================================================================

/// Validate that a URL starts with http:// or https://
fn is_valid_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub request: RequestConfig,
    /// Maximum number of files uploading at the same time
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Start uploading as soon as a file is submitted
    #[serde(default = "default_true")]
    pub auto_upload: bool,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub resume: ResumeConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub messages: MessagesConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    /// Build a configuration with defaults for everything but the endpoint
    pub fn with_endpoint(endpoint: impl Into<String>) -> Self {
        Self {
            request: RequestConfig::new(endpoint),
            max_connections: default_max_connections(),
            auto_upload: true,
            chunking: ChunkingConfig::default(),
            resume: ResumeConfig::default(),
            retry: RetryConfig::default(),
            validation: ValidationConfig::default(),
            messages: MessagesConfig::default(),
            logging: LoggingConfig::default(),
            metrics: MetricsConfig::default(),
        }
    }

    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_valid_http_url(&self.request.endpoint) {
            return Err(ConfigError::ValidationError(format!(
                "Invalid endpoint '{}': must start with http:// or https://",
                self.request.endpoint
            )));
        }

        if self.request.input_name.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "request.input_name cannot be empty".into(),
            ));
        }

        if self.max_connections == 0 {
            return Err(ConfigError::ValidationError(
                "max_connections must be at least 1".into(),
            ));
        }

        if self.chunking.enabled && self.chunking.part_size == 0 {
            return Err(ConfigError::ValidationError(
                "chunking.part_size must be greater than 0".into(),
            ));
        }

        if self.resume.enabled && self.resume.checkpoint_expiry_days == 0 {
            return Err(ConfigError::ValidationError(
                "resume.checkpoint_expiry_days must be greater than 0".into(),
            ));
        }

        if let Some(ref id) = self.resume.id {
            if id.contains('|') {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid resume id '{}': must not contain '|'",
                    id
                )));
            }
        }

        if self.retry.prevent_retry_response_property.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "retry.prevent_retry_response_property cannot be empty".into(),
            ));
        }

        let validation = &self.validation;
        if validation.size_limit > 0 && validation.min_size_limit > validation.size_limit {
            return Err(ConfigError::ValidationError(format!(
                "validation.min_size_limit ({}) exceeds validation.size_limit ({})",
                validation.min_size_limit, validation.size_limit
            )));
        }

        if let Some(ext) = validation
            .allowed_extensions
            .iter()
            .find(|ext| ext.trim().is_empty() || ext.starts_with('.'))
        {
            return Err(ConfigError::ValidationError(format!(
                "Invalid allowed extension '{}': use the bare extension, e.g. 'jpg'",
                ext
            )));
        }

        match self.logging.format.as_str() {
            "pretty" | "json" => {}
            other => {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid log format '{}': must be 'pretty' or 'json'",
                    other
                )))
            }
        }

        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_max_connections() -> usize {
    3
}

// ============================================================================
// Request Configuration
// ============================================================================

/// Which transport carries file bytes to the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportMode {
    /// Pick the best transport available at runtime
    #[default]
    Auto,
    /// Streamed binary requests (chunking, resume, progress)
    Binary,
    /// Whole-file multipart form submission
    Form,
}

/// Upload request configuration.
///
/// # Example
///
/// ```yaml
/// request:
///   endpoint: "${UPLOAD_ENDPOINT:-https://cms.example.com/api/v2/files/}"
///   input_name: "qqfile"
///   params:
///     title: "holiday"
///   custom_headers:
///     X-CSRFToken: "${CSRF_TOKEN}"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestConfig {
    /// Upload endpoint URL. Supports ${VAR} and ${VAR:-default} expansion.
    #[serde(deserialize_with = "deserialize_with_env")]
    pub endpoint: String,

    #[serde(default)]
    pub transport: TransportMode,

    /// Field (or query parameter) name carrying the file. Default: "qqfile"
    #[serde(default = "default_input_name")]
    pub input_name: String,

    /// Always send a multipart body, even when params go in the query string
    #[serde(default = "default_true")]
    pub force_multipart: bool,

    /// Send params as multipart fields instead of the query string
    #[serde(default)]
    pub params_in_body: bool,

    /// Use GET instead of POST (for demo servers)
    #[serde(default)]
    pub demo_mode: bool,

    #[serde(default = "default_uuid_name")]
    pub uuid_name: String,

    #[serde(default = "default_total_file_size_name")]
    pub total_file_size_name: String,

    /// Params sent with every file unless overridden per file
    #[serde(default)]
    pub params: BTreeMap<String, String>,

    #[serde(default)]
    pub custom_headers: BTreeMap<String, String>,

    /// Per-request timeout. Unset means a stalled request holds its slot forever.
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
}

impl RequestConfig {
    /// Request configuration with defaults for the given endpoint
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            transport: TransportMode::default(),
            input_name: default_input_name(),
            force_multipart: true,
            params_in_body: false,
            demo_mode: false,
            uuid_name: default_uuid_name(),
            total_file_size_name: default_total_file_size_name(),
            params: BTreeMap::new(),
            custom_headers: BTreeMap::new(),
            timeout_seconds: None,
        }
    }

    /// Whether requests carry a multipart body
    pub fn multipart(&self) -> bool {
        self.force_multipart || self.params_in_body
    }
}

fn default_input_name() -> String {
    "qqfile".to_string()
}

fn default_uuid_name() -> String {
    "qquuid".to_string()
}

fn default_total_file_size_name() -> String {
    "qqtotalfilesize".to_string()
}

// ============================================================================
// Chunking / Resume / Retry
// ============================================================================

/// Chunked upload configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkingConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Chunk size in bytes. Default: 2000000
    #[serde(default = "default_part_size")]
    pub part_size: u64,
    #[serde(default)]
    pub param_names: ChunkParamNames,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            part_size: default_part_size(),
            param_names: ChunkParamNames::default(),
        }
    }
}

fn default_part_size() -> u64 {
    2_000_000
}

/// Request parameter names carrying chunk metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkParamNames {
    pub part_index: String,
    pub part_byte_offset: String,
    pub chunk_size: String,
    pub total_parts: String,
    pub filename: String,
}

impl Default for ChunkParamNames {
    fn default() -> Self {
        Self {
            part_index: "qqpartindex".to_string(),
            part_byte_offset: "qqpartbyteoffset".to_string(),
            chunk_size: "qqchunksize".to_string(),
            total_parts: "qqtotalparts".to_string(),
            filename: "qqfilename".to_string(),
        }
    }
}

/// Resume configuration.
///
/// Resume only applies when chunking is enabled and the active transport
/// supports chunking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResumeConfig {
    #[serde(default)]
    pub enabled: bool,
    /// Optional session id appended to checkpoint keys
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default = "default_checkpoint_expiry_days")]
    pub checkpoint_expiry_days: u32,
    /// JSON file holding checkpoints. In-memory when unset.
    #[serde(default)]
    pub store_path: Option<PathBuf>,
    #[serde(default)]
    pub param_names: ResumeParamNames,
}

impl Default for ResumeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            id: None,
            checkpoint_expiry_days: default_checkpoint_expiry_days(),
            store_path: None,
            param_names: ResumeParamNames::default(),
        }
    }
}

fn default_checkpoint_expiry_days() -> u32 {
    7
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResumeParamNames {
    pub resuming: String,
}

impl Default for ResumeParamNames {
    fn default() -> Self {
        Self {
            resuming: "qqresume".to_string(),
        }
    }
}

/// Retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default)]
    pub enable_auto: bool,
    #[serde(default = "default_max_auto_attempts")]
    pub max_auto_attempts: u32,
    #[serde(default = "default_auto_attempt_delay")]
    pub auto_attempt_delay_seconds: u64,
    /// Response property that forbids any further retry for the file
    #[serde(default = "default_prevent_retry_property")]
    pub prevent_retry_response_property: String,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enable_auto: false,
            max_auto_attempts: default_max_auto_attempts(),
            auto_attempt_delay_seconds: default_auto_attempt_delay(),
            prevent_retry_response_property: default_prevent_retry_property(),
        }
    }
}

fn default_max_auto_attempts() -> u32 {
    3
}

fn default_auto_attempt_delay() -> u64 {
    5
}

fn default_prevent_retry_property() -> String {
    "preventRetry".to_string()
}

// ============================================================================
// Validation / Messages
// ============================================================================

/// File validation rules applied before anything is sent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Allowed extensions without the leading dot. Empty allows everything.
    #[serde(default)]
    pub allowed_extensions: Vec<String>,
    /// Maximum size in bytes, 0 for unlimited
    #[serde(default)]
    pub size_limit: u64,
    #[serde(default)]
    pub min_size_limit: u64,
    #[serde(default = "default_true")]
    pub stop_on_first_invalid_file: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            allowed_extensions: Vec::new(),
            size_limit: 0,
            min_size_limit: 0,
            stop_on_first_invalid_file: true,
        }
    }
}

/// Validation error message templates.
///
/// Placeholders: `{file}`, `{extensions}`, `{sizeLimit}`, `{minSizeLimit}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MessagesConfig {
    pub type_error: String,
    pub size_error: String,
    pub min_size_error: String,
    pub empty_error: String,
    pub no_files_error: String,
}

impl Default for MessagesConfig {
    fn default() -> Self {
        Self {
            type_error: "{file} has an invalid extension. Valid extension(s): {extensions}."
                .to_string(),
            size_error: "{file} is too large, maximum file size is {sizeLimit}.".to_string(),
            min_size_error: "{file} is too small, minimum file size is {minSizeLimit}."
                .to_string(),
            empty_error: "{file} is empty, please select files again without it.".to_string(),
            no_files_error: "No files to upload.".to_string(),
        }
    }
}

// ============================================================================
// Logging / Metrics
// ============================================================================

/// Log output configuration. `RUST_LOG` takes precedence over `level`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// "pretty" or "json"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}
