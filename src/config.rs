use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{env, fmt::Display, path::PathBuf, str::FromStr, time::Duration};

const ENV_PREFIX: &str = "TEMPDROP_";

/// Centralized application configuration.
/// Combines environment variables and CLI arguments; built once in `main`
/// and handed to every component.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    /// Public base URL used in log output; empty means "same host".
    pub public_host: String,
    pub database_url: String,
    pub max_upload_size_mb: u64,
    /// TTL applied when the client sends none.
    pub default_ttl: Duration,
    /// Upper bound for client-supplied TTLs.
    pub max_ttl: Duration,
    /// Files living shorter than this are not scanned.
    pub scan_skip_ttl: Duration,
    /// Largest object the buffering preview flows will load.
    pub preview_max_bytes: u64,
    pub storage: StorageConfig,
    pub rate_limit: RateLimitConfig,
    pub scanner: ScannerConfig,
    pub reaper: ReaperConfig,
    /// Delay between the end of a burn-after-read download and deletion.
    pub burn_grace: Duration,
    pub cors_allowed_origins: Vec<String>,
}

/// Which storage backend holds file payloads.
#[derive(Debug, Clone)]
pub enum StorageConfig {
    Local { path: PathBuf },
    S3(S3Config),
    WebDav(WebDavConfig),
}

#[derive(Debug, Clone, Default)]
pub struct S3Config {
    pub endpoint: Option<String>,
    pub region: Option<String>,
    pub bucket: String,
    pub prefix: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub use_path_style: bool,
}

#[derive(Debug, Clone, Default)]
pub struct WebDavConfig {
    pub url: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub requests: u32,
    pub window: Duration,
    /// Take the client address from `X-Forwarded-For` / `X-Real-IP`.
    pub trust_forwarded_headers: bool,
}

#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// clamd address: `tcp://host:port`, `host:port`, `unix:///path` or a socket path.
    pub clamd_address: Option<String>,
    pub connect_retries: u32,
    pub retry_delay: Duration,
    /// Upper bound on one INSTREAM exchange, connect through reply.
    pub scan_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ReaperConfig {
    pub interval: Duration,
    pub batch_size: u32,
    /// Claimed burn-after-read rows older than this are collected.
    pub stale_claim_after: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            requests: 30,
            window: Duration::from_secs(10 * 60),
            trust_forwarded_headers: false,
        }
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            clamd_address: None,
            connect_retries: 5,
            retry_delay: Duration::from_secs(5),
            scan_timeout: Duration::from_secs(60),
        }
    }
}

impl Default for ReaperConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10 * 60),
            batch_size: 100,
            stale_claim_after: Duration::from_secs(10 * 60),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".into(),
            port: 8080,
            public_host: String::new(),
            database_url: "sqlite://./data/tempdrop.db".into(),
            max_upload_size_mb: 1024,
            default_ttl: Duration::from_secs(7 * 24 * 60 * 60),
            max_ttl: Duration::from_secs(30 * 24 * 60 * 60),
            scan_skip_ttl: Duration::from_secs(24 * 60 * 60),
            preview_max_bytes: 20 * 1024 * 1024,
            storage: StorageConfig::Local {
                path: PathBuf::from("./data/files"),
            },
            rate_limit: RateLimitConfig::default(),
            scanner: ScannerConfig::default(),
            reaper: ReaperConfig::default(),
            burn_grace: Duration::from_secs(2),
            cors_allowed_origins: Vec::new(),
        }
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug)]
#[command(author, version, about = "Ephemeral end-to-end encrypted file drop")]
pub struct Args {
    /// Host to bind to (overrides TEMPDROP_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides TEMPDROP_PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides TEMPDROP_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Storage backend: local, s3 or webdav (overrides TEMPDROP_STORAGE_TYPE)
    #[arg(long)]
    pub storage_type: Option<String>,

    /// Directory for the local backend (overrides TEMPDROP_STORAGE_LOCAL_PATH)
    #[arg(long)]
    pub storage_dir: Option<PathBuf>,

    /// Maximum upload size in MiB (overrides TEMPDROP_MAX_UPLOAD_SIZE_MB)
    #[arg(long)]
    pub max_upload_size_mb: Option<u64>,

    /// clamd address (overrides TEMPDROP_CLAMD_ADDRESS)
    #[arg(long)]
    pub clamd_address: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let cfg = Self::from_env_with(args.overrides())?;
        Ok((cfg, args.migrate))
    }

    /// Build the configuration from environment variables, applying CLI overrides on top.
    pub fn from_env_with(overrides: Overrides) -> Result<Self> {
        let defaults = Self::default();

        let storage_type = overrides
            .storage_type
            .or_else(|| env_string("STORAGE_TYPE"))
            .unwrap_or_else(|| "local".into());
        let storage = match storage_type.to_ascii_lowercase().as_str() {
            "local" => StorageConfig::Local {
                path: overrides
                    .storage_dir
                    .or_else(|| env_string("STORAGE_LOCAL_PATH").map(PathBuf::from))
                    .unwrap_or_else(|| PathBuf::from("./data/files")),
            },
            "s3" => StorageConfig::S3(S3Config {
                endpoint: env_string("STORAGE_S3_ENDPOINT"),
                region: env_string("STORAGE_S3_REGION"),
                bucket: env_string("STORAGE_S3_BUCKET")
                    .context("TEMPDROP_STORAGE_S3_BUCKET is required for the s3 backend")?,
                prefix: env_string("STORAGE_S3_PREFIX"),
                access_key_id: env_string("STORAGE_S3_ACCESS_KEY_ID"),
                secret_access_key: env_string("STORAGE_S3_SECRET_ACCESS_KEY"),
                use_path_style: env_parse("STORAGE_S3_USE_PATH_STYLE", true)?,
            }),
            "webdav" => StorageConfig::WebDav(WebDavConfig {
                url: env_string("STORAGE_WEBDAV_URL")
                    .context("TEMPDROP_STORAGE_WEBDAV_URL is required for the webdav backend")?,
                username: env_string("STORAGE_WEBDAV_USERNAME"),
                password: env_string("STORAGE_WEBDAV_PASSWORD"),
            }),
            other => bail!("unsupported storage type `{}`", other),
        };

        let rate_limit = RateLimitConfig {
            enabled: env_parse("RATE_LIMIT_ENABLED", defaults.rate_limit.enabled)?,
            requests: env_parse("RATE_LIMIT_REQUESTS", defaults.rate_limit.requests)?,
            window: Duration::from_secs(
                env_parse::<u64>("RATE_LIMIT_WINDOW_MINUTES", 10)? * 60,
            ),
            trust_forwarded_headers: env_parse("RATE_LIMIT_TRUST_FORWARDED_HEADERS", false)?,
        };
        if rate_limit.enabled && (rate_limit.requests == 0 || rate_limit.window.is_zero()) {
            bail!("rate limit requests and window must be positive when enabled");
        }

        let scanner = ScannerConfig {
            clamd_address: overrides
                .clamd_address
                .or_else(|| env_string("CLAMD_ADDRESS")),
            connect_retries: env_parse("CLAMD_CONNECT_RETRIES", defaults.scanner.connect_retries)?,
            retry_delay: Duration::from_secs(env_parse("CLAMD_RETRY_DELAY_SECS", 5)?),
            scan_timeout: Duration::from_secs(env_parse("CLAMD_SCAN_TIMEOUT_SECS", 60)?),
        };
        if scanner.scan_timeout.is_zero() {
            bail!("clamd scan timeout must be positive");
        }

        let reaper = ReaperConfig {
            interval: Duration::from_secs(env_parse("REAPER_INTERVAL_SECS", 600)?),
            batch_size: env_parse("REAPER_BATCH_SIZE", defaults.reaper.batch_size)?,
            stale_claim_after: Duration::from_secs(env_parse("REAPER_STALE_CLAIM_SECS", 600)?),
        };

        let cors_allowed_origins = env_string("CORS_ALLOWED_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            host: overrides
                .host
                .or_else(|| env_string("HOST"))
                .unwrap_or(defaults.host),
            port: match overrides.port {
                Some(port) => port,
                None => env_parse("PORT", defaults.port)?,
            },
            public_host: env_string("PUBLIC_HOST").unwrap_or_default(),
            database_url: overrides
                .database_url
                .or_else(|| env_string("DATABASE_URL"))
                .unwrap_or(defaults.database_url),
            max_upload_size_mb: match overrides.max_upload_size_mb {
                Some(mb) => mb,
                None => env_parse("MAX_UPLOAD_SIZE_MB", defaults.max_upload_size_mb)?,
            },
            default_ttl: Duration::from_secs(env_parse(
                "DEFAULT_TTL_SECS",
                defaults.default_ttl.as_secs(),
            )?),
            max_ttl: Duration::from_secs(env_parse("MAX_TTL_SECS", defaults.max_ttl.as_secs())?),
            scan_skip_ttl: Duration::from_secs(env_parse(
                "SCAN_SKIP_TTL_SECS",
                defaults.scan_skip_ttl.as_secs(),
            )?),
            preview_max_bytes: env_parse("PREVIEW_MAX_BYTES", defaults.preview_max_bytes)?,
            storage,
            rate_limit,
            scanner,
            reaper,
            burn_grace: Duration::from_millis(env_parse("BURN_GRACE_MS", 2000)?),
            cors_allowed_origins,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_size_mb.saturating_mul(1024 * 1024)
    }
}

/// Values supplied on the command line; each one wins over its environment variable.
#[derive(Debug, Default)]
pub struct Overrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database_url: Option<String>,
    pub storage_type: Option<String>,
    pub storage_dir: Option<PathBuf>,
    pub max_upload_size_mb: Option<u64>,
    pub clamd_address: Option<String>,
}

impl Args {
    fn overrides(&self) -> Overrides {
        Overrides {
            host: self.host.clone(),
            port: self.port,
            database_url: self.database_url.clone(),
            storage_type: self.storage_type.clone(),
            storage_dir: self.storage_dir.clone(),
            max_upload_size_mb: self.max_upload_size_mb,
            clamd_address: self.clamd_address.clone(),
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}{key}"))
        .ok()
        .filter(|v| !v.trim().is_empty())
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    let name = format!("{ENV_PREFIX}{key}");
    match env::var(&name) {
        Ok(value) if value.trim().is_empty() => Ok(default),
        Ok(value) => value
            .trim()
            .parse::<T>()
            .map_err(|err| anyhow::anyhow!("{}", err))
            .with_context(|| format!("parsing {} value `{}`", name, value)),
        Err(env::VarError::NotPresent) => Ok(default),
        Err(err) => Err(err).with_context(|| format!("reading {}", name)),
    }
}
