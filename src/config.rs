use anyhow::{Context, Result, bail};
use clap::Parser;
use std::{env, fmt, path::PathBuf, str::FromStr, time::Duration};

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub log_dir: PathBuf,
    pub extension: Option<String>,
    pub concurrency: usize,
    pub deadline: Duration,
    pub shutdown_grace: Duration,
    pub source: EndpointConfig,
    pub destination: EndpointConfig,
}

/// Connection settings for one storage endpoint.
#[derive(Debug, Clone, PartialEq)]
pub struct EndpointConfig {
    pub bucket: String,
    pub region: String,
    pub credentials: Option<StaticCredentials>,
    pub endpoint_url: Option<String>,
    pub force_path_style: bool,
}

/// Explicit access keys. `Debug` never prints the secrets.
#[derive(Clone, PartialEq)]
pub struct StaticCredentials {
    pub access_key_id: String,
    pub secret_access_key: String,
    pub session_token: Option<String>,
}

impl fmt::Debug for StaticCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticCredentials")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field(
                "session_token",
                &self.session_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Bulk prefix copy between two S3 buckets")]
pub struct Args {
    /// Host to bind to (overrides HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Directory for success.log and error.log (overrides LOG_DIR)
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Extension applied to destination keys (overrides CUSTOM_FILE_EXTENSION)
    #[arg(long)]
    pub extension: Option<String>,

    /// Maximum concurrent object transfers per run (overrides COPY_CONCURRENCY)
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Wall-clock limit for a single run, in seconds (overrides COPY_DEADLINE_SECS)
    #[arg(long)]
    pub deadline_secs: Option<u64>,
}

const DEFAULT_REGION: &str = "us-east-1";

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig.
    pub fn from_env_and_args() -> Result<Self> {
        let args = Args::parse();
        Self::resolve(args, |key| env::var(key).ok())
    }

    /// Merge `args` over values produced by `lookup`.
    ///
    /// Empty environment values count as unset.
    pub fn resolve(args: Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        // --- Environment fallback ---
        let env_host = var("HOST").unwrap_or_else(|| "0.0.0.0".into());
        let env_port = parse_var(&var, "PORT")?.unwrap_or(8080);
        let env_log_dir = var("LOG_DIR").unwrap_or_else(|| "./logs".into());
        let env_concurrency = parse_var(&var, "COPY_CONCURRENCY")?.unwrap_or(16);
        let env_deadline = parse_var(&var, "COPY_DEADLINE_SECS")?.unwrap_or(3600);
        let shutdown_grace = parse_var(&var, "SHUTDOWN_GRACE_SECS")?.unwrap_or(10);

        // --- Merge ---
        let concurrency: usize = args.concurrency.unwrap_or(env_concurrency);
        if concurrency == 0 {
            bail!("copy concurrency must be at least 1");
        }
        let deadline_secs: u64 = args.deadline_secs.unwrap_or(env_deadline);
        if deadline_secs == 0 {
            bail!("copy deadline must be at least 1 second");
        }

        let extension = args
            .extension
            .or_else(|| var("CUSTOM_FILE_EXTENSION"))
            .filter(|ext| !ext.trim_start_matches('.').is_empty());

        Ok(Self {
            host: args.host.unwrap_or(env_host),
            port: args.port.unwrap_or(env_port),
            log_dir: args.log_dir.unwrap_or_else(|| env_log_dir.into()),
            extension,
            concurrency,
            deadline: Duration::from_secs(deadline_secs),
            shutdown_grace: Duration::from_secs(shutdown_grace),
            source: EndpointConfig::from_vars("SOURCE", &var)?,
            destination: EndpointConfig::from_vars("DESTINATION", &var)?,
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl EndpointConfig {
    /// Read `{side}_BUCKET_NAME`, `{side}_AWS_*` and friends.
    fn from_vars(side: &str, var: &impl Fn(&str) -> Option<String>) -> Result<Self> {
        let key = |suffix: &str| format!("{side}_{suffix}");

        let bucket = var(&key("BUCKET_NAME"))
            .with_context(|| format!("{} must be set", key("BUCKET_NAME")))?;

        let credentials = match (
            var(&key("AWS_ACCESS_KEY_ID")),
            var(&key("AWS_SECRET_ACCESS_KEY")),
        ) {
            (Some(access_key_id), Some(secret_access_key)) => Some(StaticCredentials {
                access_key_id,
                secret_access_key,
                session_token: var(&key("AWS_SESSION_TOKEN")),
            }),
            (Some(_), None) => bail!(
                "{} is set but {} is missing",
                key("AWS_ACCESS_KEY_ID"),
                key("AWS_SECRET_ACCESS_KEY")
            ),
            (None, _) => None,
        };

        Ok(Self {
            bucket,
            region: var(&key("AWS_REGION")).unwrap_or_else(|| DEFAULT_REGION.into()),
            credentials,
            endpoint_url: var(&key("AWS_ENDPOINT_URL")),
            force_path_style: parse_var(var, &key("FORCE_PATH_STYLE"))?.unwrap_or(false),
        })
    }
}

fn parse_var<T>(var: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    var(key)
        .map(|value| {
            value
                .trim()
                .parse::<T>()
                .with_context(|| format!("parsing {key} value `{value}`"))
        })
        .transpose()
}
