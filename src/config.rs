use crate::object_store::S3Settings;
use anyhow::{Context, Result, bail};
use clap::{Parser, ValueEnum};
use std::{env, fmt};

/// Which object store backs the file service.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    /// Any S3-compatible endpoint (MinIO, AWS, ...).
    S3,
    /// Sharded directory tree on local disk.
    Local,
}

impl StorageBackend {
    fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "s3" | "minio" => Ok(Self::S3),
            "local" | "disk" => Ok(Self::Local),
            other => bail!("unknown STORAGE_BACKEND `{}` (expected `s3` or `local`)", other),
        }
    }
}

/// Centralized application configuration.
/// Combines environment variables and CLI arguments.
#[derive(Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database_url: String,
    pub max_connections: u32,

    pub storage_backend: StorageBackend,
    pub s3: S3Settings,
    pub local_storage_dir: String,
    /// Externally reachable base URL, used in locally signed URLs.
    pub public_base_url: String,
    pub presign_secret: Option<String>,

    pub preview_base_url: String,
    pub static_file_path: Option<String>,
    pub cors_allow_origin: Option<String>,
}

impl fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database_url", &self.database_url)
            .field("max_connections", &self.max_connections)
            .field("storage_backend", &self.storage_backend)
            .field("s3", &self.s3)
            .field("local_storage_dir", &self.local_storage_dir)
            .field("public_base_url", &self.public_base_url)
            .field(
                "presign_secret",
                &self.presign_secret.as_ref().map(|_| "<redacted>"),
            )
            .field("preview_base_url", &self.preview_base_url)
            .field("static_file_path", &self.static_file_path)
            .field("cors_allow_origin", &self.cors_allow_origin)
            .finish()
    }
}

/// Command-line + environment configuration.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Cloud drive file and user API")]
pub struct Args {
    /// Host to bind to (overrides CLOUD_DRIVE_HOST)
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to (overrides CLOUD_DRIVE_PORT / PORT)
    #[arg(long)]
    pub port: Option<u16>,

    /// Database URL (overrides CLOUD_DRIVE_DATABASE_URL)
    #[arg(long)]
    pub database_url: Option<String>,

    /// Object store backend (overrides STORAGE_BACKEND)
    #[arg(long, value_enum)]
    pub storage_backend: Option<StorageBackend>,

    /// Root directory of the local backend (overrides LOCAL_STORAGE_DIR)
    #[arg(long)]
    pub local_storage_dir: Option<String>,

    /// Run migrations and exit
    #[arg(long)]
    pub migrate: bool,
}

impl AppConfig {
    /// Parse environment variables + CLI args into AppConfig and migrate flag.
    pub fn from_env_and_args() -> Result<(Self, bool)> {
        let args = Args::parse();
        let cfg = Self::resolve(&args, |key| env::var(key).ok())?;
        Ok((cfg, args.migrate))
    }

    /// Merge `args` over values read through `lookup`.
    fn resolve(args: &Args, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let port = match args.port {
            Some(port) => port,
            None => match lookup("CLOUD_DRIVE_PORT").or_else(|| lookup("PORT")) {
                Some(value) => value
                    .trim()
                    .parse::<u16>()
                    .with_context(|| format!("parsing port value `{}`", value))?,
                None => 8080,
            },
        };

        let storage_backend = match args.storage_backend {
            Some(backend) => backend,
            None => match lookup("STORAGE_BACKEND") {
                Some(value) => StorageBackend::parse(&value)?,
                None => StorageBackend::S3,
            },
        };

        let use_ssl = match lookup("MINIO_USE_SSL") {
            Some(value) => parse_bool(&value)
                .with_context(|| format!("parsing MINIO_USE_SSL value `{}`", value))?,
            None => false,
        };

        let max_connections = match lookup("CLOUD_DRIVE_MAX_CONNECTIONS") {
            Some(value) => value
                .trim()
                .parse::<u32>()
                .with_context(|| format!("parsing CLOUD_DRIVE_MAX_CONNECTIONS value `{}`", value))?,
            None => 100,
        };

        let host = args
            .host
            .clone()
            .unwrap_or_else(|| var("CLOUD_DRIVE_HOST", "0.0.0.0"));

        Ok(Self {
            public_base_url: lookup("PUBLIC_BASE_URL")
                .unwrap_or_else(|| format!("http://127.0.0.1:{}", port)),
            host,
            port,
            database_url: args
                .database_url
                .clone()
                .unwrap_or_else(|| var("CLOUD_DRIVE_DATABASE_URL", "sqlite://./data/meta/cloud_drive.db")),
            max_connections,
            storage_backend,
            s3: S3Settings {
                endpoint: var("MINIO_ENDPOINT", "localhost:9000"),
                access_key: var("MINIO_ACCESS_KEY", "minioadmin"),
                secret_key: var("MINIO_SECRET_KEY", "minioadmin"),
                use_ssl,
                region: var("MINIO_REGION", "us-east-1"),
            },
            local_storage_dir: args
                .local_storage_dir
                .clone()
                .unwrap_or_else(|| var("LOCAL_STORAGE_DIR", "./data/objects")),
            presign_secret: lookup("PRESIGN_SECRET").filter(|s| !s.is_empty()),
            preview_base_url: var("PREVIEW_BASE_URL", "http://127.0.0.1:8012/onlinePreview"),
            static_file_path: lookup("STATIC_FILE_PATH").filter(|s| !s.is_empty()),
            cors_allow_origin: lookup("CORS_ALLOW_ORIGIN").filter(|s| !s.is_empty()),
        })
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => bail!("`{}` is not a boolean", other),
    }
}
