use std::env;
use std::path::PathBuf;

/// Default upload limit for photo posts (16 MiB).
const DEFAULT_MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub server_host: String,
    pub server_port: u16,
    pub jwt_secret: String,
    pub token_ttl_hours: i64,
    pub upload_dir: PathBuf,
    pub max_upload_bytes: usize,
    pub admin: Option<AdminBootstrap>,
    pub r2: Option<R2Config>,
}

/// Credentials for the admin account created when the users table is empty.
/// Only configured when `ADMIN_PASSWORD` is set.
#[derive(Clone, Debug)]
pub struct AdminBootstrap {
    pub username: String,
    pub email: String,
    pub password: String,
}

impl AdminBootstrap {
    pub fn from_parts(
        username: Option<String>,
        email: Option<String>,
        password: Option<String>,
    ) -> Option<Self> {
        let password = password.filter(|p| !p.is_empty())?;
        Some(Self {
            username: username.unwrap_or_else(|| "admin".to_string()),
            email: email.unwrap_or_else(|| "admin@example.com".to_string()),
            password,
        })
    }
}

#[derive(Clone, Debug)]
pub struct R2Config {
    pub bucket: String,
    pub account_id: String,
    pub access_key: String,
    pub secret_key: String,
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        dotenvy::dotenv().ok();

        let r2 = match env::var("R2_BUCKET") {
            Ok(bucket) => Some(R2Config {
                bucket,
                account_id: env::var("R2_ACCOUNT_ID")?,
                access_key: env::var("R2_ACCESS_KEY")?,
                secret_key: env::var("R2_SECRET_KEY")?,
            }),
            Err(_) => None,
        };

        Ok(Config {
            database_url: env::var("DATABASE_URL")?,
            server_host: env::var("SERVER_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            server_port: env::var("SERVER_PORT")
                .unwrap_or_else(|_| "5000".to_string())
                .parse()
                .unwrap_or(5000),
            jwt_secret: env::var("JWT_SECRET")?,
            token_ttl_hours: env::var("TOKEN_TTL_HOURS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(24),
            upload_dir: env::var("UPLOAD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data/uploads")),
            max_upload_bytes: env::var("MAX_UPLOAD_BYTES")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAX_UPLOAD_BYTES),
            admin: AdminBootstrap::from_parts(
                env::var("ADMIN_USERNAME").ok(),
                env::var("ADMIN_EMAIL").ok(),
                env::var("ADMIN_PASSWORD").ok(),
            ),
            r2,
        })
    }

    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server_host, self.server_port)
    }
}
