use std::env;
use std::fmt::Display;
use std::str::FromStr;

use url::Url;

const DEFAULT_PUBLIC_BASE_URL: &str = "http://localhost:8080/";
const DEFAULT_DATABASE_MAX_CONNECTIONS: &str = "20";
const DEFAULT_STORE_TIMEOUT_MILLIS: &str = "300";
const DEFAULT_TRUST_PROXY_HEADERS: &str = "false";

/// Service configuration read from the environment.
///
/// | Env Var                    | Default                  |
/// |----------------------------|--------------------------|
/// | `SERVER_ADDRESS`           | required                 |
/// | `ENCRYPTED_API_KEY`        | required                 |
/// | `DATABASE_URL`             | unset: in-memory store   |
/// | `PUBLIC_BASE_URL`          | `http://localhost:8080/` |
/// | `DATABASE_MAX_CONNECTIONS` | `20`                     |
/// | `STORE_TIMEOUT_MILLIS`     | `300`                    |
/// | `TRUST_PROXY_HEADERS`      | `false`                  |
#[derive(Debug, Clone)]
pub struct Config {
    pub server_address: String,
    /// Hex encoded SHA3-256 of the management API key.
    pub api_key_hash: String,
    pub database_url: Option<String>,
    pub public_base_url: Url,
    pub database_max_connections: u32,
    pub store_timeout_millis: u64,
    /// Take the visitor IP from `X-Forwarded-For`/`X-Real-IP` instead of the
    /// socket peer. Only safe behind a proxy that overwrites these headers.
    pub trust_proxy_headers: bool,
}

impl Config {
    pub fn from_env() -> Self {
        let public_base_url = get_env_or("PUBLIC_BASE_URL", DEFAULT_PUBLIC_BASE_URL);
        Self {
            server_address: get_env("SERVER_ADDRESS"),
            api_key_hash: get_env("ENCRYPTED_API_KEY").to_lowercase(),
            database_url: env::var("DATABASE_URL").ok().filter(|url| !url.is_empty()),
            public_base_url: Url::parse(&public_base_url)
                .expect("PUBLIC_BASE_URL must be an absolute url"),
            database_max_connections: parse_env(
                "DATABASE_MAX_CONNECTIONS",
                DEFAULT_DATABASE_MAX_CONNECTIONS,
            ),
            store_timeout_millis: parse_env("STORE_TIMEOUT_MILLIS", DEFAULT_STORE_TIMEOUT_MILLIS),
            trust_proxy_headers: parse_env("TRUST_PROXY_HEADERS", DEFAULT_TRUST_PROXY_HEADERS),
        }
    }
}

pub fn get_env(name: &str) -> String {
    env::var(name).unwrap_or_else(|_| panic!("Environment variable {} is required", name))
}

fn get_env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| {
        tracing::info!("{name} not set, using default: {default}");
        default.to_string()
    })
}

fn parse_env<T: FromStr>(name: &str, default: &str) -> T
where
    T::Err: Display,
{
    get_env_or(name, default)
        .parse()
        .unwrap_or_else(|err| panic!("Invalid {name} value: {err}"))
}
