use anyhow::{Context, Result};
use dotenvy::dotenv;
use ipnet::IpNet;
use std::env;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::middleware::request_logger::RequestLogConfig;

/// Callback origins published by the provider. Overridable through
/// `MPESA_ALLOWED_IPS` when the provider rotates its addresses.
pub const DEFAULT_PROVIDER_IPS: &[&str] = &[
    "196.201.214.200",
    "196.201.214.206",
    "196.201.213.114",
    "196.201.214.207",
    "196.201.214.208",
    "196.201.213.44",
    "196.201.212.127",
    "196.201.212.128",
    "196.201.212.129",
    "196.201.212.136",
    "196.201.212.74",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Production,
    Development,
    Test,
}

impl Environment {
    pub fn is_production(&self) -> bool {
        matches!(self, Environment::Production)
    }
}

impl FromStr for Environment {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "production" | "prod" => Ok(Environment::Production),
            "development" | "dev" => Ok(Environment::Development),
            "test" => Ok(Environment::Test),
            other => anyhow::bail!("unknown APP_ENV '{}'", other),
        }
    }
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Environment::Production => "production",
            Environment::Development => "development",
            Environment::Test => "test",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AllowedIps {
    Any,
    Cidrs(Vec<IpNet>),
}

impl AllowedIps {
    pub fn contains(&self, ip: &IpAddr) -> bool {
        match self {
            AllowedIps::Any => true,
            AllowedIps::Cidrs(cidrs) => cidrs.iter().any(|cidr| cidr.contains(ip)),
        }
    }

    pub fn provider_default() -> Self {
        AllowedIps::Cidrs(
            DEFAULT_PROVIDER_IPS
                .iter()
                .filter_map(|ip| ip.parse::<IpAddr>().ok())
                .map(IpNet::from)
                .collect(),
        )
    }
}

/// Credentials and endpoints for the outbound gateway client.
#[derive(Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub consumer_key: String,
    pub consumer_secret: String,
    pub shortcode: String,
    pub passkey: String,
    pub initiator_name: String,
    pub security_credential: String,
    /// Public base URL the provider calls back on.
    pub callback_base_url: String,
    pub callback_secret: Option<String>,
    pub token_ttl: Duration,
    pub http_timeout: Duration,
}

impl fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("base_url", &self.base_url)
            .field("consumer_key", &"****")
            .field("consumer_secret", &"****")
            .field("shortcode", &self.shortcode)
            .field("passkey", &"****")
            .field("initiator_name", &self.initiator_name)
            .field("security_credential", &"****")
            .field("callback_base_url", &self.callback_base_url)
            .field("callback_secret", &self.callback_secret.as_ref().map(|_| "****"))
            .field("token_ttl", &self.token_ttl)
            .field("http_timeout", &self.http_timeout)
            .finish()
    }
}

/// Inputs of the inbound callback gate.
#[derive(Clone)]
pub struct CallbackGateConfig {
    pub allowed_ips: AllowedIps,
    /// Origin filtering only runs when set; the token check always runs.
    pub enforce_origin: bool,
    pub secret: Option<String>,
}

impl fmt::Debug for CallbackGateConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackGateConfig")
            .field("allowed_ips", &self.allowed_ips)
            .field("enforce_origin", &self.enforce_origin)
            .field("secret", &self.secret.as_ref().map(|_| "****"))
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub server_port: u16,
    pub environment: Environment,
    pub account_currency: String,
    pub reservation_stale_after: Duration,
    pub reconcile_interval: Duration,
    pub request_log: RequestLogConfig,
    pub gateway: GatewayConfig,
    pub callback_gate: CallbackGateConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok(); // Load .env file if present
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| -> Result<String> {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .with_context(|| format!("{} is required", key))
        };
        let secs = |key: &str, default: u64| -> Result<Duration> {
            let raw = lookup(key).unwrap_or_else(|| default.to_string());
            let value = raw
                .trim()
                .parse::<u64>()
                .with_context(|| format!("{} must be a whole number of seconds", key))?;
            Ok(Duration::from_secs(value))
        };

        let environment = lookup("APP_ENV")
            .unwrap_or_else(|| "development".to_string())
            .parse::<Environment>()?;

        let callback_secret = lookup("MPESA_CALLBACK_SECRET").filter(|s| !s.is_empty());

        let allowed_ips = match lookup("MPESA_ALLOWED_IPS") {
            Some(raw) => parse_allowed_ips(&raw)?,
            None => AllowedIps::provider_default(),
        };

        let gateway = GatewayConfig {
            base_url: lookup("MPESA_BASE_URL")
                .unwrap_or_else(|| "https://sandbox.safaricom.co.ke".to_string()),
            consumer_key: required("MPESA_CONSUMER_KEY")?,
            consumer_secret: required("MPESA_CONSUMER_SECRET")?,
            shortcode: required("MPESA_SHORTCODE")?,
            passkey: required("MPESA_PASSKEY")?,
            initiator_name: required("MPESA_INITIATOR_NAME")?,
            security_credential: required("MPESA_SECURITY_CREDENTIAL")?,
            callback_base_url: required("CALLBACK_BASE_URL")?,
            callback_secret: callback_secret.clone(),
            token_ttl: secs("MPESA_TOKEN_TTL_SECS", 3300)?,
            http_timeout: secs("MPESA_HTTP_TIMEOUT_SECS", 30)?,
        };

        url::Url::parse(&gateway.callback_base_url).context("CALLBACK_BASE_URL must be a URL")?;

        Ok(Config {
            server_port: lookup("SERVER_PORT")
                .unwrap_or_else(|| "3000".to_string())
                .parse()
                .context("SERVER_PORT must be a port number")?,
            environment,
            account_currency: lookup("ACCOUNT_CURRENCY").unwrap_or_else(|| "KES".to_string()),
            reservation_stale_after: secs("RESERVATION_STALE_AFTER_SECS", 900)?,
            reconcile_interval: secs("RECONCILE_INTERVAL_SECS", 60)?,
            request_log: RequestLogConfig {
                log_bodies: lookup("LOG_REQUEST_BODY")
                    .map(|v| v.trim().eq_ignore_ascii_case("true"))
                    .unwrap_or(false),
            },
            gateway,
            callback_gate: CallbackGateConfig {
                allowed_ips,
                enforce_origin: environment.is_production(),
                secret: callback_secret,
            },
        })
    }
}

/// Parses `*` or a comma-separated list of addresses and CIDR blocks.
pub fn parse_allowed_ips(raw: &str) -> Result<AllowedIps> {
    let value = raw.trim();
    if value == "*" {
        return Ok(AllowedIps::Any);
    }

    let cidrs = value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(parse_ip_or_cidr)
        .collect::<Result<Vec<_>>>()?;

    if cidrs.is_empty() {
        anyhow::bail!("MPESA_ALLOWED_IPS must be '*' or a comma-separated list of IPs or CIDRs");
    }

    Ok(AllowedIps::Cidrs(cidrs))
}

fn parse_ip_or_cidr(entry: &str) -> Result<IpNet> {
    if let Ok(ip) = entry.parse::<IpAddr>() {
        return Ok(IpNet::from(ip));
    }
    entry
        .parse::<IpNet>()
        .with_context(|| format!("invalid IP or CIDR '{}'", entry))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn base_env() -> HashMap<&'static str, &'static str> {
        HashMap::from([
            ("MPESA_CONSUMER_KEY", "key"),
            ("MPESA_CONSUMER_SECRET", "secret"),
            ("MPESA_SHORTCODE", "174379"),
            ("MPESA_PASSKEY", "passkey"),
            ("MPESA_INITIATOR_NAME", "testapi"),
            ("MPESA_SECURITY_CREDENTIAL", "credential"),
            ("CALLBACK_BASE_URL", "https://wallet.example.com"),
        ])
    }

    fn load(env: &HashMap<&'static str, &'static str>) -> Result<Config> {
        Config::from_lookup(|key| env.get(key).map(|v| v.to_string()))
    }

    #[test]
    fn defaults_apply() {
        let config = load(&base_env()).unwrap();
        assert_eq!(config.server_port, 3000);
        assert_eq!(config.environment, Environment::Development);
        assert!(!config.callback_gate.enforce_origin);
        assert!(config.callback_gate.secret.is_none());
        assert_eq!(config.callback_gate.allowed_ips, AllowedIps::provider_default());
        assert_eq!(config.gateway.token_ttl, Duration::from_secs(3300));
        assert_eq!(config.account_currency, "KES");
    }

    #[test]
    fn production_enforces_origin() {
        let mut env = base_env();
        env.insert("APP_ENV", "production");
        env.insert("MPESA_CALLBACK_SECRET", "s3cret");
        let config = load(&env).unwrap();
        assert!(config.callback_gate.enforce_origin);
        assert_eq!(config.callback_gate.secret.as_deref(), Some("s3cret"));
        assert_eq!(config.gateway.callback_secret.as_deref(), Some("s3cret"));
    }

    #[test]
    fn missing_credentials_fail() {
        let mut env = base_env();
        env.remove("MPESA_PASSKEY");
        let err = load(&env).unwrap_err();
        assert!(err.to_string().contains("MPESA_PASSKEY"));
    }

    #[test]
    fn allowed_ips_accept_addresses_and_cidrs() {
        let parsed = parse_allowed_ips("196.201.214.200, 10.0.0.0/8").unwrap();
        assert!(parsed.contains(&"196.201.214.200".parse().unwrap()));
        assert!(parsed.contains(&"10.1.2.3".parse().unwrap()));
        assert!(!parsed.contains(&"196.201.214.201".parse().unwrap()));

        assert_eq!(parse_allowed_ips("*").unwrap(), AllowedIps::Any);
        assert!(parse_allowed_ips(" , ").is_err());
        assert!(parse_allowed_ips("not-an-ip").is_err());
    }

    #[test]
    fn debug_output_masks_secrets() {
        let mut env = base_env();
        env.insert("MPESA_CALLBACK_SECRET", "s3cret");
        let config = load(&env).unwrap();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("s3cret"));
        assert!(!rendered.contains("passkey\""));
        assert!(!rendered.contains("credential\""));
    }
}
