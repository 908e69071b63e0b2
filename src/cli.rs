use clap::{Parser, Subcommand};

use crate::config::{AllowedIps, Config};

#[derive(Parser)]
#[command(name = "mpesa-settlement")]
#[command(about = "M-Pesa wallet and payment settlement service", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Commands {
    /// Start the HTTP server (default)
    Serve,

    /// Configuration validation
    Config,
}

pub fn handle_config_validate(config: &Config) -> anyhow::Result<()> {
    tracing::info!("Validating configuration...");

    println!("Configuration:");
    for line in describe(config) {
        println!("  {}", line);
    }

    tracing::info!("Configuration is valid");
    println!("✓ Configuration is valid");

    Ok(())
}

/// Human-readable configuration summary. Credentials never appear in it.
pub fn describe(config: &Config) -> Vec<String> {
    let gateway = &config.gateway;
    let gate = &config.callback_gate;

    let allowed = match &gate.allowed_ips {
        AllowedIps::Any => "any".to_string(),
        AllowedIps::Cidrs(cidrs) => format!("{} networks", cidrs.len()),
    };

    vec![
        format!("Server Port: {}", config.server_port),
        format!("Environment: {}", config.environment),
        format!("Account Currency: {}", config.account_currency),
        format!("Gateway URL: {}", gateway.base_url),
        format!("Shortcode: {}", gateway.shortcode),
        format!("Consumer Key: {}", mask_secret(&gateway.consumer_key)),
        format!("Consumer Secret: {}", mask_secret(&gateway.consumer_secret)),
        format!("Passkey: {}", mask_secret(&gateway.passkey)),
        format!("Initiator: {}", gateway.initiator_name),
        format!("Security Credential: {}", mask_secret(&gateway.security_credential)),
        format!("Callback Base URL: {}", gateway.callback_base_url),
        format!(
            "Callback Secret: {}",
            gate.secret.as_deref().map(mask_secret).unwrap_or_else(|| "<not set>".to_string())
        ),
        format!("Callback Origin Filter: {} ({})", gate.enforce_origin, allowed),
        format!("Token TTL: {}s", gateway.token_ttl.as_secs()),
        format!("Stale Reservation After: {}s", config.reservation_stale_after.as_secs()),
    ]
}

fn mask_secret(value: &str) -> String {
    if value.is_empty() {
        "<empty>".to_string()
    } else {
        "****".to_string()
    }
}
