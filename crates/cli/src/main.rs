use anyhow::Context;
use clap::{Parser, Subcommand};
use std::net::{IpAddr, Ipv6Addr, SocketAddr};

#[derive(Parser)]
#[command(name = "switchboard")]
#[command(about = "Switchboard CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory, a default config.json and the ledger data directory.
    Init {
        /// Config file path (default: SWITCHBOARD_CONFIG_PATH or ~/.switchboard/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Run the gateway (provider webhooks + tenant-scoped event API).
    Gateway {
        /// Config file path (default: SWITCHBOARD_CONFIG_PATH or ~/.switchboard/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// HTTP port (default from config or 15160)
        #[arg(long, short)]
        port: Option<u16>,
    },

    /// Map a provider status to the canonical vocabulary (offline).
    Normalize {
        /// Provider name: mailjet, twilio or greenapi
        provider: String,
        /// Raw provider status, e.g. "open"
        status: String,
    },

    /// List a tenant's ledger events from the running gateway.
    Events {
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        /// Tenant id (sent as X-Tenant-Id)
        #[arg(long, short)]
        tenant: String,

        #[arg(long)]
        page: Option<u32>,

        #[arg(long)]
        limit: Option<u32>,

        /// email, sms or chat (whatsapp is accepted as chat)
        #[arg(long)]
        channel: Option<String>,

        /// Canonical status
        #[arg(long)]
        status: Option<String>,

        /// in or out
        #[arg(long)]
        direction: Option<String>,

        #[arg(long, value_name = "LEAD_ID")]
        lead: Option<String>,

        /// Case-insensitive substring match on the contact identifier
        #[arg(long)]
        search: Option<String>,

        /// Lower bound, RFC 3339 or YYYY-MM-DD
        #[arg(long, value_name = "DATE")]
        from: Option<String>,

        /// Upper bound, RFC 3339 or YYYY-MM-DD
        #[arg(long, value_name = "DATE")]
        to: Option<String>,
    },

    /// Per-channel statistics for a tenant from the running gateway.
    Stats {
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        #[arg(long, short)]
        tenant: String,

        /// 7d, 30d or 90d
        #[arg(long, default_value = "7d")]
        range: String,

        /// Explicit window start (overrides --range), RFC 3339 or YYYY-MM-DD
        #[arg(long, value_name = "DATE")]
        since: Option<String>,

        #[arg(long, value_name = "DATE")]
        until: Option<String>,
    },

    /// Recent quarantined events from the running gateway (newest first).
    Orphans {
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,

        #[arg(long)]
        limit: Option<u32>,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let default_filter = match cli.command {
        Some(Commands::Gateway { .. }) => "info",
        _ => "warn",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter)).init();

    match cli.command {
        Some(Commands::Version) => {
            println!("switchboard {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Gateway { config, port }) => {
            if let Err(e) = run_gateway(config, port).await {
                log::error!("gateway failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Normalize { provider, status }) => {
            run_normalize(&provider, &status);
        }
        Some(Commands::Events {
            config,
            tenant,
            page,
            limit,
            channel,
            status,
            direction,
            lead,
            search,
            from,
            to,
        }) => {
            let mut query: Vec<(&str, String)> = Vec::new();
            push_opt(&mut query, "page", page.map(|p| p.to_string()));
            push_opt(&mut query, "limit", limit.map(|l| l.to_string()));
            push_opt(&mut query, "channel", channel);
            push_opt(&mut query, "status", status);
            push_opt(&mut query, "direction", direction);
            push_opt(&mut query, "leadId", lead);
            push_opt(&mut query, "search", search);
            push_opt(&mut query, "startDate", from);
            push_opt(&mut query, "endDate", to);
            if let Err(e) = print_api(config, "/api/events", Some(&tenant), &query).await {
                log::error!("events failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Stats {
            config,
            tenant,
            range,
            since,
            until,
        }) => {
            let mut query = vec![("range", range)];
            push_opt(&mut query, "since", since);
            push_opt(&mut query, "until", until);
            if let Err(e) = print_api(config, "/api/events/stats", Some(&tenant), &query).await {
                log::error!("stats failed: {:#}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Orphans { config, limit }) => {
            let mut query: Vec<(&str, String)> = Vec::new();
            push_opt(&mut query, "limit", limit.map(|l| l.to_string()));
            if let Err(e) = print_api(config, "/api/orphans", None, &query).await {
                log::error!("orphans failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(switchboard::config::default_config_path);
    let dir = switchboard::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_gateway(
    config_path: Option<std::path::PathBuf>,
    port: Option<u16>,
) -> anyhow::Result<()> {
    let (mut config, path) = switchboard::config::load_config(config_path)?;
    if let Some(p) = port {
        config.gateway.port = p;
    }
    log::info!("starting gateway on {}:{}", config.gateway.bind, config.gateway.port);
    switchboard::gateway::run_gateway(config, path).await
}

fn run_normalize(provider: &str, status: &str) {
    let normalized = switchboard::status::normalize(status, provider);
    match normalized.canonical() {
        Some(c) => println!("{}", c),
        None => println!("{} (unmapped)", normalized),
    }
}

fn push_opt<'a>(query: &mut Vec<(&'a str, String)>, key: &'a str, value: Option<String>) {
    if let Some(v) = value.filter(|v| !v.trim().is_empty()) {
        query.push((key, v));
    }
}

/// GET a gateway API path and pretty-print the JSON body. Non-2xx responses are errors.
async fn print_api(
    config_path: Option<std::path::PathBuf>,
    path: &str,
    tenant: Option<&str>,
    query: &[(&str, String)],
) -> anyhow::Result<()> {
    let (config, _) = switchboard::config::load_config(config_path)?;
    let url = format!("{}{}", gateway_base_url(&config.gateway.bind, config.gateway.port), path);

    let mut req = reqwest::Client::new().get(&url).query(query);
    if let Some(t) = tenant {
        req = req.header(switchboard::gateway::TENANT_HEADER, t);
    }
    if let Some(token) = switchboard::config::resolve_gateway_token(&config) {
        req = req.bearer_auth(token);
    }
    let resp = req
        .send()
        .await
        .with_context(|| format!("gateway not reachable at {}", url))?;
    let status = resp.status();
    let body: serde_json::Value = resp.json().await.context("gateway returned non-JSON body")?;
    if !status.is_success() {
        let code = body.get("error").and_then(|v| v.as_str()).unwrap_or("ERROR");
        let message = body.get("message").and_then(|v| v.as_str()).unwrap_or("");
        anyhow::bail!("{} {}: {}", status.as_u16(), code, message);
    }
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

/// Local URL for a gateway bound to `bind`. Wildcard binds are reached over loopback and IPv6
/// hosts are bracketed.
fn gateway_base_url(bind: &str, port: u16) -> String {
    let bind = bind.trim().trim_start_matches('[').trim_end_matches(']');
    if bind.is_empty() {
        return format!("http://127.0.0.1:{}", port);
    }
    match bind.parse::<IpAddr>() {
        Ok(IpAddr::V4(v4)) if v4.is_unspecified() => format!("http://127.0.0.1:{}", port),
        Ok(IpAddr::V6(v6)) if v6.is_unspecified() => {
            format!("http://{}", SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), port))
        }
        Ok(ip) => format!("http://{}", SocketAddr::new(ip, port)),
        Err(_) => format!("http://{}:{}", bind, port),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_url_brackets_ipv6_and_maps_wildcards() {
        assert_eq!(gateway_base_url("127.0.0.1", 15160), "http://127.0.0.1:15160");
        assert_eq!(gateway_base_url("0.0.0.0", 80), "http://127.0.0.1:80");
        assert_eq!(gateway_base_url("", 80), "http://127.0.0.1:80");
        assert_eq!(gateway_base_url("::1", 15160), "http://[::1]:15160");
        assert_eq!(gateway_base_url("[::1]", 15160), "http://[::1]:15160");
        assert_eq!(gateway_base_url("::", 15160), "http://[::1]:15160");
        assert_eq!(gateway_base_url("localhost", 8080), "http://localhost:8080");
    }
}
