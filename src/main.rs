use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, ValueEnum};
use tracing::{error, info, warn};

use odoo_mcp_bridge::admin::start_config_server;
use odoo_mcp_bridge::mcp::http::AuthGate;
use odoo_mcp_bridge::mcp::{McpHandler, http as mcp_http, stdio, ws};
use odoo_mcp_bridge::odoo::client::OdooClient;
use odoo_mcp_bridge::odoo::pool::ClientPool;
use odoo_mcp_bridge::registry::{Registry, watcher};

/// User config directory: ~/.config/odoo-mcp-bridge/
fn user_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|p| p.join(".config").join("odoo-mcp-bridge"))
}

/// Set an env var only when unset.
/// SAFETY: called during single-threaded startup only.
fn set_default_env(key: &str, value: &PathBuf) {
    if std::env::var(key).is_err() {
        unsafe {
            std::env::set_var(key, value);
        }
        info!(key, value = %value.display(), "defaulted env path");
    }
}

const DEFAULT_INSTANCES_TEMPLATE: &str = r#"{
  "production": {
    "url": "http://localhost:8069",
    "db": "production",
    "apiKey": "YOUR_ODOO_API_KEY"
  },
  "development": {
    "url": "http://localhost:8069",
    "db": "development",
    "version": "18",
    "username": "admin",
    "password": "admin"
  }
}
"#;

/// Seed the user config directory and default the config-path env vars.
fn setup_user_config() {
    let Some(config_dir) = user_config_dir() else {
        warn!("could not determine user config directory");
        return;
    };
    if !config_dir.exists()
        && let Err(e) = fs::create_dir_all(&config_dir)
    {
        warn!(dir = %config_dir.display(), error = %e, "failed to create config directory");
        return;
    }

    let instances_file = config_dir.join("instances.json");
    if !instances_file.exists() {
        match fs::write(&instances_file, DEFAULT_INSTANCES_TEMPLATE) {
            Ok(()) => {
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    let _ =
                        fs::set_permissions(&instances_file, fs::Permissions::from_mode(0o600));
                }
                info!(path = %instances_file.display(), "created instances.json template; edit it with your Odoo credentials");
            }
            Err(e) => {
                warn!(path = %instances_file.display(), error = %e, "failed to create instances.json")
            }
        }
    }

    if std::env::var("ODOO_INSTANCES").is_err()
        && std::env::var("ODOO_INSTANCES_JSON").is_err()
        && std::env::var("ODOO_URL").is_err()
        && instances_file.exists()
    {
        // SAFETY: single-threaded startup.
        unsafe {
            std::env::set_var("ODOO_INSTANCES_JSON", &instances_file);
        }
        info!(path = %instances_file.display(), "using instances.json from user config");
    }

    set_default_env("MCP_TOOLS_JSON", &config_dir.join("tools.json"));
    set_default_env("MCP_PROMPTS_JSON", &config_dir.join("prompts.json"));
    set_default_env("MCP_SERVER_JSON", &config_dir.join("server.json"));
}

#[derive(Debug, Clone, ValueEnum)]
enum TransportMode {
    Stdio,
    Ws,
    Http,
}

#[derive(Debug, Parser)]
#[command(name = "odoo-mcp-bridge", version, about = "MCP server bridging AI assistants to Odoo")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    /// Transport mode (stdio for desktop assistants, http/ws for servers)
    #[arg(long, value_enum, default_value_t = TransportMode::Stdio)]
    transport: TransportMode,

    /// Listen address for http/ws modes
    #[arg(long, default_value = "127.0.0.1:8787")]
    listen: String,

    /// Port for the config-manager HTTP surface
    #[arg(long, env = "CONFIG_UI_PORT", default_value = "3008")]
    config_server_port: u16,

    /// Config directory for the config-manager surface
    #[arg(long, env = "ODOO_CONFIG_DIR")]
    config_dir: Option<PathBuf>,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Validate instance configuration by probing each Odoo instance
    ValidateConfig,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Stdio reserves stdout for JSON-RPC; log to stderr without colors.
    match cli.transport {
        TransportMode::Stdio => {
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .with_writer(std::io::stderr)
                .with_ansi(false)
                .init();
        }
        _ => {
            tracing_subscriber::fmt()
                .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
                .init();
        }
    }

    setup_user_config();

    if let Some(Command::ValidateConfig) = cli.command {
        return validate_config().await;
    }

    let pool = ClientPool::from_env()?;
    let registry = Arc::new(Registry::from_env());
    registry.initial_load().await?;
    let _watcher = watcher::start(Arc::clone(&registry));

    let handler = Arc::new(McpHandler::new(pool.clone(), Arc::clone(&registry)));
    let auth = AuthGate::from_env();

    let config_dir = cli
        .config_dir
        .clone()
        .or_else(user_config_dir)
        .unwrap_or_else(|| PathBuf::from("config"));
    let admin_registry = Arc::clone(&registry);
    let admin_pool = pool.clone();
    let admin_auth = auth.clone();
    let admin_port = cli.config_server_port;
    tokio::spawn(async move {
        if let Err(e) =
            start_config_server(admin_port, config_dir, admin_registry, admin_pool, Some(admin_auth))
                .await
        {
            error!(error = %e, "config server error");
        }
    });

    match cli.transport {
        TransportMode::Stdio => {
            info!("MCP server starting (stdio)");
            stdio::run(handler).await
        }
        TransportMode::Ws => ws::serve(handler, &cli.listen).await,
        TransportMode::Http => mcp_http::serve_with_auth(handler, &cli.listen, auth).await,
    }
}

async fn validate_config() -> anyhow::Result<()> {
    let pool = ClientPool::from_env()?;
    let names = pool.instance_names().await;
    if names.is_empty() {
        anyhow::bail!("No instances found in configuration");
    }

    println!("Validating {} Odoo instance(s)...\n", names.len());
    let mut all_ok = true;

    for name in &names {
        let Some(desc) = pool.store().get(name).await else {
            continue;
        };
        print!("• {name} ({}): ", desc.url);
        match OdooClient::connect(&desc) {
            Ok(client) => {
                let probe = tokio::time::timeout(
                    std::time::Duration::from_secs(10),
                    client.health_check(),
                )
                .await;
                match probe {
                    Ok(true) => println!("OK"),
                    Ok(false) => {
                        println!("FAIL - health check failed");
                        all_ok = false;
                    }
                    Err(_) => {
                        println!("FAIL - timeout");
                        all_ok = false;
                    }
                }
            }
            Err(e) => {
                println!("FAIL - {e}");
                all_ok = false;
            }
        }
    }

    println!();
    if all_ok {
        println!("All instances validated successfully");
        Ok(())
    } else {
        anyhow::bail!("One or more instances failed validation")
    }
}
