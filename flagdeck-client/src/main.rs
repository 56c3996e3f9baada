//! `flagdeck` command-line front end.

use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{eyre, WrapErr};
use flagdeck_client::core::{FeatureFlagId, ProjectId, ScopeId};
use flagdeck_client::{AdminClient, AppError, ClientConfig, RestClient};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Flagdeck - feature flag administration
#[derive(Parser, Debug)]
#[command(name = "flagdeck")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Increase verbosity (-v info, -vv debug)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Configuration file path
    #[arg(short, long, global = true, env = "FLAGDECK_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, global = true, env = "FLAGDECK_USERNAME")]
    username: Option<String>,

    #[arg(long, global = true, env = "FLAGDECK_PASSWORD", hide_env_values = true)]
    password: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check the credentials
    Login,
    /// Show the signed-in user
    Whoami,
    /// List projects
    Projects,
    /// List the feature flags of a project with their per-scope values
    Flags { project: ProjectId },
    /// Turn a flag on or off in one scope
    Toggle {
        flag: FeatureFlagId,
        scope: ScopeId,
        state: ToggleState,
    },
    /// Show what the signed-in user may do in a project
    Permissions { project: ProjectId },
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ToggleState {
    On,
    Off,
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();

    let config = ClientConfig::load(cli.config.as_deref())
        .map_err(AppError::from)
        .wrap_err("loading configuration")?;
    init_tracing(&config, cli.verbose);

    let rest = RestClient::new(&config).map_err(AppError::from)?;
    tracing::debug!(base_url = rest.base_url(), "client ready");
    let client = AdminClient::new(Arc::new(rest), &config);

    sign_in(&client, &cli).await?;
    let result = run(&client, cli.command).await;

    for notification in client.drain_notifications() {
        eprintln!("{}", notification.message);
    }
    if let Err(err) = client.session().logout().await {
        tracing::debug!(error = %err, "logout failed");
    }
    result
}

fn init_tracing(config: &ClientConfig, verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&config.log.filter)),
        1 => EnvFilter::new("flagdeck=info,flagdeck_client=info"),
        _ => EnvFilter::new("flagdeck=debug,flagdeck_client=debug,flagdeck_cache=debug"),
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let installed = if config.log.json {
        builder.json().try_init()
    } else {
        builder.with_target(false).try_init()
    };
    if let Err(err) = installed {
        eprintln!("tracing already initialised: {}", err);
    }
}

async fn sign_in(client: &AdminClient, cli: &Cli) -> color_eyre::Result<()> {
    let (Some(username), Some(password)) = (&cli.username, &cli.password) else {
        return Err(eyre!("set --username and --password (or FLAGDECK_USERNAME / FLAGDECK_PASSWORD)"));
    };
    let user = client
        .session()
        .login(username, password)
        .await
        .map_err(AppError::from)
        .wrap_err("signing in")?;
    if user.must_change_password {
        eprintln!("warning: {} must change their password before using the dashboard", user.username);
    }
    Ok(())
}

async fn run(client: &AdminClient, command: Command) -> color_eyre::Result<()> {
    match command {
        Command::Login => {
            println!("credentials accepted");
        }
        Command::Whoami => {
            let user = client
                .session()
                .check_auth()
                .await
                .ok_or_else(|| eyre!("not signed in"))?;
            println!("{} ({}) role={}", user.username, user.full_name, user.global_role);
        }
        Command::Projects => {
            for project in client.projects().await.map_err(AppError::from)? {
                let archived = if project.is_archived { " [archived]" } else { "" };
                println!("{}  {:<24} {}{}", project.id, project.alias, project.name, archived);
            }
        }
        Command::Flags { project } => {
            for flag in client.feature_flags(project).await.map_err(AppError::from)? {
                println!("{}  {} ({})", flag.id, flag.key, flag.name);
                for value in &flag.values {
                    let state = if value.is_enabled { "on" } else { "off" };
                    println!("    {:<16} {}", value.scope_alias, state);
                }
            }
        }
        Command::Toggle { flag, scope, state } => {
            // Loaded first so the toggle has a cached flag to patch.
            client.feature_flag(flag).await.map_err(AppError::from)?;
            let enabled = matches!(state, ToggleState::On);
            let settled = client.update_feature_flag_value(flag, scope, enabled).await;
            let value = settled.into_result().map_err(AppError::from)?;
            println!(
                "{} is now {} in {}",
                flag,
                if value.is_enabled { "on" } else { "off" },
                value.scope_alias
            );
        }
        Command::Permissions { project } => {
            let (context, scopes) = futures_util::future::try_join(
                client.permission_context(project),
                client.scopes(project),
            )
            .await
            .map_err(AppError::from)?;

            println!("admin: {}", context.is_admin());
            let gates = [
                ("manage users", context.can_manage_users()),
                ("manage feature flags", context.can_manage_flags()),
                ("manage scopes", context.can_manage_scopes()),
                ("view API key", context.can_view_api_key()),
                ("regenerate API key", context.can_regenerate_api_key()),
                ("manage settings", context.can_manage_settings()),
                ("delete project", context.can_delete_project()),
            ];
            for (label, allowed) in gates {
                println!("  {:<22} {}", label, allowed);
            }
            for scope in scopes {
                println!(
                    "  scope {:<16} read={} toggle={}",
                    scope.alias,
                    context.can_read_flags(scope.id),
                    context.can_toggle_flag(scope.id)
                );
            }
        }
    }
    Ok(())
}
