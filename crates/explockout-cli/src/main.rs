use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod schedule;

#[zbus::proxy(
    interface = "org.openldap.ExpLockout1",
    default_service = "org.openldap.ExpLockout1",
    default_path = "/org/openldap/ExpLockout1"
)]
trait ExpLockout {
    fn pre_check(&self, principal: &str) -> zbus::Result<(bool, u64)>;
    fn post_check(&self, principal: &str, success: bool) -> zbus::Result<()>;
    fn history(&self, principal: &str) -> zbus::Result<String>;
    fn reset(&self, principal: &str) -> zbus::Result<bool>;
    fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "explockout", version, about = "Exponential authentication lockout")]
struct Cli {
    /// Talk to a daemon on the session bus instead of the system bus.
    #[arg(long, global = true)]
    session: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print the wait window after each of the first N failures.
    Schedule {
        #[command(flatten)]
        params: LockoutArgs,
        /// Number of failures to show.
        #[arg(long, default_value_t = 10)]
        count: usize,
    },
    /// Print the wait window in seconds after N failures.
    Wait {
        #[command(flatten)]
        params: LockoutArgs,
        #[arg(long)]
        failures: usize,
    },
    /// Ask the daemon whether an attempt for PRINCIPAL would be allowed.
    Check { principal: String },
    /// Record a failed credential check for PRINCIPAL.
    Fail { principal: String },
    /// Record a successful credential check for PRINCIPAL.
    Succeed { principal: String },
    /// Show the stored failure history of PRINCIPAL.
    History { principal: String },
    /// Clear the failure history of PRINCIPAL.
    Reset { principal: String },
    /// Show daemon status.
    Status,
}

#[derive(clap::Args)]
struct LockoutArgs {
    /// Base of the exponential window, in seconds.
    #[arg(long)]
    basetime: Option<u64>,
    /// Upper bound of the window, in seconds.
    #[arg(long)]
    maxtime: Option<u64>,
    /// Gate config file (TOML) to read basetime/maxtime from.
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Command::Schedule { params, count } => {
            let lockout = schedule::resolve(params.config.as_deref(), params.basetime, params.maxtime)?;
            schedule::run_schedule(lockout, count)
        }
        Command::Wait { params, failures } => {
            let lockout = schedule::resolve(params.config.as_deref(), params.basetime, params.maxtime)?;
            schedule::run_wait(lockout, failures)
        }
        Command::Check { principal } => {
            let (allowed, retry_after) = connect(cli.session).await?.pre_check(&principal).await?;
            if allowed {
                println!("{principal}: allowed");
            } else {
                println!(
                    "{principal}: locked, retry in {}",
                    schedule::human(retry_after)
                );
            }
            Ok(())
        }
        Command::Fail { principal } => {
            connect(cli.session).await?.post_check(&principal, false).await?;
            println!("{principal}: failure recorded");
            Ok(())
        }
        Command::Succeed { principal } => {
            connect(cli.session).await?.post_check(&principal, true).await?;
            println!("{principal}: success recorded");
            Ok(())
        }
        Command::History { principal } => {
            print_json(&connect(cli.session).await?.history(&principal).await?)
        }
        Command::Reset { principal } => {
            if connect(cli.session).await?.reset(&principal).await? {
                println!("{principal}: failure history cleared");
            } else {
                println!("{principal}: no failure history");
            }
            Ok(())
        }
        Command::Status => print_json(&connect(cli.session).await?.status().await?),
    }
}

async fn connect(session: bool) -> Result<ExpLockoutProxy<'static>> {
    let conn = if session {
        zbus::Connection::session().await
    } else {
        zbus::Connection::system().await
    }
    .context("failed to connect to D-Bus")?;
    tracing::debug!(session, "connected to D-Bus");
    ExpLockoutProxy::new(&conn)
        .await
        .context("explockoutd is not reachable")
}

fn print_json(raw: &str) -> Result<()> {
    let value: serde_json::Value =
        serde_json::from_str(raw).context("daemon returned malformed JSON")?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}
