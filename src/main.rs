#![allow(clippy::result_large_err)]

use clap::{Parser, Subcommand};
use dotenvy::dotenv;
use sea_orm::DatabaseConnection;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;
use ucoin_ledger::{
    config::{self, ledger::LedgerSettings},
    core::{account, event, ledger, wallet},
    entities::EventModel,
    errors::{Error, Result},
};

#[derive(Parser, Debug)]
#[command(name = "ucoin-ledger")]
#[command(about = "Operator tools for the UCoin event ledger")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create tables and seed events from config.toml (the default)
    Init,
    /// Expire all wallets of an event and close it
    CloseEvent {
        /// Event code
        code: String,
    },
    /// Rebuild cached balances of an event from its entries
    Reconcile {
        /// Event code
        code: String,
    },
    /// Print a user's wallet balance
    Balance {
        /// Event code
        code: String,
        /// User id
        user: String,
    },
}

async fn event_by_code(db: &DatabaseConnection, code: &str) -> Result<EventModel> {
    event::get_event_by_code(db, code)
        .await?
        .ok_or_else(|| Error::EventNotFound {
            code: code.to_string(),
        })
}

async fn reconcile(db: &DatabaseConnection, code: &str) -> Result<()> {
    let target = event_by_code(db, code).await?;
    let mut drifted = 0;
    for acct in account::list_accounts_for_event(db, target.id).await? {
        let result = ledger::reconcile_balance(db, acct.id).await?;
        if result.drifted() {
            drifted += 1;
            println!("{}: {} -> {}", acct.code, result.cached, result.derived);
        }
    }
    let audit = ledger::verify_event_ledger(db, target.id).await?;
    if !audit.unbalanced_transactions.is_empty() {
        warn!(
            transactions = ?audit.unbalanced_transactions,
            "unbalanced ledger transactions found"
        );
    }
    println!(
        "Checked {} transaction(s), corrected {drifted} balance(s)",
        audit.transactions_checked
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Parse arguments before touching the database
    let cli = Cli::parse();

    // 2. Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // 3. Load .env file, env vars can also be set externally
    dotenv().ok();
    let settings = LedgerSettings::from_env();

    // 4. Connect and make sure the schema exists
    let db = config::database::create_connection()
        .await
        .inspect_err(|e| error!("Failed to connect to database: {e}"))?;
    config::database::create_tables(&db).await?;

    // 5. Seed events declared in config.toml
    let app_config = config::events::load_default_config()?;
    event::seed_events(&db, &app_config)
        .await
        .inspect_err(|e| error!("Failed to seed events: {e}"))?;

    match cli.command.unwrap_or(Command::Init) {
        Command::Init => {
            info!("Database ready");
        }
        Command::CloseEvent { code } => {
            let target = event_by_code(&db, &code).await?;
            let report = event::close_event(&db, &settings, target.id).await?;
            println!(
                "Closed {}: expired {} wallet(s), {} UCoin total",
                target.code, report.wallets_expired, report.total_expired
            );
        }
        Command::Reconcile { code } => reconcile(&db, &code).await?,
        Command::Balance { code, user } => {
            let target = event_by_code(&db, &code).await?;
            let balance = wallet::get_balance(&db, target.id, &user).await?;
            println!("{user} @ {}: {balance}", target.code);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    #[test]
    fn test_no_subcommand_means_init() {
        let cli = Cli::try_parse_from(["ucoin-ledger"]).unwrap();
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_balance_takes_code_and_user() {
        let cli = Cli::try_parse_from(["ucoin-ledger", "balance", "FERIA", "alice"]).unwrap();
        match cli.command {
            Some(Command::Balance { code, user }) => {
                assert_eq!(code, "FERIA");
                assert_eq!(user, "alice");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_unknown_arguments_are_rejected_before_startup() {
        assert!(Cli::try_parse_from(["ucoin-ledger", "close-evnt", "FERIA"]).is_err());
        assert!(Cli::try_parse_from(["ucoin-ledger", "close-event"]).is_err());
    }

    #[test]
    fn test_cli_definition_is_consistent() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }
}
