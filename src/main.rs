//! Token Vault CLI
//!
//! Runs vault operations against a persistent SQLite store and ledger.
//!
//! Run modes:
//!   token-vault init --caller <admin> --vault-address <custody>
//!   token-vault deposit --caller <admin> --vault <id> --amount <n>
//!   token-vault demo                - Run the reference flow in memory

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use token_vault::common::{self, StorageBackend, VaultConfig};
use token_vault::{
    Identity, MemoryLedger, MemoryVaultStorage, SqliteLedger, SqliteVaultStorage, TokenLedger,
    VaultId, VaultStore,
};

#[derive(Parser)]
#[command(name = "token-vault")]
#[command(about = "Custodial token vault with per-recipient allocations")]
struct Cli {
    /// SQLite database file (overrides VAULT_DB_PATH)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Keep everything in memory for this invocation
    #[arg(long, global = true)]
    memory: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the caller's vault
    Init {
        #[arg(long, env = "VAULT_CALLER")]
        caller: Identity,

        /// Ledger account that will custody pooled tokens
        #[arg(long)]
        vault_address: Identity,
    },

    /// Move tokens from the admin into the vault
    Deposit {
        #[arg(long, env = "VAULT_CALLER")]
        caller: Identity,
        #[arg(long)]
        vault: VaultId,
        #[arg(long)]
        amount: u64,
    },

    /// Earmark unallocated tokens for a recipient
    Allocate {
        #[arg(long, env = "VAULT_CALLER")]
        caller: Identity,
        #[arg(long)]
        vault: VaultId,
        #[arg(long)]
        recipient: Identity,
        #[arg(long)]
        amount: u64,
    },

    /// Collect the caller's allocation
    Claim {
        #[arg(long, env = "VAULT_CALLER")]
        caller: Identity,
        #[arg(long)]
        vault: VaultId,
    },

    /// Return unallocated tokens to the admin
    Withdraw {
        #[arg(long, env = "VAULT_CALLER")]
        caller: Identity,
        #[arg(long)]
        vault: VaultId,
        #[arg(long)]
        amount: u64,
    },

    /// Hand admin rights to another account
    TransferOwnership {
        #[arg(long, env = "VAULT_CALLER")]
        caller: Identity,
        #[arg(long)]
        vault: VaultId,
        #[arg(long)]
        new_admin: Identity,
    },

    /// Show the unallocated balance of a vault
    Balance {
        #[arg(long)]
        vault: VaultId,
    },

    /// Print a vault as JSON
    Show {
        #[arg(long)]
        vault: VaultId,
    },

    /// List all vaults
    List,

    /// Credit tokens to a ledger account (development only)
    Fund {
        #[arg(long)]
        account: Identity,
        #[arg(long)]
        amount: u64,
    },

    /// Show the ledger balance of an account
    LedgerBalance {
        #[arg(long)]
        account: Identity,
    },

    /// Run the reference deposit/allocate/claim/withdraw flow in memory
    Demo,
}

/// Ledger behind the vault, kept concrete so the faucet can mint
enum LedgerHandle {
    Sqlite(Arc<SqliteLedger>),
    Memory(MemoryLedger),
}

impl LedgerHandle {
    fn as_dyn(&self) -> Arc<dyn TokenLedger> {
        match self {
            LedgerHandle::Sqlite(ledger) => ledger.clone(),
            LedgerHandle::Memory(ledger) => Arc::new(ledger.clone()),
        }
    }

    async fn mint(&self, account: &Identity, amount: u64) -> common::Result<u64> {
        match self {
            LedgerHandle::Sqlite(ledger) => Ok(ledger.mint(account, amount)?),
            LedgerHandle::Memory(ledger) => {
                ledger.mint(account, amount).await?;
                Ok(ledger.balance_of(account).await?)
            }
        }
    }
}

fn open_backend(config: &VaultConfig) -> common::Result<(VaultStore, LedgerHandle)> {
    match config.storage {
        StorageBackend::Sqlite => {
            let storage = Arc::new(SqliteVaultStorage::new(&config.db_path, config.pool_size)?);
            let ledger = LedgerHandle::Sqlite(Arc::new(SqliteLedger::new(
                &config.db_path,
                config.pool_size,
            )?));
            Ok((VaultStore::new(storage, ledger.as_dyn()), ledger))
        }
        StorageBackend::Memory => {
            tracing::warn!("in-memory storage: state is discarded when the command exits");
            let ledger = LedgerHandle::Memory(MemoryLedger::new());
            let store = VaultStore::new(Arc::new(MemoryVaultStorage::new()), ledger.as_dyn());
            Ok((store, ledger))
        }
    }
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("error [{}]: {}", e.error_code(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> common::Result<()> {
    let mut config = VaultConfig::from_env()?;
    if let Some(db) = cli.db {
        config.db_path = db;
    }
    if cli.memory {
        config.storage = StorageBackend::Memory;
    }
    common::init_from_config(&config)?;

    match cli.command {
        Commands::Demo => run_demo().await,
        command => {
            let (store, ledger) = open_backend(&config)?;
            execute(command, &store, &ledger).await
        }
    }
}

async fn execute(command: Commands, store: &VaultStore, ledger: &LedgerHandle) -> common::Result<()> {
    match command {
        Commands::Init {
            caller,
            vault_address,
        } => {
            let vault_id = store.init(&caller, &vault_address).await?;
            println!("created vault {} (custody: {})", vault_id, vault_address);
        }
        Commands::Deposit {
            caller,
            vault,
            amount,
        } => {
            store.deposit(&caller, &vault, amount).await?;
            println!(
                "deposited {}; unallocated balance {}",
                amount,
                store.get_total_balance(&vault).await?
            );
        }
        Commands::Allocate {
            caller,
            vault,
            recipient,
            amount,
        } => {
            store.allocate(&caller, &vault, &recipient, amount).await?;
            println!(
                "allocated {} to {}; unallocated balance {}",
                amount,
                recipient,
                store.get_total_balance(&vault).await?
            );
        }
        Commands::Claim { caller, vault } => {
            let amount = store.claim(&caller, &vault).await?;
            println!("{} claimed {}", caller, amount);
        }
        Commands::Withdraw {
            caller,
            vault,
            amount,
        } => {
            store.withdraw(&caller, &vault, amount).await?;
            println!(
                "withdrew {}; unallocated balance {}",
                amount,
                store.get_total_balance(&vault).await?
            );
        }
        Commands::TransferOwnership {
            caller,
            vault,
            new_admin,
        } => {
            store.transfer_ownership(&caller, &vault, &new_admin).await?;
            println!("vault {} is now administered by {}", vault, new_admin);
        }
        Commands::Balance { vault } => {
            println!("{}", store.get_total_balance(&vault).await?);
        }
        Commands::Show { vault } => {
            let vault = store.get_vault(&vault).await?;
            println!("{}", serde_json::to_string_pretty(&vault)?);
        }
        Commands::List => {
            for vault_id in store.list_vaults().await? {
                println!("{}", vault_id);
            }
        }
        Commands::Fund { account, amount } => {
            let balance = ledger.mint(&account, amount).await?;
            println!("{} now holds {}", account, balance);
        }
        Commands::LedgerBalance { account } => {
            println!("{}", ledger.as_dyn().balance_of(&account).await?);
        }
        Commands::Demo => run_demo().await?,
    }

    Ok(())
}

async fn run_demo() -> common::Result<()> {
    let admin = Identity::parse("admin")?;
    let custody = Identity::parse("custody")?;
    let recipient = Identity::parse("recipient")?;

    let ledger = MemoryLedger::new();
    ledger.mint(&admin, 1_000).await?;
    let store = VaultStore::new(Arc::new(MemoryVaultStorage::new()), Arc::new(ledger.clone()));

    println!("\n=== Token Vault Demo ===\n");

    let vault_id = store.init(&admin, &custody).await?;
    println!("1. init        vault {} custodied at {}", vault_id, custody);

    store.deposit(&admin, &vault_id, 1_000).await?;
    println!(
        "2. deposit     1000            -> unallocated {}",
        store.get_total_balance(&vault_id).await?
    );

    store.allocate(&admin, &vault_id, &recipient, 400).await?;
    println!(
        "3. allocate    400 to {} -> unallocated {}",
        recipient,
        store.get_total_balance(&vault_id).await?
    );

    let claimed = store.claim(&recipient, &vault_id).await?;
    println!(
        "4. claim       {} claimed {}  -> unallocated {}",
        recipient,
        claimed,
        store.get_total_balance(&vault_id).await?
    );

    store.withdraw(&admin, &vault_id, 600).await?;
    println!(
        "5. withdraw    600             -> unallocated {}",
        store.get_total_balance(&vault_id).await?
    );

    match store.claim(&recipient, &vault_id).await {
        Err(e) => println!("6. claim again rejected: [{}] {}", e.error_code(), e),
        Ok(amount) => println!("6. claim again unexpectedly paid {}", amount),
    }

    println!();
    println!("Ledger balances:");
    for account in [&admin, &recipient, &custody] {
        println!("  {:<10} {}", account, ledger.balance_of(account).await?);
    }

    println!("\n=== Demo Complete ===");
    Ok(())
}
