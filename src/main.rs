//! Command-line host for the election ledger.
//!
//! Each invocation loads the state file, runs one operation as the caller
//! named by `--key`, and atomically writes the state back while holding the
//! store lock, so concurrent invocations apply one after another. Queries print
//! JSON on stdout.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;

use elections_ledger::config::{load_config, ElectionConfig};
use elections_ledger::election::Call;
use elections_ledger::identity::Keyfile;
use elections_ledger::ledger::{format_units, parse_units, AccountId, Amount};
use elections_ledger::store::SnapshotStore;
use elections_ledger::{logging, Host};

#[derive(Parser)]
#[command(
    name = "elections",
    version,
    about = "Election campaigns with escrowed fixed-price votes"
)]
struct Cli {
    /// State file holding the ledger snapshot.
    #[arg(long, global = true, default_value = "elections.state.json")]
    state: PathBuf,
    /// Keyfile naming the caller (see `keygen`).
    #[arg(long, global = true)]
    key: Option<PathBuf>,
    /// Unix timestamp to use instead of the wall clock.
    #[arg(long, global = true)]
    now: Option<u64>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate an ed25519 keyfile and print its account id.
    Keygen {
        #[arg(long)]
        out: PathBuf,
    },
    /// Create the ledger state with the `--key` identity as owner.
    Init {
        /// JSON file with vote_price, commission_bps, campaign_duration_secs.
        #[arg(long)]
        config: Option<PathBuf>,
        /// Overwrite an existing state file.
        #[arg(short, long)]
        force: bool,
    },
    /// Credit an account from the development faucet.
    Mint {
        #[arg(long)]
        to: AccountId,
        /// Decimal amount, e.g. `1.5`.
        #[arg(long)]
        amount: String,
    },
    /// Print an account balance (defaults to the `--key` account).
    Balance {
        #[arg(long)]
        account: Option<AccountId>,
    },
    /// Print ledger height, merkle root, escrow and the audit result.
    Status,
    /// List live campaigns.
    Campaigns,
    /// Print list of candidates.
    Candidates {
        #[arg(long)]
        campaign: String,
    },
    /// Create new election campaign.
    ElectionCreate {
        #[arg(long)]
        campaign: String,
        #[arg(long)]
        candidate1: AccountId,
        #[arg(long)]
        candidate2: AccountId,
        #[arg(long)]
        candidate3: AccountId,
    },
    /// Print election balance.
    ElectionBalance {
        #[arg(long)]
        campaign: String,
    },
    /// Print candidate votes count.
    ElectionCandidateInfo {
        #[arg(long)]
        campaign: String,
        /// Candidate number on the slate (1-3).
        #[arg(long)]
        candidate: u32,
    },
    /// Print votes count and finish time.
    ElectionInfo {
        #[arg(long)]
        campaign: String,
    },
    /// Finish the election campaign and pay the winner.
    ElectionFinish {
        #[arg(long)]
        campaign: String,
    },
    /// Vote in an election, attaching the configured vote price.
    Vote {
        #[arg(long)]
        campaign: String,
        /// Candidate number on the slate (1-3).
        #[arg(long)]
        candidate: u32,
        /// Attach this decimal amount instead of the vote price.
        #[arg(long)]
        value: Option<String>,
    },
    /// Print the accumulated vote commission.
    WithdrawBalance,
    /// Withdraw vote commission to the owner.
    Withdraw,
}

#[derive(Serialize)]
struct AmountView {
    amount: Amount,
    units: String,
}

impl From<Amount> for AmountView {
    fn from(amount: Amount) -> Self {
        Self {
            amount,
            units: format_units(amount),
        }
    }
}

#[derive(Serialize)]
struct Status<'a> {
    owner: &'a str,
    config: &'a ElectionConfig,
    height: u64,
    merkle_root: String,
    escrow: AmountView,
    commission: AmountView,
    campaigns: Vec<String>,
    consistent: bool,
}

struct Session {
    store: SnapshotStore,
    key: Option<PathBuf>,
    now: Option<u64>,
}

impl Session {
    fn caller(&self) -> Result<AccountId> {
        let path = self
            .key
            .as_deref()
            .context("--key is required for this command")?;
        let keyfile = Keyfile::load(path)?;
        Ok(keyfile.identity()?)
    }

    fn now(&self) -> Result<u64> {
        if let Some(now) = self.now {
            return Ok(now);
        }
        let elapsed = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .context("system clock is before the unix epoch")?;
        Ok(elapsed.as_secs())
    }

    fn call(&self) -> Result<Call> {
        Ok(Call::new(self.caller()?, self.now()?))
    }

    /// Read-only load that reports, rather than rejects, a failed audit.
    fn inspect_host(&self) -> Result<Host> {
        self.store.inspect()?.with_context(|| self.missing_state())
    }

    /// Load, mutate and save while holding the store lock.
    fn update<T>(&self, f: impl FnOnce(&mut Host) -> Result<T>) -> Result<T> {
        if !self.store.exists() {
            bail!(self.missing_state());
        }
        self.store
            .update(f)
            .with_context(|| format!("update {}", self.store.path().display()))
    }

    fn missing_state(&self) -> String {
        format!(
            "no state at {}; run `elections init` first",
            self.store.path().display()
        )
    }
}

fn main() {
    logging::init();
    if let Err(err) = run() {
        eprintln!("error: {:#}", err);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    let ctx = Session {
        store: SnapshotStore::new(&cli.state),
        key: cli.key,
        now: cli.now,
    };

    match cli.command {
        Command::Keygen { out } => cmd_keygen(&out),
        Command::Init { config, force } => cmd_init(&ctx, config.as_deref(), force),
        Command::Mint { to, amount } => {
            let amount = parse_units(&amount)?;
            let now = ctx.now()?;
            let balance = ctx.update(|host| {
                host.mint(&to, amount, now)?;
                Ok(host.balance(&to))
            })?;
            print_json(&AmountView::from(balance))
        }
        Command::Balance { account } => {
            let host = ctx.inspect_host()?;
            let account = match account {
                Some(account) => account,
                None => ctx.caller()?,
            };
            print_json(&AmountView::from(host.balance(&account)))
        }
        Command::Status => {
            let host = ctx.inspect_host()?;
            let election = host.election();
            let snapshot = host.ledger().snapshot();
            print_json(&Status {
                owner: election.owner(),
                config: election.config(),
                height: snapshot.meta.height,
                merkle_root: snapshot.merkle_root,
                escrow: host.ledger().escrow_balance().into(),
                commission: election.commission_balance().into(),
                campaigns: election.campaign_names(),
                consistent: host.is_consistent(),
            })
        }
        Command::Campaigns => print_json(&ctx.inspect_host()?.election().campaign_names()),
        Command::Candidates { campaign } => {
            let host = ctx.inspect_host()?;
            print_json(host.election().candidates(&campaign)?)
        }
        Command::ElectionCreate {
            campaign,
            candidate1,
            candidate2,
            candidate3,
        } => {
            let call = ctx.call()?;
            let id = ctx.update(|host| {
                Ok(host.create_campaign(&call, &campaign, [candidate1, candidate2, candidate3])?)
            })?;
            print_json(&id)
        }
        Command::ElectionBalance { campaign } => {
            let host = ctx.inspect_host()?;
            print_json(&AmountView::from(
                host.election().campaign_balance(&campaign)?,
            ))
        }
        Command::ElectionCandidateInfo {
            campaign,
            candidate,
        } => {
            let host = ctx.inspect_host()?;
            print_json(&host.election().candidate_votes(&campaign, candidate)?)
        }
        Command::ElectionInfo { campaign } => {
            let host = ctx.inspect_host()?;
            print_json(&host.election().info(&campaign)?)
        }
        Command::ElectionFinish { campaign } => {
            let call = ctx.call()?;
            let settlement = ctx.update(|host| Ok(host.finish_campaign(&call, &campaign)?))?;
            print_json(&settlement)
        }
        Command::Vote {
            campaign,
            candidate,
            value,
        } => {
            let value = value.as_deref().map(parse_units).transpose()?;
            let call = ctx.call()?;
            let ballot = ctx.update(|host| {
                let value = value.unwrap_or(host.election().config().vote_price);
                Ok(host.vote(&call.with_value(value), &campaign, candidate)?)
            })?;
            print_json(&ballot)
        }
        Command::WithdrawBalance => {
            let host = ctx.inspect_host()?;
            print_json(&AmountView::from(host.election().commission_balance()))
        }
        Command::Withdraw => {
            let call = ctx.call()?;
            let withdrawal = ctx.update(|host| Ok(host.withdraw_commission(&call)?))?;
            print_json(&withdrawal)
        }
    }
}

fn cmd_keygen(out: &Path) -> Result<()> {
    if out.exists() {
        bail!("{} already exists", out.display());
    }
    let keyfile = Keyfile::generate();
    keyfile.save(out)?;
    println!("{}", keyfile.account);
    Ok(())
}

fn cmd_init(ctx: &Session, config: Option<&Path>, force: bool) -> Result<()> {
    let _lock = ctx.store.lock()?;
    if ctx.store.exists() && !force {
        bail!(
            "{} already exists (use --force to overwrite)",
            ctx.store.path().display()
        );
    }
    let config = match config {
        Some(path) => load_config(path)?,
        None => ElectionConfig::default(),
    };
    let host = Host::new(ctx.caller()?, config)?;
    ctx.store
        .save(&host)
        .with_context(|| format!("save {}", ctx.store.path().display()))?;
    print_json(&Status {
        owner: host.election().owner(),
        config: host.election().config(),
        height: 0,
        merkle_root: host.ledger().snapshot().merkle_root,
        escrow: 0.into(),
        commission: 0.into(),
        campaigns: Vec::new(),
        consistent: true,
    })
}

/// Serialize `value` as pretty-printed JSON on stdout.
fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let payload = serde_json::to_string_pretty(value).context("serialize json")?;
    println!("{}", payload);
    Ok(())
}
