use std::{
    collections::{BTreeMap, BTreeSet},
    fs,
    path::{Path, PathBuf},
};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use poc_engine::{
    contributions::{ContributionId, Decision},
    ledger::{
        AccountId, Amount, BankLedger, SupplyReport, TokenLedger, POC_MODULE_ACCOUNT,
        REWARD_POOL_ACCOUNT,
    },
    metrics::FeeMetrics,
    oracles::{IdentityRegistry, ValidatorSet},
    params::Params,
    reputation::CreditsView,
    store::MemStore,
    BlockContext, ErrorClass, HostContext, PocEngine, PocError,
};

#[derive(Parser)]
#[command(name = "poc-sim")]
#[command(
    about = "Replay proof-of-contribution transactions against an in-memory chain",
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a JSON scenario and print the resulting report
    Run {
        /// Scenario file
        scenario: PathBuf,

        /// Write the report here instead of stdout
        #[arg(short, long, value_name = "FILE")]
        out: Option<PathBuf>,

        /// Single-line JSON output
        #[arg(long)]
        compact: bool,
    },

    /// Print the default parameters, or validate a parameter file
    Params {
        #[arg(short, long, value_name = "FILE")]
        file: Option<PathBuf>,
    },
}

//==================== scenario ====================//

#[derive(Deserialize)]
struct Scenario {
    #[serde(default)]
    params: Params,
    #[serde(default)]
    validators: ValidatorSet,
    #[serde(default)]
    identity: IdentityRegistry,
    #[serde(default)]
    balances: BTreeMap<AccountId, Amount>,
    #[serde(default)]
    blocks: Vec<Block>,
}

#[derive(Deserialize)]
struct Block {
    height: u64,
    #[serde(default)]
    time: u64,
    #[serde(default)]
    txs: Vec<Tx>,
}

#[derive(Deserialize, Serialize, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Tx {
    Submit {
        contributor: String,
        ctype: String,
        uri: String,
        content_hash: String,
    },
    Endorse {
        validator: String,
        id: ContributionId,
        decision: Decision,
    },
    Withdraw {
        contributor: String,
    },
    SetParams {
        params: Params,
    },
    /// Host-side validator set change between transactions.
    SetPower {
        validator: AccountId,
        power: u64,
    },
}

impl Tx {
    fn participant(&self) -> Option<&str> {
        match self {
            Tx::Submit { contributor, .. } | Tx::Withdraw { contributor } => {
                Some(contributor.as_str())
            }
            _ => None,
        }
    }
}

//==================== report ====================//

#[derive(Serialize)]
struct TxReport {
    height: u64,
    index: usize,
    tx: Tx,
    ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_class: Option<ErrorClass>,
}

#[derive(Serialize)]
struct Report {
    txs: Vec<TxReport>,
    credits: BTreeMap<AccountId, CreditsView>,
    balances: BTreeMap<AccountId, Amount>,
    fee_metrics: FeeMetrics,
    supply: SupplyReport,
    supply_conserved: bool,
    state_root: String,
}

struct Chain {
    store: MemStore,
    validators: ValidatorSet,
    identity: IdentityRegistry,
    bank: BankLedger,
}

type TxOutcome = std::result::Result<Value, PocError>;

impl Chain {
    fn engine(&self) -> PocEngine<'_> {
        PocEngine::new(HostContext {
            validators: &self.validators,
            identity: &self.identity,
            bank: &self.bank,
        })
    }

    fn parts(&mut self) -> (PocEngine<'_>, &mut MemStore) {
        let engine = PocEngine::new(HostContext {
            validators: &self.validators,
            identity: &self.identity,
            bank: &self.bank,
        });
        (engine, &mut self.store)
    }

    fn apply(&mut self, block: &BlockContext, tx: &Tx) -> Result<TxOutcome> {
        if let Tx::SetPower { validator, power } = tx {
            self.validators.set_power(validator.clone(), *power);
            return Ok(Ok(Value::Null));
        }
        let (engine, store) = self.parts();
        let outcome = match tx {
            Tx::Submit {
                contributor,
                ctype,
                uri,
                content_hash,
            } => engine
                .submit_contribution(store, block, contributor, ctype, uri, content_hash)
                .map(serde_json::to_value),
            Tx::Endorse {
                validator,
                id,
                decision,
            } => engine
                .endorse(store, block, validator, *id, *decision)
                .map(serde_json::to_value),
            Tx::Withdraw { contributor } => engine
                .withdraw_rewards(store, contributor)
                .map(serde_json::to_value),
            Tx::SetParams { params } => engine.set_params(store, params).map(|()| Ok(Value::Null)),
            // applied above, before the engine borrows the validator set
            Tx::SetPower { .. } => Ok(Ok(Value::Null)),
        };
        match outcome {
            Ok(value) => Ok(Ok(value.context("serializing transaction result")?)),
            Err(err) => Ok(Err(err)),
        }
    }
}

fn load_scenario(path: &Path) -> Result<Scenario> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("reading scenario {}", path.display()))?;
    let scenario: Scenario = serde_json::from_str(&raw)
        .with_context(|| format!("parsing scenario {}", path.display()))?;
    scenario
        .params
        .validate()
        .context("scenario params are invalid")?;
    Ok(scenario)
}

fn run(scenario: Scenario) -> Result<Report> {
    let mut chain = Chain {
        store: MemStore::new(),
        validators: scenario.validators,
        identity: scenario.identity,
        bank: BankLedger::new(),
    };
    let mut accounts: BTreeSet<AccountId> = scenario.balances.keys().cloned().collect();
    for (account, amount) in &scenario.balances {
        chain
            .bank
            .fund_genesis(&mut chain.store, account, *amount)
            .with_context(|| format!("funding {account}"))?;
    }
    let (engine, store) = chain.parts();
    engine.init_genesis(store, &scenario.params)?;
    info!(
        accounts = accounts.len(),
        blocks = scenario.blocks.len(),
        "genesis ready"
    );

    let mut last_height: Option<u64> = None;
    let mut txs = Vec::new();
    for block in scenario.blocks {
        if last_height.is_some_and(|last| block.height <= last) {
            bail!(
                "block heights must increase: {} follows {:?}",
                block.height,
                last_height
            );
        }
        last_height = Some(block.height);
        let ctx = BlockContext {
            height: block.height,
            time: block.time,
        };
        for (index, tx) in block.txs.into_iter().enumerate() {
            if let Some(account) = tx.participant() {
                accounts.insert(account.to_string());
            }
            let report = match chain.apply(&ctx, &tx)? {
                Ok(result) => TxReport {
                    height: ctx.height,
                    index,
                    tx,
                    ok: true,
                    result: Some(result).filter(|value| !value.is_null()),
                    error: None,
                    error_class: None,
                },
                Err(err) => {
                    warn!(height = ctx.height, index, error = %err, "transaction failed");
                    TxReport {
                        height: ctx.height,
                        index,
                        tx,
                        ok: false,
                        result: None,
                        error: Some(err.to_string()),
                        error_class: Some(err.kind()),
                    }
                }
            };
            txs.push(report);
        }
        let (engine, store) = chain.parts();
        engine.end_block(store, ctx.height)?;
    }

    let engine = chain.engine();
    let mut credits = BTreeMap::new();
    let mut balances = BTreeMap::new();
    for account in &accounts {
        match engine.get_credits(&chain.store, account) {
            Ok(view) => {
                credits.insert(account.clone(), view);
            }
            // malformed addresses from rejected txs have no credits to show
            Err(err) if err.kind() == ErrorClass::InputValidation => {}
            Err(err) => return Err(err.into()),
        }
        balances.insert(account.clone(), chain.bank.balance(&chain.store, account)?);
    }
    for module in [POC_MODULE_ACCOUNT, REWARD_POOL_ACCOUNT] {
        let module = module.to_string();
        let balance = chain.bank.balance(&chain.store, &module)?;
        balances.insert(module, balance);
    }
    let supply = chain.bank.supply_report(&chain.store)?;
    Ok(Report {
        txs,
        credits,
        balances,
        fee_metrics: engine.get_fee_metrics(&chain.store)?,
        supply_conserved: supply.is_conserved(),
        supply,
        state_root: chain.store.state_root_hex(),
    })
}

fn write_json<T: Serialize>(value: &T, out: Option<&Path>, compact: bool) -> Result<()> {
    let rendered = if compact {
        serde_json::to_string(value)?
    } else {
        serde_json::to_string_pretty(value)?
    };
    match out {
        Some(path) => fs::write(path, rendered + "\n")
            .with_context(|| format!("writing {}", path.display()))?,
        None => println!("{rendered}"),
    }
    Ok(())
}

fn params_cmd(file: Option<&Path>) -> Result<()> {
    let params = match file {
        Some(path) => {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("reading {}", path.display()))?;
            let params: Params = serde_json::from_str(&raw)
                .with_context(|| format!("parsing {}", path.display()))?;
            params.validate()?;
            info!(path = %path.display(), "parameters are valid");
            params
        }
        None => Params::default(),
    };
    write_json(&params, None, false)
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Run {
            scenario,
            out,
            compact,
        } => {
            let report = run(load_scenario(&scenario)?)?;
            if !report.supply_conserved {
                warn!(supply = ?report.supply, "supply accounting diverged");
            }
            write_json(&report, out.as_deref(), compact)
        }
        Commands::Params { file } => params_cmd(file.as_deref()),
    }
}
