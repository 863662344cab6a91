use std::io::BufRead;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use cheq_events::{FileTail, JsonLinesSource};
use cheq_projection::{
    account_instruments, instrument_journal, net_escrowed, Account, ConsistencyChecker, Cursor,
    Erc20, Handshake, Instrument, InstrumentCategory, Projector, RunSummary,
};
use cheq_store::{EntityStoreExt, LogEntityStore};
use cheq_types::{Address, InstrumentId, KeyFormat, PairKey};
use colored::Colorize;
use serde::Serialize;
use tracing::info;

use crate::cli::*;
use crate::config::IndexerConfig;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let mut config = IndexerConfig::load_or_default(cli.config.as_deref())?;
    if let Some(store) = &cli.store {
        config.store_path = store.clone();
    }
    let format = cli.format;
    match cli.command {
        Command::Ingest(args) => cmd_ingest(config, format, args),
        Command::Follow(args) => cmd_follow(config, format, args),
        Command::Show(args) => cmd_show(&config, format, args),
        Command::Balance(args) => cmd_balance(&config, format, args),
        Command::Check(args) => cmd_check(&config, format, args),
        Command::Config(args) => cmd_config(&config, cli.config.as_deref(), args),
    }
}

fn apply_key_format(config: &mut IndexerConfig, flag: Option<KeyFormatArg>) {
    if let Some(flag) = flag {
        config.key_format = flag.into();
    }
}

/// Key format recorded by the store, falling back to the configured one
/// for a store that has not applied any event yet.
fn store_key_format(
    store: &LogEntityStore,
    config: &IndexerConfig,
) -> anyhow::Result<KeyFormat> {
    Ok(store
        .load::<Cursor>(Cursor::KEY)?
        .map_or(config.key_format, |cursor| cursor.key_format))
}

fn open_projector(config: &IndexerConfig) -> anyhow::Result<Projector<LogEntityStore>> {
    let store = LogEntityStore::open(&config.store_path, config.log_config())
        .with_context(|| format!("opening store {}", config.store_path.display()))?;
    Ok(Projector::new(store, config.projector_config())?)
}

/// Open the store for reading; it must already exist.
fn open_store(config: &IndexerConfig) -> anyhow::Result<LogEntityStore> {
    if !config.store_path.exists() {
        bail!(
            "no store at {}; run `cheq-indexer ingest` first",
            config.store_path.display()
        );
    }
    LogEntityStore::open(&config.store_path, config.log_config())
        .with_context(|| format!("opening store {}", config.store_path.display()))
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn render_time(timestamp: u64) -> String {
    i64::try_from(timestamp)
        .ok()
        .and_then(|t| DateTime::<Utc>::from_timestamp(t, 0))
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| timestamp.to_string())
}

fn now() -> u64 {
    u64::try_from(Utc::now().timestamp()).unwrap_or(0)
}

fn or_dash<T: ToString>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".into())
}

fn print_summary(summary: &RunSummary, format: OutputFormat) -> anyhow::Result<()> {
    if format == OutputFormat::Json {
        return print_json(&serde_json::json!({
            "applied": summary.applied,
            "skipped_replay": summary.skipped_replay,
            "rejected": summary.rejected,
            "anomalies": summary.anomalies,
            "last_position": summary.last_position.map(|p| p.to_string()),
        }));
    }
    println!(
        "{} Applied {} event(s), skipped {} already applied",
        "✓".green().bold(),
        summary.applied.to_string().bold(),
        summary.skipped_replay
    );
    if summary.rejected > 0 {
        println!("  {} {} malformed event(s) rejected", "!".yellow(), summary.rejected);
    }
    if summary.anomalies > 0 {
        println!("  {} {} data anomalie(s) logged", "!".yellow(), summary.anomalies);
    }
    if let Some(position) = summary.last_position {
        println!("  Cursor: {}", position.to_string().cyan());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// ingest / follow
// ---------------------------------------------------------------------------

fn ingest_from<R: BufRead>(
    projector: &mut Projector<LogEntityStore>,
    source: JsonLinesSource<R>,
) -> anyhow::Result<RunSummary> {
    Ok(projector.run(source)?)
}

fn cmd_ingest(mut config: IndexerConfig, format: OutputFormat, args: IngestArgs) -> anyhow::Result<()> {
    apply_key_format(&mut config, args.key_format);
    let mut projector = open_projector(&config)?;

    let summary = if args.input.as_os_str() == "-" {
        ingest_from(&mut projector, JsonLinesSource::new(std::io::stdin().lock()))?
    } else {
        let source = JsonLinesSource::open(&args.input)
            .with_context(|| format!("opening {}", args.input.display()))?;
        ingest_from(&mut projector, source)?
    };

    if args.compact {
        projector.store().compact()?;
        info!(path = %config.store_path.display(), "store log compacted");
    }
    print_summary(&summary, format)
}

fn cmd_follow(mut config: IndexerConfig, format: OutputFormat, args: FollowArgs) -> anyhow::Result<()> {
    apply_key_format(&mut config, args.key_format);
    if let Some(ms) = args.interval_ms {
        config.follow_interval_ms = ms;
    }
    let projector = open_projector(&config)?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    let summary = runtime.block_on(follow(projector, &args.input, config.follow_interval()))?;
    print_summary(&summary, format)
}

async fn follow(
    mut projector: Projector<LogEntityStore>,
    input: &Path,
    interval: Duration,
) -> anyhow::Result<RunSummary> {
    let mut tail = FileTail::new(input);
    let mut total = RunSummary::default();
    let mut ticker = tokio::time::interval(interval);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!(input = %input.display(), ?interval, "following event file");
    loop {
        tokio::select! {
            result = &mut shutdown => {
                result.context("installing Ctrl-C handler")?;
                info!("interrupted; stopping");
                break;
            }
            _ = ticker.tick() => {
                let items = tail.poll()?;
                if items.is_empty() {
                    continue;
                }
                let summary = projector.run(items.into_iter().map(Ok))?;
                total.merge(&summary);
            }
        }
    }
    Ok(total)
}

// ---------------------------------------------------------------------------
// show
// ---------------------------------------------------------------------------

fn cmd_show(config: &IndexerConfig, format: OutputFormat, args: ShowArgs) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let key_format = store_key_format(&store, config)?;
    match args.target {
        ShowTarget::Account { address } => {
            let address: Address = address.parse()?;
            let Some(account) = store.load::<Account>(&address.to_key())? else {
                bail!("no account {address}");
            };
            match format {
                OutputFormat::Json => print_json(&account),
                OutputFormat::Text => {
                    print_account(&account);
                    Ok(())
                }
            }
        }
        ShowTarget::Instrument { id } => {
            let key = id.parse::<InstrumentId>()?.to_key(key_format);
            let Some(instrument) = store.load::<Instrument>(&key)? else {
                bail!("no instrument {key}");
            };
            match format {
                OutputFormat::Json => print_json(&instrument),
                OutputFormat::Text => {
                    print_instrument(&instrument);
                    Ok(())
                }
            }
        }
        ShowTarget::Holdings { address, role } => {
            let address: Address = address.parse()?;
            let category: InstrumentCategory = role.parse().map_err(anyhow::Error::msg)?;
            let instruments = account_instruments(&store, address, category)?;
            match format {
                OutputFormat::Json => print_json(&instruments),
                OutputFormat::Text => {
                    println!("{} {} instrument(s) for {}", instruments.len(), category, address.to_string().cyan());
                    for instrument in &instruments {
                        println!(
                            "  {}  {}  amount {}",
                            instrument.id.yellow(),
                            instrument.effective_status(now()),
                            instrument.amount
                        );
                    }
                    Ok(())
                }
            }
        }
        ShowTarget::Journal { id } => {
            let key = id.parse::<InstrumentId>()?.to_key(key_format);
            let Some(journal) = instrument_journal(&store, &key)? else {
                bail!("no instrument {key}");
            };
            match format {
                OutputFormat::Json => print_json(&journal),
                OutputFormat::Text => {
                    println!("Journal for instrument {}", key.yellow().bold());
                    for entry in &journal.escrows {
                        let amount = if entry.amount.is_negative() {
                            entry.amount.to_string().red()
                        } else {
                            entry.amount.to_string().green()
                        };
                        println!(
                            "  escrow   {}  {}  from {}",
                            render_time(entry.timestamp).dimmed(),
                            amount,
                            entry.from
                        );
                    }
                    for entry in &journal.transfers {
                        println!(
                            "  transfer {}  {} → {}",
                            render_time(entry.timestamp).dimmed(),
                            entry.from,
                            entry.to
                        );
                    }
                    Ok(())
                }
            }
        }
        ShowTarget::Handshake { user, auditor } => {
            let pair = PairKey::new(user.parse()?, auditor.parse()?);
            let Some(handshake) = store.load::<Handshake>(&pair.handshake_key())? else {
                bail!("no handshake between {} and {}", pair.user, pair.auditor);
            };
            match format {
                OutputFormat::Json => print_json(&handshake),
                OutputFormat::Text => {
                    let state = if handshake.completed {
                        "completed".green().bold()
                    } else {
                        "pending".yellow()
                    };
                    println!("Handshake {} ({})", handshake.id.cyan(), state);
                    println!("  User:    {}", handshake.user);
                    println!("  Auditor: {}", handshake.auditor);
                    println!("  Since:   {}", render_time(handshake.completed_at));
                    Ok(())
                }
            }
        }
        ShowTarget::Currency { address } => {
            let address: Address = address.parse()?;
            let Some(currency) = store.load::<Erc20>(&address.to_key())? else {
                bail!("no currency {address}");
            };
            match format {
                OutputFormat::Json => print_json(&currency),
                OutputFormat::Text => {
                    println!(
                        "Currency {}  symbol {}  decimals {}",
                        currency.id.to_string().cyan(),
                        or_dash(currency.symbol),
                        or_dash(currency.decimals)
                    );
                    Ok(())
                }
            }
        }
        ShowTarget::Cursor => {
            let cursor = store.load::<Cursor>(Cursor::KEY)?;
            match (format, cursor) {
                (OutputFormat::Json, cursor) => print_json(&cursor),
                (OutputFormat::Text, Some(cursor)) => {
                    println!(
                        "Cursor {} after {} event(s), {} instrument keys",
                        cursor.position.to_string().cyan(),
                        cursor.events_applied,
                        cursor.key_format
                    );
                    Ok(())
                }
                (OutputFormat::Text, None) => {
                    println!("No events applied yet.");
                    Ok(())
                }
            }
        }
    }
}

fn print_account(account: &Account) {
    println!("Account {}", account.id.to_string().cyan().bold());
    for category in InstrumentCategory::ALL {
        println!("  {:<15} {}", category.to_string(), account.count(category));
    }
    println!("  {:<15} {}", "auditors_req", account.auditors_requested);
    println!("  {:<15} {}", "users_req", account.users_requested);
}

fn print_instrument(instrument: &Instrument) {
    let status = instrument.effective_status(now()).to_string();
    let status = if instrument.status.is_terminal() {
        status.dimmed()
    } else {
        status.green()
    };
    println!("Instrument {} ({})", instrument.id.yellow().bold(), status);
    if instrument.placeholder {
        println!("  {}", "placeholder: creation event not seen yet".yellow());
    }
    println!("  Amount:    {}", instrument.amount);
    println!("  Escrowed:  {}", instrument.escrowed);
    println!("  Currency:  {}", or_dash(instrument.currency));
    println!("  Drawer:    {}", or_dash(instrument.drawer));
    println!("  Recipient: {}", or_dash(instrument.recipient));
    println!("  Owner:     {}", or_dash(instrument.owner));
    println!("  Auditor:   {}", or_dash(instrument.auditor));
    println!("  Expiry:    {}", render_time(instrument.expiry.low_u64()));
    if let Some(created) = instrument.created_at {
        println!("  Created:   {}", render_time(created));
    }
    if let Some(memo) = &instrument.memo {
        println!("  Memo:      {}", memo.blue());
    }
    println!(
        "  Journal:   {} escrow, {} transfer",
        instrument.escrows.len(),
        instrument.transfers.len()
    );
}

// ---------------------------------------------------------------------------
// balance / check / config
// ---------------------------------------------------------------------------

fn cmd_balance(config: &IndexerConfig, format: OutputFormat, args: BalanceArgs) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let key = args
        .id
        .parse::<InstrumentId>()?
        .to_key(store_key_format(&store, config)?);
    let balance = net_escrowed(&store, &key)?;
    match format {
        OutputFormat::Json => print_json(&serde_json::json!({
            "instrument": key,
            "net_escrowed": balance,
        })),
        OutputFormat::Text => {
            println!("Instrument {} net escrowed {}", key.yellow(), balance.to_string().bold());
            Ok(())
        }
    }
}

fn cmd_check(config: &IndexerConfig, format: OutputFormat, args: CheckArgs) -> anyhow::Result<()> {
    let store = open_store(config)?;
    let report = ConsistencyChecker::new(&store).check()?;
    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Text => {
            println!(
                "Checked {} account(s), {} instrument(s), {} handshake(s)",
                report.accounts_checked, report.instruments_checked, report.handshakes_checked
            );
            if !report.placeholders.is_empty() {
                println!(
                    "  {} {} placeholder instrument(s) awaiting creation",
                    "!".yellow(),
                    report.placeholders.len()
                );
            }
            if report.is_clean() {
                println!("{} No issues.", "✓".green().bold());
            } else {
                for violation in &report.violations {
                    println!("  {} {}", "✗".red(), violation);
                }
            }
        }
    }
    if args.strict && !report.is_clean() {
        bail!("{} consistency violation(s)", report.violations.len());
    }
    Ok(())
}

fn cmd_config(config: &IndexerConfig, path: Option<&Path>, args: ConfigArgs) -> anyhow::Result<()> {
    let text = config.to_toml()?;
    if args.write {
        let Some(path) = path else {
            bail!("--write needs --config <PATH>");
        };
        std::fs::write(path, &text).with_context(|| format!("writing {}", path.display()))?;
        println!("{} Wrote {}", "✓".green().bold(), path.display().to_string().bold());
    } else {
        print!("{text}");
    }
    Ok(())
}
