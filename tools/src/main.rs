//! guard-runner: headless driver for the SpendGuard engine.
//!
//! Usage:
//!   guard-runner --seed 42 --count 200 --users 5 --db ledger.db
//!   guard-runner --config guard.json --ipc-mode

mod synth;

use anyhow::Result;
use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use spendguard_core::{
    Clock, FraudAlert, GuardConfig, GuardEngine, GuardError, LedgerStore, ManualClock,
    NewTransaction, Severity, StatusSummary, TransactionKind, TransactionStatus,
};
use std::env;
use std::io::{self, BufRead, Write};
use std::sync::Arc;
use synth::SpendStream;

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcCommand {
    Record {
        user_id: String,
        /// Signed when `kind` is absent: negative is an expense.
        amount: f64,
        description: String,
        #[serde(default)]
        kind: Option<TransactionKind>,
        #[serde(default)]
        currency: Option<String>,
        #[serde(default)]
        transaction_date: Option<DateTime<FixedOffset>>,
        #[serde(default)]
        pending: bool,
    },
    Confirm {
        user_id: String,
        transaction_id: String,
    },
    Reject {
        user_id: String,
        transaction_id: String,
        #[serde(default)]
        reason: Option<String>,
    },
    Flag {
        user_id: String,
        transaction_id: String,
        #[serde(default)]
        reason: Option<String>,
    },
    Alerts {
        user_id: String,
        #[serde(default)]
        unread_only: bool,
    },
    MarkRead {
        alert_id: String,
    },
    Summary {
        user_id: String,
    },
    SetAlerts {
        user_id: String,
        enabled: bool,
    },
    Quit,
}

#[derive(serde::Serialize)]
struct AlertView<'a> {
    #[serde(flatten)]
    alert: &'a FraudAlert,
    severity: Severity,
}

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let seed = parse_arg(&args, "--seed", 42u64);
    let count = parse_arg(&args, "--count", 200u64);
    let users = parse_arg(&args, "--users", 5u64);
    let ipc_mode = args.iter().any(|a| a == "--ipc-mode");
    let db = flag_value(&args, "--db").unwrap_or(":memory:");
    let config = match flag_value(&args, "--config") {
        Some(path) => GuardConfig::load(path)?,
        None => GuardConfig::default(),
    };

    if !ipc_mode {
        println!("SpendGuard guard-runner");
        println!("  seed:      {seed}");
        println!("  count:     {count}");
        println!("  users:     {users}");
        println!("  db:        {db}");
        println!();
    }

    let store = if db == ":memory:" {
        LedgerStore::in_memory()?
    } else {
        LedgerStore::open(db)?
    };

    if ipc_mode {
        let engine = GuardEngine::build(config, store)?;
        run_ipc_loop(&engine)?;
    } else {
        // The synthetic run keeps its own clock so a seed replays exactly.
        let start = Utc.with_ymd_and_hms(2024, 1, 1, 8, 0, 0).single().unwrap_or_else(Utc::now);
        let clock = Arc::new(ManualClock::new(start));
        store.migrate()?;
        let engine = GuardEngine::new(config, store, clock.clone())?;
        run_synthetic(&engine, &clock, seed, count, users)?;
        print_summary(&engine, users)?;
    }

    Ok(())
}

fn run_synthetic(engine: &GuardEngine, clock: &ManualClock, seed: u64, count: u64, users: u64) -> Result<()> {
    let mut stream = SpendStream::new(seed, users);
    for n in 0..count {
        let next = stream.next_entry(clock.now());
        clock.advance(next.gap);
        let outcome = engine.record_transaction(next.entry)?;
        if outcome.suspicious() {
            log::info!(
                "entry={} user={} flagged score={:.2}",
                n,
                outcome.transaction.user_id,
                outcome.analysis.score
            );
        }
    }
    Ok(())
}

fn run_ipc_loop(engine: &GuardEngine) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut handle = stdin.lock();
    let mut buffer = String::new();

    loop {
        buffer.clear();
        let bytes_read = handle.read_line(&mut buffer)?;
        if bytes_read == 0 {
            break; // EOF
        }
        if buffer.trim().is_empty() {
            continue;
        }

        let cmd: IpcCommand = match serde_json::from_str(&buffer) {
            Ok(c) => c,
            Err(e) => {
                let err_json = serde_json::json!({ "error": e.to_string() });
                writeln!(stdout, "{}", err_json)?;
                stdout.flush()?;
                continue;
            }
        };
        if matches!(cmd, IpcCommand::Quit) {
            break;
        }

        // Business failures go back to the caller; only I/O ends the loop.
        let reply = match handle_command(engine, cmd) {
            Ok(value) => value,
            Err(e) => serde_json::json!({ "error": e.to_string(), "kind": error_kind(&e) }),
        };
        writeln!(stdout, "{}", reply)?;
        stdout.flush()?;
    }
    Ok(())
}

fn handle_command(engine: &GuardEngine, cmd: IpcCommand) -> Result<serde_json::Value, GuardError> {
    let reply = match cmd {
        IpcCommand::Record {
            user_id,
            amount,
            description,
            kind,
            currency,
            transaction_date,
            pending,
        } => {
            let mut entry = match kind {
                Some(kind) => NewTransaction::new(user_id, amount, kind, description),
                None => NewTransaction::from_signed(user_id, amount, description),
            };
            if let Some(currency) = currency {
                entry = entry.with_currency(currency);
            }
            if let Some(at) = transaction_date {
                entry = entry.at(at);
            }
            if pending {
                entry = entry.pending();
            }
            let outcome = engine.record_transaction(entry)?;
            serde_json::json!({
                "transaction": outcome.transaction,
                "suspicious": outcome.suspicious(),
                "reasons": outcome.analysis.reasons.iter().map(ToString::to_string).collect::<Vec<_>>(),
                "alert": outcome.alert.as_ref().map(|alert| AlertView { alert, severity: alert.severity() }),
            })
        }
        IpcCommand::Confirm { user_id, transaction_id } => {
            transition_reply(engine.confirm(&transaction_id, &user_id)?)
        }
        IpcCommand::Reject { user_id, transaction_id, reason } => {
            transition_reply(engine.reject(&transaction_id, &user_id, reason.as_deref())?)
        }
        IpcCommand::Flag { user_id, transaction_id, reason } => {
            transition_reply(engine.mark_suspicious(&transaction_id, &user_id, reason.as_deref())?)
        }
        IpcCommand::Alerts { user_id, unread_only } => {
            let alerts = engine.alerts(&user_id, unread_only)?;
            let views: Vec<_> = alerts
                .iter()
                .map(|alert| AlertView { alert, severity: alert.severity() })
                .collect();
            serde_json::json!({ "alerts": views })
        }
        IpcCommand::MarkRead { alert_id } => {
            serde_json::json!({ "marked": engine.mark_alert_read(&alert_id)? })
        }
        IpcCommand::Summary { user_id } => {
            serde_json::json!({ "summary": engine.status_summary(&user_id)? })
        }
        IpcCommand::SetAlerts { user_id, enabled } => {
            engine.set_fraud_alerts(&user_id, enabled)?;
            serde_json::json!({ "fraud_alerts_enabled": enabled })
        }
        IpcCommand::Quit => serde_json::Value::Null,
    };
    Ok(reply)
}

fn transition_reply(transition: spendguard_core::Transition) -> serde_json::Value {
    serde_json::json!({
        "from": transition.from,
        "to": transition.to,
        "note": transition.note,
        "transaction": transition.transaction,
    })
}

fn error_kind(error: &GuardError) -> &'static str {
    match error {
        GuardError::NotFound { .. } => "not_found",
        GuardError::InvalidTransition { .. } => "invalid_transition",
        GuardError::Validation(_) => "validation",
        GuardError::Conflict { .. } => "conflict",
        GuardError::StoreUnavailable(_) | GuardError::QueryTimeout { .. } => "store_unavailable",
        GuardError::Database(_) | GuardError::Serialization(_) | GuardError::Other(_) => "internal",
    }
}

fn print_summary(engine: &GuardEngine, users: u64) -> Result<()> {
    let mut totals = StatusSummary::default();
    let mut by_severity = [0usize; 3];
    let mut unread = 0usize;

    println!("=== RUN SUMMARY ===");
    for n in 1..=users.max(1) {
        let user_id = format!("user-{n}");
        let summary = engine.status_summary(&user_id)?;
        let alerts = engine.alerts(&user_id, false)?;
        println!(
            "  {user_id:<8} | txns: {:>4} | pending: {:>3} | suspicious: {:>3} | alerts: {:>3}",
            summary.total,
            summary.pending,
            summary.suspicious,
            alerts.len()
        );
        for status in TransactionStatus::ALL {
            totals.add(status, summary.count(status));
        }
        for alert in &alerts {
            by_severity[alert.severity() as usize] += 1;
            if !alert.is_read {
                unread += 1;
            }
        }
    }

    println!();
    println!("=== STATUS ===");
    for status in TransactionStatus::ALL {
        println!("  {:<11} {:>5}", status.to_string(), totals.count(status));
    }
    println!("  {:<11} {:>5}", "TOTAL", totals.total);

    println!();
    println!("=== ALERTS ===");
    for severity in [Severity::High, Severity::Medium, Severity::Low] {
        println!("  {:<11} {:>5}", severity.to_string(), by_severity[severity as usize]);
    }
    println!("  {:<11} {:>5}", "UNREAD", unread);
    Ok(())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2)
        .find(|w| w[0] == flag)
        .map(|w| w[1].as_str())
}
