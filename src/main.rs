use std::collections::HashSet;
use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use parkwise::config::{AppConfig, CliConfig, Command};
use parkwise::domain::model::LotId;
use parkwise::utils::error::{ConflictReason, ErrorKind, ParkingError};
use parkwise::utils::logger;
use parkwise::utils::validation::{
    parse_lot_id, parse_report_date, validate_slot_count, Validate,
};
use parkwise::{EngineSettings, ParkingEngine, SqliteStore, SystemClock};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Status code a transport would attach to each error kind.
fn http_status(kind: ErrorKind) -> u16 {
    match kind {
        ErrorKind::BadInput => 400,
        ErrorKind::NotFound => 404,
        ErrorKind::Conflict => 409,
        ErrorKind::Cancelled => 499,
        ErrorKind::StorageFailure => 500,
    }
}

fn exit_code(kind: ErrorKind) -> i32 {
    match kind {
        ErrorKind::BadInput => 2,
        ErrorKind::NotFound => 3,
        ErrorKind::Conflict => 4,
        ErrorKind::StorageFailure => 5,
        ErrorKind::Cancelled => 130,
    }
}

fn print_json(value: &impl Serialize) -> anyhow::Result<()> {
    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, value).context("serializing output")?;
    writeln!(stdout).context("writing output")?;
    Ok(())
}

fn report_failure(err: &ParkingError) -> anyhow::Result<()> {
    tracing::debug!(suggestion = err.recovery_suggestion(), "{}", err);
    print_json(&json!({
        "error": err.user_friendly_message(),
        "kind": err.kind(),
        "status": http_status(err.kind()),
        "suggestion": err.recovery_suggestion(),
    }))
}

fn load_config(cli: &CliConfig) -> Result<AppConfig, ParkingError> {
    let mut config = AppConfig::load(cli.config.as_deref())?;
    cli.apply_overrides(&mut config);
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliConfig::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            report_failure(&e)?;
            std::process::exit(exit_code(e.kind()));
        }
    };

    let level = Some(config.logging.level.as_str());
    if config.logging.json {
        logger::init_json_logger(cli.verbose, level);
    } else {
        logger::init_cli_logger(cli.verbose, level);
    }
    tracing::debug!(?config, "configuration loaded");

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("interrupt received, cancelling");
                cancel.cancel();
            }
        });
    }

    match run(&cli.command, &config, &cancel).await {
        Ok(output) => print_json(&output),
        Err(e) => {
            report_failure(&e)?;
            std::process::exit(exit_code(e.kind()));
        }
    }
}

async fn run(
    command: &Command,
    config: &AppConfig,
    cancel: &CancellationToken,
) -> Result<Value, ParkingError> {
    let store = Arc::new(SqliteStore::from_config(&config.database)?);
    let engine = ParkingEngine::new(
        store,
        Arc::new(SystemClock),
        EngineSettings::from(&config.engine),
    );

    let output = match command {
        Command::Init => {
            let database = if config.database.in_memory {
                ":memory:"
            } else {
                config.database.path.as_str()
            };
            json!({ "database": database, "initialized": true })
        }
        Command::CreateLot { name, slots } => {
            let slots = validate_slot_count(*slots, config.engine.max_slots_per_lot)?;
            serde_json::to_value(engine.create_lot_with(cancel, name, slots).await?)?
        }
        Command::Park { lot, registration } => {
            let lot_id = parse_lot_id(lot)?;
            serde_json::to_value(engine.park_vehicle_with(cancel, lot_id, registration).await?)?
        }
        Command::Unpark { registration } => {
            serde_json::to_value(engine.unpark_vehicle_with(cancel, registration).await?)?
        }
        Command::Status { lot } => {
            serde_json::to_value(engine.lot_status(parse_lot_id(lot)?).await?)?
        }
        Command::Report { lot, date } => {
            let lot_id = parse_lot_id(lot)?;
            let date = parse_report_date(date)?;
            serde_json::to_value(engine.daily_report(lot_id, date).await?)?
        }
        Command::Demo {
            slots,
            vehicles,
            rounds,
            ..
        } => serde_json::to_value(run_demo(&engine, cancel, *slots, *vehicles, *rounds).await?)?,
    };

    Ok(output)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DemoRound {
    round: u32,
    parked: usize,
    rejected_full: usize,
    failed: usize,
    distinct_slots: usize,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct DemoSummary {
    parking_lot_id: LotId,
    slots: u32,
    vehicles_per_round: u32,
    rounds: Vec<DemoRound>,
    total_fee_collected: i64,
}

/// Parks `vehicles` cars concurrently into a lot of `slots`, then unparks
/// everyone who got in. Each round should fill exactly `min(slots, vehicles)`
/// distinct slots.
async fn run_demo(
    engine: &ParkingEngine<SqliteStore>,
    cancel: &CancellationToken,
    slots: u32,
    vehicles: u32,
    rounds: u32,
) -> Result<DemoSummary, ParkingError> {
    let name = format!("demo-{}", LotId::new());
    let lot = engine.create_lot_with(cancel, &name, slots).await?;
    let mut summary = DemoSummary {
        parking_lot_id: lot.id,
        slots,
        vehicles_per_round: vehicles,
        rounds: Vec::new(),
        total_fee_collected: 0,
    };

    for round in 1..=rounds {
        let mut tasks = JoinSet::new();
        for vehicle in 0..vehicles {
            let engine = engine.clone();
            let cancel = cancel.clone();
            let lot_id = lot.id;
            tasks.spawn(async move {
                let registration = format!("DEMO-{}-{:04}", round, vehicle);
                engine.park_vehicle_with(&cancel, lot_id, &registration).await
            });
        }

        let mut parked = Vec::new();
        let mut rejected_full = 0;
        let mut failed = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(occupancy)) => parked.push(occupancy),
                Ok(Err(e)) if e.conflict_reason() == Some(ConflictReason::LotFull) => {
                    rejected_full += 1
                }
                Ok(Err(e)) => {
                    tracing::warn!(error = %e, "demo park failed");
                    failed += 1;
                }
                Err(e) => {
                    tracing::error!(error = %e, "demo task panicked");
                    failed += 1;
                }
            }
        }

        let distinct_slots = parked
            .iter()
            .map(|o| o.slot_id)
            .collect::<HashSet<_>>()
            .len();

        for occupancy in &parked {
            let closed = engine
                .unpark_vehicle_with(cancel, &occupancy.registration_number)
                .await?;
            summary.total_fee_collected += closed.fee.unwrap_or_default();
        }

        tracing::info!(round, parked = parked.len(), rejected_full, "demo round finished");
        summary.rounds.push(DemoRound {
            round,
            parked: parked.len(),
            rejected_full,
            failed,
            distinct_slots,
        });
    }

    Ok(summary)
}
