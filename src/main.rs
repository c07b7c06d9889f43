//! Telemetry Store - Command Line Entry Point
//!
//! Runs the storage engine with the standard sample sources and drives it
//! from line commands on stdin.
//!
//! ```text
//! telemetry-store [config.toml]
//! ```

use anyhow::{bail, Context};
use std::io::BufRead;
use std::time::Duration;
use telemetry_store::{
    config::StorageConfig,
    engine::{ControlReply, ControlRequest, StorageClient, StorageService, SupervisorEvent},
    sources::{self, BatterySample, EnvironmentalSample},
    types::StorageMode,
    TypeId,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const REPLY_TIMEOUT: Duration = Duration::from_secs(2);
const BATCH_READ_TIMEOUT: Duration = Duration::from_millis(500);

const HELP: &str = "commands: passthrough | buffer | flush | clear | stats | batch <id> | \
close <id> | battery <pct> | env <temp> <pressure> <humidity> | help | quit";

fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,telemetry_store=debug")),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    tracing::info!("Starting telemetry store");

    let config = match std::env::args().nth(1) {
        Some(path) => StorageConfig::load(&path)
            .with_context(|| format!("Failed to load configuration from {}", path))?,
        None => StorageConfig::default(),
    };

    let registry = sources::standard_registry(config.max_types)
        .context("Failed to build the type registry")?;
    let (service, client) =
        StorageService::new(config, registry).context("Failed to start the storage engine")?;
    let handle = service.spawn()?;

    println!("{}", HELP);
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("Failed to read stdin")?;
        let words: Vec<&str> = line.split_whitespace().collect();
        let Some((&command, args)) = words.split_first() else {
            continue;
        };

        if command == "quit" || command == "exit" {
            break;
        }

        if let Err(e) = run_command(&client, command, args) {
            println!("error: {:#}", e);
        }
        report_async(&client);
    }

    tracing::info!("Shutting down...");
    client.shutdown();
    if handle.join().is_err() {
        bail!("storage worker panicked");
    }
    Ok(())
}

fn run_command(client: &StorageClient, command: &str, args: &[&str]) -> anyhow::Result<()> {
    match command {
        "help" => println!("{}", HELP),
        "passthrough" => {
            let reply = client.set_mode(StorageMode::Passthrough, REPLY_TIMEOUT)?;
            print_reply(client, reply);
        }
        "buffer" => {
            let reply = client.set_mode(StorageMode::Buffer, REPLY_TIMEOUT)?;
            print_reply(client, reply);
        }
        "flush" => print_reply(client, client.request(ControlRequest::Flush, REPLY_TIMEOUT)?),
        "clear" => print_reply(client, client.request(ControlRequest::Clear, REPLY_TIMEOUT)?),
        "stats" => {
            let stats = client.stats(REPLY_TIMEOUT)?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        "batch" => {
            let id = parse_session_id(args)?;
            let reply = client.request_batch(id, REPLY_TIMEOUT)?;
            let available = matches!(reply, ControlReply::BatchAvailable { .. });
            print_reply(client, reply);
            if available {
                for item in client.batch_reader().read_available(BATCH_READ_TIMEOUT)? {
                    println!(
                        "batch item: {} {}",
                        type_name(client, item.data_type),
                        hex(&item.payload)
                    );
                }
            }
        }
        "close" => {
            let id = parse_session_id(args)?;
            print_reply(client, client.close_batch(id, REPLY_TIMEOUT)?);
        }
        "battery" => {
            let [pct] = args else {
                bail!("usage: battery <pct>");
            };
            let percentage: f64 = pct.parse().context("invalid percentage")?;
            client.publish(BatterySample { percentage }.to_message())?;
        }
        "env" => {
            let [t, p, h] = args else {
                bail!("usage: env <temp> <pressure> <humidity>");
            };
            let sample = EnvironmentalSample {
                temperature: t.parse().context("invalid temperature")?,
                pressure: p.parse().context("invalid pressure")?,
                humidity: h.parse().context("invalid humidity")?,
            };
            client.publish(sample.to_message())?;
        }
        other => bail!("unknown command {:?}, try help", other),
    }
    Ok(())
}

fn parse_session_id(args: &[&str]) -> anyhow::Result<u32> {
    let [raw] = args else {
        bail!("expected one session id");
    };
    let id = match raw.strip_prefix("0x").or_else(|| raw.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => raw.parse(),
    };
    id.with_context(|| format!("invalid session id {:?}", raw))
}

fn print_reply(client: &StorageClient, reply: ControlReply) {
    match reply {
        ControlReply::Stats(stats) => println!("stats: {} records", stats.total_records),
        other => println!("reply: {:?}", other),
    }
    report_async(client);
}

/// Print data messages and supervisor alerts that arrived meanwhile
fn report_async(client: &StorageClient) {
    // Give the worker a moment to process samples published just before
    std::thread::sleep(Duration::from_millis(10));
    for msg in client.drain_data() {
        println!(
            "data: {} {}",
            type_name(client, msg.data_type),
            hex(&msg.payload)
        );
    }
    for event in client.supervisor().try_iter() {
        if let SupervisorEvent::Fatal { reason } = event {
            println!("FATAL: {}", reason);
        }
    }
}

fn type_name(client: &StorageClient, id: TypeId) -> String {
    client
        .registry()
        .get(id)
        .map(|ty| ty.name.clone())
        .unwrap_or_else(|| id.to_string())
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}
