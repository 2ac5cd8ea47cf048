use std::env;
use std::path::Path;
use std::time::Duration;

use controme::{ConfigEntry, Integration, MessageLogMode, Scanner, SetupFlow, SetupStep};
use tracing_subscriber::EnvFilter;

/// usage: monitor [config.json] [--scan] [--wire-log <path>]
#[tokio::main]
async fn main() -> controme::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    if args.iter().any(|a| a == "--scan") {
        let hosts = Scanner::builder().build()?.scan(None).await;
        if hosts.is_empty() {
            println!("No controller found.");
        }
        for host in hosts {
            println!("{} -> {}", host.title, host.base_url());
        }
        return Ok(());
    }

    let wire_log = args
        .iter()
        .position(|a| a == "--wire-log")
        .and_then(|i| args.get(i + 1).cloned());
    let config_path = args
        .iter()
        .find(|a| !a.starts_with("--") && Some(*a) != wire_log.as_ref())
        .cloned()
        .unwrap_or_else(|| "controme.json".to_string());

    let entry = load_or_setup(Path::new(&config_path)).await?;
    println!(
        "Monitoring house {} at {} every {}s",
        entry.credentials.house_id,
        entry.credentials.base_url,
        entry.update_interval_secs
    );

    let integration = Integration::setup_with(
        entry,
        |client| match wire_log {
            Some(path) => client.message_log(MessageLogMode::Diffed, path),
            None => client,
        },
        |coordinator| {
            coordinator.on_snapshot(|snapshot| {
                println!("--- {} (tick {})", snapshot.fetched_at.to_rfc3339(), snapshot.tick);
                for (floor, room) in snapshot.rooms() {
                    println!(
                        "[{} / {}] current: {} | target: {} | humidity: {}",
                        floor.name,
                        room.name,
                        fmt_temp(room.temperature),
                        fmt_temp(room.target_temperature),
                        room.humidity.map_or("-".to_string(), |h| format!("{h:.0}%")),
                    );
                    for sensor in &room.return_sensors {
                        println!("    {}: {}", sensor.description, fmt_temp(sensor.value));
                    }
                }
            })
        },
    )
    .await?;

    println!(
        "{} climate / {} sensor entities. Polling for updates...",
        integration.climates().len(),
        integration.sensors().len()
    );

    loop {
        tokio::time::sleep(integration.coordinator().update_interval()).await;
        if let Some(e) = integration.coordinator().last_error() {
            eprintln!("Last refresh failed: {e}");
        }
    }
}

async fn load_or_setup(path: &Path) -> controme::Result<ConfigEntry> {
    if path.exists() {
        return ConfigEntry::load(path);
    }
    if env::var("CONTROME_HOUSE_ID").is_ok() {
        return ConfigEntry::from_env();
    }

    let var = |key: &str| {
        env::var(key).map_err(|_| controme::Error::Config(format!("missing {key}")))
    };
    let mut flow = SetupFlow::new(var("CONTROME_URL")?, var("CONTROME_USER")?, var("CONTROME_PASSWORD")?)
        .probe_timeout(Duration::from_secs(5));
    let entry = match flow.start().await? {
        SetupStep::Done(entry) => entry,
        SetupStep::SelectHouse(houses) => {
            let names: Vec<&str> = houses.iter().map(|h| h.name.as_str()).collect();
            println!("Found {}; using {}", names.join(", "), houses[0].name);
            flow.select_house(&houses[0].id)?
        }
    };
    entry.save(path)?;
    println!("Saved configuration to {}", path.display());
    Ok(entry)
}

fn fmt_temp(value: Option<f64>) -> String {
    value.map_or("-".to_string(), |t| format!("{t:.1}\u{00b0}C"))
}
