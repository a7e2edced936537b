mod config;
mod heater_api;
mod heater_watch;
mod relay_ctl;
mod relay_types;
mod shutdown;
mod signals;

use anyhow::Context;
use anyhow::Result;
use clap::builder::NonEmptyStringValueParser;
use clap::ArgAction;
use clap::Parser;
use config::parse_relays;
use config::RelayConfig;
use heater_api::http_client;
use heater_api::HttpStatusSource;
use heater_watch::HeaterWatch;
use log::debug;
use log::error;
use log::info;
use log::warn;
use reqwest::blocking::Client;
use relay_ctl::GpioRelay;
use relay_ctl::LoggingRelay;
use relay_ctl::Relay;
use rppal::gpio::Gpio;
use shutdown::Shutdown;
use std::process;
use std::sync::mpsc;
use std::sync::mpsc::Receiver;
use std::sync::mpsc::Sender;
use std::thread;
use std::time::Duration;
use std::time::Instant;

/// Switches heater relays to the state requested by the preheat API.
#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    /// Base URL of the preheat API
    #[arg(long, env = "PREHEATBOTURL", value_parser = NonEmptyStringValueParser::new())]
    url: String,

    /// User whose heaters are watched
    #[arg(long, env = "PREHEATBOTUSERNAME", value_parser = NonEmptyStringValueParser::new())]
    username: String,

    /// Comma separated, alternating GPIO pin and heater id, e.g. 4,kitchen,17,bedroom
    #[arg(long, env = "RELAYS", value_parser = NonEmptyStringValueParser::new())]
    relays: String,

    /// Seconds to wait before retrying a failed poll
    #[arg(long, env = "RETRY_DELAY_SECS", default_value_t = 30)]
    retry_delay_secs: u64,

    /// Upper bound in seconds for a single (long-poll) request
    #[arg(long, env = "REQUEST_TIMEOUT_SECS", default_value_t = 300)]
    request_timeout_secs: u64,

    /// Seconds to wait on shutdown for watchers blocked in a long-poll before
    /// exiting without them; keep below the service manager's stop timeout
    #[arg(long, env = "SHUTDOWN_GRACE_SECS", default_value_t = 10)]
    shutdown_grace_secs: u64,

    /// Drive relays active-high instead of active-low
    #[arg(long)]
    no_invert: bool,

    /// Log relay changes instead of driving GPIO pins
    #[arg(long)]
    dry_run: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Silence all log output
    #[arg(short, long)]
    quiet: bool,
}

fn open_relays(
    relays: &[RelayConfig],
    dry_run: bool,
    inverted: bool,
) -> Result<Vec<Box<dyn Relay>>> {
    if dry_run {
        return Ok(relays
            .iter()
            .map(|relay| Box::new(LoggingRelay::new(relay.pin, &relay.id)) as Box<dyn Relay>)
            .collect());
    }

    let gpio = Gpio::new().context("Failed to open GPIO peripheral")?;
    let mut result = Vec::<Box<dyn Relay>>::with_capacity(relays.len());
    for relay in relays {
        let gpio_relay = GpioRelay::open(&gpio, relay.pin, &relay.id, inverted)
            .with_context(|| {
                format!(
                    "Failed to claim GPIO pin {} for relay '{}'",
                    relay.pin, relay.id
                )
            })?;
        result.push(Box::new(gpio_relay));
    }
    Ok(result)
}

type Watch = HeaterWatch<HttpStatusSource, Box<dyn Relay>>;

/// Binds each configured relay to its actuator and a status source of its own.
fn build_watches(
    relays: &[RelayConfig],
    actuators: Vec<Box<dyn Relay>>,
    client: &Client,
    url: &str,
    username: &str,
    retry_delay: Duration,
    shutdown: &Shutdown,
) -> Vec<Watch> {
    relays
        .iter()
        .zip(actuators)
        .map(|(relay, actuator)| {
            let source = HttpStatusSource::new(client.clone(), url, username, &relay.id);
            HeaterWatch::new(source, actuator, retry_delay, shutdown.clone())
        })
        .collect()
}

/// Reports its watcher as finished when dropped, also when the watcher panics.
struct Finished {
    name: String,
    done: Sender<String>,
}

impl Drop for Finished {
    fn drop(&mut self) {
        let _ = self.done.send(self.name.clone());
    }
}

/// Waits until `count` watchers have finished or `grace` has passed. Returns
/// the number of watchers still running.
fn await_watchers(done: &Receiver<String>, count: usize, grace: Duration) -> usize {
    let deadline = Instant::now() + grace;
    let mut finished = 0;
    while finished < count {
        match done.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            Ok(name) => {
                debug!("Watcher '{}' finished", name);
                finished += 1;
            }
            Err(_) => break,
        }
    }
    count - finished
}

fn run(args: Args) -> Result<()> {
    let relays = parse_relays(&args.relays).context("Invalid RELAYS")?;

    let mut signals =
        signals::termination_signals().context("Failed to register termination signals")?;

    let client = http_client(Duration::from_secs(args.request_timeout_secs))
        .context("Failed to create HTTP client")?;
    let actuators = open_relays(&relays, args.dry_run, !args.no_invert)?;

    let shutdown = Shutdown::new();
    let watches = build_watches(
        &relays,
        actuators,
        &client,
        &args.url,
        &args.username,
        Duration::from_secs(args.retry_delay_secs),
        &shutdown,
    );

    let (done_tx, done_rx) = mpsc::channel();
    let mut handles = Vec::with_capacity(watches.len());
    for mut watch in watches {
        let name = format!("watch-{}", watch.relay_id());
        let finished = Finished {
            name: name.clone(),
            done: done_tx.clone(),
        };
        let handle = thread::Builder::new()
            .name(name)
            .spawn(move || {
                let _finished = finished;
                watch.run();
            })
            .context("Failed to spawn watcher thread")?;
        handles.push(handle);
    }
    info!("Watching {} heater(s) of user '{}'", handles.len(), args.username);

    let signal = signals::wait_for_termination(&mut signals)
        .context("Termination signal stream closed unexpectedly")?;
    info!(
        "Received {}, waiting for watchers to finish",
        signals::signal_name(signal)
    );
    shutdown.trigger();

    let grace = Duration::from_secs(args.shutdown_grace_secs);
    let pending = await_watchers(&done_rx, handles.len(), grace);
    if pending > 0 {
        warn!(
            "{} watcher(s) still inside a request after {:?}, exiting anyway",
            pending, grace
        );
        return Ok(());
    }

    for handle in handles {
        let name = handle.thread().name().unwrap_or("watcher").to_string();
        if handle.join().is_err() {
            error!("Watcher thread '{}' panicked", name);
        }
    }
    info!("Shut down");

    Ok(())
}

fn main() {
    let args = Args::parse();

    if let Err(e) = stderrlog::new()
        .module(module_path!())
        .quiet(args.quiet)
        .verbosity(args.verbose as usize + 2)
        .timestamp(stderrlog::Timestamp::Second)
        .init()
    {
        eprintln!("Failed to initialize logging: {}", e);
        process::exit(1);
    }

    if let Err(e) = run(args) {
        error!("{:#}", e);
        process::exit(1);
    }
}
