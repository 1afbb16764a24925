//! `kevinbot-com` – Kevinbot communication service
//!
//! Starts the bridge between the hardware controller, the operator remotes
//! and the telemetry broker.  It:
//!
//! 1. Prints the banner and loads `~/.kevinbot/com.toml` (or
//!    `$KEVINBOT_CONFIG`), writing a default file on first run.
//! 2. Installs the tracing pipeline from the `[logging]` section.
//! 3. Opens the core, remote and eye serial links and connects to the MQTT
//!    broker.  With `--dry-run` every transport and host effector is an
//!    in-memory recorder instead.
//! 4. Intercepts **Ctrl-C** to queue an E-Stop, drain the command queue and
//!    exit.
//!
//! Flags: `--dry-run`, `--print-config`.

mod config;

use std::process;
use std::sync::Arc;

use colored::Colorize;
use kevinbot_bridge::{BridgeConfig, BridgeInbound, BridgeLinks, BridgeService, init_tracing};
use kevinbot_hal::{CommandHost, Effectors, RecordingHost};
use kevinbot_link::{
    LinkWriter, MemoryLink, SerialLineLink, TelemetryBus, TelemetrySink,
    TelemetrySource, XBeeLink, mqtt,
};
use kevinbot_types::{ComError, Link};
use tracing::{info, warn};

fn main() {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let dry_run = args.iter().any(|a| a == "--dry-run");
    let print_config = args.iter().any(|a| a == "--print-config");

    print_banner();

    // ── Configuration ─────────────────────────────────────────────────────
    let cfg = match config::load() {
        Ok(Some(cfg)) => {
            println!("  Config loaded from {}", config::config_path().display().to_string().bold());
            cfg
        }
        Ok(None) => first_run_config(),
        Err(e) => fail("Config error", e),
    };
    if let Err(e) = cfg.validate() {
        fail("Invalid config", e);
    }
    if print_config {
        match toml::to_string_pretty(&cfg) {
            Ok(raw) => println!("{raw}"),
            Err(e) => fail("Cannot render config", e),
        }
        return;
    }

    // ── Structured logging ────────────────────────────────────────────────
    // Hold the guard for the whole process so pending spans are flushed.
    let _guard = init_tracing("kevinbot-com", &cfg.logging);

    // ── Runtime ───────────────────────────────────────────────────────────
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(e) => fail("Cannot start the async runtime", e),
    };

    let result = runtime.block_on(async move {
        let (links, inbound, effectors) = if dry_run {
            println!("  {}", "Dry run: no serial ports, broker or host commands.".yellow());
            dry_run_transports(&cfg)
        } else {
            open_transports(&cfg)?
        };
        let service = BridgeService::new(cfg, links, effectors)?;
        install_ctrlc(service.clone());
        println!("  Press {} to stop.\n", "Ctrl-C".bold().cyan());
        service.run(inbound).await
    });

    if let Err(e) = result {
        fail("Bridge stopped", e);
    }
    println!("{}", "  ✓ Kevinbot communication service stopped.".green());
}

// ─────────────────────────────────────────────────────────────────────────────
// Transports
// ─────────────────────────────────────────────────────────────────────────────

type Transports = (BridgeLinks, BridgeInbound, Effectors);

/// Open every real transport.  The core and remote ports are required; the
/// eye controller is optional.
fn open_transports(cfg: &BridgeConfig) -> Result<Transports, ComError> {
    let (core, core_rx) = SerialLineLink::open(Link::Core, &cfg.core_serial())?;
    info!(port = %cfg.serial.core_port, "core link open");
    let (remote, remote_rx) = XBeeLink::open(&cfg.remote_xbee())?;
    info!(port = %cfg.serial.remote_port, "remote link open");

    let (eye, eye_rx) = match cfg.eye_serial() {
        Some(settings) => match SerialLineLink::open(Link::Eye, &settings) {
            Ok((eye, rx)) => (Some(eye as Arc<dyn LinkWriter>), Some(rx)),
            Err(e) => {
                warn!(port = %settings.port, error = %e, "eye link unavailable; continuing without it");
                (None, None)
            }
        },
        None => (None, None),
    };

    let (telemetry, source) = open_telemetry(cfg);
    let effectors = Effectors::from_host(Arc::new(CommandHost::new(cfg.host_commands())));
    Ok((
        BridgeLinks {
            core,
            remote,
            eye,
            telemetry,
        },
        BridgeInbound {
            core: core_rx,
            remote: remote_rx,
            eye: eye_rx,
            telemetry: source,
        },
        effectors,
    ))
}

/// MQTT when enabled, otherwise an in-process bus nobody else listens on.
fn open_telemetry(cfg: &BridgeConfig) -> (Arc<dyn TelemetrySink>, Box<dyn TelemetrySource>) {
    let topics = cfg.topics.subscribed();
    if cfg.mqtt.enabled {
        let settings = cfg.mqtt_settings();
        info!(broker = %format!("{}:{}", settings.host, settings.port), "connecting to mqtt");
        let (sink, source) = mqtt::connect(&settings, topics);
        (Arc::new(sink), Box::new(source))
    } else {
        warn!("mqtt disabled; telemetry stays in-process");
        let bus = Arc::new(TelemetryBus::default());
        let source = bus.subscribe_topics(topics);
        (bus, Box::new(source))
    }
}

/// In-memory links that answer the readiness poll, plus a recording host.
fn dry_run_transports(cfg: &BridgeConfig) -> Transports {
    let (core, core_rx) = MemoryLink::new(Link::Core);
    core.set_responder(|line| (line == b"connection.isready\n").then(|| b"ready\n".to_vec()));
    let (remote, remote_rx) = MemoryLink::new(Link::Remote);
    let bus = Arc::new(TelemetryBus::default());
    let source = bus.subscribe_topics(cfg.topics.subscribed());
    (
        BridgeLinks {
            core,
            remote,
            eye: None,
            telemetry: bus,
        },
        BridgeInbound {
            core: core_rx,
            remote: remote_rx,
            eye: None,
            telemetry: Box::new(source),
        },
        Effectors::from_host(Arc::new(RecordingHost::default())),
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Ctrl-C
// ─────────────────────────────────────────────────────────────────────────────

fn install_ctrlc(service: BridgeService) {
    if let Err(e) = ctrlc::set_handler(move || {
        println!();
        println!("{}", "⚠  Ctrl-C received – stopping the robot …".yellow().bold());
        service.request_estop(false);
        println!("{}", "  ✓ E-Stop queued.".green());
        service.shutdown();
    }) {
        warn!(error = %e, "Failed to install Ctrl-C handler; the robot will not be stopped on Ctrl-C");
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// First run
// ─────────────────────────────────────────────────────────────────────────────

fn first_run_config() -> BridgeConfig {
    let cfg = BridgeConfig::default();
    println!("  No configuration found; using defaults.");
    match config::save(&cfg) {
        Ok(()) => println!(
            "  {} Default config written to {}",
            "✓".green().bold(),
            config::config_path().display().to_string().bold()
        ),
        Err(e) => println!("  {}: {}", "Could not write default config".yellow(), e),
    }
    cfg
}

// ─────────────────────────────────────────────────────────────────────────────
// Banner
// ─────────────────────────────────────────────────────────────────────────────

fn print_banner() {
    println!();
    println!("{}", r#"   __ __          _      __        __ "#.bold().cyan());
    println!("{}", r#"  / //_/__ _  __ (_)__  / /  ___  / /_"#.bold().cyan());
    println!("{}", r#" / ,< / -_) |/ // / _ \/ _ \/ _ \/ __/"#.bold().cyan());
    println!("{}", r#"/_/|_|\__/|___//_/_//_/_.__/\___/\__/ "#.bold().cyan());
    println!();
    println!("  {} {}", "Kevinbot".bold(), format!("v{}", env!("CARGO_PKG_VERSION")).dimmed());
    println!("  Communication Service");
    println!();
}

fn fail(what: &str, error: impl std::fmt::Display) -> ! {
    eprintln!("{}: {}", what.red().bold(), error);
    process::exit(1);
}
