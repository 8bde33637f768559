//! Sensormesh Node - host process for the sensor mesh gateway
//!
//! This binary runs a gateway with:
//! - UDP stand-in for the radio mesh
//! - Controller link on stdin/stdout, a serial port or TCP
//! - Optional signing and status LEDs
//!
//! Host pins are simulated, so an inclusion button only works when the
//! gateway is embedded with a `Hardware` that reads real GPIO.

use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use sensormesh_gateway::{
    BeginOptions, ChannelLink, ControllerConfig, ControllerLink, Gateway, GatewayConfig,
    KeyedHashSigner, MeshTransport, NodeId, StatusLeds, UdpMesh,
};

#[derive(Parser, Debug)]
#[command(name = "sensormesh-node")]
#[command(about = "Gateway between a sensor mesh and a home-automation controller")]
struct Args {
    /// JSON configuration file (flags below override it)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Address of this gateway in the mesh
    #[arg(long)]
    node_id: Option<NodeId>,

    /// Local UDP address for the mesh
    #[arg(long)]
    bind: Option<SocketAddr>,

    /// Static mesh route, as `node-id=ip:port` (repeatable)
    #[arg(long = "peer", value_parser = parse_peer)]
    peers: Vec<(NodeId, SocketAddr)>,

    /// Inclusion window opened at startup, e.g. `60s` (0 disables)
    #[arg(long, value_parser = humantime::parse_duration)]
    inclusion_duration: Option<Duration>,

    /// Talk to the controller over this serial port
    #[arg(long, conflicts_with = "tcp")]
    serial: Option<PathBuf>,

    /// Serial baud rate
    #[arg(long, requires = "serial")]
    baud_rate: Option<u32>,

    /// Accept the controller on this TCP address
    #[arg(long)]
    tcp: Option<SocketAddr>,

    /// Pre-shared signing key (64 hex characters)
    #[arg(long)]
    psk: Option<String>,

    /// Drop unsigned mesh traffic
    #[arg(long)]
    require_signed: bool,

    /// Drive the status LEDs
    #[arg(long)]
    leds: bool,

    /// Delay between gateway steps
    #[arg(long, value_parser = humantime::parse_duration, default_value = "10ms")]
    poll_interval: Duration,

    /// Print the effective configuration as JSON and exit
    #[arg(long)]
    print_config: bool,

    /// Enable verbose logging
    #[arg(long, short)]
    verbose: bool,
}

fn parse_peer(s: &str) -> Result<(NodeId, SocketAddr), String> {
    let (id, addr) = s
        .split_once('=')
        .ok_or_else(|| format!("expected node-id=ip:port, got {:?}", s))?;
    let id = id
        .trim()
        .parse::<NodeId>()
        .map_err(|e| format!("bad node id {:?}: {}", id, e))?;
    let addr = addr
        .trim()
        .parse::<SocketAddr>()
        .map_err(|e| format!("bad address {:?}: {}", addr, e))?;
    Ok((id, addr))
}

/// Merge the configuration file with command-line overrides
fn load_config(args: &Args) -> anyhow::Result<GatewayConfig> {
    let mut config = match &args.config {
        Some(path) => GatewayConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => GatewayConfig::default(),
    };

    if let Some(node_id) = args.node_id {
        config.radio.node_id = node_id;
    }
    if let Some(bind) = args.bind {
        config.radio.bind = bind;
    }
    config.radio.peers.extend(args.peers.iter().copied());

    if let Some(duration) = args.inclusion_duration {
        config.inclusion.duration = duration;
    }

    if let Some(port) = &args.serial {
        let baud_rate = match (&config.controller, args.baud_rate) {
            (_, Some(baud_rate)) => baud_rate,
            (ControllerConfig::Serial { baud_rate, .. }, None) => *baud_rate,
            _ => sensormesh_gateway::DEFAULT_BAUD_RATE,
        };
        config.controller = ControllerConfig::Serial {
            port: port.clone(),
            baud_rate,
        };
    } else if let Some(bind) = args.tcp {
        config.controller = ControllerConfig::Tcp { bind };
    }

    if args.psk.is_some() {
        config.signing.psk = args.psk.clone();
    }
    if args.require_signed {
        config.signing.require_signed = true;
    }
    if args.leds {
        config.leds.enabled = true;
    }

    config.validate()?;
    Ok(config)
}

/// Open the controller link selected by the configuration
fn controller_link(config: &ControllerConfig) -> anyhow::Result<Box<dyn ControllerLink>> {
    match config {
        ControllerConfig::Stdio => {
            let (link, endpoint) = ChannelLink::pair();
            let (commands, responses) = endpoint.into_parts();
            tokio::spawn(read_stdin(commands));
            tokio::spawn(write_stdout(responses));
            Ok(Box::new(link.with_name("stdio")))
        }
        #[cfg(feature = "serial")]
        ControllerConfig::Serial { port, baud_rate } => Ok(Box::new(
            sensormesh_gateway::SerialLink::new(port.to_string_lossy().into_owned())
                .with_baud_rate(*baud_rate),
        )),
        #[cfg(not(feature = "serial"))]
        ControllerConfig::Serial { .. } => {
            anyhow::bail!("serial controller link needs the `serial` feature")
        }
        #[cfg(feature = "tcp")]
        ControllerConfig::Tcp { bind } => Ok(Box::new(sensormesh_gateway::TcpLink::new(*bind))),
        #[cfg(not(feature = "tcp"))]
        ControllerConfig::Tcp { .. } => {
            anyhow::bail!("TCP controller link needs the `tcp` feature")
        }
    }
}

/// Forward controller lines from stdin to the gateway
async fn read_stdin(commands: UnboundedSender<String>) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if commands.send(line).is_err() {
                    break;
                }
            }
            Ok(None) => {
                info!("Controller input closed");
                break;
            }
            Err(e) => {
                error!("Failed to read controller input: {}", e);
                break;
            }
        }
    }
}

/// Write gateway lines to stdout
async fn write_stdout(mut responses: UnboundedReceiver<String>) {
    let mut stdout = tokio::io::stdout();
    while let Some(mut line) = responses.recv().await {
        line.push('\n');
        if let Err(e) = stdout.write_all(line.as_bytes()).await {
            error!("Failed to write to controller: {}", e);
            break;
        }
        if let Err(e) = stdout.flush().await {
            warn!("Failed to flush controller output: {}", e);
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Logs go to stderr; stdout may carry the controller protocol
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = load_config(&args)?;
    if args.print_config {
        println!("{}", serde_json::to_string_pretty(&config)?);
        return Ok(());
    }

    info!(
        node_id = config.radio.node_id,
        bind = %config.radio.bind,
        peers = config.radio.peers.len(),
        "Starting sensormesh gateway"
    );

    if let Some(pin) = config.inclusion.button_pin {
        warn!(pin, "Host pins are simulated, the inclusion button will never be pressed");
    }

    let mesh = UdpMesh::from_config(&config.radio);
    let controller = controller_link(&config.controller)?;

    let mut gateway = Gateway::new(mesh, controller);
    if let Some(key) = config.signing.key()? {
        info!(require_signed = config.signing.require_signed, "Signing enabled");
        gateway = gateway.with_signer(
            KeyedHashSigner::new(key).require_signed(config.signing.require_signed),
        );
    }
    if config.leds.enabled {
        gateway = gateway.with_status_leds(StatusLeds::from_config(&config.leds));
    }

    gateway.begin(
        BeginOptions::from_config(&config)
            .callback(|msg| info!(%msg, "Message for the gateway")),
    );
    if let Some(addr) = gateway.mesh().local_addr() {
        info!(%addr, mesh = gateway.mesh().name(), "Mesh listening");
    }

    let mut ticker = tokio::time::interval(args.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if gateway.process() {
                    debug!("Delivered a mesh message to the controller");
                }
            }
            result = &mut shutdown => {
                if let Err(e) = result {
                    error!("Failed to listen for Ctrl-C: {}", e);
                }
                break;
            }
        }
    }

    info!(stats = ?gateway.stats(), "Gateway stopped");
    Ok(())
}
