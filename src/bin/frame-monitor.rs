//! Frame Monitor
//!
//! A bench server for soilbridge nodes. Accepts TCP sessions one at a time,
//! prints the metadata header block and every decoded frame, answers pings,
//! and can serve a sensor configuration.

use clap::Parser;
use soilbridge::protocol::{parse_header_block, Frame, Opcode, PacketCodec, SensorConfig};
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::signal;
use tracing::{error, info, warn};

/// Largest header block accepted before the session is dropped
const MAX_HEADER_BLOCK: usize = 4096;

/// Bench server printing soilbridge frames
#[derive(Parser)]
#[command(name = "frame-monitor")]
#[command(about = "Accept soilbridge sessions and print their frames")]
#[command(version)]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:9453")]
    listen: String,

    /// Output format (pretty or compact)
    #[arg(short, long, default_value = "pretty")]
    format: OutputFormat,

    /// Configuration pushed on connect and served on request, as
    /// OFFSET,LOW,HIGH,INTERVAL_MS
    #[arg(long, value_parser = parse_sensor_config)]
    config: Option<SensorConfig>,

    /// Ping the node at this interval in milliseconds (0 disables)
    #[arg(long, default_value_t = 0)]
    ping_ms: u64,
}

#[derive(Clone, Debug, clap::ValueEnum)]
enum OutputFormat {
    /// Color-coded with timestamps
    Pretty,
    /// One plain line per frame
    Compact,
}

const RESET: &str = "\x1b[0m";

fn color_code(opcode: Opcode) -> &'static str {
    match opcode {
        Opcode::Ping | Opcode::Pong => "\x1b[0;37m",
        Opcode::SubmitTelemetry => "\x1b[1;32m",
        Opcode::ClientSubmitConfig
        | Opcode::ServerSetClientConfig
        | Opcode::ServerGetClientConfig
        | Opcode::ClientGetServerConfig => "\x1b[1;36m",
        Opcode::LogMessage => "\x1b[1;33m",
        Opcode::DebugReset | Opcode::DebugRestart | Opcode::DebugDisconnectSession => "\x1b[1;31m",
        Opcode::Empty => "\x1b[0;37m",
    }
}

fn parse_sensor_config(value: &str) -> Result<SensorConfig, String> {
    let fields: Vec<u32> = value
        .split(',')
        .map(|field| field.trim().parse::<u32>().map_err(|e| format!("{field:?}: {e}")))
        .collect::<Result<_, _>>()?;
    match fields.as_slice() {
        [offset, low, high, interval_ms] => Ok(SensorConfig {
            offset: *offset,
            low: *low,
            high: *high,
            interval_ms: *interval_ms,
        }),
        _ => Err("expected OFFSET,LOW,HIGH,INTERVAL_MS".to_string()),
    }
}

fn describe(frame: &Frame) -> String {
    match frame.opcode() {
        Opcode::SubmitTelemetry => match frame.payload().first() {
            Some(moisture) => format!("moisture={moisture}%"),
            None => String::new(),
        },
        Opcode::ClientSubmitConfig | Opcode::ServerSetClientConfig => match frame.sensor_config() {
            Ok(c) => format!(
                "offset={} low={} high={} interval={}ms",
                c.offset, c.low, c.high, c.interval_ms
            ),
            Err(e) => format!("<{e}>"),
        },
        Opcode::LogMessage => format!("{:?}", frame.log_text()),
        _ => String::new(),
    }
}

fn format_frame(frame: &Frame, format: &OutputFormat, started: Instant) -> String {
    let elapsed = started.elapsed().as_secs_f64();
    let opcode = frame.opcode();
    match format {
        OutputFormat::Compact => format!("{elapsed:.3} {opcode} {}", describe(frame)),
        OutputFormat::Pretty => {
            let color = color_code(opcode);
            format!("{color}[{opcode:?}]{RESET} +{elapsed:.3}s {}", describe(frame))
        }
    }
}

/// Read until the empty line closing the header block. Bytes past it are
/// already framed traffic and are returned.
async fn read_header_block(stream: &mut TcpStream) -> std::io::Result<(String, Vec<u8>)> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 512];
    loop {
        if let Some(end) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            let rest = buf.split_off(end + 4);
            return Ok((String::from_utf8_lossy(&buf).into_owned(), rest));
        }
        if buf.len() > MAX_HEADER_BLOCK {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "header block too large",
            ));
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(std::io::ErrorKind::UnexpectedEof.into());
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

async fn serve_session(
    mut stream: TcpStream,
    args: &Args,
) -> Result<(), Box<dyn std::error::Error>> {
    let (block, rest) = read_header_block(&mut stream).await?;
    for (key, value) in parse_header_block(&block) {
        let shown = if key.ends_with("-Auth") { "***" } else { value.as_str() };
        println!("  {key}: {shown}");
    }

    if let Some(config) = &args.config {
        let push = Frame::config(Opcode::ServerSetClientConfig, config)?;
        stream.write_all(&push.encode()).await?;
        info!(?config, "Pushed sensor configuration");
    }

    let started = Instant::now();
    let mut codec = PacketCodec::new();
    let mut pending = rest;
    let mut chunk = [0u8; 1024];
    let mut ping = (args.ping_ms > 0)
        .then(|| tokio::time::interval(Duration::from_millis(args.ping_ms)));

    loop {
        for result in codec.feed_all(&pending) {
            let frame = match result {
                Ok(frame) => frame,
                Err(e) => {
                    warn!(error = %e, "Undecodable frame");
                    continue;
                }
            };
            println!("{}", format_frame(&frame, &args.format, started));

            let reply = match frame.opcode() {
                Opcode::Ping => Some(Frame::pong()),
                Opcode::ClientGetServerConfig => match &args.config {
                    Some(config) => Some(Frame::config(Opcode::ServerSetClientConfig, config)?),
                    None => None,
                },
                _ => None,
            };
            if let Some(reply) = reply {
                stream.write_all(&reply.encode()).await?;
            }
        }
        pending.clear();

        let n = match ping.as_mut() {
            Some(ticker) => {
                tokio::select! {
                    read = stream.read(&mut chunk) => read?,
                    _ = ticker.tick() => {
                        stream.write_all(&Frame::ping().encode()).await?;
                        continue;
                    }
                }
            }
            None => stream.read(&mut chunk).await?,
        };
        if n == 0 {
            return Ok(());
        }
        pending.extend_from_slice(&chunk[..n]);
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let listener = TcpListener::bind(&args.listen).await?;
    info!("Listening on {}", args.listen);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                stream.set_nodelay(true)?;
                println!("Session from {peer}");
                match serve_session(stream, &args).await {
                    Ok(()) => println!("Session from {peer} closed"),
                    Err(e) => error!("Session from {} failed: {}", peer, e),
                }
            }
            _ = signal::ctrl_c() => {
                info!("Shutting down monitor");
                return Ok(());
            }
        }
    }
}
