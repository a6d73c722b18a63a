// soma_gst - BODY organ daemon
// GStreamer introspection and control service accessible via Unix Domain Socket

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use soma_gst::config::{EngineKind, OrganConfig};
use soma_gst::organ::{GstOrgan, Organ, Response, Stimulus};

/// Largest request frame accepted from a client
const MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

#[derive(Parser)]
#[command(name = "soma_gst", version, about = "SOMA GStreamer Daemon - Pipeline Introspection Organ")]
struct Args {
    /// Unix socket path for UDS server
    #[arg(long, default_value = "/tmp/soma_gst.sock")]
    socket_path: String,

    /// Engine backend building and running pipelines
    #[arg(long, value_enum, default_value_t = EngineKind::Launch)]
    engine: EngineKind,

    /// Synchronous run timeout in seconds when a request gives none (<= 0 waits for EOS)
    #[arg(long, default_value_t = 5.0)]
    default_timeout: f64,

    /// Bus messages kept per background pipeline
    #[arg(long, default_value_t = 100)]
    message_log_capacity: usize,

    /// gst-launch binary
    #[arg(long, default_value = "gst-launch-1.0")]
    gst_launch: String,

    /// gst-inspect binary
    #[arg(long, default_value = "gst-inspect-1.0")]
    gst_inspect: String,
}

impl Args {
    fn organ_config(&self) -> OrganConfig {
        OrganConfig {
            engine: self.engine,
            default_timeout_secs: self.default_timeout,
            message_log_capacity: self.message_log_capacity,
            gst_launch_bin: self.gst_launch.clone(),
            gst_inspect_bin: self.gst_inspect.clone(),
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info"))
        )
        .init();

    let args = Args::parse();

    info!("🎛️  Starting SOMA GStreamer Daemon");
    info!("   Socket: {}", args.socket_path);

    // Track startup time for health checks
    let start_time = std::time::Instant::now();

    let config = args.organ_config();
    let organ = Arc::new(GstOrgan::new(config.clone()));

    info!("   ✓ {:?} engine initialized", config.engine);

    // Remove old socket if exists
    let socket_path = PathBuf::from(&args.socket_path);
    if socket_path.exists() {
        std::fs::remove_file(&socket_path)
            .context("Failed to remove old socket")?;
    }

    // Create UDS listener
    let listener = UnixListener::bind(&socket_path)
        .context("Failed to bind Unix socket")?;

    info!("   ✓ Listening on {}", args.socket_path);

    let card = organ.describe();
    info!("🎛️  {} v{}", card.name, card.version);
    for func in card.functions.iter() {
        info!("      • {} - {}", func.name, func.description);
    }

    // Serve requests
    loop {
        match listener.accept().await {
            Ok((stream, _addr)) => {
                let organ = Arc::clone(&organ);
                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream, organ, start_time).await {
                        error!("Connection error: {}", e);
                    }
                });
            }
            Err(e) => {
                error!("Accept error: {}", e);
            }
        }
    }
}

fn error_response(message: String) -> Response {
    Response {
        ok: false,
        output: serde_json::json!({ "error": message }),
        latency_ms: 0,
        cost: None,
    }
}

/// Handle a single UDS connection
async fn handle_connection(
    mut stream: UnixStream,
    organ: Arc<GstOrgan>,
    start_time: std::time::Instant,
) -> Result<()> {
    let mut buffer = vec![0u8; 65536]; // 64KB buffer

    loop {
        // Read request length (4 bytes)
        let mut len_buf = [0u8; 4];
        match stream.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                debug!("Client disconnected");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        }

        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_FRAME_BYTES {
            anyhow::bail!("Request frame of {} bytes exceeds {} byte limit", len, MAX_FRAME_BYTES);
        }
        if len > buffer.len() {
            buffer.resize(len, 0);
        }

        // Read request body
        stream.read_exact(&mut buffer[..len]).await?;

        let response = match serde_json::from_slice::<Stimulus>(&buffer[..len]) {
            Err(e) => error_response(format!("Failed to parse stimulus: {}", e)),
            // Handle health check specially (no organ processing needed)
            Ok(stimulus) if stimulus.op == "health" || stimulus.op == "health.check" => Response {
                ok: true,
                output: serde_json::json!({
                    "status": "healthy",
                    "organ": "soma_gst",
                    "version": env!("CARGO_PKG_VERSION"),
                    "uptime_ms": start_time.elapsed().as_millis() as u64,
                }),
                latency_ms: 0,
                cost: None,
            },
            Ok(stimulus) => {
                debug!("Received: op={}", stimulus.op);
                match organ.stimulate(stimulus).await {
                    Ok(resp) => resp,
                    Err(e) => {
                        error!("Stimulate error: {}", e);
                        error_response(e.to_string())
                    }
                }
            }
        };

        // Serialize response
        let response_bytes = serde_json::to_vec(&response)
            .context("Failed to serialize response")?;

        // Write response length + body
        let len_bytes = (response_bytes.len() as u32).to_be_bytes();
        stream.write_all(&len_bytes).await?;
        stream.write_all(&response_bytes).await?;
        stream.flush().await?;

        debug!("Sent: ok={}, latency={}ms", response.ok, response.latency_ms);
    }
}
