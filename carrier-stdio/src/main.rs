// Carrier bridge host: JSON-lines requests on stdin, replies and events on stdout.

mod config;
mod protocol;

use std::sync::Arc;
use std::time::Duration;

use carrier_core::{Bridge, EventCategory, EventRecord, EventSink, LoopbackLibrary};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing_subscriber::EnvFilter;

use protocol::{Outgoing, Request};

const VERSION: &str = env!("CARGO_PKG_VERSION");
const DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

fn main() -> anyhow::Result<()> {
    for arg in std::env::args().skip(1) {
        if arg == "--version" || arg == "-V" {
            println!("carrier-stdio {}", VERSION);
            return Ok(());
        }
    }

    let cfg = config::load();
    init_tracing(&cfg.log_filter);
    let bridge = Arc::new(Bridge::new(
        Arc::new(LoopbackLibrary::new()),
        cfg.bridge_config(),
    ));
    tracing::info!(version = VERSION, data_dir = %cfg.data_dir.display(), "carrier bridge host started");

    let rt = tokio::runtime::Runtime::new()?;
    let result = rt.block_on(async {
        let (out_tx, out_rx) = unbounded_channel();
        let writer = tokio::spawn(write_lines(tokio::io::stdout(), out_rx));
        install_event_sinks(&bridge, out_tx.clone());

        let served = tokio::select! {
            r = serve(BufReader::new(tokio::io::stdin()), &bridge, &out_tx) => r,
            r = shutdown_signal() => r,
        };

        bridge.shutdown();
        bridge.clear_sink_provider();
        bridge.listeners().clear_all();
        drop(out_tx);
        // A callback thread still finishing a delivery may hold a sender briefly.
        let _ = tokio::time::timeout(DRAIN_TIMEOUT, writer).await;
        served
    });
    // The stdin reader sits on a blocking thread that only returns on input.
    rt.shutdown_timeout(Duration::from_millis(100));
    tracing::info!("carrier bridge host stopped");
    result
}

fn init_tracing(default_filter: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Every category's listener forwards its records to the stdout writer.
fn install_event_sinks(bridge: &Bridge, out: UnboundedSender<Outgoing>) {
    bridge.set_sink_provider(Arc::new(move |_category: EventCategory| {
        let out = out.clone();
        Arc::new(move |record: &EventRecord| {
            let _ = out.send(Outgoing::Event {
                event: record.clone(),
            });
        }) as Arc<dyn EventSink>
    }));
}

/// Run requests in arrival order until EOF.
async fn serve<R: AsyncBufRead + Unpin>(
    reader: R,
    bridge: &Bridge,
    out: &UnboundedSender<Outgoing>,
) -> anyhow::Result<()> {
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let reply = match Request::parse(line) {
            Ok(req) => {
                tracing::debug!(callback_id = req.callback_id, command = %req.command, "request");
                Outgoing::reply(req.callback_id, bridge.dispatch(&req.command, &req.args))
            }
            Err(bad) => match bad.callback_id {
                Some(callback_id) => Outgoing::Error {
                    callback_id,
                    error: bad.message,
                },
                None => {
                    tracing::warn!(error = %bad.message, "dropping unreadable request line");
                    continue;
                }
            },
        };
        if out.send(reply).is_err() {
            break;
        }
    }
    tracing::info!("stdin closed");
    Ok(())
}

/// Single writer so lines never interleave and per-object event order survives.
async fn write_lines<W: AsyncWrite + Unpin>(
    mut out: W,
    mut rx: UnboundedReceiver<Outgoing>,
) -> std::io::Result<()> {
    while let Some(msg) = rx.recv().await {
        let mut line = msg.to_line();
        line.push('\n');
        out.write_all(line.as_bytes()).await?;
        out.flush().await?;
    }
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM (Unix).
async fn shutdown_signal() -> anyhow::Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = signal(SignalKind::terminate())?;
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {}
            _ = sigterm.recv() => {}
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await?;
    }
    tracing::info!("shutdown signal received");
    Ok(())
}
