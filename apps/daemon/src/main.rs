//! wavecast - stream line-in audio to UPnP/DLNA renderers
//!
//! Reads raw S16LE stereo from a sample source, serves it over HTTP as WAV or
//! raw PCM, discovers media renderers with SSDP, and starts or stops the
//! selected renderers as the audio comes and goes.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;
use stream_server::control_api::{create_router, AppState};
use stream_server::stream::{stream_router, ClientRegistry, StreamServer, StreamState};
use stream_server::upnp::{ControlEngine, DiscoveryEngine};
use stream_server::{ActivityMonitor, ReaderSource, Settings, ToneSource};
use tokio::signal;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use wavecast_core::{MemorySelectionStore, RendererRegistry, SampleSource, SelectionStore};
use wavecast_persistence::SqliteSelectionStore;

/// How long shutdown waits for the frame task to notice the stop flag
const FRAME_TASK_GRACE: Duration = Duration::from_millis(500);

/// Command-line arguments for wavecast
#[derive(Parser, Debug)]
#[command(name = "wavecast")]
#[command(about = "Stream line-in audio to UPnP/DLNA renderers")]
#[command(version)]
struct Args {
    /// TOML configuration file
    #[arg(short, long, env = "WAVECAST_CONFIG")]
    config: Option<PathBuf>,

    /// HTTP port for the stream and the API (overrides the config file)
    #[arg(short, long, env = "WAVECAST_PORT")]
    port: Option<u16>,

    /// Sample source: "stdin", "tone", or a path to a raw S16LE file or FIFO
    #[arg(short, long, default_value = "stdin", env = "WAVECAST_SOURCE")]
    source: String,

    /// Seconds of tone per cycle for the tone source (0 plays continuously)
    #[arg(long, default_value = "0")]
    tone_on: u64,

    /// Seconds of silence per cycle for the tone source
    #[arg(long, default_value = "0")]
    tone_off: u64,

    /// SQLite database for the renderer selection
    #[arg(long, env = "WAVECAST_DB")]
    db: Option<PathBuf>,

    /// Keep the selection in memory only
    #[arg(long)]
    no_persist: bool,

    /// Disable SSDP discovery
    #[arg(long)]
    no_discovery: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,wavecast=debug,stream_server=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let settings = load_settings(&args)?;
    let port = settings.server.bind.port();

    info!("Starting wavecast {}", env!("CARGO_PKG_VERSION"));

    let store = open_store(&args, &settings).await?;
    let registry = RendererRegistry::new();
    let (clients, presence) =
        ClientRegistry::new(settings.server.client_queue_frames, settings.server.enqueue_wait());

    // Control engine; the persisted selection is loaded before anything can trigger playback
    let (engine, control) = ControlEngine::new(registry.clone(), store.clone(), &settings.control, port)
        .context("Failed to create control engine")?;
    let engine_shutdown = engine.shutdown_sender();
    let engine_task = tokio::spawn(engine.run());
    control.reload_selection();

    // HTTP: audio stream plus the renderer API on one listener
    let app = stream_router(StreamState {
        clients: clients.clone(),
        sample_rate: settings.audio.sample_rate,
        send_buffer_bytes: settings.server.send_buffer_bytes,
    })
    .merge(create_router(AppState {
        registry: registry.clone(),
        store,
        control: control.clone(),
        clients: clients.clone(),
    }));

    let mut server = StreamServer::new(settings.server.bind);
    server
        .start(app)
        .await
        .with_context(|| format!("Failed to bind {}", settings.server.bind))?;

    let discovery_tasks = if settings.discovery.enabled {
        let discovery = DiscoveryEngine::new(registry.clone(), settings.discovery.clone())
            .context("Failed to create discovery engine")?;
        discovery.start().context("Failed to start SSDP discovery")?
    } else {
        info!("SSDP discovery disabled");
        Vec::new()
    };

    // Frame task on its own thread
    let source = open_source(&args, &settings)?;
    let monitor = ActivityMonitor::new(
        source,
        clients,
        presence,
        Arc::new(control.clone()),
        &settings.audio,
        &settings.activity,
    );
    let frame_shutdown = monitor.shutdown_flag();
    let mut frame_task = monitor.spawn().context("Failed to start frame task")?;

    let source_ended = tokio::select! {
        _ = shutdown_signal() => false,
        result = frame_task.finished() => {
            match result {
                Some(Ok(())) => warn!("Sample source ended, shutting down"),
                Some(Err(_)) => warn!("Frame task failed, shutting down"),
                None => error!("Frame task panicked"),
            }
            true
        }
    };

    frame_shutdown.store(true, Ordering::Relaxed);
    for task in discovery_tasks {
        task.abort();
    }
    server.stop().await;

    let _ = engine_shutdown.send(()).await;
    if tokio::time::timeout(Duration::from_secs(2), engine_task).await.is_err() {
        warn!("Control engine did not stop in time");
    }

    // A source blocked in read cannot see the flag; the thread is left behind
    if !source_ended
        && tokio::time::timeout(FRAME_TASK_GRACE, frame_task.finished())
            .await
            .is_err()
    {
        debug!("Frame task still blocked on its source, exiting without it");
    }

    info!("Shutdown complete");
    Ok(())
}

fn load_settings(args: &Args) -> Result<Settings> {
    let mut settings = match &args.config {
        Some(path) => {
            info!("Loading configuration from {}", path.display());
            Settings::load(path)?
        }
        None => Settings::default(),
    };

    if let Some(port) = args.port {
        settings.server.bind.set_port(port);
    }
    if args.no_discovery {
        settings.discovery.enabled = false;
    }
    if let Some(db) = &args.db {
        settings.storage.db_path = Some(db.clone());
    }
    settings.validate()?;

    if settings.server.bind.port() == 0 {
        anyhow::bail!("An explicit port is required; renderers are given it in the stream URI");
    }
    Ok(settings)
}

async fn open_store(args: &Args, settings: &Settings) -> Result<Arc<dyn SelectionStore>> {
    if args.no_persist {
        info!("Keeping the renderer selection in memory");
        return Ok(Arc::new(MemorySelectionStore::new()));
    }

    let db_path = match &settings.storage.db_path {
        Some(path) => path.clone(),
        None => default_db_path()?,
    };
    info!("Database path: {}", db_path.display());

    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let pool = wavecast_persistence::init_db(&db_path)
        .await
        .with_context(|| format!("Failed to open database {}", db_path.display()))?;
    Ok(Arc::new(SqliteSelectionStore::new(pool)))
}

fn default_db_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir()
        .ok_or_else(|| anyhow::anyhow!("Failed to get config directory"))?
        .join("wavecast");
    Ok(config_dir.join("wavecast.db"))
}

fn open_source(args: &Args, settings: &Settings) -> Result<Box<dyn SampleSource>> {
    let source: Box<dyn SampleSource> = match args.source.as_str() {
        "stdin" => Box::new(ReaderSource::new("stdin", std::io::stdin())),
        "tone" => {
            let mut tone = ToneSource::new(settings.audio.sample_rate, 440.0);
            if args.tone_on > 0 {
                tone = tone.with_cadence(
                    Duration::from_secs(args.tone_on),
                    Duration::from_secs(args.tone_off),
                );
            }
            Box::new(tone)
        }
        path => {
            let file = std::fs::File::open(Path::new(path))
                .with_context(|| format!("Failed to open sample source {}", path))?;
            Box::new(ReaderSource::new(path, file))
        }
    };
    Ok(source)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, shutting down");
        },
        _ = terminate => {
            info!("Received terminate signal, shutting down");
        },
    }
}
