use super::{ClientId, ClientRegistry};
use crate::types::StreamFormat;
use crate::wav::wav_header;
use anyhow::Result;
use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use bytes::BytesMut;
use std::net::SocketAddr;
use tokio::task::JoinHandle;
use tracing::{error, info};

const CHANNELS: u16 = 2;
const NO_CACHE: &str = "no-cache,no-store,must-revalidate,max-age=0";

/// Shared state for the streaming routes
#[derive(Clone)]
pub struct StreamState {
    pub clients: ClientRegistry,
    pub sample_rate: u32,
    /// Upper bound on the size of one body chunk
    pub send_buffer_bytes: usize,
}

/// Routes serving `/stream.pcm` and `/stream.wav`
pub fn stream_router(state: StreamState) -> Router {
    Router::new()
        .route(StreamFormat::Pcm.path(), get(pcm_handler))
        .route(StreamFormat::Wav.path(), get(wav_handler))
        .with_state(state)
}

async fn pcm_handler(
    State(state): State<StreamState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Response {
    open_stream(state, addr, StreamFormat::Pcm)
}

async fn wav_handler(
    State(state): State<StreamState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
) -> Response {
    open_stream(state, addr, StreamFormat::Wav)
}

fn open_stream(state: StreamState, addr: SocketAddr, format: StreamFormat) -> Response {
    let session = match state.clients.connect(ClientId::new(), addr, format) {
        Ok(session) => session,
        Err(e) => {
            error!("Rejecting {} stream for {}: {}", format, addr, e);
            return (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response();
        }
    };

    let preamble = match format {
        StreamFormat::Wav => Some(Bytes::copy_from_slice(&wav_header(state.sample_rate))),
        StreamFormat::Pcm => None,
    };
    let max_bytes = state.send_buffer_bytes;

    // The session lives inside the body; hyper drops the body when the
    // connection goes away, which unregisters the client
    let stream = async_stream::stream! {
        if let Some(header) = preamble {
            yield Ok::<Bytes, std::io::Error>(header);
        }

        while let Some(batch) = session.queue().next_batch(max_bytes).await {
            let size: usize = batch.iter().map(|frame| frame.len()).sum();
            let mut chunk = BytesMut::with_capacity(size);
            for frame in &batch {
                chunk.extend_from_slice(frame.data());
            }
            yield Ok(chunk.freeze());
        }
    };

    (
        StatusCode::OK,
        [
            (header::CONTENT_TYPE, format.content_type(state.sample_rate, CHANNELS)),
            (header::ACCEPT_RANGES, "none".to_string()),
            (header::CACHE_CONTROL, NO_CACHE.to_string()),
        ],
        Body::from_stream(stream),
    )
        .into_response()
}

/// HTTP server hosting the stream routes plus whatever else is merged into its router
pub struct StreamServer {
    addr: SocketAddr,
    local_addr: Option<SocketAddr>,
    server_handle: Option<JoinHandle<()>>,
}

impl StreamServer {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            local_addr: None,
            server_handle: None,
        }
    }

    /// Bind and start serving `app`. Returns the bound address.
    pub async fn start(&mut self, app: Router) -> Result<SocketAddr> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        let local_addr = listener.local_addr()?;
        info!("Stream server listening on {}", local_addr);

        let handle = tokio::spawn(async move {
            let service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, service).await {
                error!("Stream server error: {}", e);
            }
        });

        self.local_addr = Some(local_addr);
        self.server_handle = Some(handle);
        Ok(local_addr)
    }

    pub async fn stop(&mut self) {
        if let Some(handle) = self.server_handle.take() {
            info!("Stopping stream server");
            handle.abort();
        }
    }

    /// Address actually bound, once started
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }
}

impl Drop for StreamServer {
    fn drop(&mut self) {
        if let Some(handle) = self.server_handle.take() {
            handle.abort();
        }
    }
}
