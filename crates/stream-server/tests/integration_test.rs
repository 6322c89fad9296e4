use std::net::SocketAddr;
use std::time::Duration;
use stream_server::stream::{stream_router, ClientRegistry, StreamServer, StreamState};
use stream_server::wav::WAV_HEADER_LEN;
use stream_server::SampleFrame;

async fn start_server(queue_capacity: usize) -> (StreamServer, SocketAddr, ClientRegistry) {
    let (clients, _presence) = ClientRegistry::new(queue_capacity, Duration::ZERO);
    let app = stream_router(StreamState {
        clients: clients.clone(),
        sample_rate: 48000,
        send_buffer_bytes: 10 * 1024,
    });

    let mut server = StreamServer::new("127.0.0.1:0".parse().unwrap());
    let addr = server.start(app).await.unwrap();
    (server, addr, clients)
}

async fn wait_for_clients(clients: &ClientRegistry, expected: usize) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while clients.len() != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("client count never reached expected value");
}

fn frame(sequence: u64) -> SampleFrame {
    SampleFrame::new(sequence, vec![sequence as u8; 1920])
}

#[tokio::test]
async fn test_wav_stream_end_to_end() {
    let (_server, addr, clients) = start_server(10).await;

    let mut response = reqwest::get(format!("http://{}/stream.wav", addr)).await.unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.headers()["content-type"], "audio/wav");
    assert_eq!(response.headers()["accept-ranges"], "none");
    assert_eq!(
        response.headers()["cache-control"],
        "no-cache,no-store,must-revalidate,max-age=0"
    );

    wait_for_clients(&clients, 1).await;
    for seq in 1..=3 {
        assert_eq!(clients.broadcast(&frame(seq)), 1);
    }

    let expected_len = WAV_HEADER_LEN + 3 * 1920;
    let mut received = Vec::new();
    while received.len() < expected_len {
        let chunk = tokio::time::timeout(Duration::from_secs(5), response.chunk())
            .await
            .unwrap()
            .unwrap()
            .expect("stream ended early");
        received.extend_from_slice(&chunk);
    }

    assert_eq!(&received[0..4], b"RIFF");
    assert_eq!(&received[8..12], b"WAVE");
    assert_eq!(&received[12..16], b"fmt ");
    assert_eq!(u16::from_le_bytes(received[20..22].try_into().unwrap()), 1);
    assert_eq!(u16::from_le_bytes(received[22..24].try_into().unwrap()), 2);
    assert_eq!(u32::from_le_bytes(received[24..28].try_into().unwrap()), 48000);
    assert_eq!(u16::from_le_bytes(received[34..36].try_into().unwrap()), 16);
    assert_eq!(&received[36..40], b"data");

    let payload = &received[WAV_HEADER_LEN..expected_len];
    for (i, block) in payload.chunks(1920).enumerate() {
        assert!(block.iter().all(|b| *b == (i + 1) as u8));
    }

    drop(response);
    wait_for_clients(&clients, 0).await;
}

#[tokio::test]
async fn test_pcm_stream_has_no_header() {
    let (_server, addr, clients) = start_server(10).await;

    let mut response = reqwest::get(format!("http://{}/stream.pcm", addr)).await.unwrap();
    assert_eq!(
        response.headers()["content-type"],
        "audio/L16;rate=48000;channels=2"
    );

    wait_for_clients(&clients, 1).await;
    clients.broadcast(&frame(7));

    let chunk = tokio::time::timeout(Duration::from_secs(5), response.chunk())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert_eq!(chunk.len(), 1920);
    assert!(chunk.iter().all(|b| *b == 7));
}

#[tokio::test]
async fn test_clients_are_independent() {
    let (_server, addr, clients) = start_server(10).await;

    let first = reqwest::get(format!("http://{}/stream.pcm", addr)).await.unwrap();
    let mut second = reqwest::get(format!("http://{}/stream.pcm", addr)).await.unwrap();
    wait_for_clients(&clients, 2).await;

    drop(first);
    wait_for_clients(&clients, 1).await;

    clients.broadcast(&frame(9));
    let chunk = tokio::time::timeout(Duration::from_secs(5), second.chunk())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    assert!(chunk.iter().all(|b| *b == 9));
}

#[tokio::test]
async fn test_allocation_failure_returns_503() {
    let (_server, addr, clients) = start_server(0).await;

    let response = reqwest::get(format!("http://{}/stream.wav", addr)).await.unwrap();
    assert_eq!(response.status(), 503);
    assert!(clients.is_empty());
}
