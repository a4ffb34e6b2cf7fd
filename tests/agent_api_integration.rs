//! Integration tests for the agent HTTP API and the upload transport
//!
//! A tiny HTTP/1.1 responder on localhost stands in for the agent server.
//!
//! ```bash
//! cargo test --test agent_api_integration
//! ```

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

use voice_chat_lib::agent_api::{AgentApi, ApiError, ChatMessage};
use voice_chat_lib::streaming::{
    Channel, ChannelEvent, ControlMarker, InboundEvent, OutboundPayload,
};
use voice_chat_lib::transport::{build_channel, TransportMode};

// ============================================================================
// Fake agent server
// ============================================================================

struct Route {
    method: &'static str,
    path: &'static str,
    status: u16,
    body: Vec<u8>,
}

impl Route {
    fn json(method: &'static str, path: &'static str, status: u16, body: &str) -> Self {
        Self {
            method,
            path,
            status,
            body: body.as_bytes().to_vec(),
        }
    }
}

#[derive(Debug, Clone)]
struct Request {
    method: String,
    path: String,
    body: Vec<u8>,
}

type Requests = Arc<Mutex<Vec<Request>>>;

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

async fn read_request(stream: &mut TcpStream) -> Option<Request> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        if let Some(pos) = find(&buf, b"\r\n\r\n") {
            break pos + 4;
        }
        let n = stream.read(&mut chunk).await.ok()?;
        if n == 0 {
            return None;
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let mut lines = head.lines();
    let mut request_line = lines.next()?.split_whitespace();
    let method = request_line.next()?.to_string();
    let path = request_line.next()?.to_string();

    let mut content_length = None;
    let mut chunked = false;
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        match name.trim().to_ascii_lowercase().as_str() {
            "content-length" => content_length = value.trim().parse::<usize>().ok(),
            "transfer-encoding" => chunked = value.to_ascii_lowercase().contains("chunked"),
            _ => {}
        }
    }

    let mut body = buf[header_end..].to_vec();
    if let Some(len) = content_length {
        while body.len() < len {
            let n = stream.read(&mut chunk).await.ok()?;
            if n == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..n]);
        }
    } else if chunked {
        // Only the terminator matters; the raw chunked body is kept as-is
        while find(&body, b"0\r\n\r\n").is_none() {
            let n = stream.read(&mut chunk).await.ok()?;
            if n == 0 {
                break;
            }
            body.extend_from_slice(&chunk[..n]);
        }
    }

    Some(Request { method, path, body })
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        404 => "Not Found",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

/// Serve `routes` until the test ends. Returns the base URL and a request log.
async fn serve(routes: Vec<Route>) -> (String, Requests) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base_url = format!("http://{}", listener.local_addr().unwrap());
    let requests: Requests = Arc::default();
    let routes = Arc::new(routes);

    let log = requests.clone();
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                break;
            };
            let routes = routes.clone();
            let log = log.clone();
            tokio::spawn(async move {
                let Some(request) = read_request(&mut stream).await else {
                    return;
                };
                let (status, body) = routes
                    .iter()
                    .find(|r| r.method == request.method && r.path == request.path)
                    .map(|r| (r.status, r.body.clone()))
                    .unwrap_or((404, b"not found".to_vec()));
                log.lock().unwrap().push(request);

                let head = format!(
                    "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    status,
                    reason(status),
                    body.len()
                );
                let _ = stream.write_all(head.as_bytes()).await;
                let _ = stream.write_all(&body).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    (base_url, requests)
}

// ============================================================================
// AgentApi
// ============================================================================

#[tokio::test]
async fn empty_history() {
    let (base_url, _) = serve(vec![Route::json(
        "GET",
        "/agent/chat/s1/history",
        200,
        r#"{"history": []}"#,
    )])
    .await;

    let api = AgentApi::new(&base_url).unwrap();
    assert!(api.fetch_history("s1").await.unwrap().is_empty());
}

#[tokio::test]
async fn history_with_messages() {
    let (base_url, _) = serve(vec![Route::json(
        "GET",
        "/agent/chat/s1/history",
        200,
        r#"{"history": [{"role": "user", "content": "hi"}, {"role": "assistant", "content": "hello"}]}"#,
    )])
    .await;

    let api = AgentApi::new(&format!("{}/", base_url)).unwrap();
    assert_eq!(
        api.fetch_history("s1").await.unwrap(),
        vec![ChatMessage::user("hi"), ChatMessage::assistant("hello")]
    );
}

#[tokio::test]
async fn server_error_is_reported_with_status() {
    let (base_url, _) = serve(vec![Route::json(
        "GET",
        "/agent/chat/s1/history",
        500,
        r#"{"detail": "database down"}"#,
    )])
    .await;

    let api = AgentApi::new(&base_url).unwrap();
    match api.fetch_history("s1").await {
        Err(ApiError::Status { status, .. }) => assert_eq!(status, 500),
        other => panic!("expected status error, got {:?}", other),
    }
}

#[tokio::test]
async fn generate_voice_then_fetch_audio() {
    let (base_url, requests) = serve(vec![
        Route::json("POST", "/generate-voice", 200, r#"{"audio_url": "/audio/tts.mp3"}"#),
        Route {
            method: "GET",
            path: "/audio/tts.mp3",
            status: 200,
            body: vec![0xFF, 0xFB, 0x90, 0x00],
        },
    ])
    .await;

    let api = AgentApi::new(&base_url).unwrap();
    let url = api.generate_voice("good morning").await.unwrap();
    assert_eq!(url, "/audio/tts.mp3");
    assert_eq!(api.fetch_audio(&url).await.unwrap(), vec![0xFF, 0xFB, 0x90, 0x00]);

    let requests = requests.lock().unwrap();
    let body = String::from_utf8_lossy(&requests[0].body);
    assert!(body.contains("good morning"));
}

// ============================================================================
// Upload transport
// ============================================================================

async fn next_event(rx: &mut mpsc::UnboundedReceiver<ChannelEvent>) -> ChannelEvent {
    tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("timed out waiting for channel event")
        .expect("event stream closed")
}

#[tokio::test]
async fn upload_reply_replays_as_inbound_events() {
    let (base_url, requests) = serve(vec![
        Route::json(
            "POST",
            "/agent/chat/s1",
            200,
            r#"{"transcript": "hi there", "response": "Hello!", "audio_urls": ["/audio/a.wav", "/audio/b.wav"]}"#,
        ),
        Route {
            method: "GET",
            path: "/audio/a.wav",
            status: 200,
            body: vec![1, 2],
        },
        Route {
            method: "GET",
            path: "/audio/b.wav",
            status: 200,
            body: vec![3],
        },
    ])
    .await;

    let api = AgentApi::new(&base_url).unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut channel = build_channel(TransportMode::RequestResponse, tx, api, "s1", 16000);

    let id = channel.open("unused");
    let opened = next_event(&mut rx).await;
    assert!(matches!(opened, ChannelEvent::Opened { channel_id } if channel_id == id));
    assert!(channel.apply(&opened));
    assert!(channel.is_open());

    assert!(channel.send(OutboundPayload::Audio(vec![0; 3200])));
    assert!(channel.send(OutboundPayload::Control(ControlMarker::Stop)));

    let mut inbound = Vec::new();
    while inbound.last() != Some(&InboundEvent::EndOfAudio) {
        match next_event(&mut rx).await {
            ChannelEvent::Inbound { channel_id, event } => {
                assert_eq!(channel_id, id);
                inbound.push(event);
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    assert_eq!(
        inbound,
        vec![
            InboundEvent::UserTranscript("hi there".to_string()),
            InboundEvent::AssistantDelta("Hello!".to_string()),
            InboundEvent::EndOfLlm,
            InboundEvent::AudioChunk(vec![1, 2]),
            InboundEvent::AudioChunk(vec![3]),
            InboundEvent::EndOfAudio,
        ]
    );

    // The utterance went up as one WAV file in the "audio" field
    let requests = requests.lock().unwrap();
    let upload = requests
        .iter()
        .find(|r| r.method == "POST")
        .expect("no upload request");
    assert_eq!(upload.path, "/agent/chat/s1");
    assert!(find(&upload.body, b"name=\"audio\"").is_some());
    assert!(find(&upload.body, b"recording.wav").is_some());
    assert!(find(&upload.body, b"RIFF").is_some());
}

#[tokio::test]
async fn upload_reply_with_history_replays_as_snapshot() {
    let (base_url, _) = serve(vec![
        Route::json(
            "POST",
            "/agent/chat/s1",
            200,
            r#"{"transcript": "and now?", "response": "Still here.", "audio_urls": "/audio/a.wav",
                "history": [
                    {"role": "user", "content": "hi"},
                    {"role": "assistant", "content": "hello"},
                    {"role": "user", "content": "and now?"},
                    {"role": "assistant", "content": "Still here."}
                ]}"#,
        ),
        Route {
            method: "GET",
            path: "/audio/a.wav",
            status: 200,
            body: vec![7, 7],
        },
    ])
    .await;

    let api = AgentApi::new(&base_url).unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut channel = build_channel(TransportMode::RequestResponse, tx, api, "s1", 16000);

    channel.open("unused");
    let opened = next_event(&mut rx).await;
    assert!(channel.apply(&opened));

    assert!(channel.send(OutboundPayload::Audio(vec![0; 320])));
    assert!(channel.send(OutboundPayload::Control(ControlMarker::Stop)));

    let mut inbound = Vec::new();
    while inbound.last() != Some(&InboundEvent::EndOfAudio) {
        match next_event(&mut rx).await {
            ChannelEvent::Inbound { event, .. } => inbound.push(event),
            other => panic!("unexpected event {:?}", other),
        }
    }

    // The snapshot stands in for the transcript and response fields
    assert_eq!(
        inbound,
        vec![
            InboundEvent::History(vec![
                ChatMessage::user("hi"),
                ChatMessage::assistant("hello"),
                ChatMessage::user("and now?"),
                ChatMessage::assistant("Still here."),
            ]),
            InboundEvent::EndOfLlm,
            InboundEvent::AudioChunk(vec![7, 7]),
            InboundEvent::EndOfAudio,
        ]
    );
}

#[tokio::test]
async fn upload_failure_errors_the_channel() {
    let (base_url, _) = serve(vec![Route::json(
        "POST",
        "/agent/chat/s1",
        500,
        r#"{"detail": "boom"}"#,
    )])
    .await;

    let api = AgentApi::new(&base_url).unwrap();
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut channel = build_channel(TransportMode::RequestResponse, tx, api, "s1", 16000);

    channel.open("unused");
    let opened = next_event(&mut rx).await;
    channel.apply(&opened);

    channel.send(OutboundPayload::Audio(vec![0; 320]));
    channel.send(OutboundPayload::Control(ControlMarker::Stop));

    let event = next_event(&mut rx).await;
    assert!(matches!(&event, ChannelEvent::Errored { err, .. } if err.contains("500")));
    assert!(channel.apply(&event));
    assert!(!channel.is_open());
}
