//! Key endpoint transport tests against a local HTTP listener.
#![allow(clippy::expect_used, clippy::panic)]

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use gatekeeper_authn::{
    AuthError, HttpKeySetSource, KeySetSource, SigningKeyCache, TokenVerifier,
    jwks::MAX_JWKS_BYTES,
    testutil::{TestSigner, test_config},
};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::TcpListener,
};
use url::Url;

/// Serves the same canned response to every connection and counts requests.
async fn serve(status: &'static str, body: String) -> (Url, Arc<AtomicUsize>) {
    let head = format!(
        "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\n",
        body.len()
    );
    serve_raw(format!("{head}connection: close\r\n\r\n{body}").into_bytes()).await
}

/// Serves `body` with chunked transfer encoding, `chunk_size` bytes per chunk.
async fn serve_chunked(body: &[u8], chunk_size: usize) -> (Url, Arc<AtomicUsize>) {
    let mut response = b"HTTP/1.1 200 OK\r\ncontent-type: application/json\r\n\
        transfer-encoding: chunked\r\nconnection: close\r\n\r\n"
        .to_vec();
    for chunk in body.chunks(chunk_size) {
        response.extend_from_slice(format!("{:x}\r\n", chunk.len()).as_bytes());
        response.extend_from_slice(chunk);
        response.extend_from_slice(b"\r\n");
    }
    response.extend_from_slice(b"0\r\n\r\n");
    serve_raw(response).await
}

async fn serve_raw(response: Vec<u8>) -> (Url, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);
    let response = Arc::new(response);

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else { return };
            counter.fetch_add(1, Ordering::SeqCst);
            let response = Arc::clone(&response);
            tokio::spawn(async move {
                let mut buf = vec![0u8; 4096];
                let mut seen = Vec::new();
                while !seen.windows(4).any(|w| w == b"\r\n\r\n") {
                    match stream.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => seen.extend_from_slice(&buf[..n]),
                    }
                }
                let _ = stream.write_all(&response).await;
                let _ = stream.shutdown().await;
            });
        }
    });

    let url = Url::parse(&format!("http://{addr}/oauth2/default/v1/keys")).expect("url");
    (url, hits)
}

fn source(url: Url) -> HttpKeySetSource {
    HttpKeySetSource::new(url, Duration::from_secs(2)).expect("client")
}

#[tokio::test]
async fn test_fetch_parses_published_key_set() {
    let signer = TestSigner::new("k1");
    let body = serde_json::to_string(&signer.jwks()).expect("json");
    let (url, hits) = serve("200 OK", body).await;

    let jwks = source(url.clone()).fetch().await.expect("fetch");
    assert_eq!(jwks.keys.len(), 1);
    assert_eq!(jwks.keys[0].kid.as_deref(), Some("k1"));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(source(url.clone()).describe(), url.to_string());
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let (url, _) = serve("500 Internal Server Error", "{}".into()).await;
    let err = source(url).fetch().await.expect_err("500 must fail");
    assert!(err.is_transient(), "got {err:?}");
}

#[tokio::test]
async fn test_throttling_is_transient() {
    let (url, _) = serve("429 Too Many Requests", "{}".into()).await;
    let err = source(url).fetch().await.expect_err("429 must fail");
    assert!(err.is_transient(), "got {err:?}");
}

#[tokio::test]
async fn test_not_found_is_not_transient() {
    let (url, _) = serve("404 Not Found", "{}".into()).await;
    let err = source(url).fetch().await.expect_err("404 must fail");
    assert!(matches!(err, AuthError::KeyFetch { transient: false, .. }), "got {err:?}");
}

#[tokio::test]
async fn test_malformed_document_is_not_transient() {
    let (url, _) = serve("200 OK", "{\"keys\": \"nope\"".into()).await;
    let err = source(url).fetch().await.expect_err("bad json must fail");
    assert!(matches!(err, AuthError::KeyFetch { transient: false, .. }), "got {err:?}");
}

#[tokio::test]
async fn test_chunked_document_is_read() {
    let signer = TestSigner::new("k1");
    let body = serde_json::to_vec(&signer.jwks()).expect("json");
    let (url, _) = serve_chunked(&body, 16).await;

    let jwks = source(url).fetch().await.expect("fetch");
    assert_eq!(jwks.keys[0].kid.as_deref(), Some("k1"));
}

#[tokio::test]
async fn test_oversized_chunked_document_is_rejected() {
    let mut body = br#"{"keys": [], "padding": ""#.to_vec();
    body.resize(MAX_JWKS_BYTES + 64 * 1024, b'a');
    body.extend_from_slice(br#""}"#);
    let (url, _) = serve_chunked(&body, 64 * 1024).await;

    let err = source(url).fetch().await.expect_err("oversized body must fail");
    assert!(matches!(err, AuthError::KeyFetch { transient: false, .. }), "got {err:?}");
    assert!(err.to_string().contains("exceeds"), "got {err}");
}

#[tokio::test]
async fn test_unreachable_endpoint_is_transient() {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let url = Url::parse(&format!("http://{addr}/keys")).expect("url");
    let err = source(url).fetch().await.expect_err("closed port must fail");
    assert!(err.is_transient(), "got {err:?}");
}

#[tokio::test]
async fn test_verify_end_to_end_over_http() {
    let signer = TestSigner::new("k1");
    let body = serde_json::to_string(&signer.jwks()).expect("json");
    let (url, hits) = serve("200 OK", body).await;

    let config = test_config();
    let cache = SigningKeyCache::new(Arc::new(source(url)), config.algorithms().clone());
    let verifier = TokenVerifier::new(Arc::new(config), Arc::new(cache));

    let principal = verifier.verify(&signer.token("alice", &["mcp_viewer"])).await.expect("verify");
    assert_eq!(principal.subject(), "alice");
    assert!(principal.in_group("mcp_viewer"));

    // Second verification is served from the cache.
    verifier.verify(&signer.token("bob", &[])).await.expect("verify");
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}
