//! Server trust decisions against a local `wss` server with a self-signed
//! certificate.
//!
//! Run with: RUST_LOG=mqtt_ws_socket=debug cargo test --test tls_trust

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use mqtt_ws_socket::{
    BackendSelection, ChannelDelegate, ConnectionPhase, Error, SocketEvent, TransportAdapter,
    TransportConfig, TrustChallenge, TrustDecision,
};
use rustls::ServerConfig;
use rustls::crypto::ring;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::net::TcpListener;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::accept_hdr_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tracing_subscriber::EnvFilter;

// ============================================================================
// Harness
// ============================================================================

const WAIT: Duration = Duration::from_secs(5);
const BACKENDS: [BackendSelection; 2] = [BackendSelection::Native, BackendSelection::Portable];

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// TLS acceptor for `localhost` backed by a fresh self-signed certificate.
fn self_signed_acceptor() -> anyhow::Result<TlsAcceptor> {
    let rcgen::CertifiedKey { cert, key_pair } =
        rcgen::generate_simple_self_signed(vec!["localhost".to_string()])?;
    let chain: Vec<CertificateDer<'static>> = vec![cert.der().clone()];
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key_pair.serialize_der()));

    let config = ServerConfig::builder_with_provider(Arc::new(ring::default_provider()))
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(chain, key)?;

    Ok(TlsAcceptor::from(Arc::new(config)))
}

/// Accepts one TLS connection. When the client finishes the TLS handshake
/// the server upgrades to WebSocket, sends one binary frame and closes.
///
/// Resolves to `true` if the TLS handshake completed.
async fn serve_tls_once() -> anyhow::Result<(u16, JoinHandle<anyhow::Result<bool>>)> {
    let acceptor = self_signed_acceptor()?;
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let port = listener.local_addr()?.port();

    let handle = tokio::spawn(async move {
        let (stream, _) = listener.accept().await?;
        let Ok(tls) = acceptor.accept(stream).await else {
            return Ok(false);
        };

        let mut ws = accept_hdr_async(
            tls,
            |_: &Request, mut response: Response| -> Result<Response, ErrorResponse> {
                response
                    .headers_mut()
                    .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static("mqtt"));
                Ok(response)
            },
        )
        .await?;

        ws.send(Message::binary(vec![0x20, 0x02])).await?;
        ws.close(None).await?;
        while ws.next().await.is_some() {}
        Ok(true)
    });

    Ok((port, handle))
}

fn tls_config(selection: BackendSelection) -> TransportConfig {
    TransportConfig::new()
        .with_tls()
        .with_backend(selection)
        .with_connect_timeout(Duration::from_secs(3))
}

async fn next(events: &mut UnboundedReceiver<SocketEvent>) -> anyhow::Result<SocketEvent> {
    timeout(WAIT, events.recv())
        .await?
        .ok_or_else(|| anyhow::anyhow!("delegate channel closed"))
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_default_policy_rejects_self_signed() -> anyhow::Result<()> {
    init_tracing();

    for selection in BACKENDS {
        let (port, server) = serve_tls_once().await?;
        let (delegate, mut events) = ChannelDelegate::new();
        let adapter = TransportAdapter::new(tls_config(selection), delegate)?;

        adapter.connect("localhost", port, None)?;

        match next(&mut events).await? {
            SocketEvent::Disconnected { error: Some(error) } => {
                assert!(error.is_trust_failure(), "{selection:?}: {error:?}");
                assert!(
                    matches!(&error, Error::TrustEvaluation { server, .. } if server == "localhost"),
                    "{selection:?}: {error:?}"
                );
            }
            other => anyhow::bail!("unexpected event for {selection:?}: {other:?}"),
        }
        assert_eq!(adapter.phase(), ConnectionPhase::Disconnected);

        let handshake_completed = timeout(WAIT, server).await???;
        assert!(!handshake_completed, "{selection:?}");

        // Nothing else follows the rejection.
        assert!(timeout(Duration::from_millis(200), events.recv()).await.is_err());
    }

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_untrusted_opt_in_completes_handshake() -> anyhow::Result<()> {
    init_tracing();

    for selection in BACKENDS {
        let (port, server) = serve_tls_once().await?;
        let (delegate, mut events) = ChannelDelegate::new();
        let adapter =
            TransportAdapter::new(tls_config(selection).with_untrusted_certificates(), delegate)?;

        adapter.connect("localhost", port, None)?;
        assert!(
            matches!(next(&mut events).await?, SocketEvent::Connected),
            "{selection:?}"
        );

        adapter.read(2, 1)?;
        match next(&mut events).await? {
            SocketEvent::Read { data, tag: 1 } => assert_eq!(data, vec![0x20, 0x02]),
            other => anyhow::bail!("unexpected event for {selection:?}: {other:?}"),
        }
        assert!(matches!(
            next(&mut events).await?,
            SocketEvent::Disconnected { error: None }
        ));

        assert!(timeout(WAIT, server).await???, "{selection:?}");
    }

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_custom_evaluator_sees_system_rejection() -> anyhow::Result<()> {
    init_tracing();

    let (port, server) = serve_tls_once().await?;
    let (delegate, mut events) = ChannelDelegate::new();
    let adapter = TransportAdapter::builder()
        .config(tls_config(BackendSelection::Native))
        .delegate(delegate)
        .trust_evaluator(|challenge: &TrustChallenge<'_>| {
            if challenge.server_name == "localhost" && !challenge.is_system_trusted() {
                TrustDecision::Accept
            } else {
                TrustDecision::Reject
            }
        })
        .spawn()?;

    adapter.connect("localhost", port, None)?;
    assert!(matches!(next(&mut events).await?, SocketEvent::Connected));
    assert!(timeout(WAIT, server).await???);

    Ok(())
}
