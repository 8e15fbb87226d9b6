//! TLS server trust evaluation.
//!
//! Every certificate chain presented by a `wss` server is first checked
//! against the bundled webpki roots, then handed to a [`TrustEvaluator`]
//! together with that verdict. The evaluator has the final word.
//!
//! | Evaluator | Behaviour |
//! |-----------|-----------|
//! | [`SystemTrust`] | Accepts only chains the system verdict accepts (default) |
//! | [`AcceptAnyCertificate`] | Accepts everything. Development only |
//! | closure | `Fn(&TrustChallenge<'_>) -> TrustDecision` |

// ============================================================================
// Imports
// ============================================================================

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use rustls::client::WebPkiServerVerifier;
use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::crypto::{CryptoProvider, ring};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{CertificateError, ClientConfig, DigitallySignedStruct, RootCertStore, SignatureScheme};
use tracing::{debug, warn};

use crate::error::{Error, Result};

// ============================================================================
// TrustDecision / TrustChallenge
// ============================================================================

/// Outcome of a trust evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrustDecision {
    /// Continue the handshake.
    Accept,
    /// Abort the handshake.
    Reject,
}

/// Certificate chain presented by the server.
#[derive(Debug)]
pub struct TrustChallenge<'a> {
    /// Server name the client asked for.
    pub server_name: &'a str,
    /// Leaf certificate (DER).
    pub end_entity: &'a CertificateDer<'a>,
    /// Intermediate certificates (DER).
    pub intermediates: &'a [CertificateDer<'a>],
    /// Why the system trust chain rejected the server, if it did.
    pub system_error: Option<&'a rustls::Error>,
}

impl TrustChallenge<'_> {
    /// Returns `true` if the chain verified against the system roots.
    #[inline]
    #[must_use]
    pub fn is_system_trusted(&self) -> bool {
        self.system_error.is_none()
    }
}

// ============================================================================
// TrustEvaluator
// ============================================================================

/// Pluggable server trust decision.
pub trait TrustEvaluator: Send + Sync {
    /// Decides whether the presented chain is trusted.
    fn evaluate(&self, challenge: &TrustChallenge<'_>) -> TrustDecision;
}

impl<F> TrustEvaluator for F
where
    F: Fn(&TrustChallenge<'_>) -> TrustDecision + Send + Sync,
{
    fn evaluate(&self, challenge: &TrustChallenge<'_>) -> TrustDecision {
        self(challenge)
    }
}

/// Trusts exactly what the system trust chain trusts. Fails closed.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTrust;

impl TrustEvaluator for SystemTrust {
    fn evaluate(&self, challenge: &TrustChallenge<'_>) -> TrustDecision {
        if challenge.is_system_trusted() {
            TrustDecision::Accept
        } else {
            TrustDecision::Reject
        }
    }
}

/// Trusts any certificate.
///
/// Only for development brokers with self-signed certificates. Never the
/// default; enable it with
/// [`TransportConfig::with_untrusted_certificates`](crate::TransportConfig::with_untrusted_certificates)
/// or by passing it explicitly.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAnyCertificate;

impl TrustEvaluator for AcceptAnyCertificate {
    fn evaluate(&self, challenge: &TrustChallenge<'_>) -> TrustDecision {
        if let Some(error) = challenge.system_error {
            warn!(server = challenge.server_name, %error, "Accepting untrusted certificate");
        }
        TrustDecision::Accept
    }
}

// ============================================================================
// TrustOutcome
// ============================================================================

/// Records a rejection so the backend can report it as a trust failure
/// instead of a generic handshake error.
#[derive(Debug, Clone, Default)]
pub(crate) struct TrustOutcome {
    rejection: Arc<Mutex<Option<(String, String)>>>,
}

impl TrustOutcome {
    fn record(&self, server: String, reason: String) {
        *self.rejection.lock() = Some((server, reason));
    }

    /// Takes the recorded rejection, if any.
    pub(crate) fn take(&self) -> Option<Error> {
        self.rejection
            .lock()
            .take()
            .map(|(server, reason)| Error::trust_evaluation(server, reason))
    }

    /// Maps a handshake error, preferring a recorded trust rejection.
    pub(crate) fn classify(&self, error: impl fmt::Display) -> Error {
        self.take()
            .unwrap_or_else(|| Error::transport(format!("handshake failed: {error}")))
    }
}

// ============================================================================
// EvaluatingVerifier
// ============================================================================

/// rustls verifier routing every decision through a [`TrustEvaluator`].
pub(crate) struct EvaluatingVerifier {
    system: Arc<WebPkiServerVerifier>,
    evaluator: Arc<dyn TrustEvaluator>,
    outcome: TrustOutcome,
}

impl fmt::Debug for EvaluatingVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvaluatingVerifier")
            .field("system", &self.system)
            .finish_non_exhaustive()
    }
}

impl EvaluatingVerifier {
    pub(crate) fn new(
        provider: Arc<CryptoProvider>,
        evaluator: Arc<dyn TrustEvaluator>,
        outcome: TrustOutcome,
    ) -> Result<Self> {
        let roots = RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        };

        let system = WebPkiServerVerifier::builder_with_provider(Arc::new(roots), provider)
            .build()
            .map_err(|e| Error::config(format!("system trust store unavailable: {e}")))?;

        Ok(Self {
            system,
            evaluator,
            outcome,
        })
    }
}

impl ServerCertVerifier for EvaluatingVerifier {
    fn verify_server_cert(
        &self,
        end_entity: &CertificateDer<'_>,
        intermediates: &[CertificateDer<'_>],
        server_name: &ServerName<'_>,
        ocsp_response: &[u8],
        now: UnixTime,
    ) -> StdResult<ServerCertVerified, rustls::Error> {
        let verdict = self.system.verify_server_cert(
            end_entity,
            intermediates,
            server_name,
            ocsp_response,
            now,
        );
        let server = server_name.to_str().into_owned();

        let challenge = TrustChallenge {
            server_name: &server,
            end_entity,
            intermediates,
            system_error: verdict.as_ref().err(),
        };

        match self.evaluator.evaluate(&challenge) {
            TrustDecision::Accept => {
                debug!(server = %server, system_trusted = verdict.is_ok(), "Server trust accepted");
                Ok(ServerCertVerified::assertion())
            }
            TrustDecision::Reject => {
                let reason = match verdict {
                    Err(e) => e.to_string(),
                    Ok(_) => "rejected by trust evaluator".to_string(),
                };
                warn!(server = %server, %reason, "Server trust rejected");
                self.outcome.record(server, reason);
                Err(rustls::Error::InvalidCertificate(
                    CertificateError::ApplicationVerificationFailure,
                ))
            }
        }
    }

    fn verify_tls12_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> StdResult<HandshakeSignatureValid, rustls::Error> {
        self.system.verify_tls12_signature(message, cert, dss)
    }

    fn verify_tls13_signature(
        &self,
        message: &[u8],
        cert: &CertificateDer<'_>,
        dss: &DigitallySignedStruct,
    ) -> StdResult<HandshakeSignatureValid, rustls::Error> {
        self.system.verify_tls13_signature(message, cert, dss)
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        self.system.supported_verify_schemes()
    }
}

type StdResult<T, E> = std::result::Result<T, E>;

// ============================================================================
// Client Config
// ============================================================================

/// Builds a rustls client config for one connection attempt.
pub(crate) fn client_config(
    evaluator: Arc<dyn TrustEvaluator>,
    outcome: TrustOutcome,
) -> Result<Arc<ClientConfig>> {
    let provider = Arc::new(ring::default_provider());
    let verifier = EvaluatingVerifier::new(Arc::clone(&provider), evaluator, outcome)?;

    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| Error::config(format!("TLS configuration failed: {e}")))?
        .dangerous()
        .with_custom_certificate_verifier(Arc::new(verifier))
        .with_no_client_auth();

    Ok(Arc::new(config))
}

// ============================================================================
// Tests
// ============================================================================
