use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use rcgen::{CertificateParams, KeyPair};
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio_rustls::TlsAcceptor;

/// A scripted Gemini server over TLS with a fresh self-signed certificate.
///
/// Serves one response per accepted connection, in order, then stops
/// accepting. Bind first, take the port/fingerprint, then `start`.
pub struct GeminiMockServer {
    listener: TcpListener,
    acceptor: TlsAcceptor,
    cert: CertificateDer<'static>,
    port: u16,
    accepts: Arc<AtomicUsize>,
}

#[allow(dead_code)]
impl GeminiMockServer {
    pub async fn bind() -> Self {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();

        let params = CertificateParams::new(vec!["localhost".to_string()])
            .expect("Failed to build cert params");
        let key = KeyPair::generate().expect("Failed to generate key");
        let cert = params.self_signed(&key).expect("Failed to self-sign").der().clone();

        let key_der = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(key.serialize_der()));
        let config = rustls::ServerConfig::builder()
            .with_no_client_auth()
            .with_single_cert(vec![cert.clone()], key_der)
            .expect("Failed to build server config");

        let listener = TcpListener::bind("127.0.0.1:0").await.expect("Failed to bind");
        let port = listener.local_addr().unwrap().port();

        Self {
            listener,
            acceptor: TlsAcceptor::from(Arc::new(config)),
            cert,
            port,
            accepts: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Counter of accepted TCP connections, handshake outcome regardless.
    pub fn accept_counter(&self) -> Arc<AtomicUsize> {
        self.accepts.clone()
    }

    /// Request URI for a path on this server.
    pub fn url(&self, path: &str) -> String {
        format!("gemini://localhost:{}{}", self.port, path)
    }

    /// Fingerprint of the server certificate, as the client pins it.
    pub fn fingerprint(&self) -> String {
        capsule::trust::fingerprint(self.cert.as_ref())
    }

    /// Serve the scripted responses, one per accepted connection.
    ///
    /// A connection whose handshake fails (the client aborted it) still
    /// consumes its scripted response.
    pub fn start(self, responses: Vec<Vec<u8>>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            for response in responses {
                let Ok((stream, _)) = self.listener.accept().await else {
                    break;
                };
                self.accepts.fetch_add(1, Ordering::SeqCst);

                match self.acceptor.accept(stream).await {
                    Ok(mut tls) => {
                        read_request_line(&mut tls).await;
                        let _ = tls.write_all(&response).await;
                        let _ = tls.shutdown().await;
                    }
                    Err(e) => {
                        // Expected in mismatch tests: the client rejects us.
                        tracing::debug!("Mock server handshake failed: {e}");
                    }
                }
            }
        })
    }
}

async fn read_request_line<S>(stream: &mut S)
where
    S: AsyncReadExt + Unpin,
{
    let mut byte = [0u8; 1];
    loop {
        match stream.read(&mut byte).await {
            Ok(0) | Err(_) => break,
            Ok(_) if byte[0] == b'\n' => break,
            Ok(_) => {}
        }
    }
}

/// Build a scripted redirect chain: `hops` redirect responses pointing at
/// successive paths on `port`, followed by one success response with `body`.
#[allow(dead_code)]
pub fn redirect_chain(port: u16, hops: usize, body: &str) -> Vec<Vec<u8>> {
    let mut responses: Vec<Vec<u8>> = (1..=hops)
        .map(|i| format!("31 gemini://localhost:{port}/hop{i}\r\n").into_bytes())
        .collect();
    responses.push(format!("20 text/gemini\r\n{body}").into_bytes());
    responses
}
