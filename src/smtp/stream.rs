//! Blocking SMTP connection: plain TCP or TLS over TCP, with buffered line reads.

use std::io::{self, BufRead, BufReader, Cursor, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rustls::client::danger::{HandshakeSignatureValid, ServerCertVerified, ServerCertVerifier};
use rustls::pki_types::{CertificateDer, ServerName, UnixTime};
use rustls::{ClientConfig, ClientConnection, DigitallySignedStruct, RootCertStore, SignatureScheme, StreamOwned};
use tracing::{debug, warn};

use crate::error::{MailError, Result};

/// TLS trust settings.
#[derive(Debug, Clone)]
pub struct TlsSettings {
    /// Verify the server certificate chain and name.
    pub verify_certificates: bool,
    /// Extra PEM bundle added to the webpki roots.
    pub ca_cert_path: Option<PathBuf>,
}

impl Default for TlsSettings {
    fn default() -> Self {
        Self {
            verify_certificates: true,
            ca_cert_path: None,
        }
    }
}

enum Inner {
    Plain(TcpStream),
    Tls(Box<StreamOwned<ClientConnection, TcpStream>>),
}

impl Inner {
    fn tcp(&self) -> &TcpStream {
        match self {
            Inner::Plain(tcp) => tcp,
            Inner::Tls(tls) => &tls.sock,
        }
    }
}

impl Read for Inner {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Inner::Plain(tcp) => tcp.read(buf),
            Inner::Tls(tls) => tls.read(buf),
        }
    }
}

impl Write for Inner {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Inner::Plain(tcp) => tcp.write(buf),
            Inner::Tls(tls) => tls.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Inner::Plain(tcp) => tcp.flush(),
            Inner::Tls(tls) => tls.flush(),
        }
    }
}

/// An open connection to one SMTP server.
pub struct Connection {
    reader: BufReader<Inner>,
    host: String,
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("host", &self.host)
            .field("tls", &self.is_tls())
            .finish()
    }
}

impl Connection {
    /// Open a TCP connection to `host:port`, trying each resolved address.
    ///
    /// With `tls` set, the TLS handshake runs before anything is read
    /// (implicit TLS).
    pub fn open(host: &str, port: u16, timeout: Duration, tls: Option<&TlsSettings>) -> Result<Self> {
        let connect_failed = |reason: String| MailError::ConnectFailed {
            host: format!("{host}:{port}"),
            reason,
        };
        let addrs = (host, port)
            .to_socket_addrs()
            .map_err(|e| connect_failed(e.to_string()))?;

        let mut last_error = None;
        let mut tcp = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, timeout) {
                Ok(stream) => {
                    tcp = Some(stream);
                    break;
                }
                Err(e) => {
                    debug!(%addr, error = %e, "Connect attempt failed");
                    last_error = Some(e);
                }
            }
        }
        let tcp = tcp.ok_or_else(|| {
            connect_failed(
                last_error
                    .map(|e| e.to_string())
                    .unwrap_or_else(|| "no address resolved".to_string()),
            )
        })?;
        tcp.set_read_timeout(Some(timeout))
            .and_then(|_| tcp.set_write_timeout(Some(timeout)))
            .map_err(|e| connect_failed(e.to_string()))?;

        let inner = match tls {
            Some(settings) => Inner::Tls(Box::new(handshake(tcp, host, settings).map_err(
                |e| match e {
                    MailError::TlsNegotiationFailed(reason) => connect_failed(reason),
                    other => other,
                },
            )?)),
            None => Inner::Plain(tcp),
        };
        Ok(Self {
            reader: BufReader::new(inner),
            host: host.to_string(),
        })
    }

    /// Upgrade a plain connection in place (after a `220` reply to `STARTTLS`).
    pub fn upgrade(self, settings: &TlsSettings) -> Result<Self> {
        if self.has_buffered_data() {
            return Err(MailError::TlsNegotiationFailed(
                "server sent data before the TLS handshake".into(),
            ));
        }
        let host = self.host;
        match self.reader.into_inner() {
            Inner::Plain(tcp) => {
                let tls = handshake(tcp, &host, settings)?;
                Ok(Self {
                    reader: BufReader::new(Inner::Tls(Box::new(tls))),
                    host,
                })
            }
            Inner::Tls(_) => Err(MailError::TlsNegotiationFailed("TLS is already active".into())),
        }
    }

    pub fn is_tls(&self) -> bool {
        matches!(self.reader.get_ref(), Inner::Tls(_))
    }

    /// Whether unread bytes are waiting in the read buffer.
    pub fn has_buffered_data(&self) -> bool {
        !self.reader.buffer().is_empty()
    }

    /// Change the socket read timeout for the next reads.
    pub fn set_read_timeout(&self, timeout: Duration) -> Result<()> {
        self.reader
            .get_ref()
            .tcp()
            .set_read_timeout(Some(timeout.max(Duration::from_millis(1))))
            .map_err(|e| MailError::io("setting read timeout", e))
    }

    /// Read one line including its terminator. End of stream is an error.
    pub fn read_line(&mut self) -> Result<String> {
        let mut line = String::new();
        let n = self
            .reader
            .read_line(&mut line)
            .map_err(|e| MailError::io("reading reply", e))?;
        if n == 0 {
            return Err(MailError::io(
                "reading reply",
                io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed by server"),
            ));
        }
        Ok(line)
    }

    /// Write and flush.
    pub fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let inner = self.reader.get_mut();
        inner
            .write_all(data)
            .and_then(|_| inner.flush())
            .map_err(|e| MailError::io("writing command", e))
    }

    /// Send TLS close_notify when applicable and shut the socket down.
    pub fn shutdown(&mut self) {
        let inner = self.reader.get_mut();
        if let Inner::Tls(tls) = inner {
            tls.conn.send_close_notify();
            let _ = tls.flush();
        }
        let _ = inner.tcp().shutdown(Shutdown::Both);
    }
}

// ── TLS setup ───────────────────────────────────────────────────

/// Build the rustls client configuration for `settings`.
pub fn client_config(settings: &TlsSettings) -> Result<Arc<ClientConfig>> {
    let tls_err = |msg: String| MailError::TlsNegotiationFailed(msg);
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    if let Some(ref ca_path) = settings.ca_cert_path {
        let pem = std::fs::read(ca_path)
            .map_err(|e| tls_err(format!("Failed to read CA bundle {}: {e}", ca_path.display())))?;
        let mut cursor = Cursor::new(pem);
        for cert in rustls_pemfile::certs(&mut cursor).filter_map(|r| r.ok()) {
            roots
                .add(cert)
                .map_err(|e| tls_err(format!("Failed to add CA certificate: {e}")))?;
        }
    }

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let mut config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| tls_err(e.to_string()))?
        .with_root_certificates(roots)
        .with_no_client_auth();

    if !settings.verify_certificates {
        warn!("TLS certificate verification disabled");
        config
            .dangerous()
            .set_certificate_verifier(Arc::new(NoCertVerifier));
    }
    Ok(Arc::new(config))
}

fn handshake(
    mut tcp: TcpStream,
    host: &str,
    settings: &TlsSettings,
) -> Result<StreamOwned<ClientConnection, TcpStream>> {
    let config = client_config(settings)?;
    let server_name = ServerName::try_from(host.to_string())
        .map_err(|e| MailError::TlsNegotiationFailed(format!("Invalid server name {host:?}: {e}")))?;
    let mut conn = ClientConnection::new(config, server_name)
        .map_err(|e| MailError::TlsNegotiationFailed(e.to_string()))?;
    while conn.is_handshaking() {
        conn.complete_io(&mut tcp)
            .map_err(|e| MailError::TlsNegotiationFailed(format!("TLS handshake failed: {e}")))?;
    }
    debug!(
        host,
        version = ?conn.protocol_version(),
        "TLS established"
    );
    Ok(StreamOwned::new(conn, tcp))
}

/// Accepts any server certificate. Only installed when verification is off.
#[derive(Debug)]
struct NoCertVerifier;

impl ServerCertVerifier for NoCertVerifier {
    fn verify_server_cert(
        &self,
        _end_entity: &CertificateDer<'_>,
        _intermediates: &[CertificateDer<'_>],
        _server_name: &ServerName<'_>,
        _ocsp_response: &[u8],
        _now: UnixTime,
    ) -> std::result::Result<ServerCertVerified, rustls::Error> {
        Ok(ServerCertVerified::assertion())
    }

    fn verify_tls12_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn verify_tls13_signature(
        &self,
        _message: &[u8],
        _cert: &CertificateDer<'_>,
        _dss: &DigitallySignedStruct,
    ) -> std::result::Result<HandshakeSignatureValid, rustls::Error> {
        Ok(HandshakeSignatureValid::assertion())
    }

    fn supported_verify_schemes(&self) -> Vec<SignatureScheme> {
        rustls::crypto::ring::default_provider()
            .signature_verification_algorithms
            .supported_schemes()
    }
}
