//! A scripted SMTP server on 127.0.0.1 for integration tests.

#![allow(dead_code)]

use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use base64::Engine;
use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer};
use rustls::{ServerConfig, ServerConnection, StreamOwned};

/// How the mock server behaves.
#[derive(Debug, Clone)]
pub struct Script {
    /// EHLO extension lines; `None` answers EHLO with 502.
    pub extensions: Option<Vec<String>>,
    /// Recipients refused with 550.
    pub reject: Vec<String>,
    /// Reply after the DATA terminator.
    pub data_reply: String,
    /// Base64 `AUTH PLAIN` token accepted; anything else gets 535.
    pub plain_token: Option<String>,
    /// Accepted `AUTH LOGIN` username and password.
    pub login: Option<(String, String)>,
    /// Sequential connections to serve before the thread exits.
    pub connections: usize,
    /// Sleep this long after accept instead of greeting.
    pub stall: Option<Duration>,
    /// Offer STARTTLS with a self-signed certificate.
    pub tls: bool,
    /// Extra EHLO lines advertised only once TLS is up.
    pub secure_extensions: Vec<String>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            extensions: Some(vec!["PIPELINING".into(), "8BITMIME".into(), "SIZE 10240000".into()]),
            reject: Vec::new(),
            data_reply: "250 2.0.0 Ok: queued as ABC123".into(),
            plain_token: None,
            login: None,
            connections: 1,
            stall: None,
            tls: false,
            secure_extensions: Vec::new(),
        }
    }
}

impl Script {
    pub fn with_extensions(mut self, extensions: &[&str]) -> Self {
        self.extensions = Some(extensions.iter().map(|s| s.to_string()).collect());
        self
    }

    /// STARTTLS offered in plain text, `AUTH PLAIN LOGIN` only after it.
    pub fn with_tls(mut self) -> Self {
        self.tls = true;
        self.secure_extensions = vec!["AUTH PLAIN LOGIN".into()];
        self
    }

    pub fn rejecting(mut self, address: &str) -> Self {
        self.reject.push(address.to_string());
        self
    }
}

/// Everything the server saw.
#[derive(Debug, Default)]
pub struct Transcript {
    /// Command lines without CRLF, in order, across all connections.
    pub commands: Vec<String>,
    /// Raw DATA payloads as received, dot-stuffing intact, terminator removed.
    pub messages: Vec<String>,
    pub connections: usize,
    /// Index into `commands` of the first command read over TLS.
    pub tls_started: Option<usize>,
}

impl Transcript {
    pub fn saw(&self, prefix: &str) -> bool {
        self.commands.iter().any(|c| c.starts_with(prefix))
    }
}

/// A running mock server.
pub struct MockServer {
    pub port: u16,
    handle: JoinHandle<Transcript>,
}

impl MockServer {
    pub fn start(script: Script) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let handle = std::thread::spawn(move || {
            let mut transcript = Transcript::default();
            for _ in 0..script.connections {
                let Ok((stream, _)) = listener.accept() else { break };
                transcript.connections += 1;
                if let Some(stall) = script.stall {
                    std::thread::sleep(stall);
                    continue;
                }
                serve(stream, &script, &mut transcript);
            }
            transcript
        });
        Self { port, handle }
    }

    pub fn address(&self) -> String {
        format!("127.0.0.1:{}", self.port)
    }

    /// Wait for the server thread and return what it saw.
    pub fn finish(self) -> Transcript {
        self.handle.join().unwrap()
    }
}

/// A port with nothing listening on it.
pub fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

enum Link {
    Plain(TcpStream),
    Tls(Box<StreamOwned<ServerConnection, TcpStream>>),
}

impl Read for Link {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Link::Plain(tcp) => tcp.read(buf),
            Link::Tls(tls) => tls.read(buf),
        }
    }
}

impl Write for Link {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Link::Plain(tcp) => tcp.write(buf),
            Link::Tls(tls) => tls.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Link::Plain(tcp) => tcp.flush(),
            Link::Tls(tls) => tls.flush(),
        }
    }
}

fn server_tls_config() -> Arc<ServerConfig> {
    let cert = rcgen::generate_simple_self_signed(vec!["localhost".to_string()]).unwrap();
    let chain = vec![CertificateDer::from(cert.serialize_der().unwrap())];
    let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(cert.serialize_private_key_der()));
    let config = ServerConfig::builder_with_provider(Arc::new(rustls::crypto::ring::default_provider()))
        .with_safe_default_protocol_versions()
        .unwrap()
        .with_no_client_auth()
        .with_single_cert(chain, key)
        .unwrap();
    Arc::new(config)
}

fn reply(link: &mut BufReader<Link>, text: &str) {
    let out = link.get_mut();
    out.write_all(text.as_bytes()).unwrap();
    out.write_all(b"\r\n").unwrap();
    out.flush().unwrap();
}

fn read(link: &mut BufReader<Link>) -> Option<String> {
    let mut line = String::new();
    match link.read_line(&mut line) {
        Ok(0) | Err(_) => None,
        Ok(_) => Some(line.trim_end_matches(['\r', '\n']).to_string()),
    }
}

fn serve(stream: TcpStream, script: &Script, transcript: &mut Transcript) {
    stream.set_read_timeout(Some(Duration::from_secs(10))).unwrap();
    let mut link = BufReader::new(Link::Plain(stream));
    let mut secured = false;
    reply(&mut link, "220 mock.test ESMTP ready");

    while let Some(line) = read(&mut link) {
        transcript.commands.push(line.clone());
        let upper = line.to_ascii_uppercase();
        let verb = upper.split(' ').next().unwrap_or("");
        match verb {
            "EHLO" => match &script.extensions {
                Some(extensions) => {
                    let mut lines = vec!["mock.test greets you".to_string()];
                    lines.extend(extensions.iter().cloned());
                    if secured {
                        lines.extend(script.secure_extensions.iter().cloned());
                    } else if script.tls {
                        lines.push("STARTTLS".into());
                    }
                    let last = lines.len() - 1;
                    for (i, ext) in lines.iter().enumerate() {
                        let sep = if i == last { ' ' } else { '-' };
                        reply(&mut link, &format!("250{sep}{ext}"));
                    }
                }
                None => reply(&mut link, "502 5.5.2 Command not recognized"),
            },
            "HELO" => reply(&mut link, "250 mock.test"),
            "AUTH" => {
                let mechanism = upper.split(' ').nth(1).unwrap_or("");
                match mechanism {
                    "PLAIN" => {
                        let token = line.split(' ').nth(2).map(str::to_string);
                        if token.is_some() && token == script.plain_token {
                            reply(&mut link, "235 2.7.0 Authentication successful");
                        } else {
                            reply(&mut link, "535 5.7.8 Authentication credentials invalid");
                        }
                    }
                    "LOGIN" => {
                        let engine = base64::engine::general_purpose::STANDARD;
                        reply(&mut link, "334 VXNlcm5hbWU6");
                        let user = read(&mut link).unwrap_or_default();
                        transcript.commands.push(user.clone());
                        reply(&mut link, "334 UGFzc3dvcmQ6");
                        let pass = read(&mut link).unwrap_or_default();
                        transcript.commands.push(pass.clone());
                        let decode = |s: &str| String::from_utf8(engine.decode(s).unwrap_or_default()).unwrap_or_default();
                        let expected = script.login.clone().unwrap_or_default();
                        if (decode(&user), decode(&pass)) == expected {
                            reply(&mut link, "235 2.7.0 Authentication successful");
                        } else {
                            reply(&mut link, "535 5.7.8 Authentication credentials invalid");
                        }
                    }
                    "CRAM-MD5" => {
                        reply(&mut link, "334 PDE4OTYuNjk3MTcwOTUyQHBvc3RvZmZpY2UucmVzdG9uLm1jaS5uZXQ+");
                        let response = read(&mut link).unwrap_or_default();
                        transcript.commands.push(response);
                        reply(&mut link, "235 2.7.0 Authentication successful");
                    }
                    _ => reply(&mut link, "504 5.5.4 Unrecognized authentication type"),
                }
            }
            "MAIL" => reply(&mut link, "250 2.1.0 Ok"),
            "RCPT" => {
                let address = line
                    .split_once('<')
                    .and_then(|(_, rest)| rest.split_once('>'))
                    .map(|(addr, _)| addr.to_string())
                    .unwrap_or_default();
                if script.reject.iter().any(|r| r.eq_ignore_ascii_case(&address)) {
                    reply(&mut link, &format!("550 5.1.1 <{address}>: Recipient address rejected"));
                } else {
                    reply(&mut link, "250 2.1.5 Ok");
                }
            }
            "DATA" => {
                reply(&mut link, "354 End data with <CR><LF>.<CR><LF>");
                let mut payload = String::new();
                loop {
                    let mut raw = String::new();
                    match link.read_line(&mut raw) {
                        Ok(0) | Err(_) => return,
                        Ok(_) => {}
                    }
                    if raw == ".\r\n" {
                        break;
                    }
                    payload.push_str(&raw);
                }
                transcript.messages.push(payload);
                reply(&mut link, &script.data_reply);
            }
            "RSET" | "NOOP" => reply(&mut link, "250 2.0.0 Ok"),
            "VRFY" => reply(&mut link, "252 2.0.0 Cannot VRFY user"),
            "STARTTLS" if script.tls && !secured => {
                reply(&mut link, "220 2.0.0 Ready to start TLS");
                let Link::Plain(tcp) = link.into_inner() else { return };
                let conn = ServerConnection::new(server_tls_config()).unwrap();
                link = BufReader::new(Link::Tls(Box::new(StreamOwned::new(conn, tcp))));
                secured = true;
                transcript.tls_started = Some(transcript.commands.len());
            }
            "STARTTLS" => reply(&mut link, "454 4.7.0 TLS not available"),
            "QUIT" => {
                reply(&mut link, "221 2.0.0 Bye");
                return;
            }
            _ => reply(&mut link, "500 5.5.2 Syntax error"),
        }
    }
}
