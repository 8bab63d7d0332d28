//! End-to-end sends through `Mailer` against a scripted SMTP server.

mod common;

use common::{MockServer, Script};
use postkit::config::{Config, Security};
use postkit::{Address, Attachment, Mailer, Message};

fn config_for(hosts: &str) -> Config {
    let mut config = Config::default();
    config.smtp.hosts = hosts.to_string();
    config.smtp.port = 25;
    config.smtp.timeout_secs = 5;
    config.smtp.time_limit_secs = 5;
    config.message.hostname = Some("client.test".into());
    config
}

fn mailer_for(server: &MockServer) -> Mailer {
    Mailer::new(config_for(&server.address()))
}

#[test]
fn test_partial_rejection_still_delivers() {
    let server = MockServer::start(Script::default().rejecting("b@example.com"));
    let mut mailer = mailer_for(&server);
    let result = mailer.send_text_message(
        "Sender <sender@example.com>",
        &["a@example.com", "b@example.com", "c@example.com"],
        "Quarterly numbers",
        "See attached.",
    );
    drop(mailer);

    assert!(result.success, "{}", result.error_info);
    assert_eq!(result.recipient_errors.len(), 1);
    assert!(result.recipient_errors["b@example.com"].starts_with("550"));
    assert!(result.error_info.contains("b@example.com"));
    assert!(result.message_id.is_some());

    let transcript = server.finish();
    assert!(transcript.saw("EHLO client.test"));
    assert!(transcript.saw("MAIL FROM:<sender@example.com>"));
    assert_eq!(transcript.commands.iter().filter(|c| c.starts_with("RCPT TO:")).count(), 3);
    assert_eq!(transcript.messages.len(), 1);
    assert!(transcript.messages[0].contains("Subject: Quarterly numbers\r\n"));
    assert!(transcript.saw("QUIT"));
}

#[test]
fn test_all_recipients_rejected_sends_no_data() {
    let server = MockServer::start(Script::default().rejecting("a@example.com").rejecting("b@example.com"));
    let mut mailer = mailer_for(&server);
    let result = mailer.send_text_message("sender@example.com", &["a@example.com", "b@example.com"], "Hi", "Body");
    drop(mailer);

    assert!(!result.success);
    assert_eq!(result.recipient_errors.len(), 2);
    assert!(result.error_info.contains("rejected"), "{}", result.error_info);

    let transcript = server.finish();
    assert!(!transcript.saw("DATA"));
    assert!(transcript.saw("RSET"));
}

#[test]
fn test_bcc_in_envelope_not_in_headers() {
    let server = MockServer::start(Script::default());
    let mut mailer = mailer_for(&server);
    let mut message = mailer.new_message(Address::parse("sender@example.com").unwrap());
    message.add_to(Address::parse("Visible <to@example.com>").unwrap());
    message.add_bcc(Address::parse("hidden@example.com").unwrap());
    message.set_subject("Hello").set_plain_body("Body");
    let result = mailer.send(message);
    drop(mailer);
    assert!(result.success, "{}", result.error_info);

    let transcript = server.finish();
    assert!(transcript.saw("RCPT TO:<hidden@example.com>"));
    assert!(!transcript.messages[0].contains("hidden@example.com"));
    assert!(transcript.messages[0].contains("To: Visible <to@example.com>\r\n"));
}

#[test]
fn test_host_fallback() {
    let server = MockServer::start(Script::default());
    let hosts = format!("127.0.0.1:{};{}", common::closed_port(), server.address());
    let mut mailer = Mailer::new(config_for(&hosts));
    let result = mailer.send_text_message("sender@example.com", &["a@example.com"], "Hi", "Body");
    drop(mailer);
    assert!(result.success, "{}", result.error_info);
    assert_eq!(server.finish().connections, 1);
}

#[test]
fn test_every_host_down() {
    let hosts = format!("127.0.0.1:{};127.0.0.1:{}", common::closed_port(), common::closed_port());
    let mut mailer = Mailer::new(config_for(&hosts));
    let result = mailer.send_text_message("sender@example.com", &["a@example.com"], "Hi", "Body");
    assert!(!result.success);
    assert!(result.error_info.starts_with("Failed to connect"), "{}", result.error_info);
}

#[test]
fn test_keep_alive_reuses_connection() {
    let server = MockServer::start(Script::default());
    let mut config = config_for(&server.address());
    config.smtp.keep_alive = true;
    let mut mailer = Mailer::new(config);

    for n in 0..2 {
        let result = mailer.send_text_message("sender@example.com", &["a@example.com"], &format!("Message {n}"), "Body");
        assert!(result.success, "{}", result.error_info);
    }
    mailer.close();

    let transcript = server.finish();
    assert_eq!(transcript.connections, 1);
    assert_eq!(transcript.messages.len(), 2);
    assert!(transcript.saw("NOOP"));
    assert_eq!(transcript.commands.last().map(String::as_str), Some("QUIT"));
}

#[test]
fn test_configure_smtp_with_auth() {
    let server = MockServer::start(Script {
        login: Some(("user".into(), "secret".into())),
        ..Script::default().with_extensions(&["8BITMIME", "AUTH LOGIN"])
    });
    let mut mailer = Mailer::new(config_for("unused.example.com"));
    mailer.configure_smtp(&server.address(), "user", "secret", 25, Security::None);
    let result = mailer.send_text_message("sender@example.com", &["a@example.com"], "Grüße", "Schöne Grüße");
    drop(mailer);
    assert!(result.success, "{}", result.error_info);

    let transcript = server.finish();
    assert!(transcript.saw("AUTH LOGIN"));
    assert!(transcript.saw("MAIL FROM:<sender@example.com> BODY=8BITMIME"));
    assert!(transcript.messages[0].contains("Subject: =?utf-8?"));
}

#[test]
fn test_international_domain_is_punycoded() {
    let server = MockServer::start(Script::default());
    let mut mailer = mailer_for(&server);
    let result = mailer.send_text_message("sender@example.com", &["user@bücher.example"], "Hi", "Body");
    drop(mailer);
    assert!(result.success, "{}", result.error_info);

    let transcript = server.finish();
    assert!(transcript.saw("RCPT TO:<user@xn--bcher-kva.example>"));
    // Headers carry the same ASCII domain as the envelope.
    assert!(transcript.messages[0].contains("To: user@xn--bcher-kva.example\r\n"));
    assert!(!transcript.messages[0].contains("bücher"));
}

#[test]
fn test_attachment_queued_on_mailer() {
    let server = MockServer::start(Script::default());
    let mut mailer = mailer_for(&server);
    mailer
        .add_attachment(Attachment::from_bytes(b"col1,col2\r\n1,2\r\n".to_vec(), "report.csv"))
        .unwrap();
    let mut message = Message::new(Address::parse("sender@example.com").unwrap());
    message.add_to(Address::parse("a@example.com").unwrap());
    message.set_subject("Report").set_plain_body("Attached.");
    let result = mailer.send(message);
    drop(mailer);
    assert!(result.success, "{}", result.error_info);

    let transcript = server.finish();
    let payload = &transcript.messages[0];
    assert!(payload.contains("multipart/mixed"));
    assert!(payload.contains("filename=") && payload.contains("report.csv"));
}

#[test]
fn test_single_to_runs_one_transaction_per_recipient() {
    let server = MockServer::start(Script::default().rejecting("b@example.com"));
    let mut config = config_for(&server.address());
    config.smtp.single_to = true;
    let mut mailer = Mailer::new(config);
    let result = mailer.send_text_message(
        "sender@example.com",
        &["a@example.com", "b@example.com", "c@example.com"],
        "One each",
        "Body",
    );
    drop(mailer);

    assert!(result.success, "{}", result.error_info);
    assert_eq!(result.recipient_errors.keys().collect::<Vec<_>>(), ["b@example.com"]);

    let transcript = server.finish();
    assert_eq!(transcript.connections, 1);
    let count = |prefix: &str| transcript.commands.iter().filter(|c| c.starts_with(prefix)).count();
    assert_eq!(count("MAIL FROM:"), 3);
    assert_eq!(count("RCPT TO:"), 3);
    assert_eq!(count("DATA"), 2);
    assert_eq!(transcript.messages.len(), 2);

    // Every MAIL FROM is followed by exactly one RCPT TO.
    let envelope: Vec<&str> = transcript
        .commands
        .iter()
        .map(String::as_str)
        .filter(|c| c.starts_with("MAIL FROM:") || c.starts_with("RCPT TO:"))
        .collect();
    assert_eq!(
        envelope,
        [
            "MAIL FROM:<sender@example.com>",
            "RCPT TO:<a@example.com>",
            "MAIL FROM:<sender@example.com>",
            "RCPT TO:<b@example.com>",
            "MAIL FROM:<sender@example.com>",
            "RCPT TO:<c@example.com>",
        ]
    );
}

// ─── TLS policy ─────────────────────────────────────────────────────

fn tls_config(hosts: &str) -> Config {
    let mut config = config_for(hosts);
    config.smtp.verify_certificates = false;
    config
}

#[test]
fn test_auto_tls_upgrades_when_offered() {
    let server = MockServer::start(Script::default().with_tls());
    let mut mailer = Mailer::new(tls_config(&server.address()));
    let result = mailer.send_text_message("sender@example.com", &["a@example.com"], "Hi", "Body");
    drop(mailer);
    assert!(result.success, "{}", result.error_info);

    let transcript = server.finish();
    let tls_at = transcript.tls_started.expect("auto-TLS did not upgrade");
    assert_eq!(transcript.commands[tls_at], "EHLO client.test");
    let mail_at = transcript.commands.iter().position(|c| c.starts_with("MAIL FROM:")).unwrap();
    assert!(mail_at > tls_at);
    assert_eq!(transcript.messages.len(), 1);
}

#[test]
fn test_auto_tls_off_stays_plain() {
    let server = MockServer::start(Script::default().with_tls());
    let mut config = tls_config(&server.address());
    config.smtp.auto_tls = false;
    let mut mailer = Mailer::new(config);
    let result = mailer.send_text_message("sender@example.com", &["a@example.com"], "Hi", "Body");
    drop(mailer);
    assert!(result.success, "{}", result.error_info);

    let transcript = server.finish();
    assert!(transcript.tls_started.is_none());
    assert!(!transcript.saw("STARTTLS"));
}

#[test]
fn test_explicit_tls_prefix_forces_upgrade() {
    let server = MockServer::start(Script::default().with_tls());
    let mut config = tls_config(&format!("tls://{}", server.address()));
    config.smtp.auto_tls = false;
    let mut mailer = Mailer::new(config);
    let result = mailer.send_text_message("sender@example.com", &["a@example.com"], "Hi", "Body");
    drop(mailer);
    assert!(result.success, "{}", result.error_info);
    assert!(server.finish().tls_started.is_some());
}

#[test]
fn test_explicit_tls_prefix_never_downgrades() {
    let server = MockServer::start(Script::default());
    let mut mailer = Mailer::new(tls_config(&format!("tls://{}", server.address())));
    let result = mailer.send_text_message("sender@example.com", &["a@example.com"], "Hi", "Body");
    drop(mailer);

    assert!(!result.success);
    assert!(result.error_info.starts_with("TLS unavailable"), "{}", result.error_info);
    let transcript = server.finish();
    assert!(!transcript.saw("MAIL FROM:"));
    assert!(transcript.messages.is_empty());
}
