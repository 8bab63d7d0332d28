//! Blocking SMTP client: replies, capabilities, TLS, AUTH and the session
//! state machine.

pub mod auth;
pub mod capabilities;
pub mod data;
pub mod ntlm;
pub mod reply;
pub mod session;
pub mod stream;

pub use auth::{Credentials, Mechanism};
pub use capabilities::{Capabilities, Greeting};
pub use reply::Reply;
pub use session::{MailOptions, SessionOptions, SessionState, SmtpSession};
pub use stream::TlsSettings;
