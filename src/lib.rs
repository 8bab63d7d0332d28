//! `postkit` — a blocking SMTP client engine and MIME message composer.
//!
//! Messages are assembled from a [`model::message::Message`], rendered to
//! RFC 5322 bytes by [`mime::compose`], optionally signed with DKIM or
//! S/MIME and handed to a [`transport::Transport`]: an SMTP server, a local
//! sendmail binary or an MTA pickup directory. [`delivery::Mailer`] ties the
//! steps together and reports a [`delivery::DeliveryResult`].

pub mod config;
pub mod delivery;
pub mod dkim;
pub mod encoding;
pub mod error;
pub mod logging;
pub mod mime;
pub mod model;
pub mod smime;
pub mod smtp;
pub mod transport;

pub use delivery::{DeliveryResult, Mailer};
pub use error::{MailError, Result};
pub use model::address::Address;
pub use model::attachment::Attachment;
pub use model::message::Message;
