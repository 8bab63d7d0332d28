//! Delivery orchestration: host lists, the `Mailer` front end and the
//! per-send result.

pub mod hosts;
pub mod mailer;
pub mod result;

pub use hosts::{connect_first, parse_hosts, HostSpec};
pub use mailer::Mailer;
pub use result::DeliveryResult;
