//! Core data model types: addresses, attachments and the message aggregate.

pub mod address;
pub mod attachment;
pub mod message;
