//! MIME composition: part tree, boundaries, header blocks and the composer.

pub mod boundary;
pub mod composer;
pub mod headers;
pub mod html;
pub mod part;

pub use composer::{compose, ComposeOptions, ComposedMessage, MessageShape};
pub use headers::HeaderBlock;
