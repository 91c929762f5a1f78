//! Errors surfaced to configuration-change callers.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Unknown model discriminator. A client error: the request is rejected,
    /// the server is never silently handled by a default controller.
    #[error("server model '{0}' is not supported")]
    UnsupportedModel(String),
}
