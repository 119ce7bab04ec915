use async_trait::async_trait;
use uuid::Uuid;

/// Media type of an on-the-fly rendering.
pub const SVG_CONTENT_TYPE: &str = "image/svg+xml";

#[derive(Debug, thiserror::Error)]
pub enum CodeError {
    #[error("code rendering failed: {0}")]
    Render(String),

    #[error("code artifact could not be written: {0}")]
    Io(#[from] std::io::Error),
}

/// Maps a ticket identifier to a scannable image artifact.
///
/// Implementations must be pure in the identifier: rendering the same id twice gives the
/// same bytes, so a lost or failed artifact can always be regenerated.
#[async_trait]
pub trait CodeEncoder: Send + Sync {
    /// Render the artifact bytes without persisting anything.
    fn render(&self, ticket_id: Uuid) -> Result<Vec<u8>, CodeError>;

    /// Render and store the artifact, returning its retrievable reference.
    async fn encode(&self, ticket_id: Uuid) -> Result<String, CodeError>;
}
