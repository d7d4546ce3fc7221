//! Host platform seam for feedrelay.
//!
//! The relay core never talks to a chat network itself: it hands
//! rendered messages to the host platform's send primitive and treats
//! image adjustment and text-to-image rendering as opaque collaborators
//! behind traits.

use async_trait::async_trait;
use tracing::info;

use crate::render::Outbound;
use crate::Result;

/// The host platform's outbound message surface.
#[async_trait]
pub trait ChatPlatform: Send + Sync {
    /// Whether the platform can deliver a forwarded bundle to this
    /// destination (some platforms disallow them, or disallow
    /// unsolicited pushes entirely).
    fn supports_bundles(&self, destination: &str) -> bool;

    /// Deliver one outbound unit to a destination.
    ///
    /// The core never retries a failed send; the tick is complete
    /// either way.
    async fn send(&self, destination: &str, outbound: &Outbound) -> Result<()>;
}

/// Opaque per-image perturbation filter (external collaborator).
///
/// Takes an image URL and returns the reference to deliver in its
/// place - a rewritten URL or a local file path, at the host's
/// discretion.
#[async_trait]
pub trait ImageAdjuster: Send + Sync {
    /// Adjust one image, returning the replacement reference.
    async fn adjust(&self, image_url: &str) -> Result<String>;
}

/// Opaque text-block-to-image renderer (external collaborator).
#[async_trait]
pub trait TextRenderer: Send + Sync {
    /// Render a text block to an image, returning its reference.
    async fn render(&self, text: &str) -> Result<String>;
}

/// A delivery sink that writes messages to the process log.
///
/// Used by the bundled binary when no host platform is attached, and
/// handy in development.
pub struct LogPlatform;

#[async_trait]
impl ChatPlatform for LogPlatform {
    fn supports_bundles(&self, _destination: &str) -> bool {
        true
    }

    async fn send(&self, destination: &str, outbound: &Outbound) -> Result<()> {
        match outbound {
            Outbound::Single(message) => {
                info!(destination, text = message.text.as_deref().unwrap_or(""), images = message.images.len(), "message");
            }
            Outbound::Bundle(messages) => {
                info!(destination, items = messages.len(), "forwarded bundle");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::render::OutboundMessage;

    #[tokio::test]
    async fn test_log_platform_accepts_everything() {
        let platform = LogPlatform;
        assert!(platform.supports_bundles("dest:1"));

        let message = OutboundMessage {
            text: Some("hello".to_string()),
            images: vec![],
            rendered_image: None,
        };
        assert!(platform
            .send("dest:1", &Outbound::Single(message.clone()))
            .await
            .is_ok());
        assert!(platform
            .send("dest:1", &Outbound::Bundle(vec![message]))
            .await
            .is_ok());
    }
}
