//! Content transform for feedrelay.
//!
//! Turns polled feed items into outbound messages: truncates text
//! fields, attaches extracted images, and applies the optional opaque
//! filters (image adjustment, text-to-image) before handoff to the
//! host platform.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use tracing::warn;

use crate::config::{PicConfig, RenderConfig};
use crate::pipeline::PolledItem;
use crate::platform::{ImageAdjuster, TextRenderer};

/// Truncation marker appended to cut text.
const ELLIPSIS: &str = "...";

/// Maximum categories shown in the meta line.
const MAX_CATEGORIES: usize = 3;

/// One message ready for the host platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundMessage {
    /// Rendered text block. `None` when text-to-image replaced it.
    pub text: Option<String>,
    /// Image references to attach.
    pub images: Vec<String>,
    /// Image reference produced by text-to-image rendering.
    pub rendered_image: Option<String>,
}

/// A delivery unit: a lone message or a forwarded bundle of the whole
/// tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// One item, sent on its own.
    Single(OutboundMessage),
    /// All items of a tick merged into one forwarded unit.
    Bundle(Vec<OutboundMessage>),
}

/// Renders polled items into outbound messages per the configured
/// transforms.
pub struct MessageRenderer {
    render: RenderConfig,
    pic: PicConfig,
    timezone: Tz,
    adjuster: Option<Arc<dyn ImageAdjuster>>,
    text_renderer: Option<Arc<dyn TextRenderer>>,
}

impl MessageRenderer {
    /// Create a renderer. The filters are optional collaborators; when
    /// absent, the corresponding transforms are skipped even if
    /// enabled in config.
    pub fn new(render: RenderConfig, pic: PicConfig, timezone: Tz) -> Self {
        Self {
            render,
            pic,
            timezone,
            adjuster: None,
            text_renderer: None,
        }
    }

    /// Attach the opaque image adjustment filter.
    pub fn with_adjuster(mut self, adjuster: Arc<dyn ImageAdjuster>) -> Self {
        self.adjuster = Some(adjuster);
        self
    }

    /// Attach the opaque text-to-image renderer.
    pub fn with_text_renderer(mut self, renderer: Arc<dyn TextRenderer>) -> Self {
        self.text_renderer = Some(renderer);
        self
    }

    /// Render one item into an outbound message.
    pub async fn render_item(&self, polled: &PolledItem) -> OutboundMessage {
        let item = &polled.item;

        let title = truncate_chars(&item.title, self.render.title_max_length);
        let description = item
            .description
            .as_deref()
            .map(|d| smart_truncate(d, self.render.description_max_length));

        let mut lines = vec![format!("[{}] {}", polled.channel, title)];
        if let Some(meta) = self.meta_line(item) {
            lines.push(meta);
        }
        if let Some(description) = description.filter(|d| !d.is_empty()) {
            lines.push(String::new());
            lines.push(description);
        }
        if !self.render.hide_url {
            if let Some(link) = item.link.as_deref().filter(|l| !l.is_empty()) {
                lines.push(String::new());
                lines.push(link.to_string());
            }
        }
        let text = lines.join("\n");

        let images = self.collect_images(item).await;

        if self.render.text_to_image {
            if let Some(renderer) = &self.text_renderer {
                match renderer.render(&text).await {
                    Ok(rendered) => {
                        return OutboundMessage {
                            text: None,
                            images,
                            rendered_image: Some(rendered),
                        };
                    }
                    Err(e) => {
                        warn!(error = %e, "text-to-image rendering failed, sending raw text");
                    }
                }
            }
        }

        OutboundMessage {
            text: Some(text),
            images,
            rendered_image: None,
        }
    }

    /// Author, categories and publish time, joined with pipes.
    fn meta_line(&self, item: &crate::feed::ParsedItem) -> Option<String> {
        let mut parts = Vec::new();
        if let Some(author) = item.author.as_deref() {
            parts.push(author.to_string());
        }
        if !item.categories.is_empty() {
            parts.push(
                item.categories
                    .iter()
                    .take(MAX_CATEGORIES)
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(", "),
            );
        }
        if let Some(published) = item.published_at {
            parts.push(self.format_time(published));
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" | "))
        }
    }

    fn format_time(&self, at: DateTime<Utc>) -> String {
        at.with_timezone(&self.timezone)
            .format("%Y-%m-%d %H:%M")
            .to_string()
    }

    /// Extracted image URLs, capped and optionally adjusted.
    async fn collect_images(&self, item: &crate::feed::ParsedItem) -> Vec<String> {
        if !self.pic.enable_images || item.images.is_empty() {
            return Vec::new();
        }

        let cap = if self.pic.max_images_per_item < 0 {
            item.images.len()
        } else {
            self.pic.max_images_per_item as usize
        };

        let mut images = Vec::with_capacity(cap.min(item.images.len()));
        for url in item.images.iter().take(cap) {
            let reference = if self.pic.adjust_images {
                match &self.adjuster {
                    Some(adjuster) => match adjuster.adjust(url).await {
                        Ok(adjusted) => adjusted,
                        Err(e) => {
                            warn!(url = %url, error = %e, "image adjustment failed, using original");
                            url.clone()
                        }
                    },
                    None => url.clone(),
                }
            } else {
                url.clone()
            };
            images.push(reference);
        }
        images
    }
}

/// Truncate to `max_chars` characters, appending the marker when cut.
pub fn truncate_chars(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{}{}", cut.trim_end(), ELLIPSIS)
}

/// Truncate to `max_chars` characters, preferring a sentence boundary
/// in the last 30% of the budget, then a word boundary in the last
/// 20%. A cut ending on a complete sentence carries no marker; other
/// cuts get one.
pub fn smart_truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();

    let mut sentence_end = None;
    let mut space_start = None;
    for (count, (idx, ch)) in cut.char_indices().enumerate() {
        if matches!(ch, '.' | '!' | '?' | '。' | '！' | '？' | '\n')
            && count + 1 > max_chars * 7 / 10
        {
            sentence_end = Some(idx + ch.len_utf8());
        }
        if ch == ' ' && count + 1 > max_chars * 4 / 5 {
            space_start = Some(idx);
        }
    }

    if let Some(end) = sentence_end {
        return cut[..end].trim_end().to_string();
    }
    let keep = match space_start {
        Some(idx) => &cut[..idx],
        None => cut.as_str(),
    };
    format!("{}{}", keep.trim_end(), ELLIPSIS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::ParsedItem;
    use crate::{RelayError, Result};
    use async_trait::async_trait;
    use chrono::TimeZone;

    fn tz() -> Tz {
        "UTC".parse().unwrap()
    }

    fn polled(item: ParsedItem) -> PolledItem {
        PolledItem {
            channel: "Test Channel".to_string(),
            item,
        }
    }

    fn item() -> ParsedItem {
        ParsedItem {
            guid: Some("guid-1".to_string()),
            title: "A headline".to_string(),
            link: Some("https://example.com/1".to_string()),
            description: Some("Body text".to_string()),
            author: None,
            categories: vec![],
            images: vec![],
            published_at: None,
        }
    }

    struct StubAdjuster;

    #[async_trait]
    impl ImageAdjuster for StubAdjuster {
        async fn adjust(&self, image_url: &str) -> Result<String> {
            Ok(format!("{image_url}#adjusted"))
        }
    }

    struct FailingAdjuster;

    #[async_trait]
    impl ImageAdjuster for FailingAdjuster {
        async fn adjust(&self, _image_url: &str) -> Result<String> {
            Err(RelayError::Delivery("adjuster down".to_string()))
        }
    }

    struct StubTextRenderer;

    #[async_trait]
    impl TextRenderer for StubTextRenderer {
        async fn render(&self, _text: &str) -> Result<String> {
            Ok("rendered.png".to_string())
        }
    }

    #[test]
    fn test_truncate_chars_short_text_untouched() {
        assert_eq!(truncate_chars("short", 30), "short");
        assert_eq!(truncate_chars("", 30), "");
    }

    #[test]
    fn test_truncate_chars_counts_characters() {
        let text = "あ".repeat(40);
        let truncated = truncate_chars(&text, 30);
        assert_eq!(truncated.chars().count(), 33); // 30 + marker
        assert!(truncated.ends_with("..."));
    }

    #[test]
    fn test_truncate_chars_exact_length_untouched() {
        let text = "x".repeat(30);
        assert_eq!(truncate_chars(&text, 30), text);
    }

    #[test]
    fn test_smart_truncate_short_text_untouched() {
        assert_eq!(smart_truncate("short", 30), "short");
    }

    #[test]
    fn test_smart_truncate_prefers_sentence_boundary() {
        assert_eq!(
            smart_truncate("One sentence. And then more text.", 16),
            "One sentence."
        );
    }

    #[test]
    fn test_smart_truncate_falls_back_to_word_boundary() {
        assert_eq!(smart_truncate("alpha beta gamma delta", 13), "alpha beta...");
    }

    #[test]
    fn test_smart_truncate_hard_cut_gets_marker() {
        assert_eq!(
            smart_truncate("abcdefghijklmnopqrstuvwxyz", 10),
            "abcdefghij..."
        );
    }

    #[test]
    fn test_smart_truncate_early_boundary_ignored() {
        // The only sentence boundary sits before 70% of the budget, so
        // the cut is a plain one.
        let text = "Hi. Then a much longer run of text with no stops";
        let truncated = smart_truncate(text, 20);
        assert!(truncated.ends_with("..."));
        assert!(truncated.len() > "Hi.".len() + 3);
    }

    #[tokio::test]
    async fn test_render_item_basic_layout() {
        let renderer = MessageRenderer::new(RenderConfig::default(), PicConfig::default(), tz());
        let message = renderer.render_item(&polled(item())).await;

        let text = message.text.unwrap();
        assert!(text.starts_with("[Test Channel] A headline"));
        assert!(text.contains("Body text"));
        assert!(text.contains("https://example.com/1"));
        assert!(message.images.is_empty());
        assert!(message.rendered_image.is_none());
    }

    #[tokio::test]
    async fn test_render_item_truncates_title_and_description() {
        let config = RenderConfig {
            title_max_length: 5,
            description_max_length: 4,
            ..RenderConfig::default()
        };
        let renderer = MessageRenderer::new(config, PicConfig::default(), tz());

        let mut it = item();
        it.title = "A very long headline".to_string();
        it.description = Some("A very long body".to_string());
        let message = renderer.render_item(&polled(it)).await;

        let text = message.text.unwrap();
        assert!(text.contains("A ver..."));
        assert!(text.contains("A ve..."));
        assert!(!text.contains("A very long headline"));
    }

    #[tokio::test]
    async fn test_render_item_hide_url() {
        let config = RenderConfig {
            hide_url: true,
            ..RenderConfig::default()
        };
        let renderer = MessageRenderer::new(config, PicConfig::default(), tz());
        let message = renderer.render_item(&polled(item())).await;

        assert!(!message.text.unwrap().contains("https://example.com/1"));
    }

    #[tokio::test]
    async fn test_render_item_meta_line() {
        let renderer = MessageRenderer::new(RenderConfig::default(), PicConfig::default(), tz());

        let mut it = item();
        it.author = Some("Reporter".to_string());
        it.categories = vec![
            "news".to_string(),
            "tech".to_string(),
            "rust".to_string(),
            "extra".to_string(),
        ];
        it.published_at = Some(Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap());
        let message = renderer.render_item(&polled(it)).await;

        let text = message.text.unwrap();
        assert!(text.contains("Reporter | news, tech, rust | 2024-01-15 10:30"));
        assert!(!text.contains("extra"));
    }

    #[tokio::test]
    async fn test_render_item_meta_line_respects_timezone() {
        let tokyo: Tz = "Asia/Tokyo".parse().unwrap();
        let renderer = MessageRenderer::new(RenderConfig::default(), PicConfig::default(), tokyo);

        let mut it = item();
        it.published_at = Some(Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap());
        let message = renderer.render_item(&polled(it)).await;

        assert!(message.text.unwrap().contains("2024-01-15 19:30")); // UTC+9
    }

    #[tokio::test]
    async fn test_images_disabled_by_default() {
        let renderer = MessageRenderer::new(RenderConfig::default(), PicConfig::default(), tz());

        let mut it = item();
        it.images = vec!["https://example.com/a.jpg".to_string()];
        let message = renderer.render_item(&polled(it)).await;

        assert!(message.images.is_empty());
    }

    #[tokio::test]
    async fn test_images_capped() {
        let pic = PicConfig {
            enable_images: true,
            max_images_per_item: 2,
            ..PicConfig::default()
        };
        let renderer = MessageRenderer::new(RenderConfig::default(), pic, tz());

        let mut it = item();
        it.images = (0..5).map(|i| format!("https://example.com/{i}.jpg")).collect();
        let message = renderer.render_item(&polled(it)).await;

        assert_eq!(
            message.images,
            vec![
                "https://example.com/0.jpg".to_string(),
                "https://example.com/1.jpg".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_images_negative_cap_unbounded() {
        let pic = PicConfig {
            enable_images: true,
            max_images_per_item: -1,
            ..PicConfig::default()
        };
        let renderer = MessageRenderer::new(RenderConfig::default(), pic, tz());

        let mut it = item();
        it.images = (0..5).map(|i| format!("https://example.com/{i}.jpg")).collect();
        let message = renderer.render_item(&polled(it)).await;

        assert_eq!(message.images.len(), 5);
    }

    #[tokio::test]
    async fn test_images_adjusted_when_enabled() {
        let pic = PicConfig {
            enable_images: true,
            adjust_images: true,
            ..PicConfig::default()
        };
        let renderer = MessageRenderer::new(RenderConfig::default(), pic, tz())
            .with_adjuster(Arc::new(StubAdjuster));

        let mut it = item();
        it.images = vec!["https://example.com/a.jpg".to_string()];
        let message = renderer.render_item(&polled(it)).await;

        assert_eq!(message.images, vec!["https://example.com/a.jpg#adjusted".to_string()]);
    }

    #[tokio::test]
    async fn test_image_adjustment_failure_keeps_original() {
        let pic = PicConfig {
            enable_images: true,
            adjust_images: true,
            ..PicConfig::default()
        };
        let renderer = MessageRenderer::new(RenderConfig::default(), pic, tz())
            .with_adjuster(Arc::new(FailingAdjuster));

        let mut it = item();
        it.images = vec!["https://example.com/a.jpg".to_string()];
        let message = renderer.render_item(&polled(it)).await;

        assert_eq!(message.images, vec!["https://example.com/a.jpg".to_string()]);
    }

    #[tokio::test]
    async fn test_text_to_image_drops_raw_text() {
        let config = RenderConfig {
            text_to_image: true,
            ..RenderConfig::default()
        };
        let renderer = MessageRenderer::new(config, PicConfig::default(), tz())
            .with_text_renderer(Arc::new(StubTextRenderer));

        let message = renderer.render_item(&polled(item())).await;

        assert!(message.text.is_none());
        assert_eq!(message.rendered_image.as_deref(), Some("rendered.png"));
    }

    #[tokio::test]
    async fn test_text_to_image_without_renderer_keeps_text() {
        let config = RenderConfig {
            text_to_image: true,
            ..RenderConfig::default()
        };
        let renderer = MessageRenderer::new(config, PicConfig::default(), tz());

        let message = renderer.render_item(&polled(item())).await;

        assert!(message.text.is_some());
        assert!(message.rendered_image.is_none());
    }
}
