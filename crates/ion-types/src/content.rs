//! Presentation-time classification of stored message content.
//!
//! Messages are stored as plain strings whether they hold text or an image
//! reference. Renderers decide how to show them from the string alone.

const IMAGE_EXTENSIONS: &[&str] = &["gif", "jpg", "jpeg", "tif", "tiff", "png", "webp", "bmp"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    Image,
}

impl MessageKind {
    pub fn classify(content: &str) -> Self {
        if is_image_ref(content) {
            Self::Image
        } else {
            Self::Text
        }
    }
}

/// True if `content` ends in a known image extension, ignoring any query
/// string.
pub fn is_image_ref(content: &str) -> bool {
    let path = content.split('?').next().unwrap_or(content);
    let Some((stem, ext)) = path.rsplit_once('.') else {
        return false;
    };
    !stem.is_empty()
        && IMAGE_EXTENSIONS
            .iter()
            .any(|known| ext.eq_ignore_ascii_case(known))
}
