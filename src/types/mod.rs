use std::fmt;

use serde::{Deserialize, Serialize};

/// Author of a conversation turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    /// Returns the lowercase wire name shared by most vendors.
    ///
    /// # Examples
    ///
    /// ```
    /// use llmify::types::Role;
    ///
    /// assert_eq!(Role::Assistant.as_str(), "assistant");
    /// ```
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Base64 image attached to a message.
///
/// Only inline data is accepted. Reading files or fetching URLs is left to the caller.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Image {
    /// Base64-encoded bytes, without a `data:` prefix.
    pub data: String,
    /// MIME type such as `image/png`.
    pub media_type: String,
}

impl Image {
    pub fn new(data: impl Into<String>, media_type: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            media_type: media_type.into(),
        }
    }

    /// Renders the image as a `data:` URL.
    pub fn data_url(&self) -> String {
        format!("data:{};base64,{}", self.media_type, self.data)
    }
}

/// One vendor-neutral conversation turn.
///
/// Content is always plain text; it may be empty when an image is attached.
///
/// # Examples
///
/// ```
/// use llmify::types::{Image, Message, Role};
///
/// let conversation = vec![
///     Message::system("You are terse."),
///     Message::user("Describe this picture."),
///     Message::image("", Image::new("iVBORw0KGgo=", "image/png")),
/// ];
/// assert_eq!(conversation[2].role, Role::User);
/// assert!(conversation[2].image.is_some());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<Image>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            image: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    /// User turn carrying an image and optional accompanying text.
    pub fn image(content: impl Into<String>, image: Image) -> Self {
        Self::user(content).with_image(image)
    }

    /// Attaches an image to any turn.
    pub fn with_image(mut self, image: Image) -> Self {
        self.image = Some(image);
        self
    }

    pub(crate) fn has_text(&self) -> bool {
        !self.content.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn messages_compare_by_value() {
        let a = Message::image("look", Image::new("AAAA", "image/jpeg"));
        let b = Message::user("look").with_image(Image::new("AAAA", "image/jpeg"));
        assert_eq!(a, b);
        assert_ne!(a, Message::user("look"));
    }

    #[test]
    fn message_serializes_with_lowercase_role() {
        let value = serde_json::to_value(Message::assistant("hi")).expect("serialize");
        assert_eq!(value, serde_json::json!({"role": "assistant", "content": "hi"}));

        let parsed: Message =
            serde_json::from_value(serde_json::json!({"role": "system", "content": "be brief"}))
                .expect("deserialize");
        assert_eq!(parsed, Message::system("be brief"));
    }

    #[test]
    fn data_url_uses_media_type() {
        let image = Image::new("QUJD", "image/webp");
        assert_eq!(image.data_url(), "data:image/webp;base64,QUJD");
    }
}
