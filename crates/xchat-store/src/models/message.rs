use super::{
    enum_attr, format_time, new_id, now, required_attr, required_child_text, time_attr, Entity,
};
use crate::element::Element;
use crate::error::{Result, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub id: String,
    pub from_user: String,
    pub recipient: Recipient,
    pub content: String,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub status: MessageStatus,
    pub timestamp: DateTime<Utc>,
    pub attachment: Option<Attachment>,
}

/// Where a message goes: exactly one user or one group.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case", tag = "kind", content = "id")]
pub enum Recipient {
    User(String),
    Group(String),
}

impl Recipient {
    pub fn id(&self) -> &str {
        match self {
            Recipient::User(id) | Recipient::Group(id) => id,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    Image,
    File,
}

impl MessageType {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Text => "text",
            MessageType::Image => "image",
            MessageType::File => "file",
        }
    }
}

impl FromStr for MessageType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "text" => Ok(MessageType::Text),
            "image" => Ok(MessageType::Image),
            "file" => Ok(MessageType::File),
            other => Err(format!("unknown message type '{}'", other)),
        }
    }
}

/// Delivery state. Ordered: a message only ever moves forward.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    Sent,
    Delivered,
    Read,
}

impl MessageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageStatus::Sent => "sent",
            MessageStatus::Delivered => "delivered",
            MessageStatus::Read => "read",
        }
    }
}

impl fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MessageStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "sent" => Ok(MessageStatus::Sent),
            "delivered" => Ok(MessageStatus::Delivered),
            "read" => Ok(MessageStatus::Read),
            other => Err(format!("unknown message status '{}'", other)),
        }
    }
}

/// Metadata of a stored upload attached to a message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Attachment {
    /// Sanitized original file name
    pub name: String,
    /// Name of the file inside the uploads directory
    pub stored_name: String,
    pub mime_type: String,
    pub size: u64,
    /// Hex SHA-256 of the stored bytes
    pub checksum: String,
}

impl Message {
    pub fn text(
        from_user: impl Into<String>,
        recipient: Recipient,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: new_id("msg"),
            from_user: from_user.into(),
            recipient,
            content: content.into(),
            message_type: MessageType::Text,
            status: MessageStatus::Sent,
            timestamp: now(),
            attachment: None,
        }
    }

    /// A file message; `image/*` attachments become image messages.
    pub fn with_attachment(mut self, attachment: Attachment) -> Self {
        self.message_type = if attachment.mime_type.starts_with("image/") {
            MessageType::Image
        } else {
            MessageType::File
        };
        self.attachment = Some(attachment);
        self
    }

    pub fn is_direct(&self) -> bool {
        matches!(self.recipient, Recipient::User(_))
    }

    pub fn to_group(&self) -> Option<&str> {
        match &self.recipient {
            Recipient::Group(id) => Some(id),
            Recipient::User(_) => None,
        }
    }

    pub fn to_user(&self) -> Option<&str> {
        match &self.recipient {
            Recipient::User(id) => Some(id),
            Recipient::Group(_) => None,
        }
    }

    /// True for a direct message exchanged between `a` and `b`, either way.
    pub fn is_between(&self, a: &str, b: &str) -> bool {
        match self.to_user() {
            Some(to) => (self.from_user == a && to == b) || (self.from_user == b && to == a),
            None => false,
        }
    }

    /// True when the user sent or directly received the message.
    pub fn involves_user(&self, user_id: &str) -> bool {
        self.from_user == user_id || self.to_user() == Some(user_id)
    }

    /// The other side of a direct conversation, seen from `user_id`.
    pub fn peer_of(&self, user_id: &str) -> Option<&str> {
        let to = self.to_user()?;
        if self.from_user == user_id {
            Some(to)
        } else if to == user_id {
            Some(&self.from_user)
        } else {
            None
        }
    }
}

impl Entity for Message {
    const COLLECTION: &'static str = "messages";
    const ELEMENT: &'static str = "message";
    const KIND: &'static str = "message";

    fn id(&self) -> &str {
        &self.id
    }

    fn to_element(&self) -> Element {
        let el = Element::new(Self::ELEMENT)
            .with_attr("id", &self.id)
            .with_attr("type", self.message_type.as_str())
            .with_attr("status", self.status.as_str())
            .with_attr("timestamp", format_time(&self.timestamp))
            .with_attr("from_user", &self.from_user)
            .with_opt_attr("to_user", self.to_user())
            .with_opt_attr("to_group", self.to_group())
            .with_child(Element::new("content").with_text(&self.content));

        match &self.attachment {
            Some(file) => el.with_child(
                Element::new("file")
                    .with_attr("name", &file.name)
                    .with_attr("stored_name", &file.stored_name)
                    .with_attr("mime_type", &file.mime_type)
                    .with_attr("size", file.size.to_string())
                    .with_attr("checksum", &file.checksum),
            ),
            None => el,
        }
    }

    fn from_element(el: &Element) -> Result<Self> {
        let recipient = match (el.attr("to_user"), el.attr("to_group")) {
            (Some(user), None) => Recipient::User(user.to_string()),
            (None, Some(group)) => Recipient::Group(group.to_string()),
            (Some(_), Some(_)) => {
                return Err(StoreError::malformed(
                    &el.name,
                    "both to_user and to_group are set",
                ))
            }
            (None, None) => {
                return Err(StoreError::malformed(
                    &el.name,
                    "neither to_user nor to_group is set",
                ))
            }
        };

        let attachment = el
            .child("file")
            .map(|file| -> Result<Attachment> {
                let size = required_attr(file, "size")?;
                Ok(Attachment {
                    name: required_attr(file, "name")?.to_string(),
                    stored_name: required_attr(file, "stored_name")?.to_string(),
                    mime_type: required_attr(file, "mime_type")?.to_string(),
                    size: size.parse().map_err(|_| {
                        StoreError::malformed("file", format!("bad size '{}'", size))
                    })?,
                    checksum: required_attr(file, "checksum")?.to_string(),
                })
            })
            .transpose()?;

        Ok(Self {
            id: required_attr(el, "id")?.to_string(),
            from_user: required_attr(el, "from_user")?.to_string(),
            recipient,
            content: required_child_text(el, "content")?.to_string(),
            message_type: enum_attr(el, "type")?,
            status: enum_attr(el, "status")?,
            timestamp: time_attr(el, "timestamp")?,
            attachment,
        })
    }
}
