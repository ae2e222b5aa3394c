//! Service layer
//!
//! Business rules on top of the repositories. Every operation that acts on
//! behalf of someone takes a [`Ctx`]; the actor must be a registered user.

pub mod files;
pub mod groups;
pub mod messages;
pub mod users;

pub use files::{FileUploadService, Upload};
pub use groups::{GroupService, GroupUpdate};
pub use messages::{ConversationSummary, MessageService};
pub use users::{ProfileUpdate, UserService};

use crate::ctx::Ctx;
use crate::error::{Error, Result};
use tracing::warn;
use xchat_store::{Message, User, UserRepository};

/// Load the acting user.
pub(crate) async fn actor(users: &UserRepository, ctx: &Ctx) -> Result<User> {
    users
        .find_by_id(ctx.user_id())
        .await?
        .ok_or_else(|| Error::not_found("user", ctx.user_id()))
}

/// Trim `value` and check it holds between 1 and `max` characters.
pub(crate) fn required_text(field: &str, value: &str, max: usize) -> Result<String> {
    let value = value.trim();
    if value.is_empty() {
        return Err(Error::Validation(format!("{} must not be empty", field)));
    }
    if value.chars().count() > max {
        return Err(Error::Validation(format!(
            "{} must be at most {} characters",
            field, max
        )));
    }
    Ok(value.to_string())
}

/// Lower-cased email if it looks deliverable.
pub(crate) fn normalize_email(email: &str) -> Result<String> {
    let email = email.trim().to_lowercase();
    let plausible = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    };
    if !plausible || email.len() > 254 || email.chars().any(char::is_whitespace) {
        return Err(Error::Validation(format!("'{}' is not a valid email", email)));
    }
    Ok(email)
}

/// Keep only the newest `limit` messages of a chronological list.
pub(crate) fn keep_newest(mut messages: Vec<Message>, limit: Option<usize>) -> Vec<Message> {
    if let Some(limit) = limit {
        let skip = messages.len().saturating_sub(limit);
        messages.drain(..skip);
    }
    messages
}

/// Delete the stored files of removed messages; failures are only logged.
pub(crate) async fn discard_attachments(files: &FileUploadService, messages: &[Message]) {
    for attachment in messages.iter().filter_map(|m| m.attachment.as_ref()) {
        if let Err(e) = files.remove(attachment).await {
            warn!(
                "[Files] Could not remove {}: {}",
                attachment.stored_name, e
            );
        }
    }
}
