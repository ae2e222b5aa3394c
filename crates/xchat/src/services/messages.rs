//! Sending, reading and housekeeping of direct and group messages.

use bytes::Bytes;
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};
use xchat_store::{
    Attachment, ContactRepository, GroupRepository, Message, MessageRepository, MessageStatus,
    Recipient, UserRepository,
};

use super::{actor, discard_attachments, keep_newest, FileUploadService, Upload};
use crate::config::{ChatConfig, SCHEMA_MAX_MESSAGE_LEN};
use crate::ctx::Ctx;
use crate::error::{Error, Result};

/// Latest activity in one conversation, as shown in an inbox.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationSummary {
    /// The peer user or the group the conversation is with
    pub with: Recipient,
    pub last_message: Message,
    /// Direct messages from the peer the actor has not read
    pub unread: usize,
}

pub struct MessageService {
    users: UserRepository,
    contacts: ContactRepository,
    groups: GroupRepository,
    messages: MessageRepository,
    files: Arc<FileUploadService>,
    max_message_len: usize,
}

impl MessageService {
    pub fn new(
        config: &ChatConfig,
        users: UserRepository,
        contacts: ContactRepository,
        groups: GroupRepository,
        messages: MessageRepository,
        files: Arc<FileUploadService>,
    ) -> Self {
        let max_message_len = match config.schema_file {
            Some(_) => config.max_message_len,
            None => config.max_message_len.min(SCHEMA_MAX_MESSAGE_LEN),
        };
        Self {
            users,
            contacts,
            groups,
            messages,
            files,
            max_message_len,
        }
    }

    fn body(&self, content: &str, required: bool) -> Result<String> {
        let content = content.trim();
        if required && content.is_empty() {
            return Err(Error::Validation("message must not be empty".into()));
        }
        if content.chars().count() > self.max_message_len {
            return Err(Error::Validation(format!(
                "message must be at most {} characters",
                self.max_message_len
            )));
        }
        Ok(content.to_string())
    }

    /// Check the actor may post to `recipient`: a contact for direct
    /// messages, a member for group messages.
    async fn authorize_send(&self, ctx: &Ctx, recipient: &Recipient) -> Result<()> {
        actor(&self.users, ctx).await?;
        match recipient {
            Recipient::User(user_id) => {
                if ctx.is(user_id) {
                    return Err(Error::Validation("cannot message yourself".into()));
                }
                if self.users.find_by_id(user_id).await?.is_none() {
                    return Err(Error::not_found("user", user_id));
                }
                if self.contacts.find_between(ctx.user_id(), user_id).await?.is_none() {
                    warn!("[Messages] {} tried to message non-contact {}", ctx.user_id(), user_id);
                    return Err(Error::Forbidden(format!("{} is not in your contacts", user_id)));
                }
            }
            Recipient::Group(group_id) => self.require_membership(ctx, group_id).await?,
        }
        Ok(())
    }

    async fn require_membership(&self, ctx: &Ctx, group_id: &str) -> Result<()> {
        let group = self
            .groups
            .find_by_id(group_id)
            .await?
            .ok_or_else(|| Error::not_found("group", group_id))?;
        if !group.is_member(ctx.user_id()) {
            return Err(Error::Forbidden(format!("not a member of group '{}'", group.name)));
        }
        Ok(())
    }

    pub async fn send_text(&self, ctx: &Ctx, recipient: Recipient, content: &str) -> Result<Message> {
        let content = self.body(content, true)?;
        self.authorize_send(ctx, &recipient).await?;

        let message = Message::text(ctx.user_id(), recipient, content);
        self.messages.create(&message).await?;
        info!(
            "[Messages] {} -> {}: {}",
            message.from_user,
            message.recipient.id(),
            message.id
        );
        Ok(message)
    }

    /// Store an upload and send it with an optional caption.
    pub async fn send_file(
        &self,
        ctx: &Ctx,
        recipient: Recipient,
        upload: &Upload,
        caption: Option<&str>,
    ) -> Result<Message> {
        let content = self.body(caption.unwrap_or_default(), false)?;
        self.authorize_send(ctx, &recipient).await?;

        let attachment = self.files.store(upload).await?;
        let message = Message::text(ctx.user_id(), recipient, content).with_attachment(attachment);
        if let Err(e) = self.messages.create(&message).await {
            discard_attachments(&self.files, std::slice::from_ref(&message)).await;
            return Err(e.into());
        }
        info!(
            "[Messages] {} -> {}: {} ({})",
            message.from_user,
            message.recipient.id(),
            message.id,
            message.message_type.as_str()
        );
        Ok(message)
    }

    /// Direct messages with `peer_id`, oldest first; `limit` keeps the newest.
    pub async fn conversation(
        &self,
        ctx: &Ctx,
        peer_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Message>> {
        actor(&self.users, ctx).await?;
        if self.users.find_by_id(peer_id).await?.is_none() {
            return Err(Error::not_found("user", peer_id));
        }
        let messages = self.messages.conversation(ctx.user_id(), peer_id).await?;
        Ok(keep_newest(messages, limit))
    }

    /// Messages of a group the actor belongs to, oldest first.
    pub async fn group_history(
        &self,
        ctx: &Ctx,
        group_id: &str,
        limit: Option<usize>,
    ) -> Result<Vec<Message>> {
        actor(&self.users, ctx).await?;
        self.require_membership(ctx, group_id).await?;
        let messages = self.messages.for_group(group_id).await?;
        Ok(keep_newest(messages, limit))
    }

    /// Mark everything `peer_id` sent the actor as read.
    pub async fn mark_read(&self, ctx: &Ctx, peer_id: &str) -> Result<usize> {
        actor(&self.users, ctx).await?;
        Ok(self
            .messages
            .advance_status(peer_id, ctx.user_id(), MessageStatus::Read)
            .await?)
    }

    /// Unread direct messages per sender.
    pub async fn unread_counts(&self, ctx: &Ctx) -> Result<BTreeMap<String, usize>> {
        actor(&self.users, ctx).await?;
        let unread = self
            .messages
            .find_where(|m| m.to_user() == Some(ctx.user_id()) && m.status < MessageStatus::Read)
            .await?;

        let mut counts = BTreeMap::new();
        for message in unread {
            *counts.entry(message.from_user).or_insert(0) += 1;
        }
        Ok(counts)
    }

    /// One entry per peer and group with the latest message, newest first.
    pub async fn recent_conversations(&self, ctx: &Ctx) -> Result<Vec<ConversationSummary>> {
        let visible = self.visible_messages(ctx).await?;
        let unread_by_peer = self.unread_counts(ctx).await?;

        let mut latest: BTreeMap<Recipient, Message> = BTreeMap::new();
        for message in visible {
            let with = match &message.recipient {
                Recipient::Group(id) => Recipient::Group(id.clone()),
                Recipient::User(_) => match message.peer_of(ctx.user_id()) {
                    Some(peer) => Recipient::User(peer.to_string()),
                    None => continue,
                },
            };
            latest.insert(with, message);
        }

        let mut summaries: Vec<ConversationSummary> = latest
            .into_iter()
            .map(|(with, last_message)| {
                let unread = match &with {
                    Recipient::User(peer) => unread_by_peer.get(peer).copied().unwrap_or(0),
                    Recipient::Group(_) => 0,
                };
                ConversationSummary {
                    with,
                    last_message,
                    unread,
                }
            })
            .collect();
        summaries.sort_by(|a, b| b.last_message.timestamp.cmp(&a.last_message.timestamp));
        Ok(summaries)
    }

    /// Messages the actor can see whose text or file name contains `query`.
    pub async fn search(&self, ctx: &Ctx, query: &str) -> Result<Vec<Message>> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Err(Error::Validation("search query must not be empty".into()));
        }
        let mut found = self.visible_messages(ctx).await?;
        found.retain(|m| {
            m.content.to_lowercase().contains(&needle)
                || m
                    .attachment
                    .as_ref()
                    .is_some_and(|a| a.name.to_lowercase().contains(&needle))
        });
        debug!("[Messages] Search '{}' by {}: {} hits", needle, ctx.user_id(), found.len());
        Ok(found)
    }

    /// The bytes of a message's attachment, for someone who can see it.
    pub async fn download(&self, ctx: &Ctx, message_id: &str) -> Result<(Attachment, Bytes)> {
        actor(&self.users, ctx).await?;
        let message = self.find(message_id).await?;
        let allowed = match &message.recipient {
            Recipient::User(_) => message.involves_user(ctx.user_id()),
            Recipient::Group(group_id) => self.require_membership(ctx, group_id).await.is_ok(),
        };
        if !allowed {
            return Err(Error::Forbidden("message is not visible to you".into()));
        }
        let attachment = message
            .attachment
            .ok_or_else(|| Error::not_found("attachment", message_id))?;
        let bytes = self.files.open(&attachment).await?;
        Ok((attachment, bytes))
    }

    /// Delete a message the actor sent, together with its stored file.
    pub async fn delete_message(&self, ctx: &Ctx, message_id: &str) -> Result<Message> {
        actor(&self.users, ctx).await?;
        let message = self.find(message_id).await?;
        if !ctx.is(&message.from_user) {
            return Err(Error::Forbidden("only the sender can delete a message".into()));
        }
        let message = self.messages.delete(message_id).await?;
        discard_attachments(&self.files, std::slice::from_ref(&message)).await;
        Ok(message)
    }

    async fn find(&self, message_id: &str) -> Result<Message> {
        self.messages
            .find_by_id(message_id)
            .await?
            .ok_or_else(|| Error::not_found("message", message_id))
    }

    /// Direct messages involving the actor and messages of the actor's
    /// groups, oldest first.
    async fn visible_messages(&self, ctx: &Ctx) -> Result<Vec<Message>> {
        actor(&self.users, ctx).await?;
        let groups: HashSet<String> = self
            .groups
            .find_by_member(ctx.user_id())
            .await?
            .into_iter()
            .map(|g| g.id)
            .collect();
        Ok(self
            .messages
            .find_where(|m| match &m.recipient {
                Recipient::User(_) => m.involves_user(ctx.user_id()),
                Recipient::Group(id) => groups.contains(id),
            })
            .await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::Fixture;
    use xchat_store::MessageType;

    #[tokio::test]
    async fn test_direct_messages_need_a_contact() {
        let fx = Fixture::new().await;
        let ((ada, ada_ctx), (bob, bob_ctx)) = fx.pair().await;
        let (cy, cy_ctx) = fx.user("Cy").await;
        let messages = &fx.state.messages;

        let sent = messages
            .send_text(&ada_ctx, Recipient::User(bob.id.clone()), "  hi bob  ")
            .await
            .unwrap();
        assert_eq!(sent.content, "hi bob");
        assert_eq!(sent.message_type, MessageType::Text);
        messages
            .send_text(&bob_ctx, Recipient::User(ada.id.clone()), "hi ada")
            .await
            .unwrap();

        let err = messages
            .send_text(&cy_ctx, Recipient::User(ada.id.clone()), "psst")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "forbidden");
        let err = messages
            .send_text(&ada_ctx, Recipient::User(ada.id.clone()), "me")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
        let err = messages
            .send_text(&ada_ctx, Recipient::User(bob.id.clone()), "   ")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");
        let err = messages
            .send_text(&ada_ctx, Recipient::User(bob.id.clone()), &"x".repeat(10_001))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");

        let convo = messages.conversation(&bob_ctx, &ada.id, None).await.unwrap();
        assert_eq!(convo.len(), 2);
        assert_eq!(convo[0].id, sent.id);
        let newest = messages.conversation(&bob_ctx, &ada.id, Some(1)).await.unwrap();
        assert_eq!(newest[0].content, "hi ada");
        assert!(messages.conversation(&ada_ctx, &cy.id, None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_length_limit_never_exceeds_bundled_schema() {
        let fx = Fixture::with_config(|config| config.max_message_len = 20_000).await;
        let ((_, ada_ctx), (bob, _)) = fx.pair().await;

        let err = fx
            .state
            .messages
            .send_text(&ada_ctx, Recipient::User(bob.id.clone()), &"x".repeat(15_000))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "validation");

        let longest = "y".repeat(SCHEMA_MAX_MESSAGE_LEN);
        let sent = fx
            .state
            .messages
            .send_text(&ada_ctx, Recipient::User(bob.id.clone()), &longest)
            .await
            .unwrap();
        assert_eq!(sent.content.len(), SCHEMA_MAX_MESSAGE_LEN);
    }

    #[tokio::test]
    async fn test_group_messages_need_membership() {
        let fx = Fixture::new().await;
        let (_, ada_ctx) = fx.user("Ada").await;
        let (bob, bob_ctx) = fx.user("Bob").await;
        let (_, cy_ctx) = fx.user("Cy").await;
        let group = fx
            .state
            .groups
            .create_group(&ada_ctx, "team", None, &[bob.id.clone()])
            .await
            .unwrap();
        let to_group = Recipient::Group(group.id.clone());
        let messages = &fx.state.messages;

        for text in ["one", "two", "three"] {
            messages.send_text(&bob_ctx, to_group.clone(), text).await.unwrap();
        }
        let err = messages.send_text(&cy_ctx, to_group.clone(), "let me in").await.unwrap_err();
        assert_eq!(err.kind(), "forbidden");
        let err = messages
            .send_text(&ada_ctx, Recipient::Group("grp_missing".into()), "x")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");

        let history = messages.group_history(&ada_ctx, &group.id, Some(2)).await.unwrap();
        let texts: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(texts, vec!["two", "three"]);
        assert_eq!(
            messages.group_history(&cy_ctx, &group.id, None).await.unwrap_err().kind(),
            "forbidden"
        );
    }

    #[tokio::test]
    async fn test_unread_read_and_inbox() {
        let fx = Fixture::new().await;
        let ((ada, ada_ctx), (bob, bob_ctx)) = fx.pair().await;
        let messages = &fx.state.messages;
        let group = fx
            .state
            .groups
            .create_group(&ada_ctx, "team", None, &[bob.id.clone()])
            .await
            .unwrap();

        for text in ["a", "b"] {
            messages
                .send_text(&ada_ctx, Recipient::User(bob.id.clone()), text)
                .await
                .unwrap();
        }
        messages
            .send_text(&ada_ctx, Recipient::Group(group.id.clone()), "to all")
            .await
            .unwrap();

        let counts = messages.unread_counts(&bob_ctx).await.unwrap();
        assert_eq!(counts.get(&ada.id), Some(&2));

        let inbox = messages.recent_conversations(&bob_ctx).await.unwrap();
        assert_eq!(inbox.len(), 2);
        let direct = inbox
            .iter()
            .find(|s| s.with == Recipient::User(ada.id.clone()))
            .unwrap();
        assert_eq!(direct.unread, 2);
        assert_eq!(direct.last_message.content, "b");

        assert_eq!(messages.mark_read(&bob_ctx, &ada.id).await.unwrap(), 2);
        assert!(messages.unread_counts(&bob_ctx).await.unwrap().is_empty());
        assert_eq!(messages.mark_read(&bob_ctx, &ada.id).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_files_search_and_delete() {
        let fx = Fixture::new().await;
        let ((ada, ada_ctx), (bob, bob_ctx)) = fx.pair().await;
        let (_, cy_ctx) = fx.user("Cy").await;
        let messages = &fx.state.messages;

        let image = messages
            .send_file(
                &ada_ctx,
                Recipient::User(bob.id.clone()),
                &Upload::new("holiday.jpg", &b"jpeg bytes"[..]),
                Some("Beach day"),
            )
            .await
            .unwrap();
        assert_eq!(image.message_type, MessageType::Image);
        let doc = messages
            .send_file(
                &bob_ctx,
                Recipient::User(ada.id.clone()),
                &Upload::new("report.pdf", &b"%PDF"[..]),
                None,
            )
            .await
            .unwrap();
        assert_eq!(doc.message_type, MessageType::File);
        assert_eq!(doc.content, "");

        let (attachment, bytes) = messages.download(&bob_ctx, &image.id).await.unwrap();
        assert_eq!(attachment.name, "holiday.jpg");
        assert_eq!(&bytes[..], b"jpeg bytes");
        assert_eq!(
            messages.download(&cy_ctx, &image.id).await.unwrap_err().kind(),
            "forbidden"
        );

        assert_eq!(messages.search(&bob_ctx, "BEACH").await.unwrap().len(), 1);
        assert_eq!(messages.search(&ada_ctx, "report").await.unwrap().len(), 1);
        assert!(messages.search(&cy_ctx, "beach").await.unwrap().is_empty());
        assert_eq!(messages.search(&ada_ctx, " ").await.unwrap_err().kind(), "validation");

        let err = messages.delete_message(&bob_ctx, &image.id).await.unwrap_err();
        assert_eq!(err.kind(), "forbidden");
        let stored = fx
            .state
            .files
            .uploads_dir()
            .join(&image.attachment.as_ref().unwrap().stored_name);
        messages.delete_message(&ada_ctx, &image.id).await.unwrap();
        assert!(!stored.exists());
        assert_eq!(
            messages.delete_message(&ada_ctx, &image.id).await.unwrap_err().kind(),
            "not_found"
        );
    }

    #[tokio::test]
    async fn test_rejected_file_message_stores_nothing() {
        let fx = Fixture::new().await;
        let ((_, ada_ctx), _) = fx.pair().await;
        let (cy, _) = fx.user("Cy").await;

        let err = fx
            .state
            .messages
            .send_file(
                &ada_ctx,
                Recipient::User(cy.id.clone()),
                &Upload::new("cat.png", &b"meow"[..]),
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "forbidden");
        let stored = std::fs::read_dir(fx.state.files.uploads_dir()).unwrap().count();
        assert_eq!(stored, 0);
    }
}
