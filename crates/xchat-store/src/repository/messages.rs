use super::{require, sort_chronologically};
use crate::error::{Result, StoreError};
use crate::models::{Entity, Group, Message, MessageStatus, Recipient, User};
use crate::xml_manager::XmlManager;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Clone)]
pub struct MessageRepository {
    xml: Arc<XmlManager>,
}

impl MessageRepository {
    pub fn new(xml: Arc<XmlManager>) -> Self {
        Self { xml }
    }

    /// Append a message. Sender and recipient must exist.
    pub async fn create(&self, message: &Message) -> Result<()> {
        self.xml
            .write(|doc| {
                require::<User>(doc, &message.from_user)?;
                match &message.recipient {
                    Recipient::User(id) => require::<User>(doc, id)?,
                    Recipient::Group(id) => require::<Group>(doc, id)?,
                }
                doc.insert(message)
            })
            .await?;
        debug!(
            "[Messages] Stored {} from {} to {}",
            message.id,
            message.from_user,
            message.recipient.id()
        );
        Ok(())
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<Message>> {
        self.xml.read(|doc| doc.get(id)).await
    }

    /// Messages matching a predicate, oldest first.
    pub async fn find_where<P>(&self, predicate: P) -> Result<Vec<Message>>
    where
        P: Fn(&Message) -> bool,
    {
        let mut messages = self.xml.read(|doc| doc.find(predicate)).await?;
        sort_chronologically(&mut messages);
        Ok(messages)
    }

    /// Direct messages exchanged between two users, oldest first.
    pub async fn conversation(&self, a: &str, b: &str) -> Result<Vec<Message>> {
        self.find_where(|m| m.is_between(a, b)).await
    }

    /// Messages sent to a group, oldest first.
    pub async fn for_group(&self, group_id: &str) -> Result<Vec<Message>> {
        self.find_where(|m| m.to_group() == Some(group_id)).await
    }

    /// Move direct messages from `from_user` to `to_user` up to `status`.
    ///
    /// Status never moves backwards; returns how many messages changed.
    pub async fn advance_status(
        &self,
        from_user: &str,
        to_user: &str,
        status: MessageStatus,
    ) -> Result<usize> {
        let changed = self
            .advance_where(status, |m| {
                m.from_user == from_user && m.to_user() == Some(to_user)
            })
            .await?;
        if changed > 0 {
            info!(
                "[Messages] {} messages from {} to {} marked {}",
                changed, from_user, to_user, status
            );
        }
        Ok(changed)
    }

    /// Mark every `sent` direct message addressed to the user as delivered.
    pub async fn mark_delivered_to(&self, user_id: &str) -> Result<usize> {
        let changed = self
            .advance_where(MessageStatus::Delivered, |m| m.to_user() == Some(user_id))
            .await?;
        if changed > 0 {
            info!("[Messages] Delivered {} pending messages to {}", changed, user_id);
        }
        Ok(changed)
    }

    async fn advance_where<P>(&self, status: MessageStatus, predicate: P) -> Result<usize>
    where
        P: Fn(&Message) -> bool,
    {
        self.xml
            .write(|doc| {
                let pending = doc.find(|m: &Message| m.status < status && predicate(m))?;
                for mut message in pending.iter().cloned() {
                    message.status = status;
                    doc.update(&message)?;
                }
                Ok(pending.len())
            })
            .await
    }

    pub async fn update(&self, message: &Message) -> Result<()> {
        self.xml.write(|doc| doc.update(message)).await
    }

    /// Remove a message and return it.
    pub async fn delete(&self, id: &str) -> Result<Message> {
        let message = self
            .xml
            .write(|doc| {
                doc.remove::<Message>(id)?
                    .ok_or_else(|| StoreError::not_found(Message::KIND, id))
            })
            .await?;
        info!("[Messages] Deleted {}", id);
        Ok(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::MessageType;
    use crate::repository::{GroupRepository, UserRepository};
    use crate::schema::Schema;
    use chrono::Duration;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        messages: MessageRepository,
        ada: User,
        bob: User,
        cy: User,
        group: Group,
    }

    async fn setup() -> Fixture {
        let dir = TempDir::new().unwrap();
        let xml = Arc::new(
            XmlManager::open(dir.path().join("chat.xml"), Schema::builtin().unwrap())
                .await
                .unwrap(),
        );
        let users = UserRepository::new(xml.clone());
        let ada = User::new("Ada", "ada@example.com");
        let bob = User::new("Bob", "bob@example.com");
        let cy = User::new("Cy", "cy@example.com");
        for user in [&ada, &bob, &cy] {
            users.create(user).await.unwrap();
        }
        let group = Group::new("team", None, &ada.id);
        GroupRepository::new(xml.clone()).create(&group).await.unwrap();
        Fixture {
            _dir: dir,
            messages: MessageRepository::new(xml),
            ada,
            bob,
            cy,
            group,
        }
    }

    fn direct(from: &User, to: &User, text: &str) -> Message {
        Message::text(&from.id, Recipient::User(to.id.clone()), text)
    }

    #[tokio::test]
    async fn test_create_requires_known_parties() {
        let fx = setup().await;
        let msg = direct(&fx.ada, &fx.bob, "hello");
        fx.messages.create(&msg).await.unwrap();
        assert_eq!(fx.messages.find_by_id(&msg.id).await.unwrap(), Some(msg));

        let ghost_group = Message::text(&fx.ada.id, Recipient::Group("grp_missing".into()), "x");
        assert!(matches!(
            fx.messages.create(&ghost_group).await,
            Err(StoreError::NotFound { kind: "group", .. })
        ));
        let ghost_sender = Message::text("usr_missing", Recipient::User(fx.ada.id.clone()), "x");
        assert!(matches!(
            fx.messages.create(&ghost_sender).await,
            Err(StoreError::NotFound { kind: "user", .. })
        ));
    }

    #[tokio::test]
    async fn test_conversation_is_chronological() {
        let fx = setup().await;
        let mut late = direct(&fx.bob, &fx.ada, "second");
        late.timestamp = late.timestamp + Duration::seconds(5);
        let early = direct(&fx.ada, &fx.bob, "first");

        fx.messages.create(&late).await.unwrap();
        fx.messages.create(&early).await.unwrap();
        fx.messages.create(&direct(&fx.ada, &fx.cy, "other")).await.unwrap();
        let in_group = Message::text(&fx.ada.id, Recipient::Group(fx.group.id.clone()), "g");
        fx.messages.create(&in_group).await.unwrap();

        let convo = fx.messages.conversation(&fx.bob.id, &fx.ada.id).await.unwrap();
        let texts: Vec<&str> = convo.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(texts, vec!["first", "second"]);
        assert_eq!(fx.messages.for_group(&fx.group.id).await.unwrap(), vec![in_group]);
    }

    #[tokio::test]
    async fn test_status_only_moves_forward() {
        let fx = setup().await;
        for text in ["a", "b"] {
            fx.messages.create(&direct(&fx.ada, &fx.bob, text)).await.unwrap();
        }
        fx.messages.create(&direct(&fx.bob, &fx.ada, "reply")).await.unwrap();

        assert_eq!(fx.messages.mark_delivered_to(&fx.bob.id).await.unwrap(), 2);
        assert_eq!(fx.messages.mark_delivered_to(&fx.bob.id).await.unwrap(), 0);

        let read = fx
            .messages
            .advance_status(&fx.ada.id, &fx.bob.id, MessageStatus::Read)
            .await
            .unwrap();
        assert_eq!(read, 2);
        let back = fx
            .messages
            .advance_status(&fx.ada.id, &fx.bob.id, MessageStatus::Delivered)
            .await
            .unwrap();
        assert_eq!(back, 0);

        let convo = fx.messages.conversation(&fx.ada.id, &fx.bob.id).await.unwrap();
        let statuses: Vec<MessageStatus> = convo.iter().map(|m| m.status).collect();
        assert_eq!(
            statuses,
            vec![MessageStatus::Read, MessageStatus::Read, MessageStatus::Sent]
        );
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let fx = setup().await;
        let mut msg = direct(&fx.ada, &fx.bob, "typo");
        fx.messages.create(&msg).await.unwrap();

        msg.content = "fixed".into();
        fx.messages.update(&msg).await.unwrap();
        let stored = fx.messages.find_by_id(&msg.id).await.unwrap().unwrap();
        assert_eq!(stored.content, "fixed");
        assert_eq!(stored.message_type, MessageType::Text);

        assert_eq!(fx.messages.delete(&msg.id).await.unwrap(), msg);
        assert!(matches!(
            fx.messages.delete(&msg.id).await,
            Err(StoreError::NotFound { kind: "message", .. })
        ));
    }
}
