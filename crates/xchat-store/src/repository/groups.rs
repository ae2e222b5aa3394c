use super::require;
use crate::error::{Result, StoreError};
use crate::models::{Group, Message, User};
use crate::xml_manager::XmlManager;
use std::sync::Arc;
use tracing::info;

/// Outcome of a group modification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupState {
    /// The group still has members; carries the stored record.
    Active(Group),
    /// The last member left; the group and these messages were removed.
    Dissolved(Vec<Message>),
}

#[derive(Clone)]
pub struct GroupRepository {
    xml: Arc<XmlManager>,
}

impl GroupRepository {
    pub fn new(xml: Arc<XmlManager>) -> Self {
        Self { xml }
    }

    /// Insert a group; every member must be a known user.
    pub async fn create(&self, group: &Group) -> Result<()> {
        self.xml
            .write(|doc| {
                for member in &group.members {
                    require::<User>(doc, &member.user_id)?;
                }
                doc.insert(group)
            })
            .await?;
        info!(
            "[Groups] Created group {} '{}' with {} members",
            group.id,
            group.name,
            group.members.len()
        );
        Ok(())
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<Group>> {
        self.xml.read(|doc| doc.get(id)).await
    }

    /// Groups the user belongs to.
    pub async fn find_by_member(&self, user_id: &str) -> Result<Vec<Group>> {
        self.find_where(|g| g.is_member(user_id)).await
    }

    pub async fn find_where<P>(&self, predicate: P) -> Result<Vec<Group>>
    where
        P: Fn(&Group) -> bool,
    {
        self.xml.read(|doc| doc.find(predicate)).await
    }

    /// Load a group, let `f` change it, and store the result.
    ///
    /// Members added by `f` must be known users. A group left without
    /// members is dissolved: it is removed together with its messages.
    /// Nothing is written if `f` fails.
    pub async fn modify<T, E, F>(&self, id: &str, f: F) -> std::result::Result<(T, GroupState), E>
    where
        F: FnOnce(&mut Group) -> std::result::Result<T, E>,
        E: From<StoreError>,
    {
        let (value, state) = self
            .xml
            .write(|doc| {
                let mut group = doc
                    .get::<Group>(id)?
                    .ok_or_else(|| StoreError::not_found("group", id))?;
                let value = f(&mut group)?;

                let state = if group.members.is_empty() {
                    doc.remove::<Group>(id)?;
                    GroupState::Dissolved(doc.remove_where(|m: &Message| m.to_group() == Some(id))?)
                } else {
                    for member in &group.members {
                        require::<User>(doc, &member.user_id)?;
                    }
                    doc.update(&group)?;
                    GroupState::Active(group)
                };
                Ok::<_, E>((value, state))
            })
            .await?;

        if let GroupState::Dissolved(messages) = &state {
            info!(
                "[Groups] Dissolved empty group {} ({} messages removed)",
                id,
                messages.len()
            );
        }
        Ok((value, state))
    }

    /// Remove a group and every message sent to it.
    pub async fn delete_cascade(&self, id: &str) -> Result<(Group, Vec<Message>)> {
        self.delete_cascade_if(id, |_| Ok::<_, StoreError>(())).await
    }

    /// Like [`delete_cascade`](Self::delete_cascade), but only once `check`
    /// accepts the group as stored at the time of the write.
    pub async fn delete_cascade_if<E, F>(
        &self,
        id: &str,
        check: F,
    ) -> std::result::Result<(Group, Vec<Message>), E>
    where
        F: FnOnce(&Group) -> std::result::Result<(), E>,
        E: From<StoreError>,
    {
        let (group, messages) = self
            .xml
            .write(|doc| {
                let group = doc
                    .get::<Group>(id)?
                    .ok_or_else(|| StoreError::not_found("group", id))?;
                check(&group)?;
                doc.remove::<Group>(id)?;
                let messages = doc.remove_where(|m: &Message| m.to_group() == Some(id))?;
                Ok::<_, E>((group, messages))
            })
            .await?;
        info!(
            "[Groups] Deleted group {} ({} messages removed)",
            id,
            messages.len()
        );
        Ok((group, messages))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{GroupRole, Recipient};
    use crate::repository::{MessageRepository, UserRepository};
    use crate::schema::Schema;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        groups: GroupRepository,
        messages: MessageRepository,
        ada: User,
        bob: User,
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
        users.create(&ada).await.unwrap();
        users.create(&bob).await.unwrap();
        Fixture {
            _dir: dir,
            groups: GroupRepository::new(xml.clone()),
            messages: MessageRepository::new(xml),
            ada,
            bob,
        }
    }

    #[tokio::test]
    async fn test_create_and_find_by_member() {
        let fx = setup().await;
        let group = Group::new("rustaceans", Some("all things rust".into()), &fx.ada.id);
        fx.groups.create(&group).await.unwrap();

        assert_eq!(fx.groups.find_by_id(&group.id).await.unwrap(), Some(group.clone()));
        assert_eq!(fx.groups.find_by_member(&fx.ada.id).await.unwrap().len(), 1);
        assert!(fx.groups.find_by_member(&fx.bob.id).await.unwrap().is_empty());

        let orphan = Group::new("orphan", None, "usr_missing");
        assert!(matches!(
            fx.groups.create(&orphan).await,
            Err(StoreError::NotFound { kind: "user", .. })
        ));
    }

    #[tokio::test]
    async fn test_modify_updates_and_validates_members() {
        let fx = setup().await;
        let group = Group::new("team", None, &fx.ada.id);
        fx.groups.create(&group).await.unwrap();

        let (added, state) = fx
            .groups
            .modify(&group.id, |g| Ok::<_, StoreError>(g.add_member(&fx.bob.id, GroupRole::Member)))
            .await
            .unwrap();
        assert!(added);
        match state {
            GroupState::Active(g) => assert!(g.is_member(&fx.bob.id)),
            other => panic!("unexpected state {:?}", other),
        }

        let err = fx
            .groups
            .modify(&group.id, |g| {
                g.add_member("usr_missing", GroupRole::Member);
                Ok::<_, StoreError>(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound { .. }));

        let err = fx
            .groups
            .modify(&group.id, |_| Err::<(), _>(StoreError::Conflict("no".into())))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        let stored = fx.groups.find_by_id(&group.id).await.unwrap().unwrap();
        assert_eq!(stored.members.len(), 2);
    }

    #[tokio::test]
    async fn test_last_member_leaving_dissolves_group() {
        let fx = setup().await;
        let group = Group::new("solo", None, &fx.ada.id);
        fx.groups.create(&group).await.unwrap();
        let note = Message::text(&fx.ada.id, Recipient::Group(group.id.clone()), "note");
        fx.messages.create(&note).await.unwrap();

        let (_, state) = fx
            .groups
            .modify(&group.id, |g| Ok::<_, StoreError>(g.remove_member(&fx.ada.id)))
            .await
            .unwrap();
        assert_eq!(state, GroupState::Dissolved(vec![note]));
        assert!(fx.groups.find_by_id(&group.id).await.unwrap().is_none());
        assert!(fx.messages.for_group(&group.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_cascade_removes_messages() {
        let fx = setup().await;
        let group = Group::new("doomed", None, &fx.ada.id);
        fx.groups.create(&group).await.unwrap();
        let direct = Message::text(&fx.ada.id, Recipient::User(fx.bob.id.clone()), "dm");
        fx.messages.create(&direct).await.unwrap();
        for text in ["one", "two"] {
            let msg = Message::text(&fx.ada.id, Recipient::Group(group.id.clone()), text);
            fx.messages.create(&msg).await.unwrap();
        }

        let (deleted, removed) = fx.groups.delete_cascade(&group.id).await.unwrap();
        assert_eq!(deleted.id, group.id);
        assert_eq!(removed.len(), 2);
        assert_eq!(fx.messages.find_where(|_| true).await.unwrap(), vec![direct]);

        assert!(matches!(
            fx.groups.delete_cascade(&group.id).await,
            Err(StoreError::NotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_refused_delete_keeps_group() {
        let fx = setup().await;
        let group = Group::new("kept", None, &fx.ada.id);
        fx.groups.create(&group).await.unwrap();
        let msg = Message::text(&fx.ada.id, Recipient::Group(group.id.clone()), "still here");
        fx.messages.create(&msg).await.unwrap();

        let err = fx
            .groups
            .delete_cascade_if(&group.id, |g| {
                if g.is_admin(&fx.bob.id) {
                    Ok(())
                } else {
                    Err(StoreError::Conflict("not an admin".into()))
                }
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        assert_eq!(fx.groups.find_by_id(&group.id).await.unwrap(), Some(group.clone()));
        assert_eq!(fx.messages.for_group(&group.id).await.unwrap(), vec![msg]);
    }
}
