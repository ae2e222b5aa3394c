use crate::error::{Result, StoreError};
use crate::models::{Contact, Group, Message, User};
use crate::xml_manager::XmlManager;
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// What a cascade delete of a user removed or changed.
#[derive(Debug, Clone, Serialize)]
pub struct UserDeletion {
    pub user: User,
    pub contacts_removed: usize,
    /// Removed messages, so stored attachments can be cleaned up.
    pub messages_removed: Vec<Message>,
    pub groups_left: Vec<String>,
    pub groups_dissolved: Vec<String>,
    /// `(group_id, user_id)` of members promoted to admin.
    pub admins_promoted: Vec<(String, String)>,
}

#[derive(Clone)]
pub struct UserRepository {
    xml: Arc<XmlManager>,
}

fn email_taken(users: &[User], email: &str, except_id: Option<&str>) -> bool {
    users
        .iter()
        .any(|u| u.email.eq_ignore_ascii_case(email) && Some(u.id.as_str()) != except_id)
}

impl UserRepository {
    pub fn new(xml: Arc<XmlManager>) -> Self {
        Self { xml }
    }

    /// Insert a user; the email must not be registered yet.
    pub async fn create(&self, user: &User) -> Result<()> {
        self.xml
            .write(|doc| {
                if email_taken(&doc.all::<User>()?, &user.email, None) {
                    return Err(StoreError::Duplicate {
                        kind: "email",
                        id: user.email.clone(),
                    });
                }
                doc.insert(user)
            })
            .await?;
        info!("[Users] Created user {} <{}>", user.id, user.email);
        Ok(())
    }

    pub async fn find_by_id(&self, id: &str) -> Result<Option<User>> {
        self.xml.read(|doc| doc.get(id)).await
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        let email = email.trim();
        self.xml
            .read(|doc| doc.find_one(|u: &User| u.email.eq_ignore_ascii_case(email)))
            .await
    }

    pub async fn find_all(&self) -> Result<Vec<User>> {
        self.xml.read(|doc| doc.all()).await
    }

    pub async fn find_where<P>(&self, predicate: P) -> Result<Vec<User>>
    where
        P: Fn(&User) -> bool,
    {
        self.xml.read(|doc| doc.find(predicate)).await
    }

    /// Case-insensitive substring match on name or email.
    pub async fn search(&self, query: &str) -> Result<Vec<User>> {
        let needle = query.trim().to_lowercase();
        self.find_where(|u| {
            u.name.to_lowercase().contains(&needle) || u.email.to_lowercase().contains(&needle)
        })
        .await
    }

    /// Replace a user record; the email must stay unique.
    pub async fn update(&self, user: &User) -> Result<()> {
        self.xml
            .write(|doc| {
                if email_taken(&doc.all::<User>()?, &user.email, Some(&user.id)) {
                    return Err(StoreError::Duplicate {
                        kind: "email",
                        id: user.email.clone(),
                    });
                }
                doc.update(user)
            })
            .await
    }

    /// Remove a user and everything that points at them.
    ///
    /// Contacts in both directions and the user's direct and group messages
    /// go away. The user leaves every group; a group that loses its last
    /// admin promotes its longest-standing member, and a group left empty is
    /// dissolved together with its messages.
    pub async fn delete_cascade(&self, user_id: &str) -> Result<UserDeletion> {
        let deletion = self
            .xml
            .write(|doc| {
                let user = doc
                    .remove::<User>(user_id)?
                    .ok_or_else(|| StoreError::not_found("user", user_id))?;

                let contacts_removed = doc.remove_where(|c: &Contact| c.involves(user_id))?.len();
                let mut messages_removed =
                    doc.remove_where(|m: &Message| m.involves_user(user_id))?;

                let mut groups_left = Vec::new();
                let mut groups_dissolved = Vec::new();
                let mut admins_promoted = Vec::new();

                for mut group in doc.find(|g: &Group| g.is_member(user_id))? {
                    group.remove_member(user_id);
                    if group.members.is_empty() {
                        doc.remove::<Group>(&group.id)?;
                        let group_id = group.id.as_str();
                        messages_removed
                            .extend(doc.remove_where(|m: &Message| m.to_group() == Some(group_id))?);
                        groups_dissolved.push(group.id);
                    } else {
                        if let Some(promoted) = group.ensure_admin() {
                            admins_promoted.push((group.id.clone(), promoted));
                        }
                        doc.update(&group)?;
                        groups_left.push(group.id);
                    }
                }

                Ok::<_, StoreError>(UserDeletion {
                    user,
                    contacts_removed,
                    messages_removed,
                    groups_left,
                    groups_dissolved,
                    admins_promoted,
                })
            })
            .await?;

        info!(
            "[Users] Deleted user {}: {} contacts, {} messages, left {} groups, dissolved {}",
            user_id,
            deletion.contacts_removed,
            deletion.messages_removed.len(),
            deletion.groups_left.len(),
            deletion.groups_dissolved.len()
        );
        Ok(deletion)
    }
}
