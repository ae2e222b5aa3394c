//! Users, their settings and their contact lists.

use serde::Deserialize;
use std::sync::Arc;
use tracing::info;
use xchat_store::models::now;
use xchat_store::{
    Contact, ContactRepository, MessageRepository, Settings, User, UserDeletion, UserRepository,
    UserStatus,
};

use super::{actor, discard_attachments, normalize_email, required_text, FileUploadService};
use crate::ctx::Ctx;
use crate::error::{Error, Result};

const MAX_NAME_LEN: usize = 100;
const MAX_SETTING_KEY_LEN: usize = 64;
const MAX_SETTING_VALUE_LEN: usize = 256;

/// Fields a user may change on their own profile.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
}

/// Settings every new account starts with.
pub fn default_settings() -> Settings {
    [("theme", "light"), ("notifications", "on"), ("language", "en")]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

pub struct UserService {
    users: UserRepository,
    contacts: ContactRepository,
    messages: MessageRepository,
    files: Arc<FileUploadService>,
}

impl UserService {
    pub fn new(
        users: UserRepository,
        contacts: ContactRepository,
        messages: MessageRepository,
        files: Arc<FileUploadService>,
    ) -> Self {
        Self {
            users,
            contacts,
            messages,
            files,
        }
    }

    /// Create an account with default settings, initially offline.
    pub async fn register(&self, name: &str, email: &str) -> Result<User> {
        let name = required_text("name", name, MAX_NAME_LEN)?;
        let email = normalize_email(email)?;

        let user = User::new(name, &email).with_settings(default_settings());
        self.users.create(&user).await?;
        info!("[Users] Registered {} <{}>", user.id, user.email);
        Ok(user)
    }

    pub async fn get(&self, user_id: &str) -> Result<User> {
        self.users
            .find_by_id(user_id)
            .await?
            .ok_or_else(|| Error::not_found("user", user_id))
    }

    pub async fn find_by_email(&self, email: &str) -> Result<Option<User>> {
        Ok(self.users.find_by_email(email).await?)
    }

    pub async fn list(&self) -> Result<Vec<User>> {
        Ok(self.users.find_all().await?)
    }

    /// Users matching `query` by name or email, never the actor.
    pub async fn search(&self, ctx: &Ctx, query: &str) -> Result<Vec<User>> {
        actor(&self.users, ctx).await?;
        let mut found = self.users.search(query).await?;
        found.retain(|u| !ctx.is(&u.id));
        Ok(found)
    }

    pub async fn update_profile(&self, ctx: &Ctx, update: ProfileUpdate) -> Result<User> {
        let mut user = actor(&self.users, ctx).await?;
        if let Some(name) = update.name {
            user.name = required_text("name", &name, MAX_NAME_LEN)?;
        }
        if let Some(email) = update.email {
            user.email = normalize_email(&email)?;
        }
        self.users.update(&user).await?;
        info!("[Users] Updated profile of {}", user.id);
        Ok(user)
    }

    /// Change presence. Going offline stamps `last_seen`; coming online
    /// marks messages waiting for the user as delivered.
    pub async fn set_status(&self, ctx: &Ctx, status: UserStatus) -> Result<User> {
        let mut user = actor(&self.users, ctx).await?;
        user.status = status;
        if status == UserStatus::Offline {
            user.last_seen = Some(now());
        }
        self.users.update(&user).await?;

        if status == UserStatus::Online {
            self.messages.mark_delivered_to(&user.id).await?;
        }
        info!("[Users] {} is now {}", user.id, status);
        Ok(user)
    }

    pub async fn settings(&self, ctx: &Ctx) -> Result<Settings> {
        Ok(actor(&self.users, ctx).await?.settings)
    }

    /// Merge `changes` into the actor's settings and return the result.
    pub async fn update_settings(&self, ctx: &Ctx, changes: Settings) -> Result<Settings> {
        let mut user = actor(&self.users, ctx).await?;
        for (key, value) in changes {
            let key = required_text("setting key", &key, MAX_SETTING_KEY_LEN)?;
            if value.chars().count() > MAX_SETTING_VALUE_LEN {
                return Err(Error::Validation(format!(
                    "setting '{}' must be at most {} characters",
                    key, MAX_SETTING_VALUE_LEN
                )));
            }
            user.settings.insert(key, value);
        }
        self.users.update(&user).await?;
        Ok(user.settings)
    }

    /// Delete the actor's account and everything hanging off it.
    pub async fn delete_account(&self, ctx: &Ctx) -> Result<UserDeletion> {
        actor(&self.users, ctx).await?;
        let deletion = self.users.delete_cascade(ctx.user_id()).await?;
        discard_attachments(&self.files, &deletion.messages_removed).await;
        Ok(deletion)
    }

    /// Add the user registered under `email` to the actor's contacts.
    ///
    /// The display name defaults to the contact's own name. The other side
    /// gets a reverse entry named after the actor unless it already has one.
    pub async fn add_contact(&self, ctx: &Ctx, email: &str, name: Option<&str>) -> Result<Contact> {
        let me = actor(&self.users, ctx).await?;
        let other = self
            .users
            .find_by_email(email)
            .await?
            .ok_or_else(|| Error::not_found("user", email.trim()))?;
        if other.id == me.id {
            return Err(Error::Validation("cannot add yourself as a contact".into()));
        }

        let display = match name {
            Some(name) => required_text("contact name", name, MAX_NAME_LEN)?,
            None => other.name.clone(),
        };
        let contact = self
            .contacts
            .create_pair(&me.id, &other.id, &display, &me.name)
            .await?;
        info!("[Users] {} added contact {}", me.id, other.id);
        Ok(contact)
    }

    /// Remove a contact relation in both directions.
    pub async fn remove_contact(&self, ctx: &Ctx, contact_user_id: &str) -> Result<()> {
        actor(&self.users, ctx).await?;
        self.contacts
            .delete_pair(ctx.user_id(), contact_user_id)
            .await?;
        info!("[Users] {} removed contact {}", ctx.user_id(), contact_user_id);
        Ok(())
    }

    pub async fn rename_contact(
        &self,
        ctx: &Ctx,
        contact_user_id: &str,
        name: &str,
    ) -> Result<Contact> {
        actor(&self.users, ctx).await?;
        let name = required_text("contact name", name, MAX_NAME_LEN)?;
        let mut contact = self
            .contacts
            .find_between(ctx.user_id(), contact_user_id)
            .await?
            .ok_or_else(|| Error::not_found("contact", contact_user_id))?;
        contact.name = name;
        self.contacts.update(&contact).await?;
        Ok(contact)
    }

    /// The actor's contacts with the users they point at, by display name.
    pub async fn list_contacts(&self, ctx: &Ctx) -> Result<Vec<(Contact, User)>> {
        actor(&self.users, ctx).await?;
        let contacts = self.contacts.find_by_owner(ctx.user_id()).await?;
        let users = self
            .users
            .find_where(|u| contacts.iter().any(|c| c.contact_user_id == u.id))
            .await?;

        let mut joined: Vec<(Contact, User)> = contacts
            .into_iter()
            .filter_map(|c| {
                let user = users.iter().find(|u| u.id == c.contact_user_id)?.clone();
                Some((c, user))
            })
            .collect();
        joined.sort_by_key(|(c, _)| c.name.to_lowercase());
        Ok(joined)
    }

    pub async fn is_contact(&self, ctx: &Ctx, other_id: &str) -> Result<bool> {
        Ok(self
            .contacts
            .find_between(ctx.user_id(), other_id)
            .await?
            .is_some())
    }
}
