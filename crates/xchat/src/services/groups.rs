//! Groups and membership administration.

use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};
use xchat_store::{Group, GroupRepository, GroupRole, GroupState, UserRepository};

use super::{actor, discard_attachments, required_text, FileUploadService};
use crate::ctx::Ctx;
use crate::error::{Error, Result};

const MAX_NAME_LEN: usize = 100;
const MAX_DESCRIPTION_LEN: usize = 500;

/// Changes an admin may make to a group. An empty description clears it.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GroupUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
}

pub struct GroupService {
    users: UserRepository,
    groups: GroupRepository,
    files: Arc<FileUploadService>,
}

fn description(raw: Option<&str>) -> Result<Option<String>> {
    let Some(raw) = raw.map(str::trim).filter(|d| !d.is_empty()) else {
        return Ok(None);
    };
    if raw.chars().count() > MAX_DESCRIPTION_LEN {
        return Err(Error::Validation(format!(
            "description must be at most {} characters",
            MAX_DESCRIPTION_LEN
        )));
    }
    Ok(Some(raw.to_string()))
}

fn require_admin(group: &Group, ctx: &Ctx) -> Result<()> {
    if group.is_admin(ctx.user_id()) {
        Ok(())
    } else {
        warn!(
            "[Groups] {} is not an admin of {}",
            ctx.user_id(),
            group.id
        );
        Err(Error::Forbidden(format!(
            "only admins can manage group '{}'",
            group.name
        )))
    }
}

fn require_member(group: &Group, ctx: &Ctx) -> Result<()> {
    if group.is_member(ctx.user_id()) {
        Ok(())
    } else {
        Err(Error::Forbidden(format!(
            "not a member of group '{}'",
            group.name
        )))
    }
}

impl GroupService {
    pub fn new(users: UserRepository, groups: GroupRepository, files: Arc<FileUploadService>) -> Self {
        Self {
            users,
            groups,
            files,
        }
    }

    /// Create a group with the actor as admin and `members` as members.
    pub async fn create_group(
        &self,
        ctx: &Ctx,
        name: &str,
        description_text: Option<&str>,
        members: &[String],
    ) -> Result<Group> {
        actor(&self.users, ctx).await?;
        let name = required_text("group name", name, MAX_NAME_LEN)?;
        let mut group = Group::new(name, description(description_text)?, ctx.user_id());
        for member in members {
            group.add_member(member.as_str(), GroupRole::Member);
        }

        self.groups.create(&group).await?;
        info!(
            "[Groups] {} created {} '{}'",
            ctx.user_id(),
            group.id,
            group.name
        );
        Ok(group)
    }

    /// A group the actor belongs to.
    pub async fn get_group(&self, ctx: &Ctx, group_id: &str) -> Result<Group> {
        actor(&self.users, ctx).await?;
        let group = self.find(group_id).await?;
        require_member(&group, ctx)?;
        Ok(group)
    }

    /// Groups the actor belongs to.
    pub async fn list_groups(&self, ctx: &Ctx) -> Result<Vec<Group>> {
        actor(&self.users, ctx).await?;
        Ok(self.groups.find_by_member(ctx.user_id()).await?)
    }

    pub async fn update_group(&self, ctx: &Ctx, group_id: &str, update: GroupUpdate) -> Result<Group> {
        actor(&self.users, ctx).await?;
        let name = update
            .name
            .as_deref()
            .map(|n| required_text("group name", n, MAX_NAME_LEN))
            .transpose()?;
        let new_description = update
            .description
            .as_deref()
            .map(|d| description(Some(d)))
            .transpose()?;

        let group = self
            .active(self.groups.modify(group_id, |group| {
                require_admin(group, ctx)?;
                if let Some(name) = name {
                    group.name = name;
                }
                if let Some(description) = new_description {
                    group.description = description;
                }
                Ok::<_, Error>(())
            }))
            .await?;
        info!("[Groups] {} updated {}", ctx.user_id(), group_id);
        Ok(group)
    }

    /// Add a registered user as a plain member.
    pub async fn add_member(&self, ctx: &Ctx, group_id: &str, user_id: &str) -> Result<Group> {
        actor(&self.users, ctx).await?;
        let group = self
            .active(self.groups.modify(group_id, |group| {
                require_admin(group, ctx)?;
                if !group.add_member(user_id, GroupRole::Member) {
                    return Err(Error::Conflict(format!(
                        "{} is already a member of '{}'",
                        user_id, group.name
                    )));
                }
                Ok(())
            }))
            .await?;
        info!("[Groups] {} added {} to {}", ctx.user_id(), user_id, group_id);
        Ok(group)
    }

    /// Remove a member. Admins may remove anyone; members may remove
    /// themselves. If the last admin goes, the longest-standing member is
    /// promoted; if nobody is left, the group is dissolved.
    pub async fn remove_member(&self, ctx: &Ctx, group_id: &str, user_id: &str) -> Result<GroupState> {
        actor(&self.users, ctx).await?;
        let (promoted, state) = self
            .groups
            .modify(group_id, |group| {
                if !ctx.is(user_id) {
                    require_admin(group, ctx)?;
                }
                if group.remove_member(user_id).is_none() {
                    return Err(Error::not_found("member", user_id));
                }
                Ok(group.ensure_admin())
            })
            .await?;

        if let Some(promoted) = promoted {
            info!("[Groups] Promoted {} to admin of {}", promoted, group_id);
        }
        match &state {
            GroupState::Dissolved(messages) => discard_attachments(&self.files, messages).await,
            GroupState::Active(_) => {
                info!("[Groups] {} removed {} from {}", ctx.user_id(), user_id, group_id)
            }
        }
        Ok(state)
    }

    /// Change a member's role. The last admin cannot be demoted.
    pub async fn set_role(
        &self,
        ctx: &Ctx,
        group_id: &str,
        user_id: &str,
        role: GroupRole,
    ) -> Result<Group> {
        actor(&self.users, ctx).await?;
        let group = self
            .active(self.groups.modify(group_id, |group| {
                require_admin(group, ctx)?;
                let current = group
                    .role_of(user_id)
                    .ok_or_else(|| Error::not_found("member", user_id))?;
                if current == GroupRole::Admin && role == GroupRole::Member && group.admin_count() == 1
                {
                    return Err(Error::Conflict(format!(
                        "'{}' needs at least one admin",
                        group.name
                    )));
                }
                group.set_role(user_id, role);
                Ok(())
            }))
            .await?;
        info!("[Groups] {} is now {} of {}", user_id, role, group_id);
        Ok(group)
    }

    pub async fn leave_group(&self, ctx: &Ctx, group_id: &str) -> Result<GroupState> {
        self.remove_member(ctx, group_id, ctx.user_id()).await
    }

    /// Delete a group with its messages and their stored files.
    pub async fn delete_group(&self, ctx: &Ctx, group_id: &str) -> Result<Group> {
        actor(&self.users, ctx).await?;
        let (group, messages) = self
            .groups
            .delete_cascade_if(group_id, |group| require_admin(group, ctx))
            .await?;
        discard_attachments(&self.files, &messages).await;
        info!("[Groups] {} deleted {}", ctx.user_id(), group_id);
        Ok(group)
    }

    async fn find(&self, group_id: &str) -> Result<Group> {
        self.groups
            .find_by_id(group_id)
            .await?
            .ok_or_else(|| Error::not_found("group", group_id))
    }

    /// Await a modification that cannot empty the group.
    async fn active<F>(&self, modification: F) -> Result<Group>
    where
        F: std::future::Future<Output = Result<((), GroupState)>>,
    {
        match modification.await? {
            (_, GroupState::Active(group)) => Ok(group),
            (_, GroupState::Dissolved(_)) => Err(Error::Conflict("group was dissolved".into())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::testing::Fixture;

    #[tokio::test]
    async fn test_create_and_visibility() {
        let fx = Fixture::new().await;
        let (ada, ada_ctx) = fx.user("Ada").await;
        let (bob, bob_ctx) = fx.user("Bob").await;
        let (_, cy_ctx) = fx.user("Cy").await;
        let groups = &fx.state.groups;

        let group = groups
            .create_group(&ada_ctx, " Team ", Some("  "), &[bob.id.clone(), ada.id.clone()])
            .await
            .unwrap();
        assert_eq!(group.name, "Team");
        assert_eq!(group.description, None);
        assert_eq!(group.members.len(), 2);
        assert_eq!(group.role_of(&ada.id), Some(GroupRole::Admin));
        assert_eq!(group.role_of(&bob.id), Some(GroupRole::Member));

        assert_eq!(groups.get_group(&bob_ctx, &group.id).await.unwrap(), group);
        assert_eq!(
            groups.get_group(&cy_ctx, &group.id).await.unwrap_err().kind(),
            "forbidden"
        );
        assert_eq!(groups.list_groups(&bob_ctx).await.unwrap().len(), 1);
        assert!(groups.list_groups(&cy_ctx).await.unwrap().is_empty());

        let err = groups
            .create_group(&ada_ctx, "ghosts", None, &["usr_missing".to_string()])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "not_found");
    }

    #[tokio::test]
    async fn test_admin_only_operations() {
        let fx = Fixture::new().await;
        let (_, ada_ctx) = fx.user("Ada").await;
        let (bob, bob_ctx) = fx.user("Bob").await;
        let (cy, _) = fx.user("Cy").await;
        let groups = &fx.state.groups;
        let group = groups.create_group(&ada_ctx, "team", None, &[]).await.unwrap();

        let err = groups.add_member(&bob_ctx, &group.id, &bob.id).await.unwrap_err();
        assert_eq!(err.kind(), "forbidden");

        groups.add_member(&ada_ctx, &group.id, &bob.id).await.unwrap();
        let err = groups.add_member(&ada_ctx, &group.id, &bob.id).await.unwrap_err();
        assert_eq!(err.kind(), "conflict");

        let update = GroupUpdate {
            name: Some("renamed".into()),
            description: Some("about us".into()),
        };
        assert_eq!(
            groups
                .update_group(&bob_ctx, &group.id, update.clone())
                .await
                .unwrap_err()
                .kind(),
            "forbidden"
        );
        let updated = groups.update_group(&ada_ctx, &group.id, update).await.unwrap();
        assert_eq!(updated.name, "renamed");
        assert_eq!(updated.description.as_deref(), Some("about us"));

        let err = groups.remove_member(&bob_ctx, &group.id, &cy.id).await.unwrap_err();
        assert_eq!(err.kind(), "forbidden");
        assert_eq!(
            groups.delete_group(&bob_ctx, &group.id).await.unwrap_err().kind(),
            "forbidden"
        );
    }

    #[tokio::test]
    async fn test_unknown_actor_is_not_found() {
        let fx = Fixture::new().await;
        let (_, ada_ctx) = fx.user("Ada").await;
        let (bob, _) = fx.user("Bob").await;
        let groups = &fx.state.groups;
        let group = groups
            .create_group(&ada_ctx, "team", None, &[bob.id.clone()])
            .await
            .unwrap();
        let ghost = Ctx::new("usr_ghost");

        let kinds = [
            groups.get_group(&ghost, &group.id).await.unwrap_err().kind(),
            groups
                .update_group(&ghost, &group.id, GroupUpdate::default())
                .await
                .unwrap_err()
                .kind(),
            groups.add_member(&ghost, &group.id, &bob.id).await.unwrap_err().kind(),
            groups.remove_member(&ghost, &group.id, &bob.id).await.unwrap_err().kind(),
            groups
                .set_role(&ghost, &group.id, &bob.id, GroupRole::Admin)
                .await
                .unwrap_err()
                .kind(),
            groups.delete_group(&ghost, &group.id).await.unwrap_err().kind(),
        ];
        assert!(kinds.iter().all(|kind| *kind == "not_found"), "{:?}", kinds);
        assert_eq!(groups.get_group(&ada_ctx, &group.id).await.unwrap().members.len(), 2);
    }

    #[tokio::test]
    async fn test_roles_and_last_admin() {
        let fx = Fixture::new().await;
        let (ada, ada_ctx) = fx.user("Ada").await;
        let (bob, bob_ctx) = fx.user("Bob").await;
        let groups = &fx.state.groups;
        let group = groups
            .create_group(&ada_ctx, "team", None, &[bob.id.clone()])
            .await
            .unwrap();

        let err = groups
            .set_role(&ada_ctx, &group.id, &ada.id, GroupRole::Member)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "conflict");

        let promoted = groups
            .set_role(&ada_ctx, &group.id, &bob.id, GroupRole::Admin)
            .await
            .unwrap();
        assert_eq!(promoted.admin_count(), 2);
        let demoted = groups
            .set_role(&bob_ctx, &group.id, &ada.id, GroupRole::Member)
            .await
            .unwrap();
        assert!(!demoted.is_admin(&ada.id));
    }

    #[tokio::test]
    async fn test_leaving_promotes_then_dissolves() {
        let fx = Fixture::new().await;
        let (_, ada_ctx) = fx.user("Ada").await;
        let (bob, bob_ctx) = fx.user("Bob").await;
        let groups = &fx.state.groups;
        let group = groups
            .create_group(&ada_ctx, "team", None, &[bob.id.clone()])
            .await
            .unwrap();

        match groups.leave_group(&ada_ctx, &group.id).await.unwrap() {
            GroupState::Active(g) => assert!(g.is_admin(&bob.id)),
            other => panic!("unexpected {:?}", other),
        }
        assert_eq!(
            groups.leave_group(&ada_ctx, &group.id).await.unwrap_err().kind(),
            "not_found"
        );

        let state = groups.leave_group(&bob_ctx, &group.id).await.unwrap();
        assert!(matches!(state, GroupState::Dissolved(_)));
        assert_eq!(
            groups.get_group(&bob_ctx, &group.id).await.unwrap_err().kind(),
            "not_found"
        );
    }

    #[tokio::test]
    async fn test_delete_group_cascades() {
        let fx = Fixture::new().await;
        let (_, ada_ctx) = fx.user("Ada").await;
        let groups = &fx.state.groups;
        let group = groups.create_group(&ada_ctx, "team", None, &[]).await.unwrap();

        let msg = fx
            .state
            .messages
            .send_file(
                &ada_ctx,
                xchat_store::Recipient::Group(group.id.clone()),
                &crate::services::Upload::new("notes.txt", &b"hello"[..]),
                Some("minutes"),
            )
            .await
            .unwrap();
        let stored = fx
            .state
            .files
            .uploads_dir()
            .join(&msg.attachment.unwrap().stored_name);
        assert!(stored.exists());

        groups.delete_group(&ada_ctx, &group.id).await.unwrap();
        assert!(!stored.exists());
        assert_eq!(fx.state.xml.stats().await.unwrap().messages, 0);
    }
}
