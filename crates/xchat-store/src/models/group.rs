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
pub struct Group {
    pub id: String,
    pub name: String,
    pub description: Option<String>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    /// Members in join order; user ids are unique.
    pub members: Vec<Member>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Member {
    pub user_id: String,
    pub role: GroupRole,
    pub joined_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum GroupRole {
    Admin,
    Member,
}

impl GroupRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupRole::Admin => "admin",
            GroupRole::Member => "member",
        }
    }
}

impl fmt::Display for GroupRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GroupRole {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "admin" => Ok(GroupRole::Admin),
            "member" => Ok(GroupRole::Member),
            other => Err(format!("unknown group role '{}'", other)),
        }
    }
}

impl Group {
    /// A new group whose creator is its first admin.
    pub fn new(
        name: impl Into<String>,
        description: Option<String>,
        created_by: impl Into<String>,
    ) -> Self {
        let created_by = created_by.into();
        let created_at = now();
        Self {
            id: new_id("grp"),
            name: name.into(),
            description: description.filter(|d| !d.is_empty()),
            members: vec![Member {
                user_id: created_by.clone(),
                role: GroupRole::Admin,
                joined_at: created_at,
            }],
            created_by,
            created_at,
        }
    }

    pub fn member(&self, user_id: &str) -> Option<&Member> {
        self.members.iter().find(|m| m.user_id == user_id)
    }

    pub fn role_of(&self, user_id: &str) -> Option<GroupRole> {
        self.member(user_id).map(|m| m.role)
    }

    pub fn is_member(&self, user_id: &str) -> bool {
        self.member(user_id).is_some()
    }

    pub fn is_admin(&self, user_id: &str) -> bool {
        self.role_of(user_id) == Some(GroupRole::Admin)
    }

    pub fn admin_count(&self) -> usize {
        self.members
            .iter()
            .filter(|m| m.role == GroupRole::Admin)
            .count()
    }

    /// Adds a member; returns false if the user already belongs to the group.
    pub fn add_member(&mut self, user_id: impl Into<String>, role: GroupRole) -> bool {
        let user_id = user_id.into();
        if self.is_member(&user_id) {
            return false;
        }
        self.members.push(Member {
            user_id,
            role,
            joined_at: now(),
        });
        true
    }

    /// Removes a member and returns the removed entry.
    pub fn remove_member(&mut self, user_id: &str) -> Option<Member> {
        let idx = self.members.iter().position(|m| m.user_id == user_id)?;
        Some(self.members.remove(idx))
    }

    /// Changes a member's role, returning the previous one.
    pub fn set_role(&mut self, user_id: &str, role: GroupRole) -> Option<GroupRole> {
        let member = self.members.iter_mut().find(|m| m.user_id == user_id)?;
        Some(std::mem::replace(&mut member.role, role))
    }

    /// Promotes the longest-standing member when no admin is left.
    /// Returns the promoted user id.
    pub fn ensure_admin(&mut self) -> Option<String> {
        if self.admin_count() > 0 {
            return None;
        }
        let member = self.members.iter_mut().min_by_key(|m| m.joined_at)?;
        member.role = GroupRole::Admin;
        Some(member.user_id.clone())
    }
}

impl Entity for Group {
    const COLLECTION: &'static str = "groups";
    const ELEMENT: &'static str = "group";
    const KIND: &'static str = "group";

    fn id(&self) -> &str {
        &self.id
    }

    fn to_element(&self) -> Element {
        let mut el = Element::new(Self::ELEMENT)
            .with_attr("id", &self.id)
            .with_attr("created_by", &self.created_by)
            .with_attr("created_at", format_time(&self.created_at))
            .with_child(Element::new("name").with_text(&self.name));

        if let Some(description) = self.description.as_deref().filter(|d| !d.is_empty()) {
            el = el.with_child(Element::new("description").with_text(description));
        }

        let members = self.members.iter().fold(Element::new("members"), |acc, m| {
            acc.with_child(
                Element::new("member")
                    .with_attr("user_id", &m.user_id)
                    .with_attr("role", m.role.as_str())
                    .with_attr("joined_at", format_time(&m.joined_at)),
            )
        });
        el.with_child(members)
    }

    fn from_element(el: &Element) -> Result<Self> {
        let members = el
            .child("members")
            .ok_or_else(|| StoreError::malformed(&el.name, "missing <members>"))?
            .children_named("member")
            .map(|m| -> Result<Member> {
                Ok(Member {
                    user_id: required_attr(m, "user_id")?.to_string(),
                    role: enum_attr(m, "role")?,
                    joined_at: time_attr(m, "joined_at")?,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            id: required_attr(el, "id")?.to_string(),
            name: required_child_text(el, "name")?.to_string(),
            description: el
                .child_text("description")
                .filter(|d| !d.is_empty())
                .map(str::to_string),
            created_by: required_attr(el, "created_by")?.to_string(),
            created_at: time_attr(el, "created_at")?,
            members,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_creator_is_admin() {
        let group = Group::new("Rustaceans", Some("crabs".into()), "usr_a");
        assert_eq!(group.role_of("usr_a"), Some(GroupRole::Admin));
        assert_eq!(group.admin_count(), 1);
        assert_eq!(group.created_by, "usr_a");
    }

    #[test]
    fn test_group_round_trip() {
        let mut group = Group::new("Rustaceans", None, "usr_a");
        group.add_member("usr_b", GroupRole::Member);
        let parsed = Group::from_element(&group.to_element()).unwrap();
        assert_eq!(parsed, group);
        assert!(group.to_element().child("description").is_none());
    }

    #[test]
    fn test_membership_changes() {
        let mut group = Group::new("g", None, "usr_a");
        assert!(group.add_member("usr_b", GroupRole::Member));
        assert!(!group.add_member("usr_b", GroupRole::Admin));
        assert_eq!(group.set_role("usr_b", GroupRole::Admin), Some(GroupRole::Member));
        assert_eq!(group.set_role("usr_x", GroupRole::Admin), None);
        assert!(group.remove_member("usr_a").is_some());
        assert!(group.remove_member("usr_a").is_none());
        assert!(group.is_admin("usr_b"));
    }

    #[test]
    fn test_ensure_admin_promotes_oldest_member() {
        let mut group = Group::new("g", None, "usr_a");
        group.add_member("usr_c", GroupRole::Member);
        group.add_member("usr_b", GroupRole::Member);
        group.members[1].joined_at = group.members[2].joined_at + Duration::seconds(5);

        assert_eq!(group.ensure_admin(), None);
        group.remove_member("usr_a");
        assert_eq!(group.ensure_admin(), Some("usr_b".to_string()));
        assert_eq!(group.admin_count(), 1);
    }
}
