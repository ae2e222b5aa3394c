use super::{
    enum_attr, format_time, new_id, now, opt_time_attr, required_attr, required_child_text,
    time_attr, Entity,
};
use crate::element::Element;
use crate::error::{Result, StoreError};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Per-user preferences, stored as `<setting key="...">value</setting>`.
pub type Settings = BTreeMap<String, String>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    pub id: String,
    pub name: String,
    pub email: String,
    pub status: UserStatus,
    pub settings: Settings,
    pub created_at: DateTime<Utc>,
    pub last_seen: Option<DateTime<Utc>>,
}

impl User {
    /// A new offline user. The email is stored lower-cased.
    pub fn new(name: impl Into<String>, email: &str) -> Self {
        Self {
            id: new_id("usr"),
            name: name.into(),
            email: email.trim().to_lowercase(),
            status: UserStatus::Offline,
            settings: Settings::new(),
            created_at: now(),
            last_seen: None,
        }
    }

    pub fn with_settings(mut self, settings: Settings) -> Self {
        self.settings = settings;
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UserStatus {
    Online,
    Away,
    Busy,
    Offline,
}

impl UserStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserStatus::Online => "online",
            UserStatus::Away => "away",
            UserStatus::Busy => "busy",
            UserStatus::Offline => "offline",
        }
    }
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "online" => Ok(UserStatus::Online),
            "away" => Ok(UserStatus::Away),
            "busy" => Ok(UserStatus::Busy),
            "offline" => Ok(UserStatus::Offline),
            other => Err(format!("unknown user status '{}'", other)),
        }
    }
}

impl Entity for User {
    const COLLECTION: &'static str = "users";
    const ELEMENT: &'static str = "user";
    const KIND: &'static str = "user";

    fn id(&self) -> &str {
        &self.id
    }

    fn to_element(&self) -> Element {
        let mut el = Element::new(Self::ELEMENT)
            .with_attr("id", &self.id)
            .with_attr("status", self.status.as_str())
            .with_attr("created_at", format_time(&self.created_at))
            .with_opt_attr("last_seen", self.last_seen.as_ref().map(format_time))
            .with_child(Element::new("name").with_text(&self.name))
            .with_child(Element::new("email").with_text(&self.email));

        if !self.settings.is_empty() {
            let settings = self.settings.iter().fold(Element::new("settings"), |acc, (k, v)| {
                acc.with_child(Element::new("setting").with_attr("key", k).with_text(v))
            });
            el = el.with_child(settings);
        }
        el
    }

    fn from_element(el: &Element) -> Result<Self> {
        let mut settings = Settings::new();
        if let Some(list) = el.child("settings") {
            for setting in list.children_named("setting") {
                let key = required_attr(setting, "key")?;
                settings.insert(
                    key.to_string(),
                    setting.text.clone().unwrap_or_default(),
                );
            }
        }

        let email = required_child_text(el, "email")?;
        if email.is_empty() {
            return Err(StoreError::malformed(&el.name, "empty email"));
        }

        Ok(Self {
            id: required_attr(el, "id")?.to_string(),
            name: required_child_text(el, "name")?.to_string(),
            email: email.to_string(),
            status: enum_attr(el, "status")?,
            settings,
            created_at: time_attr(el, "created_at")?,
            last_seen: opt_time_attr(el, "last_seen")?,
        })
    }
}
