use super::{format_time, new_id, now, required_attr, required_child_text, time_attr, Entity};
use crate::element::Element;
use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Directional address-book entry `user_id` holds for `contact_user_id`.
///
/// Contacts are kept as pairs: adding Alice to Bob's list also stores the
/// reverse entry in Alice's list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Contact {
    pub id: String,
    pub user_id: String,
    pub contact_user_id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

impl Contact {
    pub fn new(
        user_id: impl Into<String>,
        contact_user_id: impl Into<String>,
        name: impl Into<String>,
    ) -> Self {
        Self {
            id: new_id("cnt"),
            user_id: user_id.into(),
            contact_user_id: contact_user_id.into(),
            name: name.into(),
            created_at: now(),
        }
    }

    /// True when this entry links the two users in either direction.
    pub fn links(&self, a: &str, b: &str) -> bool {
        (self.user_id == a && self.contact_user_id == b)
            || (self.user_id == b && self.contact_user_id == a)
    }

    pub fn involves(&self, user_id: &str) -> bool {
        self.user_id == user_id || self.contact_user_id == user_id
    }
}

impl Entity for Contact {
    const COLLECTION: &'static str = "contacts";
    const ELEMENT: &'static str = "contact";
    const KIND: &'static str = "contact";

    fn id(&self) -> &str {
        &self.id
    }

    fn to_element(&self) -> Element {
        Element::new(Self::ELEMENT)
            .with_attr("id", &self.id)
            .with_attr("user_id", &self.user_id)
            .with_attr("contact_user_id", &self.contact_user_id)
            .with_attr("created_at", format_time(&self.created_at))
            .with_child(Element::new("name").with_text(&self.name))
    }

    fn from_element(el: &Element) -> Result<Self> {
        Ok(Self {
            id: required_attr(el, "id")?.to_string(),
            user_id: required_attr(el, "user_id")?.to_string(),
            contact_user_id: required_attr(el, "contact_user_id")?.to_string(),
            name: required_child_text(el, "name")?.to_string(),
            created_at: time_attr(el, "created_at")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_contact_round_trip_and_links() {
        let contact = Contact::new("usr_a", "usr_b", "Bobby");
        let parsed = Contact::from_element(&contact.to_element()).unwrap();
        assert_eq!(parsed, contact);

        assert!(contact.links("usr_a", "usr_b"));
        assert!(contact.links("usr_b", "usr_a"));
        assert!(!contact.links("usr_a", "usr_c"));
        assert!(contact.involves("usr_b"));
        assert!(!contact.involves("usr_c"));
    }
}
