//! Entity models and their mapping to XML elements.

pub mod contact;
pub mod group;
pub mod message;
pub mod user;

pub use contact::Contact;
pub use group::{Group, GroupRole, Member};
pub use message::{Attachment, Message, MessageStatus, MessageType, Recipient};
pub use user::{Settings, User, UserStatus};

use crate::element::Element;
use crate::error::{Result, StoreError};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use uuid::Uuid;

/// A record stored as one element inside a collection of the document.
pub trait Entity: Sized {
    /// Name of the collection element under the document root.
    const COLLECTION: &'static str;
    /// Name of each record element.
    const ELEMENT: &'static str;
    /// Human-readable kind used in errors and logs.
    const KIND: &'static str;

    fn id(&self) -> &str;
    fn to_element(&self) -> Element;
    fn from_element(el: &Element) -> Result<Self>;
}

/// Generate a prefixed random identifier, e.g. `usr_3f2a...`.
pub fn new_id(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::new_v4().simple())
}

/// Current time at the millisecond precision the document stores.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(3)
}

pub(crate) fn format_time(time: &DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub(crate) fn parse_time(el: &Element, value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::malformed(&el.name, format!("bad timestamp '{}': {}", value, e)))
}

pub(crate) fn required_attr<'e>(el: &'e Element, name: &str) -> Result<&'e str> {
    el.attr(name)
        .ok_or_else(|| StoreError::malformed(&el.name, format!("missing attribute '{}'", name)))
}

pub(crate) fn required_child_text<'e>(el: &'e Element, name: &str) -> Result<&'e str> {
    el.child_text(name)
        .ok_or_else(|| StoreError::malformed(&el.name, format!("missing <{}>", name)))
}

pub(crate) fn time_attr(el: &Element, name: &str) -> Result<DateTime<Utc>> {
    parse_time(el, required_attr(el, name)?)
}

pub(crate) fn opt_time_attr(el: &Element, name: &str) -> Result<Option<DateTime<Utc>>> {
    el.attr(name).map(|v| parse_time(el, v)).transpose()
}

/// Parse an enum attribute through its `FromStr` impl.
pub(crate) fn enum_attr<T: std::str::FromStr>(el: &Element, name: &str) -> Result<T> {
    let value = required_attr(el, name)?;
    value.parse().map_err(|_| {
        StoreError::malformed(&el.name, format!("unknown {} '{}'", name, value))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_id_is_prefixed_and_unique() {
        let a = new_id("usr");
        let b = new_id("usr");
        assert!(a.starts_with("usr_"));
        assert_eq!(a.len(), 4 + 32);
        assert_ne!(a, b);
    }

    #[test]
    fn test_time_round_trip_keeps_millis() {
        let now = Utc::now();
        let el = Element::new("x").with_attr("at", format_time(&now));
        let parsed = time_attr(&el, "at").unwrap();
        assert_eq!(parsed.timestamp_millis(), now.timestamp_millis());
        assert!(opt_time_attr(&el, "missing").unwrap().is_none());
    }

    #[test]
    fn test_bad_values_are_malformed() {
        let el = Element::new("user").with_attr("created_at", "yesterday");
        assert!(matches!(
            time_attr(&el, "created_at"),
            Err(StoreError::Malformed { .. })
        ));
        assert!(matches!(
            required_attr(&el, "id"),
            Err(StoreError::Malformed { .. })
        ));
    }
}
