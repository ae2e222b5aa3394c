//! Repositories over the shared document.
//!
//! Each repository owns the queries for one entity kind. Operations that
//! touch several collections (contact pairs, cascade deletes) run inside a
//! single [`XmlManager::write`](crate::XmlManager::write) so they land atomically.

pub mod contacts;
pub mod groups;
pub mod messages;
pub mod users;

pub use contacts::ContactRepository;
pub use groups::{GroupRepository, GroupState};
pub use messages::MessageRepository;
pub use users::{UserDeletion, UserRepository};

use crate::document::Document;
use crate::error::{Result, StoreError};
use crate::models::{Entity, Message};

/// Order messages by timestamp; ties keep document order.
pub(crate) fn sort_chronologically(messages: &mut [Message]) {
    messages.sort_by_key(|m| m.timestamp);
}

pub(crate) fn require<E: Entity>(doc: &Document, id: &str) -> Result<()> {
    if doc.contains::<E>(id)? {
        Ok(())
    } else {
        Err(StoreError::not_found(E::KIND, id))
    }
}
