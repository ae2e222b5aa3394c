//! xchat-store: schema-validated XML storage for the xchat client.
//!
//! All chat state lives in one XML document:
//!
//! - **element**: a small owned element tree with a quick-xml reader and writer.
//! - **schema**: compiles the supported XSD subset and validates documents against it.
//! - **document**: typed scans and edits over the four collections.
//! - **xml_manager**: load, validate and atomically persist the data file.
//! - **repository**: per-entity queries and the cascading multi-collection edits.

pub mod document;
pub mod element;
pub mod error;
pub mod models;
pub mod repository;
pub mod schema;
pub mod xml_manager;

pub use document::{Document, DocumentStats};
pub use element::Element;
pub use error::{Result, StoreError, ValidationReport, Violation};
pub use models::{
    Attachment, Contact, Entity, Group, GroupRole, Member, Message, MessageStatus, MessageType,
    Recipient, Settings, User, UserStatus,
};
pub use repository::{
    ContactRepository, GroupRepository, GroupState, MessageRepository, UserDeletion,
    UserRepository,
};
pub use schema::Schema;
pub use xml_manager::XmlManager;
