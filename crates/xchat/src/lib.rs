//! xchat Library
//!
//! Users, contacts, groups and messages stored in one schema-validated XML
//! document. Callers authenticate users themselves and hand the services a
//! [`Ctx`] naming the actor.

pub mod cli;
pub mod config;
pub mod ctx;
pub mod error;
pub mod services;

use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;
use xchat_store::{
    ContactRepository, GroupRepository, MessageRepository, UserRepository, XmlManager,
};

pub use config::ChatConfig;
pub use ctx::Ctx;
pub use error::{Error, Result};
pub use services::{FileUploadService, GroupService, MessageService, Upload, UserService};

/// Install the global subscriber (`RUST_LOG`, default `info`).
/// Later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .is_err()
    {
        // Already set, ignore
    }
}

/// Services shared by every caller
#[derive(Clone)]
pub struct AppState {
    pub config: ChatConfig,
    pub xml: Arc<XmlManager>,
    pub users: Arc<UserService>,
    pub groups: Arc<GroupService>,
    pub messages: Arc<MessageService>,
    pub files: Arc<FileUploadService>,
}

impl AppState {
    /// Open the data file and wire the services together.
    pub async fn init(config: ChatConfig) -> anyhow::Result<Self> {
        config.ensure_dirs()?;
        info!("Data file: {:?}", config.data_file);
        info!("Uploads directory: {:?}", config.uploads_dir);

        let schema = config.load_schema().await?;
        let xml = Arc::new(XmlManager::open(&config.data_file, schema).await?);

        let users = UserRepository::new(xml.clone());
        let contacts = ContactRepository::new(xml.clone());
        let groups = GroupRepository::new(xml.clone());
        let messages = MessageRepository::new(xml.clone());
        let files = Arc::new(FileUploadService::new(&config));

        let user_service = Arc::new(UserService::new(
            users.clone(),
            contacts.clone(),
            messages.clone(),
            files.clone(),
        ));
        let group_service = Arc::new(GroupService::new(
            users.clone(),
            groups.clone(),
            files.clone(),
        ));
        let message_service = Arc::new(MessageService::new(
            &config,
            users,
            contacts,
            groups,
            messages,
            files.clone(),
        ));
        info!("Services initialized");

        Ok(Self {
            config,
            xml,
            users: user_service,
            groups: group_service,
            messages: message_service,
            files,
        })
    }
}
