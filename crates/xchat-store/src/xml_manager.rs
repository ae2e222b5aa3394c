//! Loads, validates, mutates and persists the shared XML data file.
//!
//! Reads load the whole file. Writes hold an async mutex across
//! load → mutate → validate → save, so writers in this process never lose
//! each other's updates, and a write lands with an atomic rename.

use crate::document::{Document, DocumentStats, ROOT};
use crate::error::{Result, StoreError};
use crate::schema::Schema;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub struct XmlManager {
    path: PathBuf,
    schema: Schema,
    write_lock: Mutex<()>,
}

impl XmlManager {
    /// Open the data file, creating an empty document if it does not exist.
    ///
    /// The file is loaded and validated once so that a corrupt document is
    /// reported at startup rather than on the first request.
    pub async fn open(path: impl Into<PathBuf>, schema: Schema) -> Result<Self> {
        let path = path.into();
        if schema.root_name() != ROOT {
            return Err(StoreError::Schema(format!(
                "schema root <{}> does not describe a <{}> document",
                schema.root_name(),
                ROOT
            )));
        }

        let manager = Self {
            path,
            schema,
            write_lock: Mutex::new(()),
        };

        if !fs::try_exists(&manager.path).await? {
            if let Some(parent) = manager.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent).await?;
            }
            manager.persist(&Document::skeleton()).await?;
            info!("[Xml] Created empty data file at {:?}", manager.path);
        }

        let stats = manager.load().await?.stats()?;
        info!(
            "[Xml] Opened {:?}: {} users, {} contacts, {} groups, {} messages",
            manager.path, stats.users, stats.contacts, stats.groups, stats.messages
        );

        Ok(manager)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Read, parse and validate the whole document.
    pub async fn load(&self) -> Result<Document> {
        let xml = fs::read_to_string(&self.path).await?;
        let doc = Document::parse(&xml)?;
        self.schema.check(doc.root()).inspect_err(|e| {
            warn!("[Xml] {:?} failed validation on load: {}", self.path, e);
        })?;
        debug!("[Xml] Loaded {:?} ({} bytes)", self.path, xml.len());
        Ok(doc)
    }

    /// Run a query against a freshly loaded document.
    pub async fn read<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&Document) -> std::result::Result<T, E>,
        E: From<StoreError>,
    {
        let doc = self.load().await?;
        f(&doc)
    }

    /// Apply a mutation and persist it.
    ///
    /// Nothing is written if the closure fails or the mutated document does
    /// not validate against the schema.
    pub async fn write<T, E, F>(&self, f: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&mut Document) -> std::result::Result<T, E>,
        E: From<StoreError>,
    {
        let _guard = self.write_lock.lock().await;
        let mut doc = self.load().await?;
        let value = f(&mut doc)?;
        self.save_locked(&doc).await?;
        Ok(value)
    }

    /// Replace the whole document.
    pub async fn save(&self, doc: &Document) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.save_locked(doc).await
    }

    pub async fn stats(&self) -> Result<DocumentStats> {
        self.load().await?.stats()
    }

    async fn save_locked(&self, doc: &Document) -> Result<()> {
        self.schema.check(doc.root()).inspect_err(|e| {
            warn!("[Xml] Rejected write to {:?}: {}", self.path, e);
        })?;
        self.persist(doc).await
    }

    async fn persist(&self, doc: &Document) -> Result<()> {
        let xml = doc.to_xml()?;
        let temp_path = self.path.with_extension("xml.tmp");

        fs::write(&temp_path, xml).await?;
        fs::rename(&temp_path, &self.path).await?;

        debug!("[Xml] Saved {:?}", self.path);
        Ok(())
    }
}
