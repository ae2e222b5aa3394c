//! Chat configuration

use anyhow::Context;
use std::path::{Path, PathBuf};
use xchat_store::Schema;

use crate::error::{Error, Result};

const MB: u64 = 1024 * 1024;

/// Configuration for the xchat services
#[derive(Clone, Debug)]
pub struct ChatConfig {
    /// The shared XML data file
    pub data_file: PathBuf,
    /// XSD to validate against; the bundled schema when unset
    pub schema_file: Option<PathBuf>,
    /// Directory holding stored uploads
    pub uploads_dir: PathBuf,
    /// Max upload size in bytes
    pub max_upload_bytes: u64,
    /// Max message length in characters
    pub max_message_len: usize,
    /// Lower-case extensions accepted for uploads
    pub allowed_extensions: Vec<String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            data_file: xchat_common::data_file(),
            schema_file: None,
            uploads_dir: xchat_common::uploads_dir(),
            max_upload_bytes: 10 * MB,
            max_message_len: SCHEMA_MAX_MESSAGE_LEN,
            allowed_extensions: [
                "jpg", "jpeg", "png", "gif", "webp", "pdf", "txt", "md", "doc", "docx", "zip",
            ]
            .iter()
            .map(|ext| ext.to_string())
            .collect(),
        }
    }
}

/// Longest message body the bundled schema accepts.
pub const SCHEMA_MAX_MESSAGE_LEN: usize = 10_000;

fn parse_number<T: std::str::FromStr>(name: &str, raw: Option<String>) -> anyhow::Result<Option<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.map(|raw| {
        raw.trim()
            .parse()
            .with_context(|| format!("{} must be a number, got '{}'", name, raw))
    })
    .transpose()
}

impl ChatConfig {
    /// Create config with everything under `base_dir`
    pub fn with_base_dir(base_dir: impl Into<PathBuf>) -> Self {
        let base_dir = base_dir.into();
        Self {
            data_file: base_dir.join(xchat_common::DATA_FILE_NAME),
            uploads_dir: base_dir.join("uploads"),
            ..Self::default()
        }
    }

    /// Defaults overridden by `XCHAT_*` environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each `XCHAT_*` name.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(path) = lookup("XCHAT_DATA_FILE") {
            config.data_file = PathBuf::from(path);
        }
        if let Some(path) = lookup("XCHAT_SCHEMA") {
            config.schema_file = Some(PathBuf::from(path));
        }
        if let Some(path) = lookup("XCHAT_UPLOADS_DIR") {
            config.uploads_dir = PathBuf::from(path);
        }
        if let Some(mb) = parse_number::<u64>("XCHAT_MAX_UPLOAD_MB", lookup("XCHAT_MAX_UPLOAD_MB"))? {
            config.max_upload_bytes = mb
                .checked_mul(MB)
                .ok_or_else(|| anyhow::anyhow!("XCHAT_MAX_UPLOAD_MB is too large: {}", mb))?;
        }
        if let Some(len) =
            parse_number::<usize>("XCHAT_MAX_MESSAGE_LEN", lookup("XCHAT_MAX_MESSAGE_LEN"))?
        {
            if len == 0 || len > SCHEMA_MAX_MESSAGE_LEN {
                anyhow::bail!(
                    "XCHAT_MAX_MESSAGE_LEN must be between 1 and {}, got {}",
                    SCHEMA_MAX_MESSAGE_LEN,
                    len
                );
            }
            config.max_message_len = len;
        }

        Ok(config)
    }

    /// Ensure the data and upload directories exist
    pub fn ensure_dirs(&self) -> anyhow::Result<()> {
        xchat_common::ensure_parent(&self.data_file)?;
        xchat_common::ensure_dir(&self.uploads_dir)?;
        Ok(())
    }

    /// The configured schema, compiled.
    pub async fn load_schema(&self) -> Result<Schema> {
        match &self.schema_file {
            Some(path) => compile_file(path).await,
            None => Ok(Schema::builtin()?),
        }
    }
}

async fn compile_file(path: &Path) -> Result<Schema> {
    let xsd = tokio::fs::read_to_string(path).await.map_err(|e| {
        Error::Validation(format!("cannot read schema {}: {}", path.display(), e))
    })?;
    Ok(Schema::compile(&xsd)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_with_base_dir() {
        let config = ChatConfig::with_base_dir("/srv/chat");
        assert_eq!(config.data_file, PathBuf::from("/srv/chat/chat.xml"));
        assert_eq!(config.uploads_dir, PathBuf::from("/srv/chat/uploads"));
        assert_eq!(config.max_upload_bytes, 10 * MB);
        assert!(config.allowed_extensions.iter().any(|e| e == "png"));
    }

    fn lookup<'a>(vars: &'a [(&'a str, &'a str)]) -> impl Fn(&str) -> Option<String> + 'a {
        move |name| {
            vars.iter()
                .find(|(key, _)| *key == name)
                .map(|(_, value)| value.to_string())
        }
    }

    #[test]
    fn test_overrides_from_environment() {
        let config = ChatConfig::from_lookup(lookup(&[
            ("XCHAT_DATA_FILE", "/data/chat.xml"),
            ("XCHAT_SCHEMA", "/etc/xchat/chat.xsd"),
            ("XCHAT_UPLOADS_DIR", "/data/files"),
            ("XCHAT_MAX_UPLOAD_MB", " 25 "),
            ("XCHAT_MAX_MESSAGE_LEN", "500"),
        ]))
        .unwrap();
        assert_eq!(config.data_file, PathBuf::from("/data/chat.xml"));
        assert_eq!(config.schema_file, Some(PathBuf::from("/etc/xchat/chat.xsd")));
        assert_eq!(config.uploads_dir, PathBuf::from("/data/files"));
        assert_eq!(config.max_upload_bytes, 25 * MB);
        assert_eq!(config.max_message_len, 500);

        let untouched = ChatConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(untouched.max_message_len, SCHEMA_MAX_MESSAGE_LEN);
        assert_eq!(untouched.schema_file, None);
    }

    #[test]
    fn test_bad_overrides_are_rejected() {
        for vars in [
            [("XCHAT_MAX_UPLOAD_MB", "ten")],
            [("XCHAT_MAX_UPLOAD_MB", "18446744073709551615")],
            [("XCHAT_MAX_MESSAGE_LEN", "20000")],
            [("XCHAT_MAX_MESSAGE_LEN", "0")],
        ] {
            assert!(ChatConfig::from_lookup(lookup(&vars)).is_err(), "{:?}", vars);
        }

        let config = ChatConfig::from_lookup(lookup(&[("XCHAT_MAX_MESSAGE_LEN", "10000")])).unwrap();
        assert_eq!(config.max_message_len, SCHEMA_MAX_MESSAGE_LEN);
    }

    #[tokio::test]
    async fn test_ensure_dirs_and_schema() {
        let dir = TempDir::new().unwrap();
        let mut config = ChatConfig::with_base_dir(dir.path().join("nested"));
        config.ensure_dirs().unwrap();
        assert!(config.uploads_dir.is_dir());
        assert!(config.data_file.parent().unwrap().is_dir());

        assert_eq!(config.load_schema().await.unwrap().root_name(), "chat");

        config.schema_file = Some(dir.path().join("missing.xsd"));
        assert!(matches!(
            config.load_schema().await,
            Err(Error::Validation(_))
        ));
    }
}
