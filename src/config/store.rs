//! Persists field values across runs as a JSON object file.
//!
//! 以 JSON 对象文件的形式跨运行持久化字段值。

use super::fields::Fields;
use crate::error::Result;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// File-backed store of field values keyed by field name.
///
/// 以字段名为键、基于文件的字段值存储。
#[derive(Debug, Clone)]
pub struct FieldStore {
    path: PathBuf,
}

impl FieldStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads the stored fields. A missing file is an empty store.
    ///
    /// 加载已存储的字段。文件不存在时视为空存储。
    pub fn load(&self) -> Result<Fields> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(Fields::new()),
            Err(e) => Err(e.into()),
        }
    }

    pub fn save(&self, fields: &Fields) -> Result<()> {
        let text = serde_json::to_string_pretty(fields)?;
        std::fs::write(&self.path, text)?;
        Ok(())
    }

    /// Persists a single field change immediately.
    ///
    /// 立即持久化单个字段的变更。
    pub fn set(&self, key: &str, value: &str) -> Result<Fields> {
        let mut fields = self.load()?;
        fields.set(key, value)?;
        self.save(&fields)?;
        debug!(key, path = %self.path.display(), "field persisted");
        Ok(fields)
    }
}
