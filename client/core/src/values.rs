//! Form values
//!
//! What a visitor has entered so far, keyed by field label.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// An in-memory file picked for a `file` field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VisitorFile {
    pub file_name: String,
    pub mime: String,
    pub bytes: Arc<[u8]>,
}

impl VisitorFile {
    pub fn new(file_name: impl Into<String>, mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            file_name: file_name.into(),
            mime: mime.into(),
            bytes: bytes.into(),
        }
    }

    /// Read a file from disk, guessing the MIME type from its extension.
    pub async fn read(path: &Path) -> std::io::Result<Self> {
        let bytes = tokio::fs::read(path).await?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".into());
        Ok(Self::new(file_name, mime_for(path), bytes))
    }

    /// Same name and type, new contents.
    pub fn with_bytes(&self, bytes: Vec<u8>) -> Self {
        Self::new(self.file_name.clone(), self.mime.clone(), bytes)
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// `data:` URL suitable for an inline preview.
    pub fn preview_url(&self) -> String {
        format!("data:{};base64,{}", self.mime, STANDARD.encode(&self.bytes))
    }
}

fn mime_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        _ => "application/octet-stream",
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValue {
    Text(String),
    File(VisitorFile),
}

impl FieldValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Text(text) => Some(text),
            FieldValue::File(_) => None,
        }
    }

    pub fn as_file(&self) -> Option<&VisitorFile> {
        match self {
            FieldValue::File(file) => Some(file),
            FieldValue::Text(_) => None,
        }
    }

    /// Character count for text, zero for files.
    pub fn char_len(&self) -> usize {
        self.as_text().map_or(0, |t| t.chars().count())
    }

    pub fn is_empty(&self) -> bool {
        match self {
            FieldValue::Text(text) => text.is_empty(),
            FieldValue::File(file) => file.is_empty(),
        }
    }
}

/// Label → value map. A label with an empty value counts as unpopulated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormValues {
    values: BTreeMap<String, FieldValue>,
}

impl FormValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, label: &str) -> Option<&FieldValue> {
        self.values.get(label)
    }

    pub fn text(&self, label: &str) -> Option<&str> {
        self.get(label).and_then(FieldValue::as_text)
    }

    pub fn set(&mut self, label: &str, value: FieldValue) {
        self.values.insert(label.to_string(), value);
    }

    pub fn set_text(&mut self, label: &str, text: impl Into<String>) {
        self.set(label, FieldValue::Text(text.into()));
    }

    pub fn remove(&mut self, label: &str) -> Option<FieldValue> {
        self.values.remove(label)
    }

    pub fn is_populated(&self, label: &str) -> bool {
        self.get(label).is_some_and(|v| !v.is_empty())
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.values.values().all(FieldValue::is_empty)
    }
}
