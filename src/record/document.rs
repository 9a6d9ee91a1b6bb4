//! Manifest documents and filename classification
//!
//! Documents are read through explicit optional-field accessors over the
//! parsed YAML mapping. Unknown keys are ignored and missing keys are `None`.

use serde_yaml::{Mapping, Value};
use std::fmt;

/// File extensions recognized as manifest documents
pub const RECOGNIZED_EXTENSIONS: &[&str] = &["yaml", "yml"];

/// Category of a manifest document, derived from its filename
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    /// `<id>.installer.yaml`
    Installer,
    /// `<id>.locale.<lang>.yaml`
    Locale,
    /// Any other recognized document
    Primary,
}

impl DocumentKind {
    /// Classifies a file by name
    ///
    /// Returns `None` when the extension is not a recognized document extension.
    pub fn classify(file_name: &str) -> Option<Self> {
        let lower = file_name.to_ascii_lowercase();
        let (stem, extension) = lower.rsplit_once('.')?;
        if !RECOGNIZED_EXTENSIONS.contains(&extension) {
            return None;
        }

        let mut segments = stem.rsplit('.');
        let last = segments.next().unwrap_or_default();
        if last == "installer" {
            return Some(Self::Installer);
        }
        // `locale.<lang>` puts the language tag last
        if segments.next() == Some("locale") {
            return Some(Self::Locale);
        }
        Some(Self::Primary)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Installer => "installer",
            Self::Locale => "locale",
            Self::Primary => "primary",
        }
    }
}

impl fmt::Display for DocumentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// An untyped key/value manifest document
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManifestDocument {
    fields: Mapping,
}

impl ManifestDocument {
    /// Parses YAML text
    ///
    /// A document whose top level is not a mapping (including an empty file)
    /// is treated as having no fields.
    pub fn parse(text: &str) -> Result<Self, serde_yaml::Error> {
        let value: Value = serde_yaml::from_str(text)?;
        Ok(Self::from_value(value))
    }

    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Mapping(fields) => Self { fields },
            _ => Self::default(),
        }
    }

    /// Raw value of a key
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Scalar value of a key as trimmed text; empty values count as absent
    pub fn get_str(&self, key: &str) -> Option<String> {
        self.get(key).and_then(scalar_text)
    }

    /// List value of a key
    ///
    /// A string is split on commas; a sequence is taken element by element.
    /// Entries are trimmed and empty entries dropped. Order and duplicates are
    /// preserved.
    pub fn get_list(&self, key: &str) -> Option<Vec<String>> {
        match self.get(key)? {
            Value::String(s) => Some(
                s.split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .collect(),
            ),
            Value::Sequence(items) => Some(items.iter().filter_map(scalar_text).collect()),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

fn scalar_text(value: &Value) -> Option<String> {
    let text = match value {
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        _ => return None,
    };
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}
