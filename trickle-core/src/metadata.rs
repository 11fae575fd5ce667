//! Free-text tags gathered while reading a header.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub album: Option<String>,
    pub track: Option<String>,
    pub year: Option<String>,
    pub genre: Option<String>,
    pub comment: Option<String>,
    pub copyright: Option<String>,
    /// Container-specific entries without a dedicated field
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, String>,
}

impl Metadata {
    /// Store `value` under `field` unless it is empty. Later values win.
    pub fn set(field: &mut Option<String>, value: impl Into<String>) {
        let value = value.into();
        let trimmed = value.trim_end_matches('\0');
        if !trimmed.is_empty() {
            *field = Some(trimmed.to_string());
        }
    }

    /// Flat key/value view; absent fields are left out.
    pub fn to_map(&self) -> BTreeMap<String, String> {
        let mut map = BTreeMap::new();
        let named = [
            ("title", &self.title),
            ("author", &self.author),
            ("album", &self.album),
            ("track", &self.track),
            ("year", &self.year),
            ("genre", &self.genre),
            ("comment", &self.comment),
            ("copyright", &self.copyright),
        ];
        for (key, value) in named {
            if let Some(value) = value {
                map.insert(key.to_string(), value.clone());
            }
        }
        map.extend(self.extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        map
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_values_are_ignored() {
        let mut meta = Metadata::default();
        Metadata::set(&mut meta.title, "\0\0");
        Metadata::set(&mut meta.author, "Someone\0");
        assert_eq!(meta.title, None);
        assert_eq!(meta.to_map().get("author").map(String::as_str), Some("Someone"));
    }
}
