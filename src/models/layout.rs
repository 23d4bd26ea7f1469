use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::constants::MAX_LAYOUT_ID_LEN;

/// Kinds of page-builder configuration documents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LayoutKind {
    BookField,
    HomeSection,
    HeroBlock,
    Theme,
}

impl LayoutKind {
    pub fn as_str(self) -> &'static str {
        match self {
            LayoutKind::BookField => "book_field",
            LayoutKind::HomeSection => "home_section",
            LayoutKind::HeroBlock => "hero_block",
            LayoutKind::Theme => "theme",
        }
    }

    /// Storage key for a document of this kind
    pub fn key(self, id: &str) -> String {
        format!("{}/{}", self.as_str(), id)
    }

    /// Prefix shared by every document of this kind
    pub fn prefix(self) -> String {
        format!("{}/", self.as_str())
    }
}

impl FromStr for LayoutKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "book_field" => Ok(LayoutKind::BookField),
            "home_section" => Ok(LayoutKind::HomeSection),
            "hero_block" => Ok(LayoutKind::HeroBlock),
            "theme" => Ok(LayoutKind::Theme),
            other => Err(format!("Unknown layout kind: {}", other)),
        }
    }
}

/// Stored layout document. The document body is kept as JSON text since
/// its shape belongs to the page builder, not the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LayoutRecord {
    pub kind: LayoutKind,
    pub id: String,
    pub document: String,
    pub created_at: i64,
    pub updated_at: i64,
}

pub fn validate_layout_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_LAYOUT_ID_LEN
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_parse() {
        assert_eq!("hero_block".parse::<LayoutKind>(), Ok(LayoutKind::HeroBlock));
        assert!("footer".parse::<LayoutKind>().is_err());
        assert_eq!(LayoutKind::Theme.key("dark"), "theme/dark");
    }

    #[test]
    fn test_validate_layout_id() {
        assert!(validate_layout_id("home-v2_draft"));
        assert!(!validate_layout_id(""));
        assert!(!validate_layout_id("a/b"));
        assert!(!validate_layout_id(&"a".repeat(65)));
    }
}
