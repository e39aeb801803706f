//! Source entry naming: the `NNN-name` convention.
//!
//! Directories and node files in the content tree may carry a numeric prefix
//! that fixes their position among siblings. The prefix is a sort key only;
//! it never becomes part of the content path:
//!
//! - `010-blog/` → slug `blog`, sort key 10
//! - `020-About-Us.toml` → slug `About-Us`, sort key 20
//! - `drafts/` → slug `drafts`, sorted after all numbered siblings
//! - `001/` → slug `001` (a bare number keeps the number as its name)

use crate::path::{PathError, Slug};

/// Result of parsing an entry name like `020-My-Best-Photos`.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedName {
    /// Number prefix if present (e.g., `20` from `020-My-Best-Photos`)
    pub number: Option<u32>,
    /// Name part after `NNN-`. For unnumbered entries, the full input.
    pub name: String,
    /// Name with dashes converted to spaces, used as a fallback title.
    pub display_title: String,
}

impl ParsedName {
    /// Ordering key among siblings: numbered entries first by number, then
    /// everything by name.
    pub fn sort_key(&self) -> (u32, String) {
        (self.number.unwrap_or(u32::MAX), self.name.clone())
    }

    /// Slug for the content path. Names that are already valid slugs are kept
    /// verbatim; anything else is slugified.
    pub fn slug(&self, raw: &str) -> Result<Slug, PathError> {
        if self.name.is_empty() {
            return Slug::new(raw);
        }
        match Slug::new(self.name.as_str()) {
            Ok(slug) => Ok(slug),
            Err(_) => Slug::slugify(&self.display_title),
        }
    }
}

/// Parse an entry name following the `NNN-name` convention.
pub fn parse_entry_name(name: &str) -> ParsedName {
    if let Some(dash_pos) = name.find('-') {
        let prefix = &name[..dash_pos];
        if let Ok(num) = prefix.parse::<u32>() {
            let raw = &name[dash_pos + 1..];
            return ParsedName {
                number: Some(num),
                name: raw.to_string(),
                display_title: raw.replace('-', " "),
            };
        }
    }
    if let Ok(num) = name.parse::<u32>() {
        return ParsedName {
            number: Some(num),
            name: String::new(),
            display_title: String::new(),
        };
    }
    ParsedName {
        number: None,
        name: name.to_string(),
        display_title: name.replace('-', " "),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numbered_with_multi_word_name() {
        let p = parse_entry_name("020-My-Best-Photos");
        assert_eq!(p.number, Some(20));
        assert_eq!(p.name, "My-Best-Photos");
        assert_eq!(p.display_title, "My Best Photos");
    }

    #[test]
    fn number_only_keeps_raw_as_slug() {
        let p = parse_entry_name("001");
        assert_eq!(p.number, Some(1));
        assert_eq!(p.name, "");
        assert_eq!(p.slug("001").unwrap().as_str(), "001");
    }

    #[test]
    fn unnumbered_sorts_last() {
        let numbered = parse_entry_name("999-last");
        let plain = parse_entry_name("alpha");
        assert!(numbered.sort_key() < plain.sort_key());
    }

    #[test]
    fn numbered_entries_sort_by_number_not_text() {
        let mut names = vec!["100-c", "020-b", "003-a"];
        names.sort_by_key(|n| parse_entry_name(n).sort_key());
        assert_eq!(names, vec!["003-a", "020-b", "100-c"]);
    }

    #[test]
    fn slug_strips_number_prefix() {
        let p = parse_entry_name("010-blog");
        assert_eq!(p.slug("010-blog").unwrap().as_str(), "blog");
    }

    #[test]
    fn slug_slugifies_invalid_names() {
        let p = parse_entry_name("030-Café Stories");
        assert_eq!(p.slug("030-Café Stories").unwrap().as_str(), "caf-stories");
    }

    #[test]
    fn zero_prefix() {
        let p = parse_entry_name("000-First");
        assert_eq!(p.number, Some(0));
        assert_eq!(p.display_title, "First");
    }
}
