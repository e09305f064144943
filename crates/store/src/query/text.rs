// crates/store/src/query/text.rs
//! Substring and fuzzy text matching over change content and attribution
//! strings.

use memchr::memmem;
use redline_types::Change;
use serde::Serialize;

/// Which fields a text query inspects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TextFields {
    pub before: bool,
    pub after: bool,
    pub attribution: bool,
}

impl Default for TextFields {
    fn default() -> Self {
        Self {
            before: true,
            after: true,
            attribution: false,
        }
    }
}

/// A text predicate: plain substring by default, optional
/// case-insensitivity, optional word-level fuzzy matching with a bounded
/// edit distance (off unless requested).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TextQuery {
    pub query: String,
    pub case_sensitive: bool,
    /// Maximum Levenshtein distance for word-level fuzzy matching;
    /// `None` means exact substring only.
    pub fuzzy: Option<usize>,
    pub fields: TextFields,
}

impl TextQuery {
    pub fn substring(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            case_sensitive: false,
            fuzzy: None,
            fields: TextFields::default(),
        }
    }

    pub fn case_sensitive(mut self) -> Self {
        self.case_sensitive = true;
        self
    }

    pub fn fuzzy(mut self, max_distance: usize) -> Self {
        self.fuzzy = Some(max_distance);
        self
    }

    pub fn in_fields(mut self, fields: TextFields) -> Self {
        self.fields = fields;
        self
    }

    pub fn matches_change(&self, change: &Change) -> bool {
        if self.fields.before && self.matches_text(&change.content.before) {
            return true;
        }
        if self.fields.after && self.matches_text(&change.content.after) {
            return true;
        }
        if self.fields.attribution {
            if let Some(attribution) = &change.attribution {
                let haystacks = [
                    Some(attribution.provider.as_str()),
                    Some(attribution.model.as_str()),
                    attribution.mode.as_deref(),
                    attribution.instructions.as_deref(),
                    attribution.user_prompt.as_deref(),
                ];
                if haystacks
                    .into_iter()
                    .flatten()
                    .any(|text| self.matches_text(text))
                {
                    return true;
                }
            }
        }
        false
    }

    pub fn matches_text(&self, haystack: &str) -> bool {
        if self.case_sensitive {
            if memmem::find(haystack.as_bytes(), self.query.as_bytes()).is_some() {
                return true;
            }
        } else {
            let lowered_haystack = haystack.to_lowercase();
            let lowered_query = self.query.to_lowercase();
            if memmem::find(lowered_haystack.as_bytes(), lowered_query.as_bytes()).is_some() {
                return true;
            }
        }

        match self.fuzzy {
            None => false,
            Some(max_distance) => self.matches_fuzzy(haystack, max_distance),
        }
    }

    /// Word-level fuzzy pass: any word within the edit-distance bound.
    fn matches_fuzzy(&self, haystack: &str, max_distance: usize) -> bool {
        let needle = if self.case_sensitive {
            self.query.clone()
        } else {
            self.query.to_lowercase()
        };
        haystack
            .split(|c: char| !c.is_alphanumeric())
            .filter(|word| !word.is_empty())
            .any(|word| {
                let word = if self.case_sensitive {
                    word.to_string()
                } else {
                    word.to_lowercase()
                };
                // Cheap length gate before the DP.
                if word.len().abs_diff(needle.len()) > max_distance {
                    return false;
                }
                strsim::levenshtein(&word, &needle) <= max_distance
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_substring_default_is_case_insensitive() {
        let q = TextQuery::substring("Receive");
        assert!(q.matches_text("they receive mail"));
        assert!(q.matches_text("RECEIVE"));
        assert!(!q.matches_text("recieve")); // transposed, not a substring
    }

    #[test]
    fn test_case_sensitive_substring() {
        let q = TextQuery::substring("Earth").case_sensitive();
        assert!(q.matches_text("on Earth today"));
        assert!(!q.matches_text("on earth today"));
    }

    #[test]
    fn test_fuzzy_catches_transposition() {
        let q = TextQuery::substring("receive").fuzzy(2);
        assert!(q.matches_text("they recieve mail"));
        assert!(!q.matches_text("they obtain mail"));
    }

    #[test]
    fn test_fuzzy_distance_bound() {
        let q = TextQuery::substring("color").fuzzy(1);
        assert!(q.matches_text("colour palette"));
        let strict = TextQuery::substring("color").fuzzy(0);
        assert!(!strict.matches_text("colour palette"));
    }
}
