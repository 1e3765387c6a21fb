//! Case-insensitive keyword matching on node names.

/// Pre-lowercased keyword set for repeated matching.
#[derive(Debug, Clone)]
pub struct KeywordMatcher {
    keywords: Vec<String>,
}

impl KeywordMatcher {
    pub fn new<S: AsRef<str>>(keywords: &[S]) -> Self {
        Self {
            keywords: keywords.iter().map(|k| k.as_ref().to_lowercase()).collect(),
        }
    }

    /// True iff at least one keyword is a substring of `name`, ignoring case.
    pub fn matches(&self, name: &str) -> bool {
        if self.keywords.is_empty() {
            return false;
        }
        let name = name.to_lowercase();
        self.keywords.iter().any(|k| name.contains(k.as_str()))
    }
}

/// One-shot form of [`KeywordMatcher::matches`].
pub fn matches<S: AsRef<str>>(name: &str, keywords: &[S]) -> bool {
    KeywordMatcher::new(keywords).matches(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substring_match_ignores_case() {
        assert!(matches("HK-01", &["hk"]));
        assert!(matches("hk-01", &["HK"]));
        assert!(matches("Premium United States 03", &["us", "united states"]));
        assert!(!matches("SG-Premium", &["hk", "us"]));
    }

    #[test]
    fn empty_keywords_never_match() {
        let none: [&str; 0] = [];
        assert!(!matches("HK-01", &none));
        assert!(!matches("", &none));
    }

    #[test]
    fn matches_non_ascii_names() {
        assert!(matches("🇭🇰 香港 01", &["香港"]));
        assert!(matches("Ünited Kingdom", &["ünited"]));
    }

    #[test]
    fn matcher_is_reusable() {
        let matcher = KeywordMatcher::new(&["jp".to_string(), "Japan".to_string()]);
        assert!(matcher.matches("JP-Tokyo"));
        assert!(matcher.matches("japan osaka"));
        assert!(!matcher.matches("Korea"));
    }
}
