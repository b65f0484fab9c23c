use regex::Regex;

use crate::domain::QueryError;

/// Glob over cache keys; `*` matches any run of characters, everything else is literal
#[derive(Debug, Clone)]
pub struct KeyPattern {
    glob: String,
    regex: Regex,
}

impl KeyPattern {
    pub fn new(glob: &str) -> Result<Self, QueryError> {
        let escaped = regex::escape(glob).replace(r"\*", ".*");
        let regex = Regex::new(&format!("^{}$", escaped))
            .map_err(|e| QueryError::invalid_pattern(format!("{}: {}", glob, e)))?;

        Ok(Self {
            glob: glob.to_string(),
            regex,
        })
    }

    /// Pattern matching `key` alone; a `*` in it is literal
    pub fn exact(key: &str) -> Result<Self, QueryError> {
        let regex = Regex::new(&format!("^{}$", regex::escape(key)))
            .map_err(|e| QueryError::invalid_pattern(format!("{}: {}", key, e)))?;

        Ok(Self {
            glob: key.to_string(),
            regex,
        })
    }

    pub fn matches(&self, key: &str) -> bool {
        self.regex.is_match(key)
    }

    pub fn as_str(&self) -> &str {
        &self.glob
    }
}
