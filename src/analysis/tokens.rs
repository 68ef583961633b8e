use std::path::Path;

use tracing::warn;

use super::extract::LengthUnit;

/// Counts tokens for length profiles.
///
/// Uses a sub-word tokenizer when one is compiled in and loadable, otherwise
/// whitespace-separated words. Callers see the same profile shape either way;
/// only the reported unit changes.
pub enum TokenCounter {
    #[cfg(feature = "subword")]
    Subword(Box<tokenizers::Tokenizer>),
    Whitespace,
}

impl TokenCounter {
    pub fn load(tokenizer_path: Option<&Path>) -> Self {
        let Some(path) = tokenizer_path else {
            return Self::Whitespace;
        };
        Self::load_from_path(path)
    }

    #[cfg(feature = "subword")]
    fn load_from_path(path: &Path) -> Self {
        match tokenizers::Tokenizer::from_file(path) {
            Ok(tokenizer) => {
                tracing::info!(path = %path.display(), "loaded sub-word tokenizer");
                Self::Subword(Box::new(tokenizer))
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to load tokenizer; counting whitespace words"
                );
                Self::Whitespace
            }
        }
    }

    #[cfg(not(feature = "subword"))]
    fn load_from_path(path: &Path) -> Self {
        warn!(
            path = %path.display(),
            "built without sub-word tokenizer support; counting whitespace words"
        );
        Self::Whitespace
    }

    pub fn unit(&self) -> LengthUnit {
        match self {
            #[cfg(feature = "subword")]
            Self::Subword(_) => LengthUnit::Tokens,
            Self::Whitespace => LengthUnit::Words,
        }
    }

    pub fn count(&self, text: &str) -> usize {
        match self {
            #[cfg(feature = "subword")]
            Self::Subword(tokenizer) => match tokenizer.encode(text, false) {
                Ok(encoding) => encoding.len(),
                Err(_) => word_count(text),
            },
            Self::Whitespace => word_count(text),
        }
    }
}

impl std::fmt::Debug for TokenCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("TokenCounter").field(&self.unit()).finish()
    }
}

pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_tokenizer_path_counts_words() {
        let counter = TokenCounter::load(None);
        assert_eq!(counter.unit(), LengthUnit::Words);
        assert_eq!(counter.count("  the quick\tbrown\nfox "), 4);
        assert_eq!(counter.count(""), 0);
    }

    #[test]
    fn unreadable_tokenizer_falls_back_to_words() {
        let path = std::env::temp_dir().join("oedipus-no-such-tokenizer.json");
        let counter = TokenCounter::load(Some(&path));
        assert_eq!(counter.unit(), LengthUnit::Words);
        assert_eq!(counter.count("one two"), 2);
    }
}
