//! Heading classification for plain text fragments.
//!
//! Assigns a hierarchy depth to fragments that read like book divisions
//! ("Part II", "Chapter 10", "Section 2.1") and rejects ordinary prose.

use lazy_static::lazy_static;
use regex::Regex;

/// Fragments with more words than this are never treated as headings.
pub const DEFAULT_MAX_HEADING_WORDS: usize = 12;

/// Depth assigned to part/volume headings.
pub const PART_LEVEL: usize = 1;
/// Depth assigned to chapter headings.
pub const CHAPTER_LEVEL: usize = 2;
/// Depth assigned to section headings.
pub const SECTION_LEVEL: usize = 3;

lazy_static! {
    /// "Part 1", "Book III", "Volume 2".
    static ref PART_REGEX: Regex =
        Regex::new(r"(?i)^(part|book|volume)\s+(\d+|[ivxlcdm]+)\b").unwrap();
    /// "Chapter 10", "Chapter XII".
    static ref CHAPTER_REGEX: Regex = Regex::new(r"(?i)^chapter\s+(\d+|[ivxlcdm]+)\b").unwrap();
    /// "Prologue", "Epilogue: After the Storm".
    static ref BOOKEND_REGEX: Regex = Regex::new(r"(?i)^(prologue|epilogue)\b").unwrap();
    /// "12. The Return".
    static ref NUMBERED_REGEX: Regex = Regex::new(r"^\d+\.\s+\S").unwrap();
    /// "Section 4", "Section 2.1.3".
    static ref SECTION_REGEX: Regex = Regex::new(r"(?i)^section\s+\d+(\.\d+)*\b").unwrap();
}

/// Classifies short text fragments as part, chapter or section headings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeadingClassifier {
    max_words: usize,
}

impl Default for HeadingClassifier {
    fn default() -> Self {
        Self {
            max_words: DEFAULT_MAX_HEADING_WORDS,
        }
    }
}

impl HeadingClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the short-fragment threshold.
    pub fn with_max_words(mut self, max_words: usize) -> Self {
        self.max_words = max_words;
        self
    }

    pub fn max_words(&self) -> usize {
        self.max_words
    }

    /// Returns the hierarchy depth of `text` (1 = part, 2 = chapter,
    /// 3 = section) or `None` when it does not read as a heading.
    ///
    /// Rules are evaluated in that order and the first match wins.
    pub fn classify(&self, text: &str) -> Option<usize> {
        let text = text.trim();
        if text.is_empty() || text.split_whitespace().count() > self.max_words {
            return None;
        }

        if PART_REGEX.is_match(text) {
            return Some(PART_LEVEL);
        }
        if CHAPTER_REGEX.is_match(text)
            || BOOKEND_REGEX.is_match(text)
            || NUMBERED_REGEX.is_match(text)
        {
            return Some(CHAPTER_LEVEL);
        }
        if SECTION_REGEX.is_match(text) {
            return Some(SECTION_LEVEL);
        }
        None
    }

    /// True when `text` classifies as a part or chapter heading.
    pub fn is_chapter_title(&self, text: &str) -> bool {
        matches!(self.classify(text), Some(PART_LEVEL) | Some(CHAPTER_LEVEL))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_vocabulary() {
        let classifier = HeadingClassifier::new();
        assert_eq!(classifier.classify("Chapter 10"), Some(2));
        assert_eq!(classifier.classify("chapter xii: The Fall"), Some(2));
        assert_eq!(classifier.classify("Part II"), Some(1));
        assert_eq!(classifier.classify("Book 3"), Some(1));
        assert_eq!(classifier.classify("Prologue"), Some(2));
        assert_eq!(classifier.classify("Epilogue"), Some(2));
        assert_eq!(classifier.classify("7. The Return"), Some(2));
        assert_eq!(classifier.classify("Section 2.1"), Some(3));
        assert_eq!(classifier.classify("  Section 4  "), Some(3));
    }

    #[test]
    fn test_classify_rejects_prose() {
        let classifier = HeadingClassifier::new();
        let prose = "It was the best of times and it was the worst of times, \
                     it was the age of wisdom and it was the age of foolishness \
                     as everyone who lived through it would later agree without hesitation";
        assert_eq!(prose.split_whitespace().count(), 30);
        assert_eq!(classifier.classify(prose), None);

        // Starts with a number but runs far past the fragment threshold.
        let numbered_prose = "1. Then we walked along the river for a very long time \
                              until the sun went down behind the hills";
        assert_eq!(classifier.classify(numbered_prose), None);

        assert_eq!(classifier.classify("Partial eclipse"), None);
        assert_eq!(classifier.classify("Part Ivy"), None);
        assert_eq!(classifier.classify(""), None);
    }

    #[test]
    fn test_threshold_is_tunable() {
        let strict = HeadingClassifier::new().with_max_words(2);
        assert_eq!(strict.classify("Chapter 1"), Some(2));
        assert_eq!(strict.classify("Chapter 1: The Beginning"), None);
    }

    #[test]
    fn test_is_chapter_title() {
        let classifier = HeadingClassifier::new();
        assert!(classifier.is_chapter_title("Part 1"));
        assert!(classifier.is_chapter_title("Chapter IV"));
        assert!(!classifier.is_chapter_title("Section 3"));
        assert!(!classifier.is_chapter_title("Acknowledgements"));
    }
}
