//! Word and tag bookkeeping.
//!
//! Both indices are built in a single pass over the training corpus and frozen
//! afterwards. The tag set always ends with the two sentinels that anchor the
//! lattice, and carries the boundary transition tables derived from them.

use std::io;
use std::sync::OnceLock;

use regex::Regex;

use crate::dictionary::Dictionary;

/// Symbol substituted for out-of-vocabulary words at decoding time
pub const UNKNOWN_WORD: &str = "-UNK-";
/// Symbol every mostly-numeric token collapses to
pub const NUMERIC: &str = "-NUM-";
/// Name of the sequence-start sentinel tag
pub const START_TAG: &str = "__BOS__";
/// Name of the sequence-end sentinel tag
pub const END_TAG: &str = "__EOS__";

fn numeric_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"^[0-9]+[0-9,\-.]*$").expect("valid numeric pattern"))
}

/// Normalize a word to its canonical representation.
///
/// Tokens that look like numbers (`1,000.5`, `12-3`) or are at least two
/// thirds ASCII digits collapse to [`NUMERIC`].
pub fn normalize(word: &str) -> &str {
    // The digit-ratio rule alone would send "" to NUMERIC; keep it unchanged.
    if word.is_empty() {
        return word;
    }
    let digits = word.chars().filter(|c| c.is_ascii_digit()).count();
    let len = word.chars().count();
    if numeric_pattern().is_match(word) || digits * 3 >= len * 2 {
        NUMERIC
    } else {
        word
    }
}

/// Bidirectional word index with an unknown-word entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vocabulary {
    words: Dictionary,
    unknown: u32,
}

impl Vocabulary {
    /// Build the vocabulary from the words of a training corpus
    pub fn build<'a, I>(words: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut dict = Dictionary::new();
        for word in words {
            dict.get_or_insert(normalize(word));
        }
        let unknown = dict.get_or_insert(UNKNOWN_WORD);
        Self {
            words: dict,
            unknown,
        }
    }

    pub(crate) fn from_dictionary(words: Dictionary) -> io::Result<Self> {
        let unknown = words.get(UNKNOWN_WORD).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidData,
                "vocabulary has no unknown-word entry",
            )
        })?;
        Ok(Self { words, unknown })
    }

    /// Number of words, the unknown-word symbol included
    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    /// Map a raw word to the symbol the model knows it by
    pub fn resolve<'a>(&'a self, word: &'a str) -> &'a str {
        let word = normalize(word);
        if self.words.contains(word) {
            word
        } else {
            UNKNOWN_WORD
        }
    }

    /// Index of a raw word, falling back to the unknown-word index
    pub fn id(&self, word: &str) -> u32 {
        self.words.get(normalize(word)).unwrap_or(self.unknown)
    }

    pub fn unknown_id(&self) -> u32 {
        self.unknown
    }

    pub fn word(&self, id: u32) -> Option<&str> {
        self.words.get_name(id)
    }

    pub(crate) fn dictionary(&self) -> &Dictionary {
        &self.words
    }
}

/// Boundary transition tables
///
/// Index sets restricting which tags may precede or follow a given tag at
/// the edges of the lattice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transitions {
    no_start: Vec<u32>,
    no_end: Vec<u32>,
    only_start: [u32; 1],
    only_end: [u32; 1],
}

impl Transitions {
    fn new(num_tags: u32, start: u32, end: u32) -> Self {
        Self {
            no_start: (0..num_tags).filter(|&t| t != start).collect(),
            no_end: (0..num_tags).filter(|&t| t != end).collect(),
            only_start: [start],
            only_end: [end],
        }
    }

    pub fn no_start(&self) -> &[u32] {
        &self.no_start
    }

    pub fn no_end(&self) -> &[u32] {
        &self.no_end
    }

    pub fn only_start(&self) -> &[u32] {
        &self.only_start
    }

    pub fn only_end(&self) -> &[u32] {
        &self.only_end
    }
}

/// Bidirectional tag index including the START and END sentinels
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TagSet {
    tags: Dictionary,
    start: u32,
    end: u32,
    transitions: Transitions,
}

impl TagSet {
    /// Build the tag set from the gold tags of a training corpus
    pub fn build<'a, I>(tags: I) -> io::Result<Self>
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut dict = Dictionary::new();
        for tag in tags {
            if tag == START_TAG || tag == END_TAG {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("tag name {} is reserved", tag),
                ));
            }
            dict.get_or_insert(tag);
        }
        let start = dict.get_or_insert(START_TAG);
        let end = dict.get_or_insert(END_TAG);
        Ok(Self::with_sentinels(dict, start, end))
    }

    pub(crate) fn from_dictionary(tags: Dictionary) -> io::Result<Self> {
        match (tags.get(START_TAG), tags.get(END_TAG)) {
            (Some(start), Some(end)) => Ok(Self::with_sentinels(tags, start, end)),
            _ => Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "tag set is missing a sentinel tag",
            )),
        }
    }

    fn with_sentinels(tags: Dictionary, start: u32, end: u32) -> Self {
        let transitions = Transitions::new(tags.len() as u32, start, end);
        Self {
            tags,
            start,
            end,
            transitions,
        }
    }

    /// Number of tags, the two sentinels included
    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn id(&self, tag: &str) -> Option<u32> {
        self.tags.get(tag)
    }

    pub fn name(&self, id: u32) -> Option<&str> {
        self.tags.get_name(id)
    }

    pub fn start(&self) -> u32 {
        self.start
    }

    pub fn end(&self) -> u32 {
        self.end
    }

    pub fn is_sentinel(&self, id: u32) -> bool {
        id == self.start || id == self.end
    }

    pub fn transitions(&self) -> &Transitions {
        &self.transitions
    }

    /// Tags that may precede `cur` at lattice row `row` of an `n`-row lattice
    pub fn previous(&self, cur: u32, row: usize, n: usize) -> &[u32] {
        if cur == self.start {
            return &[];
        }
        if row == 1 {
            return self.transitions.only_start();
        }
        if row == n - 1 {
            if cur == self.end {
                return self.transitions.no_end();
            }
            return &[];
        }
        self.transitions.no_end()
    }

    /// Tags that may follow `cur` at lattice row `row` of an `n`-row lattice
    pub fn next(&self, cur: u32, row: usize, n: usize) -> &[u32] {
        if cur == self.end {
            return &[];
        }
        if row == n - 2 {
            return self.transitions.only_end();
        }
        if row == 0 {
            if cur == self.start {
                return self.transitions.no_start();
            }
            return &[];
        }
        self.transitions.no_start()
    }

    pub(crate) fn dictionary(&self) -> &Dictionary {
        &self.tags
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_numbers() {
        assert_eq!(normalize("1999"), NUMERIC);
        assert_eq!(normalize("1,000.50"), NUMERIC);
        assert_eq!(normalize("12-3"), NUMERIC);
        assert_eq!(normalize("A12"), NUMERIC);
        assert_eq!(normalize("B2B"), "B2B");
        assert_eq!(normalize("cat"), "cat");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn test_vocabulary_unknown() {
        let vocab = Vocabulary::build(["cat", "dog", "42", "cat"]);
        // cat, dog, -NUM-, -UNK-
        assert_eq!(vocab.len(), 4);
        assert_eq!(vocab.id("cat"), 0);
        assert_eq!(vocab.id("7"), vocab.id("42"));
        assert_eq!(vocab.id("bird"), vocab.unknown_id());
        assert_eq!(vocab.resolve("bird"), UNKNOWN_WORD);
        assert_eq!(vocab.resolve("100"), NUMERIC);
        assert_eq!(vocab.resolve("dog"), "dog");
        assert_eq!(vocab.word(vocab.unknown_id()), Some(UNKNOWN_WORD));
    }

    #[test]
    fn test_tagset_sentinels() {
        let tags = TagSet::build(["N", "V", "N"]).unwrap();
        assert_eq!(tags.len(), 4);
        assert_eq!(tags.start(), 2);
        assert_eq!(tags.end(), 3);
        assert_eq!(tags.transitions().no_start(), &[0, 1, 3]);
        assert_eq!(tags.transitions().no_end(), &[0, 1, 2]);
        assert!(tags.is_sentinel(2));
        assert!(!tags.is_sentinel(0));
    }

    #[test]
    fn test_tagset_empty_corpus() {
        let tags = TagSet::build(std::iter::empty()).unwrap();
        assert_eq!(tags.len(), 2);
        assert_eq!(tags.start(), 0);
        assert_eq!(tags.end(), 1);
    }

    #[test]
    fn test_tagset_rejects_reserved() {
        let err = TagSet::build([START_TAG]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[test]
    fn test_boundary_tables() {
        let tags = TagSet::build(["N", "V"]).unwrap();
        let (start, end) = (tags.start(), tags.end());
        // three tokens: rows 0..5
        let n = 5;
        assert!(tags.previous(start, 2, n).is_empty());
        assert_eq!(tags.previous(0, 1, n), &[start]);
        assert_eq!(tags.previous(end, 4, n), tags.transitions().no_end());
        assert!(tags.previous(0, 4, n).is_empty());
        assert_eq!(tags.previous(1, 2, n), tags.transitions().no_end());

        assert!(tags.next(end, 1, n).is_empty());
        assert_eq!(tags.next(0, 3, n), &[end]);
        assert_eq!(tags.next(start, 0, n), tags.transitions().no_start());
        assert!(tags.next(0, 0, n).is_empty());
        assert_eq!(tags.next(0, 2, n), tags.transitions().no_start());
    }
}
