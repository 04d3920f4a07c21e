//! Feature templates.
//!
//! A template is a line of text whose first character selects its kind
//! (`U` for unigram, `B` for bigram) and which may contain `%x[row,col]`
//! macros. A macro expands to column `col` of the token `row` positions away
//! from the current one; positions outside the sequence expand to `_B-k` or
//! `_B+k`.
//!
//! ```text
//! # word identity
//! U00:%x[0,0]
//! # previous word / current word
//! U01:%x[-1,0]/%x[0,0]
//! # tag bigram
//! B
//! ```

use std::fmt;
use std::io;
use std::sync::OnceLock;

use regex::Regex;

use crate::dataset::Instance;
use crate::vocabulary::Vocabulary;

fn macro_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"%x\[\s*(-?\d+)\s*,\s*(\d+)\s*\]").expect("valid macro pattern")
    })
}

/// Template kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TemplateKind {
    /// Depends on the current tag only
    Unigram = 0,
    /// Depends on the previous and the current tag
    Bigram = 1,
}

impl TemplateKind {
    pub(crate) fn from_u32(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Unigram),
            1 => Some(Self::Bigram),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Literal(String),
    Column { row: isize, col: usize },
}

/// A parsed feature template
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Template {
    source: String,
    kind: TemplateKind,
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(source: &str) -> io::Result<Self> {
        let kind = match source.chars().next() {
            Some('U') => TemplateKind::Unigram,
            Some('B') => TemplateKind::Bigram,
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("template must start with 'U' or 'B': {:?}", source),
                ))
            }
        };

        let mut segments = Vec::new();
        let mut last = 0;
        for caps in macro_pattern().captures_iter(source) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            if whole.start() > last {
                segments.push(Segment::Literal(source[last..whole.start()].to_string()));
            }
            let row = caps[1].parse::<isize>().map_err(|_| {
                io::Error::new(io::ErrorKind::InvalidInput, "template row offset out of range")
            })?;
            let col = caps[2].parse::<usize>().map_err(|_| {
                io::Error::new(io::ErrorKind::InvalidInput, "template column out of range")
            })?;
            segments.push(Segment::Column { row, col });
            last = whole.end();
        }
        if last < source.len() {
            segments.push(Segment::Literal(source[last..].to_string()));
        }

        Ok(Self {
            source: source.to_string(),
            kind,
            segments,
        })
    }

    pub fn kind(&self) -> TemplateKind {
        self.kind
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Expand the template at `position` into its tag-independent key
    pub fn expand(&self, observation: &Observation<'_>, position: usize) -> io::Result<String> {
        let mut key = String::with_capacity(self.source.len() + 16);
        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => key.push_str(text),
                Segment::Column { row, col } => {
                    let index = (position as isize).checked_add(*row).ok_or_else(|| {
                        io::Error::new(
                            io::ErrorKind::InvalidInput,
                            format!("row offset {} is out of range at position {}", row, position),
                        )
                    })?;
                    let len = observation.len() as isize;
                    if index < 0 {
                        key.push_str(&format!("_B{}", index));
                    } else if index >= len {
                        key.push_str(&format!("_B+{}", (index - len) as usize + 1));
                    } else {
                        key.push_str(observation.cell(index as usize, *col)?);
                    }
                }
            }
        }
        Ok(key)
    }
}

impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Observation columns of one instance as seen by the templates
///
/// Column 0 holds the word after vocabulary resolution, so numeric tokens
/// share one symbol and unseen words read as the unknown-word symbol.
#[derive(Debug)]
pub struct Observation<'a> {
    rows: Vec<Vec<&'a str>>,
}

impl<'a> Observation<'a> {
    pub fn new(instance: &'a Instance, vocabulary: &'a Vocabulary) -> Self {
        let rows = instance
            .tokens()
            .map(|token| {
                let mut row: Vec<&str> = token.columns.iter().map(String::as_str).collect();
                if let Some(word) = row.first_mut() {
                    *word = vocabulary.resolve(*word);
                }
                row
            })
            .collect();
        Self { rows }
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn cell(&self, row: usize, col: usize) -> io::Result<&'a str> {
        self.rows[row].get(col).copied().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("token {} has no column {}", row, col),
            )
        })
    }
}

/// A feature produced by one template at one position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeatureDescriptor {
    pub kind: TemplateKind,
    /// Expanded template text, shared by every tag combination
    pub key: String,
}

impl FeatureDescriptor {
    /// Fully tag-qualified feature name
    pub fn name(&self, prev: &str, cur: &str) -> String {
        match self.kind {
            TemplateKind::Unigram => format!("{}|{}", self.key, cur),
            TemplateKind::Bigram => format!("{}|{}|{}", self.key, prev, cur),
        }
    }
}

/// An ordered list of templates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateSet {
    templates: Vec<Template>,
}

impl TemplateSet {
    pub fn new<I, S>(templates: I) -> io::Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let templates = templates
            .into_iter()
            .map(|t| Template::parse(t.as_ref()))
            .collect::<io::Result<Vec<_>>>()?;
        if templates.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "at least one template is required",
            ));
        }
        Ok(Self { templates })
    }

    /// Parse one template per line, skipping blank lines and `#` comments
    pub fn parse(text: &str) -> io::Result<Self> {
        Self::new(
            text.lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#')),
        )
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Template> + '_ {
        self.templates.iter()
    }

    /// Expand every template at `position`, in template order
    ///
    /// Expansion does not depend on tags; the tag pair only enters through
    /// [`FeatureDescriptor::name`].
    pub fn generate(
        &self,
        observation: &Observation<'_>,
        position: usize,
    ) -> io::Result<Vec<FeatureDescriptor>> {
        self.templates
            .iter()
            .map(|template| {
                Ok(FeatureDescriptor {
                    kind: template.kind,
                    key: template.expand(observation, position)?,
                })
            })
            .collect()
    }
}

impl Default for TemplateSet {
    fn default() -> Self {
        Self {
            templates: vec![
                Template::parse("U00:%x[0,0]").expect("valid default template"),
                Template::parse("B").expect("valid default template"),
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::Token;

    fn observation_fixture() -> (Instance, Vocabulary) {
        let mut inst = Instance::default();
        inst.push(Token::with_columns(["The", "DT"]), None);
        inst.push(Token::with_columns(["cat", "NN"]), None);
        inst.push(Token::with_columns(["2024", "CD"]), None);
        let vocab = Vocabulary::build(["The", "cat", "7"]);
        (inst, vocab)
    }

    #[test]
    fn test_parse_kinds() {
        assert_eq!(Template::parse("U00:%x[0,0]").unwrap().kind(), TemplateKind::Unigram);
        assert_eq!(Template::parse("B").unwrap().kind(), TemplateKind::Bigram);
        let err = Template::parse("X01:%x[0,0]").unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        assert!(Template::parse("").is_err());
    }

    #[test]
    fn test_expand_macros() {
        let (inst, vocab) = observation_fixture();
        let obs = Observation::new(&inst, &vocab);
        let t = Template::parse("U05:%x[-1,0]/%x[0,0]/%x[0,1]").unwrap();
        assert_eq!(t.expand(&obs, 1).unwrap(), "U05:The/cat/NN");
        // Numbers collapse through the vocabulary
        assert_eq!(t.expand(&obs, 2).unwrap(), "U05:cat/-NUM-/CD");
    }

    #[test]
    fn test_expand_boundaries() {
        let (inst, vocab) = observation_fixture();
        let obs = Observation::new(&inst, &vocab);
        let t = Template::parse("U:%x[-2,0]|%x[1,0]").unwrap();
        assert_eq!(t.expand(&obs, 0).unwrap(), "U:_B-2|cat");
        assert_eq!(t.expand(&obs, 2).unwrap(), "U:The|_B+1");
        // The END anchor sits one past the last token
        let t = Template::parse("U:%x[0,0]").unwrap();
        assert_eq!(t.expand(&obs, 3).unwrap(), "U:_B+1");
    }

    #[test]
    fn test_expand_unknown_word_and_missing_column() {
        let (inst, _) = observation_fixture();
        let vocab = Vocabulary::build(["dog"]);
        let obs = Observation::new(&inst, &vocab);
        let t = Template::parse("U:%x[0,0]").unwrap();
        assert_eq!(t.expand(&obs, 1).unwrap(), "U:-UNK-");

        let t = Template::parse("U:%x[0,5]").unwrap();
        assert_eq!(
            t.expand(&obs, 1).unwrap_err().kind(),
            io::ErrorKind::InvalidInput
        );
    }

    #[test]
    fn test_expand_rejects_overflowing_offset() {
        let (inst, vocab) = observation_fixture();
        let obs = Observation::new(&inst, &vocab);
        let template = Template::parse("U:%x[9223372036854775807,0]").unwrap();
        let err = template.expand(&obs, 1).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
        let key = template.expand(&obs, 0).unwrap();
        assert!(key.starts_with("U:_B+"));
    }

    #[test]
    fn test_template_set_parse() {
        let set = TemplateSet::parse("# comment\nU00:%x[0,0]\n\n  B  \n").unwrap();
        assert_eq!(set.len(), 2);
        let kinds: Vec<_> = set.iter().map(Template::kind).collect();
        assert_eq!(kinds, vec![TemplateKind::Unigram, TemplateKind::Bigram]);

        assert!(TemplateSet::parse("# nothing\n").is_err());
    }

    #[test]
    fn test_generate_and_names() {
        let (inst, vocab) = observation_fixture();
        let obs = Observation::new(&inst, &vocab);
        let set = TemplateSet::default();
        let descriptors = set.generate(&obs, 1).unwrap();
        assert_eq!(descriptors.len(), 2);
        assert_eq!(descriptors[0].key, "U00:cat");
        assert_eq!(descriptors[0].name("DT", "NN"), "U00:cat|NN");
        assert_eq!(descriptors[1].key, "B");
        assert_eq!(descriptors[1].name("DT", "NN"), "B|DT|NN");
    }
}
