use std::io::{self, BufRead};

/// A token with one or more observation columns
///
/// Column 0 is the surface word; further columns (part-of-speech, chunk
/// tags, ...) are addressable from feature templates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    /// Observation columns, the word first
    pub columns: Vec<String>,
}

impl Token {
    /// Create a token with a single word column
    pub fn new<T: Into<String>>(word: T) -> Self {
        Self {
            columns: vec![word.into()],
        }
    }

    /// Create a token from several columns
    pub fn with_columns<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            columns: columns.into_iter().map(Into::into).collect(),
        }
    }

    /// The surface word (column 0)
    pub fn word(&self) -> &str {
        self.columns.first().map(String::as_str).unwrap_or("")
    }
}

impl From<&str> for Token {
    fn from(word: &str) -> Self {
        Self::new(word)
    }
}

impl From<String> for Token {
    fn from(word: String) -> Self {
        Self::new(word)
    }
}

/// A token paired with its gold tag, if any
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaggedToken {
    pub token: Token,
    pub tag: Option<String>,
}

/// An instance is an ordered sequence of tokens with optional gold tags
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Instance {
    pub items: Vec<TaggedToken>,
}

impl Instance {
    pub fn with_capacity(cap: usize) -> Self {
        Self {
            items: Vec::with_capacity(cap),
        }
    }

    /// Build a fully tagged instance from `(word, tag)` pairs
    pub fn tagged<W, T>(pairs: &[(W, T)]) -> Self
    where
        W: AsRef<str>,
        T: AsRef<str>,
    {
        let mut instance = Self::with_capacity(pairs.len());
        for (word, tag) in pairs {
            instance.push(Token::new(word.as_ref()), Some(tag.as_ref().to_string()));
        }
        instance
    }

    /// Build an untagged instance from words
    pub fn untagged<W: AsRef<str>>(words: &[W]) -> Self {
        let mut instance = Self::with_capacity(words.len());
        for word in words {
            instance.push(Token::new(word.as_ref()), None);
        }
        instance
    }

    pub fn push(&mut self, token: Token, tag: Option<String>) {
        self.items.push(TaggedToken { token, tag });
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn tokens(&self) -> impl Iterator<Item = &Token> + '_ {
        self.items.iter().map(|item| &item.token)
    }

    /// Gold tags in order; `None` for untagged tokens
    pub fn tags(&self) -> impl Iterator<Item = Option<&str>> + '_ {
        self.items.iter().map(|item| item.tag.as_deref())
    }
}

/// Read a whitespace-separated column corpus
///
/// One token per line, a blank line ends a sentence. When `tagged` is set the
/// last column of each line is the gold tag and must be present alongside at
/// least one observation column.
pub fn read_conll<R: BufRead>(reader: R, tagged: bool) -> io::Result<Vec<Instance>> {
    let mut instances = Vec::new();
    let mut current = Instance::default();

    for (lineno, line) in reader.lines().enumerate() {
        let line = line?;
        let mut columns: Vec<&str> = line.split_whitespace().collect();
        if columns.is_empty() {
            if !current.is_empty() {
                instances.push(std::mem::take(&mut current));
            }
            continue;
        }
        let tag = if tagged {
            if columns.len() < 2 {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("line {}: expected at least one column and a tag", lineno + 1),
                ));
            }
            columns.pop().map(str::to_string)
        } else {
            None
        };
        current.push(Token::with_columns(columns), tag);
    }
    if !current.is_empty() {
        instances.push(current);
    }
    Ok(instances)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instance_builders() {
        let inst = Instance::tagged(&[("cat", "N"), ("runs", "V")]);
        assert_eq!(inst.len(), 2);
        assert_eq!(inst.tags().collect::<Vec<_>>(), vec![Some("N"), Some("V")]);

        let inst = Instance::untagged(&["cat"]);
        assert_eq!(inst.tags().collect::<Vec<_>>(), vec![None]);
        assert_eq!(inst.tokens().next().unwrap().word(), "cat");
    }

    #[test]
    fn test_read_conll_tagged() {
        let data = "The DT B-NP\ncat NN I-NP\n\n\nruns VBZ B-VP\n";
        let instances = read_conll(data.as_bytes(), true).unwrap();
        assert_eq!(instances.len(), 2);
        assert_eq!(instances[0].len(), 2);
        let first = &instances[0].items[1];
        assert_eq!(first.token.columns, vec!["cat", "NN"]);
        assert_eq!(first.tag.as_deref(), Some("I-NP"));
        assert_eq!(instances[1].items[0].tag.as_deref(), Some("B-VP"));
    }

    #[test]
    fn test_read_conll_untagged() {
        let data = "The DT\ncat NN";
        let instances = read_conll(data.as_bytes(), false).unwrap();
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0].items[0].token.columns, vec!["The", "DT"]);
        assert!(instances[0].items[0].tag.is_none());
    }

    #[test]
    fn test_read_conll_missing_tag() {
        let err = read_conll("lonely\n".as_bytes(), true).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }
}
