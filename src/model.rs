use std::fs::{self, File};
use std::io::{self, Cursor, Write};
use std::path::Path;

use bstr::ByteSlice;
use cqdb::CQDB;

use crate::dictionary::Dictionary;
use crate::feature::{FeatureIndex, TagIndex, ANY_TAG};
use crate::tagger::Tagger;
use crate::template::{TemplateKind, TemplateSet};
use crate::train::ModelWriter;
use crate::vocabulary::{TagSet, Vocabulary};

pub(crate) const MAGIC: &[u8; 4] = b"lCRF";
pub(crate) const MODEL_TYPE: &[u8; 4] = b"TMPL";
pub(crate) const FORMAT_VERSION: u32 = 1;
pub(crate) const HEADER_SIZE: usize = 64;

const CHUNK_SIZE: usize = 12;

#[inline]
fn unpack_u32(buf: &[u8], offset: usize) -> io::Result<u32> {
    match buf.get(offset..offset + 4) {
        Some(b) => Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]])),
        None => Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "not enough data for unpacking u32",
        )),
    }
}

#[inline]
fn unpack_f64(buf: &[u8], offset: usize) -> io::Result<f64> {
    match buf.get(offset..offset + 8) {
        Some(b) => Ok(f64::from_le_bytes([
            b[0], b[1], b[2], b[3], b[4], b[5], b[6], b[7],
        ])),
        None => Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "not enough data for unpacking f64",
        )),
    }
}

fn invalid(msg: impl Into<String>) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg.into())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Header {
    pub size: u32,
    pub version: u32,
    pub num_templates: u32,
    pub num_words: u32,
    pub num_tags: u32,
    pub num_features: u32,
    pub num_contexts: u32,
    pub off_templates: u32,
    pub off_words: u32,
    pub off_tags: u32,
    pub off_features: u32,
    pub off_contexts: u32,
    pub off_tag_indices: u32,
    pub off_weights: u32,
}

impl Header {
    fn parse(buf: &[u8]) -> io::Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(invalid("invalid model format"));
        }
        if &buf[0..4] != MAGIC {
            return Err(invalid("invalid file format, magic mismatch"));
        }
        if &buf[8..12] != MODEL_TYPE {
            return Err(invalid("invalid file format, unknown model type"));
        }
        let field = |i: usize| unpack_u32(buf, 12 + 4 * i);
        let header = Self {
            size: unpack_u32(buf, 4)?,
            version: field(0)?,
            num_templates: field(1)?,
            num_words: field(2)?,
            num_tags: field(3)?,
            num_features: field(4)?,
            num_contexts: field(5)?,
            off_templates: field(6)?,
            off_words: field(7)?,
            off_tags: field(8)?,
            off_features: field(9)?,
            off_contexts: field(10)?,
            off_tag_indices: field(11)?,
            off_weights: field(12)?,
        };
        if header.version != FORMAT_VERSION {
            return Err(invalid(format!(
                "unsupported model version {}",
                header.version
            )));
        }
        if header.size as usize > buf.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "model file is truncated",
            ));
        }
        Ok(header)
    }
}

/// Check a chunk header and return the offset of its first item
fn open_chunk(buf: &[u8], offset: u32, id: &[u8; 4], count: u32) -> io::Result<usize> {
    let offset = offset as usize;
    match buf.get(offset..offset + 4) {
        Some(found) if found == id => {}
        Some(_) => {
            return Err(invalid(format!(
                "missing {} chunk",
                id.to_str_lossy()
            )))
        }
        None => {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "chunk offset past the end of the model",
            ))
        }
    }
    let size = unpack_u32(buf, offset + 4)? as usize;
    if offset + size > buf.len() {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("{} chunk is truncated", id.to_str_lossy()),
        ));
    }
    if unpack_u32(buf, offset + 8)? != count {
        return Err(invalid(format!(
            "{} chunk count does not match the header",
            id.to_str_lossy()
        )));
    }
    Ok(offset + CHUNK_SIZE)
}

fn read_dictionary(buf: &[u8], offset: u32, count: u32) -> io::Result<Dictionary> {
    let start = offset as usize;
    if start >= buf.len() {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "dictionary offset past the end of the model",
        ));
    }
    let db = CQDB::new(&buf[start..])?;
    let mut dict = Dictionary::new();
    for id in 0..count {
        let name = db
            .to_str(id)
            .and_then(|s| s.to_str().ok())
            .ok_or_else(|| invalid(format!("missing dictionary entry {}", id)))?;
        if dict.get_or_insert(name) != id {
            return Err(invalid(format!("duplicate dictionary entry {:?}", name)));
        }
    }
    Ok(dict)
}

fn read_templates(buf: &[u8], header: &Header) -> io::Result<TemplateSet> {
    let mut index = open_chunk(buf, header.off_templates, b"TPLS", header.num_templates)?;
    let mut sources = Vec::with_capacity(header.num_templates as usize);
    for _ in 0..header.num_templates {
        let len = unpack_u32(buf, index)? as usize;
        index += 4;
        let bytes = buf.get(index..index + len).ok_or_else(|| {
            io::Error::new(io::ErrorKind::UnexpectedEof, "template is truncated")
        })?;
        let source = bytes
            .to_str()
            .map_err(|_| invalid("template is not valid UTF-8"))?;
        sources.push(source);
        index += len;
    }
    TemplateSet::new(sources).map_err(|e| invalid(format!("invalid template: {}", e)))
}

fn read_tag_indices(buf: &[u8], header: &Header) -> io::Result<Vec<TagIndex>> {
    let mut index = open_chunk(buf, header.off_tag_indices, b"TIDX", header.num_contexts)?;
    let mut indices = Vec::with_capacity(header.num_contexts as usize);
    for _ in 0..header.num_contexts {
        let kind = TemplateKind::from_u32(unpack_u32(buf, index)?)
            .ok_or_else(|| invalid("unknown template kind"))?;
        let count = unpack_u32(buf, index + 4)?;
        index += 8;
        let mut tag_index = TagIndex::new(kind);
        for _ in 0..count {
            let prev = unpack_u32(buf, index)?;
            let cur = unpack_u32(buf, index + 4)?;
            let slot = unpack_u32(buf, index + 8)?;
            index += 12;
            let prev_ok = match kind {
                TemplateKind::Unigram => prev == ANY_TAG,
                TemplateKind::Bigram => prev < header.num_tags,
            };
            if !prev_ok || cur >= header.num_tags {
                return Err(invalid("tag index refers to an unknown tag"));
            }
            tag_index.insert(prev, cur, slot);
        }
        indices.push(tag_index);
    }
    Ok(indices)
}

fn read_weights(buf: &[u8], header: &Header) -> io::Result<Vec<f64>> {
    let index = open_chunk(buf, header.off_weights, b"WGHT", header.num_features)?;
    (0..header.num_features as usize)
        .map(|i| unpack_f64(buf, index + 8 * i))
        .collect()
}

/// A trained linear-chain CRF
///
/// Owns everything decoding needs: the template set, the frozen word and tag
/// indices, the feature index table and one weight per feature slot.
#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    templates: TemplateSet,
    vocabulary: Vocabulary,
    tags: TagSet,
    features: FeatureIndex,
    weights: Vec<f64>,
}

impl Model {
    pub fn new(
        templates: TemplateSet,
        vocabulary: Vocabulary,
        tags: TagSet,
        features: FeatureIndex,
        weights: Vec<f64>,
    ) -> io::Result<Self> {
        if weights.len() != features.num_features() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "{} weights for {} features",
                    weights.len(),
                    features.num_features()
                ),
            ));
        }
        Ok(Self {
            templates,
            vocabulary,
            tags,
            features,
            weights,
        })
    }

    pub fn templates(&self) -> &TemplateSet {
        &self.templates
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocabulary
    }

    pub fn tags(&self) -> &TagSet {
        &self.tags
    }

    pub fn features(&self) -> &FeatureIndex {
        &self.features
    }

    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    /// Number of tags, sentinels included
    pub fn num_tags(&self) -> usize {
        self.tags.len()
    }

    pub fn num_features(&self) -> usize {
        self.features.num_features()
    }

    /// Weight of a fully qualified feature name
    pub fn weight(&self, name: &str) -> Option<f64> {
        self.features
            .slot(name)
            .map(|slot| self.weights[slot as usize])
    }

    /// Get a new tagger
    pub fn tagger(&self) -> Tagger<'_> {
        Tagger::new(self)
    }

    /// Write the model to a file
    pub fn save<P: AsRef<Path>>(&self, path: P) -> io::Result<()> {
        let mut file = File::create(path)?;
        ModelWriter::write(&mut file, self)
    }

    pub fn to_bytes(&self) -> io::Result<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::new());
        ModelWriter::write(&mut cursor, self)?;
        Ok(cursor.into_inner())
    }

    /// Read a model from a file
    pub fn load<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let buf = fs::read(path)?;
        Self::from_bytes(&buf)
    }

    /// Read a model from its serialized form
    pub fn from_bytes(buf: &[u8]) -> io::Result<Self> {
        let header = Header::parse(buf)?;
        let buf = &buf[..header.size as usize];

        let templates = read_templates(buf, &header)?;
        let words = read_dictionary(buf, header.off_words, header.num_words)?;
        let tags = read_dictionary(buf, header.off_tags, header.num_tags)?;
        let names = read_dictionary(buf, header.off_features, header.num_features)?;
        let contexts = read_dictionary(buf, header.off_contexts, header.num_contexts)?;
        let tag_indices = read_tag_indices(buf, &header)?;
        let weights = read_weights(buf, &header)?;

        let vocabulary = Vocabulary::from_dictionary(words)?;
        let tags = TagSet::from_dictionary(tags)?;
        let features = FeatureIndex::from_parts(names, contexts, tag_indices)?;
        Self::new(templates, vocabulary, tags, features, weights)
            .map_err(|e| invalid(e.to_string()))
    }

    /// Print the model in human-readable format
    pub fn dump<W: Write>(&self, w: &mut W) -> io::Result<()> {
        writeln!(w, "TEMPLATES = {{")?;
        for template in self.templates.iter() {
            writeln!(w, "  {}", template)?;
        }
        writeln!(w, "}}\n")?;

        writeln!(w, "TAGS = {{")?;
        for (name, id) in self.tags.dictionary().iter() {
            writeln!(w, "  {:>5}: {}", id, name)?;
        }
        writeln!(w, "}}\n")?;

        writeln!(w, "FEATURES = {{")?;
        for (name, slot) in self.features.names().iter() {
            writeln!(w, "  {:>5}: {} = {:.6}", slot, name, self.weights[slot as usize])?;
        }
        writeln!(w, "}}\n")?;
        Ok(())
    }
}
