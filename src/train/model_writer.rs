use std::io::{self, Seek, SeekFrom, Write};

use cqdb::CQDBWriter;

use crate::dictionary::Dictionary;
use crate::feature::TagIndex;
use crate::model::{Header, Model, FORMAT_VERSION, HEADER_SIZE, MAGIC, MODEL_TYPE};

/// Serialize a trained model
///
/// Layout: fixed header, templates chunk, four CQDB string tables (words,
/// tags, feature names, context keys), tag index chunk, weights chunk. All
/// integers are little-endian `u32`, weights are `f64`.
pub struct ModelWriter;

impl ModelWriter {
    pub fn write<W: Write + Seek>(writer: &mut W, model: &Model) -> io::Result<()> {
        let base = writer.stream_position()?;
        let pos = |w: &mut W| -> io::Result<u32> {
            let p = w.stream_position()? - base;
            u32::try_from(p).map_err(|_| {
                io::Error::new(io::ErrorKind::InvalidData, "file position exceeds u32::MAX")
            })
        };

        writer.write_all(&[0u8; HEADER_SIZE])?;

        let off_templates = pos(writer)?;
        let templates: Vec<&str> = model.templates().iter().map(|t| t.source()).collect();
        Self::write_templates(writer, &templates)?;

        let off_words = pos(writer)?;
        Self::write_cqdb(writer, model.vocabulary().dictionary())?;

        let off_tags = pos(writer)?;
        Self::write_cqdb(writer, model.tags().dictionary())?;

        let off_features = pos(writer)?;
        Self::write_cqdb(writer, model.features().names())?;

        let off_contexts = pos(writer)?;
        Self::write_cqdb(writer, model.features().contexts())?;

        Self::align_to_u32(writer, base)?;
        let off_tag_indices = pos(writer)?;
        Self::write_tag_indices(writer, model.features().tag_indices())?;

        let off_weights = pos(writer)?;
        Self::write_weights(writer, model.weights())?;

        let size = pos(writer)?;
        let header = Header {
            size,
            version: FORMAT_VERSION,
            num_templates: to_u32(model.templates().len(), "template count")?,
            num_words: to_u32(model.vocabulary().len(), "word count")?,
            num_tags: to_u32(model.tags().len(), "tag count")?,
            num_features: to_u32(model.features().num_features(), "feature count")?,
            num_contexts: to_u32(model.features().num_contexts(), "context count")?,
            off_templates,
            off_words,
            off_tags,
            off_features,
            off_contexts,
            off_tag_indices,
            off_weights,
        };
        writer.seek(SeekFrom::Start(base))?;
        Self::write_header(writer, &header)?;
        writer.seek(SeekFrom::Start(base + u64::from(size)))?;
        writer.flush()
    }

    fn write_header<W: Write>(writer: &mut W, header: &Header) -> io::Result<()> {
        writer.write_all(MAGIC)?;
        writer.write_all(&header.size.to_le_bytes())?;
        writer.write_all(MODEL_TYPE)?;
        for value in [
            header.version,
            header.num_templates,
            header.num_words,
            header.num_tags,
            header.num_features,
            header.num_contexts,
            header.off_templates,
            header.off_words,
            header.off_tags,
            header.off_features,
            header.off_contexts,
            header.off_tag_indices,
            header.off_weights,
        ] {
            writer.write_all(&value.to_le_bytes())?;
        }
        Ok(())
    }

    fn align_to_u32<W: Write + Seek>(writer: &mut W, base: u64) -> io::Result<()> {
        let mut pos = writer.stream_position()? - base;
        while pos % 4 != 0 {
            writer.write_all(&[0])?;
            pos += 1;
        }
        Ok(())
    }

    fn write_cqdb<W: Write + Seek>(writer: &mut W, dict: &Dictionary) -> io::Result<()> {
        let mut db = CQDBWriter::new(&mut *writer)?;
        for (s, id) in dict.iter() {
            db.put(s, id)?;
        }
        // The database is finalized when the writer is dropped
        Ok(())
    }

    /// Chunk header: four-byte id, total chunk size, item count
    fn begin_chunk<W: Write>(
        writer: &mut W,
        id: &[u8; 4],
        size: usize,
        count: usize,
    ) -> io::Result<()> {
        writer.write_all(id)?;
        writer.write_all(&to_u32(size, "chunk size")?.to_le_bytes())?;
        writer.write_all(&to_u32(count, "chunk item count")?.to_le_bytes())?;
        Ok(())
    }

    fn write_templates<W: Write>(writer: &mut W, templates: &[&str]) -> io::Result<()> {
        let payload: usize = templates.iter().map(|t| 4 + t.len()).sum();
        Self::begin_chunk(writer, b"TPLS", 12 + payload, templates.len())?;
        for template in templates {
            writer.write_all(&to_u32(template.len(), "template length")?.to_le_bytes())?;
            writer.write_all(template.as_bytes())?;
        }
        Ok(())
    }

    fn write_tag_indices<W: Write>(writer: &mut W, indices: &[TagIndex]) -> io::Result<()> {
        let payload: usize = indices.iter().map(|ti| 8 + 12 * ti.entries().len()).sum();
        Self::begin_chunk(writer, b"TIDX", 12 + payload, indices.len())?;
        for index in indices {
            writer.write_all(&(index.kind() as u32).to_le_bytes())?;
            writer.write_all(&to_u32(index.entries().len(), "tag index length")?.to_le_bytes())?;
            for entry in index.entries() {
                writer.write_all(&entry.prev.to_le_bytes())?;
                writer.write_all(&entry.cur.to_le_bytes())?;
                writer.write_all(&entry.slot.to_le_bytes())?;
            }
        }
        Ok(())
    }

    fn write_weights<W: Write>(writer: &mut W, weights: &[f64]) -> io::Result<()> {
        Self::begin_chunk(writer, b"WGHT", 12 + 8 * weights.len(), weights.len())?;
        for weight in weights {
            writer.write_all(&weight.to_le_bytes())?;
        }
        Ok(())
    }
}

fn to_u32(value: usize, what: &str) -> io::Result<u32> {
    u32::try_from(value).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidData,
            format!("{} exceeds u32::MAX", what),
        )
    })
}
