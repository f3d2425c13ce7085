//! Section body serialization
//!
//! The column table is archived with rkyv. Words are stored flat with a
//! per-column length table, which keeps the archive free of nested vectors.

use std::io::{Read, Write};

use rkyv::{Archive, Deserialize, Serialize};

use super::{SourceKind, SECTION_COLUMNS};
use crate::core::error::{LodError, Result};
use crate::math::QuadPos;

/// Serializable section body
#[derive(Archive, Deserialize, Serialize, Debug, PartialEq)]
pub struct SectionArchive {
    pub kind: u8,
    pub version: u8,
    pub detail: u8,
    pub x: i32,
    pub z: i32,
    /// Material keys in id order (empty for render sources)
    pub palette: Vec<String>,
    /// Number of words in each column, row-major by (z, x)
    pub column_lengths: Vec<u16>,
    /// All column words, top to bottom per column
    pub words: Vec<u64>,
}

impl SectionArchive {
    /// Flatten columns of raw words
    pub fn from_columns<'a, I>(kind: SourceKind, version: u8, pos: QuadPos, palette: Vec<String>, columns: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a [u64]>,
    {
        let mut column_lengths = Vec::with_capacity(SECTION_COLUMNS);
        let mut words = Vec::new();
        for column in columns {
            let len = u16::try_from(column.len()).map_err(|_| LodError::EncodingRange {
                field: "column length",
                value: column.len() as i64,
                reason: "exceeds u16",
            })?;
            column_lengths.push(len);
            words.extend_from_slice(column);
        }
        Ok(Self {
            kind: kind.tag(),
            version,
            detail: pos.detail,
            x: pos.x,
            z: pos.z,
            palette,
            column_lengths,
            words,
        })
    }

    pub fn pos(&self) -> QuadPos {
        QuadPos::new(self.detail, self.x, self.z)
    }

    /// Write the archive bytes to `out`
    pub fn write_to(&self, out: &mut dyn Write) -> Result<()> {
        let bytes = rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map_err(|e| LodError::Io(std::io::Error::other(e.to_string())))?;
        out.write_all(&bytes)?;
        Ok(())
    }

    /// Read an archive to the end of `input` and check it against the expected section
    pub fn read_from(input: &mut dyn Read, kind: SourceKind, pos: QuadPos) -> Result<Self> {
        let mut bytes = Vec::new();
        input.read_to_end(&mut bytes)?;

        // rkyv validates against an aligned buffer
        let mut aligned = rkyv::util::AlignedVec::<16>::with_capacity(bytes.len());
        aligned.extend_from_slice(&bytes);

        let archive = rkyv::from_bytes::<SectionArchive, rkyv::rancor::Error>(&aligned)
            .map_err(|e| LodError::corrupt("", format!("section archive: {}", e)))?;
        archive.validate(kind, pos)?;
        Ok(archive)
    }

    fn validate(&self, kind: SourceKind, pos: QuadPos) -> Result<()> {
        if self.kind != kind.tag() {
            return Err(LodError::corrupt("", format!("archive kind {} in a {:?} file", self.kind, kind)));
        }
        if self.pos() != pos {
            return Err(LodError::corrupt("", format!("archive for {} in the file of {}", self.pos(), pos)));
        }
        if self.column_lengths.len() != SECTION_COLUMNS {
            return Err(LodError::corrupt("", format!("{} columns, expected {}", self.column_lengths.len(), SECTION_COLUMNS)));
        }
        let total: usize = self.column_lengths.iter().map(|&l| l as usize).sum();
        if total != self.words.len() {
            return Err(LodError::corrupt("", format!("column table covers {} words, archive has {}", total, self.words.len())));
        }
        Ok(())
    }

    /// Split the flat word list back into columns
    pub fn columns(&self) -> Vec<&[u64]> {
        let mut out = Vec::with_capacity(self.column_lengths.len());
        let mut offset = 0usize;
        for &len in &self.column_lengths {
            let end = offset + len as usize;
            out.push(&self.words[offset..end]);
            offset = end;
        }
        out
    }
}
