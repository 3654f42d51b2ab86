//! Package descriptor parsing.
//!
//! A descriptor is a line-oriented text file listing a package identity, the
//! data file it describes, and the expected hash of every tree node:
//!
//! ```text
//! ident:<hex, 1024 chars or more>
//! filename:<path>
//! size:<u32>
//! nhashes:<u32>
//! hashes:
//! \t<hex hash>
//! nchunks:<u32>
//! chunks:
//! \t<hex hash>,<u32 offset>,<u32 size>
//! ```
//!
//! Labels must match byte for byte, every line ends with a newline, entries
//! are indented with exactly one tab, and the file ends immediately after the
//! last chunk line. Parsing either yields a fully valid [`Package`] or an
//! error; no partially parsed state escapes.

use std::fs::File;
use std::io::ErrorKind;
use std::path::Path;

use log::debug;
use thiserror::Error;

use crate::hash;

#[derive(Debug, Error)]
pub enum ParseError {
  #[error("cannot open descriptor")]
  MissingFile(#[source] std::io::Error),
  #[error("descriptor is empty")]
  EmptyFile,
  #[error("descriptor is not UTF-8 text")]
  NotText,
  #[error("malformed {0:?} label")]
  MalformedLabel(&'static str),
  #[error("missing value for {0}")]
  MissingValue(&'static str),
  #[error("identifier is not a hex string of at least {} characters", hash::MIN_IDENT_LEN)]
  InvalidIdentifier,
  #[error("entry {0} is not a well-formed hash")]
  InvalidHash(usize),
  #[error("invalid {0} value")]
  InvalidNumber(&'static str),
  #[error("{list} list does not match its declared count of {declared}")]
  CountMismatch { list: &'static str, declared: u32 },
  #[error("line is not newline-terminated")]
  UnterminatedLine,
  #[error("unexpected end of descriptor")]
  TruncatedInput,
  #[error("trailing data after the chunk list")]
  TrailingData,
}

/// One leaf entry of the descriptor's chunk table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
  pub hash: String,
  pub offset: u32,
  pub size: u32,
}

/// Parsed descriptor. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct Package {
  pub ident: String,
  pub filename: String,
  pub total_size: u32,
  /// Internal-node expected hashes in top-down, left-to-right level order.
  pub hashes: Vec<String>,
  /// Leaf entries in ascending offset order.
  pub chunks: Vec<Chunk>,
}

/// Outcome of [`Package::ensure_data_file`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
  Exists,
  Created,
}

impl Package {
  /// Parse the descriptor at `path`.
  ///
  /// This is the only parsing entry point; callers that only need a validity
  /// check can use `Package::load(path).is_ok()`.
  pub fn load<P: AsRef<Path>>(path: P) -> Result<Package, ParseError> {
    let bytes = std::fs::read(path.as_ref()).map_err(ParseError::MissingFile)?;
    if bytes.is_empty() {
      return Err(ParseError::EmptyFile);
    }
    let text = std::str::from_utf8(&bytes).map_err(|_| ParseError::NotText)?;

    let mut scanner = Scanner { rest: text };
    let package = scanner.package()?;
    debug!(
      "loaded package {}...: {} internal hashes, {} chunks",
      &package.ident[..16],
      package.hashes.len(),
      package.chunks.len()
    );
    Ok(package)
  }

  /// Number of leaves of the package's hash tree.
  pub fn chunk_count(&self) -> usize {
    self.chunks.len()
  }

  /// Make sure the data file referenced by the descriptor exists, creating it
  /// at the declared size if it does not. Run this before building the tree.
  pub fn ensure_data_file(&self) -> std::io::Result<FileStatus> {
    let path = Path::new(&self.filename);
    match path.metadata() {
      Ok(_) => Ok(FileStatus::Exists),
      Err(e) if e.kind() == ErrorKind::NotFound => {
        let file = File::create(path)?;
        file.set_len(self.total_size as u64)?;
        debug!("created data file {} ({} bytes)", self.filename, self.total_size);
        Ok(FileStatus::Created)
      }
      Err(e) => Err(e),
    }
  }
}

/// Strict cursor over the descriptor text.
struct Scanner<'a> {
  rest: &'a str,
}

impl<'a> Scanner<'a> {
  fn package(&mut self) -> Result<Package, ParseError> {
    let ident = self.labeled("ident")?;
    if !hash::is_well_formed_ident(ident) {
      return Err(ParseError::InvalidIdentifier);
    }

    let filename = self.labeled("filename")?;
    if filename.is_empty() {
      return Err(ParseError::MissingValue("filename"));
    }

    let total_size = parse_u32(self.labeled("size")?, "size")?;

    let nhashes = parse_u32(self.labeled("nhashes")?, "nhashes")?;
    self.bare_label("hashes")?;
    let hashes = self.hash_entries(nhashes)?;

    let nchunks = parse_u32(self.labeled("nchunks")?, "nchunks")?;
    self.bare_label("chunks")?;
    let chunks = self.chunk_entries(nchunks)?;

    // The descriptor ends with the chunk table; anything after it is a
    // format error, with extra entries reported as a count mismatch.
    if self.rest.starts_with('\t') {
      return Err(ParseError::CountMismatch { list: "chunks", declared: nchunks });
    }
    if !self.rest.is_empty() {
      return Err(ParseError::TrailingData);
    }

    let ident = ident.to_string();
    let filename = filename.to_string();
    Ok(Package { ident, filename, total_size, hashes, chunks })
  }

  /// Consume one newline-terminated line.
  fn line(&mut self) -> Result<&'a str, ParseError> {
    match self.rest.find('\n') {
      Some(end) => {
        let line = &self.rest[..end];
        self.rest = &self.rest[end + 1..];
        Ok(line)
      }
      None if self.rest.is_empty() => Err(ParseError::TruncatedInput),
      None => Err(ParseError::UnterminatedLine),
    }
  }

  /// Consume a `label:value` line and return the value.
  fn labeled(&mut self, label: &'static str) -> Result<&'a str, ParseError> {
    let line = self.line()?;
    line
      .strip_prefix(label)
      .and_then(|rest| rest.strip_prefix(':'))
      .ok_or(ParseError::MalformedLabel(label))
  }

  /// Consume a `label:` line that carries no value.
  fn bare_label(&mut self, label: &'static str) -> Result<(), ParseError> {
    let value = self.labeled(label)?;
    if value.is_empty() { Ok(()) } else { Err(ParseError::MalformedLabel(label)) }
  }

  fn hash_entries(&mut self, declared: u32) -> Result<Vec<String>, ParseError> {
    let mut hashes = Vec::with_capacity(declared as usize);
    for i in 0..declared {
      let value = self.entry("hashes", declared)?;
      if !hash::is_well_formed(value) {
        return Err(ParseError::InvalidHash(i as usize));
      }
      hashes.push(value.to_string());
    }
    if self.rest.starts_with('\t') {
      return Err(ParseError::CountMismatch { list: "hashes", declared });
    }
    Ok(hashes)
  }

  fn chunk_entries(&mut self, declared: u32) -> Result<Vec<Chunk>, ParseError> {
    let mut chunks = Vec::with_capacity(declared as usize);
    for i in 0..declared {
      let value = self.entry("chunks", declared)?;
      let (hash_text, rest) = value.split_once(',').ok_or(ParseError::MissingValue("offset"))?;
      if !hash::is_well_formed(hash_text) {
        return Err(ParseError::InvalidHash(i as usize));
      }
      let (offset, size) = rest.split_once(',').ok_or(ParseError::MissingValue("size"))?;
      let offset = parse_u32(offset, "offset")?;
      let size = parse_u32(size, "size")?;
      chunks.push(Chunk { hash: hash_text.to_string(), offset, size });
    }
    Ok(chunks)
  }

  /// Consume one tab-indented entry line.
  fn entry(&mut self, list: &'static str, declared: u32) -> Result<&'a str, ParseError> {
    let line = self.line()?;
    line.strip_prefix('\t').ok_or(ParseError::CountMismatch { list, declared })
  }
}

fn parse_u32(value: &str, field: &'static str) -> Result<u32, ParseError> {
  value.parse::<u32>().map_err(|_| ParseError::InvalidNumber(field))
}

#[cfg(test)]
mod tests {
  use std::io::Write;

  use tempfile::NamedTempFile;

  use super::*;
  use crate::hash::digest;

  fn valid_text() -> String {
    let ident = "ab".repeat(512);
    let h = |s: &str| digest(s.as_bytes());
    format!(
      "ident:{ident}\nfilename:file1.data\nsize:16\nnhashes:3\nhashes:\n\t{}\n\t{}\n\t{}\nnchunks:4\nchunks:\n\t{},0,4\n\t{},4,4\n\t{},8,4\n\t{},12,4\n",
      h("root"),
      h("i0"),
      h("i1"),
      h("c0"),
      h("c1"),
      h("c2"),
      h("c3")
    )
  }

  fn load_text(text: &str) -> Result<Package, ParseError> {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(text.as_bytes()).unwrap();
    Package::load(file.path())
  }

  #[test]
  fn load_valid_descriptor() {
    let package = load_text(&valid_text()).unwrap();
    assert_eq!(package.ident, "ab".repeat(512));
    assert_eq!(package.filename, "file1.data");
    assert_eq!(package.total_size, 16);
    assert_eq!(package.hashes.len(), 3);
    assert_eq!(package.chunk_count(), 4);
    assert_eq!(package.hashes[0], digest(b"root"));
    assert_eq!(package.chunks[2], Chunk { hash: digest(b"c2"), offset: 8, size: 4 });
  }

  #[test]
  fn validate_only_is_load_is_ok() {
    assert!(load_text(&valid_text()).is_ok());
    assert!(Package::load("no/such/file.bpkg").is_err());
  }

  #[test]
  fn missing_descriptor() {
    assert!(matches!(Package::load("no/such/file.bpkg"), Err(ParseError::MissingFile(_))));
  }

  #[test]
  fn empty_descriptor() {
    assert!(matches!(load_text(""), Err(ParseError::EmptyFile)));
  }

  #[test]
  fn non_utf8_descriptor() {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(&[0xff, 0xfe, 0x00, 0x01]).unwrap();
    assert!(matches!(Package::load(file.path()), Err(ParseError::NotText)));
  }

  #[test]
  fn wrong_label_case() {
    let text = valid_text().replace("ident:", "Ident:");
    assert!(matches!(load_text(&text), Err(ParseError::MalformedLabel("ident"))));
  }

  #[test]
  fn label_with_unexpected_value() {
    let text = valid_text().replace("hashes:\n", "hashes:3\n");
    assert!(matches!(load_text(&text), Err(ParseError::MalformedLabel("hashes"))));
  }

  #[test]
  fn identifier_too_short() {
    let text = valid_text().replace(&"ab".repeat(512), &"ab".repeat(511));
    assert!(matches!(load_text(&text), Err(ParseError::InvalidIdentifier)));
  }

  #[test]
  fn identifier_not_hex() {
    let text = valid_text().replace(&"ab".repeat(512), &"xy".repeat(512));
    assert!(matches!(load_text(&text), Err(ParseError::InvalidIdentifier)));
  }

  #[test]
  fn empty_filename() {
    let text = valid_text().replace("filename:file1.data\n", "filename:\n");
    assert!(matches!(load_text(&text), Err(ParseError::MissingValue("filename"))));
  }

  #[test]
  fn hash_not_hex() {
    let bad = format!("zz{}", &digest(b"i0")[2..]);
    let text = valid_text().replace(&digest(b"i0"), &bad);
    assert!(matches!(load_text(&text), Err(ParseError::InvalidHash(1))));
  }

  #[test]
  fn hash_too_short() {
    let text = valid_text().replace(&digest(b"i1"), &digest(b"i1")[..63].to_string());
    assert!(matches!(load_text(&text), Err(ParseError::InvalidHash(2))));
  }

  #[test]
  fn chunk_hash_not_hex() {
    let bad = format!("zz{}", &digest(b"c1")[2..]);
    let text = valid_text().replace(&digest(b"c1"), &bad);
    assert!(matches!(load_text(&text), Err(ParseError::InvalidHash(1))));
  }

  #[test]
  fn size_not_a_number() {
    let text = valid_text().replace("size:16\n", "size:sixteen\n");
    assert!(matches!(load_text(&text), Err(ParseError::InvalidNumber("size"))));
  }

  #[test]
  fn chunk_missing_size_field() {
    let text = valid_text().replace(",12,4\n", ",12\n");
    assert!(matches!(load_text(&text), Err(ParseError::MissingValue("size"))));
  }

  #[test]
  fn fewer_hashes_than_declared() {
    let text = valid_text().replace("nhashes:3\n", "nhashes:4\n");
    assert!(matches!(
      load_text(&text),
      Err(ParseError::CountMismatch { list: "hashes", declared: 4 })
    ));
  }

  #[test]
  fn more_hashes_than_declared() {
    let text = valid_text().replace("nhashes:3\n", "nhashes:2\n");
    assert!(matches!(
      load_text(&text),
      Err(ParseError::CountMismatch { list: "hashes", declared: 2 })
    ));
  }

  #[test]
  fn space_indent_rejected() {
    let text = valid_text().replacen('\t', " ", 1);
    assert!(matches!(load_text(&text), Err(ParseError::CountMismatch { list: "hashes", declared: 3 })));
  }

  #[test]
  fn extra_chunk_entry() {
    let text = format!("{}\t{},16,4\n", valid_text(), digest(b"c4"));
    assert!(matches!(
      load_text(&text),
      Err(ParseError::CountMismatch { list: "chunks", declared: 4 })
    ));
  }

  #[test]
  fn unterminated_final_line() {
    let mut text = valid_text();
    text.pop();
    assert!(matches!(load_text(&text), Err(ParseError::UnterminatedLine)));
  }

  #[test]
  fn truncated_descriptor() {
    let text = valid_text();
    let cut = text.find("nchunks:").unwrap();
    assert!(matches!(load_text(&text[..cut]), Err(ParseError::TruncatedInput)));
  }

  #[test]
  fn trailing_data() {
    let text = format!("{}leftover\n", valid_text());
    assert!(matches!(load_text(&text), Err(ParseError::TrailingData)));
  }

  #[test]
  fn ensure_data_file_reports_existing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("file1.data");
    std::fs::write(&path, b"0123").unwrap();

    let mut package = load_text(&valid_text()).unwrap();
    package.filename = path.to_str().unwrap().to_string();
    assert_eq!(package.ensure_data_file().unwrap(), FileStatus::Exists);
    // An existing file is left alone, whatever its size.
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 4);
  }

  #[test]
  fn ensure_data_file_creates_missing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("file1.data");

    let mut package = load_text(&valid_text()).unwrap();
    package.filename = path.to_str().unwrap().to_string();
    assert_eq!(package.ensure_data_file().unwrap(), FileStatus::Created);
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 16);
  }
}
