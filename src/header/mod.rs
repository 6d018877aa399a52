//! Reader and writer for conc header files.
//!
//! A header is a plain text file made of a *basic info* block followed by
//! any number of *frame info* blocks. Every block is terminated by a line
//! reading `end_of_header`. Inside a block each line is either a comment
//! (starting with `#`) or a space separated `name value [value ...]` entry:
//!
//! ```text
//! # Header file for data file mouse.img
//! version 001.910
//! model 2000
//! pixel_spacing 1.0 1.0
//! end_of_header
//! frame 0
//! singles 3 10 20 30
//! end_of_header
//! ```
//!
//! Values carry no type information, so they are typed on read: a token with
//! a `.` is a float, other tokens are integers, and anything that does not
//! convert is kept as text. Writing a [`HeaderDocument`] back yields the same
//! fields, values and order, though not necessarily the same whitespace.
//!
//! ```
//! # use conc_volume::header::{HeaderDocument, Value};
//! let text = "model 2000\npixel_spacing 1.0 1.0\nend_of_header\n";
//! let mut header: HeaderDocument = text.parse().unwrap();
//! assert_eq!(header.basic_info.get_i64("model"), Some(2000));
//!
//! header.basic_info.insert("model", Value::Int(2001));
//! assert!(header.serialize().starts_with("model 2001\n"));
//! ```

mod block;
mod value;

pub use block::{Block, Entry};
pub use value::{Field, Value};

use std::{
    fmt, fs,
    io::{self, Write},
    path::{Path, PathBuf},
    str::FromStr,
};

use serde::Serialize;
use thiserror::Error;
use tracing::debug;

/// Line closing every block.
pub const END_OF_HEADER: &str = "end_of_header";

/// Vector field whose first value is folded into its key.
const SINGLES: &str = "singles";

/// Structural problems that prevent a header from being read.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StructureError {
    #[error("No `end_of_header` terminated basic info block found")]
    MissingBasicInfo,

    #[error("Block {block} starting at line {line} is not terminated by `end_of_header`")]
    UnterminatedBlock { block: usize, line: usize },
}

#[derive(Debug, Error)]
pub enum HeaderError {
    #[error("Could not read header file {}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Header file {} is not valid UTF-8", path.display())]
    Encoding {
        path: PathBuf,
        #[source]
        source: std::string::FromUtf8Error,
    },

    #[error("Invalid header file {}", path.display())]
    Structure {
        path: PathBuf,
        #[source]
        source: StructureError,
    },

    #[error("Could not write header file {}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// In-memory model of a conc header file.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HeaderDocument {
    pub basic_info: Block,
    pub frame_info: Vec<Block>,
}

enum RawLine {
    Comment(String),
    Data(String),
}

impl RawLine {
    fn is_blank(&self) -> bool {
        match self {
            RawLine::Comment(text) | RawLine::Data(text) => text.trim().is_empty(),
        }
    }
}

impl HeaderDocument {
    pub fn new(basic_info: Block) -> Self {
        Self {
            basic_info,
            frame_info: Vec::new(),
        }
    }

    /// Read and parse the header file at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, HeaderError> {
        let path = path.as_ref();
        let bytes = fs::read(path).map_err(|source| HeaderError::Read {
            path: path.to_owned(),
            source,
        })?;
        let text = String::from_utf8(bytes).map_err(|source| HeaderError::Encoding {
            path: path.to_owned(),
            source,
        })?;
        let header = Self::parse(&text).map_err(|source| HeaderError::Structure {
            path: path.to_owned(),
            source,
        })?;
        debug!(
            "Read header {} with {} frame blocks",
            path.display(),
            header.frame_info.len()
        );
        Ok(header)
    }

    /// Parse header text.
    ///
    /// Values that do not convert to numbers are kept as text, so the only
    /// failures are structural: no terminated block at all, or content left
    /// after the last `end_of_header`.
    pub fn parse(text: &str) -> Result<Self, StructureError> {
        let mut raw_blocks: Vec<Vec<RawLine>> = Vec::new();
        let mut current = Vec::new();
        let mut current_start = 1;

        for (number, line) in text.lines().enumerate() {
            if line == END_OF_HEADER {
                current.push(RawLine::Comment(line.to_owned()));
                raw_blocks.push(std::mem::take(&mut current));
                current_start = number + 2;
            } else if line.starts_with('#') || line.trim().is_empty() {
                current.push(RawLine::Comment(line.replace('\t', " ")));
            } else {
                current.push(RawLine::Data(line.replace('\t', " ")));
            }
        }

        if current.iter().any(|line| !line.is_blank()) {
            return Err(StructureError::UnterminatedBlock {
                block: raw_blocks.len(),
                line: current_start,
            });
        }

        // trailing blank lines stay with the last block
        let Some(last) = raw_blocks.last_mut() else {
            return Err(StructureError::MissingBasicInfo);
        };
        last.append(&mut current);

        let mut blocks = raw_blocks.into_iter().map(build_block);
        let basic_info = blocks.next().unwrap_or_default();
        let frame_info: Vec<Block> = blocks.collect();
        debug!(
            "Parsed header with {} basic info fields and {} frame blocks",
            basic_info.len(),
            frame_info.len()
        );

        Ok(Self {
            basic_info,
            frame_info,
        })
    }

    /// Render the document as header text, basic info first.
    pub fn serialize(&self) -> String {
        let mut out = String::new();
        for block in std::iter::once(&self.basic_info).chain(&self.frame_info) {
            write_block(block, &mut out);
        }
        out.retain(|c| c != '\r');
        out
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.serialize().into_bytes()
    }

    pub fn write_to<W: Write>(&self, mut to: W) -> io::Result<()> {
        to.write_all(self.serialize().as_bytes())?;
        to.flush()
    }

    /// Write the document to the file at `path`, replacing it.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), HeaderError> {
        let path = path.as_ref();
        fs::write(path, self.to_bytes()).map_err(|source| HeaderError::Write {
            path: path.to_owned(),
            source,
        })?;
        debug!("Wrote header {}", path.display());
        Ok(())
    }

    /// All blocks, basic info first.
    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        std::iter::once(&self.basic_info).chain(&self.frame_info)
    }
}

impl FromStr for HeaderDocument {
    type Err = StructureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for HeaderDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.serialize())
    }
}

fn build_block(lines: Vec<RawLine>) -> Block {
    let mut block = Block::new();
    for (position, line) in lines.into_iter().enumerate() {
        match line {
            RawLine::Comment(text) => {
                block.insert(format!("comment_{position}"), Field::Comment(text));
            }
            RawLine::Data(text) => {
                let (key, field) = type_line(&text);
                block.insert(key, field);
            }
        }
    }
    block
}

fn type_line(line: &str) -> (String, Field) {
    let tokens: Vec<&str> = line.split(' ').collect();
    let (name, values) = match tokens.split_first() {
        Some((name, values)) => (*name, values),
        None => (line, &[][..]),
    };

    match values {
        [] => (name.to_owned(), Field::Vector(Vec::new())),
        [value] => {
            let value = Value::from_token(value);
            if matches!(value, Value::Str(_)) {
                debug!("Keeping `{name}` as text");
            }
            (name.to_owned(), Field::Scalar(value))
        }
        _ => {
            let numbers: Option<Vec<Value>> = values
                .iter()
                .filter(|token| !token.is_empty())
                .map(|token| Value::parse_number(token))
                .collect();
            match numbers {
                Some(mut numbers) if name == SINGLES && !numbers.is_empty() => {
                    let first = numbers.remove(0);
                    (format!("{SINGLES}_{first}"), Field::Vector(numbers))
                }
                Some(numbers) => (name.to_owned(), Field::Vector(numbers)),
                None => {
                    debug!("Keeping `{name}` as text");
                    (name.to_owned(), Field::Scalar(Value::Str(values.join(" "))))
                }
            }
        }
    }
}

fn write_block(block: &Block, out: &mut String) {
    use std::fmt::Write as _;

    for Entry { key, field } in block {
        // writing into a String cannot fail
        let _ = match field {
            Field::Comment(text) => write!(out, "{text}"),
            // an empty rest still ends in a space, so the line reads back as singles
            Field::Vector(_) if key.starts_with("singles_") => {
                write!(out, "{SINGLES} {} {field}", &key[SINGLES.len() + 1..])
            }
            Field::Vector(values) if values.is_empty() => write!(out, "{key}"),
            // trailing space keeps a one-value vector from reading back as a scalar
            Field::Vector(values) if values.len() == 1 => write!(out, "{key} {field} "),
            _ => write!(out, "{key} {field}"),
        };
        out.push('\n');
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const SAMPLE: &str = "\
# Header file for data file mouse.img
version 001.910
model 2000
institution Example Lab
pixel_spacing 1.0 1.0
end_of_header
frame 0
scale_factor 0.25
singles 3 10 20 30
end_of_header
frame 1
scale_factor 0.5
singles 3 11 21 31
end_of_header
";

    fn keys(block: &Block) -> Vec<&str> {
        block.keys().collect()
    }

    #[test]
    fn parses_basic_info() {
        let header = HeaderDocument::parse(SAMPLE).unwrap();

        assert_eq!(
            keys(&header.basic_info),
            vec!["comment_0", "version", "model", "institution", "pixel_spacing", "comment_5"]
        );
        assert_eq!(
            header.basic_info.get("comment_0"),
            Some(&Field::Comment("# Header file for data file mouse.img".into()))
        );
        assert_eq!(header.basic_info.get_f64("version"), Some(1.91));
        assert_eq!(header.basic_info.get_i64("model"), Some(2000));
        assert_eq!(header.basic_info.get_str("institution"), Some("Example Lab"));
        assert_eq!(
            header.basic_info.get("pixel_spacing"),
            Some(&Field::Vector(vec![Value::Float(1.0), Value::Float(1.0)]))
        );
        assert_eq!(
            header.basic_info.get("comment_5"),
            Some(&Field::Comment(END_OF_HEADER.into()))
        );
    }

    #[test]
    fn parses_frame_blocks() {
        let header = HeaderDocument::parse(SAMPLE).unwrap();

        assert_eq!(header.frame_info.len(), 2);
        let frame = &header.frame_info[1];
        assert_eq!(keys(frame), vec!["frame", "scale_factor", "singles_3", "comment_3"]);
        assert_eq!(frame.get_i64("frame"), Some(1));
        assert_eq!(frame.get_f64("scale_factor"), Some(0.5));
        assert_eq!(
            frame.get("singles_3"),
            Some(&Field::Vector(vec![Value::Int(11), Value::Int(21), Value::Int(31)]))
        );
    }

    #[test]
    fn serializes_in_stored_order() {
        let header = HeaderDocument::parse(SAMPLE).unwrap();
        assert_eq!(header.serialize(), SAMPLE.replace("version 001.910", "version 1.91"));
    }

    #[test]
    fn accepts_crlf_and_tabs() {
        let header =
            HeaderDocument::parse("#\tnote\r\nmodel\t2000\r\nspacing 1.0\t2.0\r\nend_of_header\r\n")
                .unwrap();

        assert_eq!(header.basic_info.get_i64("model"), Some(2000));
        assert_eq!(
            header.basic_info.get("spacing"),
            Some(&Field::Vector(vec![Value::Float(1.0), Value::Float(2.0)]))
        );
        assert_eq!(
            header.serialize(),
            "# note\nmodel 2000\nspacing 1.0 2.0\nend_of_header\n"
        );
    }

    #[test]
    fn empty_tokens_are_dropped_from_vectors() {
        let header = HeaderDocument::parse("axis  1 2 \nend_of_header\n").unwrap();
        assert_eq!(
            header.basic_info.get("axis"),
            Some(&Field::Vector(vec![Value::Int(1), Value::Int(2)]))
        );
    }

    #[test]
    fn unconvertible_vector_becomes_text() {
        let header = HeaderDocument::parse("study mouse 12 brain\nend_of_header\n").unwrap();
        assert_eq!(header.basic_info.get_str("study"), Some("mouse 12 brain"));
        assert_eq!(header.serialize(), "study mouse 12 brain\nend_of_header\n");
    }

    #[test]
    fn name_only_line_is_an_empty_vector() {
        let header = HeaderDocument::parse("flag\nend_of_header\n").unwrap();
        assert_eq!(header.basic_info.get("flag"), Some(&Field::Vector(Vec::new())));
        assert_eq!(header.serialize(), "flag\nend_of_header\n");
    }

    #[test]
    fn blank_lines_are_kept() {
        let text = "a 1\n\nb 2\nend_of_header\n\n";
        let header = HeaderDocument::parse(text).unwrap();
        assert_eq!(keys(&header.basic_info), vec!["a", "comment_1", "b", "comment_3", "comment_4"]);
        assert_eq!(header.serialize(), text);
    }

    #[test]
    fn duplicate_keys_keep_first_position_and_last_value() {
        let header = HeaderDocument::parse("a 1\nb 2\na 3\nend_of_header\n").unwrap();
        assert_eq!(keys(&header.basic_info), vec!["a", "b", "comment_3"]);
        assert_eq!(header.basic_info.get_i64("a"), Some(3));
    }

    #[test]
    fn singles_key_carries_float_first_value() {
        let header = HeaderDocument::parse("singles 2.0 5 6\nend_of_header\n").unwrap();
        assert_eq!(
            header.basic_info.get("singles_2.0"),
            Some(&Field::Vector(vec![Value::Int(5), Value::Int(6)]))
        );
        assert_eq!(header.serialize(), "singles 2.0 5 6\nend_of_header\n");
    }

    #[test]
    fn singles_without_remaining_values() {
        let header = HeaderDocument::parse("singles 3  \nend_of_header\n").unwrap();
        assert_eq!(keys(&header.basic_info), vec!["singles_3", "comment_1"]);
        assert_eq!(header.basic_info.get("singles_3"), Some(&Field::Vector(Vec::new())));

        let written = header.serialize();
        assert_eq!(written, "singles 3 \nend_of_header\n");
        assert_eq!(HeaderDocument::parse(&written).unwrap(), header);
    }

    #[test]
    fn one_value_vector_reads_back_as_vector() {
        for text in ["axis 12 \nend_of_header\n", "axis  12\nend_of_header\n"] {
            let header = HeaderDocument::parse(text).unwrap();
            assert_eq!(
                header.basic_info.get("axis"),
                Some(&Field::Vector(vec![Value::Int(12)]))
            );

            let written = header.serialize();
            assert_eq!(written, "axis 12 \nend_of_header\n");
            assert_eq!(HeaderDocument::parse(&written).unwrap(), header);
        }
    }

    #[test]
    fn two_token_singles_stays_scalar() {
        let header = HeaderDocument::parse("singles 7\nend_of_header\n").unwrap();
        assert_eq!(header.basic_info.get_i64("singles"), Some(7));
    }

    #[test]
    fn rejects_empty_documents() {
        assert_eq!(HeaderDocument::parse(""), Err(StructureError::MissingBasicInfo));
        assert_eq!(HeaderDocument::parse("\n\n"), Err(StructureError::MissingBasicInfo));
    }

    #[test]
    fn rejects_unterminated_blocks() {
        assert_eq!(
            HeaderDocument::parse("model 2000\n"),
            Err(StructureError::UnterminatedBlock { block: 0, line: 1 })
        );
        assert_eq!(
            HeaderDocument::parse("a 1\nend_of_header\nframe 0\nend_of_header\nframe 1\n"),
            Err(StructureError::UnterminatedBlock { block: 2, line: 5 })
        );
    }

    #[test]
    fn serialize_strips_carriage_returns() {
        let mut header = HeaderDocument::new(Block::new());
        header.basic_info.insert("note", Value::from("a\rb"));
        header.basic_info.push_comment(END_OF_HEADER);
        assert_eq!(header.serialize(), "note ab\nend_of_header\n");
    }
}
