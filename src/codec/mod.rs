//! Streaming decoders for `.o5m`/`.o5c` and `.osm`/`.osc`/`.osh` input.

mod cursor;
pub mod o5m;
pub mod strings;
mod xml;

pub use cursor::{CodecError, write_svar, write_uvar};
pub use o5m::O5mDecoder;
pub use xml::XmlDecoder;

use crate::model::{BBox, Entity, Kind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    O5m,
    Xml,
}

/// A position the decoder can be rewound to with clean state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Restart {
    pub offset: usize,
    /// XML only: the position lies inside a `<delete>` block.
    pub deleting: bool,
}

/// Where the way and relation sections of a file can be re-entered.
/// A missing section points at the end of the data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sections {
    pub ways: Restart,
    pub relations: Restart,
}

impl Sections {
    pub fn start_of(&self, kind: Kind) -> Restart {
        match kind {
            Kind::Node => Restart::default(),
            Kind::Way => self.ways,
            Kind::Relation => self.relations,
        }
    }
}

/// Determine the input format from the first bytes of the file.
pub fn sniff_format(data: &[u8]) -> Result<InputFormat, CodecError> {
    match data {
        [0x00, 0x00, 0x00, 0x09..=0x19, ..] => Err(CodecError::PbfInput),
        [0xff, 0xe0, 0x04, b'o', b'5', b'm' | b'c', b'2', ..] => Ok(InputFormat::O5m),
        [0xff, 0x10..=0x12 | 0xff, ..] => Ok(InputFormat::O5m),
        _ => {
            let text = data.strip_prefix(b"\xef\xbb\xbf").unwrap_or(data).trim_ascii_start();
            if text.starts_with(b"<?xml") || text.starts_with(b"<osm") {
                Ok(InputFormat::Xml)
            } else {
                Err(CodecError::UnknownFormat)
            }
        }
    }
}

pub enum Decoder<'a> {
    O5m(O5mDecoder<'a>),
    Xml(XmlDecoder<'a>),
}

impl<'a> Decoder<'a> {
    pub fn new(data: &'a [u8], format: InputFormat) -> Self {
        match format {
            InputFormat::O5m => Decoder::O5m(O5mDecoder::new(data)),
            InputFormat::Xml => Decoder::Xml(XmlDecoder::new(data)),
        }
    }

    pub fn next_entity(&mut self) -> Result<Option<Entity>, CodecError> {
        match self {
            Decoder::O5m(d) => d.next_entity(),
            Decoder::Xml(d) => d.next_entity(),
        }
    }

    /// Header bounding box, once it has been read.
    pub fn bbox(&self) -> Option<BBox> {
        match self {
            Decoder::O5m(d) => d.bbox(),
            Decoder::Xml(d) => d.bbox(),
        }
    }

    /// Restart point for the object returned last.
    pub fn checkpoint(&self) -> Restart {
        match self {
            Decoder::O5m(d) => d.checkpoint(),
            Decoder::Xml(d) => d.checkpoint(),
        }
    }

    pub fn seek(&mut self, restart: Restart) {
        match self {
            Decoder::O5m(d) => d.seek(restart),
            Decoder::Xml(d) => d.seek(restart),
        }
    }
}

/// Scan forward until the first relation, recording where the way and
/// relation sections can be re-entered.
pub fn locate_sections(
    data: &[u8],
    format: InputFormat,
) -> Result<Sections, CodecError> {
    let end = Restart {
        offset: data.len(),
        deleting: false,
    };
    let mut sections = Sections {
        ways: end,
        relations: end,
    };
    let mut decoder = Decoder::new(data, format);
    let mut found_way = false;
    loop {
        let entity = match decoder.next_entity() {
            Ok(Some(entity)) => entity,
            // Reported by the later full scan.
            Ok(None) | Err(CodecError::TruncatedInput { .. }) => break,
            Err(e) => return Err(e),
        };
        let checkpoint = decoder.checkpoint();
        match entity.kind() {
            Kind::Node => {}
            Kind::Way => {
                if !found_way {
                    sections.ways = checkpoint;
                    found_way = true;
                }
            }
            Kind::Relation => {
                sections.relations = checkpoint;
                if !found_way {
                    sections.ways = checkpoint;
                }
                break;
            }
        }
    }
    Ok(sections)
}
