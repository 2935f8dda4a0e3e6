use anyhow::{Context, Result};
use std::io::{BufWriter, Write};

use super::Formatter;
use crate::codec::o5m::{BOUNDING_BOX, DeltaState, END, HEADER, OBJECT_BASE, RESET};
use crate::codec::strings::StringTable;
use crate::codec::{write_svar, write_uvar};
use crate::error::ExitError;
use crate::metadata::{AuthorFields, AuthorMode, apply_author_mode};
use crate::model::{BBox, Body, Entity, Kind};

/// Initial size of the per-object scratch buffer.
const BODY_CAPACITY: usize = 64 * 1024;

pub struct O5mFormatter<W: Write> {
    writer: BufWriter<W>,
    /// Write an `.o5c` header instead of `.o5m`.
    change: bool,
    author_mode: AuthorMode,
    strings: StringTable,
    delta: DeltaState,
    last_kind: Option<Kind>,
    body: Vec<u8>,
    refs: Vec<u8>,
}

/// Appends a string (pair) either as back-reference or inline.
fn write_strings(strings: &mut StringTable, out: &mut Vec<u8>, first: &[u8], second: Option<&[u8]>) {
    let mut raw = Vec::with_capacity(first.len() + second.map_or(0, <[u8]>::len) + 2);
    raw.extend_from_slice(first);
    raw.push(0);
    if let Some(second) = second {
        raw.extend_from_slice(second);
        raw.push(0);
    }
    if let Some(reference) = strings.lookup(&raw) {
        write_uvar(out, reference);
        return;
    }
    out.push(0);
    out.extend_from_slice(&raw);
    let payload = raw.len() - if second.is_some() { 2 } else { 1 };
    strings.insert(raw, payload);
}

impl<W: Write> O5mFormatter<W> {
    pub fn new(writer: W, change: bool, author_mode: AuthorMode) -> Result<Self> {
        let mut body = Vec::new();
        body.try_reserve(BODY_CAPACITY)
            .context(ExitError::BufferAllocation)?;
        Ok(Self {
            writer: BufWriter::new(writer),
            change,
            author_mode,
            strings: StringTable::new(),
            delta: DeltaState::default(),
            last_kind: None,
            body,
            refs: Vec::new(),
        })
    }

    #[cfg(test)]
    pub fn into_inner(self) -> Result<W> {
        self.writer.into_inner().map_err(|e| e.into_error().into())
    }

    fn write_author(&mut self, entity: &Entity) {
        let out = &mut self.body;
        match apply_author_mode(self.author_mode, entity.author.as_ref()) {
            AuthorFields::Absent => out.push(0),
            AuthorFields::VersionOnly(version) => {
                write_uvar(out, u64::from(version));
                write_svar(out, -self.delta.timestamp);
                self.delta.timestamp = 0;
            }
            AuthorFields::Full(author) => {
                write_uvar(out, u64::from(author.version));
                write_svar(out, author.timestamp.wrapping_sub(self.delta.timestamp));
                self.delta.timestamp = author.timestamp;
                if author.timestamp != 0 {
                    write_svar(out, author.changeset.wrapping_sub(self.delta.changeset));
                    self.delta.changeset = author.changeset;
                    if author.uid == 0 || author.user.is_empty() {
                        write_strings(&mut self.strings, out, b"", Some(b""));
                    } else {
                        let mut uid = Vec::new();
                        write_uvar(&mut uid, u64::from(author.uid));
                        write_strings(&mut self.strings, out, &uid, Some(author.user.as_bytes()));
                    }
                }
            }
        }
    }

    fn write_body(&mut self, entity: &Entity) {
        match &entity.body {
            Body::Node { lon, lat } => {
                write_svar(&mut self.body, i64::from(*lon) - i64::from(self.delta.lon));
                write_svar(&mut self.body, i64::from(*lat) - i64::from(self.delta.lat));
                self.delta.lon = *lon;
                self.delta.lat = *lat;
            }
            Body::Way(nodes) => {
                self.refs.clear();
                for &node in nodes {
                    write_svar(&mut self.refs, node.wrapping_sub(self.delta.node_ref));
                    self.delta.node_ref = node;
                }
                write_uvar(&mut self.body, self.refs.len() as u64);
                self.body.extend_from_slice(&self.refs);
            }
            Body::Relation(members) => {
                self.refs.clear();
                for member in members {
                    let slot = &mut self.delta.member_refs[member.kind.index()];
                    write_svar(&mut self.refs, member.id.wrapping_sub(*slot));
                    *slot = member.id;
                    let mut typed_role = Vec::with_capacity(member.role.len() + 1);
                    typed_role.push(b'0' + member.kind.index() as u8);
                    typed_role.extend_from_slice(member.role.as_bytes());
                    write_strings(&mut self.strings, &mut self.refs, &typed_role, None);
                }
                write_uvar(&mut self.body, self.refs.len() as u64);
                self.body.extend_from_slice(&self.refs);
            }
        }
        for (key, value) in &entity.tags {
            write_strings(
                &mut self.strings,
                &mut self.body,
                key.as_bytes(),
                Some(value.as_bytes()),
            );
        }
    }

    fn write_dataset(&mut self, dataset: u8) -> Result<()> {
        let mut len = Vec::with_capacity(10);
        write_uvar(&mut len, self.body.len() as u64);
        self.writer.write_all(&[dataset])?;
        self.writer.write_all(&len)?;
        self.writer.write_all(&self.body)?;
        Ok(())
    }
}

impl<W: Write + Send> Formatter for O5mFormatter<W> {
    fn start(&mut self, bbox: Option<BBox>) -> Result<()> {
        let magic: &[u8; 4] = if self.change { b"o5c2" } else { b"o5m2" };
        self.writer.write_all(&[RESET, HEADER, 0x04])?;
        self.writer.write_all(magic)?;
        if let Some(bbox) = bbox {
            self.body.clear();
            for value in [bbox.x1, bbox.y1, bbox.x2, bbox.y2] {
                write_svar(&mut self.body, i64::from(value));
            }
            self.write_dataset(BOUNDING_BOX)?;
        }
        Ok(())
    }

    fn write(&mut self, entity: &Entity) -> Result<()> {
        let kind = entity.kind();
        if self.last_kind != Some(kind) {
            self.writer.write_all(&[RESET])?;
            self.delta = DeltaState::default();
            self.strings.clear();
            self.last_kind = Some(kind);
        }
        self.body.clear();
        write_svar(&mut self.body, entity.id.wrapping_sub(self.delta.id));
        self.delta.id = entity.id;
        self.write_author(entity);
        if !entity.deleted {
            self.write_body(entity);
        }
        self.write_dataset(OBJECT_BASE + kind.index() as u8)
    }

    fn finish(&mut self) -> Result<()> {
        self.writer.write_all(&[END])?;
        self.writer.flush()?;
        Ok(())
    }

    fn accepts_deletions(&self) -> bool {
        self.change
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::O5mDecoder;
    use crate::model::{Author, Member};

    fn tags(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn author(version: u32, timestamp: i64, uid: u32, user: &str) -> Option<Author> {
        Some(Author {
            version,
            timestamp,
            changeset: 900 + i64::from(version),
            uid,
            user: user.to_string(),
        })
    }

    fn sample() -> Vec<Entity> {
        vec![
            Entity {
                id: 10,
                author: author(2, 1285874610, 7, "mapper"),
                tags: tags(&[("amenity", "pub"), ("name", "The Crown")]),
                body: Body::Node {
                    lon: -1277583,
                    lat: 515073509,
                },
                deleted: false,
            },
            Entity {
                id: 11,
                author: author(1, 1285874620, 7, "mapper"),
                tags: tags(&[("amenity", "pub")]),
                body: Body::Node {
                    lon: -1277000,
                    lat: 515070000,
                },
                deleted: false,
            },
            Entity {
                id: 5,
                author: None,
                tags: tags(&[("highway", "primary")]),
                body: Body::Way(vec![10, 11, 10]),
                deleted: false,
            },
            Entity {
                id: 7,
                author: author(3, 1285874630, 0, ""),
                tags: Vec::new(),
                body: Body::Relation(vec![
                    Member {
                        kind: Kind::Way,
                        id: 5,
                        role: "outer".to_string(),
                    },
                    Member {
                        kind: Kind::Node,
                        id: 10,
                        role: String::new(),
                    },
                ]),
                deleted: false,
            },
        ]
    }

    fn encode(entities: &[Entity], change: bool, bbox: Option<BBox>) -> Vec<u8> {
        let mut formatter = O5mFormatter::new(Vec::new(), change, AuthorMode::Keep).unwrap();
        formatter.start(bbox).unwrap();
        for entity in entities {
            formatter.write(entity).unwrap();
        }
        formatter.finish().unwrap();
        formatter.into_inner().unwrap()
    }

    fn decode(data: &[u8]) -> Vec<Entity> {
        let mut decoder = O5mDecoder::new(data);
        let mut out = Vec::new();
        while let Some(entity) = decoder.next_entity().unwrap() {
            out.push(entity);
        }
        out
    }

    #[test]
    fn output_decodes_to_same_objects() {
        let entities = sample();
        let data = encode(&entities, false, None);
        assert!(data.starts_with(&[0xff, 0xe0, 0x04, b'o', b'5', b'm', b'2', 0xff, 0x10]));
        assert_eq!(data.last(), Some(&0xfe));
        assert_eq!(decode(&data), entities);
    }

    #[test]
    fn repeated_strings_use_references() {
        let entities = sample();
        let data = encode(&entities, false, None);
        let occurrences = data.windows(7).filter(|w| w == b"amenity").count();
        assert_eq!(occurrences, 1);
        let users = data.windows(6).filter(|w| w == b"mapper").count();
        assert_eq!(users, 1);
    }

    #[test]
    fn change_header_bbox_and_deletion() {
        let bbox = BBox {
            x1: -2000000,
            y1: 515000000,
            x2: -1000000,
            y2: 516000000,
        };
        let deleted = Entity {
            id: 99,
            author: author(4, 1285874640, 7, "mapper"),
            tags: Vec::new(),
            body: Entity::empty_body(Kind::Way),
            deleted: true,
        };
        let data = encode(std::slice::from_ref(&deleted), true, Some(bbox));
        assert!(data.starts_with(b"\xff\xe0\x04o5c2\xdb"));

        let mut decoder = O5mDecoder::new(&data);
        let entity = decoder.next_entity().unwrap().unwrap();
        assert_eq!(decoder.bbox(), Some(bbox));
        assert!(entity.deleted);
        assert_eq!(entity.id, 99);
        assert_eq!(entity.author, deleted.author);
    }

    #[test]
    fn dropped_author_keeps_objects_decodable() {
        let mut formatter =
            O5mFormatter::new(Vec::new(), false, AuthorMode::DropDetails).unwrap();
        formatter.start(None).unwrap();
        for entity in sample() {
            formatter.write(&entity).unwrap();
        }
        formatter.finish().unwrap();
        let decoded = decode(&formatter.into_inner().unwrap());
        assert_eq!(decoded.len(), 4);
        let author = decoded[0].author.as_ref().unwrap();
        assert_eq!((author.version, author.timestamp), (2, 0));
        assert!(author.user.is_empty());
        assert_eq!(decoded[1].tags, tags(&[("amenity", "pub")]));
    }
}
