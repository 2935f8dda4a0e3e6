use super::Restart;
use super::cursor::{CodecError, Cursor};
use super::strings::{MAX_STORED_LEN, StringRing};
use crate::model::{Author, BBox, Body, Entity, Kind, Member};
use crate::utils::WarnLimiter;

pub const RESET: u8 = 0xff;
pub const END: u8 = 0xfe;
pub const HEADER: u8 = 0xe0;
pub const BOUNDING_BOX: u8 = 0xdb;
/// Object datasets are `OBJECT_BASE + kind index`.
pub const OBJECT_BASE: u8 = 0x10;

const INVALID_STRING: &str = "(invalid)";

/// Running values that datasets are delta-coded against. Cleared on reset.
#[derive(Debug, Default, Clone)]
pub(crate) struct DeltaState {
    pub id: i64,
    pub timestamp: i64,
    pub changeset: i64,
    pub lon: i32,
    pub lat: i32,
    pub node_ref: i64,
    pub member_refs: [i64; 3],
}

pub struct O5mDecoder<'a> {
    cursor: Cursor<'a>,
    strings: StringRing<'a>,
    delta: DeltaState,
    last_reset: usize,
    bbox: Option<BBox>,
    bad_reference: WarnLimiter,
}

fn split_pair(raw: &[u8]) -> (&[u8], &[u8]) {
    let first_end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
    let rest = raw.get(first_end + 1..).unwrap_or_default();
    let second_end = rest.iter().position(|&b| b == 0).unwrap_or(rest.len());
    (&raw[..first_end], &rest[..second_end])
}

fn text(bytes: &[u8]) -> String {
    String::from_utf8_lossy(bytes).into_owned()
}

impl<'a> O5mDecoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            cursor: Cursor::new(data),
            strings: StringRing::new(),
            delta: DeltaState::default(),
            last_reset: 0,
            bbox: None,
            bad_reference: WarnLimiter::default(),
        }
    }

    pub fn bbox(&self) -> Option<BBox> {
        self.bbox
    }

    /// The reset point preceding the most recently returned object:
    /// decoding from there starts with fresh state.
    pub fn checkpoint(&self) -> Restart {
        Restart {
            offset: self.last_reset,
            deleting: false,
        }
    }

    pub fn seek(&mut self, restart: Restart) {
        self.cursor.seek(restart.offset);
        self.last_reset = restart.offset;
        self.reset();
    }

    fn reset(&mut self) {
        self.delta = DeltaState::default();
        self.strings.clear();
    }

    pub fn next_entity(&mut self) -> Result<Option<Entity>, CodecError> {
        loop {
            let offset = self.cursor.position();
            let Some(dataset) = self.cursor.peek() else {
                return Ok(None);
            };
            self.cursor.read_u8()?;
            match dataset {
                RESET => {
                    self.reset();
                    self.last_reset = offset;
                }
                END => {
                    self.cursor.seek(usize::MAX);
                    return Ok(None);
                }
                // single-byte datasets without payload
                0xf0..=0xfd => {}
                _ => {
                    let len = self.cursor.read_uvar()?;
                    let len = usize::try_from(len).map_err(|_| CodecError::InvalidVarint(offset))?;
                    let body = self.cursor.read_bytes(len)?;
                    match dataset {
                        OBJECT_BASE..=0x12 => {
                            let kind = Kind::from_index(usize::from(dataset - OBJECT_BASE))
                                .ok_or(CodecError::InvalidVarint(offset))?;
                            return self.decode_object(kind, body).map(Some);
                        }
                        BOUNDING_BOX => self.bbox = Some(decode_bbox(body)?),
                        _ => tracing::debug!("o5m: Skipping dataset 0x{:02x} at {}", dataset, offset),
                    }
                }
            }
        }
    }

    fn decode_object(&mut self, kind: Kind, data: &'a [u8]) -> Result<Entity, CodecError> {
        let mut c = Cursor::new(data);
        self.delta.id = self.delta.id.wrapping_add(c.read_svar()?);
        let id = self.delta.id;
        let author = self.decode_author(&mut c)?;
        if c.is_empty() {
            return Ok(Entity {
                id,
                author,
                tags: Vec::new(),
                body: Entity::empty_body(kind),
                deleted: true,
            });
        }

        let body = match kind {
            Kind::Node => {
                self.delta.lon = self.delta.lon.wrapping_add(c.read_svar()? as i32);
                self.delta.lat = self.delta.lat.wrapping_add(c.read_svar()? as i32);
                Body::Node {
                    lon: self.delta.lon,
                    lat: self.delta.lat,
                }
            }
            Kind::Way => {
                let mut refs = self.ref_section(&mut c)?;
                let mut nodes = Vec::new();
                while !refs.is_empty() {
                    self.delta.node_ref = self.delta.node_ref.wrapping_add(refs.read_svar()?);
                    nodes.push(self.delta.node_ref);
                }
                Body::Way(nodes)
            }
            Kind::Relation => {
                let mut refs = self.ref_section(&mut c)?;
                let mut members = Vec::new();
                while !refs.is_empty() {
                    let delta = refs.read_svar()?;
                    let raw = self.read_string(&mut refs, false)?;
                    let (kind, role) = match raw.and_then(|raw| raw.split_first()) {
                        Some((&t, role)) => {
                            let (spec, _) = split_pair(role);
                            let index = (i32::from(t) - i32::from(b'0')).rem_euclid(3) as usize;
                            (Kind::ALL[index], text(spec))
                        }
                        None => (Kind::Node, INVALID_STRING.to_string()),
                    };
                    let slot = &mut self.delta.member_refs[kind.index()];
                    *slot = slot.wrapping_add(delta);
                    members.push(Member {
                        kind,
                        id: *slot,
                        role,
                    });
                }
                Body::Relation(members)
            }
        };

        let mut tags = Vec::new();
        while !c.is_empty() {
            let (key, value) = match self.read_string(&mut c, true)? {
                Some(raw) => {
                    let (key, value) = split_pair(raw);
                    (text(key), text(value))
                }
                None => (INVALID_STRING.to_string(), INVALID_STRING.to_string()),
            };
            tags.push((key, value));
        }

        Ok(Entity {
            id,
            author,
            tags,
            body,
            deleted: false,
        })
    }

    fn ref_section(&self, c: &mut Cursor<'a>) -> Result<Cursor<'a>, CodecError> {
        let start = c.position();
        let len = usize::try_from(c.read_uvar()?).map_err(|_| CodecError::InvalidVarint(start))?;
        Ok(Cursor::new(c.read_bytes(len)?))
    }

    fn decode_author(&mut self, c: &mut Cursor<'a>) -> Result<Option<Author>, CodecError> {
        let version = c.read_uvar()?;
        if version == 0 {
            return Ok(None);
        }
        self.delta.timestamp = self.delta.timestamp.wrapping_add(c.read_svar()?);
        let mut author = Author {
            version: version as u32,
            timestamp: self.delta.timestamp,
            ..Author::default()
        };
        if author.timestamp != 0 {
            self.delta.changeset = self.delta.changeset.wrapping_add(c.read_svar()?);
            author.changeset = self.delta.changeset;
            match self.read_string(c, true)? {
                Some(raw) => {
                    let (uid, user) = split_pair(raw);
                    author.uid = Cursor::new(uid).read_uvar().map_or(0, |uid| uid as u32);
                    author.user = text(user);
                }
                None => author.user = INVALID_STRING.to_string(),
            }
        }
        Ok(Some(author))
    }

    /// An inline string (pair) or a back-reference into the ring. `None`
    /// for references the ring cannot resolve.
    fn read_string(
        &mut self,
        c: &mut Cursor<'a>,
        pair: bool,
    ) -> Result<Option<&'a [u8]>, CodecError> {
        if c.peek() == Some(0) {
            c.read_u8()?;
            let start = c.position();
            let mut payload = c.read_cstr()?.len();
            if pair {
                payload += c.read_cstr()?.len();
            }
            let raw = c.since(start);
            if payload <= MAX_STORED_LEN {
                self.strings.push(raw);
            }
            return Ok(Some(raw));
        }
        let reference = c.read_uvar()?;
        let raw = self.strings.get(reference);
        if raw.is_none() && self.bad_reference.allow() {
            tracing::warn!("invalid .o5m string reference: {}", reference);
        }
        Ok(raw)
    }
}

fn decode_bbox(body: &[u8]) -> Result<BBox, CodecError> {
    let mut c = Cursor::new(body);
    Ok(BBox {
        x1: c.read_svar()? as i32,
        y1: c.read_svar()? as i32,
        x2: c.read_svar()? as i32,
        y2: c.read_svar()? as i32,
    })
}
