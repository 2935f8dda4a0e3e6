use std::borrow::Cow;

use super::Restart;
use super::cursor::CodecError;
use crate::metadata::parse_timestamp;
use crate::model::{Author, BBox, Body, Entity, Kind, Member};
use crate::utils::parse_fixed7;

/// Incremental scanner over `.osm`, `.osc` and `.osh` documents. Only the
/// elements that make up OSM objects are interpreted; everything else is
/// skipped tag by tag.
pub struct XmlDecoder<'a> {
    data: &'a [u8],
    pos: usize,
    /// Inside a `<delete>` block of a change file.
    deleting: bool,
    bbox: Option<BBox>,
    seen_object: bool,
    /// Where the most recently returned object starts.
    object_start: Restart,
}

struct StartTag<'a> {
    name: &'a [u8],
    attrs: Vec<(&'a [u8], &'a [u8])>,
    self_closing: bool,
}

impl StartTag<'_> {
    fn attr(&self, name: &[u8]) -> Cow<'_, str> {
        self.attrs
            .iter()
            .find(|(key, _)| *key == name)
            .map_or(Cow::Borrowed(""), |(_, raw)| unescape(raw))
    }
}

fn truncated(offset: usize) -> CodecError {
    CodecError::TruncatedInput {
        offset,
        requested: 1,
        available: 0,
    }
}

fn is_space(b: u8) -> bool {
    matches!(b, b' ' | b'\t' | b'\r' | b'\n')
}

fn entity(name: &[u8]) -> Option<char> {
    match name {
        b"quot" => Some('"'),
        b"apos" => Some('\''),
        b"amp" => Some('&'),
        b"lt" => Some('<'),
        b"gt" => Some('>'),
        [b'#', b'x' | b'X', hex @ ..] => {
            u32::from_str_radix(std::str::from_utf8(hex).ok()?, 16)
                .ok()
                .and_then(char::from_u32)
        }
        [b'#', dec @ ..] => std::str::from_utf8(dec)
            .ok()?
            .parse()
            .ok()
            .and_then(char::from_u32),
        _ => None,
    }
}

/// Resolves character and entity references; unknown ones stay as written.
pub fn unescape(raw: &[u8]) -> Cow<'_, str> {
    if !raw.contains(&b'&') {
        return String::from_utf8_lossy(raw);
    }
    let mut out = Vec::with_capacity(raw.len());
    let mut i = 0;
    while i < raw.len() {
        if raw[i] == b'&'
            && let Some(len) = raw[i + 1..].iter().take(12).position(|&b| b == b';')
            && let Some(c) = entity(&raw[i + 1..i + 1 + len])
        {
            let mut buf = [0u8; 4];
            out.extend_from_slice(c.encode_utf8(&mut buf).as_bytes());
            i += len + 2;
            continue;
        }
        out.push(raw[i]);
        i += 1;
    }
    Cow::Owned(String::from_utf8_lossy(&out).into_owned())
}

/// Leading integer of `text`, 0 if there is none.
fn parse_int(text: &str) -> i64 {
    let text = text.trim();
    let (negative, digits) = match text.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, text),
    };
    let value = digits
        .bytes()
        .take_while(u8::is_ascii_digit)
        .fold(0i64, |acc, b| {
            acc.saturating_mul(10).saturating_add(i64::from(b - b'0'))
        });
    if negative { -value } else { value }
}

fn parse_bounds(tag: &StartTag<'_>) -> Option<BBox> {
    if tag.name == b"bound" {
        let spec = tag.attr(b"box");
        let mut parts = spec.split(',').map(|part| parse_fixed7(part.trim()));
        let (y1, x1, y2, x2) = (parts.next()??, parts.next()??, parts.next()??, parts.next()??);
        return Some(BBox { x1, y1, x2, y2 });
    }
    Some(BBox {
        x1: parse_fixed7(&tag.attr(b"minlon"))?,
        y1: parse_fixed7(&tag.attr(b"minlat"))?,
        x2: parse_fixed7(&tag.attr(b"maxlon"))?,
        y2: parse_fixed7(&tag.attr(b"maxlat"))?,
    })
}

impl<'a> XmlDecoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            deleting: false,
            bbox: None,
            seen_object: false,
            object_start: Restart::default(),
        }
    }

    pub fn bbox(&self) -> Option<BBox> {
        self.bbox
    }

    pub fn checkpoint(&self) -> Restart {
        self.object_start
    }

    pub fn seek(&mut self, restart: Restart) {
        self.pos = restart.offset.min(self.data.len());
        self.deleting = restart.deleting;
    }

    fn byte(&self, i: usize) -> Result<u8, CodecError> {
        self.data.get(i).copied().ok_or_else(|| truncated(i))
    }

    fn find(&self, from: usize, needle: &[u8]) -> Option<usize> {
        self.data
            .get(from..)?
            .windows(needle.len())
            .position(|w| w == needle)
            .map(|i| from + i)
    }

    /// Position just past the next `>` at or after `from`.
    fn skip_past_gt(&self, from: usize) -> Result<usize, CodecError> {
        self.find(from, b">").map(|i| i + 1).ok_or_else(|| truncated(from))
    }

    /// Skips comments and declarations starting at `lt`. Returns the
    /// position after them, or `None` if `lt` starts an element tag.
    fn skip_markup(&self, lt: usize) -> Result<Option<usize>, CodecError> {
        let rest = &self.data[lt..];
        if rest.starts_with(b"<!--") {
            return self
                .find(lt + 4, b"-->")
                .map(|i| Some(i + 3))
                .ok_or_else(|| truncated(lt));
        }
        if rest.starts_with(b"<?") || rest.starts_with(b"<!") {
            return self.skip_past_gt(lt).map(Some);
        }
        Ok(None)
    }

    fn parse_start_tag(&self, lt: usize) -> Result<(StartTag<'a>, usize), CodecError> {
        let data = self.data;
        let mut i = lt + 1;
        let name_start = i;
        while !matches!(self.byte(i)?, b'/' | b'>') && !is_space(data[i]) {
            i += 1;
        }
        let name = &data[name_start..i];
        let mut attrs = Vec::new();
        loop {
            while is_space(self.byte(i)?) {
                i += 1;
            }
            match data[i] {
                b'>' => {
                    return Ok((
                        StartTag {
                            name,
                            attrs,
                            self_closing: false,
                        },
                        i + 1,
                    ));
                }
                b'/' => {
                    let end = self.skip_past_gt(i)?;
                    return Ok((
                        StartTag {
                            name,
                            attrs,
                            self_closing: true,
                        },
                        end,
                    ));
                }
                _ => {}
            }
            let key_start = i;
            while !matches!(self.byte(i)?, b'=' | b'/' | b'>') && !is_space(data[i]) {
                i += 1;
            }
            let key = &data[key_start..i];
            while is_space(self.byte(i)?) {
                i += 1;
            }
            if data[i] != b'=' {
                attrs.push((key, &data[i..i]));
                continue;
            }
            i += 1;
            while is_space(self.byte(i)?) {
                i += 1;
            }
            let quote = self.byte(i)?;
            if quote != b'"' && quote != b'\'' {
                return Err(CodecError::MalformedXml {
                    offset: i,
                    reason: "unquoted attribute value",
                });
            }
            let value_start = i + 1;
            let value_end = self
                .find(value_start, &[quote])
                .ok_or_else(|| truncated(value_start))?;
            attrs.push((key, &data[value_start..value_end]));
            i = value_end + 1;
        }
    }

    pub fn next_entity(&mut self) -> Result<Option<Entity>, CodecError> {
        loop {
            let Some(lt) = self.find(self.pos, b"<") else {
                self.pos = self.data.len();
                return Ok(None);
            };
            if let Some(next) = self.skip_markup(lt)? {
                self.pos = next;
                continue;
            }
            if self.data[lt..].starts_with(b"</") {
                let end = self.skip_past_gt(lt)?;
                let name = self.data[lt + 2..end - 1].trim_ascii();
                self.pos = end;
                if name == b"delete" {
                    self.deleting = false;
                } else if name.starts_with(b"osm") {
                    self.pos = self.data.len();
                    return Ok(None);
                }
                continue;
            }

            let (tag, end) = self.parse_start_tag(lt)?;
            self.pos = end;
            let kind = match tag.name {
                b"node" => Kind::Node,
                b"way" => Kind::Way,
                b"relation" => Kind::Relation,
                b"delete" => {
                    self.deleting = !tag.self_closing;
                    continue;
                }
                b"bounds" | b"bound" => {
                    if !self.seen_object && self.bbox.is_none() {
                        self.bbox = parse_bounds(&tag);
                    }
                    continue;
                }
                _ => continue,
            };
            self.seen_object = true;
            self.object_start = Restart {
                offset: lt,
                deleting: self.deleting,
            };
            return self.read_object(kind, &tag).map(Some);
        }
    }

    fn read_object(&mut self, kind: Kind, tag: &StartTag<'a>) -> Result<Entity, CodecError> {
        let mut id = 0;
        let (mut lon, mut lat) = (0, 0);
        let mut author = Author::default();
        let mut deleted = self.deleting;
        for (name, raw) in &tag.attrs {
            let value = unescape(raw);
            match *name {
                b"id" => id = parse_int(&value),
                b"lat" => lat = parse_fixed7(value.trim()).unwrap_or(0),
                b"lon" => lon = parse_fixed7(value.trim()).unwrap_or(0),
                b"version" => author.version = parse_int(&value) as u32,
                b"timestamp" => author.timestamp = parse_timestamp(value.trim()).unwrap_or(0),
                b"changeset" => author.changeset = parse_int(&value),
                b"uid" => author.uid = parse_int(&value) as u32,
                b"user" => author.user = value.into_owned(),
                b"visible" => deleted |= value.starts_with(['f', 'n']),
                b"action" => deleted |= value == "delete",
                _ => {}
            }
        }

        let mut tags = Vec::new();
        let mut refs = Vec::new();
        let mut members = Vec::new();
        if !tag.self_closing {
            loop {
                let lt = self.find(self.pos, b"<").ok_or_else(|| truncated(self.pos))?;
                if let Some(next) = self.skip_markup(lt)? {
                    self.pos = next;
                    continue;
                }
                if self.data[lt..].starts_with(b"</") {
                    self.pos = self.skip_past_gt(lt)?;
                    break;
                }
                let (child, end) = self.parse_start_tag(lt)?;
                self.pos = end;
                if !child.self_closing {
                    let close = self.find(end, b"</").ok_or_else(|| truncated(end))?;
                    self.pos = self.skip_past_gt(close)?;
                }
                match child.name {
                    b"nd" => refs.push(parse_int(&child.attr(b"ref"))),
                    b"member" => {
                        let kind = match child.attr(b"type").bytes().next() {
                            Some(b'w') => Kind::Way,
                            Some(b'r') => Kind::Relation,
                            _ => Kind::Node,
                        };
                        members.push(Member {
                            kind,
                            id: parse_int(&child.attr(b"ref")),
                            role: child.attr(b"role").into_owned(),
                        });
                    }
                    b"tag" => tags.push((
                        child.attr(b"k").into_owned(),
                        child.attr(b"v").into_owned(),
                    )),
                    _ => {}
                }
            }
        }

        let body = match kind {
            Kind::Node => Body::Node { lon, lat },
            Kind::Way => Body::Way(refs),
            Kind::Relation => Body::Relation(members),
        };
        Ok(Entity {
            id,
            author: (author.version != 0).then_some(author),
            tags,
            body,
            deleted,
        })
    }
}
