use anyhow::Result;
use std::borrow::Cow;
use std::io::{BufWriter, Write};

use super::Formatter;
use crate::metadata::{AuthorFields, AuthorMode, apply_author_mode, format_timestamp};
use crate::model::{Author, BBox, Body, Entity};
use crate::utils::{round_to_micro, sfix6_padded, sfix7, sfix7_padded};

/// XML document flavour. The emulations reproduce the attribute order,
/// indentation and escaping of other tools' `.osm` output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum XmlDialect {
    Native,
    Pbf2Osm,
    Osmosis,
    Osmium,
    /// `.osc`: objects grouped in create/modify/delete blocks.
    Change,
    /// `.osh`: every object carries a `visible` attribute.
    History,
}

impl XmlDialect {
    fn is_emulation(self) -> bool {
        matches!(
            self,
            XmlDialect::Pbf2Osm | XmlDialect::Osmosis | XmlDialect::Osmium
        )
    }

    fn generator(self) -> Cow<'static, str> {
        match self {
            XmlDialect::Pbf2Osm => Cow::Borrowed("pbf2osm"),
            XmlDialect::Osmosis => Cow::Borrowed("Osmosis 0.39"),
            XmlDialect::Osmium => {
                Cow::Borrowed("Osmium (http://wiki.openstreetmap.org/wiki/Osmium)")
            }
            XmlDialect::Native | XmlDialect::Change | XmlDialect::History => {
                Cow::Owned(format!("osmfilter {}", env!("CARGO_PKG_VERSION")))
            }
        }
    }

    /// Indentation of objects and of their children.
    fn indent(self) -> (&'static str, &'static str) {
        match self {
            XmlDialect::Osmosis | XmlDialect::Osmium => ("  ", "    "),
            _ => ("\t", "\t\t"),
        }
    }

    /// Tags and roles use named entities where one exists.
    fn mnemonic_text(self) -> bool {
        matches!(self, XmlDialect::Osmosis | XmlDialect::Osmium)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Action {
    Create,
    Modify,
    Delete,
}

impl Action {
    fn tag(self) -> &'static str {
        match self {
            Action::Create => "create",
            Action::Modify => "modify",
            Action::Delete => "delete",
        }
    }
}

/// Escapes characters that may not appear verbatim in an attribute value.
/// Control characters, quotes, `&`, `<`, `>`, braces and DEL become numeric
/// references; with `mnemonic`, the five XML entities are used instead where
/// they exist.
pub fn escape(text: &str, mnemonic: bool) -> Cow<'_, str> {
    let needs_escape =
        |c: char| (c as u32) < 0x20 || matches!(c, '"' | '&' | '\'' | '<' | '>' | '{' | '}' | '\x7f');
    if !text.chars().any(needs_escape) {
        return Cow::Borrowed(text);
    }
    let mut out = String::with_capacity(text.len() + 16);
    for c in text.chars() {
        if !needs_escape(c) {
            out.push(c);
            continue;
        }
        let named = match c {
            '"' => Some("&quot;"),
            '&' => Some("&amp;"),
            '\'' => Some("&apos;"),
            '<' => Some("&lt;"),
            '>' => Some("&gt;"),
            _ => None,
        };
        match named {
            Some(entity) if mnemonic => out.push_str(entity),
            _ => out.push_str(&format!("&#{};", c as u32)),
        }
    }
    Cow::Owned(out)
}

pub struct XmlFormatter<W: Write> {
    writer: BufWriter<W>,
    dialect: XmlDialect,
    author_mode: AuthorMode,
    /// Give deletions `lat="0" lon="0"`.
    fake_lonlat: bool,
    action: Option<Action>,
}

impl<W: Write> XmlFormatter<W> {
    pub fn new(writer: W, dialect: XmlDialect, author_mode: AuthorMode, fake_lonlat: bool) -> Self {
        Self {
            writer: BufWriter::new(writer),
            dialect,
            author_mode,
            fake_lonlat,
            action: None,
        }
    }

    #[cfg(test)]
    pub fn into_inner(self) -> Result<W> {
        self.writer.into_inner().map_err(|e| e.into_error().into())
    }

    /// Opens a new action block in change files when the action differs.
    fn switch_action(&mut self, action: Option<Action>) -> Result<()> {
        if self.dialect != XmlDialect::Change || self.action == action {
            return Ok(());
        }
        if let Some(previous) = self.action {
            writeln!(self.writer, "</{}>", previous.tag())?;
        }
        if let Some(next) = action {
            writeln!(self.writer, "<{}>", next.tag())?;
        }
        self.action = action;
        Ok(())
    }

    fn author_details(&self, out: &mut String, author: &Author) {
        let has_user = author.uid != 0 && !author.user.is_empty();
        let user = escape(&author.user, self.dialect == XmlDialect::Osmosis);
        let timestamp = format_timestamp(author.timestamp);
        let changeset = format!(" changeset=\"{}\"", author.changeset);
        let uid_user = if has_user {
            format!(" uid=\"{}\" user=\"{}\"", author.uid, user)
        } else {
            String::new()
        };
        match self.dialect {
            XmlDialect::Pbf2Osm => {
                out.push_str(&changeset);
                if has_user {
                    out.push_str(&format!(" user=\"{}\" uid=\"{}\"", user, author.uid));
                }
                out.push_str(&format!(" timestamp=\"{timestamp}\""));
            }
            XmlDialect::Osmosis => {
                out.push_str(&format!(" timestamp=\"{timestamp}\""));
                out.push_str(&uid_user);
                out.push_str(&changeset);
            }
            XmlDialect::Osmium => {
                out.push_str(&changeset);
                out.push_str(&format!(" timestamp=\"{timestamp}\""));
                out.push_str(&uid_user);
            }
            XmlDialect::Native | XmlDialect::Change | XmlDialect::History => {
                out.push_str(&format!(" timestamp=\"{timestamp}\""));
                out.push_str(&changeset);
                out.push_str(&uid_user);
            }
        }
    }

    fn author_attrs(&self, entity: &Entity) -> String {
        let mut out = String::new();
        let fields = apply_author_mode(self.author_mode, entity.author.as_ref());
        let version = match &fields {
            AuthorFields::Absent => return out,
            AuthorFields::VersionOnly(version) => *version,
            AuthorFields::Full(author) => author.version,
        };
        out.push_str(&format!(" version=\"{version}\""));
        if self.author_mode == AuthorMode::FakeVersion {
            return out;
        }
        if let AuthorFields::Full(author) = &fields {
            self.author_details(&mut out, author);
        }
        if self.dialect == XmlDialect::History {
            out.push_str(if entity.deleted {
                " visible=\"false\""
            } else {
                " visible=\"true\""
            });
        }
        out
    }

    fn write_delete(&mut self, entity: &Entity) -> Result<()> {
        self.switch_action(Some(Action::Delete))?;
        let (indent, _) = self.dialect.indent();
        let author = self.author_attrs(entity);
        let lonlat = if self.fake_lonlat {
            " lat=\"0\" lon=\"0\""
        } else {
            ""
        };
        writeln!(
            self.writer,
            "{indent}<{} id=\"{}\"{author}{lonlat}/>",
            entity.kind(),
            entity.id
        )?;
        Ok(())
    }

    fn node_coords(&self, lon: i32, lat: i32) -> String {
        match self.dialect {
            XmlDialect::Pbf2Osm => format!(
                " lat=\"{}\" lon=\"{}\"",
                sfix7_padded(lat),
                sfix7_padded(lon)
            ),
            XmlDialect::Osmium => format!(
                " lon=\"{}\" lat=\"{}\"",
                sfix6_padded(round_to_micro(lon)),
                sfix6_padded(round_to_micro(lat))
            ),
            _ => format!(" lat=\"{}\" lon=\"{}\"", sfix7(lat), sfix7(lon)),
        }
    }
}

impl<W: Write + Send> Formatter for XmlFormatter<W> {
    fn start(&mut self, bbox: Option<BBox>) -> Result<()> {
        if self.dialect == XmlDialect::Osmium {
            writeln!(self.writer, "<?xml version=\"1.0\" encoding=\"UTF-8\"?>")?;
        } else {
            writeln!(self.writer, "<?xml version='1.0' encoding='UTF-8'?>")?;
        }
        let root = if self.dialect == XmlDialect::Change {
            "osmChange"
        } else {
            "osm"
        };
        writeln!(
            self.writer,
            "<{root} version=\"0.6\" generator=\"{}\">",
            self.dialect.generator()
        )?;
        match (bbox, self.dialect) {
            (None, _) | (_, XmlDialect::Pbf2Osm) => {}
            (Some(b), XmlDialect::Osmosis) => writeln!(
                self.writer,
                "  <bound box=\"{},{},{},{}\" origin=\"0.40\"/>",
                sfix7(b.y1),
                sfix7(b.x1),
                sfix7(b.y2),
                sfix7(b.x2)
            )?,
            (Some(b), _) => writeln!(
                self.writer,
                "\t<bounds minlat=\"{}\" minlon=\"{}\" maxlat=\"{}\" maxlon=\"{}\"/>",
                sfix7(b.y1),
                sfix7(b.x1),
                sfix7(b.y2),
                sfix7(b.x2)
            )?,
        }
        Ok(())
    }

    fn write(&mut self, entity: &Entity) -> Result<()> {
        if entity.deleted {
            return self.write_delete(entity);
        }
        let version = entity.author.as_ref().map_or(0, |a| a.version);
        self.switch_action(Some(if version == 1 {
            Action::Create
        } else {
            Action::Modify
        }))?;

        let (indent, child) = self.dialect.indent();
        let kind = entity.kind();
        let author = self.author_attrs(entity);
        let mut head = format!("{indent}<{kind} id=\"{}\"", entity.id);
        match (&entity.body, self.dialect) {
            (Body::Node { lon, lat }, XmlDialect::Osmosis | XmlDialect::Osmium) => {
                head.push_str(&author);
                head.push_str(&self.node_coords(*lon, *lat));
            }
            (Body::Node { lon, lat }, _) => {
                head.push_str(&self.node_coords(*lon, *lat));
                head.push_str(&author);
            }
            _ => head.push_str(&author),
        }

        let has_children = !entity.tags.is_empty()
            || match &entity.body {
                Body::Node { .. } => false,
                Body::Way(nodes) => !nodes.is_empty(),
                Body::Relation(members) => !members.is_empty(),
            };
        if !has_children {
            writeln!(self.writer, "{head}/>")?;
            return Ok(());
        }
        writeln!(self.writer, "{head}>")?;

        let mnemonic = self.dialect.mnemonic_text();
        match &entity.body {
            Body::Node { .. } => {}
            Body::Way(nodes) => {
                for node in nodes {
                    writeln!(self.writer, "{child}<nd ref=\"{node}\"/>")?;
                }
            }
            Body::Relation(members) => {
                for member in members {
                    writeln!(
                        self.writer,
                        "{child}<member type=\"{}\" ref=\"{}\" role=\"{}\"/>",
                        member.kind,
                        member.id,
                        escape(&member.role, mnemonic)
                    )?;
                }
            }
        }
        let tag_end = if self.dialect == XmlDialect::Pbf2Osm {
            " />"
        } else {
            "/>"
        };
        for (key, value) in &entity.tags {
            writeln!(
                self.writer,
                "{child}<tag k=\"{}\" v=\"{}\"{tag_end}",
                escape(key, mnemonic),
                escape(value, mnemonic)
            )?;
        }
        writeln!(self.writer, "{indent}</{kind}>")?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.switch_action(None)?;
        if self.dialect == XmlDialect::Change {
            writeln!(self.writer, "</osmChange>")?;
        } else {
            writeln!(self.writer, "</osm>")?;
        }
        if self.dialect.is_emulation() {
            writeln!(self.writer, "<!--End of emulated output.-->")?;
        }
        self.writer.flush()?;
        Ok(())
    }

    fn accepts_deletions(&self) -> bool {
        matches!(self.dialect, XmlDialect::Change | XmlDialect::History)
    }
}
