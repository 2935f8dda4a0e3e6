use anyhow::Result;

use crate::model::{BBox, Entity};

pub mod o5m;
pub mod xml;

pub use self::o5m::O5mFormatter;
pub use self::xml::{XmlDialect, XmlFormatter};

/// Serializes the filtered object stream in one output format.
///
/// `start` is called once before the first object (or before `finish` if
/// nothing passes the filters) with the input's bounding box, if any.
pub trait Formatter: Send {
    fn start(&mut self, bbox: Option<BBox>) -> Result<()>;
    fn write(&mut self, entity: &Entity) -> Result<()>;
    fn finish(&mut self) -> Result<()>;
    /// Change and history formats carry deletions; the others never see them.
    fn accepts_deletions(&self) -> bool;
}
