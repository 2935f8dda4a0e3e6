//! Format-independent representation of OSM objects.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Kind {
    Node,
    Way,
    Relation,
}

impl Kind {
    pub const ALL: [Kind; 3] = [Kind::Node, Kind::Way, Kind::Relation];

    pub fn index(self) -> usize {
        match self {
            Kind::Node => 0,
            Kind::Way => 1,
            Kind::Relation => 2,
        }
    }

    pub fn from_index(index: usize) -> Option<Kind> {
        Kind::ALL.get(index).copied()
    }

    pub fn name(self) -> &'static str {
        match self {
            Kind::Node => "node",
            Kind::Way => "way",
            Kind::Relation => "relation",
        }
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Version and authorship block. Only present when the object carries a
/// non-zero version.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Author {
    pub version: u32,
    /// Seconds since the Unix epoch; 0 means no timestamp/changeset/user.
    pub timestamp: i64,
    pub changeset: i64,
    pub uid: u32,
    pub user: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Member {
    pub kind: Kind,
    pub id: i64,
    pub role: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Body {
    /// Coordinates in 1e-7 degrees.
    Node { lon: i32, lat: i32 },
    Way(Vec<i64>),
    Relation(Vec<Member>),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub id: i64,
    pub author: Option<Author>,
    pub tags: Vec<(String, String)>,
    pub body: Body,
    /// Deletion request from a change file.
    pub deleted: bool,
}

impl Entity {
    pub fn kind(&self) -> Kind {
        match self.body {
            Body::Node { .. } => Kind::Node,
            Body::Way(_) => Kind::Way,
            Body::Relation(_) => Kind::Relation,
        }
    }

    pub fn empty_body(kind: Kind) -> Body {
        match kind {
            Kind::Node => Body::Node { lon: 0, lat: 0 },
            Kind::Way => Body::Way(Vec::new()),
            Kind::Relation => Body::Relation(Vec::new()),
        }
    }
}

/// Bounding box in 1e-7 degrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}
