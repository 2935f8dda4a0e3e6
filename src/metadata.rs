use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::model::Author;

/// How author blocks are carried into the output. Chosen once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AuthorMode {
    #[default]
    Keep,
    /// Keep the version, drop timestamp, changeset and user.
    DropDetails,
    /// Drop the whole block including the version.
    DropAll,
    /// Replace every block with the shortest valid one.
    Fake,
    /// Write only `version="1"`.
    FakeVersion,
}

impl AuthorMode {
    pub fn from_flags(
        drop_author: bool,
        drop_version: bool,
        fake_author: bool,
        fake_version: bool,
    ) -> Self {
        if drop_version {
            AuthorMode::DropAll
        } else if fake_author {
            AuthorMode::Fake
        } else if fake_version {
            AuthorMode::FakeVersion
        } else if drop_author {
            AuthorMode::DropDetails
        } else {
            AuthorMode::Keep
        }
    }
}

/// The part of an author block a formatter is allowed to write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorFields<'a> {
    Absent,
    VersionOnly(u32),
    Full(std::borrow::Cow<'a, Author>),
}

pub fn fake_author() -> Author {
    Author {
        version: 1,
        timestamp: 1,
        changeset: 1,
        uid: 0,
        user: String::new(),
    }
}

pub fn apply_author_mode(mode: AuthorMode, author: Option<&Author>) -> AuthorFields<'_> {
    match (mode, author) {
        (AuthorMode::Fake, _) => AuthorFields::Full(std::borrow::Cow::Owned(fake_author())),
        (AuthorMode::FakeVersion, _) => AuthorFields::VersionOnly(1),
        (AuthorMode::DropAll, _) | (_, None) => AuthorFields::Absent,
        (_, Some(a)) if a.version == 0 => AuthorFields::Absent,
        (AuthorMode::DropDetails, Some(a)) => AuthorFields::VersionOnly(a.version),
        (AuthorMode::Keep, Some(a)) if a.timestamp == 0 => AuthorFields::VersionOnly(a.version),
        (AuthorMode::Keep, Some(a)) => AuthorFields::Full(std::borrow::Cow::Borrowed(a)),
    }
}

/// `YYYY-MM-DDTHH:MM:SSZ`; out-of-range values fall back to the epoch.
pub fn format_timestamp(seconds: i64) -> String {
    OffsetDateTime::from_unix_timestamp(seconds)
        .ok()
        .and_then(|dt| dt.format(&Rfc3339).ok())
        .unwrap_or_else(|| "1970-01-01T00:00:00Z".to_string())
}

pub fn parse_timestamp(text: &str) -> Option<i64> {
    OffsetDateTime::parse(text, &Rfc3339)
        .ok()
        .map(|dt| dt.unix_timestamp())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn author() -> Author {
        Author {
            version: 3,
            timestamp: 1285874610,
            changeset: 42,
            uid: 7,
            user: "mapper".to_string(),
        }
    }

    #[test]
    fn timestamps_round_trip_in_osm_format() {
        assert_eq!(format_timestamp(1285874610), "2010-09-30T19:23:30Z");
        assert_eq!(parse_timestamp("2010-09-30T19:23:30Z"), Some(1285874610));
        assert_eq!(format_timestamp(1), "1970-01-01T00:00:01Z");
        assert_eq!(parse_timestamp("yesterday"), None);
    }

    #[test]
    fn author_modes_select_fields() {
        let a = author();
        assert_eq!(
            apply_author_mode(AuthorMode::Keep, Some(&a)),
            AuthorFields::Full(std::borrow::Cow::Borrowed(&a))
        );
        assert_eq!(
            apply_author_mode(AuthorMode::DropDetails, Some(&a)),
            AuthorFields::VersionOnly(3)
        );
        assert_eq!(apply_author_mode(AuthorMode::DropAll, Some(&a)), AuthorFields::Absent);
        assert_eq!(
            apply_author_mode(AuthorMode::FakeVersion, None),
            AuthorFields::VersionOnly(1)
        );
        assert_eq!(
            apply_author_mode(AuthorMode::Fake, None),
            AuthorFields::Full(std::borrow::Cow::Owned(fake_author()))
        );
        assert_eq!(apply_author_mode(AuthorMode::Keep, None), AuthorFields::Absent);
    }

    #[test]
    fn drop_version_wins_over_fake_flags() {
        assert_eq!(AuthorMode::from_flags(true, true, true, true), AuthorMode::DropAll);
        assert_eq!(AuthorMode::from_flags(true, false, true, false), AuthorMode::Fake);
        assert_eq!(AuthorMode::from_flags(true, false, false, false), AuthorMode::DropDetails);
    }
}
