//! Per-kind filter lists as configured for one run.

use super::ast::FilterAst;
use super::eval::evaluate_filter;
use super::parser::{FilterError, ListKind, parse_filter, strip_meet_all};
use super::tags::TagFilter;
use crate::model::Kind;

/// Raw filter text per list and object kind, in the order given.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterTexts {
    pub keep: [Vec<String>; 3],
    pub drop: [Vec<String>; 3],
    pub keep_tags: [Vec<String>; 3],
    pub drop_tags: [Vec<String>; 3],
}

impl FilterTexts {
    pub fn push(list: &mut [Vec<String>; 3], kinds: &[Kind], text: &str) {
        for kind in kinds {
            list[kind.index()].push(text.to_string());
        }
    }
}

/// Joins fragments given for one list. Any fragment may carry the `all`
/// prefix; it then applies to the whole list.
fn join_fragments(fragments: &[String]) -> Option<String> {
    if fragments.is_empty() {
        return None;
    }
    let mut meet_all = false;
    let mut body = Vec::with_capacity(fragments.len());
    for fragment in fragments {
        let (all, rest) = strip_meet_all(fragment);
        meet_all |= all;
        body.push(rest.trim());
    }
    let joined = body.join(" ");
    Some(if meet_all {
        format!("all {joined}")
    } else {
        joined
    })
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectFilter {
    /// A list was given at all, even if empty.
    pub active: bool,
    pub ast: FilterAst,
}

impl ObjectFilter {
    fn inactive() -> Self {
        Self {
            active: false,
            ast: FilterAst::Or(Vec::new()),
        }
    }

    fn compile(fragments: &[String], list: ListKind) -> Result<Self, FilterError> {
        match join_fragments(fragments) {
            None => Ok(Self::inactive()),
            Some(text) => Ok(Self {
                active: true,
                ast: parse_filter(&text, list)?.ast,
            }),
        }
    }

    pub fn matches(&self, tags: &[(&str, &str)]) -> bool {
        evaluate_filter(&self.ast, tags)
    }
}

#[derive(Debug, Clone)]
pub struct FilterSet {
    keep: [ObjectFilter; 3],
    drop: [ObjectFilter; 3],
    keep_tags: [Option<TagFilter>; 3],
    drop_tags: [Option<TagFilter>; 3],
    pseudo_keys: bool,
}

impl FilterSet {
    pub fn compile(texts: &FilterTexts) -> Result<Self, FilterError> {
        let objects = |lists: &[Vec<String>; 3], list| -> Result<[ObjectFilter; 3], FilterError> {
            Ok([
                ObjectFilter::compile(&lists[0], list)?,
                ObjectFilter::compile(&lists[1], list)?,
                ObjectFilter::compile(&lists[2], list)?,
            ])
        };
        let tags = |lists: &[Vec<String>; 3], list| -> Result<[Option<TagFilter>; 3], FilterError> {
            let one = |fragments: &[String]| {
                join_fragments(fragments)
                    .map(|text| TagFilter::parse(&text, list))
                    .transpose()
            };
            Ok([one(&lists[0])?, one(&lists[1])?, one(&lists[2])?])
        };

        let keep = objects(&texts.keep, ListKind::Keep)?;
        let drop = objects(&texts.drop, ListKind::Drop)?;
        let pseudo_keys = keep.iter().chain(drop.iter()).any(|f| f.ast.uses_pseudo_keys());
        Ok(Self {
            keep,
            drop,
            keep_tags: tags(&texts.keep_tags, ListKind::Keep)?,
            drop_tags: tags(&texts.drop_tags, ListKind::Drop)?,
            pseudo_keys,
        })
    }

    pub fn keep(&self, kind: Kind) -> &ObjectFilter {
        &self.keep[kind.index()]
    }

    pub fn drop(&self, kind: Kind) -> &ObjectFilter {
        &self.drop[kind.index()]
    }

    /// Any object keep list given for any kind.
    pub fn has_keep_filter(&self) -> bool {
        self.keep.iter().any(|f| f.active)
    }

    pub fn has_tag_filter(&self, kind: Kind) -> bool {
        self.keep_tags[kind.index()].is_some() || self.drop_tags[kind.index()].is_some()
    }

    /// Whether `@id`, `@uid` and `@user` need to be offered to the filters.
    pub fn needs_pseudo_keys(&self) -> bool {
        self.pseudo_keys
    }

    pub fn keeps_tag(&self, kind: Kind, key: &str, value: &str) -> bool {
        let i = kind.index();
        self.keep_tags[i].as_ref().is_none_or(|f| f.keeps(key, value))
            && self.drop_tags[i].as_ref().is_none_or(|f| f.keeps(key, value))
    }
}
