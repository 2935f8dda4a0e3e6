//! Tag filters: decide per tag whether it survives on a written object.

use super::ast::{CompareOp, Pattern};
use super::lexer::{Token, tokenize};
use super::parser::{FilterError, ListKind, compile_pattern, split_pair, strip_meet_all};

/// Key assumed for pairs that precede any explicit key.
const DEFAULT_KEY: &str = "name";

#[derive(Debug, Clone, PartialEq)]
struct TagPair {
    key: Pattern,
    value: Option<Pattern>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TagFilter {
    pairs: Vec<TagPair>,
    meet_all: bool,
    list: ListKind,
}

impl TagFilter {
    pub fn parse(input: &str, list: ListKind) -> Result<Self, FilterError> {
        let (meet_all, body) = strip_meet_all(input);
        let tokens = tokenize(body).map_err(FilterError::Lexer)?;
        let mut key = Pattern::exact(DEFAULT_KEY);
        let mut pairs = Vec::new();
        for token in tokens {
            match token {
                Token::Eof => break,
                Token::Word(word) => {
                    let (key_raw, op, value_raw) = split_pair(&word);
                    if !key_raw.is_empty() {
                        key = compile_pattern(key_raw, CompareOp::Eq);
                    }
                    let value = (!value_raw.is_empty()).then(|| compile_pattern(value_raw, op));
                    pairs.push(TagPair {
                        key: key.clone(),
                        value,
                    });
                }
                Token::And | Token::Or | Token::LParen | Token::RParen => {
                    return Err(FilterError::OperatorInTagFilter);
                }
            }
        }
        Ok(Self {
            pairs,
            meet_all,
            list,
        })
    }

    /// Should the tag `key=value` be written?
    pub fn keeps(&self, key: &str, value: &str) -> bool {
        let mut key_matched = false;
        for pair in &self.pairs {
            if !pair.key.matches(key) {
                continue;
            }
            key_matched = true;
            if pair.value.as_ref().is_none_or(|v| v.matches(value)) {
                return self.list == ListKind::Keep;
            }
        }
        match self.list {
            ListKind::Keep => !(key_matched || self.meet_all),
            ListKind::Drop => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keep(input: &str) -> TagFilter {
        TagFilter::parse(input, ListKind::Keep).unwrap()
    }

    #[test]
    fn keep_list_drops_other_values_of_listed_keys() {
        let filter = keep("highway=primary =secondary");
        assert!(filter.keeps("highway", "primary"));
        assert!(filter.keeps("highway", "secondary"));
        assert!(!filter.keeps("highway", "track"));
        assert!(filter.keeps("surface", "asphalt"));
    }

    #[test]
    fn keep_list_in_all_mode_drops_unlisted_keys() {
        let filter = keep("all highway= name=");
        assert!(filter.keeps("highway", "track"));
        assert!(filter.keeps("name", "A1"));
        assert!(!filter.keeps("surface", "asphalt"));
    }

    #[test]
    fn leading_value_applies_to_name() {
        let filter = keep("=Main*");
        assert!(filter.keeps("name", "Main Street"));
        assert!(!filter.keeps("name", "Side Street"));
        assert!(filter.keeps("ref", "B1"));
    }

    #[test]
    fn drop_list_removes_matching_pairs() {
        let filter = TagFilter::parse("created_by= source=survey", ListKind::Drop).unwrap();
        assert!(!filter.keeps("created_by", "JOSM"));
        assert!(!filter.keeps("source", "survey"));
        assert!(filter.keeps("source", "bing"));
        assert!(filter.keeps("name", "x"));
    }

    #[test]
    fn operators_are_rejected() {
        assert_eq!(
            TagFilter::parse("a= or b=", ListKind::Keep),
            Err(FilterError::OperatorInTagFilter)
        );
        assert_eq!(
            TagFilter::parse("( a= )", ListKind::Drop),
            Err(FilterError::OperatorInTagFilter)
        );
    }
}
