//! Parser for the filter DSL.
//!
//! Grammar (in rough EBNF):
//!
//! filter   = ["all" | "and"] sequence
//! sequence = operand ([op] operand)*
//! op       = "and" | "or" | "&&" | "||"
//! operand  = "(" sequence ")" | pair
//! pair     = [KEY] [cmp [VALUE]]
//! cmp      = "=" | "!=" | "<" | "<=" | ">" | ">="
//!
//! A missing operator joins with OR. In "all" mode a pair with its own key
//! joins with AND and OR binds tighter than AND; otherwise AND binds tighter.
//! A pair without a key reuses the key of the pair before it.

use thiserror::Error;

use super::ast::{CompareOp, Comparison, FilterAst, Pattern, Wildcard};
use super::lexer::{Token, tokenize};

/// Longest key or value kept in a pattern, in bytes.
pub const MAX_PATTERN_LEN: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FilterError {
    #[error("Filter: missing right bracket(s)")]
    MissingRightBracket,
    #[error("Filter: missing left bracket(s)")]
    MissingLeftBracket,
    #[error("Filter: empty brackets")]
    EmptyBrackets,
    #[error("Filter: brackets are not allowed together with \"all\"")]
    BracketsWithAll,
    #[error("Filter: boolean operators and brackets are not allowed in tag filters")]
    OperatorInTagFilter,
    #[error("Filter: no key to reuse for \"{0}\"")]
    MissingKey(String),
    #[error("Filter: two boolean operators in a row")]
    RepeatedOperator,
    #[error("Filter: {0}")]
    Lexer(String),
}

/// Whether a list selects what to keep or what to drop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    Keep,
    Drop,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Joint {
    And,
    Or,
}

/// A parsed object filter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFilter {
    pub ast: FilterAst,
    pub meet_all: bool,
}

/// Strips a leading `all`/`and` keyword.
pub fn strip_meet_all(input: &str) -> (bool, &str) {
    let trimmed = input.trim_start();
    for prefix in ["all", "and"] {
        if let Some(rest) = trimmed.strip_prefix(prefix)
            && (rest.is_empty() || rest.starts_with([' ', '\t', '\n', '\r']))
        {
            return (true, rest);
        }
    }
    (false, input)
}

/// Splits `key<op>value` at the first unescaped comparison operator.
/// Without an operator the whole word is the key.
pub(super) fn split_pair(word: &str) -> (&str, CompareOp, &str) {
    let bytes = word.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        let next = bytes.get(i + 1).copied();
        let found = match bytes[i] {
            b'\\' => {
                i += 2;
                continue;
            }
            b'=' => Some((CompareOp::Eq, 1)),
            b'!' if next == Some(b'=') => Some((CompareOp::Ne, 2)),
            b'<' if next == Some(b'=') => Some((CompareOp::Le, 2)),
            b'<' => Some((CompareOp::Lt, 1)),
            b'>' if next == Some(b'=') => Some((CompareOp::Ge, 2)),
            b'>' => Some((CompareOp::Gt, 1)),
            _ => None,
        };
        if let Some((op, len)) = found {
            return (&word[..i], op, &word[i + len..]);
        }
        i += 1;
    }
    (word, CompareOp::Eq, "")
}

fn unescape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(escaped) = chars.next() {
                out.push(escaped);
            }
        } else {
            out.push(c);
        }
    }
    out
}

fn truncate(mut text: String) -> String {
    if text.len() > MAX_PATTERN_LEN {
        let mut end = MAX_PATTERN_LEN;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        tracing::warn!(
            "Filter: key or value too long, truncated to {} bytes: {}",
            MAX_PATTERN_LEN,
            text
        );
        text.truncate(end);
    }
    text
}

/// Compiles a raw key or value (escapes still present) into a pattern.
pub(super) fn compile_pattern(raw: &str, op: CompareOp) -> Pattern {
    let bytes = raw.as_bytes();
    let len = bytes.len();
    if raw == "*" {
        return Pattern {
            text: String::new(),
            op: collapse(op),
            wildcard: Wildcard::Any,
            numeric: false,
        };
    }
    let leading = len >= 2 && bytes[0] == b'*';
    let trailing = len >= 2 && bytes[len - 1] == b'*' && bytes[len - 2] != b'\\';
    let start = usize::from(leading);
    let end = if trailing { len - 1 } else { len };
    let inner = if start <= end { &raw[start..end] } else { "" };
    let text = truncate(unescape(inner));

    let wildcard = match (leading, trailing) {
        (true, true) => Wildcard::Contains,
        (true, false) => Wildcard::Suffix,
        (false, true) => Wildcard::Prefix,
        (false, false) => Wildcard::None,
    };
    if wildcard != Wildcard::None {
        return Pattern {
            text,
            op: collapse(op),
            wildcard,
            numeric: false,
        };
    }

    let digits = text.strip_prefix('-').unwrap_or(&text);
    let numeric = digits.starts_with(|c: char| c.is_ascii_digit());
    Pattern {
        text,
        op,
        wildcard,
        numeric,
    }
}

/// Wildcard patterns only distinguish match and mismatch.
fn collapse(op: CompareOp) -> CompareOp {
    match op {
        CompareOp::Eq | CompareOp::Lt | CompareOp::Gt => CompareOp::Eq,
        CompareOp::Ne | CompareOp::Le | CompareOp::Ge => CompareOp::Ne,
    }
}

/// Parser state.
struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    meet_all: bool,
    list: ListKind,
    prev_key: Option<Pattern>,
    prev_joint: Option<Joint>,
    after_close: bool,
}

impl Parser {
    fn new(tokens: Vec<Token>, meet_all: bool, list: ListKind) -> Self {
        Parser {
            tokens,
            pos: 0,
            meet_all,
            list,
            prev_key: None,
            prev_joint: None,
            after_close: false,
        }
    }

    fn peek(&self) -> &Token {
        self.tokens.get(self.pos).unwrap_or(&Token::Eof)
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens.get(self.pos).cloned().unwrap_or(Token::Eof);
        self.pos += 1;
        tok
    }

    /// The operator with the lower binding strength in the current mode.
    fn loose_joint(&self) -> Joint {
        if self.meet_all { Joint::And } else { Joint::Or }
    }

    fn implicit_joint(&self, continuation: bool) -> Joint {
        if self.meet_all && !continuation {
            Joint::And
        } else {
            Joint::Or
        }
    }

    /// Parse operands up to a closing bracket or the end of input.
    fn parse_sequence(&mut self, depth: usize) -> Result<FilterAst, FilterError> {
        let mut groups: Vec<Vec<FilterAst>> = vec![Vec::new()];
        let mut pending: Option<Joint> = None;
        let mut have_operand = false;

        loop {
            let continuation = match self.peek() {
                Token::Eof => {
                    if depth > 0 {
                        return Err(FilterError::MissingRightBracket);
                    }
                    break;
                }
                Token::RParen => {
                    if depth == 0 {
                        return Err(FilterError::MissingLeftBracket);
                    }
                    if !have_operand {
                        return Err(FilterError::EmptyBrackets);
                    }
                    break;
                }
                Token::And | Token::Or => {
                    let joint = if self.advance() == Token::And {
                        Joint::And
                    } else {
                        Joint::Or
                    };
                    if !have_operand {
                        tracing::warn!("Filter: boolean operator at start of expression ignored");
                        continue;
                    }
                    if pending.is_some() {
                        return Err(FilterError::RepeatedOperator);
                    }
                    pending = Some(joint);
                    continue;
                }
                Token::LParen => {
                    if self.meet_all {
                        return Err(FilterError::BracketsWithAll);
                    }
                    false
                }
                Token::Word(word) => split_pair(word).0.is_empty(),
            };

            let joint = have_operand
                .then(|| pending.take().unwrap_or_else(|| self.implicit_joint(continuation)));
            let operand = match self.advance() {
                Token::LParen => {
                    self.after_close = false;
                    let inner = self.parse_sequence(depth + 1)?;
                    self.advance(); // consume )
                    self.after_close = true;
                    inner
                }
                Token::Word(word) => FilterAst::Compare(self.parse_pair(&word, joint)?),
                other => return Err(FilterError::Lexer(format!("unexpected token {other:?}"))),
            };

            if joint == Some(self.loose_joint()) {
                groups.push(Vec::new());
            }
            if let Some(group) = groups.last_mut() {
                group.push(operand);
            }
            have_operand = true;
        }

        if pending.is_some() {
            tracing::warn!("Filter: boolean operator at end of expression ignored");
        }
        if !have_operand {
            return Ok(FilterAst::Or(Vec::new()));
        }

        let tight: Vec<FilterAst> = groups
            .into_iter()
            .map(|group| {
                if self.meet_all {
                    FilterAst::Or(group)
                } else {
                    FilterAst::And(group)
                }
            })
            .collect();
        let ast = if self.meet_all {
            FilterAst::And(tight)
        } else {
            FilterAst::Or(tight)
        };
        Ok(ast.simplify())
    }

    /// Compile one `key op value` word. `joint` is the operator joining it
    /// to the previous operand, if there is one.
    fn parse_pair(&mut self, word: &str, joint: Option<Joint>) -> Result<Comparison, FilterError> {
        let (key_raw, op, value_raw) = split_pair(word);
        let value = (!value_raw.is_empty()).then(|| compile_pattern(value_raw, op));

        let cmp = if key_raw.is_empty() {
            let ambiguous = !self.meet_all
                && joint == Some(Joint::Or)
                && self.prev_joint == Some(Joint::And);
            let key = match &self.prev_key {
                Some(key) if joint.is_some() && !self.after_close && !ambiguous => key.clone(),
                _ => return Err(FilterError::MissingKey(word.to_string())),
            };
            Comparison {
                key,
                value,
                absent_matches: joint == Some(Joint::And),
            }
        } else {
            let key = compile_pattern(key_raw, CompareOp::Eq);
            let absent_matches = self.list == ListKind::Keep
                && value
                    .as_ref()
                    .is_some_and(|v| v.op == CompareOp::Ne && !v.numeric);
            Comparison {
                key,
                value,
                absent_matches,
            }
        };

        self.prev_key = Some(cmp.key.clone());
        self.prev_joint = joint;
        self.after_close = false;
        Ok(cmp)
    }
}

/// Parse an object filter string into an AST. An empty filter matches
/// nothing.
pub fn parse_filter(input: &str, list: ListKind) -> Result<ParsedFilter, FilterError> {
    let (meet_all, body) = strip_meet_all(input);
    let tokens = tokenize(body).map_err(FilterError::Lexer)?;
    let mut parser = Parser::new(tokens, meet_all, list);
    let ast = parser.parse_sequence(0)?;
    Ok(ParsedFilter { ast, meet_all })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keep(input: &str) -> FilterAst {
        parse_filter(input, ListKind::Keep).unwrap().ast
    }

    fn pair(key: &str, value: Option<Pattern>) -> FilterAst {
        FilterAst::Compare(Comparison {
            key: Pattern::exact(key),
            value,
            absent_matches: false,
        })
    }

    #[test]
    fn test_key_only() {
        assert_eq!(keep("name"), pair("name", None));
        assert_eq!(keep("name="), pair("name", None));
    }

    #[test]
    fn test_exact_match() {
        assert_eq!(
            keep("highway=primary"),
            pair("highway", Some(Pattern::exact("primary")))
        );
    }

    #[test]
    fn test_numeric_detection() {
        let FilterAst::Compare(cmp) = keep("layer>=2") else {
            panic!("expected comparison");
        };
        let value = cmp.value.unwrap();
        assert_eq!(value.op, CompareOp::Ge);
        assert!(value.numeric);

        let FilterAst::Compare(cmp) = keep("ele<-5") else {
            panic!("expected comparison");
        };
        assert!(cmp.value.unwrap().numeric);

        let FilterAst::Compare(cmp) = keep("ref=A1") else {
            panic!("expected comparison");
        };
        assert!(!cmp.value.unwrap().numeric);
    }

    #[test]
    fn test_wildcards_collapse_operator() {
        let FilterAst::Compare(cmp) = keep("highway<=*_link") else {
            panic!("expected comparison");
        };
        let value = cmp.value.unwrap();
        assert_eq!(value.wildcard, Wildcard::Suffix);
        assert_eq!(value.op, CompareOp::Ne);
        assert_eq!(value.text, "_link");

        let FilterAst::Compare(cmp) = keep(r"name=foo\*") else {
            panic!("expected comparison");
        };
        let value = cmp.value.unwrap();
        assert_eq!(value.wildcard, Wildcard::None);
        assert_eq!(value.text, "foo*");

        let FilterAst::Compare(cmp) = keep("*=*") else {
            panic!("expected comparison");
        };
        assert_eq!(cmp.key.wildcard, Wildcard::Any);
    }

    #[test]
    fn test_escaped_operator_stays_in_key() {
        let FilterAst::Compare(cmp) = keep(r"a\=b=c") else {
            panic!("expected comparison");
        };
        assert_eq!(cmp.key.text, "a=b");
        assert_eq!(cmp.value.unwrap().text, "c");
    }

    #[test]
    fn test_default_join_is_or() {
        assert!(matches!(keep("a=1 b=2"), FilterAst::Or(ref v) if v.len() == 2));
    }

    #[test]
    fn test_and_binds_tighter() {
        let ast = keep("a=1 or b=2 and c=3");
        let FilterAst::Or(items) = ast else {
            panic!("expected or");
        };
        assert_eq!(items.len(), 2);
        assert!(matches!(items[1], FilterAst::And(ref v) if v.len() == 2));
    }

    #[test]
    fn test_brackets_group() {
        let ast = keep("( a=1 or b=2 ) and c=3");
        let FilterAst::And(items) = ast else {
            panic!("expected and");
        };
        assert!(matches!(items[0], FilterAst::Or(_)));
    }

    #[test]
    fn test_continuation_reuses_key() {
        let ast = keep("amenity=bar =pub");
        let FilterAst::Or(items) = ast else {
            panic!("expected or");
        };
        let FilterAst::Compare(second) = &items[1] else {
            panic!("expected comparison");
        };
        assert_eq!(second.key.text, "amenity");
        assert_eq!(second.value.as_ref().unwrap().text, "pub");
        assert!(!second.absent_matches);
    }

    #[test]
    fn test_misplaced_continuations() {
        assert!(matches!(
            parse_filter("=pub", ListKind::Keep),
            Err(FilterError::MissingKey(_))
        ));
        assert!(matches!(
            parse_filter("a=1 ( =2 )", ListKind::Keep),
            Err(FilterError::MissingKey(_))
        ));
        assert!(matches!(
            parse_filter("( a=1 ) =2", ListKind::Keep),
            Err(FilterError::MissingKey(_))
        ));
        assert!(matches!(
            parse_filter("a=1 and b=2 or =3", ListKind::Keep),
            Err(FilterError::MissingKey(_))
        ));
    }

    #[test]
    fn test_bracket_errors() {
        assert_eq!(
            parse_filter("( a=1", ListKind::Keep),
            Err(FilterError::MissingRightBracket)
        );
        assert_eq!(
            parse_filter("a=1 )", ListKind::Keep),
            Err(FilterError::MissingLeftBracket)
        );
        assert_eq!(
            parse_filter("( )", ListKind::Keep),
            Err(FilterError::EmptyBrackets)
        );
        assert_eq!(
            parse_filter("all ( a=1 )", ListKind::Keep),
            Err(FilterError::BracketsWithAll)
        );
        assert_eq!(
            parse_filter("a=1 and or b=1", ListKind::Keep),
            Err(FilterError::RepeatedOperator)
        );
    }

    #[test]
    fn test_meet_all_inverts_precedence() {
        let parsed = parse_filter("all a=1 b=2 or c=3", ListKind::Keep).unwrap();
        assert!(parsed.meet_all);
        let FilterAst::And(items) = parsed.ast else {
            panic!("expected and");
        };
        assert_eq!(items.len(), 2);
        assert!(matches!(items[1], FilterAst::Or(ref v) if v.len() == 2));
    }

    #[test]
    fn test_meet_all_continuation_joins_with_or() {
        let parsed = parse_filter("all amenity=bar =pub name", ListKind::Keep).unwrap();
        let FilterAst::And(items) = parsed.ast else {
            panic!("expected and");
        };
        assert!(matches!(items[0], FilterAst::Or(ref v) if v.len() == 2));
    }

    #[test]
    fn test_not_equal_absence_only_for_keep_text() {
        let FilterAst::Compare(cmp) = keep("name!=x") else {
            panic!("expected comparison");
        };
        assert!(cmp.absent_matches);

        let FilterAst::Compare(cmp) = keep("lanes!=2") else {
            panic!("expected comparison");
        };
        assert!(!cmp.absent_matches);

        let FilterAst::Compare(cmp) = parse_filter("name!=x", ListKind::Drop).unwrap().ast else {
            panic!("expected comparison");
        };
        assert!(!cmp.absent_matches);
    }

    #[test]
    fn test_empty_filter_matches_nothing() {
        assert_eq!(keep(""), FilterAst::Or(vec![]));
        assert_eq!(keep("all"), FilterAst::Or(vec![]));
    }

    #[test]
    fn test_leading_operator_is_ignored() {
        assert_eq!(keep("or name"), pair("name", None));
    }

    #[test]
    fn test_long_values_are_truncated() {
        let long = "x".repeat(150);
        let FilterAst::Compare(cmp) = keep(&format!("name={long}")) else {
            panic!("expected comparison");
        };
        assert_eq!(cmp.value.unwrap().text.len(), MAX_PATTERN_LEN);
    }
}
