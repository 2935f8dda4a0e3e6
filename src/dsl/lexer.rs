//! Lexer/tokenizer for the filter DSL.
//!
//! Words are separated by unescaped whitespace; a backslash keeps the
//! following character (including a space) inside the word.

use winnow::ascii::multispace0;
use winnow::combinator::{alt, repeat};
use winnow::prelude::*;
use winnow::token::{any, none_of};

/// Token types for the DSL.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// `key`, `key=value`, `=value`; escapes still in place
    Word(String),

    // Boolean operators
    And, // and, AND, &&
    Or,  // or, OR, ||

    // Punctuation (only as separate words)
    LParen, // (
    RParen, // )

    // End of input
    Eof,
}

// Manually define PResult for resilience against winnow version changes
type PResult<T> = Result<T, winnow::error::ErrMode<winnow::error::ContextError>>;

/// Lex one whitespace-delimited word, honouring backslash escapes.
fn lex_word<'i>(input: &mut &'i str) -> PResult<&'i str> {
    repeat::<_, _, (), _, _>(
        1..,
        alt((
            ('\\', any).void(),
            none_of([' ', '\t', '\r', '\n']).void(),
        )),
    )
    .take()
    .parse_next(input)
}

fn classify(word: &str) -> Token {
    match word {
        "(" => Token::LParen,
        ")" => Token::RParen,
        "&&" => Token::And,
        "||" => Token::Or,
        w if w.eq_ignore_ascii_case("and") => Token::And,
        w if w.eq_ignore_ascii_case("or") => Token::Or,
        w => Token::Word(w.to_string()),
    }
}

/// Lex a single token.
fn lex_token(input: &mut &str) -> PResult<Token> {
    multispace0.parse_next(input)?;

    if input.is_empty() {
        return Ok(Token::Eof);
    }

    lex_word.map(classify).parse_next(input)
}

/// Tokenize the entire input.
pub fn tokenize(input: &str) -> Result<Vec<Token>, String> {
    let mut remaining = input;
    let mut tokens = Vec::new();

    loop {
        match lex_token(&mut remaining) {
            Ok(Token::Eof) => break,
            Ok(tok) => tokens.push(tok),
            Err(e) => return Err(format!("Lexer error at '{}': {:?}", remaining, e)),
        }
    }

    tokens.push(Token::Eof);
    Ok(tokens)
}
