//! SPARQL lexer: tokenizes a query string.

use crate::{Error, Result};

/// A token from the lexer.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub span: Span,
    /// Token text without sigils or quotes: variable names have no `?`,
    /// IRIs no angle brackets, literals no quotes.
    pub text: String,
}

/// Source span.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Span {
    pub start: usize,
    pub end: usize,
}

/// Token kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    // Keywords
    Select, Ask, Where, Graph, Union, Filter,
    Distinct, Reduced, Order, By, Asc, Desc, Limit, Offset,
    Prefix, Base, Bound, True, False,

    // Terms
    IriRef, PrefixedName, Var, BlankNode, Identifier,

    // Literals
    StringLiteral, LangTag, DoubleCaret, Integer, Decimal,

    // Punctuation
    LBrace, RBrace, LParen, RParen, Dot, Semicolon, Comma, Star,

    // Operators
    Eq, Neq, Lt, Lte, Gt, Gte, AndAnd, OrOr, Bang,

    Eof,
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '-'
}

/// Tokenize a SPARQL query string.
pub fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.char_indices().peekable();

    while let Some(&(pos, ch)) = chars.peek() {
        match ch {
            c if c.is_whitespace() => { chars.next(); }

            // Comments run to the end of the line
            '#' => {
                while chars.peek().is_some_and(|&(_, c)| c != '\n') {
                    chars.next();
                }
            }

            // IRI reference, or a comparison operator
            '<' => {
                let rest = &input[pos + 1..];
                let iri_end = rest.find(|c: char| c == '>' || c.is_whitespace() || c == '<' || c == '"');
                match iri_end {
                    Some(end) if rest[end..].starts_with('>') => {
                        let iri = &rest[..end];
                        for _ in 0..iri.chars().count() + 2 {
                            chars.next();
                        }
                        tokens.push(Token {
                            kind: TokenKind::IriRef,
                            span: Span { start: pos, end: pos + end + 2 },
                            text: iri.to_string(),
                        });
                    }
                    _ => {
                        chars.next();
                        if matches!(chars.peek(), Some(&(_, '='))) {
                            chars.next();
                            tokens.push(punct(TokenKind::Lte, pos, "<="));
                        } else {
                            tokens.push(punct(TokenKind::Lt, pos, "<"));
                        }
                    }
                }
            }

            // String literals
            '\'' | '"' => {
                let quote = ch;
                chars.next();
                let start = pos;
                let mut s = String::new();
                loop {
                    match chars.next() {
                        Some((_, '\\')) => {
                            if let Some((_, escaped)) = chars.next() {
                                match escaped {
                                    'n' => s.push('\n'),
                                    't' => s.push('\t'),
                                    'r' => s.push('\r'),
                                    '\\' => s.push('\\'),
                                    '"' => s.push('"'),
                                    '\'' => s.push('\''),
                                    c => { s.push('\\'); s.push(c); }
                                }
                            }
                        }
                        Some((end, c)) if c == quote => {
                            tokens.push(Token {
                                kind: TokenKind::StringLiteral,
                                span: Span { start, end: end + 1 },
                                text: s,
                            });
                            break;
                        }
                        Some((_, c)) => s.push(c),
                        None => return Err(Error::SyntaxError {
                            position: start,
                            message: "Unterminated string literal".into(),
                        }),
                    }
                }
            }

            // Language tag
            '@' => {
                chars.next();
                let tag = take_while(&mut chars, |c| c.is_alphanumeric() || c == '-');
                if tag.is_empty() {
                    return Err(Error::SyntaxError { position: pos, message: "Empty language tag".into() });
                }
                tokens.push(Token {
                    kind: TokenKind::LangTag,
                    span: Span { start: pos, end: pos + tag.len() + 1 },
                    text: tag,
                });
            }

            '^' => {
                chars.next();
                if !matches!(chars.peek(), Some(&(_, '^'))) {
                    return Err(Error::SyntaxError { position: pos, message: "Expected '^^'".into() });
                }
                chars.next();
                tokens.push(punct(TokenKind::DoubleCaret, pos, "^^"));
            }

            // Variables: ?name or $name
            '?' | '$' => {
                chars.next();
                let name = take_while(&mut chars, |c| c.is_alphanumeric() || c == '_');
                if name.is_empty() {
                    return Err(Error::SyntaxError { position: pos, message: "Empty variable name".into() });
                }
                tokens.push(Token {
                    kind: TokenKind::Var,
                    span: Span { start: pos, end: pos + name.len() + 1 },
                    text: name,
                });
            }

            // Signed and unsigned numbers
            c if c.is_ascii_digit()
                || ((c == '-' || c == '+') && chars.clone().nth(1).is_some_and(|(_, d)| d.is_ascii_digit())) =>
            {
                let start = pos;
                let mut num = String::new();
                if c == '-' || c == '+' {
                    num.push(c);
                    chars.next();
                }
                let mut is_decimal = false;
                while let Some(&(_, c)) = chars.peek() {
                    if c.is_ascii_digit() {
                        num.push(c);
                        chars.next();
                    } else if c == '.' && !is_decimal && chars.clone().nth(1).is_some_and(|(_, d)| d.is_ascii_digit()) {
                        is_decimal = true;
                        num.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token {
                    kind: if is_decimal { TokenKind::Decimal } else { TokenKind::Integer },
                    span: Span { start, end: start + num.len() },
                    text: num,
                });
            }

            // Blank node: _:label
            '_' if matches!(chars.clone().nth(1), Some((_, ':'))) => {
                chars.next();
                chars.next();
                let label = take_while(&mut chars, is_name_char);
                tokens.push(Token {
                    kind: TokenKind::BlankNode,
                    span: Span { start: pos, end: pos + label.len() + 2 },
                    text: label,
                });
            }

            // Prefixed name with the empty prefix: :local
            ':' => {
                chars.next();
                let local = take_while(&mut chars, is_name_char);
                tokens.push(Token {
                    kind: TokenKind::PrefixedName,
                    span: Span { start: pos, end: pos + local.len() + 1 },
                    text: format!(":{local}"),
                });
            }

            // Keywords, prefixed names and bare identifiers
            c if c.is_alphabetic() => {
                let start = pos;
                let ident = take_while(&mut chars, is_name_char);
                if matches!(chars.peek(), Some(&(_, ':'))) {
                    chars.next();
                    let local = take_while(&mut chars, is_name_char);
                    let text = format!("{ident}:{local}");
                    tokens.push(Token {
                        kind: TokenKind::PrefixedName,
                        span: Span { start, end: start + text.len() },
                        text,
                    });
                } else {
                    tokens.push(Token {
                        kind: keyword_or_ident(&ident),
                        span: Span { start, end: start + ident.len() },
                        text: ident,
                    });
                }
            }

            // Punctuation
            '{' => { chars.next(); tokens.push(punct(TokenKind::LBrace, pos, "{")); }
            '}' => { chars.next(); tokens.push(punct(TokenKind::RBrace, pos, "}")); }
            '(' => { chars.next(); tokens.push(punct(TokenKind::LParen, pos, "(")); }
            ')' => { chars.next(); tokens.push(punct(TokenKind::RParen, pos, ")")); }
            '.' => { chars.next(); tokens.push(punct(TokenKind::Dot, pos, ".")); }
            ';' => { chars.next(); tokens.push(punct(TokenKind::Semicolon, pos, ";")); }
            ',' => { chars.next(); tokens.push(punct(TokenKind::Comma, pos, ",")); }
            '*' => { chars.next(); tokens.push(punct(TokenKind::Star, pos, "*")); }
            '=' => { chars.next(); tokens.push(punct(TokenKind::Eq, pos, "=")); }
            '!' => {
                chars.next();
                if matches!(chars.peek(), Some(&(_, '='))) {
                    chars.next();
                    tokens.push(punct(TokenKind::Neq, pos, "!="));
                } else {
                    tokens.push(punct(TokenKind::Bang, pos, "!"));
                }
            }
            '>' => {
                chars.next();
                if matches!(chars.peek(), Some(&(_, '='))) {
                    chars.next();
                    tokens.push(punct(TokenKind::Gte, pos, ">="));
                } else {
                    tokens.push(punct(TokenKind::Gt, pos, ">"));
                }
            }
            '&' | '|' => {
                chars.next();
                if !matches!(chars.peek(), Some(&(_, next)) if next == ch) {
                    return Err(Error::SyntaxError {
                        position: pos,
                        message: format!("Expected '{ch}{ch}'"),
                    });
                }
                chars.next();
                if ch == '&' {
                    tokens.push(punct(TokenKind::AndAnd, pos, "&&"));
                } else {
                    tokens.push(punct(TokenKind::OrOr, pos, "||"));
                }
            }

            other => {
                return Err(Error::SyntaxError {
                    position: pos,
                    message: format!("Unexpected character: '{other}'"),
                });
            }
        }
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        span: Span { start: input.len(), end: input.len() },
        text: String::new(),
    });

    Ok(tokens)
}

fn take_while(
    chars: &mut std::iter::Peekable<std::str::CharIndices<'_>>,
    accept: impl Fn(char) -> bool,
) -> String {
    let mut out = String::new();
    while let Some(&(_, c)) = chars.peek() {
        if accept(c) {
            out.push(c);
            chars.next();
        } else {
            break;
        }
    }
    out
}

fn punct(kind: TokenKind, pos: usize, text: &str) -> Token {
    Token {
        kind,
        span: Span { start: pos, end: pos + text.len() },
        text: text.to_string(),
    }
}

fn keyword_or_ident(s: &str) -> TokenKind {
    match s.to_uppercase().as_str() {
        "SELECT" => TokenKind::Select,
        "ASK" => TokenKind::Ask,
        "WHERE" => TokenKind::Where,
        "GRAPH" => TokenKind::Graph,
        "UNION" => TokenKind::Union,
        "FILTER" => TokenKind::Filter,
        "DISTINCT" => TokenKind::Distinct,
        "REDUCED" => TokenKind::Reduced,
        "ORDER" => TokenKind::Order,
        "BY" => TokenKind::By,
        "ASC" => TokenKind::Asc,
        "DESC" => TokenKind::Desc,
        "LIMIT" => TokenKind::Limit,
        "OFFSET" => TokenKind::Offset,
        "PREFIX" => TokenKind::Prefix,
        "BASE" => TokenKind::Base,
        "BOUND" => TokenKind::Bound,
        "TRUE" => TokenKind::True,
        "FALSE" => TokenKind::False,
        _ => TokenKind::Identifier,
    }
}
