//! SPARQL recursive descent parser.
//!
//! Parses token streams into a [`Query`]. Supports:
//! - PREFIX / BASE prologue
//! - SELECT (DISTINCT | REDUCED) vars | *, and ASK
//! - GRAPH, UNION, nested groups, FILTER
//! - `;` and `,` triple shorthand, `a` for rdf:type
//! - ORDER BY, LIMIT, OFFSET

use hashbrown::HashMap;

use crate::model::term::{RDF_TYPE, XSD_BOOLEAN, XSD_DECIMAL, XSD_INTEGER};
use crate::model::Term;
use crate::{Error, Result};
use super::ast::*;
use super::lexer::{Token, TokenKind};

/// Parser state. Wraps a token slice with cursor and the prologue.
struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
    base: Option<String>,
    prefixes: HashMap<String, String>,
}

impl<'t> Parser<'t> {
    fn new(tokens: &'t [Token]) -> Self {
        Self { tokens, pos: 0, base: None, prefixes: HashMap::new() }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> TokenKind {
        self.peek().kind
    }

    fn advance(&mut self) -> &Token {
        let tok = &self.tokens[self.pos.min(self.tokens.len() - 1)];
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, kind: TokenKind) -> Result<&Token> {
        let tok = self.peek();
        if tok.kind == kind {
            Ok(self.advance())
        } else {
            Err(self.error(format!("Expected {:?}, got {:?} '{}'", kind, tok.kind, tok.text)))
        }
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error(&self, msg: String) -> Error {
        Error::SyntaxError {
            position: self.peek().span.start,
            message: msg,
        }
    }

    fn resolve_iri(&self, iri: &str) -> String {
        match &self.base {
            Some(base) if !iri.contains(':') => format!("{base}{iri}"),
            _ => iri.to_string(),
        }
    }

    fn expand_prefixed(&self, name: &str) -> Result<String> {
        let (prefix, local) = name.split_once(':').unwrap_or(("", name));
        match self.prefixes.get(prefix) {
            Some(namespace) => Ok(format!("{namespace}{local}")),
            None => Err(self.error(format!("Undeclared prefix '{prefix}:'"))),
        }
    }
}

/// Parse a complete query from tokens.
pub fn parse_query(tokens: &[Token]) -> Result<Query> {
    let mut p = Parser::new(tokens);
    parse_prologue(&mut p)?;

    let form = match p.peek_kind() {
        TokenKind::Select => {
            p.advance();
            let modifier = if p.eat(TokenKind::Distinct) {
                Some(Modifier::Distinct)
            } else if p.eat(TokenKind::Reduced) {
                Some(Modifier::Reduced)
            } else {
                None
            };
            let projection = if p.eat(TokenKind::Star) {
                Projection::All
            } else {
                let mut vars = Vec::new();
                while p.at(TokenKind::Var) {
                    vars.push(p.advance().text.clone());
                }
                if vars.is_empty() {
                    return Err(p.error("Expected projected variables or '*'".into()));
                }
                Projection::Vars(vars)
            };
            QueryForm::Select { modifier, projection }
        }
        TokenKind::Ask => {
            p.advance();
            QueryForm::Ask
        }
        _ => return Err(p.error(format!("Expected SELECT or ASK, got '{}'", p.peek().text))),
    };

    p.eat(TokenKind::Where);
    let pattern = parse_group(&mut p)?;

    let mut order_by = Vec::new();
    if p.eat(TokenKind::Order) {
        p.expect(TokenKind::By)?;
        order_by = parse_order_conditions(&mut p)?;
    }

    let mut limit = None;
    let mut offset = None;
    loop {
        if p.eat(TokenKind::Limit) {
            limit = Some(parse_count(&mut p)?);
        } else if p.eat(TokenKind::Offset) {
            offset = Some(parse_count(&mut p)?);
        } else {
            break;
        }
    }

    if !p.at(TokenKind::Eof) {
        return Err(p.error(format!("Unexpected '{}' after query", p.peek().text)));
    }

    Ok(Query { form, pattern, order_by, limit, offset })
}

fn parse_prologue(p: &mut Parser) -> Result<()> {
    loop {
        if p.eat(TokenKind::Base) {
            let iri = p.expect(TokenKind::IriRef)?.text.clone();
            p.base = Some(iri);
        } else if p.eat(TokenKind::Prefix) {
            let name = p.expect(TokenKind::PrefixedName)?.text.clone();
            let Some(prefix) = name.strip_suffix(':') else {
                return Err(p.error(format!("Expected a prefix declaration like 'ex:', got '{name}'")));
            };
            let prefix = prefix.to_string();
            let iri = p.expect(TokenKind::IriRef)?.text.clone();
            let namespace = p.resolve_iri(&iri);
            p.prefixes.insert(prefix, namespace);
        } else {
            return Ok(());
        }
    }
}

fn parse_count(p: &mut Parser) -> Result<u64> {
    let tok = p.expect(TokenKind::Integer)?;
    let text = tok.text.clone();
    text.parse::<u64>()
        .map_err(|_| p.error(format!("Expected a non-negative integer, got '{text}'")))
}

fn parse_order_conditions(p: &mut Parser) -> Result<Vec<OrderCondition>> {
    let mut conditions = Vec::new();
    loop {
        match p.peek_kind() {
            TokenKind::Asc | TokenKind::Desc => {
                let descending = p.advance().kind == TokenKind::Desc;
                p.expect(TokenKind::LParen)?;
                let var = p.expect(TokenKind::Var)?.text.clone();
                p.expect(TokenKind::RParen)?;
                conditions.push(OrderCondition { var, descending });
            }
            TokenKind::Var => {
                let var = p.advance().text.clone();
                conditions.push(OrderCondition { var, descending: false });
            }
            _ => break,
        }
    }
    if conditions.is_empty() {
        return Err(p.error("Expected an ORDER BY condition".into()));
    }
    Ok(conditions)
}

// ============================================================================
// Graph patterns
// ============================================================================

fn parse_group(p: &mut Parser) -> Result<GroupPattern> {
    p.expect(TokenKind::LBrace)?;
    let mut elements = Vec::new();
    loop {
        match p.peek_kind() {
            TokenKind::RBrace => {
                p.advance();
                return Ok(GroupPattern { elements });
            }
            TokenKind::Dot => {
                p.advance();
            }
            TokenKind::LBrace => {
                let first = parse_group(p)?;
                if p.at(TokenKind::Union) {
                    let mut branches = vec![first];
                    while p.eat(TokenKind::Union) {
                        branches.push(parse_group(p)?);
                    }
                    elements.push(PatternElement::Union(branches));
                } else {
                    elements.push(PatternElement::Group(first));
                }
            }
            TokenKind::Graph => {
                p.advance();
                let name = parse_term(p)?;
                let pattern = parse_group(p)?;
                elements.push(PatternElement::Graph { name, pattern });
            }
            TokenKind::Filter => {
                p.advance();
                let expr = if p.at(TokenKind::Bound) {
                    parse_primary(p)?
                } else {
                    p.expect(TokenKind::LParen)?;
                    let expr = parse_expr(p)?;
                    p.expect(TokenKind::RParen)?;
                    expr
                };
                elements.push(PatternElement::Filter(expr));
            }
            TokenKind::Eof => return Err(p.error("Unterminated group, expected '}'".into())),
            _ => {
                let triples = parse_triples_block(p)?;
                match elements.last_mut() {
                    Some(PatternElement::Triples(existing)) => existing.extend(triples),
                    _ => elements.push(PatternElement::Triples(triples)),
                }
            }
        }
    }
}

/// `subject verb objects (';' verb objects)*`, up to and excluding the
/// next `.` or `}`.
fn parse_triples_block(p: &mut Parser) -> Result<Vec<TriplePattern>> {
    let subject = parse_term(p)?;
    let mut triples = Vec::new();
    loop {
        let predicate = parse_verb(p)?;
        loop {
            let object = parse_term(p)?;
            triples.push(TriplePattern {
                subject: subject.clone(),
                predicate: predicate.clone(),
                object,
            });
            if !p.eat(TokenKind::Comma) {
                break;
            }
        }
        if !p.eat(TokenKind::Semicolon) {
            break;
        }
        // A trailing ';' is allowed.
        if matches!(p.peek_kind(), TokenKind::Dot | TokenKind::RBrace) {
            break;
        }
    }
    Ok(triples)
}

fn parse_verb(p: &mut Parser) -> Result<TermPattern> {
    if p.at(TokenKind::Identifier) && p.peek().text == "a" {
        p.advance();
        return Ok(TermPattern::Term(Term::iri(RDF_TYPE)));
    }
    parse_term(p)
}

fn parse_term(p: &mut Parser) -> Result<TermPattern> {
    let tok = p.peek().clone();
    match tok.kind {
        TokenKind::Var => {
            p.advance();
            Ok(TermPattern::Var(tok.text))
        }
        // Blank nodes in patterns act as variables that cannot be projected.
        TokenKind::BlankNode => {
            p.advance();
            Ok(TermPattern::Var(format!("_:{}", tok.text)))
        }
        _ => parse_constant(p).map(TermPattern::Term),
    }
}

fn parse_constant(p: &mut Parser) -> Result<Term> {
    let tok = p.peek().clone();
    match tok.kind {
        TokenKind::IriRef => {
            p.advance();
            Ok(Term::iri(p.resolve_iri(&tok.text)))
        }
        TokenKind::PrefixedName => {
            p.advance();
            Ok(Term::iri(p.expand_prefixed(&tok.text)?))
        }
        TokenKind::StringLiteral => {
            p.advance();
            if p.at(TokenKind::LangTag) {
                let lang = p.advance().text.clone();
                Ok(Term::lang_literal(tok.text, lang))
            } else if p.eat(TokenKind::DoubleCaret) {
                let datatype = match p.peek_kind() {
                    TokenKind::IriRef => {
                        let iri = p.advance().text.clone();
                        p.resolve_iri(&iri)
                    }
                    TokenKind::PrefixedName => {
                        let name = p.advance().text.clone();
                        p.expand_prefixed(&name)?
                    }
                    _ => return Err(p.error("Expected a datatype IRI after '^^'".into())),
                };
                Ok(Term::typed_literal(tok.text, datatype))
            } else {
                Ok(Term::literal(tok.text))
            }
        }
        TokenKind::Integer => {
            p.advance();
            Ok(Term::typed_literal(tok.text, XSD_INTEGER))
        }
        TokenKind::Decimal => {
            p.advance();
            Ok(Term::typed_literal(tok.text, XSD_DECIMAL))
        }
        TokenKind::True | TokenKind::False => {
            p.advance();
            Ok(Term::typed_literal(tok.text.to_lowercase(), XSD_BOOLEAN))
        }
        _ => Err(p.error(format!("Expected a term, got {:?} '{}'", tok.kind, tok.text))),
    }
}

// ============================================================================
// Expression parsing (precedence climbing)
// ============================================================================

fn parse_expr(p: &mut Parser) -> Result<Expr> {
    parse_or_expr(p)
}

fn parse_or_expr(p: &mut Parser) -> Result<Expr> {
    let mut left = parse_and_expr(p)?;
    while p.eat(TokenKind::OrOr) {
        let right = parse_and_expr(p)?;
        left = Expr::Or(Box::new(left), Box::new(right));
    }
    Ok(left)
}

fn parse_and_expr(p: &mut Parser) -> Result<Expr> {
    let mut left = parse_not_expr(p)?;
    while p.eat(TokenKind::AndAnd) {
        let right = parse_not_expr(p)?;
        left = Expr::And(Box::new(left), Box::new(right));
    }
    Ok(left)
}

fn parse_not_expr(p: &mut Parser) -> Result<Expr> {
    if p.eat(TokenKind::Bang) {
        let expr = parse_not_expr(p)?;
        Ok(Expr::Not(Box::new(expr)))
    } else {
        parse_comparison(p)
    }
}

fn parse_comparison(p: &mut Parser) -> Result<Expr> {
    let left = parse_primary(p)?;
    let op = match p.peek_kind() {
        TokenKind::Eq => CompareOp::Eq,
        TokenKind::Neq => CompareOp::Neq,
        TokenKind::Lt => CompareOp::Lt,
        TokenKind::Lte => CompareOp::Lte,
        TokenKind::Gt => CompareOp::Gt,
        TokenKind::Gte => CompareOp::Gte,
        _ => return Ok(left),
    };
    p.advance();
    let right = parse_primary(p)?;
    Ok(Expr::Compare { op, left: Box::new(left), right: Box::new(right) })
}

fn parse_primary(p: &mut Parser) -> Result<Expr> {
    match p.peek_kind() {
        TokenKind::LParen => {
            p.advance();
            let expr = parse_expr(p)?;
            p.expect(TokenKind::RParen)?;
            Ok(expr)
        }
        TokenKind::Bound => {
            p.advance();
            p.expect(TokenKind::LParen)?;
            let var = p.expect(TokenKind::Var)?.text.clone();
            p.expect(TokenKind::RParen)?;
            Ok(Expr::Bound(var))
        }
        TokenKind::Var => Ok(Expr::Var(p.advance().text.clone())),
        _ => parse_constant(p).map(Expr::Constant),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sparql::lexer::tokenize;

    fn parse(query: &str) -> Result<Query> {
        let tokens = tokenize(query)?;
        parse_query(&tokens)
    }

    fn graph_triples(query: &Query) -> &[TriplePattern] {
        match &query.pattern.elements[0] {
            PatternElement::Graph { pattern, .. } => match &pattern.elements[0] {
                PatternElement::Triples(triples) => triples,
                other => panic!("expected triples, got {other:?}"),
            },
            other => panic!("expected GRAPH, got {other:?}"),
        }
    }

    #[test]
    fn test_select_with_modifiers() {
        let q = parse(
            "SELECT DISTINCT ?s ?o WHERE { GRAPH ?g { ?s <urn:p> ?o } } ORDER BY DESC(?o) ?s LIMIT 5 OFFSET 2",
        )
        .unwrap();
        assert_eq!(q.modifier(), Some(Modifier::Distinct));
        assert_eq!(q.result_vars(), vec!["s".to_string(), "o".to_string()]);
        assert_eq!(
            q.order_by,
            vec![
                OrderCondition { var: "o".into(), descending: true },
                OrderCondition { var: "s".into(), descending: false },
            ]
        );
        assert_eq!((q.limit, q.offset), (Some(5), Some(2)));
    }

    #[test]
    fn test_prefixes_and_shorthand() {
        let q = parse(
            "PREFIX ex: <http://example.org/> \
             ASK { GRAPH ex:g { ex:alice a ex:Person ; ex:knows ex:bob , ex:carol . } }",
        )
        .unwrap();
        assert!(q.is_ask());
        let triples = graph_triples(&q);
        assert_eq!(triples.len(), 3);
        assert_eq!(triples[0].predicate, TermPattern::Term(Term::iri(RDF_TYPE)));
        assert_eq!(triples[2].object, TermPattern::Term(Term::iri("http://example.org/carol")));
    }

    #[test]
    fn test_literals() {
        let q = parse("SELECT * { GRAPH ?g { ?s ?p \"chat\"@fr . ?s ?q 42 . ?s ?r \"x\"^^<urn:t> } }").unwrap();
        let triples = graph_triples(&q);
        assert_eq!(triples[0].object, TermPattern::Term(Term::lang_literal("chat", "fr")));
        assert_eq!(triples[1].object, TermPattern::Term(Term::typed_literal("42", XSD_INTEGER)));
        assert_eq!(triples[2].object, TermPattern::Term(Term::typed_literal("x", "urn:t")));
        assert_eq!(q.result_vars(), vec!["g", "s", "p", "q", "r"]);
    }

    #[test]
    fn test_filter_precedence() {
        let q = parse("ASK { GRAPH ?g { ?s ?p ?o FILTER (?o > 3 && !BOUND(?x) || ?o = 1) } }").unwrap();
        let PatternElement::Graph { pattern, .. } = &q.pattern.elements[0] else { panic!() };
        let PatternElement::Filter(expr) = &pattern.elements[1] else { panic!() };
        assert!(matches!(expr, Expr::Or(left, _) if matches!(**left, Expr::And(_, _))));
        assert_eq!(expr.vars(), vec!["o", "x"]);
    }

    #[test]
    fn test_union() {
        let q = parse("SELECT ?s { GRAPH ?g { { ?s <urn:p:0> ?o } UNION { ?s <urn:p:1> ?p } } }").unwrap();
        let PatternElement::Graph { pattern, .. } = &q.pattern.elements[0] else { panic!() };
        assert!(matches!(&pattern.elements[0], PatternElement::Union(branches) if branches.len() == 2));
    }

    #[test]
    fn test_syntax_errors() {
        assert!(matches!(parse("SELECT { }"), Err(Error::SyntaxError { .. })));
        assert!(matches!(parse("ASK { GRAPH ?g { ?s ?p ?o }"), Err(Error::SyntaxError { .. })));
        assert!(matches!(parse("ASK { ?s ex:p ?o }"), Err(Error::SyntaxError { .. })));
        assert!(matches!(parse("ASK { } LIMIT x"), Err(Error::SyntaxError { .. })));
    }
}
