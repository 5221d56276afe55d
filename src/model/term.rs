//! RDF terms: the values that fill quadruple positions.

use std::fmt;

use serde::{Deserialize, Serialize};

pub const XSD_STRING: &str = "http://www.w3.org/2001/XMLSchema#string";
pub const XSD_INTEGER: &str = "http://www.w3.org/2001/XMLSchema#integer";
pub const XSD_DECIMAL: &str = "http://www.w3.org/2001/XMLSchema#decimal";
pub const XSD_DOUBLE: &str = "http://www.w3.org/2001/XMLSchema#double";
pub const XSD_BOOLEAN: &str = "http://www.w3.org/2001/XMLSchema#boolean";
pub const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";

/// An RDF term.
///
/// Terms are totally ordered (derived) so that datasets can keep
/// deterministic iteration order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Term {
    Iri(String),
    Literal {
        lexical: String,
        datatype: Option<String>,
        language: Option<String>,
    },
    Blank(String),
}

impl Term {
    pub fn iri(iri: impl Into<String>) -> Self {
        Term::Iri(iri.into())
    }

    /// Plain literal without datatype or language tag.
    pub fn literal(lexical: impl Into<String>) -> Self {
        Term::Literal { lexical: lexical.into(), datatype: None, language: None }
    }

    pub fn typed_literal(lexical: impl Into<String>, datatype: impl Into<String>) -> Self {
        Term::Literal {
            lexical: lexical.into(),
            datatype: Some(datatype.into()),
            language: None,
        }
    }

    pub fn lang_literal(lexical: impl Into<String>, language: impl Into<String>) -> Self {
        Term::Literal {
            lexical: lexical.into(),
            datatype: None,
            language: Some(language.into().to_ascii_lowercase()),
        }
    }

    pub fn integer(value: i64) -> Self {
        Term::typed_literal(value.to_string(), XSD_INTEGER)
    }

    pub fn blank(label: impl Into<String>) -> Self {
        Term::Blank(label.into())
    }

    pub fn is_iri(&self) -> bool {
        matches!(self, Term::Iri(_))
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Term::Literal { .. })
    }

    /// The string a term contributes to overlay placement: the IRI text,
    /// the lexical form of a literal, or `_:label` for a blank node.
    pub fn routing_value(&self) -> String {
        match self {
            Term::Iri(iri) => iri.clone(),
            Term::Literal { lexical, .. } => lexical.clone(),
            Term::Blank(label) => format!("_:{label}"),
        }
    }

    /// Numeric view of a literal, if its lexical form parses as a number.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Term::Literal { lexical, .. } => lexical.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Term::Literal { lexical, .. } => match lexical.as_str() {
                "true" | "1" => Some(true),
                "false" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Term::Iri(iri) => write!(f, "<{iri}>"),
            Term::Literal { lexical, datatype, language } => {
                write!(f, "\"")?;
                for c in lexical.chars() {
                    match c {
                        '"' => write!(f, "\\\"")?,
                        '\\' => write!(f, "\\\\")?,
                        '\n' => write!(f, "\\n")?,
                        c => write!(f, "{c}")?,
                    }
                }
                write!(f, "\"")?;
                if let Some(lang) = language {
                    write!(f, "@{lang}")
                } else if let Some(dt) = datatype {
                    write!(f, "^^<{dt}>")
                } else {
                    Ok(())
                }
            }
            Term::Blank(label) => write!(f, "_:{label}"),
        }
    }
}

impl From<&str> for Term {
    /// `<...>` and `_:` prefixes are recognised, anything else is a plain literal.
    fn from(s: &str) -> Self {
        if let Some(iri) = s.strip_prefix('<').and_then(|r| r.strip_suffix('>')) {
            Term::iri(iri)
        } else if let Some(label) = s.strip_prefix("_:") {
            Term::blank(label)
        } else {
            Term::literal(s)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_routing_value() {
        assert_eq!(Term::iri("urn:a").routing_value(), "urn:a");
        assert_eq!(Term::lang_literal("chat", "FR").routing_value(), "chat");
        assert_eq!(Term::blank("b0").routing_value(), "_:b0");
    }

    #[test]
    fn test_display_ntriples() {
        assert_eq!(Term::iri("urn:a").to_string(), "<urn:a>");
        assert_eq!(Term::integer(3).to_string(), format!("\"3\"^^<{XSD_INTEGER}>"));
        assert_eq!(Term::lang_literal("a\"b", "en").to_string(), "\"a\\\"b\"@en");
    }

    #[test]
    fn test_from_str() {
        assert_eq!(Term::from("<urn:x>"), Term::iri("urn:x"));
        assert_eq!(Term::from("_:n"), Term::blank("n"));
        assert_eq!(Term::from("plain"), Term::literal("plain"));
    }

    #[test]
    fn test_numeric_view() {
        assert_eq!(Term::integer(42).as_f64(), Some(42.0));
        assert_eq!(Term::iri("urn:42").as_f64(), None);
    }
}
