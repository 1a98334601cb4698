//! Query language parsing (spec.md §4.3 `query`, §4.8's `s <query>`
//! command). A query is a whitespace-separated list of terms; each term
//! is either `key=value` (match a specific attribute value) or `key`
//! alone (match presence of any value for that key). All terms must
//! match for a claim to be included (conjunction).

use crate::error::QueryParseError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Term {
    pub key: String,
    pub value: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    pub terms: Vec<Term>,
}

pub fn parse(query_text: &str) -> Result<Query, QueryParseError> {
    let trimmed = query_text.trim();
    if trimmed.is_empty() {
        // spec.md §8 scenario 1: `s` with no query text against an empty
        // index is a valid query matching nothing, not a parse error.
        return Ok(Query { terms: Vec::new() });
    }

    let mut terms = Vec::new();
    for word in trimmed.split_whitespace() {
        let term = match word.split_once('=') {
            Some((key, value)) if !key.is_empty() => Term {
                key: key.to_string(),
                value: Some(value.to_string()),
            },
            Some(_) => return Err(QueryParseError::BadTerm(word.to_string())),
            None => Term {
                key: word.to_string(),
                value: None,
            },
        };
        terms.push(term);
    }

    Ok(Query { terms })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_single_key_value_term() {
        let q = parse("color=red").unwrap();
        assert_eq!(
            q.terms,
            vec![Term {
                key: "color".into(),
                value: Some("red".into())
            }]
        );
    }

    #[test]
    fn parses_multiple_terms_as_conjunction() {
        let q = parse("color=red size=10").unwrap();
        assert_eq!(q.terms.len(), 2);
    }

    #[test]
    fn parses_bare_key_as_existence_check() {
        let q = parse("color").unwrap();
        assert_eq!(q.terms[0].value, None);
    }

    #[test]
    fn empty_query_matches_nothing_rather_than_erroring() {
        // spec.md §8 scenario 1: `s` with no argument against an empty
        // index returns `OK` with zero results, not a parse error.
        let q = parse("   ").unwrap();
        assert!(q.terms.is_empty());
    }

    #[test]
    fn rejects_term_with_empty_key() {
        assert!(matches!(parse("=red"), Err(QueryParseError::BadTerm(_))));
    }
}
