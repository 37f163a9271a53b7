//! Restriction normaliser (§4.3): rewrites a restriction `R` into a
//! residual `R'` plus a list of indexer-friendly substring terms `M`,
//! so that a search folder can ask the full-text indexer for a
//! candidate object-id set before falling back to evaluating `R'`
//! row-by-row.
//!
//! Grounded on the original `ECGenericProp::NormalizeRestriction`
//! pass (`provider/libserver/ECStoreObjectTable.cpp`), which performs
//! the same flatten → contradiction-check → per-conjunct extraction
//! walk before handing residual work to the row engine.

use std::collections::BTreeSet;

use kopano_core::restriction::{FuzzyMatch, Restriction};
use kopano_core::{Error, PropTag, PropType, Result};

/// One substring term to hand to the indexer, plus the set of property
/// ids it should be matched against (an OR of same-term CONTENT nodes
/// collapses to one term with a unioned field set).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexTerm {
    pub term: String,
    pub fields: BTreeSet<u16>,
}

/// Result of normalising a restriction: the residual restriction to
/// re-evaluate against candidate rows, plus the terms extracted for
/// the indexer.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub residual: Restriction,
    pub terms: Vec<IndexTerm>,
}

/// Normalises `restriction` for indexer acceleration, excluding any
/// property in `excluded_properties` from extraction (the indexer's own
/// configured exclusion set, §4.2).
///
/// Returns `Error::InvalidArgument` when nothing could be extracted —
/// callers are expected to fall back to a full table scan in that case
/// (§4.3 step 4).
pub fn normalize_restriction(
    restriction: &Restriction,
    excluded_properties: &BTreeSet<u16>,
) -> Result<Normalized> {
    let flat = restriction.clone().flatten();
    let Restriction::And(children) = flat else {
        return Err(Error::InvalidArgument(
            "restriction normaliser only extracts from a top-level AND".into(),
        ));
    };

    let mut residual = Vec::with_capacity(children.len());
    let mut terms: Vec<IndexTerm> = Vec::new();

    for child in children {
        match extractable_term(&child, excluded_properties) {
            Some(term) => merge_term(&mut terms, term),
            None => residual.push(child),
        }
    }

    if terms.is_empty() {
        return Err(Error::InvalidArgument(
            "no extractable CONTENT term; caller must fall back to table scan".into(),
        ));
    }

    let residual = if residual.is_empty() { Restriction::True } else { Restriction::And(residual) };
    Ok(Normalized { residual, terms })
}

/// Tries to read a single top-level AND child as an indexer term: either
/// a directly-extractable `CONTENT` node, or an `OR` whose every leaf is
/// a `CONTENT` node over the same term (§4.3 step 3).
fn extractable_term(node: &Restriction, excluded_properties: &BTreeSet<u16>) -> Option<IndexTerm> {
    match node {
        Restriction::Content { prop, value, fuzzy } => {
            content_term(*prop, value, fuzzy.matching, excluded_properties)
        }
        Restriction::Or(leaves) => {
            let mut fields = BTreeSet::new();
            let mut shared_term: Option<&str> = None;
            for leaf in leaves {
                let Restriction::Content { prop, value, fuzzy } = leaf else { return None };
                content_term(*prop, value, fuzzy.matching, excluded_properties)?;
                match shared_term {
                    None => shared_term = Some(value.as_str()),
                    Some(t) if t == value.as_str() => {}
                    // Mixed terms in one OR abort extraction of the whole
                    // conjunct, per §4.3 edge cases: the caller must fall
                    // back entirely rather than extract a subset.
                    Some(_) => return None,
                }
                fields.insert(prop.id);
            }
            shared_term.map(|term| IndexTerm { term: term.to_string(), fields })
        }
        _ => None,
    }
}

fn content_term(
    prop: PropTag,
    value: &str,
    matching: FuzzyMatch,
    excluded_properties: &BTreeSet<u16>,
) -> Option<IndexTerm> {
    if !matches!(prop.prop_type, PropType::String | PropType::MvString) {
        return None;
    }
    if excluded_properties.contains(&prop.id) {
        return None;
    }
    // Only SUBSTRING (ignorecase is independent of extractability here;
    // the indexer always matches case-insensitively) is extractable.
    if !matches!(matching, FuzzyMatch::Substring) {
        return None;
    }
    let mut fields = BTreeSet::new();
    fields.insert(prop.id);
    Some(IndexTerm { term: value.to_string(), fields })
}

fn merge_term(terms: &mut Vec<IndexTerm>, new_term: IndexTerm) {
    if let Some(existing) = terms.iter_mut().find(|t| t.term == new_term.term) {
        existing.fields.extend(new_term.fields);
    } else {
        terms.push(new_term);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kopano_core::proptag::well_known::{PR_BODY, PR_MESSAGE_CLASS, PR_SUBJECT};
    use kopano_core::restriction::FuzzyLevel;

    fn content(prop: PropTag, value: &str) -> Restriction {
        Restriction::Content { prop, value: value.into(), fuzzy: FuzzyLevel::substring_ignore_case() }
    }

    #[test]
    fn extracts_single_content_conjunct() {
        let r = Restriction::And(vec![content(PR_SUBJECT, "quarterly"), Restriction::Exist(PR_MESSAGE_CLASS)]);
        let normalized = normalize_restriction(&r, &BTreeSet::new()).unwrap();
        assert_eq!(normalized.terms.len(), 1);
        assert_eq!(normalized.terms[0].term, "quarterly");
        assert_eq!(normalized.residual, Restriction::And(vec![Restriction::Exist(PR_MESSAGE_CLASS)]));
    }

    #[test]
    fn same_term_or_merges_fields() {
        let r = Restriction::And(vec![Restriction::Or(vec![
            content(PR_SUBJECT, "invoice"),
            content(PR_BODY, "invoice"),
        ])]);
        let normalized = normalize_restriction(&r, &BTreeSet::new()).unwrap();
        assert_eq!(normalized.terms.len(), 1);
        assert_eq!(normalized.terms[0].fields, BTreeSet::from([PR_SUBJECT.id, PR_BODY.id]));
        assert_eq!(normalized.residual, Restriction::True);
    }

    #[test]
    fn mixed_term_or_is_not_extractable() {
        let r = Restriction::And(vec![
            Restriction::Or(vec![content(PR_SUBJECT, "invoice"), content(PR_BODY, "receipt")]),
            content(PR_SUBJECT, "unrelated"),
        ]);
        let normalized = normalize_restriction(&r, &BTreeSet::new()).unwrap();
        assert_eq!(normalized.terms.len(), 1);
        assert_eq!(normalized.terms[0].term, "unrelated");
    }

    #[test]
    fn excluded_property_falls_back() {
        let mut excluded = BTreeSet::new();
        excluded.insert(PR_SUBJECT.id);
        let r = Restriction::And(vec![content(PR_SUBJECT, "quarterly")]);
        assert!(normalize_restriction(&r, &excluded).is_err());
    }

    #[test]
    fn nothing_extractable_is_an_error() {
        let r = Restriction::And(vec![Restriction::Exist(PR_MESSAGE_CLASS)]);
        assert!(normalize_restriction(&r, &BTreeSet::new()).is_err());
    }

    proptest::proptest! {
        #[test]
        fn flatten_then_normalize_never_panics(terms in proptest::collection::vec("[a-z]{1,8}", 0..5)) {
            let children: Vec<Restriction> = terms.iter().map(|t| content(PR_SUBJECT, t)).collect();
            let r = Restriction::And(children);
            let _ = normalize_restriction(&r, &BTreeSet::new());
        }
    }
}
