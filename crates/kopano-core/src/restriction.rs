//! Restriction trees: the algebraic predicate language over properties
//! (§3, §4.3) used by rule conditions and search folder criteria.

use serde::{Deserialize, Serialize};

use crate::message::{PropertyBag, PropertyValue};
use crate::proptag::PropTag;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FuzzyMatch {
    Substring,
    Fullstring,
    Prefix,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FuzzyLevel {
    pub matching: FuzzyMatch,
    pub ignore_case: bool,
}

impl FuzzyLevel {
    #[must_use]
    pub const fn substring_ignore_case() -> Self {
        Self { matching: FuzzyMatch::Substring, ignore_case: true }
    }
}

/// Scope of a SUBRESTRICTION node (§3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubrestrictionScope {
    Attachments,
    Recipients,
}

/// An algebraic predicate over a `PropertyBag`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Restriction {
    And(Vec<Restriction>),
    Or(Vec<Restriction>),
    Not(Box<Restriction>),
    Content { prop: PropTag, value: String, fuzzy: FuzzyLevel },
    Property { relop: RelOp, prop: PropTag, value: PropertyValue },
    Exist(PropTag),
    Subrestriction { scope: SubrestrictionScope, inner: Box<Restriction> },
    /// Always false — produced by constant-false elimination (§4.3 step 2)
    /// and usable directly by callers that pre-compute it.
    False,
    /// Always true — the canonical empty-AND residual left by the
    /// normaliser when every top-level conjunct was extracted.
    True,
}

impl Restriction {
    /// Evaluates the restriction against a property bag. `subeval` resolves
    /// SUBRESTRICTION nodes against the attachment/recipient table of the
    /// object identified by `bag`; restriction evaluation itself does not
    /// know how to fetch those child tables, so the caller supplies the
    /// predicate (grounded in the property-store facade being out of
    /// scope per the design's non-goals).
    #[must_use]
    pub fn matches(&self, bag: &PropertyBag) -> bool {
        self.matches_with(bag, &|_, _| false)
    }

    #[must_use]
    pub fn matches_with(
        &self,
        bag: &PropertyBag,
        subeval: &dyn Fn(SubrestrictionScope, &Restriction) -> bool,
    ) -> bool {
        match self {
            Self::And(children) => children.iter().all(|c| c.matches_with(bag, subeval)),
            Self::Or(children) => children.iter().any(|c| c.matches_with(bag, subeval)),
            Self::Not(inner) => !inner.matches_with(bag, subeval),
            Self::Content { prop, value, fuzzy } => match bag.get(*prop).and_then(PropertyValue::as_str) {
                Some(s) => content_matches(s, value, *fuzzy),
                None => false,
            },
            Self::Property { relop, prop, value } => match bag.get(*prop) {
                Some(actual) => compare(actual, value, *relop),
                None => false,
            },
            Self::Exist(prop) => bag.exists(*prop),
            Self::Subrestriction { scope, inner } => subeval(*scope, inner),
            Self::False => false,
            Self::True => true,
        }
    }

    /// Flattens nested AND nodes into one n-ary AND (§4.3 step 1) and
    /// applies constant-false elimination (step 2): an AND containing both
    /// `EXIST(p)` and `NOT(EXIST(p))` for the same property collapses to
    /// `False`. Idempotent: `flatten(flatten(r)) == flatten(r)`.
    #[must_use]
    pub fn flatten(self) -> Restriction {
        match self {
            Self::And(children) => {
                let mut flat = Vec::with_capacity(children.len());
                for child in children {
                    match child.flatten() {
                        Self::And(inner) => flat.extend(inner),
                        other => flat.push(other),
                    }
                }
                if has_contradiction(&flat) {
                    return Self::False;
                }
                Self::And(flat)
            }
            Self::Or(children) => Self::Or(children.into_iter().map(Restriction::flatten).collect()),
            Self::Not(inner) => Self::Not(Box::new(inner.flatten())),
            Self::Subrestriction { scope, inner } => {
                Self::Subrestriction { scope, inner: Box::new(inner.flatten()) }
            }
            other => other,
        }
    }
}

fn has_contradiction(children: &[Restriction]) -> bool {
    for a in children {
        let Restriction::Exist(pa) = a else { continue };
        for b in children {
            if let Restriction::Not(inner) = b {
                if let Restriction::Exist(pb) = inner.as_ref() {
                    if pa == pb {
                        return true;
                    }
                }
            }
        }
    }
    false
}

fn content_matches(haystack: &str, needle: &str, fuzzy: FuzzyLevel) -> bool {
    let (h, n) = if fuzzy.ignore_case {
        (haystack.to_lowercase(), needle.to_lowercase())
    } else {
        (haystack.to_string(), needle.to_string())
    };
    match fuzzy.matching {
        FuzzyMatch::Substring => h.contains(&n),
        FuzzyMatch::Fullstring => h == n,
        FuzzyMatch::Prefix => h.starts_with(&n),
    }
}

fn compare(actual: &PropertyValue, expected: &PropertyValue, relop: RelOp) -> bool {
    use std::cmp::Ordering;
    let ord = match (actual, expected) {
        (PropertyValue::Int32(a), PropertyValue::Int32(b)) => a.partial_cmp(b),
        (PropertyValue::Int64(a), PropertyValue::Int64(b)) => a.partial_cmp(b),
        (PropertyValue::String(a), PropertyValue::String(b)) => a.partial_cmp(b),
        (PropertyValue::FileTime(a), PropertyValue::FileTime(b)) => a.partial_cmp(b),
        (PropertyValue::Bool(a), PropertyValue::Bool(b)) => a.partial_cmp(b),
        _ => None,
    };
    let Some(ord) = ord else { return relop == RelOp::Ne };
    match relop {
        RelOp::Eq => ord == Ordering::Equal,
        RelOp::Ne => ord != Ordering::Equal,
        RelOp::Lt => ord == Ordering::Less,
        RelOp::Le => ord != Ordering::Greater,
        RelOp::Gt => ord == Ordering::Greater,
        RelOp::Ge => ord != Ordering::Less,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proptag::well_known::PR_SUBJECT;

    #[test]
    fn flatten_is_idempotent() {
        let r = Restriction::And(vec![
            Restriction::And(vec![Restriction::Exist(PR_SUBJECT)]),
            Restriction::Exist(PR_SUBJECT),
        ]);
        let once = r.clone().flatten();
        let twice = once.clone().flatten();
        assert_eq!(once, twice);
    }

    #[test]
    fn contradiction_collapses_to_false() {
        let r = Restriction::And(vec![
            Restriction::Exist(PR_SUBJECT),
            Restriction::Not(Box::new(Restriction::Exist(PR_SUBJECT))),
        ]);
        assert_eq!(r.flatten(), Restriction::False);
    }

    #[test]
    fn content_substring_ignore_case() {
        let mut bag = PropertyBag::new();
        bag.set(PR_SUBJECT, PropertyValue::String("Q3 Report".into()));
        let r = Restriction::Content {
            prop: PR_SUBJECT,
            value: "report".into(),
            fuzzy: FuzzyLevel::substring_ignore_case(),
        };
        assert!(r.matches(&bag));
    }
}
