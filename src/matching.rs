//! Two-sided matching of records.
//!
//! A match combines two records into one evaluation context in which each
//! record's unscoped references resolve within itself, while the ambient
//! names `other` / `target` (and `my`) expose the counterpart. On top of
//! that context the standard derived attributes are defined:
//!
//! ```text
//! [ symmetricMatch   = leftMatchesRight && rightMatchesLeft;
//!   leftMatchesRight = adcr.ad.Requirements;
//!   rightMatchesLeft = adcl.ad.Requirements;
//!   adcl = [ my = .adcl.ad; target = .adcr.ad; other = .adcr.ad; ad = <left>  ];
//!   adcr = [ my = .adcr.ad; target = .adcl.ad; other = .adcl.ad; ad = <right> ]; ]
//! ```
//!
//! "Left matches right" reads as *the left record satisfies the right
//! record's requirements*: the right side's `Requirements` expression is
//! evaluated with the left record bound to `other`.
//!
//! The match owns both input records; releasing them back for standalone
//! use is [`MatchClassAd::into_parts`], so a record can never be evaluated
//! through a stale match scope by accident.
//!
//! # Examples
//!
//! ```
//! use classad::{ClassAd, MatchClassAd};
//!
//! let job = ClassAd::parse("[ Requirements = other.Cpus >= 2 ]").unwrap();
//! let machine = ClassAd::parse("[ Cpus = 4; Requirements = true ]").unwrap();
//!
//! let m = MatchClassAd::new(job, machine);
//! assert!(m.symmetric_match());
//!
//! let (_job, _machine) = m.into_parts();
//! ```

use crate::ast::{ExprTree, OpKind};
use crate::record::ClassAd;

const LEFT: &str = "adcl";
const RIGHT: &str = "adcr";

/// A combined evaluation context over two records.
pub struct MatchClassAd {
    context: ClassAd,
}

impl MatchClassAd {
    /// Builds the match context, taking ownership of both records.
    pub fn new(left: ClassAd, right: ClassAd) -> Self {
        let mut context = ClassAd::new();
        context.insert(
            "symmetricMatch",
            ExprTree::binary(
                OpKind::LogicalAnd,
                ExprTree::attr("leftMatchesRight"),
                ExprTree::attr("rightMatchesLeft"),
            ),
        );
        context.insert("leftMatchesRight", requirements_of(RIGHT));
        context.insert("rightMatchesLeft", requirements_of(LEFT));
        context.insert(LEFT, side_record(LEFT, RIGHT, left));
        context.insert(RIGHT, side_record(RIGHT, LEFT, right));
        MatchClassAd { context }
    }

    /// Both sides' requirements hold against each other.
    pub fn symmetric_match(&self) -> bool {
        self.evaluate_match_attr("symmetricMatch")
    }

    /// The left record satisfies the right record's requirements.
    pub fn left_matches_right(&self) -> bool {
        self.evaluate_match_attr("leftMatchesRight")
    }

    /// The right record satisfies the left record's requirements.
    pub fn right_matches_left(&self) -> bool {
        self.evaluate_match_attr("rightMatchesLeft")
    }

    fn evaluate_match_attr(&self, name: &str) -> bool {
        self.context.evaluate_attr_bool_equiv(name).unwrap_or(false)
    }

    /// The combined context record, for evaluating further expressions
    /// against the pair.
    pub fn context(&self) -> &ClassAd {
        &self.context
    }

    /// The left record, while it is attached.
    pub fn left(&self) -> Option<&ClassAd> {
        side(&self.context, LEFT)
    }

    /// The right record, while it is attached.
    pub fn right(&self) -> Option<&ClassAd> {
        side(&self.context, RIGHT)
    }

    /// Swaps the left record out, returning the previous one.
    pub fn replace_left(&mut self, ad: ClassAd) -> Option<ClassAd> {
        swap_side(&mut self.context, LEFT, ad)
    }

    /// Swaps the right record out, returning the previous one.
    pub fn replace_right(&mut self, ad: ClassAd) -> Option<ClassAd> {
        swap_side(&mut self.context, RIGHT, ad)
    }

    /// Releases both records for standalone use, consuming the match.
    pub fn into_parts(mut self) -> (ClassAd, ClassAd) {
        let left = extract_side(&mut self.context, LEFT);
        let right = extract_side(&mut self.context, RIGHT);
        (left, right)
    }
}

/// `side.ad.Requirements`
fn requirements_of(side: &str) -> ExprTree {
    ExprTree::select(ExprTree::select(ExprTree::attr(side), "ad"), "Requirements")
}

/// `.side.ad`
fn absolute_ad(side: &str) -> ExprTree {
    ExprTree::select(ExprTree::absolute_attr(side), "ad")
}

fn side_record(mine: &str, theirs: &str, ad: ClassAd) -> ExprTree {
    let mut half = ClassAd::new();
    half.insert("my", absolute_ad(mine));
    half.insert("target", absolute_ad(theirs));
    half.insert("other", absolute_ad(theirs));
    half.insert("ad", ExprTree::Record(ad));
    ExprTree::Record(half)
}

fn side<'c>(context: &'c ClassAd, name: &str) -> Option<&'c ClassAd> {
    match context.lookup_ignore_chain(name) {
        Some(ExprTree::Record(half)) => match half.lookup_ignore_chain("ad") {
            Some(ExprTree::Record(ad)) => Some(ad),
            _ => None,
        },
        _ => None,
    }
}

fn swap_side(context: &mut ClassAd, name: &str, new: ClassAd) -> Option<ClassAd> {
    let slot = context.lookup_mut(name)?;
    let ExprTree::Record(half) = slot else {
        return None;
    };
    let previous = half.remove("ad");
    half.insert("ad", ExprTree::Record(new));
    match previous {
        Some(ExprTree::Record(ad)) => Some(ad),
        _ => None,
    }
}

fn extract_side(context: &mut ClassAd, name: &str) -> ClassAd {
    match context.remove(name) {
        Some(ExprTree::Record(mut half)) => match half.remove("ad") {
            Some(ExprTree::Record(ad)) => ad,
            _ => ClassAd::new(),
        },
        _ => ClassAd::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ad(text: &str) -> ClassAd {
        ClassAd::parse(text).expect("test record parses")
    }

    #[test]
    fn other_reaches_the_counterpart() {
        let left = ad("[ Memory = 2048; Requirements = other.Cpus >= 2 ]");
        let right = ad("[ Cpus = 4; Requirements = other.Memory >= 1024 ]");
        let m = MatchClassAd::new(left, right);
        assert!(m.left_matches_right());
        assert!(m.right_matches_left());
        assert!(m.symmetric_match());
    }

    #[test]
    fn replace_hands_back_the_previous_record() {
        let mut m = MatchClassAd::new(
            ad("[ Requirements = true; Tag = 1 ]"),
            ad("[ Requirements = true ]"),
        );
        let previous = m.replace_left(ad("[ Requirements = false ]"));
        assert_eq!(previous.unwrap().evaluate_attr_int("Tag"), Some(1));
        assert!(!m.symmetric_match());
    }
}
