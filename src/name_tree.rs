//! Algebraic tree of name alternatives and unions (spec §3).

use std::collections::BTreeSet;

/// A tree of alternatives produced by evaluating a `DTab` against a `Path`, or by a
/// `Namer` resolving a `Path` into concrete bound names.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum NameTree<T> {
    /// A single terminal value.
    Leaf(T),
    /// The first child that does not evaluate to negative/empty wins.
    Alt(Vec<NameTree<T>>),
    /// All children are evaluated and their bindings combined, weighted.
    Union(Vec<(u32, NameTree<T>)>),
    /// No binding exists (as opposed to an empty one).
    Neg,
    /// Bound, but to nothing.
    Empty,
}

impl<T: Ord + Clone> NameTree<T> {
    /// Reduces the tree to `None` (negative), `Some(empty set)` (empty binding), or
    /// `Some(non-empty set)` (one or more terminals), per spec §3.
    pub fn eval(&self) -> Option<BTreeSet<T>> {
        match *self {
            NameTree::Leaf(ref t) => {
                let mut set = BTreeSet::new();
                set.insert(t.clone());
                Some(set)
            }
            NameTree::Neg => None,
            NameTree::Empty => Some(BTreeSet::new()),
            NameTree::Alt(ref children) => {
                for child in children {
                    match child.eval() {
                        None => continue,
                        Some(ref set) if set.is_empty() => continue,
                        some => return some,
                    }
                }
                // Every alternative was negative or empty; Alt is negative unless one
                // of its children was an explicit Empty (no children here is Neg).
                if children.iter().any(|c| c.eval() == Some(BTreeSet::new())) {
                    Some(BTreeSet::new())
                } else {
                    None
                }
            }
            NameTree::Union(ref weighted) => {
                let mut any_bound = false;
                let mut out = BTreeSet::new();
                for &(_weight, ref child) in weighted {
                    if let Some(set) = child.eval() {
                        any_bound = true;
                        out.extend(set);
                    }
                }
                if any_bound { Some(out) } else { None }
            }
        }
    }
}
