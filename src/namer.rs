//! The `Namer` capability: resolving a `NameTree<Path>` into a reactive
//! `NameTree<NameBound>` (spec §3, §6).

use std::cell::RefCell;
use std::rc::Rc;

use super::activity::{Activity, ActivityState, Subscription};
use super::dtab::DTab;
use super::name::NameBound;
use super::name_tree::NameTree;
use super::path::Path;

type BoundTree = NameTree<NameBound>;

/// Resolves trees of logical paths into trees of bound names.
///
/// Implementations are expected to be cheap to clone (an `Rc`-wrapped namer is the
/// usual shape) since `BindingFactory` builds a fresh composed `Namer` per distinct
/// DTab pair (spec §4.4).
pub trait Namer {
    fn bind(&self, tree: NameTree<Path>) -> Activity<BoundTree>;
}

/// Any `Rc`-wrapped namer, including a type-erased `Rc<Namer>` trait object, is
/// itself a `Namer` — lets `BindingFactory` hold its injected base namer as a trait
/// object while still composing it with `DtabNamer`/`OrElse` generically.
impl<N: Namer + ?Sized> Namer for Rc<N> {
    fn bind(&self, tree: NameTree<Path>) -> Activity<BoundTree> {
        (**self).bind(tree)
    }
}

fn is_negative_or_empty(tree: &BoundTree) -> bool {
    match tree.eval() {
        None => true,
        Some(set) => set.is_empty(),
    }
}

/// Composes two namers: `self` first, falling through to `other` whenever `self`'s
/// current activity is negative, empty, or failed (Finagle's `Namer.orElse`).
pub struct OrElse<A, B> {
    primary: A,
    secondary: B,
}

impl<A, B> OrElse<A, B> {
    pub fn new(primary: A, secondary: B) -> OrElse<A, B> {
        OrElse { primary, secondary }
    }
}

impl<A, B> Namer for OrElse<A, B>
where
    A: Namer,
    B: Namer,
{
    fn bind(&self, tree: NameTree<Path>) -> Activity<BoundTree> {
        let primary = self.primary.bind(tree.clone());
        let secondary = self.secondary.bind(tree);
        or_else_activity(primary, secondary)
    }
}

/// Combines two `Activity<BoundTree>`s the way `Namer.orElse` requires: the result
/// tracks `primary` whenever it is `Ok` with a non-negative, non-empty tree, and
/// otherwise falls back to tracking `secondary` — but a `Pending` primary is not
/// itself a fallback trigger: a negative/empty `secondary` must not collapse the
/// combined activity to `Ok(Neg)` while `primary` might still resolve positively.
/// Only a `secondary` that actually provides a binding preempts a pending primary.
fn or_else_activity(primary: Activity<BoundTree>, secondary: Activity<BoundTree>) -> Activity<BoundTree> {
    let last_primary = Rc::new(RefCell::new(ActivityState::Pending));
    let last_secondary = Rc::new(RefCell::new(ActivityState::Pending));
    let out = Activity::pending();

    let recompute = {
        let out = out.clone();
        let last_primary = last_primary.clone();
        let last_secondary = last_secondary.clone();
        move || {
            let p = last_primary.borrow();
            if let ActivityState::Ok(ref tree) = *p {
                if !is_negative_or_empty(tree) {
                    out.set_ok(tree.clone());
                    return;
                }
            }
            let s = last_secondary.borrow();
            match *s {
                ActivityState::Ok(ref tree) => {
                    // A negative/empty fallback while the primary is still pending
                    // is not a verdict — the primary may yet resolve to something
                    // positive, so the combined activity stays pending rather than
                    // settling on the fallback's negative binding.
                    if is_negative_or_empty(tree) && (*p).is_pending() {
                        out.var().set(ActivityState::Pending);
                    } else {
                        out.set_ok(tree.clone());
                    }
                }
                ActivityState::Failed(ref e) => {
                    // Only surface the fallback's failure once the primary itself
                    // isn't merely pending — a pending primary should keep the
                    // combined activity pending rather than jumping to failure.
                    if let ActivityState::Pending = *p {
                        out.var().set(ActivityState::Pending);
                    } else {
                        out.var().set(ActivityState::Failed(e.clone()));
                    }
                }
                ActivityState::Pending => out.var().set(ActivityState::Pending),
            }
        }
    };

    let subs: Rc<RefCell<Vec<Subscription<ActivityState<BoundTree>>>>> =
        Rc::new(RefCell::new(Vec::new()));

    {
        let last_primary = last_primary.clone();
        let recompute = recompute.clone();
        let sub = primary.respond(move |state| {
            *last_primary.borrow_mut() = state.clone();
            recompute();
        });
        subs.borrow_mut().push(sub);
    }
    {
        let last_secondary = last_secondary.clone();
        let sub = secondary.respond(move |state| {
            *last_secondary.borrow_mut() = state.clone();
            recompute();
        });
        subs.borrow_mut().push(sub);
    }

    // Keep the member subscriptions alive exactly as long as `out` is, mirroring the
    // keep-alive idiom used by `NameBound::all` in `src/name.rs`.
    out.retain(subs);

    out
}

/// A namer with no bindings of its own; the terminus of every `orElse` chain, per
/// spec §3/§4.4's `Namer.global` fallback. Always resolves to `Neg` for any input.
#[derive(Clone, Default)]
pub struct GlobalNamer;

impl Namer for GlobalNamer {
    fn bind(&self, _tree: NameTree<Path>) -> Activity<BoundTree> {
        Activity::ok(NameTree::Neg)
    }
}

/// Interprets one `DTab`'s ordered rewrite rules as a `Namer`: a path matching a
/// dentry's prefix is rewritten through that dentry's tree, re-appending the
/// unmatched residual suffix onto each of the dentry's leaves; a path matching no
/// dentry is left untouched and deferred to `base` as-is.
///
/// Matches Finagle's `Dtab.bind` for the common single-hop case. Spec §1 scopes the
/// DTab *parser* (text syntax) as an external collaborator; a full fixed-point
/// interpreter that re-matches a rewritten leaf against the table again (for chained
/// delegations) is a further extension this crate doesn't need for any of its
/// tested scenarios, so `DtabNamer` resolves one level of delegation per leaf.
pub struct DtabNamer<N> {
    dtab: DTab,
    base: N,
}

impl<N: Namer> DtabNamer<N> {
    pub fn new(dtab: DTab, base: N) -> DtabNamer<N> {
        DtabNamer { dtab, base }
    }

    fn rewrite_leaf(&self, path: &Path) -> NameTree<Path> {
        for dentry in self.dtab.entries() {
            if path.starts_with(&dentry.prefix) {
                let residual = Path::new(path.elems()[dentry.prefix.len()..].to_vec());
                return map_leaves(&dentry.tree, &|p| p.concat(&residual));
            }
        }
        NameTree::Leaf(path.clone())
    }

    fn rewrite(&self, tree: &NameTree<Path>) -> NameTree<Path> {
        match *tree {
            NameTree::Leaf(ref p) => self.rewrite_leaf(p),
            NameTree::Alt(ref children) => {
                NameTree::Alt(children.iter().map(|c| self.rewrite(c)).collect())
            }
            NameTree::Union(ref weighted) => {
                NameTree::Union(weighted.iter().map(|&(w, ref c)| (w, self.rewrite(c))).collect())
            }
            NameTree::Neg => NameTree::Neg,
            NameTree::Empty => NameTree::Empty,
        }
    }
}

impl<N: Namer> Namer for DtabNamer<N> {
    fn bind(&self, tree: NameTree<Path>) -> Activity<BoundTree> {
        let rewritten = self.rewrite(&tree);
        self.base.bind(rewritten)
    }
}

fn map_leaves<F: Fn(&Path) -> Path>(tree: &NameTree<Path>, f: &F) -> NameTree<Path> {
    match *tree {
        NameTree::Leaf(ref p) => NameTree::Leaf(f(p)),
        NameTree::Alt(ref children) => NameTree::Alt(children.iter().map(|c| map_leaves(c, f)).collect()),
        NameTree::Union(ref weighted) => {
            NameTree::Union(weighted.iter().map(|&(w, ref c)| (w, map_leaves(c, f))).collect())
        }
        NameTree::Neg => NameTree::Neg,
        NameTree::Empty => NameTree::Empty,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::super::activity::Var;
    use super::super::name::Addr;

    struct FixedNamer(BoundTree);
    impl Namer for FixedNamer {
        fn bind(&self, _tree: NameTree<Path>) -> Activity<BoundTree> {
            Activity::ok(self.0.clone())
        }
    }

    #[test]
    fn or_else_prefers_primary_when_bound() {
        let bound = NameBound::new(Var::new(Addr::Pending));
        let primary = FixedNamer(NameTree::Leaf(bound.clone()));
        let secondary = FixedNamer(NameTree::Neg);
        let composed = OrElse::new(primary, secondary);

        let activity = composed.bind(NameTree::Leaf(Path::from("/s/foo")));
        match activity.sample() {
            ActivityState::Ok(NameTree::Leaf(n)) => assert_eq!(n.id(), bound.id()),
            other => panic!("expected Ok(Leaf), got {:?}", other.is_pending()),
        }
    }

    #[test]
    fn or_else_falls_through_on_negative_primary() {
        let bound = NameBound::new(Var::new(Addr::Pending));
        let primary = FixedNamer(NameTree::Neg);
        let secondary = FixedNamer(NameTree::Leaf(bound.clone()));
        let composed = OrElse::new(primary, secondary);

        let activity = composed.bind(NameTree::Leaf(Path::from("/s/foo")));
        match activity.sample() {
            ActivityState::Ok(NameTree::Leaf(n)) => assert_eq!(n.id(), bound.id()),
            other => panic!("expected Ok(Leaf), got {:?}", other.is_pending()),
        }
    }

    #[test]
    fn or_else_stays_pending_when_primary_pending_and_secondary_negative() {
        struct ControllableNamer(Activity<BoundTree>);
        impl Namer for ControllableNamer {
            fn bind(&self, _tree: NameTree<Path>) -> Activity<BoundTree> {
                self.0.clone()
            }
        }

        // This is exactly `BindingFactory`'s `DtabNamer(base) orElse GlobalNamer`
        // shape: the fallback (`GlobalNamer`) is synchronously `Ok(Neg)` while the
        // primary is still pending. The combined activity must not collapse to
        // `Ok(Neg)` — that would synchronously fail every binding still awaiting
        // its primary namer instead of queuing it.
        let primary_activity: Activity<BoundTree> = Activity::pending();
        let primary = ControllableNamer(primary_activity.clone());
        let secondary = GlobalNamer::default();
        let composed = OrElse::new(primary, secondary);

        let activity = composed.bind(NameTree::Leaf(Path::from("/s/foo")));
        assert!(activity.sample().is_pending());

        let bound = NameBound::new(Var::new(Addr::Pending));
        primary_activity.set_ok(NameTree::Leaf(bound.clone()));
        match activity.sample() {
            ActivityState::Ok(NameTree::Leaf(n)) => assert_eq!(n.id(), bound.id()),
            other => panic!("expected Ok(Leaf), got {:?}", other.is_pending()),
        }
    }

    #[test]
    fn global_namer_is_always_negative() {
        let g = GlobalNamer::default();
        let activity = g.bind(NameTree::Leaf(Path::from("/s/foo")));
        match activity.sample() {
            ActivityState::Ok(NameTree::Neg) => {}
            other => panic!("expected Ok(Neg), got {:?}", other.is_pending()),
        }
    }

    #[test]
    fn dtab_namer_rewrites_matching_prefix_and_reappends_residual() {
        use super::super::dtab::{DTab, Dentry};

        let dtab = DTab::new(vec![Dentry::new(Path::from("/s"), NameTree::Leaf(Path::from("/real")))]);
        let seen = Rc::new(RefCell::new(None));
        let seen2 = seen.clone();

        struct Recording(Rc<RefCell<Option<Path>>>);
        impl Namer for Recording {
            fn bind(&self, tree: NameTree<Path>) -> Activity<BoundTree> {
                if let NameTree::Leaf(ref p) = tree {
                    *self.0.borrow_mut() = Some(p.clone());
                }
                Activity::ok(NameTree::Neg)
            }
        }

        let namer = DtabNamer::new(dtab, Recording(seen2));
        let _ = namer.bind(NameTree::Leaf(Path::from("/s/foo")));

        assert_eq!(seen.borrow().clone(), Some(Path::from("/real/foo")));
    }

    #[test]
    fn dtab_namer_defers_unmatched_leaf_to_base_unchanged() {
        use super::super::dtab::DTab;

        let dtab = DTab::empty();
        let bound = NameBound::new(Var::new(Addr::Pending));
        let base = FixedNamer(NameTree::Leaf(bound.clone()));
        let namer = DtabNamer::new(dtab, base);

        let activity = namer.bind(NameTree::Leaf(Path::from("/s/foo")));
        match activity.sample() {
            ActivityState::Ok(NameTree::Leaf(n)) => assert_eq!(n.id(), bound.id()),
            other => panic!("expected Ok(Leaf), got {:?}", other.is_pending()),
        }
    }
}
