//! A `Namer` whose binding is driven directly by the test, standing in for a real
//! delegation-aware resolver talking to namerd (mirrors the teacher's
//! `tests/mocks/mock_namerd.rs`: a scriptable stand-in for an external naming
//! collaborator, not a real network service).

use wily_core::{Activity, NameBound, NameTree, Namer, Path};

/// Always hands back the same `Activity`, letting the test drive it through
/// `Pending -> Ok`/`Failed` transitions with `Activity::set_ok`/`set_failed`.
pub struct ScriptedNamer {
    activity: Activity<NameTree<NameBound>>,
}

impl ScriptedNamer {
    pub fn new(activity: Activity<NameTree<NameBound>>) -> ScriptedNamer {
        ScriptedNamer { activity }
    }
}

impl Namer for ScriptedNamer {
    fn bind(&self, _tree: NameTree<Path>) -> Activity<NameTree<NameBound>> {
        self.activity.clone()
    }
}
