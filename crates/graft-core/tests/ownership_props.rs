//! Property tests for the ownership tree: random forests, cascade
//! teardown, cycle rejection, single-owner preservation.

use graft_core::{GraftError, Node};
use proptest::prelude::*;

/// Build a forest of `n` nodes where node `i > 0` attaches under a
/// random earlier node. Returns the nodes plus the parent index of each
/// (`usize::MAX` for roots of the forest).
fn build_forest(raw_parents: &[prop::sample::Index]) -> (Vec<Node>, Vec<usize>) {
    let n = raw_parents.len() + 1;
    let nodes: Vec<Node> = (0..n).map(|_| Node::new()).collect();
    let mut parent = vec![usize::MAX; n];
    for (i, idx) in raw_parents.iter().enumerate() {
        let child = i + 1;
        let p = idx.index(child);
        nodes[p].attach(&nodes[child]).unwrap();
        parent[child] = p;
    }
    (nodes, parent)
}

/// Whether `node` is `ancestor` or sits below it in the model.
fn in_subtree(parent: &[usize], mut node: usize, ancestor: usize) -> bool {
    loop {
        if node == ancestor {
            return true;
        }
        if parent[node] == usize::MAX {
            return false;
        }
        node = parent[node];
    }
}

proptest! {
    #[test]
    fn cascade_unlinks_exactly_the_subtree(
        raw_parents in prop::collection::vec(any::<prop::sample::Index>(), 1..24),
        victim in any::<prop::sample::Index>(),
    ) {
        let (nodes, parent) = build_forest(&raw_parents);
        let victim = victim.index(nodes.len());

        nodes[victim].unlink();

        for (i, node) in nodes.iter().enumerate() {
            prop_assert_eq!(
                node.is_unlinked(),
                in_subtree(&parent, i, victim),
                "node {} unlink state wrong after unlinking {}",
                i,
                victim
            );
        }
    }

    #[test]
    fn attach_sequences_never_create_cycles(
        ops in prop::collection::vec(
            (any::<prop::sample::Index>(), any::<prop::sample::Index>()),
            1..40,
        ),
    ) {
        const N: usize = 8;
        let nodes: Vec<Node> = (0..N).map(|_| Node::new()).collect();

        for (a, b) in &ops {
            let owner = &nodes[a.index(N)];
            let child = &nodes[b.index(N)];
            match owner.attach(child) {
                Ok(()) => {}
                Err(GraftError::CycleDetected) => {}
                Err(other) => prop_assert!(false, "unexpected attach error: {other}"),
            }
        }

        for node in &nodes {
            prop_assert!(!node.has_ancestor(node), "node became its own ancestor");
        }
    }

    #[test]
    fn reattach_preserves_single_ownership(
        owners in prop::collection::vec(any::<prop::sample::Index>(), 1..20),
    ) {
        const N: usize = 5;
        let candidates: Vec<Node> = (0..N).map(|_| Node::new()).collect();
        let child = Node::new();

        let mut last = None;
        for idx in &owners {
            let owner = &candidates[idx.index(N)];
            owner.attach(&child).unwrap();
            last = Some(idx.index(N));
        }

        let last = last.unwrap();
        prop_assert!(child.owner().unwrap().same(&candidates[last]));
        for (i, candidate) in candidates.iter().enumerate() {
            prop_assert_eq!(
                candidate.owns(&child),
                i == last,
                "exactly the final owner may hold the child"
            );
        }
    }

    #[test]
    fn failed_cycle_attach_mutates_nothing(
        depth in 2usize..10,
    ) {
        // A straight chain; attaching the head under the tail must fail
        // and leave every link intact.
        let nodes: Vec<Node> = (0..depth).map(|_| Node::new()).collect();
        for i in 1..depth {
            nodes[i - 1].attach(&nodes[i]).unwrap();
        }

        let tail = &nodes[depth - 1];
        prop_assert_eq!(tail.attach(&nodes[0]).unwrap_err(), GraftError::CycleDetected);

        prop_assert!(nodes[0].owner().is_none());
        for i in 1..depth {
            prop_assert!(nodes[i].owner().unwrap().same(&nodes[i - 1]));
        }
    }
}

#[test]
fn unlinked_subtree_rejects_reuse() {
    let parent = Node::new();
    let child = Node::new();
    parent.attach(&child).unwrap();
    parent.unlink();

    let fresh = Node::new();
    assert_eq!(
        fresh.attach(&child).unwrap_err(),
        GraftError::AlreadyUnlinked
    );
    assert_eq!(
        child.set_prop("x", graft_core::Value::from(1i64)).unwrap_err(),
        GraftError::AlreadyUnlinked
    );
}
