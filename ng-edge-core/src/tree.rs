use ng_edge_models::{
    constants::{AUTH_CHAIN_SEPARATOR, MAX_AUTH_CHAIN_DEPTH},
    identity::ServiceIdentity,
};
use std::collections::HashMap;

/// In-memory hierarchical index of service identities.
///
/// Nodes are keyed by identity id; parent links resolve lazily by matching
/// a node's first parent scope against another node's device scope, so
/// children may arrive before their parents. Auth chains are computed on
/// every read and always reflect the current structure; nothing is cached,
/// which makes the resolved state independent of insertion order.
pub struct ServiceIdentityTree {
    /// Identity id of the designated hierarchy root (the edge device).
    root_id: String,
    nodes: HashMap<String, ServiceIdentity>,
    /// Reverse index: device scope -> identity id owning that scope.
    scopes: HashMap<String, String>,
}

impl ServiceIdentityTree {
    pub fn new(root_id: impl Into<String>) -> Self {
        Self {
            root_id: root_id.into(),
            nodes: HashMap::new(),
            scopes: HashMap::new(),
        }
    }

    #[inline]
    pub fn root_id(&self) -> &str {
        &self.root_id
    }

    /// Insert a new identity or structurally replace the existing one.
    ///
    /// A missing parent is not an error; the node stays chainless until
    /// the parent arrives. Children already present re-link automatically
    /// because links are resolved on read. When two identities claim the
    /// same scope token (malformed registry data), the index tracks the
    /// most recent claimant.
    pub fn insert_or_update(&mut self, identity: ServiceIdentity) {
        let id = identity.id();

        let stale_scope = self.nodes.get(&id).and_then(|previous| {
            if previous.device_scope == identity.device_scope {
                None
            } else {
                previous.device_scope.clone()
            }
        });
        if let Some(scope) = stale_scope {
            self.unindex_scope(&id, &scope);
        }

        if let Some(scope) = &identity.device_scope {
            self.scopes.insert(scope.clone(), id.clone());
        }
        self.nodes.insert(id, identity);
    }

    /// Remove the identity. Descendants are kept but their chains resolve
    /// to `None` until they are re-parented or the node returns.
    pub fn remove(&mut self, id: &str) -> Option<ServiceIdentity> {
        let removed = self.nodes.remove(id)?;
        if let Some(scope) = removed.device_scope.as_deref() {
            self.unindex_scope(id, scope);
        }
        Some(removed)
    }

    pub fn get(&self, id: &str) -> Option<&ServiceIdentity> {
        self.nodes.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    pub fn ids(&self) -> Vec<String> {
        self.nodes.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Resolve the auth chain from `id` up to the root.
    ///
    /// Returns the `;`-separated ids, self-first and root-last, or `None`
    /// when any ancestor link is unresolved, the root itself is absent, or
    /// the walk exceeds the depth cap (scope cycle in malformed data).
    pub fn get_auth_chain(&self, id: &str) -> Option<String> {
        let mut links = Vec::new();
        let mut current = self.nodes.get(id)?;

        loop {
            links.push(current.id());
            if current.id() == self.root_id {
                let separator = AUTH_CHAIN_SEPARATOR.to_string();
                return Some(links.join(&separator));
            }
            if links.len() >= MAX_AUTH_CHAIN_DEPTH {
                return None;
            }
            let parent_scope = current.parent_scopes.first()?;
            let parent_id = self.scopes.get(parent_scope)?;
            current = self.nodes.get(parent_id)?;
        }
    }

    /// Release `id`'s claim on `scope` in the reverse index.
    ///
    /// A mapping stolen by a later insert stays intact. When another node
    /// still carries the same scope token, the mapping is handed to it
    /// instead of dropped, so its children keep resolving.
    fn unindex_scope(&mut self, id: &str, scope: &str) {
        if !self.scopes.get(scope).is_some_and(|owner| owner.as_str() == id) {
            return;
        }
        let next_owner = self
            .nodes
            .values()
            .find(|node| node.id() != id && node.device_scope.as_deref() == Some(scope))
            .map(|node| node.id());
        match next_owner {
            Some(next) => {
                self.scopes.insert(scope.to_string(), next);
            }
            None => {
                self.scopes.remove(scope);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn edge(id: &str, scope: &str, parent_scope: Option<&str>) -> ServiceIdentity {
        let mut identity = ServiceIdentity::new_device(id)
            .with_scope(scope)
            .with_capability("iotEdge");
        if let Some(parent) = parent_scope {
            identity = identity.with_parent_scope(parent);
        }
        identity
    }

    fn leaf(id: &str, parent_scope: &str) -> ServiceIdentity {
        ServiceIdentity::new_device(id).with_parent_scope(parent_scope)
    }

    fn module(device_id: &str, module_id: &str, parent_scope: &str) -> ServiceIdentity {
        ServiceIdentity::new_module(device_id, module_id).with_parent_scope(parent_scope)
    }

    /// root -> e1_L1/e2_L1 -> e1_L2,e2_L2 (under e1_L1) and e3_L2,e4_L2
    /// (under e2_L1) -> leaf1 + module on e1_L2, leaf2 + module on e3_L2.
    fn fixture_nodes() -> Vec<ServiceIdentity> {
        vec![
            edge("root", "s-root", None),
            edge("e1_L1", "s-e1L1", Some("s-root")),
            edge("e2_L1", "s-e2L1", Some("s-root")),
            edge("e1_L2", "s-e1L2", Some("s-e1L1")),
            edge("e2_L2", "s-e2L2", Some("s-e1L1")),
            edge("e3_L2", "s-e3L2", Some("s-e2L1")),
            edge("e4_L2", "s-e4L2", Some("s-e2L1")),
            leaf("leaf1", "s-e1L2"),
            module("e1_L2", "mod1", "s-e1L2"),
            leaf("leaf2", "s-e3L2"),
            module("e3_L2", "mod2", "s-e3L2"),
        ]
    }

    fn fixture_tree() -> ServiceIdentityTree {
        let mut tree = ServiceIdentityTree::new("root");
        for node in fixture_nodes() {
            tree.insert_or_update(node);
        }
        tree
    }

    #[test]
    fn chains_resolve_through_the_hierarchy() {
        let tree = fixture_tree();

        assert_eq!(
            tree.get_auth_chain("leaf1").as_deref(),
            Some("leaf1;e1_L2;e1_L1;root")
        );
        assert_eq!(
            tree.get_auth_chain("e1_L2/mod1").as_deref(),
            Some("e1_L2/mod1;e1_L2;e1_L1;root")
        );
        assert_eq!(
            tree.get_auth_chain("leaf2").as_deref(),
            Some("leaf2;e3_L2;e2_L1;root")
        );
        assert_eq!(
            tree.get_auth_chain("e3_L2/mod2").as_deref(),
            Some("e3_L2/mod2;e3_L2;e2_L1;root")
        );
        assert_eq!(tree.get_auth_chain("root").as_deref(), Some("root"));
        assert_eq!(tree.get_auth_chain("nonexistent"), None);
    }

    #[test]
    fn insertion_order_does_not_matter() {
        let mut nodes = fixture_nodes();
        // Leaf-first: reverse the fixture so the root arrives last.
        nodes.reverse();

        let mut tree = ServiceIdentityTree::new("root");
        let (root, rest) = nodes.split_last().unwrap();
        for node in rest {
            tree.insert_or_update(node.clone());
        }

        // Without the root nothing resolves.
        for id in ["leaf1", "leaf2", "e1_L2/mod1", "e3_L2/mod2", "e1_L1"] {
            assert_eq!(tree.get_auth_chain(id), None, "chain for {id} before root");
        }

        tree.insert_or_update(root.clone());

        let reference = fixture_tree();
        for id in ["leaf1", "leaf2", "e1_L2/mod1", "e3_L2/mod2", "e1_L1", "e3_L2"] {
            assert_eq!(tree.get_auth_chain(id), reference.get_auth_chain(id));
        }
    }

    #[test]
    fn reparenting_moves_the_subtree() {
        let mut tree = fixture_tree();

        tree.insert_or_update(edge("e3_L2", "s-e3L2", Some("s-e1L1")));

        assert_eq!(
            tree.get_auth_chain("leaf2").as_deref(),
            Some("leaf2;e3_L2;e1_L1;root")
        );
        assert_eq!(
            tree.get_auth_chain("e3_L2/mod2").as_deref(),
            Some("e3_L2/mod2;e3_L2;e1_L1;root")
        );
    }

    #[test]
    fn removal_invalidates_descendants_only() {
        let mut tree = fixture_tree();

        tree.remove("e2_L1");

        for id in ["e2_L1", "e3_L2", "e4_L2", "leaf2", "e3_L2/mod2"] {
            assert_eq!(tree.get_auth_chain(id), None, "chain for {id} after removal");
        }
        // Unrelated branch is untouched.
        assert_eq!(
            tree.get_auth_chain("leaf1").as_deref(),
            Some("leaf1;e1_L2;e1_L1;root")
        );
    }

    #[test]
    fn missing_root_resolves_nothing() {
        let mut tree = fixture_tree();
        tree.remove("root");

        for id in ["leaf1", "e1_L1", "e2_L1"] {
            assert_eq!(tree.get_auth_chain(id), None);
        }
    }

    #[test]
    fn scope_cycles_are_bounded() {
        let mut tree = ServiceIdentityTree::new("root");
        tree.insert_or_update(edge("a", "s-a", Some("s-b")));
        tree.insert_or_update(edge("b", "s-b", Some("s-a")));

        assert_eq!(tree.get_auth_chain("a"), None);
        assert_eq!(tree.get_auth_chain("b"), None);
    }

    #[test]
    fn reparenting_without_scope_change_keeps_the_index() {
        let mut tree = fixture_tree();

        // Same scope token, new parent: children must follow the move.
        tree.insert_or_update(edge("e1_L2", "s-e1L2", Some("s-e2L1")));
        assert_eq!(
            tree.get_auth_chain("leaf1").as_deref(),
            Some("leaf1;e1_L2;e2_L1;root")
        );
        assert_eq!(
            tree.get_auth_chain("e1_L2/mod1").as_deref(),
            Some("e1_L2/mod1;e1_L2;e2_L1;root")
        );
    }

    #[test]
    fn duplicate_scopes_fall_back_to_the_surviving_holder() {
        let mut tree = ServiceIdentityTree::new("root");
        tree.insert_or_update(edge("root", "s-root", None));
        tree.insert_or_update(edge("a", "s-dup", Some("s-root")));
        tree.insert_or_update(edge("b", "s-dup", Some("s-root")));
        tree.insert_or_update(leaf("child", "s-dup"));

        // b stole the index entry; removing it hands the scope back to a.
        tree.remove("b");
        assert_eq!(
            tree.get_auth_chain("child").as_deref(),
            Some("child;a;root")
        );
    }

    #[test]
    fn structural_replace_updates_scope_index() {
        let mut tree = fixture_tree();

        // e1_L2 moves to a new scope token; leaf1 still points at the old
        // one and must stop resolving.
        tree.insert_or_update(edge("e1_L2", "s-e1L2-new", Some("s-e1L1")));
        assert_eq!(tree.get_auth_chain("leaf1"), None);

        // Re-target leaf1 at the new scope.
        tree.insert_or_update(leaf("leaf1", "s-e1L2-new"));
        assert_eq!(
            tree.get_auth_chain("leaf1").as_deref(),
            Some("leaf1;e1_L2;e1_L1;root")
        );
    }
}
