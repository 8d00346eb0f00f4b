use std::sync::Arc;

use dashmap::DashSet;

use crate::graph::method_ref::MethodRef;
use crate::ir::MethodKey;

/// Call graph node for one declared method.
///
/// Edges are stored on both ends as [`MethodKey`] handles; the owning
/// [`CallGraph`](crate::graph::CallGraph) keeps them symmetric.
#[derive(Debug)]
pub struct MethodVertex {
    method: MethodRef,
    declaration: MethodKey,
    callers: DashSet<MethodKey>,
    calls: DashSet<MethodKey>,
}

impl MethodVertex {
    pub(crate) fn new(method: MethodRef, declaration: MethodKey) -> Self {
        Self {
            method,
            declaration,
            callers: DashSet::new(),
            calls: DashSet::new(),
        }
    }

    pub fn method(&self) -> &MethodRef {
        &self.method
    }

    pub fn declaration(&self) -> MethodKey {
        self.declaration
    }

    pub fn callers(&self) -> Vec<MethodKey> {
        sorted(&self.callers)
    }

    pub fn calls(&self) -> Vec<MethodKey> {
        sorted(&self.calls)
    }

    pub fn has_call(&self, callee: MethodKey) -> bool {
        self.calls.contains(&callee)
    }

    pub fn has_caller(&self, caller: MethodKey) -> bool {
        self.callers.contains(&caller)
    }

    /// Add the edge `self → callee` on both ends.
    pub(crate) fn link(&self, callee: &MethodVertex) {
        self.calls.insert(callee.declaration);
        callee.callers.insert(self.declaration);
    }

    /// Remove every outgoing edge on both ends.
    pub(crate) fn unlink_calls(&self, vertex: impl Fn(MethodKey) -> Option<Arc<MethodVertex>>) {
        for callee in self.calls() {
            if let Some(callee) = vertex(callee) {
                callee.callers.remove(&self.declaration);
            }
        }
        self.calls.clear();
    }

    /// Detach this vertex from every neighbour and clear its own edges.
    /// Returns the callers this vertex had, itself included when it is
    /// recursive.
    pub(crate) fn prune(
        &self,
        vertex: impl Fn(MethodKey) -> Option<Arc<MethodVertex>>,
    ) -> Vec<MethodKey> {
        let callers = self.callers();
        self.unlink_calls(&vertex);
        for caller in &callers {
            if let Some(caller) = vertex(*caller) {
                caller.calls.remove(&self.declaration);
            }
        }
        self.callers.clear();
        callers
    }
}

fn sorted(set: &DashSet<MethodKey>) -> Vec<MethodKey> {
    let mut keys: Vec<MethodKey> = set.iter().map(|key| *key).collect();
    keys.sort();
    keys
}
