use std::cmp::Ordering;
use std::hash::{Hash, Hasher};

use crate::graph::method_ref::MethodRef;
use crate::ir::{CallKind, MethodKey};

/// A method whose call sites are waiting for an owner to become resolvable.
///
/// Identity is the calling method alone: one method calling the same owner
/// through several sites is tracked once, whatever the invoke kinds.
#[derive(Clone, Debug)]
pub struct CallingContext {
    /// Internal name of the calling class.
    pub class: String,
    pub caller: MethodKey,
    pub method: MethodRef,
    pub kind: CallKind,
    pub is_interface: bool,
}

impl PartialEq for CallingContext {
    fn eq(&self, other: &Self) -> bool {
        self.method == other.method
    }
}

impl Eq for CallingContext {}

impl Hash for CallingContext {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.method.hash(state);
    }
}

impl PartialOrd for CallingContext {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CallingContext {
    fn cmp(&self, other: &Self) -> Ordering {
        self.method.cmp(&other.method)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::ir::{Class, Method, MethodAccess};

    #[test]
    fn contexts_of_one_method_collapse() {
        let class = Class::new("App", None)
            .with_methods(vec![Method::new("m", "()V", MethodAccess::default())]);
        let context = |kind, is_interface| CallingContext {
            class: "App".to_string(),
            caller: class.methods[0].key(),
            method: MethodRef::new("App", "m", "()V"),
            kind,
            is_interface,
        };

        let contexts: HashSet<CallingContext> = [
            context(CallKind::Static, false),
            context(CallKind::Interface, true),
        ]
        .into_iter()
        .collect();

        assert_eq!(contexts.len(), 1);
    }
}
