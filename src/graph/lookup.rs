use std::sync::Arc;

use crate::ir::Class;
use crate::workspace::Workspace;

/// Name → class resolution over a set of loaded classes.
pub trait ClassLookup: Send + Sync {
    /// Find the class with the given internal name. Absence is not an error.
    fn find(&self, name: &str) -> Option<Arc<Class>>;
}

/// Main bundles win over versioned bundles; among resources the primary
/// resource comes first, then libraries in the order they were added.
impl ClassLookup for Workspace {
    fn find(&self, name: &str) -> Option<Arc<Class>> {
        let resources = self.all_resources();
        resources
            .iter()
            .find_map(|resource| resource.bundle().get(name))
            .or_else(|| {
                resources.iter().find_map(|resource| {
                    resource
                        .latest_versioned_bundle()
                        .and_then(|bundle| bundle.get(name))
                })
            })
    }
}
