use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, OnceLock};

use dashmap::DashMap;
use tracing::debug;

use crate::graph::lookup::ClassLookup;
use crate::ir::{Class, ClassId, Field, Method};

/// A class together with its memoized hierarchy links.
///
/// Links that cannot be resolved yet are reported as absent and retried on
/// the next call, so a class that shows up later is picked up.
#[derive(Debug)]
pub struct LinkedClass {
    class: Arc<Class>,
    super_class: OnceLock<Arc<LinkedClass>>,
    interfaces: OnceLock<Vec<Arc<LinkedClass>>>,
    methods: DashMap<(String, String), Option<usize>>,
    fields: DashMap<(String, String), Option<usize>>,
}

impl LinkedClass {
    fn new(class: Arc<Class>) -> Self {
        Self {
            class,
            super_class: OnceLock::new(),
            interfaces: OnceLock::new(),
            methods: DashMap::new(),
            fields: DashMap::new(),
        }
    }

    pub fn class(&self) -> &Arc<Class> {
        &self.class
    }

    pub fn name(&self) -> &str {
        &self.class.name
    }

    pub fn super_class(&self, linker: &Linker) -> Option<Arc<LinkedClass>> {
        if let Some(linked) = self.super_class.get() {
            return Some(Arc::clone(linked));
        }
        let name = self.class.super_name.as_deref()?;
        match linker.find(name) {
            Some(linked) => Some(Arc::clone(self.super_class.get_or_init(|| linked))),
            None => {
                debug!(class = %self.class.name, super_class = name, "super class not found");
                None
            }
        }
    }

    pub fn interfaces(&self, linker: &Linker) -> Vec<Arc<LinkedClass>> {
        if let Some(interfaces) = self.interfaces.get() {
            return interfaces.clone();
        }
        let mut found = Vec::with_capacity(self.class.interfaces.len());
        let mut complete = true;
        for name in &self.class.interfaces {
            match linker.find(name) {
                Some(linked) => found.push(linked),
                None => {
                    debug!(class = %self.class.name, interface = %name, "interface not found");
                    complete = false;
                }
            }
        }
        if complete {
            self.interfaces.get_or_init(|| found).clone()
        } else {
            found
        }
    }

    /// Method declared by this class with the exact name and descriptor.
    pub fn method(&self, name: &str, descriptor: &str) -> Option<&Method> {
        let key = (name.to_string(), descriptor.to_string());
        let index = *self.methods.entry(key).or_insert_with(|| {
            self.class
                .methods
                .iter()
                .position(|method| method.name == name && method.descriptor == descriptor)
        });
        index.and_then(|index| self.class.methods.get(index))
    }

    /// Field declared by this class with the exact name and descriptor.
    pub fn field(&self, name: &str, descriptor: &str) -> Option<&Field> {
        let key = (name.to_string(), descriptor.to_string());
        let index = *self.fields.entry(key).or_insert_with(|| {
            self.class
                .fields
                .iter()
                .position(|field| field.name == name && field.descriptor == descriptor)
        });
        index.and_then(|index| self.class.fields.get(index))
    }

    /// Whether `name` is this class or is named as a super-class or
    /// interface anywhere in the part of its hierarchy that can be found.
    ///
    /// Declared names count even when the class they name is missing, so a
    /// removed ancestor is still reported.
    pub fn depends_on(&self, name: &str, linker: &Linker) -> bool {
        if self.declares(name) {
            return true;
        }
        let mut seen = HashSet::from([self.class.id()]);
        let mut queue = VecDeque::new();
        queue.extend(self.super_class(linker));
        queue.extend(self.interfaces(linker));
        while let Some(next) = queue.pop_front() {
            if !seen.insert(next.class.id()) {
                continue;
            }
            if next.declares(name) {
                return true;
            }
            queue.extend(next.super_class(linker));
            queue.extend(next.interfaces(linker));
        }
        false
    }

    fn declares(&self, name: &str) -> bool {
        self.class.name == name
            || self.class.super_name.as_deref() == Some(name)
            || self.class.interfaces.iter().any(|interface| interface == name)
    }

    /// Whether `name` is this class, is declared as a direct ancestor of it,
    /// or is reachable through links that are already memoized.
    fn memoized_reaches(&self, name: &str) -> bool {
        let mut seen = HashSet::new();
        let mut stack = vec![self];
        while let Some(next) = stack.pop() {
            if !seen.insert(next.class.id()) {
                continue;
            }
            if next.declares(name) {
                return true;
            }
            if let Some(super_class) = next.super_class.get() {
                stack.push(super_class.as_ref());
            }
            if let Some(interfaces) = next.interfaces.get() {
                stack.extend(interfaces.iter().map(Arc::as_ref));
            }
        }
        false
    }
}

/// Cache of [`LinkedClass`] instances keyed by class identity.
pub struct Linker {
    lookup: Arc<dyn ClassLookup>,
    linked: DashMap<ClassId, Arc<LinkedClass>>,
}

impl Linker {
    pub fn new(lookup: Arc<dyn ClassLookup>) -> Self {
        Self {
            lookup,
            linked: DashMap::new(),
        }
    }

    pub fn lookup(&self) -> &dyn ClassLookup {
        self.lookup.as_ref()
    }

    pub fn link(&self, class: &Arc<Class>) -> Arc<LinkedClass> {
        Arc::clone(
            self.linked
                .entry(class.id())
                .or_insert_with(|| Arc::new(LinkedClass::new(Arc::clone(class))))
                .value(),
        )
    }

    pub fn find(&self, name: &str) -> Option<Arc<LinkedClass>> {
        self.lookup.find(name).map(|class| self.link(&class))
    }

    /// Drop every cached class named `name` and every cached class whose
    /// hierarchy refers to one. Returns the evicted identities.
    pub fn evict(&self, name: &str) -> HashSet<ClassId> {
        let mut evicted = HashSet::new();
        self.linked.retain(|id, linked| {
            if linked.memoized_reaches(name) {
                evicted.insert(*id);
                false
            } else {
                true
            }
        });
        if !evicted.is_empty() {
            debug!(class = name, evicted = evicted.len(), "evicted linked classes");
        }
        evicted
    }

    pub fn len(&self) -> usize {
        self.linked.len()
    }

    pub fn is_empty(&self) -> bool {
        self.linked.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Field, MethodAccess};
    use crate::workspace::{Resource, Workspace};

    fn linker_for(workspace: &Arc<Workspace>) -> Linker {
        Linker::new(Arc::clone(workspace) as Arc<dyn ClassLookup>)
    }

    #[test]
    fn missing_super_class_is_retried() {
        let workspace = Arc::new(Workspace::new(Resource::new("app")));
        let child = workspace.put_class(Class::new("a/Child", Some("a/Parent".to_string())));
        let linker = linker_for(&workspace);
        let linked = linker.link(&child);

        assert!(linked.super_class(&linker).is_none());

        workspace.put_class(Class::new("a/Parent", None));

        let parent = linked.super_class(&linker).expect("parent linked");
        assert_eq!(parent.name(), "a/Parent");
        assert!(linked.depends_on("a/Parent", &linker));
        assert!(!linked.depends_on("a/Unrelated", &linker));
    }

    #[test]
    fn dependency_on_missing_ancestor_is_reported() {
        let workspace = Arc::new(Workspace::new(Resource::new("app")));
        let leaf = workspace.put_class(Class::new("a/Leaf", Some("a/Middle".to_string())));
        workspace.put_class(
            Class::new("a/Middle", None).with_interfaces(vec!["a/Gone".to_string()]),
        );
        let linker = linker_for(&workspace);
        let linked = linker.link(&leaf);

        assert!(linked.depends_on("a/Middle", &linker));
        assert!(linked.depends_on("a/Gone", &linker));

        workspace.remove_class("a/Middle");
        linker.evict("a/Middle");

        let linked = linker.link(&leaf);
        assert!(linked.depends_on("a/Middle", &linker));
        assert!(!linked.depends_on("a/Gone", &linker));
    }

    #[test]
    fn partial_interfaces_are_not_memoized() {
        let workspace = Arc::new(Workspace::new(Resource::new("app")));
        let class = workspace.put_class(
            Class::new("a/Impl", None)
                .with_interfaces(vec!["a/First".to_string(), "a/Second".to_string()]),
        );
        workspace.put_class(Class::new("a/First", None));
        let linker = linker_for(&workspace);
        let linked = linker.link(&class);

        assert_eq!(linked.interfaces(&linker).len(), 1);

        workspace.put_class(Class::new("a/Second", None));

        let names: Vec<String> = linked
            .interfaces(&linker)
            .iter()
            .map(|linked| linked.name().to_string())
            .collect();
        assert_eq!(names, vec!["a/First", "a/Second"]);
    }

    #[test]
    fn declared_members_are_found_by_exact_signature() {
        let workspace = Arc::new(Workspace::new(Resource::new("app")));
        let class = workspace.put_class(
            Class::new("a/A", None)
                .with_methods(vec![Method::new("run", "()V", MethodAccess::default())])
                .with_fields(vec![Field {
                    name: "count".to_string(),
                    descriptor: "I".to_string(),
                    is_static: false,
                }]),
        );
        let linker = linker_for(&workspace);
        let linked = linker.link(&class);

        assert!(linked.method("run", "()V").is_some());
        assert!(linked.method("run", "()I").is_none());
        assert!(linked.field("count", "I").is_some());
        assert!(linked.field("count", "J").is_none());
    }

    #[test]
    fn eviction_follows_memoized_hierarchy() {
        let workspace = Arc::new(Workspace::new(Resource::new("app")));
        let base = workspace.put_class(Class::new("a/Base", None));
        let child = workspace.put_class(Class::new("a/Child", Some("a/Base".to_string())));
        let other = workspace.put_class(Class::new("a/Other", None));
        let linker = linker_for(&workspace);
        linker.link(&child).super_class(&linker);
        linker.link(&other);

        let evicted = linker.evict("a/Base");

        assert_eq!(evicted, HashSet::from([base.id(), child.id()]));
        assert_eq!(linker.len(), 1);
    }
}
