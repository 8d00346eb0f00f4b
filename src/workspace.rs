//! Loaded classes grouped into resources, plus change notifications.
//!
//! A workspace has one primary resource (the analysis input) and any number
//! of library resources (the classpath). Each resource holds a main class
//! bundle and optional multi-release bundles keyed by Java version.

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::debug;

use crate::ir::Class;

/// Classes of one bundle, keyed by internal name.
#[derive(Debug, Default)]
pub struct ClassBundle {
    classes: DashMap<String, Arc<Class>>,
}

impl ClassBundle {
    pub fn get(&self, name: &str) -> Option<Arc<Class>> {
        self.classes.get(name).map(|entry| Arc::clone(entry.value()))
    }

    /// Insert a class, returning the one it replaced.
    pub fn insert(&self, class: Arc<Class>) -> Option<Arc<Class>> {
        self.classes.insert(class.name.clone(), class)
    }

    pub fn remove(&self, name: &str) -> Option<Arc<Class>> {
        self.classes.remove(name).map(|(_, class)| class)
    }

    /// Snapshot of the bundle, ordered by class name.
    pub fn classes(&self) -> Vec<Arc<Class>> {
        let mut classes: Vec<Arc<Class>> = self
            .classes
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        classes.sort_by(|a, b| a.name.cmp(&b.name));
        classes
    }

    pub fn contains(&self, class: &Class) -> bool {
        self.classes
            .get(&class.name)
            .is_some_and(|entry| entry.value().id() == class.id())
    }

    pub fn len(&self) -> usize {
        self.classes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.classes.is_empty()
    }
}

/// A named source of classes such as an input jar or a classpath directory.
#[derive(Debug)]
pub struct Resource {
    name: String,
    bundle: ClassBundle,
    versioned: RwLock<BTreeMap<u16, Arc<ClassBundle>>>,
}

impl Resource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            bundle: ClassBundle::default(),
            versioned: RwLock::new(BTreeMap::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bundle(&self) -> &ClassBundle {
        &self.bundle
    }

    /// Add a class while the resource is being assembled. No events fire.
    pub fn insert_class(&self, class: Class) -> Arc<Class> {
        let class = Arc::new(class);
        self.bundle.insert(Arc::clone(&class));
        class
    }

    /// Add a multi-release class while the resource is being assembled.
    pub fn insert_versioned_class(&self, version: u16, class: Class) -> Arc<Class> {
        let class = Arc::new(class);
        self.versioned_bundle_or_create(version)
            .insert(Arc::clone(&class));
        class
    }

    pub fn versioned_bundle(&self, version: u16) -> Option<Arc<ClassBundle>> {
        self.versioned.read().get(&version).cloned()
    }

    pub fn versioned_bundles(&self) -> Vec<(u16, Arc<ClassBundle>)> {
        self.versioned
            .read()
            .iter()
            .map(|(version, bundle)| (*version, Arc::clone(bundle)))
            .collect()
    }

    /// The bundle for the highest Java version, if any.
    pub fn latest_versioned_bundle(&self) -> Option<Arc<ClassBundle>> {
        self.versioned
            .read()
            .last_key_value()
            .map(|(_, bundle)| Arc::clone(bundle))
    }

    fn versioned_bundle_or_create(&self, version: u16) -> Arc<ClassBundle> {
        Arc::clone(self.versioned.write().entry(version).or_default())
    }

    /// Every class of the main bundle followed by every versioned class.
    pub fn all_classes(&self) -> Vec<Arc<Class>> {
        let mut classes = self.bundle.classes();
        for (_, bundle) in self.versioned_bundles() {
            classes.extend(bundle.classes());
        }
        classes
    }

    /// Whether this exact class declaration is still held by the resource.
    pub fn contains(&self, class: &Class) -> bool {
        self.bundle.contains(class)
            || self
                .versioned
                .read()
                .values()
                .any(|bundle| bundle.contains(class))
    }

    pub fn class_count(&self) -> usize {
        self.bundle.len()
            + self
                .versioned
                .read()
                .values()
                .map(|bundle| bundle.len())
                .sum::<usize>()
    }
}

/// Change notification emitted by a [`Workspace`].
#[derive(Clone, Debug)]
pub enum WorkspaceEvent {
    NewClass {
        resource: Arc<Resource>,
        class: Arc<Class>,
    },
    RemoveClass {
        resource: Arc<Resource>,
        class: Arc<Class>,
    },
    UpdateClass {
        resource: Arc<Resource>,
        old: Arc<Class>,
        new: Arc<Class>,
    },
    AddLibrary(Arc<Resource>),
    RemoveLibrary(Arc<Resource>),
}

/// Receiver of workspace change notifications.
///
/// Events are delivered synchronously on the thread that mutated the
/// workspace, after the mutation is visible to lookups.
pub trait WorkspaceListener: Send + Sync {
    fn on_event(&self, event: &WorkspaceEvent);
}

/// The set of resources being analysed.
pub struct Workspace {
    primary: Arc<Resource>,
    libraries: RwLock<Vec<Arc<Resource>>>,
    listeners: RwLock<Vec<Weak<dyn WorkspaceListener>>>,
}

impl Workspace {
    pub fn new(primary: Resource) -> Self {
        Self {
            primary: Arc::new(primary),
            libraries: RwLock::new(Vec::new()),
            listeners: RwLock::new(Vec::new()),
        }
    }

    pub fn primary(&self) -> &Arc<Resource> {
        &self.primary
    }

    pub fn libraries(&self) -> Vec<Arc<Resource>> {
        self.libraries.read().clone()
    }

    /// The primary resource followed by libraries in the order they were added.
    pub fn all_resources(&self) -> Vec<Arc<Resource>> {
        let mut resources = vec![Arc::clone(&self.primary)];
        resources.extend(self.libraries());
        resources
    }

    /// Register a listener. The workspace holds it weakly; dropped listeners
    /// are discarded on the next notification.
    pub fn add_listener(&self, listener: Weak<dyn WorkspaceListener>) {
        self.listeners.write().push(listener);
    }

    pub fn add_library(&self, library: Resource) -> Arc<Resource> {
        let library = Arc::new(library);
        self.libraries.write().push(Arc::clone(&library));
        self.notify(&WorkspaceEvent::AddLibrary(Arc::clone(&library)));
        library
    }

    pub fn remove_library(&self, name: &str) -> Option<Arc<Resource>> {
        let removed = {
            let mut libraries = self.libraries.write();
            let position = libraries.iter().position(|library| library.name() == name)?;
            libraries.remove(position)
        };
        self.notify(&WorkspaceEvent::RemoveLibrary(Arc::clone(&removed)));
        Some(removed)
    }

    /// Put a class into the primary resource, replacing any class of the same name.
    pub fn put_class(&self, class: Class) -> Arc<Class> {
        let class = Arc::new(class);
        let previous = self.primary.bundle().insert(Arc::clone(&class));
        self.notify_put(previous, &class);
        class
    }

    /// Put a class into a versioned bundle of the primary resource.
    pub fn put_versioned_class(&self, version: u16, class: Class) -> Arc<Class> {
        let class = Arc::new(class);
        let previous = self
            .primary
            .versioned_bundle_or_create(version)
            .insert(Arc::clone(&class));
        self.notify_put(previous, &class);
        class
    }

    pub fn remove_class(&self, name: &str) -> Option<Arc<Class>> {
        let removed = self.primary.bundle().remove(name)?;
        self.notify(&WorkspaceEvent::RemoveClass {
            resource: Arc::clone(&self.primary),
            class: Arc::clone(&removed),
        });
        Some(removed)
    }

    /// Whether this exact class declaration is still part of the workspace.
    pub fn contains(&self, class: &Class) -> bool {
        self.all_resources()
            .iter()
            .any(|resource| resource.contains(class))
    }

    pub fn class_count(&self) -> usize {
        self.all_resources()
            .iter()
            .map(|resource| resource.class_count())
            .sum()
    }

    fn notify_put(&self, previous: Option<Arc<Class>>, class: &Arc<Class>) {
        let event = match previous {
            Some(old) => WorkspaceEvent::UpdateClass {
                resource: Arc::clone(&self.primary),
                old,
                new: Arc::clone(class),
            },
            None => WorkspaceEvent::NewClass {
                resource: Arc::clone(&self.primary),
                class: Arc::clone(class),
            },
        };
        self.notify(&event);
    }

    fn notify(&self, event: &WorkspaceEvent) {
        let listeners: Vec<Arc<dyn WorkspaceListener>> = {
            let mut listeners = self.listeners.write();
            listeners.retain(|listener| listener.strong_count() > 0);
            listeners.iter().filter_map(Weak::upgrade).collect()
        };
        debug!(listeners = listeners.len(), ?event, "workspace changed");
        for listener in listeners {
            listener.on_event(event);
        }
    }
}
