//! JVM method resolution over a [`ClassLookup`].
//!
//! Follows the JVMS §5.4.3.3/§5.4.3.4 lookup order with one simplification:
//! the super-interface walk returns the first match in breadth-first
//! declaration order instead of selecting a maximally-specific method.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::error::ResolutionError;
use crate::graph::linked::{LinkedClass, Linker};
use crate::graph::lookup::ClassLookup;
use crate::graph::method_ref::MethodRef;
use crate::graph::multimap::MultiMap;
use crate::ir::{CallKind, Class, ClassId, Method, MethodKey};

const OBJECT: &str = "java/lang/Object";

/// Declaration an invocation links to.
#[derive(Clone, Debug)]
pub struct Resolution {
    owner: Arc<Class>,
    method: MethodKey,
    is_polymorphic_signature: bool,
}

impl Resolution {
    fn new(owner: &Arc<Class>, method: &Method) -> Self {
        Self {
            owner: Arc::clone(owner),
            method: method.key(),
            is_polymorphic_signature: false,
        }
    }

    /// Class declaring the resolved method.
    pub fn owner(&self) -> &Arc<Class> {
        &self.owner
    }

    pub fn key(&self) -> MethodKey {
        self.method
    }

    pub fn method(&self) -> &Method {
        &self.owner.methods[self.method.index as usize]
    }

    /// Always false: signature-polymorphic methods are linked like any other.
    pub fn is_polymorphic_signature(&self) -> bool {
        self.is_polymorphic_signature
    }
}

impl PartialEq for Resolution {
    fn eq(&self, other: &Self) -> bool {
        self.owner.id() == other.owner.id() && self.method == other.method
    }
}

impl Eq for Resolution {}

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
struct CacheKey {
    class: ClassId,
    kind: CallKind,
    name: String,
    descriptor: String,
}

/// Resolves invocations to declarations, caching successful lookups.
pub struct Resolver {
    linker: Linker,
    cache: DashMap<CacheKey, Resolution>,
    unresolved_declarations: Arc<MultiMap<String, MethodRef>>,
}

impl Resolver {
    pub fn new(
        lookup: Arc<dyn ClassLookup>,
        unresolved_declarations: Arc<MultiMap<String, MethodRef>>,
    ) -> Self {
        Self {
            linker: Linker::new(lookup),
            cache: DashMap::new(),
            unresolved_declarations,
        }
    }

    pub fn linker(&self) -> &Linker {
        &self.linker
    }

    /// Resolve an invocation of `owner.name descriptor`.
    ///
    /// An owner that cannot be found is recorded as an unresolved declaration.
    pub fn resolve(
        &self,
        kind: CallKind,
        owner: &str,
        name: &str,
        descriptor: &str,
        is_interface: bool,
    ) -> Result<Resolution, ResolutionError> {
        let Some(class) = self.linker.lookup().find(owner) else {
            debug!(owner, name, descriptor, "owner of invoked method not found");
            self.unresolved_declarations
                .put(owner.to_string(), MethodRef::new(owner, name, descriptor));
            return Err(ResolutionError::NoSuchMethod);
        };
        let key = CacheKey {
            class: class.id(),
            kind,
            name: name.to_string(),
            descriptor: descriptor.to_string(),
        };
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached.value().clone());
        }

        let linked = self.linker.link(&class);
        let resolution = match kind {
            CallKind::Special => linked
                .method(name, descriptor)
                .map(|method| Resolution::new(linked.class(), method)),
            CallKind::Static => {
                self.walk_classes(&linked, name, descriptor, |method| method.access.is_static)
            }
            CallKind::Virtual => self
                .walk_classes(&linked, name, descriptor, |method| !method.access.is_static)
                .or_else(|| self.walk_interfaces(&linked, name, descriptor)),
            CallKind::Interface => self.resolve_interface(&linked, name, descriptor),
        };
        match resolution {
            Some(resolution) => {
                self.cache.insert(key, resolution.clone());
                Ok(resolution)
            }
            None => {
                debug!(owner, name, descriptor, ?kind, is_interface, "no such method");
                Err(ResolutionError::NoSuchMethod)
            }
        }
    }

    /// Forget everything derived from classes named `name`, including the
    /// hierarchies and resolutions that pass through them.
    pub fn evict(&self, name: &str) {
        let evicted = self.linker.evict(name);
        self.cache.retain(|key, resolution| {
            !evicted.contains(&key.class)
                && !evicted.contains(&resolution.owner.id())
                && resolution.owner.name != name
        });
    }

    pub fn cached_resolutions(&self) -> usize {
        self.cache.len()
    }

    /// Owner, then super-classes; interfaces are not searched.
    fn walk_classes(
        &self,
        start: &Arc<LinkedClass>,
        name: &str,
        descriptor: &str,
        accept: impl Fn(&Method) -> bool,
    ) -> Option<Resolution> {
        let mut seen = HashSet::new();
        let mut current = Some(Arc::clone(start));
        while let Some(linked) = current {
            if !seen.insert(linked.class().id()) {
                break;
            }
            if let Some(method) = linked
                .method(name, descriptor)
                .filter(|method| accept(method))
            {
                return Some(Resolution::new(linked.class(), method));
            }
            current = linked.super_class(&self.linker);
        }
        None
    }

    /// Breadth-first over the super-interfaces of `start` and of each of its
    /// super-classes, skipping static and private methods.
    fn walk_interfaces(
        &self,
        start: &Arc<LinkedClass>,
        name: &str,
        descriptor: &str,
    ) -> Option<Resolution> {
        let mut seen = HashSet::new();
        let mut queue = VecDeque::new();
        let mut current = Some(Arc::clone(start));
        while let Some(linked) = current {
            if !seen.insert(linked.class().id()) {
                break;
            }
            queue.extend(linked.interfaces(&self.linker));
            current = linked.super_class(&self.linker);
        }

        let mut visited = HashSet::new();
        while let Some(interface) = queue.pop_front() {
            if !visited.insert(interface.class().id()) {
                continue;
            }
            if let Some(method) = interface
                .method(name, descriptor)
                .filter(|method| !method.access.is_static && !method.access.is_private)
            {
                return Some(Resolution::new(interface.class(), method));
            }
            queue.extend(interface.interfaces(&self.linker));
        }
        None
    }

    fn resolve_interface(
        &self,
        start: &Arc<LinkedClass>,
        name: &str,
        descriptor: &str,
    ) -> Option<Resolution> {
        let declared = if start.class().is_interface() {
            start
                .method(name, descriptor)
                .filter(|method| !method.access.is_static)
                .map(|method| Resolution::new(start.class(), method))
                .or_else(|| {
                    let object = self.linker.find(OBJECT)?;
                    object
                        .method(name, descriptor)
                        .filter(|method| method.access.is_public && !method.access.is_static)
                        .map(|method| Resolution::new(object.class(), method))
                })
        } else {
            self.walk_classes(start, name, descriptor, |method| !method.access.is_static)
        };
        declared.or_else(|| self.walk_interfaces(start, name, descriptor))
    }
}
