//! Incremental method-level call graph.
//!
//! Vertices are keyed by the exact declaration ([`MethodKey`]) a call site
//! links to under JVM resolution rules. Call sites whose target cannot be
//! resolved yet are parked in two indices keyed by the call-site owner and
//! replayed once a class that could satisfy them is visited. Calling methods
//! that did link are indexed by owner as well, so they are relinked when a
//! class joining or leaving the owner's hierarchy changes what resolves first.

pub mod container;
pub mod context;
mod invocation;
pub mod linked;
pub mod lookup;
pub mod method_ref;
pub mod multimap;
pub mod resolver;
pub mod vertex;

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::Instant;

use dashmap::DashMap;
use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

pub use container::ClassMethodsContainer;
pub use context::CallingContext;
pub use lookup::ClassLookup;
pub use method_ref::MethodRef;
pub use multimap::MultiMap;
pub use resolver::{Resolution, Resolver};
pub use vertex::MethodVertex;

use crate::config::CallGraphConfig;
use crate::error::{GraphError, ResolutionError};
use crate::ir::{CallKind, CallSite, Class, ClassId, Method, MethodKey};
use crate::workspace::{Workspace, WorkspaceEvent, WorkspaceListener};

/// Progress of the initial background scan.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScanState {
    Uninitialized,
    Scanning,
    Ready,
    Failed,
}

/// Size of the graph and its pending indices.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct GraphStats {
    pub classes: usize,
    pub vertices: usize,
    pub edges: usize,
    pub unresolved_declarations: usize,
    pub unresolved_references: usize,
}

/// Call graph of one [`Workspace`], kept up to date through workspace events.
pub struct CallGraph {
    workspace: Arc<Workspace>,
    config: CallGraphConfig,
    resolver: Resolver,
    containers: DashMap<ClassId, Arc<ClassMethodsContainer>>,
    unresolved_declarations: Arc<MultiMap<String, MethodRef>>,
    unresolved_references: MultiMap<String, CallingContext>,
    resolved_references: MultiMap<String, CallingContext>,
    updates: Mutex<()>,
    initialized: AtomicBool,
    state: Mutex<ScanState>,
    state_changed: Condvar,
}

impl CallGraph {
    pub fn new(workspace: Arc<Workspace>, config: CallGraphConfig) -> Arc<Self> {
        let unresolved_declarations = Arc::new(MultiMap::default());
        let resolver = Resolver::new(
            Arc::clone(&workspace) as Arc<dyn ClassLookup>,
            Arc::clone(&unresolved_declarations),
        );
        Arc::new(Self {
            workspace,
            config,
            resolver,
            containers: DashMap::new(),
            unresolved_declarations,
            unresolved_references: MultiMap::default(),
            resolved_references: MultiMap::default(),
            updates: Mutex::new(()),
            initialized: AtomicBool::new(false),
            state: Mutex::new(ScanState::Uninitialized),
            state_changed: Condvar::new(),
        })
    }

    /// Subscribe to workspace changes and start the background scan.
    ///
    /// Only the first call has an effect. Does nothing when the graph is
    /// configured inactive.
    pub fn initialize(self: &Arc<Self>) -> Result<(), GraphError> {
        if !self.config.active {
            debug!("call graph inactive, skipping initialization");
            return Ok(());
        }
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let listener = Arc::clone(self) as Arc<dyn WorkspaceListener>;
        self.workspace.add_listener(Arc::downgrade(&listener));
        self.set_state(ScanState::Scanning);

        let graph = Arc::clone(self);
        let spawned = thread::Builder::new()
            .name("call-graph".to_string())
            .spawn(move || graph.run_scan());
        if let Err(err) = spawned {
            self.set_state(ScanState::Failed);
            return Err(GraphError::ScanThread(err));
        }
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    pub fn is_ready(&self) -> bool {
        self.scan_state() == ScanState::Ready
    }

    pub fn scan_state(&self) -> ScanState {
        *self.state.lock()
    }

    /// Block until the initial scan has finished, returning its outcome.
    pub fn wait_for_scan(&self) -> ScanState {
        let mut state = self.state.lock();
        while *state == ScanState::Scanning {
            self.state_changed.wait(&mut state);
        }
        *state
    }

    pub fn workspace(&self) -> &Arc<Workspace> {
        &self.workspace
    }

    pub fn resolve(
        &self,
        kind: CallKind,
        owner: &str,
        name: &str,
        descriptor: &str,
        is_interface: bool,
    ) -> Result<Resolution, ResolutionError> {
        self.resolver.resolve(kind, owner, name, descriptor, is_interface)
    }

    /// Container for `class`, created on first access.
    pub fn class_methods_container(&self, class: &Arc<Class>) -> Arc<ClassMethodsContainer> {
        Arc::clone(
            self.containers
                .entry(class.id())
                .or_insert_with(|| Arc::new(ClassMethodsContainer::new(Arc::clone(class))))
                .value(),
        )
    }

    pub fn container(&self, class: ClassId) -> Option<Arc<ClassMethodsContainer>> {
        self.containers
            .get(&class)
            .map(|container| Arc::clone(container.value()))
    }

    /// Every container, ordered by class name.
    pub fn containers(&self) -> Vec<Arc<ClassMethodsContainer>> {
        let mut containers: Vec<Arc<ClassMethodsContainer>> = self
            .containers
            .iter()
            .map(|container| Arc::clone(container.value()))
            .collect();
        containers.sort_by(|a, b| {
            a.class()
                .name
                .cmp(&b.class().name)
                .then(a.class().id().cmp(&b.class().id()))
        });
        containers
    }

    pub fn vertex(
        &self,
        class: &Arc<Class>,
        method: &Method,
    ) -> Result<Arc<MethodVertex>, GraphError> {
        self.class_methods_container(class).vertex(method)
    }

    pub fn vertex_by_key(&self, key: MethodKey) -> Option<Arc<MethodVertex>> {
        self.container(key.class)?.vertex_at(key)
    }

    /// Vertex of the declaration the workspace currently exposes for `reference`.
    pub fn find_vertex(&self, reference: &MethodRef) -> Option<Arc<MethodVertex>> {
        let class = self.workspace.find(&reference.owner)?;
        let method = class.method(&reference.name, &reference.descriptor)?;
        self.vertex_by_key(method.key())
    }

    pub fn callers_of(&self, key: MethodKey) -> Vec<MethodRef> {
        self.neighbours(key, MethodVertex::callers)
    }

    pub fn calls_of(&self, key: MethodKey) -> Vec<MethodRef> {
        self.neighbours(key, MethodVertex::calls)
    }

    fn neighbours(
        &self,
        key: MethodKey,
        edges: fn(&MethodVertex) -> Vec<MethodKey>,
    ) -> Vec<MethodRef> {
        let Some(vertex) = self.vertex_by_key(key) else {
            return Vec::new();
        };
        let mut methods: Vec<MethodRef> = edges(&vertex)
            .into_iter()
            .filter_map(|key| self.vertex_by_key(key))
            .map(|vertex| vertex.method().clone())
            .collect();
        methods.sort();
        methods
    }

    /// Call targets that could not be resolved, keyed by call-site owner.
    pub fn unresolved_declarations(&self) -> BTreeMap<String, BTreeSet<MethodRef>> {
        self.unresolved_declarations.snapshot()
    }

    /// Calling methods waiting on an owner, keyed by call-site owner.
    pub fn unresolved_references(&self) -> BTreeMap<String, BTreeSet<CallingContext>> {
        self.unresolved_references.snapshot()
    }

    pub fn stats(&self) -> GraphStats {
        let mut stats = GraphStats {
            unresolved_declarations: self.unresolved_declarations.len(),
            unresolved_references: self.unresolved_references.len(),
            ..GraphStats::default()
        };
        for container in self.containers() {
            stats.classes += 1;
            for vertex in container.vertices() {
                stats.vertices += 1;
                stats.edges += vertex.calls().len();
            }
        }
        stats
    }

    fn set_state(&self, state: ScanState) {
        *self.state.lock() = state;
        self.state_changed.notify_all();
    }

    fn run_scan(&self) {
        let started_at = Instant::now();
        info!(classes = self.workspace.class_count(), "call graph scan started");
        match panic::catch_unwind(AssertUnwindSafe(|| self.scan())) {
            Ok(Ok(())) => {
                let stats = self.stats();
                info!(
                    elapsed_ms = started_at.elapsed().as_millis() as u64,
                    classes = stats.classes,
                    vertices = stats.vertices,
                    edges = stats.edges,
                    unresolved = stats.unresolved_declarations,
                    "call graph scan finished"
                );
                self.set_state(ScanState::Ready);
            }
            Ok(Err(err)) => {
                error!(error = %err, "call graph scan failed");
                self.set_state(ScanState::Failed);
            }
            Err(_) => {
                error!("call graph scan panicked");
                self.set_state(ScanState::Failed);
            }
        }
    }

    /// Visit every class of the workspace. Each visit holds the update lock,
    /// so workspace events interleave with the scan class by class.
    fn scan(&self) -> Result<(), GraphError> {
        for resource in self.workspace.all_resources() {
            for class in resource.all_classes() {
                let _update = self.updates.lock();
                if !self.workspace.contains(&class) {
                    debug!(class = %class.name, "skipping class removed before scan");
                    continue;
                }
                self.visit(&class)?;
            }
        }
        Ok(())
    }

    fn visit(&self, class: &Arc<Class>) -> Result<(), GraphError> {
        let container = self.class_methods_container(class);
        for method in &class.methods {
            let declared = MethodRef::new(&class.name, &method.name, &method.descriptor);
            self.unresolved_declarations.remove(&class.name, &declared);
        }
        for method in &class.methods {
            let vertex = container.vertex(method)?;
            self.scan_method(class, method, &vertex)?;
            self.link_resolved_calls(class, method)?;
        }
        self.replay_dependents(class)
    }

    /// Relink every call site of `method` from scratch and file its calling
    /// context under each owner as resolved or pending.
    fn scan_method(
        &self,
        class: &Class,
        method: &Method,
        vertex: &MethodVertex,
    ) -> Result<(), GraphError> {
        vertex.unlink_calls(|key| self.vertex_by_key(key));
        let sites = invocation::call_sites(method, self.config.unwrap_lambdas);
        let mut outcomes: HashMap<&str, (&CallSite, bool)> = HashMap::new();
        for site in &sites {
            let linked = self.on_method_called(vertex, site)?;
            let outcome = outcomes.entry(site.owner.as_str()).or_insert((site, linked));
            if !linked && outcome.1 {
                *outcome = (site, false);
            }
        }

        for (owner, (site, linked)) in outcomes {
            let owner = owner.to_string();
            let context = CallingContext {
                class: class.name.clone(),
                caller: method.key(),
                method: vertex.method().clone(),
                kind: site.kind,
                is_interface: site.is_interface,
            };
            if linked {
                self.unresolved_references.remove(&owner, &context);
                self.resolved_references.put(owner, context);
            } else {
                self.resolved_references.remove(&owner, &context);
                self.unresolved_references.put(owner, context);
            }
        }
        Ok(())
    }

    /// Resolve one call site and record the outcome. Returns whether an edge
    /// was added.
    fn on_method_called(&self, caller: &MethodVertex, site: &CallSite) -> Result<bool, GraphError> {
        let reference = MethodRef::of_site(site);
        let resolution = self
            .resolver
            .resolve(site.kind, &site.owner, &site.name, &site.descriptor, site.is_interface)
            .ok()
            .filter(|resolution| self.workspace.contains(resolution.owner()));
        match resolution {
            Some(resolution) => {
                let callee = self
                    .class_methods_container(resolution.owner())
                    .vertex(resolution.method())?;
                caller.link(&callee);
                self.unresolved_declarations.remove(&site.owner, &reference);
                Ok(true)
            }
            None => {
                debug!(caller = %caller.method(), callee = %reference, "call target unresolved");
                self.unresolved_declarations.put(site.owner.clone(), reference);
                Ok(false)
            }
        }
    }

    /// Retry pending callers of `class` that call `method` by name.
    fn link_resolved_calls(&self, class: &Class, method: &Method) -> Result<(), GraphError> {
        for context in self.unresolved_references.get(&class.name) {
            let Some(container) = self.container(context.caller.class) else {
                continue;
            };
            let Some(caller) = container.class().method_by_key(context.caller) else {
                continue;
            };
            let targets_method = invocation::call_sites(caller, self.config.unwrap_lambdas)
                .iter()
                .any(|site| {
                    site.owner == class.name
                        && site.name == method.name
                        && site.descriptor == method.descriptor
                });
            if targets_method {
                self.relink(context.caller)?;
            }
        }
        Ok(())
    }

    /// Retry pending callers of every owner whose hierarchy names `class`.
    fn replay_dependents(&self, class: &Class) -> Result<(), GraphError> {
        let pending = self.dependents(&class.name, &self.unresolved_references);
        if !pending.is_empty() {
            debug!(class = %class.name, pending = pending.len(), "replaying pending calls");
        }
        pending.into_iter().try_for_each(|caller| self.relink(caller))
    }

    /// Calling methods filed in `index` under an owner whose hierarchy names
    /// `name`.
    fn dependents(
        &self,
        name: &str,
        index: &MultiMap<String, CallingContext>,
    ) -> BTreeSet<MethodKey> {
        let linker = self.resolver.linker();
        let mut callers = BTreeSet::new();
        for owner in index.keys() {
            let depends = owner == name
                || linker
                    .find(&owner)
                    .is_some_and(|linked| linked.depends_on(name, linker));
            if depends {
                callers.extend(index.get(&owner).into_iter().map(|context| context.caller));
            }
        }
        callers
    }

    fn relink(&self, caller: MethodKey) -> Result<(), GraphError> {
        let Some(container) = self.container(caller.class) else {
            return Ok(());
        };
        let class = container.class();
        let Some(method) = class.method_by_key(caller) else {
            return Ok(());
        };
        let vertex = container.vertex(method)?;
        self.scan_method(class, method, &vertex)
    }

    /// Visit a class that joined the workspace, then relink callers that
    /// resolved through an owner whose hierarchy names it.
    fn add(&self, class: &Arc<Class>) -> Result<(), GraphError> {
        self.resolver.evict(&class.name);
        self.visit(class)?;
        let resolved = self.dependents(&class.name, &self.resolved_references);
        if !resolved.is_empty() {
            debug!(class = %class.name, callers = resolved.len(), "relinking resolved calls");
        }
        resolved.into_iter().try_for_each(|caller| self.relink(caller))
    }

    fn remove(&self, class: &Arc<Class>) -> Result<(), GraphError> {
        self.resolver.evict(&class.name);
        let still_named = self.workspace.find(&class.name).is_some();
        let mut callers = BTreeSet::new();
        if let Some((_, container)) = self.containers.remove(&class.id()) {
            for vertex in container.vertices() {
                callers.extend(vertex.prune(|key| self.vertex_by_key(key)));
                if !still_named {
                    self.unresolved_declarations
                        .put(class.name.clone(), vertex.method().clone());
                }
            }
        }
        self.unresolved_references
            .retain(|_, context| context.caller.class != class.id());
        self.resolved_references
            .retain(|_, context| context.caller.class != class.id());
        callers.extend(self.dependents(&class.name, &self.resolved_references));
        callers.extend(self.dependents(&class.name, &self.unresolved_references));
        callers.retain(|caller| caller.class != class.id());
        debug!(class = %class.name, callers = callers.len(), "removed class from call graph");

        callers.into_iter().try_for_each(|caller| self.relink(caller))
    }

    fn apply(&self, event: &WorkspaceEvent) -> Result<(), GraphError> {
        let _update = self.updates.lock();
        match event {
            WorkspaceEvent::NewClass { class, .. } => self.add(class),
            WorkspaceEvent::RemoveClass { class, .. } => self.remove(class),
            WorkspaceEvent::UpdateClass { old, new, .. } => {
                self.remove(old)?;
                self.add(new)
            }
            WorkspaceEvent::AddLibrary(resource) => resource
                .all_classes()
                .iter()
                .try_for_each(|class| self.add(class)),
            WorkspaceEvent::RemoveLibrary(resource) => resource
                .all_classes()
                .iter()
                .try_for_each(|class| self.remove(class)),
        }
    }
}

impl WorkspaceListener for CallGraph {
    fn on_event(&self, event: &WorkspaceEvent) {
        if let Err(err) = self.apply(event) {
            warn!(error = %err, "failed to apply workspace change to call graph");
        }
    }
}
