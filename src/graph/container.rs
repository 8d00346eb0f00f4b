use std::sync::Arc;

use dashmap::DashMap;

use crate::error::GraphError;
use crate::graph::method_ref::MethodRef;
use crate::graph::vertex::MethodVertex;
use crate::ir::{Class, Method, MethodKey};

/// Vertices of the methods declared by one class, created on first access.
#[derive(Debug)]
pub struct ClassMethodsContainer {
    class: Arc<Class>,
    vertices: DashMap<MethodKey, Arc<MethodVertex>>,
}

impl ClassMethodsContainer {
    pub(crate) fn new(class: Arc<Class>) -> Self {
        Self {
            class,
            vertices: DashMap::new(),
        }
    }

    pub fn class(&self) -> &Arc<Class> {
        &self.class
    }

    /// Vertex for a method declared by this container's class.
    pub fn vertex(&self, method: &Method) -> Result<Arc<MethodVertex>, GraphError> {
        let key = method.key();
        if key.class != self.class.id() || self.class.method_by_key(key).is_none() {
            return Err(GraphError::ForeignMember {
                class: self.class.name.clone(),
                member: format!("{}{}", method.name, method.descriptor),
            });
        }
        let vertex = self.vertices.entry(key).or_insert_with(|| {
            let reference = MethodRef::new(&self.class.name, &method.name, &method.descriptor);
            Arc::new(MethodVertex::new(reference, key))
        });
        Ok(Arc::clone(vertex.value()))
    }

    pub fn vertex_by_signature(&self, name: &str, descriptor: &str) -> Option<Arc<MethodVertex>> {
        let method = self.class.method(name, descriptor)?;
        self.vertex(method).ok()
    }

    /// Existing vertex for `key`; never creates one.
    pub fn vertex_at(&self, key: MethodKey) -> Option<Arc<MethodVertex>> {
        self.vertices.get(&key).map(|vertex| Arc::clone(vertex.value()))
    }

    /// Vertices created so far, in declaration order.
    pub fn vertices(&self) -> Vec<Arc<MethodVertex>> {
        let mut vertices: Vec<Arc<MethodVertex>> = self
            .vertices
            .iter()
            .map(|vertex| Arc::clone(vertex.value()))
            .collect();
        vertices.sort_by_key(|vertex| vertex.declaration());
        vertices
    }
}
