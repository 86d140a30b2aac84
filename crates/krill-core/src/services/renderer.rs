//! Renderers: a compiled template bound to a formatter and, optionally, a node.

use super::codec::Payload;
use super::template::{RenderContext, Template};
use super::{withdraw, EntityService, Formatter, Node, Scope};
use crate::error::{BuildError, RenderError};
use crate::registry::Entity;
use crate::store::Stores;
use krill_types::{EntityKind, RendererSpec};
use serde_json::Value;
use std::sync::Arc;

#[derive(Debug)]
pub struct Renderer {
    name: String,
    formatter: Arc<Formatter>,
    node: Option<Arc<Node>>,
    template: Template,
}

impl Renderer {
    #[must_use]
    pub fn formatter(&self) -> &Arc<Formatter> {
        &self.formatter
    }

    #[must_use]
    pub fn node(&self) -> Option<&Arc<Node>> {
        self.node.as_ref()
    }

    /// Whether a publisher has to supply the node.
    #[must_use]
    pub fn needs_node(&self) -> bool {
        self.node.is_none() && self.template.needs_node()
    }

    /// Render the template. A node in `ctx` wins over the renderer's own.
    pub fn render(&self, ctx: &RenderContext<'_>) -> Result<Payload, RenderError> {
        let ctx = RenderContext {
            node: ctx.node.or(self.node.as_deref()),
            ..*ctx
        };
        self.template.render(&ctx)
    }
}

impl Entity for Renderer {
    const KIND: EntityKind = EntityKind::Renderer;

    fn name(&self) -> &str {
        &self.name
    }
}

pub struct RendererService {
    stores: Arc<Stores>,
}

impl RendererService {
    pub fn new(stores: Arc<Stores>) -> Self {
        Self { stores }
    }
}

impl EntityService for RendererService {
    type Spec = RendererSpec;
    type Entity = Renderer;

    fn create(&self, spec: &RendererSpec) -> Result<Arc<Renderer>, BuildError> {
        let scope = Scope::open(&self.stores, spec)?;
        let formatter = scope.resolve::<Formatter>("formatter", &spec.formatter)?;
        let node = scope.resolve_opt::<Node>("node", spec.node.as_deref())?;

        let source = Value::Object(spec.template.clone().into_iter().collect());
        let template = Template::compile(&source).map_err(|e| scope.invalid(e.to_string()))?;

        scope.admit(
            &self.stores.renderers,
            Arc::new(Renderer {
                name: spec.name.clone(),
                formatter,
                node,
                template,
            }),
        )
    }

    fn remove(&self, name: &str) {
        withdraw(&self.stores, &self.stores.renderers, name);
    }
}
