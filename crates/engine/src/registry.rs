//! Tag handler registry.
//!
//! A [`TagRegistry`] is an explicitly constructed value injected into form
//! compilation — there is no ambient singleton. [`TagRegistry::standard`]
//! builds the stock handler set; sites needing custom tags construct a
//! registry, register their handlers, and compile against it.

use chartform_record::reference::ReferenceResolver;
use chartform_record::visit::Visit;

use crate::config::EngineConfig;
use crate::context::FormEntryContext;
use crate::definition::ElementNode;
use crate::error::DesignError;
use crate::handlers;
use crate::submission::SubmissionController;

/// Whether the dispatcher should recurse into a tag's children.
///
/// Substitution handlers emit complete output and return [`Descend::Skip`];
/// structural handlers push a nesting scope and return
/// [`Descend::Children`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Descend {
    Children,
    Skip,
}

/// Everything a handler touches while rendering one node.
pub struct RenderScope<'a> {
    pub ctx: &'a mut FormEntryContext,
    pub controller: &'a mut SubmissionController,
    pub out: &'a mut String,
    pub resolver: &'a dyn ReferenceResolver,
    pub config: &'a EngineConfig,
    pub visit: &'a Visit,
}

/// One tag's behavior: emit markup, register widgets, and contribute
/// submission actions.
pub trait TagHandler {
    /// Handles the start of the tag. A [`DesignError`] aborts rendering of
    /// the whole form instance.
    fn start(
        &self,
        element: &ElementNode,
        scope: &mut RenderScope<'_>,
    ) -> Result<Descend, DesignError>;

    /// Handles the end of the tag. Runs only if `start` returned
    /// [`Descend::Children`], after the children were processed.
    fn end(
        &self,
        _element: &ElementNode,
        _scope: &mut RenderScope<'_>,
    ) -> Result<(), DesignError> {
        Ok(())
    }
}

/// Index of a handler inside one registry, resolved at compile time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HandlerId(pub(crate) usize);

/// Maps tag names to handler implementations.
pub struct TagRegistry {
    entries: Vec<(String, Box<dyn TagHandler>)>,
}

impl TagRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// The stock handler set.
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register("visitDate", Box::new(handlers::VisitDateTagHandler));
        registry.register("obs", Box::new(handlers::ObsTagHandler));
        registry.register("group", Box::new(handlers::GroupTagHandler));
        registry.register("section", Box::new(handlers::SectionTagHandler));
        registry.register("repeat", Box::new(handlers::RepeatTagHandler));
        registry.register("drugOrder", Box::new(handlers::DrugOrderTagHandler));
        registry
    }

    /// Registers (or replaces) the handler for a tag name.
    pub fn register(&mut self, tag: &str, handler: Box<dyn TagHandler>) {
        if let Some(entry) = self.entries.iter_mut().find(|(name, _)| name == tag) {
            entry.1 = handler;
        } else {
            self.entries.push((tag.to_owned(), handler));
        }
    }

    /// Resolves a tag name; `None` means literal passthrough.
    pub fn resolve(&self, tag: &str) -> Option<HandlerId> {
        self.entries
            .iter()
            .position(|(name, _)| name == tag)
            .map(HandlerId)
    }

    pub(crate) fn handler(&self, id: HandlerId) -> &dyn TagHandler {
        self.entries[id.0].1.as_ref()
    }
}

impl Default for TagRegistry {
    fn default() -> Self {
        Self::standard()
    }
}
