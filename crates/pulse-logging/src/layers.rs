//! Custom tracing layers
//!
//! [`UserContextLayer`] tags every new span with the active
//! [`UserContextGuard`] so downstream layers can tell whose work a span
//! belongs to.

use tracing::{Subscriber, span};
use tracing_subscriber::{
    layer::{Context, Layer},
    registry::LookupSpan,
};

use crate::context::{UserContextData, UserContextGuard};

/// Layer that attaches the current user context to spans
#[derive(Debug, Clone, Copy, Default)]
pub struct UserContextLayer;

impl UserContextLayer {
    pub fn new() -> Self {
        Self
    }
}

/// Extension data stored on spans
#[derive(Debug, Clone)]
pub struct UserContextExtension {
    pub data: UserContextData,
}

impl<S> Layer<S> for UserContextLayer
where
    S: Subscriber + for<'lookup> LookupSpan<'lookup>,
{
    fn on_new_span(&self, _attrs: &span::Attributes<'_>, id: &span::Id, ctx: Context<'_, S>) {
        let Some(span) = ctx.span(id) else {
            return;
        };

        // Explicit context wins; otherwise inherit from the parent span
        let data = UserContextGuard::current().or_else(|| {
            span.parent().and_then(|parent| {
                parent
                    .extensions()
                    .get::<UserContextExtension>()
                    .map(|ext| ext.data.clone())
            })
        });
        if let Some(data) = data {
            span.extensions_mut().insert(UserContextExtension { data });
        }
    }
}
