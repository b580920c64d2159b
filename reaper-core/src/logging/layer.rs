use std::collections::HashMap;
use std::fmt::Debug;

use tracing::field::Visit;
use tracing::{Event, Level, Subscriber};
use tracing_core::Field;
use tracing_subscriber::layer::Context;
use tracing_subscriber::registry::LookupSpan;

pub type RecordValues = HashMap<&'static str, String>;

struct RecordVisitor<'a> {
    values: &'a mut RecordValues,
}

impl Visit for RecordVisitor<'_> {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.values.insert(field.name(), value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn Debug) {
        self.values.insert(field.name(), format!("{:?}", value));
    }
}

#[derive(Clone)]
struct SpanValues(RecordValues);

/// Collects the record values of every INFO-and-above event emitted from
/// this workspace's crates and hands them to a callback, merging in values
/// recorded on enclosing spans.
pub struct ValuesLogLayer<C>
where
    C: Fn(RecordValues),
{
    callback: C,
}

impl<C> ValuesLogLayer<C>
where
    C: Fn(RecordValues),
{
    pub fn new(callback: C) -> Self {
        Self { callback }
    }
}

impl<C, S> tracing_subscriber::Layer<S> for ValuesLogLayer<C>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    C: Fn(RecordValues),
    Self: 'static,
{
    fn on_new_span(
        &self,
        attrs: &tracing_core::span::Attributes<'_>,
        id: &tracing_core::span::Id,
        ctx: Context<'_, S>,
    ) {
        let Some(span) = ctx.span(id) else { return };
        if !span.metadata().target().starts_with("reaper") {
            return;
        }

        let mut values = RecordValues::new();
        attrs.record(&mut RecordVisitor {
            values: &mut values,
        });
        span.extensions_mut().replace(SpanValues(values));
    }

    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        if !event.metadata().target().starts_with("reaper") {
            return;
        }
        if event.metadata().level() > &Level::INFO {
            return;
        }

        let mut values = RecordValues::new();

        let current = ctx.current_span();
        let parent_id = event.parent().or_else(|| current.id());
        if let Some(parent_id) = parent_id {
            if let Some(span) = ctx.span(parent_id) {
                for span in span.scope().from_root() {
                    if let Some(SpanValues(other)) = span.extensions().get::<SpanValues>() {
                        values.extend(other.clone());
                    }
                }
            }
        }

        event.record(&mut RecordVisitor {
            values: &mut values,
        });

        (self.callback)(values);
    }
}
