//! Span attributes emitted while running workflows on the local substrate.

mod helpers;

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use helpers::CallLog;
use serde_json::json;
use tracing::Subscriber;
use tracing::field::{Field, Visit};
use tracing::span::{Attributes, Id};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};

#[derive(Debug, Clone)]
struct CapturedSpan {
    name: &'static str,
    fields: BTreeMap<String, String>,
}

/// Records the name and initial fields of every span created.
#[derive(Clone, Default)]
struct SpanCapture(Arc<Mutex<Vec<CapturedSpan>>>);

impl SpanCapture {
    fn named(&self, name: &str) -> Vec<CapturedSpan> {
        self.0
            .lock()
            .unwrap()
            .iter()
            .filter(|s| s.name == name)
            .cloned()
            .collect()
    }
}

struct Fields<'a>(&'a mut BTreeMap<String, String>);

impl Visit for Fields<'_> {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.0.insert(field.name().to_string(), value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        self.0.insert(field.name().to_string(), format!("{:?}", value));
    }
}

impl<S: Subscriber> Layer<S> for SpanCapture {
    fn on_new_span(&self, attrs: &Attributes<'_>, _id: &Id, _ctx: Context<'_, S>) {
        let mut fields = BTreeMap::new();
        attrs.record(&mut Fields(&mut fields));
        self.0.lock().unwrap().push(CapturedSpan {
            name: attrs.metadata().name(),
            fields,
        });
    }
}

fn assert_fixed_attributes(span: &CapturedSpan) {
    for key in ["workflowId", "runId", "nodeId", "runtime"] {
        assert!(span.fields.contains_key(key), "{} span lacks {}: {:?}", span.name, key, span.fields);
    }
}

#[test]
fn action_and_subworkflow_spans_carry_fixed_attributes() {
    let capture = SpanCapture::default();
    let log = CallLog::default();
    let mut engine = helpers::engine(helpers::actions(&log), &[helpers::CHILD, helpers::PARENT]);

    let subscriber = tracing_subscriber::registry().with(capture.clone());
    let record = tracing::subscriber::with_default(subscriber, || {
        engine.run("parent", "r1", json!({ "x": 1 })).unwrap()
    });
    assert_eq!(record.output, Some(json!({ "y": 2 })));

    let actions = capture.named("action");
    assert_eq!(actions.len(), 1);
    assert_fixed_attributes(&actions[0]);
    assert_eq!(actions[0].fields["workflowId"], "child");
    assert_eq!(actions[0].fields["runId"], "r1/call");
    assert_eq!(actions[0].fields["nodeId"], "inc");
    assert_eq!(actions[0].fields["runtime"], "container");

    let children = capture.named("subworkflow");
    assert_eq!(children.len(), 1);
    assert_fixed_attributes(&children[0]);
    assert_eq!(children[0].fields["nodeId"], "call");
    assert_eq!(children[0].fields["runtime"], "host");

    let runs = capture.named("workflow_run");
    assert!(runs.iter().any(|s| s.fields["runId"] == "r1"));
    assert!(runs.iter().any(|s| s.fields["runId"] == "r1/call"));
}

#[test]
fn fan_out_instances_each_get_an_action_span() {
    let capture = SpanCapture::default();
    let log = CallLog::default();
    let mut engine = helpers::engine(helpers::actions(&log), &[helpers::FOREACH]);

    let subscriber = tracing_subscriber::registry().with(capture.clone());
    tracing::subscriber::with_default(subscriber, || {
        engine.run("fanout", "r1", json!({ "values": [1, 2, 3] })).unwrap()
    });

    let actions = capture.named("action");
    assert_eq!(actions.len(), 3);
    for span in &actions {
        assert_fixed_attributes(span);
        assert_eq!(span.fields["nodeId"], "each");
    }
    let indices: Vec<&str> = actions.iter().map(|s| s.fields["expansionIndex"].as_str()).collect();
    assert_eq!(indices, vec!["Some(0)", "Some(1)", "Some(2)"]);
}
