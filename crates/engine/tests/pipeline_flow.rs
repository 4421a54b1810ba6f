// SPDX-License-Identifier: Apache-2.0

//! End-to-end pipeline behavior: FIFO ordering, determinism, drop-vs-error
//! accounting, retries, the kernel triple, and graceful shutdown.

use autocoder_df_config::blueprint::{
    Binding, BindingEndpoint, GeneratedBy, HarnessSettings, PortSpec,
};
use autocoder_df_config::capability::{CapabilityTuning, RetryConfig};
use autocoder_df_config::schema::{FieldSpec, FieldType, Schema};
use autocoder_df_engine::component::{Component, SourceContext};
use autocoder_df_engine::control::control_channel;
use autocoder_df_engine::error::Error;
use autocoder_df_engine::harness::Harness;
use autocoder_df_engine::message::Message;
use autocoder_df_engine::port::InPort;
use autocoder_df_engine::primitive::{Merger, Primitive, Source};
use autocoder_df_engine::testing::{
    CollectingSink, FlakyTransformer, FnTransformer, SeededSource, run_local,
};
use autocoder_df_telemetry::registry::MetricsRegistry;
use async_trait::async_trait;
use autocoder_df_config::PortName;
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::future::pending;
use std::time::Duration;

fn binding(from: (&str, &str), to: (&str, &str)) -> Binding {
    Binding {
        from: BindingEndpoint::new(from.0.to_owned(), from.1.to_owned()),
        to: BindingEndpoint::new(to.0.to_owned(), to.1.to_owned()),
        generated_by: GeneratedBy::User,
    }
}

fn settings() -> HarnessSettings {
    HarnessSettings {
        shutdown_grace_ms: 5_000,
        ..HarnessSettings::default()
    }
}

fn any_port(name: &'static str) -> PortSpec {
    PortSpec::new(name, Schema::any("any"))
}

/// Runs `source -> transform -> sink` and returns the collected messages
/// plus the registry.
fn run_linear(
    count: u64,
    seed: u64,
    transform: FnTransformer,
    tuning: CapabilityTuning,
    require_output: bool,
) -> (Vec<Message>, MetricsRegistry) {
    let registry = MetricsRegistry::new();
    let mut harness = Harness::new("linear", settings(), registry.clone());

    let sink = CollectingSink::new();
    let collected = sink.handle();

    harness
        .add_component(
            Component::new(
                "a_source",
                Primitive::Source(Box::new(SeededSource::new(count, seed))),
            )
            .with_output(any_port("out")),
        )
        .expect("add source");
    harness
        .add_component(
            Component::new("b_xform", Primitive::Transformer(Box::new(transform)))
                .with_input(any_port("in"))
                .with_output(any_port("out"))
                .with_tuning(tuning)
                .with_require_output(require_output),
        )
        .expect("add transformer");
    harness
        .add_component(
            Component::new("c_sink", Primitive::Sink(Box::new(sink))).with_input(any_port("in")),
        )
        .expect("add sink");
    harness.add_binding(binding(("a_source", "out"), ("b_xform", "in")));
    harness.add_binding(binding(("b_xform", "out"), ("c_sink", "in")));

    let collected_out = collected.clone();
    let registry_out = registry.clone();
    run_local(async move {
        harness
            .run_with_shutdown(pending::<()>())
            .await
            .expect("clean run");
    });
    let msgs = collected_out.borrow().clone();
    (msgs, registry_out)
}

#[test]
fn linear_pipeline_preserves_fifo_and_counts() {
    let (msgs, registry) = run_linear(
        100,
        7,
        FnTransformer::new(|msg| Ok(Some(msg))),
        CapabilityTuning::default(),
        true,
    );
    assert_eq!(msgs.len(), 100);
    for (i, msg) in msgs.iter().enumerate() {
        assert_eq!(msg.get("seq"), Some(&json!(i)));
    }

    assert_eq!(
        registry.counter_value("component/a_source/port/out", "messages_out_total"),
        100
    );
    assert_eq!(
        registry.counter_value("component/c_sink/port/in", "messages_in_total"),
        100
    );
    assert_eq!(
        registry.counter_value("component/b_xform", "errors_total"),
        0
    );
    assert_eq!(
        registry.counter_value("component/b_xform", "messages_dropped_total"),
        0
    );
}

#[test]
fn identical_seeds_produce_identical_output_sequences() {
    let values = |seed: u64| {
        let (msgs, _) = run_linear(
            50,
            seed,
            FnTransformer::new(|msg| Ok(Some(msg))),
            CapabilityTuning::default(),
            true,
        );
        msgs.iter()
            .map(|m| m.get("value").cloned())
            .collect::<Vec<_>>()
    };
    assert_eq!(values(42), values(42));
    assert_ne!(values(42), values(43));
}

#[test]
fn transformer_drops_are_counted_separately_from_errors() {
    // Drop odd sequence numbers.
    let (msgs, registry) = run_linear(
        100,
        1,
        FnTransformer::new(|msg| {
            let seq = msg.get("seq").and_then(Value::as_u64).unwrap_or(0);
            if seq % 2 == 0 { Ok(Some(msg)) } else { Ok(None) }
        }),
        CapabilityTuning::default(),
        false,
    );
    assert_eq!(msgs.len(), 50);
    assert_eq!(
        registry.counter_value("component/b_xform", "messages_dropped_total"),
        50
    );
    assert_eq!(
        registry.counter_value("component/b_xform", "errors_total"),
        0
    );
}

#[test]
fn forbidden_drop_is_fatal() {
    let registry = MetricsRegistry::new();
    let mut harness = Harness::new("fatal", settings(), registry);

    harness
        .add_component(
            Component::new(
                "a_source",
                Primitive::Source(Box::new(SeededSource::new(3, 1))),
            )
            .with_output(any_port("out")),
        )
        .expect("add source");
    harness
        .add_component(
            Component::new(
                "b_xform",
                Primitive::Transformer(Box::new(FnTransformer::new(|_| Ok(None)))),
            )
            .with_input(any_port("in"))
            .with_output(any_port("out"))
            .with_require_output(true),
        )
        .expect("add transformer");
    harness.add_binding(binding(("a_source", "out"), ("b_xform", "in")));

    run_local(async move {
        let result = harness.run_with_shutdown(pending::<()>()).await;
        assert!(matches!(result, Err(Error::DropForbidden { .. })));
    });
}

#[test]
fn input_schema_violations_abort_the_item_and_continue() {
    let registry = MetricsRegistry::new();
    let mut harness = Harness::new("schema", settings(), registry.clone());

    let sink = CollectingSink::new();
    let collected = sink.handle();
    let demanding = Schema::record(
        "strict_in",
        [("email", FieldSpec::required(FieldType::String))],
    );

    harness
        .add_component(
            Component::new(
                "a_source",
                Primitive::Source(Box::new(SeededSource::new(10, 5))),
            )
            .with_output(any_port("out")),
        )
        .expect("add source");
    // The consumer-side schema demands a field the producer never sets; every
    // item fails validation at the sink's chain and is enveloped.
    harness
        .add_component(
            Component::new("b_sink", Primitive::Sink(Box::new(sink)))
                .with_input(PortSpec::new("in", demanding)),
        )
        .expect("add sink");
    harness.add_binding(binding(("a_source", "out"), ("b_sink", "in")));

    run_local(async move {
        harness
            .run_with_shutdown(pending::<()>())
            .await
            .expect("schema violations are item-level");
    });
    assert!(collected.borrow().is_empty());
    assert_eq!(registry.counter_value("component/b_sink", "errors_total"), 10);
    assert_eq!(
        registry.counter_value("component/b_sink", "messages_dropped_total"),
        0
    );
}

#[test]
fn transient_failures_are_retried_to_success() {
    let registry = MetricsRegistry::new();
    let mut harness = Harness::new("retry", settings(), registry.clone());

    let sink = CollectingSink::new();
    let collected = sink.handle();
    let flaky = FlakyTransformer::new(2);
    let attempts = flaky.attempts();

    harness
        .add_component(
            Component::new(
                "a_source",
                Primitive::Source(Box::new(SeededSource::new(1, 9))),
            )
            .with_output(any_port("out")),
        )
        .expect("add source");
    harness
        .add_component(
            Component::new("b_flaky", Primitive::Transformer(Box::new(flaky)))
                .with_input(any_port("in"))
                .with_output(any_port("out"))
                .with_tuning(CapabilityTuning {
                    retry: Some(RetryConfig {
                        max_attempts: 3,
                        initial_delay_ms: 1,
                        max_delay_ms: 5,
                    }),
                    ..CapabilityTuning::default()
                }),
        )
        .expect("add flaky");
    harness
        .add_component(
            Component::new("c_sink", Primitive::Sink(Box::new(sink))).with_input(any_port("in")),
        )
        .expect("add sink");
    harness.add_binding(binding(("a_source", "out"), ("b_flaky", "in")));
    harness.add_binding(binding(("b_flaky", "out"), ("c_sink", "in")));

    run_local(async move {
        harness
            .run_with_shutdown(pending::<()>())
            .await
            .expect("clean run");
    });
    assert_eq!(collected.borrow().len(), 1);
    assert_eq!(*attempts.borrow(), 3);
    // One errors_total per final failure; a retried success is not an error.
    assert_eq!(registry.counter_value("component/b_flaky", "errors_total"), 0);
}

/// Tags each message with the input port it arrived on.
struct TaggingMerger;

#[async_trait(?Send)]
impl Merger for TaggingMerger {
    async fn merge_step(
        &mut self,
        port: &PortName,
        msg: Message,
    ) -> Result<Vec<Message>, Error> {
        let tag = port.to_string();
        Ok(vec![msg.map_fields(|mut fields| {
            let _ = fields.insert("via".to_owned(), json!(tag));
            fields
        })])
    }
}

#[test]
fn merger_preserves_per_port_fifo() {
    let registry = MetricsRegistry::new();
    let mut harness = Harness::new("merge", settings(), registry);

    let sink = CollectingSink::new();
    let collected = sink.handle();

    for name in ["left", "right"] {
        harness
            .add_component(
                Component::new(
                    name.to_owned(),
                    Primitive::Source(Box::new(SeededSource::new(40, 3))),
                )
                .with_output(any_port("out")),
            )
            .expect("add source");
    }
    harness
        .add_component(
            Component::new("merger", Primitive::Merger(Box::new(TaggingMerger)))
                .with_input(any_port("in_left"))
                .with_input(any_port("in_right"))
                .with_output(any_port("out")),
        )
        .expect("add merger");
    harness
        .add_component(
            Component::new("sink", Primitive::Sink(Box::new(sink))).with_input(any_port("in")),
        )
        .expect("add sink");
    harness.add_binding(binding(("left", "out"), ("merger", "in_left")));
    harness.add_binding(binding(("right", "out"), ("merger", "in_right")));
    harness.add_binding(binding(("merger", "out"), ("sink", "in")));

    run_local(async move {
        harness
            .run_with_shutdown(pending::<()>())
            .await
            .expect("clean run");
    });

    let msgs = collected.borrow().clone();
    assert_eq!(msgs.len(), 80);
    for via in ["in_left", "in_right"] {
        let seqs: Vec<u64> = msgs
            .iter()
            .filter(|m| m.get("via") == Some(&json!(via)))
            .filter_map(|m| m.get("seq").and_then(Value::as_u64))
            .collect();
        assert_eq!(seqs.len(), 40, "all of {via} arrived");
        assert!(seqs.windows(2).all(|w| w[0] < w[1]), "{via} kept FIFO order");
    }
}

/// A source that produces until cancelled.
struct EndlessSource;

#[async_trait(?Send)]
impl Source for EndlessSource {
    async fn produce(&mut self, ctx: &mut SourceContext<'_>) -> Result<(), Error> {
        let mut seq = 0u64;
        loop {
            let msg = Message::from_value(json!({ "seq": seq })).expect("object");
            ctx.emit(msg).await?;
            seq += 1;
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    }
}

#[test]
fn graceful_shutdown_drains_and_exits_cleanly() {
    let registry = MetricsRegistry::new();
    let mut harness = Harness::new("drain", settings(), registry);

    let sink = CollectingSink::new();
    let collected = sink.handle();

    harness
        .add_component(
            Component::new("source", Primitive::Source(Box::new(EndlessSource)))
                .with_output(any_port("out")),
        )
        .expect("add source");
    harness
        .add_component(
            Component::new("sink", Primitive::Sink(Box::new(sink))).with_input(any_port("in")),
        )
        .expect("add sink");
    harness.add_binding(binding(("source", "out"), ("sink", "in")));

    run_local(async move {
        harness
            .run_with_shutdown(tokio::time::sleep(Duration::from_millis(50)))
            .await
            .expect("clean drain");
    });
    assert!(!collected.borrow().is_empty());
}

/// A sink that never finishes its first item.
struct StuckSink;

#[async_trait(?Send)]
impl autocoder_df_engine::primitive::Sink for StuckSink {
    async fn consume(&mut self, _msg: Message) -> Result<(), Error> {
        pending::<()>().await;
        Ok(())
    }
}

#[test]
fn expired_grace_period_forces_cancel() {
    let registry = MetricsRegistry::new();
    let mut harness = Harness::new(
        "stuck",
        HarnessSettings {
            shutdown_grace_ms: 50,
            ..HarnessSettings::default()
        },
        registry,
    );

    harness
        .add_component(
            Component::new("source", Primitive::Source(Box::new(EndlessSource)))
                .with_output(any_port("out")),
        )
        .expect("add source");
    harness
        .add_component(
            Component::new("sink", Primitive::Sink(Box::new(StuckSink)))
                .with_input(any_port("in")),
        )
        .expect("add sink");
    harness.add_binding(binding(("source", "out"), ("sink", "in")));

    run_local(async move {
        let result = harness
            .run_with_shutdown(tokio::time::sleep(Duration::from_millis(20)))
            .await;
        match result {
            Err(Error::ShutdownTimeout { pending }) => {
                assert!(pending.contains(&"sink".into()));
            }
            other => panic!("expected ShutdownTimeout, got {other:?}"),
        }
    });
}

#[test]
fn kernel_triple_is_always_present_in_tier_order() {
    let component = Component::new(
        "t",
        Primitive::Transformer(Box::new(FnTransformer::new(|msg| Ok(Some(msg))))),
    )
    .with_input(any_port("in"))
    .with_tuning(CapabilityTuning {
        retry: Some(RetryConfig::default()),
        ..CapabilityTuning::default()
    });

    let in_port = InPort::detached(&"t".into(), &any_port("in"));
    let (_ctrl_tx, ctrl_rx) = control_channel(4);
    let runner = component
        .prepare(vec![in_port], BTreeMap::new(), ctrl_rx, 8, 0)
        .expect("prepare");
    let tiers = runner.capability_tiers();
    assert_eq!(tiers, vec![10, 20, 40, 90]);
    assert_eq!(tiers.first(), Some(&10));
    assert_eq!(tiers.last(), Some(&90));
}
