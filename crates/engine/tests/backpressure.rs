// SPDX-License-Identifier: Apache-2.0

//! Rate limiting and item-failure isolation under the capability kernel.

use autocoder_df_config::PortName;
use autocoder_df_config::blueprint::{
    Binding, BindingEndpoint, GeneratedBy, HarnessSettings, PortSpec,
};
use autocoder_df_config::capability::{CapabilityTuning, RateLimitConfig};
use autocoder_df_config::schema::Schema;
use autocoder_df_engine::component::Component;
use autocoder_df_engine::error::Error;
use autocoder_df_engine::harness::Harness;
use autocoder_df_engine::message::Message;
use autocoder_df_engine::primitive::{Primitive, Splitter};
use autocoder_df_engine::testing::{CollectingSink, FnTransformer, SeededSource};
use autocoder_df_telemetry::registry::MetricsRegistry;
use async_trait::async_trait;
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

fn any_port(name: &'static str) -> PortSpec {
    PortSpec::new(name, Schema::any("any"))
}

#[tokio::test(start_paused = true)]
async fn rate_limiter_bounds_sustained_throughput() {
    let local = tokio::task::LocalSet::new();
    local
        .run_until(async {
            let registry = MetricsRegistry::new();
            let mut harness = Harness::new("limited", HarnessSettings::default(), registry);

            let sink = CollectingSink::new();
            let collected = sink.handle();

            harness
                .add_component(
                    Component::new(
                        "a_source",
                        Primitive::Source(Box::new(SeededSource::new(101, 2))),
                    )
                    .with_output(any_port("out")),
                )
                .expect("add source");
            harness
                .add_component(
                    Component::new(
                        "b_limited",
                        Primitive::Transformer(Box::new(FnTransformer::new(|msg| Ok(Some(msg))))),
                    )
                    .with_input(any_port("in"))
                    .with_output(any_port("out"))
                    .with_tuning(CapabilityTuning {
                        rate_limit: RateLimitConfig {
                            rate: 100.0,
                            burst: 1,
                        },
                        ..CapabilityTuning::default()
                    }),
                )
                .expect("add limited");
            harness
                .add_component(
                    Component::new("c_sink", Primitive::Sink(Box::new(sink)))
                        .with_input(any_port("in")),
                )
                .expect("add sink");
            harness.add_binding(binding(("a_source", "out"), ("b_limited", "in")));
            harness.add_binding(binding(("b_limited", "out"), ("c_sink", "in")));

            let start = tokio::time::Instant::now();
            harness
                .run_with_shutdown(pending::<()>())
                .await
                .expect("clean run");
            let elapsed = start.elapsed();

            // 101 items at 100/s with burst 1: one second of virtual time,
            // within the refill granularity.
            assert_eq!(collected.borrow().len(), 101);
            assert!(elapsed >= Duration::from_millis(950), "elapsed {elapsed:?}");
            assert!(elapsed <= Duration::from_millis(1300), "elapsed {elapsed:?}");
        })
        .await;
}

/// A splitter that routes everything to a port it never declared.
struct RogueSplitter;

#[async_trait(?Send)]
impl Splitter for RogueSplitter {
    async fn split(&mut self, msg: Message) -> Result<BTreeMap<PortName, Message>, Error> {
        let mut out = BTreeMap::new();
        let _ = out.insert(PortName::from("undeclared"), msg);
        Ok(out)
    }
}

#[test]
fn splitter_emission_to_undeclared_port_fails_the_item_only() {
    autocoder_df_engine::testing::run_local(async {
        let registry = MetricsRegistry::new();
        let mut harness = Harness::new("rogue", HarnessSettings::default(), registry.clone());

        let sink = CollectingSink::new();
        let collected = sink.handle();

        harness
            .add_component(
                Component::new(
                    "a_source",
                    Primitive::Source(Box::new(SeededSource::new(5, 4))),
                )
                .with_output(any_port("out")),
            )
            .expect("add source");
        harness
            .add_component(
                Component::new("b_rogue", Primitive::Splitter(Box::new(RogueSplitter)))
                    .with_input(any_port("in"))
                    .with_output(any_port("left"))
                    .with_output(any_port("right")),
            )
            .expect("add splitter");
        harness
            .add_component(
                Component::new("c_sink", Primitive::Sink(Box::new(sink)))
                    .with_input(any_port("in")),
            )
            .expect("add sink");
        harness.add_binding(binding(("a_source", "out"), ("b_rogue", "in")));
        harness.add_binding(binding(("b_rogue", "left"), ("c_sink", "in")));

        harness
            .run_with_shutdown(pending::<()>())
            .await
            .expect("programmer error fails items, not the system");

        assert!(collected.borrow().is_empty());
        assert_eq!(registry.counter_value("component/b_rogue", "errors_total"), 5);
        assert_eq!(
            registry.counter_value("component/b_rogue", "messages_dropped_total"),
            0
        );
    });
}
