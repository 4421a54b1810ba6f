// SPDX-License-Identifier: Apache-2.0

//! Capability kernel micro-benchmark.
//!
//! Budgets are contracts: this benchmark measures the per-item overhead of
//! the kernel triple and fails the run when the observed mean exceeds the
//! published `capability_budgets.yaml` ceiling for the whole triple (sum of
//! the three per-capability latency budgets). Humans raise budgets; CI only
//! verifies them.

use autocoder_df_config::capability::{CapabilityBudgets, CapabilityTuning};
use autocoder_df_config::schema::{FieldSpec, FieldType, Schema};
use autocoder_df_engine::capability::{CapabilityChain, ItemContext, ItemOutcome};
use autocoder_df_engine::message::Message;
use autocoder_df_engine::metrics::ComponentMetrics;
use criterion::{Criterion, criterion_group, criterion_main};
use serde_json::json;
use std::cell::RefCell;
use std::time::{Duration, Instant};

fn bench_kernel_triple(c: &mut Criterion) {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime builds");
    let component: autocoder_df_config::ComponentId = "bench".into();
    let schema = Schema::record(
        "bench_msg",
        [
            ("id", FieldSpec::required(FieldType::Integer)),
            ("payload", FieldSpec::optional(FieldType::String)),
        ],
    );
    let msg = Message::from_value(json!({ "id": 1, "payload": "x" })).expect("object");
    let chain = RefCell::new(
        CapabilityChain::new(
            &component,
            &CapabilityTuning::default(),
            ComponentMetrics::new(&component),
            None,
            0,
        )
        .expect("chain builds"),
    );

    let _ = c.bench_function("kernel_triple_per_item", |b| {
        b.iter(|| {
            rt.block_on(async {
                let mut chain = chain.borrow_mut();
                let ctx = ItemContext::new(&component, None, Some(&schema));
                chain.before_item(&ctx, &msg).await.expect("valid item");
                chain.after_item(&ctx, &ItemOutcome::Emitted(1)).await;
            });
        });
    });

    enforce_budget(&rt, &component, &schema, &msg);
}

/// The enforcement hook: a plain measurement compared against the published
/// budgets, independent of criterion's statistics.
fn enforce_budget(
    rt: &tokio::runtime::Runtime,
    component: &autocoder_df_config::ComponentId,
    schema: &Schema,
    msg: &Message,
) {
    let budgets_path = concat!(env!("CARGO_MANIFEST_DIR"), "/../../capability_budgets.yaml");
    let budgets = match CapabilityBudgets::from_yaml_file(budgets_path) {
        Ok(budgets) => budgets,
        Err(_) => return, // no budgets file in this checkout; nothing to enforce
    };
    let ceiling_ms: f64 = ["schema_validator", "rate_limiter", "metrics_collector"]
        .iter()
        .filter_map(|name| budgets.get(name))
        .map(|b| b.max_latency_ms)
        .sum();
    if ceiling_ms <= 0.0 {
        return;
    }

    let mut chain = CapabilityChain::new(
        component,
        &CapabilityTuning::default(),
        ComponentMetrics::new(component),
        None,
        0,
    )
    .expect("chain builds");

    const ITERS: u32 = 10_000;
    let elapsed = rt.block_on(async {
        let start = Instant::now();
        for _ in 0..ITERS {
            let ctx = ItemContext::new(component, None, Some(schema));
            chain.before_item(&ctx, msg).await.expect("valid item");
            chain.after_item(&ctx, &ItemOutcome::Emitted(1)).await;
        }
        start.elapsed()
    });
    let mean = elapsed / ITERS;
    let ceiling = Duration::from_secs_f64(ceiling_ms / 1e3);
    assert!(
        mean <= ceiling,
        "kernel triple mean {mean:?} exceeds published budget {ceiling:?}"
    );
}

criterion_group!(benches, bench_kernel_triple);
criterion_main!(benches);
