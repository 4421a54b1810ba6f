// SPDX-License-Identifier: Apache-2.0

//! Direct hook-level tests for the transformer and splitter recipes.

use autocoder_df_config::ComponentId;
use autocoder_df_config::blueprint::ComponentSpec;
use autocoder_df_engine::message::Message;
use autocoder_df_engine::primitive::Primitive;
use autocoder_df_recipes::{expand, instantiate};
use serde_json::{Value, json};

fn primitive(recipe: &str, config: Value) -> Primitive {
    let id: ComponentId = "unit".into();
    let spec = ComponentSpec::new("Anything")
        .with_recipe(recipe.to_owned())
        .with_config(config);
    let def = expand(&id, &spec).expect("expands");
    instantiate(&def).expect("instantiates").component.primitive
}

fn msg(value: Value) -> Message {
    Message::from_value(value).expect("object")
}

#[tokio::test]
async fn filter_keeps_matching_and_drops_the_rest() {
    let Primitive::Transformer(mut filter) =
        primitive("filter", json!({ "field": "kind", "equals": "order" }))
    else {
        panic!("filter is a transformer");
    };

    let kept = filter
        .transform(msg(json!({ "kind": "order", "id": 1 })))
        .await
        .expect("ok");
    assert!(kept.is_some());

    let wrong = filter
        .transform(msg(json!({ "kind": "refund" })))
        .await
        .expect("ok");
    assert!(wrong.is_none());

    let missing = filter.transform(msg(json!({ "id": 2 }))).await.expect("ok");
    assert!(missing.is_none());
}

#[tokio::test]
async fn message_queue_passes_through_unchanged() {
    let Primitive::Transformer(mut queue) = primitive("message_queue", Value::Null) else {
        panic!("message_queue is a transformer");
    };
    let input = msg(json!({ "id": 9, "payload": "x" }));
    let output = queue.transform(input.clone()).await.expect("ok");
    assert_eq!(output, Some(input));
}

#[tokio::test]
async fn router_applies_first_matching_rule_then_default() {
    let Primitive::Splitter(mut router) = primitive(
        "router",
        json!({
            "rules": [
                { "field": "region", "equals": "eu", "port": "matched" },
                { "field": "region", "equals": "us", "port": "matched" }
            ],
            "default_port": "default"
        }),
    ) else {
        panic!("router is a splitter");
    };

    let routed = router
        .split(msg(json!({ "region": "eu" })))
        .await
        .expect("ok");
    assert!(routed.contains_key("matched"));

    let defaulted = router
        .split(msg(json!({ "region": "ap" })))
        .await
        .expect("ok");
    assert!(defaulted.contains_key("default"));
}

#[tokio::test]
async fn controller_routes_by_action_with_rejected_fallback() {
    let Primitive::Splitter(mut controller) = primitive(
        "controller",
        json!({ "routes": { "create": "out" } }),
    ) else {
        panic!("controller is a splitter");
    };

    let created = controller
        .split(msg(json!({ "action": "create" })))
        .await
        .expect("ok");
    assert!(created.contains_key("out"));

    let unknown = controller
        .split(msg(json!({ "action": "purge" })))
        .await
        .expect("ok");
    assert!(unknown.contains_key("rejected"));
}

#[tokio::test(start_paused = true)]
async fn cache_annotates_hits_and_expires_by_ttl() {
    let Primitive::Transformer(mut cache) = primitive(
        "cache",
        json!({ "key_field": "id", "ttl_ms": 1000, "max_entries": 8 }),
    ) else {
        panic!("cache is a transformer");
    };

    let first = cache
        .transform(msg(json!({ "id": 1 })))
        .await
        .expect("ok")
        .expect("passes through");
    assert_eq!(first.get("cache_hit"), Some(&json!(false)));

    let second = cache
        .transform(msg(json!({ "id": 1 })))
        .await
        .expect("ok")
        .expect("passes through");
    assert_eq!(second.get("cache_hit"), Some(&json!(true)));

    tokio::time::advance(std::time::Duration::from_millis(1500)).await;
    let expired = cache
        .transform(msg(json!({ "id": 1 })))
        .await
        .expect("ok")
        .expect("passes through");
    assert_eq!(expired.get("cache_hit"), Some(&json!(false)));
}

#[tokio::test]
async fn cache_evicts_beyond_max_entries() {
    let Primitive::Transformer(mut cache) = primitive(
        "cache",
        json!({ "key_field": "id", "ttl_ms": 60000, "max_entries": 2 }),
    ) else {
        panic!("cache is a transformer");
    };

    for id in 1..=3 {
        let _ = cache.transform(msg(json!({ "id": id }))).await.expect("ok");
    }
    // Key 1 was evicted by key 3, so it misses again.
    let evicted = cache
        .transform(msg(json!({ "id": 1 })))
        .await
        .expect("ok")
        .expect("passes through");
    assert_eq!(evicted.get("cache_hit"), Some(&json!(false)));
}
