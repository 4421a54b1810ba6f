// SPDX-License-Identifier: Apache-2.0

//! Transformer recipes: Store, MessageQueue, Filter, Cache, Validator,
//! StreamProcessor.

use crate::logic::{base_component, build_state, parse_config};
use crate::{ComponentDefinition, Instantiated, RecipeError};
use autocoder_df_config::ComponentId;
use autocoder_df_config::schema::SchemaViolation;
use autocoder_df_engine::error::Error;
use autocoder_df_engine::message::Message;
use autocoder_df_engine::primitive::{Primitive, Transformer};
use autocoder_df_state::StateAdapter;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use std::time::Duration;
use tokio::time::Instant;

fn key_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn missing_key(component: &ComponentId, recipe: &str, field: &str) -> Error {
    Error::SchemaViolation {
        component: component.clone(),
        port: None,
        violation: SchemaViolation::MissingField {
            schema: recipe.to_owned(),
            field: field.to_owned(),
        },
    }
}

#[derive(Deserialize)]
struct StoreConfig {
    #[serde(default = "default_key_field")]
    key_field: String,
}

fn default_key_field() -> String {
    "id".to_owned()
}

/// Idempotent keyed store: writes each message into the state adapter under
/// its key and passes the message through unchanged.
pub struct StoreTransformer {
    component: ComponentId,
    key_field: String,
    state: Rc<dyn StateAdapter>,
}

#[async_trait(?Send)]
impl Transformer for StoreTransformer {
    async fn transform(&mut self, msg: Message) -> Result<Option<Message>, Error> {
        let key = msg
            .get(&self.key_field)
            .and_then(key_string)
            .ok_or_else(|| missing_key(&self.component, "store", &self.key_field))?;
        self.state
            .set(self.component.as_ref(), &key, msg.clone().into_value())
            .await
            .map_err(|e| Error::StateError {
                component: self.component.clone(),
                error: e.to_string(),
            })?;
        Ok(Some(msg))
    }
}

/// Builds a Store component.
pub fn instantiate_store(def: &ComponentDefinition) -> Result<Instantiated, RecipeError> {
    let config: StoreConfig = parse_config(def)?;
    let state = build_state(def)?.ok_or_else(|| RecipeError::Engine(
        Error::StateCapabilityMissing {
            component: def.name.clone(),
        },
    ))?;
    let transformer = StoreTransformer {
        component: def.name.clone(),
        key_field: config.key_field,
        state: state.clone(),
    };
    Ok(Instantiated {
        component: base_component(def, Primitive::Transformer(Box::new(transformer)), Some(state)),
        ingress: None,
    })
}

/// FIFO pass-through queue stage.
pub struct MessageQueueTransformer;

#[async_trait(?Send)]
impl Transformer for MessageQueueTransformer {
    async fn transform(&mut self, msg: Message) -> Result<Option<Message>, Error> {
        Ok(Some(msg))
    }
}

/// Builds a MessageQueue component.
pub fn instantiate_message_queue(def: &ComponentDefinition) -> Result<Instantiated, RecipeError> {
    Ok(Instantiated {
        component: base_component(
            def,
            Primitive::Transformer(Box::new(MessageQueueTransformer)),
            None,
        ),
        ingress: None,
    })
}

#[derive(Deserialize)]
struct FilterConfig {
    #[serde(default)]
    field: Option<String>,
    #[serde(default)]
    equals: Option<Value>,
}

/// Predicate filter: drops messages whose `field` is absent or, when
/// `equals` is configured, differs from the expected value.
pub struct FilterTransformer {
    field: Option<String>,
    equals: Option<Value>,
}

#[async_trait(?Send)]
impl Transformer for FilterTransformer {
    async fn transform(&mut self, msg: Message) -> Result<Option<Message>, Error> {
        let Some(field) = &self.field else {
            return Ok(Some(msg));
        };
        let keep = match (msg.get(field), &self.equals) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(actual), Some(expected)) => actual == expected,
        };
        if keep { Ok(Some(msg)) } else { Ok(None) }
    }
}

/// Builds a Filter component.
pub fn instantiate_filter(def: &ComponentDefinition) -> Result<Instantiated, RecipeError> {
    let config: FilterConfig = parse_config(def)?;
    let transformer = FilterTransformer {
        field: config.field,
        equals: config.equals,
    };
    Ok(Instantiated {
        component: base_component(def, Primitive::Transformer(Box::new(transformer)), None),
        ingress: None,
    })
}

#[derive(Deserialize)]
struct CacheConfig {
    #[serde(default = "default_key_field")]
    key_field: String,
    #[serde(default = "default_ttl_ms")]
    ttl_ms: u64,
    #[serde(default = "default_max_entries")]
    max_entries: usize,
}

fn default_ttl_ms() -> u64 {
    60_000
}

fn default_max_entries() -> usize {
    1024
}

/// TTL/size-bounded cache: annotates each message with `cache_hit` and
/// refreshes the entry on miss. Size eviction is insertion-ordered.
pub struct CacheTransformer {
    component: ComponentId,
    key_field: String,
    ttl: Duration,
    max_entries: usize,
    entries: HashMap<String, Instant>,
    order: VecDeque<String>,
}

#[async_trait(?Send)]
impl Transformer for CacheTransformer {
    async fn transform(&mut self, msg: Message) -> Result<Option<Message>, Error> {
        let key = msg
            .get(&self.key_field)
            .and_then(key_string)
            .ok_or_else(|| missing_key(&self.component, "cache", &self.key_field))?;
        let now = Instant::now();
        let hit = self
            .entries
            .get(&key)
            .is_some_and(|stored| now.duration_since(*stored) < self.ttl);
        if !hit {
            if self.entries.insert(key.clone(), now).is_none() {
                self.order.push_back(key.clone());
            }
            while self.entries.len() > self.max_entries {
                match self.order.pop_front() {
                    Some(oldest) => {
                        let _ = self.entries.remove(&oldest);
                    }
                    None => break,
                }
            }
        }
        Ok(Some(msg.map_fields(|mut fields| {
            let _ = fields.insert("cache_hit".to_owned(), Value::Bool(hit));
            fields
        })))
    }
}

/// Builds a Cache component.
pub fn instantiate_cache(def: &ComponentDefinition) -> Result<Instantiated, RecipeError> {
    let config: CacheConfig = parse_config(def)?;
    let transformer = CacheTransformer {
        component: def.name.clone(),
        key_field: config.key_field,
        ttl: Duration::from_millis(config.ttl_ms.max(1)),
        max_entries: config.max_entries.max(1),
        entries: HashMap::new(),
        order: VecDeque::new(),
    };
    Ok(Instantiated {
        component: base_component(def, Primitive::Transformer(Box::new(transformer)), None),
        ingress: None,
    })
}

#[derive(Deserialize)]
struct ValidatorConfig {
    #[serde(default)]
    required_fields: Vec<String>,
}

/// Drops messages missing any required field. Invalid messages are drops
/// with a logged reason, never errors.
pub struct ValidatorTransformer {
    component: ComponentId,
    required_fields: Vec<String>,
}

#[async_trait(?Send)]
impl Transformer for ValidatorTransformer {
    async fn transform(&mut self, msg: Message) -> Result<Option<Message>, Error> {
        for field in &self.required_fields {
            let present = msg.get(field).is_some_and(|v| !v.is_null());
            if !present {
                tracing::debug!(
                    component = %self.component,
                    field = %field,
                    reason = "validation_failed",
                    "message dropped"
                );
                return Ok(None);
            }
        }
        Ok(Some(msg))
    }
}

/// Builds a Validator component.
pub fn instantiate_validator(def: &ComponentDefinition) -> Result<Instantiated, RecipeError> {
    let config: ValidatorConfig = parse_config(def)?;
    let transformer = ValidatorTransformer {
        component: def.name.clone(),
        required_fields: config.required_fields,
    };
    Ok(Instantiated {
        component: base_component(def, Primitive::Transformer(Box::new(transformer)), None),
        ingress: None,
    })
}

#[derive(Deserialize)]
struct StreamProcessorConfig {
    #[serde(default = "default_batch_size")]
    batch_size: usize,
    #[serde(default)]
    flush_interval_ms: Option<u64>,
}

fn default_batch_size() -> usize {
    10
}

/// Batching stage: buffers messages and emits one batched message when the
/// batch fills; a timer flush emits partial batches. Buffered items are
/// reported as drops with reason `batched` (the transformer hook has no
/// separate buffering outcome).
pub struct StreamProcessorTransformer {
    batch_size: usize,
    buffer: Vec<Value>,
}

impl StreamProcessorTransformer {
    fn flush(&mut self) -> Option<Message> {
        if self.buffer.is_empty() {
            return None;
        }
        let batch: Vec<Value> = self.buffer.drain(..).collect();
        Message::from_value(json!({
            "count": batch.len(),
            "batch": batch,
        }))
    }
}

#[async_trait(?Send)]
impl Transformer for StreamProcessorTransformer {
    async fn transform(&mut self, msg: Message) -> Result<Option<Message>, Error> {
        self.buffer.push(msg.into_value());
        if self.buffer.len() >= self.batch_size {
            Ok(self.flush())
        } else {
            Ok(None)
        }
    }

    async fn on_timer(&mut self) -> Result<Vec<Message>, Error> {
        Ok(self.flush().into_iter().collect())
    }
}

/// Builds a StreamProcessor component.
pub fn instantiate_stream_processor(
    def: &ComponentDefinition,
) -> Result<Instantiated, RecipeError> {
    let config: StreamProcessorConfig = parse_config(def)?;
    let transformer = StreamProcessorTransformer {
        batch_size: config.batch_size.max(1),
        buffer: Vec::new(),
    };
    let mut component =
        base_component(def, Primitive::Transformer(Box::new(transformer)), None);
    if let Some(flush_ms) = config.flush_interval_ms {
        component = component.with_timer_interval(Duration::from_millis(flush_ms.max(1)));
    }
    Ok(Instantiated {
        component,
        ingress: None,
    })
}
