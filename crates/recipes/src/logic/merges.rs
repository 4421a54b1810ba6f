// SPDX-License-Identifier: Apache-2.0

//! Merger recipes: Aggregator.

use crate::logic::{base_component, parse_config};
use crate::{ComponentDefinition, Instantiated, RecipeError};
use autocoder_df_config::PortName;
use autocoder_df_engine::error::Error;
use autocoder_df_engine::message::Message;
use autocoder_df_engine::primitive::{Merger, Primitive};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

#[derive(Deserialize)]
struct AggregatorConfig {
    #[serde(default = "default_value_field")]
    value_field: String,
    #[serde(default = "default_window_ms")]
    window_ms: u64,
}

fn default_value_field() -> String {
    "value".to_owned()
}

fn default_window_ms() -> u64 {
    1_000
}

/// Windowed sum/count over all inputs: accumulates per arrival and emits one
/// summary message per timer window.
pub struct AggregatorMerger {
    value_field: String,
    sum: f64,
    count: u64,
}

#[async_trait(?Send)]
impl Merger for AggregatorMerger {
    async fn merge_step(
        &mut self,
        _port: &PortName,
        msg: Message,
    ) -> Result<Vec<Message>, Error> {
        if let Some(value) = msg.get(&self.value_field).and_then(Value::as_f64) {
            self.sum += value;
        }
        self.count += 1;
        Ok(Vec::new())
    }

    async fn on_timer(&mut self) -> Result<Vec<Message>, Error> {
        if self.count == 0 {
            return Ok(Vec::new());
        }
        let summary = Message::from_value(json!({
            "sum": self.sum,
            "count": self.count,
        }));
        self.sum = 0.0;
        self.count = 0;
        Ok(summary.into_iter().collect())
    }
}

/// Builds an Aggregator component with its window timer.
pub fn instantiate_aggregator(def: &ComponentDefinition) -> Result<Instantiated, RecipeError> {
    let config: AggregatorConfig = parse_config(def)?;
    let merger = AggregatorMerger {
        value_field: config.value_field,
        sum: 0.0,
        count: 0,
    };
    let component = base_component(def, Primitive::Merger(Box::new(merger)), None)
        .with_timer_interval(Duration::from_millis(config.window_ms.max(1)));
    Ok(Instantiated {
        component,
        ingress: None,
    })
}
