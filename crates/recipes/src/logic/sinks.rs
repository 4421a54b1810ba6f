// SPDX-License-Identifier: Apache-2.0

//! Sink recipes: Logger and MetricsCollector.

use crate::logic::{base_component, parse_config};
use crate::{ComponentDefinition, Instantiated, RecipeError};
use autocoder_df_config::ComponentId;
use autocoder_df_engine::error::Error;
use autocoder_df_engine::message::Message;
use autocoder_df_engine::primitive::{Primitive, Sink};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

#[derive(Deserialize)]
struct LoggerConfig {
    #[serde(default = "default_level")]
    level: String,
}

fn default_level() -> String {
    "info".to_owned()
}

/// Logs every consumed message as a structured event.
pub struct LoggerSink {
    component: ComponentId,
    level: String,
}

#[async_trait(?Send)]
impl Sink for LoggerSink {
    async fn consume(&mut self, msg: Message) -> Result<(), Error> {
        let payload = Value::Object(msg.fields().clone());
        match self.level.as_str() {
            "debug" => tracing::debug!(component = %self.component, %payload, "message"),
            "warn" => tracing::warn!(component = %self.component, %payload, "message"),
            _ => tracing::info!(component = %self.component, %payload, "message"),
        }
        Ok(())
    }
}

/// Builds a Logger component.
pub fn instantiate_logger(def: &ComponentDefinition) -> Result<Instantiated, RecipeError> {
    let config: LoggerConfig = parse_config(def)?;
    let sink = LoggerSink {
        component: def.name.clone(),
        level: config.level,
    };
    Ok(Instantiated {
        component: base_component(def, Primitive::Sink(Box::new(sink)), None),
        ingress: None,
    })
}

#[derive(Deserialize)]
struct MetricsSinkConfig {
    #[serde(default)]
    value_field: Option<String>,
}

/// Terminal observation point: counts consumed messages and, when a value
/// field is configured, accumulates its sum. Totals are logged at cleanup.
pub struct MetricsSink {
    component: ComponentId,
    value_field: Option<String>,
    count: u64,
    sum: f64,
}

#[async_trait(?Send)]
impl Sink for MetricsSink {
    async fn consume(&mut self, msg: Message) -> Result<(), Error> {
        self.count += 1;
        if let Some(field) = &self.value_field {
            if let Some(value) = msg.get(field).and_then(Value::as_f64) {
                self.sum += value;
            }
        }
        Ok(())
    }

    async fn cleanup(&mut self) -> Result<(), Error> {
        tracing::info!(
            component = %self.component,
            count = self.count,
            sum = self.sum,
            "metrics sink totals"
        );
        Ok(())
    }
}

/// Builds a MetricsCollector sink component.
pub fn instantiate_metrics_sink(def: &ComponentDefinition) -> Result<Instantiated, RecipeError> {
    let config: MetricsSinkConfig = parse_config(def)?;
    let sink = MetricsSink {
        component: def.name.clone(),
        value_field: config.value_field,
        count: 0,
        sum: 0.0,
    };
    Ok(Instantiated {
        component: base_component(def, Primitive::Sink(Box::new(sink)), None),
        ingress: None,
    })
}
