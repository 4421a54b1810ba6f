// SPDX-License-Identifier: Apache-2.0

//! Splitter recipes: Controller and Router.

use crate::logic::{base_component, parse_config};
use crate::{ComponentDefinition, Instantiated, RecipeError};
use autocoder_df_config::{ComponentId, PortName};
use autocoder_df_engine::error::Error;
use autocoder_df_engine::message::Message;
use autocoder_df_engine::primitive::{Primitive, Splitter};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};

#[derive(Deserialize)]
struct ControllerConfig {
    #[serde(default = "default_route_field")]
    route_field: String,
    #[serde(default)]
    routes: HashMap<String, String>,
    #[serde(default)]
    default_port: Option<String>,
}

fn default_route_field() -> String {
    "action".to_owned()
}

/// Routes each message to the OUT port registered for its action value;
/// unmatched actions go to the default port, or nowhere when none is set.
pub struct ControllerSplitter {
    component: ComponentId,
    route_field: String,
    routes: HashMap<String, PortName>,
    default_port: Option<PortName>,
}

#[async_trait(?Send)]
impl Splitter for ControllerSplitter {
    async fn split(&mut self, msg: Message) -> Result<BTreeMap<PortName, Message>, Error> {
        let action = msg
            .get(&self.route_field)
            .and_then(Value::as_str)
            .map(str::to_owned);
        let port = action
            .as_deref()
            .and_then(|a| self.routes.get(a).cloned())
            .or_else(|| self.default_port.clone());
        let mut out = BTreeMap::new();
        match port {
            Some(port) => {
                let _ = out.insert(port, msg);
            }
            None => {
                tracing::debug!(
                    component = %self.component,
                    action = action.as_deref().unwrap_or("<missing>"),
                    "no route for action; message not emitted"
                );
            }
        }
        Ok(out)
    }
}

/// Builds a Controller component.
pub fn instantiate_controller(def: &ComponentDefinition) -> Result<Instantiated, RecipeError> {
    let config: ControllerConfig = parse_config(def)?;
    let splitter = ControllerSplitter {
        component: def.name.clone(),
        route_field: config.route_field,
        routes: config
            .routes
            .into_iter()
            .map(|(action, port)| (action, PortName::from(port)))
            .collect(),
        default_port: config.default_port.map(PortName::from),
    };
    Ok(Instantiated {
        component: base_component(def, Primitive::Splitter(Box::new(splitter)), None),
        ingress: None,
    })
}

#[derive(Deserialize, Clone)]
struct RouteRule {
    field: String,
    equals: Value,
    port: String,
}

#[derive(Deserialize)]
struct RouterConfig {
    #[serde(default)]
    rules: Vec<RouteRule>,
    #[serde(default = "default_router_port")]
    default_port: String,
}

fn default_router_port() -> String {
    "default".to_owned()
}

/// First-match rule router with a default port for everything else.
pub struct RouterSplitter {
    rules: Vec<RouteRule>,
    default_port: PortName,
}

#[async_trait(?Send)]
impl Splitter for RouterSplitter {
    async fn split(&mut self, msg: Message) -> Result<BTreeMap<PortName, Message>, Error> {
        let port = self
            .rules
            .iter()
            .find(|rule| msg.get(&rule.field) == Some(&rule.equals))
            .map(|rule| PortName::from(rule.port.clone()))
            .unwrap_or_else(|| self.default_port.clone());
        let mut out = BTreeMap::new();
        let _ = out.insert(port, msg);
        Ok(out)
    }
}

/// Builds a Router component.
pub fn instantiate_router(def: &ComponentDefinition) -> Result<Instantiated, RecipeError> {
    let config: RouterConfig = parse_config(def)?;
    let splitter = RouterSplitter {
        rules: config.rules,
        default_port: PortName::from(config.default_port),
    };
    Ok(Instantiated {
        component: base_component(def, Primitive::Splitter(Box::new(splitter)), None),
        ingress: None,
    })
}
