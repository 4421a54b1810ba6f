// SPDX-License-Identifier: Apache-2.0

//! Source recipes: APIEndpoint and WebSocket.

use crate::logic::{base_component, parse_config};
use crate::{ComponentDefinition, Instantiated, RecipeError};
use autocoder_df_engine::component::SourceContext;
use autocoder_df_engine::envelope::ErrorEnvelope;
use autocoder_df_engine::error::Error;
use autocoder_df_engine::ingress::{
    IngressDecision, IngressQueue, IngressRequest, ingress_channel,
};
use autocoder_df_engine::message::Message;
use autocoder_df_engine::primitive::{Primitive, Source};
use async_trait::async_trait;
use http::StatusCode;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

#[derive(Deserialize)]
struct ApiEndpointConfig {
    #[serde(default = "default_success_status")]
    success_status: u16,
    #[serde(default = "default_ingress_capacity")]
    ingress_capacity: usize,
}

fn default_success_status() -> u16 {
    202
}

fn default_ingress_capacity() -> usize {
    64
}

/// HTTP-style ingress source: accepts submitted requests, forwards them into
/// the pipeline, and answers 202 on enqueue or 503 (with a `Retry-After`
/// hint) when the bounded wait on the OUT port expires.
pub struct ApiEndpointSource {
    queue: IngressQueue,
    success_status: StatusCode,
}

async fn serve_request(
    ctx: &mut SourceContext<'_>,
    request: IngressRequest,
    success_status: StatusCode,
) -> Result<(), Error> {
    let IngressRequest { msg, reply } = request;
    match ctx.emit(msg).await {
        Ok(()) => {
            let _ = reply.send(IngressDecision::accepted(success_status));
            Ok(())
        }
        Err(Error::SendTimeout { timeout_ms, .. }) => {
            ctx.metrics().ingress_503_total.inc();
            let _ = reply.send(IngressDecision::rejected(timeout_ms));
            Ok(())
        }
        Err(error @ Error::SchemaViolation { .. }) => {
            ErrorEnvelope::from_error(ctx.component(), None, &error, None).emit();
            let _ = reply.send(IngressDecision::invalid());
            Ok(())
        }
        Err(error) => Err(error),
    }
}

#[async_trait(?Send)]
impl Source for ApiEndpointSource {
    async fn produce(&mut self, ctx: &mut SourceContext<'_>) -> Result<(), Error> {
        while let Some(request) = self.queue.next().await {
            serve_request(ctx, request, self.success_status).await?;
        }
        Ok(())
    }
}

/// Builds an [`ApiEndpointSource`] component and its ingress handle.
pub fn instantiate_api_endpoint(def: &ComponentDefinition) -> Result<Instantiated, RecipeError> {
    let config: ApiEndpointConfig = parse_config(def)?;
    let success_status =
        StatusCode::from_u16(config.success_status).map_err(|e| RecipeError::InvalidConfig {
            recipe: def.recipe.clone(),
            error: format!("invalid success_status: {e}"),
        })?;
    let (handle, queue) = ingress_channel(&def.name, config.ingress_capacity.max(1));
    let source = ApiEndpointSource {
        queue,
        success_status,
    };
    Ok(Instantiated {
        component: base_component(def, Primitive::Source(Box::new(source)), None),
        ingress: Some(handle),
    })
}

#[derive(Deserialize)]
struct WebSocketConfig {
    #[serde(default = "default_heartbeat_ms")]
    heartbeat_ms: u64,
    #[serde(default = "default_ingress_capacity")]
    ingress_capacity: usize,
}

fn default_heartbeat_ms() -> u64 {
    5_000
}

/// WebSocket-style source: emits a heartbeat frame at a fixed interval and
/// relays frames injected through the ingress handle.
pub struct WebSocketSource {
    heartbeat: Duration,
    queue: IngressQueue,
}

#[async_trait(?Send)]
impl Source for WebSocketSource {
    async fn produce(&mut self, ctx: &mut SourceContext<'_>) -> Result<(), Error> {
        let queue = &mut self.queue;
        let mut seq = 0u64;
        let mut ticker = tokio::time::interval(self.heartbeat);
        // The interval's first tick fires immediately; skip it.
        let _ = ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    seq += 1;
                    let Some(frame) = Message::from_value(json!({
                        "type": "heartbeat",
                        "seq": seq,
                    })) else {
                        continue;
                    };
                    ctx.emit(frame).await?;
                }
                request = queue.next() => match request {
                    Some(request) => {
                        serve_request(ctx, request, StatusCode::ACCEPTED).await?;
                    }
                    // Handle dropped: the socket is gone; end the stream.
                    None => break,
                },
            }
        }
        Ok(())
    }
}

/// Builds a [`WebSocketSource`] component and its frame-injection handle.
pub fn instantiate_websocket(def: &ComponentDefinition) -> Result<Instantiated, RecipeError> {
    let config: WebSocketConfig = parse_config(def)?;
    let (handle, queue) = ingress_channel(&def.name, config.ingress_capacity.max(1));
    let source = WebSocketSource {
        heartbeat: Duration::from_millis(config.heartbeat_ms.max(1)),
        queue,
    };
    Ok(Instantiated {
        component: base_component(def, Primitive::Source(Box::new(source)), None),
        ingress: Some(handle),
    })
}
