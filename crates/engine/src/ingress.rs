// SPDX-License-Identifier: Apache-2.0

//! Ingress boundary contract.
//!
//! An ingress source (APIEndpoint recipe) accepts requests from outside the
//! pipeline and answers with an HTTP-style decision: accepted (202 by
//! default) when the message was enqueued, or a 503 with a `Retry-After`
//! hint when the bounded wait on the OUT port expired. The actual HTTP
//! listener is deployment glue outside the kernel; this module is the
//! contract it drives.

use crate::error::Error;
use crate::message::Message;
use autocoder_df_channel::error::SendError;
use autocoder_df_channel::{OverflowPolicy, mpsc};
use autocoder_df_config::ComponentId;
use http::StatusCode;
use tokio::sync::oneshot;

/// The decision returned to an ingress caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngressDecision {
    /// HTTP-style status code.
    pub status: StatusCode,
    /// `Retry-After` hint in milliseconds, set on 503 rejections.
    pub retry_after_ms: Option<u64>,
}

impl IngressDecision {
    /// The request was enqueued into the pipeline.
    #[must_use]
    pub const fn accepted(status: StatusCode) -> Self {
        Self {
            status,
            retry_after_ms: None,
        }
    }

    /// The pipeline is saturated; the caller should retry later.
    #[must_use]
    pub const fn rejected(retry_after_ms: u64) -> Self {
        Self {
            status: StatusCode::SERVICE_UNAVAILABLE,
            retry_after_ms: Some(retry_after_ms),
        }
    }

    /// The request failed validation and will never be accepted as-is.
    #[must_use]
    pub const fn invalid() -> Self {
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            retry_after_ms: None,
        }
    }

    /// Returns `true` for 2xx decisions.
    #[must_use]
    pub fn is_accepted(&self) -> bool {
        self.status.is_success()
    }
}

/// One in-flight ingress request: the message plus the reply slot.
pub struct IngressRequest {
    /// The submitted message.
    pub msg: Message,
    /// Where the decision is delivered.
    pub reply: oneshot::Sender<IngressDecision>,
}

/// Clonable submission handle given to the external listener.
#[derive(Clone)]
pub struct IngressHandle {
    component: ComponentId,
    tx: mpsc::Sender<IngressRequest>,
}

impl IngressHandle {
    /// Submits a request and awaits the pipeline's decision.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ChannelSendError`] when the ingress source has shut
    /// down.
    pub async fn submit(&self, msg: Message) -> Result<IngressDecision, Error> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = IngressRequest {
            msg,
            reply: reply_tx,
        };
        match self.tx.send(request).await {
            Ok(_) => {}
            Err(SendError::Closed(_)) | Err(SendError::Full(_)) | Err(SendError::Timeout(_)) => {
                return Err(Error::ChannelSendError {
                    component: self.component.clone(),
                    port: "ingress".into(),
                    error: "ingress queue closed".to_owned(),
                });
            }
        }
        reply_rx.await.map_err(|_| Error::ChannelSendError {
            component: self.component.clone(),
            port: "ingress".into(),
            error: "ingress source dropped the request".to_owned(),
        })
    }

    /// Closes the ingress: subsequent submissions fail, and the source's
    /// request loop terminates after draining.
    pub fn close(&self) {
        self.tx.close();
    }
}

/// The source-side queue of pending ingress requests.
pub struct IngressQueue {
    rx: mpsc::Receiver<IngressRequest>,
}

impl IngressQueue {
    /// Receives the next pending request, or `None` once the ingress is
    /// closed and drained.
    pub async fn next(&mut self) -> Option<IngressRequest> {
        self.rx.recv().await.ok()
    }
}

/// Creates the ingress pair for one ingress component.
///
/// The waiting room is intentionally small: admission control happens at the
/// component's OUT port (capacity + overflow policy), not here.
#[must_use]
pub fn ingress_channel(component: &ComponentId, capacity: usize) -> (IngressHandle, IngressQueue) {
    let (tx, rx) = mpsc::Channel::new(capacity, OverflowPolicy::Block);
    (
        IngressHandle {
            component: component.clone(),
            tx,
        },
        IngressQueue { rx },
    )
}
