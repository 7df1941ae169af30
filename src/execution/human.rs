//! Human interaction channel
//!
//! The engine only hands [`HumanInteractionRequest`]s off; deciding how they
//! reach a person (UI, queue, prompt) is up to the handler.

use crate::core::human::HumanInteractionRequest;
use async_trait::async_trait;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Receives requests emitted when an execution suspends
#[async_trait]
pub trait HumanInteractionHandler: Send + Sync {
    async fn request_input(&self, request: HumanInteractionRequest);
}

/// Logs requests and otherwise drops them
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingHumanHandler;

#[async_trait]
impl HumanInteractionHandler for LoggingHumanHandler {
    async fn request_input(&self, request: HumanInteractionRequest) {
        info!(
            "Execution {} awaiting human input at step {}: {}",
            request.execution_id, request.step_id, request.prompt
        );
    }
}

/// Forwards requests onto an unbounded tokio channel
#[derive(Debug, Clone)]
pub struct ChannelHumanHandler {
    sender: mpsc::UnboundedSender<HumanInteractionRequest>,
}

impl ChannelHumanHandler {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<HumanInteractionRequest>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

#[async_trait]
impl HumanInteractionHandler for ChannelHumanHandler {
    async fn request_input(&self, request: HumanInteractionRequest) {
        let execution_id = request.execution_id;
        if self.sender.send(request).is_err() {
            warn!(
                "Human interaction receiver dropped; request for execution {} lost",
                execution_id
            );
        }
    }
}
