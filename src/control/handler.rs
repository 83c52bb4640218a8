use tracing::{debug, warn};

use super::is_control_message;
use super::protocol::{ControlRequest, decode_request};
use crate::codec::EncodedMessage;
use crate::handler::MessageHandler;
use crate::utils::error::RelayResult;

type RequestAction = Box<dyn Fn(&ControlRequest) -> RelayResult<()> + Send + Sync>;

/// Recognizes control records and hands each decoded request to `action`.
///
/// Non-control records always pass. A control record passes only when the
/// handler was built with `forward` set.
pub struct ControlMessageHandler {
    forward: bool,
    action: RequestAction,
}

impl ControlMessageHandler {
    pub fn new<F>(forward: bool, action: F) -> Self
    where
        F: Fn(&ControlRequest) -> RelayResult<()> + Send + Sync + 'static,
    {
        Self {
            forward,
            action: Box::new(action),
        }
    }

    pub fn forwards(&self) -> bool {
        self.forward
    }
}

impl MessageHandler for ControlMessageHandler {
    fn handle(&self, message: &EncodedMessage) -> bool {
        if !is_control_message(message) {
            return true;
        }
        match decode_request(message) {
            Ok(Some(request)) => {
                debug!("Control request {:?}", request);
                if let Err(e) = (self.action)(&request) {
                    warn!("Failed to apply control request {:?}: {}", request, e);
                }
            }
            Ok(None) => debug!("Ignoring control message without an endpoint"),
            Err(e) => warn!("Invalid message transmitted to relay control queue: {}", e),
        }
        self.forward
    }
}
