//! Chat room semantics on top of a hub.
//!
//! Clients send plain text. `/name <nick>` renames the sender; anything else
//! is relayed to every other member as a JSON [`ChatEvent`].

use relay::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Worker attribute holding the member's nickname.
pub const NAME_ATTRIBUTE: &str = "name";

const NAME_COMMAND: &str = "/name ";
const MAX_NAME_LEN: usize = 32;

/// What members receive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// A member said something.
    Message {
        /// Sender nickname.
        from: String,
        /// Message text.
        text: String,
    },
    /// A member changed their nickname.
    Renamed {
        /// Previous nickname.
        from: String,
        /// New nickname.
        to: String,
    },
}

/// Display name of a worker: its nickname, or a short form of its ID.
pub fn display_name(worker: &Worker) -> String {
    worker.attribute(NAME_ATTRIBUTE).unwrap_or_else(|| {
        let id = worker.id().to_string();
        format!("guest-{}", &id[id.len().saturating_sub(6)..])
    })
}

/// Hub handler for the chat room.
pub async fn on_message(hub: Hub, envelope: Envelope) {
    let Some(text) = envelope.as_text() else {
        debug!(connection_id = %envelope.connection_id(), "ignoring binary frame");
        return;
    };
    let sender = envelope.worker();
    let from = display_name(sender);

    let event = match text.strip_prefix(NAME_COMMAND).map(str::trim) {
        Some(name) if !name.is_empty() && name.len() <= MAX_NAME_LEN => {
            sender.set_attribute(NAME_ATTRIBUTE, name);
            ChatEvent::Renamed {
                from,
                to: name.to_string(),
            }
        }
        Some(_) => {
            let _ = sender
                .write_text(format!("names must be 1-{MAX_NAME_LEN} characters"))
                .await;
            return;
        }
        None => ChatEvent::Message {
            from,
            text: text.to_string(),
        },
    };

    match Message::from_json(&event) {
        Ok(message) => {
            let recipients = hub.broadcast(message, Some(sender));
            debug!(connection_id = %sender.id(), recipients, "relayed chat event");
        }
        Err(e) => warn!(error = %e, "failed to encode chat event"),
    }
}
