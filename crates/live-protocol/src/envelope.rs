//! The `{ action, user_id, data }` envelope carried in both directions.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::LiveError;
use crate::{Action, UserId};

/// One protocol message.
///
/// Inbound, `user_id` is optional and only cross-checked against the
/// connection identity. Outbound, it names the user the event is about
/// (the writer of a code change, the participant who joined, ...).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub action: Action,
    #[serde(default)]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub data: Option<Value>,
}

impl Envelope {
    pub fn new(action: Action, data: Option<Value>) -> Self {
        Self {
            action,
            user_id: None,
            data,
        }
    }

    pub fn with_user(mut self, user_id: impl Into<UserId>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Build an outbound event from a typed payload.
    pub fn event<T: Serialize>(action: Action, payload: &T) -> Self {
        // Payload types are plain structs with string keys; serializing them
        // into a Value cannot fail, but a null body is still a valid event.
        Self::new(action, serde_json::to_value(payload).ok())
    }

    /// `ERROR` reply describing `error`, tagged with the offending action.
    pub fn error(error: &LiveError, action: Option<Action>) -> Self {
        Self::event(Action::Error, &error.to_payload(action))
    }

    /// Decode a text frame.
    pub fn parse(text: &str) -> Result<Self, LiveError> {
        serde_json::from_str(text).map_err(|e| LiveError::malformed(e.to_string()))
    }

    /// Decode `data` into the payload type of this action.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, LiveError> {
        let data = self.data.clone().unwrap_or(Value::Null);
        serde_json::from_value(data)
            .map_err(|e| LiveError::malformed(format!("invalid {} payload: {e}", self.action)))
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
