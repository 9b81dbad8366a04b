//! Invalidation notification payload and callback matching.
//!
//! The payload and the filter are two distinct types: an immutable
//! [`UpdateEvent`] travels on the bus, and an [`UpdatePattern`] is registered
//! alongside a callback to decide which events it receives.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::BusError;

/// Reason code carried in `custom_long1` for an ordinary configuration change.
pub const CONFIG_CHANGE_CODE: i64 = 1111;

/// Reason code carried in `custom_long1` for a change of the elected server.
pub const SERVER_CHANGE_CODE: i64 = 2222;

/// The message carried on the broadcast bus.
///
/// The target fields (`host` through `proc_instance`) are what patterns match
/// against. The custom fields are never matched; they carry cause-specific
/// data to the callbacks — for a config change, the canonical key of the
/// changed value set in `custom_str1`; for a server change, the new leader's
/// URL in `custom_str1`. `custom_long1` holds the reason code.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateEvent {
    /// Target host name.
    pub host: Option<String>,
    /// Target process name.
    pub proc_name: Option<String>,
    /// Target configuration type.
    pub config_type: Option<String>,
    /// Free-form token matched against registration tokens.
    pub callback_token: Option<String>,
    /// Target process types.
    pub proc_types: Vec<u32>,
    /// Target process instance.
    pub proc_instance: Option<u32>,
    /// Custom payload, not matched.
    pub custom_str1: Option<String>,
    /// Custom payload, not matched.
    pub custom_str2: Option<String>,
    /// Reason code by convention; custom payload otherwise. Not matched.
    pub custom_long1: i64,
    /// Custom payload, not matched.
    pub custom_long2: i64,
}

impl UpdateEvent {
    /// Event announcing that the value set behind `key_string` changed.
    pub fn config_change(key_string: impl Into<String>) -> Self {
        Self {
            custom_long1: CONFIG_CHANGE_CODE,
            custom_str1: Some(key_string.into()),
            ..Default::default()
        }
    }

    /// Event announcing that `url` has become the new configuration server.
    pub fn server_change(url: impl Into<String>) -> Self {
        Self {
            custom_long1: SERVER_CHANGE_CODE,
            custom_str1: Some(url.into()),
            ..Default::default()
        }
    }

    /// Whether this event announces a leader change rather than a content
    /// change.
    pub fn is_server_change(&self) -> bool {
        self.custom_long1 == SERVER_CHANGE_CODE
    }
}

/// Filter registered with a callback.
///
/// Every populated field must equal the corresponding event field for the
/// pattern to match; an absent field is a wildcard. String comparisons are
/// case-insensitive. A non-empty `proc_types` matches when every listed type
/// appears in the event's types.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdatePattern {
    pub host: Option<String>,
    pub proc_name: Option<String>,
    pub config_type: Option<String>,
    pub callback_token: Option<String>,
    pub proc_types: Vec<u32>,
    pub proc_instance: Option<u32>,
}

impl UpdatePattern {
    /// The empty pattern; matches every event.
    pub fn any() -> Self {
        Self::default()
    }

    /// Restrict to a target host.
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Restrict to a process name.
    pub fn with_proc_name(mut self, name: impl Into<String>) -> Self {
        self.proc_name = Some(name.into());
        self
    }

    /// Restrict to a configuration type.
    pub fn with_config_type(mut self, config_type: impl Into<String>) -> Self {
        self.config_type = Some(config_type.into());
        self
    }

    /// Restrict to a registration token.
    pub fn with_callback_token(mut self, token: impl Into<String>) -> Self {
        self.callback_token = Some(token.into());
        self
    }

    /// Require the listed process types to be present in the event.
    pub fn with_proc_types(mut self, types: impl Into<Vec<u32>>) -> Self {
        self.proc_types = types.into();
        self
    }

    /// Restrict to a process instance.
    pub fn with_proc_instance(mut self, instance: u32) -> Self {
        self.proc_instance = Some(instance);
        self
    }

    /// Whether this pattern accepts the given event.
    pub fn matches(&self, event: &UpdateEvent) -> bool {
        if !field_matches(&self.host, &event.host) {
            return false;
        }
        if !field_matches(&self.proc_name, &event.proc_name) {
            return false;
        }
        if !field_matches(&self.config_type, &event.config_type) {
            return false;
        }
        if !field_matches(&self.callback_token, &event.callback_token) {
            return false;
        }
        if !self.proc_types.is_empty()
            && !self.proc_types.iter().all(|t| event.proc_types.contains(t))
        {
            return false;
        }
        if let Some(instance) = self.proc_instance {
            if event.proc_instance != Some(instance) {
                return false;
            }
        }
        true
    }
}

fn field_matches(pattern: &Option<String>, event: &Option<String>) -> bool {
    match pattern {
        None => true,
        Some(want) => event
            .as_deref()
            .is_some_and(|have| want.eq_ignore_ascii_case(have)),
    }
}

/// Encode a bus frame. `None` is the generic "reload everything" frame that
/// invokes every callback.
pub(crate) fn encode_frame(event: Option<&UpdateEvent>) -> Result<Bytes, BusError> {
    let data = bincode::serialize(&event)?;
    Ok(Bytes::from(data))
}

/// Decode a bus frame.
pub(crate) fn decode_frame(frame: &[u8]) -> Result<Option<UpdateEvent>, BusError> {
    Ok(bincode::deserialize(frame)?)
}
