//! Versioned storage format for [`PodState`].
//!
//! The record is wrapped in an envelope carrying its schema version:
//!
//! ```json
//! { "version": 2, "pod": { "address": 385875969, ... } }
//! ```
//!
//! Older versions are migrated forward on load, one step at a time.
//!
//! | Version | Change                                                        |
//! |---------|---------------------------------------------------------------|
//! | 1       | initial format                                                |
//! | 2       | `message_transport_state.eap_seq` and `insulin_type` added    |

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::core::{PersistError, CK_SIZE, NONCE_PREFIX_SIZE};
use crate::pod::{InsulinType, PodState};
use crate::transport::MessageTransportState;

/// Schema version written by this build.
pub const CURRENT_VERSION: u32 = 2;

/// A stored pod record with its schema version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedPodState {
    /// Schema version of `pod`.
    pub version: u32,
    /// The record, in the shape of `version`.
    pub pod: Value,
}

impl PersistedPodState {
    /// Wrap `state` in the current format.
    pub fn new(state: &PodState) -> Result<Self, PersistError> {
        Ok(Self {
            version: CURRENT_VERSION,
            pod: serde_json::to_value(state)?,
        })
    }

    /// Migrate to the current format and decode.
    pub fn into_pod_state(self) -> Result<PodState, PersistError> {
        let pod = match self.version {
            1 => {
                info!("migrating pod state from version 1");
                migrate_v1(serde_json::from_value(self.pod)?)?
            }
            CURRENT_VERSION => self.pod,
            version => return Err(PersistError::UnsupportedVersion(version)),
        };
        Ok(serde_json::from_value(pod)?)
    }
}

/// Encode `state` as JSON in the current format.
pub fn to_json(state: &PodState) -> Result<String, PersistError> {
    let json = serde_json::to_string(&PersistedPodState::new(state)?)?;
    debug!(bytes = json.len(), "pod state encoded");
    Ok(json)
}

/// Decode a stored record of any supported version.
pub fn from_json(json: &str) -> Result<PodState, PersistError> {
    let persisted: PersistedPodState = serde_json::from_str(json)?;
    persisted.into_pod_state()
}

/// Version 1 transport counters: no EAP sequence yet.
#[derive(Debug, Clone, Deserialize)]
struct TransportStateV1 {
    ck: [u8; CK_SIZE],
    nonce_prefix: [u8; NONCE_PREFIX_SIZE],
    msg_seq: u8,
    nonce_seq: u64,
    message_number: u8,
}

/// Version 1 pod record. Only the parts that changed are typed.
#[derive(Debug, Clone, Deserialize)]
struct PodStateV1 {
    message_transport_state: TransportStateV1,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

// Sessions before version 2 always used EAP sequence 1; the insulin was
// not recorded and the app only supported Novolog.
fn migrate_v1(v1: PodStateV1) -> Result<Value, PersistError> {
    let transport = v1.message_transport_state;
    let transport = MessageTransportState {
        ck: transport.ck,
        nonce_prefix: transport.nonce_prefix,
        msg_seq: transport.msg_seq,
        nonce_seq: transport.nonce_seq,
        message_number: transport.message_number,
        eap_seq: 1,
    };

    let mut pod = v1.rest;
    pod.insert("message_transport_state".into(), serde_json::to_value(transport)?);
    pod.entry("insulin_type")
        .or_insert(serde_json::to_value(InsulinType::Novolog)?);
    Ok(Value::Object(pod))
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use super::*;
    use crate::pod::{SetupProgress, UnfinalizedDose, ScheduledCertainty};

    fn sample_state() -> PodState {
        let now = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let transport = MessageTransportState::new_session([3; CK_SIZE], [4; NONCE_PREFIX_SIZE], 6, 5);
        let mut state = PodState::new(
            0x1700_0001,
            "4.10.0".into(),
            "2.7.0".into(),
            0xA10B,
            0x000C_0FFE,
            [9; 16],
            transport,
            InsulinType::Humalog,
            now,
        );
        state.setup_progress = SetupProgress::Completed;
        state.activated_at = Some(now);
        state.advance_to_next_nonce();
        state.unfinalized_bolus = Some(UnfinalizedDose::bolus(
            1.5,
            now,
            ScheduledCertainty::Uncertain,
            InsulinType::Humalog,
            true,
        ));
        state
    }

    #[test]
    fn test_round_trip() {
        let state = sample_state();
        let json = to_json(&state).unwrap();
        assert!(json.starts_with("{\"version\":2,"));

        let restored = from_json(&json).unwrap();
        assert_eq!(restored, state);
        assert_eq!(restored.current_nonce(), state.current_nonce());
    }

    #[test]
    fn test_migrate_v1() {
        let state = sample_state();
        let mut pod = serde_json::to_value(&state).unwrap();
        let object = pod.as_object_mut().unwrap();
        object.remove("insulin_type");
        object["message_transport_state"]
            .as_object_mut()
            .unwrap()
            .remove("eap_seq");
        let json = serde_json::to_string(&PersistedPodState { version: 1, pod }).unwrap();

        let restored = from_json(&json).unwrap();
        assert_eq!(restored.message_transport_state.eap_seq, 1);
        assert_eq!(restored.message_transport_state.message_number, 6);
        assert_eq!(restored.insulin_type, InsulinType::Novolog);
        assert_eq!(restored.unfinalized_bolus, state.unfinalized_bolus);
        assert_eq!(restored.ltk, state.ltk);
    }

    #[test]
    fn test_unsupported_version() {
        let json = r#"{"version":3,"pod":{}}"#;
        assert!(matches!(from_json(json), Err(PersistError::UnsupportedVersion(3))));
    }

    #[test]
    fn test_malformed_record() {
        assert!(matches!(from_json("{\"version\":2}"), Err(PersistError::Json(_))));
        assert!(matches!(
            from_json(r#"{"version":2,"pod":{"address":1}}"#),
            Err(PersistError::Json(_))
        ));
    }
}
