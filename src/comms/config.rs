//! Orchestrator configuration and builder.

use std::sync::Arc;

use crate::core::{Clock, MessageCipher, PodChannel, SystemClock, DEFAULT_CONTROLLER_ID};
use crate::pairing::KeyExchange;
use crate::pod::{BeepPreference, PodState};
use crate::session::{PodCommsError, PodCommsResult};

use super::pod_comms::PodComms;

/// Identity and preferences of the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PodCommsConfig {
    /// Controller id.
    pub my_id: u32,

    /// Address the pod is expected to answer from.
    pub pod_id: u32,

    /// When commands should beep.
    pub confirmation_beeps: BeepPreference,

    /// Program alerts silently.
    pub silent_pod: bool,

    /// Seconds east of UTC for the clock set during setup.
    pub utc_offset: i64,
}

impl Default for PodCommsConfig {
    fn default() -> Self {
        Self {
            my_id: DEFAULT_CONTROLLER_ID,
            pod_id: DEFAULT_CONTROLLER_ID + 1,
            confirmation_beeps: BeepPreference::default(),
            silent_pod: false,
            utc_offset: 0,
        }
    }
}

/// Builder for [`PodComms`].
///
/// The channel and key exchange are required. The clock defaults to
/// [`SystemClock`]; the cipher defaults to XChaCha20-Poly1305 when the
/// `crypto` feature is on.
pub struct PodCommsBuilder<C: PodChannel, K: KeyExchange<C>> {
    config: PodCommsConfig,
    pod_id: Option<u32>,
    channel: Option<C>,
    key_exchange: Option<K>,
    cipher: Option<Arc<dyn MessageCipher>>,
    clock: Option<Arc<dyn Clock>>,
    pod_state: Option<PodState>,
}

impl<C: PodChannel, K: KeyExchange<C>> PodCommsBuilder<C, K> {
    /// Create a builder with default configuration.
    pub fn new() -> Self {
        Self {
            config: PodCommsConfig::default(),
            pod_id: None,
            channel: None,
            key_exchange: None,
            cipher: None,
            clock: None,
            pod_state: None,
        }
    }

    /// Set the controller id. The pod id follows it unless set explicitly.
    pub fn my_id(mut self, my_id: u32) -> Self {
        self.config.my_id = my_id;
        self
    }

    /// Set the expected pod address.
    pub fn pod_id(mut self, pod_id: u32) -> Self {
        self.pod_id = Some(pod_id);
        self
    }

    /// Set the beep preference.
    pub fn confirmation_beeps(mut self, preference: BeepPreference) -> Self {
        self.config.confirmation_beeps = preference;
        self
    }

    /// Program alerts silently.
    pub fn silent_pod(mut self, silent: bool) -> Self {
        self.config.silent_pod = silent;
        self
    }

    /// Set the UTC offset, in seconds, for the pod clock.
    pub fn utc_offset(mut self, seconds: i64) -> Self {
        self.config.utc_offset = seconds;
        self
    }

    /// Set the channel to the pod.
    pub fn channel(mut self, channel: C) -> Self {
        self.channel = Some(channel);
        self
    }

    /// Set the pairing and session negotiation implementation.
    pub fn key_exchange(mut self, key_exchange: K) -> Self {
        self.key_exchange = Some(key_exchange);
        self
    }

    /// Set the packet cipher.
    pub fn cipher(mut self, cipher: Arc<dyn MessageCipher>) -> Self {
        self.cipher = Some(cipher);
        self
    }

    /// Set the clock.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Resume a pod paired earlier.
    pub fn pod_state(mut self, pod_state: PodState) -> Self {
        self.pod_state = Some(pod_state);
        self
    }

    /// Build the orchestrator.
    pub fn build(self) -> PodCommsResult<PodComms<C, K>> {
        let mut config = self.config;
        config.pod_id = self.pod_id.unwrap_or(config.my_id.wrapping_add(1));

        let channel = self
            .channel
            .ok_or_else(|| PodCommsError::Config("a pod channel is required".into()))?;
        let key_exchange = self
            .key_exchange
            .ok_or_else(|| PodCommsError::Config("a key exchange is required".into()))?;
        let cipher = match self.cipher {
            Some(cipher) => cipher,
            None => default_cipher()?,
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));

        Ok(PodComms::new(
            config,
            channel,
            key_exchange,
            cipher,
            clock,
            self.pod_state,
        ))
    }
}

impl<C: PodChannel, K: KeyExchange<C>> Default for PodCommsBuilder<C, K> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(feature = "crypto")]
fn default_cipher() -> PodCommsResult<Arc<dyn MessageCipher>> {
    Ok(Arc::new(crate::crypto::ChaChaCipher))
}

#[cfg(not(feature = "crypto"))]
fn default_cipher() -> PodCommsResult<Arc<dyn MessageCipher>> {
    Err(PodCommsError::Config("a message cipher is required".into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = PodCommsConfig::default();
        assert_eq!(config.my_id, 0x1700_0000);
        assert_eq!(config.pod_id, 0x1700_0001);
        assert_eq!(config.confirmation_beeps, BeepPreference::Silent);
        assert!(!config.silent_pod);
    }
}
