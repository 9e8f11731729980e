//! Protocol and pod constants.
//!
//! The physical constants are reported back by the pod during setup and are
//! checked against these values; a mismatch makes the pod incompatible.

use std::time::Duration;

// =============================================================================
// PHYSICAL POD CONSTANTS
// =============================================================================

/// Volume of a single pump pulse, in units of insulin.
pub const PULSE_SIZE: f64 = 0.05;

/// Pulses per unit of insulin.
pub const PULSES_PER_UNIT: f64 = 1.0 / PULSE_SIZE;

/// Seconds between pulses of a normal bolus.
pub const SECONDS_PER_BOLUS_PULSE: f64 = 2.0;

/// Seconds between pulses of the prime and cannula insertion boluses.
pub const SECONDS_PER_PRIME_PULSE: f64 = 1.0;

/// Bolus delivery rate in units per second.
pub const BOLUS_DELIVERY_RATE: f64 = PULSE_SIZE / SECONDS_PER_BOLUS_PULSE;

/// Prime delivery rate in units per second.
pub const PRIME_DELIVERY_RATE: f64 = PULSE_SIZE / SECONDS_PER_PRIME_PULSE;

/// Units delivered by the prime bolus.
pub const PRIME_UNITS: f64 = 2.6;

/// Units delivered by the cannula insertion bolus.
pub const CANNULA_INSERTION_UNITS: f64 = 0.5;

/// Additional units added on top of the cannula insertion bolus.
pub const CANNULA_INSERTION_UNITS_EXTRA: f64 = 0.0;

/// Largest reservoir reading the pod reports exactly.
pub const MAX_RESERVOIR_READING: f64 = 50.0;

/// Reservoir value the pod reports when more than 50 U remain.
pub const RESERVOIR_LEVEL_ABOVE_THRESHOLD_MAGIC_NUMBER: f64 = 51.15;

/// Maximum units accepted for a single bolus.
pub const MAX_BOLUS: f64 = 30.0;

/// Maximum temp basal rate in units per hour.
pub const MAX_TEMP_BASAL_RATE: f64 = 30.0;

// =============================================================================
// POD LIFETIME
// =============================================================================

/// Hard limit of pod service, after which the pod faults.
pub const SERVICE_DURATION: Duration = Duration::from_secs(80 * 60 * 60);

/// Nominal pod life.
pub const NOMINAL_POD_LIFE: Duration = Duration::from_secs(72 * 60 * 60);

/// Window before the end of service in which shutdown is imminent.
pub const END_OF_SERVICE_IMMINENT_WINDOW: Duration = Duration::from_secs(60 * 60);

/// Window after nominal life in which the expiration advisory beeps.
pub const EXPIRATION_ADVISORY_WINDOW: Duration = Duration::from_secs(7 * 60 * 60);

/// Window in which pairing must complete before the pod times out activation.
pub const ACTIVATION_WINDOW: Duration = Duration::from_secs(2 * 60 * 60);

/// Extra time the controller waits beyond the prime bolus duration.
pub const PRIME_EXTRA_WAIT: Duration = Duration::from_secs(3);

/// Offset applied to bolus start times to account for radio and firmware latency.
pub const BOLUS_COMMS_OFFSET: Duration = Duration::from_millis(1500);

// =============================================================================
// ADDRESSING
// =============================================================================

/// Default controller id.
pub const DEFAULT_CONTROLLER_ID: u32 = 0x1700_0000;

/// Broadcast address used by the pairing commands.
pub const PAIRING_ADDRESS: u32 = 0xFFFF_FFFF;

// =============================================================================
// LINE PROTOCOL MARKERS
// =============================================================================

/// Prefix wrapped around every encrypted command.
pub const COMMAND_PREFIX: &str = "S0.0=";

/// Suffix appended to every encrypted command.
pub const COMMAND_SUFFIX: &str = ",G0.0";

/// Prefix the pod puts in front of every response.
pub const RESPONSE_PREFIX: &str = "0.0=";

/// Magic pattern at the start of every packet.
pub const PACKET_MAGIC: &[u8; 2] = b"TW";

/// Packet header size.
pub const PACKET_HEADER_SIZE: usize = 16;

/// Largest payload a packet can describe (11-bit size field).
pub const MAX_PACKET_PAYLOAD: usize = 0x7FF;

// =============================================================================
// CRYPTOGRAPHIC SIZES
// =============================================================================

/// Long-term key size.
pub const LTK_SIZE: usize = 16;

/// Session confidentiality key size.
pub const CK_SIZE: usize = 16;

/// Nonce prefix size (controller IV followed by pod IV).
pub const NONCE_PREFIX_SIZE: usize = 8;

/// Authentication tag appended to every encrypted payload.
pub const AEAD_TAG_SIZE: usize = 16;

/// EAP-AKA style sequence number size on the wire.
pub const EAP_SQN_SIZE: usize = 6;

/// X25519 public key size.
pub const PUBLIC_KEY_SIZE: usize = 32;

/// Pairing nonce size.
pub const PAIRING_NONCE_SIZE: usize = 16;

// =============================================================================
// NONCE DIRECTION
// =============================================================================

/// Nonce direction: controller -> pod.
pub const NONCE_DIR_CONTROLLER: u8 = 0x00;

/// Nonce direction: pod -> controller.
pub const NONCE_DIR_POD: u8 = 0x01;

// =============================================================================
// SESSION POLICY
// =============================================================================

/// Total attempts for one command when the pod reports a bad nonce.
pub const NONCE_RESYNC_ATTEMPTS: usize = 2;
