//! Deterministic command nonce generator.
//!
//! Controller and pod both run this generator from the pod's lot number and
//! serial (`tid`). Every nonce-bearing command consumes one value; when the
//! two sides drift, the pod answers with a 16-bit sync word and both sides
//! rebuild the table from a new seed.
//!
//! Table layout:
//! ```text
//! [ t0 | t1 | n0 n1 ... n15 ]
//!   └──┴── generator registers    └── 16 nonce slots, indexed by `idx`
//! ```

use serde::{Deserialize, Serialize};

const TABLE_SIZE: usize = 18;
const SLOT_COUNT: usize = 16;

/// CRC-16 (polynomial 0x8005, MSB first) lookup table.
///
/// Used for the message trailer and for nonce resynchronization.
pub const CRC16_TABLE: [u16; 256] = build_crc16_table();

const fn build_crc16_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u16) << 8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x8005
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Compute the message CRC-16 over `data`.
pub fn crc16(data: &[u8]) -> u16 {
    data.iter().fold(0u16, |acc, &byte| {
        (acc >> 8) ^ CRC16_TABLE[((acc ^ u16::from(byte)) & 0xff) as usize]
    })
}

/// Nonce generator state for one pod.
///
/// The sequence is a pure function of `(lot, tid, seed)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NonceState {
    lot: u32,
    tid: u32,
    table: [u32; TABLE_SIZE],
    idx: u8,
}

impl NonceState {
    /// Build a fresh generator.
    ///
    /// # Arguments
    /// * `lot` - Pod lot number
    /// * `tid` - Pod serial number
    /// * `seed` - 16-bit seed; zero for a freshly paired pod
    pub fn new(lot: u32, tid: u32, seed: u16) -> Self {
        let mut table = [0u32; TABLE_SIZE];
        table[0] = (lot & 0xFFFF)
            .wrapping_add(lot >> 16)
            .wrapping_add(0x5554_3DC3)
            .wrapping_add(u32::from(seed & 0xFF));
        table[1] = (tid & 0xFFFF)
            .wrapping_add(tid >> 16)
            .wrapping_add(0xAAAA_E44E)
            .wrapping_add(u32::from((seed & 0xFF00) >> 8));

        let mut state = Self {
            lot,
            tid,
            table,
            idx: 0,
        };
        for slot in 0..SLOT_COUNT {
            state.table[2 + slot] = state.generate();
        }
        state.idx = (state.table[0].wrapping_add(state.table[1]) & 0x0F) as u8;
        state
    }

    /// Pod lot number this generator was seeded with.
    pub fn lot(&self) -> u32 {
        self.lot
    }

    /// Pod serial number this generator was seeded with.
    pub fn tid(&self) -> u32 {
        self.tid
    }

    /// The nonce the next nonce-bearing command must carry.
    pub fn current(&self) -> u32 {
        self.table[2 + usize::from(self.idx)]
    }

    /// Consume the current nonce.
    ///
    /// Regenerates the consumed slot and picks the next slot from the low
    /// nibble of the nonce just used.
    pub fn advance(&mut self) {
        let used = self.current();
        self.table[2 + usize::from(self.idx)] = self.generate();
        self.idx = (used & 0x0F) as u8;
    }

    /// Rebuild the table after the pod rejected a nonce.
    ///
    /// # Arguments
    /// * `sync_word` - Resync key from the pod's bad-nonce error
    /// * `sent_nonce` - Nonce carried by the rejected command
    /// * `message_seq` - Sequence number of the rejected message
    pub fn resync(&mut self, sync_word: u16, sent_nonce: u32, message_seq: u8) {
        let sum = (sent_nonce & 0xFFFF)
            .wrapping_add(u32::from(CRC16_TABLE[usize::from(message_seq)]))
            .wrapping_add(self.lot & 0xFFFF)
            .wrapping_add(self.tid & 0xFFFF);
        let seed = (sum & 0xFFFF) as u16 ^ sync_word;
        *self = Self::new(self.lot, self.tid, seed);
    }

    fn generate(&mut self) -> u32 {
        self.table[0] = (self.table[0] >> 16).wrapping_add((self.table[0] & 0xFFFF).wrapping_mul(0x5D7F));
        self.table[1] = (self.table[1] >> 16).wrapping_add((self.table[1] & 0xFFFF).wrapping_mul(0x8CA0));
        self.table[1].wrapping_add((self.table[0] & 0xFFFF) << 16)
    }
}
