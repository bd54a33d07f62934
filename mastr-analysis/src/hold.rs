//! Peak-hold display state for meters
//!
//! Each displayed field keeps its value until either the hold window has
//! passed since that field was last replaced, or a reading with a higher
//! level arrives. Level means: larger dB for the dB fields, larger absolute
//! value for correlation, larger dominant share for the frequency bands.
//! The three bands are held together so the display always shows one
//! tick's split.

use crate::reading::{FrequencyBands, MeterReading};

/// Default hold window in milliseconds
pub const DEFAULT_HOLD_MS: u64 = 3000;

const FIELDS: usize = 5;

/// Field order used for the per-field timestamps
#[derive(Clone, Copy)]
enum Field {
    Rms = 0,
    Peak,
    Integrated,
    Correlation,
    Bands,
}

/// Held meter values with their replacement timestamps
#[derive(Debug, Clone)]
pub struct MeterHoldState {
    held: MeterReading,
    /// Time of the most recent replacement of any field
    last_update_ms: u64,
    replaced_at: [Option<u64>; FIELDS],
    hold_ms: u64,
}

impl Default for MeterHoldState {
    fn default() -> Self {
        Self::new(DEFAULT_HOLD_MS)
    }
}

impl MeterHoldState {
    pub fn new(hold_ms: u64) -> Self {
        Self {
            held: MeterReading::silent(),
            last_update_ms: 0,
            replaced_at: [None; FIELDS],
            hold_ms,
        }
    }

    /// Currently displayed values
    pub fn held(&self) -> &MeterReading {
        &self.held
    }

    pub fn last_update_ms(&self) -> u64 {
        self.last_update_ms
    }

    pub fn hold_ms(&self) -> u64 {
        self.hold_ms
    }

    /// Fold a new reading into the display state and return what to show
    pub fn update(&mut self, reading: &MeterReading, now_ms: u64) -> MeterReading {
        let mut held = self.held;

        held.rms_db = self.fold(Field::Rms, held.rms_db, reading.rms_db, now_ms, |v| v);
        held.peak_db = self.fold(Field::Peak, held.peak_db, reading.peak_db, now_ms, |v| v);
        held.integrated_lufs = self.fold(
            Field::Integrated,
            held.integrated_lufs,
            reading.integrated_lufs,
            now_ms,
            |v| v,
        );
        held.stereo_correlation = self.fold(
            Field::Correlation,
            held.stereo_correlation,
            reading.stereo_correlation,
            now_ms,
            f64::abs,
        );

        held.frequency_bands = self.fold(
            Field::Bands,
            held.frequency_bands,
            reading.frequency_bands,
            now_ms,
            dominant_share,
        );

        self.held = held;
        held
    }

    fn fold<T: Copy>(
        &mut self,
        field: Field,
        held: T,
        incoming: T,
        now_ms: u64,
        level: impl Fn(T) -> f64,
    ) -> T {
        let slot = &mut self.replaced_at[field as usize];
        let expired = match *slot {
            None => true,
            Some(at) => now_ms.saturating_sub(at) >= self.hold_ms,
        };

        if expired || level(incoming) > level(held) {
            *slot = Some(now_ms);
            self.last_update_ms = self.last_update_ms.max(now_ms);
            incoming
        } else {
            held
        }
    }

    /// Drop held values, e.g. when a new file is loaded
    pub fn reset(&mut self) {
        *self = Self::new(self.hold_ms);
    }
}

fn dominant_share(bands: FrequencyBands) -> f64 {
    bands.bass.max(bands.mid).max(bands.high)
}
