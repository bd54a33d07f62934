//! Meter values handed to the display layer

/// Lowest value any dB meter field may take
pub const DB_FLOOR: f64 = -70.0;

/// Highest value any dB meter field may take
pub const DB_CEILING: f64 = 0.0;

/// Clamp a dB value into the displayable range, mapping NaN to the floor
#[inline]
pub fn clamp_db(db: f64) -> f64 {
    if db.is_nan() {
        DB_FLOOR
    } else {
        db.clamp(DB_FLOOR, DB_CEILING)
    }
}

/// Share of spectral energy per band, in percent (0-100)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrequencyBands {
    pub bass: f64,
    pub mid: f64,
    pub high: f64,
}

impl FrequencyBands {
    pub fn total(&self) -> f64 {
        self.bass + self.mid + self.high
    }
}

/// One metering tick worth of values
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeterReading {
    pub rms_db: f64,
    pub peak_db: f64,
    /// Smoothed loudness while playing; see [`crate::LiveMeter`] for how
    /// this differs from the gated offline measurement.
    pub integrated_lufs: f64,
    /// Phase correlation between left and right, in `[-1, 1]`
    pub stereo_correlation: f64,
    pub frequency_bands: FrequencyBands,
}

impl Default for MeterReading {
    fn default() -> Self {
        Self::silent()
    }
}

impl MeterReading {
    /// Reading of a silent signal
    pub fn silent() -> Self {
        Self {
            rms_db: DB_FLOOR,
            peak_db: DB_FLOOR,
            integrated_lufs: DB_FLOOR,
            stereo_correlation: 0.0,
            frequency_bands: FrequencyBands::default(),
        }
    }

    /// Return a copy with every dB field clamped to `[-70, 0]`
    /// and the correlation clamped to `[-1, 1]`
    pub fn clamped(self) -> Self {
        let corr = if self.stereo_correlation.is_nan() {
            0.0
        } else {
            self.stereo_correlation.clamp(-1.0, 1.0)
        };
        Self {
            rms_db: clamp_db(self.rms_db),
            peak_db: clamp_db(self.peak_db),
            integrated_lufs: clamp_db(self.integrated_lufs),
            stereo_correlation: corr,
            frequency_bands: self.frequency_bands,
        }
    }
}
