//! Genre preset catalog
//!
//! Static table mapping a genre id to the values the mastering chain ramps
//! towards. The catalog is read-only after construction and cheap to clone.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;
use tracing::warn;

/// Genre used when an unknown id is requested
pub const DEFAULT_GENRE: &str = "general";

/// Errors from preset lookup and validation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum PresetError {
    #[error("unknown genre: {0}")]
    UnknownGenre(String),
    #[error("invalid preset for {genre}: {reason}")]
    Invalid { genre: String, reason: String },
}

/// Compressor stage settings
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompressionSettings {
    pub threshold_db: f64,
    /// Input:output ratio, at least 1
    pub ratio: f64,
    pub attack_s: f64,
    pub release_s: f64,
}

/// Linear multipliers for the three EQ bands
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EqMultipliers {
    pub low_mult: f64,
    pub mid_mult: f64,
    pub high_mult: f64,
}

impl EqMultipliers {
    /// Band gains in dB: `[low, mid, high]`
    pub fn gains_db(&self) -> [f64; 3] {
        [
            mult_to_db(self.low_mult),
            mult_to_db(self.mid_mult),
            mult_to_db(self.high_mult),
        ]
    }
}

#[inline]
fn mult_to_db(mult: f64) -> f64 {
    20.0 * mult.log10()
}

/// Mastering targets for one genre
#[derive(Debug, Clone, PartialEq)]
pub struct GenrePreset {
    /// Display name
    pub name: &'static str,
    /// Linear output multiplier
    pub gain: f64,
    pub compression: CompressionSettings,
    pub eq: EqMultipliers,
    /// Limiter ceiling in dBFS
    pub true_peak_db: f64,
    /// Informational integrated loudness target
    pub target_lufs: f64,
}

impl GenrePreset {
    /// Output gain in dB
    pub fn gain_db(&self) -> f64 {
        mult_to_db(self.gain)
    }

    /// Check the invariants every catalog entry must hold
    pub fn validate(&self, genre: &str) -> Result<(), PresetError> {
        let invalid = |reason: &str| {
            Err(PresetError::Invalid {
                genre: genre.to_string(),
                reason: reason.to_string(),
            })
        };
        let c = &self.compression;
        let values = [
            self.gain,
            c.threshold_db,
            c.ratio,
            c.attack_s,
            c.release_s,
            self.eq.low_mult,
            self.eq.mid_mult,
            self.eq.high_mult,
            self.true_peak_db,
            self.target_lufs,
        ];
        if values.iter().any(|v| !v.is_finite()) {
            return invalid("non-finite value");
        }
        if self.gain <= 0.0 {
            return invalid("gain must be positive");
        }
        if c.ratio < 1.0 {
            return invalid("compression ratio must be at least 1");
        }
        if c.attack_s < 0.0 || c.release_s < 0.0 {
            return invalid("attack and release must not be negative");
        }
        if self.eq.low_mult <= 0.0 || self.eq.mid_mult <= 0.0 || self.eq.high_mult <= 0.0 {
            return invalid("EQ multipliers must be positive");
        }
        if self.true_peak_db > 0.0 {
            return invalid("true peak ceiling must be at or below 0 dBFS");
        }
        Ok(())
    }
}

/// Normalize a genre id for lookup: trimmed, lowercase, `-` separated
pub fn normalize_genre_id(genre_id: &str) -> String {
    genre_id
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c == '_' || c.is_whitespace() { '-' } else { c })
        .collect()
}

#[allow(clippy::too_many_arguments)]
const fn preset(
    name: &'static str,
    gain: f64,
    threshold_db: f64,
    ratio: f64,
    attack_s: f64,
    release_s: f64,
    eq: [f64; 3],
    true_peak_db: f64,
    target_lufs: f64,
) -> GenrePreset {
    GenrePreset {
        name,
        gain,
        compression: CompressionSettings {
            threshold_db,
            ratio,
            attack_s,
            release_s,
        },
        eq: EqMultipliers {
            low_mult: eq[0],
            mid_mult: eq[1],
            high_mult: eq[2],
        },
        true_peak_db,
        target_lufs,
    }
}

/// Built-in genre table
#[rustfmt::skip]
const BUILTIN: &[(&str, GenrePreset)] = &[
    // General purpose, tuned for afrobeats-style material
    ("general", preset("General", 1.15, -18.0, 3.0, 0.003, 0.25, [1.2, 1.0, 1.1], -1.0, -14.0)),
    ("afrobeats", preset("Afrobeats", 1.15, -18.0, 3.0, 0.003, 0.25, [1.2, 1.0, 1.1], -1.0, -14.0)),
    ("amapiano", preset("Amapiano", 1.2, -16.0, 3.5, 0.003, 0.2, [1.35, 0.95, 1.1], -1.0, -11.0)),
    ("hip-hop", preset("Hip-Hop", 1.2, -16.0, 4.0, 0.005, 0.2, [1.3, 0.95, 1.05], -1.0, -12.0)),
    ("pop", preset("Pop", 1.1, -20.0, 2.5, 0.003, 0.25, [1.05, 1.05, 1.15], -1.0, -14.0)),
    ("rnb", preset("R&B", 1.1, -18.0, 2.5, 0.005, 0.3, [1.2, 1.0, 1.1], -1.0, -13.0)),
    ("rock", preset("Rock", 1.1, -18.0, 3.0, 0.01, 0.3, [1.1, 1.1, 1.05], -1.0, -13.0)),
    ("electronic", preset("Electronic", 1.25, -14.0, 4.0, 0.002, 0.15, [1.3, 0.95, 1.2], -0.8, -10.0)),
    ("reggae", preset("Reggae", 1.1, -18.0, 3.0, 0.005, 0.25, [1.25, 0.95, 1.0], -1.0, -14.0)),
    ("gospel", preset("Gospel", 1.1, -18.0, 2.5, 0.008, 0.3, [1.1, 1.05, 1.1], -1.0, -14.0)),
    ("country", preset("Country", 1.05, -20.0, 2.5, 0.01, 0.3, [1.05, 1.1, 1.1], -1.0, -14.0)),
    ("jazz", preset("Jazz", 1.0, -24.0, 1.5, 0.02, 0.4, [1.0, 1.0, 1.05], -1.5, -18.0)),
    ("classical", preset("Classical", 1.0, -28.0, 1.2, 0.03, 0.5, [1.0, 1.0, 1.0], -2.0, -20.0)),
];

/// Read-only genre → preset table
#[derive(Debug, Clone)]
pub struct PresetCatalog {
    presets: Arc<BTreeMap<String, GenrePreset>>,
}

impl Default for PresetCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

impl PresetCatalog {
    /// Catalog with the built-in genre table
    pub fn builtin() -> Self {
        let presets = BUILTIN
            .iter()
            .map(|(id, preset)| (id.to_string(), preset.clone()))
            .collect();
        Self {
            presets: Arc::new(presets),
        }
    }

    /// Build a catalog from custom entries, validating each one.
    /// The entries must include [`DEFAULT_GENRE`].
    pub fn from_entries<I>(entries: I) -> Result<Self, PresetError>
    where
        I: IntoIterator<Item = (String, GenrePreset)>,
    {
        let mut presets = BTreeMap::new();
        for (id, preset) in entries {
            let id = normalize_genre_id(&id);
            preset.validate(&id)?;
            presets.insert(id, preset);
        }
        if !presets.contains_key(DEFAULT_GENRE) {
            return Err(PresetError::UnknownGenre(DEFAULT_GENRE.to_string()));
        }
        Ok(Self {
            presets: Arc::new(presets),
        })
    }

    /// Look up a genre
    pub fn resolve(&self, genre_id: &str) -> Result<GenrePreset, PresetError> {
        let id = normalize_genre_id(genre_id);
        self.presets
            .get(&id)
            .cloned()
            .ok_or(PresetError::UnknownGenre(id))
    }

    /// Look up a genre, falling back to the default preset for unknown ids
    pub fn resolve_or_default(&self, genre_id: &str) -> GenrePreset {
        match self.resolve(genre_id) {
            Ok(preset) => preset,
            Err(e) => {
                warn!(error = %e, fallback = DEFAULT_GENRE, "using default preset");
                self.default_preset()
            }
        }
    }

    /// The fallback preset
    pub fn default_preset(&self) -> GenrePreset {
        self.presets
            .get(DEFAULT_GENRE)
            .cloned()
            .unwrap_or_else(|| BUILTIN[0].1.clone())
    }

    /// Known genre ids, sorted
    pub fn genres(&self) -> impl Iterator<Item = &str> {
        self.presets.keys().map(String::as_str)
    }

    pub fn contains(&self, genre_id: &str) -> bool {
        self.presets.contains_key(&normalize_genre_id(genre_id))
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }
}
