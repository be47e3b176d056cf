//! Precomputed attenuation and band-limiting tables.
//!
//! The attenuation table maps a 5-bit volume level and a 5-bit waveform
//! sample to a signed amplitude contribution; it is a pure function of the
//! configured gain and the chip revision and is rebuilt whenever the host
//! changes the gain. The band-limiting kernel spreads step discontinuities
//! across seven high-resolution output slots.

use super::Revision;

/// Maps a 4-bit balance nibble to the 5-bit attenuation domain.
pub(crate) const SCALE_TAB: [u8; 16] = [
    0x00, 0x03, 0x05, 0x07, 0x09, 0x0B, 0x0D, 0x0F, 0x10, 0x13, 0x15, 0x17, 0x19, 0x1B, 0x1D, 0x1F,
];

/// 7-tap band-limiting kernel, two rows selected by half-cycle phase.
/// Each row sums to 2048.
pub(crate) const PHASE_FILTER: [[i16; 7]; 2] = [
    [35, 250, 579, 641, 425, 112, 6],
    [6, 112, 425, 641, 579, 250, 35],
];

/// Precomputed attenuation tables.
///
/// `amp[level][sample]` is the signed amplitude a waveform sample produces
/// at a given attenuation level; `vol_only[level]` is the bare volume scale
/// used by the whole-waveform accumulate path.
#[derive(Clone)]
pub struct EnvelopeTable {
    pub(crate) amp: [[i32; 32]; 32],
    pub(crate) vol_only: [i32; 32],
}

impl EnvelopeTable {
    /// Build the tables for a gain and revision.
    ///
    /// Levels 0-30 shrink geometrically, one quarter power of two per step
    /// (about 1.5 dB). Level 31 is forced to exactly zero; the pseudo-off
    /// volume check elsewhere depends on level 31 being silent.
    ///
    /// The sample-to-amplitude mapping is the revision difference: the
    /// HuC6280A centers the 5-bit sample around zero, the HuC6280 doubles
    /// it unsigned.
    pub fn build(gain: f64, revision: Revision) -> Self {
        let mut amp = [[0i32; 32]; 32];
        let mut vol_only = [0i32; 32];

        for level in 0..32 {
            let mut scale = gain * 8.0 / 6.0;

            if level > 0 {
                scale /= 2f64.powf(level as f64 / 4.0);
            }
            if level == 0x1F {
                scale = 0.0;
            }

            vol_only[level] = (scale * 65536.0) as i32;

            for sample in 0..32 {
                let eff_sample = match revision {
                    Revision::Huc6280 => (sample as i32) * 2,
                    Revision::Huc6280A => (sample as i32) * 2 - 0x1F,
                };
                amp[level][sample] = (scale * eff_sample as f64 * 128.0) as i32;
            }
        }

        EnvelopeTable { amp, vol_only }
    }

    /// Amplitude for an attenuation level and 5-bit sample value.
    #[inline]
    pub fn amplitude(&self, level: usize, sample: usize) -> i32 {
        self.amp[level & 0x1F][sample & 0x1F]
    }

    /// Bare volume scale for an attenuation level.
    #[inline]
    pub fn volume_only(&self, level: usize) -> i32 {
        self.vol_only[level & 0x1F]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_phase_filter_rows_sum_to_unity() {
        for row in &PHASE_FILTER {
            let sum: i32 = row.iter().map(|&t| t as i32).sum();
            assert_eq!(sum, 2048);
        }
    }

    #[test]
    fn test_mute_level_is_exactly_zero() {
        for revision in [Revision::Huc6280, Revision::Huc6280A] {
            let table = EnvelopeTable::build(1.0, revision);
            assert_eq!(table.volume_only(0x1F), 0);
            for sample in 0..32 {
                assert_eq!(table.amplitude(0x1F, sample), 0);
            }
        }
    }

    #[test]
    fn test_levels_shrink_geometrically() {
        let table = EnvelopeTable::build(1.0, Revision::Huc6280A);
        // Each level drops by 2^(1/4); check the ratio over levels 0..30.
        let expected = 2f64.powf(-0.25);
        for level in 1..31 {
            let ratio = table.volume_only(level) as f64 / table.volume_only(level - 1) as f64;
            assert_relative_eq!(ratio, expected, max_relative = 1e-2);
        }
    }

    #[test]
    fn test_revision_sample_mapping() {
        let a = EnvelopeTable::build(1.0, Revision::Huc6280A);
        let plain = EnvelopeTable::build(1.0, Revision::Huc6280);

        // Centered mapping: extremes are (close to) mirrored around zero.
        assert!(a.amplitude(0, 0) < 0);
        assert!(a.amplitude(0, 31) > 0);
        assert_eq!(a.amplitude(0, 0), -a.amplitude(0, 31));

        // Unsigned mapping: zero sample contributes nothing, all positive.
        assert_eq!(plain.amplitude(0, 0), 0);
        for sample in 1..32 {
            assert!(plain.amplitude(0, sample) > 0);
        }
    }

    #[test]
    fn test_gain_scales_linearly() {
        let unity = EnvelopeTable::build(1.0, Revision::Huc6280A);
        let double = EnvelopeTable::build(2.0, Revision::Huc6280A);
        assert_relative_eq!(
            double.volume_only(0) as f64,
            2.0 * unity.volume_only(0) as f64,
            max_relative = 1e-3
        );
    }
}
