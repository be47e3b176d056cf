//! Out-of-band register introspection.
//!
//! Debugging and tooling access to every externally visible PSG field by
//! enumerated identifier. Setting a field that feeds a derived cache runs
//! the same recompute cascade as a hardware register write, so tooling
//! pokes cannot leave the engine observing stale state.

use super::channel::{ChannelCtrl, LfoCtrl, NoiseCtrl};
use super::chip::Psg;
use super::{CHANNEL_COUNT, LFO_CARRIER, LFO_MODULATOR};

/// Mask for the 18-bit noise LFSR.
const LFSR_MASK: u32 = 0x3FFFF;

/// Enumerated identifier of an introspectable PSG field.
///
/// Per-channel identifiers carry the channel number (0-5) as a payload;
/// numbers 6 and 7 address no channel and read as zero / write as no-ops,
/// matching the hardware register interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegisterId {
    /// Channel select latch (3 bits).
    Select,
    /// Global stereo balance.
    GlobalBalance,
    /// LFO frequency register.
    LfoFrequency,
    /// LFO control register (mode bits and halt flag).
    LfoControl,
    /// A channel's 12-bit frequency register.
    Frequency(u8),
    /// A channel's control register (enable, DDA, attenuation).
    Control(u8),
    /// A channel's stereo balance.
    Balance(u8),
    /// A channel's waveform read position (0-31).
    WaveformIndex(u8),
    /// A channel's latched sample value.
    SampleLatch(u8),
    /// A channel's noise control register (channels 4-5).
    NoiseControl(u8),
    /// A channel's 18-bit noise LFSR contents.
    Lfsr(u8),
}

/// Decode a per-channel identifier payload; 6 and 7 address no channel.
fn channel_of(idx: u8) -> Option<usize> {
    let ch = (idx & 0x07) as usize;
    (ch < CHANNEL_COUNT).then_some(ch)
}

impl Psg {
    /// Read a field by identifier. Nonexistent channels read as zero.
    pub fn get_register(&self, id: RegisterId) -> u32 {
        match id {
            RegisterId::Select => self.select as u32,
            RegisterId::GlobalBalance => self.global_balance as u32,
            RegisterId::LfoFrequency => self.lfo_frequency as u32,
            RegisterId::LfoControl => self.lfo_control.bits() as u32,
            RegisterId::Frequency(ch) => {
                channel_of(ch).map_or(0, |ch| self.channels[ch].frequency as u32)
            }
            RegisterId::Control(ch) => {
                channel_of(ch).map_or(0, |ch| self.channels[ch].control.bits() as u32)
            }
            RegisterId::Balance(ch) => {
                channel_of(ch).map_or(0, |ch| self.channels[ch].balance as u32)
            }
            RegisterId::WaveformIndex(ch) => {
                channel_of(ch).map_or(0, |ch| self.channels[ch].waveform_index as u32)
            }
            RegisterId::SampleLatch(ch) => {
                channel_of(ch).map_or(0, |ch| self.channels[ch].dda as u32)
            }
            RegisterId::NoiseControl(ch) => {
                channel_of(ch).map_or(0, |ch| self.channels[ch].noise_control.bits() as u32)
            }
            RegisterId::Lfsr(ch) => {
                channel_of(ch).map_or(0, |ch| self.channels[ch].lfsr & LFSR_MASK)
            }
        }
    }

    /// Write a field by identifier, masked to its width.
    ///
    /// Cache-feeding fields re-derive the same state a hardware write
    /// would; unlike a hardware write, no time is flushed, so callers
    /// poking mid-stream should [`Psg::update`] first themselves.
    pub fn set_register(&mut self, id: RegisterId, value: u32) {
        match id {
            RegisterId::Select => {
                self.select = (value & 0x07) as u8;
            }
            RegisterId::GlobalBalance => {
                self.global_balance = value as u8;
            }
            RegisterId::LfoFrequency => {
                self.lfo_frequency = value as u8;
            }
            RegisterId::LfoControl => {
                self.lfo_control = LfoCtrl::from_bits_retain((value & 0x83) as u8);
                self.recalc_freq_cache(LFO_CARRIER);
                self.recalc_output_func(LFO_CARRIER);
                self.recalc_freq_cache(LFO_MODULATOR);
                self.recalc_output_func(LFO_MODULATOR);
            }
            RegisterId::Frequency(ch) => {
                if let Some(ch) = channel_of(ch) {
                    self.channels[ch].frequency = (value & 0xFFF) as u16;
                    self.recalc_freq_cache(ch);
                    self.recalc_output_func(ch);
                }
            }
            RegisterId::Control(ch) => {
                if let Some(ch) = channel_of(ch) {
                    self.channels[ch].control = ChannelCtrl::from_bits_retain(value as u8);
                    self.recalc_freq_cache(ch);
                    self.recalc_output_func(ch);
                }
            }
            RegisterId::Balance(ch) => {
                if let Some(ch) = channel_of(ch) {
                    self.channels[ch].balance = value as u8;
                }
            }
            RegisterId::WaveformIndex(ch) => {
                if let Some(ch) = channel_of(ch) {
                    self.channels[ch].waveform_index = (value & 0x1F) as u8;
                }
            }
            RegisterId::SampleLatch(ch) => {
                if let Some(ch) = channel_of(ch) {
                    self.channels[ch].dda = (value & 0x1F) as u8;
                }
            }
            RegisterId::NoiseControl(ch) => {
                if let Some(ch) = channel_of(ch) {
                    self.channels[ch].noise_control = NoiseCtrl::from_bits_retain(value as u8);
                    self.recalc_noise_freq_cache(ch);
                    self.recalc_output_func(ch);
                }
            }
            RegisterId::Lfsr(ch) => {
                if let Some(ch) = channel_of(ch) {
                    self.channels[ch].lfsr = value & LFSR_MASK;
                }
            }
        }
    }
}
