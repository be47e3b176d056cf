//! Tagged save/restore of the full synthesis state.
//!
//! Field tags are stable and form part of the compatibility surface: each
//! channel saves under `SCH0`..`SCH5`, globals under `PSG`. Restore never
//! rejects: loaded values are masked to their field widths and the repair
//! pass re-establishes every invariant and derived cache, so a damaged or
//! partial capture degrades to a playable state instead of an error.

use super::channel::{ChannelCtrl, LfoCtrl, NoiseCtrl};
use super::chip::{Psg, VOL_PHASE_COUNT};
use super::{CHANNEL_COUNT, NOISE_CHANNEL_FIRST};
use crate::state::{StateReader, StateWriter};

impl Psg {
    /// Capture the complete synthesis state into a tagged writer.
    pub fn save_state(&self, writer: &mut dyn StateWriter) {
        for (i, ch) in self.channels.iter().enumerate() {
            let tag = |field: &str| format!("SCH{i}.{field}");

            writer.put_i32(&tag("counter"), ch.counter);
            writer.put_u32(&tag("frequency"), ch.frequency as u32);
            writer.put_u8(&tag("control"), ch.control.bits());
            writer.put_u8(&tag("balance"), ch.balance);
            writer.put_bytes(&tag("waveform"), &ch.waveform);
            writer.put_u8(&tag("waveform_index"), ch.waveform_index);
            writer.put_u8(&tag("dda"), ch.dda);
            writer.put_u8(&tag("noisectrl"), ch.noise_control.bits());
            writer.put_i32(&tag("noisecount"), ch.noise_counter);
            writer.put_u32(&tag("lfsr"), ch.lfsr);
            writer.put_i32s(&tag("vl"), &ch.vol);
            writer.put_i32s(&tag("blip_prev"), &ch.blip_prev);
            writer.put_i32(&tag("lastts"), ch.last_ts);
        }

        writer.put_u8("PSG.select", self.select);
        writer.put_u8("PSG.globalbalance", self.global_balance);
        writer.put_u8("PSG.lfofreq", self.lfo_frequency);
        writer.put_u8("PSG.lfoctrl", self.lfo_control.bits());
        writer.put_i32("PSG.lastts", self.last_ts);
        writer.put_i32("PSG.vol_update_counter", self.vol_update_counter);
        writer.put_u8("PSG.vol_update_which", self.vol_update_phase);
        writer.put_bool("PSG.vol_pending", self.vol_pending);
        writer.put_i32("PSG.vol_update_vllatch", self.vol_update_latch);
    }

    /// Restore from a tagged reader.
    ///
    /// Absent fields keep their current value. Loaded bitfields are masked
    /// to their widths; afterwards the waveform sums, LFSR seeds, counters,
    /// frequency caches and output functions are all re-derived, since a
    /// captured state is not guaranteed self-consistent.
    pub fn load_state(&mut self, reader: &dyn StateReader) {
        for i in 0..CHANNEL_COUNT {
            let tag = |field: &str| format!("SCH{i}.{field}");
            let ch = &mut self.channels[i];

            if let Some(v) = reader.get_i32(&tag("counter")) {
                ch.counter = v;
            }
            if let Some(v) = reader.get_u32(&tag("frequency")) {
                ch.frequency = (v & 0xFFF) as u16;
            }
            if let Some(v) = reader.get_u8(&tag("control")) {
                ch.control = ChannelCtrl::from_bits_retain(v);
            }
            if let Some(v) = reader.get_u8(&tag("balance")) {
                ch.balance = v;
            }
            if let Some(v) = reader.get_bytes(&tag("waveform")) {
                for (slot, &byte) in ch.waveform.iter_mut().zip(v.iter()) {
                    *slot = byte & 0x1F;
                }
            }
            if let Some(v) = reader.get_u8(&tag("waveform_index")) {
                ch.waveform_index = v & 0x1F;
            }
            if let Some(v) = reader.get_u8(&tag("dda")) {
                ch.dda = v & 0x1F;
            }
            if let Some(v) = reader.get_u8(&tag("noisectrl")) {
                ch.noise_control = NoiseCtrl::from_bits_retain(v);
            }
            if let Some(v) = reader.get_i32(&tag("noisecount")) {
                ch.noise_counter = v;
            }
            if let Some(v) = reader.get_u32(&tag("lfsr")) {
                ch.lfsr = v & 0x3FFFF;
            }
            if let Some(v) = reader.get_i32s(&tag("vl")) {
                for (slot, &level) in ch.vol.iter_mut().zip(v.iter()) {
                    *slot = level & 0x1F;
                }
            }
            if let Some(v) = reader.get_i32s(&tag("blip_prev")) {
                for (slot, &level) in ch.blip_prev.iter_mut().zip(v.iter()) {
                    *slot = level;
                }
            }
            if let Some(v) = reader.get_i32(&tag("lastts")) {
                ch.last_ts = v;
            }
        }

        if let Some(v) = reader.get_u8("PSG.select") {
            self.select = v & 0x07;
        }
        if let Some(v) = reader.get_u8("PSG.globalbalance") {
            self.global_balance = v;
        }
        if let Some(v) = reader.get_u8("PSG.lfofreq") {
            self.lfo_frequency = v;
        }
        if let Some(v) = reader.get_u8("PSG.lfoctrl") {
            self.lfo_control = LfoCtrl::from_bits_retain(v);
        }
        if let Some(v) = reader.get_i32("PSG.lastts") {
            self.last_ts = v;
        }
        if let Some(v) = reader.get_i32("PSG.vol_update_counter") {
            self.vol_update_counter = v;
        }
        if let Some(v) = reader.get_u8("PSG.vol_update_which") {
            self.vol_update_phase = v % VOL_PHASE_COUNT;
        }
        if let Some(v) = reader.get_bool("PSG.vol_pending") {
            self.vol_pending = v;
        }
        if let Some(v) = reader.get_i32("PSG.vol_update_vllatch") {
            self.vol_update_latch = v;
        }

        // Repair pass: re-establish invariants the capture cannot vouch for.
        for i in 0..CHANNEL_COUNT {
            let ch = &mut self.channels[i];
            ch.samp_accum = ch.wave_sum();
            if ch.lfsr == 0 {
                ch.lfsr = 1;
            }
            if ch.counter <= 0 {
                ch.counter = 1;
            }
            if i >= NOISE_CHANNEL_FIRST && ch.noise_counter == 0 {
                ch.noise_counter = 1;
            }
        }
        for i in 0..CHANNEL_COUNT {
            if i >= NOISE_CHANNEL_FIRST {
                self.recalc_noise_freq_cache(i);
            }
            self.recalc_freq_cache(i);
            self.recalc_output_func(i);
        }
    }
}
