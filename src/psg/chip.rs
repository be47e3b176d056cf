//! Timestamp-driven synthesis engine and register interface.
//!
//! The engine is advanced exclusively by host-supplied timestamps in
//! hardware clock units: `write` flushes pending time before mutating
//! register state, `update` chunks the elapsed interval around volume
//! crossfade ticks and runs every channel across each chunk. Channel output
//! changes are injected as band-limited deltas into two owned
//! high-resolution buffers the host drains.

use super::channel::{clock_lfsr, Channel, ChannelCtrl, LfoCtrl, NoiseCtrl, OutputFunc};
use super::tables::{EnvelopeTable, PHASE_FILTER, SCALE_TAB};
use super::{
    Revision, CHANNEL_COUNT, LFO_CARRIER, LFO_MODULATOR, NOISE_CHANNEL_FIRST, WAVE_SIZE,
};
use crate::{PsgError, Result};

/// Waveform periods at or below this value are handled by the averaged
/// accumulate output and the fast-forward stepping path.
pub(crate) const FREQ_FAST_CUTOFF: i32 = 0x7;

/// Crossfade phases: 6 channels x 2 sides x (sample + commit).
pub(crate) const VOL_PHASE_COUNT: u8 = 24;

/// Ticks from sampling a crossfade target to committing it.
const VOL_TICKS_AFTER_SAMPLE: i32 = 255;

/// Ticks from a commit to the next sample.
const VOL_TICKS_AFTER_COMMIT: i32 = 1;

/// HuC6280 programmable sound generator.
///
/// Six wavetable channels, channels 4-5 noise-capable, channel 1 optionally
/// frequency-modulating channel 0. Construction fixes the silicon revision;
/// the two revisions differ in sample-to-amplitude mapping, in the channel
/// off test and in the accumulate output bias.
///
/// # Example
///
/// ```
/// use huc6280_psg::{Psg, Revision};
///
/// let mut psg = Psg::new(Revision::Huc6280A, 0x10000).unwrap();
/// psg.write(0, 0x00, 0x02); // select channel 2
/// psg.write(0, 0x02, 0x22); // frequency LSB
/// psg.write(0, 0x03, 0x01); // frequency MSB
/// psg.write(0, 0x04, 0x9F); // enable at full volume
/// psg.update(10_000);
/// ```
#[derive(Clone)]
pub struct Psg {
    pub(crate) revision: Revision,

    pub(crate) select: u8,
    pub(crate) global_balance: u8,
    pub(crate) lfo_frequency: u8,
    pub(crate) lfo_control: LfoCtrl,
    pub(crate) last_ts: i32,

    pub(crate) envelope: EnvelopeTable,
    pub(crate) channels: [Channel; CHANNEL_COUNT],

    // Volume crossfade machine.
    pub(crate) vol_pending: bool,
    pub(crate) vol_update_counter: i32,
    pub(crate) vol_update_phase: u8,
    pub(crate) vol_update_latch: i32,

    // High-resolution stereo delta buffers, drained by the host.
    pub(crate) hr_bufs: [Box<[i32]>; 2],
    pub(crate) hr_mask: usize,
}

impl Psg {
    /// Create a powered-on PSG.
    ///
    /// # Arguments
    ///
    /// * `revision` - silicon revision to model
    /// * `hr_buf_len` - length of each high-resolution output buffer; must
    ///   be a nonzero power of two. Delta indices are derived from
    ///   `timestamp >> 2` and masked to this length, so the host must drain
    ///   often enough that one update window never spans the whole buffer.
    ///
    /// # Errors
    ///
    /// [`PsgError::InvalidBufferLength`] when `hr_buf_len` is not a nonzero
    /// power of two. An out-of-range numeric revision id fails earlier, in
    /// [`Revision::from_id`].
    pub fn new(revision: Revision, hr_buf_len: usize) -> Result<Self> {
        if hr_buf_len == 0 || !hr_buf_len.is_power_of_two() {
            return Err(PsgError::InvalidBufferLength(hr_buf_len));
        }

        let mut psg = Psg {
            revision,
            select: 0,
            global_balance: 0,
            lfo_frequency: 0,
            lfo_control: LfoCtrl::empty(),
            last_ts: 0,
            envelope: EnvelopeTable::build(1.0, revision),
            channels: std::array::from_fn(|_| Channel::default()),
            vol_pending: false,
            vol_update_counter: 0,
            vol_update_phase: 0,
            vol_update_latch: 0,
            hr_bufs: [
                vec![0; hr_buf_len].into_boxed_slice(),
                vec![0; hr_buf_len].into_boxed_slice(),
            ],
            hr_mask: hr_buf_len - 1,
        };
        psg.power(0);
        Ok(psg)
    }

    /// The revision this instance models.
    pub fn revision(&self) -> Revision {
        self.revision
    }

    /// Timestamp of the most recent flush.
    pub fn last_timestamp(&self) -> i32 {
        self.last_ts
    }

    /// Rebuild the attenuation tables for a new overall gain.
    pub fn set_volume(&mut self, gain: f64) {
        self.envelope = EnvelopeTable::build(gain, self.revision);
    }

    /// Read access to the left and right high-resolution delta buffers.
    pub fn hr_bufs(&self) -> (&[i32], &[i32]) {
        (&self.hr_bufs[0][..], &self.hr_bufs[1][..])
    }

    /// Mutable access to the delta buffers, for host-side draining.
    pub fn hr_bufs_mut(&mut self) -> (&mut [i32], &mut [i32]) {
        let [left, right] = &mut self.hr_bufs;
        (&mut left[..], &mut right[..])
    }

    /// Zero both delta buffers; typically called after each drain cycle.
    pub fn clear_hr_bufs(&mut self) {
        for buf in &mut self.hr_bufs {
            buf.fill(0);
        }
    }

    // ------------------------------------------------------------------
    // Derived caches and output function selection
    // ------------------------------------------------------------------

    /// Re-derive a channel's waveform step period from its registers.
    pub(crate) fn recalc_freq_cache(&mut self, chnum: usize) {
        let mode = self.lfo_control.mode();

        if chnum == LFO_CARRIER && mode != 0 {
            // The modulator's live sample rebiases the carrier's period.
            let shift = ((mode - 1) << 1) as u32;
            let latch = self.channels[LFO_MODULATOR].dda as i32;
            let freq = self.channels[chnum].frequency as i32;
            let biased = (freq + ((latch - 0x10) << shift)) & 0xFFF;
            self.channels[chnum].freq_cache = (if biased != 0 { biased } else { 4096 }) << 1;
        } else {
            let freq = self.channels[chnum].frequency as i32;
            let mut cache = (if freq != 0 { freq } else { 4096 }) << 1;

            if chnum == LFO_MODULATOR && mode != 0 {
                cache *= if self.lfo_frequency != 0 {
                    self.lfo_frequency as i32
                } else {
                    256
                };
            }
            self.channels[chnum].freq_cache = cache;
        }
    }

    /// Re-derive a channel's noise step period.
    pub(crate) fn recalc_noise_freq_cache(&mut self, chnum: usize) {
        let mut freq = 0x1F - self.channels[chnum].noise_control.frequency() as i32;

        if freq == 0 {
            freq = 0x20;
        } else {
            freq <<= 6;
        }
        self.channels[chnum].noise_freq_cache = freq << 1;
    }

    /// Re-select a channel's output function. Must run after
    /// [`Self::recalc_freq_cache`] on every write that can affect either.
    pub(crate) fn recalc_output_func(&mut self, chnum: usize) {
        let ch = &self.channels[chnum];
        let ctrl = ch.control;

        let off = match self.revision {
            Revision::Huc6280 => !ctrl.contains(ChannelCtrl::ENABLE),
            Revision::Huc6280A => !ctrl.intersects(ChannelCtrl::ENABLE | ChannelCtrl::DDA),
        };

        // The halted modulator keeps its normal output, and the carrier
        // under live modulation is never averaged: its period changes on
        // every modulator step, which the accumulate path cannot track.
        let lfo_live = self.lfo_control.mode() != 0 && !self.lfo_control.contains(LfoCtrl::HALT);
        let accum_ok = ctrl.contains(ChannelCtrl::ENABLE)
            && !ctrl.contains(ChannelCtrl::DDA)
            && ch.freq_cache <= FREQ_FAST_CUTOFF
            && !(chnum == LFO_MODULATOR && self.lfo_control.contains(LfoCtrl::HALT))
            && !(chnum == LFO_CARRIER && lfo_live);

        self.channels[chnum].output = if off {
            OutputFunc::Off
        } else if ch.noise_control.contains(NoiseCtrl::ENABLE) && ctrl.contains(ChannelCtrl::ENABLE)
        {
            OutputFunc::Noise
        } else if accum_ok {
            OutputFunc::Accum
        } else {
            OutputFunc::Normal
        };
    }

    // ------------------------------------------------------------------
    // Band-limited injection
    // ------------------------------------------------------------------

    /// Inject the channel's current output level at `timestamp`, spreading
    /// the delta from the previously injected level across the 7-tap
    /// kernel selected by the half-cycle phase.
    fn update_output(&mut self, timestamp: i32, chnum: usize) {
        let ch = &self.channels[chnum];

        let (samp_l, samp_r) = match ch.output {
            OutputFunc::Off => (0, 0),
            OutputFunc::Normal => {
                let sv = ch.dda as usize;
                (
                    self.envelope.amp[ch.vol[0] as usize][sv],
                    self.envelope.amp[ch.vol[1] as usize][sv],
                )
            }
            OutputFunc::Noise => {
                let bit = (ch.lfsr & 1) as usize;
                let sv = (bit << 5) - bit;
                (
                    self.envelope.amp[ch.vol[0] as usize][sv],
                    self.envelope.amp[ch.vol[1] as usize][sv],
                )
            }
            OutputFunc::Accum => {
                // 31 (5-bit max) * 32 samples = 992; the A revision centers
                // the running sum around the 496 midpoint.
                let accum = match self.revision {
                    Revision::Huc6280 => ch.samp_accum,
                    Revision::Huc6280A => ch.samp_accum - 496,
                };
                (
                    (self.envelope.vol_only[ch.vol[0] as usize] * accum) >> (8 + 5),
                    (self.envelope.vol_only[ch.vol[1] as usize] * accum) >> (8 + 5),
                )
            }
        };

        let kernel = &PHASE_FILTER[((timestamp >> 1) & 1) as usize];
        let base = ((timestamp >> 2) as usize) & self.hr_mask;

        let ch = &mut self.channels[chnum];
        let delta_l = samp_l - ch.blip_prev[0];
        let delta_r = samp_r - ch.blip_prev[1];
        ch.blip_prev[0] = samp_l;
        ch.blip_prev[1] = samp_r;

        for (k, &tap) in kernel.iter().enumerate() {
            let slot = (base + k) & self.hr_mask;
            self.hr_bufs[0][slot] += delta_l * tap as i32;
            self.hr_bufs[1][slot] += delta_r * tap as i32;
        }
    }

    // ------------------------------------------------------------------
    // Channel run engine
    // ------------------------------------------------------------------

    /// Shared prologue of a channel advance: flush the pre-advance output,
    /// run the noise LFSR on channels 4-5, decide whether the waveform
    /// clock runs at all and charge the elapsed time to the step counter.
    ///
    /// Returns `false` when waveform stepping is gated off (channel
    /// disabled, halted modulator, or DDA mode).
    fn begin_run(&mut self, chnum: usize, timestamp: i32) -> bool {
        let run_time = timestamp - self.channels[chnum].last_ts;
        self.channels[chnum].last_ts = timestamp;

        if run_time == 0 {
            return false;
        }

        self.update_output(timestamp - run_time, chnum);

        if chnum >= NOISE_CHANNEL_FIRST {
            self.run_noise(chnum, timestamp, run_time);
        }

        let ch = &self.channels[chnum];
        if !ch.control.contains(ChannelCtrl::ENABLE)
            || (chnum == LFO_MODULATOR && self.lfo_control.contains(LfoCtrl::HALT))
            || ch.control.contains(ChannelCtrl::DDA)
        {
            return false;
        }

        self.channels[chnum].counter -= run_time;
        true
    }

    /// Clock the noise LFSR across the elapsed interval. The LFSR always
    /// keeps running; only audible steps are injected, since noise may be
    /// toggled on later mid-stream.
    fn run_noise(&mut self, chnum: usize, timestamp: i32, run_time: i32) {
        let freq = self.channels[chnum].noise_freq_cache;
        self.channels[chnum].noise_counter -= run_time;

        if self.channels[chnum].output == OutputFunc::Noise {
            while self.channels[chnum].noise_counter <= 0 {
                let ch = &mut self.channels[chnum];
                ch.lfsr = clock_lfsr(ch.lfsr);
                let sub_ts = timestamp + ch.noise_counter;
                self.update_output(sub_ts, chnum);
                self.channels[chnum].noise_counter += freq;
            }
        } else {
            let ch = &mut self.channels[chnum];
            while ch.noise_counter <= 0 {
                ch.lfsr = clock_lfsr(ch.lfsr);
                ch.noise_counter += freq;
            }
        }
    }

    /// Advance one channel to `timestamp`. Never recurses; the carrier
    /// under live modulation goes through
    /// [`Self::run_carrier_modulated`] instead.
    fn run_channel(&mut self, chnum: usize, timestamp: i32) {
        if !self.begin_run(chnum, timestamp) {
            return;
        }

        let ch = &mut self.channels[chnum];
        if ch.freq_cache <= FREQ_FAST_CUTOFF {
            // Fast-forward: whole elapsed periods by division instead of a
            // per-period loop. At these frequencies the audible output is
            // effectively the waveform average anyway.
            if ch.counter <= 0 {
                let steps = (-ch.counter / ch.freq_cache) + 1;
                ch.counter += steps * ch.freq_cache;
                ch.waveform_index =
                    ((ch.waveform_index as i32 + steps) & (WAVE_SIZE as i32 - 1)) as u8;
                ch.dda = ch.waveform[ch.waveform_index as usize];
            }
        }

        while self.channels[chnum].counter <= 0 {
            self.channels[chnum].step_waveform();
            let sub_ts = timestamp + self.channels[chnum].counter;
            self.update_output(sub_ts, chnum);

            let ch = &mut self.channels[chnum];
            ch.counter += ch.freq_cache;
        }
    }

    /// Advance the carrier to `timestamp` while the LFO is live: after each
    /// carrier step the modulator is brought to the same sub-timestamp and
    /// the carrier's period re-derived from its new sample. The modulator
    /// advance is a plain [`Self::run_channel`], so the interleave is
    /// structurally bounded to one level.
    fn run_carrier_modulated(&mut self, timestamp: i32) {
        if !self.begin_run(LFO_CARRIER, timestamp) {
            return;
        }

        while self.channels[LFO_CARRIER].counter <= 0 {
            self.channels[LFO_CARRIER].step_waveform();
            let sub_ts = timestamp + self.channels[LFO_CARRIER].counter;
            self.update_output(sub_ts, LFO_CARRIER);

            self.run_channel(LFO_MODULATOR, sub_ts);
            self.recalc_freq_cache(LFO_CARRIER);
            self.recalc_output_func(LFO_CARRIER);

            // Not particularly accurate below the cutoff, but faster.
            let ch = &mut self.channels[LFO_CARRIER];
            ch.counter += if ch.freq_cache <= FREQ_FAST_CUTOFF {
                FREQ_FAST_CUTOFF
            } else {
                ch.freq_cache
            };
        }
    }

    fn run_all(&mut self, timestamp: i32) {
        for chnum in 0..CHANNEL_COUNT {
            self.run_channel(chnum, timestamp);
        }
    }

    fn run_all_lfo(&mut self, timestamp: i32) {
        self.run_carrier_modulated(timestamp);
        for chnum in 1..CHANNEL_COUNT {
            self.run_channel(chnum, timestamp);
        }
    }

    // ------------------------------------------------------------------
    // Update scheduler
    // ------------------------------------------------------------------

    /// Flush all pending synthesis up to `timestamp`.
    ///
    /// Must be called (directly or via [`Self::write`]) with non-decreasing
    /// timestamps. The elapsed interval is split into chunks bounded by the
    /// next volume crossfade tick; all six channels advance chunk by chunk
    /// so that crossfade commits land between chunks for every channel
    /// alike.
    pub fn update(&mut self, timestamp: i32) {
        let run_time = timestamp - self.last_ts;

        if self.vol_pending && self.vol_update_counter == 0 && self.vol_update_phase == 0 {
            self.vol_update_counter = 1;
            self.vol_pending = false;
        }

        let mut lfo_on = self.lfo_control.mode() != 0;
        if lfo_on
            && (!self.channels[LFO_MODULATOR]
                .control
                .contains(ChannelCtrl::ENABLE)
                || self.lfo_control.contains(LfoCtrl::HALT))
        {
            // The modulator is silent or halted: treat the LFO as inactive
            // for this call and run the carrier at its unbiased period.
            lfo_on = false;
            self.recalc_freq_cache(LFO_CARRIER);
            self.recalc_output_func(LFO_CARRIER);
        }

        let mut clocks = run_time;
        let mut running_ts = self.last_ts;

        while clocks > 0 {
            let mut chunk = clocks;
            if self.vol_update_counter > 0 && chunk > self.vol_update_counter {
                chunk = self.vol_update_counter;
            }
            running_ts += chunk;
            clocks -= chunk;

            if lfo_on {
                self.run_all_lfo(running_ts);
            } else {
                self.run_all(running_ts);
            }

            if self.vol_update_counter > 0 {
                self.vol_update_counter -= chunk;
                if self.vol_update_counter == 0 {
                    self.step_vol_phase();
                }
            }

            self.last_ts = running_ts;
        }
    }

    /// Advance the 24-phase crossfade machine by one half-phase.
    fn step_vol_phase(&mut self) {
        let committing = self.vol_update_phase & 1 != 0;
        let lr = (((self.vol_update_phase >> 1) & 1) ^ 1) as usize;
        let chnum = (self.vol_update_phase >> 2) as usize;

        if committing {
            self.channels[chnum].vol[lr] = self.vol_update_latch;
        } else {
            self.vol_update_latch = self.target_level(chnum, lr);
        }

        self.vol_update_phase = (self.vol_update_phase + 1) % VOL_PHASE_COUNT;

        if self.vol_update_phase != 0 {
            self.vol_update_counter = if committing {
                VOL_TICKS_AFTER_COMMIT
            } else {
                VOL_TICKS_AFTER_SAMPLE
            };
        } else if self.vol_pending {
            // A fresh crossfade was requested while this one finished;
            // chain straight into the next cycle.
            self.vol_update_counter = if committing {
                VOL_TICKS_AFTER_COMMIT
            } else {
                VOL_TICKS_AFTER_SAMPLE
            };
            self.vol_pending = false;
        }
    }

    /// Combined attenuation target for one channel and side: global
    /// balance, channel balance and the control register's attenuation
    /// bits, clamped to the 31 (silent) ceiling.
    pub(crate) fn target_level(&self, chnum: usize, lr: usize) -> i32 {
        let ch = &self.channels[chnum];
        let shift = if lr != 0 { 0 } else { 4 };

        let gbal = 0x1F - SCALE_TAB[((self.global_balance >> shift) & 0x0F) as usize] as i32;
        let bal = 0x1F - SCALE_TAB[((ch.balance >> shift) & 0x0F) as usize] as i32;
        let al = 0x1F - ch.control.attenuation() as i32;

        (gbal + bal + al).min(0x1F)
    }

    // ------------------------------------------------------------------
    // Register interface
    // ------------------------------------------------------------------

    /// Decode a register write at `timestamp`.
    ///
    /// Offset 0 (channel select) takes effect immediately; every other
    /// offset first flushes pending time, then mutates the selected
    /// channel or global state and re-derives the affected caches. Select
    /// values 6 and 7 silently swallow channel-specific writes. Values are
    /// masked to their field widths, never rejected.
    pub fn write(&mut self, timestamp: i32, addr: u8, value: u8) {
        let addr = addr & 0x0F;

        if addr == 0x00 {
            self.select = value & 0x07;
            return;
        }

        self.update(timestamp);

        let chnum = self.select as usize;
        match addr {
            0x01 => {
                self.global_balance = value;
                self.vol_pending = true;
            }

            // Selected channel does not exist; the write is a no-op.
            0x02..=0x07 if chnum >= CHANNEL_COUNT => {}

            0x02 => {
                let ch = &mut self.channels[chnum];
                ch.frequency = (ch.frequency & 0x0F00) | value as u16;
                self.recalc_freq_cache(chnum);
                self.recalc_output_func(chnum);
            }

            0x03 => {
                let ch = &mut self.channels[chnum];
                ch.frequency = (ch.frequency & 0x00FF) | (((value & 0x0F) as u16) << 8);
                self.recalc_freq_cache(chnum);
                self.recalc_output_func(chnum);
            }

            0x04 => {
                let new = ChannelCtrl::from_bits_retain(value);
                let ch = &mut self.channels[chnum];

                // Leaving DDA mode rewinds the waveform and restarts the
                // step countdown from the full period.
                if ch.control.contains(ChannelCtrl::DDA) && !new.contains(ChannelCtrl::DDA) {
                    ch.waveform_index = 0;
                    ch.dda = ch.waveform[0];
                    ch.counter = ch.freq_cache;
                }

                // Keying on without entering DDA advances one step.
                if !ch.control.contains(ChannelCtrl::ENABLE)
                    && new.contains(ChannelCtrl::ENABLE)
                    && !new.contains(ChannelCtrl::DDA)
                {
                    ch.step_waveform();
                }

                ch.control = new;
                self.recalc_freq_cache(chnum);
                self.recalc_output_func(chnum);
                self.vol_pending = true;
            }

            0x05 => {
                self.channels[chnum].balance = value;
                self.vol_pending = true;
            }

            0x06 => {
                let value = value & 0x1F;
                let ch = &mut self.channels[chnum];

                if !ch.control.contains(ChannelCtrl::DDA) {
                    let slot = &mut ch.waveform[ch.waveform_index as usize];
                    ch.samp_accum -= *slot as i32;
                    *slot = value;
                    ch.samp_accum += value as i32;
                }

                if !ch.control.intersects(ChannelCtrl::ENABLE | ChannelCtrl::DDA) {
                    ch.waveform_index = (ch.waveform_index + 1) & (WAVE_SIZE as u8 - 1);
                }

                // An enabled channel latches the written value into the
                // sample cache regardless of DDA mode.
                if ch.control.contains(ChannelCtrl::ENABLE) {
                    ch.dda = value;
                }
            }

            0x07 => {
                if chnum >= NOISE_CHANNEL_FIRST {
                    self.channels[chnum].noise_control = NoiseCtrl::from_bits_retain(value);
                    self.recalc_noise_freq_cache(chnum);
                    self.recalc_output_func(chnum);
                }
            }

            0x08 => {
                self.lfo_frequency = value;
            }

            0x09 => {
                if value & 0x80 != 0 {
                    let m = &mut self.channels[LFO_MODULATOR];
                    m.waveform_index = 0;
                    m.dda = m.waveform[0];
                    m.counter = m.freq_cache;
                }
                self.lfo_control = LfoCtrl::from_bits_retain(value);
                self.recalc_freq_cache(LFO_CARRIER);
                self.recalc_output_func(LFO_CARRIER);
                self.recalc_freq_cache(LFO_MODULATOR);
                self.recalc_output_func(LFO_MODULATOR);
            }

            _ => {}
        }
    }

    // ------------------------------------------------------------------
    // Waveform memory access
    // ------------------------------------------------------------------

    /// Read `buffer.len()` waveform entries starting at `address`, which
    /// wraps mod 32. Channels 6+ do not exist; the buffer is left as is.
    pub fn peek_wave(&self, chnum: usize, address: u32, buffer: &mut [u8]) {
        if chnum >= CHANNEL_COUNT {
            return;
        }
        let ch = &self.channels[chnum];
        let mut addr = address as usize;

        for slot in buffer {
            *slot = ch.waveform[addr & (WAVE_SIZE - 1)];
            addr += 1;
        }
    }

    /// Write waveform entries starting at `address` (wraps mod 32), masked
    /// to 5 bits and keeping the running sample sum intact.
    pub fn poke_wave(&mut self, chnum: usize, address: u32, data: &[u8]) {
        if chnum >= CHANNEL_COUNT {
            return;
        }
        let ch = &mut self.channels[chnum];
        let mut addr = address as usize;

        for &value in data {
            let slot = &mut ch.waveform[addr & (WAVE_SIZE - 1)];
            ch.samp_accum -= *slot as i32;
            *slot = value & 0x1F;
            ch.samp_accum += *slot as i32;
            addr += 1;
        }
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Power-on reset to architectural defaults.
    ///
    /// Pending time is flushed first when `timestamp` differs from the
    /// last flush. Timing continuity fields (per-channel high-water marks
    /// and previously injected levels) survive, so a mid-stream power
    /// cycle does not tear the output.
    pub fn power(&mut self, timestamp: i32) {
        if timestamp != self.last_ts {
            self.update(timestamp);
        }

        self.select = 0;
        self.global_balance = 0;
        self.lfo_frequency = 0;
        self.lfo_control = LfoCtrl::empty();

        for chnum in 0..CHANNEL_COUNT {
            {
                let ch = &mut self.channels[chnum];
                ch.frequency = 0;
                ch.control = ChannelCtrl::empty();
                ch.balance = 0;
                ch.waveform = [0; WAVE_SIZE];
                ch.samp_accum = 0;
                ch.waveform_index = 0;
                ch.dda = 0;
                ch.noise_control = NoiseCtrl::empty();
                ch.vol = [0x1F; 2];
            }

            self.recalc_freq_cache(chnum);
            self.recalc_output_func(chnum);
            self.channels[chnum].counter = self.channels[chnum].freq_cache;

            if chnum >= NOISE_CHANNEL_FIRST {
                self.recalc_noise_freq_cache(chnum);
                self.channels[chnum].noise_counter = 1;
                self.channels[chnum].lfsr = 1;
            }
        }

        self.vol_pending = false;
        self.vol_update_counter = 0;
        self.vol_update_phase = 0;
    }

    /// Rebase the internal timestamp bookkeeping without touching audible
    /// state; used when the host's clock wraps or resets.
    pub fn reset_ts(&mut self, ts_base: i32) {
        self.last_ts = ts_base;
        for ch in &mut self.channels {
            ch.last_ts = ts_base;
        }
    }
}

impl std::fmt::Debug for Psg {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Psg")
            .field("revision", &self.revision)
            .field("select", &self.select)
            .field("global_balance", &self.global_balance)
            .field("lfo_frequency", &self.lfo_frequency)
            .field("lfo_control", &self.lfo_control)
            .field("last_ts", &self.last_ts)
            .field("channels", &self.channels)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn psg(revision: Revision) -> Psg {
        Psg::new(revision, 0x10000).unwrap()
    }

    #[test]
    fn test_buffer_length_must_be_power_of_two() {
        assert!(matches!(
            Psg::new(Revision::Huc6280A, 1000),
            Err(PsgError::InvalidBufferLength(1000))
        ));
        assert!(matches!(
            Psg::new(Revision::Huc6280A, 0),
            Err(PsgError::InvalidBufferLength(0))
        ));
        assert!(Psg::new(Revision::Huc6280A, 0x8000).is_ok());
    }

    #[test]
    fn test_freq_cache_zero_and_nonzero() {
        let mut p = psg(Revision::Huc6280A);
        // Frequency 0 folds to 4096 before the doubling.
        assert_eq!(p.channels[0].freq_cache, 4096 << 1);

        p.write(0, 0x00, 0x00);
        p.write(0, 0x02, 100);
        assert_eq!(p.channels[0].freq_cache, 200);
    }

    #[test]
    fn test_freq_cache_uses_both_bytes() {
        let mut p = psg(Revision::Huc6280A);
        p.write(0, 0x00, 0x03);
        p.write(0, 0x02, 0x34);
        p.write(0, 0x03, 0x12); // high byte masked to 4 bits
        assert_eq!(p.channels[3].frequency, 0x234);
        assert_eq!(p.channels[3].freq_cache, 0x234 << 1);
    }

    #[test]
    fn test_noise_freq_cache_edges() {
        let mut p = psg(Revision::Huc6280A);
        p.write(0, 0x00, 0x04);

        // (0x1F - 0x1F) = 0 folds to 0x20 before the doubling.
        p.write(0, 0x07, 0x1F);
        assert_eq!(p.channels[4].noise_freq_cache, 0x20 << 1);

        // Slowest setting: (0x1F - 0) << 6 << 1.
        p.write(0, 0x07, 0x00);
        assert_eq!(p.channels[4].noise_freq_cache, 0x1F << 7);

        p.write(0, 0x07, 0x10);
        assert_eq!(p.channels[4].noise_freq_cache, 0x0F << 7);
    }

    #[test]
    fn test_noise_control_ignored_below_channel_4() {
        let mut p = psg(Revision::Huc6280A);
        p.write(0, 0x00, 0x02);
        p.write(0, 0x07, 0x9F);
        assert!(p.channels[2].noise_control.is_empty());
    }

    #[test]
    fn test_output_off_per_revision() {
        // HuC6280A: off only when both enable and DDA are clear.
        let mut p = psg(Revision::Huc6280A);
        p.write(0, 0x00, 0x00);
        p.write(0, 0x04, 0x1F);
        assert_eq!(p.channels[0].output, OutputFunc::Off);
        p.write(0, 0x04, 0x40);
        assert_ne!(p.channels[0].output, OutputFunc::Off);

        // HuC6280: the primary enable bit alone decides.
        let mut p = psg(Revision::Huc6280);
        p.write(0, 0x00, 0x00);
        p.write(0, 0x04, 0x40);
        assert_eq!(p.channels[0].output, OutputFunc::Off);
        p.write(0, 0x04, 0x80);
        assert_ne!(p.channels[0].output, OutputFunc::Off);
    }

    #[test]
    fn test_output_noise_needs_both_enables() {
        let mut p = psg(Revision::Huc6280A);
        p.write(0, 0x00, 0x05);
        p.write(0, 0x07, 0x9F);
        assert_ne!(p.channels[5].output, OutputFunc::Noise);

        p.write(0, 0x04, 0x9F);
        assert_eq!(p.channels[5].output, OutputFunc::Noise);
    }

    #[test]
    fn test_output_accum_at_low_period() {
        let mut p = psg(Revision::Huc6280A);
        p.write(0, 0x00, 0x02);
        p.write(0, 0x02, 0x03); // freq_cache = 6 <= cutoff
        p.write(0, 0x04, 0x9F);
        assert_eq!(p.channels[2].output, OutputFunc::Accum);

        p.write(0, 0x02, 0x10);
        assert_eq!(p.channels[2].output, OutputFunc::Normal);
    }

    #[test]
    fn test_carrier_not_accum_under_live_lfo() {
        let mut p = psg(Revision::Huc6280A);

        // Park the modulator's sample latch (and waveform[0], used by the
        // LFO trigger reset) at the 0x10 midpoint so the carrier bias is 0.
        p.write(0, 0x00, 0x01);
        p.write(0, 0x06, 0x10);
        p.write(0, 0x04, 0x80);
        p.write(0, 0x06, 0x10);
        assert_eq!(p.channels[1].dda, 0x10);

        p.write(0, 0x00, 0x00);
        p.write(0, 0x02, 0x03);
        p.write(0, 0x04, 0x9F);
        assert_eq!(p.channels[0].output, OutputFunc::Accum);

        // Live modulation: period still 6, but the carrier must not average.
        p.write(0, 0x09, 0x01);
        assert_eq!(p.channels[0].freq_cache, 6);
        assert_eq!(p.channels[0].output, OutputFunc::Normal);

        // Halted modulator: modulation ineffective, averaging allowed again.
        p.write(0, 0x09, 0x81);
        assert_eq!(p.channels[0].freq_cache, 6);
        assert_eq!(p.channels[0].output, OutputFunc::Accum);
    }

    #[test]
    fn test_select_six_and_seven_ignore_channel_writes() {
        let mut p = psg(Revision::Huc6280A);
        p.write(0, 0x00, 0x06);
        p.write(0, 0x02, 0xFF);
        p.write(0, 0x04, 0xFF);
        p.write(0, 0x06, 0x1F);
        for ch in &p.channels {
            assert_eq!(ch.frequency, 0);
            assert!(ch.control.is_empty());
            assert_eq!(ch.samp_accum, 0);
        }
    }

    #[test]
    fn test_waveform_write_maintains_accumulator() {
        let mut p = psg(Revision::Huc6280A);
        p.write(0, 0x00, 0x01);
        for v in 0..WAVE_SIZE as u8 {
            p.write(0, 0x06, v);
        }
        let ch = &p.channels[1];
        assert_eq!(ch.samp_accum, ch.wave_sum());
        assert_eq!(ch.samp_accum, (0..32).sum::<i32>());
        // Index wrapped back to the start after 32 writes.
        assert_eq!(ch.waveform_index, 0);
    }

    #[test]
    fn test_waveform_write_in_dda_mode_latches_only() {
        let mut p = psg(Revision::Huc6280A);
        p.write(0, 0x00, 0x00);
        p.write(0, 0x04, 0xC0); // enable + DDA
        p.write(0, 0x06, 0x15);

        let ch = &p.channels[0];
        assert_eq!(ch.dda, 0x15);
        assert_eq!(ch.waveform[0], 0);
        assert_eq!(ch.samp_accum, 0);
        assert_eq!(ch.waveform_index, 0);
    }

    #[test]
    fn test_enable_rising_edge_steps_once() {
        let mut p = psg(Revision::Huc6280A);
        p.write(0, 0x00, 0x00);
        for v in [5u8, 9, 13] {
            p.write(0, 0x06, v);
        }
        assert_eq!(p.channels[0].waveform_index, 3);

        p.write(0, 0x04, 0x9F);
        assert_eq!(p.channels[0].waveform_index, 4);
        assert_eq!(p.channels[0].dda, p.channels[0].waveform[4]);
    }

    #[test]
    fn test_leaving_dda_rewinds_waveform() {
        let mut p = psg(Revision::Huc6280A);
        p.write(0, 0x00, 0x00);
        p.write(0, 0x02, 0x40);
        p.write(0, 0x04, 0xC0);
        p.write(0, 0x04, 0x80);

        let ch = &p.channels[0];
        assert_eq!(ch.waveform_index, 0);
        assert_eq!(ch.dda, ch.waveform[0]);
        assert_eq!(ch.counter, ch.freq_cache);
    }

    #[test]
    fn test_poke_wave_wraps_and_keeps_accumulator() {
        let mut p = psg(Revision::Huc6280A);
        p.poke_wave(3, 30, &[0x1F, 0x1F, 0x1F, 0xFF]);

        let ch = &p.channels[3];
        assert_eq!(ch.waveform[30], 0x1F);
        assert_eq!(ch.waveform[31], 0x1F);
        assert_eq!(ch.waveform[0], 0x1F);
        assert_eq!(ch.waveform[1], 0x1F); // 0xFF masked to 5 bits
        assert_eq!(ch.samp_accum, ch.wave_sum());

        let mut readback = [0u8; 4];
        p.peek_wave(3, 30, &mut readback);
        assert_eq!(readback, [0x1F, 0x1F, 0x1F, 0x1F]);
    }

    #[test]
    fn test_power_preserves_timing_continuity() {
        let mut p = psg(Revision::Huc6280A);
        p.write(0, 0x01, 0xFF);
        p.write(0, 0x00, 0x00);
        p.write(0, 0x02, 0x80);
        p.write(0, 0x05, 0xFF);
        p.write(0, 0x04, 0x9F);
        p.update(5000);

        let blip = p.channels[0].blip_prev;
        assert_ne!(blip, [0; 2]);

        p.power(5000);
        assert_eq!(p.channels[0].blip_prev, blip);
        assert_eq!(p.channels[0].last_ts, 5000);
        assert_eq!(p.channels[0].vol, [0x1F; 2]);
        assert_eq!(p.channels[4].lfsr, 1);
        assert_eq!(p.channels[4].noise_counter, 1);
    }

    #[test]
    fn test_reset_ts_rebases_without_audible_change() {
        let mut p = psg(Revision::Huc6280A);
        p.write(0, 0x00, 0x00);
        p.write(0, 0x02, 0x80);
        p.write(0, 0x04, 0x9F);
        p.update(4000);

        let wi = p.channels[0].waveform_index;
        p.reset_ts(0);
        assert_eq!(p.last_ts, 0);
        assert_eq!(p.channels[0].last_ts, 0);
        assert_eq!(p.channels[0].waveform_index, wi);
    }

    #[test]
    fn test_crossfade_commits_after_sample_window() {
        let mut p = psg(Revision::Huc6280A);
        p.write(0, 0x00, 0x00);
        p.write(0, 0x04, 0x9F); // full volume requested, crossfade pending
        p.write(0, 0x01, 0xFF); // balance wide open
        p.write(0, 0x05, 0xFF);

        assert_eq!(p.channels[0].vol, [0x1F; 2]);

        // Arming takes 1 tick, the first sample->commit window 255 + 1.
        p.update(p.last_ts + 1 + 255 + 1);
        let vol = p.channels[0].vol;
        assert_ne!(vol[1], 0x1F, "first commit lands on one side");

        // A full cycle later every channel/side pair has been committed.
        p.update(p.last_ts + 24 * 256);
        assert_eq!(p.channels[0].vol, [0, 0]);
    }

    #[test]
    fn test_global_balance_feeds_target_level() {
        let mut p = psg(Revision::Huc6280A);
        p.write(0, 0x00, 0x00);
        p.write(0, 0x04, 0x9F);
        p.write(0, 0x05, 0xFF);

        p.write(0, 0x01, 0xFF);
        assert_eq!(p.target_level(0, 0), 0);
        assert_eq!(p.target_level(0, 1), 0);

        // Muting the right side globally drives it to the clamp.
        p.write(0, 0x01, 0xF0);
        assert_eq!(p.target_level(0, 0), 0);
        assert_eq!(p.target_level(0, 1), 0x1F);
    }

    #[test]
    fn test_update_injects_deltas_for_enabled_channel() {
        let mut p = psg(Revision::Huc6280A);
        p.write(0, 0x01, 0xFF);
        p.write(0, 0x00, 0x00);
        for _ in 0..WAVE_SIZE {
            p.write(0, 0x06, 0x1F);
        }
        p.write(0, 0x02, 0x40);
        p.write(0, 0x05, 0xFF);
        p.write(0, 0x04, 0x9F);
        p.update(2000);

        let (left, right) = p.hr_bufs();
        assert!(left.iter().any(|&d| d != 0));
        assert!(right.iter().any(|&d| d != 0));
    }

    #[test]
    fn test_disabled_channel_never_steps() {
        let mut p = psg(Revision::Huc6280A);
        p.write(0, 0x00, 0x00);
        p.write(0, 0x02, 0x10);
        p.update(100_000);
        assert_eq!(p.channels[0].waveform_index, 0);
    }
}
