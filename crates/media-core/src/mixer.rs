//! Conference mixer
//!
//! Every channel writes its own samples into a private [`ShortSampleArray`]
//! and adds them into one shared 32-bit mix. A channel reading back gets the
//! mix minus its own contribution, so nobody hears themselves.

use std::collections::BTreeMap;

use tracing::debug;

use crate::buffer::{IntSampleArray, ShortSampleArray, SIZE_MIX_BUFFER};
use crate::error::{Error, Result};
use crate::timestamp::ts_less;

/// Mixer channel handle
pub type ChannelId = u32;

/// N-party mixer built on timestamp-addressed sample arrays
#[derive(Debug, Default)]
pub struct MultiPartyMixer {
    channels: BTreeMap<ChannelId, ShortSampleArray>,
    mixed: IntSampleArray,
    next_id: ChannelId,
    mix_scratch: Vec<i32>,
    own_scratch: Vec<i16>,
}

impl MultiPartyMixer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new channel
    pub fn add_channel(&mut self) -> ChannelId {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        self.channels.insert(id, ShortSampleArray::new());
        debug!(channel = id, channels = self.channels.len(), "mixer channel added");
        id
    }

    /// Close a channel and take its buffered samples back out of the mix;
    /// returns `false` if it did not exist
    pub fn remove_channel(&mut self, id: ChannelId) -> bool {
        let Some(channel) = self.channels.remove(&id) else {
            return false;
        };
        self.subtract_channel(&channel);
        debug!(channel = id, channels = self.channels.len(), "mixer channel removed");
        true
    }

    fn subtract_channel(&mut self, channel: &ShortSampleArray) {
        if !channel.is_initialized() || !self.mixed.is_initialized() {
            return;
        }

        // only the part both arrays still hold can be taken back
        let capacity = SIZE_MIX_BUFFER as u32;
        let end = if ts_less(self.mixed.last_ts(), channel.last_ts()) {
            self.mixed.last_ts()
        } else {
            channel.last_ts()
        };
        let channel_start = channel.last_ts().wrapping_sub(capacity);
        let mixed_start = self.mixed.last_ts().wrapping_sub(capacity);
        let start = if ts_less(channel_start, mixed_start) { mixed_start } else { channel_start };
        if !ts_less(start, end) {
            return;
        }

        let len = end.wrapping_sub(start) as usize;
        self.mix_scratch.resize(len, 0);
        self.own_scratch.resize(len, 0);
        self.mixed.get(start, &mut self.mix_scratch);
        channel.get(start, &mut self.own_scratch);
        for (sum, own) in self.mix_scratch.iter_mut().zip(&self.own_scratch) {
            *sum -= i32::from(*own);
        }
        self.mixed.put(start, &self.mix_scratch);
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    pub fn has_channel(&self, id: ChannelId) -> bool {
        self.channels.contains_key(&id)
    }

    /// Feed `samples` of channel `id` at timestamp `ts` into the mix
    pub fn put_channel_packet(&mut self, id: ChannelId, ts: u32, samples: &[i16]) -> Result<()> {
        let channel = self.channels.get_mut(&id).ok_or(Error::UnknownChannel(id))?;
        channel.put(ts, samples);

        self.mix_scratch.resize(samples.len(), 0);
        self.mixed.get(ts, &mut self.mix_scratch);
        for (sum, s) in self.mix_scratch.iter_mut().zip(samples) {
            *sum += i32::from(*s);
        }
        self.mixed.put(ts, &self.mix_scratch);
        Ok(())
    }

    /// Read what channel `id` should hear at `[ts, ts + out.len())`
    pub fn get_channel_packet(&mut self, id: ChannelId, ts: u32, out: &mut [i16]) -> Result<()> {
        let channel = self.channels.get(&id).ok_or(Error::UnknownChannel(id))?;

        self.mix_scratch.resize(out.len(), 0);
        self.own_scratch.resize(out.len(), 0);
        self.mixed.get(ts, &mut self.mix_scratch);
        channel.get(ts, &mut self.own_scratch);

        for ((o, mixed), own) in out.iter_mut().zip(&self.mix_scratch).zip(&self.own_scratch) {
            *o = saturate(mixed - i32::from(*own));
        }
        Ok(())
    }

    /// Read the full mix of all channels
    pub fn get_mix(&mut self, ts: u32, out: &mut [i16]) {
        self.mix_scratch.resize(out.len(), 0);
        self.mixed.get(ts, &mut self.mix_scratch);
        for (o, mixed) in out.iter_mut().zip(&self.mix_scratch) {
            *o = saturate(*mixed);
        }
    }
}

fn saturate(sample: i32) -> i16 {
    sample.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_does_not_hear_itself() {
        let mut mixer = MultiPartyMixer::new();
        let a = mixer.add_channel();
        let b = mixer.add_channel();
        let c = mixer.add_channel();

        mixer.put_channel_packet(a, 0, &[100; 8]).unwrap();
        mixer.put_channel_packet(b, 0, &[10; 8]).unwrap();
        mixer.put_channel_packet(c, 0, &[1; 8]).unwrap();

        let mut out = [0i16; 8];
        mixer.get_channel_packet(a, 0, &mut out).unwrap();
        assert_eq!(out, [11; 8]);
        mixer.get_channel_packet(b, 0, &mut out).unwrap();
        assert_eq!(out, [101; 8]);
        mixer.get_mix(0, &mut out);
        assert_eq!(out, [111; 8]);
    }

    #[test]
    fn test_mix_saturates() {
        let mut mixer = MultiPartyMixer::new();
        let a = mixer.add_channel();
        let b = mixer.add_channel();
        let c = mixer.add_channel();
        mixer.put_channel_packet(a, 0, &[30_000; 4]).unwrap();
        mixer.put_channel_packet(b, 0, &[30_000; 4]).unwrap();
        mixer.put_channel_packet(c, 0, &[-5; 4]).unwrap();

        let mut out = [0i16; 4];
        mixer.get_channel_packet(c, 0, &mut out).unwrap();
        assert_eq!(out, [i16::MAX; 4]);
    }

    #[test]
    fn test_unknown_channel() {
        let mut mixer = MultiPartyMixer::new();
        let a = mixer.add_channel();
        assert!(mixer.remove_channel(a));
        assert!(!mixer.remove_channel(a));
        assert_eq!(mixer.put_channel_packet(a, 0, &[1]), Err(Error::UnknownChannel(a)));
        let mut out = [0i16; 1];
        assert_eq!(mixer.get_channel_packet(a, 0, &mut out), Err(Error::UnknownChannel(a)));
    }

    #[test]
    fn test_removed_channel_leaves_the_mix() {
        let mut mixer = MultiPartyMixer::new();
        let a = mixer.add_channel();
        let b = mixer.add_channel();
        let c = mixer.add_channel();

        mixer.put_channel_packet(a, 160, &[100; 8]).unwrap();
        mixer.put_channel_packet(b, 160, &[10; 8]).unwrap();
        mixer.put_channel_packet(c, 160, &[1; 8]).unwrap();
        mixer.put_channel_packet(b, 168, &[20; 8]).unwrap();

        assert!(mixer.remove_channel(a));

        let mut out = [0i16; 8];
        mixer.get_channel_packet(b, 160, &mut out).unwrap();
        assert_eq!(out, [1; 8]);
        mixer.get_channel_packet(c, 160, &mut out).unwrap();
        assert_eq!(out, [10; 8]);
        mixer.get_mix(160, &mut out);
        assert_eq!(out, [11; 8]);
        mixer.get_mix(168, &mut out);
        assert_eq!(out, [20; 8]);
    }

    #[test]
    fn test_silent_before_any_packet() {
        let mut mixer = MultiPartyMixer::new();
        let a = mixer.add_channel();
        let mut out = [3i16; 16];
        mixer.get_channel_packet(a, 1234, &mut out).unwrap();
        assert_eq!(out, [0; 16]);
    }
}
