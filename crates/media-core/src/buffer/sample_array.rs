//! Ring buffer of samples addressed by a wrapping 32-bit timestamp
//!
//! The array keeps the most recent [`SIZE_MIX_BUFFER`] samples that were
//! written, i.e. the window `[last_ts - SIZE_MIX_BUFFER, last_ts)`. Writes
//! older than that window are dropped, writes ahead of it zero the gap they
//! skip over, and reads outside of it see silence.

use tracing::trace;

use crate::timestamp::ts_less;

/// Capacity in samples. Must be a power of two.
pub const SIZE_MIX_BUFFER: usize = 1 << 14;

const MASK: u32 = (SIZE_MIX_BUFFER - 1) as u32;
const CAPACITY: u32 = SIZE_MIX_BUFFER as u32;

/// Timed array of samples
#[derive(Clone)]
pub struct SampleArray<T> {
    samples: Box<[T]>,
    last_ts: u32,
    init: bool,
}

/// 16-bit samples
pub type ShortSampleArray = SampleArray<i16>;

/// 32-bit samples, used for mixing sums
pub type IntSampleArray = SampleArray<i32>;

impl<T: Copy + Default> SampleArray<T> {
    pub fn new() -> Self {
        SampleArray {
            samples: vec![T::default(); SIZE_MIX_BUFFER].into_boxed_slice(),
            last_ts: 0,
            init: false,
        }
    }

    /// One past the newest written timestamp
    pub fn last_ts(&self) -> u32 {
        self.last_ts
    }

    pub fn is_initialized(&self) -> bool {
        self.init
    }

    pub fn clear_all(&mut self) {
        self.samples.fill(T::default());
    }

    /// Zero the samples for `[start_ts, end_ts)`
    pub fn clear(&mut self, start_ts: u32, end_ts: u32) {
        if end_ts.wrapping_sub(start_ts) >= CAPACITY {
            self.clear_all();
            return;
        }

        let start_off = (start_ts & MASK) as usize;
        let end_off = (end_ts & MASK) as usize;
        if start_off <= end_off {
            self.samples[start_off..end_off].fill(T::default());
        } else {
            self.samples[start_off..].fill(T::default());
            self.samples[..end_off].fill(T::default());
        }
    }

    fn write(&mut self, ts: u32, buffer: &[T]) {
        let off = (ts & MASK) as usize;
        let first = buffer.len().min(SIZE_MIX_BUFFER - off);
        self.samples[off..off + first].copy_from_slice(&buffer[..first]);
        let rest = buffer.len() - first;
        self.samples[..rest].copy_from_slice(&buffer[first..]);
    }

    fn read(&self, ts: u32, buffer: &mut [T]) {
        let off = (ts & MASK) as usize;
        let first = buffer.len().min(SIZE_MIX_BUFFER - off);
        buffer[..first].copy_from_slice(&self.samples[off..off + first]);
        let rest = buffer.len() - first;
        buffer[first..].copy_from_slice(&self.samples[..rest]);
    }

    /// Store `buffer` at timestamp `ts`.
    ///
    /// Only the newest [`SIZE_MIX_BUFFER`] samples of an oversized buffer are
    /// kept. A write entirely older than the window is dropped.
    pub fn put(&mut self, ts: u32, buffer: &[T]) {
        let (ts, buffer) = if buffer.len() > SIZE_MIX_BUFFER {
            let skip = buffer.len() - SIZE_MIX_BUFFER;
            (ts.wrapping_add(skip as u32), &buffer[skip..])
        } else {
            (ts, buffer)
        };

        if !self.init {
            self.clear_all();
            self.last_ts = ts;
            self.init = true;
        }

        if ts_less(ts, self.last_ts.wrapping_sub(CAPACITY)) {
            trace!(ts, last_ts = self.last_ts, "dropping too old samples");
            return;
        }

        if ts_less(self.last_ts, ts) {
            self.clear(self.last_ts, ts);
        }

        self.write(ts, buffer);
        let end = ts.wrapping_add(buffer.len() as u32);
        if ts_less(self.last_ts, end) {
            self.last_ts = end;
        }
    }

    /// Fill `buffer` with the samples at `[ts, ts + buffer.len())`.
    ///
    /// Every position outside the valid window reads as zero, so the whole
    /// buffer is always written.
    pub fn get(&self, ts: u32, buffer: &mut [T]) {
        let size = buffer.len();
        if !self.init || size == 0 {
            buffer.fill(T::default());
            return;
        }

        let window_start = self.last_ts.wrapping_sub(CAPACITY);

        // leading samples older than the window
        let head = if ts_less(ts, window_start) {
            (window_start.wrapping_sub(ts) as usize).min(size)
        } else {
            0
        };
        // samples from `ts` up to `last_ts`
        let valid_end = if ts_less(ts, self.last_ts) {
            (self.last_ts.wrapping_sub(ts) as usize).min(size)
        } else {
            0
        };

        if head >= valid_end {
            buffer.fill(T::default());
            return;
        }

        buffer[..head].fill(T::default());
        self.read(ts.wrapping_add(head as u32), &mut buffer[head..valid_end]);
        buffer[valid_end..].fill(T::default());
    }
}

impl<T: Copy + Default> Default for SampleArray<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for SampleArray<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SampleArray")
            .field("last_ts", &self.last_ts)
            .field("init", &self.init)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(len: usize, base: i16) -> Vec<i16> {
        (0..len).map(|i| base + i as i16).collect()
    }

    #[test]
    fn test_uninitialized_reads_silence() {
        let array = ShortSampleArray::new();
        let mut out = vec![7i16; 32];
        array.get(0, &mut out);
        assert!(out.iter().all(|s| *s == 0));
        assert!(!array.is_initialized());
    }

    #[test]
    fn test_read_before_first_write_is_split() {
        let mut array = ShortSampleArray::new();
        let data = ramp(20, 1);
        array.put(100, &data);
        assert_eq!(array.last_ts(), 120);

        let mut out = vec![0i16; 20];
        array.get(90, &mut out);
        assert!(out[..10].iter().all(|s| *s == 0));
        assert_eq!(&out[10..], &data[..10]);
    }

    #[test]
    fn test_read_past_last_ts_zero_fills_tail() {
        let mut array = ShortSampleArray::new();
        let data = ramp(20, 1);
        array.put(100, &data);

        let mut out = vec![9i16; 20];
        array.get(110, &mut out);
        assert_eq!(&out[..10], &data[10..]);
        assert!(out[10..].iter().all(|s| *s == 0));
    }

    #[test]
    fn test_gap_is_zeroed() {
        let mut array = ShortSampleArray::new();
        array.put(0, &ramp(10, 1));
        // wraps over stale content from an earlier lap
        array.put(SIZE_MIX_BUFFER as u32 + 20, &ramp(10, 100));

        let mut out = vec![5i16; 10];
        array.get(SIZE_MIX_BUFFER as u32 + 10, &mut out);
        assert!(out.iter().all(|s| *s == 0));
    }

    #[test]
    fn test_late_write_dropped() {
        let mut array = ShortSampleArray::new();
        array.put(50_000, &ramp(10, 1));
        let before = array.clone();

        array.put(50_000 - SIZE_MIX_BUFFER as u32 - 100, &ramp(10, 300));
        assert_eq!(array.last_ts(), before.last_ts());
        assert_eq!(array.samples, before.samples);
    }

    #[test]
    fn test_late_write_inside_window_does_not_move_last_ts() {
        let mut array = ShortSampleArray::new();
        array.put(1000, &ramp(10, 1));
        array.put(990, &ramp(5, 50));
        assert_eq!(array.last_ts(), 1010);

        let mut out = vec![0i16; 5];
        array.get(990, &mut out);
        assert_eq!(out, ramp(5, 50));
    }

    #[test]
    fn test_write_across_wrap_point() {
        let mut array = IntSampleArray::new();
        let ts = u32::MAX - 4;
        let data: Vec<i32> = (1..=10).collect();
        array.put(ts, &data);
        assert_eq!(array.last_ts(), 5);

        let mut out = vec![0i32; 10];
        array.get(ts, &mut out);
        assert_eq!(out, data);
    }

    #[test]
    fn test_clear_range() {
        let mut array = ShortSampleArray::new();
        array.put(0, &ramp(30, 1));
        array.clear(10, 20);

        let mut out = vec![0i16; 30];
        array.get(0, &mut out);
        assert_eq!(&out[..10], &ramp(10, 1)[..]);
        assert!(out[10..20].iter().all(|s| *s == 0));
        assert_eq!(out[20], 21);
    }
}
