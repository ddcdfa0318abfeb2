//! # rsems-media-core
//!
//! Media side of the server:
//!
//! - [`timestamp`]: wrap-aware comparison of 32-bit stream and 48-bit wall
//!   clock timestamps
//! - [`buffer`]: [`SampleArray`], a ring buffer addressed by timestamp that
//!   absorbs late and out-of-order audio
//! - [`mixer`]: [`MultiPartyMixer`] for conferences
//! - [`scheduler`]: [`MediaScheduler`], the pool of ticking threads that
//!   pumps the streams of every [`MediaSession`]
//!
//! ```
//! use rsems_media_core::{ShortSampleArray, SIZE_MIX_BUFFER};
//!
//! let mut array = ShortSampleArray::new();
//! array.put(100, &[1; 20]);
//!
//! let mut out = [9i16; 20];
//! array.get(90, &mut out);
//! assert_eq!(&out[..10], &[0; 10]);
//! assert_eq!(&out[10..], &[1; 10]);
//! assert!(SIZE_MIX_BUFFER.is_power_of_two());
//! ```

pub mod buffer;
pub mod error;
pub mod mixer;
pub mod scheduler;
pub mod timestamp;

pub use buffer::{IntSampleArray, SampleArray, ShortSampleArray, SIZE_MIX_BUFFER};
pub use error::{Error, Result};
pub use mixer::{ChannelId, MultiPartyMixer};
pub use scheduler::{MediaScheduler, MediaSchedulerConfig, MediaSession, SchedRequest, SchedRequestKind};
pub use timestamp::{sys_ts_less, ts_less, WallClock, WALLCLOCK_MASK};
