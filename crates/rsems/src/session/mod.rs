//! Call legs and the container routing messages to them

mod container;
mod leg;

pub use container::{Dispatch, Refusal, SessionContainer, SessionFactory, SessionServices};
pub use leg::{CallLeg, CallLegHandler, CallLogic, LegStatus, SessionEvent};
