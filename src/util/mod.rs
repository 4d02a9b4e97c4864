//! Small shared helpers.

pub mod clock;
pub mod http_date;
pub(crate) mod lock;

pub use clock::{Clock, ManualClock, SystemClock};
