//! Run execution: admission, supervision and live fan-out.

pub mod broadcast;
pub mod cancel;
pub mod retry;
pub mod supervisor;

pub use broadcast::RunBroadcaster;
pub use cancel::CancelMap;
pub use retry::RetryPolicy;
pub use supervisor::{Attachment, CancelAck, CreateRun, RecoveryReport, Supervisor};
