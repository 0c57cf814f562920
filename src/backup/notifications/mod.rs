use crate::backup::result_error::result::Result;
use derive_more::Display;
use std::sync::Arc;

pub mod channel;
pub mod log;

/// Who a notification is meant for.
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub enum Audience {
    /// Privileged observers as well as the log.
    #[display("operators")]
    Operators,
    /// The log only.
    #[display("log")]
    LogOnly,
}

/// Delivers backup notifications to the host.
///
/// Called from whichever thread runs the backup, so implementations must not
/// assume they run on the thread that requested it.
pub trait Notification: Send + Sync {
    fn send(&self, audience: Audience, msg: &str) -> Result<()>;
}

impl<N: Notification + ?Sized> Notification for Arc<N> {
    fn send(&self, audience: Audience, msg: &str) -> Result<()> {
        self.as_ref().send(audience, msg)
    }
}

impl<N: Notification + ?Sized> Notification for Box<N> {
    fn send(&self, audience: Audience, msg: &str) -> Result<()> {
        self.as_ref().send(audience, msg)
    }
}
