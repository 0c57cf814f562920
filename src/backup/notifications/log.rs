use crate::backup::notifications::{Audience, Notification};
use crate::backup::result_error::result::Result;

/// Writes notifications to the tracing log.
///
/// Operator messages go to the `world_backup::operators` target so a
/// subscriber can route them to a console separately from the rest. Log-only
/// messages repeat what the coordinator already logged, so they stay at debug.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingNotification;

impl Notification for TracingNotification {
    fn send(&self, audience: Audience, msg: &str) -> Result<()> {
        match audience {
            Audience::Operators => tracing::info!(target: "world_backup::operators", "{msg}"),
            Audience::LogOnly => tracing::debug!("{msg}"),
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracing_notification_never_fails() {
        let sink = TracingNotification;
        assert!(sink.send(Audience::Operators, "hello operators").is_ok());
        assert!(sink.send(Audience::LogOnly, "hello log").is_ok());
    }
}
