use crate::backup::notifications::{Audience, Notification};
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use std::sync::mpsc::{channel, Receiver, Sender};
use std::sync::Mutex;

/// Forwards notifications to an [`mpsc`](std::sync::mpsc) channel, for hosts
/// that deliver messages from their own thread.
#[derive(Debug)]
pub struct ChannelNotification {
    tx: Mutex<Sender<(Audience, String)>>,
}

impl ChannelNotification {
    pub fn new() -> (Self, Receiver<(Audience, String)>) {
        let (tx, rx) = channel();
        (Self { tx: Mutex::new(tx) }, rx)
    }
}

impl Notification for ChannelNotification {
    fn send(&self, audience: Audience, msg: &str) -> Result<()> {
        let tx = self
            .tx
            .lock()
            .map_err(|_| Error::channel_send_error("Notification sender lock poisoned"))?;
        tx.send((audience, msg.to_owned()))?;
        Ok(())
    }
}
