//! Stream input handle
//!
//! Every stream is fed through one unbounded channel. Messaging clients,
//! parent streams (branch, join, merge) and `write_to_stream` all push into
//! a cloned [`StreamInput`]; the run loop is the single consumer.

use tokio::sync::mpsc;

use crate::message::Message;

/// Item carried by a stream's input channel
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    /// A message to run through the pipeline
    Message(Message),
    /// The upstream source has ended
    Completed,
}

/// Cloneable sending half of a stream's input channel
#[derive(Debug, Clone)]
pub struct StreamInput {
    tx: mpsc::UnboundedSender<Inbound>,
}

impl StreamInput {
    /// Create an input handle together with the receiving half
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Inbound>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }

    /// Push a message; returns false once the stream has stopped listening
    pub fn send(&self, message: Message) -> bool {
        self.tx.send(Inbound::Message(message)).is_ok()
    }

    /// Signal the end of the source
    pub fn complete(&self) {
        let _ = self.tx.send(Inbound::Completed);
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}
