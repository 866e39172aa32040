/// A message observed in a joined channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IncomingMessage {
    pub channel: String,
    pub sender: String,
    pub login: String,
    pub host: String,
    pub text: String,
}

/// A reply waiting in the delivery queue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutboundItem {
    pub destination: String,
    pub payload: String,
}

impl OutboundItem {
    pub fn new(destination: impl Into<String>, payload: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            payload: payload.into(),
        }
    }
}
