use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};

use crate::{
    error::GraphOpError,
    properties::{ObjectType, RowId},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventAction {
    Chgrp,
    Delete,
}

impl EventAction {
    /// Action tag written to the event log.
    pub fn tag(&self) -> &'static str {
        match self {
            EventAction::Chgrp => "CHGRP",
            EventAction::Delete => "DELETE",
        }
    }
}

impl Display for EventAction {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{}", self.tag())
    }
}

/// Published once a step's rows have been released, so downstream listeners (indexers,
/// auditors) can pick up the change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventLogMessage {
    pub action: EventAction,
    pub object_type: ObjectType,
    pub ids: Vec<RowId>,
}

impl EventLogMessage {
    pub fn new(action: EventAction, object_type: ObjectType, ids: Vec<RowId>) -> Self {
        EventLogMessage {
            action,
            object_type,
            ids,
        }
    }
}

impl Display for EventLogMessage {
    fn fmt(&self, f: &mut Formatter) -> std::fmt::Result {
        write!(f, "{} {}:{:?}", self.action, self.object_type, self.ids)
    }
}

/// Application-wide bus for [`EventLogMessage`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: UnboundedSender<EventLogMessage>,
}

impl EventBus {
    pub fn new(tx: UnboundedSender<EventLogMessage>) -> Self {
        EventBus { tx }
    }

    /// A bus plus the receiving end for a single listener.
    pub fn channel() -> (EventBus, UnboundedReceiver<EventLogMessage>) {
        let (tx, rx) = unbounded_channel();
        (EventBus { tx }, rx)
    }

    pub fn publish(&self, message: EventLogMessage) -> Result<(), GraphOpError> {
        tracing::debug!("[EventBus] publishing {}", message);
        self.tx.send(message)?;
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_log::test;

    #[test]
    fn publish_delivers_and_fails_when_closed() {
        let (bus, mut rx) = EventBus::channel();
        let msg = EventLogMessage::new(
            EventAction::Chgrp,
            ObjectType::new("Image").unwrap(),
            vec![1, 2],
        );
        bus.publish(msg.clone()).unwrap();
        assert_eq!(rx.try_recv().unwrap(), msg);
        assert_eq!(msg.to_string(), "CHGRP Image:[1, 2]");

        drop(rx);
        assert!(bus.is_closed());
        let err = bus.publish(msg).unwrap_err();
        assert!(matches!(err, GraphOpError::Io(_)));
    }
}
