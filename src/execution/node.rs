//! Node - binds one stage handler to the inbox of its line

use crate::core::{Context, SharedHandler};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::error;

/// A context addressed to a stage of a line
#[derive(Debug)]
pub struct Delivery {
    pub stage: usize,
    pub context: Context,
}

pub type Inbox = mpsc::Sender<Delivery>;

/// One stage of a line
pub struct Node {
    index: usize,
    handler: Option<SharedHandler>,
    inbox: Option<Inbox>,
}

impl Node {
    pub fn new(index: usize, handler: SharedHandler, inbox: Inbox) -> Self {
        Self {
            index,
            handler: Some(handler),
            inbox: Some(inbox),
        }
    }

    /// Same handler, bound to another line's inbox
    pub fn duplicate(&self, inbox: Inbox) -> Option<Node> {
        let handler = self.handler.clone()?;
        Some(Node::new(self.index, handler, inbox))
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn handler(&self) -> Option<SharedHandler> {
        self.handler.clone()
    }

    pub fn is_torn_down(&self) -> bool {
        self.handler.is_none()
    }

    /// Enqueue a context for this stage without blocking the caller.
    ///
    /// A run has at most one unread delivery, so the single-slot inbox of its
    /// line is always empty here and `try_send` never reports `Full`. Should
    /// it happen anyway, the delivery is refused rather than queued.
    pub fn deliver(&self, context: Context) -> bool {
        let Some(inbox) = &self.inbox else {
            return false;
        };
        let delivery = Delivery {
            stage: self.index,
            context,
        };
        match inbox.try_send(delivery) {
            Ok(()) => true,
            Err(TrySendError::Full(delivery)) => {
                error!(
                    "Run {} already has an unread delivery, refusing stage {}",
                    delivery.context.run_id(),
                    self.index
                );
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Drop the inbox sender and the handler. Safe to call more than once.
    pub fn teardown(&mut self) {
        self.inbox = None;
        self.handler = None;
    }
}
