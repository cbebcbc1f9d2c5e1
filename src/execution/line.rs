//! Line - an ordered sequence of stages and its dispatcher

use crate::core::{error::Result, FlowError, SharedHandler, ABORT_INDEX};
use crate::execution::node::{Delivery, Node};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockReadGuard};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, warn};

/// Capacity of a line's inbox. A line serves a single run, and a run holds
/// at most one unread delivery.
const INBOX_CAPACITY: usize = 1;

/// An ordered sequence of stage nodes sharing one inbox
pub struct Line {
    nodes: RwLock<Vec<Node>>,
    receiver: Mutex<Option<mpsc::Receiver<Delivery>>>,
    stop_tx: watch::Sender<bool>,
}

impl Line {
    /// Build a line with one node per handler, in order
    ///
    /// The handler count is checked before any node is created: it must be
    /// at least one and strictly below [`ABORT_INDEX`].
    pub fn new<I>(handlers: I) -> Result<Line>
    where
        I: IntoIterator<Item = SharedHandler>,
        I::IntoIter: ExactSizeIterator,
    {
        let handlers = handlers.into_iter();
        let count = handlers.len();
        if count >= ABORT_INDEX {
            error!("Refusing to build a line of {} handlers (limit {})", count, ABORT_INDEX);
            return Err(FlowError::TooManyHandlers {
                handlers: count,
                limit: ABORT_INDEX,
            });
        }
        if count == 0 {
            error!("Refusing to build a line without handlers");
            return Err(FlowError::EmptyLine);
        }

        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        let nodes = handlers
            .enumerate()
            .map(|(index, handler)| Node::new(index, handler, tx.clone()))
            .collect();

        Ok(Self::from_parts(nodes, rx))
    }

    fn from_parts(nodes: Vec<Node>, rx: mpsc::Receiver<Delivery>) -> Line {
        let (stop_tx, _) = watch::channel(false);
        Line {
            nodes: RwLock::new(nodes),
            receiver: Mutex::new(Some(rx)),
            stop_tx,
        }
    }

    fn nodes(&self) -> RwLockReadGuard<'_, Vec<Node>> {
        self.nodes.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Independent copy with the same handlers and a fresh inbox
    ///
    /// A stopped line has no handlers left and cannot be duplicated.
    pub fn duplicate(&self) -> Result<Line> {
        if self.is_stopped() {
            return Err(FlowError::LineStopped);
        }
        let (tx, rx) = mpsc::channel(INBOX_CAPACITY);
        let nodes = self
            .nodes()
            .iter()
            .map(|node| node.duplicate(tx.clone()))
            .collect::<Option<Vec<_>>>()
            .ok_or(FlowError::LineStopped)?;
        Ok(Self::from_parts(nodes, rx))
    }

    /// Number of stages (zero once stopped)
    pub fn len(&self) -> usize {
        self.nodes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_stopped(&self) -> bool {
        *self.stop_tx.borrow()
    }

    /// Index of the stage after `index`, `None` at the end of the line
    pub fn successor(&self, index: usize) -> Option<usize> {
        let next = index.checked_add(1)?;
        (next < self.len()).then_some(next)
    }

    /// Deliver `context` to stage `index`. Returns false if there is no such
    /// stage or it was torn down.
    pub fn dispatch_to(&self, index: usize, context: crate::core::Context) -> bool {
        match self.nodes().get(index) {
            Some(node) => node.deliver(context),
            None => false,
        }
    }

    pub fn handler_name(&self, index: usize) -> Option<String> {
        self.nodes()
            .get(index)
            .and_then(Node::handler)
            .map(|handler| handler.name().to_string())
    }

    fn handler_at(&self, index: usize) -> Option<SharedHandler> {
        self.nodes().get(index).and_then(Node::handler)
    }

    /// Dispatcher loop
    ///
    /// Reads deliveries from the inbox, moves the context onto the addressed
    /// stage and spawns that stage's handler without waiting for it. Exits
    /// once the line is stopped or the inbox is closed. Only the first call
    /// on a line runs; later calls return immediately.
    pub async fn run(self: Arc<Self>) {
        let taken = self
            .receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(mut inbox) = taken else {
            warn!("Dispatcher already started for this line");
            return;
        };
        let mut stop_rx = self.stop_tx.subscribe();

        debug!("Dispatcher started for a line of {} stages", self.len());
        loop {
            if *stop_rx.borrow_and_update() {
                break;
            }
            let delivery = tokio::select! {
                biased;
                _ = stop_rx.changed() => continue,
                delivery = inbox.recv() => match delivery {
                    Some(delivery) => delivery,
                    None => break,
                },
            };

            let Some(handler) = self.handler_at(delivery.stage) else {
                break;
            };
            let context = delivery.context;
            if !context.enter_stage(delivery.stage) {
                continue;
            }
            debug!(
                "Run {} entering stage {} ({})",
                context.run_id(),
                delivery.stage,
                handler.name()
            );
            tokio::spawn(async move {
                handler.handle(context).await;
            });
        }
        debug!("Dispatcher exited");
    }

    /// Tear down every node and signal the dispatcher to exit. Idempotent.
    pub fn stop(&self) {
        {
            let mut nodes = self.nodes.write().unwrap_or_else(PoisonError::into_inner);
            for node in nodes.iter_mut() {
                node.teardown();
            }
            nodes.clear();
        }
        self.stop_tx.send_replace(true);
    }
}
