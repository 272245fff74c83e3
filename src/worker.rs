// Per-adapter worker: the single place requests for one adapter are handled
//
// The dispatcher and its session state live on a blocking task. Everything
// else talks to it through the work queue, so requests for one adapter run
// strictly one after another.

use log::{debug, info, warn};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::dispatch::{Dispatch, Dispatcher};
use crate::message::Request;
use crate::session::AdapterHandle;

#[derive(Debug)]
pub enum WorkItem {
    Request {
        request: Request,
        reply: oneshot::Sender<Dispatch>,
    },
    InquiryComplete,
    SetUp(bool),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorkerError {
    #[error("worker for hci{index} has stopped")]
    Stopped { index: u16 },
}

#[derive(Debug, Clone)]
pub struct AdapterWorker {
    handle: AdapterHandle,
    queue: mpsc::UnboundedSender<WorkItem>,
}

impl AdapterWorker {
    /// Starts the worker. It stops once every `AdapterWorker` clone is gone.
    pub fn spawn(mut dispatcher: Dispatcher) -> (Self, JoinHandle<()>) {
        let handle = dispatcher.handle().clone();
        let (queue, mut rx) = mpsc::unbounded_channel();

        let name = handle.name();
        let task = tokio::task::spawn_blocking(move || {
            dispatcher.refresh();
            info!("Worker for {name} started");

            while let Some(item) = rx.blocking_recv() {
                match item {
                    WorkItem::Request { request, reply } => {
                        let dispatch = dispatcher.dispatch(request);
                        if reply.send(dispatch).is_err() {
                            debug!("Caller went away before the reply was ready");
                        }
                    }
                    WorkItem::InquiryComplete => dispatcher.inquiry_complete(),
                    WorkItem::SetUp(up) => dispatcher.set_up(up),
                }
            }
            info!("Worker for {name} stopped");
        });

        (Self { handle, queue }, task)
    }

    pub fn handle(&self) -> &AdapterHandle {
        &self.handle
    }

    /// Queues a request. Requests are handled in the order they are queued.
    pub fn enqueue(&self, request: Request) -> Result<oneshot::Receiver<Dispatch>, WorkerError> {
        let (reply, rx) = oneshot::channel();
        self.send(WorkItem::Request { request, reply })?;
        Ok(rx)
    }

    pub fn inquiry_complete(&self) -> Result<(), WorkerError> {
        self.send(WorkItem::InquiryComplete)
    }

    pub fn set_up(&self, up: bool) -> Result<(), WorkerError> {
        self.send(WorkItem::SetUp(up))
    }

    fn send(&self, item: WorkItem) -> Result<(), WorkerError> {
        self.queue.send(item).map_err(|_| {
            warn!("Worker for {} is gone", self.handle.name());
            self.stopped()
        })
    }

    fn stopped(&self) -> WorkerError {
        WorkerError::Stopped {
            index: self.handle.index(),
        }
    }
}
