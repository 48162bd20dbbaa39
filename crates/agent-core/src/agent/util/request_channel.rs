//! Request/response plumbing for actor tasks.
//!
//! An actor owns a [RequestReceiver] and answers each [Request] through its oneshot sender.
//! Handles hold a clonable [RequestSender] and await the reply with [RequestSender::send_recv].

use tokio::sync::{
    mpsc,
    oneshot,
};
use tracing::{
    error,
    trace,
};

/// Default number of requests that can be buffered before senders wait.
pub const DEFAULT_REQUEST_BUFFER: usize = 16;

/// A request to a specific task
#[derive(Debug)]
pub struct Request<Req, Res, Err> {
    /// Request payload
    pub payload: Req,
    /// Response channel
    pub res_tx: oneshot::Sender<Result<Res, Err>>,
}

impl<Req, Res, Err> Request<Req, Res, Err>
where
    Req: std::fmt::Debug + Send + Sync + 'static,
    Res: std::fmt::Debug + Send + 'static,
    Err: std::fmt::Debug + std::error::Error + Send + Sync + 'static,
{
    pub fn respond(self, response: Result<Res, Err>) {
        self.res_tx
            .send(response)
            .map_err(|err| error!(?err, "failed to send response"))
            .ok();
    }
}

/// Responds to a request whose payload has already been moved out.
macro_rules! respond {
    ($req:expr, $res:expr) => {
        $req.res_tx
            .send($res)
            .map_err(|err| tracing::error!(?err, "failed to send response"))
            .ok();
    };
}

pub(crate) use respond;

#[derive(Debug)]
pub struct RequestSender<Req, Res, Err> {
    tx: mpsc::Sender<Request<Req, Res, Err>>,
}

impl<Req, Res, Err> Clone for RequestSender<Req, Res, Err> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

impl<Req, Res, Err> RequestSender<Req, Res, Err>
where
    Req: std::fmt::Debug + Send + Sync + 'static,
    Res: std::fmt::Debug + Send + 'static,
    Err: std::fmt::Debug + std::error::Error + Send + Sync + 'static,
{
    pub fn new(tx: mpsc::Sender<Request<Req, Res, Err>>) -> Self {
        Self { tx }
    }

    /// Sends `payload` and waits for the reply.
    ///
    /// Returns [None] if the receiving task has exited or dropped the response sender without
    /// answering.
    pub async fn send_recv(&self, payload: Req) -> Option<Result<Res, Err>> {
        trace!(?payload, "sending payload");
        let (res_tx, res_rx) = oneshot::channel();
        let request = Request { payload, res_tx };

        if self.tx.send(request).await.is_err() {
            error!("request receiver has closed");
            return None;
        }

        match res_rx.await {
            Ok(res) => Some(res),
            Err(_) => {
                error!("response tx dropped before sending a result");
                None
            },
        }
    }

    /// Whether the receiving task has exited.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

pub type RequestReceiver<Req, Res, Err> = mpsc::Receiver<Request<Req, Res, Err>>;

pub fn new_request_channel<Req, Res, Err>() -> (RequestSender<Req, Res, Err>, RequestReceiver<Req, Res, Err>)
where
    Req: std::fmt::Debug + Send + Sync + 'static,
    Res: std::fmt::Debug + Send + 'static,
    Err: std::fmt::Debug + std::error::Error + Send + Sync + 'static,
{
    new_request_channel_with_capacity(DEFAULT_REQUEST_BUFFER)
}

pub fn new_request_channel_with_capacity<Req, Res, Err>(
    capacity: usize,
) -> (RequestSender<Req, Res, Err>, RequestReceiver<Req, Res, Err>)
where
    Req: std::fmt::Debug + Send + Sync + 'static,
    Res: std::fmt::Debug + Send + 'static,
    Err: std::fmt::Debug + std::error::Error + Send + Sync + 'static,
{
    let (tx, rx) = mpsc::channel(capacity);
    (RequestSender::new(tx), rx)
}
