//! The accept loop and per-connection request handling.
//!
//! One task per accepted connection; requests on a connection are handled in
//! order, each under a deadline derived from its operation budget.
//! Fire-and-forget operations are acked as soon as they are parsed and then
//! applied out-of-band, so a client that hangs up immediately still gets its
//! event recorded.

use std::sync::Arc;
use std::time::Duration;

use clai_protocol::ClientOp;
use clai_protocol::RequestEnvelope;
use clai_protocol::ResponseEnvelope;
use clai_protocol::ResponsePayload;
use clai_protocol::WireError;
use clai_protocol::WireErrorKind;
use clai_protocol::read_frame;
use clai_protocol::write_frame;
use tokio::io::BufStream;
use tokio::net::UnixListener;
use tokio::net::UnixStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::warn;

use crate::processor::MessageProcessor;
use crate::processor::ServerState;

pub async fn run(
    listener: UnixListener,
    state: Arc<ServerState>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => {
                match accepted {
                    Ok((stream, _addr)) => {
                        let state = Arc::clone(&state);
                        let shutdown = shutdown.clone();
                        tokio::spawn(async move {
                            if let Err(e) = handle_connection(stream, state, shutdown).await {
                                debug!(error = %e, "connection closed with error");
                            }
                        });
                    }
                    Err(e) => {
                        warn!(error = %e, "accept failed");
                    }
                }
            }
        }
    }
}

async fn handle_connection(
    stream: UnixStream,
    state: Arc<ServerState>,
    shutdown: CancellationToken,
) -> Result<(), clai_protocol::FrameError> {
    let mut stream = BufStream::new(stream);
    let processor = MessageProcessor::new(Arc::clone(&state));

    // Fire-and-forget operations are acked immediately but applied through
    // this ordered queue, so a Started/Ended pair sent back-to-back on one
    // connection can never be applied in the wrong order. The worker keeps
    // draining after the client hangs up.
    let (event_tx, event_rx) = tokio::sync::mpsc::channel::<ClientOp>(64);
    let event_worker = tokio::spawn(drain_events(event_rx, Arc::clone(&state)));

    loop {
        let request: Option<RequestEnvelope> = tokio::select! {
            _ = shutdown.cancelled() => break,
            read = read_frame(&mut stream) => read?,
        };
        let Some(request) = request else {
            break; // clean EOF
        };

        let response = dispatch(&processor, &event_tx, request).await;
        write_frame(&mut stream, &response).await?;
    }
    drop(event_tx);
    let _ = event_worker.await;
    Ok(())
}

/// Apply queued fire-and-forget operations in arrival order, each under the
/// short fixed budget.
async fn drain_events(
    mut rx: tokio::sync::mpsc::Receiver<ClientOp>,
    state: Arc<ServerState>,
) {
    let processor = MessageProcessor::new(state);
    while let Some(op) = rx.recv().await {
        let budget = Duration::from_millis(op.budget_ms());
        match tokio::time::timeout(budget, processor.process(op)).await {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => debug!(error = %e, "fire-and-forget op rejected"),
            Err(_) => warn!("fire-and-forget op exceeded its budget"),
        }
    }
}

async fn dispatch(
    processor: &MessageProcessor,
    event_tx: &tokio::sync::mpsc::Sender<ClientOp>,
    request: RequestEnvelope,
) -> ResponseEnvelope {
    let request_id = request.request_id;
    let budget = Duration::from_millis(request.op.budget_ms());

    if request.op.is_fire_and_forget() {
        if let Err(e) = event_tx.send(request.op).await {
            warn!(error = %e, "event queue closed");
        }
        return ResponseEnvelope {
            request_id,
            payload: ResponsePayload::Ok {
                body: clai_protocol::ResponseBody::Ack,
            },
        };
    }

    let payload = match tokio::time::timeout(budget, processor.process(request.op)).await {
        Ok(Ok(body)) => ResponsePayload::Ok { body },
        Ok(Err(error)) => ResponsePayload::Error { error },
        Err(_) => ResponsePayload::Error {
            error: WireError::new(WireErrorKind::DeadlineExceeded, "deadline exceeded"),
        },
    };
    ResponseEnvelope {
        request_id,
        payload,
    }
}
