use std::collections::VecDeque;
use std::error::Error;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::{Buf, BufMut, BytesMut};
use futures::{SinkExt, StreamExt};
use realmd_common::constants::CODEC_BYTESMUT_ALLOCATION_LIMIT;
use realmd_common::error::RealmError;
use realmd_common::proto::{ClientRequest, ClientResponse};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;
use tokio::sync::mpsc::unbounded_channel;
use tokio_util::codec::{Decoder, Encoder, Framed};

use crate::authz::PeerCred;
use crate::daemon::Daemon;
use crate::diagnostics::Invocation;

static CONNECTION_COUNTER: AtomicU64 = AtomicU64::new(0);

//=== the codec

#[derive(Default)]
pub struct ClientCodec;

impl Decoder for ClientCodec {
    type Error = io::Error;
    type Item = ClientRequest;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        trace!("Attempting to decode request ...");
        let Some(pos) = src.iter().position(|b| *b == b'\n') else {
            if src.len() > CODEC_BYTESMUT_ALLOCATION_LIMIT {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidData,
                    "request too large",
                ));
            }
            return Ok(None);
        };
        let line = src.split_to(pos);
        src.advance(1);
        serde_json::from_slice::<ClientRequest>(&line)
            .map(Some)
            .map_err(|e| {
                error!("socket decoding error -> {:?}", e);
                io::Error::new(io::ErrorKind::InvalidData, "JSON decode error")
            })
    }
}

impl Encoder<ClientResponse> for ClientCodec {
    type Error = io::Error;

    fn encode(&mut self, msg: ClientResponse, dst: &mut BytesMut) -> Result<(), Self::Error> {
        trace!("Attempting to send response -> {:?} ...", msg);
        let data = serde_json::to_vec(&msg).map_err(|e| {
            error!("socket encoding error -> {:?}", e);
            io::Error::new(io::ErrorKind::Other, "JSON encode error")
        })?;
        dst.put(data.as_slice());
        dst.put_u8(b'\n');
        Ok(())
    }
}

fn operation_of(req: &ClientRequest) -> Option<String> {
    match req {
        ClientRequest::Discover { options, .. }
        | ClientRequest::Join { options, .. }
        | ClientRequest::Leave { options, .. }
        | ClientRequest::ChangeLoginPolicy { options, .. } => options.operation.clone(),
        ClientRequest::ListRealms | ClientRequest::Cancel { .. } | ClientRequest::Status => None,
    }
}

/// A request read while another was running. A cancel takes effect as soon as it is read
/// and only its answer waits its turn.
enum Queued {
    Request(ClientRequest),
    Answered(ClientResponse),
}

/// Serve one connection. Requests are answered in order, each with its diagnostics
/// streamed ahead of the final response. If the client goes away mid request, the
/// request is cancelled.
pub async fn handle_client(sock: UnixStream, daemon: Arc<Daemon>) -> Result<(), Box<dyn Error>> {
    debug!("Accepted connection");

    let Ok(ucred) = sock.peer_cred() else {
        return Err(Box::new(io::Error::new(
            io::ErrorKind::Other,
            "Unable to verify peer credentials.",
        )));
    };
    let peer = PeerCred {
        uid: ucred.uid(),
        gid: ucred.gid(),
        pid: ucred.pid(),
    };

    let conn = CONNECTION_COUNTER.fetch_add(1, Ordering::Relaxed);
    let _hold = daemon.hold(&format!("connection-{}", conn));

    let (mut writer, mut reader) = Framed::new(sock, ClientCodec).split();
    let mut queued: VecDeque<Queued> = VecDeque::new();
    let mut reading = true;
    let mut connected = true;

    trace!("Waiting for requests ...");
    loop {
        let req = match queued.pop_front() {
            Some(Queued::Request(req)) => req,
            Some(Queued::Answered(resp)) => {
                writer.send(resp).await?;
                writer.flush().await?;
                continue;
            }
            None if !reading => break,
            None => match reader.next().await {
                Some(Ok(req)) => req,
                Some(Err(e)) => {
                    warn!(?e, "invalid request from client");
                    let _ = writer
                        .send(ClientResponse::Error(RealmError::InvalidArgument(
                            "Invalid request".to_string(),
                        )))
                        .await;
                    break;
                }
                None => break,
            },
        };

        let (diag_tx, mut diag_rx) = unbounded_channel::<String>();
        let inv = Invocation::new(operation_of(&req), Some(diag_tx));
        let request = daemon.handle_request(&peer, req, &inv);
        tokio::pin!(request);

        let resp = loop {
            tokio::select! {
                resp = &mut request => break resp,
                Some(line) = diag_rx.recv() => {
                    if connected && writer.send(ClientResponse::Diagnostics(line)).await.is_err() {
                        debug!("client went away, cancelling request");
                        connected = false;
                        reading = false;
                        inv.cancel();
                    }
                }
                next = reader.next(), if reading => match next {
                    Some(Ok(ClientRequest::Cancel { operation })) => {
                        let resp = match daemon.cancel(&peer, &operation) {
                            Ok(()) => ClientResponse::Success,
                            Err(e) => ClientResponse::Error(e),
                        };
                        queued.push_back(Queued::Answered(resp));
                    }
                    Some(Ok(req)) => queued.push_back(Queued::Request(req)),
                    Some(Err(e)) => {
                        warn!(?e, "invalid request from client");
                        reading = false;
                    }
                    None => {
                        debug!("client disconnected, cancelling request");
                        reading = false;
                        connected = false;
                        inv.cancel();
                    }
                },
            }
        };

        if !connected {
            break;
        }
        while let Ok(line) = diag_rx.try_recv() {
            writer.send(ClientResponse::Diagnostics(line)).await?;
        }
        writer.send(resp).await?;
        writer.flush().await?;
        debug!("flushed response!");
    }

    debug!("Disconnecting client ...");
    Ok(())
}

/// Accept connections until told to stop.
pub async fn run_listener(
    listener: UnixListener,
    daemon: Arc<Daemon>,
    mut shutdown_rx: broadcast::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                break;
            }
            accept_res = listener.accept() => {
                match accept_res {
                    Ok((socket, _addr)) => {
                        let daemon_ref = Arc::clone(&daemon);
                        tokio::spawn(async move {
                            if let Err(e) = handle_client(socket, daemon_ref).await {
                                error!("handle_client error occurred; error = {:?}", e);
                            }
                        });
                    }
                    Err(err) => {
                        error!("Error while handling connection -> {:?}", err);
                    }
                }
            }
        }
    }
    info!("Stopped listener");
}

#[cfg(test)]
mod tests {
    use super::*;
    use realmd_common::proto::Options;

    #[test]
    fn test_codec_splits_lines() {
        let mut codec = ClientCodec;
        let mut buf = BytesMut::new();
        buf.put_slice(b"\"ListRealms\"\n\"Stat");
        assert!(matches!(
            codec.decode(&mut buf),
            Ok(Some(ClientRequest::ListRealms))
        ));
        assert!(matches!(codec.decode(&mut buf), Ok(None)));
        buf.put_slice(b"us\"\n");
        assert!(matches!(codec.decode(&mut buf), Ok(Some(ClientRequest::Status))));

        buf.put_slice(b"{nonsense}\n");
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn test_operation_of() {
        let options = Options {
            operation: Some("op-1".to_string()),
            ..Default::default()
        };
        let req = ClientRequest::Discover {
            string: "example.com".to_string(),
            options,
        };
        assert_eq!(operation_of(&req), Some("op-1".to_string()));
        assert_eq!(operation_of(&ClientRequest::Status), None);
    }
}
