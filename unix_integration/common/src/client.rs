use std::error::Error;
use std::io::{Error as IoError, ErrorKind};

use bytes::{Buf, BufMut, BytesMut};
use futures::{SinkExt, StreamExt};
use tokio::net::UnixStream;
use tokio::time::{self, Duration};
use tokio_util::codec::Framed;
use tokio_util::codec::{Decoder, Encoder};

use crate::constants::CODEC_BYTESMUT_ALLOCATION_LIMIT;
use crate::proto::{ClientRequest, ClientResponse};

/// Newline delimited JSON, the daemon answers each request with zero or more diagnostic
/// lines followed by one final response.
struct DaemonCodec;

impl Decoder for DaemonCodec {
    type Error = IoError;
    type Item = ClientResponse;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(pos) = src.iter().position(|b| *b == b'\n') else {
            if src.len() > CODEC_BYTESMUT_ALLOCATION_LIMIT {
                return Err(IoError::new(ErrorKind::InvalidData, "response too large"));
            }
            return Ok(None);
        };
        let line = src.split_to(pos);
        src.advance(1);
        serde_json::from_slice::<ClientResponse>(&line)
            .map(Some)
            .map_err(|e| {
                error!("socket decoding error -> {:?}", e);
                IoError::new(ErrorKind::InvalidData, "JSON decode error")
            })
    }
}

impl Encoder<ClientRequest> for DaemonCodec {
    type Error = IoError;

    fn encode(&mut self, msg: ClientRequest, dst: &mut BytesMut) -> Result<(), Self::Error> {
        let data = serde_json::to_vec(&msg).map_err(|e| {
            error!("socket encoding error -> {:?}", e);
            IoError::new(ErrorKind::Other, "JSON encode error")
        })?;
        debug!("Attempting to send request -> {}", msg.as_safe_string());
        dst.put(data.as_slice());
        dst.put_u8(b'\n');
        Ok(())
    }
}

pub struct DaemonClient {
    stream: Framed<UnixStream, DaemonCodec>,
    default_timeout: u64,
}

impl DaemonClient {
    pub async fn new(path: &str, default_timeout: u64) -> Result<Self, Box<dyn Error>> {
        trace!(?path);
        let stream = UnixStream::connect(path).await.map_err(|e| {
            error!(
                "Unix socket stream setup error while connecting to {} -> {:?}",
                path, e
            );
            e
        })?;
        trace!("connected");

        Ok(DaemonClient {
            stream: Framed::new(stream, DaemonCodec),
            default_timeout,
        })
    }

    async fn call_inner<F>(
        &mut self,
        req: ClientRequest,
        mut on_diagnostics: F,
    ) -> Result<ClientResponse, Box<dyn Error>>
    where
        F: FnMut(&str),
    {
        self.stream.send(req).await?;
        self.stream.flush().await?;
        trace!("flushed, waiting ...");

        loop {
            match self.stream.next().await {
                Some(Ok(ClientResponse::Diagnostics(line))) => on_diagnostics(&line),
                Some(Ok(res)) => {
                    debug!("Response -> {:?}", res);
                    return Ok(res);
                }
                Some(Err(err)) => {
                    error!(?err, "Error reading response from realmd");
                    return Err(Box::new(err));
                }
                None => {
                    error!("realmd closed the connection before responding");
                    return Err(Box::new(IoError::new(
                        ErrorKind::UnexpectedEof,
                        "connection closed",
                    )));
                }
            }
        }
    }

    /// Send a request and wait for its final response, handing each diagnostics line
    /// to `on_diagnostics` as it arrives.
    pub async fn call_with_diagnostics<F>(
        &mut self,
        req: ClientRequest,
        timeout: Option<u64>,
        on_diagnostics: F,
    ) -> Result<ClientResponse, Box<dyn Error>>
    where
        F: FnMut(&str),
    {
        let timeout = Duration::from_secs(timeout.unwrap_or(self.default_timeout));

        match time::timeout(timeout, self.call_inner(req, on_diagnostics)).await {
            Ok(res) => res,
            Err(_) => {
                error!(?timeout, "Timed out making request to realmd");
                Err(Box::new(IoError::new(ErrorKind::TimedOut, "timeout")))
            }
        }
    }

    pub async fn call(
        &mut self,
        req: ClientRequest,
        timeout: Option<u64>,
    ) -> Result<ClientResponse, Box<dyn Error>> {
        self.call_with_diagnostics(req, timeout, |line| debug!(diagnostics = %line))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RealmError;

    #[test]
    fn test_decoder_waits_for_newline() {
        let mut codec = DaemonCodec;
        let mut buf = BytesMut::new();
        buf.put_slice(br#""Success""#);
        assert!(matches!(codec.decode(&mut buf), Ok(None)));
        buf.put_slice(b"\n{\"Diagnostics\":\"line\"}\n");
        assert_eq!(
            codec.decode(&mut buf).expect("decode failed"),
            Some(ClientResponse::Success)
        );
        assert_eq!(
            codec.decode(&mut buf).expect("decode failed"),
            Some(ClientResponse::Diagnostics("line".to_string()))
        );
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decoder_error_response() {
        let mut codec = DaemonCodec;
        let mut buf = BytesMut::new();
        buf.put_slice(b"{\"Error\":{\"busy\":\"Already running another action\"}}\n");
        assert_eq!(
            codec.decode(&mut buf).expect("decode failed"),
            Some(ClientResponse::Error(RealmError::busy()))
        );
    }
}
