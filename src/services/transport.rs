use async_trait::async_trait;
use axum::body::Body;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::{ChaiRelayError, Result};
use crate::interfaces::transport::{CloseReason, Transport};

type BodyChunk = std::result::Result<Bytes, ChaiRelayError>;

/// Transport backed by a bounded channel feeding an HTTP response body.
/// The body side is dropped by the server when the client disconnects,
/// which is what `is_aborted` observes.
pub struct ChannelTransport {
    tx: Option<mpsc::Sender<BodyChunk>>,
}

/// Returns the relay-side transport and the matching response body.
pub fn channel_transport(capacity: usize) -> (ChannelTransport, Body) {
    let (tx, mut rx) = mpsc::channel::<BodyChunk>(capacity.max(1));
    let body = Body::from_stream(async_stream::stream! {
        while let Some(chunk) = rx.recv().await {
            yield chunk;
        }
    });
    (ChannelTransport { tx: Some(tx) }, body)
}

#[async_trait]
impl Transport for ChannelTransport {
    fn is_aborted(&self) -> bool {
        self.tx.as_ref().map_or(true, |tx| tx.is_closed())
    }

    async fn write(&mut self, fragment: &str) -> Result<()> {
        let Some(tx) = self.tx.as_ref() else {
            return Err(ChaiRelayError::Http("response already closed".to_string()));
        };
        tx.send(Ok(Bytes::copy_from_slice(fragment.as_bytes())))
            .await
            .map_err(|_| ChaiRelayError::Http("client disconnected".to_string()))
    }

    async fn close(&mut self, reason: CloseReason) {
        let Some(tx) = self.tx.take() else {
            return;
        };
        if let CloseReason::Failed(message) = reason {
            // An error item makes the server cut the body instead of ending it cleanly.
            let _ = tx.send(Err(ChaiRelayError::Generation(message))).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use http_body_util::BodyExt;

    #[tokio::test]
    async fn writes_reach_the_body_in_order() {
        let (mut transport, body) = channel_transport(4);
        transport.write("Hel").await.unwrap();
        transport.write("lo!").await.unwrap();
        transport.close(CloseReason::Finished).await;
        assert!(transport.is_aborted());

        let collected = body.collect().await.unwrap().to_bytes();
        assert_eq!(&collected[..], b"Hello!");
    }

    #[tokio::test]
    async fn dropping_the_body_aborts_the_transport() {
        let (mut transport, body) = channel_transport(1);
        assert!(!transport.is_aborted());
        drop(body);
        assert!(transport.is_aborted());
        assert!(transport.write("late").await.is_err());
    }

    #[tokio::test]
    async fn failed_close_surfaces_an_error_to_the_reader() {
        let (mut transport, body) = channel_transport(4);
        transport.write("Hel").await.unwrap();
        transport
            .close(CloseReason::Failed("backend down".to_string()))
            .await;

        let mut stream = body.into_data_stream();
        let first = stream.next().await.unwrap().unwrap();
        assert_eq!(&first[..], b"Hel");
        assert!(stream.next().await.unwrap().is_err());
    }
}
