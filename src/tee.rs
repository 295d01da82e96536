//! Split one unified SSE byte stream into a client branch and a reassembly branch.

use crate::translate::anthropic_types::{new_message_id, MessagesResponse};
use crate::translate::reassemble::reassemble;

use bytes::Bytes;
use futures::future::{self, BoxFuture, FutureExt};
use futures::stream::{self, Stream, StreamExt};
use std::pin::Pin;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// Resolves once the logging branch has been fully read.
pub type Reassembled = BoxFuture<'static, MessagesResponse>;

/// Tee `source` into two independent branches.
///
/// One reader task drains the source and hands every chunk to both branches
/// through unbounded channels, so neither consumer can stall the other; each
/// branch buffers whatever its own consumer has not read yet. A dropped client
/// branch does not stop the reader. With no source, both sides are empty and
/// the reassembled message is labelled with `model`.
pub fn tee(source: Option<ByteStream>, model: &str) -> (ByteStream, Reassembled) {
    let Some(mut source) = source else {
        let empty = MessagesResponse::empty(new_message_id(), model.to_string());
        return (Box::pin(stream::empty()), future::ready(empty).boxed());
    };

    let (client_tx, client_rx) = mpsc::unbounded_channel();
    let (log_tx, log_rx) = mpsc::unbounded_channel::<Result<Bytes, std::io::Error>>();

    tokio::spawn(async move {
        let mut client_open = true;
        let mut log_open = true;

        while let Some(item) = source.next().await {
            match item {
                Ok(chunk) => {
                    if log_open && log_tx.send(Ok(chunk.clone())).is_err() {
                        log_open = false;
                    }
                    if client_open && client_tx.send(Ok(chunk)).is_err() {
                        tracing::debug!("Client branch dropped, still reading for audit");
                        client_open = false;
                    }
                }
                Err(e) => {
                    let message = e.to_string();
                    if log_open {
                        let _ = log_tx.send(Err(std::io::Error::new(e.kind(), message)));
                    }
                    if client_open {
                        let _ = client_tx.send(Err(e));
                    }
                    break;
                }
            }

            if !client_open && !log_open {
                break;
            }
        }
    });

    let reassembled = async move { reassemble(UnboundedReceiverStream::new(log_rx)).await }.boxed();

    (Box::pin(UnboundedReceiverStream::new(client_rx)), reassembled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translate::anthropic_types::{ResponseContentBlock, StopReason};

    const EVENTS: [&str; 4] = [
        "event: message_start\ndata: {\"type\":\"message_start\",\"message\":{\"id\":\"msg_test\",\"model\":\"claude-3\",\"usage\":{\"input_tokens\":10,\"output_tokens\":0}}}\n\n",
        "event: content_block_start\ndata: {\"type\":\"content_block_start\",\"index\":0,\"content_block\":{\"type\":\"text\",\"text\":\"\"}}\n\nevent: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"Hello \"}}\n\n",
        "event: content_block_delta\ndata: {\"type\":\"content_block_delta\",\"index\":0,\"delta\":{\"type\":\"text_delta\",\"text\":\"world!\"}}\n\n",
        "event: message_delta\ndata: {\"type\":\"message_delta\",\"delta\":{\"stop_reason\":\"end_turn\"},\"usage\":{\"output_tokens\":5}}\n\nevent: message_stop\ndata: {\"type\":\"message_stop\"}\n\n",
    ];

    fn source() -> ByteStream {
        Box::pin(stream::iter(
            EVENTS
                .iter()
                .map(|e| Ok(Bytes::from_static(e.as_bytes())))
                .collect::<Vec<_>>(),
        ))
    }

    #[tokio::test]
    async fn test_both_branches_see_everything() {
        let (client, reassembled) = tee(Some(source()), "claude-3");

        let client_bytes: Vec<u8> = client
            .map(|r| r.unwrap().to_vec())
            .collect::<Vec<_>>()
            .await
            .concat();
        assert_eq!(client_bytes, EVENTS.concat().into_bytes());

        let resp = reassembled.await;
        assert_eq!(resp.id, "msg_test");
        assert_eq!(
            resp.content,
            vec![ResponseContentBlock::Text {
                text: "Hello world!".to_string()
            }]
        );
        assert_eq!(resp.stop_reason, Some(StopReason::EndTurn));
        assert_eq!(resp.usage.input_tokens, 10);
        assert_eq!(resp.usage.output_tokens, 5);
    }

    #[tokio::test]
    async fn test_reassembly_completes_without_client_reader() {
        let (client, reassembled) = tee(Some(source()), "claude-3");
        drop(client);

        let resp = reassembled.await;
        assert_eq!(resp.content.len(), 1);
    }

    #[tokio::test]
    async fn test_client_not_blocked_by_idle_logging_branch() {
        let (client, reassembled) = tee(Some(source()), "claude-3");

        // Nobody polls the logging branch until the client is done
        let chunks = client.collect::<Vec<_>>().await;
        assert_eq!(chunks.len(), EVENTS.len());

        assert_eq!(reassembled.await.id, "msg_test");
    }

    #[tokio::test]
    async fn test_no_body() {
        let (client, reassembled) = tee(None, "vllm:llama");
        assert!(client.collect::<Vec<_>>().await.is_empty());

        let resp = reassembled.await;
        assert_eq!(resp.response_type, "message");
        assert!(resp.content.is_empty());
        assert!(resp.id.starts_with("msg_"));
        assert_eq!(resp.model, "vllm:llama");
    }
}
