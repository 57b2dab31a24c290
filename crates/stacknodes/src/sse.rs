use futures::stream::{Stream, StreamExt};
use serde::Deserialize;
use stackcore::CollaboratorError;

/// Incremental server-sent-events parser.
///
/// Bytes are buffered until a blank line closes an event, so multi-byte
/// characters split across network chunks are decoded intact.
#[derive(Default)]
pub struct SseParser {
    buffer: Vec<u8>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed bytes and return the `data` payloads of every completed event.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend(chunk.iter().copied().filter(|b| *b != b'\r'));
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.windows(2).position(|w| w == b"\n\n") {
            let block: Vec<u8> = self.buffer.drain(..pos + 2).collect();
            let block = String::from_utf8_lossy(&block[..pos]);

            let data: Vec<&str> = block
                .lines()
                .filter_map(|line| line.strip_prefix("data:"))
                .map(|value| value.strip_prefix(' ').unwrap_or(value))
                .collect();

            if !data.is_empty() {
                events.push(data.join("\n"));
            }
        }

        events
    }
}

#[derive(Debug, PartialEq)]
pub(crate) enum Chunk {
    Text(String),
    Done,
    Failed(String),
    Skip,
}

#[derive(Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<StreamError>,
}

#[derive(Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
}

#[derive(Deserialize, Default)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct StreamError {
    #[serde(default)]
    message: String,
}

/// Interpret one chat-completions event payload.
pub(crate) fn parse_chunk(data: &str) -> Chunk {
    if data.trim() == "[DONE]" {
        return Chunk::Done;
    }

    match serde_json::from_str::<StreamChunk>(data) {
        Ok(StreamChunk {
            error: Some(err), ..
        }) => Chunk::Failed(err.message),
        Ok(chunk) => chunk
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.delta.content)
            .filter(|text| !text.is_empty())
            .map(Chunk::Text)
            .unwrap_or(Chunk::Skip),
        Err(e) => {
            tracing::warn!(data = %data, error = %e, "Skipping unparseable completion chunk");
            Chunk::Skip
        }
    }
}

/// Turn a chat-completions byte stream into text fragments.
///
/// Transport errors and provider error events end the stream with an `Err`.
pub fn text_fragments<S, B, E>(bytes: S) -> impl Stream<Item = Result<String, CollaboratorError>>
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    async_stream::stream! {
        let mut parser = SseParser::new();
        let mut bytes = Box::pin(bytes);

        while let Some(chunk) = bytes.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    yield Err(CollaboratorError::Response(format!("stream interrupted: {e}")));
                    return;
                }
            };

            for data in parser.feed(chunk.as_ref()) {
                match parse_chunk(&data) {
                    Chunk::Text(text) => yield Ok(text),
                    Chunk::Done => return,
                    Chunk::Failed(message) => {
                        yield Err(CollaboratorError::Response(message));
                        return;
                    }
                    Chunk::Skip => {}
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parser_splits_events() {
        let mut parser = SseParser::new();
        let events = parser.feed(b"data: {\"x\":1}\n\ndata: {\"x\":2}\n\n");
        assert_eq!(events, vec!["{\"x\":1}", "{\"x\":2}"]);
    }

    #[test]
    fn test_parser_buffers_partial_events() {
        let mut parser = SseParser::new();
        assert!(parser.feed(b"data: {\"x\":").is_empty());
        assert_eq!(parser.feed(b"1}\n\n"), vec!["{\"x\":1}"]);
    }

    #[test]
    fn test_parser_keeps_split_utf8() {
        let bytes = "data: caf\u{e9}\n\n".as_bytes();
        let split = bytes.len() - 3;
        let mut parser = SseParser::new();
        assert!(parser.feed(&bytes[..split]).is_empty());
        assert_eq!(parser.feed(&bytes[split..]), vec!["caf\u{e9}"]);
    }

    #[test]
    fn test_parser_ignores_comments_and_crlf() {
        let mut parser = SseParser::new();
        let events = parser.feed(b": OPENROUTER PROCESSING\r\n\r\ndata:[DONE]\r\n\r\n");
        assert_eq!(events, vec!["[DONE]"]);
    }

    #[test]
    fn test_parse_chunk() {
        assert_eq!(
            parse_chunk(r#"{"choices":[{"delta":{"content":"Hel"}}]}"#),
            Chunk::Text("Hel".into())
        );
        assert_eq!(parse_chunk(r#"{"choices":[{"delta":{}}]}"#), Chunk::Skip);
        assert_eq!(parse_chunk(" [DONE] "), Chunk::Done);
        assert_eq!(
            parse_chunk(r#"{"error":{"message":"rate limited"}}"#),
            Chunk::Failed("rate limited".into())
        );
    }

    #[tokio::test]
    async fn test_text_fragments_stop_at_done() {
        let body: Vec<Result<&[u8], String>> = vec![
            Ok(&b"data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n"[..]),
            Ok(&b"data: {\"choices\":[{\"delta\":{\"content\":\"lo\"}}]}\n\ndata: [DONE]\n\n"[..]),
            Ok(&b"data: {\"choices\":[{\"delta\":{\"content\":\"late\"}}]}\n\n"[..]),
        ];
        let fragments: Vec<_> = text_fragments(futures::stream::iter(body)).collect().await;
        assert_eq!(fragments, vec![Ok("Hel".to_string()), Ok("lo".to_string())]);
    }

    #[tokio::test]
    async fn test_text_fragments_surface_transport_error() {
        let body: Vec<Result<&[u8], String>> = vec![
            Ok(&b"data: {\"choices\":[{\"delta\":{\"content\":\"Hel\"}}]}\n\n"[..]),
            Err("connection reset".to_string()),
        ];
        let fragments: Vec<_> = text_fragments(futures::stream::iter(body)).collect().await;
        assert_eq!(fragments.len(), 2);
        assert!(matches!(fragments[1], Err(CollaboratorError::Response(_))));
    }
}
