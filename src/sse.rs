//! Server-sent event decoding for streamed bot responses.
//!
//! The backend streams one token per `data:` line.  This module turns the raw
//! byte stream of an HTTP response into a stream of trimmed, non-empty tokens,
//! reassembling lines and multi-byte characters that straddle chunk boundaries.

use bytes::Bytes;
use futures::stream::{self, Stream, StreamExt};

use crate::observability::{STREAM_BYTES, STREAM_ERRORS, STREAM_TOKENS};
use crate::{Error, Result};

/// Prefix that marks a line carrying a token.
pub const DATA_PREFIX: &str = "data:";

/// Token some backends send to mark the end of a response.
pub const END_TOKEN: &str = "[END]";

/// Decode a byte stream into a stream of tokens.
///
/// The returned stream ends when the byte stream closes or when [`END_TOKEN`]
/// arrives.  A transport error or invalid UTF-8 yields one `Err` item and then
/// ends the stream.
pub fn decode_tokens<S, E>(byte_stream: S) -> impl Stream<Item = Result<String>>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
    E: std::error::Error + Send + Sync + 'static,
{
    let stream = byte_stream.map(|result| {
        result.map_err(|e| Error::streaming(format!("Error in HTTP stream: {e}"), Some(Box::new(e))))
    });

    stream::unfold(
        (stream, TokenDecoder::new()),
        move |(mut stream, mut decoder)| async move {
            loop {
                if let Some(token) = decoder.next_token() {
                    STREAM_TOKENS.click();
                    return Some((Ok(token), (stream, decoder)));
                }
                if decoder.is_finished() {
                    return None;
                }

                match stream.next().await {
                    Some(Ok(bytes)) => {
                        STREAM_BYTES.count(bytes.len() as u64);
                        if let Err(e) = decoder.push(&bytes) {
                            STREAM_ERRORS.click();
                            return Some((Err(e), (stream, decoder)));
                        }
                    }
                    Some(Err(e)) => {
                        STREAM_ERRORS.click();
                        decoder.finished = true;
                        return Some((Err(e), (stream, decoder)));
                    }
                    None => {
                        return match decoder.finish() {
                            Some(Ok(token)) => {
                                STREAM_TOKENS.click();
                                Some((Ok(token), (stream, decoder)))
                            }
                            Some(Err(e)) => {
                                STREAM_ERRORS.click();
                                Some((Err(e), (stream, decoder)))
                            }
                            None => None,
                        };
                    }
                }
            }
        },
    )
}

/// Incremental line and UTF-8 reassembly state.
#[derive(Debug, Default)]
struct TokenDecoder {
    /// Bytes of a character that has not fully arrived yet.
    pending: Vec<u8>,
    /// Decoded text that does not yet end in a newline.
    line: String,
    finished: bool,
}

impl TokenDecoder {
    fn new() -> Self {
        Self::default()
    }

    fn is_finished(&self) -> bool {
        self.finished
    }

    fn push(&mut self, bytes: &[u8]) -> Result<()> {
        self.pending.extend_from_slice(bytes);
        match std::str::from_utf8(&self.pending) {
            Ok(text) => {
                self.line.push_str(text);
                self.pending.clear();
                Ok(())
            }
            Err(e) if e.error_len().is_none() => {
                // The tail is the start of a character split across chunks.
                let valid = e.valid_up_to();
                let text = std::str::from_utf8(&self.pending[..valid])?;
                self.line.push_str(text);
                self.pending.drain(..valid);
                Ok(())
            }
            Err(e) => {
                self.finished = true;
                Err(Error::encoding(
                    format!("Invalid UTF-8 in stream: {e}"),
                    Some(Box::new(e)),
                ))
            }
        }
    }

    fn next_token(&mut self) -> Option<String> {
        if self.finished {
            return None;
        }
        while let Some(pos) = self.line.find('\n') {
            let line: String = self.line.drain(..=pos).collect();
            if let Some(token) = parse_line(&line) {
                if token == END_TOKEN {
                    self.finished = true;
                    self.line.clear();
                    return None;
                }
                return Some(token);
            }
        }
        None
    }

    /// Flush whatever remains once the byte stream has closed.
    fn finish(&mut self) -> Option<Result<String>> {
        if self.finished {
            return None;
        }
        self.finished = true;
        if !self.pending.is_empty() {
            return Some(Err(Error::encoding(
                "stream closed in the middle of a UTF-8 character",
                None,
            )));
        }
        let rest = std::mem::take(&mut self.line);
        parse_line(&rest).filter(|token| token != END_TOKEN).map(Ok)
    }
}

/// Extract the token carried by one line, if any.
fn parse_line(line: &str) -> Option<String> {
    let token = line
        .trim_end_matches(['\r', '\n'])
        .strip_prefix(DATA_PREFIX)?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}
