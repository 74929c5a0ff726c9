//! Change-feed decoding
//!
//! A change-feed response is a stream of newline-delimited JSON records
//! ("parts"). [`ChangeFeedDecoder`] accepts the body chunk by chunk and
//! yields parts in arrival order; any undecodable line fails the whole
//! page so that no part of it is applied.

use serde::Deserialize;
use serde_json::Value;

use nodemirror_core::domain::{Checkpoint, MirrorError, Node};
use nodemirror_core::ports::ChangePart;

/// One record as it appears on the wire
#[derive(Debug, Deserialize)]
struct WirePart {
    #[serde(default)]
    checkpoint: Option<String>,
    #[serde(default)]
    reset: bool,
    #[serde(default)]
    end: bool,
    #[serde(default)]
    nodes: Option<Vec<Value>>,
}

/// Incremental decoder for a newline-delimited change-feed body
#[derive(Debug, Default)]
pub struct ChangeFeedDecoder {
    buffer: Vec<u8>,
    parts: Vec<ChangePart>,
    line: usize,
}

impl ChangeFeedDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds the next chunk of the body
    ///
    /// # Errors
    ///
    /// Returns `MirrorError::Protocol` as soon as a complete line fails to
    /// decode.
    pub fn push(&mut self, chunk: &[u8]) -> Result<(), MirrorError> {
        self.buffer.extend_from_slice(chunk);
        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            self.decode_line(&line)?;
        }
        Ok(())
    }

    /// Flushes the trailing line and returns every decoded part
    ///
    /// # Errors
    ///
    /// Returns `MirrorError::Protocol` if the trailing line is malformed or
    /// the body held no parts at all.
    pub fn finish(mut self) -> Result<Vec<ChangePart>, MirrorError> {
        let rest = std::mem::take(&mut self.buffer);
        self.decode_line(&rest)?;

        if self.parts.is_empty() {
            return Err(MirrorError::Protocol("empty change feed response".to_string()));
        }
        Ok(self.parts)
    }

    fn decode_line(&mut self, raw: &[u8]) -> Result<(), MirrorError> {
        self.line += 1;
        let text = std::str::from_utf8(raw).map_err(|e| {
            MirrorError::Protocol(format!("change feed line {} is not UTF-8: {}", self.line, e))
        })?;
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }

        let part = parse_part(text)
            .map_err(|e| MirrorError::Protocol(format!("change feed line {}: {}", self.line, e)))?;
        self.parts.push(part);
        Ok(())
    }
}

fn parse_part(text: &str) -> Result<ChangePart, String> {
    let wire: WirePart = serde_json::from_str(text).map_err(|e| e.to_string())?;

    let checkpoint = match wire.checkpoint.filter(|c| !c.is_empty()) {
        Some(c) => Some(Checkpoint::new(c).map_err(|e| e.to_string())?),
        None => None,
    };

    let nodes = match wire.nodes {
        Some(payloads) => Some(
            payloads
                .into_iter()
                .map(Node::from_payload)
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| e.to_string())?,
        ),
        None => None,
    };

    Ok(ChangePart {
        checkpoint,
        reset: wire.reset,
        end: wire.end,
        nodes,
    })
}

/// Decodes a complete change-feed body
///
/// # Errors
///
/// Returns `MirrorError::Protocol` for an empty body or any malformed line.
pub fn parse_change_parts(body: &str) -> Result<Vec<ChangePart>, MirrorError> {
    let mut decoder = ChangeFeedDecoder::new();
    decoder.push(body.as_bytes())?;
    decoder.finish()
}
