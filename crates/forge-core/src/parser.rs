// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
//! Streaming response parser.
//!
//! Classifies incoming chunks into thinking, message, and tool-call
//! segments while emitting render events, and accumulates exactly one tool
//! body per stream.  Chunks arrive at arbitrary granularity: the tool
//! markers may be split anywhere, so unemitted text is held back while its
//! tail could still turn out to be a marker prefix.

use futures::StreamExt;
use tracing::warn;

use forge_model::ChunkStream;

use crate::{
    emitter::EventEmitter,
    events::{AgentEvent, ToolCallMetadata},
    toolcall::{sniff_tool_name, TOOL_CALL_CLOSE, TOOL_CALL_OPEN},
};

/// Everything a closed stream produced.
///
/// `message` has the tool body and its markers removed; `tool_body` is the
/// verbatim text between the markers (empty when the model emitted none).
#[derive(Debug, Default, Clone)]
pub struct StreamOutcome {
    pub message: String,
    pub thinking: String,
    pub tool_body: String,
    pub role: Option<String>,
    /// Mid-stream transport error, already surfaced as an `Error` event.
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Outside,
    InsideThinking,
    InsideMessage,
    InsideTool,
}

pub struct StreamParser {
    emitter: EventEmitter,
    state: State,
    /// Accumulated emitted message text
    message: String,
    /// Accumulated thinking text
    thinking: String,
    /// The first completed tool body
    tool_body: String,
    have_tool_body: bool,
    /// Current tool section being captured
    tool_buf: String,
    /// Unprocessed text whose tail may still be a partial marker
    carry: String,
    role: Option<String>,
    thinking_open: bool,
    thinking_closed: bool,
    message_open: bool,
    message_closed: bool,
    tool_name_notified: bool,
    error: Option<String>,
}

impl StreamParser {
    pub fn new(emitter: EventEmitter) -> Self {
        Self {
            emitter,
            state: State::Outside,
            message: String::new(),
            thinking: String::new(),
            tool_body: String::new(),
            have_tool_body: false,
            tool_buf: String::new(),
            carry: String::new(),
            role: None,
            thinking_open: false,
            thinking_closed: false,
            message_open: false,
            message_closed: false,
            tool_name_notified: false,
            error: None,
        }
    }

    /// Drive the stream to completion, emitting segment events as text
    /// arrives, and return the accumulated outcome.
    pub async fn consume(mut self, mut stream: ChunkStream) -> StreamOutcome {
        while let Some(chunk) = stream.next().await {
            if self.role.is_none() {
                self.role = chunk.role.clone();
            }
            if let Some(err) = chunk.error {
                self.close_open_segments();
                self.emitter.emit(AgentEvent::Error(err.clone()));
                self.error = Some(err);
                return self.into_outcome();
            }
            if chunk.is_thinking && !chunk.content.is_empty() {
                self.on_thinking(&chunk.content);
            } else if !chunk.content.is_empty() {
                self.on_text(&chunk.content);
            }
            if chunk.is_last {
                break;
            }
        }
        self.finish();
        self.into_outcome()
    }

    fn on_thinking(&mut self, content: &str) {
        match self.state {
            State::Outside => {
                self.emitter.emit(AgentEvent::ThinkingStart);
                self.thinking_open = true;
                self.state = State::InsideThinking;
                self.emitter
                    .emit(AgentEvent::ThinkingContent(content.to_string()));
                self.thinking.push_str(content);
            }
            State::InsideThinking => {
                self.emitter
                    .emit(AgentEvent::ThinkingContent(content.to_string()));
                self.thinking.push_str(content);
            }
            // A thinking chunk after the thinking segment closed is retained
            // for the outcome but not re-announced, so the segment events
            // fire exactly once per stream.
            State::InsideMessage | State::InsideTool => {
                self.thinking.push_str(content);
            }
        }
    }

    fn on_text(&mut self, content: &str) {
        match self.state {
            State::Outside => {
                self.open_message();
                self.state = State::InsideMessage;
            }
            State::InsideThinking => {
                self.emitter.emit(AgentEvent::ThinkingEnd);
                self.thinking_closed = true;
                self.open_message();
                self.state = State::InsideMessage;
            }
            State::InsideMessage | State::InsideTool => {}
        }
        self.carry.push_str(content);
        self.scan_carry();
    }

    /// Resolve as much of `carry` as possible into message text or tool
    /// body, holding back any tail that could still be a marker prefix.
    fn scan_carry(&mut self) {
        loop {
            match self.state {
                State::InsideMessage => {
                    if let Some(idx) = self.carry.find(TOOL_CALL_OPEN) {
                        if idx > 0 {
                            let pre: String = self.carry.drain(..idx).collect();
                            self.emit_message(&pre);
                        }
                        self.carry.drain(..TOOL_CALL_OPEN.len());
                        self.tool_buf.clear();
                        self.state = State::InsideTool;
                        continue;
                    }
                    let hold = holdback_len(&self.carry, TOOL_CALL_OPEN);
                    let safe = self.carry.len() - hold;
                    if safe > 0 {
                        let pre: String = self.carry.drain(..safe).collect();
                        self.emit_message(&pre);
                    }
                    return;
                }
                State::InsideTool => {
                    if let Some(idx) = self.carry.find(TOOL_CALL_CLOSE) {
                        let body: String = self.carry.drain(..idx).collect();
                        self.tool_buf.push_str(&body);
                        self.carry.drain(..TOOL_CALL_CLOSE.len());
                        self.maybe_notify_tool_name();
                        self.finish_tool_section();
                        self.state = State::InsideMessage;
                        continue;
                    }
                    let hold = holdback_len(&self.carry, TOOL_CALL_CLOSE);
                    let safe = self.carry.len() - hold;
                    if safe > 0 {
                        let body: String = self.carry.drain(..safe).collect();
                        self.tool_buf.push_str(&body);
                    }
                    self.maybe_notify_tool_name();
                    return;
                }
                State::Outside | State::InsideThinking => return,
            }
        }
    }

    fn open_message(&mut self) {
        if !self.message_open {
            self.emitter.emit(AgentEvent::MessageStart);
            self.message_open = true;
        }
    }

    fn emit_message(&mut self, text: &str) {
        self.emitter
            .emit(AgentEvent::MessageContent(text.to_string()));
        self.message.push_str(text);
    }

    fn maybe_notify_tool_name(&mut self) {
        if self.tool_name_notified {
            return;
        }
        if let Some(name) = sniff_tool_name(&self.tool_buf) {
            self.tool_name_notified = true;
            self.emitter.emit(AgentEvent::ToolCallStart {
                metadata: ToolCallMetadata {
                    tool_name: Some(name),
                },
            });
        }
    }

    fn finish_tool_section(&mut self) {
        let body = std::mem::take(&mut self.tool_buf);
        if self.have_tool_body {
            warn!("stream produced more than one tool section; extra body dropped");
            return;
        }
        self.tool_body = body;
        self.have_tool_body = true;
    }

    /// Close whatever segments the stream left open (normal end or error).
    fn close_open_segments(&mut self) {
        match self.state {
            State::Outside => {}
            State::InsideThinking => {
                if self.thinking_open && !self.thinking_closed {
                    self.emitter.emit(AgentEvent::ThinkingEnd);
                    self.thinking_closed = true;
                }
            }
            State::InsideMessage => {
                // The holdback is real text now that no more chunks can
                // complete a marker.
                if !self.carry.is_empty() {
                    let rest = std::mem::take(&mut self.carry);
                    self.emit_message(&rest);
                }
            }
            State::InsideTool => {
                // Unclosed tool section: keep the accumulated text as the
                // body and let payload parsing decide what it is.
                if !self.carry.is_empty() {
                    let rest = std::mem::take(&mut self.carry);
                    self.tool_buf.push_str(&rest);
                }
                self.finish_tool_section();
            }
        }
        if self.message_open && !self.message_closed {
            self.emitter.emit(AgentEvent::MessageEnd);
            self.message_closed = true;
        }
    }

    fn finish(&mut self) {
        self.close_open_segments();
    }

    fn into_outcome(self) -> StreamOutcome {
        StreamOutcome {
            message: self.message,
            thinking: self.thinking,
            tool_body: self.tool_body,
            role: self.role,
            error: self.error,
        }
    }
}

/// Length of the longest proper prefix of `marker` that is a suffix of
/// `hay`.  That many bytes must be held back because the next chunk could
/// complete the marker.
fn holdback_len(hay: &str, marker: &str) -> usize {
    let max = marker.len().saturating_sub(1).min(hay.len());
    for k in (1..=max).rev() {
        if hay.ends_with(&marker[..k]) {
            return k;
        }
    }
    0
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use futures::stream;

    use forge_model::StreamChunk;

    use super::*;

    async fn parse(chunks: Vec<StreamChunk>) -> (StreamOutcome, Vec<AgentEvent>) {
        let (emitter, mut rx) = EventEmitter::channel(1024);
        let parser = StreamParser::new(emitter);
        let outcome = parser.consume(Box::pin(stream::iter(chunks))).await;
        let mut events = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            events.push(ev);
        }
        (outcome, events)
    }

    fn tool_block(body: &str) -> String {
        format!("{TOOL_CALL_OPEN}{body}{TOOL_CALL_CLOSE}")
    }

    #[test]
    fn holdback_detects_partial_markers() {
        assert_eq!(holdback_len("hello <tool", TOOL_CALL_OPEN), 5);
        assert_eq!(holdback_len("hello <", TOOL_CALL_OPEN), 1);
        assert_eq!(holdback_len("hello", TOOL_CALL_OPEN), 0);
        // A full marker is found by `find`, not held back.
        assert_eq!(holdback_len("x<tool_call", TOOL_CALL_OPEN), 10);
    }

    #[tokio::test]
    async fn plain_message_round_trip() {
        let (outcome, events) = parse(vec![
            StreamChunk::text("hello ").with_role("assistant"),
            StreamChunk::text("world"),
            StreamChunk::last(),
        ])
        .await;
        assert_eq!(outcome.message, "hello world");
        assert_eq!(outcome.tool_body, "");
        assert_eq!(outcome.role.as_deref(), Some("assistant"));
        assert!(matches!(events[0], AgentEvent::MessageStart));
        assert!(matches!(events.last(), Some(AgentEvent::MessageEnd)));
    }

    #[tokio::test]
    async fn thinking_then_message_emits_ordered_segments() {
        let (outcome, events) = parse(vec![
            StreamChunk::thinking("let me think"),
            StreamChunk::text("the answer"),
            StreamChunk::last(),
        ])
        .await;
        assert_eq!(outcome.thinking, "let me think");
        assert_eq!(outcome.message, "the answer");

        let kinds: Vec<&str> = events
            .iter()
            .map(|e| match e {
                AgentEvent::ThinkingStart => "ts",
                AgentEvent::ThinkingContent(_) => "tc",
                AgentEvent::ThinkingEnd => "te",
                AgentEvent::MessageStart => "ms",
                AgentEvent::MessageContent(_) => "mc",
                AgentEvent::MessageEnd => "me",
                _ => "other",
            })
            .collect();
        assert_eq!(kinds, vec!["ts", "tc", "te", "ms", "mc", "me"]);
    }

    #[tokio::test]
    async fn tool_body_extracted_and_removed_from_message() {
        let body = "<tool_name>grep</tool_name>";
        let text = format!("Searching now. {}", tool_block(body));
        let (outcome, events) = parse(vec![StreamChunk::text(text), StreamChunk::last()]).await;

        assert_eq!(outcome.message, "Searching now. ");
        assert_eq!(outcome.tool_body, body);
        assert!(
            !outcome.message.contains(TOOL_CALL_OPEN),
            "markers must not leak into message text"
        );
        let streamed: String = events
            .iter()
            .filter_map(|e| match e {
                AgentEvent::MessageContent(t) => Some(t.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(streamed, "Searching now. ");
    }

    #[tokio::test]
    async fn tool_block_split_across_three_chunks_matches_single_chunk() {
        let body = "<tool_name>calculator</tool_name>\
                    <arguments><operation>add</operation><a>100</a><b>50</b></arguments>";
        let full = format!("Adding. {}", tool_block(body));

        // Split boundaries landing inside both markers and the body.
        let (a, rest) = full.split_at(12);
        let (b, c) = rest.split_at(37);
        let (split, _) = parse(vec![
            StreamChunk::text(a),
            StreamChunk::text(b),
            StreamChunk::text(c),
            StreamChunk::last(),
        ])
        .await;
        let (single, _) = parse(vec![StreamChunk::text(full), StreamChunk::last()]).await;

        assert_eq!(split.tool_body, single.tool_body);
        assert_eq!(split.message, single.message);
        assert_eq!(
            crate::toolcall::parse_tool_call(&split.tool_body).unwrap(),
            crate::toolcall::parse_tool_call(&single.tool_body).unwrap()
        );
    }

    #[tokio::test]
    async fn marker_split_byte_by_byte() {
        let body = "<tool_name>t</tool_name>";
        let full = format!("hi {}", tool_block(body));
        let chunks: Vec<StreamChunk> = full
            .chars()
            .map(|c| StreamChunk::text(c.to_string()))
            .chain(std::iter::once(StreamChunk::last()))
            .collect();
        let (outcome, _) = parse(chunks).await;
        assert_eq!(outcome.message, "hi ");
        assert_eq!(outcome.tool_body, body);
    }

    #[tokio::test]
    async fn interleaved_thinking_and_message_chunks() {
        let body = "<tool_name>t</tool_name>";
        let (outcome, events) = parse(vec![
            StreamChunk::thinking("step one "),
            StreamChunk::thinking("step two"),
            StreamChunk::text("working "),
            StreamChunk::thinking("late thought"),
            StreamChunk::text(tool_block(body)),
            StreamChunk::last(),
        ])
        .await;

        assert_eq!(outcome.thinking, "step one step twolate thought");
        assert_eq!(outcome.message, "working ");
        assert_eq!(outcome.tool_body, body);

        // Thinking and message segments each open and close exactly once.
        let count = |pred: fn(&AgentEvent) -> bool| events.iter().filter(|e| pred(e)).count();
        assert_eq!(count(|e| matches!(e, AgentEvent::ThinkingStart)), 1);
        assert_eq!(count(|e| matches!(e, AgentEvent::ThinkingEnd)), 1);
        assert_eq!(count(|e| matches!(e, AgentEvent::MessageStart)), 1);
        assert_eq!(count(|e| matches!(e, AgentEvent::MessageEnd)), 1);
    }

    #[tokio::test]
    async fn early_tool_name_detection() {
        let (_, events) = parse(vec![
            StreamChunk::text(format!(
                "{TOOL_CALL_OPEN}<tool_name>write_file</tool_name><argu"
            )),
            StreamChunk::text(format!("ments></arguments>{TOOL_CALL_CLOSE}")),
            StreamChunk::last(),
        ])
        .await;
        let start = events.iter().find_map(|e| match e {
            AgentEvent::ToolCallStart { metadata } => metadata.tool_name.clone(),
            _ => None,
        });
        assert_eq!(start.as_deref(), Some("write_file"));
    }

    #[tokio::test]
    async fn error_chunk_closes_segments_and_sets_error() {
        let (outcome, events) = parse(vec![
            StreamChunk::text("partial "),
            StreamChunk::failed("connection reset"),
        ])
        .await;
        assert_eq!(outcome.error.as_deref(), Some("connection reset"));
        assert_eq!(outcome.message, "partial ");
        assert!(events
            .iter()
            .any(|e| matches!(e, AgentEvent::Error(msg) if msg.contains("connection reset"))));
        assert!(events.iter().any(|e| matches!(e, AgentEvent::MessageEnd)));
    }

    #[tokio::test]
    async fn unterminated_tool_section_becomes_body() {
        let (outcome, _) = parse(vec![
            StreamChunk::text(format!("{TOOL_CALL_OPEN}<tool_name>t</tool_name>")),
            StreamChunk::last(),
        ])
        .await;
        assert_eq!(outcome.tool_body, "<tool_name>t</tool_name>");
    }

    #[tokio::test]
    async fn second_tool_block_is_dropped() {
        let first = "<tool_name>one</tool_name>";
        let second = "<tool_name>two</tool_name>";
        let (outcome, _) = parse(vec![
            StreamChunk::text(format!("{}{}", tool_block(first), tool_block(second))),
            StreamChunk::last(),
        ])
        .await;
        assert_eq!(outcome.tool_body, first);
    }

    #[tokio::test]
    async fn partial_marker_at_stream_end_is_plain_text() {
        let (outcome, _) = parse(vec![StreamChunk::text("count: 1 <tool"), StreamChunk::last()]).await;
        assert_eq!(outcome.message, "count: 1 <tool");
    }

    #[tokio::test]
    async fn thinking_only_stream_closes_thinking() {
        let (outcome, events) = parse(vec![
            StreamChunk::thinking("hmm"),
            StreamChunk::last(),
        ])
        .await;
        assert_eq!(outcome.thinking, "hmm");
        assert_eq!(outcome.message, "");
        assert!(events.iter().any(|e| matches!(e, AgentEvent::ThinkingEnd)));
        assert!(!events.iter().any(|e| matches!(e, AgentEvent::MessageStart)));
    }

    #[tokio::test]
    async fn empty_stream_produces_empty_outcome() {
        let (outcome, events) = parse(vec![StreamChunk::last()]).await;
        assert_eq!(outcome.message, "");
        assert_eq!(outcome.tool_body, "");
        assert!(events.is_empty());
    }
}
