//! Folds the inbound event stream into the transcript.
//!
//! The assembler is a synchronous state machine over `(last speaker, buffer)`.
//! It never blocks and never reorders: every event is handled in delivery
//! order and yields the render operations it implies. Whether a delta mutates
//! the streaming turn or starts a new one depends only on the event type and
//! the current state; `now` only decides *when* text is shown, never *what*
//! the transcript contains.

use crate::{
    events::ServerEvent,
    transcript::{RenderOp, Speaker, Transcript, TurnDraft, TurnId, TurnStatus},
};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Length of not-yet-shown text that forces a soft flush.
pub const DEFAULT_SOFT_FLUSH_CHARS: usize = 100;
/// Debounce after the last delta before buffered text is shown anyway.
pub const DEFAULT_IDLE_FLUSH: Duration = Duration::from_millis(1500);

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FlushPolicy {
    pub soft_flush_chars: usize,
    pub idle_flush: Duration,
}

impl Default for FlushPolicy {
    fn default() -> Self {
        Self {
            soft_flush_chars: DEFAULT_SOFT_FLUSH_CHARS,
            idle_flush: DEFAULT_IDLE_FLUSH,
        }
    }
}

/// Live accumulation state of the in-progress turn.
#[derive(Debug)]
struct MessageBuffer {
    speaker: Speaker,
    text: String,
    /// Set once the buffer has produced text and owns a streaming turn.
    turn: Option<TurnId>,
    /// Whether the render sink has been told about `turn`.
    presented: bool,
    presented_len: usize,
    flush_at: Option<Instant>,
}

impl MessageBuffer {
    fn new(speaker: Speaker) -> Self {
        Self {
            speaker,
            text: String::new(),
            turn: None,
            presented: false,
            presented_len: 0,
            flush_at: None,
        }
    }

    fn unpresented(&self) -> &str {
        &self.text[self.presented_len..]
    }
}

fn ends_with_break(text: &str) -> bool {
    const SENTENCE: &[char] = &['.', '!', '?', '…', '。', '！', '？'];
    const CLAUSE: &[char] = &[',', ';', ':', '，', '；', '：'];
    text.trim_end()
        .chars()
        .last()
        .is_some_and(|c| SENTENCE.contains(&c) || CLAUSE.contains(&c))
}

#[derive(Debug, Default)]
pub struct TranscriptAssembler {
    policy: FlushPolicy,
    transcript: Transcript,
    buffer: Option<MessageBuffer>,
    last_speaker: Option<Speaker>,
    /// User transcripts that completed while the assistant was speaking.
    /// They are appended once the assistant turn finalizes.
    late_user: Vec<String>,
}

impl TranscriptAssembler {
    pub fn new(policy: FlushPolicy) -> Self {
        Self {
            policy,
            ..Self::default()
        }
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    pub fn last_speaker(&self) -> Option<Speaker> {
        self.last_speaker
    }

    /// Speaker of the buffer currently accumulating, if any.
    pub fn buffering(&self) -> Option<Speaker> {
        self.buffer.as_ref().map(|b| b.speaker)
    }

    pub fn handle(&mut self, event: &ServerEvent, now: Instant) -> Vec<RenderOp> {
        match event {
            ServerEvent::SpeechStarted { .. } => {
                let ops = self.finalize();
                self.buffer = Some(MessageBuffer::new(Speaker::User));
                self.last_speaker = Some(Speaker::User);
                ops
            }
            ServerEvent::InputTranscriptionDelta { delta, .. } => {
                if self.buffering() == Some(Speaker::Assistant) {
                    // Belongs to the utterance the assistant is answering;
                    // its completed transcript is held until the answer ends.
                    debug!("Ignoring user transcript delta during assistant turn");
                    return Vec::new();
                }
                self.push_delta(Speaker::User, delta, now)
            }
            ServerEvent::InputTranscriptionCompleted { transcript, .. } => {
                self.complete_user_transcript(transcript)
            }
            ServerEvent::AudioTranscriptDelta { delta } | ServerEvent::TextDelta { delta } => {
                self.push_delta(Speaker::Assistant, delta, now)
            }
            ServerEvent::ResponseCreated { .. } => match self.buffering() {
                Some(speaker) if speaker != Speaker::Assistant => self.finalize(),
                _ => Vec::new(),
            },
            ServerEvent::ResponseDone { .. } => self.finalize(),
            ServerEvent::ConversationItemCreated { item } => {
                if item.role.as_deref() != Some("user") {
                    return Vec::new();
                }
                match item.typed_text() {
                    Some(text) => self.append_turn(TurnDraft::speech(Speaker::User, text)),
                    None => Vec::new(),
                }
            }
            // Tool-call fragments belong to the dispatcher and must leave the
            // speech buffer untouched.
            _ => Vec::new(),
        }
    }

    /// Earliest instant at which [`Self::on_flush_deadline`] has work to do.
    pub fn flush_deadline(&self) -> Option<Instant> {
        self.buffer.as_ref().and_then(|b| b.flush_at)
    }

    /// Shows buffered text whose idle deadline has passed. A deadline that
    /// belonged to a buffer since replaced is simply not found.
    pub fn on_flush_deadline(&mut self, now: Instant) -> Vec<RenderOp> {
        let due = self
            .buffer
            .as_ref()
            .and_then(|b| b.flush_at)
            .is_some_and(|at| at <= now);
        if !due {
            return Vec::new();
        }
        debug!("Idle flush of buffered transcript text");
        self.present().into_iter().collect()
    }

    /// Appends an out-of-band turn (status, image, citations). Any streaming
    /// turn is finalized first so it stays the only mutable, last turn.
    pub fn append_turn(&mut self, draft: TurnDraft) -> Vec<RenderOp> {
        let mut ops = self.finalize();
        self.last_speaker = Some(draft.speaker);
        let turn = self.transcript.append(draft, TurnStatus::Final);
        ops.push(RenderOp::Append(turn));
        ops
    }

    /// Finalizes whatever is buffered; used on session teardown.
    pub fn reset(&mut self) -> Vec<RenderOp> {
        self.finalize()
    }

    fn push_delta(&mut self, speaker: Speaker, delta: &str, now: Instant) -> Vec<RenderOp> {
        if delta.is_empty() {
            return Vec::new();
        }
        let continues = self.buffering() == Some(speaker);
        let mut ops = if continues { Vec::new() } else { self.finalize() };
        self.last_speaker = Some(speaker);

        let buffer = self
            .buffer
            .get_or_insert_with(|| MessageBuffer::new(speaker));
        buffer.text.push_str(delta);
        match buffer.turn {
            Some(id) => {
                self.transcript.set_streaming_text(id, &buffer.text);
            }
            None => {
                let turn = self.transcript.append(
                    TurnDraft::speech(speaker, buffer.text.clone()),
                    TurnStatus::Streaming,
                );
                buffer.turn = Some(turn.id);
            }
        }

        let soft_flush = ends_with_break(&buffer.text)
            || buffer.unpresented().chars().count() >= self.policy.soft_flush_chars;
        if soft_flush {
            ops.extend(self.present());
        } else {
            buffer.flush_at = Some(now + self.policy.idle_flush);
        }
        ops
    }

    fn complete_user_transcript(&mut self, transcript: &str) -> Vec<RenderOp> {
        let text = transcript.trim();
        match self.buffering() {
            Some(Speaker::User) => {}
            _ if text.is_empty() => return Vec::new(),
            Some(_) => {
                self.late_user.push(text.to_string());
                return Vec::new();
            }
            None => return self.append_turn(TurnDraft::speech(Speaker::User, text)),
        }

        // The completed transcript is authoritative over the deltas.
        if let Some(buffer) = self.buffer.as_mut().filter(|_| !text.is_empty()) {
            buffer.text = text.to_string();
            match buffer.turn {
                Some(id) => {
                    self.transcript.set_streaming_text(id, &buffer.text);
                }
                None => {
                    let turn = self.transcript.append(
                        TurnDraft::speech(Speaker::User, buffer.text.clone()),
                        TurnStatus::Streaming,
                    );
                    buffer.turn = Some(turn.id);
                }
            }
        }
        self.finalize()
    }

    /// Marks the buffered turn presentable without finalizing it.
    fn present(&mut self) -> Option<RenderOp> {
        let buffer = self.buffer.as_mut()?;
        buffer.flush_at = None;
        let turn = self.transcript.get(buffer.turn?)?.clone();
        buffer.presented_len = buffer.text.len();
        if buffer.presented {
            Some(RenderOp::Update(turn))
        } else {
            buffer.presented = true;
            Some(RenderOp::Append(turn))
        }
    }

    /// Flushes the buffer as a final turn and returns to idle, then appends
    /// any user transcripts held back while it streamed. Dropping the buffer
    /// also cancels its pending idle flush.
    fn finalize(&mut self) -> Vec<RenderOp> {
        let mut ops = Vec::new();
        if let Some(buffer) = self.buffer.take() {
            let finalized = buffer.turn.and_then(|id| self.transcript.finalize(id));
            match finalized {
                Some(turn) if buffer.presented => ops.push(RenderOp::Update(turn.clone())),
                Some(turn) => ops.push(RenderOp::Append(turn.clone())),
                None => {}
            }
        }
        for text in std::mem::take(&mut self.late_user) {
            self.last_speaker = Some(Speaker::User);
            let turn = self
                .transcript
                .append(TurnDraft::speech(Speaker::User, text), TurnStatus::Final);
            ops.push(RenderOp::Append(turn));
        }
        ops
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transcript::{TurnKind, TurnPayload};

    fn delta(text: &str) -> ServerEvent {
        ServerEvent::AudioTranscriptDelta {
            delta: text.to_string(),
        }
    }

    fn user_delta(text: &str) -> ServerEvent {
        ServerEvent::InputTranscriptionDelta {
            item_id: None,
            delta: text.to_string(),
        }
    }

    fn speech_started() -> ServerEvent {
        ServerEvent::SpeechStarted { item_id: None }
    }

    fn response_created() -> ServerEvent {
        ServerEvent::ResponseCreated {
            response: Default::default(),
        }
    }

    fn response_done() -> ServerEvent {
        ServerEvent::ResponseDone {
            response: Default::default(),
        }
    }

    fn run(events: &[ServerEvent], start: Instant, step: Duration) -> TranscriptAssembler {
        let mut assembler = TranscriptAssembler::new(FlushPolicy::default());
        let mut now = start;
        for event in events {
            assembler.handle(event, now);
            now += step;
            assembler.on_flush_deadline(now);
        }
        assembler
    }

    #[test]
    fn test_deltas_fold_into_one_turn() {
        let events = vec![
            response_created(),
            delta("The quick "),
            delta("brown fox "),
            delta("jumps"),
        ];
        let assembler = run(&events, Instant::now(), Duration::ZERO);
        let transcript = assembler.transcript();
        assert_eq!(transcript.len(), 1);
        assert_eq!(transcript.turns()[0].text(), Some("The quick brown fox jumps"));
        assert_eq!(transcript.turns()[0].speaker, Speaker::Assistant);
        assert!(transcript.turns()[0].is_streaming());
    }

    #[test]
    fn test_response_done_finalizes() {
        let events = vec![response_created(), delta("Hi"), response_done()];
        let assembler = run(&events, Instant::now(), Duration::ZERO);
        let turn = &assembler.transcript().turns()[0];
        assert_eq!(turn.status, TurnStatus::Final);
        assert_eq!(assembler.buffering(), None);
    }

    #[test]
    fn test_speaker_switch_isolation() {
        let events = vec![
            speech_started(),
            user_delta("What is "),
            user_delta("Rust?"),
            speech_started(),
            delta("Rust is "),
            delta("a language."),
        ];
        let assembler = run(&events, Instant::now(), Duration::ZERO);
        let turns = assembler.transcript().turns();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].speaker, Speaker::User);
        assert_eq!(turns[0].text(), Some("What is Rust?"));
        assert_eq!(turns[0].status, TurnStatus::Final);
        assert_eq!(turns[1].speaker, Speaker::Assistant);
        assert_eq!(turns[1].text(), Some("Rust is a language."));
    }

    #[test]
    fn test_speech_started_flushes_assistant() {
        let mut assembler = TranscriptAssembler::default();
        let now = Instant::now();
        assembler.handle(&delta("Let me think"), now);
        let ops = assembler.handle(&speech_started(), now);
        assert_eq!(ops.len(), 1);
        match &ops[0] {
            RenderOp::Append(turn) => {
                assert_eq!(turn.text(), Some("Let me think"));
                assert_eq!(turn.status, TurnStatus::Final);
            }
            other => panic!("expected append of the final turn, got {other:?}"),
        }
        assert_eq!(assembler.buffering(), Some(Speaker::User));
    }

    #[test]
    fn test_replay_is_identical_regardless_of_timing() {
        let events = vec![
            speech_started(),
            user_delta("Tell me a story"),
            ServerEvent::InputTranscriptionCompleted {
                item_id: None,
                transcript: "Tell me a story.".to_string(),
            },
            response_created(),
            delta("Once upon a time, "),
            delta("there was a fox"),
            ServerEvent::FunctionCallArgumentsDelta {
                call_id: "c1".to_string(),
                delta: "{\"prompt\":".to_string(),
            },
            delta(" who lived in the woods"),
            response_done(),
            response_created(),
            delta("The end."),
            response_done(),
        ];
        let start = Instant::now();
        let fast = run(&events, start, Duration::ZERO);
        let slow = run(&events, start, Duration::from_secs(5));
        assert_eq!(fast.transcript().render_text(), slow.transcript().render_text());
        assert_eq!(
            fast.transcript().render_text(),
            "user: Tell me a story.\nassistant: Once upon a time, there was a fox who lived in the woods\nassistant: The end."
        );
    }

    #[test]
    fn test_tool_fragments_do_not_leak_into_speech() {
        let mut assembler = TranscriptAssembler::default();
        let now = Instant::now();
        assembler.handle(&delta("Sure, "), now);
        assembler.handle(
            &ServerEvent::FunctionCallArgumentsDelta {
                call_id: "call_1".to_string(),
                delta: "{\"prompt\":\"a fox\"}".to_string(),
            },
            now,
        );
        assembler.handle(
            &ServerEvent::FunctionCallArgumentsDone {
                call_id: "call_1".to_string(),
                name: Some("generate_image".to_string()),
                arguments: "{\"prompt\":\"a fox\"}".to_string(),
            },
            now,
        );
        assembler.handle(&delta("drawing now"), now);
        let turns = assembler.transcript().turns();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].text(), Some("Sure, drawing now"));
    }

    #[test]
    fn test_natural_break_presents_without_finalizing() {
        let mut assembler = TranscriptAssembler::default();
        let now = Instant::now();

        let ops = assembler.handle(&delta("Hello"), now);
        assert!(ops.is_empty());
        assert!(assembler.flush_deadline().is_some());

        let ops = assembler.handle(&delta(" there."), now);
        assert_eq!(ops.len(), 1);
        let RenderOp::Append(turn) = &ops[0] else {
            panic!("first presentation must append");
        };
        assert_eq!(turn.text(), Some("Hello there."));
        assert!(turn.is_streaming());
        assert_eq!(assembler.flush_deadline(), None);

        let ops = assembler.handle(&delta(" How are you?"), now);
        assert!(matches!(&ops[..], [RenderOp::Update(t)] if t.text() == Some("Hello there. How are you?")));
    }

    #[test]
    fn test_length_threshold_soft_flush() {
        let policy = FlushPolicy {
            soft_flush_chars: 10,
            idle_flush: Duration::from_secs(60),
        };
        let mut assembler = TranscriptAssembler::new(policy);
        let now = Instant::now();
        assert!(assembler.handle(&delta("abcde"), now).is_empty());
        let ops = assembler.handle(&delta("fghij"), now);
        assert_eq!(ops.len(), 1);
        assert!(assembler.handle(&delta("kl"), now).is_empty());
    }

    #[test]
    fn test_idle_flush_after_debounce() {
        let mut assembler = TranscriptAssembler::default();
        let start = Instant::now();
        assembler.handle(&delta("thinking"), start);
        let deadline = assembler.flush_deadline().unwrap();
        assert_eq!(deadline, start + DEFAULT_IDLE_FLUSH);

        assert!(assembler.on_flush_deadline(start + Duration::from_millis(10)).is_empty());

        // A new delta pushes the deadline out.
        let later = start + Duration::from_millis(1000);
        assembler.handle(&delta(" hard"), later);
        assert!(assembler.on_flush_deadline(deadline).is_empty());

        let ops = assembler.on_flush_deadline(later + DEFAULT_IDLE_FLUSH);
        assert!(matches!(&ops[..], [RenderOp::Append(t)] if t.text() == Some("thinking hard")));
        assert_eq!(assembler.flush_deadline(), None);
    }

    #[test]
    fn test_reset_cancels_pending_flush() {
        let mut assembler = TranscriptAssembler::default();
        let start = Instant::now();
        assembler.handle(&delta("half a thought"), start);
        let deadline = assembler.flush_deadline().unwrap();
        assembler.handle(&response_done(), start);
        assert_eq!(assembler.flush_deadline(), None);
        assert!(assembler.on_flush_deadline(deadline).is_empty());
    }

    #[test]
    fn test_response_created_resets_foreign_buffer() {
        let mut assembler = TranscriptAssembler::default();
        let now = Instant::now();
        assembler.handle(&speech_started(), now);
        assembler.handle(&user_delta("hello"), now);
        let ops = assembler.handle(&response_created(), now);
        assert_eq!(ops.len(), 1);
        assert_eq!(assembler.buffering(), None);
        assert_eq!(assembler.transcript().turns()[0].status, TurnStatus::Final);
    }

    #[test]
    fn test_response_created_keeps_same_speaker_buffer() {
        let mut assembler = TranscriptAssembler::default();
        let now = Instant::now();
        assembler.handle(&delta("Part one"), now);
        assert!(assembler.handle(&response_created(), now).is_empty());
        assembler.handle(&delta(" and part two"), now);
        let turns = assembler.transcript().turns();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].text(), Some("Part one and part two"));
    }

    fn completed(text: &str) -> ServerEvent {
        ServerEvent::InputTranscriptionCompleted {
            item_id: None,
            transcript: text.to_string(),
        }
    }

    #[test]
    fn test_late_user_transcript_appends_after_assistant() {
        let mut assembler = TranscriptAssembler::default();
        let now = Instant::now();
        assembler.handle(&delta("Answering"), now);
        assert!(assembler.handle(&completed("question"), now).is_empty());
        assert_eq!(assembler.transcript().len(), 1);
        assert_eq!(assembler.buffering(), Some(Speaker::Assistant));

        assembler.handle(&delta(" now."), now);
        let ops = assembler.handle(&response_done(), now);
        assert_eq!(ops.len(), 2);
        assert!(matches!(&ops[1], RenderOp::Append(t) if t.text() == Some("question")));

        let turns = assembler.transcript().turns();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].text(), Some("Answering now."));
        assert_eq!(turns[0].status, TurnStatus::Final);
        assert_eq!(turns[1].speaker, Speaker::User);
        assert_eq!(turns[1].status, TurnStatus::Final);
        assert!(assembler.transcript().streaming().is_none());
    }

    #[test]
    fn test_transcript_between_assistant_deltas_keeps_one_turn() {
        let events = vec![
            speech_started(),
            response_created(),
            delta("Once upon"),
            user_delta("tell me"),
            completed("tell me a story"),
            delta(" a time"),
            response_done(),
        ];
        let start = Instant::now();
        for step in [Duration::ZERO, Duration::from_secs(2)] {
            let assembler = run(&events, start, step);
            assert_eq!(
                assembler.transcript().render_text(),
                "assistant: Once upon a time\nuser: tell me a story"
            );
            assert_eq!(assembler.last_speaker(), Some(Speaker::User));
        }
    }

    #[test]
    fn test_held_transcript_is_released_by_next_speech() {
        let mut assembler = TranscriptAssembler::default();
        let now = Instant::now();
        assembler.handle(&delta("Sure"), now);
        assembler.handle(&completed("can you help"), now);
        assembler.handle(&speech_started(), now);
        assembler.handle(&user_delta("thanks"), now);

        let turns = assembler.transcript().turns();
        assert_eq!(turns.len(), 3);
        assert_eq!(turns[0].text(), Some("Sure"));
        assert_eq!(turns[1].text(), Some("can you help"));
        assert_eq!(turns[2].text(), Some("thanks"));
        assert!(turns[2].is_streaming());
    }

    #[test]
    fn test_typed_user_message_is_rendered() {
        let mut assembler = TranscriptAssembler::default();
        let event = ServerEvent::parse(
            r#"{"type":"conversation.item.created","item":{"id":"i1","type":"message","role":"user","content":[{"type":"input_text","text":"typed hello"}]}}"#,
        )
        .unwrap();
        let ops = assembler.handle(&event, Instant::now());
        assert_eq!(ops.len(), 1);
        assert_eq!(assembler.transcript().turns()[0].text(), Some("typed hello"));

        let injected = ServerEvent::parse(
            r#"{"type":"conversation.item.created","item":{"id":"i2","type":"message","role":"system","content":[{"type":"input_text","text":"hidden context"}]}}"#,
        )
        .unwrap();
        assert!(assembler.handle(&injected, Instant::now()).is_empty());
        assert_eq!(assembler.transcript().len(), 1);
    }

    #[test]
    fn test_out_of_band_turn_keeps_streaming_invariant() {
        let mut assembler = TranscriptAssembler::default();
        let now = Instant::now();
        assembler.handle(&delta("Here it comes"), now);
        let ops = assembler.append_turn(TurnDraft::image("https://x/fox.png", "a red fox"));
        assert_eq!(ops.len(), 2);

        let turns = assembler.transcript().turns();
        assert_eq!(turns.len(), 2);
        assert!(turns.iter().all(|t| t.status == TurnStatus::Final));
        assert_eq!(turns[1].kind, TurnKind::Image);
        assert!(matches!(
            &turns[1].payload,
            TurnPayload::Image { url, .. } if url == "https://x/fox.png"
        ));

        assembler.handle(&delta("Done."), now);
        assert_eq!(assembler.transcript().len(), 3);
        assert_eq!(
            assembler
                .transcript()
                .turns()
                .iter()
                .filter(|t| t.is_streaming())
                .count(),
            1
        );
    }

    #[test]
    fn test_empty_deltas_create_nothing() {
        let mut assembler = TranscriptAssembler::default();
        let now = Instant::now();
        assembler.handle(&speech_started(), now);
        assembler.handle(&delta(""), now);
        assembler.handle(&response_done(), now);
        assert!(assembler.transcript().is_empty());
    }
}
