//! Folds protocol events into the parts of the streaming assistant message.
//!
//! Consecutive thinking or text fragments merge into one part while that
//! part is the open accumulator. Tool calls never merge; a `tool_call_done`
//! finds its start by call id anywhere in the message.

use tracing::debug;
use vibe_shared::{
    Message, MessagePart, ProtocolEvent, TextPart, ThinkingPart, ToolCallDone, ToolCallPart,
    ToolCallStart, ToolStatus,
};

pub const CANCELLED_MARKER: &str = "\n\n[Cancelled]";

/// How a stream ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamOutcome {
    Completed { exit_code: i32 },
    Errored { message: String },
    Cancelled,
}

/// What one event did to the message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step {
    /// No mutation: unknown event, orphan completion, or the stream already ended.
    Ignored,
    /// The backend assigned the conversation id.
    Started(String),
    Appended(usize),
    Updated(usize),
    Finished(StreamOutcome),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OpenAccumulator {
    Thinking,
    Text,
}

#[derive(Debug, Default)]
pub struct PartAssembler {
    open: Option<OpenAccumulator>,
}

impl PartAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one event. Must be called in arrival order, one event at a time.
    pub fn apply(&mut self, message: &mut Message, event: ProtocolEvent) -> Step {
        if !message.is_streaming {
            debug!(?event, "event after stream end ignored");
            return Step::Ignored;
        }

        let step = match event {
            ProtocolEvent::Start { conversation_id } => return Step::Started(conversation_id),
            ProtocolEvent::ThinkingDelta { text } => self.thinking_delta(message, text),
            ProtocolEvent::ThinkingDone => self.thinking_done(message),
            ProtocolEvent::TextDelta { text } | ProtocolEvent::Output { text } => {
                self.text_delta(message, text)
            }
            ProtocolEvent::ToolCallStart(start) => self.tool_call_start(message, start),
            ProtocolEvent::ToolCallDone(done) => tool_call_done(message, done),
            ProtocolEvent::Done { exit_code } => {
                self.open = None;
                abandon_running_tools(message);
                message.is_streaming = false;
                return Step::Finished(StreamOutcome::Completed { exit_code });
            }
            ProtocolEvent::Error { message: error } => {
                self.open = None;
                return fail_message(message, error);
            }
            ProtocolEvent::Unknown => Step::Ignored,
        };

        if step != Step::Ignored {
            message.refresh_content();
        }
        step
    }

    fn thinking_delta(&mut self, message: &mut Message, text: String) -> Step {
        if self.open == Some(OpenAccumulator::Thinking) {
            let index = message.parts.len() - 1;
            if let Some(MessagePart::Thinking(part)) = message.parts.last_mut() {
                part.content.push_str(&text);
                return Step::Updated(index);
            }
        }

        self.open = Some(OpenAccumulator::Thinking);
        message.parts.push(MessagePart::Thinking(ThinkingPart {
            content: text,
            is_complete: false,
        }));
        Step::Appended(message.parts.len() - 1)
    }

    fn thinking_done(&mut self, message: &mut Message) -> Step {
        if self.open == Some(OpenAccumulator::Thinking) {
            self.open = None;
        }

        let index = message.parts.len().saturating_sub(1);
        match message.parts.last_mut() {
            Some(MessagePart::Thinking(part)) if !part.is_complete => {
                part.is_complete = true;
                Step::Updated(index)
            }
            _ => Step::Ignored,
        }
    }

    fn text_delta(&mut self, message: &mut Message, text: String) -> Step {
        if self.open == Some(OpenAccumulator::Text) {
            let index = message.parts.len() - 1;
            if let Some(MessagePart::Text(part)) = message.parts.last_mut() {
                part.content.push_str(&text);
                return Step::Updated(index);
            }
        }

        self.open = Some(OpenAccumulator::Text);
        message.parts.push(MessagePart::Text(TextPart { content: text }));
        Step::Appended(message.parts.len() - 1)
    }

    fn tool_call_start(&mut self, message: &mut Message, start: ToolCallStart) -> Step {
        self.open = None;
        message.parts.push(MessagePart::ToolCall(ToolCallPart {
            call_id: start.call_id,
            tool_type: start.tool_type,
            status: ToolStatus::Running,
            command: start.command,
            path: start.path,
            file_content: start.content,
            pattern: start.pattern,
            query: start.query,
            ..Default::default()
        }));
        Step::Appended(message.parts.len() - 1)
    }
}

// Does not touch the open accumulator: text after a completion keeps merging
// into the text part that preceded it.
fn tool_call_done(message: &mut Message, done: ToolCallDone) -> Step {
    let found = message.parts.iter_mut().enumerate().find_map(|(index, part)| match part {
        MessagePart::ToolCall(call)
            if call.call_id == done.call_id && call.status == ToolStatus::Running =>
        {
            Some((index, call))
        }
        _ => None,
    });

    let Some((index, call)) = found else {
        debug!(call_id = %done.call_id, "tool_call_done without a running start dropped");
        return Step::Ignored;
    };

    call.status = ToolStatus::Completed;
    call.exit_code = done.exit_code;
    call.stdout = done.stdout;
    call.stderr = done.stderr;
    call.message = done.message;
    call.diff = done.diff;
    call.lines_added = done.lines_added;
    call.lines_removed = done.lines_removed;
    call.total_lines = done.total_lines;

    if done.command.is_some() {
        call.command = done.command;
    }
    if done.path.is_some() {
        call.path = done.path;
    }
    if done.pattern.is_some() {
        call.pattern = done.pattern;
    }
    if done.query.is_some() {
        call.query = done.query;
    }

    Step::Updated(index)
}

/// Terminate the message with an error. The error text replaces the visible content.
pub fn fail_message(message: &mut Message, error: String) -> Step {
    if !message.is_streaming {
        return Step::Ignored;
    }
    abandon_running_tools(message);
    message.content = error.clone();
    message.is_error = true;
    message.is_streaming = false;
    Step::Finished(StreamOutcome::Errored { message: error })
}

/// Terminate the message because the caller cancelled. Idempotent.
pub fn cancel_message(message: &mut Message) -> Step {
    if !message.is_streaming {
        return Step::Ignored;
    }
    abandon_running_tools(message);
    message.content.push_str(CANCELLED_MARKER);
    message.is_streaming = false;
    Step::Finished(StreamOutcome::Cancelled)
}

fn abandon_running_tools(message: &mut Message) {
    for part in &mut message.parts {
        if let MessagePart::ToolCall(call) = part {
            if call.status == ToolStatus::Running {
                call.status = ToolStatus::Error;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn streaming() -> Message {
        Message::placeholder("a1".into(), "2026-01-01T00:00:00Z".into())
    }

    fn fold(message: &mut Message, events: Vec<ProtocolEvent>) -> Vec<Step> {
        let mut assembler = PartAssembler::new();
        events
            .into_iter()
            .map(|event| assembler.apply(message, event))
            .collect()
    }

    fn text(s: &str) -> ProtocolEvent {
        ProtocolEvent::TextDelta { text: s.into() }
    }

    fn thinking(s: &str) -> ProtocolEvent {
        ProtocolEvent::ThinkingDelta { text: s.into() }
    }

    fn shell_start(call_id: &str, command: &str) -> ProtocolEvent {
        ProtocolEvent::ToolCallStart(ToolCallStart {
            call_id: call_id.into(),
            tool_type: "shell".into(),
            command: Some(command.into()),
            ..Default::default()
        })
    }

    fn shell_done(call_id: &str, stdout: &str) -> ProtocolEvent {
        ProtocolEvent::ToolCallDone(ToolCallDone {
            call_id: call_id.into(),
            tool_type: "shell".into(),
            exit_code: Some(0),
            stdout: Some(stdout.into()),
            ..Default::default()
        })
    }

    #[test]
    fn consecutive_text_deltas_merge() {
        let mut message = streaming();

        let steps = fold(&mut message, vec![text("Hel"), text("lo, "), text("world")]);

        assert_eq!(steps, vec![Step::Appended(0), Step::Updated(0), Step::Updated(0)]);
        assert_eq!(message.parts.len(), 1);
        assert_eq!(message.content, "Hello, world");
    }

    #[test]
    fn output_is_folded_like_text() {
        let mut message = streaming();

        fold(
            &mut message,
            vec![text("a"), ProtocolEvent::Output { text: "b".into() }],
        );

        assert_eq!(message.parts.len(), 1);
        assert_eq!(message.content, "ab");
    }

    #[test]
    fn thinking_after_completion_starts_a_new_part() {
        let mut message = streaming();

        fold(
            &mut message,
            vec![
                thinking("a"),
                thinking("b"),
                ProtocolEvent::ThinkingDone,
                thinking("c"),
            ],
        );

        assert_eq!(
            message.parts,
            vec![
                MessagePart::Thinking(ThinkingPart {
                    content: "ab".into(),
                    is_complete: true
                }),
                MessagePart::Thinking(ThinkingPart {
                    content: "c".into(),
                    is_complete: false
                }),
            ]
        );
        assert_eq!(message.content, "");
    }

    #[test]
    fn thinking_done_without_thinking_is_a_no_op() {
        let mut message = streaming();

        let steps = fold(
            &mut message,
            vec![text("x"), ProtocolEvent::ThinkingDone, ProtocolEvent::ThinkingDone],
        );

        assert_eq!(steps[1], Step::Ignored);
        assert_eq!(steps[2], Step::Ignored);
        assert_eq!(message.parts.len(), 1);
    }

    #[test]
    fn text_after_tool_call_opens_a_new_text_part() {
        let mut message = streaming();

        fold(&mut message, vec![text("before "), shell_start("1", "ls"), text("after")]);

        assert_eq!(message.parts.len(), 3);
        assert_eq!(message.content, "before after");
    }

    #[test]
    fn tool_call_done_updates_original_part_in_place() {
        let mut message = streaming();

        let steps = fold(
            &mut message,
            vec![
                shell_start("1", "ls"),
                text("running "),
                text("it"),
                shell_done("1", "x"),
            ],
        );

        assert_eq!(steps[3], Step::Updated(0));
        assert_eq!(message.parts.len(), 2);
        let call = message.tool_call("1").unwrap();
        assert_eq!(call.status, ToolStatus::Completed);
        assert_eq!(call.command.as_deref(), Some("ls"));
        assert_eq!(call.exit_code, Some(0));
        assert_eq!(call.stdout.as_deref(), Some("x"));
    }

    #[test]
    fn tool_calls_with_same_type_never_merge() {
        let mut message = streaming();

        fold(&mut message, vec![shell_start("1", "ls"), shell_start("2", "pwd")]);

        assert_eq!(message.parts.len(), 2);
    }

    #[test]
    fn orphan_tool_call_done_changes_nothing() {
        let mut message = streaming();
        fold(&mut message, vec![shell_start("1", "ls"), text("hi")]);
        let before = message.clone();

        let step = PartAssembler::new().apply(&mut message, shell_done("missing", "x"));

        assert_eq!(step, Step::Ignored);
        assert_eq!(message, before);
    }

    #[test]
    fn duplicate_completion_is_dropped() {
        let mut message = streaming();

        let steps = fold(
            &mut message,
            vec![shell_start("1", "ls"), shell_done("1", "first"), shell_done("1", "second")],
        );

        assert_eq!(steps[2], Step::Ignored);
        assert_eq!(message.tool_call("1").unwrap().stdout.as_deref(), Some("first"));
    }

    #[test]
    fn done_repeats_descriptive_fields_only_when_present() {
        let mut message = streaming();
        let start = ProtocolEvent::ToolCallStart(ToolCallStart {
            call_id: "g".into(),
            tool_type: "grep".into(),
            pattern: Some("todo".into()),
            path: Some("src".into()),
            ..Default::default()
        });
        let done = ProtocolEvent::ToolCallDone(ToolCallDone {
            call_id: "g".into(),
            tool_type: "grep".into(),
            pattern: Some("TODO".into()),
            ..Default::default()
        });

        fold(&mut message, vec![start, done]);

        let call = message.tool_call("g").unwrap();
        assert_eq!(call.pattern.as_deref(), Some("TODO"));
        assert_eq!(call.path.as_deref(), Some("src"));
    }

    #[test]
    fn nothing_changes_after_done() {
        let mut message = streaming();

        let steps = fold(
            &mut message,
            vec![
                text("final"),
                ProtocolEvent::Done { exit_code: 0 },
                text(" extra"),
                shell_start("9", "rm -rf /"),
                ProtocolEvent::Error {
                    message: "late".into(),
                },
            ],
        );

        assert_eq!(steps[1], Step::Finished(StreamOutcome::Completed { exit_code: 0 }));
        assert_eq!(&steps[2..], &[Step::Ignored, Step::Ignored, Step::Ignored]);
        assert!(!message.is_streaming);
        assert!(!message.is_error);
        assert_eq!(message.content, "final");
        assert_eq!(message.parts.len(), 1);
    }

    #[test]
    fn error_event_marks_message_and_fails_running_tools() {
        let mut message = streaming();

        let steps = fold(
            &mut message,
            vec![
                shell_start("1", "make"),
                ProtocolEvent::Error {
                    message: "Cursor CLI not found".into(),
                },
                text("ignored"),
            ],
        );

        assert_eq!(
            steps[1],
            Step::Finished(StreamOutcome::Errored {
                message: "Cursor CLI not found".into()
            })
        );
        assert_eq!(steps[2], Step::Ignored);
        assert!(message.is_error);
        assert!(!message.is_streaming);
        assert_eq!(message.content, "Cursor CLI not found");
        assert_eq!(message.tool_call("1").unwrap().status, ToolStatus::Error);
    }

    #[test]
    fn cancel_appends_marker_once() {
        let mut message = streaming();
        fold(&mut message, vec![shell_start("1", "sleep 60"), text("partial")]);

        assert_eq!(cancel_message(&mut message), Step::Finished(StreamOutcome::Cancelled));
        assert_eq!(cancel_message(&mut message), Step::Ignored);

        assert_eq!(message.content, format!("partial{}", CANCELLED_MARKER));
        assert!(!message.is_streaming);
        assert!(!message.is_error);
        assert_eq!(message.tool_call("1").unwrap().status, ToolStatus::Error);
    }

    #[test]
    fn cancel_after_done_leaves_message_untouched() {
        let mut message = streaming();
        fold(&mut message, vec![text("ok"), ProtocolEvent::Done { exit_code: 0 }]);

        assert_eq!(cancel_message(&mut message), Step::Ignored);
        assert_eq!(message.content, "ok");
    }

    #[test]
    fn start_surfaces_conversation_id_without_mutating() {
        let mut message = streaming();

        let steps = fold(
            &mut message,
            vec![ProtocolEvent::Start {
                conversation_id: "c1".into(),
            }],
        );

        assert_eq!(steps, vec![Step::Started("c1".into())]);
        assert!(message.parts.is_empty());
    }

    #[test]
    fn done_fails_tool_calls_that_never_completed() {
        let mut message = streaming();

        let steps = fold(
            &mut message,
            vec![
                shell_start("t1", "make"),
                shell_start("t2", "ls"),
                shell_done("t2", "Makefile"),
                ProtocolEvent::Done { exit_code: 1 },
            ],
        );

        assert_eq!(
            steps.last(),
            Some(&Step::Finished(StreamOutcome::Completed { exit_code: 1 }))
        );
        assert!(!message.is_streaming);
        assert_eq!(message.tool_call("t1").unwrap().status, ToolStatus::Error);
        assert_eq!(message.tool_call("t2").unwrap().status, ToolStatus::Completed);
    }
}
