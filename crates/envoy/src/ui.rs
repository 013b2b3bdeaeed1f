use std::collections::HashMap;
use std::io::{self, Write};

use crossterm::style::Stylize;
use tokio::sync::mpsc;
use vibe_shared::{Message, MessagePart, Role, ToolCallPart, ToolKind, ToolStatus};

use crate::assembler::StreamOutcome;
use crate::conversation::{ConversationView, ViewEvent};

const PREVIEW_CHARS: usize = 120;

/// Prints view changes to the terminal as they happen.
pub struct Renderer {
    view: ConversationView,
    // Bytes already printed per (message, part) for the accumulating parts
    printed: HashMap<(usize, usize), usize>,
}

impl Renderer {
    pub fn new(view: ConversationView) -> Self {
        Self {
            view,
            printed: HashMap::new(),
        }
    }

    pub fn handle(&mut self, event: &ViewEvent) {
        match event {
            ViewEvent::PartAppended { message, part } | ViewEvent::PartUpdated { message, part } => {
                self.render_part(*message, *part);
            }
            ViewEvent::StreamFinished { outcome, .. } => match outcome {
                StreamOutcome::Completed { exit_code: 0 } => println!(),
                StreamOutcome::Completed { exit_code } => {
                    println!("\n{}", format!("(agent exited with code {})", exit_code).dim());
                }
                StreamOutcome::Errored { message } => {
                    eprintln!("\n❌ Error: {}", message);
                }
                StreamOutcome::Cancelled => {
                    println!("\n{}", "[Cancelled]".yellow());
                }
            },
            ViewEvent::Reset => self.printed.clear(),
            ViewEvent::ConversationStarted(_) | ViewEvent::MessagePushed(_) => {}
        }
        io::stdout().flush().ok();
    }

    fn render_part(&mut self, message: usize, index: usize) {
        let part = self.view.read(|state| {
            state
                .messages()
                .get(message)
                .and_then(|m| m.parts.get(index))
                .cloned()
        });
        let Some(part) = part else {
            return;
        };

        match part {
            MessagePart::Thinking(thinking) => {
                let printed = self.printed.entry((message, index)).or_insert(0);
                if *printed == 0 && !thinking.content.is_empty() {
                    print!("\n{} ", "💭".dim());
                }
                if let Some(fresh) = thinking.content.get(*printed..) {
                    print!("{}", fresh.dim());
                }
                *printed = thinking.content.len();
                if thinking.is_complete {
                    println!();
                }
            }
            MessagePart::Text(text) => {
                let printed = self.printed.entry((message, index)).or_insert(0);
                if let Some(fresh) = text.content.get(*printed..) {
                    print!("{}", fresh);
                }
                *printed = text.content.len();
            }
            MessagePart::ToolCall(call) => match call.status {
                ToolStatus::Running => println!("\n{}", tool_heading(&call)),
                ToolStatus::Completed => println!("   {} {}", "✓".green(), summarize(&call)),
                ToolStatus::Error => println!("   {} interrupted", "✗".red()),
            },
        }
    }
}

/// Ctrl-C presses from one process-wide listener. Presses are buffered, so
/// one arriving while nothing is waiting is delivered to the next `recv`.
pub struct Interrupts {
    rx: mpsc::UnboundedReceiver<()>,
}

impl Interrupts {
    /// Install the listener. Must be called from within a tokio runtime.
    pub fn listen() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(forward_interrupts(tx));
        Self { rx }
    }

    /// Wait for the next press. Pends forever if the listener is gone.
    pub async fn recv(&mut self) {
        if self.rx.recv().await.is_none() {
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(unix)]
async fn forward_interrupts(tx: mpsc::UnboundedSender<()>) {
    use tokio::signal::unix::{SignalKind, signal};

    let mut interrupts = match signal(SignalKind::interrupt()) {
        Ok(interrupts) => interrupts,
        Err(e) => {
            tracing::warn!(error = %e, "failed to install Ctrl-C handler");
            return;
        }
    };
    while interrupts.recv().await.is_some() {
        if tx.send(()).is_err() {
            break;
        }
    }
}

#[cfg(not(unix))]
async fn forward_interrupts(tx: mpsc::UnboundedSender<()>) {
    while tokio::signal::ctrl_c().await.is_ok() {
        if tx.send(()).is_err() {
            break;
        }
    }
}

/// Print a finished conversation, e.g. one loaded from the server.
pub fn print_transcript(messages: &[Message]) {
    for message in messages {
        match message.role {
            Role::User => println!("{} {}", "You:".bold(), message.content),
            Role::Assistant => {
                for part in &message.parts {
                    if let MessagePart::ToolCall(call) = part {
                        println!("{}", tool_heading(call));
                    }
                }
                if message.is_error {
                    println!("{} {}", "Agent:".bold(), message.content.as_str().red());
                } else {
                    println!("{} {}", "Agent:".bold(), message.content);
                }
            }
        }
        println!();
    }
}

pub fn tool_heading(call: &ToolCallPart) -> String {
    let kind = call.kind();
    match call.detail() {
        Some(detail) => format!("🔧 {}: {}", kind.label(), preview(detail)),
        None => format!("🔧 {}", kind.label()),
    }
}

/// One-line result summary for a completed tool call.
pub fn summarize(call: &ToolCallPart) -> String {
    match call.kind() {
        ToolKind::Shell => {
            let code = call.exit_code.unwrap_or(0);
            match call.stdout.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
                Some(stdout) => format!("exit {} · {}", code, preview(stdout)),
                None => format!("exit {}", code),
            }
        }
        ToolKind::FileEdit => format!(
            "+{} -{}",
            call.lines_added.unwrap_or(0),
            call.lines_removed.unwrap_or(0)
        ),
        ToolKind::ReadFile => format!("{} lines", call.total_lines.unwrap_or(0)),
        _ => call
            .message
            .as_deref()
            .map(preview)
            .unwrap_or_else(|| "done".to_string()),
    }
}

fn preview(text: &str) -> String {
    let first_line = text.lines().next().unwrap_or("");
    let extra_lines = text.lines().count().saturating_sub(1);

    let mut out: String = first_line.chars().take(PREVIEW_CHARS).collect();
    if first_line.chars().count() > PREVIEW_CHARS {
        out.push('…');
    }
    if extra_lines > 0 {
        out.push_str(&format!(" (+{} lines)", extra_lines));
    }
    out
}
