//! `ragchat chat`: one chat session over the terminal.

use std::io::Write;
use std::sync::Arc;

use ragchat_config::AppConfig;
use ragchat_serving::{ChatSession, ServingPipeline, SessionEvent};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

use super::build_pipeline;

const RULE_WIDTH: usize = 50;

pub async fn run(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    info!("Starting chat session");
    let pipeline = build_pipeline(config)?;
    pipeline.warm_up().await;

    let stdin = BufReader::new(tokio::io::stdin());
    let mut stdout = std::io::stdout();
    converse(pipeline, stdin, &mut stdout).await?;
    Ok(())
}

/// Drive a [`ChatSession`] from `input` lines, rendering its events to `out`.
///
/// `exit` or `quit` (any case) or end of input ends the session. Blank
/// lines are ignored.
pub async fn converse<R, W>(pipeline: Arc<ServingPipeline>, input: R, out: &mut W) -> std::io::Result<()>
where
    R: AsyncBufRead + Unpin,
    W: Write,
{
    let (in_tx, in_rx) = mpsc::channel::<String>(1);
    let (out_tx, mut out_rx) = mpsc::channel::<SessionEvent>(64);
    let session = tokio::spawn(ChatSession::new(pipeline).run(in_rx, out_tx));

    let mut printer = Printer::new(out);
    if let Some(ready) = out_rx.recv().await {
        printer.render(&ready)?;
    }
    writeln!(printer.out, "Type 'exit' or 'quit' to end the session.")?;

    let mut lines = input.lines();
    'session: loop {
        write!(printer.out, "> ")?;
        printer.out.flush()?;

        let Some(line) = lines.next_line().await? else {
            writeln!(printer.out)?;
            break;
        };
        let trimmed = line.trim();
        if trimmed.eq_ignore_ascii_case("exit") || trimmed.eq_ignore_ascii_case("quit") {
            break;
        }
        if trimmed.is_empty() {
            continue;
        }

        if in_tx.send(line).await.is_err() {
            break;
        }
        loop {
            let Some(event) = out_rx.recv().await else {
                warn!("Session ended unexpectedly");
                break 'session;
            };
            printer.render(&event)?;
            if event.ends_turn() {
                break;
            }
        }
    }

    writeln!(printer.out, "Goodbye!")?;
    drop(in_tx);
    drop(out_rx);
    if let Err(e) = session.await {
        warn!("Session task failed: {e}");
    }
    info!("Chat session ended by user");
    Ok(())
}

/// Terminal rendering of session events.
struct Printer<'a, W: Write> {
    out: &'a mut W,
    answering: bool,
}

impl<'a, W: Write> Printer<'a, W> {
    fn new(out: &'a mut W) -> Self {
        Self { out, answering: false }
    }

    fn render(&mut self, event: &SessionEvent) -> std::io::Result<()> {
        match event {
            SessionEvent::Ready { message } => writeln!(self.out, "{message}"),
            SessionEvent::Rejected { reason } => writeln!(self.out, "\nError: {reason}"),
            SessionEvent::Chunk { content } | SessionEvent::Answer { content, .. } => {
                if !self.answering {
                    write!(self.out, "\nBot: ")?;
                    self.answering = true;
                }
                write!(self.out, "{content}")?;
                self.out.flush()
            }
            SessionEvent::Done { cached, .. } => {
                self.answering = false;
                writeln!(self.out)?;
                writeln!(self.out, "{}", "-".repeat(RULE_WIDTH))?;
                if *cached {
                    writeln!(self.out, "(response from cache)")?;
                }
                Ok(())
            }
            SessionEvent::Error { message } => {
                if std::mem::take(&mut self.answering) {
                    writeln!(self.out)?;
                }
                writeln!(self.out, "\nAn error occurred: {message}")
            }
        }
    }
}
