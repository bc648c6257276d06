//! `folio index`, `folio ask` and `folio chat`.

use std::io::Write;

use anyhow::Result;
use folio_core::models::{Answer, ConversationTurn, Role};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use crate::pipeline::BuildReport;
use crate::session::{Services, Session};

pub async fn run_index(services: &Services, rebuild: bool) -> Result<()> {
    let report = services.build_index(rebuild, &CancellationToken::new()).await?;
    print_build_report(&report);
    Ok(())
}

/// Build the index quietly before answering. Load failures go to stderr.
pub async fn ensure_index(services: &Services) -> Result<BuildReport> {
    let report = services.build_index(false, &CancellationToken::new()).await?;
    for failure in &report.load_failures {
        eprintln!("Warning: {}", failure);
    }
    Ok(report)
}

pub fn print_build_report(report: &BuildReport) {
    println!("index");
    println!("  documents: {}", report.documents);
    for source in &report.sources {
        println!("    {}", source);
    }
    println!("  chunks: {}", report.chunks);
    println!("  load failures: {}", report.load_failures.len());
    for failure in &report.load_failures {
        println!("    {}", failure);
    }
    match &report.index {
        None => println!("  up to date"),
        Some(index) => {
            println!("  inserted: {}", index.inserted);
            println!("  skipped: {}", index.skipped);
            println!("  removed: {}", index.removed);
            println!("  rejected: {}", index.rejected.len());
            for rejected in &index.rejected {
                println!("    {}: {}", rejected.chunk_id, rejected.reason);
            }
            println!("  total vectors: {}", index.total);
        }
    }
    println!("ok");
}

pub async fn run_ask(services: &Services, question: &str) -> Result<()> {
    ensure_index(services).await?;
    let session = Session::new(uuid::Uuid::new_v4().to_string(), services);
    let answer = session.engine().ask(question).await?;
    print_answer(&answer);
    Ok(())
}

fn print_answer(answer: &Answer) {
    println!("{}", answer.answer);
    if !answer.sources.is_empty() {
        println!();
        println!("Sources: {}", answer.sources.join(", "));
    }
    if let Some((from, to)) = &answer.translated_from {
        println!("(translated from {} to {})", from, to);
    }
}

fn print_turn(turn: &ConversationTurn) {
    let speaker = match turn.role {
        Role::User => "you",
        Role::Assistant => "folio",
    };
    println!(
        "[{}] {} {}: {}",
        turn.order,
        turn.timestamp.format("%H:%M:%S"),
        speaker,
        turn.text
    );
}

/// One line of chat input, parsed.
#[derive(Debug, PartialEq)]
enum Input<'a> {
    Quit,
    Reset,
    History,
    Sources,
    Empty,
    Question(&'a str),
}

fn parse_input(line: &str) -> Input<'_> {
    let trimmed = line.trim();
    match trimmed.to_lowercase().as_str() {
        "exit" | "quit" => Input::Quit,
        "/reset" => Input::Reset,
        "/history" => Input::History,
        "/sources" => Input::Sources,
        "" => Input::Empty,
        _ => Input::Question(trimmed),
    }
}

/// Terminal conversation until `exit`, `quit` or end of input.
pub async fn run_chat(services: &Services) -> Result<()> {
    ensure_index(services).await?;
    let session = Session::new(uuid::Uuid::new_v4().to_string(), services);
    tracing::info!(session = session.id(), "chat started");

    let interactive = atty::is(atty::Stream::Stdin);
    if interactive {
        println!("Ask about your documents. /reset, /history, /sources, exit.");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        if interactive {
            print!("> ");
            std::io::stdout().flush()?;
        }
        let Some(line) = lines.next_line().await? else {
            break;
        };
        match parse_input(&line) {
            Input::Quit => break,
            Input::Empty => continue,
            Input::Reset => {
                session.engine().reset();
                println!("Conversation cleared.");
            }
            Input::History => {
                for turn in session.engine().history() {
                    print_turn(&turn);
                }
            }
            Input::Sources => {
                for source in services.sources() {
                    println!("{}", source);
                }
            }
            Input::Question(question) => match session.engine().ask(question).await {
                Ok(answer) => print_answer(&answer),
                Err(e) => eprintln!("Error: {}", e),
            },
        }
        println!();
    }
    Ok(())
}
