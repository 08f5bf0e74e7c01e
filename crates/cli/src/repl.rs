//! Interactive terminal front end.

use std::io::Write;

use {
    grimoire_agents::RunnerEvent,
    grimoire_chat::{AssistantWorker, RulesAssistant, WorkerEvent},
    grimoire_memory::RulebookStatus,
    grimoire_sessions::SessionEvent,
    tokio::{
        io::{AsyncBufReadExt, BufReader},
        sync::broadcast,
    },
};

const HELP: &str = "\
Commands:
  /rules    show referenced rules
  /clear    clear the referenced rules list
  /new      start a new conversation
  /status   show rulebook index status
  /help     show this help
  /quit     exit";

#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Message(&'a str),
    Rules,
    Clear,
    NewSession,
    Status,
    Help,
    Quit,
    Unknown(&'a str),
    Empty,
}

fn parse_input(line: &str) -> Input<'_> {
    let line = line.trim();
    if line.is_empty() {
        return Input::Empty;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Input::Message(line);
    };
    match command.to_ascii_lowercase().as_str() {
        "rules" => Input::Rules,
        "clear" => Input::Clear,
        "new" => Input::NewSession,
        "status" => Input::Status,
        "help" | "?" => Input::Help,
        "quit" | "exit" | "q" => Input::Quit,
        _ => Input::Unknown(line),
    }
}

pub async fn run(assistant: RulesAssistant) -> anyhow::Result<()> {
    println!("System: {}", assistant.greeting());
    println!("(type /help for commands)\n");

    let (worker, mut events) = AssistantWorker::spawn(assistant);
    let mut session_events = worker.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("You: ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };

        match parse_input(&line) {
            Input::Empty => continue,
            Input::Quit => break,
            Input::Help => println!("{HELP}"),
            Input::Rules => print_rules(&worker.referenced_rules()),
            Input::Clear => {
                worker.clear_referenced_rules();
                println!("Referenced rules cleared.");
            },
            Input::Status => print_status(worker.status()),
            Input::Unknown(cmd) => println!("Unknown command {cmd}. Type /help."),
            Input::NewSession => {
                worker.new_session()?;
                wait_for_reply(&mut events).await;
            },
            Input::Message(text) => {
                worker.submit(text)?;
                eprintln!("Thinking...");
                wait_for_reply(&mut events).await;
                if let Some(count) = rules_count_update(&mut session_events) {
                    eprintln!("({count} referenced rules, /rules to list)");
                }
            },
        }
        println!();
    }

    worker.shutdown().await;
    Ok(())
}

/// Print worker events until the outstanding request is answered.
async fn wait_for_reply(events: &mut tokio::sync::mpsc::UnboundedReceiver<WorkerEvent>) {
    while let Some(event) = events.recv().await {
        match event {
            WorkerEvent::Progress(RunnerEvent::ToolCallStart { arguments, .. }) => {
                let query = arguments["query"].as_str().unwrap_or_default();
                eprintln!("Searching rules: {query}");
            },
            WorkerEvent::Progress(_) => {},
            WorkerEvent::Response { text, .. } => {
                println!("Assistant: {text}");
                return;
            },
            WorkerEvent::Failed(msg) => {
                println!("System: {msg}");
                return;
            },
            WorkerEvent::SessionStarted { session_id } => {
                println!("System: started new conversation {session_id}");
                return;
            },
        }
    }
}

/// Drain pending session events and return the latest referenced-rules
/// count, if one was announced.
fn rules_count_update(rx: &mut broadcast::Receiver<SessionEvent>) -> Option<usize> {
    let mut latest = None;
    loop {
        match rx.try_recv() {
            Ok(SessionEvent::RulesUpdated { count, .. }) => latest = Some(count),
            Ok(SessionEvent::Cleared { .. }) => latest = Some(0),
            Ok(SessionEvent::Created { .. }) => {},
            Err(broadcast::error::TryRecvError::Lagged(_)) => {},
            Err(_) => return latest,
        }
    }
}

pub fn print_rules(rules: &[String]) {
    if rules.is_empty() {
        println!("No rules referenced yet.");
        return;
    }
    println!("Referenced rules:");
    for rule in rules {
        println!("  - {rule}");
    }
}

pub fn print_status(status: &RulebookStatus) {
    if status.placeholder {
        println!("Rulebook: not found, using placeholder content");
    } else {
        println!("Rulebook: {} pages", status.total_pages);
    }
    println!("Chunks indexed: {}", status.total_chunks);
    println!("Embedding model: {}", status.embedding_model);
}
