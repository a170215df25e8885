use std::io::Write;
use std::sync::Arc;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};

use companion::core::config::{AppPaths, ConfigService};
use companion::core::logging;
use companion::llm::{counter_for, Embedder, LlamaServerClient};
use companion::{ChatSession, ConversationStore};

const HELP: &str = "commands: /new, /threads, /open <id>, /rename <title>, /quit";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let paths = Arc::new(AppPaths::new());
    logging::init(&paths);

    let config = ConfigService::new(paths.clone())
        .load_config()
        .context("Failed to load configuration")?;

    let store = ConversationStore::open(&paths.db_path)
        .await
        .with_context(|| format!("Failed to open {}", paths.db_path.display()))?
        .with_default_title(config.chat.default_title.clone())
        .with_embedding_timeout(config.memory.embedding_timeout());
    let store = Arc::new(store);

    let client = Arc::new(LlamaServerClient::new(&config.model)?);
    let embedder: Option<Arc<dyn Embedder>> = if config.memory.enabled {
        Some(client.clone() as Arc<dyn Embedder>)
    } else {
        None
    };
    let counter = counter_for(&config.model)?;

    let mut session = ChatSession::new(store.clone(), client, embedder, counter, &config)?;
    tracing::info!(
        budget = session.window().budget(),
        db = %store.db_path().display(),
        "Companion ready"
    );

    println!("{}", HELP);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(command) = line.strip_prefix('/') {
            if !run_command(&mut session, command).await? {
                break;
            }
            continue;
        }

        let result = session
            .respond(line, |chunk| {
                print!("{}", chunk);
                let _ = std::io::stdout().flush();
            })
            .await;
        println!();
        if let Err(err) = result {
            eprintln!("error: {}", err);
        }
    }

    store.close().await;
    Ok(())
}

/// Returns `false` when the loop should stop.
async fn run_command(session: &mut ChatSession, command: &str) -> anyhow::Result<bool> {
    let (name, arg) = command
        .split_once(' ')
        .map(|(n, a)| (n, a.trim()))
        .unwrap_or((command, ""));

    match name {
        "quit" | "exit" => return Ok(false),
        "new" => {
            let id = session.new_thread().await?;
            println!("started thread {}", id);
        }
        "threads" => {
            for thread in session.store().list_threads().await? {
                let marker = if Some(thread.id) == session.current_thread() {
                    "*"
                } else {
                    " "
                };
                println!("{} {:>4}  {}", marker, thread.id, thread.title);
            }
        }
        "open" => match arg.parse::<i64>() {
            Ok(id) => match session.load_thread(id).await {
                Ok(()) => {
                    for message in session.store().get_messages(id).await? {
                        println!("[{}] {}", message.role, message.content);
                    }
                }
                Err(err) => eprintln!("error: {}", err),
            },
            Err(_) => eprintln!("usage: /open <id>"),
        },
        "rename" => match session.current_thread() {
            Some(id) if !arg.is_empty() => {
                session.store().rename_thread(id, arg).await?;
                println!("renamed thread {}", id);
            }
            Some(_) => eprintln!("usage: /rename <title>"),
            None => eprintln!("no active thread"),
        },
        _ => println!("{}", HELP),
    }
    Ok(true)
}
