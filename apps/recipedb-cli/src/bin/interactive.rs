//! Line-oriented search session. Each line replaces the query; commands
//! start with `/`.

use anyhow::Result;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines, Stdin};

use recipedb_cli::{init_tracing, load_settings, print_view};
use recipedb_core::types::SearchMode;
use recipedb_query::{CoordinatorConfig, LoadState, QueryCoordinator, SearchEngine, Startup};

const HELP: &str = "\
  <text>          search for <text> (blank line clears)
  /mode <m>       switch to semantic or lexical
  /more           show the next page
  /help           this message
  /quit           leave";

type Input = Lines<BufReader<Stdin>>;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let (settings, base_dir) = load_settings()?;
    let search = settings.search.clone();
    let mut input = BufReader::new(tokio::io::stdin()).lines();

    let mut startup = Startup::new(settings, base_dir);
    println!("⏳ Loading recipes and model…");
    let Some(engine) = start(&mut startup, &mut input).await? else {
        return Ok(());
    };
    println!("✅ {} recipes ready. Type /help for commands.", engine.len());

    let coordinator = QueryCoordinator::spawn(Arc::clone(&engine), CoordinatorConfig::from(&search));
    loop {
        prompt(&coordinator.view().mode.to_string()).await?;
        let Some(line) = input.next_line().await? else { break };
        let line = line.trim_end();
        match line.split_once(' ').map_or((line, ""), |(cmd, rest)| (cmd, rest.trim())) {
            ("/quit" | "/exit", _) => break,
            ("/help", _) => println!("{HELP}"),
            ("/mode", arg) => match arg.parse::<SearchMode>() {
                Ok(mode) => {
                    let before = coordinator.view();
                    coordinator.set_mode(mode);
                    if before.mode != mode && !before.query.trim().is_empty() {
                        let view = coordinator.wait_for_results(before.generation).await?;
                        print_view(&engine, &view);
                    } else {
                        println!("mode: {mode}");
                    }
                }
                Err(e) => println!("{e}"),
            },
            ("/more", _) => {
                let before = coordinator.view();
                if before.has_more {
                    let mut rx = coordinator.subscribe();
                    coordinator.load_more();
                    let view = rx.wait_for(|v| v.page > before.page || v.generation != before.generation).await?.clone();
                    print_view(&engine, &view);
                } else {
                    println!("no more results");
                }
            }
            (cmd, _) if cmd.starts_with('/') => println!("unknown command {cmd}; try /help"),
            _ => {
                let before = coordinator.view();
                coordinator.set_query_text(line);
                if line.trim().is_empty() {
                    println!("cleared");
                } else {
                    let view = coordinator.wait_for_results(before.generation).await?;
                    print_view(&engine, &view);
                }
            }
        }
    }
    Ok(())
}

/// Load the engine, offering a retry while the failure is recoverable.
async fn start(startup: &mut Startup, input: &mut Input) -> Result<Option<Arc<SearchEngine>>> {
    let mut outcome = startup.load().await;
    loop {
        match outcome {
            Ok(engine) => return Ok(Some(engine)),
            Err(err) => {
                println!("❌ Startup failed: {err:#}");
                if !matches!(startup.state(), LoadState::Failed { recoverable: true, .. }) {
                    return Err(err);
                }
            }
        }
        prompt("retry? [Y/n]").await?;
        match input.next_line().await? {
            Some(answer) if !answer.trim().eq_ignore_ascii_case("n") => outcome = startup.retry().await,
            _ => return Ok(None),
        }
    }
}

async fn prompt(label: &str) -> Result<()> {
    let mut stdout = tokio::io::stdout();
    stdout.write_all(format!("{label}> ").as_bytes()).await?;
    stdout.flush().await?;
    Ok(())
}
