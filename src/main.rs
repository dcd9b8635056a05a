//! toolmesh — interactive chat with a local model over one or more MCP servers.
//!
//! Usage:
//!   toolmesh <servers.json> [http_url ...]
//!   toolmesh <http_url> [http_url ...]

use std::collections::HashMap;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, BufReader};

use toolmesh::config::find_settings_path;
use toolmesh::inference::Role;
use toolmesh::mcp_client::HttpServerSpec;
use toolmesh::{AgentClient, AgentError, AgentSettings, OllamaClient, ServersConfig};

const USAGE: &str = "Usage: toolmesh <servers.json> [http_url ...]\n       toolmesh <http_url> [http_url ...]";

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(first) = args.first() else {
        eprintln!("{USAGE}");
        std::process::exit(1);
    };

    match toolmesh::logging::init_tracing() {
        Ok(path) => eprintln!("logging to {}", path.display()),
        Err(e) => eprintln!("warning: file logging disabled: {e}"),
    }

    let servers = load_servers(first, &args[1..])?;
    let settings = load_settings()?;

    let backend = Arc::new(
        OllamaClient::new(&settings.base_url, &settings.model)
            .context("invalid model backend settings")?,
    );
    if !backend.health_check().await {
        eprintln!(
            "warning: no Ollama server answering at {}; prompts will fail until it is up",
            backend.base_url()
        );
    }

    let mut client = AgentClient::new(backend.clone(), settings.conversation_config());
    for (name, err) in client.connect_all(&servers).await {
        eprintln!("failed to connect '{name}': {err}");
    }
    if client.list_all_servers().is_empty() {
        bail!("no MCP server could be connected");
    }

    run_chat_loop(&mut client, &backend).await;

    for (name, err) in client.shutdown().await {
        eprintln!("failed to close '{name}': {err}");
    }
    Ok(())
}

// ─── Startup ────────────────────────────────────────────────────────────────

fn is_url(arg: &str) -> bool {
    arg.starts_with("http://") || arg.starts_with("https://")
}

/// A leading URL means URL-only mode; otherwise the first argument is a
/// servers file and any further URLs are added to it as `http_extra_<i>`.
fn load_servers(first: &str, rest: &[String]) -> Result<ServersConfig> {
    let extra: Vec<&str> = rest
        .iter()
        .map(String::as_str)
        .filter(|arg| {
            let keep = is_url(arg);
            if !keep {
                eprintln!("ignoring non-URL argument '{arg}'");
            }
            keep
        })
        .collect();

    if is_url(first) {
        let mut urls = vec![first];
        urls.extend(extra);
        return Ok(ServersConfig::from_urls(&urls));
    }

    let mut config = ServersConfig::load(Path::new(first))
        .with_context(|| format!("failed to load servers file {first}"))?;
    for (i, url) in extra.into_iter().enumerate() {
        config.http.push((
            Some(format!("http_extra_{i}")),
            HttpServerSpec {
                url: url.to_string(),
                headers: HashMap::new(),
            },
        ));
    }
    if config.is_empty() {
        bail!("{first} lists no servers");
    }
    Ok(config)
}

fn load_settings() -> Result<AgentSettings> {
    let mut settings = match find_settings_path() {
        Some(path) => {
            tracing::info!(path = %path.display(), "loading agent settings");
            AgentSettings::load(&path)
                .with_context(|| format!("failed to load settings {}", path.display()))?
        }
        None => AgentSettings::default(),
    };
    settings.apply_overrides(|key| std::env::var(key).ok());
    Ok(settings)
}

// ─── REPL ───────────────────────────────────────────────────────────────────

async fn run_chat_loop(client: &mut AgentClient, backend: &OllamaClient) {
    println!("\ntoolmesh started (model: {}).", client.conversation().model_name());
    println!("Type your queries or 'quit' to exit.");
    println!("Commands: 'clear', 'server <a,b,...>', 'list_servers', 'list_tools', 'list_models'");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt();
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                eprintln!("failed to read input: {e}");
                break;
            }
        };
        let query = line.trim();

        match query.to_lowercase().as_str() {
            "" => continue,
            "quit" | "exit" => break,
            "clear" => {
                client.reset_conversation();
                println!("Conversation cleared.");
                continue;
            }
            "list_servers" => {
                println!("Available servers: {:?}", client.list_all_servers());
                println!("Selected servers: {:?}", client.list_active_servers());
                continue;
            }
            "list_tools" => {
                let tools = client.list_tools();
                if tools.is_empty() {
                    println!("No tools on the selected servers.");
                } else {
                    println!("{}", tools.summary());
                }
                continue;
            }
            "list_models" => {
                match backend.list_models().await {
                    Ok(models) => {
                        for m in models {
                            println!("{} ({}, {})", m.name, m.parameter_size, m.quantization_level);
                        }
                    }
                    Err(e) => eprintln!("failed to list models: {e}"),
                }
                continue;
            }
            _ => {}
        }

        if let Some(arg) = query.strip_prefix("server ") {
            select_servers(client, arg);
            continue;
        }

        stream_reply(client, query).await;
    }
}

fn prompt() {
    print!("\nChat: ");
    let _ = std::io::stdout().flush();
}

fn select_servers(client: &AgentClient, arg: &str) {
    let requested: Vec<&str> = arg
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();
    let known = client.list_all_servers();
    if !requested.iter().any(|name| known.iter().any(|k| k == name)) {
        println!("No valid servers found. Available: {known:?}");
        return;
    }
    let selected = client.select(&requested);
    println!("Selected servers: {selected:?}");
}

async fn stream_reply(client: &mut AgentClient, query: &str) {
    let mut stream = std::pin::pin!(client.submit(query));
    let mut stdout = std::io::stdout();
    while let Some(item) = stream.next().await {
        match item {
            Ok(reply) if reply.role == Role::Tool => {
                println!("\n{}", reply.content);
            }
            Ok(reply) => {
                print!("{}", reply.content);
                let _ = stdout.flush();
            }
            Err(e) => {
                tracing::error!(error = %e, "conversation turn failed");
                eprintln!("\nerror: {e}");
                if matches!(&e, AgentError::Backend { source } if source.is_unreachable()) {
                    eprintln!("hint: is Ollama running? Try `ollama serve`.");
                }
            }
        }
    }
    println!();
}
