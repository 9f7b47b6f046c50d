mod cli;
mod coordinator;
mod error;
mod kubernetes;
mod logs;
mod parser;
mod types;
mod utils;

use clap::Parser;
use crossterm::style::Stylize;
use kube::{Client, config};
use regex::Regex;
use std::io::{IsTerminal, Read};
use std::path::Path;
use std::sync::Arc;
use tracing::{error, info};

use cli::{Cli, Command};
use coordinator::Coordinator;
use kubernetes::KubeClusterClient;
use types::ResourceDescriptor;
use utils::{format_table, get_color};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let extra_dialects = match &cli.dialects {
        Some(path) => parser::load_dialects(path)?,
        None => Vec::new(),
    };
    let parsers = parser::build_registry(extra_dialects);

    let client = initialize_client(cli.context.as_deref()).await?;
    let coordinator = Coordinator::new(
        Arc::new(KubeClusterClient::new(client)),
        parsers,
        cli.default_namespace.clone(),
    )
    .with_creation_hook(Arc::new(|created: &ResourceDescriptor| {
        println!(
            "{}/{} created in {}",
            created.plural(),
            created.name().unwrap_or_default(),
            created.namespace().unwrap_or_default()
        );
    }));

    let color = std::io::stdout().is_terminal();
    run(&coordinator, &cli, color).await
}

async fn initialize_client(context: Option<&str>) -> anyhow::Result<Client> {
    let config = match context {
        Some(ctx) => config::Config::from_kubeconfig(&config::KubeConfigOptions {
            context: Some(ctx.to_string()),
            ..Default::default()
        })
        .await
        .map_err(|e| anyhow::anyhow!("Context '{}' not found in kubeconfig: {}", ctx, e))?,
        None => config::Config::infer().await?,
    };
    let client = Client::try_from(config)?;
    info!("Using context: {}", context.unwrap_or("current"));
    Ok(client)
}

async fn run(coordinator: &Coordinator, cli: &Cli, color: bool) -> anyhow::Result<()> {
    let namespace = cli.namespace.as_deref();

    match &cli.command {
        Command::List => {
            let resources = coordinator.get_resources(namespace).await?;
            let mut rows = vec![vec![
                "NAME".to_string(),
                "DIALECT".to_string(),
                "NAMESPACE".to_string(),
                "KIND".to_string(),
            ]];
            rows.extend(resources.iter().map(|r| {
                vec![
                    r.name.clone(),
                    r.dialect.clone(),
                    r.namespace.clone(),
                    r.resource.kind().to_string(),
                ]
            }));
            let lines = format_table(&rows);
            for (i, line) in lines.iter().enumerate() {
                match i.checked_sub(1).and_then(|j| resources.get(j)) {
                    Some(r) if color => println!("{}", line.as_str().with(get_color(&r.dialect))),
                    _ => println!("{}", line),
                }
            }
        }
        Command::Start { file, dialect } => {
            let input = read_input(file)?;
            match dialect {
                Some(dialect) => {
                    let descriptor = coordinator.parse_as(dialect, &input)?;
                    coordinator.start_descriptor(descriptor, namespace).await?;
                }
                None => coordinator.start(&input, namespace).await?,
            }
        }
        Command::Get { name, dialect } => {
            match coordinator.get(namespace, name, dialect.as_deref()).await? {
                Some(resource) => print!("{}", resource.to_yaml()?),
                None => {
                    error!(
                        "{} not found in namespace {}",
                        name,
                        coordinator.resolve_namespace(namespace)
                    );
                    std::process::exit(1);
                }
            }
        }
        Command::Stop { name, dialect } => {
            if coordinator.stop(name, namespace, dialect.as_deref()).await? {
                println!("{} deleted", name);
            } else {
                println!("{} was already gone", name);
            }
        }
        Command::Logs {
            name,
            dialect,
            tail,
            grep,
        } => {
            let grep_regex = match grep {
                Some(pattern) => Some(
                    Regex::new(pattern)
                        .map_err(|e| anyhow::anyhow!("Invalid regex pattern '{}': {}", pattern, e))?,
                ),
                None => None,
            };

            let mut logs = coordinator
                .stream_logs(namespace, name, dialect.as_deref(), *tail)
                .await?;
            let prefix = format!("[{}]", logs.unit());
            let prefix = if color {
                prefix.as_str().with(get_color(logs.unit())).to_string()
            } else {
                prefix
            };

            let ctrl_c = tokio::signal::ctrl_c();
            tokio::pin!(ctrl_c);
            loop {
                tokio::select! {
                    _ = &mut ctrl_c => {
                        logs.cancel();
                        break;
                    }
                    line = logs.next_line() => match line {
                        Some(line) => {
                            if let Some(ref regex) = grep_regex
                                && !regex.is_match(&line)
                            {
                                continue;
                            }
                            println!("{} {}", prefix, line);
                        }
                        None => break,
                    }
                }
            }
        }
        Command::Dialects => {
            let mut rows = vec![vec![
                "DIALECT".to_string(),
                "API VERSION".to_string(),
                "KIND".to_string(),
                "LOGS".to_string(),
            ]];
            rows.extend(coordinator.dialects().into_iter().map(|d| {
                vec![
                    d.identifier,
                    d.api_version,
                    d.kind,
                    if d.streams_logs { "yes" } else { "no" }.to_string(),
                ]
            }));
            for line in format_table(&rows) {
                println!("{}", line);
            }
        }
        Command::Namespace => println!("{}", coordinator.default_namespace()),
    }

    Ok(())
}

fn read_input(file: &Path) -> anyhow::Result<String> {
    if file == Path::new("-") {
        let mut input = String::new();
        std::io::stdin().read_to_string(&mut input)?;
        Ok(input)
    } else {
        std::fs::read_to_string(file)
            .map_err(|e| anyhow::anyhow!("Could not read {}: {}", file.display(), e))
    }
}
