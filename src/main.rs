use anyhow::Context;
use clap::{Parser, Subcommand};
use repo_analyst::agent::{AnalysisAgent, AnalysisRequest, AnalysisType, SessionState};
use repo_analyst::config::Config;
use repo_analyst::logging;
use repo_analyst::metrics::METRICS;
use repo_analyst::validators::validate_github_url;
use std::io::Write;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader, Lines, Stdin};

#[derive(Parser)]
#[command(name = "repo-analyst")]
#[command(version, about = "Analyze GitHub repositories with an LLM")]
struct Cli {
    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (defaults to ./repo-analyst.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print session state as JSON instead of the text report
    #[arg(long, global = true)]
    json: bool,

    /// Print Prometheus metrics before exiting
    #[arg(long, global = true)]
    metrics: bool,

    /// Without a subcommand, start the interactive shell
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze a single repository
    Analyze {
        /// GitHub repository URL
        url: String,

        /// Analysis type
        #[arg(short = 't', long = "type", default_value = "summary")]
        analysis_type: AnalysisType,

        /// Extra instructions appended to the system prompt
        #[arg(short, long)]
        system_prompt: Option<String>,

        /// Request sent along with the repository data
        #[arg(short, long)]
        user_prompt: Option<String>,
    },
    /// Analyze several repositories concurrently
    Batch {
        /// GitHub repository URLs
        #[arg(required = true)]
        urls: Vec<String>,

        /// Analysis type
        #[arg(short = 't', long = "type", default_value = "summary")]
        analysis_type: AnalysisType,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if cli.verbose {
        config.logging.debug = true;
    }
    logging::init(&config.logging)?;

    let agent = AnalysisAgent::from_config(config).context("Failed to initialize agent")?;

    let result = match cli.command {
        Some(Commands::Analyze {
            url,
            analysis_type,
            system_prompt,
            user_prompt,
        }) => {
            let request = AnalysisRequest::new(url, analysis_type)
                .with_system_prompt(system_prompt.unwrap_or_default())
                .with_user_prompt(user_prompt.unwrap_or_default());
            let state = agent.analyze(request).await;
            display_results(&state, cli.json)
        }
        Some(Commands::Batch { urls, analysis_type }) => {
            let requests = urls
                .into_iter()
                .map(|url| AnalysisRequest::new(url, analysis_type))
                .collect();
            let states = agent.analyze_batch(requests).await;
            states.iter().try_for_each(|state| display_results(state, cli.json))
        }
        None => interactive(&agent, cli.json).await,
    };

    agent.close().await;

    if cli.metrics {
        print!("{}", METRICS.export_prometheus());
    }

    result
}

type InputLines = Lines<BufReader<Stdin>>;

/// Print `label` and read one trimmed line; `None` on end of input
async fn prompt(lines: &mut InputLines, label: &str) -> anyhow::Result<Option<String>> {
    print!("{}", label);
    std::io::stdout().flush()?;
    Ok(lines.next_line().await?.map(|line| line.trim().to_string()))
}

fn is_quit(input: &str) -> bool {
    matches!(input.to_lowercase().as_str(), "quit" | "exit" | "q")
}

async fn interactive(agent: &AnalysisAgent, json: bool) -> anyhow::Result<()> {
    println!("GitHub Analysis Agent");
    println!("{}", "=".repeat(50));
    println!("Available analysis types:");
    for analysis_type in AnalysisType::all() {
        println!("  - {}", analysis_type);
    }
    println!();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        let url_prompt = "Enter GitHub repository URL (or 'quit' to exit): ";
        let url = match prompt(&mut lines, url_prompt).await? {
            Some(url) => url,
            None => break,
        };
        if is_quit(&url) {
            break;
        }
        if url.is_empty() {
            continue;
        }
        if !validate_github_url(&url) {
            println!("Invalid GitHub repository URL. Please try again.\n");
            continue;
        }

        let type_names: Vec<&str> = AnalysisType::all().iter().map(|t| t.as_str()).collect();
        let type_prompt = format!("Analysis type ({}) [summary]: ", type_names.join("/"));
        let type_input = prompt(&mut lines, &type_prompt).await?.unwrap_or_default();
        let analysis_type = if type_input.is_empty() {
            AnalysisType::Summary
        } else {
            type_input.parse().unwrap_or_else(|_| {
                println!("Unknown analysis type '{}'. Using 'summary'.\n", type_input);
                AnalysisType::Summary
            })
        };

        let system_prompt = prompt(&mut lines, "System prompt (optional): ")
            .await?
            .unwrap_or_default();
        let user_prompt = prompt(&mut lines, "User prompt (optional): ")
            .await?
            .unwrap_or_default();

        println!("\nAnalyzing repository...");
        let request = AnalysisRequest::new(url, analysis_type)
            .with_system_prompt(system_prompt)
            .with_user_prompt(user_prompt);
        let mut state = agent.analyze(request).await;
        display_results(&state, json)?;

        if state.current_analysis().is_none() {
            continue;
        }

        loop {
            let question = match prompt(
                &mut lines,
                "Follow-up question (empty for a new repository, 'quit' to exit): ",
            )
            .await?
            {
                Some(question) => question,
                None => return Ok(()),
            };
            if is_quit(&question) {
                return Ok(());
            }
            if question.is_empty() {
                break;
            }

            println!("\nThinking...");
            state = agent.follow_up(state, &question).await;
            display_results(&state, json)?;
        }
    }

    println!("Goodbye!");
    Ok(())
}

fn display_results(state: &SessionState, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(state)?);
        return Ok(());
    }

    println!("\n{}", "=".repeat(60));
    println!("ANALYSIS RESULTS");
    println!("{}", "=".repeat(60));

    if let Some(ref repository) = state.repository {
        println!("Repository: {}", repository.full_name);
        println!("Analysis Type: {}", state.analysis_type);
        let steps: Vec<&str> = state.completed_steps().iter().map(|s| s.as_str()).collect();
        println!("Completed Steps: {}", steps.join(", "));
        println!();
    } else {
        println!("Repository URL: {}\n", state.repository_url);
    }

    if state.has_errors() {
        println!("ERRORS:");
        for error in state.errors() {
            println!("  - {}", error);
        }
        println!();
    }

    if let Some(analysis) = state.current_analysis() {
        if !analysis.summary.is_empty() {
            println!("ANALYSIS SUMMARY:");
            println!("{}", "-".repeat(40));
            println!("{}\n", analysis.summary);
        }

        if !analysis.findings.is_empty() {
            println!("KEY FINDINGS:");
            for (i, finding) in analysis.findings.iter().enumerate() {
                println!("  {}. {}", i + 1, finding);
            }
            println!();
        }

        if !analysis.recommendations.is_empty() {
            println!("RECOMMENDATIONS:");
            for (i, recommendation) in analysis.recommendations.iter().enumerate() {
                println!("  {}. {}", i + 1, recommendation);
            }
            println!();
        }

        if analysis.token_usage.total_tokens > 0 {
            println!(
                "Last turn: {} prompt + {} completion tokens",
                analysis.token_usage.prompt_tokens, analysis.token_usage.completion_tokens
            );
        }
    }

    if state.total_tokens() > 0 {
        println!("Conversation: {} tokens", state.total_tokens());
        if state.is_context_summarized() {
            println!("Context was summarized due to token limit");
        }
        println!();
    }

    println!("{}\n", "=".repeat(60));
    Ok(())
}
