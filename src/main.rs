use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use git_rescue::config::load_config;
use git_rescue::document::Document;
use git_rescue::entity::{CodeEntity, EntityKind};
use git_rescue::extractor::{try_extract_entities, Grammar};
use git_rescue::lens::LensProvider;
use git_rescue::matcher::NameKindMatcher;
use git_rescue::recovery::{Recovery, RecoveryResult};
use git_rescue::revision::{GitCli, RevisionReader};
use git_rescue::server::run_stdio_server;
use git_rescue::terminal::{SpinnerReader, TerminalHost};
use serde_json::json;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "git-rescue")]
#[command(version)]
#[command(about = "Restore a single function, class or method from an earlier git commit")]
struct Cli {
    /// Repository root (defaults to the work tree containing the current directory)
    #[arg(long, global = true, value_name = "DIR")]
    repo: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List the named functions, classes and methods of a file as JSON
    Entities { file: PathBuf },

    /// Print the recover lenses a file would show in an editor
    Lenses { file: PathBuf },

    /// Recent commits touching a file
    History {
        file: PathBuf,
        /// Max commits (default from .git-rescue.json, 20)
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Replace an entity with its version from an earlier commit
    Recover {
        file: PathBuf,
        name: String,
        /// function, class or method; required when the name is ambiguous
        #[arg(long)]
        kind: Option<EntityKind>,
        /// Commit hash (or prefix) to recover from; prompts when omitted
        #[arg(long)]
        commit: Option<String>,
        /// Apply without asking for confirmation
        #[arg(long, short = 'y')]
        yes: bool,
        /// Column width of the side-by-side diff
        #[arg(long, default_value_t = 60)]
        width: usize,
    },

    /// Start the JSON-RPC stdio server
    Serve,
}

fn main() -> Result<()> {
    // stdout carries command output and JSON-RPC replies; logs go to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if matches!(cli.cmd, Command::Serve) {
        return run_stdio_server();
    }

    let cwd = std::env::current_dir().context("Failed to get current dir")?;
    let repo_root = match cli.repo.as_ref() {
        Some(dir) => dir.clone(),
        None => GitCli::discover(&cwd).map(|g| g.root().to_path_buf()).unwrap_or(cwd),
    };
    let cfg = load_config(&repo_root);

    match cli.cmd {
        Command::Entities { file } => {
            let doc = Document::open(&resolve_path(&repo_root, &file))?;
            let grammar = grammar_for(&doc, cfg.grammar)?;
            let entities = try_extract_entities(doc.text(), grammar)
                .with_context(|| format!("Failed to parse {}", doc.id()))?;
            println!("{}", serde_json::to_string_pretty(&entities)?);
        }
        Command::Lenses { file } => {
            let doc = Document::open(&resolve_path(&repo_root, &file))?;
            grammar_for(&doc, cfg.grammar)?;
            let mut provider = LensProvider::new(cfg.grammar);
            for lens in provider.provide(&doc) {
                println!(
                    "{}:{}  {}",
                    lens.position.line + 1,
                    lens.position.character + 1,
                    lens.title
                );
            }
        }
        Command::History { file, limit } => {
            let abs = resolve_path(&repo_root, &file);
            let git = GitCli::discover_with(&abs, &cfg.git_binary)?;
            let commits = git.list_commits(&abs, limit.unwrap_or(cfg.commit_limit))?;
            if commits.is_empty() {
                eprintln!("No commits found for this file.");
            }
            for c in commits {
                println!("{} {} {} ({})", c.short_hash, c.date, c.message, c.author);
            }
        }
        Command::Recover {
            file,
            name,
            kind,
            commit,
            yes,
            width,
        } => {
            let abs = resolve_path(&repo_root, &file);
            let mut doc = Document::open(&abs)?;
            let grammar = grammar_for(&doc, cfg.grammar)?;
            let target = pick_target(&doc, grammar, &name, kind)?;

            let git = GitCli::discover_with(&abs, &cfg.git_binary)?;
            let reader = SpinnerReader::new(&git);
            let stdin = std::io::stdin();
            let mut host = TerminalHost::new(stdin.lock(), std::io::stdout())
                .with_commit(commit)
                .assume_yes(yes)
                .with_width(width);

            let outcome = Recovery::new(&reader, &NameKindMatcher)
                .with_grammar(Some(grammar))
                .with_commit_limit(cfg.commit_limit)
                .run(&mut doc, &target, &mut host);

            match &outcome.result {
                RecoveryResult::Applied { commit, range, .. } => {
                    doc.save()?;
                    println!(
                        "{}",
                        json!({ "file": doc.id(), "recovered": target.label(), "commit": commit, "range": range })
                    );
                }
                RecoveryResult::NoOp(reason) => {
                    eprintln!("Nothing changed: {}", serde_json::to_string(reason)?);
                }
            }
        }
        Command::Serve => {}
    }

    Ok(())
}

fn resolve_path(repo_root: &Path, p: &Path) -> PathBuf {
    if p.is_absolute() || p.exists() {
        p.to_path_buf()
    } else {
        repo_root.join(p)
    }
}

fn grammar_for(doc: &Document, pinned: Option<Grammar>) -> Result<Grammar> {
    match pinned.or_else(|| doc.grammar()) {
        Some(g) => Ok(g),
        None => bail!("Unsupported file type: {}", doc.id()),
    }
}

/// Find the entity to recover by name (and kind, when given). Lists what the
/// file does contain when nothing matches.
fn pick_target(doc: &Document, grammar: Grammar, name: &str, kind: Option<EntityKind>) -> Result<CodeEntity> {
    let entities = try_extract_entities(doc.text(), grammar)
        .with_context(|| format!("Failed to parse {}", doc.id()))?;

    let matches: Vec<&CodeEntity> = entities
        .iter()
        .filter(|e| e.name == name && kind.map_or(true, |k| e.kind == k))
        .collect();

    match matches.as_slice() {
        [one] => Ok((*one).clone()),
        [] => {
            let available: Vec<String> = entities.iter().map(CodeEntity::label).collect();
            bail!(
                "{} \"{}\" not found in {}. Available: {}",
                kind.map_or("entity".to_string(), |k| k.to_string()),
                name,
                doc.id(),
                if available.is_empty() {
                    "(none)".to_string()
                } else {
                    available.join(", ")
                }
            )
        }
        many => {
            let kinds: Vec<&str> = many.iter().map(|e| e.kind.as_str()).collect();
            // Same name and kind more than once: the first one wins, as in matching.
            if kind.is_some() || kinds.iter().all(|k| *k == kinds[0]) {
                return Ok(many[0].clone());
            }
            bail!(
                "\"{name}\" is ambiguous ({}); pass --kind",
                kinds.join(", ")
            )
        }
    }
}
