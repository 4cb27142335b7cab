use anyhow::{anyhow, Context, Result};
use serde_json::json;
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::config::{load_config, Config};
use crate::diff::DiffView;
use crate::document::{Document, DocumentId};
use crate::entity::{ByteRange, CodeEntity, EntityKind};
use crate::extractor::try_extract_entities;
use crate::lens::{DocumentEvent, LensProvider, RECOVER_COMMAND};
use crate::matcher::NameKindMatcher;
use crate::recovery::{NoticeLevel, Recovery, RecoveryHost};
use crate::revision::{find_commit, Commit, GitCli, RevisionReader};

#[derive(Default)]
pub struct ServerState {
    repo_root: Option<PathBuf>,
    lenses: LensProvider,
}

/// Non-interactive host: the editor already chose the commit and, for
/// `recover_entity`, already confirmed.
struct RpcHost {
    commit: String,
    apply: bool,
    diff: Option<DiffView>,
    notices: Vec<(NoticeLevel, String)>,
}

impl RecoveryHost for RpcHost {
    fn pick_commit(&mut self, _entity: &CodeEntity, commits: &[Commit]) -> Option<usize> {
        match find_commit(commits, &self.commit) {
            Ok(i) => Some(i),
            Err(e) => {
                self.notices.push((NoticeLevel::Error, e.to_string()));
                None
            }
        }
    }

    fn show_diff(&mut self, view: &DiffView) {
        self.diff = Some(view.clone());
    }

    fn confirm(&mut self, _prompt: &str) -> Option<bool> {
        self.apply.then_some(true)
    }

    fn notify(&mut self, level: NoticeLevel, message: &str) {
        self.notices.push((level, message.to_string()));
    }
}

impl ServerState {
    fn repo_root_from_params(&mut self, params: &serde_json::Value) -> PathBuf {
        let repo_root = params
            .get("repoPath")
            .and_then(|v| v.as_str())
            .map(PathBuf::from)
            .or_else(|| self.repo_root.clone())
            .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));

        self.repo_root = Some(repo_root.clone());
        repo_root
    }

    fn tool_list(&self, id: serde_json::Value) -> serde_json::Value {
        let entity_props = json!({
            "repoPath": { "type": "string", "description": "Absolute path to the repository root" },
            "path": { "type": "string", "description": "Source file (relative to repoPath or absolute)" },
            "name": { "type": "string", "description": "Entity name" },
            "kind": { "type": "string", "enum": ["function", "class", "method"] },
            "commit": { "type": "string", "description": "Commit hash (or unique prefix) to recover from" },
            "range": { "type": "array", "items": { "type": "integer" }, "description": "Optional: [start, end) byte range the editor computed for the entity" },
            "limit": { "type": "integer", "description": "Optional: how far back to look for the commit (default from config, 20)" }
        });

        json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {
                "tools": [
                    {
                        "name": "list_entities",
                        "description": "Extract the named functions, classes and methods of a JavaScript/TypeScript file with their byte ranges.",
                        "inputSchema": {
                            "type": "object",
                            "properties": {
                                "repoPath": { "type": "string" },
                                "path": { "type": "string" }
                            },
                            "required": ["path"]
                        }
                    },
                    {
                        "name": "code_lenses",
                        "description": "Recover lenses for a document: one per entity, anchored at the entity's start position.",
                        "inputSchema": {
                            "type": "object",
                            "properties": {
                                "repoPath": { "type": "string" },
                                "path": { "type": "string" }
                            },
                            "required": ["path"]
                        }
                    },
                    {
                        "name": "notify_document",
                        "description": "Tell the server a document was opened, saved, focused or closed so its lenses are rebuilt.",
                        "inputSchema": {
                            "type": "object",
                            "properties": {
                                "repoPath": { "type": "string" },
                                "path": { "type": "string" },
                                "event": { "type": "string", "enum": ["open", "save", "active", "close"] }
                            },
                            "required": ["path", "event"]
                        }
                    },
                    {
                        "name": "list_commits",
                        "description": "Most recent commits touching a file.",
                        "inputSchema": {
                            "type": "object",
                            "properties": {
                                "repoPath": { "type": "string" },
                                "path": { "type": "string" },
                                "limit": { "type": "integer", "description": "Optional: max commits (default from config, 20)" }
                            },
                            "required": ["path"]
                        }
                    },
                    {
                        "name": "preview_recovery",
                        "description": "Diff an entity's version at a commit against the current one. Does not modify anything.",
                        "inputSchema": {
                            "type": "object",
                            "properties": entity_props.clone(),
                            "required": ["path", "name", "kind", "commit"]
                        }
                    },
                    {
                        "name": "recover_entity",
                        "description": format!("Replace an entity with its version at a commit and save the file. Backs the `{RECOVER_COMMAND}` command; call after the user confirmed the preview."),
                        "inputSchema": {
                            "type": "object",
                            "properties": entity_props,
                            "required": ["path", "name", "kind", "commit"]
                        }
                    }
                ]
            }
        })
    }

    fn tool_call(&mut self, id: serde_json::Value, params: &serde_json::Value) -> serde_json::Value {
        let name = params.get("name").and_then(|n| n.as_str()).unwrap_or("");
        let args = params.get("arguments").cloned().unwrap_or(json!({}));

        let reply = |text: String, is_error: bool| {
            json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": { "content": [{"type":"text","text": text }], "isError": is_error }
            })
        };
        let ok = |v: serde_json::Value| reply(serde_json::to_string_pretty(&v).unwrap_or_default(), false);
        let err = |msg: String| reply(msg, true);

        let repo_root = self.repo_root_from_params(&args);
        let cfg = load_config(&repo_root);
        let Some(p) = args.get("path").and_then(|v| v.as_str()) else {
            return err("Missing path".to_string());
        };
        let abs = resolve_path(&repo_root, p);

        match name {
            "list_entities" => {
                let doc = match Document::open(&abs) {
                    Ok(d) => d,
                    Err(e) => return err(format!("list_entities failed: {e:#}")),
                };
                let Some(grammar) = cfg.grammar.or_else(|| doc.grammar()) else {
                    return err(format!("Unsupported file type: {}", abs.display()));
                };
                match try_extract_entities(doc.text(), grammar) {
                    Ok(entities) => ok(json!({ "file": doc.id(), "grammar": grammar, "entities": entities })),
                    // Unparseable documents simply have nothing to recover.
                    Err(e) => ok(json!({
                        "file": doc.id(),
                        "grammar": grammar,
                        "entities": [],
                        "extractionError": e.to_string()
                    })),
                }
            }
            "code_lenses" => {
                let doc = match Document::open(&abs) {
                    Ok(d) => d,
                    Err(e) => return err(format!("code_lenses failed: {e:#}")),
                };
                let lenses = self.lenses.provide(&doc);
                ok(json!({ "file": doc.id(), "lenses": lenses }))
            }
            "notify_document" => {
                let event = args
                    .get("event")
                    .cloned()
                    .map(serde_json::from_value::<DocumentEvent>);
                let event = match event {
                    Some(Ok(ev)) => ev,
                    Some(Err(e)) => return err(format!("Invalid event: {e}")),
                    None => return err("Missing event".to_string()),
                };
                self.lenses.notify(&DocumentId::from_path(&abs), event);
                ok(json!({ "file": DocumentId::from_path(&abs), "invalidated": true }))
            }
            "list_commits" => {
                let limit = args
                    .get("limit")
                    .and_then(|v| v.as_i64())
                    .map(|n| n.max(0) as usize)
                    .unwrap_or(cfg.commit_limit);
                // Outside a work tree there is simply no history to offer.
                if !GitCli::is_repository(&abs, &cfg.git_binary) {
                    return ok(json!({ "file": DocumentId::from_path(&abs), "repository": false, "commits": [] }));
                }
                let result = GitCli::discover_with(&abs, &cfg.git_binary)
                    .and_then(|git| git.list_commits(&abs, limit));
                match result {
                    Ok(commits) => ok(json!({ "file": DocumentId::from_path(&abs), "repository": true, "commits": commits })),
                    Err(e) => err(format!("list_commits failed: {e}")),
                }
            }
            "preview_recovery" | "recover_entity" => {
                let apply = name == "recover_entity";
                match run_recovery(&abs, &args, &cfg, apply) {
                    Ok((value, is_error)) => {
                        if apply {
                            self.lenses.notify(&DocumentId::from_path(&abs), DocumentEvent::Saved);
                        }
                        reply(serde_json::to_string_pretty(&value).unwrap_or_default(), is_error)
                    }
                    Err(e) => err(format!("{name} failed: {e:#}")),
                }
            }
            _ => err(format!("Tool not found: {name}")),
        }
    }
}

/// Drive the recovery flow for one RPC call. Returns the JSON payload and
/// whether it should be flagged as an error to the client.
fn run_recovery(abs: &Path, args: &serde_json::Value, cfg: &Config, apply: bool) -> Result<(serde_json::Value, bool)> {
    let name = args
        .get("name")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| anyhow!("Missing name"))?;
    let kind: EntityKind = args
        .get("kind")
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("Missing kind"))?
        .parse()
        .map_err(|e: String| anyhow!(e))?;
    let commit = args
        .get("commit")
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| anyhow!("Missing commit"))?;
    // Without a range the entity is located by name and kind alone.
    let range: ByteRange = match args.get("range") {
        Some(v) => serde_json::from_value(v.clone()).context("range must be [start, end]")?,
        None => ByteRange::new(0, 0),
    };
    let target = CodeEntity::new(name, kind, range);
    let limit = args
        .get("limit")
        .and_then(|v| v.as_u64())
        .map(|n| n as usize)
        .unwrap_or(cfg.commit_limit);

    let mut doc = Document::open(abs)?;
    let git = GitCli::discover_with(abs, &cfg.git_binary)?;
    let mut host = RpcHost {
        commit: commit.to_string(),
        apply,
        diff: None,
        notices: Vec::new(),
    };

    let outcome = Recovery::new(&git, &NameKindMatcher)
        .with_grammar(cfg.grammar)
        .with_commit_limit(limit)
        .run(&mut doc, &target, &mut host);

    if outcome.is_applied() {
        doc.save()?;
    }
    debug!(file = %doc.id(), result = ?outcome.result, "rpc recovery finished");

    let notices: Vec<serde_json::Value> = host
        .notices
        .iter()
        .map(|(level, message)| json!({ "level": level, "message": message }))
        .collect();
    let diff = host.diff.as_ref().map(|v| {
        json!({
            "title": v.title,
            "leftLabel": v.left_label,
            "rightLabel": v.right_label,
            "historical": v.left,
            "current": v.right,
            "unified": v.unified(cfg.diff_context_lines),
        })
    });

    // A preview stops at the confirmation step; it succeeded if a diff was produced.
    let is_error = if apply { !outcome.is_applied() } else { diff.is_none() };
    Ok((
        json!({
            "file": doc.id(),
            "outcome": outcome,
            "diff": diff,
            "notices": notices,
        }),
        is_error,
    ))
}

/// Resolve a path parameter: if absolute, use as-is; otherwise join to repo_root.
fn resolve_path(repo_root: &Path, p: &str) -> PathBuf {
    let pb = PathBuf::from(p);
    if pb.is_absolute() {
        pb
    } else {
        repo_root.join(p)
    }
}

/// Serve line-delimited JSON-RPC from `input` until EOF.
pub fn serve<R: BufRead, W: Write>(input: R, mut output: W) -> Result<()> {
    let mut state = ServerState::default();

    for line in input.lines() {
        let Ok(line) = line else { continue };
        if line.trim().is_empty() {
            continue;
        }

        let msg: serde_json::Value = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "dropping malformed message");
                continue;
            }
        };

        // JSON-RPC notifications have no "id" field; don't respond.
        let Some(id) = msg.get("id").cloned() else {
            continue;
        };
        let method = msg.get("method").and_then(|m| m.as_str()).unwrap_or("");
        debug!(%method, "request");

        let reply = match method {
            "initialize" => json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {
                    "protocolVersion": msg.get("params").and_then(|p| p.get("protocolVersion")).cloned().unwrap_or(json!("2024-11-05")),
                    "capabilities": { "tools": { "listChanged": false } },
                    "serverInfo": { "name": "git-rescue", "version": env!("CARGO_PKG_VERSION") }
                }
            }),
            "ping" => json!({
                "jsonrpc": "2.0",
                "id": id,
                "result": {}
            }),
            "tools/list" => state.tool_list(id),
            "tools/call" => {
                let params = msg.get("params").cloned().unwrap_or(json!({}));
                state.tool_call(id, &params)
            }
            _ => json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": { "code": -32601, "message": format!("Method not found: {method}") }
            }),
        };

        writeln!(output, "{}", reply)?;
        output.flush()?;
    }

    Ok(())
}

pub fn run_stdio_server() -> Result<()> {
    let stdin = std::io::stdin();
    serve(stdin.lock(), std::io::stdout())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn call(state: &mut ServerState, name: &str, args: serde_json::Value) -> (bool, serde_json::Value) {
        let reply = state.tool_call(json!(1), &json!({ "name": name, "arguments": args }));
        let result = &reply["result"];
        let is_error = result["isError"].as_bool().unwrap();
        let text = result["content"][0]["text"].as_str().unwrap();
        let value = serde_json::from_str(text).unwrap_or_else(|_| json!(text));
        (is_error, value)
    }

    #[test]
    fn notifications_get_no_reply_and_unknown_methods_error() {
        let input = concat!(
            "{\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\"}\n",
            "not json\n",
            "\n",
            "{\"jsonrpc\":\"2.0\",\"id\":7,\"method\":\"nope\"}\n",
            "{\"jsonrpc\":\"2.0\",\"id\":8,\"method\":\"ping\"}\n",
        );
        let mut out = Vec::new();
        serve(Cursor::new(input), &mut out).unwrap();

        let lines: Vec<serde_json::Value> = String::from_utf8(out)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["id"], 7);
        assert_eq!(lines[0]["error"]["code"], -32601);
        assert_eq!(lines[1]["id"], 8);
    }

    #[test]
    fn list_entities_and_lenses() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("a.ts"), "class A { run(){} }").unwrap();
        let mut state = ServerState::default();
        let root = tmp.path().to_string_lossy().to_string();

        let (is_error, v) = call(&mut state, "list_entities", json!({ "repoPath": root, "path": "a.ts" }));
        assert!(!is_error);
        assert_eq!(
            v["entities"],
            json!([
                { "name": "A", "kind": "class", "range": [0, 19] },
                { "name": "run", "kind": "method", "range": [10, 17] }
            ])
        );

        let (_, v) = call(&mut state, "code_lenses", json!({ "path": "a.ts" }));
        assert_eq!(v["lenses"][1]["title"], "Recover method \"run\" from commit…");
        assert_eq!(v["lenses"][1]["position"], json!({ "line": 0, "character": 10 }));
        assert_eq!(v["lenses"][1]["command"], RECOVER_COMMAND);

        let (is_error, _) = call(&mut state, "notify_document", json!({ "path": "a.ts", "event": "save" }));
        assert!(!is_error);
        let (is_error, _) = call(&mut state, "notify_document", json!({ "path": "a.ts", "event": "explode" }));
        assert!(is_error);
    }

    #[test]
    fn broken_source_reports_extraction_error() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("b.ts"), "function (").unwrap();
        let mut state = ServerState::default();
        let (is_error, v) = call(
            &mut state,
            "list_entities",
            json!({ "repoPath": tmp.path().to_string_lossy(), "path": "b.ts" }),
        );
        assert!(!is_error);
        assert_eq!(v["entities"], json!([]));
        assert!(v["extractionError"].as_str().unwrap().starts_with("syntax error"));
    }

    #[test]
    fn rpc_host_refuses_ambiguous_prefixes() {
        let commit = |hash: &str| Commit {
            hash: hash.to_string(),
            short_hash: hash[..7].to_string(),
            author: "dev".into(),
            date: "2024-01-01T00:00:00+00:00".into(),
            message: "m".into(),
        };
        let commits = [commit("aa11aa11aa"), commit("ab22ab22ab")];
        let entity = CodeEntity::new("f", EntityKind::Function, ByteRange::new(0, 0));
        let mut host = RpcHost {
            commit: "a".into(),
            apply: true,
            diff: None,
            notices: Vec::new(),
        };

        assert_eq!(host.pick_commit(&entity, &commits), None);
        assert_eq!(host.notices[0].0, NoticeLevel::Error);
        assert!(host.notices[0].1.contains("ambiguous"), "{:?}", host.notices);

        host.commit = "ab2".into();
        assert_eq!(host.pick_commit(&entity, &commits), Some(1));
    }

    #[test]
    fn list_commits_outside_a_repository_is_empty() {
        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("d.ts"), "function d() {}").unwrap();
        let mut state = ServerState::default();
        let (is_error, v) = call(
            &mut state,
            "list_commits",
            json!({ "repoPath": tmp.path().to_string_lossy(), "path": "d.ts" }),
        );
        assert!(!is_error);
        assert_eq!(v["repository"], false);
        assert_eq!(v["commits"], json!([]));
    }

    #[test]
    fn missing_arguments_are_errors() {
        let mut state = ServerState::default();
        let (is_error, v) = call(&mut state, "list_entities", json!({}));
        assert!(is_error);
        assert_eq!(v, json!("Missing path"));

        let tmp = TempDir::new().unwrap();
        std::fs::write(tmp.path().join("c.ts"), "function c() {}").unwrap();
        let (is_error, v) = call(
            &mut state,
            "preview_recovery",
            json!({ "repoPath": tmp.path().to_string_lossy(), "path": "c.ts", "name": "c", "kind": "lambda", "commit": "abc" }),
        );
        assert!(is_error);
        assert!(v.as_str().unwrap().contains("unknown entity kind"));
    }
}
