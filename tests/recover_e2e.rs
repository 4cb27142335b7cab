use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{Command, Stdio};

fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

fn git(dir: &Path, args: &[&str]) -> String {
    let out = Command::new("git")
        .args([
            "-c",
            "user.name=Test",
            "-c",
            "user.email=test@example.com",
            "-c",
            "commit.gpgsign=false",
            "-c",
            "init.defaultBranch=main",
        ])
        .args(args)
        .current_dir(dir)
        .output()
        .expect("run git");
    assert!(out.status.success(), "git {args:?}: {}", String::from_utf8_lossy(&out.stderr));
    String::from_utf8_lossy(&out.stdout).trim().to_string()
}

const V1: &str = "function keep() { return 0; }\n\nfunction sum(a, b) {\n  return a + b;\n}\n";
const V2: &str = "function keep() { return 1; }\n\nfunction sum(a, b) {\n  return a - b;\n}\n";

/// Repo with two commits of `math.js`; the working copy also has an
/// uncommitted edit to `keep`. Returns the first commit's hash.
fn fixture(dir: &Path) -> String {
    git(dir, &["init", "-q"]);
    std::fs::write(dir.join("math.js"), V1).unwrap();
    git(dir, &["add", "math.js"]);
    git(dir, &["commit", "-q", "-m", "add sum"]);
    let first = git(dir, &["rev-parse", "HEAD"]);
    std::fs::write(dir.join("math.js"), V2).unwrap();
    git(dir, &["commit", "-q", "-am", "break sum"]);
    std::fs::write(dir.join("math.js"), V2.replace("return 1", "return 2")).unwrap();
    first
}

#[test]
fn cli_recovers_one_function_and_leaves_the_rest() {
    if !git_available() {
        eprintln!("git not found; skipping");
        return;
    }
    let tmp = tempfile::TempDir::new().unwrap();
    let first = fixture(tmp.path());

    let out = Command::new(env!("CARGO_BIN_EXE_git-rescue"))
        .args(["--repo"])
        .arg(tmp.path())
        .args(["recover", "math.js", "sum", "--kind", "function", "--commit", &first[..8], "--yes"])
        .stdin(Stdio::null())
        .output()
        .expect("run git-rescue");
    assert!(out.status.success(), "{}", String::from_utf8_lossy(&out.stderr));

    let stdout = String::from_utf8_lossy(&out.stdout);
    assert!(stdout.contains("Diff: function \"sum\""), "{stdout}");
    assert!(stdout.contains("\"recovered\":\"function \\\"sum\\\"\""), "{stdout}");

    let text = std::fs::read_to_string(tmp.path().join("math.js")).unwrap();
    assert_eq!(
        text,
        "function keep() { return 2; }\n\nfunction sum(a, b) {\n  return a + b;\n}\n"
    );
}

#[test]
fn cli_history_lists_newest_first() {
    if !git_available() {
        eprintln!("git not found; skipping");
        return;
    }
    let tmp = tempfile::TempDir::new().unwrap();
    fixture(tmp.path());

    let out = Command::new(env!("CARGO_BIN_EXE_git-rescue"))
        .arg("--repo")
        .arg(tmp.path())
        .args(["history", "math.js"])
        .output()
        .expect("run git-rescue");
    assert!(out.status.success());
    let stdout = String::from_utf8_lossy(&out.stdout);
    let messages: Vec<&str> = stdout
        .lines()
        .map(|l| if l.contains("break sum") { "break" } else { "add" })
        .collect();
    assert_eq!(messages, ["break", "add"]);
}

#[test]
fn declining_the_prompt_changes_nothing() {
    if !git_available() {
        eprintln!("git not found; skipping");
        return;
    }
    let tmp = tempfile::TempDir::new().unwrap();
    fixture(tmp.path());
    let before = std::fs::read_to_string(tmp.path().join("math.js")).unwrap();

    let mut child = Command::new(env!("CARGO_BIN_EXE_git-rescue"))
        .arg("--repo")
        .arg(tmp.path())
        .args(["recover", "math.js", "sum"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn git-rescue");
    {
        // Pick the older commit, then answer "n".
        let stdin = child.stdin.as_mut().expect("child stdin");
        writeln!(stdin, "2").unwrap();
        writeln!(stdin, "n").unwrap();
    }
    drop(child.stdin.take());

    let stdout = child.stdout.take().expect("child stdout");
    let shown: Vec<String> = BufReader::new(stdout).lines().map_while(Result::ok).collect();
    assert!(child.wait().expect("wait").success());

    let shown = shown.join("\n");
    assert!(shown.contains("Select a commit for function \"sum\""), "{shown}");
    assert!(shown.contains("Replace current function \"sum\" with selected commit version?"), "{shown}");
    assert_eq!(std::fs::read_to_string(tmp.path().join("math.js")).unwrap(), before);
}

#[test]
fn rpc_preview_and_recover() {
    if !git_available() {
        eprintln!("git not found; skipping");
        return;
    }
    let tmp = tempfile::TempDir::new().unwrap();
    let first = fixture(tmp.path());

    let mut child = Command::new(env!("CARGO_BIN_EXE_git-rescue"))
        .arg("serve")
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn git-rescue serve");
    {
        let stdin = child.stdin.as_mut().expect("child stdin");
        let args = serde_json::json!({
            "repoPath": tmp.path(),
            "path": "math.js",
            "name": "sum",
            "kind": "function",
            "commit": first,
        });
        for (id, tool) in [(1, "preview_recovery"), (2, "recover_entity")] {
            let msg = serde_json::json!({
                "jsonrpc": "2.0",
                "id": id,
                "method": "tools/call",
                "params": { "name": tool, "arguments": args }
            });
            writeln!(stdin, "{}", msg).unwrap();
        }
    }
    drop(child.stdin.take());

    let stdout = child.stdout.take().expect("child stdout");
    let replies: Vec<serde_json::Value> = BufReader::new(stdout)
        .lines()
        .map_while(Result::ok)
        .filter(|l| !l.trim().is_empty())
        .map(|l| serde_json::from_str(&l).expect("json"))
        .collect();
    assert!(child.wait().expect("wait").success());
    assert_eq!(replies.len(), 2);

    let payload = |v: &serde_json::Value| -> serde_json::Value {
        assert_eq!(v["result"]["isError"], false, "{v}");
        serde_json::from_str(v["result"]["content"][0]["text"].as_str().unwrap()).unwrap()
    };

    let preview = payload(&replies[0]);
    assert_eq!(preview["outcome"]["result"]["status"], "no_op");
    assert!(preview["diff"]["unified"].as_str().unwrap().contains("+  return a - b;"));

    let applied = payload(&replies[1]);
    assert_eq!(applied["outcome"]["result"]["status"], "applied");
    let text = std::fs::read_to_string(tmp.path().join("math.js")).unwrap();
    assert!(text.contains("return a + b;"));
    assert!(text.contains("return 2;"));
}
