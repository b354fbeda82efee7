//! Python target-source mining via tree-sitter.

use super::{ContextPack, FrameworkTag, detect_framework_hints, truncate_preserving_lines};
use crate::runner::RunnerRequest;
use anyhow::{Context as _, Result};
use std::path::Path;
use std::time::Duration;
use streaming_iterator::StreamingIterator;
use tree_sitter::{Node, Parser, Query, QueryCursor};

/// Mines a `ContextPack` from a single target file. Implemented against
/// tree-sitter rather than a hand-rolled parser so the extraction queries
/// stay declarative and easy to extend.
#[async_trait::async_trait]
pub trait ContextMiner: Send + Sync {
    /// `target_file` is relative to `repo_path`. `repo`/`version` are the
    /// coordinates sent to the `POST /code` fallback (§6) when the file
    /// cannot be read locally.
    async fn mine(
        &self,
        repo_path: &Path,
        target_file: &Path,
        repo: &str,
        version: &str,
        max_chars: usize,
    ) -> ContextPack;
}

/// §3 `POST /code` response: `{code_src}`.
#[derive(serde::Deserialize)]
struct CodeResponse {
    code_src: String,
}

pub struct TreeSitterContextMiner {
    http_client: reqwest::Client,
    runner_code_url: Option<String>,
    timeout_seconds: u64,
}

impl TreeSitterContextMiner {
    pub fn new(runner_code_url: Option<String>, timeout_seconds: u64) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            runner_code_url,
            timeout_seconds,
        }
    }

    /// Falls back to the `POST /code` collaborator endpoint (§6) when the
    /// repository is not locally mounted. Returns `None` on any failure —
    /// the caller degrades to a `parse_failed` pack either way.
    async fn fetch_remote(&self, repo: &str, version: &str, target_file: &Path) -> Option<String> {
        let url = self.runner_code_url.as_ref()?;
        let code_file = target_file.to_string_lossy();

        let call = async {
            let request = RunnerRequest {
                repo,
                version,
                code_file: &code_file,
                test_src: "",
            };
            let response = self.http_client.post(url).json(&request).send().await.ok()?;
            if !response.status().is_success() {
                return None;
            }
            let body: CodeResponse = response.json().await.ok()?;
            Some(body.code_src)
        };

        tokio::time::timeout(Duration::from_secs(self.timeout_seconds), call)
            .await
            .ok()
            .flatten()
    }
}

impl Default for TreeSitterContextMiner {
    fn default() -> Self {
        Self::new(None, 30)
    }
}

struct SymbolQueries {
    function_query: Query,
    class_query: Query,
}

impl SymbolQueries {
    fn new() -> Result<Self> {
        let language = tree_sitter_python::LANGUAGE;

        // Anchored to `module` so only top-level definitions match (§3/§4.2:
        // "declared top-level function/class names"); a method nested inside
        // a class body is a child of that class's `block`, never a direct
        // child of `module`, so it is never captured here.
        let function_query = Query::new(
            &language.into(),
            r#"
            (module
                (function_definition
                    name: (identifier) @name
                    body: (block
                        (expression_statement
                            (string) @docstring)?)))
            "#,
        )
        .context("failed to build function query")?;

        let class_query = Query::new(
            &language.into(),
            r#"
            (module
                (class_definition
                    name: (identifier) @name
                    body: (block
                        (expression_statement
                            (string) @docstring)?)))
            "#,
        )
        .context("failed to build class query")?;

        Ok(Self {
            function_query,
            class_query,
        })
    }

    /// Extracts `(name, first_paragraph_of_docstring)` pairs in source
    /// order, skipping nested definitions' duplicate docstring captures.
    fn extract(&self, source: &str, root: Node, query: &Query) -> Vec<(usize, String, String)> {
        let mut cursor = QueryCursor::new();
        let mut out = Vec::new();
        let mut matches = cursor.matches(query, root, source.as_bytes());

        while let Some(m) = matches.next() {
            let mut name = None;
            let mut docstring = String::new();
            let mut start_byte = 0;

            for capture in m.captures {
                let capture_name = query.capture_names()[capture.index as usize];
                let text = &source[capture.node.byte_range()];

                match capture_name {
                    "name" => {
                        name = Some(text.to_string());
                        start_byte = capture.node.start_byte();
                    }
                    "docstring" => {
                        let stripped = text.trim().trim_matches(|c| c == '"' || c == '\'');
                        docstring = first_paragraph(stripped);
                    }
                    _ => {}
                }
            }

            if let Some(name) = name {
                out.push((start_byte, name, docstring));
            }
        }

        out.sort_by_key(|(byte, _, _)| *byte);
        out
    }
}

fn first_paragraph(docstring: &str) -> String {
    docstring
        .split("\n\n")
        .next()
        .unwrap_or("")
        .lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join(" ")
        .trim()
        .to_string()
}

#[async_trait::async_trait]
impl ContextMiner for TreeSitterContextMiner {
    async fn mine(
        &self,
        repo_path: &Path,
        target_file: &Path,
        repo: &str,
        version: &str,
        max_chars: usize,
    ) -> ContextPack {
        let absolute_target = repo_path.join(target_file);

        let source = match tokio::fs::read_to_string(&absolute_target).await {
            Ok(s) => s,
            Err(_) => match self.fetch_remote(repo, version, target_file).await {
                Some(s) => s,
                None => return ContextPack::parse_failed(String::new(), vec![]),
            },
        };

        let repo_path = repo_path.to_path_buf();
        let source_for_blocking = source.clone();

        let mined = tokio::task::spawn_blocking(move || mine_blocking(&repo_path, &source_for_blocking))
            .await
            .unwrap_or_else(|_| None);

        let truncated = truncate_preserving_lines(&source, max_chars);

        match mined {
            Some((symbols, docstrings, parse_failed)) => {
                let hints = detect_framework_hints(target_file, &source);
                let summary = if symbols.is_empty() {
                    "no top-level symbols detected".to_string()
                } else {
                    format!("{} top-level symbol(s): {}", symbols.len(), symbols.join(", "))
                };

                ContextPack {
                    summary,
                    symbols,
                    docstrings,
                    framework_hints: hints,
                    code_src: truncated,
                    parse_failed,
                }
            }
            None => {
                let hints = detect_framework_hints(target_file, &source);
                ContextPack {
                    code_src: truncated,
                    ..ContextPack::parse_failed(String::new(), hints)
                }
            }
        }
    }
}

/// Runs the actual tree-sitter parse off the async executor. Returns
/// `(symbols, docstrings, parse_failed)`, never an error — per the §3
/// invariant this component always produces a usable pack.
fn mine_blocking(_repo_path: &Path, source: &str) -> Option<(Vec<String>, Vec<String>, bool)> {
    let mut parser = Parser::new();
    parser.set_language(&tree_sitter_python::LANGUAGE.into()).ok()?;
    let tree = parser.parse(source, None)?;
    let root = tree.root_node();
    let parse_failed = root.has_error();

    let queries = SymbolQueries::new().ok()?;
    let mut entries = queries.extract(source, root, &queries.function_query);
    entries.extend(queries.extract(source, root, &queries.class_query));
    entries.sort_by_key(|(byte, _, _)| *byte);

    let symbols = entries.iter().map(|(_, name, _)| name.clone()).collect();
    let docstrings = entries.into_iter().map(|(_, _, doc)| doc).collect();

    Some((symbols, docstrings, parse_failed))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    async fn write_and_mine(code: &str, max_chars: usize) -> ContextPack {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(code.as_bytes()).unwrap();
        let miner = TreeSitterContextMiner::default();
        miner.mine(Path::new("."), file.path(), "repo", "v1", max_chars).await
    }

    #[tokio::test]
    async fn mines_function_symbol_and_docstring() {
        let code = "def add(x, y):\n    \"\"\"Add two numbers\"\"\"\n    return x + y\n";
        let pack = write_and_mine(code, 10_000).await;

        assert!(!pack.parse_failed);
        assert_eq!(pack.symbols, vec!["add".to_string()]);
        assert_eq!(pack.docstrings, vec!["Add two numbers".to_string()]);
    }

    #[tokio::test]
    async fn mines_class_and_function_in_source_order() {
        let code = "class Widget:\n    pass\n\ndef standalone():\n    pass\n";
        let pack = write_and_mine(code, 10_000).await;

        assert_eq!(pack.symbols, vec!["Widget".to_string(), "standalone".to_string()]);
    }

    #[tokio::test]
    async fn syntax_error_sets_parse_failed_but_still_returns_pack() {
        let code = "def broken(:\n    pass\n";
        let pack = write_and_mine(code, 10_000).await;

        assert!(pack.parse_failed);
    }

    #[tokio::test]
    async fn truncates_code_src_to_budget() {
        let code = "def a():\n    pass\n\ndef b():\n    pass\n";
        let pack = write_and_mine(code, 10).await;

        assert!(pack.code_src.len() <= 10 || pack.code_src.lines().count() <= 1);
    }

    #[tokio::test]
    async fn nested_methods_are_not_reported_as_top_level_symbols() {
        let code = "class Widget:\n    def method(self):\n        pass\n";
        let pack = write_and_mine(code, 10_000).await;

        assert_eq!(pack.symbols, vec!["Widget".to_string()]);
    }

    #[tokio::test]
    async fn falls_back_to_the_code_endpoint_when_the_local_file_is_missing() {
        let mock_server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .respond_with(wiremock::ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "code_src": "def remote():\n    pass\n",
            })))
            .mount(&mock_server)
            .await;

        let miner = TreeSitterContextMiner::new(Some(mock_server.uri()), 5);
        let pack = miner
            .mine(Path::new("/nonexistent-repo"), Path::new("pkg/math.py"), "repo", "v1", 10_000)
            .await;

        assert!(!pack.parse_failed);
        assert_eq!(pack.symbols, vec!["remote".to_string()]);
    }

    #[tokio::test]
    async fn missing_file_with_no_code_url_degrades_to_parse_failed() {
        let miner = TreeSitterContextMiner::default();
        let pack = miner
            .mine(Path::new("/nonexistent-repo"), Path::new("pkg/math.py"), "repo", "v1", 10_000)
            .await;

        assert!(pack.parse_failed);
        assert!(pack.symbols.is_empty());
    }
}
