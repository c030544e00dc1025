//! Device namespace introspection
//!
//! MicroPython has no machine-readable reflection over the wire, so the
//! index is scraped from interactively-generated help text: `help('modules')`
//! for the module list, then `import m` + `help(m)` per module, one level of
//! `help(m.attr)` for classes. The file tree comes from a device-side walk
//! whose result literal the REPL echoes back.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::board::Board;
use crate::hooks::{PasswordResolver, ProgressSink};
use crate::index::{FileTree, ModuleIndex, SymbolInfo, SymbolKind};
use crate::literal;
use crate::snippets;
use crate::Result;

/// Modules whose import has side effects (e.g. auto-starting a listener);
/// never imported during an index build.
pub const EXCLUDED_MODULES: &[&str] = &["http_server", "http_server_ssl"];

/// Inactivity window for the device-side filesystem walk.
const SCAN_TIMEOUT: Duration = Duration::from_millis(200);

/// Extract module names from a `help('modules')` reply.
///
/// Header and footer noise lines are dropped; path separators become
/// namespace separators. No candidacy filtering happens here.
pub fn parse_module_list(reply: &[String]) -> Vec<String> {
    let mut modules = Vec::new();
    for line in reply {
        if line.contains("help(") || line.contains("on the filesystem") {
            continue;
        }
        modules.extend(line.split_whitespace().map(|m| m.replace('/', ".")));
    }
    modules
}

/// Whether a module should be imported and inspected: private modules and
/// the side-effecting exclusion list are skipped.
pub fn is_candidate(module: &str) -> bool {
    !module.starts_with('_') && !EXCLUDED_MODULES.contains(&module)
}

/// Parse `key -- value` help-text lines into symbol descriptors.
///
/// An angle-bracketed value is a type signature; anything else is a
/// literal value. Lines without the separator are silently skipped.
pub fn parse_help_lines(reply: &[String]) -> BTreeMap<String, SymbolInfo> {
    let mut symbols = BTreeMap::new();
    for line in reply {
        let Some((key, value)) = line.split_once(" -- ") else {
            continue;
        };
        let key = key.trim();
        let value = value.trim();
        if key.is_empty() {
            continue;
        }
        let kind = if value.contains('<') && value.contains('>') {
            SymbolKind::Type(value.to_string())
        } else {
            SymbolKind::Value(value.to_string())
        };
        symbols.insert(
            key.to_string(),
            SymbolInfo {
                name: key.to_string(),
                kind,
                attrs: None,
            },
        );
    }
    symbols
}

/// Parse nested attribute help text into a flat name/description map.
pub fn parse_attr_lines(reply: &[String]) -> BTreeMap<String, String> {
    let mut attrs = BTreeMap::new();
    for line in reply {
        let Some((key, value)) = line.split_once(" -- ") else {
            continue;
        };
        attrs.insert(key.trim().to_string(), value.trim().to_string());
    }
    attrs
}

/// Module and filesystem introspection for one board.
pub struct DeviceIntrospector<'a> {
    board: &'a Board,
}

impl<'a> DeviceIntrospector<'a> {
    pub fn new(board: &'a Board) -> Self {
        Self { board }
    }

    /// Build the module/symbol index.
    ///
    /// Best-effort: a module whose introspection query fails is logged and
    /// skipped, never aborting the whole build. Progress is the percentage
    /// of listed modules processed.
    pub async fn build_index(
        &self,
        resolver: &dyn PasswordResolver,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<ModuleIndex> {
        let session = self.board.connect().await?;
        sink.progress(0);
        sink.status("Connecting...");
        session.login(resolver).await?;

        let reply = session.query(b"\r\nhelp('modules')", false, None).await?;
        let modules = parse_module_list(&reply);
        tracing::info!("device lists {} modules", modules.len());

        let mut index = ModuleIndex::new();
        for (i, module) in modules.iter().enumerate() {
            sink.progress((100 * i / modules.len()).min(100) as u8);
            if !is_candidate(module) {
                continue;
            }
            sink.status(&format!("Inspecting {}", module));

            let help = match session
                .query(
                    &snippets::paste_block(&snippets::module_help(module)),
                    true,
                    None,
                )
                .await
            {
                Ok(lines) => lines,
                Err(e) => {
                    tracing::warn!("inspection of {} failed: {}", module, e);
                    continue;
                }
            };

            let mut symbols = parse_help_lines(&help);
            for (name, symbol) in symbols.iter_mut() {
                if !symbol.is_class() {
                    continue;
                }
                match session
                    .query(snippets::symbol_help(module, name).as_bytes(), false, None)
                    .await
                {
                    Ok(lines) => symbol.attrs = Some(parse_attr_lines(&lines)),
                    Err(e) => {
                        tracing::warn!("inspection of {}.{} failed: {}", module, name, e);
                    }
                }
            }
            index.insert(module.clone(), symbols);
        }

        sink.progress(100);
        sink.status("Done!");
        Ok(index)
    }

    /// Walk the device filesystem.
    ///
    /// The first reply line that parses as a literal structure becomes the
    /// tree; malformed candidates are discarded. A reply with no parsable
    /// line means no files were found, which is not an error.
    pub async fn scan_files(
        &self,
        resolver: &dyn PasswordResolver,
        sink: Arc<dyn ProgressSink>,
    ) -> Result<FileTree> {
        let session = self.board.connect().await?;
        sink.progress(0);
        sink.status("Connecting...");
        session.login(resolver).await?;

        let reply = session
            .query(
                &snippets::paste_block(&snippets::scan_files()),
                true,
                Some(SCAN_TIMEOUT),
            )
            .await?;
        tracing::debug!("scan complete, {} reply lines", reply.len());

        for line in &reply {
            if let Some(value) = literal::parse(line) {
                let tree = FileTree::from_literal(&value);
                sink.progress(100);
                sink.status("Done!");
                return Ok(tree);
            }
        }
        sink.progress(100);
        sink.status("No files found");
        Ok(FileTree::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::board::Board;
    use crate::hooks::{NoPassword, NullSink};
    use crate::transport::{MockHandle, MockTransport};

    fn lines(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_module_list_filters_noise_and_maps_paths() {
        let reply = lines(&[
            "help(module)",
            "mod1 mod2 _hidden http_server",
            "Plus any modules on the filesystem",
        ]);
        let all = parse_module_list(&reply);
        assert_eq!(all, vec!["mod1", "mod2", "_hidden", "http_server"]);

        let candidates: Vec<_> = all.into_iter().filter(|m| is_candidate(m)).collect();
        assert_eq!(candidates, vec!["mod1", "mod2"]);
    }

    #[test]
    fn test_parse_module_list_path_to_namespace() {
        let reply = lines(&["lib/foo lib/bar"]);
        assert_eq!(parse_module_list(&reply), vec!["lib.foo", "lib.bar"]);
    }

    #[test]
    fn test_parse_help_line_class_symbol() {
        let symbols = parse_help_lines(&lines(&["foo -- <class 'bar'>"]));
        let foo = &symbols["foo"];
        assert_eq!(foo.name, "foo");
        assert_eq!(foo.kind, SymbolKind::Type("<class 'bar'>".into()));
        assert!(foo.is_class());
    }

    #[test]
    fn test_parse_help_line_value_symbol() {
        let symbols = parse_help_lines(&lines(&["RATE -- 9600", "noise without separator"]));
        assert_eq!(symbols.len(), 1);
        assert_eq!(symbols["RATE"].kind, SymbolKind::Value("9600".into()));
        assert!(!symbols["RATE"].is_class());
    }

    fn mock_board() -> (Board, MockHandle) {
        let (transport, handle) = MockTransport::new();
        (Board::new(Box::new(transport)), handle)
    }

    /// Answer each host query with the next scripted reply.
    fn spawn_responder(mut handle: MockHandle, replies: Vec<&'static [u8]>) {
        tokio::spawn(async move {
            let mut replies = replies.into_iter();
            loop {
                if handle.next_write().is_some() {
                    match replies.next() {
                        Some(reply) => handle.push(reply).await,
                        None => break,
                    }
                } else {
                    tokio::time::sleep(Duration::from_millis(10)).await;
                }
            }
        });
    }

    #[tokio::test(start_paused = true)]
    async fn test_build_index_one_module() {
        let (board, handle) = mock_board();
        spawn_responder(
            handle,
            vec![b"mod1\r\n" as &[u8], b"freq -- <function>\r\n"],
        );

        let index = DeviceIntrospector::new(&board)
            .build_index(&NoPassword, Arc::new(NullSink))
            .await
            .unwrap();

        assert_eq!(index.len(), 1);
        let symbols = &index["mod1"];
        assert_eq!(symbols["freq"].kind, SymbolKind::Type("<function>".into()));
        assert!(symbols["freq"].attrs.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_build_index_class_triggers_nested_query() {
        let (board, handle) = mock_board();
        spawn_responder(
            handle,
            vec![
                b"mod1\r\n" as &[u8],
                b"foo -- <class 'bar'>\r\n",
                b"read -- <function>\r\nMSB -- 1\r\n",
            ],
        );

        let index = DeviceIntrospector::new(&board)
            .build_index(&NoPassword, Arc::new(NullSink))
            .await
            .unwrap();

        let foo = &index["mod1"]["foo"];
        assert!(foo.is_class());
        let attrs = foo.attrs.as_ref().unwrap();
        assert_eq!(attrs["read"], "<function>");
        assert_eq!(attrs["MSB"], "1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_build_index_skips_private_and_excluded() {
        let (board, handle) = mock_board();
        // Only mod1 is a candidate, so only one inspection query follows
        spawn_responder(
            handle,
            vec![
                b"_hidden http_server mod1\r\n" as &[u8],
                b"freq -- <function>\r\n",
            ],
        );

        let index = DeviceIntrospector::new(&board)
            .build_index(&NoPassword, Arc::new(NullSink))
            .await
            .unwrap();

        assert_eq!(index.keys().collect::<Vec<_>>(), vec!["mod1"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_files_adopts_first_parsable_line() {
        let (board, handle) = mock_board();
        spawn_responder(
            handle,
            vec![
                b"__scanfiles__('.')\r\n{'boot.py': {'info': (32768, 0), 'files': {}, 'name': 'boot.py'}}\r\n>>> \r\n"
                    as &[u8],
            ],
        );

        let tree = DeviceIntrospector::new(&board)
            .scan_files(&NoPassword, Arc::new(NullSink))
            .await
            .unwrap();

        assert_eq!(tree.entries.len(), 1);
        assert!(tree.entries.contains_key("boot.py"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_files_unparseable_reply_yields_empty_tree() {
        let (board, handle) = mock_board();
        spawn_responder(
            handle,
            vec![b"__scanfiles__('.')\r\nTraceback (most recent call last):\r\n>>> \r\n" as &[u8]],
        );

        let tree = DeviceIntrospector::new(&board)
            .scan_files(&NoPassword, Arc::new(NullSink))
            .await
            .unwrap();

        assert!(tree.is_empty());
    }
}
