//! Rule files and the tool registry built from them.
//!
//! [`RuleFileProcessor::process`] takes the [`FileItem`]s found by a scan
//! and turns every valid rule file into a [`RuleFileTool`]. A file that
//! fails any check is skipped and recorded in the [`ProcessReport`]; one bad
//! file never aborts the pass.
//!
//! Checks run in this order for each item:
//!
//! 1. path security, size cap, read access, containment in the owning
//!    storage directory
//! 2. symlink security against that directory, with the resolved target
//!    contained as well
//! 3. bounded read, UTF-8 decode
//! 4. content security over the whole file
//! 5. frontmatter parse and field validation
//!
//! Tool names are derived from `name` (or the filename stem) and made
//! unique against the registry being built, so the result depends on
//! input order.

use std::collections::HashMap;
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::error::{Error, ErrorKind, Result};
use crate::frontmatter::{parse_frontmatter, Frontmatter};
use crate::logging::Logger;
use crate::models::FileItem;
use crate::path_guard;
use crate::symlink;

pub const DEFAULT_MAX_FILE_SIZE: u64 = 5 * 1024 * 1024;
pub const MAX_DESCRIPTION_LEN: usize = 500;
pub const MAX_NAME_LEN: usize = 100;
pub const MAX_APPLY_TO_LEN: usize = 200;
pub const MAX_TOOL_NAME_LEN: usize = 100;
pub const FALLBACK_TOOL_NAME: &str = "rule_file";

/// A Markdown file with valid frontmatter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleFile {
    pub file_name: String,
    pub file_path: PathBuf,
    pub description: String,
    pub name: Option<String>,
    pub apply_to: Option<String>,
    pub body: String,
}

impl RuleFile {
    pub fn frontmatter(&self) -> Frontmatter {
        Frontmatter {
            description: Some(self.description.clone()),
            name: self.name.clone(),
            apply_to: self.apply_to.clone(),
        }
    }

    /// The frontmatter block as it would be written back to disk.
    pub fn frontmatter_prefix(&self) -> Result<String> {
        self.frontmatter().to_block()
    }

    /// `description`, plus ` (apply to: X)` when `applyTo` is set.
    pub fn tool_description(&self) -> String {
        match &self.apply_to {
            Some(apply_to) => format!("{} (apply to: {})", self.description, apply_to),
            None => self.description.clone(),
        }
    }

    /// Unsuffixed tool name: sanitized `name`, else the filename stem.
    pub fn base_tool_name(&self) -> String {
        let stem = Path::new(&self.file_name)
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let source = self.name.as_deref().unwrap_or(&stem);
        tool_identifier(source)
    }
}

/// `[A-Za-z0-9_]+` identifier for `input`, or the fallback name.
pub fn tool_identifier(input: &str) -> String {
    match path_guard::sanitize_identifier(input, MAX_TOOL_NAME_LEN) {
        Ok(id) => id.replace('.', "_"),
        Err(_) => FALLBACK_TOOL_NAME.to_string(),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleFileTool {
    pub tool_name: String,
    pub tool_description: String,
    pub rule_file: RuleFile,
}

/// Tools in registration order, indexed by name.
#[derive(Debug, Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<RuleFileTool>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// `base`, or `base_k` with the smallest k ≥ 1 not yet taken.
    pub fn unique_name(&self, base: &str) -> String {
        if !self.index.contains_key(base) {
            return base.to_string();
        }
        (1..)
            .map(|k| format!("{}_{}", base, k))
            .find(|candidate| !self.index.contains_key(candidate))
            .unwrap_or_else(|| base.to_string())
    }

    pub fn register(&mut self, rule_file: RuleFile) -> &RuleFileTool {
        let tool_name = self.unique_name(&rule_file.base_tool_name());
        let tool = RuleFileTool {
            tool_description: rule_file.tool_description(),
            tool_name: tool_name.clone(),
            rule_file,
        };
        let position = self.tools.len();
        self.tools.push(tool);
        self.index.insert(tool_name, position);
        &self.tools[position]
    }

    pub fn get(&self, name: &str) -> Option<&RuleFileTool> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = &RuleFileTool> {
        self.tools.iter()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.tool_name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

/// A file left out of the registry.
#[derive(Debug, Clone)]
pub struct SkippedFile {
    pub path: PathBuf,
    /// `None` when the file simply has no frontmatter.
    pub kind: Option<ErrorKind>,
    pub reason: String,
}

#[derive(Debug, Default, Clone)]
pub struct ProcessReport {
    pub registered: usize,
    pub skipped: Vec<SkippedFile>,
}

impl ProcessReport {
    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }

    pub fn skipped_with(&self, kind: ErrorKind) -> usize {
        self.skipped.iter().filter(|s| s.kind == Some(kind)).count()
    }
}

/// Build a [`RuleFile`] from text that already passed content checks.
///
/// `Ok(None)` means the text has no frontmatter and is not a rule file.
pub fn parse_rule_content(file_name: &str, file_path: &Path, content: &str) -> Result<Option<RuleFile>> {
    let Some((front, body)) = parse_frontmatter(content)? else {
        return Ok(None);
    };

    let description = front
        .description
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .ok_or(Error::MissingField {
            field: "description",
        })?;
    check_field("description", &description, MAX_DESCRIPTION_LEN)?;

    let name = non_empty(front.name);
    if let Some(name) = &name {
        check_field("name", name, MAX_NAME_LEN)?;
    }
    let apply_to = non_empty(front.apply_to);
    if let Some(apply_to) = &apply_to {
        check_field("applyTo", apply_to, MAX_APPLY_TO_LEN)?;
    }

    Ok(Some(RuleFile {
        file_name: file_name.to_string(),
        file_path: file_path.to_path_buf(),
        description,
        name,
        apply_to,
        body: body.to_string(),
    }))
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn check_field(field: &'static str, value: &str, limit: usize) -> Result<()> {
    let len = value.chars().count();
    if len > limit {
        return Err(Error::FieldTooLong { field, len, limit });
    }
    path_guard::validate_content_security(value)
}

pub struct RuleFileProcessor {
    storage_roots: HashMap<String, PathBuf>,
    max_file_size: u64,
    logger: Arc<dyn Logger>,
}

impl RuleFileProcessor {
    pub fn new(logger: Arc<dyn Logger>) -> Self {
        Self {
            storage_roots: HashMap::new(),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            logger,
        }
    }

    pub fn with_max_file_size(mut self, max_bytes: u64) -> Self {
        self.max_file_size = max_bytes;
        self
    }

    /// Register the directory that items of `repository_id` must stay in.
    pub fn add_storage_root(&mut self, repository_id: &str, root: &Path) {
        self.storage_roots
            .insert(repository_id.to_string(), root.to_path_buf());
    }

    pub fn process(&self, items: &[FileItem]) -> (ToolRegistry, ProcessReport) {
        let mut registry = ToolRegistry::new();
        let mut report = ProcessReport::default();
        for item in items {
            self.process_one(item, &mut registry, &mut report);
        }
        self.finish(&report);
        (registry, report)
    }

    /// As [`process`](Self::process), checking `token` between files.
    pub fn process_cancellable(
        &self,
        items: &[FileItem],
        token: &CancellationToken,
    ) -> Result<(ToolRegistry, ProcessReport)> {
        let mut registry = ToolRegistry::new();
        let mut report = ProcessReport::default();
        for item in items {
            if token.is_cancelled() {
                return Err(Error::Canceled);
            }
            self.process_one(item, &mut registry, &mut report);
        }
        self.finish(&report);
        Ok((registry, report))
    }

    fn finish(&self, report: &ProcessReport) {
        self.logger.info(&format!(
            "registered {} rule files, skipped {}",
            report.registered,
            report.skipped_count()
        ));
    }

    fn process_one(&self, item: &FileItem, registry: &mut ToolRegistry, report: &mut ProcessReport) {
        match self.load(item) {
            Ok(Some(rule_file)) => {
                let tool = registry.register(rule_file);
                self.logger.debug(&format!(
                    "registered {} from {}",
                    tool.tool_name,
                    item.path.display()
                ));
                report.registered += 1;
            }
            Ok(None) => {
                self.logger
                    .debug(&format!("{} has no frontmatter", item.path.display()));
                report.skipped.push(SkippedFile {
                    path: item.path.clone(),
                    kind: None,
                    reason: "no frontmatter".to_string(),
                });
            }
            Err(e) => {
                self.logger
                    .debug(&format!("skipping {}: {}", item.path.display(), e));
                report.skipped.push(SkippedFile {
                    path: item.path.clone(),
                    kind: Some(e.kind()),
                    reason: e.to_string(),
                });
            }
        }
    }

    /// Load one item, or explain why it is not a rule file.
    pub fn load(&self, item: &FileItem) -> Result<Option<RuleFile>> {
        let storage = self
            .storage_roots
            .get(&item.repository_id)
            .ok_or_else(|| Error::NotFound {
                what: "storage directory for repository",
                name: item.repository_id.clone(),
            })?;
        let path = item.path.as_path();

        path_guard::validate_path_security(&path.to_string_lossy())?;
        path_guard::validate_file_size_limit(path, self.max_file_size)?;
        path_guard::validate_file_access(path)?;
        path_guard::validate_file_in_directory(path, storage)?;

        if symlink::is_symlink(path) {
            let target = symlink::validate_symlink_security(path, std::slice::from_ref(storage))?;
            path_guard::validate_file_in_directory(&target, storage)?;
        }

        let content = self.read_bounded(path)?;
        path_guard::validate_content_security(&content)?;
        parse_rule_content(&item.name, path, &content)
    }

    fn read_bounded(&self, path: &Path) -> Result<String> {
        let file = File::open(path).map_err(|e| Error::io("open", path, e))?;
        let mut bytes = Vec::new();
        file.take(self.max_file_size + 1)
            .read_to_end(&mut bytes)
            .map_err(|e| Error::io("read", path, e))?;
        if bytes.len() as u64 > self.max_file_size {
            return Err(Error::SizeExceeded {
                path: path.to_path_buf(),
                size: bytes.len() as u64,
                limit: self.max_file_size,
            });
        }
        String::from_utf8(bytes)
            .map_err(|e| Error::parse(format!("{}", path.display()), format!("not UTF-8: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::null_logger;
    use std::fs;

    fn rule(name: Option<&str>, file_name: &str) -> RuleFile {
        RuleFile {
            file_name: file_name.to_string(),
            file_path: PathBuf::from(file_name),
            description: "d".to_string(),
            name: name.map(str::to_string),
            apply_to: None,
            body: String::new(),
        }
    }

    fn item(root: &Path, name: &str) -> FileItem {
        FileItem {
            name: name.to_string(),
            path: root.join(name),
            repository_id: "repo".to_string(),
            repository_name: "repo".to_string(),
            repository_type: "local".to_string(),
        }
    }

    #[test]
    fn registry_suffixes_collisions_in_order() {
        let mut registry = ToolRegistry::new();
        registry.register(rule(Some("helpers"), "a.md"));
        registry.register(rule(Some("helpers"), "b.md"));
        registry.register(rule(None, "helpers.md"));
        assert_eq!(registry.names(), vec!["helpers", "helpers_1", "helpers_2"]);
        assert_eq!(
            registry.get("helpers_1").unwrap().rule_file.file_name,
            "b.md"
        );
    }

    #[test]
    fn tool_names_are_identifiers() {
        assert_eq!(tool_identifier("My Rule v1.2"), "My_Rule_v1_2");
        assert_eq!(tool_identifier("!!!"), FALLBACK_TOOL_NAME);
        assert_eq!(tool_identifier(&"x".repeat(150)).len(), MAX_TOOL_NAME_LEN);
        assert_eq!(rule(None, "style-guide.md").base_tool_name(), "style_guide");
    }

    #[test]
    fn description_suffix() {
        let mut r = rule(None, "a.md");
        assert_eq!(r.tool_description(), "d");
        r.apply_to = Some("ts".into());
        assert_eq!(r.tool_description(), "d (apply to: ts)");
    }

    #[test]
    fn field_validation() {
        let path = Path::new("r.md");
        assert!(parse_rule_content("r.md", path, "# plain").unwrap().is_none());
        assert!(matches!(
            parse_rule_content("r.md", path, "---\ndescription: ''\n---\n"),
            Err(Error::MissingField { .. })
        ));
        let long = format!("---\ndescription: {}\n---\n", "a".repeat(501));
        assert!(matches!(
            parse_rule_content("r.md", path, &long),
            Err(Error::FieldTooLong { limit: 500, .. })
        ));
        let long_name = format!("---\ndescription: d\nname: {}\n---\n", "n".repeat(101));
        assert!(parse_rule_content("r.md", path, &long_name).is_err());
        let ok = parse_rule_content("r.md", path, "---\ndescription: d\nname: n\n---\nbody")
            .unwrap()
            .unwrap();
        assert_eq!(ok.body, "body");
        assert_eq!(ok.name.as_deref(), Some("n"));
    }

    #[test]
    fn processor_skips_bad_files_and_counts_them() {
        let tmp = tempfile::tempdir().unwrap();
        let root = tmp.path();
        fs::write(root.join("good.md"), "---\ndescription: Good\n---\nbody").unwrap();
        fs::write(root.join("plain.md"), "# nothing").unwrap();
        fs::write(
            root.join("evil.md"),
            "---\ndescription: run <script>alert(1)</script>\n---\n",
        )
        .unwrap();
        fs::write(root.join("big.md"), format!("---\ndescription: d\n---\n{}", "x".repeat(200))).unwrap();

        let mut processor = RuleFileProcessor::new(null_logger()).with_max_file_size(100);
        processor.add_storage_root("repo", root);
        let items: Vec<FileItem> = ["good.md", "plain.md", "evil.md", "big.md"]
            .iter()
            .map(|n| item(root, n))
            .collect();

        let (registry, report) = processor.process(&items);
        assert_eq!(registry.names(), vec!["good"]);
        assert_eq!(report.registered, 1);
        assert_eq!(report.skipped_count(), 3);
        assert_eq!(report.skipped_with(ErrorKind::Validation), 2);
    }

    #[test]
    fn processor_requires_known_storage_root() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("a.md"), "---\ndescription: d\n---\n").unwrap();
        let processor = RuleFileProcessor::new(null_logger());
        let err = processor.load(&item(tmp.path(), "a.md")).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[cfg(unix)]
    #[test]
    fn processor_rejects_symlink_escaping_storage() {
        let tmp = tempfile::tempdir().unwrap();
        let outside = tempfile::tempdir().unwrap();
        let secret = outside.path().join("secret.md");
        fs::write(&secret, "---\ndescription: leaked\n---\n").unwrap();
        std::os::unix::fs::symlink(&secret, tmp.path().join("link.md")).unwrap();

        let mut processor = RuleFileProcessor::new(null_logger());
        processor.add_storage_root("repo", tmp.path());
        let (registry, report) = processor.process(&[item(tmp.path(), "link.md")]);
        assert!(registry.is_empty());
        assert_eq!(report.skipped_with(ErrorKind::Containment), 1);
    }

    #[test]
    fn cancellation_before_processing() {
        let processor = RuleFileProcessor::new(null_logger());
        let token = CancellationToken::new();
        token.cancel();
        let tmp = tempfile::tempdir().unwrap();
        assert!(matches!(
            processor.process_cancellable(&[item(tmp.path(), "x.md")], &token),
            Err(Error::Canceled)
        ));
    }
}
