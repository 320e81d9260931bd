use std::fs;
use std::path::{Path, PathBuf};

use rulem::atomic_io;
use rulem::config::{load_config, save_config, Config};
use rulem::error::ErrorKind;
use rulem::file_manager::{markdown_scan_options, FileManager};
use rulem::logging::null_logger;
use rulem::models::{FileItem, RepositoryEntry};
use rulem::rulefile::RuleFileProcessor;
use rulem::scanner::{ScanOptions, SecureScanner};
use tempfile::TempDir;

fn write(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

fn items(root: &Path, names: &[&str]) -> Vec<FileItem> {
    names
        .iter()
        .map(|name| FileItem {
            name: name.to_string(),
            path: root.join(name),
            repository_id: "rules".to_string(),
            repository_name: "rules".to_string(),
            repository_type: "local".to_string(),
        })
        .collect()
}

fn processor(root: &Path) -> RuleFileProcessor {
    let mut processor = RuleFileProcessor::new(null_logger());
    processor.add_storage_root("rules", root);
    processor
}

fn scanned_files(root: &Path, options: ScanOptions) -> Vec<PathBuf> {
    let scanner = SecureScanner::new(root, options, null_logger()).unwrap();
    let mut files: Vec<PathBuf> = scanner
        .scan()
        .unwrap()
        .into_iter()
        .filter(|r| !r.is_dir)
        .map(|r| r.relative_path)
        .collect();
    files.sort();
    files
}

#[test]
fn copy_to_storage_respects_overwrite() {
    let tmp = TempDir::new().unwrap();
    let storage = tmp.path().join("storage");
    let src = tmp.path().join("src").join("title.md");
    write(&src, "# T");

    let fm = FileManager::new(&storage.to_string_lossy(), null_logger()).unwrap();
    let dst = fm.copy_file_to_storage(&src, None, false).unwrap();
    assert_eq!(dst, fm.storage_dir().join("title.md"));
    assert_eq!(fs::read_to_string(&dst).unwrap(), "# T");

    let err = fm.copy_file_to_storage(&src, None, false).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Exists);

    write(&src, "# T2");
    fm.copy_file_to_storage(&src, None, true).unwrap();
    assert_eq!(fs::read_to_string(&dst).unwrap(), "# T2");
}

#[cfg(unix)]
#[test]
fn broken_symlink_destination_needs_overwrite() {
    let tmp = TempDir::new().unwrap();
    let storage = tmp.path().join("storage");
    let project = tmp.path().join("project");
    write(&storage.join("rule.md"), "stored");
    fs::create_dir_all(&project).unwrap();
    std::os::unix::fs::symlink(tmp.path().join("missing"), project.join("rule.md")).unwrap();

    let fm = FileManager::new(&storage.to_string_lossy(), null_logger())
        .unwrap()
        .with_cwd(&project)
        .unwrap();

    let err = fm
        .copy_file_from_storage(Path::new("rule.md"), "rule.md", false)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Exists);

    let dst = fm
        .copy_file_from_storage(Path::new("rule.md"), "rule.md", true)
        .unwrap();
    let meta = fs::symlink_metadata(&dst).unwrap();
    assert!(meta.file_type().is_file());
    assert_eq!(fs::read_to_string(&dst).unwrap(), "stored");
}

#[test]
fn scanner_skips_dependency_and_vcs_directories() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    write(&root.join("src/a.md"), "a");
    write(&root.join("node_modules/lib/x.md"), "x");
    write(&root.join("vendor/r.md"), "r");
    write(&root.join(".git/config"), "[core]");
    write(&root.join("docs/api/r.md"), "r");

    let options = ScanOptions {
        skip_patterns: markdown_scan_options().skip_patterns,
        ..Default::default()
    };
    assert_eq!(
        scanned_files(root, options),
        vec![PathBuf::from("docs/api/r.md"), PathBuf::from("src/a.md")]
    );
}

#[test]
fn rule_file_discovery_classifies_files() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    write(
        &root.join("rule1.md"),
        "---\ndescription: D1\nname: T\napplyTo: ts\n---\nOne",
    );
    write(&root.join("rule2.md"), "---\ndescription: D2\n---\nTwo");
    write(&root.join("plain.md"), "# Just notes");
    write(&root.join("bad.md"), "---\ndescription: \"\"\n---\nBad");

    let (registry, report) = processor(root).process(&items(
        root,
        &["rule1.md", "rule2.md", "plain.md", "bad.md"],
    ));

    assert_eq!(registry.len(), 2);
    assert_eq!(registry.get("T").unwrap().tool_description, "D1 (apply to: ts)");
    assert_eq!(registry.get("rule2").unwrap().tool_description, "D2");
    assert_eq!(report.registered, 2);
    assert_eq!(report.skipped_count(), 2);
    assert_eq!(report.skipped_with(ErrorKind::Validation), 1);
}

#[test]
fn colliding_tool_names_follow_input_order() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    write(&root.join("a.md"), "---\ndescription: first\nname: helpers\n---\n");
    write(&root.join("helpers.md"), "---\ndescription: second\n---\n");

    let (registry, _) = processor(root).process(&items(root, &["a.md", "helpers.md"]));
    assert_eq!(registry.names(), vec!["helpers", "helpers_1"]);
    assert_eq!(registry.get("helpers").unwrap().tool_description, "first");
    assert_eq!(registry.get("helpers_1").unwrap().tool_description, "second");
}

#[test]
fn script_in_description_is_rejected() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    write(
        &root.join("evil.md"),
        "---\ndescription: \"<script>alert(1)</script>\"\n---\nbody",
    );

    let (registry, report) = processor(root).process(&items(root, &["evil.md"]));
    assert!(registry.is_empty());
    assert_eq!(report.skipped_count(), 1);
    assert_eq!(report.skipped_with(ErrorKind::Validation), 1);
    assert!(report.skipped[0].reason.contains("content rejected"));
}

#[test]
fn atomic_copy_is_repeatable_and_leaves_no_temp_file() {
    let tmp = TempDir::new().unwrap();
    let src = tmp.path().join("src.bin");
    let dst = tmp.path().join("out").join("dst.bin");
    let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
    fs::write(&src, &payload).unwrap();
    fs::create_dir_all(dst.parent().unwrap()).unwrap();

    for _ in 0..2 {
        let copied = atomic_io::atomic_copy(&src, &dst).unwrap();
        assert_eq!(copied, payload.len() as u64);
        assert_eq!(fs::read(&dst).unwrap(), payload);
        assert!(!atomic_io::temp_path_for(&dst).exists());
    }
    let leftovers: Vec<_> = fs::read_dir(dst.parent().unwrap())
        .unwrap()
        .map(|e| e.unwrap().file_name())
        .collect();
    assert_eq!(leftovers.len(), 1);
}

#[cfg(unix)]
#[test]
fn relative_symlinks_resolve_to_target() {
    let tmp = TempDir::new().unwrap();
    let target = tmp.path().join("store").join("rule.md");
    let link = tmp.path().join("project").join(".cursor").join("rule.md");
    write(&target, "x");
    fs::create_dir_all(link.parent().unwrap()).unwrap();

    rulem::symlink::create_relative_symlink(&target, &link).unwrap();
    let raw = fs::read_link(&link).unwrap();
    assert!(!raw.is_absolute(), "link text {:?} is absolute", raw);
    assert_eq!(
        rulem::symlink::resolve_symlink(&link).unwrap(),
        fs::canonicalize(&target).unwrap()
    );
}

#[cfg(unix)]
#[test]
fn scanner_never_follows_links_out_of_root() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path().join("root");
    let outside = tmp.path().join("outside");
    write(&outside.join("secret.md"), "secret");
    write(&outside.join("deep/more.md"), "more");
    write(&root.join("inside.md"), "ok");
    fs::create_dir_all(root.join("a/b")).unwrap();
    std::os::unix::fs::symlink(&outside, root.join("a/b/escape")).unwrap();
    std::os::unix::fs::symlink(outside.join("secret.md"), root.join("leak.md")).unwrap();

    let files = scanned_files(&root, ScanOptions::default());
    assert_eq!(files, vec![PathBuf::from("inside.md")]);
}

#[test]
fn scanner_depth_cap_limits_separators() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    write(&root.join("l0.md"), "");
    write(&root.join("a/l1.md"), "");
    write(&root.join("a/b/l2.md"), "");
    write(&root.join("a/b/c/l3.md"), "");

    for depth in 0..4 {
        let options = ScanOptions {
            max_depth: depth,
            ..Default::default()
        };
        let scanner = SecureScanner::new(root, options, null_logger()).unwrap();
        for record in scanner.scan().unwrap() {
            let separators = record.relative_path.components().count() - 1;
            assert!(
                separators <= depth,
                "{:?} exceeds depth {}",
                record.relative_path,
                depth
            );
        }
    }
}

#[test]
fn rule_file_reassembles_to_source() {
    let tmp = TempDir::new().unwrap();
    let root = tmp.path();
    let original = "---\ndescription: Style guide\nname: style\napplyTo: rust\n---\n# Style\n\nUse rustfmt.\n";
    write(&root.join("style.md"), original);

    let (registry, _) = processor(root).process(&items(root, &["style.md"]));
    let rule = &registry.get("style").unwrap().rule_file;
    let rebuilt = format!("{}{}", rule.frontmatter_prefix().unwrap(), rule.body);
    assert_eq!(rebuilt.trim_end(), original.trim_end());
}

#[test]
fn config_round_trip_keeps_init_time() {
    let tmp = TempDir::new().unwrap();
    let path = tmp.path().join("rulem").join("config.yaml");

    let mut config = Config::default();
    config
        .add_repository(RepositoryEntry::local("team", "/srv/rules", 1_700_000_000).unwrap())
        .unwrap();
    config
        .add_repository(
            RepositoryEntry::github(
                "upstream",
                "https://github.com/acme/rules.git",
                Some("main".to_string()),
                Some("ACME_TOKEN".to_string()),
                1_700_000_001,
            )
            .unwrap(),
        )
        .unwrap();

    save_config(&path, &mut config).unwrap();
    assert_ne!(config.init_time, 0);
    let first = config.init_time;

    let mut loaded = load_config(&path, null_logger().as_ref()).unwrap();
    assert_eq!(loaded, config);

    save_config(&path, &mut loaded).unwrap();
    let reloaded = load_config(&path, null_logger().as_ref()).unwrap();
    assert_eq!(reloaded.init_time, first);
    assert_eq!(reloaded, config);
}
