use super::*;
use crate::selector::{select, SelectionRequest};
use tempfile::TempDir;

const DEMO: &str = include_str!("../demos/jsonschema/smx.toml");

fn names(project: &Project, request: &SelectionRequest) -> Vec<String> {
    select(&project.registry, request)
        .expect("select")
        .into_iter()
        .map(|session| session.name)
        .collect()
}

#[test]
fn demo_project_declares_expected_default_set() {
    let root = TempDir::new().expect("tempdir");
    let project = parse_project(DEMO, root.path()).expect("parse demo project");

    let defaults: Vec<&str> = project
        .registry
        .defaults()
        .map(|definition| definition.name.as_str())
        .collect();
    assert_eq!(
        defaults,
        vec![
            "tests",
            "audit",
            "license_check",
            "build",
            "secrets",
            "style",
            "typing",
            "docs",
            "docs(style)",
        ]
    );
    assert!(project.registry.get("bench").is_some());
    assert!(project.registry.get("requirements").is_some());
    assert_eq!(project.env_root, root.path().join(".smx"));
    assert_eq!(project.chain.entries().len(), 1);
}

#[test]
fn demo_tests_session_expands_over_runtimes_and_installables() {
    let root = TempDir::new().expect("tempdir");
    let project = parse_project(DEMO, root.path()).expect("parse demo project");
    let request = SelectionRequest {
        names: vec!["tests".to_string()],
        ..SelectionRequest::default()
    };
    let picked = names(&project, &request);
    assert_eq!(picked.len(), 18);
    assert_eq!(picked[0], "tests-3.9[no-extras]");
    assert_eq!(picked[17], "tests-3.13[format-nongpl]");
}

#[test]
fn demo_audit_uses_labels_from_installable_axis() {
    let root = TempDir::new().expect("tempdir");
    let project = parse_project(DEMO, root.path()).expect("parse demo project");
    let request = SelectionRequest {
        names: vec!["audit".to_string()],
        ..SelectionRequest::default()
    };
    assert_eq!(
        names(&project, &request),
        vec!["audit[no-extras]", "audit[format]", "audit[format-nongpl]"]
    );
}

#[test]
fn file_axis_reads_benchmarks_from_project_root() {
    let root = TempDir::new().expect("tempdir");
    let bench_dir = root.path().join("jsonschema/benchmarks");
    fs::create_dir_all(&bench_dir).unwrap();
    fs::write(bench_dir.join("nested_schemas.py"), "").unwrap();
    fs::write(bench_dir.join("__init__.py"), "").unwrap();
    let project = parse_project(DEMO, root.path()).expect("parse demo project");

    let request = SelectionRequest {
        names: vec!["bench".to_string()],
        ..SelectionRequest::default()
    };
    assert_eq!(names(&project, &request), vec!["bench[nested_schemas]"]);
}

#[test]
fn missing_benchmarks_leave_bench_flagged_but_project_loadable() {
    let root = TempDir::new().expect("tempdir");
    let project = parse_project(DEMO, root.path()).expect("parse demo project");
    let bench = project.registry.get("bench").expect("bench declared");
    assert_eq!(bench.empty_axis(), Some("benchmark"));
}

#[test]
fn duplicate_resolved_names_fail_declaration() {
    let text = r#"
default_runtime = "3.13"

[[session]]
name = "docs_style"
display_name = "style"

[[session]]
name = "style"
"#;
    let root = TempDir::new().expect("tempdir");
    let err = parse_project(text, root.path()).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ConfigError>(),
        Some(ConfigError::DuplicateSession { name }) if name == "style"
    ));
}

#[test]
fn runtime_qualified_collision_fails_declaration() {
    let text = r#"
default_runtime = "3.13"

[[session]]
name = "tests"
runtime = ["3.12", "3.13"]

[[session]]
name = "tests-3.12"
"#;
    let root = TempDir::new().expect("tempdir");
    let err = parse_project(text, root.path()).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ConfigError>(),
        Some(ConfigError::DuplicateSession { name }) if name == "tests-3.12"
    ));
}

#[test]
fn repeated_axis_label_fails_declaration() {
    let text = r#"
default_runtime = "3.13"

[axes.variant]
values = ["a", { label = "a", value = "b" }]

[[session]]
name = "x"
parametrize = ["variant"]
"#;
    let root = TempDir::new().expect("tempdir");
    let err = parse_project(text, root.path()).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ConfigError>(),
        Some(ConfigError::DuplicateAxisLabel { axis, label }) if axis == "variant" && label == "a"
    ));
}

#[test]
fn unknown_axis_fails_declaration() {
    let text = r#"
default_runtime = "3.13"

[[session]]
name = "tests"
parametrize = ["installable"]
"#;
    let root = TempDir::new().expect("tempdir");
    let err = parse_project(text, root.path()).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ConfigError>(),
        Some(ConfigError::UnknownAxis { .. })
    ));
}

#[test]
fn session_without_runtime_needs_project_default() {
    let text = r#"
[[session]]
name = "style"
"#;
    let root = TempDir::new().expect("tempdir");
    let err = parse_project(text, root.path()).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ConfigError>(),
        Some(ConfigError::MissingRuntime { .. })
    ));
}

#[test]
fn unknown_backend_is_rejected() {
    let text = r#"
backend = "uv|conda"
default_runtime = "3.13"

[[session]]
name = "style"
"#;
    let root = TempDir::new().expect("tempdir");
    let err = parse_project(text, root.path()).unwrap_err();
    assert!(crate::error::is_config_error(&err));
}

#[test]
fn empty_project_is_an_error() {
    let root = TempDir::new().expect("tempdir");
    assert!(parse_project("backend = \"none\"\n", root.path()).is_err());
}

#[test]
fn load_project_uses_file_directory_as_root() {
    let root = TempDir::new().expect("tempdir");
    let path = root.path().join(DEFAULT_PROJECT_FILE);
    fs::write(
        &path,
        "backend = \"none\"\ndefault_runtime = \"3\"\n\n[[session]]\nname = \"lint\"\n",
    )
    .unwrap();
    let project = load_project(&path).expect("load project");
    assert_eq!(project.root, root.path().canonicalize().unwrap());
    assert_eq!(project.backend, "none");
}
