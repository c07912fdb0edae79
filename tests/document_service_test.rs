//! Tests for DocumentService

use std::path::{Path, PathBuf};
use std::sync::Arc;

use rstest::rstest;
use tempfile::TempDir;

use formgraph::application::services::DocumentService;
use formgraph::application::ApplicationError;
use formgraph::config::Settings;
use formgraph::domain::{DomainError, FieldDef, FormDocument, Value};
use formgraph::infrastructure::traits::{FileSystem, MemoryFileSystem, RealFileSystem};

const INVENTORY: &str = r#"
[[fields]]
key = "items"
template = [
    { key = "weight", value = 0 },
    { key = "count", value = 1 },
    { key = "load", formula = "mul ./weight ./count" },
]
items = [ { weight = 2, count = 3 }, { weight = 5 } ]

[[fields]]
key = "totals"

[[fields.fields]]
key = "load"
formula = "sum /items[-1].load"
"#;

fn service(fs: Arc<dyn FileSystem>) -> DocumentService {
    DocumentService::new(fs, Arc::new(Settings::default()))
}

fn write_doc(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, content).expect("write document");
    path
}

#[test]
fn given_document_on_disk_when_load_form_then_values_computed() {
    let temp = TempDir::new().unwrap();
    let path = write_doc(&temp, "inventory.toml", INVENTORY);
    let service = service(Arc::new(RealFileSystem));

    let form = service.load_form(&path).unwrap();

    assert_eq!(form.value("items[0].load").unwrap(), Some(Value::Int(6)));
    assert_eq!(form.value("items[1].load").unwrap(), Some(Value::Int(5)));
    assert_eq!(form.value("totals.load").unwrap(), Some(Value::Int(11)));
}

#[test]
fn given_missing_file_when_load_then_operation_failed() {
    let service = service(Arc::new(MemoryFileSystem::default()));
    let err = service.load(Path::new("/nowhere/form.toml")).unwrap_err();
    assert!(matches!(err, ApplicationError::OperationFailed { .. }));
}

#[rstest]
#[case("[[fields]]\nkey = \"a\"\nbogus = 1\n")]
#[case("[[fields]]\nkey = \"a.b\"\n")]
#[case("[[fields]]\nkey = \"a\"\nitems = [ { x = 1 } ]\n")]
fn given_invalid_document_when_load_then_invalid_document_error(#[case] content: &str) {
    let service = service(Arc::new(MemoryFileSystem::with_file("form.toml", content)));
    let err = service.load(Path::new("form.toml")).unwrap_err();
    assert!(
        matches!(err, ApplicationError::Domain(DomainError::InvalidDocument(_))),
        "unexpected error: {err}"
    );
}

#[test]
fn given_unknown_item_path_when_load_form_then_error() {
    let content = r#"
[[fields]]
key = "items"
template = [ { key = "weight" } ]
items = [ { height = 1 } ]
"#;
    let service = service(Arc::new(MemoryFileSystem::with_file("form.toml", content)));
    let err = service.load_form(Path::new("form.toml")).unwrap_err();
    assert!(matches!(err, ApplicationError::Domain(DomainError::NodeNotFound(_))));
}

#[test]
fn given_document_when_saved_then_loads_back_equal() {
    let fs = Arc::new(MemoryFileSystem::default());
    let service = service(fs.clone());
    let document = FormDocument {
        fields: vec![
            FieldDef {
                key: "a".into(),
                value: Some(Value::Int(2)),
                ..Default::default()
            },
            FieldDef {
                key: "b".into(),
                formula: Some("mul /a 3".into()),
                ..Default::default()
            },
        ],
    };

    service.save(Path::new("out/form.toml"), &document).unwrap();
    assert!(fs.exists(Path::new("out/form.toml")));
    let loaded = service.load(Path::new("out/form.toml")).unwrap();

    assert_eq!(loaded, document);
}
