//! End-to-end behaviour of the form service and its dependency graph

use std::collections::HashSet;

use rstest::{fixture, rstest};

use formgraph::application::Form;
use formgraph::config::Settings;
use formgraph::domain::{CacheRefresh, FormDocument, NodeKind, Value};
use formgraph::util::testing;

const SHEET: &str = r#"
[[fields]]
key = "str"
value = 14

[[fields]]
key = "str_mod"
formula = "mod any 2 /str -10"

[[fields]]
key = "attacks"
template = [
    { key = "bonus", value = 0 },
    { key = "total", formula = "sum ./bonus /str_mod" },
]
items = [ { bonus = 2 }, { bonus = 5 } ]

[[fields]]
key = "attack_sum"
formula = "sum /attacks[-1].total"
"#;

fn load(settings: &Settings) -> Form {
    testing::init_test_setup();
    let document: FormDocument = toml::from_str(SHEET).expect("parse sheet");
    Form::from_document(&document, settings).expect("load sheet")
}

#[fixture]
fn sheet() -> Form {
    load(&Settings::default())
}

fn value_at(form: &Form, path: &str) -> Option<Value> {
    form.value(path).expect("resolve")
}

fn snapshot(form: &Form) -> Vec<(String, Option<Value>)> {
    form.values()
        .into_iter()
        .map(|(path, value)| (path.to_string(), value))
        .collect()
}

#[rstest]
fn given_document_when_loaded_then_all_formulas_evaluated(sheet: Form) {
    assert_eq!(value_at(&sheet, "str_mod"), Some(Value::Int(2)));
    assert_eq!(value_at(&sheet, "attacks[0].total"), Some(Value::Int(4)));
    assert_eq!(value_at(&sheet, "attacks[1].total"), Some(Value::Int(7)));
    assert_eq!(value_at(&sheet, "attack_sum"), Some(Value::Int(11)));
}

#[rstest]
fn given_wildcard_selector_when_elements_change_then_aggregate_follows(mut sheet: Form) {
    let element = sheet.push_element("attacks").unwrap();
    assert_eq!(sheet.tree().path(element).to_string(), "attacks[2]");
    // template default bonus 0, so the new element contributes str_mod
    assert_eq!(value_at(&sheet, "attacks[2].total"), Some(Value::Int(2)));
    assert_eq!(value_at(&sheet, "attack_sum"), Some(Value::Int(13)));

    sheet.set_value("attacks[2].bonus", Value::Void).unwrap();
    assert_eq!(value_at(&sheet, "attacks[2].total"), None);
    assert_eq!(value_at(&sheet, "attack_sum"), None);

    sheet.remove_element("attacks", 2).unwrap();
    assert_eq!(value_at(&sheet, "attack_sum"), Some(Value::Int(11)));
}

#[rstest]
fn given_source_change_when_eager_then_whole_chain_updates(mut sheet: Form) {
    sheet.set_value("str", Value::Int(18)).unwrap();
    assert_eq!(value_at(&sheet, "str_mod"), Some(Value::Int(4)));
    assert_eq!(value_at(&sheet, "attacks[0].total"), Some(Value::Int(6)));
    assert_eq!(value_at(&sheet, "attack_sum"), Some(Value::Int(15)));
}

#[rstest]
fn given_loaded_form_when_levels_then_every_edge_points_upward(mut sheet: Form) {
    let levels = sheet.levels().unwrap();
    let level_of = |path: &str| {
        levels
            .iter()
            .find(|(p, _)| p.to_string() == path)
            .map(|(_, l)| *l)
            .unwrap_or_else(|| panic!("no level for {path}"))
    };
    assert_eq!(level_of("str_mod"), 1);
    assert_eq!(level_of("attacks[0].total"), 2);
    assert_eq!(level_of("attack_sum"), 3);

    let graph = sheet.graph();
    for id in graph.formula_nodes() {
        let level = graph.level(id).unwrap();
        for pred in graph.node(id).unwrap().predecessors() {
            assert!(graph.level(*pred).unwrap() < level);
        }
    }
}

#[rstest]
fn given_settled_form_when_recompute_all_then_nothing_changes(mut sheet: Form) {
    let before = snapshot(&sheet);
    let report = sheet.recompute_all().unwrap();
    assert_eq!(report.changed, 0);
    assert_eq!(report.evaluated.len(), sheet.graph().formula_nodes().len());
    assert_eq!(snapshot(&sheet), before);
}

#[rstest]
fn given_element_when_removed_and_readded_then_baseline_restored(mut sheet: Form) {
    let registry_len = sheet.registry().len();
    let edges = sheet.graph().edge_count();
    let graph_len = sheet.graph().len();

    sheet.remove_element("attacks", 1).unwrap();
    assert!(sheet.registry().len() < registry_len);
    assert_eq!(value_at(&sheet, "attack_sum"), Some(Value::Int(4)));

    sheet.push_element("attacks").unwrap();
    sheet.set_value("attacks[1].bonus", Value::Int(5)).unwrap();
    assert_eq!(sheet.registry().len(), registry_len);
    assert_eq!(sheet.graph().edge_count(), edges);
    assert_eq!(sheet.graph().len(), graph_len);
    assert_eq!(value_at(&sheet, "attack_sum"), Some(Value::Int(11)));
}

#[rstest]
fn given_lazy_recompute_when_value_changes_then_only_descendants_evaluated() {
    let settings = Settings {
        recompute_eagerly: false,
        ..Default::default()
    };
    let mut form = load(&settings);
    form.set_value("str", Value::Int(16)).unwrap();
    assert!(!form.graph().pending().is_empty());
    // stale until the pending pass
    assert_eq!(value_at(&form, "str_mod"), Some(Value::Int(2)));

    let report = form.recompute_pending().unwrap();
    let evaluated: HashSet<String> = report
        .evaluated
        .iter()
        .map(|&id| form.tree().path(id).to_string())
        .collect();
    let expected: HashSet<String> = ["str_mod", "attacks[0].total", "attacks[1].total", "attack_sum"]
        .into_iter()
        .map(String::from)
        .collect();
    assert_eq!(evaluated, expected);
    assert!(form.graph().pending().is_empty());
    assert_eq!(value_at(&form, "attack_sum"), Some(Value::Int(13)));

    // a bonus only reaches its own total and the aggregate
    form.set_value("attacks[0].bonus", Value::Int(3)).unwrap();
    let report = form.recompute_pending().unwrap();
    let evaluated: Vec<String> = report
        .evaluated
        .iter()
        .map(|&id| form.tree().path(id).to_string())
        .collect();
    assert_eq!(evaluated, vec!["attacks[0].total", "attack_sum"]);
}

#[rstest]
fn given_cyclic_formula_when_added_then_rejected_and_registry_unchanged(mut sheet: Form) {
    let registry_len = sheet.registry().len();
    let edges = sheet.graph().edge_count();
    let err = sheet
        .add_field("", "loop", NodeKind::Field, Some("sum /loop 1"))
        .unwrap_err();
    assert!(err.to_string().contains("cycle"));
    assert_eq!(sheet.registry().len(), registry_len);
    assert_eq!(sheet.graph().edge_count(), edges);
    assert!(sheet.resolve("loop").is_err());
}

#[rstest]
fn given_override_when_upstream_changes_then_dependents_keep_override(mut sheet: Form) {
    sheet.set_value("str_mod", Value::Int(10)).unwrap();
    assert_eq!(value_at(&sheet, "attacks[0].total"), Some(Value::Int(12)));

    sheet.set_value("str", Value::Int(20)).unwrap();
    assert_eq!(value_at(&sheet, "str_mod"), Some(Value::Int(10)));
    assert_eq!(value_at(&sheet, "attacks[0].total"), Some(Value::Int(12)));

    sheet.clear_override("str_mod").unwrap();
    assert_eq!(value_at(&sheet, "str_mod"), Some(Value::Int(5)));
    assert_eq!(value_at(&sheet, "attacks[0].total"), Some(Value::Int(7)));
}

#[rstest]
#[case(CacheRefresh::Incremental)]
#[case(CacheRefresh::FromScratch)]
fn given_cache_refresh_mode_when_editing_then_same_results(#[case] mode: CacheRefresh) {
    let settings = Settings {
        cache_refresh: mode,
        ..Default::default()
    };
    let mut form = load(&settings);
    form.push_element("attacks").unwrap();
    form.set_value("attacks[2].bonus", Value::Int(1)).unwrap();
    form.remove_element("attacks", 0).unwrap();
    assert_eq!(value_at(&form, "attacks[0].total"), Some(Value::Int(7)));
    assert_eq!(value_at(&form, "attacks[1].total"), Some(Value::Int(3)));
    assert_eq!(value_at(&form, "attack_sum"), Some(Value::Int(10)));
}

#[rstest]
fn given_form_when_export_graph_then_edges_listed(mut sheet: Form) {
    let export = sheet.export_graph().unwrap();
    let lines: Vec<&str> = export.lines().collect();
    assert!(lines.contains(&"str -> str_mod"));
    assert!(lines.contains(&"str_mod -> attacks[0].total"));
    assert!(lines.contains(&"attacks[1].total -> attack_sum"));
    assert!(!export.contains("[-1]"));
}
