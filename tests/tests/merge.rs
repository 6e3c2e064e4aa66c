use autoexport::{
    content::{ContentTree, EventType},
    model::{PropertyOperation, PropertyValue},
    path::Segment,
};

use crate::autoexport_test::scenario::{find, path, roots, Scenario};

#[test]
fn changed_property_touches_one_file() {
    let mut scenario = Scenario::new();
    let before = scenario.files();

    scenario
        .tree
        .set_property(&path("/config/local"), "title", PropertyValue::single("changed"))
        .unwrap();
    scenario.export();

    let after = scenario.files();
    let changed: Vec<&String> = after
        .iter()
        .filter(|(file, contents)| before.get(*file) != Some(*contents))
        .map(|(file, _)| file)
        .collect();
    assert_eq!(changed, vec!["site/config/config.json"]);
    assert_eq!(before.len(), after.len());

    let definitions = scenario.config_source("site", "config.json").unwrap();
    assert_eq!(
        find(&definitions, "/config/local")
            .property("title")
            .and_then(|property| property.value.clone()),
        Some(PropertyValue::single("changed"))
    );
    scenario.assert_round_trip("/config");
}

#[test]
fn replayed_events_change_nothing() {
    let mut scenario = Scenario::new();

    scenario
        .tree
        .set_property(&path("/config/up"), "title", PropertyValue::single("override"))
        .unwrap();
    scenario.tree.add_node(&path("/config/up/extra"), "nt:unstructured").unwrap();
    scenario.export();
    let first = scenario.files();

    // Reprocessing after a crash sees the same events again.
    let journal = scenario.tree.journal();
    journal.push(path("/config/up/title"), EventType::PropChange, None);
    journal.push(path("/config/up/extra"), EventType::NodeAdd, None);
    scenario.export();

    assert_eq!(scenario.files(), first);
    scenario.assert_round_trip("/config");
}

#[test]
fn new_subtree_round_trips() {
    let mut scenario = Scenario::new();

    scenario.tree.add_node(&path("/config/fresh"), "nt:unstructured").unwrap();
    scenario
        .tree
        .set_property(&path("/config/fresh"), "title", PropertyValue::single("fresh"))
        .unwrap();
    scenario
        .tree
        .add_node(&path("/config/fresh/child"), "nt:unstructured")
        .unwrap();
    scenario.export();

    let definitions = scenario.config_source("site", "config.json").unwrap();
    let fresh = find(&definitions, "/config/fresh");
    assert_eq!(fresh.nodes.len(), 1);
    assert_eq!(fresh.nodes[0].path, path("/config/fresh/child"));

    scenario.assert_round_trip("/config");
}

#[test]
fn deleting_upstream_property_records_a_delete() {
    let mut scenario = Scenario::new();

    scenario
        .tree
        .remove_property(&path("/config/up"), "title")
        .unwrap();
    scenario.export();

    let definitions = scenario.config_source("site", "config.json").unwrap();
    let up = find(&definitions, "/config/up");
    assert!(!up.delete);

    let title = up.property("title").unwrap();
    assert_eq!(title.operation, PropertyOperation::Delete);
    assert_eq!(title.value, None);

    assert!(scenario.tree.node_exists(&path("/config/up")).unwrap());
    scenario.assert_round_trip("/config");
}

#[test]
fn deleted_and_recreated_local_node_is_restored() {
    let mut scenario = Scenario::new();
    let original = scenario.files();

    scenario.tree.remove_node(&path("/config/local")).unwrap();
    scenario.export();

    let definitions = scenario.config_source("site", "config.json");
    assert!(
        definitions.map_or(true, |definitions| roots(&definitions).is_empty()),
        "deleting a node only defined locally leaves no trace"
    );

    scenario.tree.add_node(&path("/config/local"), "nt:unstructured").unwrap();
    scenario
        .tree
        .set_property(&path("/config/local"), "title", PropertyValue::single("local"))
        .unwrap();
    scenario.export();

    assert_eq!(scenario.files(), original);
    scenario.assert_round_trip("/config");
}

#[test]
fn deleted_and_recreated_upstream_node_drops_the_stub() {
    let mut scenario = Scenario::new();
    let original = scenario.files();

    scenario.tree.remove_node(&path("/config/up")).unwrap();
    scenario.export();

    let definitions = scenario.config_source("site", "config.json").unwrap();
    assert!(find(&definitions, "/config/up").delete);

    scenario.tree.add_node(&path("/config/up"), "nt:unstructured").unwrap();
    scenario
        .tree
        .set_property(&path("/config/up"), "title", PropertyValue::single("up"))
        .unwrap();
    scenario
        .tree
        .order_before(&path("/config/up"), Some("list"))
        .unwrap();
    scenario.export();

    assert_eq!(scenario.files(), original);
    scenario.assert_round_trip("/config");
}

#[test]
fn delete_and_recreate_in_one_batch_is_a_no_op() {
    let mut scenario = Scenario::new();
    let original = scenario.files();

    scenario.tree.remove_node(&path("/config/up")).unwrap();
    scenario.tree.add_node(&path("/config/up"), "nt:unstructured").unwrap();
    scenario
        .tree
        .set_property(&path("/config/up"), "title", PropertyValue::single("up"))
        .unwrap();
    scenario
        .tree
        .order_before(&path("/config/up"), Some("list"))
        .unwrap();
    scenario.export();

    assert_eq!(scenario.files(), original);
}

#[test]
fn reordered_upstream_children_get_a_hint() {
    let mut scenario = Scenario::new();

    scenario
        .tree
        .order_before(&path("/config/list/b"), Some("a"))
        .unwrap();
    scenario.export();

    assert_eq!(
        scenario.service.baseline().child_order(&path("/config/list")),
        vec![Segment::new("b"), Segment::new("a"), Segment::new("c")]
    );
    scenario.assert_round_trip("/config/list");

    let definitions = scenario.config_source("site", "config.json").unwrap();
    let hinted = definitions
        .iter()
        .filter_map(|definition| definition.as_config())
        .any(|definition| {
            let mut found = false;
            definition.root.walk(&mut |node| found |= node.order_before.is_some());
            found
        });
    assert!(hinted, "expected an order hint in {:#?}", definitions);
}

#[test]
fn reordering_back_drops_the_earlier_hint() {
    let mut scenario = Scenario::new();
    let original = scenario.files();

    scenario
        .tree
        .order_before(&path("/config/list/b"), Some("a"))
        .unwrap();
    scenario.export();

    scenario
        .tree
        .order_before(&path("/config/list/a"), Some("b"))
        .unwrap();
    scenario.export();

    assert_eq!(
        scenario.service.baseline().child_order(&path("/config/list")),
        vec![Segment::new("a"), Segment::new("b"), Segment::new("c")]
    );
    assert_eq!(scenario.files(), original);
    scenario.assert_round_trip("/config/list");
}

#[test]
fn second_reorder_replaces_the_first() {
    let mut scenario = Scenario::new();

    scenario
        .tree
        .order_before(&path("/config/list/b"), Some("a"))
        .unwrap();
    scenario.export();

    scenario.tree.order_before(&path("/config/list/b"), None).unwrap();
    scenario
        .tree
        .order_before(&path("/config/list/c"), Some("a"))
        .unwrap();
    scenario.export();

    assert_eq!(
        scenario.tree.get_node(&path("/config/list")).unwrap().unwrap().children,
        vec![Segment::new("c"), Segment::new("a"), Segment::new("b")]
    );
    assert_eq!(
        scenario.service.baseline().child_order(&path("/config/list")),
        vec![Segment::new("c"), Segment::new("a"), Segment::new("b")]
    );
    scenario.assert_round_trip("/config/list");
}

#[test]
fn new_content_goes_to_the_module_owning_content() {
    let mut scenario = Scenario::new();

    scenario.tree.add_node(&path("/content/x"), "nt:unstructured").unwrap();
    scenario
        .tree
        .set_property(&path("/content/x"), "title", PropertyValue::single("x"))
        .unwrap();
    scenario.export();

    let exported = scenario
        .content_source("content-module", "content/x.json")
        .unwrap();
    assert_eq!(exported.path, path("/content/x"));
    assert_eq!(
        exported
            .property("title")
            .and_then(|property| property.value.clone()),
        Some(PropertyValue::single("x"))
    );
    assert_eq!(
        exported.property("title").map(|property| property.operation),
        Some(PropertyOperation::Replace)
    );

    assert!(scenario.content_source("site", "content/x.json").is_none());
}

#[test]
fn content_edits_regenerate_their_source() {
    let mut scenario = Scenario::new();

    scenario
        .tree
        .add_node(&path("/content/news/item"), "nt:unstructured")
        .unwrap();
    scenario
        .tree
        .set_property(&path("/content/news"), "title", PropertyValue::single("latest"))
        .unwrap();
    scenario.export();

    let news = scenario.content_source("site", "content/news.json").unwrap();
    assert_eq!(
        news.property("title").and_then(|property| property.value.clone()),
        Some(PropertyValue::single("latest"))
    );
    assert_eq!(news.nodes.len(), 1);
    assert_eq!(news.nodes[0].path, path("/content/news/item"));

    scenario.tree.remove_node(&path("/content/news")).unwrap();
    scenario.export();

    assert!(scenario.content_source("site", "content/news.json").is_none());
    assert!(!scenario.root.join("site/content/content").exists());
    assert!(scenario.root.join("site/content").is_dir());
}

#[test]
fn registered_namespace_is_exported() {
    let mut scenario = Scenario::new();

    scenario
        .tree
        .register_node_type("acme", "http://acme.example/1.0", "doc", "[acme:doc] > nt:base")
        .unwrap();
    scenario.export();

    let definitions = scenario.config_source("site", "namespaces.json").unwrap();
    let namespace = definitions
        .iter()
        .find_map(|definition| match definition {
            autoexport::model::Definition::Namespace(namespace) => Some(namespace),
            _ => None,
        })
        .unwrap();

    assert_eq!(namespace.prefix, "acme");
    assert_eq!(namespace.uri, "http://acme.example/1.0");
    assert_eq!(namespace.cnd.as_deref(), Some("[acme:doc] > nt:base"));
}
