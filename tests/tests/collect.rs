use std::{collections::BTreeSet, sync::Arc, time::Instant};

use autoexport::{
    content::{EventJournal, MemoryContentTree},
    model::PropertyValue,
    path_set::PathSet,
    ChangeCollector, ConfigurationModel, ExportConfig, NodePath,
};

use crate::autoexport_test::scenario::{base_module, content_module, path, site_module, CONFIG};

struct Live {
    tree: MemoryContentTree,
    model: ConfigurationModel,
    config: ExportConfig,
    start: u64,
}

fn live() -> Live {
    let model =
        ConfigurationModel::build(vec![base_module(), site_module(), content_module()]).unwrap();
    let tree = MemoryContentTree::new();
    tree.load_model(&model).unwrap();
    let start = tree.journal().last_revision();

    Live {
        tree,
        model,
        config: ExportConfig::load_from_slice(CONFIG.as_bytes()).unwrap(),
        start,
    }
}

impl Live {
    fn collect(&self) -> ChangeCollector {
        let mut collector = ChangeCollector::new(
            &self.config.exclude,
            self.config.ignore_user_data.clone(),
            Arc::new(self.config.classifier.clone()),
        )
        .unwrap();

        let now = Instant::now();
        for event in self.tree.journal().read_events(self.start, 1000).unwrap() {
            collector.collect(&event, &self.model, now);
        }

        collector
    }
}

fn members(set: &PathSet) -> BTreeSet<NodePath> {
    set.iter().cloned().collect()
}

fn paths(sources: &[&str]) -> BTreeSet<NodePath> {
    sources.iter().map(|source| path(source)).collect()
}

#[test]
fn edits_collapse_into_subtrees() {
    let live = live();

    live.tree.add_node(&path("/config/a"), "nt:unstructured").unwrap();
    live.tree.add_node(&path("/config/a/b"), "nt:unstructured").unwrap();
    live.tree
        .set_property(&path("/config/a/b"), "title", PropertyValue::single("b"))
        .unwrap();
    live.tree
        .set_property(&path("/config/local"), "title", PropertyValue::single("edited"))
        .unwrap();
    live.tree
        .set_property(&path("/config/list/a"), "title", PropertyValue::single("gone soon"))
        .unwrap();
    live.tree.remove_node(&path("/config/list")).unwrap();
    live.tree
        .add_node(&path("/content/news/item"), "nt:unstructured")
        .unwrap();

    let collector = live.collect();
    let batch = collector.batch().unwrap();

    assert_eq!(members(batch.config.added()), paths(&["/config/a"]));
    assert_eq!(members(batch.config.changed()), paths(&["/config/local"]));
    assert_eq!(members(batch.config.deleted()), paths(&["/config/list"]));
    assert_eq!(members(batch.content.added()), paths(&["/content/news/item"]));
    assert!(batch.content.changed().is_empty());
}

#[test]
fn deleting_a_config_node_deletes_the_content_below_it() {
    let live = live();

    live.tree.remove_node(&path("/content")).unwrap();

    let collector = live.collect();
    let batch = collector.batch().unwrap();

    assert_eq!(members(batch.config.deleted()), paths(&["/content"]));
    assert_eq!(members(batch.content.deleted()), paths(&["/content/news"]));
}

#[test]
fn own_writes_and_ignored_subtrees_are_skipped() {
    let live = live();

    live.tree.set_user_data(Some("autoexport:ignore"));
    live.tree
        .set_property(&path("/config/local"), "title", PropertyValue::single("quiet"))
        .unwrap();
    live.tree.set_user_data(None);
    live.tree.add_node(&path("/content/attic"), "nt:unstructured").unwrap();
    live.tree
        .add_node(&path("/content/attic/old"), "nt:unstructured")
        .unwrap();

    assert!(!live.collect().has_changes());
}
