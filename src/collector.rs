//! Turns the raw journal into a categorized, collapsed [`ChangeBatch`].

use std::{
    sync::Arc,
    time::{Duration, Instant},
};

use crate::{
    category::{Category, CategoryClassifier},
    change_batch::{CategoryChanges, ChangeBatch},
    content::{ChangeEvent, EventType},
    error::ConfigError,
    model::ConfigurationModel,
    path::NodePath,
    path_pattern::PatternSet,
};

/// Subtrees that never hold anything worth exporting. Node type changes below
/// `/jcr:system` are picked up before this list is consulted.
pub const BUILTIN_IGNORED: [&str; 5] = [
    "/jcr:system",
    "/hcm:hcm",
    "/content/attic",
    "/formdata",
    "/log",
];

/// Events carrying this user data were caused by ourselves, or by someone
/// asking not to be exported.
pub const DEFAULT_IGNORE_USER_DATA: &str = "autoexport:ignore";

const NODE_TYPES_ROOT: [&str; 2] = ["jcr:system", "jcr:nodeTypes"];

pub struct ChangeCollector {
    ignored: PatternSet,
    ignore_user_data: Option<String>,
    classifier: Arc<dyn CategoryClassifier + Send + Sync>,
    batch: Option<ChangeBatch>,
}

impl ChangeCollector {
    pub fn new(
        exclude: &PatternSet,
        ignore_user_data: Option<String>,
        classifier: Arc<dyn CategoryClassifier + Send + Sync>,
    ) -> Result<Self, ConfigError> {
        let mut ignored = PatternSet::from_patterns(BUILTIN_IGNORED)?;
        ignored.extend(exclude);

        Ok(Self {
            ignored,
            ignore_user_data,
            classifier,
            batch: None,
        })
    }

    pub fn batch(&self) -> Option<&ChangeBatch> {
        self.batch.as_ref()
    }

    pub fn has_changes(&self) -> bool {
        self.batch
            .as_ref()
            .map(|batch| !batch.is_empty())
            .unwrap_or(false)
    }

    /// Whether the batch has been quiet long enough to be processed.
    pub fn is_ready(&self, now: Instant, min_quiescence: Duration) -> bool {
        match &self.batch {
            Some(batch) => !batch.is_empty() && batch.age(now) >= min_quiescence,
            None => false,
        }
    }

    pub fn take_batch(&mut self) -> Option<ChangeBatch> {
        self.batch.take()
    }

    pub fn collect(&mut self, event: &ChangeEvent, model: &ConfigurationModel, now: Instant) {
        log::trace!(
            "Journal event {}: {:?} {}",
            event.revision,
            event.event_type,
            event.path
        );

        if let (Some(ignored), Some(user_data)) = (&self.ignore_user_data, &event.user_data) {
            if ignored == user_data {
                log::trace!("Skipping event {} by user data", event.revision);
                return;
            }
        }

        if let Some(prefix) = node_type_prefix(&event.path) {
            self.batch_mut(now).namespaces.insert(prefix);
            return;
        }

        if self.ignored.matches_self_or_ancestor(&event.path) {
            return;
        }

        match event.event_type {
            EventType::NodeAdd => {
                let category = self.classifier.classify(&event.path, false, model);
                self.record(now, category, |changes, path| changes.add_added(path), &event.path);
            }
            EventType::NodeDelete => {
                let category = self.classifier.classify(&event.path, false, model);
                self.record(now, category, |changes, path| changes.add_deleted(path), &event.path);

                // Content below a deleted config node goes with it, without
                // any events of its own.
                if category == Category::Config {
                    let roots: Vec<NodePath> = model
                        .content_entries()
                        .iter()
                        .filter(|entry| entry.root.is_descendant_of(&event.path))
                        .map(|entry| entry.root.clone())
                        .collect();

                    for root in roots {
                        let content = &mut self.batch_mut(now).content;
                        if !content.deleted().matches(&root) {
                            content.add_deleted(root);
                        }
                    }
                }
            }
            EventType::NodeMove => {
                // Content is regenerated from the moved node itself, config
                // order is merged on the parent.
                let category = self.classifier.classify(&event.path, false, model);
                if category == Category::Content {
                    self.record(now, category, |changes, path| changes.add_changed(path), &event.path);
                    return;
                }

                let Some(parent) = event.path.parent() else {
                    return;
                };

                let category = self.classifier.classify(&parent, false, model);
                self.record(now, category, |changes, path| changes.add_changed(path), &parent);
            }
            EventType::PropAdd | EventType::PropChange | EventType::PropDelete => {
                let Some(node) = event.path.parent() else {
                    return;
                };

                let category = self.classifier.classify(&event.path, true, model);
                self.record(now, category, |changes, path| changes.add_changed(path), &node);
            }
        }
    }

    fn batch_mut(&mut self, now: Instant) -> &mut ChangeBatch {
        self.batch.get_or_insert_with(|| {
            log::trace!("Starting a new change batch");
            ChangeBatch::new(now)
        })
    }

    fn record(
        &mut self,
        now: Instant,
        category: Category,
        apply: impl FnOnce(&mut CategoryChanges, NodePath),
        path: &NodePath,
    ) {
        if category == Category::System {
            log::trace!("Skipping system path {}", path);
            return;
        }

        if let Some(changes) = self.batch_mut(now).changes_mut(category) {
            apply(changes, path.clone());
        }
    }
}

/// The namespace prefix of a node type path like
/// `/jcr:system/jcr:nodeTypes/myns:document`.
fn node_type_prefix(path: &NodePath) -> Option<String> {
    let segments = path.segments();

    if segments.len() < 3
        || segments[0].name() != NODE_TYPES_ROOT[0]
        || segments[1].name() != NODE_TYPES_ROOT[1]
    {
        return None;
    }

    segments[2]
        .name()
        .split_once(':')
        .map(|(prefix, _)| prefix.to_owned())
}

#[cfg(test)]
mod test {
    use super::*;

    use maplit::btreeset;

    use crate::{
        category::ModelCategoryClassifier,
        model::{
            ConfigDefinition, ConfigSource, Definition, DefinitionNode, Module, PropertyValue,
        },
    };

    fn path(source: &str) -> NodePath {
        NodePath::parse(source).unwrap()
    }

    fn event(revision: u64, source: &str, event_type: EventType) -> ChangeEvent {
        ChangeEvent {
            revision,
            path: path(source),
            event_type,
            user_data: None,
        }
    }

    fn collector() -> ChangeCollector {
        ChangeCollector::new(
            &PatternSet::from_patterns(["/tmp"]).unwrap(),
            Some(DEFAULT_IGNORE_USER_DATA.to_owned()),
            Arc::new(ModelCategoryClassifier::default()),
        )
        .unwrap()
    }

    fn model() -> ConfigurationModel {
        let mut content = DefinitionNode::new(path("/content"));
        content.set_value("jcr:primaryType", PropertyValue::single("nt:unstructured"));
        content.residual_child_category = Some(Category::Content);

        let mut config = DefinitionNode::new(path("/config"));
        config.set_value("jcr:primaryType", PropertyValue::single("nt:unstructured"));

        let mut module = Module::exported("site", "site");
        module.config_sources.push(ConfigSource::new(
            "main.json",
            vec![
                Definition::Config(ConfigDefinition::new(config)),
                Definition::Config(ConfigDefinition::new(content)),
            ],
        ));
        module.add_content_source(
            "content/news.json",
            DefinitionNode::new(path("/content/news")),
        );

        ConfigurationModel::build(vec![module]).unwrap()
    }

    fn members(set: &crate::path_set::PathSet) -> std::collections::BTreeSet<NodePath> {
        set.iter().cloned().collect()
    }

    #[test]
    fn categorizes_events() {
        let model = model();
        let mut collector = collector();
        let now = Instant::now();

        collector.collect(&event(1, "/config/a", EventType::NodeAdd), &model, now);
        collector.collect(&event(2, "/config/title", EventType::PropChange), &model, now);
        collector.collect(&event(3, "/content/news/a", EventType::NodeAdd), &model, now);
        collector.collect(&event(4, "/content/news/title", EventType::PropAdd), &model, now);

        let batch = collector.batch().unwrap();
        assert_eq!(members(batch.config.added()), btreeset! {path("/config/a")});
        assert_eq!(members(batch.config.changed()), btreeset! {path("/config")});
        assert_eq!(members(batch.content.added()), btreeset! {path("/content/news/a")});
        assert_eq!(members(batch.content.changed()), btreeset! {path("/content/news")});
    }

    #[test]
    fn skips_ignored_events() {
        let model = model();
        let mut collector = collector();
        let now = Instant::now();

        collector.collect(&event(1, "/tmp/x", EventType::NodeAdd), &model, now);
        collector.collect(&event(2, "/jcr:system/jcr:versionStorage/a", EventType::NodeAdd), &model, now);
        collector.collect(&event(3, "/config/jcr:uuid", EventType::PropChange), &model, now);

        let mut ignored = event(4, "/config/b", EventType::NodeAdd);
        ignored.user_data = Some(DEFAULT_IGNORE_USER_DATA.to_owned());
        collector.collect(&ignored, &model, now);

        assert!(!collector.has_changes());
    }

    #[test]
    fn node_types_record_namespaces() {
        let model = model();
        let mut collector = collector();

        collector.collect(
            &event(1, "/jcr:system/jcr:nodeTypes/myns:document", EventType::NodeAdd),
            &model,
            Instant::now(),
        );

        assert_eq!(
            collector.batch().unwrap().namespaces,
            btreeset! {"myns".to_owned()}
        );
    }

    #[test]
    fn moves_change_the_parent() {
        let model = model();
        let mut collector = collector();

        collector.collect(&event(1, "/config/a", EventType::NodeMove), &model, Instant::now());

        let batch = collector.batch().unwrap();
        assert_eq!(members(batch.config.changed()), btreeset! {path("/config")});
    }

    #[test]
    fn content_moves_change_the_node() {
        let model = model();
        let mut collector = collector();

        collector.collect(&event(1, "/content/news/a", EventType::NodeMove), &model, Instant::now());

        let batch = collector.batch().unwrap();
        assert_eq!(members(batch.content.changed()), btreeset! {path("/content/news/a")});
        assert!(batch.config.changed().is_empty());
    }

    #[test]
    fn config_delete_carries_content() {
        let model = model();
        let mut collector = collector();

        collector.collect(&event(1, "/content", EventType::NodeDelete), &model, Instant::now());

        let batch = collector.batch().unwrap();
        assert_eq!(members(batch.config.deleted()), btreeset! {path("/content")});
        assert_eq!(members(batch.content.deleted()), btreeset! {path("/content/news")});
    }

    #[test]
    fn readiness_waits_for_quiescence() {
        let model = model();
        let mut collector = collector();
        let start = Instant::now();
        let window = Duration::from_millis(250);

        assert!(!collector.is_ready(start, window));

        collector.collect(&event(1, "/config/a", EventType::NodeAdd), &model, start);
        assert!(!collector.is_ready(start + Duration::from_millis(100), window));
        assert!(collector.is_ready(start + Duration::from_millis(250), window));

        assert!(collector.take_batch().is_some());
        assert!(!collector.has_changes());
    }
}
