use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use autoexport::{
    content::{ContentTree, MemoryContentTree},
    cursor::STATE_FILE_NAME,
    model::{
        ConfigDefinition, ConfigSource, Definition, DefinitionNode, PropertyValue, Value,
        PRIMARY_TYPE,
    },
    Category, ConfigurationModel, ExportConfig, ExportService, ExportStatus, ExportTask, Module,
    ModuleWriter, NodePath, TreeExporter,
};
use memofs::Vfs;
use tempfile::TempDir;

pub const CONFIG: &str = r#"{
    "modules": { "/": "site", "/content": "content" },
    "minQuiescenceMs": 0
}"#;

pub fn path(source: &str) -> NodePath {
    NodePath::parse(source).unwrap()
}

pub fn node(source: &str, title: &str) -> DefinitionNode {
    let mut node = DefinitionNode::new(path(source));
    node.set_value(
        PRIMARY_TYPE,
        PropertyValue::single(Value::Name("nt:unstructured".to_owned())),
    );
    node.set_value("title", PropertyValue::single(title));
    node
}

pub fn config(root: DefinitionNode) -> Definition {
    Definition::Config(ConfigDefinition::new(root))
}

/// Upstream definitions for `/config`, its children `up` and `list`, and the
/// content root `/content`.
pub fn base_module() -> Module {
    let mut list = node("/config/list", "list");
    for name in ["a", "b", "c"] {
        list.nodes.push(node(&format!("/config/list/{}", name), name));
    }

    let mut config_node = node("/config", "base");
    config_node.nodes.push(node("/config/up", "up"));
    config_node.nodes.push(list);

    let mut content = node("/content", "content");
    content.residual_child_category = Some(Category::Content);

    let mut module = Module::new("base");
    module.config_sources.push(ConfigSource::new(
        "base.json",
        vec![config(config_node), config(content)],
    ));
    module
}

pub fn site_module() -> Module {
    let mut module = Module::exported("site", "site");
    module.config_sources.push(ConfigSource::new(
        "config.json",
        vec![config(node("/config/local", "local"))],
    ));
    module
        .config_sources
        .push(ConfigSource::new("other.json", vec![config(node("/other", "other"))]));
    module.add_content_source("content/news.json", node("/content/news", "news"));
    module
}

pub fn content_module() -> Module {
    Module::exported("content", "content-module")
}

pub struct Scenario {
    _dir: TempDir,
    pub root: PathBuf,
    pub tree: Arc<MemoryContentTree>,
    pub service: ExportService,
}

impl Scenario {
    pub fn new() -> Self {
        Self::with_modules(vec![base_module(), site_module(), content_module()], CONFIG)
    }

    /// Sets up a live tree matching `modules`, their files on disk, and a
    /// service that has already seen every event so far.
    pub fn with_modules(modules: Vec<Module>, config: &str) -> Self {
        let _ = env_logger::builder().is_test(true).try_init();

        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().to_owned();

        let baseline = ConfigurationModel::build(modules).unwrap();

        let tree = Arc::new(MemoryContentTree::new());
        tree.load_model(&baseline).unwrap();

        let vfs = Vfs::new_default();
        vfs.set_watch_enabled(false);
        ModuleWriter::new(Arc::new(vfs), &root)
            .write(&[], baseline.modules())
            .unwrap();

        fs::write(
            root.join(STATE_FILE_NAME),
            format!(r#"{{"lastRevision":{}}}"#, tree.journal().last_revision()),
        )
        .unwrap();

        let config = ExportConfig::load_from_slice(config.as_bytes()).unwrap();
        let service = ExportService::new(
            config,
            Arc::clone(&tree) as Arc<dyn ContentTree + Send + Sync>,
            tree.journal(),
            baseline,
            &root,
        )
        .unwrap();

        Self {
            _dir: dir,
            root,
            tree,
            service,
        }
    }

    /// Hands the service to a background task.
    pub fn start_task(self, enabled: bool) -> RunningScenario {
        RunningScenario {
            _dir: self._dir,
            root: self.root,
            tree: self.tree,
            task: ExportTask::start(self.service, enabled),
        }
    }

    pub fn export(&mut self) {
        assert_eq!(self.service.run_now(), ExportStatus::Idle);
    }

    /// Every module file, by path relative to the project root.
    pub fn files(&self) -> BTreeMap<String, String> {
        let mut files = BTreeMap::new();
        collect_files(&self.root, &self.root, &mut files);
        files.remove(STATE_FILE_NAME);
        files
    }

    pub fn config_source(&self, module_dir: &str, source: &str) -> Option<Vec<Definition>> {
        let file = self.root.join(module_dir).join("config").join(source);
        let contents = fs::read(file).ok()?;
        Some(serde_json::from_slice(&contents).unwrap())
    }

    pub fn content_source(&self, module_dir: &str, source: &str) -> Option<DefinitionNode> {
        let file = self.root.join(module_dir).join("content").join(source);
        let contents = fs::read(file).ok()?;
        Some(serde_json::from_slice(&contents).unwrap())
    }

    /// Asserts that the committed definitions describe the live tree below
    /// `source` exactly.
    pub fn assert_round_trip(&self, source: &str) {
        let baseline = self.service.baseline();
        let config = self.service.config();
        let exporter =
            TreeExporter::new(&*self.tree, &baseline, &config.classifier, &config.excluded);

        let diff = exporter.export_delta(&path(source)).unwrap();
        assert!(
            diff.as_ref().map_or(true, |diff| diff.is_empty()),
            "expected no differences below {}, got {:#?}",
            source,
            diff
        );
    }
}

pub struct RunningScenario {
    _dir: TempDir,
    pub root: PathBuf,
    pub tree: Arc<MemoryContentTree>,
    pub task: ExportTask,
}

fn collect_files(root: &Path, dir: &Path, files: &mut BTreeMap<String, String>) {
    for entry in fs::read_dir(dir).unwrap() {
        let entry = entry.unwrap();
        let entry_path = entry.path();

        if entry_path.is_dir() {
            collect_files(root, &entry_path, files);
        } else {
            let relative = entry_path
                .strip_prefix(root)
                .unwrap()
                .to_string_lossy()
                .replace('\\', "/");
            files.insert(relative, fs::read_to_string(&entry_path).unwrap());
        }
    }
}

/// Roots of the config definitions in a list of definitions.
pub fn roots(definitions: &[Definition]) -> Vec<NodePath> {
    definitions
        .iter()
        .filter_map(Definition::as_config)
        .map(|definition| definition.root.path.clone())
        .collect()
}

pub fn find<'d>(definitions: &'d [Definition], root: &str) -> &'d DefinitionNode {
    let root = path(root);

    definitions
        .iter()
        .filter_map(Definition::as_config)
        .map(|definition| &definition.root)
        .find(|node| node.path == root)
        .unwrap_or_else(|| panic!("no definition rooted at {}", root))
}
