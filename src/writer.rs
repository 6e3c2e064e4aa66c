//! Writes merged modules back to their files.

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use memofs::{IoResultExt, Vfs};

use crate::{
    error::ExportError,
    model::{ConfigSource, ContentSource, Module},
};

const CONFIG_DIR: &str = "config";
const CONTENT_DIR: &str = "content";

/// Turns sources into file contents.
pub trait ModuleSerializer: Send + Sync {
    fn serialize_config(&self, source: &ConfigSource) -> anyhow::Result<Vec<u8>>;

    fn serialize_content(&self, source: &ContentSource) -> anyhow::Result<Vec<u8>>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSerializer;

impl JsonSerializer {
    fn to_json<T: serde::Serialize>(value: &T) -> anyhow::Result<Vec<u8>> {
        let mut contents = serde_json::to_vec_pretty(value)?;
        contents.push(b'\n');
        Ok(contents)
    }
}

impl ModuleSerializer for JsonSerializer {
    fn serialize_config(&self, source: &ConfigSource) -> anyhow::Result<Vec<u8>> {
        Self::to_json(&source.definitions)
    }

    fn serialize_content(&self, source: &ContentSource) -> anyhow::Result<Vec<u8>> {
        Self::to_json(&source.definition.root)
    }
}

/// The files touched by one write.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WriteReport {
    pub written: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
}

impl WriteReport {
    pub fn is_empty(&self) -> bool {
        self.written.is_empty() && self.removed.is_empty()
    }
}

/// Serialized sources of one module directory, keyed by path relative to it.
type Files = HashMap<String, Vec<u8>>;

pub struct ModuleWriter {
    vfs: Arc<Vfs>,
    root: PathBuf,
    serializer: Box<dyn ModuleSerializer>,
}

impl ModuleWriter {
    pub fn new(vfs: Arc<Vfs>, root: impl Into<PathBuf>) -> Self {
        Self::with_serializer(vfs, root, Box::new(JsonSerializer))
    }

    pub fn with_serializer(
        vfs: Arc<Vfs>,
        root: impl Into<PathBuf>,
        serializer: Box<dyn ModuleSerializer>,
    ) -> Self {
        Self {
            vfs,
            root: root.into(),
            serializer,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Writes every source of `new` whose serialized form differs from the
    /// one in `old`, and removes the files of sources that are gone.
    ///
    /// Every module is serialized before the first file is touched.
    pub fn write(&self, old: &[Module], new: &[Module]) -> Result<WriteReport, ExportError> {
        let mut plan: Vec<(PathBuf, Files, Files)> = Vec::new();

        for module in new {
            let Some(mvn_path) = &module.mvn_path else {
                continue;
            };
            let previous = old.iter().find(|candidate| candidate.name == module.name);

            let (config, content) = self.serialize(module)?;
            let (old_config, old_content) = match previous {
                Some(previous) => self.serialize(previous)?,
                None => Default::default(),
            };

            let module_root = self.root.join(mvn_path);
            plan.push((module_root.join(CONFIG_DIR), old_config, config));
            plan.push((module_root.join(CONTENT_DIR), old_content, content));
        }

        for module in old {
            let Some(mvn_path) = &module.mvn_path else {
                continue;
            };
            if new.iter().any(|candidate| candidate.name == module.name) {
                continue;
            }

            let (config, content) = self.serialize(module)?;
            let module_root = self.root.join(mvn_path);
            plan.push((module_root.join(CONFIG_DIR), config, Files::new()));
            plan.push((module_root.join(CONTENT_DIR), content, Files::new()));
        }

        let mut report = WriteReport::default();
        for (base, old_files, new_files) in &plan {
            self.sync_dir(base, old_files, new_files, &mut report)?;
        }

        Ok(report)
    }

    fn serialize(&self, module: &Module) -> Result<(Files, Files), ExportError> {
        let failed = |source_path: &str, source: anyhow::Error| ExportError::Serialize {
            module: module.name.clone(),
            source_path: source_path.to_owned(),
            source,
        };

        let mut config = Files::new();
        for source in &module.config_sources {
            let contents = self
                .serializer
                .serialize_config(source)
                .map_err(|err| failed(&source.path, err))?;
            config.insert(source.path.clone(), contents);
        }

        let mut content = Files::new();
        for source in &module.content_sources {
            let contents = self
                .serializer
                .serialize_content(source)
                .map_err(|err| failed(&source.path, err))?;
            content.insert(source.path.clone(), contents);
        }

        Ok((config, content))
    }

    fn sync_dir(
        &self,
        base: &Path,
        old: &Files,
        new: &Files,
        report: &mut WriteReport,
    ) -> Result<(), ExportError> {
        let mut written: Vec<&String> = new
            .iter()
            .filter(|(path, contents)| old.get(*path) != Some(*contents))
            .map(|(path, _)| path)
            .collect();
        written.sort();

        for path in written {
            let file = base.join(path);
            log::debug!("Writing {}", file.display());

            if let Some(parent) = file.parent() {
                self.vfs.create_dir_all(parent)?;
            }
            self.vfs.write(&file, &new[path])?;
            report.written.push(file);
        }

        let mut removed: Vec<&String> = old.keys().filter(|path| !new.contains_key(*path)).collect();
        removed.sort();

        for path in removed {
            let file = base.join(path);
            log::debug!("Removing {}", file.display());

            if self.vfs.remove_file(&file).with_not_found()?.is_some() {
                report.removed.push(file.clone());
            }
            self.prune(base, &file)?;
        }

        Ok(())
    }

    /// Removes the directories above `file` that became empty, stopping at
    /// `base`.
    fn prune(&self, base: &Path, file: &Path) -> Result<(), ExportError> {
        let mut current = file.parent();

        while let Some(dir) = current {
            if dir == base || !dir.starts_with(base) {
                break;
            }

            let Some(mut entries) = self.vfs.read_dir(dir).with_not_found()? else {
                break;
            };
            if entries.next().is_some() {
                break;
            }

            log::trace!("Removing empty directory {}", dir.display());
            self.vfs.remove_dir_all(dir)?;
            current = dir.parent();
        }

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    use std::fs;

    use crate::{
        model::{ConfigDefinition, Definition, DefinitionNode, PropertyValue, PRIMARY_TYPE},
        path::NodePath,
    };

    fn path(source: &str) -> NodePath {
        NodePath::parse(source).unwrap()
    }

    fn definition(node_path: &str, title: &str) -> Definition {
        let mut root = DefinitionNode::new(path(node_path));
        root.set_value(PRIMARY_TYPE, PropertyValue::single("nt:unstructured"));
        root.set_value("title", PropertyValue::single(title));

        Definition::Config(ConfigDefinition::new(root))
    }

    fn writer(dir: &Path) -> ModuleWriter {
        let vfs = Vfs::new_default();
        vfs.set_watch_enabled(false);

        ModuleWriter::new(Arc::new(vfs), dir)
    }

    fn module() -> Module {
        let mut module = Module::exported("site", "site");
        module.config_sources.push(ConfigSource::new(
            "main.json",
            vec![definition("/config", "hello")],
        ));
        module.config_sources.push(ConfigSource::new(
            "nested/deep/other.json",
            vec![definition("/other", "other")],
        ));
        module.add_content_source("news.json", DefinitionNode::new(path("/content/news")));
        module
    }

    #[test]
    fn writes_new_modules() {
        let dir = tempfile::tempdir().unwrap();
        let writer = writer(dir.path());

        let report = writer.write(&[], &[module()]).unwrap();
        assert_eq!(report.written.len(), 3);
        assert!(report.removed.is_empty());

        let main = fs::read(dir.path().join("site/config/main.json")).unwrap();
        let definitions: Vec<Definition> = serde_json::from_slice(&main).unwrap();
        assert_eq!(definitions.len(), 1);
        assert_eq!(
            definitions[0].as_config().unwrap().root.path,
            path("/config")
        );

        assert!(dir.path().join("site/config/nested/deep/other.json").is_file());
        assert!(dir.path().join("site/content/news.json").is_file());
    }

    #[test]
    fn unchanged_sources_are_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let writer = writer(dir.path());

        let old = vec![module()];
        writer.write(&[], &old).unwrap();

        let mut new = old.clone();
        if let Definition::Config(config) = &mut new[0].config_sources[0].definitions[0] {
            config.root.set_value("title", PropertyValue::single("changed"));
        }

        assert!(writer.write(&old, &old).unwrap().is_empty());

        let report = writer.write(&old, &new).unwrap();
        assert_eq!(report.written, vec![dir.path().join("site/config/main.json")]);

        let main = fs::read_to_string(dir.path().join("site/config/main.json")).unwrap();
        assert!(main.contains("changed"));
    }

    #[test]
    fn removed_sources_prune_directories() {
        let dir = tempfile::tempdir().unwrap();
        let writer = writer(dir.path());

        let old = vec![module()];
        writer.write(&[], &old).unwrap();

        let mut new = old.clone();
        new[0].config_sources.retain(|source| source.path == "main.json");

        let report = writer.write(&old, &new).unwrap();
        assert!(report.written.is_empty());
        assert_eq!(
            report.removed,
            vec![dir.path().join("site/config/nested/deep/other.json")]
        );

        assert!(!dir.path().join("site/config/nested").exists());
        assert!(dir.path().join("site/config").is_dir());
        assert!(dir.path().join("site/config/main.json").is_file());
    }

    /// Refuses any source called `broken.json`.
    struct PickySerializer;

    impl ModuleSerializer for PickySerializer {
        fn serialize_config(&self, source: &ConfigSource) -> anyhow::Result<Vec<u8>> {
            if source.path == "broken.json" {
                anyhow::bail!("cannot serialize {}", source.path);
            }
            JsonSerializer.serialize_config(source)
        }

        fn serialize_content(&self, source: &ContentSource) -> anyhow::Result<Vec<u8>> {
            JsonSerializer.serialize_content(source)
        }
    }

    #[test]
    fn serialization_failures_write_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let vfs = Vfs::new_default();
        vfs.set_watch_enabled(false);
        let writer = ModuleWriter::with_serializer(Arc::new(vfs), dir.path(), Box::new(PickySerializer));

        let mut broken = Module::exported("other", "other");
        broken.config_sources.push(ConfigSource::new(
            "broken.json",
            vec![definition("/broken", "broken")],
        ));

        let err = writer.write(&[], &[module(), broken]).unwrap_err();
        assert!(matches!(err, ExportError::Serialize { .. }));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn upstream_modules_are_never_written() {
        let dir = tempfile::tempdir().unwrap();
        let writer = writer(dir.path());

        let mut upstream = module();
        upstream.mvn_path = None;

        assert!(writer.write(&[], &[upstream]).unwrap().is_empty());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }
}
