// src/core/loader.rs

//! Discovery pass: compiled plugins first, then every manifest found under
//! the entity sources, then exclusions and load conditions.

use crate::constants::{BANNER_EXTENSION, MANIFEST_EXTENSION};
use crate::core::command::CommandClass;
use crate::core::entity::{Descriptor, Entity, EntityBody};
use crate::core::manifest::{ManifestCommand, ManifestModule};
use crate::core::metadata::{DocstringParser, Metadata, MetadataError, OptionDecl};
use crate::core::module::ModuleClass;
use crate::core::registry::EntityRegistry;
use crate::core::requirements::{IssueCategory, RequirementError, Requirements, parse_requirements};
use crate::models::{CommandManifest, DescriptorManifest, EntityManifest, MetadataManifest, ModuleManifest};
use crate::system::paths;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

/// Failures loading entity sources.
#[derive(Error, Debug)]
pub enum LoaderError {
    #[error("Could not read manifest '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid manifest '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("Invalid requirements in '{path}': {source}")]
    Requirements {
        path: PathBuf,
        #[source]
        source: RequirementError,
    },
    #[error("Invalid metadata in '{path}': {source}")]
    Metadata {
        path: PathBuf,
        #[source]
        source: MetadataError,
    },
    #[error("Could not walk '{path}': {source}")]
    Walk {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

/// The folders an application loads from.
#[derive(Debug, Clone, Default)]
pub struct Sources {
    /// Folders holding banner text files.
    pub banners: Vec<PathBuf>,
    /// Folders scanned recursively for entity manifests.
    pub entities: Vec<PathBuf>,
    /// Folders added to the executable search path.
    pub libraries: Vec<PathBuf>,
}

/// A compiled plugin: a function registering its entities.
#[derive(Debug, Clone, Copy)]
pub struct Plugin {
    pub name: &'static str,
    pub register: fn(&mut EntityRegistry),
    /// Part of the base set, skipped when `include_base` is off.
    pub base: bool,
}

/// What to load besides the source folders, and how to filter it.
#[derive(Debug, Clone)]
pub struct LoadOptions {
    /// Load the base plugins.
    pub include_base: bool,
    /// Compiled plugins, registered before the source folders.
    pub plugins: Vec<Plugin>,
    /// Identifiers to unregister after loading, e.g. `command/root/use`.
    pub exclude: Vec<String>,
    /// Parses the free-form descriptions of manifests into metadata.
    pub docstring_parser: Option<DocstringParser>,
    /// Development mode; entities may be conditioned on it.
    pub dev: bool,
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            include_base: true,
            plugins: Vec::new(),
            exclude: Vec::new(),
            docstring_parser: Some(crate::core::metadata::parse_docstring),
            dev: false,
        }
    }
}

/// Counts gathered by [`load`].
#[derive(Debug, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Manifests read, in walk order.
    pub manifests: Vec<PathBuf>,
    /// Entities added to the registry.
    pub registered: usize,
    /// Entities already registered; their requirements were refreshed.
    pub duplicates: usize,
    /// Entities removed by `exclude`.
    pub excluded: usize,
    /// Entities removed because their load condition failed.
    pub conditional: usize,
    pub banners: Vec<PathBuf>,
}

/// Runs the discovery pass over `sources` into `registry`.
///
/// # Errors
/// A malformed manifest aborts the load.
pub fn load(registry: &mut EntityRegistry, sources: &Sources, options: &LoadOptions) -> Result<LoadReport, LoaderError> {
    let mut report = LoadReport::default();

    for plugin in &options.plugins {
        if plugin.base && !options.include_base {
            log::debug!("Skipping base plugin '{}'", plugin.name);
            continue;
        }
        let before = registry.len();
        (plugin.register)(registry);
        report.registered += registry.len().saturating_sub(before);
        log::debug!("Loaded plugin '{}'", plugin.name);
    }

    paths::add_search_paths(sources.libraries.iter().cloned());

    for root in &sources.entities {
        if !root.is_dir() {
            log::warn!("Entity source '{}' does not exist", root.display());
            continue;
        }
        for path in files_with_extension(root, MANIFEST_EXTENSION)? {
            let entities = load_manifest(&path, root, options.docstring_parser)?;
            for entity in entities {
                // A manifest read again refreshes the requirements of what it
                // registered before.
                if let Some(existing) = registry.find(entity.id()) {
                    existing.set_requirements(entity.requirements().clone());
                    report.duplicates += 1;
                    continue;
                }
                if registry.register(entity).is_some() {
                    report.registered += 1;
                }
            }
            report.manifests.push(path);
        }
    }

    for root in &sources.banners {
        if root.is_dir() {
            report.banners.extend(files_with_extension(root, BANNER_EXTENSION)?);
        }
    }

    for identifier in &options.exclude {
        match registry.unregister_by_identifier(identifier) {
            Ok(count) => report.excluded += count,
            Err(e) => log::warn!("{}", e),
        }
    }
    report.conditional = registry.apply_conditions(options);

    log::debug!(
        "Loaded {} entities from {} manifest(s) ({} duplicate, {} excluded)",
        report.registered,
        report.manifests.len(),
        report.duplicates,
        report.excluded
    );
    Ok(report)
}

/// Files under `root` with the given extension, sorted by path.
fn files_with_extension(root: &Path, extension: &str) -> Result<Vec<PathBuf>, LoaderError> {
    let mut files = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|source| LoaderError::Walk {
            path: root.to_path_buf(),
            source,
        })?;
        if entry.file_type().is_file() && entry.path().extension().is_some_and(|e| e == extension) {
            files.push(entry.into_path());
        }
    }
    Ok(files)
}

/// Parses one manifest into entities whose identity uses the normalized path.
pub fn load_manifest(
    path: &Path,
    root: &Path,
    parser: Option<DocstringParser>,
) -> Result<Vec<Entity>, LoaderError> {
    let text = fs::read_to_string(path).map_err(|source| LoaderError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let manifest: EntityManifest = toml::from_str(&text).map_err(|source| LoaderError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    let source = paths::normalize(path);
    let category_path = path
        .parent()
        .and_then(|dir| dir.strip_prefix(root).ok())
        .map(|rel| {
            rel.components()
                .map(|c| c.as_os_str().to_string_lossy().into_owned())
                .collect::<Vec<_>>()
                .join("/")
        })
        .unwrap_or_default();

    let mut entities = Vec::new();
    for command in manifest.commands {
        entities.push(command_entity(&source, command, parser)?);
    }
    for module in manifest.modules {
        entities.push(module_entity(&source, &category_path, module, parser)?);
    }
    for model in manifest.models {
        entities.push(descriptor_entity(&source, model, false));
    }
    for extension in manifest.store_extensions {
        entities.push(descriptor_entity(&source, extension, true));
    }
    Ok(entities)
}

fn metadata(manifest: &MetadataManifest, parser: Option<DocstringParser>) -> Metadata {
    let mut metadata = Metadata {
        description: manifest.description.clone(),
        author: manifest.author.clone(),
        email: manifest.email.clone(),
        version: manifest.version.clone(),
        comments: manifest.comments.clone(),
        ..Metadata::default()
    };
    if let (Some(doc), Some(parse)) = (&manifest.doc, parser) {
        metadata.fill_missing(parse(doc));
    }
    metadata
}

fn requirements(
    path: &Path,
    table: Option<&toml::Table>,
    messages: &std::collections::BTreeMap<String, std::collections::BTreeMap<String, String>>,
) -> Result<Requirements, LoaderError> {
    let invalid = |source| LoaderError::Requirements {
        path: path.to_path_buf(),
        source,
    };
    let mut requirements = match table {
        Some(table) => {
            let json = match serde_json::to_value(table) {
                Ok(serde_json::Value::Object(map)) => map,
                _ => serde_json::Map::new(),
            };
            parse_requirements(&json).map_err(invalid)?
        }
        None => Requirements::default(),
    };
    for (category, templates) in messages {
        let category = IssueCategory::parse(category)
            .ok_or_else(|| invalid(RequirementError::UnknownType(category.clone())))?;
        for (subject, template) in templates {
            requirements = requirements.message(category, subject, template);
        }
    }
    Ok(requirements)
}

fn command_entity(
    source: &Path,
    manifest: CommandManifest,
    parser: Option<DocstringParser>,
) -> Result<Entity, LoaderError> {
    let requirements = requirements(source, manifest.requirements.as_ref(), &manifest.requirements_messages)?;
    let metadata = metadata(&manifest.metadata, parser);

    let params = manifest.params.clone();
    let keys = manifest.keys.clone();
    let values = manifest.values.clone();
    let lines = manifest.run.lines();
    let capture = manifest.capture;
    let mut class = CommandClass::new(&manifest.name, move || {
        Box::new(ManifestCommand::new(&params, keys.clone(), values.clone(), lines.clone(), capture))
    });
    if let Some(levels) = &manifest.level {
        let levels = levels.to_vec();
        let refs: Vec<&str> = levels.iter().map(String::as_str).collect();
        class = class.levels(&refs);
    }
    for alias in &manifest.aliases {
        class = class.alias(alias);
    }
    if manifest.alias_only {
        class = class.alias_only();
    }
    let excepted: Vec<&str> = manifest.except_levels.iter().map(String::as_str).collect();
    class = class.except(&excepted);
    if manifest.single_arg {
        class = class.single_arg();
    }

    let mut entity = Entity::command(source, class)
        .with_metadata(metadata)
        .requires(requirements);
    for rule in &manifest.applies_to {
        entity = entity.applies_to(&rule.path, &rule.value);
    }
    Ok(entity)
}

fn module_entity(
    source: &Path,
    category_path: &str,
    manifest: ModuleManifest,
    parser: Option<DocstringParser>,
) -> Result<Entity, LoaderError> {
    let requirements = requirements(source, manifest.requirements.as_ref(), &manifest.requirements_messages)?;
    let mut metadata = metadata(&manifest.metadata, parser);
    for parts in &manifest.options {
        let parts: Vec<String> = parts
            .iter()
            .map(|v| match v {
                toml::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect();
        let decl = OptionDecl::from_parts(&parts).map_err(|source_err| LoaderError::Metadata {
            path: source.to_path_buf(),
            source: source_err,
        })?;
        metadata.options.push(decl);
    }

    let lines = manifest.run.lines();
    let background = manifest.background;
    let path = manifest.path.as_deref().unwrap_or(category_path);
    let mut class = ModuleClass::new(path, &manifest.name, move || {
        Box::new(ManifestModule::new(lines.clone(), background))
    });
    for decl in &metadata.options {
        class = class.option(decl.clone());
    }
    Ok(Entity::module(source, class)
        .with_metadata(metadata)
        .requires(requirements))
}

fn descriptor_entity(source: &Path, manifest: DescriptorManifest, store_extension: bool) -> Entity {
    let descriptor = Descriptor {
        name: manifest.name,
        fields: manifest.fields,
    };
    let body = if store_extension {
        EntityBody::StoreExtension(descriptor)
    } else {
        EntityBody::Model(descriptor)
    };
    let mut entity = Entity::new(source, body);
    entity.metadata_mut().description = manifest.description;
    entity
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::entity::EntityKind;
    use crate::core::requirements::CheckContext;
    use crate::state::StateStore;
    use std::collections::BTreeMap;
    use tempfile::tempdir;

    const SCANNERS: &str = r#"
        [[module]]
        name = "tcp_connect"
        description = "Connect scan"
        options = [["RHOST", "", true, "Target host"], ["PORTS", "1-1024"]]
        run = "echo {RHOST} {PORTS}"

        [[command]]
        name = "ports"
        level = "module"
        run = "echo ports"
        applies_to = [{ path = "console.module.fullpath", value = "scanners/tcp_connect" }]
    "#;

    fn write(dir: &Path, rel: &str, text: &str) -> PathBuf {
        let path = dir.join(rel);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn test_module_path_follows_folder() {
        let dir = tempdir().unwrap();
        let path = write(dir.path(), "scanners/tcp.toml", SCANNERS);
        let entities = load_manifest(&path, dir.path(), None).unwrap();
        assert_eq!(entities.len(), 2);
        let module = entities[0].as_module().unwrap();
        assert_eq!(module.fullpath(), "scanners/tcp_connect");
        assert_eq!(module.options.len(), 2);
        assert!(module.options[0].required);
        assert_eq!(entities[0].metadata().description.as_deref(), Some("Connect scan"));
        assert_eq!(entities[1].kind(), EntityKind::Command);
    }

    #[test]
    fn test_reload_is_a_no_op() {
        let dir = tempdir().unwrap();
        write(dir.path(), "scanners/tcp.toml", SCANNERS);
        let sources = Sources {
            entities: vec![dir.path().to_path_buf(), dir.path().to_path_buf()],
            ..Sources::default()
        };
        let mut registry = EntityRegistry::new();
        let report = load(&mut registry, &sources, &LoadOptions::default()).unwrap();
        assert_eq!(report.registered, 2);
        assert_eq!(report.duplicates, 2);
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_reload_refreshes_requirements() {
        let dir = tempdir().unwrap();
        let manifest = "[[command]]\nname = \"x\"\nrun = \"true\"\n";
        write(
            dir.path(),
            "misc/x.toml",
            &format!("{manifest}requirements = {{ system = [\"tierkit-missing-tool\"] }}\n"),
        );
        let sources = Sources {
            entities: vec![dir.path().to_path_buf()],
            ..Sources::default()
        };
        let state = StateStore::default();
        let attributes = BTreeMap::new();
        let ctx = CheckContext {
            config: None,
            state: &state,
            attributes: &attributes,
        };

        let mut registry = EntityRegistry::new();
        load(&mut registry, &sources, &LoadOptions::default()).unwrap();
        assert!(!registry.check_all(&ctx));
        let entity = registry.all().next().cloned().unwrap();
        assert!(!entity.is_enabled());

        write(dir.path(), "misc/x.toml", manifest);
        let report = load(&mut registry, &sources, &LoadOptions::default()).unwrap();
        assert_eq!(report.duplicates, 1);
        assert_eq!(registry.len(), 1);
        registry.check_all(&ctx);
        assert!(entity.is_enabled());
    }

    #[test]
    fn test_exclusions() {
        let dir = tempdir().unwrap();
        write(dir.path(), "scanners/tcp.toml", SCANNERS);
        let sources = Sources {
            entities: vec![dir.path().to_path_buf()],
            ..Sources::default()
        };
        let options = LoadOptions {
            exclude: vec!["module/scanners/tcp_connect".into(), "command/module/ports".into()],
            ..LoadOptions::default()
        };
        let mut registry = EntityRegistry::new();
        let report = load(&mut registry, &sources, &options).unwrap();
        assert_eq!(report.excluded, 2);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_docstring_fills_missing_metadata() {
        let dir = tempdir().unwrap();
        let path = write(
            dir.path(),
            "misc/doc.toml",
            "[[command]]\nname = \"hello\"\ndescription = \"Says hello\"\ndoc = \"Ignored text\\n\\nAuthor: Jane\"\nrun = \"echo hello\"\n",
        );
        let entities = load_manifest(&path, dir.path(), Some(crate::core::metadata::parse_docstring)).unwrap();
        let metadata = entities[0].metadata();
        assert_eq!(metadata.description.as_deref(), Some("Says hello"));
        assert_eq!(metadata.author.as_deref(), Some("Jane"));
    }

    #[test]
    fn test_bad_manifest_is_reported() {
        let dir = tempdir().unwrap();
        write(dir.path(), "broken.toml", "[[command]]\nname = 1\n");
        let sources = Sources {
            entities: vec![dir.path().to_path_buf()],
            ..Sources::default()
        };
        let err = load(&mut EntityRegistry::new(), &sources, &LoadOptions::default()).unwrap_err();
        assert!(matches!(err, LoaderError::Parse { .. }));
    }

    #[test]
    fn test_unknown_requirement_category() {
        let dir = tempdir().unwrap();
        let path = write(
            dir.path(),
            "bad.toml",
            "[[command]]\nname = \"x\"\nrun = \"true\"\nrequirements = { weird = [\"a\"] }\n",
        );
        assert!(matches!(
            load_manifest(&path, dir.path(), None),
            Err(LoaderError::Requirements { .. })
        ));
    }
}
