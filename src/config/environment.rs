//! Layered configuration environment.
//!
//! A base document is loaded first, then one overlay per active profile
//! (`tunnel.toml` → `tunnel-<profile>.toml`). Later sources win; tables merge
//! key by key, everything else is replaced.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::config::loader::ConfigError;
use crate::config::schema::TunnelConfig;

/// Reads configuration documents.
pub trait ResourceLoader: Send + Sync {
    /// Returns `Ok(None)` when nothing exists at `location`.
    fn load(&self, location: &Path) -> io::Result<Option<String>>;
}

/// Loads documents from the local filesystem.
#[derive(Debug, Default, Clone, Copy)]
pub struct FileSystemResourceLoader;

impl ResourceLoader for FileSystemResourceLoader {
    fn load(&self, location: &Path) -> io::Result<Option<String>> {
        match std::fs::read_to_string(location) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// One parsed configuration document.
#[derive(Debug, Clone, PartialEq)]
pub struct PropertySource {
    name: String,
    table: toml::Table,
}

impl PropertySource {
    pub fn new(name: impl Into<String>, table: toml::Table) -> Self {
        Self {
            name: name.into(),
            table,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn table(&self) -> &toml::Table {
        &self.table
    }
}

/// Observes sources and profiles as they are applied.
pub trait ConfigSourceListener {
    fn on_source_added(&mut self, _source: &PropertySource) {}
    fn on_profiles_activated(&mut self, _profiles: &[String]) {}
}

/// Traces every applied source and profile.
#[derive(Debug, Default)]
pub struct LoggingListener;

impl ConfigSourceListener for LoggingListener {
    fn on_source_added(&mut self, source: &PropertySource) {
        tracing::debug!(source = %source.name(), keys = source.table().len(), "Config source added");
    }

    fn on_profiles_activated(&mut self, profiles: &[String]) {
        if !profiles.is_empty() {
            tracing::info!(profiles = ?profiles, "Active profiles");
        }
    }
}

/// Ordered property sources plus the active profiles.
#[derive(Debug, Clone, Default)]
pub struct ConfigEnvironment {
    sources: Vec<PropertySource>,
    active_profiles: Vec<String>,
}

impl ConfigEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sources(&self) -> &[PropertySource] {
        &self.sources
    }

    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    pub fn add_source(&mut self, source: PropertySource) {
        self.sources.push(source);
    }

    pub fn active_profiles(&self) -> &[String] {
        &self.active_profiles
    }

    pub fn is_profile_active(&self, profile: &str) -> bool {
        self.active_profiles.iter().any(|p| p == profile)
    }

    /// Activate profiles, keeping first-seen order and skipping duplicates.
    pub fn activate_profiles<I, S>(&mut self, profiles: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for profile in profiles {
            let profile = profile.into();
            if !self.is_profile_active(&profile) {
                self.active_profiles.push(profile);
            }
        }
    }

    /// All sources merged in order.
    pub fn merged(&self) -> toml::Table {
        let mut merged = toml::Table::new();
        for source in &self.sources {
            merge_tables(&mut merged, source.table());
        }
        merged
    }

    /// Deserialize the merged sources.
    pub fn bind(&self) -> Result<TunnelConfig, toml::de::Error> {
        let mut config: TunnelConfig = toml::Value::Table(self.merged()).try_into()?;
        config.profiles.active = self.active_profiles.clone();
        Ok(config)
    }
}

fn merge_tables(base: &mut toml::Table, overlay: &toml::Table) {
    for (key, value) in overlay {
        if let toml::Value::Table(incoming) = value {
            if let Some(toml::Value::Table(existing)) = base.get_mut(key) {
                merge_tables(existing, incoming);
                continue;
            }
        }
        base.insert(key.clone(), value.clone());
    }
}

/// Applies a base document and its profile overlays to an environment.
#[derive(Clone)]
pub struct ConfigDataLoader {
    resource_loader: Arc<dyn ResourceLoader>,
    additional_profiles: Vec<String>,
}

impl Default for ConfigDataLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigDataLoader {
    /// Loader backed by the filesystem.
    pub fn new() -> Self {
        Self {
            resource_loader: Arc::new(FileSystemResourceLoader),
            additional_profiles: Vec::new(),
        }
    }

    pub fn with_resource_loader(mut self, resource_loader: Arc<dyn ResourceLoader>) -> Self {
        self.resource_loader = resource_loader;
        self
    }

    /// Profiles activated on top of the base document's `profiles.active`.
    pub fn with_additional_profiles<I, S>(mut self, profiles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.additional_profiles.extend(profiles.into_iter().map(Into::into));
        self
    }

    pub fn resource_loader(&self) -> &Arc<dyn ResourceLoader> {
        &self.resource_loader
    }

    pub fn additional_profiles(&self) -> &[String] {
        &self.additional_profiles
    }

    /// Load `location` and the overlays of every active profile into `environment`.
    pub fn apply<L>(
        &self,
        environment: &mut ConfigEnvironment,
        location: &Path,
        listener: &mut L,
    ) -> Result<(), ConfigError>
    where
        L: ConfigSourceListener + ?Sized,
    {
        let base = self
            .load_table(location)?
            .ok_or_else(|| ConfigError::NotFound(location.to_path_buf()))?;

        let mut profiles = declared_profiles(&base);
        profiles.extend(self.additional_profiles.iter().cloned());
        let mut seen = HashSet::new();
        profiles.retain(|p| seen.insert(p.clone()));
        for profile in &profiles {
            validate_profile_name(profile)?;
        }

        let source = PropertySource::new(location.display().to_string(), base);
        listener.on_source_added(&source);
        environment.add_source(source);

        environment.activate_profiles(profiles.iter().cloned());
        listener.on_profiles_activated(environment.active_profiles());

        for profile in &profiles {
            let profile_location = profile_location(location, profile);
            match self.load_table(&profile_location)? {
                Some(table) => {
                    let source = PropertySource::new(profile_location.display().to_string(), table);
                    listener.on_source_added(&source);
                    environment.add_source(source);
                }
                None => {
                    tracing::debug!(
                        profile = %profile,
                        location = %profile_location.display(),
                        "No profile-specific config document"
                    );
                }
            }
        }
        Ok(())
    }

    fn load_table(&self, location: &Path) -> Result<Option<toml::Table>, ConfigError> {
        let Some(content) = self.resource_loader.load(location).map_err(ConfigError::Io)? else {
            return Ok(None);
        };
        let table = content.parse::<toml::Table>().map_err(|source| ConfigError::Parse {
            location: location.to_path_buf(),
            source,
        })?;
        Ok(Some(table))
    }
}

fn declared_profiles(table: &toml::Table) -> Vec<String> {
    table
        .get("profiles")
        .and_then(|p| p.get("active"))
        .and_then(|a| a.as_array())
        .map(|values| {
            values
                .iter()
                .filter_map(|v| v.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

fn validate_profile_name(profile: &str) -> Result<(), ConfigError> {
    let valid = !profile.trim().is_empty()
        && profile
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        && !profile.contains("..");
    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidProfile(profile.to_string()))
    }
}

/// `dir/tunnel.toml` + `dev` → `dir/tunnel-dev.toml`.
pub fn profile_location(base: &Path, profile: &str) -> PathBuf {
    let stem = base
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let file_name = match base.extension() {
        Some(ext) => format!("{stem}-{profile}.{}", ext.to_string_lossy()),
        None => format!("{stem}-{profile}"),
    };
    base.with_file_name(file_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[derive(Default)]
    struct MemoryResourceLoader {
        documents: HashMap<PathBuf, String>,
    }

    impl MemoryResourceLoader {
        fn with(mut self, location: &str, content: &str) -> Self {
            self.documents.insert(PathBuf::from(location), content.to_string());
            self
        }
    }

    impl ResourceLoader for MemoryResourceLoader {
        fn load(&self, location: &Path) -> io::Result<Option<String>> {
            Ok(self.documents.get(location).cloned())
        }
    }

    #[derive(Default)]
    struct RecordingListener {
        sources: Vec<String>,
        profiles: Vec<String>,
    }

    impl ConfigSourceListener for RecordingListener {
        fn on_source_added(&mut self, source: &PropertySource) {
            self.sources.push(source.name().to_string());
        }

        fn on_profiles_activated(&mut self, profiles: &[String]) {
            self.profiles = profiles.to_vec();
        }
    }

    fn memory_loader(loader: MemoryResourceLoader) -> ConfigDataLoader {
        ConfigDataLoader::new().with_resource_loader(Arc::new(loader))
    }

    #[test]
    fn profile_location_keeps_extension() {
        assert_eq!(
            profile_location(Path::new("conf/tunnel.toml"), "dev"),
            PathBuf::from("conf/tunnel-dev.toml")
        );
        assert_eq!(
            profile_location(Path::new("tunnel"), "dev"),
            PathBuf::from("tunnel-dev")
        );
    }

    #[test]
    fn default_loader_reads_filesystem() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tunnel.toml");
        std::fs::write(&path, "[server]\ntarget_port = 9000\n").unwrap();

        let mut environment = ConfigEnvironment::new();
        ConfigDataLoader::new()
            .apply(&mut environment, &path, &mut LoggingListener)
            .unwrap();
        assert_eq!(environment.bind().unwrap().server.target_port, 9000);
        assert!(environment.active_profiles().is_empty());
    }

    #[test]
    fn user_supplied_loader_is_used() {
        let loader = memory_loader(MemoryResourceLoader::default().with("mem/tunnel.toml", "[server]\ntarget_port = 7000\n"));

        let document = loader.resource_loader().load(Path::new("mem/tunnel.toml")).unwrap();
        assert!(document.is_some_and(|content| content.contains("7000")));

        let mut environment = ConfigEnvironment::new();
        loader
            .apply(&mut environment, Path::new("mem/tunnel.toml"), &mut LoggingListener)
            .unwrap();
        assert_eq!(environment.bind().unwrap().server.target_port, 7000);
    }

    #[test]
    fn missing_base_document_is_an_error() {
        let loader = memory_loader(MemoryResourceLoader::default());
        let err = loader
            .apply(&mut ConfigEnvironment::new(), Path::new("absent.toml"), &mut LoggingListener)
            .unwrap_err();
        assert!(matches!(err, ConfigError::NotFound(_)));
    }

    #[test]
    fn applying_to_bare_environment_adds_sources_and_activates_profile() {
        let loader = memory_loader(
            MemoryResourceLoader::default()
                .with("tunnel.toml", "[server]\ntarget_port = 7000\n")
                .with("tunnel-dev.toml", "[server]\nlong_poll_timeout_ms = 500\n"),
        )
        .with_additional_profiles(["dev"]);

        let mut environment = ConfigEnvironment::new();
        let before = environment.source_count();
        let mut listener = RecordingListener::default();
        loader
            .apply(&mut environment, Path::new("tunnel.toml"), &mut listener)
            .unwrap();

        assert!(environment.source_count() > before);
        assert_eq!(environment.source_count(), 2);
        assert!(environment.is_profile_active("dev"));
        assert_eq!(listener.sources, vec!["tunnel.toml", "tunnel-dev.toml"]);
        assert_eq!(listener.profiles, vec!["dev"]);

        let config = environment.bind().unwrap();
        assert_eq!(config.server.target_port, 7000);
        assert_eq!(config.server.long_poll_timeout_ms, 500);
        assert_eq!(config.profiles.active, vec!["dev"]);
    }

    #[test]
    fn additional_profiles_follow_declared_profiles() {
        let loader = memory_loader(
            MemoryResourceLoader::default()
                .with("tunnel.toml", "[profiles]\nactive = [\"base\", \"dev\"]\n")
                .with("tunnel-base.toml", "[observability]\nlog_level = \"warn\"\n")
                .with("tunnel-cli.toml", "[observability]\nlog_level = \"debug\"\n"),
        )
        .with_additional_profiles(["dev", "cli"]);
        assert_eq!(loader.additional_profiles(), ["dev", "cli"]);

        let mut environment = ConfigEnvironment::new();
        loader
            .apply(&mut environment, Path::new("tunnel.toml"), &mut LoggingListener)
            .unwrap();

        assert_eq!(environment.active_profiles(), ["base", "dev", "cli"]);
        assert_eq!(environment.source_count(), 3);
        assert_eq!(environment.bind().unwrap().observability.log_level, "debug");
    }

    #[test]
    fn rejects_profile_names_that_escape_directory() {
        let loader = memory_loader(MemoryResourceLoader::default().with("tunnel.toml", ""))
            .with_additional_profiles(["../etc"]);
        let err = loader
            .apply(&mut ConfigEnvironment::new(), Path::new("tunnel.toml"), &mut LoggingListener)
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidProfile(ref p) if p == "../etc"));
    }

    #[test]
    fn nested_tables_merge() {
        let mut environment = ConfigEnvironment::new();
        environment.add_source(PropertySource::new(
            "a",
            "[server]\ntarget_port = 1\npath = \"/a\"\n".parse().unwrap(),
        ));
        environment.add_source(PropertySource::new("b", "[server]\npath = \"/b\"\n".parse().unwrap()));

        let config = environment.bind().unwrap();
        assert_eq!(config.server.target_port, 1);
        assert_eq!(config.server.path, "/b");
    }
}
