//! Package sources consulted by the linker

use std::io;
use std::path::{Path, PathBuf};

use rustc_hash::FxHashMap;

use super::LinkError;
use crate::format::Package;

/// Supplies compiled packages by name
pub trait PackageSource {
    /// Load the package called `name`
    ///
    /// Returns [`LinkError::MissingPackage`] when no such package exists.
    fn load_package(&self, name: &str) -> Result<Package, LinkError>;
}

/// Packages held in memory
#[derive(Debug, Clone, Default)]
pub struct MemorySource {
    packages: FxHashMap<String, Package>,
}

impl MemorySource {
    /// Create an empty source
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a package
    pub fn insert(&mut self, name: impl Into<String>, package: Package) -> &mut Self {
        self.packages.insert(name.into(), package);
        self
    }

    /// Builder form of [`MemorySource::insert`]
    pub fn with(mut self, name: impl Into<String>, package: Package) -> Self {
        self.insert(name, package);
        self
    }
}

impl PackageSource for MemorySource {
    fn load_package(&self, name: &str) -> Result<Package, LinkError> {
        self.packages
            .get(name)
            .cloned()
            .ok_or_else(|| LinkError::MissingPackage(name.to_string()))
    }
}

/// Packages stored as `<root>/<name>.json`
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    /// Read packages from `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory packages are read from
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of the file holding `name`
    pub fn package_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{}.json", name))
    }

    /// Write `package` in the format this source reads
    pub fn store(&self, name: &str, package: &Package) -> Result<(), LinkError> {
        let text = serde_json::to_string_pretty(package).map_err(|source| LinkError::Decode {
            package: name.to_string(),
            source,
        })?;
        std::fs::write(self.package_path(name), text).map_err(|source| LinkError::Io {
            package: name.to_string(),
            source,
        })
    }
}

impl PackageSource for DirectorySource {
    fn load_package(&self, name: &str) -> Result<Package, LinkError> {
        let path = self.package_path(name);
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                return Err(LinkError::MissingPackage(name.to_string()))
            }
            Err(source) => {
                return Err(LinkError::Io {
                    package: name.to_string(),
                    source,
                })
            }
        };
        log::debug!("loading package {} from {}", name, path.display());
        serde_json::from_str(&text).map_err(|source| LinkError::Decode {
            package: name.to_string(),
            source,
        })
    }
}
