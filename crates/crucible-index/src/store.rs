use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::descriptor::ToolDescriptor;
use crate::error::IndexError;

/// Content-addressed descriptor store: `objects/<version>.json` plus a
/// `manifest.json` mapping qualified names to active versions.
///
/// Objects are written once and never rewritten; publishing a changed
/// descriptor adds a new object and repoints the manifest entry.
#[derive(Debug)]
pub struct DescriptorStore {
    root: PathBuf,
}

#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
struct Manifest {
    /// qualified name -> content version hash. BTreeMap keeps the file diffable.
    active: BTreeMap<String, String>,
}

impl DescriptorStore {
    /// # Errors
    ///
    /// Returns an error if the store directories cannot be created.
    pub fn open(root: &Path) -> Result<Self, IndexError> {
        std::fs::create_dir_all(root.join("objects")).map_err(|source| IndexError::Io {
            path: root.display().to_string(),
            source,
        })?;
        Ok(Self {
            root: root.to_owned(),
        })
    }

    fn object_path(&self, version: &str) -> PathBuf {
        self.root.join("objects").join(format!("{version}.json"))
    }

    fn manifest_path(&self) -> PathBuf {
        self.root.join("manifest.json")
    }

    /// Publish a descriptor set: write missing objects, then atomically
    /// replace the manifest.
    ///
    /// # Errors
    ///
    /// Returns an error on any write failure.
    pub fn publish(&self, descriptors: &[ToolDescriptor]) -> Result<(), IndexError> {
        let mut manifest = Manifest::default();
        for d in descriptors {
            let version = d.version();
            let path = self.object_path(&version);
            if !path.exists() {
                let body = serde_json::to_vec_pretty(d).map_err(|source| IndexError::Parse {
                    path: path.display().to_string(),
                    source,
                })?;
                write_atomic(&path, &body)?;
            }
            manifest.active.insert(d.qualified_name(), version);
        }

        let body = serde_json::to_vec_pretty(&manifest).map_err(|source| IndexError::Parse {
            path: self.manifest_path().display().to_string(),
            source,
        })?;
        write_atomic(&self.manifest_path(), &body)?;
        tracing::info!(tools = descriptors.len(), "published descriptor manifest");
        Ok(())
    }

    /// Load every descriptor listed in the active manifest.
    ///
    /// # Errors
    ///
    /// Returns an error if the manifest or any referenced object is
    /// missing or unreadable.
    pub fn load_active(&self) -> Result<Vec<ToolDescriptor>, IndexError> {
        let manifest_path = self.manifest_path();
        if !manifest_path.exists() {
            return Ok(Vec::new());
        }
        let content =
            std::fs::read_to_string(&manifest_path).map_err(|source| IndexError::Io {
                path: manifest_path.display().to_string(),
                source,
            })?;
        let manifest: Manifest =
            serde_json::from_str(&content).map_err(|source| IndexError::Parse {
                path: manifest_path.display().to_string(),
                source,
            })?;

        let mut descriptors = Vec::with_capacity(manifest.active.len());
        for version in manifest.active.values() {
            let path = self.object_path(version);
            let body = std::fs::read_to_string(&path).map_err(|source| IndexError::Io {
                path: path.display().to_string(),
                source,
            })?;
            let d: ToolDescriptor =
                serde_json::from_str(&body).map_err(|source| IndexError::Parse {
                    path: path.display().to_string(),
                    source,
                })?;
            descriptors.push(d);
        }
        Ok(descriptors)
    }
}

fn write_atomic(path: &Path, body: &[u8]) -> Result<(), IndexError> {
    let tmp = path.with_extension("json.tmp");
    let map_io = |source| IndexError::Io {
        path: path.display().to_string(),
        source,
    };
    std::fs::write(&tmp, body).map_err(map_io)?;
    std::fs::rename(&tmp, path).map_err(map_io)?;
    Ok(())
}
