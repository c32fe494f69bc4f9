use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// The model advertised by the backend for some data type.
///
/// `layer_sizes` holds the byte size of every layer's tensor, its length and
/// order is the contract every parameter exchange must follow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelDescriptor {
    pub id: i64,
    pub name: String,
    #[serde(rename = "file_path")]
    pub storage_location: String,
    #[serde(rename = "layers_sizes")]
    pub layer_sizes: Vec<usize>,
}

impl ModelDescriptor {
    /// The artifact's file name, the last segment of its storage location.
    pub fn file_name(&self) -> &str {
        self.storage_location
            .rsplit('/')
            .next()
            .unwrap_or(&self.storage_location)
    }

    /// Where the artifact lives under `storage_root`: `{root}/{name}/{file_name}`.
    pub fn local_path(&self, storage_root: &Path) -> PathBuf {
        storage_root.join(&self.name).join(self.file_name())
    }
}

/// Request body for the model advertisement endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdvertiseRequest {
    pub data_type: String,
}
