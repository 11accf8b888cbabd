pub mod identity;

use anyhow::{Context as _, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use cipher_chat::{ClientConfig, DeviceStore, FileStorage, KeyVault, StorageAdapter};

/// Everything a command needs from the data directory.
pub struct Context {
    pub data_dir: PathBuf,
    pub config: ClientConfig,
    pub vault: KeyVault,
    pub device: DeviceStore,
}

impl Context {
    pub fn open(data_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("creating {}", data_dir.display()))?;
        let config = ClientConfig::load(data_dir)?;
        let storage: Arc<dyn StorageAdapter> = Arc::new(FileStorage::new(data_dir.join("store"))?);

        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            config,
            vault: KeyVault::new(storage.clone()),
            device: DeviceStore::new(storage),
        })
    }
}
