//! Paired device persistence
//!
//! Stores the single currently paired micro:bit as a JSON record.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEVICE_FILENAME: &str = "paired_device.json";

/// The paired board as remembered between sessions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ConnectedDevice {
    /// Friendly name, e.g. "BBC micro:bit [zuvip]"
    pub name: Option<String>,

    /// Pairing pattern shown on the LED matrix
    pub pattern: Option<String>,

    /// Connected flag
    pub status: bool,

    pub address: Option<String>,

    pub pairing_code: u32,

    pub firmware_version: Option<String>,

    pub last_connection_time: Option<DateTime<Utc>>,
}

impl ConnectedDevice {
    pub fn new(name: impl Into<String>, pattern: impl Into<String>, address: impl Into<String>, pairing_code: u32) -> Self {
        Self {
            name: Some(name.into()),
            pattern: Some(pattern.into()),
            status: false,
            address: Some(address.into()),
            pairing_code,
            firmware_version: None,
            last_connection_time: None,
        }
    }
}

/// Get/set the currently paired device
pub trait PairedDeviceStore: Send + Sync {
    fn load(&self) -> Result<Option<ConnectedDevice>, StorageError>;

    /// `None` forgets the paired device
    fn save(&self, device: Option<&ConnectedDevice>) -> Result<(), StorageError>;

    /// Apply `f` to the stored device, if any
    fn update(&self, f: &dyn Fn(&mut ConnectedDevice)) -> Result<bool, StorageError> {
        match self.load()? {
            Some(mut device) => {
                f(&mut device);
                self.save(Some(&device))?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn update_firmware(&self, firmware: &str) -> Result<bool, StorageError> {
        self.update(&|d| d.firmware_version = Some(firmware.to_string()))
    }

    fn update_connection_time(&self, at: DateTime<Utc>) -> Result<bool, StorageError> {
        self.update(&|d| d.last_connection_time = Some(at))
    }

    fn set_status(&self, connected: bool) -> Result<bool, StorageError> {
        self.update(&|d| d.status = connected)
    }
}

/// JSON file in a storage directory
pub struct JsonDeviceStore {
    storage_dir: PathBuf,
}

impl JsonDeviceStore {
    pub fn new(storage_dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let storage_dir = storage_dir.as_ref().to_path_buf();

        if !storage_dir.exists() {
            fs::create_dir_all(&storage_dir)
                .map_err(|e| StorageError::Io(format!("Failed to create storage directory: {}", e)))?;
        }

        link_info!("📁 Paired device store at: {}", storage_dir.display());

        Ok(Self { storage_dir })
    }

    fn device_path(&self) -> PathBuf {
        self.storage_dir.join(DEVICE_FILENAME)
    }
}

impl PairedDeviceStore for JsonDeviceStore {
    fn load(&self) -> Result<Option<ConnectedDevice>, StorageError> {
        let path = self.device_path();

        if !path.exists() {
            link_debug!("📂 No paired device at: {}", path.display());
            return Ok(None);
        }

        let json = fs::read_to_string(&path)
            .map_err(|e| StorageError::Io(format!("Failed to read device: {}", e)))?;

        let device: ConnectedDevice = serde_json::from_str(&json)
            .map_err(|e| StorageError::Serialization(format!("Failed to deserialize device: {}", e)))?;

        Ok(Some(device))
    }

    fn save(&self, device: Option<&ConnectedDevice>) -> Result<(), StorageError> {
        let path = self.device_path();

        let Some(device) = device else {
            if path.exists() {
                fs::remove_file(&path)
                    .map_err(|e| StorageError::Io(format!("Failed to delete device: {}", e)))?;
                link_info!("🗑️  Forgot paired device");
            }
            return Ok(());
        };

        let json = serde_json::to_string_pretty(device)
            .map_err(|e| StorageError::Serialization(format!("Failed to serialize device: {}", e)))?;

        fs::write(&path, json)
            .map_err(|e| StorageError::Io(format!("Failed to write device: {}", e)))?;

        link_debug!("💾 Saved paired device {:?}", device.address);
        Ok(())
    }
}

/// In-memory store
#[derive(Default)]
pub struct MemoryDeviceStore {
    device: Mutex<Option<ConnectedDevice>>,
}

impl MemoryDeviceStore {
    pub fn new(device: Option<ConnectedDevice>) -> Self {
        Self {
            device: Mutex::new(device),
        }
    }
}

impl PairedDeviceStore for MemoryDeviceStore {
    fn load(&self) -> Result<Option<ConnectedDevice>, StorageError> {
        Ok(self.device.lock().clone())
    }

    fn save(&self, device: Option<&ConnectedDevice>) -> Result<(), StorageError> {
        *self.device.lock() = device.cloned();
        Ok(())
    }
}

/// Storage errors
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_file_means_no_device() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonDeviceStore::new(temp_dir.path()).unwrap();
        assert!(store.load().unwrap().is_none());
        assert!(!store.set_status(true).unwrap());
    }

    #[test]
    fn test_save_and_load_device() {
        let temp_dir = TempDir::new().unwrap();
        let store = JsonDeviceStore::new(temp_dir.path().join("nested")).unwrap();

        let device = ConnectedDevice::new("BBC micro:bit [zuvip]", "zuvip", "E4:D1:2A:33:10:9C", 1234);
        store.save(Some(&device)).unwrap();

        assert!(store.update_firmware("1.3.2").unwrap());
        assert!(store.set_status(true).unwrap());

        let loaded = store.load().unwrap().unwrap();
        assert_eq!(loaded.address.as_deref(), Some("E4:D1:2A:33:10:9C"));
        assert_eq!(loaded.firmware_version.as_deref(), Some("1.3.2"));
        assert!(loaded.status);

        store.save(None).unwrap();
        assert!(store.load().unwrap().is_none());
    }

    #[test]
    fn test_corrupt_file_is_a_serialization_error() {
        let temp_dir = TempDir::new().unwrap();
        std::fs::write(temp_dir.path().join(DEVICE_FILENAME), "{not json").unwrap();
        let store = JsonDeviceStore::new(temp_dir.path()).unwrap();
        assert!(matches!(store.load(), Err(StorageError::Serialization(_))));
    }
}
