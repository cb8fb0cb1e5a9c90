//! User-uploaded firmware kept for the session.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

/// Produces ids for newly registered firmware.
pub type IdGenerator = Arc<dyn Fn() -> String + Send + Sync>;

/// A firmware file registered by the user
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalFirmware {
    pub id: String,
    pub name: Option<String>,
    pub data: Vec<u8>,
    /// Hex-encoded SHA-256 of `data`
    pub digest: String,
    pub registered_at: DateTime<Utc>,
}

impl LocalFirmware {
    /// Display name, falling back to the id.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// Session registry of local firmware. Entries are never evicted.
pub struct LocalFirmwareRegistry {
    entries: Mutex<HashMap<String, Arc<LocalFirmware>>>,
    next_id: IdGenerator,
}

impl Default for LocalFirmwareRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalFirmwareRegistry {
    pub fn new() -> Self {
        Self::with_id_generator(Arc::new(|| uuid::Uuid::new_v4().to_string()))
    }

    pub fn with_id_generator(next_id: IdGenerator) -> Self {
        LocalFirmwareRegistry {
            entries: Mutex::new(HashMap::new()),
            next_id,
        }
    }

    /// Store `data` under a fresh id and return the stored record.
    pub fn register(&self, data: Vec<u8>, name: Option<String>) -> Arc<LocalFirmware> {
        let digest = hex::encode(Sha256::digest(&data));
        let firmware = Arc::new(LocalFirmware {
            id: (self.next_id)(),
            name,
            data,
            digest,
            registered_at: Utc::now(),
        });

        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(firmware.id.clone(), Arc::clone(&firmware));
        firmware
    }

    pub fn get(&self, id: &str) -> Option<Arc<LocalFirmware>> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
