use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use anyhow::Result;

use crate::db::Database;

/// Where the serialized story list lives.
#[derive(Clone)]
pub enum StoryBackend {
    Memory(Arc<Mutex<HashMap<String, String>>>),
    Sqlite(Database),
}

impl StoryBackend {
    pub fn memory() -> Self {
        StoryBackend::Memory(Arc::new(Mutex::new(HashMap::new())))
    }

    pub fn sqlite(db: Database) -> Self {
        StoryBackend::Sqlite(db)
    }

    pub async fn read(&self, key: &str) -> Result<Option<String>> {
        match self {
            StoryBackend::Memory(map) => {
                let guard = map.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                Ok(guard.get(key).cloned())
            }
            StoryBackend::Sqlite(db) => db.get_value(key).await,
        }
    }

    pub async fn write(&self, key: &str, value: String) -> Result<()> {
        match self {
            StoryBackend::Memory(map) => {
                let mut guard = map.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
                guard.insert(key.to_string(), value);
                Ok(())
            }
            StoryBackend::Sqlite(db) => db.put_value(key, value).await,
        }
    }
}
