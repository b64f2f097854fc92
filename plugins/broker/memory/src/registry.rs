use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Mutex, MutexGuard};

use transit_api::{ClientError, SchemaRegistry};

#[derive(Debug, Default)]
struct Subjects {
    /// Schema text by id - 1.
    schemas: Vec<String>,
    /// Subject → ids registered under it, oldest first.
    versions: HashMap<String, Vec<u32>>,
}

/// In-process schema registry. Identical schema text always gets the same
/// id, whatever subject it is registered under.
#[derive(Debug, Default)]
pub struct MemorySchemaRegistry {
    subjects: Mutex<Subjects>,
}

impl MemorySchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Subjects> {
        self.subjects.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("schema registry lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Ids registered under `subject`, oldest first.
    pub fn versions(&self, subject: &str) -> Vec<u32> {
        self.lock().versions.get(subject).cloned().unwrap_or_default()
    }
}

impl SchemaRegistry for MemorySchemaRegistry {
    fn register(
        &self,
        subject: &str,
        schema: &str,
    ) -> Pin<Box<dyn Future<Output = Result<u32, ClientError>> + Send + '_>> {
        let subject = subject.to_string();
        let schema = schema.to_string();
        Box::pin(async move {
            let mut s = self.lock();
            let id = match s.schemas.iter().position(|known| *known == schema) {
                Some(i) => i as u32 + 1,
                None => {
                    s.schemas.push(schema);
                    s.schemas.len() as u32
                }
            };
            let versions = s.versions.entry(subject).or_default();
            if !versions.contains(&id) {
                versions.push(id);
            }
            Ok(id)
        })
    }

    fn schema(&self, id: u32) -> Pin<Box<dyn Future<Output = Result<String, ClientError>> + Send + '_>> {
        Box::pin(async move {
            let s = self.lock();
            id.checked_sub(1)
                .and_then(|i| s.schemas.get(i as usize))
                .cloned()
                .ok_or_else(|| ClientError::schema(format!("schema {id} not found")))
        })
    }
}
