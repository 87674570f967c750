use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type Table = Arc<Mutex<HashMap<String, Arc<AsyncMutex<()>>>>>;

/// One async mutex per address, created on demand and dropped as soon as
/// nobody holds or waits for it.
#[derive(Clone, Default)]
pub struct AddressLocks {
    table: Table,
}

pub struct AddressGuard {
    table: Table,
    address: String,
    guard: Option<OwnedMutexGuard<()>>,
}

impl AddressLocks {
    pub async fn lock(&self, address: &str) -> AddressGuard {
        let entry = {
            let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
            table
                .entry(address.to_string())
                .or_insert_with(|| Arc::new(AsyncMutex::new(())))
                .clone()
        };
        let guard = entry.lock_owned().await;
        AddressGuard {
            table: self.table.clone(),
            address: address.to_string(),
            guard: Some(guard),
        }
    }

    /// Number of addresses currently locked or awaited.
    pub fn len(&self) -> usize {
        self.table.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for AddressGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut table = self.table.lock().unwrap_or_else(|e| e.into_inner());
        // the table's own reference is the last one: nobody is waiting
        let idle = table
            .get(&self.address)
            .map(|entry| Arc::strong_count(entry) == 1)
            .unwrap_or(false);
        if idle {
            table.remove(&self.address);
        }
    }
}
