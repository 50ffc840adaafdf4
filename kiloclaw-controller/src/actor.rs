//! The serialization primitive behind "single-threaded actor per user" (spec
//! §5, §9 option (b)): a mutex held across each public operation, also
//! acquired by the alarm handler so reconciliation never races a caller.

use tokio::sync::{Mutex, MutexGuard};

#[derive(Default)]
pub struct OpLock(Mutex<()>);

impl OpLock {
    pub fn new() -> Self {
        Self(Mutex::new(()))
    }

    pub async fn guard(&self) -> MutexGuard<'_, ()> {
        self.0.lock().await
    }
}
