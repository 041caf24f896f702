//! Explicit root registry for the process-wide [`SessionManager`] handle
//! (§9, "Singleton managers" — the source uses process-wide singletons;
//! this crate models that as `init`/`reset` against one `static`, never a
//! hidden global read from arbitrary call sites). Grounded in the
//! teacher's `OnceCell`-backed `memory::store::get_store` (`memory/store.rs`),
//! generalized from lazy self-construction to explicit `init`/`reset`
//! because a `SessionManager` needs host-supplied collaborators
//! (`AgentService`, `ContextAssembler`) rather than being able to build
//! itself from nothing.

use crate::manager::SessionManager;
use once_cell::sync::Lazy;
use std::sync::{Arc, Mutex};

static HANDLE: Lazy<Mutex<Option<Arc<SessionManager>>>> = Lazy::new(|| Mutex::new(None));

/// Installs `manager` as the process-wide handle, replacing any prior one.
pub fn init(manager: Arc<SessionManager>) -> Arc<SessionManager> {
    *HANDLE.lock().expect("session manager registry poisoned") = Some(manager.clone());
    manager
}

/// The current handle, if `init` has been called and not since `reset`.
pub fn handle() -> Option<Arc<SessionManager>> {
    HANDLE.lock().expect("session manager registry poisoned").clone()
}

/// Clears the registry. Callers holding an `Arc<SessionManager>` from a
/// prior `init`/`handle` keep using it — this only affects future
/// `handle()` calls.
pub fn reset() {
    *HANDLE.lock().expect("session manager registry poisoned") = None;
}
