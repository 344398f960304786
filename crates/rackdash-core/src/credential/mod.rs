// ── Credential ownership ──

pub mod manager;
pub mod store;

pub use manager::{AuthState, AuthStatus, CredentialManager};
pub use store::{Credential, CredentialRecord, CredentialStore, FileStore, MemoryStore, StoreError};
