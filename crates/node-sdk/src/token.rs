//! Persistence seam for the pairing credential.

use parking_lot::Mutex;

/// Where a node keeps the token minted at pairing approval.
///
/// Mobile hosts back this with the platform keychain; the SDK only ships an
/// in-memory store.
pub trait TokenStore: Send + Sync + 'static {
    fn load(&self) -> Option<String>;
    fn save(&self, token: &str);
    fn clear(&self);
}

#[derive(Debug, Default)]
pub struct MemoryTokenStore {
    token: Mutex<Option<String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: Mutex::new(Some(token.into())),
        }
    }
}

impl TokenStore for MemoryTokenStore {
    fn load(&self) -> Option<String> {
        self.token.lock().clone()
    }

    fn save(&self, token: &str) {
        *self.token.lock() = Some(token.to_string());
    }

    fn clear(&self) {
        *self.token.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn save_load_clear() {
        let store = MemoryTokenStore::new();
        assert!(store.load().is_none());
        store.save("t1");
        assert_eq!(store.load().as_deref(), Some("t1"));
        store.clear();
        assert!(store.load().is_none());
    }
}
