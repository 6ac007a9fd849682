//! The "current proxy" slot shared between a manager and request handlers.

use std::sync::{Arc, PoisonError, RwLock};

use crate::upstream::UpstreamProxy;

/// Holds the proxy currently serving a route, if any.
///
/// Readers clone the `Arc` under the read lock and release it before
/// forwarding, so a swap never waits for in-flight requests. A replaced proxy
/// is dropped once its last request finishes.
#[derive(Debug, Default)]
pub struct ProxySlot {
    current: RwLock<Option<Arc<UpstreamProxy>>>,
}

impl ProxySlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn current(&self) -> Option<Arc<UpstreamProxy>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Install a new proxy, returning the one it replaced.
    pub fn install(&self, proxy: Arc<UpstreamProxy>) -> Option<Arc<UpstreamProxy>> {
        self.current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(proxy)
    }

    pub fn clear(&self) -> Option<Arc<UpstreamProxy>> {
        self.current
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::TargetSet;
    use crate::upstream::ProxyConfiguration;

    fn proxy(name: &str) -> Arc<UpstreamProxy> {
        let targets = TargetSet::from_paths(["/run/rest1.sock"]);
        Arc::new(UpstreamProxy::new(name, &targets, ProxyConfiguration::default()).unwrap())
    }

    #[test]
    fn test_install_and_clear() {
        let slot = ProxySlot::new();
        assert!(slot.current().is_none());

        assert!(slot.install(proxy("a")).is_none());
        let held = slot.current().unwrap();
        assert_eq!(held.name(), "a");

        let previous = slot.install(proxy("b")).unwrap();
        assert_eq!(previous.name(), "a");
        // A reader holding the old proxy keeps it alive.
        assert_eq!(held.name(), "a");
        assert_eq!(slot.current().unwrap().name(), "b");

        assert!(slot.clear().is_some());
        assert!(slot.current().is_none());
    }
}
