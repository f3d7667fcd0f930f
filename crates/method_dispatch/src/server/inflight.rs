use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::sink::{MethodResult, WeakMethodResult};

/// Identifier assigned to a call once it has been scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallId(Uuid);

impl CallId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CallId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Tracks calls that have not replied yet.
///
/// Entries hold a weak reference to the call's reply handle so the transport
/// can invalidate every outstanding reply at once when it is torn down. A call
/// stays tracked after its handler returns while sub-work still holds the
/// handle, and leaves the map on its first terminal reply or once the last
/// handle drops.
#[derive(Debug)]
pub struct InFlightMap {
    calls: DashMap<CallId, WeakMethodResult, ahash::RandomState>,
}

impl InFlightMap {
    pub fn new() -> Self {
        Self {
            calls: DashMap::default(),
        }
    }

    /// Start tracking a call until it replies or its handle is gone.
    pub fn track(self: &Arc<Self>, result: &MethodResult) -> CallId {
        let id = CallId::new();
        self.calls.insert(id, result.downgrade());
        result.attach(InFlightGuard {
            id,
            map: Arc::clone(self),
        });
        id
    }

    pub fn contains(&self, id: &CallId) -> bool {
        self.calls.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.calls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.calls.is_empty()
    }

    /// Invalidate the reply handle of every tracked call.
    ///
    /// Returns how many calls were affected.
    pub fn invalidate_all(&self) -> usize {
        // Upgraded handles may be the last ones alive, and dropping them
        // removes map entries, so no shard lock may be held at that point.
        let live: Vec<MethodResult> = self
            .calls
            .iter()
            .filter_map(|entry| entry.value().upgrade())
            .collect();
        for result in &live {
            result.invalidate();
        }
        live.len()
    }

    fn remove(&self, id: &CallId) {
        self.calls.remove(id);
    }
}

impl Default for InFlightMap {
    fn default() -> Self {
        Self::new()
    }
}

/// Keeps a call tracked while alive. Owned by the call's reply handle.
pub(crate) struct InFlightGuard {
    id: CallId,
    map: Arc<InFlightMap>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.map.remove(&self.id);
    }
}

impl fmt::Debug for InFlightGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InFlightGuard")
            .field("id", &self.id)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::ReplyPolicy;

    fn result() -> MethodResult {
        MethodResult::channel(ReplyPolicy::Permissive).0
    }

    #[test]
    fn test_track_until_reply() {
        let map = Arc::new(InFlightMap::new());
        let (result, mut rx) = MethodResult::channel(ReplyPolicy::Permissive);

        let id = map.track(&result);
        assert!(map.contains(&id));
        assert_eq!(map.len(), 1);

        result.success("done").unwrap();
        assert!(rx.try_recv().is_ok());
        assert!(!map.contains(&id));
        assert!(map.is_empty());
    }

    #[test]
    fn test_track_until_last_handle_drops() {
        let map = Arc::new(InFlightMap::new());
        let result = result();
        let sub_work = result.clone();

        let id = map.track(&result);
        drop(result);
        assert!(map.contains(&id));

        drop(sub_work);
        assert!(map.is_empty());
    }

    #[test]
    fn test_concurrent_calls_get_distinct_ids() {
        let map = Arc::new(InFlightMap::new());
        let first = result();
        let second = result();

        assert_ne!(map.track(&first), map.track(&second));
        assert_eq!(map.len(), 2);
    }

    #[test]
    fn test_invalidate_all() {
        let map = Arc::new(InFlightMap::new());
        let a = result();
        let b = result();
        map.track(&a);
        map.track(&b);

        assert_eq!(map.invalidate_all(), 2);
        assert!(a.is_invalidated());
        assert!(b.is_invalidated());
    }

    #[test]
    fn test_replied_call_is_not_invalidated() {
        let map = Arc::new(InFlightMap::new());
        let (done, _rx) = MethodResult::channel(ReplyPolicy::Permissive);
        map.track(&done);
        done.success(()).unwrap();

        assert_eq!(map.invalidate_all(), 0);
        assert!(!done.is_invalidated());
    }

    #[test]
    fn test_invalidate_all_with_only_the_map_left() {
        let map = Arc::new(InFlightMap::new());
        map.track(&result());

        assert_eq!(map.invalidate_all(), 0);
        assert!(map.is_empty());
    }
}
