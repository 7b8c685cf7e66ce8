use uuid::Uuid;

/// Produces client-side record identities.
///
/// Ids are assigned once, at creation, and reused for every retry of the
/// same record, which is what makes remote upserts idempotent.
pub trait IdGenerator: Send + Sync {
    fn generate(&self) -> Uuid;
}

/// Random (v4) UUIDs.
#[derive(Debug, Clone, Copy, Default)]
pub struct UuidV4;

impl IdGenerator for UuidV4 {
    fn generate(&self) -> Uuid {
        Uuid::new_v4()
    }
}

/// Deterministic ids (1, 2, 3, ...) for tests.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct SequentialIds(std::sync::atomic::AtomicU64);

#[cfg(test)]
impl IdGenerator for SequentialIds {
    fn generate(&self) -> Uuid {
        let n = self.0.fetch_add(1, std::sync::atomic::Ordering::SeqCst) + 1;
        Uuid::from_u128(n as u128)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_uuid_v4_unique() {
        let ids: HashSet<Uuid> = (0..1000).map(|_| UuidV4.generate()).collect();
        assert_eq!(ids.len(), 1000);
        assert!(ids.iter().all(|id| id.get_version_num() == 4));
    }

    #[test]
    fn test_sequential_ids() {
        let ids = SequentialIds::default();
        assert_eq!(ids.generate(), Uuid::from_u128(1));
        assert_eq!(ids.generate(), Uuid::from_u128(2));
    }
}
