//! Synchronization processors and their registry

use std::collections::HashMap;

use anyhow::Result;

use crate::models::{MailboxOrigin, OriginKind};

/// Performs the protocol work for one origin
///
/// Implementations typically fetch new mail, stage it into an
/// [`EntityBatch`](crate::batch::EntityBatch) and persist the batch.
pub trait SynchronizationProcessor {
    fn process(&self, origin: &MailboxOrigin) -> Result<()>;
}

/// Builds a processor for an origin
pub trait ProcessorFactory: Send + Sync {
    fn create(&self, origin: &MailboxOrigin) -> Result<Box<dyn SynchronizationProcessor>>;
}

impl<F> ProcessorFactory for F
where
    F: Fn(&MailboxOrigin) -> Result<Box<dyn SynchronizationProcessor>> + Send + Sync,
{
    fn create(&self, origin: &MailboxOrigin) -> Result<Box<dyn SynchronizationProcessor>> {
        self(origin)
    }
}

/// Processor factories keyed by origin kind
#[derive(Default)]
pub struct ProcessorRegistry {
    factories: HashMap<OriginKind, Box<dyn ProcessorFactory>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the factory for a kind, replacing any previous one
    pub fn register(&mut self, kind: OriginKind, factory: impl ProcessorFactory + 'static) {
        if self.factories.insert(kind, Box::new(factory)).is_some() {
            log::warn!("[SYNC] Replaced the processor factory for {} origins", kind);
        }
    }

    /// Builder-style [`register`](Self::register)
    pub fn with(mut self, kind: OriginKind, factory: impl ProcessorFactory + 'static) -> Self {
        self.register(kind, factory);
        self
    }

    pub fn get(&self, kind: OriginKind) -> Option<&dyn ProcessorFactory> {
        self.factories.get(&kind).map(|f| f.as_ref())
    }

    pub fn contains(&self, kind: OriginKind) -> bool {
        self.factories.contains_key(&kind)
    }

    pub fn kinds(&self) -> impl Iterator<Item = OriginKind> + '_ {
        self.factories.keys().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;

    struct Noop;

    impl SynchronizationProcessor for Noop {
        fn process(&self, _origin: &MailboxOrigin) -> Result<()> {
            Ok(())
        }
    }

    struct Failing;

    impl SynchronizationProcessor for Failing {
        fn process(&self, _origin: &MailboxOrigin) -> Result<()> {
            bail!("connection refused")
        }
    }

    #[test]
    fn test_lookup_by_kind() {
        let registry = ProcessorRegistry::new()
            .with(
                OriginKind::Imap,
                |_: &MailboxOrigin| -> Result<Box<dyn SynchronizationProcessor>> {
                    Ok(Box::new(Noop))
                },
            )
            .with(
                OriginKind::Pop3,
                |_: &MailboxOrigin| -> Result<Box<dyn SynchronizationProcessor>> {
                    Ok(Box::new(Failing))
                },
            );

        assert!(registry.contains(OriginKind::Imap));
        assert!(registry.get(OriginKind::Internal).is_none());

        let origin = MailboxOrigin::new(OriginKind::Pop3);
        let processor = registry.get(OriginKind::Pop3).unwrap().create(&origin).unwrap();
        assert!(processor.process(&origin).is_err());
        assert_eq!(registry.kinds().count(), 2);
    }
}
