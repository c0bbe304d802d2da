//! Owner resolution for newly stored addresses

use std::collections::HashMap;

use anyhow::Result;

use crate::models::{OwnerRef, normalize_address};
use crate::storage::EmailEntityStore;

/// Resolves the business record owning an email address
///
/// Only consulted for addresses that are about to be inserted.
pub trait EmailOwnerProvider {
    fn find_owner(
        &self,
        store: &dyn EmailEntityStore,
        normalized_email: &str,
    ) -> Result<Option<OwnerRef>>;
}

impl<F> EmailOwnerProvider for F
where
    F: Fn(&dyn EmailEntityStore, &str) -> Result<Option<OwnerRef>>,
{
    fn find_owner(
        &self,
        store: &dyn EmailEntityStore,
        normalized_email: &str,
    ) -> Result<Option<OwnerRef>> {
        self(store, normalized_email)
    }
}

/// Never finds an owner
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOwnerProvider;

impl EmailOwnerProvider for NoOwnerProvider {
    fn find_owner(&self, _store: &dyn EmailEntityStore, _normalized_email: &str) -> Result<Option<OwnerRef>> {
        Ok(None)
    }
}

/// Fixed mapping from addresses to owners
#[derive(Debug, Default, Clone)]
pub struct OwnerDirectory {
    owners: HashMap<String, OwnerRef>,
}

impl OwnerDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, email: &str, owner: OwnerRef) {
        self.owners.insert(normalize_address(email), owner);
    }

    pub fn with(mut self, email: &str, owner: OwnerRef) -> Self {
        self.insert(email, owner);
        self
    }
}

impl EmailOwnerProvider for OwnerDirectory {
    fn find_owner(&self, _store: &dyn EmailEntityStore, normalized_email: &str) -> Result<Option<OwnerRef>> {
        Ok(self.owners.get(normalized_email).cloned())
    }
}

/// Asks each provider in turn and returns the first owner found
#[derive(Default)]
pub struct OwnerProviderChain {
    providers: Vec<Box<dyn EmailOwnerProvider>>,
}

impl OwnerProviderChain {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(mut self, provider: impl EmailOwnerProvider + 'static) -> Self {
        self.providers.push(Box::new(provider));
        self
    }
}

impl EmailOwnerProvider for OwnerProviderChain {
    fn find_owner(
        &self,
        store: &dyn EmailEntityStore,
        normalized_email: &str,
    ) -> Result<Option<OwnerRef>> {
        for provider in &self.providers {
            if let Some(owner) = provider.find_owner(store, normalized_email)? {
                return Ok(Some(owner));
            }
        }
        Ok(None)
    }
}
