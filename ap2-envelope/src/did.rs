//! DID resolution (§4.2 step 5, §6 "DID document location").
//!
//! A resolver turns a bare DID (`did:ap2:merchant:acme`) into the
//! [`DidDocument`] published at that service's `GET /.well-known/did.json`.
//! Every service process keeps a local cache in front of the network call,
//! matching the "local cache + remote well-known document" wording in §4.2.

use ap2_model::did::DidDocument;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::time::Duration;

use crate::error::{Error, Result};

/// Resolves a DID to its published document.
#[async_trait]
pub trait DidResolver: Send + Sync {
    async fn resolve(&self, did: &str) -> Result<DidDocument>;

    /// Convenience: resolve a fully-qualified `kid` (`did:...#key-N`) to the
    /// hex-encoded public key of that verification method.
    async fn resolve_public_key(&self, kid: &str) -> Result<String> {
        let (did, _fragment) = kid
            .split_once('#')
            .ok_or_else(|| Error::MalformedKid(kid.to_string()))?;
        let doc = self.resolve(did).await?;
        doc.public_key_hex_for_kid(kid)
            .ok_or_else(|| Error::DidResolution(did.to_string(), format!("no verification method {kid}")))
    }
}

/// An in-memory resolver seeded at construction time. Used in tests and by
/// any service wiring that knows every peer's DID document up front (e.g.
/// single-process integration tests) without a network round trip.
#[derive(Default)]
pub struct StaticDidResolver {
    documents: HashMap<String, DidDocument>,
}

impl StaticDidResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_document(mut self, doc: DidDocument) -> Self {
        self.documents.insert(doc.did().to_string(), doc);
        self
    }

    pub fn insert(&mut self, doc: DidDocument) {
        self.documents.insert(doc.did().to_string(), doc);
    }
}

#[async_trait]
impl DidResolver for StaticDidResolver {
    async fn resolve(&self, did: &str) -> Result<DidDocument> {
        self.documents
            .get(did)
            .cloned()
            .ok_or_else(|| Error::DidResolution(did.to_string(), "not in static registry".to_string()))
    }
}

/// Resolves DIDs over HTTP against a configured `did -> base_url` registry,
/// caching documents in-process. A real multi-organisation deployment would
/// resolve `did:ap2:*` through a DID method driver; this core's registry is
/// the equivalent of the teacher node's static peer-address book.
pub struct CachingHttpResolver {
    client: reqwest::Client,
    base_urls: HashMap<String, String>,
    cache: DashMap<String, DidDocument>,
}

impl CachingHttpResolver {
    pub fn new(base_urls: HashMap<String, String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(5))
            .build()
            .expect("reqwest client builds with static config");
        Self {
            client,
            base_urls,
            cache: DashMap::new(),
        }
    }

    /// Drop a cached document, forcing the next resolve to hit the network.
    pub fn invalidate(&self, did: &str) {
        self.cache.remove(did);
    }
}

#[async_trait]
impl DidResolver for CachingHttpResolver {
    async fn resolve(&self, did: &str) -> Result<DidDocument> {
        if let Some(doc) = self.cache.get(did) {
            return Ok(doc.clone());
        }

        let base = self
            .base_urls
            .get(did)
            .ok_or_else(|| Error::DidResolution(did.to_string(), "no registered base URL".to_string()))?;
        let url = format!("{}/.well-known/did.json", base.trim_end_matches('/'));

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::DidResolution(did.to_string(), e.to_string()))?;
        let doc: DidDocument = response
            .error_for_status()
            .map_err(|e| Error::DidResolution(did.to_string(), e.to_string()))?
            .json()
            .await
            .map_err(|e| Error::DidResolution(did.to_string(), e.to_string()))?;

        self.cache.insert(did.to_string(), doc.clone());
        Ok(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ap2_crypto::keys::{Algorithm, KeyPair};

    #[tokio::test]
    async fn static_resolver_resolves_registered_documents() {
        let key = KeyPair::generate(Algorithm::EcdsaP256);
        let doc = DidDocument::single_key("did:ap2:merchant:acme", &key);
        let resolver = StaticDidResolver::new().with_document(doc);

        let resolved = resolver.resolve("did:ap2:merchant:acme").await.unwrap();
        assert_eq!(resolved.id, "did:ap2:merchant:acme");

        let public_key = resolver
            .resolve_public_key("did:ap2:merchant:acme#key-1")
            .await
            .unwrap();
        assert_eq!(public_key, hex::encode(key.public_key_bytes()));
    }

    #[tokio::test]
    async fn static_resolver_rejects_unknown_did() {
        let resolver = StaticDidResolver::new();
        assert!(resolver.resolve("did:ap2:merchant:ghost").await.is_err());
    }
}
