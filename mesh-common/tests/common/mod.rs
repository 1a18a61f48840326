#![allow(dead_code)]

use chrono::{TimeZone, Utc};
use mesh_common::auth::TokenService;
use mesh_common::clock::ManualClock;
use mesh_common::registry::ServiceIdentity;
use mesh_common::store::InMemoryStore;
use secrecy::Secret;
use std::sync::Arc;

pub const TEST_SECRET: &str = "integration-test-secret";

pub fn secret() -> Secret<String> {
    Secret::new(TEST_SECRET.to_string())
}

/// Clock, store and token service that share the same notion of time.
pub struct TokenHarness {
    pub clock: ManualClock,
    pub store: Arc<InMemoryStore>,
    pub tokens: TokenService,
}

impl TokenHarness {
    pub fn new() -> Self {
        let clock = ManualClock::new(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap());
        let store = Arc::new(InMemoryStore::with_clock(Arc::new(clock.clone())));
        let tokens = TokenService::new(&secret(), store.clone()).with_clock(Arc::new(clock.clone()));

        Self {
            clock,
            store,
            tokens,
        }
    }

    pub fn advance_secs(&self, secs: i64) {
        self.clock.advance(chrono::Duration::seconds(secs));
    }

    pub fn advance_millis(&self, millis: i64) {
        self.clock.advance(chrono::Duration::milliseconds(millis));
    }
}

pub fn chat_identity() -> ServiceIdentity {
    ServiceIdentity {
        service_name: "chat".to_string(),
        instance_name: "chat_v2_abc123".to_string(),
        address: "172.17.0.1:32768".to_string(),
        service_url: "/api/chat".to_string(),
    }
}
