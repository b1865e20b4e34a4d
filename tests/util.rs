#![allow(clippy::unwrap_used, clippy::expect_used, dead_code)]

use std::sync::{Arc, Mutex};

use serde_json::{json, Map, Value};
use stockroom::{
    AppConfig, InventoryApp, MemoryIdentityProvider, MemoryStore, RawRecord, RecordStore,
    RecordingNotifier,
};

pub const EMAIL: &str = "ops@example.com";
pub const PASSWORD: &str = "hunter22";

pub struct Harness {
    pub app: InventoryApp<MemoryStore, MemoryIdentityProvider>,
    pub store: MemoryStore,
    pub provider: MemoryIdentityProvider,
    pub notifier: RecordingNotifier,
}

/// App over fresh in-process backends with one registered (signed-out) account.
pub async fn harness() -> Harness {
    let store = MemoryStore::new();
    let provider = MemoryIdentityProvider::new();
    {
        use stockroom::IdentityProvider;
        provider.sign_up(EMAIL, PASSWORD).await.unwrap();
        provider.sign_out().await;
    }
    let notifier = RecordingNotifier::new();
    let app = InventoryApp::new(
        store.clone(),
        provider.clone(),
        &AppConfig::default(),
        Arc::new(notifier.clone()),
    );
    Harness {
        app,
        store,
        provider,
        notifier,
    }
}

pub fn doc(name: &str, code: &str, quantity: u64, unit: &str) -> Map<String, Value> {
    match json!({ "name": name, "code": code, "quantity": quantity, "unit": unit }) {
        Value::Object(map) => map,
        _ => unreachable!(),
    }
}

/// Write straight to the store, as another client would.
pub async fn seed(store: &MemoryStore, name: &str, code: &str, quantity: u64) -> String {
    store
        .create("inventory", doc(name, code, quantity, "pcs"))
        .await
        .unwrap()
}

pub fn raw(id: &str, code: &str, quantity: u64, low: Option<u64>) -> RawRecord {
    let mut data = doc(&format!("Item {code}"), code, quantity, "pcs");
    if let Some(low) = low {
        data.insert("lowThreshold".into(), json!(low));
    }
    RawRecord::new(id, data)
}

#[derive(Clone)]
pub struct TestWriter(pub Arc<Mutex<Vec<u8>>>);

impl std::io::Write for TestWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

pub fn read_buffer(buffer: &Arc<Mutex<Vec<u8>>>) -> String {
    String::from_utf8(buffer.lock().unwrap().clone()).unwrap()
}
