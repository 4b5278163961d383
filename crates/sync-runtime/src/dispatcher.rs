//! Delivery of one notification to every enabled connection.
//!
//! [`Dispatcher::dispatch`] never fails: each connection is attempted in turn
//! and any encryption or network failure is logged and counted without
//! affecting the remaining connections. There is no retry.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use sync_core::crypto;
use sync_core::error::{Result, SyncError};
use sync_core::models::{Connection, InboundNotification};
use sync_store::config_store::ConfigStore;

// ── Wire types ────────────────────────────────────────────────────────────────

/// Plaintext Bark payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BarkPayload {
    pub title: String,
    pub body: String,
}

impl BarkPayload {
    /// Build the payload for a notification; the body names its source package.
    pub fn from_notification(notification: &InboundNotification) -> Self {
        Self {
            title: notification.title.clone(),
            body: format!("{}\nfrom: {}", notification.body, notification.source_package),
        }
    }
}

/// Encrypted Bark payload. `iv` serialises as `null` for ECB modes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EncryptedEnvelope {
    pub ciphertext: String,
    pub iv: Option<String>,
}

/// The JSON body POSTed to an endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum Envelope {
    Plain(BarkPayload),
    Encrypted(EncryptedEnvelope),
}

/// Build the envelope for `connection`, encrypting when it is configured to.
pub fn build_envelope(connection: &Connection, payload: &BarkPayload) -> Result<Envelope> {
    let Some(enc) = &connection.encryption else {
        return Ok(Envelope::Plain(payload.clone()));
    };

    let plaintext = serde_json::to_string(payload)?;
    let iv = if enc.cipher_mode.requires_iv() {
        enc.iv.as_deref()
    } else {
        None
    };
    let ciphertext = crypto::encrypt(&plaintext, &enc.key, enc.cipher_mode, iv)?;

    Ok(Envelope::Encrypted(EncryptedEnvelope {
        ciphertext,
        iv: iv.map(|v| v.chars().take(crypto::IV_LEN).collect()),
    }))
}

// ── DispatchReport ────────────────────────────────────────────────────────────

/// Outcome counts for one [`Dispatcher::dispatch`] call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Requests that produced an HTTP response of any status.
    pub delivered: usize,
    /// Connections whose delivery failed to encrypt or send.
    pub failed: usize,
    /// Disabled connections.
    pub skipped: usize,
}

// ── Dispatcher ────────────────────────────────────────────────────────────────

/// Sends notifications to the configured connections.
#[derive(Debug)]
pub struct Dispatcher {
    store: Arc<ConfigStore>,
    client: reqwest::Client,
    /// Notifications from this source are never forwarded.
    self_package: String,
}

impl Dispatcher {
    pub fn new(store: Arc<ConfigStore>, self_package: impl Into<String>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("notifisync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SyncError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            store,
            client,
            self_package: self_package.into(),
        })
    }

    /// Forward `notification` to every enabled connection.
    pub async fn dispatch(&self, notification: &InboundNotification) -> DispatchReport {
        let mut report = DispatchReport::default();

        if notification.source_package == self.self_package {
            tracing::debug!("skipping self-originated notification");
            return report;
        }

        let payload = BarkPayload::from_notification(notification);
        for (name, connection) in self.store.load_connections() {
            if !connection.enabled {
                report.skipped += 1;
                continue;
            }
            match self.deliver(&connection, &payload).await {
                Ok(status) => {
                    tracing::info!(
                        connection = %name,
                        status,
                        encrypted = connection.encryption.is_some(),
                        "notification delivered"
                    );
                    report.delivered += 1;
                }
                Err(e) => {
                    tracing::error!(connection = %name, error = %e, "delivery failed");
                    report.failed += 1;
                }
            }
        }

        report
    }

    /// Send a fixed test message through one connection, ignoring its
    /// enabled flag. Returns the HTTP status code.
    pub async fn send_test(&self, name: &str) -> Result<u16> {
        let connections = self.store.try_load_connections()?;
        let connection = connections
            .get(name)
            .ok_or_else(|| SyncError::Config(format!("no connection named '{name}'")))?;
        let payload = BarkPayload {
            title: "notifisync".to_string(),
            body: "Test message sent manually".to_string(),
        };
        self.deliver(connection, &payload).await
    }

    /// Encrypt if configured and POST one payload.
    async fn deliver(&self, connection: &Connection, payload: &BarkPayload) -> Result<u16> {
        let envelope = build_envelope(connection, payload)?;

        let response = self
            .client
            .post(&connection.address)
            .timeout(Duration::from_secs(connection.timeout_secs))
            .json(&envelope)
            .send()
            .await
            .map_err(|e| SyncError::Network(format!("POST {} failed: {e}", connection.address)))?;

        Ok(response.status().as_u16())
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{json, Value};
    use sync_core::models::{CipherMode, Encryption};
    use tempfile::TempDir;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const KEY16: &str = "0123456789ABCDEF";
    const IV16: &str = "FEDCBA9876543210";

    fn setup(dir: &TempDir, connections: Vec<Connection>) -> Dispatcher {
        let store = Arc::new(ConfigStore::new(dir.path().to_path_buf(), None));
        for c in connections {
            store.add_connection(c).unwrap();
        }
        Dispatcher::new(store, "notifisync").unwrap()
    }

    fn cbc_connection(name: &str, address: String) -> Connection {
        Connection::bark(name, address).with_encryption(Encryption {
            cipher_mode: CipherMode::Aes128Cbc,
            key: KEY16.to_string(),
            iv: Some(IV16.to_string()),
        })
    }

    async fn bodies(server: &MockServer) -> Vec<Value> {
        server
            .received_requests()
            .await
            .unwrap_or_default()
            .iter()
            .map(|r| serde_json::from_slice(&r.body).unwrap())
            .collect()
    }

    // ── envelope ──────────────────────────────────────────────────────────

    #[test]
    fn test_payload_names_source_package() {
        let n = InboundNotification::new("com.example.chat", "Hi", "see you");
        let payload = BarkPayload::from_notification(&n);
        assert_eq!(payload.title, "Hi");
        assert_eq!(payload.body, "see you\nfrom: com.example.chat");
    }

    #[test]
    fn test_plain_envelope_shape() {
        let conn = Connection::bark("a", "https://a");
        let payload = BarkPayload {
            title: "t".into(),
            body: "b".into(),
        };
        let value = serde_json::to_value(build_envelope(&conn, &payload).unwrap()).unwrap();
        assert_eq!(value, json!({"title": "t", "body": "b"}));
    }

    #[test]
    fn test_ecb_envelope_has_null_iv() {
        let conn = Connection::bark("a", "https://a").with_encryption(Encryption {
            cipher_mode: CipherMode::Aes128Ecb,
            key: KEY16.to_string(),
            iv: Some(IV16.to_string()),
        });
        let payload = BarkPayload {
            title: "t".into(),
            body: "b".into(),
        };
        let value = serde_json::to_value(build_envelope(&conn, &payload).unwrap()).unwrap();
        assert!(value["ciphertext"].is_string());
        assert!(value["iv"].is_null());
    }

    #[test]
    fn test_encrypted_envelope_decrypts_to_payload() {
        let conn = cbc_connection("a", "https://a".into());
        let payload = BarkPayload {
            title: "Hi".into(),
            body: "secret".into(),
        };
        let Envelope::Encrypted(env) = build_envelope(&conn, &payload).unwrap() else {
            panic!("expected encrypted envelope");
        };
        assert_eq!(env.iv.as_deref(), Some(IV16));
        let plain = crypto::decrypt(&env.ciphertext, KEY16, CipherMode::Aes128Cbc, Some(IV16))
            .unwrap();
        assert_eq!(plain, serde_json::to_string(&payload).unwrap());
    }

    // ── dispatch ──────────────────────────────────────────────────────────

    #[tokio::test]
    async fn test_dispatch_plain_post() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/push"))
            .and(header("content-type", "application/json"))
            .and(body_json(json!({"title": "Hi", "body": "hello\nfrom: com.example.chat"})))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let d = setup(
            &dir,
            vec![Connection::bark("home", format!("{}/push", server.uri()))],
        );
        let report = d
            .dispatch(&InboundNotification::new("com.example.chat", "Hi", "hello"))
            .await;
        assert_eq!(
            report,
            DispatchReport {
                delivered: 1,
                failed: 0,
                skipped: 0
            }
        );
    }

    #[tokio::test]
    async fn test_dispatch_encrypted_never_leaks_plaintext() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let d = setup(&dir, vec![cbc_connection("enc", format!("{}/push", server.uri()))]);
        d.dispatch(&InboundNotification::new("com.chat", "Hi", "private"))
            .await;

        let received = bodies(&server).await;
        assert_eq!(received.len(), 1);
        let obj = received[0].as_object().unwrap();
        let mut keys: Vec<&str> = obj.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(keys, ["ciphertext", "iv"]);
        assert!(!received[0].to_string().contains("private"));
    }

    #[tokio::test]
    async fn test_dispatch_skips_disabled_connections() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let mut off = Connection::bark("off", format!("{}/off", server.uri()));
        off.enabled = false;
        let d = setup(&dir, vec![Connection::bark("on", format!("{}/on", server.uri())), off]);

        let report = d.dispatch(&InboundNotification::new("p", "t", "b")).await;
        assert_eq!(report.delivered, 1);
        assert_eq!(report.skipped, 1);
    }

    #[tokio::test]
    async fn test_dispatch_skips_self_originated() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let d = setup(&dir, vec![Connection::bark("a", server.uri())]);
        let report = d.dispatch(&InboundNotification::new("notifisync", "t", "b")).await;
        assert_eq!(report, DispatchReport::default());
    }

    #[tokio::test]
    async fn test_error_status_counts_as_delivered() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let d = setup(&dir, vec![Connection::bark("a", server.uri())]);
        let report = d.dispatch(&InboundNotification::new("p", "t", "b")).await;
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 0);
    }

    #[tokio::test]
    async fn test_network_failure_does_not_block_other_connections() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        // Port 9 on localhost is not expected to accept HTTP connections.
        let d = setup(
            &dir,
            vec![
                Connection::bark("a-dead", "http://127.0.0.1:9/push"),
                Connection::bark("b-live", server.uri()),
            ],
        );
        let report = d.dispatch(&InboundNotification::new("p", "t", "b")).await;
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 1);
    }

    #[tokio::test]
    async fn test_encryption_failure_aborts_only_that_delivery() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let d = setup(&dir, vec![Connection::bark("good", server.uri())]);
        // Bypass validation to store a CBC connection with no IV.
        let mut map = d.store.try_load_connections().unwrap();
        let mut broken = cbc_connection("broken", server.uri());
        broken.encryption.as_mut().unwrap().iv = None;
        map.insert("broken".to_string(), broken);
        d.store.save_connections(&map).unwrap();

        let report = d.dispatch(&InboundNotification::new("p", "t", "b")).await;
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 1);
    }

    #[tokio::test]
    async fn test_send_test_reports_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let mut conn = Connection::bark("a", server.uri());
        conn.enabled = false;
        let d = setup(&dir, vec![conn]);
        assert_eq!(d.send_test("a").await.unwrap(), 400);
        assert!(matches!(d.send_test("ghost").await, Err(SyncError::Config(_))));
    }
}
