use crate::engine::{EngineError, EngineHandle};
use facegate_core::{BatchOutcome, EnrollOutcome, IdentityStore, StoreError};
use facegate_relay::EventRelay;
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use zbus::interface;

/// D-Bus enrollment surface of the gating daemon.
///
/// Bus name: org.facegate.Gate1
/// Object path: /org/facegate/Gate1
///
/// Every method replies with a JSON object carrying `success` and `message`;
/// store failures are reported in-band rather than as D-Bus errors.
pub struct GateService {
    pub store: Arc<IdentityStore>,
    pub engine: EngineHandle,
    pub relay: Option<Arc<EventRelay>>,
    pub video_source: String,
}

#[interface(name = "org.facegate.Gate1")]
impl GateService {
    /// Enroll the single face in an encoded image (JPEG or PNG) under `name`.
    async fn enroll(&self, name: &str, image: Vec<u8>) -> zbus::fdo::Result<String> {
        tracing::info!(name, bytes = image.len(), "enroll requested");
        let decoded = match image::load_from_memory(&image) {
            Ok(decoded) => decoded.to_rgb8(),
            Err(e) => return Ok(failure(format!("cannot decode image: {e}"))),
        };
        Ok(enroll_reply(self.engine.enroll(name.to_string(), decoded).await))
    }

    /// Enroll every JPEG/PNG in a daemon-readable directory, file stem as name.
    async fn enroll_batch(&self, directory: &str) -> zbus::fdo::Result<String> {
        tracing::info!(directory, "batch enroll requested");
        Ok(batch_reply(self.engine.enroll_batch(PathBuf::from(directory)).await))
    }

    async fn revoke(&self, name: &str) -> zbus::fdo::Result<String> {
        tracing::info!(name, "revoke requested");
        let store = Arc::clone(&self.store);
        let owned = name.to_string();
        let result = tokio::task::spawn_blocking(move || store.revoke(&owned))
            .await
            .map_err(|e| zbus::fdo::Error::Failed(e.to_string()))?;
        Ok(revoke_reply(name, result))
    }

    async fn list_identities(&self) -> zbus::fdo::Result<String> {
        let names = self.store.names();
        Ok(json!({
            "success": true,
            "message": format!("{} identities enrolled", names.len()),
            "identities": names,
        })
        .to_string())
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let relay = self
            .relay
            .as_ref()
            .map(|r| r.state().to_string())
            .unwrap_or_else(|| "disabled".to_string());
        Ok(json!({
            "success": true,
            "message": "running",
            "version": env!("CARGO_PKG_VERSION"),
            "identities": self.store.len(),
            "db_path": self.store.config().db_path,
            "video_source": self.video_source,
            "relay": relay,
        })
        .to_string())
    }
}

fn failure(message: String) -> String {
    json!({"success": false, "message": message}).to_string()
}

fn enroll_reply(result: Result<EnrollOutcome, EngineError>) -> String {
    match result {
        Ok(outcome) => {
            let replaced = match &outcome {
                EnrollOutcome::Registered { .. } => Vec::new(),
                EnrollOutcome::Replaced { previous, .. } => previous.clone(),
            };
            json!({
                "success": true,
                "message": outcome.to_string(),
                "name": outcome.name(),
                "replaced": replaced,
            })
            .to_string()
        }
        Err(e) => failure(e.to_string()),
    }
}

fn revoke_reply(name: &str, result: Result<(), StoreError>) -> String {
    match result {
        Ok(()) => json!({"success": true, "message": format!("revoked identity {name}"), "name": name}).to_string(),
        Err(e) => failure(e.to_string()),
    }
}

fn batch_reply(result: Result<BatchOutcome, EngineError>) -> String {
    match result {
        Ok(outcome) => json!({
            "success": true,
            "message": format!("registered {} identities, {} failed", outcome.registered, outcome.failed.len()),
            "registered": outcome.registered,
            "failed": outcome.failed,
        })
        .to_string(),
        Err(e) => failure(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn parse(reply: String) -> Value {
        serde_json::from_str(&reply).unwrap()
    }

    #[test]
    fn test_enroll_reply_lists_replaced_identities() {
        let reply = parse(enroll_reply(Ok(EnrollOutcome::Replaced {
            name: "alice".into(),
            previous: vec!["al".into()],
        })));
        assert_eq!(reply["success"], true);
        assert_eq!(reply["name"], "alice");
        assert_eq!(reply["replaced"], json!(["al"]));
        assert_eq!(reply["message"], "registered alice, replaced existing identity al");
    }

    #[test]
    fn test_store_errors_become_unsuccessful_replies() {
        let reply = parse(enroll_reply(Err(EngineError::Store(StoreError::NoFaceDetected))));
        assert_eq!(reply["success"], false);
        assert!(!reply["message"].as_str().unwrap().is_empty());

        let reply = parse(batch_reply(Err(EngineError::ChannelClosed)));
        assert_eq!(reply["success"], false);
    }

    #[test]
    fn test_revoke_reply_names_the_identity() {
        let reply = parse(revoke_reply("alice", Ok(())));
        assert_eq!(reply["success"], true);
        assert_eq!(reply["name"], "alice");
        assert_eq!(reply["message"], "revoked identity alice");

        let reply = parse(revoke_reply("mallory", Err(StoreError::NotFound("mallory".into()))));
        assert_eq!(reply["success"], false);
        assert_eq!(reply["message"], "identity not found: mallory");
    }

    #[test]
    fn test_batch_reply_counts() {
        let reply = parse(batch_reply(Ok(BatchOutcome {
            registered: 2,
            failed: vec!["group.jpg".into()],
        })));
        assert_eq!(reply["registered"], 2);
        assert_eq!(reply["failed"], json!(["group.jpg"]));
    }
}
