use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::Error;

/// Outbound capability for pushing bytes onto a specific socket connection.
///
/// The production implementation wraps the gateway's management endpoint;
/// the test factory records call tuples instead.
#[async_trait]
pub trait ManagementClient: Send + Sync {
    async fn post_to_connection(&self, connection_id: &str, data: &[u8]) -> Result<(), Error>;
    async fn get_connection(&self, connection_id: &str) -> Result<Value, Error>;
    async fn delete_connection(&self, connection_id: &str) -> Result<(), Error>;
}

/// Builds a management client for a management endpoint URL.
pub type ManagementClientFactory =
    Arc<dyn Fn(&str) -> Result<Arc<dyn ManagementClient>, Error> + Send + Sync>;

enum ClientSlot {
    Empty,
    Ready(Arc<dyn ManagementClient>),
    Failed(String),
}

struct SocketInner {
    connection_id: String,
    route_key: String,
    event_type: String,
    domain_name: String,
    stage: String,
    management_endpoint: String,
    factory: Option<ManagementClientFactory>,
    client: Mutex<ClientSlot>,
}

/// Per-invocation socket capability attached to the request context.
///
/// The management client is instantiated lazily on first send; a factory
/// failure is cached so repeated sends fail the same way.
#[derive(Clone)]
pub struct WebSocketContext {
    inner: Arc<SocketInner>,
}

impl WebSocketContext {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        connection_id: impl Into<String>,
        route_key: impl Into<String>,
        event_type: impl Into<String>,
        domain_name: impl Into<String>,
        stage: impl Into<String>,
        management_endpoint: impl Into<String>,
        factory: Option<ManagementClientFactory>,
    ) -> Self {
        Self {
            inner: Arc::new(SocketInner {
                connection_id: connection_id.into().trim().to_string(),
                route_key: route_key.into().trim().to_string(),
                event_type: event_type.into().trim().to_string(),
                domain_name: domain_name.into().trim().to_string(),
                stage: stage.into().trim().to_string(),
                management_endpoint: management_endpoint.into().trim().to_string(),
                factory,
                client: Mutex::new(ClientSlot::Empty),
            }),
        }
    }

    pub fn connection_id(&self) -> &str {
        &self.inner.connection_id
    }

    pub fn route_key(&self) -> &str {
        &self.inner.route_key
    }

    pub fn event_type(&self) -> &str {
        &self.inner.event_type
    }

    pub fn domain_name(&self) -> &str {
        &self.inner.domain_name
    }

    pub fn stage(&self) -> &str {
        &self.inner.stage
    }

    pub fn management_endpoint(&self) -> &str {
        &self.inner.management_endpoint
    }

    fn management_client(&self) -> Result<Arc<dyn ManagementClient>, Error> {
        let mut slot = self.inner.client.lock().unwrap();
        match &*slot {
            ClientSlot::Ready(client) => return Ok(client.clone()),
            ClientSlot::Failed(message) => return Err(Error::internal(message.clone())),
            ClientSlot::Empty => {}
        }

        let Some(factory) = &self.inner.factory else {
            let message = "missing websocket client factory".to_string();
            *slot = ClientSlot::Failed(message.clone());
            return Err(Error::internal(message));
        };

        match factory(&self.inner.management_endpoint) {
            Ok(client) => {
                *slot = ClientSlot::Ready(client.clone());
                Ok(client)
            }
            Err(err) => {
                *slot = ClientSlot::Failed(err.message.clone());
                Err(err)
            }
        }
    }

    pub async fn send_message(&self, data: &[u8]) -> Result<(), Error> {
        if self.inner.connection_id.is_empty() {
            return Err(Error::internal("websocket connection id is empty"));
        }
        let client = self.management_client()?;
        client
            .post_to_connection(&self.inner.connection_id, data)
            .await
    }

    /// Serialize with canonical (sorted) keys and send.
    pub async fn send_json_message(&self, value: &Value) -> Result<(), Error> {
        let payload =
            serde_json::to_vec(value).map_err(|err| Error::internal(err.to_string()))?;
        self.send_message(&payload).await
    }

    pub async fn get_connection(&self) -> Result<Value, Error> {
        if self.inner.connection_id.is_empty() {
            return Err(Error::internal("websocket connection id is empty"));
        }
        let client = self.management_client()?;
        client.get_connection(&self.inner.connection_id).await
    }

    pub async fn delete_connection(&self) -> Result<(), Error> {
        if self.inner.connection_id.is_empty() {
            return Err(Error::internal("websocket connection id is empty"));
        }
        let client = self.management_client()?;
        client.delete_connection(&self.inner.connection_id).await
    }
}

impl std::fmt::Debug for WebSocketContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WebSocketContext")
            .field("connection_id", &self.inner.connection_id)
            .field("route_key", &self.inner.route_key)
            .field("event_type", &self.inner.event_type)
            .field("management_endpoint", &self.inner.management_endpoint)
            .finish()
    }
}

/// Derive the management endpoint for a socket event.
///
/// Gateway-managed (`execute-api`) domains address connections under the
/// stage; custom domains keep their own path.
pub fn management_endpoint(domain_name: &str, stage: &str, path: &str) -> String {
    let domain = domain_name.trim();
    if domain.is_empty() {
        return String::new();
    }

    let base = if domain.starts_with("https://") || domain.starts_with("http://") {
        domain.trim_end_matches('/').to_string()
    } else {
        format!("https://{}", domain.trim_end_matches('/'))
    };

    if domain.contains(".execute-api.") {
        let stage = stage.trim();
        if stage.is_empty() {
            return base;
        }
        return format!("{base}/{stage}");
    }

    let path = path.trim().trim_end_matches('/');
    if path.is_empty() || path == "/" {
        base
    } else {
        format!("{base}{path}")
    }
}

/// Normalize an explicit management endpoint URL: socket schemes map onto
/// their HTTP equivalents, bare hosts get `https://`.
pub fn normalize_endpoint(endpoint: &str) -> String {
    let value = endpoint.trim();
    if value.is_empty() {
        return String::new();
    }
    if let Some(rest) = value.strip_prefix("wss://") {
        return format!("https://{rest}");
    }
    if let Some(rest) = value.strip_prefix("ws://") {
        return format!("http://{rest}");
    }
    if value.starts_with("https://") || value.starts_with("http://") {
        return value.to_string();
    }
    format!("https://{value}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn management_endpoint_uses_stage_for_gateway_domains() {
        assert_eq!(
            management_endpoint("example.execute-api.us-east-1.amazonaws.com", "dev", "/"),
            "https://example.execute-api.us-east-1.amazonaws.com/dev"
        );
    }

    #[test]
    fn management_endpoint_keeps_custom_domain_paths() {
        assert_eq!(management_endpoint("", "dev", "/"), "");
        assert_eq!(
            management_endpoint("example.com", "production", "/"),
            "https://example.com"
        );
        assert_eq!(
            management_endpoint("https://example.com/", "production", "/socket/"),
            "https://example.com/socket"
        );
    }

    #[test]
    fn normalize_endpoint_maps_socket_schemes() {
        assert_eq!(normalize_endpoint(""), "");
        assert_eq!(
            normalize_endpoint("wss://example.com/dev"),
            "https://example.com/dev"
        );
        assert_eq!(
            normalize_endpoint("ws://example.com/dev"),
            "http://example.com/dev"
        );
        assert_eq!(
            normalize_endpoint("example.com/dev"),
            "https://example.com/dev"
        );
    }

    #[tokio::test]
    async fn send_requires_connection_id() {
        let ws = WebSocketContext::new("", "$default", "MESSAGE", "", "", "", None);
        let err = ws.send_message(b"x").await.unwrap_err();
        assert!(err.message.contains("connection id"));
    }

    #[tokio::test]
    async fn missing_factory_fails_and_is_cached() {
        let ws = WebSocketContext::new("c1", "$default", "MESSAGE", "d", "dev", "https://d/dev", None);
        let first = ws.send_message(b"x").await.unwrap_err();
        let second = ws.send_message(b"y").await.unwrap_err();
        assert_eq!(first.message, second.message);
    }
}
