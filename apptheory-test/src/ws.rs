use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::{json, Value};

use apptheory_core::{Error, ManagementClient, ManagementClientFactory};

/// One recorded management-client invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WsCall {
    pub op: String,
    pub endpoint: String,
    pub connection_id: String,
    pub data: Vec<u8>,
}

struct RecordingClient {
    endpoint: String,
    calls: Arc<Mutex<Vec<WsCall>>>,
}

#[async_trait]
impl ManagementClient for RecordingClient {
    async fn post_to_connection(&self, connection_id: &str, data: &[u8]) -> Result<(), Error> {
        self.calls.lock().unwrap().push(WsCall {
            op: "post_to_connection".to_string(),
            endpoint: self.endpoint.clone(),
            connection_id: connection_id.trim().to_string(),
            data: data.to_vec(),
        });
        Ok(())
    }

    async fn get_connection(&self, connection_id: &str) -> Result<Value, Error> {
        self.calls.lock().unwrap().push(WsCall {
            op: "get_connection".to_string(),
            endpoint: self.endpoint.clone(),
            connection_id: connection_id.trim().to_string(),
            data: Vec::new(),
        });
        Ok(json!({}))
    }

    async fn delete_connection(&self, connection_id: &str) -> Result<(), Error> {
        self.calls.lock().unwrap().push(WsCall {
            op: "delete_connection".to_string(),
            endpoint: self.endpoint.clone(),
            connection_id: connection_id.trim().to_string(),
            data: Vec::new(),
        });
        Ok(())
    }
}

/// Client factory that records every outbound call instead of talking to a
/// management endpoint. The call log is shared across all clients the
/// factory creates, in invocation order.
#[derive(Clone, Default)]
pub struct RecordingClientFactory {
    calls: Arc<Mutex<Vec<WsCall>>>,
}

impl RecordingClientFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<WsCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn factory(&self) -> ManagementClientFactory {
        let calls = self.calls.clone();
        Arc::new(move |endpoint| {
            Ok(Arc::new(RecordingClient {
                endpoint: endpoint.trim().to_string(),
                calls: calls.clone(),
            }) as Arc<dyn ManagementClient>)
        })
    }
}
