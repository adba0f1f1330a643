//! Mock HTTP command agent for testing the agent transport
//!
//! Answers `POST /command/execute` the way the agent binary does, without
//! running anything.

use serde_json::json;
use wiremock::{
    matchers::{body_partial_json, header, method, path},
    Mock, MockServer, ResponseTemplate,
};

pub struct MockAgentServer {
    pub server: MockServer,
    /// `ip:port`, usable directly as a host name by the agent executor
    pub host: String,
}

impl MockAgentServer {
    pub async fn start() -> Self {
        let server = MockServer::start().await;
        let host = server.address().to_string();
        Self { server, host }
    }

    /// Command ran to completion with `exit_code`
    pub async fn mock_completed(&self, command: &str, exit_code: i32, stdout: &str) {
        Mock::given(method("POST"))
            .and(path("/command/execute"))
            .and(header("Authorization", "Bearer test-api-key"))
            .and(body_partial_json(json!({ "command": command })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": true,
                "exit_code": exit_code,
                "stdout": stdout,
                "stderr": "",
                "timed_out": false
            })))
            .mount(&self.server)
            .await;
    }

    pub async fn mock_timed_out(&self) {
        Mock::given(method("POST"))
            .and(path("/command/execute"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": false,
                "stdout": "partial",
                "stderr": "",
                "timed_out": true
            })))
            .mount(&self.server)
            .await;
    }

    pub async fn mock_spawn_error(&self) {
        Mock::given(method("POST"))
            .and(path("/command/execute"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "success": false,
                "stdout": "",
                "stderr": "",
                "timed_out": false,
                "error": "Failed to spawn command: No such file or directory"
            })))
            .mount(&self.server)
            .await;
    }

    pub async fn mock_status(&self, status: u16) {
        Mock::given(method("POST"))
            .and(path("/command/execute"))
            .respond_with(ResponseTemplate::new(status).set_body_string("denied"))
            .mount(&self.server)
            .await;
    }
}
