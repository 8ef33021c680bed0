//! 数据服务 AI 端点客户端集成测试（wiremock）

#[cfg(test)]
mod tests {
    use lifeos::llm::{HttpLlmClient, LlmClient, LlmError, Message};
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client(server: &MockServer) -> HttpLlmClient {
        HttpLlmClient::new(
            format!("{}/ai/generate", server.uri()),
            Some("service-key".to_string()),
            5,
        )
    }

    fn messages() -> Vec<Message> {
        vec![
            Message::system("You are the evolver"),
            Message::user("first question"),
            Message::assistant("an answer"),
            Message::user("Write the module"),
        ]
    }

    #[tokio::test]
    async fn test_complete_posts_system_and_last_user_message() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ai/generate"))
            .and(header("authorization", "Bearer service-key"))
            .and(header("apikey", "service-key"))
            .and(body_json(json!({
                "system": "You are the evolver",
                "user": "Write the module"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "text": "pub fn run() {}" })))
            .expect(1)
            .mount(&server)
            .await;

        let text = client(&server).complete(&messages()).await.unwrap();
        assert_eq!(text, "pub fn run() {}");
    }

    #[tokio::test]
    async fn test_complete_falls_back_to_content_field() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ai/generate"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "content": "from content" })))
            .mount(&server)
            .await;

        let text = client(&server).complete(&messages()).await.unwrap();
        assert_eq!(text, "from content");
    }

    #[tokio::test]
    async fn test_non_json_body_is_returned_as_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_string("plain answer"))
            .mount(&server)
            .await;

        let text = client(&server).complete(&messages()).await.unwrap();
        assert_eq!(text, "plain answer");
    }

    #[tokio::test]
    async fn test_server_error_carries_status_and_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ai/generate"))
            .respond_with(ResponseTemplate::new(500).set_body_string("model overloaded"))
            .mount(&server)
            .await;

        match client(&server).complete(&messages()).await {
            Err(LlmError::Status { status, body }) => {
                assert_eq!(status, 500);
                assert_eq!(body, "model overloaded");
            }
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_empty_text_is_empty_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "text": "  " })))
            .mount(&server)
            .await;

        assert!(matches!(
            client(&server).complete(&messages()).await,
            Err(LlmError::EmptyResponse)
        ));
    }

    #[tokio::test]
    async fn test_no_api_key_sends_no_auth_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "text": "ok" })))
            .mount(&server)
            .await;

        let client = HttpLlmClient::new(format!("{}/ai/generate", server.uri()), None, 5);
        assert_eq!(client.complete(&messages()).await.unwrap(), "ok");

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.len(), 1);
        assert!(!requests[0].headers.contains_key("authorization"));
        assert!(!requests[0].headers.contains_key("apikey"));
    }
}
