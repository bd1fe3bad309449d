use std::time::Duration;

use log::{debug, info, trace};
use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{parse_structured, BackendConfig, ChatMessage, GenerationError, Generator};

/// Ollama `/api/chat` client. The schema travels in the `format` field so
/// the server constrains decoding to it.
pub struct Ollama {
    client: Client,
    base_url: String,
    model: String,
    timeout: Duration,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    format: &'a Value,
    stream: bool,
    options: ChatOptions,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ReplyMessage,
}

#[derive(Deserialize)]
struct ReplyMessage {
    content: String,
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

impl Ollama {
    pub fn new(config: &BackendConfig) -> Result<Self, GenerationError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GenerationError::BackendUnavailable(e.to_string()))?;

        info!(
            "Ollama backend: url={}, model={}, timeout={:?}",
            config.base_url, config.model, config.timeout
        );

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            timeout: config.timeout,
            temperature: config.temperature,
        })
    }

    fn classify(&self, err: reqwest::Error) -> GenerationError {
        if err.is_timeout() {
            GenerationError::Timeout(self.timeout)
        } else if err.is_connect() {
            GenerationError::BackendUnavailable(err.to_string())
        } else {
            GenerationError::Backend(err.to_string())
        }
    }
}

impl Generator for Ollama {
    fn generate(
        &mut self,
        messages: &[ChatMessage],
        schema: &Value,
    ) -> Result<Value, GenerationError> {
        info!("=== LLM CALL: {} messages ===", messages.len());
        for (i, msg) in messages.iter().enumerate() {
            debug!("  msg[{i}] {msg}");
        }

        let request = ChatRequest {
            model: &self.model,
            messages,
            format: schema,
            stream: false,
            options: ChatOptions {
                temperature: self.temperature,
            },
        };

        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&request)
            .send()
            .map_err(|e| self.classify(e))?;

        let status = response.status();
        let body = response.text().map_err(|e| self.classify(e))?;
        trace!("=== LLM RAW RESPONSE ({status}) ===\n{body}\n=== END RESPONSE ===");

        if !status.is_success() {
            let message = serde_json::from_str::<ErrorBody>(&body)
                .map(|b| b.error)
                .unwrap_or(body);
            return Err(classify_status(status, &self.model, message));
        }

        let reply: ChatResponse = serde_json::from_str(&body)
            .map_err(|e| GenerationError::MalformedResponse(format!("{e}: {body}")))?;

        info!(
            "=== LLM OUTPUT ({} chars) ===",
            reply.message.content.len()
        );
        parse_structured(&reply.message.content)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}

fn classify_status(status: StatusCode, model: &str, message: String) -> GenerationError {
    if status == StatusCode::NOT_FOUND || message.contains("not found") {
        GenerationError::ModelNotFound(model.to_string())
    } else if status == StatusCode::SERVICE_UNAVAILABLE || status == StatusCode::BAD_GATEWAY {
        GenerationError::BackendUnavailable(message)
    } else {
        GenerationError::Backend(format!("{status}: {message}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;
    use std::thread;

    #[test]
    fn test_missing_model_maps_to_model_not_found() {
        let err = classify_status(
            StatusCode::NOT_FOUND,
            "mystery-7b",
            "model 'mystery-7b' not found".into(),
        );
        assert!(matches!(err, GenerationError::ModelNotFound(m) if m == "mystery-7b"));
    }

    #[test]
    fn test_server_error_is_generic_backend_error() {
        let err = classify_status(StatusCode::INTERNAL_SERVER_ERROR, "m", "boom".into());
        assert!(matches!(err, GenerationError::Backend(_)));
    }

    fn client_for(port: u16, timeout: Duration) -> Ollama {
        let config = BackendConfig {
            base_url: format!("http://127.0.0.1:{port}"),
            timeout,
            ..BackendConfig::default()
        };
        Ollama::new(&config).unwrap()
    }

    fn ask(ollama: &mut Ollama) -> GenerationError {
        ollama
            .generate(&[ChatMessage::user("hi")], &serde_json::json!({}))
            .unwrap_err()
    }

    #[test]
    fn test_refused_connection_is_backend_unavailable() {
        let port = {
            let listener = TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let err = ask(&mut client_for(port, Duration::from_secs(5)));
        assert!(
            matches!(err, GenerationError::BackendUnavailable(_)),
            "got {err:?}"
        );
    }

    #[test]
    fn test_silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let server = thread::spawn(move || {
            // Hold the connection open without ever answering.
            let (stream, _) = listener.accept().unwrap();
            thread::sleep(Duration::from_secs(3));
            drop(stream);
        });

        let err = ask(&mut client_for(port, Duration::from_secs(1)));
        assert!(
            matches!(err, GenerationError::Timeout(t) if t == Duration::from_secs(1)),
            "got {err:?}"
        );
        server.join().unwrap();
    }

    #[test]
    fn test_request_body_carries_schema_as_format() {
        let schema = serde_json::json!({"type": "object"});
        let messages = [ChatMessage::system("be brief")];
        let req = ChatRequest {
            model: "llama3.1",
            messages: &messages,
            format: &schema,
            stream: false,
            options: ChatOptions { temperature: 0.5 },
        };
        let body = serde_json::to_value(&req).unwrap();
        assert_eq!(body["format"]["type"], "object");
        assert_eq!(body["messages"][0]["role"], "system");
        assert_eq!(body["stream"], false);
    }
}
