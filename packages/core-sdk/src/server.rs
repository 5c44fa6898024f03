use std::sync::Arc;

use anyhow::Result;
use axum::{
    body::Bytes,
    extract::State,
    http::{Method, StatusCode},
    routing::{any, get_service},
    Json, Router,
};
use serde_json::{json, Map, Value};
use tower_http::services::ServeDir;

use crate::{
    config::{BUILTIN_API_KEY, ZHIPU_CHAT_URL, ZHIPU_IMAGE_MODEL, ZHIPU_IMAGE_URL},
    models::ToolType,
    telemetry,
    upstream::{chat_body, post_json},
};

const DEFAULT_CHAT_MODEL: &str = "glm-4";

/**
 * \brief 代理服务端读取的环境配置，空白值视为未设置。
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEnv {
    /** \brief AI_API_KEY */
    pub api_key: Option<String>,
    /** \brief AI_IMAGE_API_KEY，缺省回落到通用密钥 */
    pub image_api_key: Option<String>,
    pub chat_url: String,
    pub chat_model: String,
    /** \brief AI_MAX_TOKENS，设置后覆盖按工具类型计算的值 */
    pub max_tokens: Option<u32>,
    pub image_url: String,
    pub image_model: String,
}

impl ServerEnv {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        Self {
            api_key: read("AI_API_KEY"),
            image_api_key: read("AI_IMAGE_API_KEY"),
            chat_url: read("AI_BASE_URL").unwrap_or_else(|| ZHIPU_CHAT_URL.to_string()),
            chat_model: read("AI_CHAT_MODEL").unwrap_or_else(|| DEFAULT_CHAT_MODEL.to_string()),
            max_tokens: read("AI_MAX_TOKENS").and_then(|v| v.parse().ok()),
            image_url: read("AI_IMAGE_BASE_URL").unwrap_or_else(|| ZHIPU_IMAGE_URL.to_string()),
            image_model: read("AI_IMAGE_MODEL").unwrap_or_else(|| ZHIPU_IMAGE_MODEL.to_string()),
        }
    }

    /**
     * \brief 对话密钥：环境变量优先，其次编译期内置密钥。
     */
    pub fn chat_key(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .or(BUILTIN_API_KEY.filter(|k| !k.is_empty()))
    }

    /**
     * \brief 图像密钥：专用密钥优先，回落到对话密钥。
     */
    pub fn image_key(&self) -> Option<&str> {
        self.image_api_key.as_deref().or_else(|| self.chat_key())
    }
}

/**
 * \brief 处理器共享的只读状态。
 */
#[derive(Clone)]
pub struct AppState {
    pub env: Arc<ServerEnv>,
    pub http: reqwest::Client,
}

impl AppState {
    pub fn new(env: ServerEnv) -> Self {
        Self {
            env: Arc::new(env),
            http: reqwest::Client::new(),
        }
    }
}

type ApiResponse = (StatusCode, Json<Value>);

/**
 * \brief 构建 `/api` 下的路由；方法校验由处理器自行完成，以便返回 JSON 错误体。
 */
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/chat", any(chat))
        .route("/api/image", any(image))
        .route("/api/health", any(health))
        .with_state(state)
}

/**
 * \brief 启动本地 HTTP 服务，提供静态前端与代理 API。
 * \param addr 监听地址，如 "127.0.0.1:3000"
 */
pub async fn run(addr: &str) -> Result<()> {
    let ui_root = std::env::var("KINDERPEN_UI_DIR").unwrap_or_else(|_| "web".to_string());
    let static_service = get_service(ServeDir::new(ui_root).append_index_html_on_directories(true));

    let env = ServerEnv::from_env();
    telemetry::log_event(
        "server.start",
        &format!(
            "addr={} chat_ready={} image_ready={}",
            addr,
            env.chat_key().is_some(),
            env.image_key().is_some()
        ),
    );
    let app = router(AppState::new(env)).fallback_service(static_service);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    println!("Server listening on http://{}", addr);
    axum::serve(listener, app).await?;
    Ok(())
}

fn error(status: StatusCode, message: impl Into<String>) -> ApiResponse {
    (status, Json(json!({ "error": message.into() })))
}

fn method_not_allowed() -> ApiResponse {
    error(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed")
}

/**
 * \brief 宽松解析请求体：JSON 对象直接使用；JSON 字符串再解析一次；其余情况视为空对象。
 */
pub fn parse_body(bytes: &[u8]) -> Map<String, Value> {
    match serde_json::from_slice::<Value>(bytes) {
        Ok(Value::Object(map)) => map,
        Ok(Value::String(text)) => match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(map)) => map,
            _ => Map::new(),
        },
        _ => Map::new(),
    }
}

/**
 * \brief 读取字段的文本形式并去除首尾空白；非零数字与 true 按字面转换，其余假值视为空。
 */
fn text_field(body: &Map<String, Value>, name: &str) -> String {
    match body.get(name) {
        Some(Value::String(s)) => s.trim().to_string(),
        Some(Value::Number(n)) if n.as_f64() != Some(0.0) => n.to_string(),
        Some(Value::Bool(true)) => "true".to_string(),
        _ => String::new(),
    }
}

fn upstream_status(status: u16) -> StatusCode {
    StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY)
}

async fn chat(State(state): State<AppState>, method: Method, body: Bytes) -> ApiResponse {
    if method != Method::POST {
        return method_not_allowed();
    }

    let body = parse_body(&body);
    let prompt = text_field(&body, "prompt");
    if prompt.is_empty() {
        return error(StatusCode::BAD_REQUEST, "Missing prompt");
    }
    let Some(api_key) = state.env.chat_key() else {
        return error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Missing AI_API_KEY on server",
        );
    };

    let raw_tool = text_field(&body, "toolType");
    let tool_type = ToolType::ALL
        .into_iter()
        .find(|t| t.as_str() == raw_tool)
        .unwrap_or_default();
    let max_tokens = state.env.max_tokens.unwrap_or(tool_type.max_tokens());
    let model = state.env.chat_model.clone();
    telemetry::log_event(
        "server.chat",
        &format!(
            "tool={} model={} max_tokens={} prompt_len={}",
            tool_type.as_str(),
            model,
            max_tokens,
            prompt.len()
        ),
    );

    let payload = chat_body(&model, &prompt, max_tokens);
    let resp = match post_json(&state.http, &state.env.chat_url, Some(api_key), &payload).await {
        Ok(resp) => resp,
        Err(err) => {
            telemetry::log_error("server.chat", &format!("upstream unreachable: {}", err));
            return error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string());
        }
    };
    if !resp.is_success() {
        let message = resp
            .error_message()
            .unwrap_or_else(|| format!("Upstream error: {}", resp.status));
        telemetry::log_error(
            "server.chat",
            &format!("upstream status={} message={}", resp.status, message),
        );
        return error(upstream_status(resp.status), message);
    }
    match resp.chat_content() {
        Some(content) => (
            StatusCode::OK,
            Json(json!({ "content": content, "model": model })),
        ),
        None => error(StatusCode::BAD_GATEWAY, "Upstream returned empty content"),
    }
}

async fn image(State(state): State<AppState>, method: Method, body: Bytes) -> ApiResponse {
    if method != Method::POST {
        return method_not_allowed();
    }

    let body = parse_body(&body);
    let prompt = text_field(&body, "prompt");
    if prompt.is_empty() {
        return error(StatusCode::BAD_REQUEST, "Missing prompt");
    }
    let Some(api_key) = state.env.image_key() else {
        return error(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Missing AI_IMAGE_API_KEY (or AI_API_KEY) on server",
        );
    };

    let model = state.env.image_model.clone();
    telemetry::log_event(
        "server.image",
        &format!("model={} prompt_len={}", model, prompt.len()),
    );

    let payload = json!({ "model": model, "prompt": prompt });
    let resp = match post_json(&state.http, &state.env.image_url, Some(api_key), &payload).await {
        Ok(resp) => resp,
        Err(err) => {
            telemetry::log_error("server.image", &format!("upstream unreachable: {}", err));
            return error(StatusCode::INTERNAL_SERVER_ERROR, err.to_string());
        }
    };
    if !resp.is_success() {
        let message = resp
            .error_message()
            .unwrap_or_else(|| format!("Upstream error: {}", resp.status));
        telemetry::log_error(
            "server.image",
            &format!("upstream status={} message={}", resp.status, message),
        );
        return error(upstream_status(resp.status), message);
    }
    match resp.image() {
        Some((image_url, revised)) => (
            StatusCode::OK,
            Json(json!({
                "imageUrl": image_url,
                "revisedPrompt": revised.unwrap_or(prompt),
                "model": model
            })),
        ),
        None => error(StatusCode::BAD_GATEWAY, "Upstream returned empty image url"),
    }
}

/**
 * \brief 健康检查：仅依据密钥是否存在报告各服务就绪状态，从不失败。
 */
async fn health(State(state): State<AppState>) -> ApiResponse {
    (
        StatusCode::OK,
        Json(json!({
            "ok": true,
            "message": "Server proxy is ready",
            "services": {
                "chat": state.env.chat_key().is_some(),
                "image": state.env.image_key().is_some()
            }
        })),
    )
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use mockito::Matcher;
    use tower::ServiceExt;

    use super::*;

    fn env_with(vars: &[(&str, &str)]) -> ServerEnv {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        ServerEnv::from_lookup(|name| map.get(name).cloned())
    }

    fn app(env: ServerEnv) -> Router {
        router(AppState::new(env))
    }

    async fn call(app: Router, method: Method, uri: &str, body: &str) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .expect("build request");
        let response = app.oneshot(request).await.expect("router response");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("read body")
            .to_bytes();
        let value = serde_json::from_slice(&bytes).expect("json body");
        (status, value)
    }

    #[test]
    fn test_parse_body_is_defensive() {
        assert_eq!(parse_body(br#"{"prompt":"hi"}"#)["prompt"], "hi");
        assert_eq!(parse_body(br#""{\"prompt\":\"hi\"}""#)["prompt"], "hi");
        assert!(parse_body(b"not json").is_empty());
        assert!(parse_body(b"").is_empty());
        assert!(parse_body(br#""still not json""#).is_empty());
        assert!(parse_body(b"[1,2]").is_empty());
    }

    #[test]
    fn test_env_defaults_and_overrides() {
        let env = env_with(&[]);
        assert_eq!(env.chat_url, ZHIPU_CHAT_URL);
        assert_eq!(env.chat_model, DEFAULT_CHAT_MODEL);
        assert_eq!(env.image_model, ZHIPU_IMAGE_MODEL);
        assert_eq!(env.max_tokens, None);

        let env = env_with(&[
            ("AI_API_KEY", "k"),
            ("AI_CHAT_MODEL", "glm-4-plus"),
            ("AI_MAX_TOKENS", "512"),
            ("AI_IMAGE_API_KEY", "  "),
        ]);
        assert_eq!(env.chat_model, "glm-4-plus");
        assert_eq!(env.max_tokens, Some(512));
        assert_eq!(env.image_api_key, None);
        assert_eq!(env.image_key(), Some("k"));
    }

    #[tokio::test]
    async fn test_chat_rejects_get() {
        let (status, body) = call(app(env_with(&[])), Method::GET, "/api/chat", "").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        assert_eq!(body["error"], "Method not allowed");
    }

    #[tokio::test]
    async fn test_chat_missing_prompt() {
        let env = env_with(&[("AI_API_KEY", "k")]);
        let (status, body) = call(app(env.clone()), Method::POST, "/api/chat", "{}").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap_or_default().contains("prompt"));

        let (status, _) = call(app(env), Method::POST, "/api/chat", "garbage").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_chat_missing_key() {
        let env = env_with(&[]);
        if env.chat_key().is_some() {
            return;
        }
        let (status, body) = call(
            app(env),
            Method::POST,
            "/api/chat",
            r#"{"prompt":"hello"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].as_str().unwrap_or_default().contains("AI_API_KEY"));
    }

    #[tokio::test]
    async fn test_chat_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat")
            .match_header("authorization", "Bearer server-key")
            .match_body(Matcher::PartialJson(json!({
                "model": "glm-4",
                "max_tokens": 2000,
                "temperature": 0.7,
                "messages": [{"role": "user", "content": "hello"}]
            })))
            .with_status(200)
            .with_body(r#"{"choices":[{"message":{"content":"hi"}}]}"#)
            .create_async()
            .await;

        let env = env_with(&[
            ("AI_API_KEY", "server-key"),
            ("AI_BASE_URL", &format!("{}/chat", server.url())),
        ]);
        let (status, body) =
            call(app(env), Method::POST, "/api/chat", r#"{"prompt":"  hello  "}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"content": "hi", "model": "glm-4"}));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_chat_story_tokens_and_override() {
        let mut server = mockito::Server::new_async().await;
        let story = server
            .mock("POST", "/chat")
            .match_body(Matcher::PartialJson(json!({ "max_tokens": 3000 })))
            .with_status(200)
            .with_body(r#"{"choices":[{"message":{"content":"story"}}]}"#)
            .create_async()
            .await;
        let env = env_with(&[
            ("AI_API_KEY", "k"),
            ("AI_BASE_URL", &format!("{}/chat", server.url())),
        ]);
        let (status, _) = call(
            app(env),
            Method::POST,
            "/api/chat",
            r#"{"prompt":"p","toolType":"story"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        story.assert_async().await;

        let overridden = server
            .mock("POST", "/chat")
            .match_body(Matcher::PartialJson(json!({ "max_tokens": 100 })))
            .with_status(200)
            .with_body(r#"{"choices":[{"message":{"content":"short"}}]}"#)
            .create_async()
            .await;
        let env = env_with(&[
            ("AI_API_KEY", "k"),
            ("AI_MAX_TOKENS", "100"),
            ("AI_BASE_URL", &format!("{}/chat", server.url())),
        ]);
        let (status, body) = call(
            app(env),
            Method::POST,
            "/api/chat",
            r#"{"prompt":"p","toolType":"story"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["content"], "short");
        overridden.assert_async().await;
    }

    #[tokio::test]
    async fn test_chat_upstream_status_passthrough() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat")
            .with_status(429)
            .with_body(r#"{"error":{"message":"quota exceeded"}}"#)
            .create_async()
            .await;
        let env = env_with(&[
            ("AI_API_KEY", "k"),
            ("AI_BASE_URL", &format!("{}/chat", server.url())),
        ]);
        let (status, body) = call(app(env.clone()), Method::POST, "/api/chat", r#"{"prompt":"p"}"#).await;
        assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(body["error"], "quota exceeded");

        server.reset_async().await;
        server
            .mock("POST", "/chat")
            .with_status(503)
            .with_body("<html>down</html>")
            .create_async()
            .await;
        let (status, body) = call(app(env), Method::POST, "/api/chat", r#"{"prompt":"p"}"#).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["error"], "Upstream error: 503");
    }

    #[tokio::test]
    async fn test_chat_empty_content_is_bad_gateway() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/chat")
            .with_status(200)
            .with_body(r#"{"choices":[{"message":{}}]}"#)
            .create_async()
            .await;
        let env = env_with(&[
            ("AI_API_KEY", "k"),
            ("AI_BASE_URL", &format!("{}/chat", server.url())),
        ]);
        let (status, body) = call(app(env), Method::POST, "/api/chat", r#"{"prompt":"p"}"#).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"], "Upstream returned empty content");
    }

    #[tokio::test]
    async fn test_chat_unreachable_upstream() {
        let env = env_with(&[
            ("AI_API_KEY", "k"),
            ("AI_BASE_URL", "http://127.0.0.1:1/chat"),
        ]);
        let (status, body) = call(app(env), Method::POST, "/api/chat", r#"{"prompt":"p"}"#).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"].is_string());
    }

    #[tokio::test]
    async fn test_image_success_and_revised_prompt_fallback() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/images")
            .match_header("authorization", "Bearer image-key")
            .match_body(Matcher::Json(json!({"model": "cogview-3-flash", "prompt": "一只猫"})))
            .with_status(200)
            .with_body(r#"{"data":[{"url":"https://img/cat.png"}]}"#)
            .create_async()
            .await;
        let env = env_with(&[
            ("AI_API_KEY", "chat-key"),
            ("AI_IMAGE_API_KEY", "image-key"),
            ("AI_IMAGE_BASE_URL", &format!("{}/images", server.url())),
        ]);
        let (status, body) = call(app(env), Method::POST, "/api/image", r#"{"prompt":"一只猫"}"#).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(
            body,
            json!({
                "imageUrl": "https://img/cat.png",
                "revisedPrompt": "一只猫",
                "model": "cogview-3-flash"
            })
        );
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_image_empty_data_is_bad_gateway() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/images")
            .with_status(200)
            .with_body(r#"{"data":[]}"#)
            .create_async()
            .await;
        let env = env_with(&[
            ("AI_API_KEY", "k"),
            ("AI_IMAGE_BASE_URL", &format!("{}/images", server.url())),
        ]);
        let (status, body) = call(app(env), Method::POST, "/api/image", r#"{"prompt":"p"}"#).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"], "Upstream returned empty image url");
    }

    #[tokio::test]
    async fn test_chat_tool_type_is_case_sensitive() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/chat")
            .match_body(Matcher::PartialJson(json!({ "max_tokens": 2000 })))
            .with_status(200)
            .with_body(r#"{"choices":[{"message":{"content":"ok"}}]}"#)
            .create_async()
            .await;
        let env = env_with(&[
            ("AI_API_KEY", "k"),
            ("AI_BASE_URL", &format!("{}/chat", server.url())),
        ]);
        let (status, _) = call(
            app(env),
            Method::POST,
            "/api/chat",
            r#"{"prompt":"p","toolType":"Story"}"#,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_image_missing_key() {
        let env = env_with(&[]);
        if env.image_key().is_some() {
            return;
        }
        let (status, body) = call(app(env), Method::POST, "/api/image", r#"{"prompt":"p"}"#).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(body["error"]
            .as_str()
            .unwrap_or_default()
            .contains("AI_IMAGE_API_KEY"));
    }

    #[tokio::test]
    async fn test_image_upstream_status_passthrough() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/images")
            .match_header("authorization", "Bearer chat-key")
            .with_status(403)
            .with_body(r#"{"error":{"message":"content policy"}}"#)
            .create_async()
            .await;
        let env = env_with(&[
            ("AI_API_KEY", "chat-key"),
            ("AI_IMAGE_BASE_URL", &format!("{}/images", server.url())),
        ]);
        let (status, body) = call(app(env.clone()), Method::POST, "/api/image", r#"{"prompt":"p"}"#).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "content policy");
        mock.assert_async().await;

        server.reset_async().await;
        server
            .mock("POST", "/images")
            .with_status(500)
            .with_body("oops")
            .create_async()
            .await;
        let (status, body) = call(app(env), Method::POST, "/api/image", r#"{"prompt":"p"}"#).await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["error"], "Upstream error: 500");
    }

    #[tokio::test]
    async fn test_image_method_and_prompt_checks() {
        let env = env_with(&[("AI_API_KEY", "k")]);
        let (status, _) = call(app(env.clone()), Method::PUT, "/api/image", "{}").await;
        assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
        let (status, _) = call(app(env), Method::POST, "/api/image", r#"{"prompt":"   "}"#).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_health_reports_key_presence() {
        let env = env_with(&[("AI_IMAGE_API_KEY", "img")]);
        let chat_ready = env.chat_key().is_some();
        let (status, body) = call(app(env), Method::GET, "/api/health", "").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ok"], true);
        assert_eq!(body["message"], "Server proxy is ready");
        assert_eq!(body["services"]["image"], true);
        assert_eq!(body["services"]["chat"], chat_ready);

        let (_, body) = call(
            app(env_with(&[("AI_API_KEY", "k")])),
            Method::GET,
            "/api/health",
            "",
        )
        .await;
        assert_eq!(body["services"], json!({"chat": true, "image": true}));
    }
}
