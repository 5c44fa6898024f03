use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde_json::{json, Value};

/**
 * \brief 上游（或代理）响应：状态码与解析后的 JSON 体。
 * \details 响应体无法解析为 JSON 时记为空对象。
 */
#[derive(Debug, Clone, PartialEq)]
pub struct UpstreamResponse {
    pub status: u16,
    pub body: Value,
}

type ExtractRule = fn(&Value) -> Option<&str>;

/**
 * \brief 错误信息提取规则，按顺序尝试，取第一个非空结果。
 */
const ERROR_MESSAGE_RULES: &[ExtractRule] = &[nested_error_message, flat_error, top_message];

/** \brief OpenAI 兼容接口：`{"error": {"message": "..."}}` */
fn nested_error_message(v: &Value) -> Option<&str> {
    v.get("error")?.get("message")?.as_str()
}

/** \brief 本项目代理：`{"error": "..."}` */
fn flat_error(v: &Value) -> Option<&str> {
    v.get("error")?.as_str()
}

/** \brief 其他服务：`{"message": "..."}` */
fn top_message(v: &Value) -> Option<&str> {
    v.get("message")?.as_str()
}

impl UpstreamResponse {
    pub fn new(status: u16, body: Value) -> Self {
        Self { status, body }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn error_message(&self) -> Option<String> {
        ERROR_MESSAGE_RULES
            .iter()
            .find_map(|rule| rule(&self.body).filter(|s| !s.trim().is_empty()))
            .map(str::to_string)
    }

    /**
     * \brief 错误信息；上游未提供时按状态码给出通用提示。
     */
    pub fn error_message_or_default(&self) -> String {
        self.error_message()
            .unwrap_or_else(|| fallback_status_message(self.status))
    }

    /**
     * \brief 对话接口正文：`choices[0].message.content`。
     */
    pub fn chat_content(&self) -> Option<String> {
        non_empty(
            self.body
                .get("choices")?
                .get(0)?
                .get("message")?
                .get("content")?
                .as_str(),
        )
    }

    /**
     * \brief 图像接口结果：`data[0].url` 与可选的 `data[0].revised_prompt`。
     */
    pub fn image(&self) -> Option<(String, Option<String>)> {
        let first = self.body.get("data")?.get(0)?;
        let url = non_empty(first.get("url")?.as_str())?;
        let revised = non_empty(first.get("revised_prompt").and_then(Value::as_str));
        Some((url, revised))
    }

    /**
     * \brief 读取顶层字符串字段（代理响应使用驼峰字段）。
     */
    pub fn field(&self, name: &str) -> Option<String> {
        non_empty(self.body.get(name).and_then(Value::as_str))
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.filter(|s| !s.is_empty()).map(str::to_string)
}

/**
 * \brief 上游未给出错误信息时的提示文案。
 */
pub fn fallback_status_message(status: u16) -> String {
    match status {
        401 => "API密钥无效,请检查配置".to_string(),
        429 => "API调用频率超限,请稍后重试".to_string(),
        500..=599 => format!("AI服务暂时不可用,请稍后重试 ({})", status),
        _ => format!("API请求失败: {}", status),
    }
}

/**
 * \brief 构造对话补全请求体。
 */
pub fn chat_body(model: &str, prompt: &str, max_tokens: u32) -> Value {
    json!({
        "model": model,
        "messages": [{ "role": "user", "content": prompt }],
        "temperature": 0.7,
        "max_tokens": max_tokens
    })
}

/**
 * \brief 以 JSON 发送 POST 请求，可选附带 Bearer 密钥。
 */
pub async fn post_json(
    client: &reqwest::Client,
    url: &str,
    api_key: Option<&str>,
    body: &Value,
) -> Result<UpstreamResponse, reqwest::Error> {
    let mut request = client
        .post(url)
        .header(CONTENT_TYPE, "application/json")
        .json(body);
    if let Some(key) = api_key {
        request = request.header(AUTHORIZATION, format!("Bearer {}", key));
    }
    read_response(request.send().await?).await
}

pub async fn get_json(
    client: &reqwest::Client,
    url: &str,
) -> Result<UpstreamResponse, reqwest::Error> {
    read_response(client.get(url).send().await?).await
}

async fn read_response(resp: reqwest::Response) -> Result<UpstreamResponse, reqwest::Error> {
    let status = resp.status().as_u16();
    let text = resp.text().await?;
    let body = serde_json::from_str(&text).unwrap_or_else(|_| json!({}));
    Ok(UpstreamResponse::new(status, body))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_message_rule_order() {
        let resp = UpstreamResponse::new(
            400,
            json!({"error": {"message": "nested"}, "message": "top"}),
        );
        assert_eq!(resp.error_message().as_deref(), Some("nested"));

        let resp = UpstreamResponse::new(400, json!({"error": "flat", "message": "top"}));
        assert_eq!(resp.error_message().as_deref(), Some("flat"));

        let resp = UpstreamResponse::new(400, json!({"error": {"code": 1}, "message": "top"}));
        assert_eq!(resp.error_message().as_deref(), Some("top"));

        let resp = UpstreamResponse::new(400, json!({"error": ""}));
        assert_eq!(resp.error_message(), None);
    }

    #[test]
    fn test_fallback_messages() {
        assert_eq!(
            UpstreamResponse::new(401, json!({})).error_message_or_default(),
            "API密钥无效,请检查配置"
        );
        assert!(fallback_status_message(503).contains("503"));
        assert_eq!(fallback_status_message(404), "API请求失败: 404");
    }

    #[test]
    fn test_chat_content_extraction() {
        let resp = UpstreamResponse::new(200, json!({"choices":[{"message":{"content":"hi"}}]}));
        assert_eq!(resp.chat_content().as_deref(), Some("hi"));
        assert_eq!(UpstreamResponse::new(200, json!({"choices": []})).chat_content(), None);
        assert_eq!(
            UpstreamResponse::new(200, json!({"choices":[{"message":{"content":""}}]}))
                .chat_content(),
            None
        );
    }

    #[test]
    fn test_image_extraction() {
        let resp = UpstreamResponse::new(
            200,
            json!({"data":[{"url":"https://img/1.png","revised_prompt":"better"}]}),
        );
        assert_eq!(
            resp.image(),
            Some(("https://img/1.png".to_string(), Some("better".to_string())))
        );
        let resp = UpstreamResponse::new(200, json!({"data":[{"url":"u"}]}));
        assert_eq!(resp.image(), Some(("u".to_string(), None)));
        assert_eq!(UpstreamResponse::new(200, json!({"data": []})).image(), None);
    }

    #[test]
    fn test_chat_body_shape() {
        let body = chat_body("glm-4", "你好", 10);
        assert_eq!(body["model"], "glm-4");
        assert_eq!(body["messages"][0]["role"], "user");
        assert_eq!(body["messages"][0]["content"], "你好");
        assert_eq!(body["max_tokens"], 10);
        assert_eq!(body["temperature"], 0.7);
    }
}
