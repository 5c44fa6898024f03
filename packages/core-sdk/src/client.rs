use async_trait::async_trait;
use serde_json::json;

use crate::{
    config::{
        provider_defaults, resolve_endpoint, ConfigResolver, ImageDefaults, ImageRequestShape,
    },
    error::{ServiceError, ServiceResult},
    models::{
        Config, ConnectionStatus, DeploymentMode, FormData, GenerationRequest, GenerationResult,
        ImageResult, ToolType,
    },
    prompt::{build_image_prompt, build_prompt, validate_form},
    telemetry,
    upstream::{chat_body, get_json, post_json, UpstreamResponse},
};

/** \brief 连接测试使用的固定提示词 */
const TEST_PROMPT: &str = "你好";
const TEST_MAX_TOKENS: u32 = 10;
/** \brief 代理未返回模型名时的占位 */
const PROXY_IMAGE_MODEL: &str = "server-proxy-image-model";

/**
 * \brief 生成服务的统一接口，直连与代理两种实现在构造时选定。
 */
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /**
     * \brief 生成文本内容，返回模型正文。
     */
    async fn generate_content(&self, prompt: &str, tool_type: ToolType) -> ServiceResult<String>;

    /**
     * \brief 测试连接，所有失败都转换为 `success=false`，不会返回错误。
     */
    async fn test_connection(&self) -> ConnectionStatus;

    /**
     * \brief 根据绘画表单生成图片。
     */
    async fn generate_image(&self, form_data: &FormData) -> ServiceResult<ImageResult>;

    /**
     * \brief 校验表单并按工具类型生成文本或图片。
     */
    async fn generate_report(
        &self,
        tool_type: ToolType,
        form_data: &FormData,
    ) -> ServiceResult<GenerationResult> {
        validate_form(tool_type, form_data)?;
        if tool_type.is_image() {
            return self.generate_image(form_data).await.map(GenerationResult::Image);
        }
        let request =
            GenerationRequest::new(build_prompt(tool_type, form_data), tool_type, form_data.clone())?;
        let content = self
            .generate_content(&request.prompt, request.tool_type)
            .await?;
        Ok(GenerationResult::Text { content })
    }
}

/**
 * \brief 按部署模式构造客户端，之后行为不再改变。
 */
pub fn build_client(resolver: ConfigResolver) -> Box<dyn GenerationClient> {
    let http = reqwest::Client::new();
    match resolver.mode().clone() {
        DeploymentMode::Proxy { base_url } => Box::new(ProxyModeClient::new(base_url, http)),
        DeploymentMode::Direct => Box::new(DirectModeClient::new(resolver, http)),
    }
}

fn ensure_prompt(prompt: &str) -> ServiceResult<()> {
    if prompt.trim().is_empty() {
        return Err(ServiceError::Validation("提示词不能为空".to_string()));
    }
    Ok(())
}

fn request_failed(resp: &UpstreamResponse) -> ServiceError {
    ServiceError::RequestFailed {
        status: resp.status,
        message: resp.error_message_or_default(),
    }
}

fn log_failure<T>(category: &str, result: &ServiceResult<T>) {
    if let Err(err) = result {
        telemetry::log_error(category, &err.to_string());
    }
}

/**
 * \brief 直连模式：读取本地保存的密钥，直接调用服务商接口。
 */
pub struct DirectModeClient {
    resolver: ConfigResolver,
    http: reqwest::Client,
    image_endpoint: Option<String>,
}

impl DirectModeClient {
    pub fn new(resolver: ConfigResolver, http: reqwest::Client) -> Self {
        Self {
            resolver,
            http,
            image_endpoint: None,
        }
    }

    /**
     * \brief 替换服务商默认的图像接口地址，请求体形态与模型仍按服务商决定。
     */
    pub fn with_image_endpoint(mut self, url: impl Into<String>) -> Self {
        self.image_endpoint = Some(url.into());
        self
    }

    /**
     * \brief 读取配置与当前服务商密钥，密钥为空时返回 `MissingApiKey`。
     */
    fn credentials(&self) -> ServiceResult<(Config, String)> {
        let config = self.resolver.load();
        let api_key = self.resolver.get_provider_key(Some(config.provider));
        if api_key.trim().is_empty() {
            return Err(ServiceError::MissingApiKey);
        }
        Ok((config, api_key))
    }

    async fn chat(&self, prompt: &str, tool_type: ToolType) -> ServiceResult<String> {
        ensure_prompt(prompt)?;
        let (config, api_key) = self.credentials()?;
        let url = resolve_endpoint(&config)?;
        telemetry::log_event(
            "client.direct",
            &format!(
                "chat provider={} tool={} prompt_len={}",
                config.provider.as_str(),
                tool_type.as_str(),
                prompt.len()
            ),
        );

        let body = chat_body(&config.model, prompt, tool_type.max_tokens());
        let resp = post_json(&self.http, &url, Some(&api_key), &body).await?;
        if !resp.is_success() {
            return Err(request_failed(&resp));
        }
        resp.chat_content().ok_or(ServiceError::EmptyContent)
    }

    async fn image(&self, form_data: &FormData) -> ServiceResult<ImageResult> {
        let config = self.resolver.load();
        let defaults = provider_defaults(config.provider)
            .image
            .ok_or_else(|| ServiceError::image_unsupported(config.provider))?;
        validate_form(ToolType::Drawing, form_data)?;
        let (_, api_key) = self.credentials()?;

        let prompt = build_image_prompt(form_data);
        telemetry::log_event(
            "client.direct",
            &format!(
                "image provider={} model={}",
                config.provider.as_str(),
                defaults.model
            ),
        );
        let url = self.image_endpoint.as_deref().unwrap_or(defaults.url);
        let resp = post_json(
            &self.http,
            url,
            Some(&api_key),
            &image_body(&defaults, &prompt),
        )
        .await?;
        if !resp.is_success() {
            return Err(request_failed(&resp));
        }
        let (image_url, revised) = resp.image().ok_or(ServiceError::EmptyImageUrl)?;
        Ok(ImageResult {
            image_url,
            revised_prompt: revised.unwrap_or_else(|| prompt.clone()),
            prompt,
            model: defaults.model.to_string(),
        })
    }
}

fn image_body(defaults: &ImageDefaults, prompt: &str) -> serde_json::Value {
    match defaults.shape {
        ImageRequestShape::Minimal => json!({
            "model": defaults.model,
            "prompt": prompt
        }),
        ImageRequestShape::Dalle => json!({
            "model": defaults.model,
            "prompt": prompt,
            "n": 1,
            "size": "1024x1024",
            "quality": "standard",
            "style": "natural"
        }),
    }
}

#[async_trait]
impl GenerationClient for DirectModeClient {
    async fn generate_content(&self, prompt: &str, tool_type: ToolType) -> ServiceResult<String> {
        let result = self.chat(prompt, tool_type).await;
        log_failure("client.direct", &result);
        result
    }

    async fn test_connection(&self) -> ConnectionStatus {
        let config = self.resolver.load();
        let api_key = self.resolver.get_provider_key(Some(config.provider));
        if api_key.trim().is_empty() {
            return ConnectionStatus::failed("请先输入API密钥");
        }
        let url = match resolve_endpoint(&config) {
            Ok(url) => url,
            Err(err) => return ConnectionStatus::failed(err.to_string()),
        };

        let body = json!({
            "model": config.model,
            "messages": [{ "role": "user", "content": TEST_PROMPT }],
            "max_tokens": TEST_MAX_TOKENS
        });
        match post_json(&self.http, &url, Some(&api_key), &body).await {
            Ok(resp) if resp.is_success() => ConnectionStatus::ok("连接成功！API配置正确"),
            Ok(resp) => ConnectionStatus::failed(
                resp.error_message()
                    .unwrap_or_else(|| format!("连接失败: {}", resp.status)),
            ),
            Err(err) => ConnectionStatus::failed(ServiceError::from(err).to_string()),
        }
    }

    async fn generate_image(&self, form_data: &FormData) -> ServiceResult<ImageResult> {
        let result = self.image(form_data).await;
        log_failure("client.direct", &result);
        result
    }
}

/**
 * \brief 代理模式：不持有密钥，所有请求经由服务端 `/api` 下的接口转发。
 */
pub struct ProxyModeClient {
    base_url: String,
    http: reqwest::Client,
}

impl ProxyModeClient {
    pub fn new(base_url: impl Into<String>, http: reqwest::Client) -> Self {
        Self {
            base_url: base_url.into(),
            http,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn chat(&self, prompt: &str, tool_type: ToolType) -> ServiceResult<String> {
        ensure_prompt(prompt)?;
        let body = json!({ "prompt": prompt, "toolType": tool_type.as_str() });
        let resp = post_json(&self.http, &self.endpoint("/api/chat"), None, &body).await?;
        if !resp.is_success() {
            return Err(request_failed(&resp));
        }
        resp.field("content").ok_or(ServiceError::EmptyContent)
    }

    async fn image(&self, form_data: &FormData) -> ServiceResult<ImageResult> {
        validate_form(ToolType::Drawing, form_data)?;
        let prompt = build_image_prompt(form_data);
        let body = json!({ "prompt": prompt });
        let resp = post_json(&self.http, &self.endpoint("/api/image"), None, &body).await?;
        if !resp.is_success() {
            return Err(request_failed(&resp));
        }
        let image_url = resp.field("imageUrl").ok_or(ServiceError::EmptyImageUrl)?;
        Ok(ImageResult {
            image_url,
            revised_prompt: resp
                .field("revisedPrompt")
                .unwrap_or_else(|| prompt.clone()),
            prompt,
            model: resp
                .field("model")
                .unwrap_or_else(|| PROXY_IMAGE_MODEL.to_string()),
        })
    }
}

#[async_trait]
impl GenerationClient for ProxyModeClient {
    async fn generate_content(&self, prompt: &str, tool_type: ToolType) -> ServiceResult<String> {
        let result = self.chat(prompt, tool_type).await;
        log_failure("client.proxy", &result);
        result
    }

    async fn test_connection(&self) -> ConnectionStatus {
        match get_json(&self.http, &self.endpoint("/api/health")).await {
            Ok(resp) if resp.is_success() => ConnectionStatus::ok(
                resp.field("message")
                    .unwrap_or_else(|| "Server proxy is ready".to_string()),
            ),
            Ok(resp) => ConnectionStatus::failed(
                resp.error_message()
                    .unwrap_or_else(|| format!("Service check failed: {}", resp.status)),
            ),
            Err(err) => ConnectionStatus::failed(ServiceError::from(err).to_string()),
        }
    }

    async fn generate_image(&self, form_data: &FormData) -> ServiceResult<ImageResult> {
        let result = self.image(form_data).await;
        log_failure("client.proxy", &result);
        result
    }
}
