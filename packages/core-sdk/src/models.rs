use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use crate::error::{ServiceError, ServiceResult};

/**
 * \brief 模型服务商，取值固定。
 */
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    #[default]
    Deepseek,
    Openai,
    Zhipu,
    Custom,
    /** \brief 内置服务：沿用智谱端点，密钥可回落到编译期内置密钥。 */
    #[serde(rename = "default_zhipu", alias = "builtin")]
    Builtin,
}

impl Provider {
    pub const ALL: [Provider; 5] = [
        Provider::Deepseek,
        Provider::Openai,
        Provider::Zhipu,
        Provider::Custom,
        Provider::Builtin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Provider::Deepseek => "deepseek",
            Provider::Openai => "openai",
            Provider::Zhipu => "zhipu",
            Provider::Custom => "custom",
            Provider::Builtin => "default_zhipu",
        }
    }

    /**
     * \brief 面向用户的服务商名称。
     */
    pub fn display_name(&self) -> &'static str {
        match self {
            Provider::Deepseek => "DeepSeek",
            Provider::Openai => "OpenAI",
            Provider::Zhipu => "智谱AI",
            Provider::Custom => "自定义服务",
            Provider::Builtin => "内置服务",
        }
    }

    /**
     * \brief 解析服务商名称（忽略大小写与首尾空白），未知名称返回 None。
     */
    pub fn parse(name: &str) -> Option<Provider> {
        match name.trim().to_ascii_lowercase().as_str() {
            "deepseek" => Some(Provider::Deepseek),
            "openai" => Some(Provider::Openai),
            "zhipu" => Some(Provider::Zhipu),
            "custom" => Some(Provider::Custom),
            "default_zhipu" | "builtin" => Some(Provider::Builtin),
            _ => None,
        }
    }
}

/**
 * \brief 归一化后的客户端配置。
 * \details `api_key` 是派生字段，始终等于 `api_keys[provider]`。
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    pub provider: Provider,
    pub api_key: String,
    /** \brief 仅 custom 服务商使用 */
    pub api_url: String,
    pub model: String,
    /** \brief 每个服务商独立保存的密钥 */
    pub api_keys: BTreeMap<Provider, String>,
}

/**
 * \brief 存储中读出的原始配置，所有字段可缺失，兼容旧版仅含 `apiKey` 的结构。
 */
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawConfig {
    pub provider: Option<String>,
    pub api_key: Option<String>,
    pub api_url: Option<String>,
    pub model: Option<String>,
    pub api_keys: Option<BTreeMap<String, String>>,
}

impl From<&Config> for RawConfig {
    fn from(config: &Config) -> Self {
        RawConfig {
            provider: Some(config.provider.as_str().to_string()),
            api_key: Some(config.api_key.clone()),
            api_url: Some(config.api_url.clone()),
            model: Some(config.model.clone()),
            api_keys: Some(
                config
                    .api_keys
                    .iter()
                    .map(|(p, k)| (p.as_str().to_string(), k.clone()))
                    .collect(),
            ),
        }
    }
}

/**
 * \brief 保存配置时的增量补丁；未设置的字段保持原值。
 */
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConfigPatch {
    pub provider: Option<Provider>,
    /** \brief 若提供，写入目标服务商的密钥槽位 */
    pub api_key: Option<String>,
    pub api_url: Option<String>,
    pub model: Option<String>,
    pub api_keys: Option<BTreeMap<Provider, String>>,
}

impl ConfigPatch {
    pub fn with_provider(mut self, provider: Provider) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = Some(url.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

impl From<&Config> for ConfigPatch {
    fn from(config: &Config) -> Self {
        ConfigPatch {
            provider: Some(config.provider),
            api_key: None,
            api_url: Some(config.api_url.clone()),
            model: Some(config.model.clone()),
            api_keys: Some(config.api_keys.clone()),
        }
    }
}

/**
 * \brief 工具类型，对应前端的各个生成表单。
 */
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ToolType {
    /** \brief 自主游戏观察记录 */
    #[default]
    Observation,
    /** \brief 月主题课程 */
    Course,
    /** \brief 游戏案例 */
    Case,
    /** \brief 课程故事 */
    Story,
    /** \brief 课程故事设计 */
    StoryDesign,
    /** \brief 一对一倾听 */
    OneOnOne,
    /** \brief 表征小人绘画（图像） */
    Drawing,
}

impl ToolType {
    pub const ALL: [ToolType; 7] = [
        ToolType::Observation,
        ToolType::Course,
        ToolType::Case,
        ToolType::Story,
        ToolType::StoryDesign,
        ToolType::OneOnOne,
        ToolType::Drawing,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ToolType::Observation => "observation",
            ToolType::Course => "course",
            ToolType::Case => "case",
            ToolType::Story => "story",
            ToolType::StoryDesign => "storyDesign",
            ToolType::OneOnOne => "oneOnOne",
            ToolType::Drawing => "drawing",
        }
    }

    pub fn parse(name: &str) -> Option<ToolType> {
        ToolType::ALL
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(name.trim()))
    }

    /**
     * \brief 课程故事篇幅更长，需要更多 token。
     */
    pub fn max_tokens(&self) -> u32 {
        match self {
            ToolType::Story => 3000,
            _ => 2000,
        }
    }

    pub fn is_image(&self) -> bool {
        matches!(self, ToolType::Drawing)
    }
}

/**
 * \brief 表单上传的文件引用，仅保留元信息。
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRef {
    pub name: String,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub size: u64,
}

/**
 * \brief 表单字段值：文本或文件。
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FormValue {
    Text(String),
    File(FileRef),
}

impl FormValue {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FormValue::Text(s) => Some(s.as_str()),
            FormValue::File(_) => None,
        }
    }
}

impl From<&str> for FormValue {
    fn from(value: &str) -> Self {
        FormValue::Text(value.to_string())
    }
}

impl From<String> for FormValue {
    fn from(value: String) -> Self {
        FormValue::Text(value)
    }
}

pub type FormData = HashMap<String, FormValue>;

/**
 * \brief 一次生成请求，不做持久化。
 */
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationRequest {
    pub prompt: String,
    pub tool_type: ToolType,
    pub form_data: FormData,
}

impl GenerationRequest {
    /**
     * \brief 构造请求；提示词去除空白后为空时拒绝。
     */
    pub fn new(
        prompt: impl Into<String>,
        tool_type: ToolType,
        form_data: FormData,
    ) -> ServiceResult<Self> {
        let prompt = prompt.into();
        if prompt.trim().is_empty() {
            return Err(ServiceError::Validation("提示词不能为空".to_string()));
        }
        Ok(Self {
            prompt,
            tool_type,
            form_data,
        })
    }
}

/**
 * \brief 图像生成结果。
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageResult {
    pub image_url: String,
    pub prompt: String,
    pub revised_prompt: String,
    pub model: String,
}

/**
 * \brief 生成结果：文本工具返回正文，图像工具返回图片信息。
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum GenerationResult {
    Text { content: String },
    Image(ImageResult),
}

/**
 * \brief 连接测试结果，失败时 `success` 为 false。
 */
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    pub success: bool,
    pub message: String,
}

impl ConnectionStatus {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}

/**
 * \brief 部署模式，启动时确定一次：直连上游或经由服务端代理。
 */
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum DeploymentMode {
    /** \brief 浏览器/客户端持有密钥并直接调用上游 */
    #[default]
    Direct,
    /** \brief 服务端持有密钥，客户端只调用代理 */
    Proxy { base_url: String },
}

impl DeploymentMode {
    /**
     * \brief 读取 `KINDERPEN_PROXY_URL`，非空即为代理模式。
     */
    pub fn from_env() -> Self {
        Self::from_proxy_url(std::env::var("KINDERPEN_PROXY_URL").ok())
    }

    pub fn from_proxy_url(url: Option<String>) -> Self {
        match url.map(|u| u.trim().to_string()) {
            Some(base_url) if !base_url.is_empty() => DeploymentMode::Proxy { base_url },
            _ => DeploymentMode::Direct,
        }
    }

    pub fn is_proxy(&self) -> bool {
        matches!(self, DeploymentMode::Proxy { .. })
    }
}
