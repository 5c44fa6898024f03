use std::{collections::BTreeMap, sync::Arc};

use anyhow::Result;

use crate::{
    error::{ServiceError, ServiceResult},
    models::{Config, ConfigPatch, DeploymentMode, Provider, RawConfig},
    store::SettingsStore,
    telemetry,
};

/** \brief 设置存储中保存配置的键名。 */
pub const CONFIG_KEY: &str = "ai_config";

/**
 * \brief 编译期注入的内置密钥（构建时设置 `KINDERPEN_BUILTIN_API_KEY`），未设置则为 None。
 */
pub const BUILTIN_API_KEY: Option<&str> = option_env!("KINDERPEN_BUILTIN_API_KEY");

pub const ZHIPU_CHAT_URL: &str = "https://open.bigmodel.cn/api/paas/v4/chat/completions";
pub const ZHIPU_IMAGE_URL: &str = "https://open.bigmodel.cn/api/paas/v4/images/generations";
pub const ZHIPU_IMAGE_MODEL: &str = "cogview-3-flash";

/**
 * \brief 图像接口的请求体形态。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageRequestShape {
    /** \brief 只含 model 与 prompt */
    Minimal,
    /** \brief DALL-E 风格，附带尺寸、数量、质量参数 */
    Dalle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageDefaults {
    pub url: &'static str,
    pub model: &'static str,
    pub shape: ImageRequestShape,
}

/**
 * \brief 服务商的固定默认值。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderDefaults {
    /** \brief custom 为 None，端点取自配置 */
    pub chat_url: Option<&'static str>,
    pub model: &'static str,
    /** \brief 不支持图像生成时为 None */
    pub image: Option<ImageDefaults>,
}

pub fn provider_defaults(provider: Provider) -> ProviderDefaults {
    let cogview = ImageDefaults {
        url: ZHIPU_IMAGE_URL,
        model: ZHIPU_IMAGE_MODEL,
        shape: ImageRequestShape::Minimal,
    };
    match provider {
        Provider::Deepseek => ProviderDefaults {
            chat_url: Some("https://api.deepseek.com/v1/chat/completions"),
            model: "deepseek-chat",
            image: None,
        },
        Provider::Openai => ProviderDefaults {
            chat_url: Some("https://api.openai.com/v1/chat/completions"),
            model: "gpt-4",
            image: Some(ImageDefaults {
                url: "https://api.openai.com/v1/images/generations",
                model: "dall-e-3",
                shape: ImageRequestShape::Dalle,
            }),
        },
        Provider::Zhipu => ProviderDefaults {
            chat_url: Some(ZHIPU_CHAT_URL),
            model: "glm-4",
            image: Some(cogview),
        },
        Provider::Custom => ProviderDefaults {
            chat_url: None,
            model: "gpt-4",
            image: None,
        },
        Provider::Builtin => ProviderDefaults {
            chat_url: Some(ZHIPU_CHAT_URL),
            model: "glm-4",
            image: Some(cogview),
        },
    }
}

/**
 * \brief 首次加载时的默认配置。
 */
pub fn default_config() -> Config {
    normalize(&RawConfig::default())
}

/**
 * \brief 归一化原始配置。
 * \details 逐键合并 `apiKeys`；旧版单 `apiKey` 只在当前服务商槽位为空时迁移；
 *          派生字段 `apiKey` 总是重新取自 `apiKeys[provider]`。重复归一化结果不变。
 */
pub fn normalize(raw: &RawConfig) -> Config {
    let provider = raw
        .provider
        .as_deref()
        .and_then(Provider::parse)
        .unwrap_or_default();

    let mut api_keys: BTreeMap<Provider, String> = Provider::ALL
        .into_iter()
        .map(|p| (p, String::new()))
        .collect();
    if let Some(stored) = &raw.api_keys {
        for (name, key) in stored {
            if let Some(p) = Provider::parse(name) {
                api_keys.insert(p, key.clone());
            }
        }
    }

    if let Some(legacy) = raw.api_key.as_deref().filter(|k| !k.is_empty()) {
        let slot = api_keys.entry(provider).or_default();
        if slot.is_empty() {
            *slot = legacy.to_string();
        }
    }

    let model = raw
        .model
        .clone()
        .filter(|m| !m.trim().is_empty())
        .unwrap_or_else(|| provider_defaults(provider).model.to_string());

    Config {
        provider,
        api_key: api_keys.get(&provider).cloned().unwrap_or_default(),
        api_url: raw.api_url.clone().unwrap_or_default(),
        model,
        api_keys,
    }
}

/**
 * \brief 解析对话接口地址；custom 且未填写地址时返回 `UnresolvedEndpoint`。
 */
pub fn resolve_endpoint(config: &Config) -> ServiceResult<String> {
    match provider_defaults(config.provider).chat_url {
        Some(url) => Ok(url.to_string()),
        None if config.api_url.trim().is_empty() => Err(ServiceError::UnresolvedEndpoint),
        None => Ok(config.api_url.clone()),
    }
}

/**
 * \brief 配置解析器：读写设置存储并按部署模式判断是否可用。
 */
#[derive(Clone)]
pub struct ConfigResolver {
    store: Arc<dyn SettingsStore>,
    mode: DeploymentMode,
}

impl ConfigResolver {
    pub fn new(store: Arc<dyn SettingsStore>, mode: DeploymentMode) -> Self {
        Self { store, mode }
    }

    pub fn mode(&self) -> &DeploymentMode {
        &self.mode
    }

    pub fn store(&self) -> &Arc<dyn SettingsStore> {
        &self.store
    }

    /**
     * \brief 读取当前配置；存储不可读或内容损坏时记录警告并返回默认配置。
     */
    pub fn load(&self) -> Config {
        let saved = match self.store.get(CONFIG_KEY) {
            Ok(Some(text)) => text,
            Ok(None) => return default_config(),
            Err(err) => {
                telemetry::log_warn(
                    "config.load",
                    &format!("读取配置失败，已使用默认配置: {}", err),
                );
                return default_config();
            }
        };
        match serde_json::from_str::<RawConfig>(&saved) {
            Ok(raw) => normalize(&raw),
            Err(err) => {
                telemetry::log_warn(
                    "config.load",
                    &format!("配置解析失败，已重置为默认配置: {}", err),
                );
                default_config()
            }
        }
    }

    /**
     * \brief 将补丁合并到当前配置并持久化。
     * \details 顶层字段浅合并，`apiKeys` 逐键合并；补丁显式携带 `apiKey` 时写入目标服务商槽位。
     */
    pub fn save(&self, patch: ConfigPatch) -> Result<Config> {
        let current = self.load();
        let target = patch.provider.unwrap_or(current.provider);

        let mut api_keys = current.api_keys;
        if let Some(keys) = patch.api_keys {
            api_keys.extend(keys);
        }
        if let Some(key) = patch.api_key {
            api_keys.insert(target, key);
        }

        // 切换服务商时，仍是旧服务商默认模型的配置改用新服务商的默认模型
        let model = match patch.model {
            Some(model) => model,
            None if target != current.provider
                && current.model == provider_defaults(current.provider).model =>
            {
                String::new()
            }
            None => current.model,
        };

        let merged = RawConfig {
            provider: Some(target.as_str().to_string()),
            api_key: api_keys.get(&target).cloned(),
            api_url: Some(patch.api_url.unwrap_or(current.api_url)),
            model: Some(model),
            api_keys: Some(
                api_keys
                    .into_iter()
                    .map(|(p, k)| (p.as_str().to_string(), k))
                    .collect(),
            ),
        };
        let config = normalize(&merged);
        self.store
            .set(CONFIG_KEY, &serde_json::to_string(&config)?)?;
        telemetry::log_event(
            "config.save",
            &format!("provider={} model={}", config.provider.as_str(), config.model),
        );
        Ok(config)
    }

    /**
     * \brief 获取指定服务商（缺省为当前服务商）保存的密钥，不存在时返回空串。
     */
    pub fn get_provider_key(&self, provider: Option<Provider>) -> String {
        let config = self.load();
        let target = provider.unwrap_or(config.provider);
        let stored = config.api_keys.get(&target).cloned().unwrap_or_default();
        match target {
            Provider::Builtin if stored.trim().is_empty() => {
                BUILTIN_API_KEY.unwrap_or_default().to_string()
            }
            _ => stored,
        }
    }

    /**
     * \brief 代理模式下总是可用；直连模式要求当前服务商有非空密钥。
     */
    pub fn is_configured(&self) -> bool {
        match self.mode {
            DeploymentMode::Proxy { .. } => true,
            DeploymentMode::Direct => !self.get_provider_key(None).trim().is_empty(),
        }
    }

    /**
     * \brief 清除已保存的配置，之后 `load` 返回默认配置。
     */
    pub fn clear(&self) -> Result<()> {
        self.store.remove(CONFIG_KEY)?;
        telemetry::log_event("config.clear", "configuration removed");
        Ok(())
    }
}
