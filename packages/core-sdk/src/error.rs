use thiserror::Error;

use crate::models::Provider;

/**
 * \brief 错误大类，用于决定展示方式与日志级别。
 */
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /** \brief 输入缺失或为空，未发起网络请求 */
    Validation,
    /** \brief 缺少密钥、端点未配置或服务商不支持该操作 */
    Configuration,
    /** \brief 上游返回非成功状态或空内容 */
    Upstream,
    /** \brief 无法连到代理或上游 */
    Network,
}

/**
 * \brief 调用方可见的错误，`Display` 文本可直接展示给用户。
 */
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),

    #[error("请先配置API密钥")]
    MissingApiKey,

    #[error("自定义服务商尚未填写API地址，请在设置中补充")]
    UnresolvedEndpoint,

    #[error("{message}")]
    UnsupportedOperation { provider: Provider, message: String },

    #[error("{message}")]
    RequestFailed { status: u16, message: String },

    #[error("AI返回内容为空，请稍后重试")]
    EmptyContent,

    #[error("AI返回的图片地址为空，请稍后重试")]
    EmptyImageUrl,

    #[error("网络连接失败,请检查网络设置 ({0})")]
    Network(String),
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::Validation(_) => ErrorKind::Validation,
            ServiceError::MissingApiKey
            | ServiceError::UnresolvedEndpoint
            | ServiceError::UnsupportedOperation { .. } => ErrorKind::Configuration,
            ServiceError::RequestFailed { .. }
            | ServiceError::EmptyContent
            | ServiceError::EmptyImageUrl => ErrorKind::Upstream,
            ServiceError::Network(_) => ErrorKind::Network,
        }
    }

    /**
     * \brief 当前服务商不支持图像生成时的错误，提示用户切换到可用的服务商。
     */
    pub fn image_unsupported(provider: Provider) -> Self {
        let message = match provider {
            Provider::Deepseek => "DeepSeek暂不支持图像生成，请在设置中切换到\"智谱AI\"".to_string(),
            other => format!(
                "{}不支持图像生成，请在设置中选择\"智谱AI\"或\"OpenAI\"",
                other.display_name()
            ),
        };
        ServiceError::UnsupportedOperation { provider, message }
    }
}

impl From<reqwest::Error> for ServiceError {
    fn from(err: reqwest::Error) -> Self {
        ServiceError::Network(err.to_string())
    }
}

pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert_eq!(ServiceError::MissingApiKey.kind(), ErrorKind::Configuration);
        assert_eq!(ServiceError::EmptyContent.kind(), ErrorKind::Upstream);
        assert_eq!(
            ServiceError::Network("timeout".into()).kind(),
            ErrorKind::Network
        );
        assert_eq!(
            ServiceError::Validation("x".into()).kind(),
            ErrorKind::Validation
        );
    }

    #[test]
    fn test_image_unsupported_names_alternative() {
        let err = ServiceError::image_unsupported(Provider::Deepseek);
        assert_eq!(err.kind(), ErrorKind::Configuration);
        assert!(err.to_string().contains("智谱AI"));
        let err = ServiceError::image_unsupported(Provider::Custom);
        assert!(err.to_string().contains("自定义服务"));
    }

    #[test]
    fn test_request_failed_displays_message() {
        let err = ServiceError::RequestFailed {
            status: 401,
            message: "invalid key".into(),
        };
        assert_eq!(err.to_string(), "invalid key");
    }
}
