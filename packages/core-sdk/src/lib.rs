pub mod client;
pub mod config;
pub mod error;
pub mod models;
pub mod prompt;
pub mod server;
pub mod store;
pub mod telemetry;
pub mod upstream;

/**
 * \brief SDK 预导入集合，方便外部引用常用类型。
 */
pub mod prelude {
    pub use crate::client::{build_client, DirectModeClient, GenerationClient, ProxyModeClient};
    pub use crate::config::ConfigResolver;
    pub use crate::error::{ServiceError, ServiceResult};
    pub use crate::models::{
        Config, ConfigPatch, DeploymentMode, FormData, FormValue, GenerationRequest,
        GenerationResult, ImageResult, Provider, ToolType,
    };
    pub use crate::store::{MemorySettingsStore, SettingsStore, SqliteSettingsStore};
    pub use crate::telemetry;
}
