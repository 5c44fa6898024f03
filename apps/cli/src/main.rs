use std::sync::Arc;

use anyhow::{anyhow, bail, Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use kinderpen_core_sdk::{
    client::build_client,
    config::ConfigResolver,
    models::{ConfigPatch, DeploymentMode, FormData, FormValue, GenerationResult, Provider, ToolType},
    server,
    store::{self, SettingsStore, SqliteSettingsStore},
    telemetry,
};

/**
 * \brief 幼儿园教师助手命令行：配置服务商、生成文案与插画、启动代理服务。
 */
#[derive(Parser, Debug)]
#[command(name = "kinderpen", version, about = "Kindergarten teacher writing assistant")]
struct Cli {
    /** \brief 设置后进入代理模式，所有生成请求经由该服务转发 */
    #[arg(long, global = true, env = "KINDERPEN_PROXY_URL")]
    proxy_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /**
     * \brief 查看或修改本地保存的 AI 配置。
     */
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },

    /**
     * \brief 使用当前配置测试连接。
     */
    Test,

    /**
     * \brief 填写表单字段并生成文本内容。
     * \param tool  工具类型，如 observation、story
     * \param field 表单字段，格式 key=value，可重复
     */
    Generate {
        #[arg(long)]
        tool: String,
        #[arg(long = "field", value_name = "KEY=VALUE")]
        fields: Vec<String>,
    },

    /**
     * \brief 生成表征小人插画。
     */
    Image {
        /** \brief 彩铅 / 水彩 / 彩铅水彩混合 / 黑白 */
        #[arg(long)]
        style: Option<String>,
        /** \brief 粗 / 细 */
        #[arg(long)]
        line: Option<String>,
        #[arg(long)]
        desc: String,
    },

    /**
     * \brief 启动本地代理服务并提供前端页面。
     */
    Serve {
        #[arg(long, default_value = "127.0.0.1:3000")]
        addr: String,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /** \brief 打印当前配置，密钥做掩码处理 */
    Show,
    /** \brief 修改配置，未提供的字段保持不变 */
    Set {
        #[arg(long)]
        provider: Option<String>,
        #[arg(long)]
        api_key: Option<String>,
        #[arg(long)]
        api_url: Option<String>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        telemetry: Option<bool>,
    },
    /** \brief 删除已保存的配置 */
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let store: Arc<dyn SettingsStore> =
        Arc::new(SqliteSettingsStore::open_default().context("open settings database failed")?);
    let telemetry_enabled = match store::get_telemetry_enabled(store.as_ref()) {
        Ok(enabled) => enabled,
        Err(err) => {
            tracing::warn!(error = %err, "read telemetry flag failed, event file disabled");
            false
        }
    };
    telemetry::set_enabled(telemetry_enabled);

    let mode = DeploymentMode::from_proxy_url(cli.proxy_url);
    tracing::debug!(proxy = mode.is_proxy(), "deployment mode resolved");
    let resolver = ConfigResolver::new(store.clone(), mode);

    match cli.command {
        Commands::Config { action } => run_config(&resolver, action)?,
        Commands::Test => {
            let status = build_client(resolver).test_connection().await;
            println!("{}", status.message);
            if !status.success {
                tracing::error!(detail = %status.message, "connection test failed");
                bail!("connection test failed");
            }
        }
        Commands::Generate { tool, fields } => {
            let tool_type =
                ToolType::parse(&tool).ok_or_else(|| anyhow!("unknown tool type: {}", tool))?;
            let form = parse_fields(&fields)?;
            let result = build_client(resolver)
                .generate_report(tool_type, &form)
                .await?;
            print_result(&result)?;
        }
        Commands::Image { style, line, desc } => {
            let mut form = FormData::new();
            if let Some(style) = style {
                form.insert("drawingStyle".into(), FormValue::from(style));
            }
            if let Some(line) = line {
                form.insert("drawingLine".into(), FormValue::from(line));
            }
            form.insert("drawingDesc".into(), FormValue::from(desc));
            let result = build_client(resolver)
                .generate_report(ToolType::Drawing, &form)
                .await?;
            print_result(&result)?;
        }
        Commands::Serve { addr } => server::run(&addr).await?,
    }

    Ok(())
}

fn run_config(resolver: &ConfigResolver, action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let config = resolver.load();
            println!("mode:     {}", if resolver.mode().is_proxy() { "proxy" } else { "direct" });
            println!("provider: {} ({})", config.provider.as_str(), config.provider.display_name());
            println!("api url:  {}", config.api_url);
            println!("model:    {}", config.model);
            for provider in Provider::ALL {
                if let Some(key) = config.api_keys.get(&provider).filter(|k| !k.is_empty()) {
                    println!("key[{}]: {}", provider.as_str(), mask(key));
                }
            }
            println!("configured: {}", resolver.is_configured());
            println!("telemetry: {}", telemetry::is_enabled());
        }
        ConfigAction::Set {
            provider,
            api_key,
            api_url,
            model,
            telemetry: telemetry_flag,
        } => {
            let mut patch = ConfigPatch::default();
            if let Some(name) = provider {
                let provider = Provider::parse(&name)
                    .ok_or_else(|| anyhow!("unknown provider: {}", name))?;
                patch = patch.with_provider(provider);
            }
            if let Some(key) = api_key {
                patch = patch.with_api_key(key);
            }
            if let Some(url) = api_url {
                patch = patch.with_api_url(url);
            }
            if let Some(model) = model {
                patch = patch.with_model(model);
            }
            let config = resolver.save(patch).context("save config failed")?;
            if let Some(enabled) = telemetry_flag {
                store::set_telemetry_enabled(resolver.store().as_ref(), enabled)
                    .context("save telemetry flag failed")?;
            }
            telemetry::log_event(
                "cli.config",
                &format!("provider={} model={}", config.provider.as_str(), config.model),
            );
            println!("saved: provider={} model={}", config.provider.as_str(), config.model);
        }
        ConfigAction::Clear => {
            resolver.clear().context("clear config failed")?;
            println!("config cleared");
        }
    }
    Ok(())
}

fn parse_fields(fields: &[String]) -> Result<FormData> {
    fields
        .iter()
        .map(|pair| {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("invalid field `{}`, expected KEY=VALUE", pair))?;
            Ok((key.trim().to_string(), FormValue::from(value.to_string())))
        })
        .collect()
}

fn print_result(result: &GenerationResult) -> Result<()> {
    match result {
        GenerationResult::Text { content } => println!("{}", content),
        GenerationResult::Image(image) => {
            println!("{}", serde_json::to_string_pretty(image).context("encode image result")?)
        }
    }
    Ok(())
}

fn mask(key: &str) -> String {
    let chars: Vec<char> = key.chars().collect();
    if chars.len() <= 8 {
        return "*".repeat(chars.len());
    }
    let head: String = chars[..4].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{}****{}", head, tail)
}
