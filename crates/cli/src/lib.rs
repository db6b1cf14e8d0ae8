use anyhow::{bail, Context};
use quickreply_agent::{EventCoordinator, LateReplyStrategy, LlmReplyGenerator, ReplyGenerator};
use quickreply_core::cache::ResponseCache;
use quickreply_core::config::{mask_secret, AppConfig, LateReplyMode, LoggingConfig};
use quickreply_core::dedup::DedupStore;
use quickreply_core::delivery::OutOfBandDelivery;
use quickreply_core::metrics::MetricsStore;
use quickreply_providers::factory::create_provider;
use quickreply_server::gateway::Gateway;
use quickreply_wechat::PlatformClient;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, Layer};

pub const LOG_FILE_PREFIX: &str = "quickreply.log";

/// Install stdout logging, plus a daily-rolling file when
/// `logging.directory` is set. Keep the returned guard alive for the
/// lifetime of the process or buffered file output is lost.
pub fn init_logging(logging: &LoggingConfig) -> Option<WorkerGuard> {
    let stdout_filter =
        tracing_subscriber::EnvFilter::from_default_env().add_directive(Level::INFO.into());
    let stdout_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stdout)
        .with_filter(stdout_filter);

    let (file_layer, guard) = match &logging.directory {
        Some(dir) => {
            let (non_blocking, guard) = tracing_appender::non_blocking(
                tracing_appender::rolling::daily(dir, LOG_FILE_PREFIX),
            );
            let layer = tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(tracing_subscriber::filter::LevelFilter::INFO);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(stdout_layer)
        .with(file_layer)
        .init();
    guard
}

/// Platform API client, when outbound credentials are configured.
pub fn platform_client(config: &AppConfig) -> Option<Arc<PlatformClient>> {
    fn non_empty(v: &Option<String>) -> Option<&str> {
        v.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }
    let app_id = non_empty(&config.platform.app_id)?;
    let app_secret = non_empty(&config.platform.app_secret)?;
    Some(Arc::new(PlatformClient::new(
        app_id.to_string(),
        app_secret.to_string(),
        Some(config.platform.api_base.clone()),
    )))
}

pub fn late_reply_strategy(
    config: &AppConfig,
    delivery: Option<Arc<dyn OutOfBandDelivery>>,
) -> anyhow::Result<LateReplyStrategy> {
    match config.reply.strategy {
        LateReplyMode::Push => match delivery {
            Some(delivery) => Ok(LateReplyStrategy::Push { delivery }),
            None => bail!("push strategy needs platform.app_id and platform.app_secret"),
        },
        LateReplyMode::CacheForResend => Ok(LateReplyStrategy::CacheForResend {
            placeholder: config.reply.placeholder_text.clone(),
        }),
    }
}

pub fn build_coordinator(
    config: &AppConfig,
    generator: Arc<dyn ReplyGenerator>,
    delivery: Option<Arc<dyn OutOfBandDelivery>>,
) -> anyhow::Result<EventCoordinator> {
    let strategy = late_reply_strategy(config, delivery)?;
    let dedup = Arc::new(DedupStore::new(
        Duration::from_secs(config.dedup.window_secs),
        config.dedup.max_entries,
    ));
    let cache = Arc::new(ResponseCache::new(
        Duration::from_secs(config.cache.ttl_secs),
        config.cache.capacity,
    ));

    Ok(EventCoordinator::new(
        dedup,
        cache,
        generator,
        config.reply.deadline(),
        strategy,
        config.reply.fallback_text.clone(),
        MetricsStore::new(),
    ))
}

pub fn load_config(path: Option<PathBuf>) -> anyhow::Result<AppConfig> {
    let config = AppConfig::load(path).context("Failed to load config")?;
    config.validate().context("Invalid config")?;
    Ok(config)
}

/// Human-readable summary with credentials masked.
pub fn describe_config(config: &AppConfig) -> Vec<String> {
    let secret = |v: &Option<String>| v.as_deref().map(mask_secret).unwrap_or_else(|| "-".into());
    vec![
        format!(
            "server: {}:{}{}",
            config.server.bind, config.server.port, config.server.path
        ),
        format!("platform.token: {}", mask_secret(&config.platform.token)),
        format!(
            "platform.app_id: {}",
            config.platform.app_id.as_deref().unwrap_or("-")
        ),
        format!("platform.app_secret: {}", secret(&config.platform.app_secret)),
        format!("provider.api_key: {}", mask_secret(&config.provider.api_key)),
        format!("provider.model: {}", config.provider.model),
        format!(
            "reply: deadline {}ms, strategy {:?}",
            config.reply.deadline_ms, config.reply.strategy
        ),
        format!(
            "cache: ttl {}s, capacity {}",
            config.cache.ttl_secs, config.cache.capacity
        ),
        format!(
            "dedup: window {}s, max {} entries, purge every {}s",
            config.dedup.window_secs, config.dedup.max_entries, config.dedup.purge_interval_secs
        ),
    ]
}

pub async fn start_server(config: AppConfig) -> anyhow::Result<()> {
    let provider = create_provider(&config.provider)?;
    let platform = platform_client(&config);

    let mut generator = LlmReplyGenerator::new(provider, &config.provider, &config.reply);
    if let Some(client) = &platform {
        generator = generator.with_uploader(client.clone());
    }
    let delivery = platform.map(|c| c as Arc<dyn OutOfBandDelivery>);

    let coordinator = build_coordinator(&config, Arc::new(generator), delivery)?;
    info!(
        strategy = coordinator.strategy().name(),
        deadline_ms = config.reply.deadline_ms,
        "reply coordinator ready"
    );

    Gateway::new(
        Arc::new(coordinator),
        config.platform.token.clone(),
        config.server.clone(),
    )
    .with_purge_interval(Duration::from_secs(config.dedup.purge_interval_secs))
    .start()
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use quickreply_agent::{CoordinatorResponse, GenerationError};
    use quickreply_core::delivery::DeliveryError;
    use quickreply_core::types::{InboundEvent, Reply};

    struct Fixed;

    #[async_trait]
    impl ReplyGenerator for Fixed {
        async fn generate(&self, _event: &InboundEvent) -> Result<Reply, GenerationError> {
            Ok(Reply::text("fixed"))
        }
    }

    struct Nowhere;

    #[async_trait]
    impl OutOfBandDelivery for Nowhere {
        async fn deliver(&self, _recipient_id: &str, _reply: &Reply) -> Result<(), DeliveryError> {
            Ok(())
        }
    }

    fn cache_config() -> AppConfig {
        let mut config = AppConfig::default();
        config.platform.token = "tok".into();
        config.reply.strategy = LateReplyMode::CacheForResend;
        config.reply.placeholder_text = "try again".into();
        config
    }

    #[test]
    fn push_strategy_requires_delivery() {
        let mut config = cache_config();
        config.reply.strategy = LateReplyMode::Push;
        assert!(late_reply_strategy(&config, None).is_err());

        let strategy = late_reply_strategy(&config, Some(Arc::new(Nowhere))).expect("strategy");
        assert_eq!(strategy.name(), "push");
    }

    #[test]
    fn cache_strategy_carries_placeholder() {
        match late_reply_strategy(&cache_config(), None).expect("strategy") {
            LateReplyStrategy::CacheForResend { placeholder } => assert_eq!(placeholder, "try again"),
            LateReplyStrategy::Push { .. } => panic!("expected cache_for_resend"),
        }
    }

    #[test]
    fn platform_client_needs_both_credentials() {
        let mut config = cache_config();
        assert!(platform_client(&config).is_none());
        config.platform.app_id = Some("wx-app".into());
        config.platform.app_secret = Some("  ".into());
        assert!(platform_client(&config).is_none());
        config.platform.app_secret = Some("wx-secret".into());
        assert!(platform_client(&config).is_some());
    }

    #[tokio::test]
    async fn built_coordinator_answers_in_time() {
        let mut config = cache_config();
        config.dedup.max_entries = 8;
        config.cache.capacity = 2;
        let coordinator =
            build_coordinator(&config, Arc::new(Fixed), None).expect("coordinator");

        let handled = coordinator
            .handle(InboundEvent::text("openid-1", "hi").with_event_id("1"))
            .await;
        assert_eq!(
            handled.response,
            CoordinatorResponse::Reply(Reply::text("fixed"))
        );
        assert_eq!(coordinator.cache().capacity(), 2);
    }

    #[test]
    fn summary_masks_credentials() {
        let mut config = cache_config();
        config.platform.token = "super-secret-token".into();
        config.provider.api_key = "sk-0123456789abcdef".into();
        let summary = describe_config(&config).join("\n");
        assert!(!summary.contains("super-secret-token"));
        assert!(!summary.contains("sk-0123456789abcdef"));
        assert!(summary.contains("sk-0****cdef"));
    }
}
