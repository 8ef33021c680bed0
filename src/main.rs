//! lifeos-evolver - 运行一次进化周期
//!
//! 用法：`lifeos-evolver [state.json]`。state.json 为 SystemState（camelCase JSON），缺省为空状态。
//! 初始化日志、加载配置、组装流水线，按配置审批执行一个周期，最后把周期记录以 JSON 输出。

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use lifeos::config::load_config;
use lifeos::dataservice::DataServiceClient;
use lifeos::events::EventBus;
use lifeos::evolution::{ConfigApproval, EvolutionEngine, EvolutionLoop, FsChangeStore, SystemState};
use lifeos::llm::create_llm_from_config;
use lifeos::observability;

/// 生成文件的落地目录
const WORKSPACE_DIR: &str = "workspace";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let cfg = load_config(None).context("Failed to load config")?;
    tracing::info!(app = %cfg.app.name, "Starting evolver");

    let state = match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read system state {}", path.display()))?;
            serde_json::from_str::<SystemState>(&raw)
                .with_context(|| format!("Invalid system state {}", path.display()))?
        }
        None => SystemState::default(),
    };

    let bus = EventBus::global();
    let _trace = bus.subscribe_all(|event| async move {
        tracing::debug!(event = %event.event_type(), source = %event.source, "Event");
        Ok(())
    });

    let engine = Arc::new(EvolutionEngine::from_app_config(&cfg).context("Invalid [evolver] config")?);
    let mut evolution_loop = EvolutionLoop::new(
        bus.clone(),
        engine,
        Arc::new(FsChangeStore::new(WORKSPACE_DIR)),
    )
    .with_llm(create_llm_from_config(&cfg));

    if cfg.data_service.is_configured() {
        let client = DataServiceClient::from_section(&cfg.data_service)
            .context("Failed to create data service client")?;
        tracing::info!(url = %client.base_url(), "Persisting cycles to data service");
        evolution_loop = evolution_loop.with_cycle_store(Arc::new(client));
    }

    let cycle = evolution_loop.run_cycle(&state, &ConfigApproval).await;
    tracing::info!(
        cycle_id = %cycle.id,
        status = ?cycle.status,
        events = bus.history_len(),
        "Cycle finished"
    );

    let json = serde_json::to_string_pretty(&cycle).context("Failed to serialize cycle")?;
    println!("{}", json);

    Ok(())
}
