//! 边缘运行时：按寄存器映射周期性轮询 Modbus 设备。

mod runtime;

use domain::ChannelRegistry;
use ems_config::AppConfig;
use ems_modbus_slave::SlaveServer;
use ems_telemetry::{init_tracing, metrics};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载本地 .env（如存在），便于直接 cargo run 启动
    dotenvy::dotenv().ok();
    // 从环境变量加载运行配置
    let config = AppConfig::from_env()?;
    // 初始化结构化日志
    init_tracing();

    let map = runtime::load_register_map(&config)?;
    let channels = Arc::new(ChannelRegistry::new());
    let bridges = runtime::build_bridges(&map, &config, channels.clone())?;
    let image = runtime::load_slave_image(&config, &channels)?;
    info!(
        target: "ems.edge",
        bridges = bridges.len(),
        cycle_time_ms = config.cycle_time_ms,
        "edge runtime started"
    );

    // 每条链路一个任务，链路之间互不阻塞
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles: Vec<_> = bridges
        .into_iter()
        .map(|bridge| {
            tokio::spawn(runtime::run_bridge(
                bridge,
                config.cycle_time(),
                shutdown_rx.clone(),
            ))
        })
        .collect();

    // 从站与桥共用同一张通道登记表
    let slave = match (config.modbus_slave_bind, image) {
        (Some(bind), Some(image)) => {
            let server = SlaveServer::bind(bind, Arc::new(image), channels.clone()).await?;
            let mut shutdown = shutdown_rx.clone();
            Some(tokio::spawn(server.run(async move {
                shutdown.changed().await.ok();
            })))
        }
        _ => None,
    };

    tokio::signal::ctrl_c().await?;
    info!(target: "ems.edge", "shutdown signal received");
    shutdown_tx.send(true).ok();
    for handle in handles {
        handle.await?;
    }
    if let Some(slave) = slave {
        slave.await??;
    }

    let snapshot = metrics().snapshot();
    info!(
        target: "ems.edge",
        cycles = snapshot.cycles,
        read_task_failure = snapshot.read_task_failure,
        write_task_failure = snapshot.write_task_failure,
        decode_failure = snapshot.decode_failure,
        "edge runtime stopped"
    );
    Ok(())
}
