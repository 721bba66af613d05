//! 启动期装配与桥周期循环。

use domain::{ChannelError, ChannelRegistry};
use ems_config::AppConfig;
use ems_modbus::{
    BridgeConfig, ConfigurationError, ModbusBridge, RegisterMap, TcpTransport, TransportError,
};
use ems_modbus_slave::{ProcessImage, SlaveError, SlaveMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{info, warn};

/// 启动错误。
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("failed to read register map {path}: {message}")]
    Read { path: String, message: String },
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Channel(#[from] ChannelError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Slave(#[from] SlaveError),
}

fn read_file(path: &Path) -> Result<String, StartupError> {
    std::fs::read_to_string(path).map_err(|e| StartupError::Read {
        path: path.display().to_string(),
        message: e.to_string(),
    })
}

/// 读取并解析寄存器映射文件。
pub fn load_register_map(config: &AppConfig) -> Result<RegisterMap, StartupError> {
    Ok(RegisterMap::from_json(&read_file(&config.bridge_config_path)?)?)
}

/// 读取从站映射并构建过程映像；未配置从站时返回 None。
///
/// 映像引用的通道必须已由寄存器映射登记，因此在 [`build_bridges`] 之后调用。
pub fn load_slave_image(
    config: &AppConfig,
    channels: &ChannelRegistry,
) -> Result<Option<ProcessImage>, StartupError> {
    let Some(path) = &config.slave_config_path else {
        return Ok(None);
    };
    let map = SlaveMap::from_json(&read_file(path)?)?;
    let image = map.build_image(channels)?;
    info!(
        target: "ems.edge",
        path = %path.display(),
        components = map.components.len(),
        next_address = image.next_address(),
        "slave process image built"
    );
    Ok(Some(image))
}

/// 每条链路一个桥；设备通道先登记再挂载协议。
pub fn build_bridges(
    map: &RegisterMap,
    config: &AppConfig,
    channels: Arc<ChannelRegistry>,
) -> Result<Vec<ModbusBridge>, StartupError> {
    let mut bridges = Vec::with_capacity(map.bridges.len());
    for definition in &map.bridges {
        let transport =
            TcpTransport::new(definition.transport_config(config.modbus_connect_timeout_ms))?;

        let mut bridge_config = BridgeConfig::new(definition.id.clone());
        bridge_config.request_timeout = Duration::from_millis(
            definition
                .request_timeout_ms
                .unwrap_or(config.modbus_timeout_ms),
        );
        bridge_config.low_priority_budget = definition
            .low_priority_budget
            .unwrap_or(config.low_priority_budget);
        bridge_config.log_cycle_summary = config.log_cycle_summary;

        let mut bridge = ModbusBridge::new(bridge_config, Box::new(transport), channels.clone());
        for device in &definition.devices {
            channels.register(&device.component_id, device.channels.iter().cloned())?;
            bridge.add_protocol(device.build_protocol()?)?;
        }

        info!(
            target: "ems.edge",
            bridge_id = %definition.id,
            host = %definition.host,
            port = definition.port,
            devices = definition.devices.len(),
            "bridge configured"
        );
        bridges.push(bridge);
    }
    Ok(bridges)
}

/// 桥周期循环；周期之间检查停止信号，不会中断进行中的周期。
pub async fn run_bridge(
    mut bridge: ModbusBridge,
    cycle_time: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> ModbusBridge {
    let mut ticker = interval(cycle_time);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let report = bridge.run_cycle().await;
                if report.duration > cycle_time {
                    warn!(
                        target: "ems.edge",
                        bridge_id = %bridge.id(),
                        cycle = report.cycle,
                        duration_ms = report.duration.as_millis() as u64,
                        cycle_time_ms = cycle_time.as_millis() as u64,
                        "cycle overran its period"
                    );
                }
            }
            _ = shutdown.changed() => break,
        }
    }

    let health = bridge.health();
    info!(
        target: "ems.edge",
        bridge_id = %bridge.id(),
        cycles = health.cycles,
        read_ok = health.read_ok,
        read_failed = health.read_failed,
        write_ok = health.write_ok,
        write_failed = health.write_failed,
        "bridge stopped"
    );
    bridge
}

#[cfg(test)]
mod tests {
    use super::*;
    use domain::{ChannelAddress, Value};
    use std::path::PathBuf;

    const MAP: &str = r#"{
      "bridges": [
        {
          "id": "modbus0",
          "host": "127.0.0.1",
          "port": 1502,
          "low_priority_budget": 4,
          "devices": [{
            "component_id": "meter0",
            "channels": [{ "id": "ActivePower", "value_type": "integer" }],
            "read_tasks": [{
              "start_address": 0,
              "priority": "high",
              "elements": [{ "type": "signed_word", "address": 0, "channel": "ActivePower" }]
            }]
          }]
        },
        {
          "id": "modbus1",
          "host": "127.0.0.1",
          "port": 1503,
          "request_timeout_ms": 250,
          "devices": [{
            "component_id": "ess0",
            "channels": [{ "id": "SetActivePower", "value_type": "integer", "access": "write_only" }],
            "write_tasks": [{
              "start_address": 10,
              "elements": [{ "type": "signed_word", "address": 10, "channel": "SetActivePower" }]
            }]
          }]
        }
      ]
    }"#;

    fn config() -> AppConfig {
        AppConfig {
            bridge_config_path: PathBuf::from("unused.json"),
            cycle_time_ms: 1000,
            low_priority_budget: 1,
            modbus_timeout_ms: 3000,
            modbus_connect_timeout_ms: 5000,
            log_cycle_summary: false,
            modbus_slave_bind: None,
            slave_config_path: None,
        }
    }

    #[test]
    fn builds_one_bridge_per_link() {
        let map = RegisterMap::from_json(MAP).unwrap();
        let channels = Arc::new(ChannelRegistry::new());
        let bridges = build_bridges(&map, &config(), channels.clone()).unwrap();

        assert_eq!(bridges.len(), 2);
        assert_eq!(bridges[0].id(), "modbus0");
        assert_eq!(bridges[0].scheduler().low_budget(), 4);
        assert_eq!(bridges[0].scheduler().high_tasks().len(), 1);
        assert_eq!(bridges[1].scheduler().low_budget(), 1);
        assert_eq!(bridges[1].protocols()[0].component_id(), "ess0");

        assert!(channels.contains(&ChannelAddress::new("meter0", "ActivePower")));
        channels
            .set_next_write_value(
                &ChannelAddress::new("ess0", "SetActivePower"),
                Value::I64(10),
            )
            .unwrap();
    }

    #[test]
    fn duplicate_channels_fail_startup() {
        let map = RegisterMap::from_json(MAP).unwrap();
        let channels = Arc::new(ChannelRegistry::new());
        channels
            .register("meter0", map.bridges[0].devices[0].channels.clone())
            .unwrap();
        assert!(matches!(
            build_bridges(&map, &config(), channels),
            Err(StartupError::Channel(ChannelError::Duplicate(_)))
        ));
    }

    #[test]
    fn missing_register_map_file() {
        let mut config = config();
        config.bridge_config_path = PathBuf::from("/nonexistent/bridges.json");
        assert!(matches!(
            load_register_map(&config),
            Err(StartupError::Read { .. })
        ));
    }

    #[test]
    fn slave_image_uses_registered_channels() {
        let map = RegisterMap::from_json(MAP).unwrap();
        let channels = Arc::new(ChannelRegistry::new());
        build_bridges(&map, &config(), channels.clone()).unwrap();

        let mut config = config();
        assert!(load_slave_image(&config, &channels).unwrap().is_none());

        let path = std::env::temp_dir().join(format!("ems-edge-slave-{}.json", std::process::id()));
        std::fs::write(
            &path,
            r#"{ "components": [{ "component_id": "meter0", "natures": [
                 { "name": "Meter", "length": 10, "records": [
                   { "kind": "channel", "offset": 0, "channel": "ActivePower", "type": "float32" }
                 ]}
               ]}]}"#,
        )
        .unwrap();
        config.slave_config_path = Some(path.clone());
        let image = load_slave_image(&config, &channels).unwrap().unwrap();
        assert_eq!(image.components().count(), 2);

        std::fs::write(
            &path,
            r#"{ "components": [{ "component_id": "meter9", "natures": [
                 { "name": "Meter", "length": 10, "records": [
                   { "kind": "channel", "offset": 0, "channel": "ActivePower", "type": "float32" }
                 ]}
               ]}]}"#,
        )
        .unwrap();
        let result = load_slave_image(&config, &channels);
        std::fs::remove_file(&path).unwrap();
        assert!(matches!(
            result,
            Err(StartupError::Slave(SlaveError::Channel(ChannelError::NotFound(_))))
        ));
    }

    #[test]
    fn sample_configs_fit_together() {
        let root = Path::new(env!("CARGO_MANIFEST_DIR")).join("../../config");
        let mut config = config();
        config.bridge_config_path = root.join("bridges.example.json");
        config.slave_config_path = Some(root.join("slave.example.json"));

        let map = load_register_map(&config).unwrap();
        let channels = Arc::new(ChannelRegistry::new());
        build_bridges(&map, &config, channels.clone()).unwrap();
        let image = load_slave_image(&config, &channels).unwrap().unwrap();
        let components: Vec<(u16, &str)> = image.components().collect();
        assert_eq!(components, vec![(1, "_meta"), (41, "meter0"), (81, "ess0")]);
    }

    #[tokio::test]
    async fn bridge_loop_stops_on_shutdown() {
        let map = RegisterMap::from_json(r#"{ "bridges": [{ "id": "idle", "host": "127.0.0.1" }] }"#)
            .unwrap();
        let channels = Arc::new(ChannelRegistry::new());
        let bridge = build_bridges(&map, &config(), channels)
            .unwrap()
            .remove(0);

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run_bridge(bridge, Duration::from_millis(10), rx));
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        let bridge = handle.await.unwrap();
        assert!(bridge.health().cycles >= 1);
    }
}
