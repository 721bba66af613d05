use domain::{AccessMode, ChannelAddress, ChannelDoc, ChannelRegistry, Value, ValueType};
use ems_modbus_slave::{SlaveMap, SlaveServer};
use std::sync::Arc;
use tokio::sync::oneshot;
use tokio_modbus::client::tcp;
use tokio_modbus::prelude::*;

const MAP: &str = r#"{
  "access": "read_write",
  "meta": [{ "name": "Meta", "length": 10, "records": [
    { "kind": "constant", "offset": 0, "name": "ProtocolVersion", "type": "uint16", "value": 3 }
  ]}],
  "components": [{
    "component_id": "ess0",
    "natures": [{ "name": "SymmetricEss", "length": 100, "records": [
      { "kind": "channel", "offset": 0, "channel": "Soc", "type": "uint16" },
      { "kind": "reserved", "offset": 1, "type": "uint16" },
      { "kind": "channel", "offset": 2, "channel": "SetActivePower", "type": "float32" }
    ]}]
  }]
}"#;

fn registry() -> Arc<ChannelRegistry> {
    let channels = Arc::new(ChannelRegistry::new());
    channels
        .register(
            "ess0",
            [
                ChannelDoc::new("Soc", ValueType::Integer),
                ChannelDoc::new("SetActivePower", ValueType::Integer)
                    .access(AccessMode::WriteOnly),
            ],
        )
        .expect("register");
    channels
}

#[tokio::test]
async fn serves_process_image_over_tcp() {
    let channels = registry();
    channels
        .set_value(&ChannelAddress::new("ess0", "Soc"), Some(Value::I64(64)))
        .expect("soc");
    let image = SlaveMap::from_json(MAP)
        .expect("map")
        .build_image(&channels)
        .expect("image");

    let server = SlaveServer::bind(
        "127.0.0.1:0".parse().expect("addr"),
        Arc::new(image),
        channels.clone(),
    )
    .await
    .expect("bind");
    let addr = server.local_addr().expect("local addr");
    let (stop_tx, stop_rx) = oneshot::channel::<()>();
    let handle = tokio::spawn(server.run(async move {
        let _ = stop_rx.await;
    }));

    let mut ctx = tcp::connect(addr).await.expect("connect");
    assert_eq!(
        ctx.read_holding_registers(0, 3).await.expect("io"),
        Ok(vec![0x6201, 30, 3])
    );
    assert_eq!(
        ctx.read_input_registers(53, 2).await.expect("io"),
        Ok(vec![64, 0xFFFF])
    );
    assert_eq!(
        ctx.read_holding_registers(48, 1).await.expect("io"),
        Err(ExceptionCode::IllegalDataAddress)
    );

    let bits = 1500.0f32.to_bits();
    assert_eq!(
        ctx.write_multiple_registers(55, &[(bits >> 16) as u16, bits as u16])
            .await
            .expect("io"),
        Ok(())
    );
    assert_eq!(
        channels.next_write_value(&ChannelAddress::new("ess0", "SetActivePower")),
        Some(Value::I64(1500))
    );
    // 只读通道
    assert_eq!(
        ctx.write_single_register(53, 1).await.expect("io"),
        Err(ExceptionCode::IllegalDataAddress)
    );

    drop(ctx);
    stop_tx.send(()).expect("stop");
    handle.await.expect("join").expect("server");
}
