use domain::{AccessMode, ChannelAddress, ChannelDoc, ChannelRegistry, Value, ValueType};
use ems_modbus_slave::{
    ModbusRecord, ModbusSlaveNatureTable, ModbusSlaveTable, ModbusType, ProcessImage, SlaveError,
};

fn meta_table() -> ModbusSlaveTable {
    ModbusSlaveTable::new(vec![
        ModbusSlaveNatureTable::new("Meta", 10)
            .record(ModbusRecord::constant(0, "ProtocolVersion", ModbusType::Uint16, 3i64)),
    ])
}

fn ess_table() -> ModbusSlaveTable {
    ModbusSlaveTable::new(vec![
        ModbusSlaveNatureTable::new("SymmetricEss", 100)
            .record(ModbusRecord::channel(0, "Soc", ModbusType::Uint16))
            .record(ModbusRecord::reserved(1, ModbusType::Uint16))
            .record(ModbusRecord::channel(2, "ActivePower", ModbusType::Float32))
            .record(ModbusRecord::channel(4, "SetActivePower", ModbusType::Float32)),
    ])
}

fn registry() -> ChannelRegistry {
    let channels = ChannelRegistry::new();
    channels
        .register(
            "ess0",
            [
                ChannelDoc::new("Soc", ValueType::Integer).unit("%"),
                ChannelDoc::new("ActivePower", ValueType::Integer).unit("W"),
                ChannelDoc::new("SetActivePower", ValueType::Integer)
                    .access(AccessMode::WriteOnly),
            ],
        )
        .expect("register");
    channels
}

fn image(access: AccessMode) -> ProcessImage {
    let mut image = ProcessImage::new(access, "_meta", &meta_table()).expect("meta");
    let start = image.add_component("ess0", &ess_table()).expect("component");
    assert_eq!(start, 31);
    image
}

#[test]
fn header_and_meta_block() {
    let channels = registry();
    let image = image(AccessMode::ReadWrite);

    assert_eq!(
        image.read_registers(0, 3, &channels).expect("read"),
        vec![0x6201, 30, 3]
    );
    assert_eq!(image.next_address(), 31 + 120);
    let components: Vec<(u16, &str)> = image.components().collect();
    assert_eq!(components, vec![(1, "_meta"), (31, "ess0")]);
}

#[test]
fn component_block_layout() {
    let channels = registry();
    channels
        .set_value(&ChannelAddress::new("ess0", "Soc"), Some(Value::I64(55)))
        .expect("soc");
    channels
        .set_value(
            &ChannelAddress::new("ess0", "ActivePower"),
            Some(Value::I64(-1500)),
        )
        .expect("power");
    let image = image(AccessMode::ReadWrite);

    let id = image.read_registers(31, 16, &channels).expect("id");
    assert_eq!(id[0], u16::from_be_bytes(*b"es"));
    assert_eq!(id[1], u16::from_be_bytes(*b"s0"));
    assert!(id[2..].iter().all(|word| *word == 0));

    assert_eq!(image.read_registers(47, 1, &channels).expect("len"), vec![120]);
    // 组件头部 48..51 未映射
    assert_eq!(
        image.read_registers(48, 1, &channels),
        Err(SlaveError::IllegalAddress(48))
    );

    assert_eq!(
        image.read_registers(51, 6, &channels).expect("nature"),
        vec![0x42ee, 100, 55, 0xFFFF, 0xC4BB, 0x8000]
    );
    // 只覆盖记录后半部分
    assert_eq!(image.read_registers(56, 1, &channels).expect("slice"), vec![0x8000]);
    // 写通道没有当前值，编码为 NaN
    let set = image.read_registers(57, 2, &channels).expect("set");
    assert!(f32::from_bits((u32::from(set[0]) << 16) | u32::from(set[1])).is_nan());
}

#[test]
fn read_beyond_mapping_is_rejected() {
    let channels = registry();
    let image = image(AccessMode::ReadWrite);
    assert_eq!(
        image.read_registers(55, 10, &channels),
        Err(SlaveError::IllegalAddress(59))
    );
    assert!(matches!(
        image.read_registers(0, 0, &channels),
        Err(SlaveError::IllegalValue(_))
    ));
    assert!(matches!(
        image.read_registers(0, 126, &channels),
        Err(SlaveError::IllegalValue(_))
    ));
}

#[test]
fn writes_are_staged_as_next_write_values() {
    let channels = registry();
    let image = image(AccessMode::ReadWrite);
    let bits = 2000.0f32.to_bits();

    let staged = image
        .stage_writes(57, &[(bits >> 16) as u16, bits as u16], &channels)
        .expect("write");
    assert_eq!(staged, 1);
    assert_eq!(
        channels.next_write_value(&ChannelAddress::new("ess0", "SetActivePower")),
        Some(Value::I64(2000))
    );
}

#[test]
fn write_rejections() {
    let channels = registry();
    let image = image(AccessMode::ReadWrite);

    // 只读通道
    assert_eq!(
        image.write_registers(53, &[1], &channels),
        Err(SlaveError::ReadOnly(53))
    );
    // 占位记录
    assert_eq!(
        image.write_registers(54, &[1], &channels),
        Err(SlaveError::ReadOnly(54))
    );
    // 只覆盖记录的一部分
    assert_eq!(
        image.write_registers(58, &[1], &channels),
        Err(SlaveError::IllegalAddress(58))
    );
    assert_eq!(
        image.write_registers(57, &[1], &channels),
        Err(SlaveError::IllegalAddress(57))
    );

    let read_only = self::image(AccessMode::ReadOnly);
    assert_eq!(
        read_only.write_registers(57, &[0x44FA, 0x0000], &channels),
        Err(SlaveError::ReadOnly(57))
    );
}

#[test]
fn overlapping_records_are_rejected() {
    let table = ModbusSlaveTable::new(vec![
        ModbusSlaveNatureTable::new("Broken", 10)
            .record(ModbusRecord::channel(0, "A", ModbusType::Float32))
            .record(ModbusRecord::channel(1, "B", ModbusType::Uint16)),
    ]);
    let mut image =
        ProcessImage::new(AccessMode::ReadOnly, "_meta", &ModbusSlaveTable::default()).expect("meta");
    assert!(matches!(
        image.add_component("x0", &table),
        Err(SlaveError::Layout(_))
    ));
}

#[test]
fn record_outside_nature_table_is_rejected() {
    let table = ModbusSlaveTable::new(vec![
        ModbusSlaveNatureTable::new("Short", 4)
            .record(ModbusRecord::channel(1, "A", ModbusType::Float32)),
    ]);
    let mut image =
        ProcessImage::new(AccessMode::ReadOnly, "_meta", &ModbusSlaveTable::default()).expect("meta");
    assert!(matches!(
        image.add_component("x0", &table),
        Err(SlaveError::Layout(_))
    ));
}

#[test]
fn rejected_request_stages_nothing() {
    let channels = ChannelRegistry::new();
    channels
        .register(
            "ess0",
            [
                ChannelDoc::new("SetActivePower", ValueType::Integer).access(AccessMode::WriteOnly),
                ChannelDoc::new("SetMode", ValueType::Short).access(AccessMode::WriteOnly),
            ],
        )
        .expect("register");
    let table = ModbusSlaveTable::new(vec![
        ModbusSlaveNatureTable::new("Setpoints", 10)
            .record(ModbusRecord::channel(0, "SetActivePower", ModbusType::Uint16))
            .record(ModbusRecord::channel(1, "SetMode", ModbusType::Uint16)),
    ]);
    let mut image =
        ProcessImage::new(AccessMode::ReadWrite, "_meta", &ModbusSlaveTable::default()).expect("meta");
    let start = image.add_component("ess0", &table).expect("component");
    let first = start + 20 + 2;

    // 40000 超出 Short 通道范围
    assert!(matches!(
        image.stage_writes(first, &[5, 40_000], &channels),
        Err(SlaveError::Channel(_))
    ));
    assert_eq!(
        channels.next_write_value(&ChannelAddress::new("ess0", "SetActivePower")),
        None
    );

    assert_eq!(image.stage_writes(first, &[5, 2], &channels), Ok(2));
    assert_eq!(
        channels.next_write_value(&ChannelAddress::new("ess0", "SetMode")),
        Some(Value::I64(2))
    );
}
