use domain::{
    AccessMode, ChannelAddress, ChannelDoc, ChannelError, ChannelRegistry, Value, ValueType,
};

fn meter_registry() -> ChannelRegistry {
    let registry = ChannelRegistry::new();
    registry
        .register(
            "meter0",
            vec![
                ChannelDoc::new("ActivePower", ValueType::Integer).unit("W"),
                ChannelDoc::new("Frequency", ValueType::Double).unit("Hz"),
                ChannelDoc::new("SetActivePower", ValueType::Integer)
                    .access(AccessMode::WriteOnly)
                    .unit("W"),
            ],
        )
        .expect("register");
    registry
}

#[test]
fn address_parses_and_displays() {
    let address: ChannelAddress = "ess0/Soc".parse().expect("parse");
    assert_eq!(address.component_id, "ess0");
    assert_eq!(address.channel_id, "Soc");
    assert_eq!(address.to_string(), "ess0/Soc");

    assert!("ess0".parse::<ChannelAddress>().is_err());
    assert!("/Soc".parse::<ChannelAddress>().is_err());
}

#[test]
fn set_value_coerces_to_declared_type() {
    let registry = meter_registry();
    let power = ChannelAddress::new("meter0", "ActivePower");

    registry
        .set_value(&power, Some(Value::F64(1500.5)))
        .expect("set");
    // .5 取偶
    assert_eq!(registry.value(&power), Some(Value::I64(1500)));

    registry
        .set_value(&power, Some(Value::F64(1501.5)))
        .expect("set");
    assert_eq!(registry.value(&power), Some(Value::I64(1502)));

    registry.set_value(&power, None).expect("clear");
    assert_eq!(registry.value(&power), None);
}

#[test]
fn duplicate_registration_is_rejected() {
    let registry = meter_registry();
    let err = registry
        .register("meter0", vec![ChannelDoc::new("Frequency", ValueType::Double)])
        .expect_err("duplicate");
    assert_eq!(err, ChannelError::Duplicate("meter0/Frequency".to_string()));
}

#[test]
fn next_write_value_is_single_slot() {
    let registry = meter_registry();
    let setpoint = ChannelAddress::new("meter0", "SetActivePower");

    registry
        .set_next_write_value(&setpoint, Value::I64(100))
        .expect("stage");
    registry
        .set_next_write_value(&setpoint, Value::I64(200))
        .expect("stage");
    assert_eq!(registry.take_next_write_value(&setpoint), Some(Value::I64(200)));
    assert_eq!(registry.take_next_write_value(&setpoint), None);
}

#[test]
fn read_only_channel_rejects_writes() {
    let registry = meter_registry();
    let power = ChannelAddress::new("meter0", "ActivePower");
    let err = registry
        .set_next_write_value(&power, Value::I64(1))
        .expect_err("read-only");
    assert!(matches!(err, ChannelError::NotWritable(_)));
}

#[test]
fn out_of_range_value_is_rejected() {
    let registry = ChannelRegistry::new();
    registry
        .register("ess0", vec![ChannelDoc::new("Soc", ValueType::Short)])
        .expect("register");
    let soc = ChannelAddress::new("ess0", "Soc");
    let err = registry
        .set_value(&soc, Some(Value::I64(70_000)))
        .expect_err("range");
    assert!(matches!(err, ChannelError::Value { .. }));
}

#[test]
fn snapshot_lists_component_channels_sorted() {
    let registry = meter_registry();
    registry
        .set_value(&ChannelAddress::new("meter0", "Frequency"), Some(Value::F64(50.0)))
        .expect("set");
    let snapshot = registry.snapshot("meter0");
    let ids: Vec<&str> = snapshot.iter().map(|(id, _)| id.as_str()).collect();
    assert_eq!(ids, vec!["ActivePower", "Frequency", "SetActivePower"]);
    assert_eq!(snapshot[1].1, Some(Value::F64(50.0)));
}

#[test]
fn batch_staging_is_all_or_nothing() {
    let registry = ChannelRegistry::new();
    registry
        .register(
            "ess0",
            vec![
                ChannelDoc::new("SetActivePower", ValueType::Integer).access(AccessMode::ReadWrite),
                ChannelDoc::new("SetMode", ValueType::Short).access(AccessMode::WriteOnly),
            ],
        )
        .expect("register");
    let power = ChannelAddress::new("ess0", "SetActivePower");
    let mode = ChannelAddress::new("ess0", "SetMode");

    let err = registry
        .set_next_write_values(vec![
            (power.clone(), Value::I64(5)),
            (mode.clone(), Value::I64(40_000)),
        ])
        .expect_err("range");
    assert!(matches!(err, ChannelError::Value { .. }));
    assert_eq!(registry.next_write_value(&power), None);
    assert_eq!(registry.next_write_value(&mode), None);

    let staged = registry
        .set_next_write_values(vec![(power.clone(), Value::I64(5)), (mode.clone(), Value::I64(2))])
        .expect("stage");
    assert_eq!(staged, 2);
    assert_eq!(registry.next_write_value(&power), Some(Value::I64(5)));
    assert_eq!(registry.next_write_value(&mode), Some(Value::I64(2)));
}
