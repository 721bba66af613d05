//! 传输接口
//!
//! 物理链路（TCP / 串口）的握手与成帧不属于桥本身，由实现方注入。
//! 一条链路同一时刻只允许一个在途请求，因此方法都取 `&mut self`。

use crate::error::TransportError;
use async_trait::async_trait;

#[async_trait]
pub trait ModbusTransport: Send {
    /// 功能码 3：unit_id + 起始地址 + 数量 → 有序寄存器
    async fn read_holding_registers(
        &mut self,
        unit_id: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>, TransportError>;

    /// 功能码 4
    async fn read_input_registers(
        &mut self,
        _unit_id: u8,
        _address: u16,
        _count: u16,
    ) -> Result<Vec<u16>, TransportError> {
        Err(TransportError::Unsupported(4))
    }

    /// 功能码 16：unit_id + 起始地址 + 寄存器
    async fn write_multiple_registers(
        &mut self,
        unit_id: u8,
        address: u16,
        words: &[u16],
    ) -> Result<(), TransportError>;

    /// 功能码 6；默认以单寄存器的功能码 16 代替
    async fn write_single_register(
        &mut self,
        unit_id: u8,
        address: u16,
        word: u16,
    ) -> Result<(), TransportError> {
        self.write_multiple_registers(unit_id, address, &[word]).await
    }

    /// 请求超时被丢弃后调用，实现方应丢弃可能残留的半截应答（通常是断开重连）
    async fn reset(&mut self) {}
}
