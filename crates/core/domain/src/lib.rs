pub mod channel;
pub mod value;

pub use channel::{AccessMode, ChannelAddress, ChannelDoc, ChannelError, ChannelRegistry};
pub use value::{Value, ValueError, ValueType, round_half_even};
