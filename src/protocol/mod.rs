//! MariaDB/MySQL client/server protocol
//!
//! * [`packet`] splits and reassembles physical packets
//! * [`codec`] reads and writes the primitive encodings inside a payload
//! * [`encode`] / [`decode`] map payloads to [`message`] types
//! * [`value`] turns decoded column values into caller-owned values

pub mod codec;
pub mod constants;
pub mod decode;
pub mod encode;
pub mod message;
pub mod packet;
pub mod value;

pub use codec::{DateTimeValue, RawValue, TimeValue};
pub use message::{
    AuthSwitchRequest, ChangeUser, ColumnDefinition, CommandResponse, EofPacket, ErrPacket,
    FrontendMessage, HandshakeResponse, InitialHandshake, OkPacket, PrepareOk,
};
pub use value::{JsonValueFactory, OwnedValueFactory, Value, ValueFactory};
