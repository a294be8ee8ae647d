//! Bolt messages and the structure rules that read and write them.
//!
//! Each request and response is a single structure at the top level. Rules
//! are plain constants so protocol versions can register, unregister and
//! replace them by value.
mod fields;
pub mod request;
pub mod response;
pub mod values;

pub use request::{
    AccessMode, AuthToken, Hello, NotificationConfig, Request, Route, Run, StreamLimit, Telemetry,
    TransactionExtra,
};
pub use response::Response;

pub mod tag {
    pub const HELLO: u8 = 0x01;
    pub const GOODBYE: u8 = 0x02;
    pub const RESET: u8 = 0x0F;
    pub const RUN: u8 = 0x10;
    pub const BEGIN: u8 = 0x11;
    pub const COMMIT: u8 = 0x12;
    pub const ROLLBACK: u8 = 0x13;
    pub const DISCARD: u8 = 0x2F;
    pub const PULL: u8 = 0x3F;
    pub const TELEMETRY: u8 = 0x54;
    pub const ROUTE: u8 = 0x66;
    pub const LOGON: u8 = 0x6A;
    pub const LOGOFF: u8 = 0x6B;

    pub const SUCCESS: u8 = 0x70;
    pub const RECORD: u8 = 0x71;
    pub const IGNORED: u8 = 0x7E;
    pub const FAILURE: u8 = 0x7F;

    pub fn name(tag: u8) -> &'static str {
        match tag {
            HELLO => "HELLO",
            GOODBYE => "GOODBYE",
            RESET => "RESET",
            RUN => "RUN",
            BEGIN => "BEGIN",
            COMMIT => "COMMIT",
            ROLLBACK => "ROLLBACK",
            DISCARD => "DISCARD",
            PULL => "PULL",
            TELEMETRY => "TELEMETRY",
            ROUTE => "ROUTE",
            LOGON => "LOGON",
            LOGOFF => "LOGOFF",
            SUCCESS => "SUCCESS",
            RECORD => "RECORD",
            IGNORED => "IGNORED",
            FAILURE => "FAILURE",
            _ => "UNKNOWN",
        }
    }
}
