#![allow(dead_code)]

pub mod mock_wire;
pub mod range_server;
