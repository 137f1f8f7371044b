//! JSON datagram codec shared by the agent and its callers.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::load_balancer::endpoint::{EndpointKey, HostLookup};
use crate::load_balancer::host::HostAddr;
use crate::load_balancer::registry::BatchResult;

/// Largest payload a UDP/IPv4 datagram can carry.
pub const MAX_DATAGRAM: usize = 65_507;

/// Caller `retcode` meaning the call succeeded.
pub const CALL_OK: i32 = 0;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    GetHost {
        seq: u32,
        modid: u32,
        cmdid: u32,
    },
    /// One call outcome. `retcode` 0 is success; `tcost` is the call time in ms.
    Report {
        modid: u32,
        cmdid: u32,
        host: HostAddr,
        retcode: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tcost: Option<u64>,
    },
    BatchReport {
        modid: u32,
        cmdid: u32,
        results: Vec<BatchResult>,
    },
    GetRoute {
        modid: u32,
        cmdid: u32,
    },
    CacheGetRoute {
        modid: u32,
        cmdid: u32,
        version: i64,
    },
}

impl Request {
    pub fn key(&self) -> EndpointKey {
        match *self {
            Request::GetHost { modid, cmdid, .. }
            | Request::Report { modid, cmdid, .. }
            | Request::BatchReport { modid, cmdid, .. }
            | Request::GetRoute { modid, cmdid }
            | Request::CacheGetRoute { modid, cmdid, .. } => EndpointKey::new(modid, cmdid),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetCode {
    Ok,
    Overload,
    NotExist,
}

impl RetCode {
    /// Code and host for a lookup result.
    pub fn from_lookup(lookup: HostLookup) -> (Self, Option<HostAddr>) {
        match lookup {
            HostLookup::Host(host) => (RetCode::Ok, Some(host)),
            HostLookup::AllOverloaded => (RetCode::Overload, None),
            HostLookup::NotYetAvailable => (RetCode::NotExist, None),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    GetHost {
        seq: u32,
        modid: u32,
        cmdid: u32,
        retcode: RetCode,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        host: Option<HostAddr>,
    },
    Route {
        modid: u32,
        cmdid: u32,
        hosts: Vec<HostAddr>,
    },
    /// `version` is -1 while the endpoint has no hosts; `route` is only
    /// present when the caller's version is out of date.
    CacheRoute {
        modid: u32,
        cmdid: u32,
        version: i64,
        overload: bool,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        route: Option<Vec<HostAddr>>,
    },
}

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed datagram: {0}")]
    Json(#[from] serde_json::Error),

    #[error("datagram of {0} bytes exceeds the UDP limit")]
    TooLarge(usize),
}

pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, CodecError> {
    let bytes = serde_json::to_vec(message)?;
    if bytes.len() > MAX_DATAGRAM {
        return Err(CodecError::TooLarge(bytes.len()));
    }
    Ok(bytes)
}

pub fn decode<T: DeserializeOwned>(datagram: &[u8]) -> Result<T, CodecError> {
    Ok(serde_json::from_slice(datagram)?)
}
