use std::collections::BTreeMap;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::registry::TableInfo;
use crate::core::types::Value;

/// Request kinds understood by the front end
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpKind {
    Save,           // Row -> Id
    SaveBatch,      // Vec<Row> -> Vec<Result<Id, WireError>>
    Query,          // Filter bytes -> Vec<Row>
    Update,         // UpdatePayload -> Vec<Id>
    Delete,         // Filter bytes -> Vec<Id>
    Aggregate,      // Filter with projection -> Value
    CreateDatabase, // () -> ()
    CreateTable,    // Vec<ColumnType> -> ()
    DropTable,      // () -> ()
    Ping,           // () -> ()
    Stats,          // () -> StatsReport
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    pub request_id: u64,
    pub target: TableInfo,
    pub op: OpKind,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub request_id: u64,
    pub op: OpKind,
    pub payload: Vec<u8>,
    pub error: Option<WireError>,
}

/// Error carried back to the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireError {
    pub kind: ErrorKind,
    pub message: String,
}

/// Update payload. The filter travels as its own encoded blob so a corrupt
/// filter can be told apart from a corrupt patch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdatePayload {
    pub filter: Vec<u8>,
    pub patch: BTreeMap<String, Value>,
}

impl From<Error> for WireError {
    fn from(err: Error) -> Self {
        WireError {
            kind: err.kind,
            message: err.context,
        }
    }
}

impl From<WireError> for Error {
    fn from(err: WireError) -> Self {
        Error::new(err.kind, err.message)
    }
}

impl Response {
    pub fn from_outcome(request_id: u64, op: OpKind, outcome: Result<Vec<u8>>) -> Self {
        match outcome {
            Ok(payload) => Response {
                request_id,
                op,
                payload,
                error: None,
            },
            Err(err) => Response {
                request_id,
                op,
                payload: Vec::new(),
                error: Some(err.into()),
            },
        }
    }

    pub fn into_result(self) -> Result<Vec<u8>> {
        match self.error {
            Some(err) => Err(err.into()),
            None => Ok(self.payload),
        }
    }
}

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    Ok(bincode::serialize(value)?)
}

pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes)
        .map_err(|e| Error::decode(format!("payload: {}", e)))
}
