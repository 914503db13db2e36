use std::collections::BTreeMap;
use bytes::BytesMut;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};
use tracing::trace;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::registry::TableInfo;
use crate::core::stats::StatsReport;
use crate::core::types::{ColumnType, Id, Row, Value};
use crate::query::ast::Filter;
use crate::query::cache::{ExpressionCache, FilterCacheSnapshot};
use crate::server::frame::FrameCodec;
use crate::server::protocol::{self, OpKind, Request, Response, UpdatePayload, WireError};

const DEFAULT_FILTER_CACHE: usize = 256;

/// One connection to a server. Requests are sent one at a time and answered
/// in order.
pub struct SnackClient {
    stream: TcpStream,
    codec: FrameCodec,
    inbound: BytesMut,
    next_request_id: u64,
    filters: ExpressionCache,
}

impl SnackClient {
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        let _ = stream.set_nodelay(true);
        Ok(SnackClient {
            stream,
            codec: FrameCodec::new(16 * 1024 * 1024),
            inbound: BytesMut::with_capacity(4096),
            next_request_id: 1,
            filters: ExpressionCache::new(DEFAULT_FILTER_CACHE),
        })
    }

    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.codec = FrameCodec::new(max_frame_len);
        self
    }

    /// Send a request with an already-encoded payload and return the raw
    /// response, errors included.
    pub async fn request(&mut self, target: &TableInfo, op: OpKind, payload: Vec<u8>) -> Result<Response> {
        let request_id = self.next_request_id;
        self.next_request_id += 1;

        let request = Request {
            request_id,
            target: target.clone(),
            op,
            payload,
        };
        let mut outbound = BytesMut::new();
        self.codec.encode(&protocol::encode(&request)?, &mut outbound)?;
        self.stream.write_all(&outbound).await?;
        trace!(request_id, ?op, bytes = outbound.len(), "sent");

        let response: Response = protocol::decode(&self.read_frame().await?)?;
        if response.request_id != request_id {
            return Err(Error::decode(format!(
                "response for request {} while waiting for {}", response.request_id, request_id
            )));
        }
        Ok(response)
    }

    async fn read_frame(&mut self) -> Result<Vec<u8>> {
        loop {
            if let Some(frame) = self.codec.decode(&mut self.inbound)? {
                return Ok(frame.to_vec());
            }
            if self.stream.read_buf(&mut self.inbound).await? == 0 {
                return Err(Error::new(ErrorKind::Io, "connection closed by server"));
            }
        }
    }

    async fn call(&mut self, target: &TableInfo, op: OpKind, payload: Vec<u8>) -> Result<Vec<u8>> {
        self.request(target, op, payload).await?.into_result()
    }

    async fn call_decoded<T: DeserializeOwned>(
        &mut self,
        target: &TableInfo,
        op: OpKind,
        payload: &impl Serialize,
    ) -> Result<T> {
        let payload = protocol::encode(payload)?;
        let bytes = self.call(target, op, payload).await?;
        protocol::decode(&bytes)
    }

    fn filter_bytes(&self, filter: Option<&Filter>) -> Result<Vec<u8>> {
        match filter {
            Some(filter) => Ok(self.filters.encode(filter)?.as_ref().clone()),
            None => Ok(Vec::new()),
        }
    }

    pub async fn ping(&mut self) -> Result<()> {
        self.call(&TableInfo::new("", ""), OpKind::Ping, Vec::new()).await?;
        Ok(())
    }

    pub async fn stats(&mut self) -> Result<StatsReport> {
        let bytes = self.call(&TableInfo::new("", ""), OpKind::Stats, Vec::new()).await?;
        protocol::decode(&bytes)
    }

    pub async fn create_database(&mut self, database: &str) -> Result<()> {
        self.call(&TableInfo::new(database, ""), OpKind::CreateDatabase, Vec::new()).await?;
        Ok(())
    }

    pub async fn create_table(&mut self, target: &TableInfo, columns: Vec<ColumnType>) -> Result<()> {
        self.call(target, OpKind::CreateTable, protocol::encode(&columns)?).await?;
        Ok(())
    }

    pub async fn drop_table(&mut self, target: &TableInfo) -> Result<()> {
        self.call(target, OpKind::DropTable, Vec::new()).await?;
        Ok(())
    }

    pub async fn save(&mut self, target: &TableInfo, row: &Row) -> Result<Id> {
        self.call_decoded(target, OpKind::Save, row).await
    }

    /// One outcome per row, in input order
    pub async fn save_batch(&mut self, target: &TableInfo, rows: &[Row]) -> Result<Vec<Result<Id>>> {
        let outcomes: Vec<std::result::Result<Id, WireError>> =
            self.call_decoded(target, OpKind::SaveBatch, &rows).await?;
        Ok(outcomes.into_iter().map(|o| o.map_err(Error::from)).collect())
    }

    pub async fn query(&mut self, target: &TableInfo, filter: Option<&Filter>) -> Result<Vec<Row>> {
        let payload = self.filter_bytes(filter)?;
        let bytes = self.call(target, OpKind::Query, payload).await?;
        protocol::decode(&bytes)
    }

    pub async fn update(
        &mut self,
        target: &TableInfo,
        filter: Option<&Filter>,
        patch: BTreeMap<String, Value>,
    ) -> Result<Vec<Id>> {
        let payload = UpdatePayload {
            filter: self.filter_bytes(filter)?,
            patch,
        };
        self.call_decoded(target, OpKind::Update, &payload).await
    }

    pub async fn delete(&mut self, target: &TableInfo, filter: Option<&Filter>) -> Result<Vec<Id>> {
        let payload = self.filter_bytes(filter)?;
        let bytes = self.call(target, OpKind::Delete, payload).await?;
        protocol::decode(&bytes)
    }

    pub async fn aggregate(&mut self, target: &TableInfo, filter: &Filter) -> Result<Value> {
        let payload = self.filter_bytes(Some(filter))?;
        let bytes = self.call(target, OpKind::Aggregate, payload).await?;
        protocol::decode(&bytes)
    }

    pub fn filter_cache_stats(&self) -> FilterCacheSnapshot {
        self.filters.stats()
    }
}
