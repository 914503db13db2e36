use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};
use crate::core::error::{Error, Result};
use crate::core::registry::Registry;
use crate::core::stats::{ServerStats, StatsReport};
use crate::core::types::{ColumnType, Row};
use crate::parallel::task_queue::QueueStats;
use crate::query::ast::Filter;
use crate::server::protocol::{self, OpKind, Request, UpdatePayload, WireError};
use crate::storage::table::RowStoreTable;

/// Shared state every operator runs against
pub struct OperatorContext {
    pub registry: Arc<Registry>,
    pub lenient_decode: bool,
    pub server_stats: Arc<ServerStats>,
    pub queue_stats: Arc<QueueStats>,
}

impl OperatorContext {
    /// Fail-closed table lookup
    fn target_table(&self, request: &Request) -> Result<Arc<RowStoreTable>> {
        self.registry.security_get_table(&request.target)
    }

    /// Empty payload means no filter. A corrupt filter is an error unless
    /// lenient decoding is on, in which case it matches nothing.
    fn decode_filter(&self, bytes: &[u8]) -> Result<Option<Filter>> {
        if bytes.is_empty() {
            return Ok(None);
        }
        match protocol::decode::<Filter>(bytes) {
            Ok(filter) => Ok(Some(filter)),
            Err(e) if self.lenient_decode => {
                warn!(error = %e, "undecodable filter treated as match-nothing");
                Ok(Some(Filter::match_nothing()))
            }
            Err(e) => Err(e),
        }
    }
}

/// Turns one kind of request payload into a table operation and its result
pub trait Operator: Send + Sync {
    fn kind(&self) -> OpKind;
    fn apply(&self, ctx: &OperatorContext, request: &Request) -> Result<Vec<u8>>;
}

pub struct SaveOperator;
pub struct SaveBatchOperator;
pub struct QueryOperator;
pub struct UpdateOperator;
pub struct DeleteOperator;
pub struct AggregateOperator;
pub struct CreateDatabaseOperator;
pub struct CreateTableOperator;
pub struct DropTableOperator;
pub struct PingOperator;
pub struct StatsOperator;

impl Operator for SaveOperator {
    fn kind(&self) -> OpKind {
        OpKind::Save
    }

    fn apply(&self, ctx: &OperatorContext, request: &Request) -> Result<Vec<u8>> {
        let row: Row = protocol::decode(&request.payload)?;
        let table = ctx.target_table(request)?;
        let id = table.save(row)?;
        protocol::encode(&id)
    }
}

impl Operator for SaveBatchOperator {
    fn kind(&self) -> OpKind {
        OpKind::SaveBatch
    }

    fn apply(&self, ctx: &OperatorContext, request: &Request) -> Result<Vec<u8>> {
        let rows: Vec<Row> = protocol::decode(&request.payload)?;
        let table = ctx.target_table(request)?;
        let outcomes: Vec<std::result::Result<_, WireError>> = table.save_batch(rows)
            .into_iter()
            .map(|r| r.map_err(WireError::from))
            .collect();
        protocol::encode(&outcomes)
    }
}

impl Operator for QueryOperator {
    fn kind(&self) -> OpKind {
        OpKind::Query
    }

    fn apply(&self, ctx: &OperatorContext, request: &Request) -> Result<Vec<u8>> {
        let filter = ctx.decode_filter(&request.payload)?;
        let table = ctx.target_table(request)?;
        let rows = table.query(filter.as_ref());
        debug!(table = table.name(), rows = rows.len(), "query");
        protocol::encode(&rows)
    }
}

impl Operator for UpdateOperator {
    fn kind(&self) -> OpKind {
        OpKind::Update
    }

    fn apply(&self, ctx: &OperatorContext, request: &Request) -> Result<Vec<u8>> {
        let payload: UpdatePayload = protocol::decode(&request.payload)?;
        let filter = ctx.decode_filter(&payload.filter)?;
        let table = ctx.target_table(request)?;
        let ids = table.update(filter.as_ref(), &payload.patch);
        protocol::encode(&ids)
    }
}

impl Operator for DeleteOperator {
    fn kind(&self) -> OpKind {
        OpKind::Delete
    }

    fn apply(&self, ctx: &OperatorContext, request: &Request) -> Result<Vec<u8>> {
        let filter = ctx.decode_filter(&request.payload)?;
        let table = ctx.target_table(request)?;
        let ids = table.delete(filter.as_ref());
        protocol::encode(&ids)
    }
}

impl Operator for AggregateOperator {
    fn kind(&self) -> OpKind {
        OpKind::Aggregate
    }

    // Always strict: a substituted filter would carry no projection
    fn apply(&self, ctx: &OperatorContext, request: &Request) -> Result<Vec<u8>> {
        let filter: Filter = protocol::decode(&request.payload)?;
        let table = ctx.target_table(request)?;
        protocol::encode(&table.aggregate(&filter)?)
    }
}

impl Operator for CreateDatabaseOperator {
    fn kind(&self) -> OpKind {
        OpKind::CreateDatabase
    }

    fn apply(&self, ctx: &OperatorContext, request: &Request) -> Result<Vec<u8>> {
        ctx.registry.get_or_create_database(&request.target.database)?;
        Ok(Vec::new())
    }
}

impl Operator for CreateTableOperator {
    fn kind(&self) -> OpKind {
        OpKind::CreateTable
    }

    fn apply(&self, ctx: &OperatorContext, request: &Request) -> Result<Vec<u8>> {
        let columns: Vec<ColumnType> = protocol::decode(&request.payload)?;
        let database = ctx.registry.security_get_database(&request.target.database_info())?;
        database.get_or_create_table(&request.target.table, columns)?;
        Ok(Vec::new())
    }
}

impl Operator for DropTableOperator {
    fn kind(&self) -> OpKind {
        OpKind::DropTable
    }

    fn apply(&self, ctx: &OperatorContext, request: &Request) -> Result<Vec<u8>> {
        let database = ctx.registry.security_get_database(&request.target.database_info())?;
        database.drop_table(&request.target.table)
            .ok_or_else(|| Error::not_found(format!("table `{}`", request.target.table)))?;
        Ok(Vec::new())
    }
}

impl Operator for PingOperator {
    fn kind(&self) -> OpKind {
        OpKind::Ping
    }

    fn apply(&self, _ctx: &OperatorContext, _request: &Request) -> Result<Vec<u8>> {
        Ok(Vec::new())
    }
}

impl Operator for StatsOperator {
    fn kind(&self) -> OpKind {
        OpKind::Stats
    }

    fn apply(&self, ctx: &OperatorContext, _request: &Request) -> Result<Vec<u8>> {
        protocol::encode(&StatsReport {
            server: ctx.server_stats.snapshot(),
            queue: ctx.queue_stats.snapshot(),
            databases: ctx.registry.database_names(),
        })
    }
}

/// Operators keyed by the request kind they serve
pub struct OperatorSet {
    operators: HashMap<OpKind, Box<dyn Operator>>,
}

impl OperatorSet {
    pub fn empty() -> Self {
        OperatorSet { operators: HashMap::new() }
    }

    pub fn standard() -> Self {
        let mut set = Self::empty();
        set.register(Box::new(SaveOperator));
        set.register(Box::new(SaveBatchOperator));
        set.register(Box::new(QueryOperator));
        set.register(Box::new(UpdateOperator));
        set.register(Box::new(DeleteOperator));
        set.register(Box::new(AggregateOperator));
        set.register(Box::new(CreateDatabaseOperator));
        set.register(Box::new(CreateTableOperator));
        set.register(Box::new(DropTableOperator));
        set.register(Box::new(PingOperator));
        set.register(Box::new(StatsOperator));
        set
    }

    pub fn register(&mut self, operator: Box<dyn Operator>) {
        self.operators.insert(operator.kind(), operator);
    }

    pub fn execute(&self, ctx: &OperatorContext, request: &Request) -> Result<Vec<u8>> {
        let operator = self.operators.get(&request.op)
            .ok_or_else(|| Error::decode(format!("no operator for {:?}", request.op)))?;
        operator.apply(ctx, request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;
    use crate::core::registry::TableInfo;
    use crate::core::types::{Id, LogicalType};
    use crate::query::ast::Expression;

    fn context(lenient_decode: bool) -> OperatorContext {
        let registry = Arc::new(Registry::default());
        let db = registry.get_or_create_database("shop").unwrap();
        let table = db.get_or_create_table("orders", vec![
            ColumnType::key("id", LogicalType::Int),
            ColumnType::column("status", LogicalType::Str),
        ]).unwrap();
        table.save(Row::new(Id::from(1)).with("id", 1).with("status", "open")).unwrap();

        OperatorContext {
            registry,
            lenient_decode,
            server_stats: Arc::new(ServerStats::new()),
            queue_stats: Arc::new(QueueStats::default()),
        }
    }

    fn request(op: OpKind, table: &str, payload: Vec<u8>) -> Request {
        Request {
            request_id: 1,
            target: TableInfo::new("shop", table),
            op,
            payload,
        }
    }

    #[test]
    fn query_with_encoded_filter() {
        let ctx = context(false);
        let filter = Filter::new().with(Expression::eq("status", "open"));
        let out = OperatorSet::standard()
            .execute(&ctx, &request(OpKind::Query, "orders", protocol::encode(&filter).unwrap()))
            .unwrap();
        let rows: Vec<Row> = protocol::decode(&out).unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[test]
    fn corrupt_filter_strict_vs_lenient() {
        let garbage = vec![0xde, 0xad];

        let strict = OperatorSet::standard()
            .execute(&context(false), &request(OpKind::Delete, "orders", garbage.clone()));
        assert_eq!(strict.unwrap_err().kind, ErrorKind::Decode);

        let ctx = context(true);
        let out = OperatorSet::standard()
            .execute(&ctx, &request(OpKind::Delete, "orders", garbage))
            .unwrap();
        let ids: Vec<Id> = protocol::decode(&out).unwrap();
        assert!(ids.is_empty());
        assert_eq!(ctx.registry.security_get_table(&TableInfo::new("shop", "orders")).unwrap().len(), 1);
    }

    #[test]
    fn unknown_table_fails_closed() {
        let err = OperatorSet::standard()
            .execute(&context(false), &request(OpKind::Query, "missing", Vec::new()))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::NotFound);
    }

    #[test]
    fn unregistered_kind_is_rejected() {
        let err = OperatorSet::empty()
            .execute(&context(false), &request(OpKind::Ping, "orders", Vec::new()))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::Decode);
    }
}
