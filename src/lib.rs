pub mod core;
pub mod storage;
pub mod query;
pub mod parallel;
pub mod server;
pub mod client;

/*
┌──────────────────────────────────────────────────────────────────────────────────┐
│                             SNACKDB STRUCT ARCHITECTURE                           │
└──────────────────────────────────────────────────────────────────────────────────┘

┌──────────────────────────────────── CORE LAYER ──────────────────────────────────┐
│                                                                                  │
│  ┌──────────────────────────────┐   ┌──────────────────────────────────────┐     │
│  │ struct Registry              │   │ struct Database                      │     │
│  │ • databases: RwLock<HashMap< │──▶│ • name: String                       │     │
│  │     String, Arc<Database>>>  │   │ • tables: RwLock<HashMap<String,     │     │
│  │ • options: TableOptions      │   │     Arc<RowStoreTable>>>             │     │
│  └──────────────────────────────┘   └──────────────────────────────────────┘     │
│                                                                                  │
│  ┌──────────────────┐  ┌──────────────────┐  ┌────────────────────────────┐      │
│  │ struct Id        │  │ enum Value       │  │ struct Row                 │      │
│  │ • 0: Vec<Value>  │  │ • Null           │  │ • id: Id                   │      │
│  └──────────────────┘  │ • Bool(bool)     │  │ • cells: BTreeMap<String,  │      │
│                        │ • Int(i64)       │  │     Value>                 │      │
│  ┌──────────────────┐  │ • Float(f64)     │  └────────────────────────────┘      │
│  │ struct Config    │  │ • Str(String)    │                                      │
│  │ • bind_addr      │  │ • Bytes(Vec<u8>) │  ┌────────────────────────────┐      │
│  │ • worker_threads │  └──────────────────┘  │ struct Error               │      │
│  │ • queue_capacity │                        │ • kind: ErrorKind          │      │
│  │ • full_scan_limit│                        │ • context: String          │      │
│  └──────────────────┘                        └────────────────────────────┘      │
└──────────────────────────────────────────────────────────────────────────────────┘

┌─────────────────────────────────── STORAGE LAYER ────────────────────────────────┐
│  ┌────────────────────────────────────────────────────────────────────────┐      │
│  │ struct RowStoreTable                                                   │      │
│  │ • rows: RwLock<BTreeMap<Id, Arc<RwLock<RowSlot>>>>   // key order      │      │
│  │ • columns: Vec<ColumnType>                                             │      │
│  │ • options: TableOptions { full_scan_limit, parallel_scan_threshold }   │      │
│  └────────────────────────────────────────────────────────────────────────┘      │
└──────────────────────────────────────────────────────────────────────────────────┘

┌──────────────────────────────────── QUERY LAYER ─────────────────────────────────┐
│  ┌──────────────────────┐  ┌──────────────────────┐  ┌──────────────────────┐    │
│  │ struct Filter        │  │ enum Expression      │  │ trait Predicate      │    │
│  │ • conditions:        │  │ • Compare(Condition) │  │ • test(&Row) -> bool │    │
│  │   Vec<Expression>    │  │ • And / Or           │  └──────────────────────┘    │
│  │ • projection         │  │ • Constant(bool)     │  ┌──────────────────────┐    │
│  └──────────────────────┘  └──────────────────────┘  │ ExpressionCache (LRU)│    │
│                                                      └──────────────────────┘    │
└──────────────────────────────────────────────────────────────────────────────────┘

┌────────────────────────────────── PARALLEL LAYER ────────────────────────────────┐
│  submit ──▶ bounded channel ──▶ dispatcher thread ──▶ rayon pool (N workers)     │
│               (QueueFull)        (waits for permit)     └─▶ callback, handle     │
└──────────────────────────────────────────────────────────────────────────────────┘

┌─────────────────────────────────── SERVER LAYER ─────────────────────────────────┐
│  TcpListener ──▶ Connection (tokio task per socket)                              │
│                   │ FrameCodec: varint length + bincode Request                  │
│                   │ TaskQueue::submit(Task { OperatorSet::execute })             │
│                   └─▶ Response { request_id, payload | WireError }               │
│                                                                                  │
│  SnackClient ──▶ same framing, typed methods, ExpressionCache for filters        │
└──────────────────────────────────────────────────────────────────────────────────┘
*/
