use std::{
    collections::HashMap,
    convert::Infallible,
    sync::{
        atomic::{AtomicU64, AtomicUsize, Ordering},
        Arc, RwLock,
    },
};

use anyhow::{Context, Result};
use hyper::service::{make_service_fn, service_fn};
use hyper::{Body, Method, Request, Response, Server, StatusCode};
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// In-memory ledger served by [`MockLedgerNode`]. The transaction at index `n`
/// carries version `n`.
#[derive(Clone)]
pub struct MockLedger {
    transactions: Arc<RwLock<Vec<Value>>>,
    chain_id: Arc<AtomicU64>,
    transaction_requests: Arc<AtomicUsize>,
    ledger_info_requests: Arc<AtomicUsize>,
    failures_left: Arc<AtomicUsize>,
}

impl MockLedger {
    pub fn new(chain_id: u64) -> Self {
        Self {
            transactions: Arc::new(RwLock::new(Vec::new())),
            chain_id: Arc::new(AtomicU64::new(chain_id)),
            transaction_requests: Arc::new(AtomicUsize::new(0)),
            ledger_info_requests: Arc::new(AtomicUsize::new(0)),
            failures_left: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Appends `tx`, stamping it with the next version. Returns that version.
    pub fn push(&self, mut tx: Value) -> u64 {
        let mut transactions = self.transactions.write().expect("mock ledger poisoned");
        let version = transactions.len() as u64;
        tx["version"] = Value::String(version.to_string());
        if tx.get("hash").is_none() {
            tx["hash"] = Value::String(format!("0x{version:064x}"));
        }
        transactions.push(tx);
        version
    }

    /// Appends `count` user transactions without events.
    pub fn push_empty(&self, count: u64) -> Option<u64> {
        let mut last = None;
        for _ in 0..count {
            last = Some(self.push(json!({
                "type": "user_transaction",
                "success": true,
                "vm_status": "Executed successfully",
                "timestamp": "1000",
                "sender": format!("0x{:064x}", 0xfeed),
                "events": [],
            })));
        }
        last
    }

    pub fn last_version(&self) -> Option<u64> {
        let len = self.transactions.read().expect("mock ledger poisoned").len() as u64;
        len.checked_sub(1)
    }

    pub fn set_chain_id(&self, chain_id: u64) {
        self.chain_id.store(chain_id, Ordering::SeqCst);
    }

    /// Answers the next `count` transaction requests with HTTP 503.
    pub fn fail_next_transaction_requests(&self, count: usize) {
        self.failures_left.store(count, Ordering::SeqCst);
    }

    /// Requests served by the transaction endpoints, failed ones included.
    pub fn transaction_requests(&self) -> usize {
        self.transaction_requests.load(Ordering::SeqCst)
    }

    pub fn ledger_info_requests(&self) -> usize {
        self.ledger_info_requests.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> bool {
        self.failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }

    fn ledger_info(&self) -> Value {
        let version = self.last_version().unwrap_or_default();
        json!({
            "chain_id": self.chain_id.load(Ordering::SeqCst),
            "epoch": "1",
            "ledger_version": version.to_string(),
            "oldest_ledger_version": "0",
            "ledger_timestamp": "1000",
            "block_height": version.to_string(),
            "oldest_block_height": "0",
            "node_role": "full_node",
        })
    }

    fn range(&self, start: u64, limit: u64) -> Option<Vec<Value>> {
        let transactions = self.transactions.read().expect("mock ledger poisoned");
        let start = usize::try_from(start).ok()?;
        if start >= transactions.len() {
            return None;
        }
        let end = transactions.len().min(start.saturating_add(limit as usize));
        Some(transactions[start..end].to_vec())
    }

    fn by_version(&self, version: u64) -> Option<Value> {
        let transactions = self.transactions.read().expect("mock ledger poisoned");
        transactions.get(usize::try_from(version).ok()?).cloned()
    }
}

pub struct MockLedgerNode {
    url: String,
    shutdown: Option<oneshot::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl MockLedgerNode {
    pub async fn start(ledger: MockLedger) -> Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .context("failed to bind mock ledger listener")?;
        let addr = listener
            .local_addr()
            .context("failed to read mock listener address")?;
        let std_listener = listener
            .into_std()
            .context("failed to convert mock listener")?;
        std_listener
            .set_nonblocking(true)
            .context("failed to set mock listener non-blocking")?;

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let make_service = make_service_fn(move |_| {
            let ledger = ledger.clone();
            async move {
                Ok::<_, Infallible>(service_fn(move |req| serve_request(ledger.clone(), req)))
            }
        });

        let server = Server::from_tcp(std_listener)
            .context("failed to build mock HTTP server")?
            .serve(make_service);
        let graceful = server.with_graceful_shutdown(async {
            let _ = shutdown_rx.await;
        });

        let handle = tokio::spawn(async move {
            if let Err(err) = graceful.await {
                eprintln!("mock ledger node stopped: {err}");
            }
        });

        Ok(Self {
            url: format!("http://{addr}"),
            shutdown: Some(shutdown_tx),
            handle: Some(handle),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

async fn serve_request(ledger: MockLedger, req: Request<Body>) -> Result<Response<Body>, Infallible> {
    if req.method() != Method::GET {
        return Ok(error(StatusCode::METHOD_NOT_ALLOWED, "method_not_allowed", "GET only"));
    }

    let path = req.uri().path().trim_end_matches('/').to_string();
    let query = parse_query(req.uri().query().unwrap_or_default());

    if path == "/v1" {
        ledger.ledger_info_requests.fetch_add(1, Ordering::SeqCst);
        return Ok(ok(ledger.ledger_info()));
    }

    if path == "/v1/transactions" {
        ledger.transaction_requests.fetch_add(1, Ordering::SeqCst);
        if ledger.take_failure() {
            return Ok(unavailable());
        }
        let start = query.get("start").and_then(|v| v.parse::<u64>().ok());
        let limit = query.get("limit").and_then(|v| v.parse::<u64>().ok());
        let (Some(start), Some(limit)) = (start, limit) else {
            return Ok(error(
                StatusCode::BAD_REQUEST,
                "invalid_input",
                "start and limit are required",
            ));
        };
        return Ok(match ledger.range(start, limit) {
            Some(transactions) => ok(Value::Array(transactions)),
            None => error(
                StatusCode::NOT_FOUND,
                "version_not_found",
                &format!("Ledger version({start}) not found"),
            ),
        });
    }

    if let Some(raw) = path.strip_prefix("/v1/transactions/by_version/") {
        ledger.transaction_requests.fetch_add(1, Ordering::SeqCst);
        if ledger.take_failure() {
            return Ok(unavailable());
        }
        let Ok(version) = raw.parse::<u64>() else {
            return Ok(error(StatusCode::BAD_REQUEST, "invalid_input", "bad version"));
        };
        return Ok(match ledger.by_version(version) {
            Some(tx) => ok(tx),
            None => error(
                StatusCode::NOT_FOUND,
                "transaction_not_found",
                &format!("Transaction not found by Transaction version({version})"),
            ),
        });
    }

    Ok(error(StatusCode::NOT_FOUND, "web_framework_error", "unknown route"))
}

fn parse_query(query: &str) -> HashMap<String, String> {
    query
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

fn ok(body: Value) -> Response<Body> {
    let mut response = Response::new(Body::from(body.to_string()));
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    response
}

fn unavailable() -> Response<Body> {
    error(
        StatusCode::SERVICE_UNAVAILABLE,
        "internal_error",
        "node is catching up",
    )
}

fn error(status: StatusCode, code: &str, message: &str) -> Response<Body> {
    let mut response = ok(json!({
        "message": message,
        "error_code": code,
        "vm_error_code": null,
    }));
    *response.status_mut() = status;
    response
}
