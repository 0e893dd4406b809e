//! Remote ledger adapter.
//!
//! Chain queries use the standard JSON-RPC methods (`getAccountInfo`, `getBalance`,
//! `getSignaturesForAddress`, `getTransaction`, `getSlot`, `getEpochInfo`, `getLatestBlockhash`,
//! `getRecentPerformanceSamples`). Program
//! instructions and account listings go through the same endpoint as gateway methods
//! (`registerUser`, `initializeClassroom`, `addGrade`, `getUser`, `fetchAllUsers`,
//! `fetchAllClassrooms`, `fetchAllGrades`). Every transport or RPC failure is reported as
//! `Error::NotAvailable`; callers fall back to the local store.

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::LedgerConfig;
use crate::error::{Error, Result};
use crate::model::{round_off_1_decimal, Classroom, Grade, Role, User};
use crate::store::{normalize_classroom, normalize_grade, normalize_user};

pub const LAMPORTS_PER_SOL: f64 = 1_000_000_000.0;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Health {
    pub healthy: bool,
    pub detail: String,
}

impl Health {
    fn down(detail: impl Into<String>) -> Self {
        Health {
            healthy: false,
            detail: detail.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramInfo {
    pub program_id: String,
    pub balance: f64,
    pub lamports: u64,
    pub executable: bool,
    pub owner: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionInfo {
    pub signature: String,
    pub slot: u64,
    pub block_time: Option<i64>,
    pub confirmation_status: String,
    pub err: Value,
    pub memo: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkInfo {
    pub current_slot: u64,
    pub epoch: u64,
    pub slot_index: u64,
    pub slots_in_epoch: u64,
    pub recent_blockhash: String,
    /// Transactions in the latest performance sample.
    pub transaction_count: u64,
    pub sample_period_secs: u64,
    pub tps: f64,
}

pub trait Ledger: Send + Sync {
    /// Program account exists and is executable.
    fn health_check(&self) -> Health;
    fn register_user(&self, authority: &str, username: &str, role: Role) -> Result<String>;
    fn fetch_all_users(&self) -> Result<Vec<User>>;
    fn fetch_all_classrooms(&self) -> Result<Vec<Classroom>>;
    fn fetch_all_grades(&self) -> Result<Vec<Grade>>;
    fn create_classroom(&self, teacher: &str, name: &str, course: &str) -> Result<String>;
    fn add_grade(
        &self,
        teacher: &str,
        student: &str,
        assignment_name: &str,
        grade: u32,
        max_grade: u32,
    ) -> Result<String>;
    fn get_balance(&self, account: &str) -> Result<f64>;
    fn program_info(&self) -> Result<ProgramInfo>;
    fn recent_transactions(&self, limit: usize) -> Result<Vec<TransactionInfo>>;
    fn network_info(&self) -> Result<NetworkInfo>;
    /// `None` when the node does not know the signature.
    fn transaction_details(&self, signature: &str) -> Result<Option<Value>>;
}

pub struct RpcLedger {
    client: reqwest::blocking::Client,
    rpc_url: String,
    program_id: String,
    next_id: AtomicU64,
}

impl RpcLedger {
    pub fn new(cfg: &LedgerConfig) -> anyhow::Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(cfg.timeout())
            .user_agent(concat!("gradebookd/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            rpc_url: cfg.rpc_url.trim().to_string(),
            program_id: cfg.program_id.trim().to_string(),
            next_id: AtomicU64::new(1),
        })
    }

    fn call(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let body = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });
        tracing::debug!(method, id, "ledger rpc");
        let resp = self
            .client
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .and_then(|r| r.error_for_status())
            .map_err(|e| Error::NotAvailable(format!("{}: {}", method, e)))?;
        let envelope: Value = resp
            .json()
            .map_err(|e| Error::NotAvailable(format!("{}: bad response: {}", method, e)))?;
        rpc_result(method, envelope)
    }

    fn fetch_all<T>(
        &self,
        method: &str,
        decode: impl Fn(&Value) -> std::result::Result<T, String>,
    ) -> Result<Vec<T>> {
        let result = self.call(method, json!([{ "programId": self.program_id }]))?;
        Ok(decode_accounts(method, &result, decode))
    }
}

/// Unwraps a JSON-RPC 2.0 envelope.
fn rpc_result(method: &str, mut envelope: Value) -> Result<Value> {
    if let Some(err) = envelope.get("error").filter(|e| !e.is_null()) {
        let message = err
            .get("message")
            .and_then(|m| m.as_str())
            .unwrap_or("unknown rpc error");
        return Err(Error::NotAvailable(format!("{}: {}", method, message)));
    }
    match envelope.get_mut("result") {
        Some(v) => Ok(v.take()),
        None => Err(Error::NotAvailable(format!("{}: response has no result", method))),
    }
}

fn signature(method: &str, result: &Value) -> Result<String> {
    result
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| Error::NotAvailable(format!("{}: expected a transaction signature", method)))
}

/// Program account listings come back either bare or as `{publicKey, account}` pairs.
fn decode_accounts<T>(
    method: &str,
    result: &Value,
    decode: impl Fn(&Value) -> std::result::Result<T, String>,
) -> Vec<T> {
    let Some(items) = result.as_array() else {
        tracing::warn!(method, "ledger listing is not an array");
        return Vec::new();
    };
    items
        .iter()
        .filter_map(|item| {
            let account = item.get("account").unwrap_or(item);
            match decode(account) {
                Ok(v) => Some(v),
                Err(reason) => {
                    tracing::warn!(method, reason = %reason, "skipping ledger account");
                    None
                }
            }
        })
        .collect()
}

pub fn decode_user(account: &Value) -> std::result::Result<User, String> {
    normalize_user(account)
}

/// Ledger classrooms carry their id as `classroomId`.
pub fn decode_classroom(account: &Value) -> std::result::Result<Classroom, String> {
    if !account.is_object() {
        return Err("account is not an object".to_string());
    }
    let mut v = account.clone();
    if v.get("id").is_none() {
        let id = account
            .get("classroomId")
            .cloned()
            .ok_or("missing classroomId")?;
        v["id"] = id;
    }
    normalize_classroom(&v)
}

/// Ledger grades name the parties `student`/`teacher` and stamp seconds.
pub fn decode_grade(account: &Value) -> std::result::Result<Grade, String> {
    if !account.is_object() {
        return Err("account is not an object".to_string());
    }
    let mut v = account.clone();
    if v.get("id").is_none() {
        v["id"] = account.get("gradeId").cloned().ok_or("missing gradeId")?;
    }
    if v.get("studentWallet").is_none() {
        v["studentWallet"] = account.get("student").cloned().unwrap_or(Value::Null);
    }
    if v.get("teacherWallet").is_none() && v.get("gradedBy").is_none() {
        v["teacherWallet"] = account.get("teacher").cloned().unwrap_or(Value::Null);
    }
    let secs = account
        .get("timestamp")
        .and_then(|t| t.as_i64())
        .ok_or("missing timestamp")?;
    v["timestamp"] = json!(secs.saturating_mul(1000));
    normalize_grade(&v)
}

pub fn decode_health(account_info: &Value) -> Health {
    let value = &account_info["value"];
    if value.is_null() {
        return Health::down("program account not found");
    }
    if !value["executable"].as_bool().unwrap_or(false) {
        return Health::down("program account is not executable");
    }
    Health {
        healthy: true,
        detail: "program deployed".to_string(),
    }
}

pub fn decode_program_info(program_id: &str, account_info: &Value) -> Result<ProgramInfo> {
    let value = &account_info["value"];
    if value.is_null() {
        return Err(Error::NotAvailable("program account not found".to_string()));
    }
    let lamports = value["lamports"].as_u64().unwrap_or(0);
    Ok(ProgramInfo {
        program_id: program_id.to_string(),
        balance: lamports as f64 / LAMPORTS_PER_SOL,
        lamports,
        executable: value["executable"].as_bool().unwrap_or(false),
        owner: value["owner"].as_str().unwrap_or("").to_string(),
    })
}

pub fn decode_balance(result: &Value) -> Result<f64> {
    result["value"]
        .as_u64()
        .or_else(|| result.as_u64())
        .map(|lamports| lamports as f64 / LAMPORTS_PER_SOL)
        .ok_or_else(|| Error::NotAvailable("getBalance: no lamports in response".to_string()))
}

pub fn decode_transactions(result: &Value) -> Vec<TransactionInfo> {
    result
        .as_array()
        .map(|items| {
            items
                .iter()
                .filter_map(|s| {
                    Some(TransactionInfo {
                        signature: s["signature"].as_str()?.to_string(),
                        slot: s["slot"].as_u64().unwrap_or(0),
                        block_time: s["blockTime"].as_i64(),
                        confirmation_status: s["confirmationStatus"]
                            .as_str()
                            .unwrap_or("unknown")
                            .to_string(),
                        err: s["err"].clone(),
                        memo: s["memo"].as_str().map(str::to_string),
                    })
                })
                .collect()
        })
        .unwrap_or_default()
}

pub fn decode_network(
    slot: &Value,
    epoch: &Value,
    blockhash: &Value,
    samples: &Value,
) -> Result<NetworkInfo> {
    let missing = |what: &str| Error::NotAvailable(format!("network info: missing {}", what));
    let sample = &samples[0];
    let transaction_count = sample["numTransactions"].as_u64().unwrap_or(0);
    let sample_period_secs = sample["samplePeriodSecs"].as_u64().unwrap_or(0);
    let tps = if sample_period_secs == 0 {
        0.0
    } else {
        round_off_1_decimal(transaction_count as f64 / sample_period_secs as f64)
    };
    Ok(NetworkInfo {
        current_slot: slot.as_u64().ok_or_else(|| missing("slot"))?,
        epoch: epoch["epoch"].as_u64().ok_or_else(|| missing("epoch"))?,
        slot_index: epoch["slotIndex"].as_u64().unwrap_or(0),
        slots_in_epoch: epoch["slotsInEpoch"].as_u64().unwrap_or(0),
        recent_blockhash: blockhash["value"]["blockhash"]
            .as_str()
            .ok_or_else(|| missing("blockhash"))?
            .to_string(),
        transaction_count,
        sample_period_secs,
        tps,
    })
}

/// Program enums are encoded as single-key objects: `{"teacher": {}}`.
fn role_arg(role: Role) -> Value {
    let mut variant = serde_json::Map::new();
    variant.insert(role.as_str().to_ascii_lowercase(), json!({}));
    Value::Object(variant)
}

impl Ledger for RpcLedger {
    fn health_check(&self) -> Health {
        if self.program_id.is_empty() {
            return Health::down("no program id configured");
        }
        match self.call(
            "getAccountInfo",
            json!([self.program_id, { "encoding": "base64" }]),
        ) {
            Ok(info) => decode_health(&info),
            Err(e) => Health::down(e.to_string()),
        }
    }

    fn register_user(&self, authority: &str, username: &str, role: Role) -> Result<String> {
        let existing = self.call(
            "getUser",
            json!([{ "programId": self.program_id, "authority": authority }]),
        )?;
        if !existing.is_null() {
            return Err(Error::Conflict(format!(
                "user {} is already registered",
                authority
            )));
        }
        let result = self.call(
            "registerUser",
            json!([{
                "programId": self.program_id,
                "authority": authority,
                "username": username,
                "role": role_arg(role),
            }]),
        )?;
        signature("registerUser", &result)
    }

    fn fetch_all_users(&self) -> Result<Vec<User>> {
        self.fetch_all("fetchAllUsers", decode_user)
    }

    fn fetch_all_classrooms(&self) -> Result<Vec<Classroom>> {
        self.fetch_all("fetchAllClassrooms", decode_classroom)
    }

    fn fetch_all_grades(&self) -> Result<Vec<Grade>> {
        self.fetch_all("fetchAllGrades", decode_grade)
    }

    fn create_classroom(&self, teacher: &str, name: &str, course: &str) -> Result<String> {
        let classroom_id = Utc::now().timestamp_millis().to_string();
        let result = self.call(
            "initializeClassroom",
            json!([{
                "programId": self.program_id,
                "classroomId": classroom_id,
                "name": name,
                "course": course,
                "teacher": teacher,
            }]),
        )?;
        signature("initializeClassroom", &result)
    }

    fn add_grade(
        &self,
        teacher: &str,
        student: &str,
        assignment_name: &str,
        grade: u32,
        max_grade: u32,
    ) -> Result<String> {
        let grade_id = format!(
            "{}_{}_{}",
            student,
            assignment_name,
            Utc::now().timestamp_millis()
        );
        let result = self.call(
            "addGrade",
            json!([{
                "programId": self.program_id,
                "gradeId": grade_id,
                "assignmentName": assignment_name,
                "grade": grade,
                "maxGrade": max_grade,
                "student": student,
                "teacher": teacher,
            }]),
        )?;
        signature("addGrade", &result)
    }

    fn get_balance(&self, account: &str) -> Result<f64> {
        let result = self.call("getBalance", json!([account]))?;
        decode_balance(&result)
    }

    fn program_info(&self) -> Result<ProgramInfo> {
        let info = self.call(
            "getAccountInfo",
            json!([self.program_id, { "encoding": "base64" }]),
        )?;
        decode_program_info(&self.program_id, &info)
    }

    fn recent_transactions(&self, limit: usize) -> Result<Vec<TransactionInfo>> {
        let result = self.call(
            "getSignaturesForAddress",
            json!([self.program_id, { "limit": limit }]),
        )?;
        Ok(decode_transactions(&result))
    }

    fn network_info(&self) -> Result<NetworkInfo> {
        let slot = self.call("getSlot", json!([]))?;
        let epoch = self.call("getEpochInfo", json!([]))?;
        let blockhash = self.call("getLatestBlockhash", json!([]))?;
        let samples = self.call("getRecentPerformanceSamples", json!([1]))?;
        decode_network(&slot, &epoch, &blockhash, &samples)
    }

    fn transaction_details(&self, signature: &str) -> Result<Option<Value>> {
        let tx = self.call(
            "getTransaction",
            json!([signature, { "encoding": "json", "maxSupportedTransactionVersion": 0 }]),
        )?;
        Ok(if tx.is_null() { None } else { Some(tx) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(seed: &str) -> String {
        format!("{:1<44}", seed)
    }

    #[test]
    fn health_requires_executable_program() {
        assert!(!decode_health(&json!({ "value": null })).healthy);
        assert!(!decode_health(&json!({ "value": { "executable": false } })).healthy);
        let h = decode_health(&json!({ "context": { "slot": 1 }, "value": { "executable": true, "lamports": 5 } }));
        assert!(h.healthy);
    }

    #[test]
    fn rpc_errors_become_not_available() {
        let err = rpc_result("getSlot", json!({ "jsonrpc": "2.0", "id": 1, "error": { "code": -32601, "message": "Method not found" } }))
            .expect_err("error");
        assert_eq!(err.code(), "not_available");
        assert!(err.to_string().contains("Method not found"));
        assert_eq!(
            rpc_result("getSlot", json!({ "jsonrpc": "2.0", "id": 1, "result": 42 })).expect("ok"),
            json!(42)
        );
    }

    #[test]
    fn balance_is_in_whole_units() {
        assert_eq!(decode_balance(&json!({ "value": 2_500_000_000u64 })).expect("balance"), 2.5);
        assert!(decode_balance(&json!({ "value": null })).is_err());
    }

    #[test]
    fn grade_accounts_are_scaled_to_ms() {
        let g = decode_grade(&json!({
            "gradeId": "g-1",
            "student": addr("Stu"),
            "teacher": addr("Tea"),
            "assignmentName": "Essay",
            "grade": 45,
            "maxGrade": 50,
            "timestamp": 1_700_000_000
        }))
        .expect("grade");
        assert_eq!(g.timestamp, 1_700_000_000_000);
        assert_eq!(g.teacher_wallet, addr("Tea"));
        assert_eq!(g.percentage(), Some(90));
    }

    #[test]
    fn listings_skip_undecodable_accounts() {
        let listing = json!([
            { "publicKey": "x", "account": { "authority": addr("Tea"), "username": "t", "role": { "teacher": {} }, "createdAt": 1, "isActive": true } },
            { "publicKey": "y", "account": { "authority": addr("Odd"), "username": "o", "role": { "janitor": {} } } }
        ]);
        let users = decode_accounts("fetchAllUsers", &listing, decode_user);
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].role, Role::Teacher);
    }

    #[test]
    fn classroom_id_comes_from_account() {
        let c = decode_classroom(&json!({
            "classroomId": "1700000000000",
            "name": "Algebra",
            "course": "MATH",
            "teacher": addr("Tea"),
            "students": [addr("Stu")]
        }))
        .expect("classroom");
        assert_eq!(c.id, "1700000000000");
        assert!(c.has_student(&addr("Stu")));
    }

    #[test]
    fn transactions_and_network_decode() {
        let txs = decode_transactions(&json!([
            { "signature": "abc", "slot": 9, "blockTime": 100, "confirmationStatus": "finalized", "err": null },
            { "slot": 10 }
        ]));
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].confirmation_status, "finalized");

        let n = decode_network(
            &json!(1234),
            &json!({ "epoch": 5, "slotIndex": 34, "slotsInEpoch": 432000 }),
            &json!({ "value": { "blockhash": "Hash111", "lastValidBlockHeight": 1 } }),
            &json!([{ "numTransactions": 1250, "numSlots": 150, "samplePeriodSecs": 60, "slot": 1234 }]),
        )
        .expect("network");
        assert_eq!(n.transaction_count, 1250);
        assert_eq!(n.tps, 20.8);
        let quiet = decode_network(
            &json!(1),
            &json!({ "epoch": 0 }),
            &json!({ "value": { "blockhash": "h" } }),
            &json!([]),
        )
        .expect("network without samples");
        assert_eq!(quiet.tps, 0.0);
        assert_eq!(n.current_slot, 1234);
        assert_eq!(n.slots_in_epoch, 432000);
        assert_eq!(n.recent_blockhash, "Hash111");
    }

    #[test]
    fn unreachable_endpoint_is_unhealthy() {
        let cfg = LedgerConfig {
            enabled: true,
            rpc_url: "http://127.0.0.1:9".to_string(),
            program_id: addr("Prog"),
            timeout_ms: 500,
        };
        let ledger = RpcLedger::new(&cfg).expect("client");
        assert!(!ledger.health_check().healthy);
        assert_eq!(ledger.get_balance(&addr("Tea")).expect_err("down").code(), "not_available");
    }
}
