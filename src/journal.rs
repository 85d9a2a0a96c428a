//! Best-effort audit journal.
//!
//! Server-side steps go to the journal daemon over its unix socket
//! (`JOURNAL_SOCK`); lone-mode steps go through the `JOURNAL_BINARY`
//! subprocess fed a length-prefixed JSON message. A failed write is logged
//! critical and dropped; journaling never fails a request.

use crate::config::FamilyConfig;
use crate::request::Request;
use crate::services::unixhttp;
use crate::util::{gmt_time, hostname};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::Write;
use std::path::Path;
use tracing::{debug, error, info};

/// Journal step of the per-request state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    Begin,
    Auth,
    AuthObo,
    Commit,
    Abort,
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Step::Begin => write!(f, "begin"),
            Step::Auth => write!(f, "auth"),
            Step::AuthObo => write!(f, "authobo"),
            Step::Commit => write!(f, "commit"),
            Step::Abort => write!(f, "abort"),
        }
    }
}

/// One journal message; written at most once per `(rqid, step)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    pub authuser_id: String,
    pub user_id: String,
    pub role: Option<String>,
    pub request_id: String,
    pub transaction_id: String,
    pub step: Step,
    pub host: String,
    pub lonefam: String,
    pub lone: String,
    pub verb: String,
    pub lonepk: Option<String>,
    pub payload: Value,
    pub date: String,
    pub cm: Option<String>,
}

/// Build the journal message for one state transition.
pub fn entry_for(req: &Request, config: &FamilyConfig, step: Step, payload: Value) -> JournalEntry {
    JournalEntry {
        authuser_id: req.user.clone(),
        user_id: req.effective_user.clone(),
        role: req.role.clone(),
        request_id: req.rqid.clone(),
        transaction_id: req.txid.clone(),
        step,
        host: hostname(),
        lonefam: config.lonefam(),
        lone: format!("{}/{}", config.family, req.lone),
        verb: req.verb.clone(),
        lonepk: req.pk.clone(),
        payload,
        date: gmt_time(),
        cm: req.cm.clone(),
    }
}

/// Post one entry to the journal daemon. Best-effort: all failures are
/// logged critical and swallowed.
pub fn write(entry: &JournalEntry) {
    let Ok(sock) = std::env::var("JOURNAL_SOCK") else {
        return;
    };
    let msg = match serde_json::to_value(entry) {
        Ok(m) => m,
        Err(e) => {
            error!(error = %e, "journal entry does not serialize");
            return;
        }
    };
    let path = format!("/{}/{}", entry.request_id, entry.step);
    info!(
        transaction_id = %entry.transaction_id,
        request_id = %entry.request_id,
        step = %entry.step,
        "journal write"
    );
    match unixhttp::post_json(Path::new(&sock), &path, &msg) {
        Ok((status, _)) => {
            debug!(
                transaction_id = %entry.transaction_id,
                status = status,
                "journal reply"
            );
        }
        Err(e) => {
            error!(
                transaction_id = %entry.transaction_id,
                request_id = %entry.request_id,
                step = %entry.step,
                error = %e,
                "Unsaved journal entry"
            );
        }
    }
}

/// Write one entry through the local journal binary (lone mode).
pub fn local_write(config: &FamilyConfig, entry: &JournalEntry) {
    let binary = std::env::var("JOURNAL_BINARY").ok();
    let (Some(binary), Some(primary), Some(secondary), Some(adminproid)) = (
        binary,
        config.primary_journal(),
        config.secondary_journal(),
        config.remoteid(),
    ) else {
        error!(
            request_id = %entry.request_id,
            step = %entry.step,
            "Unsaved journal entry"
        );
        return;
    };
    let payload = match serde_json::to_vec(entry) {
        Ok(p) => p,
        Err(e) => {
            error!(error = %e, "journal entry does not serialize");
            return;
        }
    };
    let mut framed = Vec::with_capacity(payload.len() + 4);
    framed.extend_from_slice(&(payload.len() as u32).to_be_bytes());
    framed.extend_from_slice(&payload);

    let result = std::process::Command::new(&binary)
        .args(["--primary", primary, "--secondary", secondary])
        .args(["--adminproid", adminproid])
        .stdin(std::process::Stdio::piped())
        .stdout(std::process::Stdio::null())
        .spawn()
        .and_then(|mut child| {
            if let Some(stdin) = child.stdin.as_mut() {
                stdin.write_all(&framed)?;
            }
            child.wait()
        });
    match result {
        Ok(status) if status.success() => {}
        Ok(_) | Err(_) => {
            error!(
                transaction_id = %entry.transaction_id,
                request_id = %entry.request_id,
                step = %entry.step,
                "Unsaved journal entry"
            );
        }
    }
}

/// Read a long-running request's status back from the journal.
///
/// 102 means the task is still in progress; anything else carries the
/// stored status payload.
pub fn get_status(rqid: &str) -> anyhow::Result<(Value, u16)> {
    let sock = std::env::var("JOURNAL_SOCK")
        .map_err(|_| anyhow::anyhow!("JOURNAL_SOCK is not configured"))?;
    let (status, body) = unixhttp::get_json(Path::new(&sock), &format!("/{rqid}"))?;
    debug!(rqid = %rqid, status = status, "journal status reply");
    if status == 102 {
        return Ok((Value::String("Task in progress".to_string()), status));
    }
    let resp = body.get("status").cloned().unwrap_or(body);
    Ok((resp, status))
}
