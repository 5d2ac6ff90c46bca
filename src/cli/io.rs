//! JSON output for CLI commands
//!
//! Each command prints exactly one JSON object on stdout:
//!
//! ```text
//! {"status":"ok","data":{...}}
//! {"status":"error","code":"TIDE_CLI_...","cause":"TIDE_...","message":"..."}
//! ```

use std::io::{self, Write};

use serde_json::{json, Value};

use super::errors::{CliError, CliResult};

/// Print a success envelope around `data`.
pub fn write_response(data: Value) -> CliResult<()> {
    emit(&json!({ "status": "ok", "data": data }))
}

/// Print an error envelope; `cause` is omitted when there is none.
pub fn write_error(error: &CliError) -> CliResult<()> {
    let mut body = json!({
        "status": "error",
        "code": error.code_str(),
        "message": error.message(),
    });
    if let Some(cause) = error.cause() {
        body["cause"] = json!(cause);
    }
    emit(&body)
}

fn emit(value: &Value) -> CliResult<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    serde_json::to_writer(&mut out, value)?;
    out.write_all(b"\n")?;
    out.flush()?;
    Ok(())
}
