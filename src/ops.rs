//! Host ops backing the script globals (console, crypto, base64) and the
//! extension that installs them.

use anyhow::{anyhow, Error};
use deno_core::{op2, OpState};

// ============================================================================
// Console Output Capture
// ============================================================================

/// Console output captured during one script call
#[derive(Debug, Default, Clone)]
pub struct ConsoleOutput {
    pub logs: Vec<String>,
    pub warns: Vec<String>,
    pub errors: Vec<String>,
}

impl ConsoleOutput {
    /// Forward captured lines to the log
    pub fn emit(&self) {
        for line in &self.logs {
            tracing::info!(target: "ssr_bridge::console", "{}", line);
        }
        for line in &self.warns {
            tracing::warn!(target: "ssr_bridge::console", "{}", line);
        }
        for line in &self.errors {
            tracing::error!(target: "ssr_bridge::console", "{}", line);
        }
    }
}

#[op2(fast)]
pub fn op_console_log(state: &mut OpState, #[string] msg: &str) {
    if let Some(output) = state.try_borrow_mut::<ConsoleOutput>() {
        output.logs.push(msg.to_string());
    }
}

#[op2(fast)]
pub fn op_console_warn(state: &mut OpState, #[string] msg: &str) {
    if let Some(output) = state.try_borrow_mut::<ConsoleOutput>() {
        output.warns.push(msg.to_string());
    }
}

#[op2(fast)]
pub fn op_console_error(state: &mut OpState, #[string] msg: &str) {
    if let Some(output) = state.try_borrow_mut::<ConsoleOutput>() {
        output.errors.push(msg.to_string());
    }
}

// ============================================================================
// Crypto Ops
// ============================================================================

#[op2]
#[string]
pub fn op_crypto_random_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[op2(fast)]
pub fn op_crypto_get_random_values(#[buffer] buf: &mut [u8]) {
    use rand::RngCore;
    rand::thread_rng().fill_bytes(buf);
}

#[op2]
#[buffer]
pub fn op_crypto_subtle_digest(
    #[string] algorithm: &str,
    #[buffer] data: &[u8],
) -> Result<Vec<u8>, Error> {
    digest(algorithm, data)
}

fn digest(algorithm: &str, data: &[u8]) -> Result<Vec<u8>, Error> {
    use sha2::{Digest, Sha256, Sha384, Sha512};

    match algorithm.to_uppercase().replace('-', "").as_str() {
        "SHA256" => Ok(Sha256::digest(data).to_vec()),
        "SHA384" => Ok(Sha384::digest(data).to_vec()),
        "SHA512" => Ok(Sha512::digest(data).to_vec()),
        _ => Err(anyhow!(
            "Unsupported algorithm: {}. Supported: SHA-256, SHA-384, SHA-512",
            algorithm
        )),
    }
}

// ============================================================================
// Encoding Ops
// ============================================================================

#[op2]
#[string]
pub fn op_btoa(#[string] data: &str) -> String {
    use base64::Engine;
    // btoa expects Latin-1; UTF-8 input is encoded as-is
    base64::engine::general_purpose::STANDARD.encode(data.as_bytes())
}

#[op2]
#[string]
pub fn op_atob(#[string] data: &str) -> Result<String, Error> {
    use base64::Engine;
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data.trim())
        .map_err(|e| anyhow!("Invalid base64: {}", e))?;
    String::from_utf8(bytes).map_err(|e| anyhow!("Invalid UTF-8 in decoded data: {}", e))
}

// ============================================================================
// Extension Definition
// ============================================================================

deno_core::extension!(
    ssr_bridge_runtime,
    ops = [
        op_console_log,
        op_console_warn,
        op_console_error,
        op_crypto_random_uuid,
        op_crypto_get_random_values,
        op_crypto_subtle_digest,
        op_btoa,
        op_atob,
    ],
    esm_entry_point = "ext:ssr_bridge_runtime/bootstrap.js",
    esm = ["ext:ssr_bridge_runtime/bootstrap.js" = "src/bootstrap.js"],
);
