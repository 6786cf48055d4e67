//! Host ops exposed to sandboxed code.
//!
//! The sandbox grants exactly two capabilities: a console primitive that
//! appends to an in-memory buffer, and outbound HTTP via a host-side reqwest
//! op. Everything else (filesystem, processes, host env, the `Deno`
//! namespace) is absent from the context.

use deno_core::{error::AnyError, op2, OpState};
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::rc::Rc;

use super::ConsoleLine;

// ─── Console capture ──────────────────────────────────────────────────────────

/// Ordered console buffer with a byte budget.
///
/// Once the budget is exhausted a single marker line is appended and all
/// further writes are dropped — truncation is reported, never silent.
pub struct ConsoleSink {
    lines: Vec<ConsoleLine>,
    bytes: usize,
    budget: usize,
    truncated: bool,
}

impl ConsoleSink {
    pub fn new(budget: usize) -> Self {
        Self {
            lines: Vec::new(),
            bytes: 0,
            budget,
            truncated: false,
        }
    }

    pub fn push(&mut self, msg: &str, is_err: bool) {
        if self.truncated {
            return;
        }
        if self.bytes + msg.len() > self.budget {
            self.truncated = true;
            self.lines.push(ConsoleLine {
                msg: "[console output truncated]".to_string(),
                is_err: true,
            });
            return;
        }
        self.bytes += msg.len();
        self.lines.push(ConsoleLine {
            msg: msg.to_string(),
            is_err,
        });
    }

    pub fn into_lines(self) -> Vec<ConsoleLine> {
        self.lines
    }
}

#[op2(fast)]
pub fn op_console_write(state: &mut OpState, #[string] msg: &str, is_err: bool) {
    state.borrow_mut::<ConsoleSink>().push(msg, is_err);
}

// ─── Outbound HTTP ────────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct FetchRequest {
    pub url: String,
    #[serde(default)]
    pub method: Option<String>,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub body: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct FetchResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
    pub body: String,
}

/// Perform an HTTP request on behalf of sandboxed code.
///
/// Only `http`/`https` URLs are reachable — the op is the sole network path
/// out of the isolate, so the scheme check here is the whole policy. The
/// isolate's shared client (and its connection pool) lives in `OpState`.
#[op2(async)]
#[serde]
pub async fn op_fetch(
    state: Rc<RefCell<OpState>>,
    #[serde] req: FetchRequest,
) -> Result<FetchResponse, AnyError> {
    let url: reqwest::Url = req.url.parse()?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return Err(anyhow::anyhow!("fetch: scheme `{}` is not allowed", url.scheme()));
    }

    let method: reqwest::Method = req
        .method
        .as_deref()
        .unwrap_or("GET")
        .parse()
        .map_err(|_| anyhow::anyhow!("fetch: invalid method"))?;

    let client = state.borrow().borrow::<reqwest::Client>().clone();
    let mut builder = client.request(method, url);
    for (name, value) in &req.headers {
        builder = builder.header(name, value);
    }
    if let Some(body) = req.body {
        builder = builder.body(body);
    }

    let response = builder.send().await?;
    let status = response.status();
    let headers = response
        .headers()
        .iter()
        .map(|(k, v)| (k.to_string(), String::from_utf8_lossy(v.as_bytes()).into_owned()))
        .collect();
    let body = response.text().await?;

    Ok(FetchResponse {
        status: status.as_u16(),
        status_text: status.canonical_reason().unwrap_or("").to_string(),
        headers,
        body,
    })
}

deno_core::extension!(
    ledgerd_sandbox,
    ops = [op_console_write, op_fetch],
    options = {
        sink: ConsoleSink,
        client: reqwest::Client,
    },
    state = |state, options| {
        state.put(options.sink);
        state.put(options.client);
    },
);

/// Wires `console` and `fetch` to the host ops, then removes the `Deno`
/// namespace so user code has no handle to the op layer itself.
pub const BOOTSTRAP_JS: &str = r#"
((core) => {
    const ops = core.ops;
    const fetchOp = ops.op_fetch;
    const consoleOp = ops.op_console_write;

    const fmt = (v) => {
        if (typeof v === "string") return v;
        if (v instanceof Error) return v.stack || String(v);
        try {
            const s = JSON.stringify(v);
            return s === undefined ? String(v) : s;
        } catch (_) {
            return String(v);
        }
    };
    const write = (isErr) => (...args) => consoleOp(args.map(fmt).join(" "), isErr);
    globalThis.console = {
        log: write(false),
        info: write(false),
        debug: write(false),
        warn: write(true),
        error: write(true),
    };

    globalThis.fetch = async (url, options = {}) => {
        const headers = [];
        if (options.headers) {
            const h = options.headers;
            if (typeof h.forEach === "function") {
                h.forEach((v, k) => headers.push([String(k), String(v)]));
            } else {
                for (const k of Object.keys(h)) headers.push([k, String(h[k])]);
            }
        }
        let body = options.body;
        if (body !== undefined && body !== null && typeof body !== "string") {
            body = JSON.stringify(body);
        }
        const resp = await fetchOp({
            url: String(url),
            method: options.method || "GET",
            headers,
            body: body ?? null,
        });
        const headerMap = new Map(resp.headers.map(([k, v]) => [k.toLowerCase(), v]));
        return {
            status: resp.status,
            statusText: resp.status_text,
            ok: resp.status >= 200 && resp.status < 300,
            headers: { get: (k) => headerMap.get(String(k).toLowerCase()) ?? null },
            text: async () => resp.body,
            json: async () => JSON.parse(resp.body),
        };
    };

    delete globalThis.Deno;
})(Deno.core);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn console_sink_preserves_order() {
        let mut sink = ConsoleSink::new(1024);
        sink.push("a", false);
        sink.push("b", true);
        let lines = sink.into_lines();
        assert_eq!(lines[0].msg, "a");
        assert!(!lines[0].is_err);
        assert_eq!(lines[1].msg, "b");
        assert!(lines[1].is_err);
    }

    #[test]
    fn console_sink_truncates_with_marker() {
        let mut sink = ConsoleSink::new(8);
        sink.push("12345", false);
        sink.push("67890", false); // over budget
        sink.push("late", false); // dropped entirely
        let lines = sink.into_lines();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].msg, "12345");
        assert_eq!(lines[1].msg, "[console output truncated]");
        assert!(lines[1].is_err);
    }
}
