//! `casys-pml-sandbox-worker`: the zero-ambient-permission subprocess
//! spawned by [`casys_pml::infrastructure::sandbox::host::SandboxHost`]
//! (`spec.md` §4.5).
//!
//! This process has no file, network, environment, or subprocess access
//! of its own. Its only I/O is the newline-delimited JSON bridge on its
//! own stdin/stdout, framed exactly as `SandboxHost` expects
//! (`domain::models::rpc`). Everything the sandboxed code does that
//! looks like an effect — calling a tool, emitting a trace event, or
//! logging — crosses that bridge as a request the mediator answers (or
//! refuses); nothing is satisfied locally.
//!
//! Deliberately synchronous, not `#[tokio::main]`: every round-trip this
//! process performs is a blocking request/response over its own piped
//! stdio, and the WASM execution itself is CPU-bound, so there is no
//! concurrency to gain from an async runtime here — only two more crates
//! to trust. Grounded on the core-module Wasmtime setup in the pack's
//! `dashflow-wasm-executor::executor::WasmExecutor` (fuel metering,
//! `StoreLimits`, WASI context construction), generalized from that
//! executor's "inherit stdio for debugging" default to a WASI context
//! with nothing granted at all — this worker's own stdio is the bridge
//! channel, never the guest's.

use std::cell::RefCell;
use std::io::{self, BufRead, Write};
use std::rc::Rc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde_json::Value;
use uuid::Uuid;
use wasmtime::{Config, Engine, Instance, Linker, Memory, Module, Store, StoreLimits, StoreLimitsBuilder, TypedFunc};
use wasmtime_wasi::{WasiCtx, WasiCtxBuilder};

use casys_pml::domain::models::{MediatorFrame, TracePhase, WorkerFrame};

/// CPU budget per invocation; the spec's resource limits (`spec.md`
/// §4.5) name wall time, RPC fan-in, and output bytes, all enforced by
/// the mediator from outside this process. Fuel is this worker's own
/// defense in depth against a guest that spins without ever touching
/// the bridge, which the mediator's wall-clock timeout would also catch
/// but only after killing the whole process.
const DEFAULT_FUEL: u64 = 10_000_000;
const DEFAULT_MAX_MEMORY_BYTES: usize = 256 * 1024 * 1024;

fn main() {
    let outcome = run();
    let frame = match outcome {
        Ok((value, logs)) => WorkerFrame::Done { ok: true, value: Some(value), error: None, logs },
        Err(message) => WorkerFrame::Done { ok: false, value: None, error: Some(message), logs: Vec::new() },
    };
    write_frame(&frame);
}

fn run() -> Result<(Value, Vec<String>), String> {
    let setup = read_setup_frame()?;
    let MediatorFrame::Setup { capability_code_base64, arguments, available_tools, limits } = setup else {
        return Err("first frame on the bridge must be a setup frame".to_string());
    };

    let wasm_bytes = BASE64.decode(capability_code_base64.as_bytes()).map_err(|e| format!("invalid base64 capability code: {e}"))?;

    let mut config = Config::new();
    config.consume_fuel(true);
    // Matches the pack's WASM executor: no threads (no shared-memory
    // side channel out of the sandbox), no reference types (smaller,
    // better-understood attack surface), bulk memory left on since it's
    // safe and most compiled modules expect it.
    config.wasm_threads(false);
    config.wasm_reference_types(false);
    config.wasm_bulk_memory(true);

    let engine = Engine::new(&config).map_err(|e| format!("failed to create wasm engine: {e}"))?;
    let module = Module::new(&engine, &wasm_bytes).map_err(|e| format!("invalid wasm module: {e}"))?;

    let bridge = Rc::new(RefCell::new(Bridge {
        available_tools: available_tools.into_iter().collect(),
        fan_in: 0,
        max_fan_in: limits.max_rpc_fan_in,
        output_bytes: 0,
        max_output_bytes: limits.max_output_bytes,
        logs: Vec::new(),
        memory: None,
        alloc: None,
    }));

    let wasi = WasiCtxBuilder::new().build();
    let limiter = StoreLimitsBuilder::new().memory_size(DEFAULT_MAX_MEMORY_BYTES).instances(4).memories(4).tables(4).build();
    let mut store = Store::new(&engine, HostState { wasi, limits: limiter, bridge: bridge.clone() });
    store.limiter(|state| &mut state.limits);
    store.set_fuel(DEFAULT_FUEL).map_err(|e| format!("failed to set fuel: {e}"))?;

    let mut linker: Linker<HostState> = Linker::new(&engine);
    // No WASI imports are ever linked here: a guest that imports
    // `wasi_snapshot_preview1::path_open` or similar fails to resolve at
    // instantiation, never reaches a real file descriptor. The `WasiCtx`
    // above exists only so a future, deliberately-granted import has
    // something well-typed to read from — today nothing reads it.
    link_bridge_imports(&mut linker, bridge.clone()).map_err(|e| format!("failed to set up sandbox bridge: {e}"))?;

    let instance = linker.instantiate(&mut store, &module).map_err(|e| format!("failed to instantiate wasm module: {e}"))?;
    bind_guest_abi(&instance, &mut store, &bridge)?;

    let args_json = serde_json::to_vec(&arguments).map_err(|e| e.to_string())?;
    let (args_ptr, args_len) = write_guest_bytes(&mut store, &bridge, &args_json)?;

    let run_fn: TypedFunc<(i32, i32), i64> =
        instance.get_typed_func(&mut store, "run").map_err(|_| "guest module does not export \"run\"".to_string())?;

    let packed = run_fn.call(&mut store, (args_ptr, args_len)).map_err(|e| classify_trap(&e))?;
    let (result_ptr, result_len) = unpack(packed);
    let result_bytes = read_guest_bytes(&store, result_ptr, result_len)?;

    let envelope: GuestEnvelope = serde_json::from_slice(&result_bytes).map_err(|e| format!("guest result was not valid JSON: {e}"))?;
    let logs = bridge.borrow().logs.clone();

    if envelope.ok {
        Ok((envelope.value.unwrap_or(Value::Null), logs))
    } else {
        Err(envelope.error.unwrap_or_else(|| "guest reported failure with no error message".to_string()))
    }
}

#[derive(Debug, serde::Deserialize)]
struct GuestEnvelope {
    ok: bool,
    #[serde(default)]
    value: Option<Value>,
    #[serde(default)]
    error: Option<String>,
}

/// Turns a Wasmtime trap into the one `spec.md` §7 kind it most plausibly
/// corresponds to, so the mediator's `SandboxHost` (which wraps this
/// process's whole run in its own wall-clock timeout) gets a meaningful
/// message either way.
fn classify_trap(err: &wasmtime::Error) -> String {
    let message = err.to_string();
    if message.contains("fuel") {
        "sandbox exceeded its CPU budget".to_string()
    } else if message.contains("memory") || message.contains("limit") {
        "sandbox exceeded its memory budget".to_string()
    } else if message.contains("rpc fan-in") {
        message
    } else {
        format!("guest trapped: {message}")
    }
}

/// Shared state the host-imported bridge functions close over. Held
/// behind `Rc<RefCell<_>>` rather than threaded through `Store` data
/// directly so [`bind_guest_abi`] can stash the instance's `memory` and
/// `alloc` export into it after instantiation, for the host functions
/// (already linked before instantiation exists) to use on every call.
struct Bridge {
    available_tools: std::collections::HashSet<String>,
    fan_in: u32,
    max_fan_in: u32,
    output_bytes: usize,
    max_output_bytes: usize,
    logs: Vec<String>,
    memory: Option<Memory>,
    alloc: Option<TypedFunc<i32, i32>>,
}

struct HostState {
    wasi: WasiCtx,
    limits: StoreLimits,
    bridge: Rc<RefCell<Bridge>>,
}

fn pack(ptr: i32, len: i32) -> i64 {
    (i64::from(ptr) << 32) | i64::from(len as u32)
}

fn unpack(packed: i64) -> (i32, i32) {
    ((packed >> 32) as i32, packed as i32)
}

/// Reads back `memory` and `alloc` after instantiation, so the host
/// functions linked beforehand have somewhere to write guest-visible
/// bytes.
fn bind_guest_abi(instance: &Instance, store: &mut Store<HostState>, bridge: &Rc<RefCell<Bridge>>) -> Result<(), String> {
    let memory = instance.get_memory(&mut *store, "memory").ok_or("guest module does not export \"memory\"")?;
    let alloc = instance
        .get_typed_func::<i32, i32>(&mut *store, "alloc")
        .map_err(|_| "guest module does not export \"alloc\"".to_string())?;
    let mut bridge_mut = bridge.borrow_mut();
    bridge_mut.memory = Some(memory);
    bridge_mut.alloc = Some(alloc);
    Ok(())
}

fn write_guest_bytes(
    store: &mut Store<HostState>,
    bridge: &Rc<RefCell<Bridge>>,
    bytes: &[u8],
) -> Result<(i32, i32), String> {
    let (memory, alloc) = {
        let bridge_ref = bridge.borrow();
        (bridge_ref.memory.expect("bound before use"), bridge_ref.alloc.expect("bound before use"))
    };
    let ptr = alloc.call(&mut *store, bytes.len() as i32).map_err(|e| format!("guest alloc failed: {e}"))?;
    memory.write(&mut *store, ptr as usize, bytes).map_err(|e| format!("failed writing into guest memory: {e}"))?;
    Ok((ptr, bytes.len() as i32))
}

fn read_guest_bytes(store: &Store<HostState>, ptr: i32, len: i32) -> Result<Vec<u8>, String> {
    let memory = store.data().bridge.borrow().memory.expect("bound before use");
    let mut buf = vec![0u8; len.max(0) as usize];
    memory.read(store, ptr as usize, &mut buf).map_err(|e| format!("failed reading guest memory: {e}"))?;
    Ok(buf)
}

/// Links the two host imports a capability's compiled code calls across
/// the module boundary: `casys::invoke` (the only way it ever reaches a
/// tool) and `casys::trace` (observability only, never load-bearing).
/// Both close over the same [`Bridge`] the top-level run populates with
/// `memory`/`alloc` right after instantiation.
fn link_bridge_imports(linker: &mut Linker<HostState>, bridge: Rc<RefCell<Bridge>>) -> Result<(), wasmtime::Error> {
    let invoke_bridge = bridge.clone();
    linker.func_wrap(
        "casys",
        "invoke",
        move |mut caller: wasmtime::Caller<'_, HostState>, req_ptr: i32, req_len: i32| -> Result<i64, wasmtime::Error> {
            let (memory, alloc) = {
                let b = invoke_bridge.borrow();
                (b.memory.expect("bound before use"), b.alloc.expect("bound before use"))
            };
            let mut request_bytes = vec![0u8; req_len.max(0) as usize];
            memory.read(&mut caller, req_ptr as usize, &mut request_bytes)?;

            {
                let mut b = invoke_bridge.borrow_mut();
                b.fan_in += 1;
                if b.fan_in > b.max_fan_in {
                    return Err(wasmtime::Error::msg("rpc fan-in limit exceeded"));
                }
            }

            let request: InvokeRequest = serde_json::from_slice(&request_bytes).map_err(wasmtime::Error::new)?;
            if !invoke_bridge.borrow().available_tools.contains(&request.tool_id) {
                let response = serde_json::to_vec(&InvokeResponse {
                    ok: false,
                    value: None,
                    error: Some(format!("tool {} is not exposed to this invocation", request.tool_id)),
                })
                .map_err(wasmtime::Error::new)?;
                let ptr = alloc.call(&mut caller, response.len() as i32)?;
                memory.write(&mut caller, ptr as usize, &response)?;
                return Ok(pack(ptr, response.len() as i32));
            }

            let request_id = Uuid::new_v4();
            write_frame(&WorkerFrame::Trace {
                phase: TracePhase::ToolStart,
                tool_id: request.tool_id.clone(),
                timestamp: chrono::Utc::now(),
                digest: digest_of(&request.arguments),
            });
            write_frame(&WorkerFrame::Invoke { request_id, tool_id: request.tool_id.clone(), arguments: request.arguments });

            let reply = read_result_frame(request_id)?;
            write_frame(&WorkerFrame::Trace {
                phase: TracePhase::ToolEnd,
                tool_id: request.tool_id.clone(),
                timestamp: chrono::Utc::now(),
                digest: reply.value.as_ref().map(digest_of).unwrap_or_default(),
            });

            let response_bytes = serde_json::to_vec(&InvokeResponse { ok: reply.ok, value: reply.value, error: reply.error })
                .map_err(wasmtime::Error::new)?;

            {
                let mut b = invoke_bridge.borrow_mut();
                b.output_bytes += response_bytes.len();
                if b.output_bytes > b.max_output_bytes {
                    return Err(wasmtime::Error::msg("sandbox output byte limit exceeded"));
                }
            }

            let ptr = alloc.call(&mut caller, response_bytes.len() as i32)?;
            memory.write(&mut caller, ptr as usize, &response_bytes)?;
            Ok(pack(ptr, response_bytes.len() as i32))
        },
    )?;

    let log_bridge = bridge;
    linker.func_wrap(
        "casys",
        "log",
        move |mut caller: wasmtime::Caller<'_, HostState>, msg_ptr: i32, msg_len: i32| -> Result<(), wasmtime::Error> {
            let memory = {
                let b = log_bridge.borrow();
                b.memory.expect("bound before use")
            };
            let mut buf = vec![0u8; msg_len.max(0) as usize];
            memory.read(&mut caller, msg_ptr as usize, &mut buf)?;
            let message = String::from_utf8_lossy(&buf).into_owned();
            log_bridge.borrow_mut().logs.push(message);
            Ok(())
        },
    )?;

    Ok(())
}

#[derive(Debug, serde::Deserialize)]
struct InvokeRequest {
    tool_id: String,
    arguments: Value,
}

#[derive(Debug, serde::Serialize)]
struct InvokeResponse {
    ok: bool,
    value: Option<Value>,
    error: Option<String>,
}

fn digest_of(value: &Value) -> String {
    use sha2::{Digest, Sha256};
    let bytes = serde_json::to_vec(value).unwrap_or_default();
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    format!("{:x}", hasher.finalize())[..16].to_string()
}

/// Blocks on this process's own stdin until the mediator answers the
/// `invoke` request this function just sent, matching the request id.
/// A `trace` frame from a prior call (there are none at this point since
/// every call is synchronous from the guest's perspective) would never
/// appear here; only `result` frames are expected on this side of the
/// bridge.
fn read_result_frame(request_id: Uuid) -> Result<ResultReply, wasmtime::Error> {
    loop {
        let line = read_line()?;
        let frame: MediatorFrame = serde_json::from_str(&line).map_err(wasmtime::Error::new)?;
        match frame {
            MediatorFrame::Result { request_id: reply_id, ok, value, error } if reply_id == request_id => {
                return Ok(ResultReply { ok, value, error });
            }
            MediatorFrame::Result { .. } => continue,
            MediatorFrame::Setup { .. } => {
                return Err(wasmtime::Error::msg("received an unexpected second setup frame"));
            }
        }
    }
}

struct ResultReply {
    ok: bool,
    value: Option<Value>,
    error: Option<String>,
}

fn read_setup_frame() -> Result<MediatorFrame, String> {
    let line = read_line().map_err(|e| e.to_string())?;
    serde_json::from_str(&line).map_err(|e| format!("failed to parse setup frame: {e}"))
}

fn read_line() -> Result<String, wasmtime::Error> {
    let mut line = String::new();
    let stdin = io::stdin();
    let mut handle = stdin.lock();
    loop {
        line.clear();
        let bytes_read = handle.read_line(&mut line).map_err(wasmtime::Error::new)?;
        if bytes_read == 0 {
            return Err(wasmtime::Error::msg("mediator closed the bridge"));
        }
        if !line.trim().is_empty() {
            return Ok(line);
        }
    }
}

fn write_frame(frame: &WorkerFrame) {
    let Ok(mut encoded) = serde_json::to_vec(frame) else { return };
    encoded.push(b'\n');
    let stdout = io::stdout();
    let mut handle = stdout.lock();
    let _ = handle.write_all(&encoded);
    let _ = handle.flush();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_and_unpack_round_trip() {
        let packed = pack(1234, 56);
        assert_eq!(unpack(packed), (1234, 56));
    }

    #[test]
    fn pack_handles_large_offsets() {
        let packed = pack(i32::MAX, 1);
        assert_eq!(unpack(packed), (i32::MAX, 1));
    }

    #[test]
    fn classify_trap_recognizes_fuel_exhaustion() {
        let err = wasmtime::Error::msg("all fuel consumed by WebAssembly");
        assert_eq!(classify_trap(&err), "sandbox exceeded its CPU budget");
    }

    #[test]
    fn classify_trap_falls_back_to_generic_message() {
        let err = wasmtime::Error::msg("unreachable executed");
        assert!(classify_trap(&err).contains("unreachable executed"));
    }
}
