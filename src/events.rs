//! EventEmitter (§4.4): writes line-delimited, tag-prefixed events to a
//! sink. Grounded on the teacher's JTAG line-protocol workers
//! (`logger`/`archive`: a single `writeln!`/`println!` per message,
//! JSON envelopes built with `serde_json::to_string`) — the line shape
//! here is a tagged text line rather than a full JSON envelope, per
//! §4.4's `<TAG>: <payload>` contract.

use serde::Serialize;
use serde_json::Value;

const MAX_FREE_TEXT_LEN: usize = 100;
const MAX_JSON_PAYLOAD_BYTES: usize = 100 * 1024;

/// The sink capability (§9 "Polymorphism" — one method, fakeable in tests).
pub trait Sink: Send + Sync {
    fn emit_line(&self, line: &str);
}

/// Default sink: standard output, one line per event, consumed by a
/// parent process (§4.4).
pub struct StdoutSink;

impl Sink for StdoutSink {
    fn emit_line(&self, line: &str) {
        println!("{line}");
    }
}

pub struct EventEmitter<S: Sink> {
    sink: S,
}

impl<S: Sink> EventEmitter<S> {
    pub fn new(sink: S) -> Self {
        Self { sink }
    }

    /// Exposes the underlying sink so other modules' tests can inspect
    /// emitted lines without reaching into a private field.
    #[cfg(test)]
    pub fn sink(&self) -> &S {
        &self.sink
    }

    fn emit(&self, tag: &str, payload: &str) {
        self.sink.emit_line(&format!("{tag}: {payload}"));
    }

    fn emit_json(&self, tag: &str, value: &Value) {
        match serde_json::to_string(value) {
            Ok(json) if json.len() <= MAX_JSON_PAYLOAD_BYTES => {
                self.emit(tag, &json);
            }
            _ => {
                self.emit(tag, r#"{"error": "Data too large"}"#);
            }
        }
    }

    pub fn progress(&self, processed: u64, total: u64) {
        let percent = if total == 0 {
            0.0
        } else {
            (processed as f64 / total as f64) * 100.0
        };
        self.emit(
            "PROGRESS",
            &format!("Processed {processed} / {total} ({percent:.1}%)"),
        );
    }

    pub fn status(&self, successful: u64, failed: u64, errors: u64) {
        self.emit(
            "STATUS",
            &format!("{successful} successful, {failed} failed, {errors} errors"),
        );
    }

    pub fn workers(&self, active: u64, worker_count: u64, queue_len: usize) {
        self.emit(
            "WORKERS",
            &format!("{active}/{worker_count} active, {queue_len} in queue"),
        );
    }

    pub fn speed(&self, per_second: f64, eta_secs: f64) {
        self.emit(
            "SPEED",
            &format!("{per_second:.2} per second, ETA: {eta_secs:.0}s"),
        );
    }

    #[allow(clippy::too_many_arguments)]
    pub fn speed_update(
        &self,
        speed: f64,
        processed: u64,
        total: u64,
        successful: u64,
        failed: u64,
        active_workers: u64,
        worker_count: u64,
        eta_secs: f64,
        timestamp: &str,
    ) {
        let value = serde_json::json!({
            "speed": speed,
            "unit": "per_second",
            "processed": processed,
            "total": total,
            "successful": successful,
            "failed": failed,
            "activeWorkers": active_workers,
            "workerCount": worker_count,
            "eta": eta_secs,
            "timestamp": timestamp,
        });
        self.emit_json("SPEED_UPDATE", &value);
    }

    pub fn worker_status_idle(&self, worker_id: usize) {
        self.emit("WORKER_STATUS", &format!("Worker {worker_id} is now idle"));
    }

    pub fn worker_status_working(&self, worker_id: usize, name: &str) {
        self.emit(
            "WORKER_STATUS",
            &format!(
                "Worker {worker_id} is now working on {}",
                sanitize_for_json(name)
            ),
        );
    }

    pub fn worker_status_error(&self, worker_id: usize) {
        self.emit("WORKER_STATUS", &format!("Worker {worker_id} is now error"));
    }

    pub fn dashboard_update(&self, value: Value) {
        self.emit_json("DASHBOARD_UPDATE", &value);
    }

    /// Truncates to at most 50 issues, with an explicit `truncatedCount`
    /// (§4.4).
    pub fn results_update(&self, issues: &[Value]) {
        let truncated_count = issues.len().saturating_sub(50);
        let shown: Vec<&Value> = issues.iter().take(50).collect();
        let value = serde_json::json!({
            "issues": shown,
            "truncatedCount": truncated_count,
        });
        self.emit_json("RESULTS_UPDATE", &value);
    }

    pub fn success(&self, name: &str, email: &str) {
        self.emit(
            "SUCCESS",
            &format!(
                "{} <{}>",
                sanitize_for_json(name),
                sanitize_for_json(email)
            ),
        );
    }

    pub fn error(&self, name: &str, email: &str, reason: &str) {
        self.emit(
            "ERROR",
            &format!(
                "{} <{}>: {}",
                sanitize_for_json(name),
                sanitize_for_json(email),
                sanitize_for_json(reason)
            ),
        );
    }

    pub fn final_stats(&self, processed: u64, successful: u64, failed: u64, seconds: f64, speed: f64) {
        self.emit(
            "FINAL_STATS",
            &format!(
                "Processed={processed}, Successful={successful}, Failed={failed}, Time={seconds:.0}s, Speed={speed:.2}/s"
            ),
        );
    }
}

/// Serialize and emit any `Serialize` value under an arbitrary tag,
/// applying the same size cap as the built-in JSON events.
impl<S: Sink> EventEmitter<S> {
    pub fn emit_serializable<T: Serialize>(&self, tag: &str, value: &T) {
        match serde_json::to_value(value) {
            Ok(v) => self.emit_json(tag, &v),
            Err(_) => self.emit(tag, r#"{"error": "Data too large"}"#),
        }
    }
}

/// Strip control characters, line/paragraph separators and zero-width
/// characters; escape quotes/backslashes; truncate to 100 chars (§4.4).
pub fn sanitize_for_json(input: &str) -> String {
    let cleaned: String = input
        .chars()
        .filter(|c| {
            !c.is_control()
                && *c != '\u{2028}' // line separator
                && *c != '\u{2029}' // paragraph separator
                && *c != '\u{200B}' // zero-width space
                && *c != '\u{200C}' // zero-width non-joiner
                && *c != '\u{200D}' // zero-width joiner
                && *c != '\u{FEFF}' // zero-width no-break space / BOM
        })
        .collect();

    let truncated: String = cleaned.chars().take(MAX_FREE_TEXT_LEN).collect();
    truncated.replace('\\', "\\\\").replace('"', "\\\"")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct CollectingSink {
        lines: Mutex<Vec<String>>,
    }

    impl CollectingSink {
        fn new() -> Self {
            Self {
                lines: Mutex::new(Vec::new()),
            }
        }
    }

    impl Sink for CollectingSink {
        fn emit_line(&self, line: &str) {
            self.lines.lock().unwrap().push(line.to_string());
        }
    }

    #[test]
    fn progress_line_is_well_formed() {
        let emitter = EventEmitter::new(CollectingSink::new());
        emitter.progress(5, 10);
        let lines = emitter.sink.lines.lock().unwrap();
        assert_eq!(lines[0], "PROGRESS: Processed 5 / 10 (50.0%)");
    }

    #[test]
    fn speed_update_emits_valid_json_within_cap() {
        let emitter = EventEmitter::new(CollectingSink::new());
        emitter.speed_update(1.5, 5, 10, 4, 1, 2, 4, 3.3, "2024-01-01T00:00:00Z");
        let lines = emitter.sink.lines.lock().unwrap();
        let (tag, payload) = lines[0].split_once(": ").unwrap();
        assert_eq!(tag, "SPEED_UPDATE");
        let parsed: Value = serde_json::from_str(payload).unwrap();
        assert_eq!(parsed["processed"], 5);
        assert!(payload.len() <= MAX_JSON_PAYLOAD_BYTES);
    }

    #[test]
    fn results_update_truncates_to_fifty() {
        let emitter = EventEmitter::new(CollectingSink::new());
        let issues: Vec<Value> = (0..60).map(|i| serde_json::json!({"i": i})).collect();
        emitter.results_update(&issues);
        let lines = emitter.sink.lines.lock().unwrap();
        let (_, payload) = lines[0].split_once(": ").unwrap();
        let parsed: Value = serde_json::from_str(payload).unwrap();
        assert_eq!(parsed["truncatedCount"], 10);
        assert_eq!(parsed["issues"].as_array().unwrap().len(), 50);
    }

    #[test]
    fn sanitize_strips_control_chars_and_truncates() {
        let input = format!("name\u{200B}\twith\ncontrol{}", "x".repeat(200));
        let sanitized = sanitize_for_json(&input);
        assert!(sanitized.chars().count() <= MAX_FREE_TEXT_LEN);
        assert!(!sanitized.contains('\u{200B}'));
        assert!(!sanitized.contains('\n'));
    }

    #[test]
    fn sanitize_escapes_quotes_and_backslashes() {
        let sanitized = sanitize_for_json(r#"say "hi" \ ok"#);
        assert!(sanitized.contains("\\\""));
        assert!(sanitized.contains("\\\\"));
    }
}
