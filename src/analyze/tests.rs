use super::*;
use std::io::Write as _;

fn write_jsonl(lines: &[String]) -> tempfile::NamedTempFile {
    let mut f = tempfile::NamedTempFile::new().unwrap();
    for line in lines {
        writeln!(f, "{line}").unwrap();
    }
    f.flush().unwrap();
    f
}

#[test]
fn prefers_api_reported_tokens() {
    let assistant = serde_json::json!({
        "type": "assistant",
        "message": {"usage": {"input_tokens": 30000, "cache_read_input_tokens": 10000}}
    });
    let user_text = "a".repeat(4000);
    let user = serde_json::json!({"type": "user", "message": {"content": user_text}});
    let src = write_jsonl(&[assistant.to_string(), user.to_string()]);
    let report = analyze(src.path()).unwrap();
    assert_eq!(report.estimated_tokens, 41000);
}

#[test]
fn falls_back_to_heuristic_without_usage() {
    let text = "b".repeat(400);
    let user = serde_json::json!({"type": "user", "message": {"content": text}});
    let src = write_jsonl(&[user.to_string()]);
    let report = analyze(src.path()).unwrap();
    assert_eq!(report.estimated_tokens, 400 / 4 + SYSTEM_OVERHEAD);
}

#[test]
fn bucket_bytes_sum_to_total() {
    let lines = vec![
        serde_json::json!({"type": "file-history-snapshot", "data": {}}).to_string(),
        serde_json::json!({
            "type": "assistant",
            "message": {"content": [
                {"type": "text", "text": "hi there"},
                {"type": "tool_use", "id": "t1", "name": "Read", "input": {"file_path": "a.rs"}}
            ]}
        })
        .to_string(),
    ];
    let src = write_jsonl(&lines);
    let report = analyze(src.path()).unwrap();
    let b = &report.breakdown;
    let sum = b.tool_results.bytes
        + b.thinking_signatures.bytes
        + b.file_history.bytes
        + b.conversation.bytes
        + b.tool_use_requests.bytes
        + b.other.bytes;
    assert_eq!(sum, report.total_bytes);
}

#[test]
fn compaction_marker_resets_and_excludes_prior_bytes() {
    let lines = vec![
        serde_json::json!({"type": "user", "message": {"content": "a".repeat(5000)}}).to_string(),
        serde_json::json!({"type": "summary", "summary": "earlier work"}).to_string(),
        serde_json::json!({"type": "user", "message": {"content": "after"}}).to_string(),
    ];
    let file_size: u64 = lines.iter().map(|l| l.len() as u64 + 1).sum();
    let src = write_jsonl(&lines);
    let report = analyze(src.path()).unwrap();
    assert!(report.total_bytes < file_size);
}

#[test]
fn malformed_line_is_bucketed_as_other() {
    let src = write_jsonl(&["not json".to_string()]);
    let report = analyze(src.path()).unwrap();
    assert_eq!(report.breakdown.other.count, 1);
    assert_eq!(report.total_bytes, "not json".len() as u64);
}
