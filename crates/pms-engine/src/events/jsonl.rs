use super::types::OrchestrationEventRecord;

pub fn encode_event_jsonl_line(record: &OrchestrationEventRecord) -> serde_json::Result<String> {
    let mut line = serde_json::to_string(record)?;
    line.push('\n');
    Ok(line)
}

pub fn parse_event_jsonl_line(line: &str) -> serde_json::Result<OrchestrationEventRecord> {
    serde_json::from_str::<OrchestrationEventRecord>(line.trim_end())
}

/// Parses a JSONL stream, skipping blank lines.
pub fn parse_event_jsonl(input: &str) -> serde_json::Result<Vec<OrchestrationEventRecord>> {
    input
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(parse_event_jsonl_line)
        .collect()
}
