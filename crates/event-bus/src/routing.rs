//! Subject naming for the broker transport.
//!
//! ```text
//! routing key     {prefix}.{aggregate_type}.{event_type}
//! consumer filter {prefix}.*.{event_type}
//! durable name    {prefix}-{event_type}
//! dead letter     {prefix}.dead_letter.{aggregate_type}.{event_type}
//! ```
//!
//! Dead-lettered messages stay inside the `{prefix}.>` stream but carry one
//! extra token, so no consumer filter ever matches them.

const DEAD_LETTER_TOKEN: &str = "dead_letter";

/// Makes `raw` usable as a single subject token.
///
/// NATS splits subjects on `.` and treats `*` and `>` as wildcards; those and
/// whitespace become `_`.
pub fn token(raw: &str) -> String {
    raw.chars()
        .map(|c| match c {
            '.' | '*' | '>' => '_',
            c if c.is_whitespace() => '_',
            c => c,
        })
        .collect()
}

pub fn routing_key(prefix: &str, aggregate_type: &str, event_type: &str) -> String {
    format!("{prefix}.{}.{}", token(aggregate_type), token(event_type))
}

/// Matches one event type across every aggregate type.
pub fn subscription_filter(prefix: &str, event_type: &str) -> String {
    format!("{prefix}.*.{}", token(event_type))
}

/// Durable consumer name. Consumer names may not contain `.`.
pub fn durable_name(prefix: &str, event_type: &str) -> String {
    format!("{}-{}", token(prefix), token(event_type))
}

pub fn dead_letter_subject(prefix: &str, aggregate_type: &str, event_type: &str) -> String {
    format!(
        "{prefix}.{DEAD_LETTER_TOKEN}.{}.{}",
        token(aggregate_type),
        token(event_type)
    )
}

/// Dead-letter subject for a message that arrived on `subject`.
///
/// Falls back to `{prefix}.dead_letter.unknown` when `subject` is not a
/// routing key under `prefix`.
pub fn dead_letter_for(prefix: &str, subject: &str) -> String {
    subject
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('.'))
        .map(|rest| format!("{prefix}.{DEAD_LETTER_TOKEN}.{rest}"))
        .unwrap_or_else(|| format!("{prefix}.{DEAD_LETTER_TOKEN}.unknown"))
}
