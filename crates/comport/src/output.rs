use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use comport_frame::{timestamp_now, Envelope, FramePayload, Sequence};
use comport_gateway::QueryOutcome;
use serde::Serialize;
use serde_json::Value;

#[derive(Clone, Debug, Copy, ValueEnum)]
pub enum OutputFormat {
    Json,
    Table,
    Pretty,
    Raw,
}

impl OutputFormat {
    pub fn default_for_stdout() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Table
        } else {
            Self::Json
        }
    }
}

#[derive(Serialize)]
struct EnvelopeOutput<'a> {
    from: &'a str,
    to: &'a str,
    sequence: Option<Sequence>,
    kind: &'static str,
    msg: &'a Value,
    received_at: String,
}

#[derive(Serialize)]
struct OutcomeOutput<'a> {
    command: &'a str,
    success: bool,
    elapsed_ms: u128,
    sequence: Option<Sequence>,
    kind: &'static str,
    data: Option<&'a Value>,
    raw: Option<&'a str>,
}

/// Print one envelope seen on the bus.
pub fn print_envelope(envelope: &Envelope, format: OutputFormat) {
    let (sequence, kind) = describe(envelope);
    match format {
        OutputFormat::Json => {
            let out = EnvelopeOutput {
                from: &envelope.from,
                to: &envelope.to,
                sequence,
                kind,
                msg: &envelope.msg,
                received_at: timestamp_now(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FROM", "SEQ", "KIND", "DATA"])
                .add_row(vec![
                    envelope.from.clone(),
                    sequence_text(sequence.as_ref()),
                    kind.to_string(),
                    payload_preview(envelope),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "from={} seq={} kind={} data={}",
                envelope.from,
                sequence_text(sequence.as_ref()),
                kind,
                payload_preview(envelope)
            );
        }
        OutputFormat::Raw => {
            print_raw(format!("{}\n", envelope.msg).as_bytes());
        }
    }
}

/// Print the outcome of a query sent as `command`.
pub fn print_outcome(command: &str, outcome: &QueryOutcome, format: OutputFormat) {
    let (sequence, kind) = outcome
        .envelope
        .as_ref()
        .map(describe)
        .unwrap_or((None, "none"));
    match format {
        OutputFormat::Json => {
            let out = OutcomeOutput {
                command,
                success: outcome.success,
                elapsed_ms: outcome.elapsed.as_millis(),
                sequence,
                kind,
                data: outcome.envelope.as_ref().map(|env| &env.msg),
                raw: outcome.data.as_deref(),
            };
            println!(
                "{}",
                serde_json::to_string(&out).unwrap_or_else(|_| "{}".to_string())
            );
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["COMMAND", "RESULT", "SEQ", "ELAPSED", "DATA"])
                .add_row(vec![
                    command.to_string(),
                    result_text(outcome.success).to_string(),
                    sequence_text(sequence.as_ref()),
                    format!("{}ms", outcome.elapsed.as_millis()),
                    outcome_preview(outcome),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "command={} result={} seq={} elapsed={}ms data={}",
                command,
                result_text(outcome.success),
                sequence_text(sequence.as_ref()),
                outcome.elapsed.as_millis(),
                outcome_preview(outcome)
            );
        }
        OutputFormat::Raw => {
            if let Some(data) = &outcome.data {
                print_raw(format!("{data}\n").as_bytes());
            }
        }
    }
}

/// Print a bare device line.
pub fn print_line(command: &str, line: &str, format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let out = serde_json::json!({ "command": command, "line": line });
            println!("{out}");
        }
        OutputFormat::Table | OutputFormat::Pretty => println!("{command} -> {line}"),
        OutputFormat::Raw => print_raw(format!("{line}\n").as_bytes()),
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn describe(envelope: &Envelope) -> (Option<Sequence>, &'static str) {
    match envelope.frame() {
        Some(frame) => {
            let kind = match frame.payload {
                FramePayload::Data(_) => "data",
                FramePayload::DecodeError(_) => "decode_error",
                FramePayload::Missing => "malformed",
            };
            (frame.has_sequence().then_some(frame.sequence), kind)
        }
        None => (None, "message"),
    }
}

fn result_text(success: bool) -> &'static str {
    if success {
        "OK"
    } else {
        "TIMEOUT"
    }
}

fn sequence_text(sequence: Option<&Sequence>) -> String {
    sequence.map_or_else(|| "-".to_string(), |seq| seq.to_string())
}

fn payload_preview(envelope: &Envelope) -> String {
    match envelope.frame() {
        Some(frame) => frame
            .data_value()
            .map_or_else(|| frame.raw.clone(), Value::to_string),
        None => envelope.msg.to_string(),
    }
}

fn outcome_preview(outcome: &QueryOutcome) -> String {
    match (&outcome.envelope, &outcome.data) {
        (Some(envelope), _) => payload_preview(envelope),
        (None, Some(data)) => data.clone(),
        (None, None) => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use comport_frame::{DecodedFrame, ErrorDescriptor};
    use serde_json::json;

    use super::*;

    #[test]
    fn describes_frame_envelopes() {
        let frame = DecodedFrame::data("<4>{\"t\":1}</4>", Sequence::number(4), json!({"t": 1}));
        let envelope = Envelope::for_frame("h:/dev/x", &frame);
        assert_eq!(describe(&envelope), (Some(Sequence::number(4)), "data"));
        assert_eq!(payload_preview(&envelope), "{\"t\":1}");
    }

    #[test]
    fn describes_decode_errors_by_raw_line() {
        let error = ErrorDescriptor::new("h:/dev/x", "decode", "expected value");
        let frame = DecodedFrame::decode_error("<2>{oops</2>", Sequence::number(2), error);
        let envelope = Envelope::for_frame("h:/dev/x", &frame);
        assert_eq!(describe(&envelope), (Some(Sequence::number(2)), "decode_error"));
        assert_eq!(payload_preview(&envelope), "<2>{oops</2>");
    }

    #[test]
    fn plain_messages_are_not_frames() {
        let envelope = Envelope::new("monitor", json!("hello"));
        assert_eq!(describe(&envelope), (None, "message"));
        assert_eq!(sequence_text(None), "-");
    }
}
