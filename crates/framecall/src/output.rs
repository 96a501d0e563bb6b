use std::io::{IsTerminal, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
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

/// Outcome of one call made by `framecall call`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CallReport<'a> {
    pub method: &'a str,
    pub call_id: Option<&'a str>,
    pub app_id: &'a str,
    pub handshake: String,
    /// `None` for fire-and-forget calls.
    pub result: Option<Value>,
    pub timestamp: String,
}

impl<'a> CallReport<'a> {
    pub fn new(method: &'a str, call_id: Option<&'a str>, app_id: &'a str) -> Self {
        Self {
            method,
            call_id,
            app_id,
            handshake: String::new(),
            result: None,
            timestamp: now_unix_seconds(),
        }
    }
}

/// One request answered by `framecall host`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ServedReport<'a> {
    pub method: &'a str,
    pub call_id: Option<&'a str>,
    pub app_id: &'a str,
    /// Error code of the reply; `None` when no reply was sent.
    pub code: Option<i64>,
    pub timestamp: String,
}

pub fn print_call(report: &CallReport<'_>, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(report),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["METHOD", "CALL ID", "HANDSHAKE", "RESULT"])
                .add_row(vec![
                    report.method.to_string(),
                    report.call_id.unwrap_or("-").to_string(),
                    report.handshake.clone(),
                    result_preview(report.result.as_ref()),
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!(
                "method={} call_id={} handshake={} result={}",
                report.method,
                report.call_id.unwrap_or("-"),
                report.handshake,
                result_preview(report.result.as_ref())
            );
        }
        OutputFormat::Raw => print_raw(result_preview(report.result.as_ref()).as_bytes()),
    }
}

pub fn print_served(report: &ServedReport<'_>, format: OutputFormat) {
    let code = report
        .code
        .map(|code| code.to_string())
        .unwrap_or_else(|| "-".to_string());
    match format {
        OutputFormat::Json => print_json(report),
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["METHOD", "CALL ID", "APP", "CODE"])
                .add_row(vec![
                    report.method.to_string(),
                    report.call_id.unwrap_or("-").to_string(),
                    report.app_id.to_string(),
                    code,
                ]);
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            println!(
                "method={} call_id={} app={} code={}",
                report.method,
                report.call_id.unwrap_or("-"),
                report.app_id,
                code
            );
        }
    }
}

/// Print a labelled set of string fields (used by `sign`).
pub fn print_fields(fields: &[(&str, String)], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let object: serde_json::Map<String, Value> = fields
                .iter()
                .map(|(key, value)| (key.to_string(), Value::String(value.clone())))
                .collect();
            print_json(&object);
        }
        OutputFormat::Table => {
            let mut table = Table::new();
            table
                .load_preset(UTF8_FULL)
                .set_content_arrangement(ContentArrangement::Dynamic)
                .set_header(vec!["FIELD", "VALUE"]);
            for (key, value) in fields {
                table.add_row(vec![key.to_string(), value.clone()]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for (key, value) in fields {
                println!("{key}: {value}");
            }
        }
        OutputFormat::Raw => {
            if let Some((_, value)) = fields.first() {
                print_raw(value.as_bytes());
                print_raw(b"\n");
            }
        }
    }
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn result_preview(result: Option<&Value>) -> String {
    match result {
        Some(value) => value.to_string(),
        None => "<no reply expected>".to_string(),
    }
}

pub fn now_unix_seconds() -> String {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs().to_string())
        .unwrap_or_else(|_| "0".to_string())
}
