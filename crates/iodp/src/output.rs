use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

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
struct ReadOutput<'a> {
    addr: u16,
    requested: u16,
    len: usize,
    clamped: bool,
    data_hex: String,
    data: &'a str,
}

pub fn print_read(addr: u16, requested: u16, data: &[u8], format: OutputFormat) {
    let preview = payload_preview(data);
    match format {
        OutputFormat::Json => print_json(&ReadOutput {
            addr,
            requested,
            len: data.len(),
            clamped: data.len() < usize::from(requested),
            data_hex: hex(data),
            data: &preview,
        }),
        OutputFormat::Table => print_table(
            vec!["ADDR", "LEN", "HEX", "DATA"],
            vec![vec![
                format!("{addr:#06x}"),
                data.len().to_string(),
                hex(data),
                preview,
            ]],
        ),
        OutputFormat::Pretty => println!(
            "addr={addr:#06x} len={} (requested {requested}) hex={} data={preview}",
            data.len(),
            hex(data)
        ),
        OutputFormat::Raw => print_raw(data),
    }
}

#[derive(Serialize)]
struct CallOutput<'a> {
    code: u16,
    ret_len: usize,
    ret_hex: String,
    ret: &'a str,
}

pub fn print_call(code: u16, ret: &[u8], format: OutputFormat) {
    let preview = payload_preview(ret);
    match format {
        OutputFormat::Json => print_json(&CallOutput {
            code,
            ret_len: ret.len(),
            ret_hex: hex(ret),
            ret: &preview,
        }),
        OutputFormat::Table => print_table(
            vec!["CODE", "LEN", "HEX", "RET"],
            vec![vec![
                format!("{code:#06x}"),
                ret.len().to_string(),
                hex(ret),
                preview,
            ]],
        ),
        OutputFormat::Pretty => println!(
            "code={code:#06x} len={} hex={} ret={preview}",
            ret.len(),
            hex(ret)
        ),
        OutputFormat::Raw => print_raw(ret),
    }
}

#[derive(Serialize)]
struct FunctionOutput {
    code: u16,
    name: &'static str,
    description: &'static str,
}

/// Print a function table given as `(code, name, description)` rows.
pub fn print_functions(functions: &[(u16, &'static str, &'static str)], format: OutputFormat) {
    match format {
        OutputFormat::Json => {
            let rows: Vec<FunctionOutput> = functions
                .iter()
                .map(|&(code, name, description)| FunctionOutput {
                    code,
                    name,
                    description,
                })
                .collect();
            print_json(&rows);
        }
        OutputFormat::Table => print_table(
            vec!["CODE", "NAME", "DESCRIPTION"],
            functions
                .iter()
                .map(|(code, name, description)| {
                    vec![format!("{code:#06x}"), name.to_string(), description.to_string()]
                })
                .collect(),
        ),
        OutputFormat::Pretty | OutputFormat::Raw => {
            for (code, name, _) in functions {
                println!("{code:#06x} {name}");
            }
        }
    }
}

#[derive(Serialize)]
pub struct LoopbackReport {
    pub transport: &'static str,
    pub calls: usize,
    pub mismatches: usize,
    pub failures: usize,
    pub elapsed_ms: u128,
    pub calls_per_sec: f64,
}

pub fn print_loopback(report: &LoopbackReport, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(report),
        OutputFormat::Table => print_table(
            vec!["TRANSPORT", "CALLS", "MISMATCHES", "FAILURES", "ELAPSED", "CALLS/S"],
            vec![vec![
                report.transport.to_string(),
                report.calls.to_string(),
                report.mismatches.to_string(),
                report.failures.to_string(),
                format!("{}ms", report.elapsed_ms),
                format!("{:.1}", report.calls_per_sec),
            ]],
        ),
        OutputFormat::Pretty | OutputFormat::Raw => println!(
            "transport={} calls={} mismatches={} failures={} elapsed={}ms rate={:.1}/s",
            report.transport,
            report.calls,
            report.mismatches,
            report.failures,
            report.elapsed_ms,
            report.calls_per_sec
        ),
    }
}

pub fn print_raw(data: &[u8]) {
    let mut out = std::io::stdout();
    let _ = out.write_all(data);
    let _ = out.flush();
}

fn print_json<T: Serialize + ?Sized>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn print_table(header: Vec<&str>, rows: Vec<Vec<String>>) {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    for row in rows {
        table.add_row(row);
    }
    println!("{table}");
}

pub fn hex(data: &[u8]) -> String {
    data.iter().map(|b| format!("{b:02x}")).collect()
}

fn payload_preview(payload: &[u8]) -> String {
    match std::str::from_utf8(payload) {
        Ok(text) if !text.chars().any(char::is_control) => text.to_string(),
        _ => format!("<binary {} bytes>", payload.len()),
    }
}
