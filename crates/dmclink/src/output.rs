use std::io::{IsTerminal, Write};

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use dmclink_controller::{
    ChannelSnapshot, CommandResponse, ControllerStatus, Execution, FrameEvent,
};
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
struct ResponseOutput<'a> {
    command: &'a str,
    lines: &'a [String],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExecutionOutput<'a> {
    subroutine: &'a str,
    matched: &'a str,
    captures: Vec<Option<&'a str>>,
    elapsed_ms: u128,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    transcript: Vec<&'a str>,
}

#[derive(Serialize)]
struct ArrayOutput<'a> {
    name: &'a str,
    values: &'a [f64],
}

fn print_json<T: Serialize>(value: &T) {
    println!(
        "{}",
        serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
    );
}

fn table(header: Vec<&str>) -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(header);
    table
}

pub fn print_response(response: &CommandResponse, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&ResponseOutput {
            command: &response.command,
            lines: &response.lines,
        }),
        OutputFormat::Table => {
            let mut table = table(vec!["COMMAND", "OUTPUT"]);
            table.add_row(vec![response.command.clone(), response.text()]);
            println!("{table}");
        }
        OutputFormat::Pretty => {
            println!("> {}", response.command);
            for line in &response.lines {
                println!("  {line}");
            }
        }
        OutputFormat::Raw => print_raw_lines(&response.lines),
    }
}

pub fn print_lines(header: &str, lines: &[String], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&lines),
        OutputFormat::Table => {
            let mut table = table(vec![header]);
            for line in lines {
                table.add_row(vec![line.clone()]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => print_raw_lines(lines),
    }
}

pub fn print_values(name: &str, values: &[f64], format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(&ArrayOutput { name, values }),
        OutputFormat::Table => {
            let mut table = table(vec!["INDEX", name]);
            for (index, value) in values.iter().enumerate() {
                table.add_row(vec![index.to_string(), value.to_string()]);
            }
            println!("{table}");
        }
        OutputFormat::Pretty => {
            for (index, value) in values.iter().enumerate() {
                println!("{name}[{index}] = {value}");
            }
        }
        OutputFormat::Raw => {
            let joined: Vec<String> = values.iter().map(f64::to_string).collect();
            println!("{}", joined.join(","));
        }
    }
}

pub fn print_execution(execution: &Execution, format: OutputFormat) {
    let transcript: Vec<&str> = execution
        .transcript
        .iter()
        .map(|frame| frame.text.as_str())
        .collect();
    match format {
        OutputFormat::Json => print_json(&ExecutionOutput {
            subroutine: &execution.subroutine,
            matched: &execution.matched.frame.text,
            captures: (0..execution.matched.captures.len())
                .map(|index| execution.matched.captures.get(index))
                .collect(),
            elapsed_ms: execution.elapsed.as_millis(),
            transcript,
        }),
        OutputFormat::Table => {
            let mut table = table(vec!["SUBROUTINE", "MATCHED", "ELAPSED"]);
            table.add_row(vec![
                execution.subroutine.clone(),
                execution.matched.frame.text.clone(),
                format!("{:?}", execution.elapsed),
            ]);
            println!("{table}");
            for line in transcript {
                println!("{line}");
            }
        }
        OutputFormat::Pretty => {
            for line in transcript {
                println!("  {line}");
            }
            println!(
                "#{} finished with '{}' after {:?}",
                execution.subroutine, execution.matched.frame.text, execution.elapsed
            );
        }
        OutputFormat::Raw => println!("{}", execution.matched.frame.text),
    }
}

pub fn print_message(frame: &FrameEvent, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(frame),
        OutputFormat::Table | OutputFormat::Pretty => {
            println!("[{}] {}", frame.timestamp, frame.text);
        }
        OutputFormat::Raw => println!("{}", frame.text),
    }
}

pub fn print_status(status: &ControllerStatus, format: OutputFormat) {
    match format {
        OutputFormat::Json => print_json(status),
        OutputFormat::Table => {
            let mut table = table(vec!["CHANNEL", "ENDPOINT", "STATUS", "RETRIES", "LAST FAILURE"]);
            for snapshot in [&status.commands, &status.messages] {
                table.add_row(snapshot_row(snapshot));
            }
            println!("{table}");
        }
        OutputFormat::Pretty | OutputFormat::Raw => {
            println!("status: {}", status.status);
            for snapshot in [&status.commands, &status.messages] {
                println!("{}", snapshot_row(snapshot).join(" "));
            }
        }
    }
}

fn snapshot_row(snapshot: &ChannelSnapshot) -> Vec<String> {
    vec![
        snapshot.channel.to_string(),
        snapshot
            .endpoint
            .as_ref()
            .map(ToString::to_string)
            .unwrap_or_else(|| "-".to_string()),
        snapshot.status.to_string(),
        snapshot.retry_count.to_string(),
        snapshot
            .last_failure
            .clone()
            .unwrap_or_else(|| "-".to_string()),
    ]
}

fn print_raw_lines(lines: &[String]) {
    let mut out = std::io::stdout().lock();
    for line in lines {
        let _ = writeln!(out, "{line}");
    }
    let _ = out.flush();
}
