//! Rendering helpers shared by the subcommands.

use warpflow::{ExecutionReport, ValidationReport};

pub fn print_error(message: &str, json: bool) {
    if json {
        println!("{}", serde_json::json!({"error": message}));
    } else {
        eprintln!("error: {message}");
    }
}

pub fn print_validation_report(report: &ValidationReport, json: bool) {
    if json {
        match serde_json::to_string_pretty(report) {
            Ok(text) => println!("{text}"),
            Err(_) => println!("{}", serde_json::json!({"error": report.to_string()})),
        }
        return;
    }
    eprintln!("{report}");
    if let Some(primary) = report.primary() {
        if let Some(suggestion) = &primary.suggestion {
            eprintln!("suggestion: {suggestion}");
        }
    }
}

pub fn print_report(report: &ExecutionReport, json: bool) {
    if json {
        match serde_json::to_string_pretty(report) {
            Ok(text) => println!("{text}"),
            Err(_) => println!("{}", serde_json::json!({"error": "unserializable report"})),
        }
        return;
    }

    println!(
        "{} · {} ms · execution {}",
        report.final_status, report.duration_ms, report.execution_id
    );
    if !report.outputs.is_empty() {
        println!("outputs:");
        for (path, value) in &report.outputs {
            println!("  {path} = {value}");
        }
    }
    for warning in &report.warnings {
        println!("warning: {warning}");
    }
    if let Some(error) = &report.error {
        eprintln!("error: {error}");
        if let Some(suggestion) = &error.suggestion {
            eprintln!("suggestion: {suggestion}");
        }
    }
    if let Some(path) = &report.trace_path {
        println!("trace: {}", path.display());
    }
    if let Some(path) = &report.debug_path {
        println!("debug: {}", path.display());
    }
}
