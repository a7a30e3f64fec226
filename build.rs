use std::ffi::OsStr;
use std::fs;
use std::path::PathBuf;

// Front-end files that may talk to the terminal, the filesystem formats and
// the logging backend. Everything else under src/ is estimation engine.
const FRONT_END_FILES: &[&str] = &["main.rs", "data.rs"];

fn main() {
    println!("cargo:rerun-if-changed=Cargo.toml");
    println!("cargo:rerun-if-changed=build.rs");
    println!("cargo:rerun-if-changed=src");

    enforce_engine_boundary();
}

fn enforce_engine_boundary() {
    let forbidden = [
        "clap::",
        "csv::",
        "comfy_table::",
        "tracing_subscriber::",
        "std::fs::",
        "println!(",
    ];

    let mut violations = Vec::new();
    let mut stack = vec![PathBuf::from("src")];
    while let Some(dir) = stack.pop() {
        let entries = match fs::read_dir(&dir) {
            Ok(e) => e,
            Err(_) => continue,
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                stack.push(path);
                continue;
            }
            if path.extension().and_then(|s| s.to_str()) != Some("rs") {
                continue;
            }
            let is_front_end = path.parent().and_then(|p| p.file_name()) == Some(OsStr::new("src"))
                && path
                    .file_name()
                    .and_then(|s| s.to_str())
                    .is_some_and(|name| FRONT_END_FILES.contains(&name));
            if is_front_end {
                continue;
            }
            let rel = path.to_string_lossy().to_string();
            let src = match fs::read_to_string(&path) {
                Ok(s) => s,
                Err(_) => continue,
            };
            for (line_no, line) in src.lines().enumerate() {
                for token in &forbidden {
                    if line.contains(token) {
                        violations.push(format!(
                            "{}:{} contains forbidden token '{}'",
                            rel,
                            line_no + 1,
                            token
                        ));
                    }
                }
            }
        }
    }

    if !violations.is_empty() {
        eprintln!("\nerror: front-end code leaked into estimation modules:");
        for v in violations {
            eprintln!("  - {v}");
        }
        panic!("front-end leakage in estimation modules");
    }
}
