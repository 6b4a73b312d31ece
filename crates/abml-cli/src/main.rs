use std::{env, fs, process::ExitCode, time::Instant};

use abml::{Document, DocumentExecutor, ExecutorConfig};

fn main() -> ExitCode {
    let args: Vec<String> = env::args().collect();
    let trace = args.iter().any(|a| a == "--trace");
    let file_path = args.iter().skip(1).find(|a| *a != "--trace").map_or("example.abml.yaml", String::as_str);
    let source = match read_file(file_path) {
        Ok(source) => source,
        Err(err) => {
            eprintln!("error: {err}");
            return ExitCode::FAILURE;
        }
    };

    let document = match Document::from_yaml(&source) {
        Ok(document) => document,
        Err(err) => {
            eprintln!("error: invalid document:\n{err}");
            return ExitCode::FAILURE;
        }
    };

    let config = ExecutorConfig { trace, ..ExecutorConfig::default() };

    let start = Instant::now();
    let mut executor = DocumentExecutor::new(document, config);
    let report = executor.run();
    let elapsed = start.elapsed();

    eprintln!("ran {} tick(s) in {elapsed:?}", report.ticks);
    if report.deadlocked {
        eprintln!("deadlock: no channel could make progress");
    }
    for (channel, error) in &report.channel_errors {
        eprintln!("channel '{channel}' failed: {error}");
    }

    if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn read_file(path: &str) -> Result<String, std::io::Error> {
    fs::read_to_string(path)
}
