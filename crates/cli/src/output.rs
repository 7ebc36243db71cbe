//! Output formatting for CLI

use colored::Colorize;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};

use webrig_e2e::{Config, ProcessSpec, Readiness, SuiteReport};

fn table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Summary of one suite run
pub fn print_report(report: &SuiteReport) {
    let mut table = table();
    table.set_header(vec!["Suite", "Result", "Exit code", "Duration", "Started"]);
    let result = if report.success {
        "✓ passed".green().to_string()
    } else {
        "✗ failed".red().to_string()
    };
    table.add_row(vec![
        report.name.clone(),
        result,
        report
            .exit_code
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".to_string()),
        format!("{:.1}s", report.duration_ms as f64 / 1000.0),
        report.started_at.format("%H:%M:%S").to_string(),
    ]);
    println!("{table}");

    if let Some(error) = &report.error {
        println!("  {}", error.dimmed());
    }
}

fn readiness_summary(readiness: &Readiness) -> String {
    match readiness {
        Readiness::OutputContains { pattern } => format!("output contains \"{}\"", pattern),
        Readiness::HttpPoll {
            url,
            expect_success,
            check_status,
        } => {
            let what = if *check_status { "2xx from" } else { "response from" };
            if *expect_success {
                format!("{} {}", what, url)
            } else {
                format!("no {} {}", what, url)
            }
        }
    }
}

fn process_row(role: &str, spec: &ProcessSpec) -> Vec<String> {
    let mut command = spec.program();
    for arg in &spec.args {
        command.push(' ');
        command.push_str(arg);
    }
    vec![
        role.to_string(),
        spec.name.clone(),
        command,
        readiness_summary(&spec.readiness),
        spec.stop_signal.clone(),
    ]
}

/// Processes, suite and limits a run would use
pub fn print_config(config: &Config) {
    let mut table = table();
    table.set_header(vec!["Role", "Name", "Command", "Ready when", "Stop signal"]);
    table.add_row(process_row("server", &config.server));
    table.add_row(process_row("driver", &config.driver));
    println!("{table}");

    println!("  Suite:      {} {}", config.suite.command, config.suite.args.join(" "));
    println!("  Base URL:   {}", config.suite.base_url);
    println!("  Driver URL: {}", config.suite.driver_url);
    println!(
        "  Timeouts:   ready {}s, stop grace {}ms, poll {}ms",
        config.timeouts.readiness_secs, config.timeouts.stop_grace_ms, config.timeouts.poll_interval_ms
    );
    println!("  Results:    {}", config.output_dir.display());
}

/// Print success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green(), message);
}

/// Print error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red(), message);
}

/// Print warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "!".yellow(), message);
}

/// Print info message
pub fn print_info(message: &str) {
    println!("{} {}", "i".blue(), message);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_readiness_summary() {
        assert_eq!(
            readiness_summary(&Readiness::output("running on port 4444")),
            "output contains \"running on port 4444\""
        );
        assert_eq!(
            readiness_summary(&Readiness::reachable("http://localhost:8080/")),
            "response from http://localhost:8080/"
        );
        assert_eq!(
            readiness_summary(&Readiness::HttpPoll {
                url: "http://localhost:8080/".into(),
                expect_success: false,
                check_status: true,
            }),
            "no 2xx from http://localhost:8080/"
        );
    }

    #[test]
    fn test_process_row() {
        let config = Config::default();
        let row = process_row("driver", &config.driver);
        assert_eq!(row[1], "ghostdriver");
        assert!(row[2].ends_with("--webdriver=4444 --ignore-ssl-errors=true"));
        assert_eq!(row[4], "SIGTERM");
    }
}
