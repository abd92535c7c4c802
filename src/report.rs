//! Console rendering of benchmark progress and results.

use crate::client::{ClientError, RunReport};
use crate::config::ClientConfig;
use crate::envelope::ENVELOPE_WIDTH;
use crate::size::{format_bytes, format_rate};
use crate::stats::{CycleSample, RunStatistics, RunStatus};
use chrono::Local;
use std::fmt::Write;

/// Line announcing the run, printed before the handshake.
pub fn header(config: &ClientConfig) -> String {
    format!(
        "[{}] Requesting [{}] x {} from [{}:{}] with [{} Bytes] requests",
        Local::now().format("%Y-%m-%d %H:%M:%S"),
        format_bytes(config.payload_size() as f64),
        config.cycles,
        config.host,
        config.port,
        ENVELOPE_WIDTH
    )
}

/// Handshake result line.
pub fn handshake(status: RunStatus) -> String {
    match status {
        RunStatus::Completed => "Host self-test: [PASS]".to_string(),
        RunStatus::Rejected => {
            "Host self-test: [FAILED]\n  Host self-test reported insufficient memory...".to_string()
        }
    }
}

/// Handshake failure line.
pub fn handshake_error(error: &ClientError) -> String {
    format!("Host self-test: [FAILED]\n  {}", error)
}

/// One line per cycle, index right-aligned to the cycle count width.
pub fn cycle_line(sample: &CycleSample, cycles: u32) -> String {
    let width = cycles.to_string().len();
    let position = format!("[{:>width$}/{}]", sample.index, cycles, width = width);

    if sample.succeeded {
        format!(
            "  Test {}: Time: [{:.4}(s)], Bytes Received: [{}], Rate: [{}]",
            position,
            sample.elapsed.as_secs_f64(),
            format_bytes(sample.bytes_received as f64),
            format_rate(sample.rate())
        )
    } else {
        format!(
            "  Test {}: Failed... {}",
            position,
            sample.error.as_deref().unwrap_or("unknown error")
        )
    }
}

/// Final statistics block.
pub fn summary(host: &str, stats: &RunStatistics) -> String {
    let mut out = String::new();
    if stats.status == RunStatus::Rejected {
        let _ = write!(
            out,
            "\nRun rejected by [{}]: 0 of {} cycles attempted",
            host, stats.cycles
        );
        return out;
    }

    let _ = writeln!(out, "\nResponse statistics for [{}]:", host);
    let _ = writeln!(
        out,
        "  Received: [{}], Lost: [{} - {:.2}% loss]",
        stats.completed,
        stats.failed,
        stats.loss_percent.unwrap_or(0.0)
    );
    let _ = writeln!(out, "Transfer rate:");
    let _ = write!(
        out,
        "  Minimum: [{}], Maximum: [{}], Average: [{}]",
        format_rate(stats.min_rate),
        format_rate(stats.max_rate),
        format_rate(stats.avg_rate)
    );
    out
}

/// Full report for a finished run, without the progress lines.
pub fn render(config: &ClientConfig, report: &RunReport) -> String {
    format!(
        "{}{}",
        handshake(report.status),
        summary(&config.host, &report.stats)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn completed() -> RunStatistics {
        RunStatistics {
            status: RunStatus::Completed,
            cycles: 10,
            completed: 7,
            failed: 3,
            total_bytes: 7 * 1024,
            loss_percent: Some(30.0),
            min_rate: 0.0,
            max_rate: 2048.0,
            avg_rate: 1024.0,
        }
    }

    #[test]
    fn test_cycle_line_success() {
        let sample = CycleSample::success(3, Duration::from_millis(500), 102_400);
        let line = cycle_line(&sample, 10);
        assert!(line.starts_with("  Test [ 3/10]: Time: [0.5000(s)]"));
        assert!(line.contains("Bytes Received: [100.000 KiB]"));
        assert!(line.contains("Rate: [200.000 KiB/s]"));
    }

    #[test]
    fn test_cycle_line_failure() {
        let sample = CycleSample::failure(10, Duration::ZERO, "connection refused");
        assert_eq!(
            cycle_line(&sample, 10),
            "  Test [10/10]: Failed... connection refused"
        );
    }

    #[test]
    fn test_summary() {
        let text = summary("10.0.0.2", &completed());
        assert!(text.contains("Response statistics for [10.0.0.2]"));
        assert!(text.contains("Received: [7], Lost: [3 - 30.00% loss]"));
        assert!(text.contains("Minimum: [0.000 B/s]"));
        assert!(text.contains("Maximum: [2.000 KiB/s]"));
        assert!(text.contains("Average: [1.000 KiB/s]"));
    }

    #[test]
    fn test_handshake_error_carries_reason() {
        let error = ClientError::Connect(
            "10.0.0.2:5005".to_string(),
            std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused"),
        );
        assert_eq!(
            handshake_error(&error),
            "Host self-test: [FAILED]\n  Failed to connect to 10.0.0.2:5005: refused"
        );
    }

    #[test]
    fn test_summary_rejected() {
        let text = summary("10.0.0.2", &RunStatistics::rejected(10));
        assert!(text.contains("Run rejected"));
        assert!(!text.contains("loss"));
    }
}
