//! Human-readable text output
//!
//! The benchmark's product output is plain text on stdout: a one-time
//! banner describing the machine and the load, then one summary line per
//! completed round. Everything else goes through `tracing`.

use crate::stats::RoundSummary;

/// Print the one-time benchmark banner and the summary header.
///
/// Shown once per process, right before the first round begins so the
/// connection count reflects the actual stabilized membership.
pub fn print_banner(nodes: usize, connections: usize, msgs_per_connection: u64) {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string());

    println!();
    println!("{:<36}{} ({})", "OS:", std::env::consts::OS, std::env::consts::ARCH);
    println!("{:<36}{}", "Hostname:", host);
    println!("{:<36}{}", "Processor count:", num_cpus::get());
    println!("{:<36}{}", "Nodes:", nodes);
    println!("{:<36}{}", "Connections:", connections);
    println!(
        "{:<36}{}",
        "Msgs sent/received per connection:",
        format_number(msgs_per_connection)
    );
    println!();
    println!(
        "{:>11}, {:>11}, {:>13}, {:>13}, {:>11}, {:>11}",
        "Connections", "Actors/node", "Total [actor]", "Total [msg]", "Msgs/sec", "Total [ms]"
    );
}

/// Print one summary line for a completed round
pub fn print_round_line(summary: &RoundSummary) {
    println!("{}", format_round_line(summary));
}

/// Print the closing line after the final round
pub fn print_complete() {
    println!();
    println!("Benchmark complete.");
}

fn format_round_line(summary: &RoundSummary) -> String {
    format!(
        "{:>11}, {:>11}, {:>13}, {:>13}, {:>11}, {:>11.2}",
        summary.connections,
        summary.actors_per_node,
        format_number(summary.total_actors as u64),
        format_number(summary.total_messages),
        format_number(summary.msgs_per_sec),
        summary.avg_elapsed_ms
    )
}

/// Format a number with thousands separators
fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::new();
    let mut count = 0;

    for c in s.chars().rev() {
        if count > 0 && count % 3 == 0 {
            result.push(',');
        }
        result.push(c);
        count += 1;
    }

    result.chars().rev().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_number() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1_000), "1,000");
        assert_eq!(format_number(100_000), "100,000");
        assert_eq!(format_number(1_234_567_890), "1,234,567,890");
    }

    #[test]
    fn test_round_line_columns() {
        let summary = RoundSummary {
            round: 1,
            connections: 1,
            actors_per_node: 5,
            total_actors: 10,
            total_messages: 200_000,
            msgs_per_sec: 100_000,
            avg_elapsed_ms: 2_000.0,
        };

        let line = format_round_line(&summary);
        let fields: Vec<&str> = line.split(", ").collect();
        assert_eq!(fields.len(), 6);
        assert_eq!(fields[0].trim(), "1");
        assert_eq!(fields[1].trim(), "5");
        assert_eq!(fields[2].trim(), "10");
        assert_eq!(fields[3].trim(), "200,000");
        assert_eq!(fields[4].trim(), "100,000");
        assert_eq!(fields[5].trim(), "2000.00");
    }

    #[test]
    fn test_round_line_alignment_is_stable() {
        let small = format_round_line(&RoundSummary {
            round: 1,
            connections: 1,
            actors_per_node: 5,
            total_actors: 10,
            total_messages: 100,
            msgs_per_sec: 50,
            avg_elapsed_ms: 1.25,
        });
        let large = format_round_line(&RoundSummary {
            round: 9,
            connections: 45,
            actors_per_node: 45,
            total_actors: 4_050,
            total_messages: 9_000_000,
            msgs_per_sec: 1_250_000,
            avg_elapsed_ms: 7_200.5,
        });

        // Columns keep their width as the numbers grow.
        assert_eq!(small.len(), large.len());
    }
}
